use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::peer::ViewerPeer;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerState {
    Negotiating,
    Connected,
    Closed,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            PeerState::Negotiating => "negotiating",
            PeerState::Connected => "connected",
            PeerState::Closed => "closed",
        };
        write!(f, "{}", state)
    }
}

pub struct ViewerConnection {
    pub viewer_id: String,
    /// Tells a join apart from an earlier join of the same viewer id.
    pub serial: u64,
    pub state: PeerState,
    /// `None` while the offer is still being prepared.
    pub peer: Option<Arc<dyn ViewerPeer>>,
}

/// One connection per attached viewer, keyed by viewer id.
#[derive(Default)]
pub struct ViewerPool {
    entries: HashMap<String, ViewerConnection>,
    next_serial: u64,
}

impl ViewerPool {
    /// Opens a fresh entry for `viewer_id`, handing back the one it replaces.
    pub fn reserve(&mut self, viewer_id: &str) -> (u64, Option<ViewerConnection>) {
        self.next_serial += 1;
        let serial = self.next_serial;
        let stale = self.entries.insert(
            viewer_id.to_string(),
            ViewerConnection {
                viewer_id: viewer_id.to_string(),
                serial,
                state: PeerState::Negotiating,
                peer: None,
            },
        );
        (serial, stale.map(closed))
    }

    /// Gives the peer back when its entry is gone or was replaced meanwhile.
    pub fn attach(
        &mut self,
        viewer_id: &str,
        serial: u64,
        peer: Arc<dyn ViewerPeer>,
    ) -> Result<(), Arc<dyn ViewerPeer>> {
        match self.entries.get_mut(viewer_id) {
            Some(entry) if entry.serial == serial => {
                entry.peer = Some(peer);
                Ok(())
            }
            _ => Err(peer),
        }
    }

    pub fn peer(&self, viewer_id: &str) -> Option<Arc<dyn ViewerPeer>> {
        self.entries
            .get(viewer_id)
            .and_then(|entry| entry.peer.clone())
    }

    pub fn mark_connected(&mut self, viewer_id: &str, serial: u64) -> bool {
        match self.entries.get_mut(viewer_id) {
            Some(entry) if entry.serial == serial => {
                entry.state = PeerState::Connected;
                true
            }
            _ => false,
        }
    }

    pub fn remove(&mut self, viewer_id: &str) -> Option<ViewerConnection> {
        self.entries.remove(viewer_id).map(closed)
    }

    /// Removes the entry only if it still belongs to the join `serial`.
    pub fn remove_if(&mut self, viewer_id: &str, serial: u64) -> Option<ViewerConnection> {
        match self.entries.get(viewer_id) {
            Some(entry) if entry.serial == serial => self.remove(viewer_id),
            _ => None,
        }
    }

    pub fn drain(&mut self) -> Vec<ViewerConnection> {
        self.entries.drain().map(|(_, entry)| closed(entry)).collect()
    }

    pub fn contains(&self, viewer_id: &str) -> bool {
        self.entries.contains_key(viewer_id)
    }

    pub fn state(&self, viewer_id: &str) -> Option<PeerState> {
        self.entries.get(viewer_id).map(|entry| entry.state)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn viewers(&self) -> Vec<(String, PeerState)> {
        let mut viewers: Vec<_> = self
            .entries
            .values()
            .map(|entry| (entry.viewer_id.clone(), entry.state))
            .collect();
        viewers.sort_by(|a, b| a.0.cmp(&b.0));
        viewers
    }
}

fn closed(mut entry: ViewerConnection) -> ViewerConnection {
    entry.state = PeerState::Closed;
    entry
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use async_trait::async_trait;

    use super::*;
    use crate::peer::SignalData;

    struct NopPeer;

    #[async_trait]
    impl ViewerPeer for NopPeer {
        async fn offer(&self) -> Result<SignalData> {
            Ok(SignalData::offer(""))
        }
        async fn signal(&self, _data: SignalData) -> Result<()> {
            Ok(())
        }
        async fn destroy(&self) {}
    }

    #[test]
    fn test_reserve_attach_remove() {
        let mut pool = ViewerPool::default();
        let (serial, stale) = pool.reserve("v1");
        assert!(stale.is_none());
        assert!(pool.peer("v1").is_none());
        assert_eq!(pool.state("v1"), Some(PeerState::Negotiating));

        assert!(pool.attach("v1", serial, Arc::new(NopPeer)).is_ok());
        assert!(pool.peer("v1").is_some());
        assert!(pool.mark_connected("v1", serial));
        assert_eq!(pool.viewers(), vec![("v1".to_string(), PeerState::Connected)]);

        let removed = pool.remove("v1").unwrap();
        assert_eq!(removed.state, PeerState::Closed);
        assert!(pool.remove("v1").is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_rejoin_replaces_entry() {
        let mut pool = ViewerPool::default();
        let (first, _) = pool.reserve("v1");
        pool.attach("v1", first, Arc::new(NopPeer)).ok();
        let (second, stale) = pool.reserve("v1");
        assert_eq!(pool.len(), 1);
        let stale = stale.unwrap();
        assert_eq!(stale.serial, first);
        assert!(stale.peer.is_some());

        // events of the replaced peer no longer touch the entry
        assert!(!pool.mark_connected("v1", first));
        assert!(pool.remove_if("v1", first).is_none());
        assert!(pool.attach("v1", first, Arc::new(NopPeer)).is_err());
        assert!(pool.contains("v1"));
        assert!(pool.remove_if("v1", second).is_some());
    }

    #[test]
    fn test_drain() {
        let mut pool = ViewerPool::default();
        pool.reserve("v1");
        pool.reserve("v2");
        let drained = pool.drain();
        assert_eq!(drained.len(), 2);
        assert!(drained.iter().all(|entry| entry.state == PeerState::Closed));
        assert!(pool.is_empty());
        assert!(pool.attach("v1", 1, Arc::new(NopPeer)).is_err());
    }
}
