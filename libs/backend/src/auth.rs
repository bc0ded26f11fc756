use std::sync::{Arc, RwLock};

/// Bearer token shared by everything that talks to the backend.
///
/// Created once at startup, the token is set on login and cleared on logout.
#[derive(Clone, Default, Debug)]
pub struct AuthContext {
    token: Arc<RwLock<Option<String>>>,
}

impl AuthContext {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: Arc::new(RwLock::new(token.filter(|t| !t.is_empty()))),
        }
    }

    pub fn set_token(&self, token: impl Into<String>) {
        if let Ok(mut slot) = self.token.write() {
            slot.replace(token.into());
        }
    }

    pub fn clear(&self) {
        if let Ok(mut slot) = self.token.write() {
            slot.take();
        }
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().ok().and_then(|slot| slot.clone())
    }

    pub fn bearer(&self) -> Option<String> {
        self.token().map(|token| format!("Bearer {}", token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_lifecycle() {
        let auth = AuthContext::new(Some(String::new()));
        assert_eq!(auth.token(), None);

        let shared = auth.clone();
        auth.set_token("abc");
        assert_eq!(shared.bearer().as_deref(), Some("Bearer abc"));

        shared.clear();
        assert_eq!(auth.token(), None);
    }
}
