use lazy_static::lazy_static;
use prometheus::{IntCounter, IntGauge, Registry, TextEncoder};

lazy_static! {
    pub static ref STREAMS: IntCounter =
        IntCounter::new("streams_started", "streams that went live").unwrap();
    pub static ref VIEWERS: IntGauge =
        IntGauge::new("viewers", "viewer number reported by the relay").unwrap();
    pub static ref PEER_OFFERS: IntCounter =
        IntCounter::new("peer_offers", "offers sent to viewers").unwrap();
    pub static ref PEER_ERRORS: IntCounter =
        IntCounter::new("peer_errors", "viewer peers that failed").unwrap();
    pub static ref REGISTRY: Registry = {
        let registry = Registry::new_custom(Some("liveshop".to_string()), None).unwrap();
        registry.register(Box::new(STREAMS.clone())).unwrap();
        registry.register(Box::new(VIEWERS.clone())).unwrap();
        registry.register(Box::new(PEER_OFFERS.clone())).unwrap();
        registry.register(Box::new(PEER_ERRORS.clone())).unwrap();
        registry
    };
    pub static ref ENCODER: TextEncoder = TextEncoder::new();
}

/// Prometheus text exposition of every broadcaster metric.
pub fn gather() -> String {
    ENCODER
        .encode_to_string(&REGISTRY.gather())
        .unwrap_or_default()
}
