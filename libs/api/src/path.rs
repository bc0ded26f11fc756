pub const HEALTH: &str = "/health";
pub const LIVESTREAMS: &str = "/livestreams";
pub const LIVESTREAMS_CREATE: &str = "/livestreams/create";
pub const LIVESTREAMS_STATS: &str = "/livestreams/stats/overview";
pub const LIVESTREAMS_VENDOR: &str = "/livestreams/vendor/my-streams";

pub fn livestream(id: &str) -> String {
    format!("/livestreams/{}", id)
}

pub fn livestream_start(stream_key: &str) -> String {
    format!("/livestreams/{}/start", stream_key)
}
pub fn livestream_end(stream_key: &str) -> String {
    format!("/livestreams/{}/end", stream_key)
}
