use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CreateLivestream {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

impl CreateLivestream {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
        }
    }

    /// The dashboard refuses blank titles before calling the backend.
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("Please enter a stream title".to_string());
        }
        Ok(())
    }
}
