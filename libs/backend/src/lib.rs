use std::time::Duration;

use anyhow::{anyhow, Result};
use api::request::CreateLivestream;
use api::response::{ApiResponse, ErrorBody, Livestream, LivestreamStats};
use http::{header, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace};

mod auth;

pub use auth::AuthContext;

pub const DEFAULT_URL: &str = "http://localhost:5000/api";

#[derive(Clone)]
pub struct Client {
    base: String,
    http: reqwest::Client,
    auth: AuthContext,
}

impl Client {
    pub fn new(base: &str, auth: AuthContext) -> Result<Self> {
        url::Url::parse(base)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
            http,
            auth,
        })
    }

    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    pub async fn health(&self) -> Result<ApiResponse<serde_json::Value>> {
        self.request::<(), _>(Method::GET, api::path::HEALTH, None, false)
            .await
    }

    /// Streams currently open to viewers.
    pub async fn active_livestreams(&self) -> Result<Vec<Livestream>> {
        let res = self
            .request::<(), _>(Method::GET, api::path::LIVESTREAMS, None, false)
            .await?;
        Ok(res.data.unwrap_or_default())
    }

    pub async fn get_livestream(&self, id: &str) -> Result<Livestream> {
        let res = self
            .request::<(), _>(Method::GET, &api::path::livestream(id), None, false)
            .await?;
        res.data.ok_or_else(|| anyhow!("livestream {} not found", id))
    }

    pub async fn vendor_livestreams(&self) -> Result<Vec<Livestream>> {
        let res = self
            .request::<(), _>(Method::GET, api::path::LIVESTREAMS_VENDOR, None, true)
            .await?;
        Ok(res.data.unwrap_or_default())
    }

    pub async fn livestream_stats(&self) -> Result<LivestreamStats> {
        let res = self
            .request::<(), _>(Method::GET, api::path::LIVESTREAMS_STATS, None, true)
            .await?;
        Ok(res.data.unwrap_or_default())
    }

    pub async fn create_livestream(&self, req: &CreateLivestream) -> Result<Livestream> {
        req.validate().map_err(|e| anyhow!(e))?;
        let res = self
            .request(Method::POST, api::path::LIVESTREAMS_CREATE, Some(req), true)
            .await?;
        res.data
            .ok_or_else(|| anyhow!("backend returned no livestream record"))
    }

    pub async fn start_livestream(&self, stream_key: &str) -> Result<()> {
        self.request::<(), serde_json::Value>(
            Method::POST,
            &api::path::livestream_start(stream_key),
            None,
            true,
        )
        .await?;
        Ok(())
    }

    pub async fn end_livestream(&self, stream_key: &str) -> Result<()> {
        self.request::<(), serde_json::Value>(
            Method::POST,
            &api::path::livestream_end(stream_key),
            None,
            true,
        )
        .await?;
        Ok(())
    }

    async fn request<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        include_auth: bool,
    ) -> Result<ApiResponse<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base, path);
        trace!("[backend] {} {}", method, url);
        let mut req = self
            .http
            .request(method, &url)
            .header(header::CONTENT_TYPE, "application/json");
        if include_auth {
            if let Some(bearer) = self.auth.bearer() {
                req = req.header(header::AUTHORIZATION, bearer);
            }
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body: ErrorBody = response.json().await.unwrap_or_default();
            return Err(anyhow!(response_error(body, status.as_u16())));
        }
        let res: ApiResponse<T> = response.json().await?;
        if !res.success {
            let message = res
                .message
                .unwrap_or_else(|| format!("request to {} failed", path));
            debug!("[backend] {} rejected: {}", path, message);
            return Err(anyhow!(message));
        }
        Ok(res)
    }
}

fn response_error(body: ErrorBody, status: u16) -> String {
    body.message
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("HTTP error! status: {}", status))
}
