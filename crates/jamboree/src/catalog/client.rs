use super::normalize;
use super::CatalogError;
use crate::types::Track;
use jamconf::CatalogConfig;
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// HTTP client for the catalog API.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    client: Client,
    base_url: String,
    prefix: String,
}

impl CatalogClient {
    /// `base_url` loses any trailing `/`; `prefix` always gains a leading one.
    pub fn new(base_url: &str, prefix: &str, timeout: Duration) -> Result<Self, CatalogError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            prefix: format!("/{}", prefix.trim().trim_matches('/')),
        })
    }

    pub fn from_config(config: &CatalogConfig) -> Result<Self, CatalogError> {
        Self::new(
            &config.base_url,
            &config.prefix,
            Duration::from_millis(config.timeout_ms),
        )
    }

    /// `GET {base}{prefix}/search/songs?query=...`
    pub async fn search_tracks(&self, query: &str) -> Result<Vec<Track>, CatalogError> {
        let mut url = self.endpoint(&["search", "songs"])?;
        url.query_pairs_mut().append_pair("query", query);

        let doc = self.get_json(url).await?;
        let tracks = normalize::search_results(&doc)?;
        debug!(query, results = tracks.len(), "catalog search");
        Ok(tracks)
    }

    /// `GET {base}{prefix}/songs/{id}`
    pub async fn track_by_id(&self, id: &str) -> Result<Track, CatalogError> {
        let url = self.endpoint(&["songs", id])?;
        let doc = self.get_json(url).await?;
        normalize::track_detail(&doc)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, CatalogError> {
        if self.base_url.is_empty() {
            return Err(CatalogError::NotConfigured);
        }
        let invalid = |reason: String| CatalogError::InvalidUrl {
            url: self.base_url.clone(),
            reason,
        };

        let mut url = Url::parse(&self.base_url).map_err(|e| invalid(e.to_string()))?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| invalid("cannot be a base URL".to_string()))?;
            path.pop_if_empty();
            path.extend(self.prefix.split('/').filter(|s| !s.is_empty()));
            path.extend(segments);
        }
        Ok(url)
    }

    async fn get_json(&self, url: Url) -> Result<Value, CatalogError> {
        let response = self.client.get(url).send().await?;
        if response.status() != StatusCode::OK {
            return Err(CatalogError::Status(response.status()));
        }
        Ok(response.json().await?)
    }
}
