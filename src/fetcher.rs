use crate::config::FetchConfig;
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;

/// A fetched origin-site page.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

/// Network boundary. Fetch failures are recoverable per-item errors,
/// never process-fatal.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage>;
}

pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(config: &FetchConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(config.user_agent.clone())
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| IngestError::Fetch {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        if !status.is_success() {
            return Err(IngestError::Fetch {
                url: url.to_string(),
                message: format!("origin returned HTTP {}", status.as_u16()),
            });
        }

        let body = response.text().await.map_err(|e| IngestError::Fetch {
            url: url.to_string(),
            message: format!("failed reading body: {e}"),
        })?;

        Ok(FetchedPage {
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}
