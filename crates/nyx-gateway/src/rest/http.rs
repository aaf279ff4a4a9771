//! REST-backed metadata provider

use super::{ConnectionMetadata, MetadataError, MetadataProvider};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// Upper bound on a single metadata request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ApplicationInfo {
    #[serde(default)]
    approximate_guild_count: Option<u64>,
}

/// Fetches metadata from the platform's REST API
#[derive(Debug, Clone)]
pub struct HttpMetadataProvider {
    http: reqwest::Client,
    api_url: Url,
    token: String,
}

impl HttpMetadataProvider {
    /// Create a provider for `api_url` (e.g. `https://discord.com/api/v10`)
    pub fn new(api_url: &str, token: impl Into<String>) -> Result<Self, MetadataError> {
        let mut api_url =
            Url::parse(api_url).map_err(|e| MetadataError::InvalidUrl(format!("{api_url}: {e}")))?;
        if !api_url.path().ends_with('/') {
            let path = format!("{}/", api_url.path());
            api_url.set_path(&path);
        }

        Ok(Self {
            http: reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            api_url,
            token: token.into(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, MetadataError> {
        self.api_url
            .join(path)
            .map_err(|e| MetadataError::InvalidUrl(format!("{path}: {e}")))
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, MetadataError> {
        let url = self.endpoint(path)?;
        tracing::debug!(url = %url, "Fetching gateway metadata");

        let response = self
            .http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, format!("Bot {}", self.token))
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED => Err(MetadataError::Unauthorized),
            status if status.is_success() => Ok(response.json().await?),
            status => Err(MetadataError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

#[async_trait]
impl MetadataProvider for HttpMetadataProvider {
    async fn connection_metadata(&self) -> Result<ConnectionMetadata, MetadataError> {
        self.get("gateway/bot").await
    }

    async fn resource_count(&self) -> Result<u64, MetadataError> {
        let info: ApplicationInfo = self.get("applications/@me").await?;
        Ok(info.approximate_guild_count.unwrap_or_default())
    }
}
