mod api;
mod auth;

pub use auth::{MetadataTokenSource, ServiceAccountTokenSource, TokenSource};

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use log::{debug, trace, warn};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use url::Url;

use self::api::{
    api_error, ChangeResponse, ManagedZonesListResponse, ResourceRecordSetsListResponse,
};
use super::{Change, ChangeInfo, ManagedZone, Page, Provider, ProviderError, ResourceRecordSet};

pub const CLOUD_DNS_API_BASE: &str = "https://dns.googleapis.com/dns/v1";
pub const CLOUD_DNS_SCOPE: &str = "https://www.googleapis.com/auth/ndev.clouddns.readwrite";

/// A [`Provider`] backed by the Google Cloud DNS v1 REST API.
///
/// Read requests that fail transiently (HTTP 429/5xx, connection errors) are retried a
/// bounded number of times. Change submissions are never retried, a conflicting change
/// is returned to the caller as is.
///
/// To create a provider, use the [`GoogleCloudDnsProvider::from_config()`] function.
#[non_exhaustive]
pub struct GoogleCloudDnsProvider {
    client: Client,
    tokens: Arc<dyn TokenSource>,
    project_id: String,
    api_base: Url,
    max_retries: u32,
    retry_backoff: Duration,
}

/// Configuration object for a [`GoogleCloudDnsProvider`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GoogleCloudDnsProviderConfig {
    /// Project that owns the managed zones
    pub project_id: String,
    /// API root, without the `projects/` segment. Defaults to [`CLOUD_DNS_API_BASE`]
    pub api_base: String,
    /// Timeout applied to every single HTTP request
    pub request_timeout: Duration,
    /// How often a failed read request is retried before giving up
    pub max_retries: u32,
    /// Pause between read retries
    pub retry_backoff: Duration,
}

impl GoogleCloudDnsProviderConfig {
    pub fn new(project_id: &str) -> Self {
        GoogleCloudDnsProviderConfig {
            project_id: project_id.to_owned(),
            api_base: CLOUD_DNS_API_BASE.to_owned(),
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

impl GoogleCloudDnsProvider {
    /// Create a new provider. An access token is requested right away so that
    /// broken credentials are reported before any changes are attempted.
    pub async fn from_config(
        config: &GoogleCloudDnsProviderConfig,
        tokens: Arc<dyn TokenSource>,
    ) -> Result<GoogleCloudDnsProvider, ProviderError> {
        if config.project_id.is_empty() {
            return Err(ProviderError::Internal("project id must not be empty".to_owned()));
        }
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProviderError::Internal(format!("failed to create HTTP client: {}", e)))?;
        let api_base = Url::parse(&config.api_base)
            .map_err(|e| ProviderError::Internal(format!("invalid API base URL: {}", e)))?;

        tokens.access_token().await?;
        debug!("Authenticated against Cloud DNS API at {}", api_base);

        Ok(GoogleCloudDnsProvider {
            client,
            tokens,
            project_id: config.project_id.to_owned(),
            api_base,
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff,
        })
    }

    // Build `<base>/projects/<project>/managedZones/<path...>`, escaping every segment
    fn url(&self, path: &[&str], page_token: Option<&str>) -> Result<Url, ProviderError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| ProviderError::Internal(format!("invalid API base URL: {}", self.api_base)))?
            .pop_if_empty()
            .extend(["projects", self.project_id.as_str(), "managedZones"])
            .extend(path);
        if let Some(token) = page_token {
            url.query_pairs_mut().append_pair("pageToken", token);
        }
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ProviderError> {
        let token = self.tokens.access_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status.as_u16(), &body));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }

    // GET with bounded retries on transient failures. Only used for idempotent reads.
    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, ProviderError> {
        let mut attempt = 0;
        loop {
            trace!("GET {}", url);
            match self.send(self.client.get(url.clone())).await {
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        "Request to {} failed ({}), retry {}/{}",
                        url, e, attempt, self.max_retries
                    );
                    tokio::time::sleep(self.retry_backoff).await;
                }
                r => return r,
            }
        }
    }
}

#[async_trait]
impl Provider for GoogleCloudDnsProvider {
    fn project(&self) -> String {
        self.project_id.to_owned()
    }

    async fn list_managed_zones(
        &self,
        page_token: Option<String>,
    ) -> Result<Page<ManagedZone>, ProviderError> {
        let url = self.url(&[], page_token.as_deref())?;
        let r: ManagedZonesListResponse = self.get(url).await?;
        Ok(Page {
            items: r.managed_zones,
            next_page_token: r.next_page_token,
        })
    }

    async fn list_record_sets(
        &self,
        zone: &str,
        page_token: Option<String>,
    ) -> Result<Page<ResourceRecordSet>, ProviderError> {
        let url = self.url(&[zone, "rrsets"], page_token.as_deref())?;
        let r: ResourceRecordSetsListResponse = self.get(url).await?;
        Ok(Page {
            items: r.rrsets,
            next_page_token: r.next_page_token,
        })
    }

    async fn create_change(&self, zone: &str, change: &Change) -> Result<ChangeInfo, ProviderError> {
        let url = self.url(&[zone, "changes"], None)?;
        debug!("POST {} ({} deletions, {} additions)", url, change.deletions.len(), change.additions.len());
        let r: ChangeResponse = self.send(self.client.post(url).json(change)).await?;
        Ok(r.into())
    }

    async fn get_change(&self, zone: &str, change_id: &str) -> Result<ChangeInfo, ProviderError> {
        let url = self.url(&[zone, "changes", change_id], None)?;
        let r: ChangeResponse = self.get(url).await?;
        Ok(r.into())
    }
}
