use std::{
    path::Path,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use log::{debug, trace};
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{api::api_error, api::TokenResponse, CLOUD_DNS_SCOPE};
use crate::provider::ProviderError;

/// Default location of the workload token on GCE, GKE and Cloud Run
pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: u64 = 3600;
// Refresh tokens this long before the provider considers them expired
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Source of OAuth2 bearer tokens for the Cloud DNS API
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, ProviderError>;
}

#[derive(Debug)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// In-process token cache. Lives only as long as the token source itself.
#[derive(Debug, Default)]
struct TokenCache(Mutex<Option<CachedToken>>);

impl TokenCache {
    async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<String, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<TokenResponse, ProviderError>>,
    {
        let mut cached = self.0.lock().await;
        if let Some(c) = cached.as_ref() {
            if Instant::now() + EXPIRY_MARGIN < c.expires_at {
                trace!("Using cached access token");
                return Ok(c.token.to_owned());
            }
        }
        let fresh = fetch().await?;
        *cached = Some(CachedToken {
            token: fresh.access_token.to_owned(),
            expires_at: Instant::now() + Duration::from_secs(fresh.expires_in),
        });
        Ok(fresh.access_token)
    }
}

async fn read_token_response(response: reqwest::Response) -> Result<TokenResponse, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Authentication(
            api_error(status.as_u16(), &body).to_string(),
        ));
    }
    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| ProviderError::Authentication(format!("invalid token response: {}", e)))
}

/// Ambient workload credentials, read from the compute metadata server
#[derive(Debug)]
pub struct MetadataTokenSource {
    client: Client,
    url: String,
    cache: TokenCache,
}

impl MetadataTokenSource {
    pub fn new(client: Client) -> Self {
        Self::with_url(client, METADATA_TOKEN_URL)
    }

    /// Use a non-default metadata endpoint
    pub fn with_url(client: Client, url: &str) -> Self {
        MetadataTokenSource {
            client,
            url: url.to_owned(),
            cache: TokenCache::default(),
        }
    }

    async fn fetch(&self) -> Result<TokenResponse, ProviderError> {
        debug!("Requesting access token from metadata server");
        let response = self
            .client
            .get(&self.url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| {
                ProviderError::Authentication(format!("metadata server unreachable: {}", e))
            })?;
        read_token_response(response).await
    }
}

#[async_trait]
impl TokenSource for MetadataTokenSource {
    async fn access_token(&self) -> Result<String, ProviderError> {
        self.cache.get_or_fetch(|| self.fetch()).await
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    token_uri: Option<String>,
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

/// Credentials from a service-account JSON key file, exchanged for access tokens
/// through a signed JWT assertion
pub struct ServiceAccountTokenSource {
    client: Client,
    client_email: String,
    token_uri: String,
    key: EncodingKey,
    cache: TokenCache,
}

impl ServiceAccountTokenSource {
    /// Load a service-account key file (`client_email`, `private_key`, optionally `token_uri`)
    pub fn from_file(client: Client, path: &Path) -> Result<Self, ProviderError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProviderError::Authentication(format!(
                "failed to read key file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(client, &content).map_err(|e| match e {
            ProviderError::Authentication(msg) => {
                ProviderError::Authentication(format!("{}: {}", path.display(), msg))
            }
            e => e,
        })
    }

    pub fn from_json(client: Client, json: &str) -> Result<Self, ProviderError> {
        let key: ServiceAccountKey = serde_json::from_str(json)
            .map_err(|e| ProviderError::Authentication(format!("invalid key file: {}", e)))?;
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| ProviderError::Authentication(format!("invalid private key: {}", e)))?;
        Ok(ServiceAccountTokenSource {
            client,
            client_email: key.client_email,
            token_uri: key
                .token_uri
                .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_owned()),
            key: encoding_key,
            cache: TokenCache::default(),
        })
    }

    /// Service account this source authenticates as
    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    fn assertion(&self) -> Result<String, ProviderError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ProviderError::Internal(e.to_string()))?
            .as_secs();
        let claims = Claims {
            iss: &self.client_email,
            scope: CLOUD_DNS_SCOPE,
            aud: &self.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| ProviderError::Authentication(format!("failed to sign assertion: {}", e)))
    }

    async fn fetch(&self) -> Result<TokenResponse, ProviderError> {
        debug!(
            "Exchanging signed assertion for {} at {}",
            self.client_email, self.token_uri
        );
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", JWT_BEARER_GRANT)
            .append_pair("assertion", &self.assertion()?)
            .finish();
        let response = self
            .client
            .post(&self.token_uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                ProviderError::Authentication(format!("token endpoint unreachable: {}", e))
            })?;
        read_token_response(response).await
    }
}

#[async_trait]
impl TokenSource for ServiceAccountTokenSource {
    async fn access_token(&self) -> Result<String, ProviderError> {
        self.cache.get_or_fetch(|| self.fetch()).await
    }
}
