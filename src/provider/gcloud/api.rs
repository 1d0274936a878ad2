//! Wire types of the Cloud DNS v1 REST API that are not part of the provider-neutral model

use serde::Deserialize;

use crate::provider::{ChangeInfo, ChangeStatus, ManagedZone, ProviderError, ResourceRecordSet};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedZonesListResponse {
    #[serde(default)]
    pub managed_zones: Vec<ManagedZone>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecordSetsListResponse {
    #[serde(default)]
    pub rrsets: Vec<ResourceRecordSet>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeResponse {
    pub id: String,
    pub status: ChangeStatus,
}

impl From<ChangeResponse> for ChangeInfo {
    fn from(c: ChangeResponse) -> Self {
        ChangeInfo {
            id: c.id,
            status: c.status,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Convert a failed response into a [`ProviderError`], keeping the API's error message if there is one
pub fn api_error(status: u16, body: &str) -> ProviderError {
    let message = match serde_json::from_str::<ErrorResponse>(body) {
        Ok(e) if !e.error.message.is_empty() => e.error.message,
        _ => body.trim().to_owned(),
    };
    match status {
        401 => ProviderError::Authentication(message),
        _ => ProviderError::Api { status, message },
    }
}

/// Token endpoint and metadata server response
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: u64,
}
