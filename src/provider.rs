//! A provider is a cloud DNS service hosting managed zones, such as Google Cloud DNS.
//! This module holds the provider-neutral zone model and the [`Provider`] trait,
//! concrete providers live in submodules.

mod gcloud;

#[cfg(test)]
use mockall::automock;

pub use self::gcloud::{
    GoogleCloudDnsProvider, GoogleCloudDnsProviderConfig, MetadataTokenSource,
    ServiceAccountTokenSource, TokenSource, CLOUD_DNS_API_BASE, CLOUD_DNS_SCOPE,
};

use std::fmt::Display;

use async_trait::async_trait;
use log::trace;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default TTL for challenge records. Deliberately short so stale challenges
/// expire quickly even if a cleanup never runs.
pub const DEFAULT_TTL: Ttl = 5;

pub type Ttl = u32;

/// A DNS provider exposes managed zones and atomic changes against their record sets.
///
/// All list operations are paged; use [`all_managed_zones()`] and [`all_record_sets()`]
/// to read a complete listing.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Account or project identifier this provider operates on. Used for error context.
    fn project(&self) -> String;

    /// List one page of managed zones
    async fn list_managed_zones(
        &self,
        page_token: Option<String>,
    ) -> Result<Page<ManagedZone>, ProviderError>;

    /// List one page of record sets in a zone
    async fn list_record_sets(
        &self,
        zone: &str,
        page_token: Option<String>,
    ) -> Result<Page<ResourceRecordSet>, ProviderError>;

    /// Submit a change as one atomic unit. Never retried.
    async fn create_change(&self, zone: &str, change: &Change) -> Result<ChangeInfo, ProviderError>;

    /// Read the current status of a previously submitted change
    async fn get_change(&self, zone: &str, change_id: &str) -> Result<ChangeInfo, ProviderError>;
}

/// Errors returned by a provider action
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("[{status}] {message}")]
    Api { status: u16, message: String },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("{0}")]
    Internal(String),
}

impl ProviderError {
    /// Whether retrying the same idempotent request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Api { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Transport(_) => true,
            _ => false,
        }
    }
}

/// One page of a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Page {
            items,
            next_page_token: None,
        }
    }
}

/// A provider-hosted authoritative zone
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedZone {
    /// Opaque provider key of the zone
    pub name: String,
    /// Apex of the zone, fully qualified (`example.com.`)
    pub dns_name: String,
    /// Authoritative nameserver hostnames, in provider order
    #[serde(default)]
    pub name_servers: Vec<String>,
}

/// All values published under one (name, type) key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRecordSet {
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: String,
    #[serde(default)]
    pub ttl: Ttl,
    #[serde(default)]
    pub rrdatas: Vec<String>,
}

impl ResourceRecordSet {
    pub fn key(&self) -> RecordKey {
        (self.name.to_owned(), self.record_type.to_owned())
    }
}

impl Display for ResourceRecordSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} [{}]",
            self.name,
            self.ttl,
            self.record_type,
            self.rrdatas.join(", ")
        )
    }
}

/// Identity of a record set within a zone
pub type RecordKey = (String, String);

/// A set of deletions and additions applied atomically to one zone
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additions: Vec<ResourceRecordSet>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deletions: Vec<ResourceRecordSet>,
}

impl Change {
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.deletions.is_empty()
    }

    /// The deleted record set with the same key as `rrset`, if any
    pub fn deletion_for(&self, rrset: &ResourceRecordSet) -> Option<&ResourceRecordSet> {
        self.deletions
            .iter()
            .find(|d| d.name == rrset.name && d.record_type == rrset.record_type)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Done,
    #[serde(other)]
    Pending,
}

/// Provider-side view of a submitted change
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeInfo {
    pub id: String,
    pub status: ChangeStatus,
}

/// Read all managed zones by following every page
pub async fn all_managed_zones(provider: &dyn Provider) -> Result<Vec<ManagedZone>, ProviderError> {
    let mut zones = Vec::new();
    let mut token: Option<String> = None;
    loop {
        let page = provider.list_managed_zones(token.clone()).await?;
        zones.extend(page.items);
        token = next_token(token, page.next_page_token)?;
        if token.is_none() {
            break;
        }
    }
    trace!("Collected zones {:?}", zones);
    Ok(zones)
}

/// Read all record sets of a zone by following every page
pub async fn all_record_sets(
    provider: &dyn Provider,
    zone: &str,
) -> Result<Vec<ResourceRecordSet>, ProviderError> {
    let mut records = Vec::new();
    let mut token: Option<String> = None;
    loop {
        let page = provider.list_record_sets(zone, token.clone()).await?;
        records.extend(page.items);
        token = next_token(token, page.next_page_token)?;
        if token.is_none() {
            break;
        }
    }
    trace!("Collected {} record sets in zone {}", records.len(), zone);
    Ok(records)
}

// A provider handing out the same page token twice would make us loop forever
fn next_token(
    current: Option<String>,
    next: Option<String>,
) -> Result<Option<String>, ProviderError> {
    match next {
        Some(n) if n.is_empty() => Ok(None),
        Some(n) if current.as_deref() == Some(n.as_str()) => Err(ProviderError::Internal(
            format!("pagination did not advance past page token {}", n),
        )),
        n => Ok(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use totems::assert_err;

    fn zone(name: &str, dns_name: &str) -> ManagedZone {
        ManagedZone {
            name: name.to_owned(),
            dns_name: dns_name.to_owned(),
            name_servers: vec![],
        }
    }

    #[tokio::test]
    async fn should_follow_all_zone_pages() {
        let mut provider = MockProvider::new();
        provider
            .expect_list_managed_zones()
            .with(eq(None))
            .times(1)
            .returning(|_| {
                Ok(Page {
                    items: vec![zone("a", "a.com.")],
                    next_page_token: Some("p2".to_owned()),
                })
            });
        provider
            .expect_list_managed_zones()
            .with(eq(Some("p2".to_owned())))
            .times(1)
            .returning(|_| Ok(Page::last(vec![zone("b", "b.com.")])));

        let zones = all_managed_zones(&provider).await.unwrap();
        assert_eq!(zones, vec![zone("a", "a.com."), zone("b", "b.com.")]);
    }

    #[tokio::test]
    async fn should_reject_stuck_pagination() {
        let mut provider = MockProvider::new();
        provider.expect_list_record_sets().returning(|_, _| {
            Ok(Page {
                items: vec![],
                next_page_token: Some("same".to_owned()),
            })
        });

        assert_err!(all_record_sets(&provider, "zone").await);
    }

    #[test]
    fn should_classify_transient_errors() {
        assert!(ProviderError::Api {
            status: 503,
            message: String::new()
        }
        .is_transient());
        assert!(ProviderError::Api {
            status: 429,
            message: String::new()
        }
        .is_transient());
        assert!(!ProviderError::Api {
            status: 409,
            message: String::new()
        }
        .is_transient());
        assert!(ProviderError::Transport("reset".to_owned()).is_transient());
    }

    #[test]
    fn should_parse_change_status() {
        let done: ChangeStatus = serde_json::from_str("\"done\"").unwrap();
        let pending: ChangeStatus = serde_json::from_str("\"pending\"").unwrap();
        assert_eq!(done, ChangeStatus::Done);
        assert_eq!(pending, ChangeStatus::Pending);
    }

    #[test]
    fn should_treat_unknown_change_status_as_pending() {
        let status: ChangeStatus = serde_json::from_str("\"applying\"").unwrap();
        assert_eq!(status, ChangeStatus::Pending);
    }

    #[test]
    fn should_find_matching_deletion() {
        let rrset = |v: &str| ResourceRecordSet {
            name: "_acme-challenge.example.com.".to_owned(),
            record_type: "TXT".to_owned(),
            ttl: 5,
            rrdatas: vec![v.to_owned()],
        };
        let change = Change {
            additions: vec![rrset("\"new\"")],
            deletions: vec![rrset("\"old\"")],
        };
        assert_eq!(change.deletion_for(&change.additions[0]), Some(&rrset("\"old\"")));
        assert!(!change.is_empty());
        assert!(Change::default().is_empty());
    }
}
