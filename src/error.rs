use std::fmt::Display;

use itertools::Itertools;
use thiserror::Error;

use crate::provider::ProviderError;

/// Errors produced while responding to or cleaning up a batch of challenges
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResponderError {
    /// No usable authentication method or otherwise unusable settings. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("domain {domain} is not managed in this account [project_id={project}]")]
    ZoneNotFound { domain: String, project: String },
    /// Listing the managed zones failed, so no domain could be mapped to a zone
    #[error("failed to list managed zones in project {project}: {source}")]
    ZoneListing {
        project: String,
        source: ProviderError,
    },
    #[error("failed to compute changes for zone {zone}: {message}")]
    DiffComputation { zone: String, message: String },
    #[error("zone {zone} rejected the change: {source}")]
    ProviderRejected {
        zone: String,
        source: ProviderError,
    },
    #[error("failed to read status of change {change_id} in zone {zone}: {source}")]
    ProviderUnavailable {
        zone: String,
        change_id: String,
        source: ProviderError,
    },
    #[error("gave up waiting for {operation} in zone {zone} after {attempts} attempts ({elapsed_secs}s)")]
    Timeout {
        zone: String,
        operation: &'static str,
        attempts: u32,
        elapsed_secs: u64,
    },
    #[error("{operation} in zone {zone} was cancelled")]
    Cancelled {
        zone: String,
        operation: &'static str,
    },
    #[error("{}", BatchFailures(.0))]
    Batch(Vec<ZoneFailure>),
}

/// The failure of one zone group within a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneFailure {
    /// Zone name, or the offending domain if it could not be mapped to a zone
    pub zone: String,
    pub error: ResponderError,
}

impl Display for ZoneFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.zone, self.error)
    }
}

struct BatchFailures<'a>(&'a [ZoneFailure]);

impl Display for BatchFailures<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} zone(s) failed [{}]: {}",
            self.0.len(),
            self.0.iter().map(|z| z.zone.as_str()).join(", "),
            self.0.iter().join("; ")
        )
    }
}

impl ResponderError {
    /// Zone names (or unresolved domains) named by this error, if it is a batch failure
    pub fn failed_zones(&self) -> Vec<&str> {
        match self {
            ResponderError::Batch(failures) => failures.iter().map(|f| f.zone.as_str()).collect(),
            _ => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_error_should_name_all_zones() {
        let err = ResponderError::Batch(vec![
            ZoneFailure {
                zone: "zone-a".to_owned(),
                error: ResponderError::ProviderRejected {
                    zone: "zone-a".to_owned(),
                    source: ProviderError::Api {
                        status: 409,
                        message: "conflict".to_owned(),
                    },
                },
            },
            ZoneFailure {
                zone: "unmanaged.org.".to_owned(),
                error: ResponderError::ZoneNotFound {
                    domain: "unmanaged.org.".to_owned(),
                    project: "proj".to_owned(),
                },
            },
        ]);

        let msg = err.to_string();
        assert!(msg.contains("2 zone(s) failed"));
        assert!(msg.contains("zone-a"));
        assert!(msg.contains("conflict"));
        assert!(msg.contains("unmanaged.org. is not managed in this account"));
        assert_eq!(err.failed_zones(), vec!["zone-a", "unmanaged.org."]);
    }
}
