use std::{net::Ipv4Addr, path::PathBuf, time::Duration};

use crate::{
    error::ResponderError,
    propagation::PropagationConfig,
    provider::{Ttl, CLOUD_DNS_API_BASE, DEFAULT_TTL},
    retry::RetryPolicy,
};

/// Resolvers used to look up the addresses of authoritative nameservers
pub const DEFAULT_RESOLVERS: [Ipv4Addr; 2] = [Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(1, 1, 1, 1)];

/// How to authenticate against the Cloud DNS API
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AuthMode {
    /// Ambient workload credentials from the compute metadata server
    ComputeEngineServiceAccount,
    /// A service-account JSON key file
    PrivateKeyJsonFile(PathBuf),
}

impl AuthMode {
    /// Pick the authentication method from the two user-facing options.
    /// Ambient credentials win if both are given.
    pub fn from_options(
        compute_engine_service_account: bool,
        private_key_json_file: Option<PathBuf>,
    ) -> Result<AuthMode, ResponderError> {
        match (compute_engine_service_account, private_key_json_file) {
            (true, _) => Ok(AuthMode::ComputeEngineServiceAccount),
            (false, Some(path)) => Ok(AuthMode::PrivateKeyJsonFile(path)),
            (false, None) => Err(ResponderError::Configuration(
                "you need to specify authentication options (compute_engine_service_account or private_key_json_file)"
                    .to_owned(),
            )),
        }
    }
}

/// Everything needed to build a [`crate::responder::CloudDnsResponder`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResponderConfig {
    pub project_id: String,
    pub auth: AuthMode,
    /// TTL of the record sets we create
    pub ttl: Ttl,
    /// Polling of submitted changes until the provider reports them as done
    pub change_poll: RetryPolicy,
    pub propagation: PropagationConfig,
    /// Resolvers for nameserver hostname lookups
    pub resolvers: Vec<Ipv4Addr>,
    /// Timeout of every single API request
    pub request_timeout: Duration,
    pub api_base: String,
}

impl ResponderConfig {
    pub fn new(project_id: &str, auth: AuthMode) -> Self {
        ResponderConfig {
            project_id: project_id.to_owned(),
            auth,
            ttl: DEFAULT_TTL,
            change_poll: RetryPolicy::fixed(Duration::from_secs(5))
                .with_max_elapsed(Duration::from_secs(600)),
            propagation: PropagationConfig::default(),
            resolvers: DEFAULT_RESOLVERS.to_vec(),
            request_timeout: Duration::from_secs(30),
            api_base: CLOUD_DNS_API_BASE.to_owned(),
        }
    }
}
