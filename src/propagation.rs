//! Verifies that the values added by a change are served by every authoritative
//! nameserver of a zone.
//!
//! Nameservers are queried directly, bypassing caching resolvers. Every lookup failure
//! (timeouts, SERVFAIL, unresolvable nameserver) simply means "not propagated yet" and
//! is retried, since propagation delays are expected.

use std::{
    collections::HashSet,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use async_trait::async_trait;
use dnsclient::{sync::DNSClient, UpstreamServer};
use hickory_client::{
    client::{Client, SyncClient},
    op::ResponseCode,
    rr::{DNSClass, Name, RData, RecordType},
    udp::UdpClientConnection,
};
use log::{debug, info, trace};
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use crate::{
    change::interrupted,
    domain::unquote_txt,
    error::ResponderError,
    provider::{Change, ManagedZone, ResourceRecordSet},
    retry::{RetryPolicy, Shutdown},
};

const DNS_PORT: u16 = 53;

/// Settings of the propagation check
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropagationConfig {
    /// Pause between checks of one (nameserver, record) pair, and how long checking may go on
    pub retry: RetryPolicy,
    /// Pause after a pair has been verified, before checking the next one
    pub settle_delay: Duration,
    /// Timeout of a single DNS query
    pub query_timeout: Duration,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        PropagationConfig {
            retry: RetryPolicy::fixed(Duration::from_secs(5))
                .with_max_elapsed(Duration::from_secs(600)),
            settle_delay: Duration::from_secs(1),
            query_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct DnsQueryError(String);

impl From<String> for DnsQueryError {
    fn from(s: String) -> Self {
        DnsQueryError(s)
    }
}

/// Direct access to authoritative nameservers
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NameserverQuery: Send + Sync {
    /// Resolve a nameserver hostname to an address. Never cached.
    async fn resolve(&self, hostname: &str) -> Result<IpAddr, DnsQueryError>;
    /// Query `server` for the TXT records at `name`.
    /// Returns one string per record, with multi-part records concatenated.
    async fn query_txt(
        &self,
        server: IpAddr,
        name: &str,
        timeout: Duration,
    ) -> Result<Vec<String>, DnsQueryError>;
}

/// A [`NameserverQuery`] talking DNS over UDP.
///
/// Nameserver hostnames are looked up through the configured resolvers, TXT queries
/// go straight to the authoritative server.
#[derive(Debug, Clone)]
pub struct AuthoritativeDnsClient {
    resolvers: Vec<SocketAddr>,
}

impl AuthoritativeDnsClient {
    /// Create a client that resolves nameserver hostnames through `resolvers`
    pub fn new(resolvers: &[Ipv4Addr]) -> Self {
        AuthoritativeDnsClient {
            resolvers: resolvers
                .iter()
                .map(|ip| SocketAddr::new(IpAddr::V4(*ip), DNS_PORT))
                .collect(),
        }
    }
}

#[async_trait]
impl NameserverQuery for AuthoritativeDnsClient {
    async fn resolve(&self, hostname: &str) -> Result<IpAddr, DnsQueryError> {
        let servers = self.resolvers.clone();
        let host = hostname.to_owned();
        tokio::task::spawn_blocking(move || -> Result<IpAddr, DnsQueryError> {
            let client = DNSClient::new(servers.into_iter().map(UpstreamServer::new).collect());
            match client.query_a(&host) {
                Ok(addrs) => match addrs.first() {
                    Some(a) => Ok(IpAddr::V4(*a)),
                    None => Err(format!("query for host {} did not return an IPv4 address", host).into()),
                },
                Err(e) => Err(format!("failed to resolve {}: {}", host, e).into()),
            }
        })
        .await
        .map_err(|e| DnsQueryError(e.to_string()))?
    }

    async fn query_txt(
        &self,
        server: IpAddr,
        name: &str,
        timeout: Duration,
    ) -> Result<Vec<String>, DnsQueryError> {
        let name = Name::from_ascii(name)
            .map_err(|e| DnsQueryError(format!("invalid name {}: {}", name, e)))?;
        let query = tokio::task::spawn_blocking(move || -> Result<Vec<String>, DnsQueryError> {
            let conn = UdpClientConnection::with_timeout(SocketAddr::new(server, DNS_PORT), timeout)
                .map_err(|e| DnsQueryError(e.to_string()))?;
            let response = SyncClient::new(conn)
                .query(&name, DNSClass::IN, RecordType::TXT)
                .map_err(|e| DnsQueryError(e.to_string()))?;
            match response.response_code() {
                ResponseCode::NoError | ResponseCode::NXDomain => {}
                code => return Err(DnsQueryError(format!("{} answered {}", server, code))),
            }
            Ok(response
                .answers()
                .iter()
                .filter_map(|r| match r.data() {
                    Some(RData::TXT(txt)) => Some(
                        txt.txt_data()
                            .iter()
                            .map(|part| String::from_utf8_lossy(part))
                            .collect::<String>(),
                    ),
                    _ => None,
                })
                .collect())
        });
        // The UDP timeout covers the exchange itself; this one also covers a stuck blocking pool
        match tokio::time::timeout(timeout + Duration::from_secs(1), query).await {
            Ok(joined) => joined.map_err(|e| DnsQueryError(e.to_string()))?,
            Err(_) => Err(DnsQueryError(format!("query to {} timed out", server))),
        }
    }
}

/// Values of `addition` that must be observed: everything not already present in the
/// matching deletion. Returned unquoted.
pub fn required_values(change: &Change, addition: &ResourceRecordSet) -> HashSet<String> {
    let previous = change
        .deletion_for(addition)
        .map(|d| d.rrdatas.as_slice())
        .unwrap_or_default();
    addition
        .rrdatas
        .iter()
        .filter(|v| !previous.contains(v))
        .map(|v| unquote_txt(v).to_owned())
        .collect()
}

/// Wait until every authoritative nameserver of `zone` serves all values newly added by `change`
pub async fn verify_propagated(
    dns: &dyn NameserverQuery,
    zone: &ManagedZone,
    change: &Change,
    config: &PropagationConfig,
    shutdown: &Shutdown,
) -> Result<(), ResponderError> {
    for nameserver in &zone.name_servers {
        for addition in &change.additions {
            let required = required_values(change, addition);
            if required.is_empty() {
                trace!("Nothing new to verify for {} at {}", addition.name, nameserver);
                continue;
            }
            verify_pair(dns, &zone.name, nameserver, &addition.name, &required, config, shutdown)
                .await?;
            shutdown
                .sleep(config.settle_delay)
                .await
                .map_err(|e| interrupted(&zone.name, "DNS propagation", e))?;
        }
    }
    info!(
        "All {} nameservers of zone {} serve the new records",
        zone.name_servers.len(),
        zone.name
    );
    Ok(())
}

async fn verify_pair(
    dns: &dyn NameserverQuery,
    zone: &str,
    nameserver: &str,
    name: &str,
    required: &HashSet<String>,
    config: &PropagationConfig,
    shutdown: &Shutdown,
) -> Result<(), ResponderError> {
    let mut attempts = config.retry.start();
    loop {
        match observed_values(dns, nameserver, name, config.query_timeout).await {
            Ok(observed) if required.is_subset(&observed) => {
                debug!(
                    "{} serves all {} expected value(s) for {}",
                    nameserver,
                    required.len(),
                    name
                );
                return Ok(());
            }
            Ok(observed) => {
                debug!(
                    "{} does not serve all values for {} yet (expected {:?}, got {:?})",
                    nameserver, name, required, observed
                );
            }
            Err(e) => debug!("Checking {} at {} failed: {}", name, nameserver, e),
        }
        attempts
            .next(shutdown)
            .await
            .map_err(|e| interrupted(zone, "DNS propagation", e))?;
    }
}

async fn observed_values(
    dns: &dyn NameserverQuery,
    nameserver: &str,
    name: &str,
    timeout: Duration,
) -> Result<HashSet<String>, DnsQueryError> {
    let addr = dns.resolve(nameserver).await?;
    trace!("Querying {} ({}) for TXT {}", nameserver, addr, name);
    let values = dns.query_txt(addr, name, timeout).await?;
    Ok(values.iter().map(|v| unquote_txt(v).to_owned()).collect())
}
