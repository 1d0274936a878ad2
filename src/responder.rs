//! The batch entry points used by an ACME client: publish challenge records for many
//! domains at once, and remove them again afterwards.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use log::{error, info};

use crate::{
    change,
    config::{AuthMode, ResponderConfig},
    domain::{BatchEntry, Challenge, DNS01},
    error::{ResponderError, ZoneFailure},
    plan::{self, Mode},
    propagation::{self, AuthoritativeDnsClient, NameserverQuery, PropagationConfig},
    provider::{
        GoogleCloudDnsProvider, GoogleCloudDnsProviderConfig, ManagedZone, MetadataTokenSource,
        Provider, ServiceAccountTokenSource, TokenSource, Ttl,
    },
    retry::{RetryPolicy, Shutdown},
    zone::ZoneResolver,
};

/// Answers ACME challenges of the types it [supports](ChallengeResponder::supports)
#[async_trait]
pub trait ChallengeResponder: Send + Sync {
    fn supports(&self, challenge_type: &str) -> bool;

    /// Whether callers should prefer [`ChallengeResponder::respond_all`] over one call per challenge
    fn supports_batch(&self) -> bool {
        false
    }

    /// Publish all challenges of the batch and return once they are visible
    async fn respond_all(&self, batch: &[BatchEntry]) -> Result<(), ResponderError>;

    /// Retract the values published for the batch, keeping everything else
    async fn cleanup_all(&self, batch: &[BatchEntry]) -> Result<(), ResponderError>;

    async fn respond(&self, domain: &str, challenge: &Challenge) -> Result<(), ResponderError> {
        self.respond_all(&[BatchEntry::new(domain, challenge.to_owned())])
            .await
    }

    async fn cleanup(&self, domain: &str, challenge: &Challenge) -> Result<(), ResponderError> {
        self.cleanup_all(&[BatchEntry::new(domain, challenge.to_owned())])
            .await
    }
}

/// dns-01 responder for zones hosted in a cloud DNS provider.
///
/// Every batch is grouped by zone. Zones are processed concurrently, the steps within
/// one zone (plan, submit, wait, verify) strictly in sequence.
pub struct CloudDnsResponder {
    provider: Arc<dyn Provider>,
    dns: Arc<dyn NameserverQuery>,
    ttl: Ttl,
    change_poll: RetryPolicy,
    propagation: PropagationConfig,
    shutdown: Shutdown,
}

impl CloudDnsResponder {
    pub fn new(
        provider: Arc<dyn Provider>,
        dns: Arc<dyn NameserverQuery>,
        config: &ResponderConfig,
        shutdown: Shutdown,
    ) -> Self {
        CloudDnsResponder {
            provider,
            dns,
            ttl: config.ttl,
            change_poll: config.change_poll,
            propagation: config.propagation.to_owned(),
            shutdown,
        }
    }

    /// Build a responder talking to Google Cloud DNS.
    /// Fails with [`ResponderError::Configuration`] if the credentials are unusable.
    pub async fn from_config(
        config: &ResponderConfig,
        shutdown: Shutdown,
    ) -> Result<CloudDnsResponder, ResponderError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ResponderError::Configuration(e.to_string()))?;
        let tokens: Arc<dyn TokenSource> = match &config.auth {
            AuthMode::ComputeEngineServiceAccount => Arc::new(MetadataTokenSource::new(http)),
            AuthMode::PrivateKeyJsonFile(path) => {
                let source = ServiceAccountTokenSource::from_file(http, path)
                    .map_err(|e| ResponderError::Configuration(e.to_string()))?;
                info!("Authenticating as service account {}", source.client_email());
                Arc::new(source)
            }
        };

        let provider_config = GoogleCloudDnsProviderConfig {
            api_base: config.api_base.to_owned(),
            request_timeout: config.request_timeout,
            ..GoogleCloudDnsProviderConfig::new(&config.project_id)
        };
        let provider = GoogleCloudDnsProvider::from_config(&provider_config, tokens)
            .await
            .map_err(|e| {
                ResponderError::Configuration(format!(
                    "unable to access Cloud DNS in project {}: {}",
                    config.project_id, e
                ))
            })?;
        info!("Connected to Cloud DNS project {}", config.project_id);

        Ok(CloudDnsResponder::new(
            Arc::new(provider),
            Arc::new(AuthoritativeDnsClient::new(&config.resolvers)),
            config,
            shutdown,
        ))
    }

    async fn run(&self, batch: &[BatchEntry], mode: Mode) -> Result<(), ResponderError> {
        if batch.is_empty() {
            info!("Nothing to do");
            return Ok(());
        }
        let resolver = ZoneResolver::load(self.provider.as_ref()).await?;

        let mut failures: Vec<ZoneFailure> = Vec::new();
        let mut groups: Vec<(ManagedZone, Vec<BatchEntry>)> = Vec::new();
        for entry in batch {
            let entry = BatchEntry::new(&entry.domain, entry.challenge.to_owned());
            match resolver.resolve(&entry.domain) {
                Ok(zone) => match groups.iter_mut().find(|(z, _)| z.name == zone.name) {
                    Some((_, entries)) => entries.push(entry),
                    None => groups.push((zone.to_owned(), vec![entry])),
                },
                Err(e) => {
                    if !failures.iter().any(|f| f.zone == entry.domain) {
                        error!("{}", e);
                        failures.push(ZoneFailure {
                            zone: entry.domain,
                            error: e,
                        });
                    }
                }
            }
        }

        let results = join_all(
            groups
                .iter()
                .map(|(zone, entries)| self.run_zone(zone, entries, mode)),
        )
        .await;
        for ((zone, _), result) in groups.iter().zip(results) {
            if let Err(e) = result {
                error!("Zone {} failed: {}", zone.name, e);
                failures.push(ZoneFailure {
                    zone: zone.name.to_owned(),
                    error: e,
                });
            }
        }

        if failures.is_empty() {
            info!("Completed {} zone(s)", groups.len());
            Ok(())
        } else {
            Err(ResponderError::Batch(failures))
        }
    }

    async fn run_zone(
        &self,
        zone: &ManagedZone,
        entries: &[BatchEntry],
        mode: Mode,
    ) -> Result<(), ResponderError> {
        let provider = self.provider.as_ref();
        info!(
            "{} {} challenge(s) in zone {} ({})",
            match mode {
                Mode::Add => "Publishing",
                Mode::Remove => "Removing",
            },
            entries.len(),
            zone.name,
            zone.dns_name
        );

        let change = plan::generate(provider, &zone.name, entries, mode, self.ttl).await?;
        if change.is_empty() {
            info!("No changes needed in zone {}", zone.name);
            return Ok(());
        }

        let change_id = change::submit(provider, &zone.name, &change).await?;
        change::await_durable(
            provider,
            &zone.name,
            &change_id,
            &self.change_poll,
            &self.shutdown,
        )
        .await?;

        if mode == Mode::Add {
            propagation::verify_propagated(
                self.dns.as_ref(),
                zone,
                &change,
                &self.propagation,
                &self.shutdown,
            )
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ChallengeResponder for CloudDnsResponder {
    fn supports(&self, challenge_type: &str) -> bool {
        challenge_type == DNS01
    }

    fn supports_batch(&self) -> bool {
        true
    }

    async fn respond_all(&self, batch: &[BatchEntry]) -> Result<(), ResponderError> {
        self.run(batch, Mode::Add).await
    }

    async fn cleanup_all(&self, batch: &[BatchEntry]) -> Result<(), ResponderError> {
        self.run(batch, Mode::Remove).await
    }
}

#[cfg(test)]
mod tests {
    use std::{
        net::{IpAddr, Ipv4Addr},
        sync::{Arc, Mutex},
        time::Duration,
    };

    use mockall::predicate::eq;
    use totems::assert_ok;

    use super::*;
    use crate::{
        propagation::MockNameserverQuery,
        provider::{
            Change, ChangeInfo, ChangeStatus, MockProvider, Page, ProviderError,
            ResourceRecordSet,
        },
    };

    fn zone(name: &str, dns_name: &str, nameservers: &[&str]) -> ManagedZone {
        ManagedZone {
            name: name.to_owned(),
            dns_name: dns_name.to_owned(),
            name_servers: nameservers.iter().map(|n| n.to_string()).collect(),
        }
    }

    fn config() -> ResponderConfig {
        let mut config = ResponderConfig::new("proj", AuthMode::ComputeEngineServiceAccount);
        config.change_poll = RetryPolicy::fixed(Duration::from_millis(1)).with_max_attempts(10);
        config.propagation = PropagationConfig {
            retry: RetryPolicy::fixed(Duration::from_millis(1)).with_max_attempts(10),
            settle_delay: Duration::ZERO,
            query_timeout: Duration::from_millis(50),
        };
        config
    }

    fn entry(domain: &str, content: &str) -> BatchEntry {
        BatchEntry::new(domain, Challenge::dns01("_acme-challenge", content))
    }

    fn provider_with_zones(zones: Vec<ManagedZone>) -> MockProvider {
        let mut provider = MockProvider::new();
        provider.expect_project().return_const("proj".to_owned());
        provider
            .expect_list_managed_zones()
            .returning(move |_| Ok(Page::last(zones.clone())));
        provider
    }

    fn serving(values: &'static [&'static str]) -> MockNameserverQuery {
        let mut dns = MockNameserverQuery::new();
        dns.expect_resolve()
            .returning(|_| Ok(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1))));
        dns.expect_query_txt()
            .returning(move |_, _, _| Ok(values.iter().map(|v| v.to_string()).collect()));
        dns
    }

    fn responder(provider: MockProvider, dns: MockNameserverQuery) -> CloudDnsResponder {
        CloudDnsResponder::new(Arc::new(provider), Arc::new(dns), &config(), Shutdown::never())
    }

    #[test]
    fn should_only_support_dns01() {
        let r = responder(MockProvider::new(), MockNameserverQuery::new());
        assert!(r.supports("dns-01"));
        assert!(!r.supports("http-01"));
        assert!(!r.supports("tls-alpn-01"));
        assert!(r.supports_batch());
    }

    #[tokio::test]
    async fn should_respond_end_to_end() {
        let mut provider = provider_with_zones(vec![zone(
            "example-com",
            "example.com.",
            &["ns1.example.net.", "ns2.example.net."],
        )]);
        provider
            .expect_list_record_sets()
            .with(eq("example-com"), eq(None))
            .returning(|_, _| Ok(Page::last(vec![])));
        provider
            .expect_create_change()
            .withf(|zone, change| {
                zone == "example-com"
                    && *change
                        == Change {
                            additions: vec![ResourceRecordSet {
                                name: "_acme-challenge.foo.example.com.".to_owned(),
                                record_type: "TXT".to_owned(),
                                ttl: 5,
                                rrdatas: vec!["\"abc\"".to_owned()],
                            }],
                            deletions: vec![],
                        }
            })
            .times(1)
            .returning(|_, _| {
                Ok(ChangeInfo {
                    id: "1".to_owned(),
                    status: ChangeStatus::Pending,
                })
            });
        provider
            .expect_get_change()
            .with(eq("example-com"), eq("1"))
            .returning(|_, _| {
                Ok(ChangeInfo {
                    id: "1".to_owned(),
                    status: ChangeStatus::Done,
                })
            });

        let mut dns = MockNameserverQuery::new();
        dns.expect_resolve()
            .times(2)
            .returning(|_| Ok(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1))));
        dns.expect_query_txt()
            .withf(|_, name, _| name == "_acme-challenge.foo.example.com.")
            .times(2)
            .returning(|_, _, _| Ok(vec!["abc".to_owned()]));

        let r = responder(provider, dns);
        assert_ok!(
            r.respond("foo.example.com", &Challenge::dns01("_acme-challenge", "abc"))
                .await
        );
    }

    #[tokio::test]
    async fn should_submit_one_change_per_zone() {
        let mut provider = provider_with_zones(vec![
            zone("example-com", "example.com.", &["ns1.example.net."]),
            zone("example-org", "example.org.", &["ns1.example.net."]),
        ]);
        provider
            .expect_list_record_sets()
            .returning(|_, _| Ok(Page::last(vec![])));
        let submitted: Arc<Mutex<Vec<(String, Change)>>> = Arc::new(Mutex::new(vec![]));
        let recorder = submitted.clone();
        provider
            .expect_create_change()
            .times(2)
            .returning(move |zone, change| {
                recorder
                    .lock()
                    .unwrap()
                    .push((zone.to_owned(), change.to_owned()));
                Ok(ChangeInfo {
                    id: zone.to_owned(),
                    status: ChangeStatus::Done,
                })
            });
        provider.expect_get_change().returning(|_, id| {
            Ok(ChangeInfo {
                id: id.to_owned(),
                status: ChangeStatus::Done,
            })
        });

        let r = responder(provider, serving(&["1", "2", "3"]));
        r.respond_all(&[
            entry("a.example.com", "1"),
            entry("b.example.org", "2"),
            entry("c.example.com", "3"),
        ])
        .await
        .unwrap();

        let mut submitted = submitted.lock().unwrap().clone();
        submitted.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(submitted.len(), 2);
        let names = |c: &Change| c.additions.iter().map(|a| a.name.to_owned()).collect::<Vec<_>>();
        assert_eq!(submitted[0].0, "example-com");
        assert_eq!(
            names(&submitted[0].1),
            vec!["_acme-challenge.a.example.com.", "_acme-challenge.c.example.com."]
        );
        assert_eq!(submitted[1].0, "example-org");
        assert_eq!(names(&submitted[1].1), vec!["_acme-challenge.b.example.org."]);
    }

    #[tokio::test]
    async fn should_cleanup_without_verification() {
        let mut provider = provider_with_zones(vec![zone(
            "example-com",
            "example.com.",
            &["ns1.example.net."],
        )]);
        provider.expect_list_record_sets().returning(|_, _| {
            Ok(Page::last(vec![ResourceRecordSet {
                name: "_acme-challenge.example.com.".to_owned(),
                record_type: "TXT".to_owned(),
                ttl: 5,
                rrdatas: vec!["\"mine\"".to_owned(), "\"theirs\"".to_owned()],
            }]))
        });
        provider
            .expect_create_change()
            .withf(|_, change| {
                change.deletions.len() == 1
                    && change.additions.len() == 1
                    && change.additions[0].rrdatas == vec!["\"theirs\"".to_owned()]
            })
            .times(1)
            .returning(|_, _| {
                Ok(ChangeInfo {
                    id: "7".to_owned(),
                    status: ChangeStatus::Pending,
                })
            });
        provider.expect_get_change().returning(|_, _| {
            Ok(ChangeInfo {
                id: "7".to_owned(),
                status: ChangeStatus::Done,
            })
        });

        // No DNS expectations: cleanup must not query nameservers
        let r = responder(provider, MockNameserverQuery::new());
        assert_ok!(
            r.cleanup("example.com", &Challenge::dns01("_acme-challenge", "mine"))
                .await
        );
    }

    #[tokio::test]
    async fn should_skip_submission_when_nothing_changes() {
        let mut provider = provider_with_zones(vec![zone(
            "example-com",
            "example.com.",
            &["ns1.example.net."],
        )]);
        provider
            .expect_list_record_sets()
            .returning(|_, _| Ok(Page::last(vec![])));
        provider.expect_create_change().never();

        let r = responder(provider, MockNameserverQuery::new());
        assert_ok!(r.cleanup_all(&[entry("example.com", "gone")]).await);
    }

    #[tokio::test]
    async fn should_aggregate_zone_failures() {
        let mut provider = provider_with_zones(vec![
            zone("example-com", "example.com.", &["ns1.example.net."]),
            zone("example-org", "example.org.", &["ns1.example.net."]),
        ]);
        provider
            .expect_list_record_sets()
            .returning(|_, _| Ok(Page::last(vec![])));
        provider
            .expect_create_change()
            .returning(|zone, _| match zone {
                "example-com" => Err(ProviderError::Api {
                    status: 409,
                    message: "conflict".to_owned(),
                }),
                _ => Ok(ChangeInfo {
                    id: "2".to_owned(),
                    status: ChangeStatus::Done,
                }),
            });
        provider.expect_get_change().returning(|_, _| {
            Ok(ChangeInfo {
                id: "2".to_owned(),
                status: ChangeStatus::Done,
            })
        });

        let r = responder(provider, serving(&["ok"]));
        let err = r
            .respond_all(&[
                entry("a.example.com", "x"),
                entry("b.example.org", "ok"),
                entry("unmanaged.net", "y"),
            ])
            .await
            .unwrap_err();

        let mut failed = err.failed_zones();
        failed.sort();
        assert_eq!(failed, vec!["example-com", "unmanaged.net."]);
    }

    #[tokio::test]
    async fn should_ignore_empty_batches() {
        // No provider expectations: an empty batch must not reach the API
        let r = responder(MockProvider::new(), MockNameserverQuery::new());
        assert_ok!(r.respond_all(&[]).await);
    }
}
