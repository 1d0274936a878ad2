use log::{debug, trace};

use crate::{
    domain::canonicalize,
    error::ResponderError,
    provider::{all_managed_zones, ManagedZone, Provider},
};

/// Maps domains to the most specific managed zone that owns them.
///
/// A resolver holds a snapshot of the zone listing taken by [`ZoneResolver::load()`].
/// It is meant to live for a single batch so that zone reconfigurations between runs are always picked up.
#[derive(Debug, Clone)]
pub struct ZoneResolver {
    project: String,
    zones: Vec<ManagedZone>,
}

impl ZoneResolver {
    /// Fetch the current list of managed zones from the provider
    pub async fn load(provider: &dyn Provider) -> Result<ZoneResolver, ResponderError> {
        let project = provider.project();
        let zones = all_managed_zones(provider)
            .await
            .map_err(|source| ResponderError::ZoneListing {
                project: project.to_owned(),
                source,
            })?;
        debug!("Loaded {} managed zones in project {}", zones.len(), project);
        Ok(ZoneResolver::from_zones(&project, zones))
    }

    pub fn from_zones(project: &str, zones: Vec<ManagedZone>) -> Self {
        ZoneResolver {
            project: project.to_owned(),
            zones,
        }
    }

    /// Return the zone with the longest apex that contains `domain` at a label boundary
    pub fn resolve(&self, domain: &str) -> Result<&ManagedZone, ResponderError> {
        let domain = canonicalize(domain);
        let zone = self
            .zones
            .iter()
            .filter(|z| zone_contains(&z.dns_name, &domain))
            // max_by_key keeps the last of equal maxima, the first listed zone wins ties
            .rev()
            .max_by_key(|z| canonicalize(&z.dns_name).len())
            .ok_or_else(|| ResponderError::ZoneNotFound {
                domain: domain.to_owned(),
                project: self.project.to_owned(),
            })?;
        trace!("Domain {} belongs to zone {} ({})", domain, zone.name, zone.dns_name);
        Ok(zone)
    }
}

// `domain` must be canonical
fn zone_contains(apex: &str, domain: &str) -> bool {
    let apex = canonicalize(apex);
    if apex == "." {
        return true;
    }
    domain == apex || domain.ends_with(&format!(".{}", apex))
}
