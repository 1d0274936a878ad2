//! Computes the [`Change`] that adds or removes challenge values in one zone.
//!
//! Record sets are replaced as a whole: an existing record set is deleted and a new
//! one holding the merged values is added in the same change. Values that are not
//! part of the batch are always carried over, so concurrent issuances sharing a
//! record name never clobber each other.

use std::collections::HashMap;

use itertools::Itertools;
use log::{debug, info, trace};

use crate::{
    domain::BatchEntry,
    error::ResponderError,
    provider::{all_record_sets, Change, Provider, RecordKey, ResourceRecordSet, Ttl},
};

/// Whether a plan publishes or retracts challenge values
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Mode {
    Add,
    Remove,
}

/// Read the complete record-set inventory of `zone` and compute the change for `entries`.
/// All entries must belong to `zone`.
pub async fn generate(
    provider: &dyn Provider,
    zone: &str,
    entries: &[BatchEntry],
    mode: Mode,
    ttl: Ttl,
) -> Result<Change, ResponderError> {
    let inventory = all_record_sets(provider, zone)
        .await
        .map_err(|e| ResponderError::DiffComputation {
            zone: zone.to_owned(),
            message: e.to_string(),
        })?;
    debug!("Read {} record sets from zone {}", inventory.len(), zone);

    let change = diff(inventory, entries, mode, ttl).map_err(|message| {
        ResponderError::DiffComputation {
            zone: zone.to_owned(),
            message,
        }
    })?;
    info!(
        "Planned change for zone {}: {} deletion(s), {} addition(s)",
        zone,
        change.deletions.len(),
        change.additions.len()
    );
    Ok(change)
}

/// Compute the change for `entries` against a full zone inventory.
///
/// Fails if the inventory lists the same (name, type) key more than once.
pub fn diff(
    inventory: Vec<ResourceRecordSet>,
    entries: &[BatchEntry],
    mode: Mode,
    ttl: Ttl,
) -> Result<Change, String> {
    let mut existing: HashMap<RecordKey, ResourceRecordSet> = HashMap::new();
    for rrset in inventory {
        if let Some(dup) = existing.insert(rrset.key(), rrset) {
            return Err(format!(
                "record set {} {} was listed more than once",
                dup.name, dup.record_type
            ));
        }
    }

    let mut change = Change::default();
    for (key, values) in group_entries(entries) {
        let current = existing.get(&key);
        let current_values = current.map(|r| r.rrdatas.as_slice()).unwrap_or_default();

        let desired = match mode {
            Mode::Add => merged_values(current_values, &values),
            Mode::Remove => remaining_values(current_values, &values),
        };
        if desired.as_slice() == current_values {
            trace!("No action needed for {} {}", key.0, key.1);
            continue;
        }

        if let Some(current) = current {
            trace!("Replacing existing record set {}", current);
            change.deletions.push(current.to_owned());
        }
        if desired.is_empty() {
            trace!("Last value removed from {} {}, not re-adding", key.0, key.1);
        } else {
            let (name, record_type) = key;
            let rrset = ResourceRecordSet {
                name,
                record_type,
                ttl,
                rrdatas: desired,
            };
            trace!("New record set: {}", rrset);
            change.additions.push(rrset);
        }
    }
    Ok(change)
}

// Group the quoted values of all entries by record key, keeping order of first appearance
fn group_entries(entries: &[BatchEntry]) -> Vec<(RecordKey, Vec<String>)> {
    let mut groups: Vec<(RecordKey, Vec<String>)> = Vec::new();
    for entry in entries {
        let key = (entry.record_name(), entry.challenge.record_type.to_owned());
        let value = entry.challenge.rrdata();
        trace!("Staging challenge {} at {}", entry.challenge, key.0);
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => groups.push((key, vec![value])),
        }
    }
    groups
}

// Existing values first, then new ones, without duplicates
fn merged_values(current: &[String], new: &[String]) -> Vec<String> {
    current.iter().chain(new.iter()).unique().cloned().collect()
}

fn remaining_values(current: &[String], removed: &[String]) -> Vec<String> {
    current
        .iter()
        .filter(|v| !removed.contains(v))
        .cloned()
        .collect()
}
