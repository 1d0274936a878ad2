//! Submitting changes and waiting for the provider to apply them

use log::{debug, info, warn};

use crate::{
    error::ResponderError,
    provider::{Change, ChangeStatus, Provider},
    retry::{Interrupted, RetryPolicy, Shutdown},
};

pub type ChangeId = String;

/// Submit `change` to `zone` as one atomic operation.
///
/// A rejected change (conflict, quota, malformed record) is returned as is. It is not
/// retried, since a blind retry could apply deletions and additions out of order.
pub async fn submit(
    provider: &dyn Provider,
    zone: &str,
    change: &Change,
) -> Result<ChangeId, ResponderError> {
    let info = provider
        .create_change(zone, change)
        .await
        .map_err(|source| ResponderError::ProviderRejected {
            zone: zone.to_owned(),
            source,
        })?;
    info!("Submitted change {} to zone {}", info.id, zone);
    Ok(info.id)
}

/// Poll the status of a submitted change until the provider reports it as done.
///
/// Failing status reads have already been retried by the provider client and are
/// returned as [`ResponderError::ProviderUnavailable`]. A pending status is polled again
/// after the policy interval.
pub async fn await_durable(
    provider: &dyn Provider,
    zone: &str,
    change_id: &str,
    policy: &RetryPolicy,
    shutdown: &Shutdown,
) -> Result<(), ResponderError> {
    let mut attempts = policy.start();
    loop {
        let info = provider
            .get_change(zone, change_id)
            .await
            .map_err(|source| ResponderError::ProviderUnavailable {
                zone: zone.to_owned(),
                change_id: change_id.to_owned(),
                source,
            })?;
        match info.status {
            ChangeStatus::Done => {
                info!("Change {} in zone {} is done", change_id, zone);
                return Ok(());
            }
            ChangeStatus::Pending => {
                debug!(
                    "Change {} in zone {} still pending (attempt {})",
                    change_id,
                    zone,
                    attempts.count()
                );
            }
        }

        attempts.next(shutdown).await.map_err(|e| {
            warn!("Stopped waiting for change {} in zone {}", change_id, zone);
            interrupted(zone, "change to be applied", e)
        })?;
    }
}

pub(crate) fn interrupted(zone: &str, operation: &'static str, e: Interrupted) -> ResponderError {
    match e {
        Interrupted::Exhausted { attempts, elapsed } => ResponderError::Timeout {
            zone: zone.to_owned(),
            operation,
            attempts,
            elapsed_secs: elapsed.as_secs(),
        },
        Interrupted::Cancelled => ResponderError::Cancelled {
            zone: zone.to_owned(),
            operation,
        },
    }
}
