//! Comparing recorded host status with what the provider reports
//!
//! Jobs never overwrite a status because the provider disagrees with it.
//! Disagreements are surfaced here and fixed by a reconcile job, which walks
//! the record to the provider's state along legal edges.
//!
//! In-flight markers are left alone while their lease runs. A marker past
//! its lease belongs to a job that died between claim and completion; it is
//! reported as abandoned and settled to whatever the provider shows.

use crate::error::JobError;
use crate::host::{Host, HostStatus};
use crate::store::HostStore;
use chrono::{Duration, Utc};
use std::time::Duration as StdDuration;
use hostflow_cloud::{InstanceStatus, ProviderRegistry, RetryConfig, retry_transient};
use tokio_util::sync::CancellationToken;

/// Result of comparing a host record against its live instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusComparison {
    /// Record and instance agree
    Agrees,
    /// A job holds an in-flight marker; the record is expected to lag
    InFlight,
    /// The provider reports a transient or unknown state
    Indeterminate,
    /// Record disagrees; `expected` is the status matching the instance
    Disagrees { expected: HostStatus },
    /// In-flight marker past its lease; `expected` is where it should settle
    Abandoned { expected: HostStatus },
}

impl StatusComparison {
    pub fn is_disagreement(&self) -> bool {
        matches!(
            self,
            StatusComparison::Disagrees { .. } | StatusComparison::Abandoned { .. }
        )
    }

    /// Status the record should move to, if any
    pub fn expected(&self) -> Option<HostStatus> {
        match self {
            StatusComparison::Disagrees { expected } | StatusComparison::Abandoned { expected } => {
                Some(*expected)
            }
            _ => None,
        }
    }
}

/// Compare a host record, including the age of any in-flight marker, with
/// its live instance
pub fn compare_host(host: &Host, live: InstanceStatus, marker_lease: StdDuration) -> StatusComparison {
    if !host.status.is_in_flight() {
        return compare(host.status, live);
    }
    if !host.marker_expired(marker_lease) {
        return StatusComparison::InFlight;
    }
    match settle_marker(host.status, live) {
        Some(expected) => StatusComparison::Abandoned { expected },
        None => StatusComparison::Indeterminate,
    }
}

/// Where an abandoned marker lands given the instance's actual state.
/// Either the action happened (forward) or it did not (back to the source).
fn settle_marker(marker: HostStatus, live: InstanceStatus) -> Option<HostStatus> {
    use HostStatus as H;
    use InstanceStatus as I;

    match (marker, live) {
        (_, I::Pending | I::Unknown) => None,
        (H::Building, I::Terminated) => Some(H::Uninitialized),
        (H::Building, I::Stopped) => None,
        (_, I::Terminated) => Some(H::Terminated),
        (_, I::Running) => Some(H::Running),
        (_, I::Stopped) => Some(H::Stopped),
    }
}

/// Compare a recorded status with a live instance status
pub fn compare(status: HostStatus, live: InstanceStatus) -> StatusComparison {
    use HostStatus as H;
    use InstanceStatus as I;

    if status.is_in_flight() {
        return StatusComparison::InFlight;
    }

    match (status, live) {
        (H::Terminated, _) => StatusComparison::Agrees,
        (_, I::Pending | I::Unknown) => StatusComparison::Indeterminate,
        (H::Uninitialized, I::Terminated) => StatusComparison::Agrees,
        (H::Uninitialized, _) => StatusComparison::Indeterminate,
        (H::Decommissioned, I::Running | I::Stopped) => StatusComparison::Agrees,
        (H::Running, I::Running) | (H::Stopped, I::Stopped) => StatusComparison::Agrees,
        (_, I::Running) => StatusComparison::Disagrees {
            expected: H::Running,
        },
        (_, I::Stopped) => StatusComparison::Disagrees {
            expected: H::Stopped,
        },
        (_, I::Terminated) => StatusComparison::Disagrees {
            expected: H::Terminated,
        },
    }
}

/// A host whose record disagrees with its instance
#[derive(Debug, Clone)]
pub struct Disagreement {
    pub host: Host,
    pub live: InstanceStatus,
    pub expected: HostStatus,
}

/// Hosts whose record disagrees with the provider: settled hosts whose
/// status has not changed for `staleness`, and in-flight markers older than
/// `marker_lease`. Hosts whose provider cannot be queried are skipped with a
/// warning.
pub async fn find_stale_disagreements(
    hosts: &dyn HostStore,
    providers: &ProviderRegistry,
    retry: &RetryConfig,
    staleness: StdDuration,
    marker_lease: StdDuration,
    cancel: &CancellationToken,
) -> Result<Vec<Disagreement>, JobError> {
    let staleness = Duration::from_std(staleness).unwrap_or_else(|_| Duration::days(36500));
    let cutoff = Utc::now().checked_sub_signed(staleness);
    let mut found = Vec::new();

    for host in hosts.list().await? {
        if host.status == HostStatus::Terminated {
            continue;
        }
        if host.status.is_in_flight() {
            if !host.marker_expired(marker_lease) {
                continue;
            }
        } else if cutoff.is_some_and(|cutoff| host.status_changed_at > cutoff) {
            continue;
        }

        let provider = match providers.get(host.provider) {
            Ok(provider) => provider,
            Err(e) => {
                tracing::warn!("Skipping host {}: {}", host.id, e);
                continue;
            }
        };
        let target = host.instance_target();
        let live = match retry_transient(retry, cancel, "get_instance_status", || {
            provider.get_instance_status(cancel, &target)
        })
        .await
        {
            Ok(live) => live,
            Err(e) => {
                tracing::warn!("Skipping host {}: {}", host.id, e);
                continue;
            }
        };

        if let Some(expected) = compare_host(&host, live, marker_lease).expected() {
            tracing::info!(
                "Host {} is recorded {} but the provider reports {}",
                host.id,
                host.status,
                live
            );
            found.push(Disagreement {
                host,
                live,
                expected,
            });
        }
    }

    Ok(found)
}
