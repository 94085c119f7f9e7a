use super::{HostOperation, JobContext, Outcome};
use crate::error::JobError;
use crate::event::EventType;
use crate::host::{HostStatus, StatusUpdate};
use crate::reconcile::{StatusComparison, compare_host};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Align a host record with what the provider reports.
///
/// No provider side effects; only the record moves, one legal edge at a
/// time, and one `host_status_reconciled` event is appended. An abandoned
/// in-flight marker is taken over first, then rolled back or carried
/// forward to match the instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileHost {}

#[async_trait]
impl HostOperation for ReconcileHost {
    const JOB_TYPE: &'static str = "host-reconcile";

    async fn execute(
        &self,
        ctx: &JobContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<Outcome, JobError> {
        let host = ctx.load_host().await?;
        let provider = ctx.provider(&host)?;
        let live = ctx.live_status(provider.as_ref(), &host, cancel).await?;

        let owned = host.is_owned_by(ctx.job_id());
        // A retry of this job settles its own marker without waiting out the lease
        let lease = if owned {
            std::time::Duration::ZERO
        } else {
            ctx.settings().marker_lease
        };
        let comparison = compare_host(&host, live, lease);
        let expected = match comparison {
            StatusComparison::Disagrees { expected } => expected,
            StatusComparison::Abandoned { expected } => {
                if !owned && !ctx.adopt_abandoned(&host).await? {
                    return Ok(Outcome::Superseded);
                }
                expected
            }
            StatusComparison::InFlight => {
                tracing::info!("Host {} is {}; leaving it to its job", host.id, host.status);
                return Ok(Outcome::Superseded);
            }
            StatusComparison::Agrees | StatusComparison::Indeterminate => {
                return Ok(Outcome::AlreadyDone);
            }
        };
        let adopted = matches!(comparison, StatusComparison::Abandoned { .. });

        if adopted && host.status.can_roll_back_to(expected) {
            let update = StatusUpdate::rollback(&host.id, host.status, expected, ctx.job_id())?;
            if !ctx.write(&update).await? {
                return Err(JobError::precondition(
                    &host.id,
                    format!("host changed while settling {}", host.status),
                ));
            }
        } else if !self
            .walk(ctx, &host.id, host.status, expected, adopted)
            .await?
        {
            return Ok(Outcome::Superseded);
        }

        ctx.record(
            EventType::HostStatusReconciled,
            json!({
                "from": host.status,
                "to": expected,
                "provider_status": live.to_string(),
                "abandoned_by": if adopted && !owned { host.last_job_id.clone() } else { None },
            }),
        )
        .await;
        Ok(Outcome::Applied)
    }
}

impl ReconcileHost {
    /// Move the record from `from` to `goal` one edge at a time. Every step
    /// after the first, and the first too when this job already owns the
    /// host, is conditioned on this job's ownership. `false` if an unowned
    /// first step lost the race.
    async fn walk(
        &self,
        ctx: &JobContext<'_>,
        host_id: &str,
        from: HostStatus,
        goal: HostStatus,
        owned: bool,
    ) -> Result<bool, JobError> {
        let path = from.path_to(goal).ok_or_else(|| {
            JobError::precondition(host_id, format!("no legal path from {} to {}", from, goal))
        })?;

        let mut current = from;
        for (i, next) in path.into_iter().enumerate() {
            let mut update = StatusUpdate::transition(host_id, current, next, ctx.job_id())?;
            if owned || i > 0 {
                update = update.owned();
            }
            if !ctx.write(&update).await? {
                if i == 0 && !owned {
                    return Ok(false);
                }
                return Err(JobError::precondition(
                    host_id,
                    format!("host changed while reconciling from {}", current),
                ));
            }
            current = next;
        }
        Ok(true)
    }
}
