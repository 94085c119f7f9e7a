//! Decommission, terminate and quarantine jobs

use super::{HostOperation, JobContext, Outcome};
use crate::error::JobError;
use crate::event::EventType;
use crate::host::{HostStatus, StatusUpdate};
use async_trait::async_trait;
use hostflow_cloud::retry_transient;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Re-reads allowed when a concurrent writer keeps moving the host
const TERMINATE_WRITE_ATTEMPTS: usize = 5;

/// Take a host out of service. The instance keeps running until a
/// terminate job removes it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecommissionHost {}

#[async_trait]
impl HostOperation for DecommissionHost {
    const JOB_TYPE: &'static str = "host-decommission";

    async fn execute(
        &self,
        ctx: &JobContext<'_>,
        _cancel: &CancellationToken,
    ) -> Result<Outcome, JobError> {
        let host = ctx.load_host().await?;

        match host.status {
            HostStatus::Decommissioned => Ok(Outcome::AlreadyDone),
            status if status.can_transition_to(HostStatus::Decommissioned) => {
                let update = StatusUpdate::transition(
                    &host.id,
                    status,
                    HostStatus::Decommissioned,
                    ctx.job_id(),
                )?;
                if !ctx.write(&update).await? {
                    tracing::info!("Host {} changed before it could be decommissioned", host.id);
                    return Ok(Outcome::Superseded);
                }
                ctx.record(
                    EventType::HostDecommissioned,
                    json!({ "from": status, "to": HostStatus::Decommissioned }),
                )
                .await;
                Ok(Outcome::Applied)
            }
            status => Err(JobError::precondition(
                &host.id,
                format!("cannot decommission a host that is {}", status),
            )),
        }
    }
}

/// Remove the instance and retire the host record for good
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminateHost {
    /// Terminate from any status, not only `Decommissioned`
    #[serde(default)]
    pub force: bool,
}

impl TerminateHost {
    pub fn forced() -> Self {
        Self { force: true }
    }
}

#[async_trait]
impl HostOperation for TerminateHost {
    const JOB_TYPE: &'static str = "host-terminate";
    const RUNS_WHILE_QUARANTINED: bool = true;

    async fn execute(
        &self,
        ctx: &JobContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<Outcome, JobError> {
        let host = ctx.load_host().await?;
        if host.status == HostStatus::Terminated {
            return Ok(Outcome::AlreadyDone);
        }
        if !self.force && host.status != HostStatus::Decommissioned {
            return Err(JobError::precondition(
                &host.id,
                format!(
                    "host is {}; decommission it first or terminate with force",
                    host.status
                ),
            ));
        }

        // A missing instance counts as terminated
        let provider = ctx.provider(&host)?;
        let target = host.instance_target();
        retry_transient(&ctx.settings().retry, cancel, "terminate_instance", || {
            provider.terminate_instance(cancel, &target)
        })
        .await?;

        let mut current = host;
        for _ in 0..TERMINATE_WRITE_ATTEMPTS {
            let from = current.status;
            let update =
                StatusUpdate::transition(&current.id, from, HostStatus::Terminated, ctx.job_id())?;
            if ctx.write(&update).await? {
                ctx.record(
                    EventType::HostTerminated,
                    json!({ "from": from, "to": HostStatus::Terminated, "forced": self.force }),
                )
                .await;
                return Ok(Outcome::Applied);
            }

            current = ctx.load_host().await?;
            if current.status == HostStatus::Terminated {
                return Ok(Outcome::AlreadyDone);
            }
            if !self.force && current.status != HostStatus::Decommissioned {
                return Err(JobError::precondition(
                    &current.id,
                    format!("host moved to {} during termination", current.status),
                ));
            }
        }

        Err(JobError::precondition(
            ctx.host_id(),
            "host status kept changing during termination",
        ))
    }
}

/// Set or clear the quarantine flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantineHost {
    #[serde(default = "default_quarantined")]
    pub quarantined: bool,
}

fn default_quarantined() -> bool {
    true
}

impl Default for QuarantineHost {
    fn default() -> Self {
        Self { quarantined: true }
    }
}

impl QuarantineHost {
    pub fn release() -> Self {
        Self { quarantined: false }
    }
}

#[async_trait]
impl HostOperation for QuarantineHost {
    const JOB_TYPE: &'static str = "host-quarantine";
    const RUNS_WHILE_QUARANTINED: bool = true;

    async fn execute(
        &self,
        ctx: &JobContext<'_>,
        _cancel: &CancellationToken,
    ) -> Result<Outcome, JobError> {
        let host = ctx.load_host().await?;
        if host.status == HostStatus::Terminated {
            return Err(JobError::precondition(&host.id, "host is terminated"));
        }

        if !ctx
            .hosts()
            .set_quarantined(&host.id, self.quarantined)
            .await?
        {
            return Ok(Outcome::AlreadyDone);
        }

        let event_type = if self.quarantined {
            EventType::HostQuarantined
        } else {
            EventType::HostUnquarantined
        };
        ctx.record(event_type, json!({ "status": host.status })).await;
        Ok(Outcome::Applied)
    }
}
