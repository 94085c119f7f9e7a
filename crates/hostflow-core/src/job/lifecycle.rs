//! Start and stop jobs

use super::{HostOperation, JobContext, Outcome};
use crate::error::JobError;
use crate::event::EventType;
use crate::host::{Host, HostStatus, StatusUpdate};
use async_trait::async_trait;
use hostflow_cloud::{CloudError, CloudProvider, InstanceStatus, InstanceTarget, retry_transient};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Power a stopped host back on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartHost {
    /// User-initiated: fail instead of no-op when the host is already running
    #[serde(default)]
    pub strict: bool,
}

/// Power a running host off
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopHost {
    /// User-initiated: fail instead of no-op when the host is already stopped
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Clone, Copy)]
enum PowerAction {
    Start,
    Stop,
}

/// One power transition: `source -> marker -> target`
struct PowerTransition {
    action: PowerAction,
    source: HostStatus,
    marker: HostStatus,
    target: HostStatus,
    live_target: InstanceStatus,
    event: EventType,
    strict: bool,
}

impl PowerTransition {
    fn verb(&self) -> &'static str {
        match self.action {
            PowerAction::Start => "start",
            PowerAction::Stop => "stop",
        }
    }

    async fn call(
        &self,
        provider: &dyn CloudProvider,
        cancel: &CancellationToken,
        target: &InstanceTarget,
    ) -> hostflow_cloud::Result<()> {
        match self.action {
            PowerAction::Start => provider.start_instance(cancel, target).await,
            PowerAction::Stop => provider.stop_instance(cancel, target).await,
        }
    }

    async fn run(
        &self,
        ctx: &JobContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<Outcome, JobError> {
        let host = ctx.load_host().await?;
        let provider = ctx.provider(&host)?;

        let resuming = match host.status {
            status if status == self.target => {
                return self
                    .already_at_target(ctx, provider.as_ref(), &host, cancel)
                    .await;
            }
            status if status == self.marker => {
                if !host.is_owned_by(ctx.job_id()) && !ctx.adopt_abandoned(&host).await? {
                    tracing::info!(
                        "Host {} is already {} under job {:?}; nothing to do",
                        host.id,
                        status,
                        host.last_job_id
                    );
                    return Ok(Outcome::Superseded);
                }
                true
            }
            status if status == self.source => {
                if !ctx.claim(self.source, self.marker).await? {
                    tracing::info!(
                        "Host {} changed before job {} could claim it",
                        host.id,
                        ctx.job_id()
                    );
                    return Ok(Outcome::Superseded);
                }
                false
            }
            status => {
                return Err(JobError::precondition(
                    &host.id,
                    format!("cannot {} a host that is {}", self.verb(), status),
                ));
            }
        };

        if let Err(e) = self.drive(ctx, provider.as_ref(), &host, resuming, cancel).await {
            if matches!(&e, JobError::Provider(cloud) if cloud.is_not_found()) {
                return Err(self.retire(ctx, &host).await);
            }
            ctx.roll_back(self.marker, self.source).await;
            return Err(e);
        }

        if !ctx.advance(self.marker, self.target, None).await? {
            return Err(JobError::precondition(
                &host.id,
                format!("host changed while {} was in flight", self.verb()),
            ));
        }

        ctx.record(self.event, json!({ "from": self.source, "to": self.target }))
            .await;
        Ok(Outcome::Applied)
    }

    /// Provider side effect. A resumed job first checks whether its earlier
    /// attempt already took effect.
    async fn drive(
        &self,
        ctx: &JobContext<'_>,
        provider: &dyn CloudProvider,
        host: &Host,
        resuming: bool,
        cancel: &CancellationToken,
    ) -> Result<(), JobError> {
        if resuming && ctx.live_status(provider, host, cancel).await? == self.live_target {
            tracing::info!(
                "Host {} is already {} at the provider; finishing the status write",
                host.id,
                self.live_target
            );
            return Ok(());
        }

        if cancel.is_cancelled() {
            let operation = format!("{} {}", self.verb(), host.id);
            return Err(CloudError::Cancelled(operation).into());
        }

        let target = host.instance_target();
        let operation = format!("{}_instance", self.verb());
        retry_transient(&ctx.settings().retry, cancel, &operation, || {
            self.call(provider, cancel, &target)
        })
        .await?;
        Ok(())
    }

    /// The instance is gone, so the host can never reach the target.
    /// Move the marker to Terminated and fail without retry.
    async fn retire(&self, ctx: &JobContext<'_>, host: &Host) -> JobError {
        let missing = JobError::precondition(
            &host.id,
            format!(
                "cannot {}: the provider no longer has instance {}",
                self.verb(),
                host.instance_target().instance_id()
            ),
        );

        let update = match StatusUpdate::transition(
            &host.id,
            self.marker,
            HostStatus::Terminated,
            ctx.job_id(),
        ) {
            Ok(update) => update.owned(),
            Err(e) => return e.into(),
        };
        match ctx.write(&update).await {
            Ok(true) => {
                tracing::warn!("Host {}: instance is gone, marked terminated", host.id);
                ctx.record(
                    EventType::HostTerminated,
                    json!({
                        "from": host.status,
                        "to": HostStatus::Terminated,
                        "reason": "instance not found",
                    }),
                )
                .await;
            }
            Ok(false) => ctx.roll_back(self.marker, self.source).await,
            Err(e) => {
                ctx.roll_back(self.marker, self.source).await;
                return e;
            }
        }
        missing
    }

    async fn already_at_target(
        &self,
        ctx: &JobContext<'_>,
        provider: &dyn CloudProvider,
        host: &Host,
        cancel: &CancellationToken,
    ) -> Result<Outcome, JobError> {
        if host.is_owned_by(ctx.job_id()) {
            return Ok(Outcome::AlreadyDone);
        }

        if self.strict {
            return Err(JobError::precondition(
                &host.id,
                format!("host is already {}", host.status),
            ));
        }

        let live = ctx.live_status(provider, host, cancel).await?;
        if live == self.live_target {
            return Ok(Outcome::AlreadyDone);
        }

        Err(JobError::precondition(
            &host.id,
            format!(
                "host is recorded as {} but the provider reports {}",
                host.status, live
            ),
        ))
    }
}

#[async_trait]
impl HostOperation for StartHost {
    const JOB_TYPE: &'static str = "host-start";

    async fn execute(
        &self,
        ctx: &JobContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<Outcome, JobError> {
        PowerTransition {
            action: PowerAction::Start,
            source: HostStatus::Stopped,
            marker: HostStatus::Starting,
            target: HostStatus::Running,
            live_target: InstanceStatus::Running,
            event: EventType::HostStarted,
            strict: self.strict,
        }
        .run(ctx, cancel)
        .await
    }
}

#[async_trait]
impl HostOperation for StopHost {
    const JOB_TYPE: &'static str = "host-stop";

    async fn execute(
        &self,
        ctx: &JobContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<Outcome, JobError> {
        PowerTransition {
            action: PowerAction::Stop,
            source: HostStatus::Running,
            marker: HostStatus::Stopping,
            target: HostStatus::Stopped,
            live_target: InstanceStatus::Stopped,
            event: EventType::HostStopped,
            strict: self.strict,
        }
        .run(ctx, cancel)
        .await
    }
}
