//! Provisioning job: `Uninitialized -> Building -> Starting -> Running`

use super::{HostOperation, JobContext, Outcome};
use crate::error::{JobError, StoreError};
use crate::event::EventType;
use crate::host::{Host, HostStatus};
use async_trait::async_trait;
use hostflow_cloud::{CloudError, CloudProvider, Distro, InstanceStatus, retry_transient};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Allocate an instance for a host and wait for it to boot.
///
/// With a `distro`, a missing host record is created first. Creation at the
/// provider is keyed on the host ID, so a retried job adopts the instance an
/// earlier attempt allocated instead of creating a second one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionHost {
    #[serde(default)]
    pub distro: Option<Distro>,
}

impl ProvisionHost {
    pub fn new(distro: Distro) -> Self {
        Self {
            distro: Some(distro),
        }
    }

    async fn load_or_insert(&self, ctx: &JobContext<'_>) -> Result<Host, JobError> {
        if let Some(host) = ctx.hosts().find(ctx.host_id()).await? {
            return Ok(host);
        }
        let Some(distro) = &self.distro else {
            return Err(JobError::NotFound(ctx.host_id().to_string()));
        };

        let host = Host::new(ctx.host_id(), distro.clone(), &ctx.spec().started_by);
        match ctx.hosts().insert(&host).await {
            Ok(()) => {
                tracing::info!("Registered host {} ({})", host.id, distro.id);
                Ok(host)
            }
            // Lost the insert race; continue with whatever the winner stored
            Err(StoreError::AlreadyExists(_)) => ctx.load_host().await,
            Err(e) => Err(e.into()),
        }
    }

    /// `Building -> Starting`: allocate the instance and record its tag
    async fn allocate(
        &self,
        ctx: &JobContext<'_>,
        provider: &dyn CloudProvider,
        host: &Host,
        cancel: &CancellationToken,
    ) -> Result<(), JobError> {
        let target = host.instance_target();
        let created = retry_transient(&ctx.settings().retry, cancel, "create_instance", || {
            provider.create_instance(cancel, &target)
        })
        .await;

        let tag = match created {
            Ok(tag) => tag,
            Err(e) => {
                ctx.roll_back(HostStatus::Building, HostStatus::Uninitialized)
                    .await;
                return Err(e.into());
            }
        };

        if !ctx
            .advance(HostStatus::Building, HostStatus::Starting, Some(tag.clone()))
            .await?
        {
            return Err(JobError::precondition(
                &host.id,
                "host changed while its instance was being created",
            ));
        }

        ctx.record(
            EventType::HostCreated,
            json!({ "tag": tag, "distro": host.distro.id, "provider": host.provider }),
        )
        .await;
        Ok(())
    }

    /// `Starting -> Running` once the provider reports the instance up
    async fn await_boot(
        &self,
        ctx: &JobContext<'_>,
        provider: &dyn CloudProvider,
        cancel: &CancellationToken,
    ) -> Result<(), JobError> {
        // Re-read to pick up the tag written by `allocate`
        let host = ctx.load_host().await?;
        let settings = ctx.settings();
        let deadline = tokio::time::Instant::now() + settings.provision_timeout;

        loop {
            match ctx.live_status(provider, &host, cancel).await? {
                InstanceStatus::Running => break,
                InstanceStatus::Terminated => {
                    return Err(JobError::precondition(
                        &host.id,
                        "instance was terminated while booting",
                    ));
                }
                status => {
                    tracing::debug!("Host {} is {}, waiting for boot", host.id, status);
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(CloudError::Timeout(format!(
                    "host {} did not boot within {:?}",
                    host.id, settings.provision_timeout
                ))
                .into());
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(CloudError::Cancelled(format!("provision {}", host.id)).into());
                }
                _ = tokio::time::sleep(settings.provision_poll_interval) => {}
            }
        }

        if !ctx
            .advance(HostStatus::Starting, HostStatus::Running, None)
            .await?
        {
            return Err(JobError::precondition(
                &host.id,
                "host changed while waiting for boot",
            ));
        }

        ctx.record(
            EventType::HostStarted,
            json!({ "from": HostStatus::Starting, "to": HostStatus::Running }),
        )
        .await;
        Ok(())
    }
}

#[async_trait]
impl HostOperation for ProvisionHost {
    const JOB_TYPE: &'static str = "host-provision";

    async fn execute(
        &self,
        ctx: &JobContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<Outcome, JobError> {
        let host = self.load_or_insert(ctx).await?;
        let provider = ctx.provider(&host)?;
        let owned = host.is_owned_by(ctx.job_id())
            || (matches!(host.status, HostStatus::Building | HostStatus::Starting)
                && ctx.adopt_abandoned(&host).await?);

        match host.status {
            HostStatus::Uninitialized => {
                if !ctx
                    .claim(HostStatus::Uninitialized, HostStatus::Building)
                    .await?
                {
                    return Ok(Outcome::Superseded);
                }
                self.allocate(ctx, provider.as_ref(), &host, cancel).await?;
                self.await_boot(ctx, provider.as_ref(), cancel).await?;
            }
            HostStatus::Building if owned => {
                self.allocate(ctx, provider.as_ref(), &host, cancel).await?;
                self.await_boot(ctx, provider.as_ref(), cancel).await?;
            }
            HostStatus::Starting if owned => {
                self.await_boot(ctx, provider.as_ref(), cancel).await?;
            }
            HostStatus::Building | HostStatus::Starting => {
                tracing::info!("Host {} is being provisioned by another job", host.id);
                return Ok(Outcome::Superseded);
            }
            HostStatus::Running | HostStatus::Stopping | HostStatus::Stopped => {
                return Ok(Outcome::AlreadyDone);
            }
            status => {
                return Err(JobError::precondition(
                    &host.id,
                    format!("cannot provision a host that is {}", status),
                ));
            }
        }
        Ok(Outcome::Applied)
    }
}
