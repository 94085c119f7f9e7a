//! Job execution framework
//!
//! A job is one unit of host lifecycle work. Jobs are delivered at least
//! once, so every job re-reads its host before acting and treats "already
//! done" as success. Within one execution the order is fixed:
//!
//! 1. read the host and check the precondition
//! 2. claim the host with an in-flight marker (compare-and-set)
//! 3. call the provider
//! 4. write the final status
//! 5. append the event
//!
//! A provider failure or cancellation between 2 and 4 rolls the marker back.
//! A failed event append is logged and does not fail the job.

mod lifecycle;
mod maintenance;
mod provision;
mod reconcile;
mod registry;

pub use lifecycle::{StartHost, StopHost};
pub use maintenance::{DecommissionHost, QuarantineHost, TerminateHost};
pub use provision::ProvisionHost;
pub use reconcile::ReconcileHost;
pub use registry::{JobRegistry, RegistryError};

use crate::error::JobError;
use crate::event::{EventLog, EventLogEntry, EventType};
use crate::host::{Host, HostStatus, StatusUpdate};
use crate::store::HostStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hostflow_cloud::{CloudProvider, InstanceStatus, ProviderRegistry, RetryConfig, retry_transient};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Queued description of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Deduplication key; running the same ID twice is safe. Generated as
    /// `<type>.<host>.<timestamp>.<suffix>` unless set explicitly.
    pub id: String,
    pub job_type: String,
    pub host_id: String,
    pub timestamp: DateTime<Utc>,
    /// Higher runs first
    #[serde(default)]
    pub priority: i32,
    pub started_by: String,
    /// Type-specific parameters
    #[serde(default)]
    pub params: serde_json::Value,
}

impl JobSpec {
    pub fn new(
        job_type: impl Into<String>,
        host_id: impl Into<String>,
        started_by: impl Into<String>,
    ) -> Self {
        let job_type = job_type.into();
        let host_id = host_id.into();
        let timestamp = Utc::now();
        Self {
            id: format!(
                "{}.{}.{}.{}",
                job_type,
                host_id,
                timestamp.format("%Y%m%dT%H%M%S%.3fZ"),
                &uuid::Uuid::new_v4().simple().to_string()[..8]
            ),
            job_type,
            host_id,
            timestamp,
            priority: 0,
            started_by: started_by.into(),
            params: serde_json::Value::Null,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}

/// Execution record of the last run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub completed: bool,
    pub has_errors: bool,
    #[serde(default)]
    pub error_messages: Vec<String>,
}

/// How a successful run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The transition was carried out by this run
    Applied,
    /// The host was already at the target; nothing was done
    AlreadyDone,
    /// Another job holds the host; this run backed off
    Superseded,
}

/// Executable unit of work
#[async_trait]
pub trait Job: Send + Sync {
    fn spec(&self) -> &JobSpec;

    fn id(&self) -> &str {
        &self.spec().id
    }

    /// Execute once. The result is reported through [`Job::error`] and
    /// [`Job::status`]; calling `run` again starts a fresh attempt.
    async fn run(&mut self, cancel: &CancellationToken);

    fn error(&self) -> Option<&JobError>;

    fn status(&self) -> &JobStatus;

    fn outcome(&self) -> Option<Outcome>;
}

/// Tunables shared by all host jobs
#[derive(Debug, Clone)]
pub struct JobSettings {
    /// In-place retry of transient provider failures
    pub retry: RetryConfig,
    pub provision_poll_interval: Duration,
    pub provision_timeout: Duration,
    /// Age after which another job's in-flight marker counts as abandoned.
    /// Must exceed the longest a live job holds a marker.
    pub marker_lease: Duration,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            provision_poll_interval: Duration::from_secs(5),
            provision_timeout: Duration::from_secs(900),
            marker_lease: Duration::from_secs(1800),
        }
    }
}

/// Everything a job needs from the outside world
#[derive(Clone)]
pub struct JobEnvironment {
    pub hosts: Arc<dyn HostStore>,
    pub events: Arc<dyn EventLog>,
    pub providers: ProviderRegistry,
    pub settings: JobSettings,
}

impl JobEnvironment {
    pub fn new(
        hosts: Arc<dyn HostStore>,
        events: Arc<dyn EventLog>,
        providers: ProviderRegistry,
    ) -> Self {
        Self {
            hosts,
            events,
            providers,
            settings: JobSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: JobSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// The work a host job does, separated from job bookkeeping.
///
/// Parameters are (de)serialized from [`JobSpec::params`].
#[async_trait]
pub trait HostOperation: Serialize + DeserializeOwned + Send + Sync + 'static {
    const JOB_TYPE: &'static str;

    /// Jobs that still run on a quarantined host
    const RUNS_WHILE_QUARANTINED: bool = false;

    async fn execute(
        &self,
        ctx: &JobContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<Outcome, JobError>;
}

/// A [`Job`] running one [`HostOperation`] against one host
pub struct HostJob<O: HostOperation> {
    spec: JobSpec,
    operation: O,
    env: JobEnvironment,
    status: JobStatus,
    error: Option<JobError>,
    outcome: Option<Outcome>,
}

pub type ProvisionJob = HostJob<ProvisionHost>;
pub type StartJob = HostJob<StartHost>;
pub type StopJob = HostJob<StopHost>;
pub type DecommissionJob = HostJob<DecommissionHost>;
pub type TerminateJob = HostJob<TerminateHost>;
pub type QuarantineJob = HostJob<QuarantineHost>;
pub type ReconcileJob = HostJob<ReconcileHost>;

impl<O: HostOperation> HostJob<O> {
    pub fn new(spec: JobSpec, operation: O, env: JobEnvironment) -> Self {
        Self {
            spec,
            operation,
            env,
            status: JobStatus::default(),
            error: None,
            outcome: None,
        }
    }

    /// Job with a fresh spec for `host_id`, params taken from `operation`
    pub fn for_host(
        host_id: impl Into<String>,
        started_by: impl Into<String>,
        operation: O,
        env: JobEnvironment,
    ) -> Self {
        let spec = JobSpec::new(O::JOB_TYPE, host_id, started_by)
            .with_params(serde_json::to_value(&operation).unwrap_or_default());
        Self::new(spec, operation, env)
    }

    pub fn operation(&self) -> &O {
        &self.operation
    }
}

#[async_trait]
impl<O: HostOperation> Job for HostJob<O> {
    fn spec(&self) -> &JobSpec {
        &self.spec
    }

    async fn run(&mut self, cancel: &CancellationToken) {
        self.status = JobStatus::default();
        self.error = None;
        self.outcome = None;

        let ctx = JobContext::new(&self.env, &self.spec);
        let result = self.operation.execute(&ctx, cancel).await;

        match result {
            Ok(outcome) => {
                tracing::info!(
                    "Job {} on host {} finished: {:?}",
                    self.spec.id,
                    self.spec.host_id,
                    outcome
                );
                self.outcome = Some(outcome);
            }
            Err(e) => {
                tracing::warn!(
                    "Job {} on host {} failed ({}): {}",
                    self.spec.id,
                    self.spec.host_id,
                    e.kind(),
                    e
                );
                self.status.has_errors = true;
                self.status.error_messages.push(e.to_string());
                self.error = Some(e);
            }
        }
        self.status.completed = true;
    }

    fn error(&self) -> Option<&JobError> {
        self.error.as_ref()
    }

    fn status(&self) -> &JobStatus {
        &self.status
    }

    fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }
}

/// Per-run view of the environment, bound to one job and one host
pub struct JobContext<'a> {
    env: &'a JobEnvironment,
    spec: &'a JobSpec,
}

impl<'a> JobContext<'a> {
    pub fn new(env: &'a JobEnvironment, spec: &'a JobSpec) -> Self {
        Self { env, spec }
    }

    pub fn host_id(&self) -> &str {
        &self.spec.host_id
    }

    pub fn job_id(&self) -> &str {
        &self.spec.id
    }

    pub fn spec(&self) -> &JobSpec {
        self.spec
    }

    pub fn settings(&self) -> &JobSettings {
        &self.env.settings
    }

    pub fn hosts(&self) -> &dyn HostStore {
        self.env.hosts.as_ref()
    }

    /// Current host record; `NotFound` if it does not exist
    pub async fn load_host(&self) -> Result<Host, JobError> {
        self.env
            .hosts
            .find(self.host_id())
            .await?
            .ok_or_else(|| JobError::NotFound(self.host_id().to_string()))
    }

    /// Provider backing `host`. A missing backend is a configuration
    /// problem that retrying will not fix.
    pub fn provider(&self, host: &Host) -> Result<Arc<dyn CloudProvider>, JobError> {
        self.env
            .providers
            .get(host.provider)
            .map_err(|e| JobError::precondition(&host.id, e.to_string()))
    }

    /// Conditional status write; `false` when the host no longer matches
    pub async fn write(&self, update: &StatusUpdate) -> Result<bool, JobError> {
        let applied = self.env.hosts.compare_and_set_status(update).await?;
        if applied {
            tracing::debug!(
                "Host {}: {} -> {} (job {})",
                update.host_id(),
                update.expected(),
                update.next(),
                update.job_id()
            );
        }
        Ok(applied)
    }

    /// Move `host` from `from` into the in-flight marker `marker`.
    /// Returns `false` if another writer got there first.
    pub async fn claim(&self, from: HostStatus, marker: HostStatus) -> Result<bool, JobError> {
        let update = StatusUpdate::transition(self.host_id(), from, marker, self.job_id())?;
        self.write(&update).await
    }

    /// Take over `host`'s in-flight marker if its lease has run out.
    /// Returns `false` if the marker is still live or someone else moved
    /// the host first.
    pub async fn adopt_abandoned(&self, host: &Host) -> Result<bool, JobError> {
        if host.is_owned_by(self.job_id()) || !host.marker_expired(self.settings().marker_lease) {
            return Ok(false);
        }
        let update = StatusUpdate::take_over(
            &host.id,
            host.status,
            host.last_job_id.as_deref(),
            self.job_id(),
        )?;
        let adopted = self.write(&update).await?;
        if adopted {
            tracing::warn!(
                "Host {}: took over abandoned {} marker from job {:?} (set {})",
                host.id,
                host.status,
                host.last_job_id,
                host.status_changed_at
            );
        }
        Ok(adopted)
    }

    /// Move from this job's own marker to `next`
    pub async fn advance(
        &self,
        marker: HostStatus,
        next: HostStatus,
        tag: Option<String>,
    ) -> Result<bool, JobError> {
        let mut update =
            StatusUpdate::transition(self.host_id(), marker, next, self.job_id())?.owned();
        if let Some(tag) = tag {
            update = update.with_tag(tag);
        }
        self.write(&update).await
    }

    /// Withdraw this job's in-flight marker. Failures are logged; the
    /// caller is already reporting a more relevant error.
    pub async fn roll_back(&self, marker: HostStatus, prior: HostStatus) {
        let update = match StatusUpdate::rollback(self.host_id(), marker, prior, self.job_id()) {
            Ok(update) => update,
            Err(e) => {
                tracing::warn!("Cannot roll back: {}", e);
                return;
            }
        };
        match self.env.hosts.compare_and_set_status(&update).await {
            Ok(true) => tracing::info!(
                "Host {}: rolled back {} -> {}",
                self.host_id(),
                marker,
                prior
            ),
            Ok(false) => tracing::warn!(
                "Host {}: marker {} no longer held by job {}, not rolled back",
                self.host_id(),
                marker,
                self.job_id()
            ),
            Err(e) => tracing::warn!("Host {}: rollback write failed: {}", self.host_id(), e),
        }
    }

    /// Live instance status, retrying transient failures
    pub async fn live_status(
        &self,
        provider: &dyn CloudProvider,
        host: &Host,
        cancel: &CancellationToken,
    ) -> Result<InstanceStatus, JobError> {
        let target = host.instance_target();
        let status = retry_transient(&self.env.settings.retry, cancel, "get_instance_status", || {
            provider.get_instance_status(cancel, &target)
        })
        .await?;
        Ok(status)
    }

    /// Append an event for this host. The transition already happened, so a
    /// failed append only costs the audit record.
    pub async fn record(&self, event_type: EventType, mut data: serde_json::Value) {
        if let serde_json::Value::Object(map) = &mut data {
            map.insert("job_id".to_string(), self.job_id().into());
            map.insert("started_by".to_string(), self.spec.started_by.clone().into());
        }
        let entry = EventLogEntry::host(self.host_id(), event_type, data);
        if let Err(e) = self.env.events.append(entry).await {
            tracing::warn!(
                "Failed to append {} event for host {}: {}",
                event_type,
                self.host_id(),
                e
            );
        }
    }
}
