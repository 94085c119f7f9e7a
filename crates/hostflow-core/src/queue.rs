//! Job queue and dispatcher
//!
//! [`LocalQueue`] is an in-process priority queue that drops duplicate job
//! IDs. [`Dispatcher`] turns queued specs into jobs through the
//! [`JobRegistry`], enforces the quarantine gate and a per-job timeout, and
//! retries jobs whose error is retryable.

use crate::error::JobErrorKind;
use crate::fanout::{self, MultiError};
use crate::job::{Job, JobEnvironment, JobRegistry, JobSpec, JobStatus, Outcome};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Job already queued: {0}")]
    Duplicate(String),

    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}

/// Somewhere jobs can be submitted
#[async_trait]
pub trait Queue: Send + Sync {
    async fn put(&self, spec: JobSpec) -> Result<(), QueueError>;
}

struct Pending {
    spec: JobSpec,
    seq: u64,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    // Max-heap: higher priority first, then earlier submission
    fn cmp(&self, other: &Self) -> Ordering {
        self.spec
            .priority
            .cmp(&other.spec.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct LocalQueueState {
    heap: BinaryHeap<Pending>,
    seen: HashSet<String>,
    next_seq: u64,
}

/// In-process queue; a job ID is accepted once for the queue's lifetime
#[derive(Default)]
pub struct LocalQueue {
    state: Mutex<LocalQueueState>,
}

impl LocalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next job by priority, then submission order
    pub fn pop(&self) -> Option<JobSpec> {
        self.lock().heap.pop().map(|pending| pending.spec)
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, LocalQueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Queue for LocalQueue {
    async fn put(&self, spec: JobSpec) -> Result<(), QueueError> {
        let mut state = self.lock();
        if !state.seen.insert(spec.id.clone()) {
            return Err(QueueError::Duplicate(spec.id));
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        tracing::debug!("Queued job {} (priority {})", spec.id, spec.priority);
        state.heap.push(Pending { spec, seq });
        Ok(())
    }
}

/// Retry and timeout policy for dispatched jobs
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    /// Runs per job, including the first
    pub max_attempts: u32,
    pub job_timeout: Duration,
    /// Pause between runs of a failed job
    pub retry_delay: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            job_timeout: Duration::from_secs(600),
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// What happened to one dispatched job
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub job_id: String,
    pub job_type: String,
    pub host_id: String,
    pub attempts: u32,
    pub status: JobStatus,
    pub outcome: Option<Outcome>,
    pub error_kind: Option<JobErrorKind>,
    /// Set when the job was refused without running
    pub rejected: Option<String>,
}

impl DispatchReport {
    fn rejected(spec: &JobSpec, reason: String) -> Self {
        tracing::warn!("Rejected job {}: {}", spec.id, reason);
        Self {
            job_id: spec.id.clone(),
            job_type: spec.job_type.clone(),
            host_id: spec.host_id.clone(),
            attempts: 0,
            status: JobStatus::default(),
            outcome: None,
            error_kind: None,
            rejected: Some(reason),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.rejected.is_none() && self.status.completed && !self.status.has_errors
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<JobRegistry>,
    env: JobEnvironment,
    policy: DispatchPolicy,
}

impl Dispatcher {
    pub fn new(registry: Arc<JobRegistry>, env: JobEnvironment) -> Self {
        Self {
            registry,
            env,
            policy: DispatchPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: DispatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn env(&self) -> &JobEnvironment {
        &self.env
    }

    /// Run one job to completion, retrying while its error is retryable
    pub async fn dispatch(&self, spec: JobSpec, cancel: &CancellationToken) -> DispatchReport {
        if let Err(reason) = self.admit(&spec).await {
            return DispatchReport::rejected(&spec, reason);
        }

        let mut job = match self.registry.build(spec.clone(), self.env.clone()) {
            Ok(job) => job,
            Err(e) => return DispatchReport::rejected(&spec, e.to_string()),
        };

        let mut attempts = 0;
        loop {
            attempts += 1;
            self.run_with_timeout(&mut *job, cancel).await;

            let retryable = job.error().is_some_and(|e| e.is_retryable());
            if !retryable || attempts >= self.policy.max_attempts || cancel.is_cancelled() {
                break;
            }

            tracing::info!(
                "Retrying job {} (attempt {}/{})",
                spec.id,
                attempts + 1,
                self.policy.max_attempts
            );
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.policy.retry_delay) => {}
            }
        }

        DispatchReport {
            job_id: spec.id,
            job_type: spec.job_type,
            host_id: spec.host_id,
            attempts,
            status: job.status().clone(),
            outcome: job.outcome(),
            error_kind: job.error().map(|e| e.kind()),
            rejected: None,
        }
    }

    /// Quarantine gate
    async fn admit(&self, spec: &JobSpec) -> Result<(), String> {
        if self.registry.runs_while_quarantined(&spec.job_type) {
            return Ok(());
        }
        match self.env.hosts.find(&spec.host_id).await {
            Ok(Some(host)) if host.quarantined => {
                Err(format!("host {} is quarantined", spec.host_id))
            }
            Ok(_) => Ok(()),
            // The job re-reads the host itself and reports the failure
            Err(e) => {
                tracing::debug!("Quarantine check for {} failed: {}", spec.host_id, e);
                Ok(())
            }
        }
    }

    /// Run once under a child token that is cancelled on timeout. The run is
    /// still awaited after cancelling so the job can roll back.
    async fn run_with_timeout(&self, job: &mut dyn Job, cancel: &CancellationToken) {
        let child = cancel.child_token();
        let timeout = self.policy.job_timeout;
        let job_id = job.id().to_string();

        let run = job.run(&child);
        tokio::pin!(run);
        tokio::select! {
            _ = &mut run => {}
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!("Job {} exceeded {:?}, cancelling", job_id, timeout);
                child.cancel();
                run.await;
            }
        }
    }

    /// Dispatch queued jobs one at a time until the queue is empty
    pub async fn drain(&self, queue: &LocalQueue, cancel: &CancellationToken) -> Vec<DispatchReport> {
        let mut reports = Vec::new();
        while !cancel.is_cancelled() {
            let Some(spec) = queue.pop() else {
                break;
            };
            reports.push(self.dispatch(spec, cancel).await);
        }
        reports
    }

    /// Dispatch independent jobs concurrently
    pub async fn run_batch(
        &self,
        specs: Vec<JobSpec>,
        cancel: &CancellationToken,
    ) -> Result<Vec<DispatchReport>, MultiError> {
        let count = specs.len();
        let handlers: Vec<_> = specs
            .into_iter()
            .map(|spec| {
                let dispatcher = self.clone();
                let cancel = cancel.clone();
                async move { Ok::<_, String>(dispatcher.dispatch(spec, &cancel).await) }
            })
            .collect();

        fanout::run_all(handlers, async move {
            tracing::debug!("Batch of {} jobs finished", count);
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_priority_then_fifo() {
        let queue = LocalQueue::new();
        queue
            .put(JobSpec::new("host-stop", "a", "t").with_id("1"))
            .await
            .unwrap();
        queue
            .put(JobSpec::new("host-stop", "b", "t").with_id("2").with_priority(10))
            .await
            .unwrap();
        queue
            .put(JobSpec::new("host-stop", "c", "t").with_id("3"))
            .await
            .unwrap();

        let order: Vec<String> = std::iter::from_fn(|| queue.pop()).map(|s| s.id).collect();
        assert_eq!(order, vec!["2", "1", "3"]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_refused() {
        let queue = LocalQueue::new();
        let spec = JobSpec::new("host-start", "h1", "t").with_id("job-1");
        queue.put(spec.clone()).await.unwrap();
        assert!(matches!(
            queue.put(spec.clone()).await,
            Err(QueueError::Duplicate(_))
        ));

        // Still refused after the first copy ran
        queue.pop();
        assert!(queue.put(spec).await.is_err());
        assert_eq!(queue.len(), 0);
    }
}
