//! In-memory provider for deterministic tests
//!
//! Instances are kept in a map keyed by host ID. Tests can set an instance's
//! status directly, add latency, make the next N calls of an operation fail,
//! and read per-operation call counters afterwards.

use crate::error::{CloudError, Result};
use crate::instance::{InstanceStatus, InstanceTarget, ProviderKind};
use crate::provider::CloudProvider;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Provider operations, for failure injection and call counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    Create,
    Start,
    Stop,
    Terminate,
    Status,
}

impl MockOperation {
    fn is_action(&self) -> bool {
        !matches!(self, MockOperation::Status)
    }
}

/// A simulated instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockInstance {
    pub status: InstanceStatus,
    pub tag: Option<String>,
}

impl MockInstance {
    pub fn new(status: InstanceStatus) -> Self {
        Self { status, tag: None }
    }
}

struct MockState {
    instances: HashMap<String, MockInstance>,
    failures: HashMap<MockOperation, u32>,
    calls: HashMap<MockOperation, usize>,
    latency: Duration,
    boot_status: InstanceStatus,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            instances: HashMap::new(),
            failures: HashMap::new(),
            calls: HashMap::new(),
            latency: Duration::ZERO,
            boot_status: InstanceStatus::Running,
        }
    }
}

/// Mock provider; clones share the same instance map
#[derive(Clone, Default)]
pub struct MockProvider {
    state: Arc<Mutex<MockState>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps this long before taking effect
    pub fn with_latency(self, latency: Duration) -> Self {
        self.lock().latency = latency;
        self
    }

    /// Status newly created instances report
    pub fn set_boot_status(&self, status: InstanceStatus) {
        self.lock().boot_status = status;
    }

    /// Set or replace the simulated instance for a host
    pub fn set(&self, host_id: impl Into<String>, instance: MockInstance) {
        self.lock().instances.insert(host_id.into(), instance);
    }

    pub fn get(&self, host_id: &str) -> Option<MockInstance> {
        self.lock().instances.get(host_id).cloned()
    }

    pub fn remove(&self, host_id: &str) -> Option<MockInstance> {
        self.lock().instances.remove(host_id)
    }

    /// Make the next `times` calls of `operation` fail with a transient API error
    pub fn fail_next(&self, operation: MockOperation, times: u32) {
        self.lock().failures.insert(operation, times);
    }

    /// Number of times `operation` was invoked
    pub fn calls(&self, operation: MockOperation) -> usize {
        self.lock().calls.get(&operation).copied().unwrap_or(0)
    }

    /// Number of side-effecting calls (everything except status queries)
    pub fn action_calls(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|(op, _)| op.is_action())
            .map(|(_, n)| *n)
            .sum()
    }

    /// Forget instances, counters and injected failures
    pub fn reset(&self) {
        let mut state = self.lock();
        let latency = state.latency;
        *state = MockState {
            latency,
            ..MockState::default()
        };
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Count the call, wait out the latency, then consume an injected failure
    async fn simulate(
        &self,
        cancel: &CancellationToken,
        operation: MockOperation,
        target: &InstanceTarget,
    ) -> Result<()> {
        let latency = {
            let mut state = self.lock();
            *state.calls.entry(operation).or_insert(0) += 1;
            state.latency
        };

        if !latency.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(CloudError::Cancelled(format!(
                        "{:?} {}",
                        operation, target.host_id
                    )));
                }
                _ = tokio::time::sleep(latency) => {}
            }
        } else if cancel.is_cancelled() {
            return Err(CloudError::Cancelled(format!(
                "{:?} {}",
                operation, target.host_id
            )));
        }

        let mut state = self.lock();
        if let Some(remaining) = state.failures.get_mut(&operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(CloudError::ApiError(format!(
                    "injected {:?} failure for {}",
                    operation, target.host_id
                )));
            }
        }
        Ok(())
    }

    fn set_status(&self, target: &InstanceTarget, status: InstanceStatus) -> Result<()> {
        let mut state = self.lock();
        match state.instances.get_mut(&target.host_id) {
            Some(instance) if instance.status != InstanceStatus::Terminated => {
                instance.status = status;
                Ok(())
            }
            _ => Err(CloudError::InstanceNotFound(target.host_id.clone())),
        }
    }
}

#[async_trait]
impl CloudProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Mock
    }

    async fn create_instance(
        &self,
        cancel: &CancellationToken,
        target: &InstanceTarget,
    ) -> Result<String> {
        self.simulate(cancel, MockOperation::Create, target).await?;

        let mut state = self.lock();
        if let Some(existing) = state.instances.get(&target.host_id) {
            if existing.status != InstanceStatus::Terminated {
                tracing::debug!("Mock instance for {} already exists", target.host_id);
                return Ok(existing
                    .tag
                    .clone()
                    .unwrap_or_else(|| target.host_id.clone()));
            }
        }

        let tag = format!("mock-{}", target.host_id);
        let instance = MockInstance {
            status: state.boot_status,
            tag: Some(tag.clone()),
        };
        state.instances.insert(target.host_id.clone(), instance);
        Ok(tag)
    }

    async fn start_instance(
        &self,
        cancel: &CancellationToken,
        target: &InstanceTarget,
    ) -> Result<()> {
        self.simulate(cancel, MockOperation::Start, target).await?;
        self.set_status(target, InstanceStatus::Running)
    }

    async fn stop_instance(
        &self,
        cancel: &CancellationToken,
        target: &InstanceTarget,
    ) -> Result<()> {
        self.simulate(cancel, MockOperation::Stop, target).await?;
        self.set_status(target, InstanceStatus::Stopped)
    }

    async fn terminate_instance(
        &self,
        cancel: &CancellationToken,
        target: &InstanceTarget,
    ) -> Result<()> {
        self.simulate(cancel, MockOperation::Terminate, target).await?;
        if let Some(instance) = self.lock().instances.get_mut(&target.host_id) {
            instance.status = InstanceStatus::Terminated;
        }
        Ok(())
    }

    async fn get_instance_status(
        &self,
        cancel: &CancellationToken,
        target: &InstanceTarget,
    ) -> Result<InstanceStatus> {
        self.simulate(cancel, MockOperation::Status, target).await?;
        Ok(self
            .lock()
            .instances
            .get(&target.host_id)
            .map(|i| i.status)
            .unwrap_or(InstanceStatus::Terminated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::Distro;

    fn target(id: &str) -> InstanceTarget {
        InstanceTarget::new(id, None, Distro::new("mock-distro", ProviderKind::Mock))
    }

    #[tokio::test]
    async fn test_missing_instance_reads_as_terminated() {
        let mock = MockProvider::new();
        let cancel = CancellationToken::new();

        let status = mock.get_instance_status(&cancel, &target("ghost")).await.unwrap();
        assert_eq!(status, InstanceStatus::Terminated);
        assert!(mock.terminate_instance(&cancel, &target("ghost")).await.is_ok());

        let err = mock.stop_instance(&cancel, &target("ghost")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_stop_and_counters() {
        let mock = MockProvider::new();
        let cancel = CancellationToken::new();
        mock.set("h1", MockInstance::new(InstanceStatus::Running));

        mock.stop_instance(&cancel, &target("h1")).await.unwrap();
        mock.get_instance_status(&cancel, &target("h1")).await.unwrap();

        assert_eq!(mock.get("h1").unwrap().status, InstanceStatus::Stopped);
        assert_eq!(mock.calls(MockOperation::Stop), 1);
        assert_eq!(mock.calls(MockOperation::Status), 1);
        assert_eq!(mock.action_calls(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure_is_transient_and_consumed() {
        let mock = MockProvider::new();
        let cancel = CancellationToken::new();
        mock.set("h1", MockInstance::new(InstanceStatus::Stopped));
        mock.fail_next(MockOperation::Start, 1);

        let err = mock.start_instance(&cancel, &target("h1")).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(mock.get("h1").unwrap().status, InstanceStatus::Stopped);

        mock.start_instance(&cancel, &target("h1")).await.unwrap();
        assert_eq!(mock.get("h1").unwrap().status, InstanceStatus::Running);
    }

    #[tokio::test]
    async fn test_cancellation_leaves_instance_untouched() {
        let mock = MockProvider::new().with_latency(Duration::from_secs(60));
        mock.set("h1", MockInstance::new(InstanceStatus::Running));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = mock.stop_instance(&cancel, &target("h1")).await.unwrap_err();
        assert!(matches!(err, CloudError::Cancelled(_)));
        assert_eq!(mock.get("h1").unwrap().status, InstanceStatus::Running);
    }

    #[tokio::test]
    async fn test_create_is_idempotent_per_host() {
        let mock = MockProvider::new();
        let cancel = CancellationToken::new();

        let first = mock.create_instance(&cancel, &target("h1")).await.unwrap();
        let second = mock.create_instance(&cancel, &target("h1")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(mock.get("h1").unwrap().status, InstanceStatus::Running);
    }
}
