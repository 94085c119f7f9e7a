use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hostflow_cloud::{
    Distro, InstanceStatus, MockInstance, MockProvider, ProviderKind, ProviderRegistry, RetryConfig,
};
use hostflow_core::job::JobSettings;
use hostflow_core::{
    EventLog, EventLogEntry, EventType, Host, HostStatus, HostStore, JobEnvironment,
    MemoryEventLog, MemoryHostStore, ResourceType, StatusUpdate, StoreError, StoreResult,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Mock provider plus in-memory stores, wired into a job environment
pub struct TestFleet {
    pub mock: MockProvider,
    pub hosts: Arc<dyn HostStore>,
    pub events: Arc<MemoryEventLog>,
    pub env: JobEnvironment,
}

impl TestFleet {
    pub fn new() -> Self {
        Self::with_mock_and_store(MockProvider::new(), Arc::new(MemoryHostStore::new()))
    }

    #[allow(dead_code)]
    pub fn with_mock(mock: MockProvider) -> Self {
        Self::with_mock_and_store(mock, Arc::new(MemoryHostStore::new()))
    }

    pub fn with_mock_and_store(mock: MockProvider, hosts: Arc<dyn HostStore>) -> Self {
        let events = Arc::new(MemoryEventLog::new());
        let providers = ProviderRegistry::new().with(Arc::new(mock.clone()));
        let env = JobEnvironment::new(hosts.clone(), events.clone(), providers).with_settings(
            JobSettings {
                retry: RetryConfig::none(),
                provision_poll_interval: Duration::from_millis(10),
                provision_timeout: Duration::from_secs(2),
                marker_lease: Duration::from_secs(60),
            },
        );
        Self {
            mock,
            hosts,
            events,
            env,
        }
    }

    /// Store a host with the given recorded status and give it a live
    /// instance with the given provider status
    pub async fn add_host(&self, id: &str, status: HostStatus, live: InstanceStatus) -> Host {
        let host = Host::new(id, distro(), "tester")
            .with_status(status)
            .with_tag(format!("mock-{}", id));
        self.hosts.insert(&host).await.unwrap();
        self.mock.set(id, MockInstance::new(live));
        host
    }

    /// Store a host holding an in-flight `marker` written `age` ago by a
    /// job that never came back
    #[allow(dead_code)]
    pub async fn add_orphaned_marker(
        &self,
        id: &str,
        marker: HostStatus,
        live: InstanceStatus,
        age: chrono::Duration,
    ) -> Host {
        let mut host = Host::new(id, distro(), "tester")
            .with_status(marker)
            .with_tag(format!("mock-{}", id));
        host.last_job_id = Some("crashed-job".to_string());
        host.status_changed_at = Utc::now() - age;
        self.hosts.insert(&host).await.unwrap();
        self.mock.set(id, MockInstance::new(live));
        host
    }

    pub async fn host(&self, id: &str) -> Host {
        self.hosts.find(id).await.unwrap().unwrap()
    }

    pub async fn host_events(&self, id: &str) -> Vec<EventLogEntry> {
        self.events
            .find_most_recent_by_resource(ResourceType::Host, id, 100)
            .await
            .unwrap()
    }

    #[allow(dead_code)]
    pub async fn count_events(&self, id: &str, event_type: EventType) -> usize {
        self.host_events(id)
            .await
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

pub fn distro() -> Distro {
    Distro::new("ubuntu2404-small", ProviderKind::Mock)
        .with_image("ubuntu-24.04")
        .with_instance_type("2core-4gb")
}

/// Host store whose status writes fail while `failures` is positive.
/// Reads and other writes pass through.
#[allow(dead_code)]
pub struct FlakyHostStore {
    inner: MemoryHostStore,
    failures: AtomicU32,
}

#[allow(dead_code)]
impl FlakyHostStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryHostStore::new(),
            failures: AtomicU32::new(0),
        }
    }

    /// Fail the next `n` status writes that would otherwise succeed
    pub fn fail_next_writes(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    fn take_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl HostStore for FlakyHostStore {
    async fn insert(&self, host: &Host) -> StoreResult<()> {
        self.inner.insert(host).await
    }

    async fn find(&self, id: &str) -> StoreResult<Option<Host>> {
        self.inner.find(id).await
    }

    async fn list(&self) -> StoreResult<Vec<Host>> {
        self.inner.list().await
    }

    async fn compare_and_set_status(&self, update: &StatusUpdate) -> StoreResult<bool> {
        // Only fail writes that move a host out of an in-flight marker
        if update.expected().is_in_flight() && self.take_failure() {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        self.inner.compare_and_set_status(update).await
    }

    async fn set_quarantined(&self, id: &str, quarantined: bool) -> StoreResult<bool> {
        self.inner.set_quarantined(id, quarantined).await
    }

    async fn set_last_communication(&self, id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        self.inner.set_last_communication(id, at).await
    }
}
