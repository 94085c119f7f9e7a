//! File-backed host and event store
//!
//! Keeps hosts and events in `<state_dir>/state.json`. Every mutation takes
//! `lock.json` (created exclusively), reloads the state, applies the change
//! and writes it back through a temp file and rename, so compare-and-set
//! stays atomic across processes sharing the directory and readers never
//! observe a half-written file.
//!
//! Appends and `mark_processed` share that one lock, so an append can wait
//! up to the lock timeout behind a consumer marking events, and fails with
//! [`StoreError::Lock`] past it. Jobs tolerate a failed append. Deployments
//! with busy consumers should use a store that keeps the two apart.

use super::HostStore;
use crate::error::{StoreError, StoreResult};
use crate::event::{EventLog, EventLogEntry, EventQuery, last_processed};
use crate::host::{Host, StatusUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;

const STATE_VERSION: u32 = 1;
const STATE_FILE: &str = "state.json";
const STATE_TEMP: &str = "state.json.tmp";
const STATE_BACKUP: &str = "state.json.backup";
const LOCK_FILE: &str = "lock.json";
const LOCK_POLL: Duration = Duration::from_millis(25);

/// Everything persisted in the state file
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreState {
    version: u32,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    hosts: HashMap<String, Host>,
    #[serde(default)]
    events: Vec<EventLogEntry>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            hosts: HashMap::new(),
            events: Vec::new(),
        }
    }
}

/// Lock information
#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Host store and event log persisted in a state directory
pub struct FileStore {
    state_dir: PathBuf,
    lock_timeout: Duration,
}

impl FileStore {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            state_dir: state_dir.as_ref().to_path_buf(),
            lock_timeout: Duration::from_secs(10),
        }
    }

    /// How long a writer waits for another process to release the lock
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    fn state_path(&self) -> PathBuf {
        self.state_dir.join(STATE_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.state_dir.join(LOCK_FILE)
    }

    async fn ensure_state_dir(&self) -> StoreResult<()> {
        if !self.state_dir.exists() {
            fs::create_dir_all(&self.state_dir).await?;
            tracing::debug!("Created state directory: {}", self.state_dir.display());
        }
        Ok(())
    }

    async fn load(&self) -> StoreResult<StoreState> {
        let path = self.state_path();
        if !path.exists() {
            return Ok(StoreState::default());
        }

        let content = fs::read_to_string(&path).await?;
        let state: StoreState = serde_json::from_str(&content)?;

        if state.version > STATE_VERSION {
            return Err(StoreError::State(format!(
                "State file version {} is newer than supported version {}",
                state.version, STATE_VERSION
            )));
        }

        Ok(state)
    }

    async fn save(&self, state: &mut StoreState) -> StoreResult<()> {
        state.updated_at = Utc::now();

        let path = self.state_path();
        if path.exists() {
            fs::copy(&path, self.state_dir.join(STATE_BACKUP)).await?;
        }

        let temp = self.state_dir.join(STATE_TEMP);
        let content = serde_json::to_string_pretty(state)?;
        fs::write(&temp, content).await?;
        fs::rename(&temp, &path).await?;

        tracing::debug!(
            "Saved state with {} hosts, {} events",
            state.hosts.len(),
            state.events.len()
        );
        Ok(())
    }

    /// Acquire the cross-process lock, waiting up to `lock_timeout`
    async fn acquire_lock(&self) -> StoreResult<StateLock> {
        self.ensure_state_dir().await?;
        let lock_path = self.lock_path();
        let deadline = tokio::time::Instant::now() + self.lock_timeout;

        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
                .await
            {
                Ok(mut file) => {
                    let info = LockInfo {
                        holder: std::env::var("HOSTNAME")
                            .or_else(|_| std::env::var("HOST"))
                            .unwrap_or_else(|_| "unknown".to_string()),
                        pid: std::process::id(),
                        acquired_at: Utc::now(),
                    };
                    file.write_all(serde_json::to_string(&info)?.as_bytes())
                        .await?;
                    return Ok(StateLock {
                        lock_path,
                        released: false,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    self.clear_stale_lock(&lock_path).await;
                }
                Err(e) => return Err(e.into()),
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(StoreError::Lock(format!(
                    "timed out waiting for {}",
                    lock_path.display()
                )));
            }
            tokio::time::sleep(LOCK_POLL).await;
        }
    }

    /// Remove a lock older than one hour
    async fn clear_stale_lock(&self, lock_path: &Path) {
        let Ok(content) = fs::read_to_string(lock_path).await else {
            return;
        };
        let Ok(info) = serde_json::from_str::<LockInfo>(&content) else {
            return;
        };
        let age = Utc::now().signed_duration_since(info.acquired_at);
        if age.num_hours() >= 1 {
            tracing::warn!("Removing stale lock from {} (pid {})", info.holder, info.pid);
            let _ = fs::remove_file(lock_path).await;
        }
    }

    /// Read-only access; no lock needed because saves are atomic renames
    async fn read<T>(&self, f: impl FnOnce(&StoreState) -> T) -> StoreResult<T> {
        let state = self.load().await?;
        Ok(f(&state))
    }

    /// Locked read-modify-write. The state is saved only if `f` succeeds and
    /// reports a change.
    async fn update<T>(
        &self,
        f: impl FnOnce(&mut StoreState) -> StoreResult<(T, bool)>,
    ) -> StoreResult<T> {
        let lock = self.acquire_lock().await?;
        let result = async {
            let mut state = self.load().await?;
            let (value, changed) = f(&mut state)?;
            if changed {
                self.save(&mut state).await?;
            }
            Ok(value)
        }
        .await;
        lock.release().await?;
        result
    }
}

/// RAII guard for the state lock
struct StateLock {
    lock_path: PathBuf,
    released: bool,
}

impl StateLock {
    async fn release(mut self) -> StoreResult<()> {
        if !self.released {
            if self.lock_path.exists() {
                fs::remove_file(&self.lock_path).await?;
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}

#[async_trait]
impl HostStore for FileStore {
    async fn insert(&self, host: &Host) -> StoreResult<()> {
        self.update(|state| {
            if state.hosts.contains_key(&host.id) {
                return Err(StoreError::AlreadyExists(host.id.clone()));
            }
            state.hosts.insert(host.id.clone(), host.clone());
            Ok(((), true))
        })
        .await
    }

    async fn find(&self, id: &str) -> StoreResult<Option<Host>> {
        self.read(|state| state.hosts.get(id).cloned()).await
    }

    async fn list(&self) -> StoreResult<Vec<Host>> {
        self.read(|state| {
            let mut hosts: Vec<Host> = state.hosts.values().cloned().collect();
            hosts.sort_by(|a, b| a.id.cmp(&b.id));
            hosts
        })
        .await
    }

    async fn compare_and_set_status(&self, update: &StatusUpdate) -> StoreResult<bool> {
        self.update(|state| match state.hosts.get_mut(update.host_id()) {
            Some(host) if update.applies_to(host) => {
                update.apply(host);
                Ok((true, true))
            }
            _ => Ok((false, false)),
        })
        .await
    }

    async fn set_quarantined(&self, id: &str, quarantined: bool) -> StoreResult<bool> {
        self.update(|state| {
            let host = state
                .hosts
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            let changed = host.quarantined != quarantined;
            host.quarantined = quarantined;
            Ok((changed, changed))
        })
        .await
    }

    async fn set_last_communication(&self, id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        self.update(|state| {
            let host = state
                .hosts
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            host.last_communication_time = Some(at);
            Ok(((), true))
        })
        .await
    }
}

#[async_trait]
impl EventLog for FileStore {
    async fn append(&self, entry: EventLogEntry) -> StoreResult<()> {
        self.update(|state| {
            state.events.push(entry);
            Ok(((), true))
        })
        .await
    }

    async fn find(&self, query: &EventQuery) -> StoreResult<Vec<EventLogEntry>> {
        self.read(|state| query.run(state.events.iter())).await
    }

    async fn count(&self, query: &EventQuery) -> StoreResult<usize> {
        self.read(|state| query.count(state.events.iter())).await
    }

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<EventLogEntry>> {
        self.read(|state| state.events.iter().find(|e| e.id == id).cloned())
            .await
    }

    async fn mark_processed(&self, id: &str) -> StoreResult<bool> {
        self.update(|state| {
            let entry = state
                .events
                .iter_mut()
                .find(|e| e.id == id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            if entry.processed_at.is_some() {
                return Ok((false, false));
            }
            entry.processed_at = Some(Utc::now());
            Ok((true, true))
        })
        .await
    }

    async fn find_last_processed(&self) -> StoreResult<Option<EventLogEntry>> {
        self.read(|state| last_processed(state.events.iter())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventType, ResourceType};
    use crate::host::HostStatus;
    use hostflow_cloud::{Distro, ProviderKind};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn host(id: &str, status: HostStatus) -> Host {
        Host::new(id, Distro::new("d", ProviderKind::Mock), "tester").with_status(status)
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let temp_dir = tempdir().unwrap();
        let store = FileStore::new(temp_dir.path());
        store.insert(&host("h1", HostStatus::Running)).await.unwrap();
        EventLog::append(
            &store,
            EventLogEntry::host("h1", EventType::HostStarted, serde_json::json!({})),
        )
        .await
        .unwrap();

        let reopened = FileStore::new(temp_dir.path());
        let found = HostStore::find(&reopened, "h1").await.unwrap().unwrap();
        assert_eq!(found.status, HostStatus::Running);
        let events = reopened
            .find_most_recent_by_resource(ResourceType::Host, "h1", 10)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert!(!temp_dir.path().join(LOCK_FILE).exists());
    }

    #[tokio::test]
    async fn test_empty_state() {
        let temp_dir = tempdir().unwrap();
        let store = FileStore::new(temp_dir.path().join("nested"));
        assert!(store.list().await.unwrap().is_empty());
        assert_eq!(store.count_unprocessed().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_compare_and_set_has_one_winner() {
        let temp_dir = tempdir().unwrap();
        let store = Arc::new(FileStore::new(temp_dir.path()));
        store.insert(&host("h1", HostStatus::Stopped)).await.unwrap();

        let mut handles = Vec::new();
        for job in ["a", "b", "c", "d"] {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let update =
                    StatusUpdate::transition("h1", HostStatus::Stopped, HostStatus::Starting, job)
                        .unwrap();
                store.compare_and_set_status(&update).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_held_lock_times_out() {
        let temp_dir = tempdir().unwrap();
        let store = FileStore::new(temp_dir.path()).with_lock_timeout(Duration::from_millis(50));
        let held = store.acquire_lock().await.unwrap();

        let err = store.insert(&host("h1", HostStatus::Running)).await.unwrap_err();
        assert!(matches!(err, StoreError::Lock(_)));

        held.release().await.unwrap();
        store.insert(&host("h1", HostStatus::Running)).await.unwrap();
    }

    #[tokio::test]
    async fn test_append_shares_the_lock_with_consumers() {
        let temp_dir = tempdir().unwrap();
        let store = FileStore::new(temp_dir.path()).with_lock_timeout(Duration::from_millis(50));
        let entry = EventLogEntry::host("h1", EventType::HostStarted, serde_json::json!({}));

        // A consumer holding the lock stalls appends until the timeout
        let held = store.acquire_lock().await.unwrap();
        let err = store.append(entry.clone()).await.unwrap_err();
        assert!(matches!(err, StoreError::Lock(_)));

        held.release().await.unwrap();
        store.append(entry).await.unwrap();
        assert_eq!(store.count_unprocessed().await.unwrap(), 1);
    }
}
