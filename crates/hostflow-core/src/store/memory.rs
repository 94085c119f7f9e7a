use super::HostStore;
use crate::error::{StoreError, StoreResult};
use crate::host::{Host, StatusUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-process host store
#[derive(Default)]
pub struct MemoryHostStore {
    hosts: RwLock<HashMap<String, Host>>,
}

impl MemoryHostStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HostStore for MemoryHostStore {
    async fn insert(&self, host: &Host) -> StoreResult<()> {
        let mut hosts = self.hosts.write().await;
        if hosts.contains_key(&host.id) {
            return Err(StoreError::AlreadyExists(host.id.clone()));
        }
        hosts.insert(host.id.clone(), host.clone());
        Ok(())
    }

    async fn find(&self, id: &str) -> StoreResult<Option<Host>> {
        Ok(self.hosts.read().await.get(id).cloned())
    }

    async fn list(&self) -> StoreResult<Vec<Host>> {
        let mut hosts: Vec<Host> = self.hosts.read().await.values().cloned().collect();
        hosts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(hosts)
    }

    async fn compare_and_set_status(&self, update: &StatusUpdate) -> StoreResult<bool> {
        let mut hosts = self.hosts.write().await;
        match hosts.get_mut(update.host_id()) {
            Some(host) if update.applies_to(host) => {
                update.apply(host);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_quarantined(&self, id: &str, quarantined: bool) -> StoreResult<bool> {
        let mut hosts = self.hosts.write().await;
        let host = hosts
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if host.quarantined == quarantined {
            return Ok(false);
        }
        host.quarantined = quarantined;
        Ok(true)
    }

    async fn set_last_communication(&self, id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let mut hosts = self.hosts.write().await;
        let host = hosts
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        host.last_communication_time = Some(at);
        Ok(())
    }
}
