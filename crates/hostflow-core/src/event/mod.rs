//! Append-only event log
//!
//! Every host state transition appends one [`EventLogEntry`]. Entries are
//! never modified except for `processed_at`, which a notification consumer
//! sets exactly once via [`EventLog::mark_processed`].

mod memory;
mod query;

pub use memory::MemoryEventLog;
pub use query::{EventQuery, SortOrder, TypeFilter};

use crate::error::StoreResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of resource an event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Host,
    Distro,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Host => "host",
            ResourceType::Distro => "distro",
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    HostCreated,
    HostStarted,
    HostStopped,
    HostDecommissioned,
    HostTerminated,
    HostStatusReconciled,
    HostQuarantined,
    HostUnquarantined,
    HostAmiModified,
    DistroModified,
    DistroAmiModified,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::HostCreated => "host_created",
            EventType::HostStarted => "host_started",
            EventType::HostStopped => "host_stopped",
            EventType::HostDecommissioned => "host_decommissioned",
            EventType::HostTerminated => "host_terminated",
            EventType::HostStatusReconciled => "host_status_reconciled",
            EventType::HostQuarantined => "host_quarantined",
            EventType::HostUnquarantined => "host_unquarantined",
            EventType::HostAmiModified => "host_ami_modified",
            EventType::DistroModified => "distro_modified",
            EventType::DistroAmiModified => "distro_ami_modified",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable audit record of a resource state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: String,
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    /// Payload specific to `event_type`
    #[serde(default)]
    pub data: serde_json::Value,
    /// `None` until a consumer claims the event
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
}

impl EventLogEntry {
    pub fn new(
        resource_type: ResourceType,
        resource_id: impl Into<String>,
        event_type: EventType,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            resource_type,
            resource_id: resource_id.into(),
            event_type,
            timestamp: Utc::now(),
            data,
            processed_at: None,
        }
    }

    pub fn host(host_id: impl Into<String>, event_type: EventType, data: serde_json::Value) -> Self {
        Self::new(ResourceType::Host, host_id, event_type, data)
    }

    /// Override the timestamp (backfills and tests)
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }

    /// Key consumers deduplicate on; a retried job may append the same
    /// transition twice.
    pub fn key(&self) -> EventKey {
        EventKey {
            resource_id: self.resource_id.clone(),
            event_type: self.event_type,
            timestamp: self.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub resource_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
}

/// Storage for event log entries.
///
/// Implementors provide the primitive operations; the access patterns used
/// by jobs and consumers are derived from [`EventLog::find`].
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append an entry. Must not wait on readers beyond a single write.
    async fn append(&self, entry: EventLogEntry) -> StoreResult<()>;

    /// Run a query (resource stage, sort, type stage, skip, limit)
    async fn find(&self, query: &EventQuery) -> StoreResult<Vec<EventLogEntry>>;

    /// Count entries matching the resource and type stages, ignoring skip/limit
    async fn count(&self, query: &EventQuery) -> StoreResult<usize>;

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<EventLogEntry>>;

    /// Claim an event. Returns `false` if it was already processed; the
    /// existing `processed_at` is never overwritten.
    async fn mark_processed(&self, id: &str) -> StoreResult<bool>;

    /// The most recently processed event, if any
    async fn find_last_processed(&self) -> StoreResult<Option<EventLogEntry>>;

    /// The `n` newest events for a resource, newest first
    async fn find_most_recent_by_resource(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
        n: usize,
    ) -> StoreResult<Vec<EventLogEntry>> {
        self.find(&EventQuery::resource(resource_type, resource_id).limit(n))
            .await
    }

    /// The `n` newest events strictly before `before`, newest first
    async fn find_by_resource_before_timestamp(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
        before: DateTime<Utc>,
        n: usize,
    ) -> StoreResult<Vec<EventLogEntry>> {
        self.find(
            &EventQuery::resource(resource_type, resource_id)
                .before(before)
                .limit(n),
        )
        .await
    }

    /// Unprocessed events, oldest first. A `limit` of 0 means no limit.
    async fn find_unprocessed(&self, limit: usize) -> StoreResult<Vec<EventLogEntry>> {
        let mut query = EventQuery::unprocessed();
        if limit > 0 {
            query = query.limit(limit);
        }
        self.find(&query).await
    }

    async fn count_unprocessed(&self) -> StoreResult<usize> {
        self.count(&EventQuery::unprocessed()).await
    }

    /// The `n` newest events of a resource other than `excluded`
    async fn find_latest_by_type_excluding(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
        excluded: EventType,
        n: usize,
    ) -> StoreResult<Vec<EventLogEntry>> {
        self.find(
            &EventQuery::resource(resource_type, resource_id)
                .excluding(excluded)
                .limit(n),
        )
        .await
    }

    /// The `n` newest events of a resource of exactly `event_type`
    async fn find_latest_by_type(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
        event_type: EventType,
        n: usize,
    ) -> StoreResult<Vec<EventLogEntry>> {
        self.find(
            &EventQuery::resource(resource_type, resource_id)
                .only(event_type)
                .limit(n),
        )
        .await
    }

    /// One page of a host's events, matching either its ID or its provider
    /// tag, together with the total number of matching events.
    async fn find_host_events_paginated(
        &self,
        host_id: &str,
        tag: Option<&str>,
        limit: usize,
        page: usize,
    ) -> StoreResult<(Vec<EventLogEntry>, usize)> {
        let mut ids = vec![host_id.to_string()];
        if let Some(tag) = tag.filter(|t| !t.is_empty()) {
            ids.push(tag.to_string());
        }
        let query = EventQuery::resources(ResourceType::Host, ids)
            .skip(page.saturating_mul(limit))
            .limit(limit);
        let events = self.find(&query).await?;
        let total = self.count(&query).await?;
        Ok((events, total))
    }
}

/// Most recently processed entry among `entries`
pub(crate) fn last_processed<'a>(
    entries: impl Iterator<Item = &'a EventLogEntry>,
) -> Option<EventLogEntry> {
    entries
        .filter(|e| e.processed_at.is_some())
        .max_by_key(|e| e.processed_at)
        .cloned()
}
