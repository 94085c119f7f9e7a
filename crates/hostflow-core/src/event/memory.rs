use super::{EventLog, EventLogEntry, EventQuery, last_processed};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

/// In-process event log.
///
/// Entries are pushed whole under the write lock, so a concurrent reader
/// sees an entry completely or not at all.
#[derive(Default)]
pub struct MemoryEventLog {
    entries: RwLock<Vec<EventLogEntry>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, entry: EventLogEntry) -> StoreResult<()> {
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn find(&self, query: &EventQuery) -> StoreResult<Vec<EventLogEntry>> {
        Ok(query.run(self.entries.read().await.iter()))
    }

    async fn count(&self, query: &EventQuery) -> StoreResult<usize> {
        Ok(query.count(self.entries.read().await.iter()))
    }

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<EventLogEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .find(|e| e.id == id)
            .cloned())
    }

    async fn mark_processed(&self, id: &str) -> StoreResult<bool> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if entry.processed_at.is_some() {
            return Ok(false);
        }
        entry.processed_at = Some(Utc::now());
        Ok(true)
    }

    async fn find_last_processed(&self) -> StoreResult<Option<EventLogEntry>> {
        Ok(last_processed(self.entries.read().await.iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventType, ResourceType};
    use chrono::{DateTime, Duration};
    use serde_json::json;

    fn at(minutes: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
            + Duration::minutes(minutes)
    }

    #[tokio::test]
    async fn test_mark_processed_is_one_way() {
        let log = MemoryEventLog::new();
        let entry = EventLogEntry::host("h1", EventType::HostStarted, json!({}));
        let id = entry.id.clone();
        log.append(entry).await.unwrap();

        assert_eq!(log.count_unprocessed().await.unwrap(), 1);
        assert!(log.mark_processed(&id).await.unwrap());
        let first = log.find_by_id(&id).await.unwrap().unwrap().processed_at;

        assert!(!log.mark_processed(&id).await.unwrap());
        let second = log.find_by_id(&id).await.unwrap().unwrap().processed_at;
        assert_eq!(first, second);
        assert!(log.find_unprocessed(0).await.unwrap().is_empty());
        assert_eq!(log.find_last_processed().await.unwrap().unwrap().id, id);
    }

    #[tokio::test]
    async fn test_mark_processed_unknown_id() {
        let log = MemoryEventLog::new();
        assert!(matches!(
            log.mark_processed("missing").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_latest_special_type_split() {
        let log = MemoryEventLog::new();
        for (minutes, event_type) in [
            (1, EventType::DistroModified),
            (2, EventType::DistroAmiModified),
            (3, EventType::DistroModified),
            (4, EventType::DistroAmiModified),
        ] {
            let entry = EventLogEntry::new(ResourceType::Distro, "ubuntu", event_type, json!({}))
                .at(at(minutes));
            log.append(entry).await.unwrap();
        }

        let ami = log
            .find_latest_by_type(ResourceType::Distro, "ubuntu", EventType::DistroAmiModified, 1)
            .await
            .unwrap();
        assert_eq!(ami.len(), 1);
        assert_eq!(ami[0].timestamp, at(4));

        let primary = log
            .find_latest_by_type_excluding(
                ResourceType::Distro,
                "ubuntu",
                EventType::DistroAmiModified,
                10,
            )
            .await
            .unwrap();
        assert_eq!(primary.len(), 2);
        assert!(primary.iter().all(|e| e.event_type == EventType::DistroModified));
        assert_eq!(primary[0].timestamp, at(3));
    }

    #[tokio::test]
    async fn test_paginated_host_events_match_tag() {
        let log = MemoryEventLog::new();
        for minutes in 0..5 {
            log.append(
                EventLogEntry::host("h1", EventType::HostStarted, json!({})).at(at(minutes)),
            )
            .await
            .unwrap();
        }
        log.append(EventLogEntry::host("i-77", EventType::HostStopped, json!({})).at(at(10)))
            .await
            .unwrap();

        let (page0, total) = log
            .find_host_events_paginated("h1", Some("i-77"), 4, 0)
            .await
            .unwrap();
        assert_eq!(total, 6);
        assert_eq!(page0.len(), 4);
        assert_eq!(page0[0].resource_id, "i-77");

        let (page1, _) = log
            .find_host_events_paginated("h1", Some("i-77"), 4, 1)
            .await
            .unwrap();
        assert_eq!(page1.len(), 2);

        let (untagged, total) = log.find_host_events_paginated("h1", None, 10, 0).await.unwrap();
        assert_eq!(untagged.len(), 5);
        assert_eq!(total, 5);
    }

    #[tokio::test]
    async fn test_paginated_far_past_the_end_is_empty() {
        let log = MemoryEventLog::new();
        log.append(EventLogEntry::host("h1", EventType::HostStarted, json!({})))
            .await
            .unwrap();

        let (events, total) = log
            .find_host_events_paginated("h1", None, 20, usize::MAX)
            .await
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(total, 1);
    }
}
