//! Event log queries
//!
//! A query runs as a small pipeline: match on resource first, sort, then
//! match on event type, then skip and limit. Filtering by resource before
//! type keeps the scan on the resource index even when the type filter is a
//! negation ("everything except AMI changes").

use super::{EventLogEntry, EventType, ResourceType};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFilter {
    Any,
    Only(EventType),
    Exclude(EventType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    NewestFirst,
    OldestFirst,
}

#[derive(Debug, Clone)]
pub struct EventQuery {
    resource_type: Option<ResourceType>,
    resource_ids: Vec<String>,
    before: Option<DateTime<Utc>>,
    unprocessed_only: bool,
    type_filter: TypeFilter,
    order: SortOrder,
    skip: usize,
    limit: Option<usize>,
}

impl EventQuery {
    /// Events of one resource, newest first
    pub fn resource(resource_type: ResourceType, resource_id: impl Into<String>) -> Self {
        Self::resources(resource_type, vec![resource_id.into()])
    }

    /// Events of any of the given resource IDs, newest first
    pub fn resources(resource_type: ResourceType, resource_ids: Vec<String>) -> Self {
        Self {
            resource_type: Some(resource_type),
            resource_ids,
            before: None,
            unprocessed_only: false,
            type_filter: TypeFilter::Any,
            order: SortOrder::NewestFirst,
            skip: 0,
            limit: None,
        }
    }

    /// All unprocessed events, oldest first
    pub fn unprocessed() -> Self {
        Self {
            resource_type: None,
            resource_ids: Vec::new(),
            before: None,
            unprocessed_only: true,
            type_filter: TypeFilter::Any,
            order: SortOrder::OldestFirst,
            skip: 0,
            limit: None,
        }
    }

    pub fn before(mut self, timestamp: DateTime<Utc>) -> Self {
        self.before = Some(timestamp);
        self
    }

    pub fn only(mut self, event_type: EventType) -> Self {
        self.type_filter = TypeFilter::Only(event_type);
        self
    }

    pub fn excluding(mut self, event_type: EventType) -> Self {
        self.type_filter = TypeFilter::Exclude(event_type);
        self
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.skip = n;
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// First match stage
    pub fn matches_resource(&self, entry: &EventLogEntry) -> bool {
        if let Some(resource_type) = self.resource_type {
            if entry.resource_type != resource_type {
                return false;
            }
        }
        if !self.resource_ids.is_empty() && !self.resource_ids.contains(&entry.resource_id) {
            return false;
        }
        if let Some(before) = self.before {
            if entry.timestamp >= before {
                return false;
            }
        }
        !(self.unprocessed_only && entry.is_processed())
    }

    /// Second match stage
    pub fn matches_type(&self, entry: &EventLogEntry) -> bool {
        match self.type_filter {
            TypeFilter::Any => true,
            TypeFilter::Only(t) => entry.event_type == t,
            TypeFilter::Exclude(t) => entry.event_type != t,
        }
    }

    /// Run the pipeline over entries given in append order
    pub fn run<'a>(&self, entries: impl Iterator<Item = &'a EventLogEntry>) -> Vec<EventLogEntry> {
        let mut matched: Vec<(usize, &EventLogEntry)> = entries
            .enumerate()
            .filter(|(_, e)| self.matches_resource(e))
            .collect();

        // Ties on timestamp fall back to append order
        match self.order {
            SortOrder::NewestFirst => {
                matched.sort_by(|(ia, a), (ib, b)| b.timestamp.cmp(&a.timestamp).then(ib.cmp(ia)))
            }
            SortOrder::OldestFirst => {
                matched.sort_by(|(ia, a), (ib, b)| a.timestamp.cmp(&b.timestamp).then(ia.cmp(ib)))
            }
        }

        matched
            .into_iter()
            .map(|(_, e)| e)
            .filter(|e| self.matches_type(e))
            .skip(self.skip)
            .take(self.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// Number of entries passing both match stages
    pub fn count<'a>(&self, entries: impl Iterator<Item = &'a EventLogEntry>) -> usize {
        entries
            .filter(|e| self.matches_resource(e) && self.matches_type(e))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(id: &str, event_type: EventType, minutes: i64) -> EventLogEntry {
        let base = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        EventLogEntry::host(id, event_type, serde_json::json!({}))
            .at(base + Duration::minutes(minutes))
    }

    #[test]
    fn test_excluding_applies_after_resource_and_sort() {
        let entries = vec![
            entry("h1", EventType::HostStarted, 1),
            entry("h1", EventType::HostAmiModified, 3),
            entry("h2", EventType::HostStopped, 4),
            entry("h1", EventType::HostStopped, 2),
        ];

        let query = EventQuery::resource(ResourceType::Host, "h1")
            .excluding(EventType::HostAmiModified)
            .limit(5);
        let found = query.run(entries.iter());

        let types: Vec<EventType> = found.iter().map(|e| e.event_type).collect();
        assert_eq!(types, vec![EventType::HostStopped, EventType::HostStarted]);
        assert_eq!(query.count(entries.iter()), 2);
    }

    #[test]
    fn test_unprocessed_is_oldest_first() {
        let mut processed = entry("h1", EventType::HostStarted, 0);
        processed.processed_at = Some(Utc::now());
        let entries = vec![
            entry("h2", EventType::HostStopped, 5),
            processed,
            entry("h1", EventType::HostStopped, 1),
        ];

        let found = EventQuery::unprocessed().run(entries.iter());
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].resource_id, "h1");
        assert_eq!(found[1].resource_id, "h2");
    }

    #[test]
    fn test_same_timestamp_newest_append_first() {
        let entries = vec![
            entry("h1", EventType::HostStopped, 1),
            entry("h1", EventType::HostStarted, 1),
        ];

        let found = EventQuery::resource(ResourceType::Host, "h1").run(entries.iter());
        assert_eq!(found[0].event_type, EventType::HostStarted);
        assert_eq!(found[1].event_type, EventType::HostStopped);
    }

    #[test]
    fn test_before_is_strict_and_paged() {
        let entries: Vec<EventLogEntry> = (0..6)
            .map(|m| entry("h1", EventType::HostStarted, m))
            .collect();
        let cutoff = entries[4].timestamp;

        let found = EventQuery::resource(ResourceType::Host, "h1")
            .before(cutoff)
            .skip(1)
            .limit(2)
            .run(entries.iter());

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].timestamp, entries[2].timestamp);
        assert_eq!(found[1].timestamp, entries[1].timestamp);
    }
}
