//! Host entity and lifecycle state machine
//!
//! ```text
//! Uninitialized -> Building -> Starting -> Running
//! Running -> Stopping -> Stopped
//! Stopped -> Starting -> Running
//! Running | Stopped | Starting | Building -> Decommissioned
//! Decommissioned -> Terminated
//! any state -> Terminated
//! ```
//!
//! Building, Starting and Stopping are in-flight markers. A job claims a host
//! by compare-and-setting one of them from the expected source status, and
//! the owning job may roll its marker back to that source if the provider
//! call fails. A marker older than its lease is considered abandoned and may
//! be taken over by another job with a compare-and-set on the status and the
//! previous owner.
//!
//! A persisted status only changes through [`StatusUpdate`], whose
//! constructors are private to this crate's job framework.

use chrono::{DateTime, Utc};
use hostflow_cloud::{Distro, InstanceTarget, ProviderKind};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use thiserror::Error;

/// Lifecycle status of a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    Uninitialized,
    Building,
    Starting,
    Running,
    Stopping,
    Stopped,
    Decommissioned,
    Terminated,
}

impl HostStatus {
    pub const ALL: [HostStatus; 8] = [
        HostStatus::Uninitialized,
        HostStatus::Building,
        HostStatus::Starting,
        HostStatus::Running,
        HostStatus::Stopping,
        HostStatus::Stopped,
        HostStatus::Decommissioned,
        HostStatus::Terminated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HostStatus::Uninitialized => "uninitialized",
            HostStatus::Building => "building",
            HostStatus::Starting => "starting",
            HostStatus::Running => "running",
            HostStatus::Stopping => "stopping",
            HostStatus::Stopped => "stopped",
            HostStatus::Decommissioned => "decommissioned",
            HostStatus::Terminated => "terminated",
        }
    }

    /// Optimistic markers written before the provider confirms
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            HostStatus::Building | HostStatus::Starting | HostStatus::Stopping
        )
    }

    /// Whether `self -> next` is an edge of the lifecycle graph
    pub fn can_transition_to(&self, next: HostStatus) -> bool {
        use HostStatus::*;
        match (*self, next) {
            (Terminated, _) => false,
            (_, Terminated) => true,
            (Uninitialized, Building)
            | (Building, Starting)
            | (Starting, Running)
            | (Running, Stopping)
            | (Stopping, Stopped)
            | (Stopped, Starting) => true,
            (Running | Stopped | Starting | Building, Decommissioned) => true,
            _ => false,
        }
    }

    /// Whether an in-flight marker may be withdrawn back to `prior`
    pub fn can_roll_back_to(&self, prior: HostStatus) -> bool {
        use HostStatus::*;
        matches!(
            (*self, prior),
            (Stopping, Running) | (Starting, Stopped) | (Building, Uninitialized)
        )
    }

    /// Shortest sequence of legal transitions leading from `self` to `goal`,
    /// excluding `self`. `None` if `goal` is unreachable; empty if equal.
    pub fn path_to(&self, goal: HostStatus) -> Option<Vec<HostStatus>> {
        if *self == goal {
            return Some(Vec::new());
        }

        let mut previous: HashMap<HostStatus, HostStatus> = HashMap::new();
        let mut queue = VecDeque::from([*self]);
        while let Some(current) = queue.pop_front() {
            for next in HostStatus::ALL {
                if next == *self || previous.contains_key(&next) {
                    continue;
                }
                if !current.can_transition_to(next) {
                    continue;
                }
                previous.insert(next, current);
                if next == goal {
                    let mut path = vec![goal];
                    let mut cursor = goal;
                    while let Some(&prev) = previous.get(&cursor) {
                        if prev == *self {
                            break;
                        }
                        path.push(prev);
                        cursor = prev;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }
        None
    }
}

impl std::fmt::Display for HostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compute host tracked by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    /// Internal host ID
    pub id: String,

    /// Provider-side identifier, set once an instance is allocated
    #[serde(default)]
    pub tag: Option<String>,

    /// Provider that owns the instance
    pub provider: ProviderKind,

    /// Provisioning template
    pub distro: Distro,

    pub status: HostStatus,

    /// Failing health checks; blocks new job dispatch while set
    #[serde(default)]
    pub quarantined: bool,

    pub creation_time: DateTime<Utc>,

    #[serde(default)]
    pub last_communication_time: Option<DateTime<Utc>>,

    /// User or system actor that requested the host
    pub started_by: String,

    /// When `status` last changed
    pub status_changed_at: DateTime<Utc>,

    /// Job that last wrote `status`
    #[serde(default)]
    pub last_job_id: Option<String>,
}

impl Host {
    /// A new, uninitialized host record
    pub fn new(id: impl Into<String>, distro: Distro, started_by: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            tag: None,
            provider: distro.provider,
            distro,
            status: HostStatus::Uninitialized,
            quarantined: false,
            creation_time: now,
            last_communication_time: None,
            started_by: started_by.into(),
            status_changed_at: now,
            last_job_id: None,
        }
    }

    /// Seed the initial status of a record that has not been stored yet
    pub fn with_status(mut self, status: HostStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn instance_target(&self) -> InstanceTarget {
        InstanceTarget::new(self.id.clone(), self.tag.clone(), self.distro.clone())
    }

    /// Whether `job_id` wrote the current status
    pub fn is_owned_by(&self, job_id: &str) -> bool {
        self.last_job_id.as_deref() == Some(job_id)
    }

    /// An in-flight marker that has outlived `lease`; its job is presumed dead
    pub fn marker_expired(&self, lease: std::time::Duration) -> bool {
        if !self.status.is_in_flight() {
            return false;
        }
        match chrono::Duration::from_std(lease) {
            Ok(lease) => Utc::now() - self.status_changed_at > lease,
            Err(_) => false,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid transition for host {host_id}: {from} -> {to}")]
pub struct InvalidTransition {
    pub host_id: String,
    pub from: HostStatus,
    pub to: HostStatus,
}

/// A conditional status write: applied only if the stored host still has
/// `expected` status (and, when an owner is expected, was last written by
/// that job).
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    host_id: String,
    expected: HostStatus,
    next: HostStatus,
    job_id: String,
    expected_owner: Option<Option<String>>,
    tag: Option<String>,
    at: DateTime<Utc>,
}

impl StatusUpdate {
    pub(crate) fn transition(
        host_id: &str,
        expected: HostStatus,
        next: HostStatus,
        job_id: &str,
    ) -> Result<Self, InvalidTransition> {
        if !expected.can_transition_to(next) {
            return Err(InvalidTransition {
                host_id: host_id.to_string(),
                from: expected,
                to: next,
            });
        }
        Ok(Self::unchecked(host_id, expected, next, job_id))
    }

    pub(crate) fn rollback(
        host_id: &str,
        in_flight: HostStatus,
        prior: HostStatus,
        job_id: &str,
    ) -> Result<Self, InvalidTransition> {
        if !in_flight.can_roll_back_to(prior) {
            return Err(InvalidTransition {
                host_id: host_id.to_string(),
                from: in_flight,
                to: prior,
            });
        }
        Ok(Self::unchecked(host_id, in_flight, prior, job_id).owned())
    }

    /// Re-own an abandoned marker: status stays, owner and lease renew
    pub(crate) fn take_over(
        host_id: &str,
        marker: HostStatus,
        previous_owner: Option<&str>,
        job_id: &str,
    ) -> Result<Self, InvalidTransition> {
        if !marker.is_in_flight() {
            return Err(InvalidTransition {
                host_id: host_id.to_string(),
                from: marker,
                to: marker,
            });
        }
        let mut update = Self::unchecked(host_id, marker, marker, job_id);
        update.expected_owner = Some(previous_owner.map(str::to_string));
        Ok(update)
    }

    fn unchecked(host_id: &str, expected: HostStatus, next: HostStatus, job_id: &str) -> Self {
        Self {
            host_id: host_id.to_string(),
            expected,
            next,
            job_id: job_id.to_string(),
            expected_owner: None,
            tag: None,
            at: Utc::now(),
        }
    }

    /// Require that the stored host was last written by this job
    pub(crate) fn owned(mut self) -> Self {
        self.expected_owner = Some(Some(self.job_id.clone()));
        self
    }

    pub(crate) fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub fn expected(&self) -> HostStatus {
        self.expected
    }

    pub fn next(&self) -> HostStatus {
        self.next
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// The compare half of the compare-and-set
    pub fn applies_to(&self, host: &Host) -> bool {
        host.id == self.host_id
            && host.status == self.expected
            && self
                .expected_owner
                .as_ref()
                .is_none_or(|owner| host.last_job_id == *owner)
    }

    /// The set half of the compare-and-set
    pub fn apply(&self, host: &mut Host) {
        host.status = self.next;
        host.last_job_id = Some(self.job_id.clone());
        host.status_changed_at = self.at;
        if let Some(tag) = &self.tag {
            host.tag = Some(tag.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use HostStatus::*;

    fn host(status: HostStatus) -> Host {
        Host::new("h1", Distro::new("d", ProviderKind::Mock), "tester").with_status(status)
    }

    #[test]
    fn test_lifecycle_edges() {
        assert!(Uninitialized.can_transition_to(Building));
        assert!(Stopped.can_transition_to(Starting));
        assert!(Building.can_transition_to(Decommissioned));
        assert!(Decommissioned.can_transition_to(Terminated));
        assert!(Stopping.can_transition_to(Terminated));

        assert!(!Running.can_transition_to(Stopped));
        assert!(!Stopped.can_transition_to(Running));
        assert!(!Stopping.can_transition_to(Decommissioned));
        assert!(!Decommissioned.can_transition_to(Starting));
        assert!(!Terminated.can_transition_to(Terminated));
        assert!(!Terminated.can_transition_to(Running));
    }

    #[test]
    fn test_every_status_can_be_force_terminated() {
        for status in HostStatus::ALL {
            assert_eq!(status.can_transition_to(Terminated), status != Terminated);
        }
    }

    #[test]
    fn test_rollback_edges() {
        assert!(Stopping.can_roll_back_to(Running));
        assert!(Starting.can_roll_back_to(Stopped));
        assert!(Building.can_roll_back_to(Uninitialized));
        assert!(!Running.can_roll_back_to(Stopped));
        assert!(!Starting.can_roll_back_to(Building));
    }

    #[test]
    fn test_path_to_follows_edges() {
        assert_eq!(Running.path_to(Stopped), Some(vec![Stopping, Stopped]));
        assert_eq!(Stopped.path_to(Running), Some(vec![Starting, Running]));
        assert_eq!(
            Stopping.path_to(Running),
            Some(vec![Stopped, Starting, Running])
        );
        assert_eq!(Running.path_to(Running), Some(vec![]));
        assert_eq!(Decommissioned.path_to(Running), None);
        assert_eq!(Terminated.path_to(Stopped), None);
    }

    #[test]
    fn test_transition_rejects_illegal_edge() {
        let err = StatusUpdate::transition("h1", Stopped, Stopping, "job-1").unwrap_err();
        assert_eq!(err.from, Stopped);
        assert_eq!(err.to, Stopping);
        assert!(StatusUpdate::rollback("h1", Running, Stopped, "job-1").is_err());
    }

    #[test]
    fn test_owned_update_requires_same_job() {
        let mut h = host(Running);
        let gate = StatusUpdate::transition("h1", Running, Stopping, "job-1").unwrap();
        assert!(gate.applies_to(&h));
        gate.apply(&mut h);
        assert_eq!(h.status, Stopping);
        assert!(h.is_owned_by("job-1"));

        let theirs = StatusUpdate::transition("h1", Stopping, Stopped, "job-2")
            .unwrap()
            .owned();
        assert!(!theirs.applies_to(&h));

        let ours = StatusUpdate::transition("h1", Stopping, Stopped, "job-1")
            .unwrap()
            .owned()
            .with_tag("i-123");
        assert!(ours.applies_to(&h));
        ours.apply(&mut h);
        assert_eq!(h.status, Stopped);
        assert_eq!(h.tag.as_deref(), Some("i-123"));
    }

    #[test]
    fn test_take_over_requires_previous_owner() {
        let mut h = host(Stopping);
        h.last_job_id = Some("dead".to_string());
        h.status_changed_at = Utc::now() - chrono::Duration::hours(1);
        assert!(h.marker_expired(std::time::Duration::from_secs(60)));
        assert!(!h.marker_expired(std::time::Duration::from_secs(7200)));

        let wrong = StatusUpdate::take_over("h1", Stopping, Some("other"), "job-2").unwrap();
        assert!(!wrong.applies_to(&h));

        let adopt = StatusUpdate::take_over("h1", Stopping, Some("dead"), "job-2").unwrap();
        assert!(adopt.applies_to(&h));
        adopt.apply(&mut h);
        assert_eq!(h.status, Stopping);
        assert!(h.is_owned_by("job-2"));
        assert!(!h.marker_expired(std::time::Duration::from_secs(60)));

        assert!(StatusUpdate::take_over("h1", Running, None, "job-2").is_err());
        assert!(!host(Running).marker_expired(std::time::Duration::ZERO));
    }
}
