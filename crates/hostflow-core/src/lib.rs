//! HostFlow Core
//!
//! Job-driven host lifecycle: the host state machine, host and event
//! persistence, and the jobs that move hosts between states by calling a
//! [`hostflow_cloud::CloudProvider`].
//!
//! ```text
//! JobSpec ─▶ Dispatcher ─▶ JobRegistry ─▶ Job::run
//!                                           │
//!             HostStore (read, claim) ◀─────┤
//!             CloudProvider (side effect) ◀─┤
//!             HostStore (write) ◀───────────┤
//!             EventLog (append) ◀───────────┘
//! ```
//!
//! There is no global lock. Jobs claim a host by compare-and-setting an
//! in-flight status, and a job that loses the race backs off with success.

pub mod error;
pub mod event;
pub mod fanout;
pub mod host;
pub mod job;
pub mod queue;
pub mod reconcile;
pub mod store;

pub use error::{JobError, JobErrorKind, StoreError, StoreResult};
pub use event::{
    EventKey, EventLog, EventLogEntry, EventQuery, EventType, MemoryEventLog, ResourceType,
};
pub use fanout::MultiError;
pub use host::{Host, HostStatus, InvalidTransition, StatusUpdate};
pub use job::{
    HostJob, HostOperation, Job, JobContext, JobEnvironment, JobRegistry, JobSettings, JobSpec,
    JobStatus, Outcome, RegistryError,
};
pub use queue::{DispatchPolicy, DispatchReport, Dispatcher, LocalQueue, Queue, QueueError};
pub use reconcile::{Disagreement, StatusComparison};
pub use store::{FileStore, HostStore, MemoryHostStore};
