//! HostFlow Cloud Provider Abstraction
//!
//! This crate defines the uniform instance operations (create, start, stop,
//! terminate, status) that host lifecycle jobs drive, independent of which
//! cloud actually runs the instance.
//!
//! # Supported Providers
//!
//! - **Sakura Cloud**: servers via the usacloud CLI (`hostflow-cloud-sakura`)
//! - **Mock**: in-memory instances for tests ([`mock::MockProvider`])
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                hostflow-core jobs                │
//! │        (provision / start / stop / terminate)    │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                 hostflow-cloud                   │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │          Provider Abstraction             │   │
//! │  │  trait CloudProvider { ... }              │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────────┐  ┌──────────────┐         │
//! │  │ ProviderRegistry │  │ retry/backoff│         │
//! │  └──────────────────┘  └──────────────┘         │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼───────┐ ┌───────▼───────┐
//! │ sakura-cloud  │ │     mock      │
//! │   provider    │ │   provider    │
//! └───────────────┘ └───────────────┘
//! ```

pub mod error;
pub mod instance;
pub mod mock;
pub mod provider;

// Re-exports
pub use error::{CloudError, Result};
pub use instance::{Distro, InstanceStatus, InstanceTarget, ProviderKind};
pub use mock::{MockInstance, MockOperation, MockProvider};
pub use provider::{CloudProvider, ProviderRegistry, RetryConfig, retry_transient};
