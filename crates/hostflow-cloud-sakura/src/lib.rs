//! Sakura Cloud provider for HostFlow
//!
//! This crate implements the CloudProvider trait for Sakura Cloud,
//! so host lifecycle jobs can create, power and delete CI servers there.
//!
//! # Requirements
//!
//! - `usacloud` CLI must be installed and configured
//! - Authentication is managed through usacloud configuration
//!
//! # Example
//!
//! ```ignore
//! use hostflow_cloud::ProviderRegistry;
//! use hostflow_cloud_sakura::SakuraCloudProvider;
//! use std::sync::Arc;
//!
//! let providers = ProviderRegistry::new().with(Arc::new(SakuraCloudProvider::new("tk1a")));
//! ```

pub mod error;
pub mod provider;
pub mod usacloud;

pub use error::{Result, SakuraError};
pub use provider::SakuraCloudProvider;
pub use usacloud::{CreateServerConfig, ServerInfo, Usacloud};
