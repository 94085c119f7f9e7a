//! Cloud provider trait definition

use crate::error::{CloudError, Result};
use crate::instance::{InstanceStatus, InstanceTarget, ProviderKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Cloud provider abstraction trait
///
/// Every backend (Sakura Cloud, the in-memory mock, ...) implements this
/// trait so that jobs can drive instances without knowing which cloud they
/// live in.
///
/// Implementations must report a missing instance distinctly:
/// `get_instance_status` returns [`InstanceStatus::Terminated`],
/// `terminate_instance` succeeds, and `start_instance` / `stop_instance`
/// fail with [`CloudError::InstanceNotFound`].
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Returns the provider name (e.g., "sakura-cloud", "mock")
    fn name(&self) -> &str;

    /// Returns the tag hosts use to refer to this provider
    fn kind(&self) -> ProviderKind;

    /// Allocate an instance for the target and return its provider-side ID.
    /// Calling this again for the same host must return the existing instance.
    async fn create_instance(
        &self,
        cancel: &CancellationToken,
        target: &InstanceTarget,
    ) -> Result<String>;

    /// Power on an existing instance
    async fn start_instance(
        &self,
        cancel: &CancellationToken,
        target: &InstanceTarget,
    ) -> Result<()>;

    /// Power off an existing instance
    async fn stop_instance(
        &self,
        cancel: &CancellationToken,
        target: &InstanceTarget,
    ) -> Result<()>;

    /// Destroy the instance
    async fn terminate_instance(
        &self,
        cancel: &CancellationToken,
        target: &InstanceTarget,
    ) -> Result<()>;

    /// Query the live status of the instance
    async fn get_instance_status(
        &self,
        cancel: &CancellationToken,
        target: &InstanceTarget,
    ) -> Result<InstanceStatus>;
}

/// Explicit table of provider backends, built once at start-up
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn CloudProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under its own kind, replacing any previous one
    pub fn register(&mut self, provider: Arc<dyn CloudProvider>) {
        tracing::debug!("Registered cloud provider: {}", provider.name());
        self.providers.insert(provider.kind(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn CloudProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Result<Arc<dyn CloudProvider>> {
        self.providers
            .get(&kind)
            .cloned()
            .ok_or_else(|| CloudError::ProviderNotFound(kind.to_string()))
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.providers.keys().copied().collect()
    }
}

/// Retry configuration for provider operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// A single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Delay to wait after the given (1-based) failed attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay = self
            .initial_delay
            .mul_f64(self.backoff_multiplier.powi(exponent));
        delay.min(self.max_delay)
    }
}

/// Run a provider operation, retrying transient failures with backoff.
///
/// Non-transient errors are returned immediately. Cancellation while waiting
/// between attempts returns [`CloudError::Cancelled`].
pub async fn retry_transient<T, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    operation: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < config.max_attempts => {
                let delay = config.delay_for(attempt);
                tracing::warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    operation,
                    attempt,
                    config.max_attempts,
                    e,
                    delay
                );
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(CloudError::Cancelled(operation.to_string()));
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
