//! Panic-isolated fan-out
//!
//! Runs a batch of handlers on their own tasks. A handler that fails or
//! panics does not stop the others; every failure is collected into one
//! [`MultiError`], and the cleanup future runs after all handlers finished.

use std::fmt;
use std::future::Future;

/// Failures collected from a fan-out
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<String>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// `Ok(value)` if nothing was collected
    pub fn into_result<T>(self, value: T) -> Result<T, MultiError> {
        if self.is_empty() { Ok(value) } else { Err(self) }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s) occurred", self.errors.len())?;
        for error in &self.errors {
            write!(f, "\n  - {}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

/// Run every handler concurrently and wait for all of them.
///
/// Results come back in handler order. Panics are caught at the task
/// boundary and reported like errors.
pub async fn run_all<T, E, Fut, C>(handlers: Vec<Fut>, cleanup: C) -> Result<Vec<T>, MultiError>
where
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    C: Future<Output = ()>,
{
    let handles: Vec<_> = handlers.into_iter().map(tokio::spawn).collect();

    let mut results = Vec::with_capacity(handles.len());
    let mut errors = MultiError::new();
    for (i, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(Ok(value)) => results.push(value),
            Ok(Err(e)) => errors.push(format!("handler {}: {}", i, e)),
            Err(e) if e.is_panic() => {
                let payload = e.into_panic();
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!("Handler {} panicked: {}", i, message);
                errors.push(format!("handler {} panicked: {}", i, message));
            }
            Err(e) => errors.push(format!("handler {}: {}", i, e)),
        }
    }

    cleanup.await;
    errors.into_result(results)
}
