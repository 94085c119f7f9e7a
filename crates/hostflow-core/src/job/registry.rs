//! Job type registry
//!
//! Maps a job type name to a factory. Built once at start-up and handed to
//! the dispatcher; there is no global table.

use super::{
    DecommissionHost, HostJob, HostOperation, Job, JobEnvironment, JobSpec, ProvisionHost,
    QuarantineHost, ReconcileHost, StartHost, StopHost, TerminateHost,
};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    #[error("Job type already registered: {0}")]
    DuplicateJobType(String),

    #[error("Invalid parameters for {job_type}: {message}")]
    InvalidParams { job_type: String, message: String },
}

type JobFactory =
    Box<dyn Fn(JobSpec, JobEnvironment) -> Result<Box<dyn Job>, RegistryError> + Send + Sync>;

struct Registration {
    factory: JobFactory,
    runs_while_quarantined: bool,
}

#[derive(Default)]
pub struct JobRegistry {
    entries: HashMap<String, Registration>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in host job type
    pub fn with_host_jobs() -> Self {
        let mut registry = Self::new();
        registry.insert_operation::<ProvisionHost>();
        registry.insert_operation::<StartHost>();
        registry.insert_operation::<StopHost>();
        registry.insert_operation::<DecommissionHost>();
        registry.insert_operation::<TerminateHost>();
        registry.insert_operation::<QuarantineHost>();
        registry.insert_operation::<ReconcileHost>();
        registry
    }

    /// Register a custom factory
    pub fn register<F>(
        &mut self,
        job_type: impl Into<String>,
        runs_while_quarantined: bool,
        factory: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(JobSpec, JobEnvironment) -> Result<Box<dyn Job>, RegistryError>
            + Send
            + Sync
            + 'static,
    {
        let job_type = job_type.into();
        if self.entries.contains_key(&job_type) {
            return Err(RegistryError::DuplicateJobType(job_type));
        }
        self.entries.insert(
            job_type,
            Registration {
                factory: Box::new(factory),
                runs_while_quarantined,
            },
        );
        Ok(())
    }

    /// Register a [`HostOperation`] under its `JOB_TYPE`
    pub fn register_operation<O: HostOperation>(&mut self) -> Result<(), RegistryError> {
        if self.entries.contains_key(O::JOB_TYPE) {
            return Err(RegistryError::DuplicateJobType(O::JOB_TYPE.to_string()));
        }
        self.insert_operation::<O>();
        Ok(())
    }

    fn insert_operation<O: HostOperation>(&mut self) {
        let factory = |spec: JobSpec, env: JobEnvironment| -> Result<Box<dyn Job>, RegistryError> {
            let params = if spec.params.is_null() {
                serde_json::Value::Object(Default::default())
            } else {
                spec.params.clone()
            };
            let operation: O =
                serde_json::from_value(params).map_err(|e| RegistryError::InvalidParams {
                    job_type: O::JOB_TYPE.to_string(),
                    message: e.to_string(),
                })?;
            Ok(Box::new(HostJob::new(spec, operation, env)))
        };
        self.entries.insert(
            O::JOB_TYPE.to_string(),
            Registration {
                factory: Box::new(factory),
                runs_while_quarantined: O::RUNS_WHILE_QUARANTINED,
            },
        );
    }

    /// Instantiate the job described by `spec`
    pub fn build(&self, spec: JobSpec, env: JobEnvironment) -> Result<Box<dyn Job>, RegistryError> {
        let entry = self
            .entries
            .get(&spec.job_type)
            .ok_or_else(|| RegistryError::UnknownJobType(spec.job_type.clone()))?;
        (entry.factory)(spec, env)
    }

    /// Whether jobs of this type bypass the quarantine gate
    pub fn runs_while_quarantined(&self, job_type: &str) -> bool {
        self.entries
            .get(job_type)
            .is_some_and(|entry| entry.runs_while_quarantined)
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.entries.contains_key(job_type)
    }

    /// Registered job type names, sorted
    pub fn job_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::MemoryEventLog;
    use crate::store::MemoryHostStore;
    use hostflow_cloud::ProviderRegistry;
    use serde_json::json;
    use std::sync::Arc;

    fn env() -> JobEnvironment {
        JobEnvironment::new(
            Arc::new(MemoryHostStore::new()),
            Arc::new(MemoryEventLog::new()),
            ProviderRegistry::new(),
        )
    }

    #[test]
    fn test_builtin_types() {
        let registry = JobRegistry::with_host_jobs();
        assert_eq!(
            registry.job_types(),
            vec![
                "host-decommission",
                "host-provision",
                "host-quarantine",
                "host-reconcile",
                "host-start",
                "host-stop",
                "host-terminate",
            ]
        );
        assert!(registry.runs_while_quarantined("host-terminate"));
        assert!(!registry.runs_while_quarantined("host-stop"));
    }

    #[test]
    fn test_build_parses_params() {
        let registry = JobRegistry::with_host_jobs();
        let spec = JobSpec::new("host-stop", "h1", "tester").with_params(json!({ "strict": true }));
        let job = registry.build(spec, env()).unwrap();
        assert_eq!(job.spec().job_type, "host-stop");
        assert!(!job.status().completed);

        let bad = JobSpec::new("host-terminate", "h1", "tester").with_params(json!({ "force": "yes" }));
        assert!(matches!(
            registry.build(bad, env()),
            Err(RegistryError::InvalidParams { .. })
        ));

        let unknown = JobSpec::new("host-reboot", "h1", "tester");
        assert!(matches!(
            registry.build(unknown, env()),
            Err(RegistryError::UnknownJobType(_))
        ));
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut registry = JobRegistry::with_host_jobs();
        assert!(matches!(
            registry.register_operation::<StopHost>(),
            Err(RegistryError::DuplicateJobType(_))
        ));
        assert!(
            registry
                .register("custom", false, |spec, env| {
                    Ok(Box::new(HostJob::new(spec, StopHost::default(), env)) as Box<dyn Job>)
                })
                .is_ok()
        );
        assert!(registry.contains("custom"));
    }
}
