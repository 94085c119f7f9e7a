use colored::Colorize;
use hostflow_cloud::{MockProvider, ProviderRegistry, RetryConfig};
use hostflow_cloud_sakura::SakuraCloudProvider;
use hostflow_config::HostflowConfig;
use hostflow_core::{
    DispatchPolicy, DispatchReport, Dispatcher, FileStore, JobEnvironment, JobRegistry,
    JobSettings, Outcome,
};
use std::sync::Arc;

/// Everything a command needs, built once from configuration
pub struct App {
    pub config: HostflowConfig,
    pub store: Arc<FileStore>,
    pub dispatcher: Dispatcher,
}

impl App {
    pub fn new(config: HostflowConfig) -> Self {
        tracing::debug!(state_dir = %config.state_dir.display(), "Opening file store");
        let store = Arc::new(FileStore::new(&config.state_dir));

        let providers = ProviderRegistry::new()
            .with(Arc::new(SakuraCloudProvider::new(config.sakura.zone.clone())))
            .with(Arc::new(MockProvider::new()));

        let env = JobEnvironment::new(store.clone(), store.clone(), providers)
            .with_settings(job_settings(&config));
        let dispatcher = Dispatcher::new(Arc::new(JobRegistry::with_host_jobs()), env)
            .with_policy(dispatch_policy(&config));

        Self {
            config,
            store,
            dispatcher,
        }
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.dispatcher.env().settings.retry
    }
}

pub fn job_settings(config: &HostflowConfig) -> JobSettings {
    JobSettings {
        retry: RetryConfig {
            max_attempts: config.retry.max_attempts,
            initial_delay: config.retry.initial_delay(),
            max_delay: config.retry.max_delay(),
            backoff_multiplier: config.retry.backoff_multiplier,
        },
        provision_poll_interval: config.provision.poll_interval(),
        provision_timeout: config.provision.timeout(),
        marker_lease: config.reconcile.marker_lease(),
    }
}

pub fn dispatch_policy(config: &HostflowConfig) -> DispatchPolicy {
    DispatchPolicy {
        max_attempts: config.dispatcher.max_attempts,
        job_timeout: config.dispatcher.job_timeout(),
        retry_delay: config.retry.initial_delay(),
    }
}

/// Name recorded as `started_by` on jobs issued from the command line
pub fn operator() -> String {
    std::env::var("USER")
        .map(|user| format!("cli:{}", user))
        .unwrap_or_else(|_| "cli".to_string())
}

/// Print a dispatch result, failing the command if the job did not succeed
pub fn print_report(report: &DispatchReport) -> anyhow::Result<()> {
    if let Some(reason) = &report.rejected {
        anyhow::bail!("{} rejected: {}", report.job_type, reason);
    }

    if report.status.has_errors {
        let kind = report
            .error_kind
            .as_ref()
            .map(|k| k.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        anyhow::bail!(
            "{} failed for '{}' after {} attempt(s) ({}): {}",
            report.job_type,
            report.host_id,
            report.attempts,
            kind,
            report.status.error_messages.join("; ")
        );
    }

    match report.outcome {
        Some(Outcome::Applied) => println!(
            "{}",
            format!("✓ {} applied to '{}'", report.job_type, report.host_id)
                .green()
                .bold()
        ),
        Some(Outcome::AlreadyDone) => println!(
            "{}",
            format!("ℹ '{}' was already there", report.host_id).dimmed()
        ),
        Some(Outcome::Superseded) => println!(
            "{}",
            format!("⚠ another job holds '{}', backed off", report.host_id).yellow()
        ),
        None => {}
    }
    println!("  {} {}", "job:".dimmed(), report.job_id.dimmed());

    Ok(())
}
