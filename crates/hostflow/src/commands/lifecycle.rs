use crate::app::{self, App};
use colored::Colorize;
use hostflow_core::JobSpec;
use tokio_util::sync::CancellationToken;

/// Dispatch one host job and report how it ended
pub async fn handle(
    app: &App,
    job_type: &str,
    host: String,
    params: serde_json::Value,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    println!("{}", format!("{} '{}'...", job_type, host).yellow());

    let spec = JobSpec::new(job_type, host, app::operator()).with_params(params);
    let report = app.dispatcher.dispatch(spec, cancel).await;

    println!();
    app::print_report(&report)
}
