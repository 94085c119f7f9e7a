use crate::app::{self, App};
use colored::Colorize;
use hostflow_core::JobSpec;
use hostflow_core::reconcile::find_stale_disagreements;
use tokio_util::sync::CancellationToken;

/// Reconcile one host, or sweep every stale host that disagrees with its
/// provider
pub async fn handle(
    app: &App,
    host: Option<String>,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    if let Some(host) = host {
        println!("{}", format!("Reconciling '{}'...", host).yellow());
        let spec = JobSpec::new("host-reconcile", host, app::operator());
        let report = app.dispatcher.dispatch(spec, cancel).await;
        println!();
        return app::print_report(&report);
    }

    println!("{}", "Looking for stale hosts...".yellow());
    let env = app.dispatcher.env();
    let disagreements = find_stale_disagreements(
        env.hosts.as_ref(),
        &env.providers,
        app.retry(),
        app.config.reconcile.staleness(),
        env.settings.marker_lease,
        cancel,
    )
    .await?;

    println!();
    if disagreements.is_empty() {
        println!("{}", "All hosts agree with their providers".dimmed());
        return Ok(());
    }

    println!(
        "{}",
        format!("{:<24} {:<16} {:<16} {:<16}", "HOST", "RECORDED", "LIVE", "EXPECTED").bold()
    );
    println!("{}", "─".repeat(72).dimmed());
    for d in &disagreements {
        println!(
            "{:<24} {:<16} {:<16} {:<16}",
            d.host.id,
            d.host.status.to_string().red(),
            d.live.to_string(),
            d.expected.to_string().green()
        );
    }
    println!();

    let specs = disagreements
        .into_iter()
        .map(|d| JobSpec::new("host-reconcile", d.host.id, app::operator()))
        .collect();
    let reports = app.dispatcher.run_batch(specs, cancel).await?;

    let mut failed = 0;
    for report in &reports {
        if let Err(e) = app::print_report(report) {
            eprintln!("{} {}", "Error:".red().bold(), e);
            failed += 1;
        }
    }
    if failed > 0 {
        anyhow::bail!("{} of {} reconcile job(s) failed", failed, reports.len());
    }
    Ok(())
}
