use crate::app::App;
use colored::Colorize;
use hostflow_core::{Host, HostStatus, HostStore};

pub async fn handle(app: &App, host: Option<String>) -> anyhow::Result<()> {
    let hosts = match host {
        Some(id) => {
            let host = HostStore::find(app.store.as_ref(), &id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Host '{}' not found", id))?;
            vec![host]
        }
        None => app.store.list().await?,
    };

    if hosts.is_empty() {
        println!("{}", "No hosts recorded".dimmed());
        return Ok(());
    }

    println!(
        "{}",
        format!(
            "{:<24} {:<16} {:<14} {:<24} {:<20}",
            "HOST", "STATUS", "PROVIDER", "TAG", "CHANGED"
        )
        .bold()
    );
    println!("{}", "─".repeat(100).dimmed());

    for host in &hosts {
        print_row(host);
    }

    Ok(())
}

fn print_row(host: &Host) {
    let status = host.status.to_string();
    let status = match host.status {
        HostStatus::Running => status.green(),
        HostStatus::Stopped | HostStatus::Uninitialized => status.normal(),
        HostStatus::Decommissioned | HostStatus::Terminated => status.dimmed(),
        _ => status.yellow(),
    };

    let id = if host.quarantined {
        format!("{} [q]", host.id).red()
    } else {
        host.id.normal()
    };

    println!(
        "{:<24} {:<16} {:<14} {:<24} {:<20}",
        id,
        status,
        host.provider.to_string(),
        host.tag.as_deref().unwrap_or("-"),
        host.status_changed_at.format("%Y-%m-%d %H:%M:%S").to_string()
    );
}
