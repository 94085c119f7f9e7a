use crate::app::App;
use colored::Colorize;
use hostflow_core::{EventLog, EventLogEntry, HostStore};

/// One page of a host's history, newest first
pub async fn handle_history(
    app: &App,
    host_id: &str,
    limit: usize,
    page: usize,
) -> anyhow::Result<()> {
    // Provider-side events are keyed by the instance tag
    let tag = HostStore::find(app.store.as_ref(), host_id)
        .await?
        .and_then(|h| h.tag);

    let (events, total) = app
        .store
        .find_host_events_paginated(host_id, tag.as_deref(), limit, page)
        .await?;

    println!(
        "{}",
        format!("Events for '{}' (page {}, {} total)", host_id, page, total).blue()
    );
    print_table(&events);
    Ok(())
}

pub async fn handle_unprocessed(app: &App, limit: usize) -> anyhow::Result<()> {
    let total = app.store.count_unprocessed().await?;
    let events = app.store.find_unprocessed(limit).await?;

    println!("{}", format!("{} unprocessed event(s)", total).blue());
    print_table(&events);
    Ok(())
}

pub async fn handle_ack(app: &App, event_id: &str) -> anyhow::Result<()> {
    let event = app
        .store
        .find_by_id(event_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Event '{}' not found", event_id))?;

    if app.store.mark_processed(event_id).await? {
        println!(
            "{}",
            format!("✓ marked {} ({}) processed", event.id, event.event_type)
                .green()
                .bold()
        );
    } else {
        println!(
            "{}",
            format!("ℹ {} was already processed", event.id).dimmed()
        );
    }
    Ok(())
}

fn print_table(events: &[EventLogEntry]) {
    println!();
    if events.is_empty() {
        println!("{}", "No events".dimmed());
        return;
    }

    println!(
        "{}",
        format!(
            "{:<20} {:<24} {:<24} {:<40}",
            "TIME", "TYPE", "RESOURCE", "DATA"
        )
        .bold()
    );
    println!("{}", "─".repeat(110).dimmed());

    for event in events {
        let marker = if event.is_processed() { " " } else { "*" };
        println!(
            "{:<20} {:<24} {:<24} {}{}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            event.event_type.to_string().cyan(),
            event.resource_id,
            marker.yellow(),
            event.data
        );
        println!("{:<20} {}", "", event.id.dimmed());
    }
}
