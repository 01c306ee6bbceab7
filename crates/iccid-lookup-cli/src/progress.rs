use colored::*;
use iccid_lookup::{BatchEvent, LookupOutcome, LookupStatus};
use tokio::sync::mpsc;

/// Render engine events to stderr until the sender side is dropped.
pub async fn render(mut rx: mpsc::UnboundedReceiver<BatchEvent>) {
    while let Some(event) = rx.recv().await {
        render_event(&event);
    }
}

fn render_event(event: &BatchEvent) {
    match event {
        BatchEvent::Started { total } => {
            eprintln!("🔎 Resolving {total} identifier(s)...");
        }
        BatchEvent::ItemStarted {
            index,
            total,
            partial_id,
        } => {
            eprintln!(
                "⚡ Item {index} of {total} ({}%) {}",
                event.percent(),
                partial_id.dimmed()
            );
        }
        BatchEvent::ItemCompleted { outcome, .. } => {
            eprintln!("   {}", outcome_line(outcome));
        }
        BatchEvent::Completed { summary } => {
            eprintln!(
                "{} {} found, {} not found, {} timed out, {} unavailable",
                "✅ Done:".green().bold(),
                summary.found,
                summary.not_found,
                summary.timed_out,
                summary.adapter_unavailable
            );
        }
        BatchEvent::Abandoned { completed, total } => {
            eprintln!(
                "{} stopped after {completed} of {total} item(s)",
                "⏹️  Cancelled:".yellow().bold()
            );
        }
    }
}

fn outcome_line(outcome: &LookupOutcome) -> String {
    let label = outcome.status().label();
    match outcome.status() {
        LookupStatus::Found => format!(
            "{} {}",
            label.green(),
            outcome.resolved_value().unwrap_or_default().bold()
        ),
        LookupStatus::NotFound => label.yellow().to_string(),
        LookupStatus::TimedOut => label.red().to_string(),
        LookupStatus::AdapterUnavailable => match outcome.detail() {
            Some(detail) => format!("{} {}", label.red().bold(), detail.dimmed()),
            None => label.red().bold().to_string(),
        },
    }
}
