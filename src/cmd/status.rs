//! One-shot project status — `pulse status`.

use anyhow::{Context, Result};
use console::style;
use std::sync::Arc;

use pulse::key::EntityKey;
use pulse::progress::{Phase, PhaseStatus, completion_percentage, phase_map_from_snapshot};
use pulse::query::QueryClient;
use pulse::rest::RestFetcher;
use pulse::store::CacheStore;
use pulse::ui::icons::{BLOCKER, CHECK, SKIP, SPARKLE};

pub async fn cmd_status(base_url: &str, project_id: i64) -> Result<()> {
    let store = Arc::new(CacheStore::new());
    let fetcher = Arc::new(RestFetcher::new(base_url));
    let client = QueryClient::new(store, fetcher);

    let snapshot = client
        .get_or_fetch(&EntityKey::project(project_id))
        .await
        .with_context(|| format!("Failed to fetch project {project_id}"))?;

    let name = snapshot
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or("(unnamed)");
    let phases = phase_map_from_snapshot(&snapshot);
    let pct = completion_percentage(&phases);

    println!();
    println!(
        "{}{} {}",
        SPARKLE,
        style(name).bold(),
        style(format!("#{project_id}")).dim()
    );
    println!("  {}% complete", style(pct).bold());
    println!();

    for phase in Phase::ORDER {
        let entry = phases.get(&phase).cloned().unwrap_or_default();
        let (icon, status) = match entry.status {
            PhaseStatus::Completed => (format!("{CHECK}"), style("completed").green()),
            PhaseStatus::InProgress => (format!("{SPARKLE}"), style("in progress").yellow()),
            PhaseStatus::Blocked => (format!("{BLOCKER}"), style("blocked").red()),
            PhaseStatus::Skipped => (format!("{SKIP}"), style("skipped").dim()),
            PhaseStatus::Pending => ("   ".to_string(), style("pending").dim()),
        };
        print!("  {icon}{:<10} {status}", phase.to_string());
        if let Some(reason) = &entry.blocked_reason {
            print!("  ({})", style(reason).red());
        }
        println!();
    }
    println!();

    Ok(())
}
