//! Live project progress — `pulse watch`.
//!
//! Opens the realtime channel for one project and keeps a terminal view in
//! sync: pushes invalidate the cache, the observer refetches, and the bars
//! redraw. When the channel degrades to polling the supervisor keeps the
//! same loop fed, so this command never polls on its own.

use anyhow::{Context, Result};
use std::sync::Arc;

use pulse::config::PulseConfig;
use pulse::key::EntityKey;
use pulse::progress::phase_map_from_snapshot;
use pulse::query::QueryClient;
use pulse::realtime::{
    ConnectionSupervisor, ProjectEvent, SubscriptionOptions, WsConnector,
};
use pulse::rest::RestFetcher;
use pulse::store::CacheStore;
use pulse::ui::WatchUI;

pub async fn cmd_watch(config: &PulseConfig, project_id: i64) -> Result<()> {
    let store = Arc::new(CacheStore::new());
    let fetcher = Arc::new(RestFetcher::new(&config.remote.base_url));
    let client = QueryClient::new(store.clone(), fetcher);

    let connector = Arc::new(WsConnector::new(&config.remote.ws_url));
    let supervisor = ConnectionSupervisor::new(connector, client.clone(), config.sync.clone());

    let key = EntityKey::project(project_id);
    let ui = WatchUI::new(project_id);

    // Initial snapshot before any push arrives.
    let snapshot = client
        .get_or_fetch(&key)
        .await
        .with_context(|| format!("Failed to fetch project {project_id}"))?;
    ui.render_phases(&phase_map_from_snapshot(&snapshot));

    let subscription = supervisor.subscribe(project_id, SubscriptionOptions::default());
    let mut state_rx = subscription.state_watch();
    let mut events = subscription.events();
    let mut observer = client.observe(key.clone());

    ui.set_connection_state(subscription.state());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,

            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                ui.set_connection_state(*state_rx.borrow());
            }

            event = events.recv() => match event {
                Ok(ProjectEvent::Updated(notice)) => {
                    ui.log_update(notice.entity.as_deref(), notice.entity_id);
                }
                Ok(ProjectEvent::Progress(notice)) => {
                    ui.log_progress(notice.phase, notice.percent, notice.message.as_deref());
                }
                Err(_) => {}
            },

            // Refetches triggered by invalidation land here as fresh snapshots.
            next = observer.next() => match next {
                Some(Ok(snapshot)) => {
                    ui.render_phases(&phase_map_from_snapshot(&snapshot));
                }
                Some(Err(err)) => {
                    ui.log_warning(&format!("refresh failed: {err}"));
                }
                None => break,
            },
        }
    }

    subscription.close();
    ui.finish();
    Ok(())
}
