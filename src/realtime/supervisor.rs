//! Connection supervisor: lifecycle for one project's realtime subscription.
//!
//! The supervisor owns the connect / heartbeat / reconnect / fallback-polling
//! loop and exposes only a connection-state watch and a typed event stream.
//! Fallback polling lives here, not in consumers: while degraded, the
//! supervisor itself refetches the project key on a fixed cadence, so views
//! keep updating without running their own timers.
//!
//! State machine:
//!
//! ```text
//! disconnected -> connecting -> connected <-> reconnecting -> fallback_polling
//!                      ^                                            |
//!                      +--------------- retry() --------------------+
//! ```
//!
//! `close()` is terminal from any state. Channel errors never propagate to
//! callers; they only move the machine.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::key::EntityKey;
use crate::notify::{Breadcrumb, BreadcrumbSink, TracingBreadcrumbs};
use crate::query::QueryClient;
use crate::realtime::channel::{Connector, Transport};
use crate::realtime::events::{ChannelMessage, ProjectEvent};

/// Connection lifecycle states visible to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Degraded mode: pushes unavailable, periodic refetch instead. Not an
    /// error state.
    FallbackPolling,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::FallbackPolling => "fallback_polling",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-subscription options.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionOptions {
    /// Keys invalidated alongside the project key on an `update` push
    /// (e.g. the project list embedding this project).
    pub dependent_keys: Vec<EntityKey>,
}

enum Command {
    Retry,
    Close,
}

/// Handle to one live subscription. Dropping the handle tears the channel
/// down and clears every timer the supervisor owns.
pub struct ProjectSubscription {
    project_id: i64,
    state_rx: watch::Receiver<ConnectionState>,
    events_tx: broadcast::Sender<ProjectEvent>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl ProjectSubscription {
    pub fn project_id(&self) -> i64 {
        self.project_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Watch for state transitions.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Independent receiver for the typed event stream.
    pub fn events(&self) -> broadcast::Receiver<ProjectEvent> {
        self.events_tx.subscribe()
    }

    /// Leave fallback polling and attempt a fresh connection (manual retry,
    /// or the app returning to the foreground). No-op in other states.
    pub fn retry(&self) {
        let _ = self.cmd_tx.send(Command::Retry);
    }

    /// Close the channel and stop all timers. Terminal.
    pub fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close);
    }
}

impl Drop for ProjectSubscription {
    fn drop(&mut self) {
        self.close();
        self.task.abort();
    }
}

/// Spawns and drives subscription tasks.
pub struct ConnectionSupervisor {
    connector: Arc<dyn Connector>,
    client: QueryClient,
    config: SyncConfig,
    breadcrumbs: Arc<dyn BreadcrumbSink>,
}

impl ConnectionSupervisor {
    pub fn new(connector: Arc<dyn Connector>, client: QueryClient, config: SyncConfig) -> Self {
        Self {
            connector,
            client,
            config,
            breadcrumbs: Arc::new(TracingBreadcrumbs),
        }
    }

    pub fn with_breadcrumbs(mut self, breadcrumbs: Arc<dyn BreadcrumbSink>) -> Self {
        self.breadcrumbs = breadcrumbs;
        self
    }

    /// Open a subscription for one project. Exactly one underlying channel
    /// exists per returned handle.
    pub fn subscribe(&self, project_id: i64, options: SubscriptionOptions) -> ProjectSubscription {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(64);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run_subscription(SubscriptionTask {
            project_id,
            options,
            connector: self.connector.clone(),
            client: self.client.clone(),
            config: self.config.clone(),
            breadcrumbs: self.breadcrumbs.clone(),
            state_tx,
            events_tx: events_tx.clone(),
            cmd_rx,
        }));

        ProjectSubscription {
            project_id,
            state_rx,
            events_tx,
            cmd_tx,
            task,
        }
    }
}

struct SubscriptionTask {
    project_id: i64,
    options: SubscriptionOptions,
    connector: Arc<dyn Connector>,
    client: QueryClient,
    config: SyncConfig,
    breadcrumbs: Arc<dyn BreadcrumbSink>,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<ProjectEvent>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
}

/// Why the connected loop (or a wait) ended.
enum LoopExit {
    /// Socket lost or keepalive expired; try to reconnect.
    Lost,
    /// Explicit close; stop the task.
    Closed,
}

async fn run_subscription(mut task: SubscriptionTask) {
    let project_key = EntityKey::project(task.project_id);
    let mut attempts: u32 = 0;

    loop {
        task.set_state(ConnectionState::Connecting);

        let connected = timeout(
            task.config.connect_timeout(),
            task.connector.connect(task.project_id),
        )
        .await;

        match connected {
            Ok(Ok(transport)) => {
                attempts = 0;
                task.set_state(ConnectionState::Connected);
                match task.connected_loop(transport, &project_key).await {
                    LoopExit::Closed => return,
                    LoopExit::Lost => {}
                }
            }
            Ok(Err(err)) => {
                debug!(project_id = task.project_id, error = %err, "connect failed");
            }
            Err(_) => {
                debug!(
                    project_id = task.project_id,
                    timeout_ms = task.config.connect_timeout_ms,
                    "connect timed out"
                );
            }
        }

        attempts += 1;
        if attempts >= task.config.max_reconnect_attempts {
            task.set_state(ConnectionState::FallbackPolling);
            match task.polling_loop(&project_key).await {
                LoopExit::Closed => return,
                // retry() requested; start over with a fresh budget.
                LoopExit::Lost => {
                    attempts = 0;
                    continue;
                }
            }
        }

        task.set_state(ConnectionState::Reconnecting);
        let delay = backoff_delay(attempts, task.config.backoff_base(), task.config.backoff_cap());
        debug!(
            project_id = task.project_id,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            "reconnecting after backoff"
        );
        tokio::select! {
            _ = sleep(delay) => {}
            cmd = task.cmd_rx.recv() => match cmd {
                Some(Command::Retry) => attempts = 0,
                Some(Command::Close) | None => {
                    task.set_state(ConnectionState::Disconnected);
                    return;
                }
            }
        }
    }
}

impl SubscriptionTask {
    fn set_state(&self, state: ConnectionState) {
        let changed = *self.state_tx.borrow() != state;
        let _ = self.state_tx.send(state);
        if changed {
            info!(project_id = self.project_id, state = %state, "connection state");
            self.breadcrumbs
                .record(Breadcrumb::new("connection", state.as_str()));
        }
    }

    /// Pump messages while connected. Keepalive mirrors the classic ws
    /// ping/pong pattern: a ping goes out every heartbeat interval, and a
    /// ping left unanswered past the pong timeout declares the link dead.
    async fn connected_loop(
        &mut self,
        mut transport: Box<dyn Transport>,
        project_key: &EntityKey,
    ) -> LoopExit {
        let mut ping_timer = interval(self.config.heartbeat_interval());
        // The first tick fires immediately; consume it so the first real ping
        // waits a full interval.
        ping_timer.tick().await;

        let mut last_seen = tokio::time::Instant::now();
        let mut awaiting_pong = false;

        loop {
            tokio::select! {
                _ = ping_timer.tick() => {
                    if awaiting_pong && last_seen.elapsed() > self.config.pong_timeout() {
                        warn!(project_id = self.project_id, "heartbeat expired; dropping connection");
                        transport.close().await;
                        return LoopExit::Lost;
                    }
                    if transport.ping().await.is_err() {
                        return LoopExit::Lost;
                    }
                    awaiting_pong = true;
                }

                msg = transport.next() => {
                    last_seen = tokio::time::Instant::now();
                    match msg {
                        Some(Ok(ChannelMessage::Heartbeat)) => {
                            awaiting_pong = false;
                        }
                        Some(Ok(ChannelMessage::Update(notice))) => {
                            awaiting_pong = false;
                            self.client.store().invalidate(project_key);
                            for key in &self.options.dependent_keys {
                                self.client.store().invalidate(key);
                            }
                            let _ = self.events_tx.send(ProjectEvent::Updated(notice));
                        }
                        Some(Ok(ChannelMessage::Progress(notice))) => {
                            awaiting_pong = false;
                            // Forwarded verbatim; transient progress never
                            // touches the cache.
                            let _ = self.events_tx.send(ProjectEvent::Progress(notice));
                        }
                        Some(Err(err)) => {
                            debug!(project_id = self.project_id, error = %err, "channel error");
                            transport.close().await;
                            return LoopExit::Lost;
                        }
                        None => return LoopExit::Lost,
                    }
                }

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Retry) => {}
                    Some(Command::Close) | None => {
                        transport.close().await;
                        self.set_state(ConnectionState::Disconnected);
                        return LoopExit::Closed;
                    }
                }
            }
        }
    }

    /// Degraded mode: refetch the project key on a fixed cadence until the
    /// consumer retries or closes.
    async fn polling_loop(&mut self, project_key: &EntityKey) -> LoopExit {
        let mut poll_timer = interval(self.config.poll_interval());

        loop {
            tokio::select! {
                _ = poll_timer.tick() => {
                    if let Err(err) = self.client.refetch(project_key).await {
                        debug!(project_id = self.project_id, error = %err, "fallback poll failed");
                    }
                }
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Retry) => return LoopExit::Lost,
                    Some(Command::Close) | None => {
                        self.set_state(ConnectionState::Disconnected);
                        return LoopExit::Closed;
                    }
                }
            }
        }
    }
}

/// Exponential backoff with jitter: `base * 2^(attempt-1)` capped at `cap`,
/// plus up to 25% random jitter (still capped).
fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let raw = base.saturating_mul(1u32 << exp).min(cap);
    let jitter_budget = raw.as_millis() as u64 / 4;
    let jitter = if jitter_budget == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=jitter_budget)
    };
    (raw + Duration::from_millis(jitter)).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ChannelError, TransportError};
    use crate::query::Fetcher;
    use crate::realtime::events::{ProgressNotice, UpdateNotice};
    use crate::store::{CacheStore, Snapshot};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    // =========================================
    // Test doubles
    // =========================================

    struct StaticFetcher {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Fetcher for StaticFetcher {
        async fn fetch(&self, key: &EntityKey) -> Result<Snapshot, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"id": key.id}))
        }
    }

    /// Transport fed from a channel of scripted frames.
    struct ScriptedTransport {
        frames: mpsc::UnboundedReceiver<Result<ChannelMessage, ChannelError>>,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn next(&mut self) -> Option<Result<ChannelMessage, ChannelError>> {
            self.frames.recv().await
        }
        async fn ping(&mut self) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn close(&mut self) {}
    }

    /// Connector that fails `failures` times, then hands out scripted
    /// transports.
    struct ScriptedConnector {
        failures: AtomicU32,
        attempts: AtomicU32,
        feeds: Mutex<Vec<mpsc::UnboundedSender<Result<ChannelMessage, ChannelError>>>>,
    }

    impl ScriptedConnector {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures: AtomicU32::new(failures),
                attempts: AtomicU32::new(0),
                feeds: Mutex::new(Vec::new()),
            })
        }

        fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }

        fn latest_feed(&self) -> mpsc::UnboundedSender<Result<ChannelMessage, ChannelError>> {
            self.feeds.lock().unwrap().last().unwrap().clone()
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self, _project_id: i64) -> Result<Box<dyn Transport>, ChannelError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(ChannelError::Connect("scripted failure".into()));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            self.feeds.lock().unwrap().push(tx);
            Ok(Box::new(ScriptedTransport { frames: rx }))
        }
    }

    #[derive(Default)]
    struct StateTrail(Mutex<Vec<String>>);

    impl BreadcrumbSink for StateTrail {
        fn record(&self, crumb: Breadcrumb) {
            if crumb.category == "connection" {
                self.0.lock().unwrap().push(crumb.message);
            }
        }
    }

    fn test_client() -> (QueryClient, Arc<StaticFetcher>) {
        let fetcher = Arc::new(StaticFetcher {
            calls: AtomicU32::new(0),
        });
        (
            QueryClient::new(Arc::new(CacheStore::new()), fetcher.clone()),
            fetcher,
        )
    }

    fn fast_config() -> SyncConfig {
        SyncConfig {
            connect_timeout_ms: 100,
            heartbeat_interval_ms: 50,
            pong_timeout_ms: 120,
            backoff_base_ms: 10,
            backoff_cap_ms: 40,
            max_reconnect_attempts: 5,
            poll_interval_ms: 30,
            ..SyncConfig::default()
        }
    }

    async fn wait_for_state(
        rx: &mut watch::Receiver<ConnectionState>,
        want: ConnectionState,
    ) {
        while *rx.borrow() != want {
            rx.changed().await.expect("supervisor task gone");
        }
    }

    // =========================================
    // State machine coverage
    // =========================================

    #[tokio::test(start_paused = true)]
    async fn test_five_failures_degrade_to_fallback_polling() {
        let connector = ScriptedConnector::new(u32::MAX);
        let (client, fetcher) = test_client();
        let trail = Arc::new(StateTrail::default());
        let supervisor = ConnectionSupervisor::new(connector.clone(), client, fast_config())
            .with_breadcrumbs(trail.clone());

        let sub = supervisor.subscribe(7, SubscriptionOptions::default());
        let mut state_rx = sub.state_watch();
        assert!(!sub.is_connected());

        wait_for_state(&mut state_rx, ConnectionState::FallbackPolling).await;
        assert!(!sub.is_connected());
        assert_eq!(connector.attempts(), 5);

        // The trail covers the whole degradation path, never touching connected.
        let trail = trail.0.lock().unwrap().clone();
        assert!(trail.contains(&"connecting".to_string()));
        assert!(trail.contains(&"reconnecting".to_string()));
        assert!(trail.contains(&"fallback_polling".to_string()));
        assert!(!trail.contains(&"connected".to_string()));

        // Polling refetches the project key while degraded.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(fetcher.calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_from_fallback_reconnects() {
        // Fail forever until we flip the switch off.
        let connector = ScriptedConnector::new(5);
        let (client, _fetcher) = test_client();
        let supervisor = ConnectionSupervisor::new(connector.clone(), client, fast_config());

        let sub = supervisor.subscribe(7, SubscriptionOptions::default());
        let mut state_rx = sub.state_watch();
        wait_for_state(&mut state_rx, ConnectionState::FallbackPolling).await;

        // Connector now succeeds; manual retry leaves degraded mode.
        sub.retry();
        wait_for_state(&mut state_rx, ConnectionState::Connected).await;
        assert!(sub.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connects_first_try_and_reports_connected() {
        let connector = ScriptedConnector::new(0);
        let (client, _) = test_client();
        let supervisor = ConnectionSupervisor::new(connector.clone(), client, fast_config());

        let sub = supervisor.subscribe(7, SubscriptionOptions::default());
        let mut state_rx = sub.state_watch();
        wait_for_state(&mut state_rx, ConnectionState::Connected).await;
        assert!(sub.is_connected());
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_socket_loss_moves_to_reconnecting_then_back() {
        let connector = ScriptedConnector::new(0);
        let (client, _) = test_client();
        let supervisor = ConnectionSupervisor::new(connector.clone(), client, fast_config());

        let sub = supervisor.subscribe(7, SubscriptionOptions::default());
        let mut state_rx = sub.state_watch();
        wait_for_state(&mut state_rx, ConnectionState::Connected).await;

        // Drop the feed: transport sees end-of-stream.
        drop(connector.latest_feed());
        wait_for_state(&mut state_rx, ConnectionState::Reconnecting).await;
        wait_for_state(&mut state_rx, ConnectionState::Connected).await;
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_terminal() {
        let connector = ScriptedConnector::new(0);
        let (client, _) = test_client();
        let supervisor = ConnectionSupervisor::new(connector.clone(), client, fast_config());

        let sub = supervisor.subscribe(7, SubscriptionOptions::default());
        let mut state_rx = sub.state_watch();
        wait_for_state(&mut state_rx, ConnectionState::Connected).await;

        sub.close();
        wait_for_state(&mut state_rx, ConnectionState::Disconnected).await;
        assert!(!sub.is_connected());
    }

    // =========================================
    // Message handling
    // =========================================

    #[tokio::test(start_paused = true)]
    async fn test_update_invalidates_project_and_dependent_keys() {
        let connector = ScriptedConnector::new(0);
        let (client, _) = test_client();
        let store = client.store().clone();
        let list_key = EntityKey::with_sub(crate::key::EntityKind::Project, 0, "list");
        store.set(&EntityKey::project(7), json!({"v": 1}));
        store.set(&list_key, json!([]));

        let supervisor = ConnectionSupervisor::new(connector.clone(), client, fast_config());
        let sub = supervisor.subscribe(
            7,
            SubscriptionOptions {
                dependent_keys: vec![list_key.clone()],
            },
        );
        let mut events = sub.events();
        let mut state_rx = sub.state_watch();
        wait_for_state(&mut state_rx, ConnectionState::Connected).await;

        connector
            .latest_feed()
            .send(Ok(ChannelMessage::Update(UpdateNotice {
                project_id: 7,
                entity: None,
                entity_id: None,
            })))
            .unwrap();

        let event = events.recv().await.unwrap();
        assert!(matches!(event, ProjectEvent::Updated(_)));
        assert!(store.get(&EntityKey::project(7)).unwrap().stale);
        assert!(store.get(&list_key).unwrap().stale);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_forwards_without_touching_store() {
        let connector = ScriptedConnector::new(0);
        let (client, _) = test_client();
        let store = client.store().clone();
        store.set(&EntityKey::project(7), json!({"v": 1}));

        let supervisor = ConnectionSupervisor::new(connector.clone(), client, fast_config());
        let sub = supervisor.subscribe(7, SubscriptionOptions::default());
        let mut events = sub.events();
        let mut state_rx = sub.state_watch();
        wait_for_state(&mut state_rx, ConnectionState::Connected).await;

        connector
            .latest_feed()
            .send(Ok(ChannelMessage::Progress(ProgressNotice {
                project_id: 7,
                phase: crate::progress::Phase::Crawl,
                percent: Some(55),
                message: None,
            })))
            .unwrap();

        let event = events.recv().await.unwrap();
        match event {
            ProjectEvent::Progress(notice) => assert_eq!(notice.percent, Some(55)),
            other => panic!("expected Progress, got {other:?}"),
        }
        let slot = store.get(&EntityKey::project(7)).unwrap();
        assert!(!slot.stale, "progress must not invalidate the cache");
        assert_eq!(slot.snapshot, Some(json!({"v": 1})));
    }

    // =========================================
    // Backoff
    // =========================================

    #[test]
    fn test_backoff_grows_and_caps() {
        let base = Duration::from_millis(500);
        let cap = Duration::from_secs(15);
        let mut previous = Duration::ZERO;
        for attempt in 1..=10 {
            let delay = backoff_delay(attempt, base, cap);
            assert!(delay <= cap, "attempt {attempt} exceeded the cap");
            assert!(delay >= previous.min(cap) / 2, "delay collapsed at {attempt}");
            previous = delay;
        }
        assert_eq!(backoff_delay(10, base, cap), cap);
    }

    #[test]
    fn test_backoff_first_attempt_near_base() {
        let base = Duration::from_millis(100);
        let cap = Duration::from_secs(15);
        for _ in 0..20 {
            let delay = backoff_delay(1, base, cap);
            assert!(delay >= base);
            assert!(delay <= base + base / 4);
        }
    }
}
