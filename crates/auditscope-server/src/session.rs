//! Per-connection tail session
//!
//! A [`TailSession`] owns one client's tailing state and runs as a single task.
//! Its event loop selects over three sources: inbound client frames, the one
//! in-flight fetch, and the one pending poll timer. Every handler performs a
//! single state transition and arms at most one of the two async slots, so a
//! session never has more than one outstanding fetch.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;

use auditscope_api::{ApiError, ApiResult, LogTailer, TailPage, TailRequest, TailerFactory};
use auditscope_logs::{LogNormalizer, NoiseCatalog, NoiseClassifier, RateLimiter};
use auditscope_types::{ClientMessage, Credentials, ServerMessage};

/// Polling limits applied to every session
#[derive(Clone, Debug)]
pub struct SessionSettings {
    /// Interval used when `start_tail` does not ask for one
    pub default_interval: Duration,
    pub min_interval: Duration,
    pub max_interval: Duration,

    /// Wait after a rate-limit rejection that carried no retry hint
    pub rate_limit_fallback: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_interval: Duration::from_secs(5),
            min_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(300),
            rate_limit_fallback: Duration::from_secs(60),
        }
    }
}

impl SessionSettings {
    /// Resolve a client-requested interval, clamped to the configured range
    pub fn poll_interval(&self, requested_secs: Option<f64>) -> Result<Duration, String> {
        let Some(secs) = requested_secs else {
            return Ok(self.default_interval);
        };
        if !secs.is_finite() || secs <= 0.0 {
            return Err(format!(
                "pollIntervalSeconds must be a positive number, got {}",
                secs
            ));
        }
        let requested = Duration::try_from_secs_f64(secs).unwrap_or(self.max_interval);
        Ok(requested.max(self.min_interval).min(self.max_interval))
    }
}

/// Everything a session borrows from the process
#[derive(Clone)]
pub struct SessionContext {
    /// Read-only noise catalog shared by all sessions
    pub catalog: Arc<NoiseCatalog>,
    pub factory: Arc<dyn TailerFactory>,
    pub settings: SessionSettings,
}

impl SessionContext {
    pub fn new(
        catalog: Arc<NoiseCatalog>,
        factory: Arc<dyn TailerFactory>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            catalog,
            factory,
            settings,
        }
    }
}

/// Lifecycle of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No credentials yet
    Disconnected,
    /// Credentials set, not tailing
    Connected,
    /// Tail loop active
    Polling,
}

/// The fetch currently outstanding for a session
struct InFlight {
    cancel: CancellationToken,
    fetch: BoxFuture<'static, ApiResult<TailPage>>,
}

/// One client connection's tailing engine
pub struct TailSession {
    id: u64,
    context: SessionContext,
    outbound: mpsc::Sender<ServerMessage>,

    tailer: Option<Arc<dyn LogTailer>>,
    sources: Vec<String>,
    cursor: Option<String>,
    poll_interval: Duration,
    enabled_ids: Vec<String>,
    classifier: NoiseClassifier,
    rate_limiter: RateLimiter,
    polling: bool,

    in_flight: Option<InFlight>,
    next_poll: Option<Pin<Box<Sleep>>>,
}

impl TailSession {
    pub fn new(id: u64, context: SessionContext, outbound: mpsc::Sender<ServerMessage>) -> Self {
        let poll_interval = context.settings.default_interval;
        Self {
            id,
            context,
            outbound,
            tailer: None,
            sources: Vec::new(),
            cursor: None,
            poll_interval,
            enabled_ids: Vec::new(),
            classifier: NoiseClassifier::default(),
            rate_limiter: RateLimiter::new(),
            polling: false,
            in_flight: None,
            next_poll: None,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.polling {
            SessionState::Polling
        } else if self.tailer.is_some() {
            SessionState::Connected
        } else {
            SessionState::Disconnected
        }
    }

    /// Drive the session until the inbound side closes
    pub async fn run(mut self, mut inbound: mpsc::Receiver<String>) {
        tracing::debug!(session = self.id, "session started");

        loop {
            tokio::select! {
                biased;

                frame = inbound.recv() => match frame {
                    Some(text) => self.handle_frame(&text).await,
                    None => {
                        self.close();
                        break;
                    }
                },

                result = in_flight_done(&mut self.in_flight) => {
                    self.in_flight = None;
                    self.complete_cycle(result).await;
                }

                () = timer_fired(&mut self.next_poll) => {
                    self.next_poll = None;
                    self.start_cycle();
                }
            }
        }

        tracing::debug!(session = self.id, "session finished");
    }

    /// Parse and apply one text frame from the client
    pub async fn handle_frame(&mut self, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => {
                tracing::debug!(session = self.id, error = %e, "malformed client message");
                self.emit(ServerMessage::error(format!("Invalid message: {}", e)))
                    .await;
            }
        }
    }

    pub async fn handle_message(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::Connect(credentials) => self.connect(&credentials).await,
            ClientMessage::StartTail {
                sources,
                poll_interval_seconds,
                enabled_noise_category_ids,
            } => {
                self.start_tail(sources, poll_interval_seconds, enabled_noise_category_ids)
                    .await
            }
            ClientMessage::StopTail {} => self.stop_tail(),
            ClientMessage::UpdateFilters {
                enabled_noise_category_ids,
            } => self.update_filters(enabled_noise_category_ids),
        }
    }

    async fn connect(&mut self, credentials: &Credentials) {
        let tailer = match self.context.factory.create(credentials) {
            Ok(tailer) => tailer,
            Err(e) => {
                tracing::warn!(session = self.id, error = %e, "connect rejected");
                self.emit(ServerMessage::error(format!("Connect failed: {}", e)))
                    .await;
                return;
            }
        };

        // The running tail was issued with the old credentials.
        self.stop_tail();
        self.tailer = Some(tailer);
        self.rate_limiter = RateLimiter::new();

        tracing::info!(session = self.id, origin = %credentials.origin, "session connected");
        self.emit(ServerMessage::Connected {}).await;
    }

    async fn start_tail(
        &mut self,
        sources: Vec<String>,
        poll_interval_seconds: Option<f64>,
        enabled_ids: Option<Vec<String>>,
    ) {
        if self.tailer.is_none() {
            self.emit(ServerMessage::error(
                "Not connected: send connect before start_tail",
            ))
            .await;
            return;
        }

        let sources = dedupe_sources(sources);
        if sources.is_empty() {
            self.emit(ServerMessage::error(
                "start_tail requires at least one source",
            ))
            .await;
            return;
        }

        let poll_interval = match self.context.settings.poll_interval(poll_interval_seconds) {
            Ok(interval) => interval,
            Err(msg) => {
                self.emit(ServerMessage::error(msg)).await;
                return;
            }
        };

        self.cancel_pending();
        self.sources = sources;
        self.cursor = None;
        self.poll_interval = poll_interval;
        if let Some(ids) = enabled_ids {
            self.enabled_ids = ids;
        }
        self.rebuild_classifier();
        self.polling = true;

        tracing::info!(
            session = self.id,
            sources = %self.sources.join(","),
            interval_ms = poll_interval.as_millis() as u64,
            noise = ?self.classifier.enabled_ids(),
            "tail started"
        );
        self.start_cycle();
    }

    fn stop_tail(&mut self) {
        let was_polling = self.polling;
        self.polling = false;
        self.cancel_pending();
        if was_polling {
            tracing::info!(session = self.id, "tail stopped");
        }
    }

    fn update_filters(&mut self, enabled_ids: Vec<String>) {
        self.enabled_ids = enabled_ids;
        self.rebuild_classifier();
        tracing::debug!(
            session = self.id,
            state = ?self.state(),
            noise = ?self.classifier.enabled_ids(),
            "noise filters updated"
        );
    }

    /// Transport went away: stop without reporting anything
    fn close(&mut self) {
        tracing::debug!(session = self.id, state = ?self.state(), "client transport closed");
        self.polling = false;
        self.cancel_pending();
    }

    fn rebuild_classifier(&mut self) {
        self.classifier = NoiseClassifier::new(&self.context.catalog, &self.enabled_ids);
    }

    /// Cancel the in-flight fetch and the pending timer; safe when neither exists
    fn cancel_pending(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.cancel.cancel();
        }
        self.next_poll = None;
    }

    /// Issue the fetch for one poll cycle
    fn start_cycle(&mut self) {
        if !self.polling || self.in_flight.is_some() {
            return;
        }
        if self.outbound.is_closed() {
            tracing::debug!(session = self.id, "transport not writable, skipping poll");
            return;
        }
        let Some(tailer) = self.tailer.clone() else {
            return;
        };

        let request = TailRequest {
            sources: self.sources.clone(),
            cookie: self.cursor.clone(),
        };
        tracing::trace!(session = self.id, cookie = ?request.cookie, "fetching logs");

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let fetch = Box::pin(async move { tailer.tail(request, token).await });
        self.in_flight = Some(InFlight { cancel, fetch });
    }

    /// Handle the outcome of the fetch and schedule the next cycle
    async fn complete_cycle(&mut self, result: ApiResult<TailPage>) {
        if !self.polling {
            return;
        }

        let delay = match result {
            Ok(page) => {
                self.rate_limiter.update(&page.quota);
                if let Some(cookie) = page.cookie {
                    self.cursor = Some(cookie);
                }

                let fetched = page.records.len();
                let logs = LogNormalizer::normalize_batch(page.records, &self.classifier);
                tracing::debug!(session = self.id, fetched, shown = logs.len(), "batch ready");

                self.emit(ServerMessage::Logs {
                    logs,
                    rate_limit: self.rate_limiter.status(),
                    result_count: page.total,
                })
                .await;
                self.rate_limiter.delay(self.poll_interval)
            }
            Err(ApiError::Cancelled) => {
                tracing::debug!(session = self.id, "fetch cancelled");
                return;
            }
            Err(ApiError::RateLimited { retry_after, quota }) => {
                self.rate_limiter.update(&quota);
                // Never sooner than the poll interval, even for `retry-after: 0`
                let wait = retry_after
                    .unwrap_or(self.context.settings.rate_limit_fallback)
                    .max(self.poll_interval);
                tracing::warn!(session = self.id, wait_secs = wait.as_secs(), "log API rate limit exceeded");

                self.emit(ServerMessage::error(format!(
                    "Rate limit exceeded, retrying in {}s",
                    ceil_secs(wait)
                )))
                .await;
                wait
            }
            Err(e) => {
                tracing::warn!(session = self.id, error = %e, "log fetch failed");
                self.emit(ServerMessage::error(e.to_string())).await;
                self.rate_limiter.delay(self.poll_interval)
            }
        };

        self.schedule(delay);
    }

    fn schedule(&mut self, delay: Duration) {
        tracing::trace!(session = self.id, delay_ms = delay.as_millis() as u64, "next poll scheduled");
        self.next_poll = Some(Box::pin(tokio::time::sleep(delay)));
    }

    /// `&mut self`: the in-flight fetch is not `Sync`
    async fn emit(&mut self, message: ServerMessage) {
        if self.outbound.send(message).await.is_err() {
            tracing::debug!(session = self.id, "client transport closed, message dropped");
        }
    }
}

async fn in_flight_done(in_flight: &mut Option<InFlight>) -> ApiResult<TailPage> {
    match in_flight {
        Some(in_flight) => in_flight.fetch.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn timer_fired(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

/// Trim, drop empties and duplicates, keep first-seen order
fn dedupe_sources(sources: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(sources.len());
    for source in sources {
        let source = source.trim();
        if !source.is_empty() && !out.iter().any(|s| s == source) {
            out.push(source.to_string());
        }
    }
    out
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use auditscope_types::{NoiseCategory, Quota, RawLogRecord};
    use chrono::{TimeDelta, Utc};
    use serde_json::{json, Value};
    use tokio::time::{timeout, Instant};

    const LONG: Duration = Duration::from_secs(3600);

    enum Step {
        Page(TailPage),
        RateLimited(Option<Duration>),
        Fail(u16),
        Hang,
    }

    struct Call {
        request: TailRequest,
        at: Instant,
        cancel: CancellationToken,
    }

    struct ScriptedTailer {
        steps: Mutex<VecDeque<Step>>,
        calls: Mutex<Vec<Call>>,
    }

    impl ScriptedTailer {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn cookie(&self, call: usize) -> Option<String> {
            self.calls.lock().unwrap()[call].request.cookie.clone()
        }

        fn gap(&self, from: usize, to: usize) -> Duration {
            let calls = self.calls.lock().unwrap();
            calls[to].at - calls[from].at
        }

        fn cancelled(&self, call: usize) -> bool {
            self.calls.lock().unwrap()[call].cancel.is_cancelled()
        }
    }

    #[async_trait]
    impl LogTailer for ScriptedTailer {
        async fn tail(&self, request: TailRequest, cancel: CancellationToken) -> ApiResult<TailPage> {
            self.calls.lock().unwrap().push(Call {
                request,
                at: Instant::now(),
                cancel: cancel.clone(),
            });
            let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Hang);

            match step {
                Step::Page(page) => Ok(page),
                Step::RateLimited(retry_after) => Err(ApiError::RateLimited {
                    retry_after,
                    quota: Quota {
                        remaining: Some(0),
                        ..Default::default()
                    },
                }),
                Step::Fail(status) => Err(ApiError::Status {
                    status,
                    body: "upstream unavailable".to_string(),
                }),
                Step::Hang => {
                    cancel.cancelled().await;
                    Err(ApiError::Cancelled)
                }
            }
        }
    }

    struct ScriptedFactory {
        tailer: Arc<ScriptedTailer>,
    }

    impl TailerFactory for ScriptedFactory {
        fn create(&self, credentials: &Credentials) -> ApiResult<Arc<dyn LogTailer>> {
            if !credentials.origin.starts_with("https://") {
                return Err(ApiError::InvalidCredentials("origin must use https".to_string()));
            }
            let tailer: Arc<dyn LogTailer> = self.tailer.clone();
            Ok(tailer)
        }
    }

    struct Harness {
        frames: mpsc::Sender<String>,
        messages: mpsc::Receiver<ServerMessage>,
        tailer: Arc<ScriptedTailer>,
        task: tokio::task::JoinHandle<()>,
    }

    impl Harness {
        fn spawn(steps: Vec<Step>) -> Self {
            let tailer = Arc::new(ScriptedTailer::new(steps));
            let catalog = NoiseCatalog::new(vec![
                NoiseCategory::new("session").with_prefixes(["org.example.session."]),
            ])
            .unwrap();
            let settings = SessionSettings {
                default_interval: Duration::from_secs(5),
                min_interval: Duration::from_secs(1),
                max_interval: Duration::from_secs(60),
                rate_limit_fallback: Duration::from_secs(60),
            };
            let factory = Arc::new(ScriptedFactory {
                tailer: Arc::clone(&tailer),
            });
            let context = SessionContext::new(Arc::new(catalog), factory, settings);

            let (frames, inbound) = mpsc::channel(16);
            let (outbound, messages) = mpsc::channel(16);
            let task = tokio::spawn(TailSession::new(1, context, outbound).run(inbound));

            Self {
                frames,
                messages,
                tailer,
                task,
            }
        }

        async fn send(&self, message: Value) {
            self.frames.send(message.to_string()).await.unwrap();
        }

        async fn recv(&mut self) -> ServerMessage {
            timeout(LONG, self.messages.recv())
                .await
                .expect("message within timeout")
                .expect("session alive")
        }

        async fn recv_error(&mut self) -> String {
            match self.recv().await {
                ServerMessage::Error { error } => error,
                other => panic!("expected error, got {other:?}"),
            }
        }

        async fn recv_logs(&mut self) -> (Vec<String>, u64, u32) {
            match self.recv().await {
                ServerMessage::Logs {
                    logs,
                    rate_limit,
                    result_count,
                } => (
                    logs.into_iter().map(|l| l.message).collect(),
                    result_count,
                    rate_limit.remaining,
                ),
                other => panic!("expected logs, got {other:?}"),
            }
        }

        async fn assert_silent(&mut self, within: Duration) {
            if let Ok(message) = timeout(within, self.messages.recv()).await {
                panic!("expected no message, got {message:?}");
            }
        }

        async fn connect(&mut self) {
            self.send(json!({
                "type": "connect",
                "origin": "https://tenant.example.com",
                "apiKey": "key",
                "apiSecret": "secret"
            }))
            .await;
            assert_eq!(self.recv().await, ServerMessage::Connected {});
        }

        async fn start(&self, extra: Value) {
            let mut message = json!({"type": "start_tail", "sources": ["am-core"]});
            if let (Some(message), Some(extra)) = (message.as_object_mut(), extra.as_object()) {
                message.extend(extra.clone());
            }
            self.send(message).await;
        }

        async fn wait_for_calls(&self, n: usize) {
            timeout(LONG, async {
                while self.tailer.call_count() < n {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .expect("tailer called");
        }
    }

    fn record(logger: &str, message: &str) -> RawLogRecord {
        RawLogRecord::new(
            "am-core",
            "application/json",
            json!({"logger": logger, "message": message}),
        )
    }

    fn page(cookie: Option<&str>, records: Vec<RawLogRecord>) -> Step {
        Step::Page(TailPage {
            total: records.len() as u64,
            records,
            cookie: cookie.map(str::to_string),
            quota: Quota {
                limit: Some(60),
                remaining: Some(50),
                reset_at: None,
            },
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_before_connect_is_rejected() {
        let mut h = Harness::spawn(vec![]);

        h.start(json!({})).await;
        assert!(h.recv_error().await.contains("connect"));

        h.send(json!({"type": "connect", "origin": "http://tenant.example.com", "apiKey": "k", "apiSecret": "s"}))
            .await;
        assert!(h.recv_error().await.starts_with("Connect failed"));

        h.start(json!({})).await;
        assert!(h.recv_error().await.contains("connect"));
        assert_eq!(h.tailer.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_messages_leave_state_unchanged() {
        let mut h = Harness::spawn(vec![page(None, vec![])]);

        h.frames.send("not json".to_string()).await.unwrap();
        assert!(h.recv_error().await.starts_with("Invalid message"));

        h.send(json!({"type": "launch_missiles"})).await;
        assert!(h.recv_error().await.starts_with("Invalid message"));

        h.connect().await;
        h.start(json!({"sources": []})).await;
        assert!(h.recv_error().await.contains("at least one source"));
        h.start(json!({"pollIntervalSeconds": -3})).await;
        assert!(h.recv_error().await.contains("pollIntervalSeconds"));
        assert_eq!(h.tailer.call_count(), 0);

        h.start(json!({})).await;
        let (logs, _, _) = h.recv_logs().await;
        assert!(logs.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_follow_cursor_and_restart_resets_it() {
        let mut h = Harness::spawn(vec![
            page(Some("c1"), vec![record("org.example.Login", "first")]),
            page(None, vec![]),
        ]);
        h.connect().await;
        h.start(json!({"pollIntervalSeconds": 5})).await;

        let (logs, total, remaining) = h.recv_logs().await;
        assert_eq!(logs, vec!["first".to_string()]);
        assert_eq!(total, 1);
        assert_eq!(remaining, 50);

        let (logs, _, _) = h.recv_logs().await;
        assert!(logs.is_empty());

        h.wait_for_calls(3).await;
        assert_eq!(h.tailer.cookie(0), None);
        assert_eq!(h.tailer.cookie(1).as_deref(), Some("c1"));
        assert_eq!(h.tailer.cookie(2).as_deref(), Some("c1"));
        assert!(h.tailer.gap(0, 1) >= Duration::from_secs(5));

        // Third call hangs; restarting cancels it and drops the cursor
        h.start(json!({})).await;
        h.wait_for_calls(4).await;
        assert!(h.tailer.cancelled(2));
        assert_eq!(h.tailer.cookie(3), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_fetch_emits_nothing() {
        let mut h = Harness::spawn(vec![Step::Hang, page(None, vec![record("a", "late")])]);
        h.connect().await;
        h.start(json!({})).await;
        h.wait_for_calls(1).await;

        h.send(json!({"type": "stop_tail"})).await;
        h.assert_silent(Duration::from_secs(600)).await;
        assert_eq!(h.tailer.call_count(), 1);
        assert!(h.tailer.cancelled(0));

        // Stopping again is a no-op
        h.send(json!({"type": "stop_tail"})).await;
        h.assert_silent(Duration::from_secs(60)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_honors_server_wait() {
        let mut h = Harness::spawn(vec![
            Step::RateLimited(Some(Duration::from_secs(30))),
            page(None, vec![]),
        ]);
        h.connect().await;
        h.start(json!({"pollIntervalSeconds": 2})).await;

        assert_eq!(h.recv_error().await, "Rate limit exceeded, retrying in 30s");
        let (_, _, remaining) = h.recv_logs().await;
        assert_eq!(remaining, 50);
        assert!(h.tailer.gap(0, 1) >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_without_hint_uses_fallback() {
        let mut h = Harness::spawn(vec![Step::RateLimited(None), page(None, vec![])]);
        h.connect().await;
        h.start(json!({})).await;

        assert_eq!(h.recv_error().await, "Rate limit exceeded, retrying in 60s");
        h.recv_logs().await;
        assert!(h.tailer.gap(0, 1) >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_keep_polling() {
        let mut h = Harness::spawn(vec![Step::Fail(503), page(None, vec![record("a", "recovered")])]);
        h.connect().await;
        h.start(json!({"pollIntervalSeconds": 3})).await;

        assert!(h.recv_error().await.contains("HTTP 503"));
        let (logs, _, _) = h.recv_logs().await;
        assert_eq!(logs, vec!["recovered".to_string()]);
        assert!(h.tailer.gap(0, 1) >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_quota_stretches_interval() {
        let reset_at = Utc::now() + TimeDelta::seconds(40);
        let mut h = Harness::spawn(vec![
            Step::Page(TailPage {
                quota: Quota {
                    limit: Some(60),
                    remaining: Some(1),
                    reset_at: Some(reset_at),
                },
                ..Default::default()
            }),
            page(None, vec![]),
        ]);
        h.connect().await;
        h.start(json!({"pollIntervalSeconds": 2})).await;

        let (_, _, remaining) = h.recv_logs().await;
        assert_eq!(remaining, 1);
        h.recv_logs().await;
        assert!(h.tailer.gap(0, 1) >= Duration::from_secs(39));
    }

    #[tokio::test(start_paused = true)]
    async fn test_filter_updates_apply_to_next_batch() {
        let batch = || {
            vec![
                record("org.example.session.Reaper", "noisy"),
                record("org.example.Login", "useful"),
            ]
        };
        let mut h = Harness::spawn(vec![page(None, batch()), page(None, batch())]);
        h.connect().await;
        h.start(json!({"enabledNoiseCategoryIds": ["session"]})).await;

        let (logs, total, _) = h.recv_logs().await;
        assert_eq!(logs, vec!["useful".to_string()]);
        assert_eq!(total, 2);

        h.send(json!({"type": "update_filters", "enabledNoiseCategoryIds": []}))
            .await;
        let (logs, _, _) = h.recv_logs().await;
        assert_eq!(logs, vec!["noisy".to_string(), "useful".to_string()]);
        assert_eq!(h.tailer.call_count(), 2);
        assert!(h.tailer.gap(0, 1) >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_stops_running_tail() {
        let mut h = Harness::spawn(vec![Step::Hang]);
        h.connect().await;
        h.start(json!({})).await;
        h.wait_for_calls(1).await;

        h.connect().await;
        assert!(h.tailer.cancelled(0));
        h.assert_silent(Duration::from_secs(600)).await;
        assert_eq!(h.tailer.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_close_ends_session() {
        let h = Harness::spawn(vec![Step::Hang]);
        let Harness {
            frames,
            mut messages,
            tailer,
            task,
        } = h;

        frames
            .send(
                json!({"type": "connect", "origin": "https://t.example.com", "apiKey": "k", "apiSecret": "s"})
                    .to_string(),
            )
            .await
            .unwrap();
        assert_eq!(messages.recv().await, Some(ServerMessage::Connected {}));
        frames
            .send(json!({"type": "start_tail", "sources": ["am-core"]}).to_string())
            .await
            .unwrap();
        while tailer.call_count() < 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        drop(frames);
        timeout(LONG, task).await.expect("session ends").unwrap();
        assert!(tailer.cancelled(0));
        assert_eq!(messages.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retry_after_waits_poll_interval() {
        let mut h = Harness::spawn(vec![
            Step::RateLimited(Some(Duration::ZERO)),
            Step::RateLimited(Some(Duration::ZERO)),
            page(None, vec![]),
        ]);
        h.connect().await;
        h.start(json!({"pollIntervalSeconds": 10})).await;

        assert_eq!(h.recv_error().await, "Rate limit exceeded, retrying in 10s");
        assert_eq!(h.recv_error().await, "Rate limit exceeded, retrying in 10s");
        h.recv_logs().await;
        assert!(h.tailer.gap(0, 1) >= Duration::from_secs(10));
        assert!(h.tailer.gap(1, 2) >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_filters_without_ids_is_rejected() {
        let batch = || {
            vec![
                record("org.example.session.Reaper", "noisy"),
                record("org.example.Login", "useful"),
            ]
        };
        let mut h = Harness::spawn(vec![page(None, batch()), page(None, batch())]);
        h.connect().await;
        h.start(json!({"enabledNoiseCategoryIds": ["session"]})).await;
        let (logs, _, _) = h.recv_logs().await;
        assert_eq!(logs, vec!["useful".to_string()]);

        h.send(json!({"type": "update_filters"})).await;
        assert!(h.recv_error().await.starts_with("Invalid message"));

        let (logs, _, _) = h.recv_logs().await;
        assert_eq!(logs, vec!["useful".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_transport_skips_fetch() {
        let Harness {
            frames,
            messages,
            tailer,
            task: _task,
        } = Harness::spawn(vec![page(None, vec![record("a", "unseen")])]);
        drop(messages);

        frames
            .send(
                json!({"type": "connect", "origin": "https://t.example.com", "apiKey": "k", "apiSecret": "s"})
                    .to_string(),
            )
            .await
            .unwrap();
        frames
            .send(json!({"type": "start_tail", "sources": ["am-core"]}).to_string())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(tailer.call_count(), 0);
    }

    #[test]
    fn test_poll_interval_is_clamped() {
        let settings = SessionSettings::default();
        assert_eq!(settings.poll_interval(None).unwrap(), Duration::from_secs(5));
        assert_eq!(settings.poll_interval(Some(0.5)).unwrap(), Duration::from_secs(2));
        assert_eq!(settings.poll_interval(Some(10.0)).unwrap(), Duration::from_secs(10));
        assert_eq!(settings.poll_interval(Some(1e12)).unwrap(), Duration::from_secs(300));
        assert!(settings.poll_interval(Some(0.0)).is_err());
        assert!(settings.poll_interval(Some(f64::NAN)).is_err());
    }

    #[test]
    fn test_sources_are_deduplicated() {
        let sources = dedupe_sources(vec![
            " am-core ".to_string(),
            "idm-core".to_string(),
            "am-core".to_string(),
            "".to_string(),
        ]);
        assert_eq!(sources, vec!["am-core".to_string(), "idm-core".to_string()]);
    }

    #[test]
    fn test_new_session_is_disconnected() {
        let catalog = Arc::new(NoiseCatalog::default());
        let factory = Arc::new(ScriptedFactory {
            tailer: Arc::new(ScriptedTailer::new(vec![])),
        });
        let (outbound, _messages) = mpsc::channel(1);
        let session = TailSession::new(
            7,
            SessionContext::new(catalog, factory, SessionSettings::default()),
            outbound,
        );
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(ceil_secs(Duration::from_millis(1500)), 2);
    }
}
