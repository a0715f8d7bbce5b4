//! Session state machine
//!
//! A session owns the connection lifecycle of one (identity, route) pair:
//!
//! ```text
//! Connecting -> Authenticating -> Active -> Closing -> (retry delay) -> Connecting
//! ```
//!
//! At most one binding is alive per session. The keep-alive timer is created
//! together with a binding and dropped with it, so a replaced binding can never
//! be pinged. Sessions never end on their own; every failure loops back to
//! `Connecting` after the configured retry delay.

use rand::Rng;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::ClientConfig;
use crate::error::{ProtocolError, TransportError};
use crate::events::{EventSink, StatusEvent, StatusKind};
use crate::identity::Identity;
use crate::protocol::{Action, HandshakeResponse, InboundMessage, PingMessage};
use crate::route::{Route, RouteMetadata, DIRECT_EGRESS_LABEL};
use crate::session_names::SessionId;
use crate::transport::{Binding, Connector, TransportEvent};
use crate::usage::{kilobytes, UsageTable};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Opening a new binding
    Connecting,
    /// Binding open, no handshake answered yet
    Authenticating,
    /// At least one handshake answered on the current binding
    Active,
    /// Binding gone, waiting out the retry delay
    Closing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Authenticating => write!(f, "authenticating"),
            SessionState::Active => write!(f, "active"),
            SessionState::Closing => write!(f, "closing"),
        }
    }
}

/// Timing knobs of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub keep_alive_interval: Duration,
    pub retry_delay: Duration,
    pub connect_jitter: Duration,
}

impl From<&ClientConfig> for SessionSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            keep_alive_interval: config.keep_alive_interval,
            retry_delay: config.retry_delay,
            connect_jitter: config.connect_jitter,
        }
    }
}

/// Collaborators shared by every session of a supervisor
pub struct SessionContext<C, E> {
    pub connector: Arc<C>,
    pub sink: Arc<E>,
    pub usage: UsageTable,
    pub settings: SessionSettings,
}

impl<C, E> Clone for SessionContext<C, E> {
    fn clone(&self) -> Self {
        Self {
            connector: self.connector.clone(),
            sink: self.sink.clone(),
            usage: self.usage.clone(),
            settings: self.settings,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    received_bytes: AtomicU64,
    bindings_opened: AtomicU64,
}

/// Why a binding ended
#[derive(Debug)]
enum Disconnect {
    Closed { code: u16, reason: String },
    Failed(TransportError),
}

/// Reply produced by an inbound message
struct Reply {
    payload: String,
    browser_id: String,
}

/// Keep-alive schedule of one binding. Dropping it cancels the schedule.
struct KeepAlive {
    interval: Interval,
    generation: u64,
}

impl KeepAlive {
    fn start(period: Duration, generation: u64) -> Self {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval,
            generation,
        }
    }

    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        debug!(generation = self.generation, "keep-alive cancelled");
    }
}

/// One (identity, route) connection lifecycle
pub struct Session<C: Connector, E: EventSink> {
    id: SessionId,
    identity: Identity,
    route: Route,
    egress_ip: String,
    ctx: SessionContext<C, E>,
    counters: Arc<Counters>,
    state_tx: watch::Sender<SessionState>,
}

impl<C: Connector, E: EventSink> Session<C, E> {
    /// `metadata` comes from route validation; without it the egress is
    /// shown as the proxy host (or a placeholder for direct routes)
    pub fn new(
        identity: Identity,
        route: Route,
        metadata: Option<&RouteMetadata>,
        ctx: SessionContext<C, E>,
    ) -> Self {
        let egress_ip = match (metadata, &route) {
            (Some(meta), _) => meta.ip.clone(),
            (None, Route::Direct) => DIRECT_EGRESS_LABEL.to_string(),
            (None, Route::Proxied(proxy)) => proxy.host().to_string(),
        };
        let (state_tx, _) = watch::channel(SessionState::Connecting);

        Self {
            id: SessionId::for_pair(&identity, &route),
            identity,
            route,
            egress_ip,
            ctx,
            counters: Arc::new(Counters::default()),
            state_tx,
        }
    }

    /// Start the session on the runtime
    pub fn spawn(self) -> SessionHandle {
        let span = info_span!(
            "session",
            name = %self.id.name,
            id = %self.id.id,
            identity = %self.identity,
        );
        let id = self.id.clone();
        let identity = self.identity.clone();
        let route = self.route.clone();
        let state_rx = self.state_tx.subscribe();
        let counters = self.counters.clone();

        let task = tokio::spawn(self.run().instrument(span));

        SessionHandle {
            id,
            identity,
            route,
            state_rx,
            counters,
            task,
        }
    }

    async fn run(mut self) {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            self.set_state(SessionState::Connecting);
            self.connect_jitter().await;

            match self.ctx.connector.open(&self.route).await {
                Ok(binding) => {
                    let generation = self.counters.bindings_opened.fetch_add(1, Ordering::SeqCst) + 1;
                    info!(attempt, generation, route = %self.route, "Connected");
                    self.emit(StatusKind::Opened {
                        egress_ip: self.egress_ip.clone(),
                    })
                    .await;
                    self.set_state(SessionState::Authenticating);

                    let disconnect = self.drive(binding, generation).await;
                    self.set_state(SessionState::Closing);
                    self.report(disconnect).await;
                }
                Err(e) => {
                    self.set_state(SessionState::Closing);
                    warn!(attempt, route = %self.route, "Connect failed: {}", e);
                    self.emit(StatusKind::Error {
                        message: e.to_string(),
                    })
                    .await;
                }
            }

            let delay = self.ctx.settings.retry_delay;
            self.emit(StatusKind::Reconnecting {
                delay_secs: delay.as_secs(),
            })
            .await;
            time::sleep(delay).await;
        }
    }

    /// Run one binding until it closes or fails. The binding and its
    /// keep-alive timer are both dropped before this returns.
    async fn drive(&mut self, mut binding: C::Binding, generation: u64) -> Disconnect {
        let mut keep_alive = KeepAlive::start(self.ctx.settings.keep_alive_interval, generation);

        let disconnect = loop {
            tokio::select! {
                event = binding.next_event() => match event {
                    TransportEvent::Message(payload) => {
                        if let Some(reply) = self.handle_inbound(&payload).await {
                            if let Err(e) = binding.send(reply.payload).await {
                                break Disconnect::Failed(e);
                            }
                            self.set_state(SessionState::Active);
                            self.emit(StatusKind::AuthSent {
                                browser_id: reply.browser_id,
                            })
                            .await;
                        }
                    }
                    TransportEvent::Closed { code, reason } => {
                        break Disconnect::Closed { code, reason };
                    }
                    TransportEvent::Error(e) => break Disconnect::Failed(e),
                },
                _ = keep_alive.tick() => {
                    if let Err(e) = self.send_ping(&mut binding).await {
                        break Disconnect::Failed(e);
                    }
                }
            }
        };

        drop(keep_alive);
        if matches!(disconnect, Disconnect::Failed(_)) {
            binding.terminate().await;
        }
        disconnect
    }

    /// Account for one inbound message and work out the reply, if any.
    /// Usage is counted before the message is even parsed.
    async fn handle_inbound(&mut self, payload: &[u8]) -> Option<Reply> {
        let len = payload.len() as u64;
        let session_total = self.counters.received_bytes.fetch_add(len, Ordering::SeqCst) + len;
        let identity_total = self.ctx.usage.record(&self.identity, len);

        let message = match std::str::from_utf8(payload)
            .map_err(|_| ProtocolError::NonUtf8)
            .and_then(InboundMessage::parse)
        {
            Ok(message) => message,
            Err(e) => {
                warn!("Discarding inbound message: {}", e);
                self.emit(StatusKind::ProtocolError {
                    message: e.to_string(),
                })
                .await;
                return None;
            }
        };

        match message.action() {
            Action::Auth => {
                let response = match HandshakeResponse::answer(&message, &self.identity) {
                    Ok(response) => response,
                    Err(e) => {
                        warn!("Cannot answer AUTH: {}", e);
                        self.emit(StatusKind::ProtocolError {
                            message: e.to_string(),
                        })
                        .await;
                        return None;
                    }
                };
                match response.to_json() {
                    Ok(payload) => Some(Reply {
                        payload,
                        browser_id: response.result.browser_id,
                    }),
                    Err(e) => {
                        warn!("Failed to encode handshake response: {}", e);
                        None
                    }
                }
            }
            Action::Pong => {
                self.emit(StatusKind::Pong {
                    usage_kb: kilobytes(session_total),
                    identity_usage_kb: kilobytes(identity_total),
                })
                .await;
                None
            }
            Action::Other(action) => {
                debug!(%action, "Ignoring unknown action");
                None
            }
        }
    }

    async fn send_ping(&mut self, binding: &mut C::Binding) -> Result<(), TransportError> {
        let ping = PingMessage::new();
        let payload = ping
            .to_json()
            .map_err(|e| TransportError::Send(e.to_string()))?;
        binding.send(payload).await?;
        debug!(id = %ping.id, "PING sent");
        self.emit(StatusKind::PingSent {
            egress_ip: self.egress_ip.clone(),
        })
        .await;
        Ok(())
    }

    async fn report(&self, disconnect: Disconnect) {
        match disconnect {
            Disconnect::Closed { code, reason } => {
                info!(code, %reason, "WebSocket closed");
                self.emit(StatusKind::Closed { code, reason }).await;
            }
            Disconnect::Failed(e) => {
                warn!("Binding failed: {}", e);
                self.emit(StatusKind::Error {
                    message: e.to_string(),
                })
                .await;
            }
        }
    }

    async fn connect_jitter(&self) {
        let max = self.ctx.settings.connect_jitter.as_millis() as u64;
        if max == 0 {
            return;
        }
        let wait = rand::thread_rng().gen_range(0..=max);
        time::sleep(Duration::from_millis(wait)).await;
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            info!(state = %state, previous = %previous, "State change");
        }
    }

    async fn emit(&self, kind: StatusKind) {
        let event = StatusEvent::new(
            self.id.name.clone(),
            self.identity.as_str(),
            self.route.to_string(),
            kind,
        );
        if let Err(e) = self.ctx.sink.emit(&event).await {
            warn!("Failed to emit status event: {}", e);
        }
    }
}

/// Observer and owner of a running session
pub struct SessionHandle {
    id: SessionId,
    identity: Identity,
    route: Route,
    state_rx: watch::Receiver<SessionState>,
    counters: Arc<Counters>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Wait until the session reaches `state`
    pub async fn wait_for(&self, state: SessionState) {
        let mut rx = self.state_rx.clone();
        // The sender lives as long as the task; an error means it is gone
        let _ = rx.wait_for(|current| *current == state).await;
    }

    /// Bytes received since the session was created, across reconnects
    pub fn received_bytes(&self) -> u64 {
        self.counters.received_bytes.load(Ordering::SeqCst)
    }

    pub fn bindings_opened(&self) -> u64 {
        self.counters.bindings_opened.load(Ordering::SeqCst)
    }

    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub(crate) fn into_task(self) -> JoinHandle<()> {
        self.task
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChannelEventSink;
    use crate::testing::{next_matching, MockConnector};
    use serde_json::Value;
    use tokio::sync::mpsc;

    const KEEP_ALIVE: Duration = Duration::from_secs(26);
    const RETRY: Duration = Duration::from_secs(20);

    struct Harness {
        connector: Arc<MockConnector>,
        events: mpsc::UnboundedReceiver<StatusEvent>,
        usage: UsageTable,
        handle: SessionHandle,
    }

    fn start(identity: &str, route: Route) -> Harness {
        let connector = MockConnector::new();
        let (sink, events) = ChannelEventSink::new();
        let usage = UsageTable::new();
        let ctx = SessionContext {
            connector: connector.clone(),
            sink: Arc::new(sink),
            usage: usage.clone(),
            settings: SessionSettings {
                keep_alive_interval: KEEP_ALIVE,
                retry_delay: RETRY,
                connect_jitter: Duration::ZERO,
            },
        };
        let handle = Session::new(Identity::new(identity), route, None, ctx).spawn();
        Harness {
            connector,
            events,
            usage,
            handle,
        }
    }

    fn is_pong(kind: &StatusKind) -> bool {
        matches!(kind, StatusKind::Pong { .. })
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_is_answered_with_echoed_id() {
        let mut h = start("u1", Route::Direct);
        h.connector.wait_for_opens(1).await;
        let mut remote = h.connector.take_remote(0);

        remote.push_text(r#"{"id":"challenge-1","action":"AUTH","data":{}}"#);
        let reply = remote.outbound.recv().await.unwrap();
        let json: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(json["id"], "challenge-1");
        assert_eq!(json["origin_action"], "AUTH");
        assert_eq!(json["result"]["user_id"], "u1");

        let (event, skipped) =
            next_matching(&mut h.events, |k| matches!(k, StatusKind::AuthSent { .. })).await;
        assert_eq!(event.identity, "u1");
        assert!(matches!(
            &skipped[0].kind,
            StatusKind::Opened { egress_ip } if egress_ip == DIRECT_EGRESS_LABEL
        ));

        h.handle.wait_for(SessionState::Active).await;
        assert_eq!(h.handle.state(), SessionState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_challenges_are_each_answered() {
        let h = start("u1", Route::Direct);
        h.connector.wait_for_opens(1).await;
        let mut remote = h.connector.take_remote(0);

        for id in ["a", "b", "c"] {
            remote.push_text(&format!(r#"{{"id":"{id}","action":"AUTH"}}"#));
            let reply: Value = serde_json::from_str(&remote.outbound.recv().await.unwrap()).unwrap();
            assert_eq!(reply["id"], id);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_reports_usage_in_kilobytes() {
        let mut h = start("u1", Route::Direct);
        h.connector.wait_for_opens(1).await;
        let remote = h.connector.take_remote(0);

        let pong = r#"{"id":"x","action":"PONG"}"#;
        let filler = |pad: usize| format!(r#"{{"id":"f","action":"NOOP","pad":"{}"}}"#, "a".repeat(pad));
        let pad = 2048 - pong.len() - filler(0).len();
        remote.push_text(&filler(pad));
        remote.push_text(pong);

        let (event, _) = next_matching(&mut h.events, is_pong).await;
        assert_eq!(
            event.kind,
            StatusKind::Pong {
                usage_kb: "2.00".to_string(),
                identity_usage_kb: "2.00".to_string(),
            }
        );
        assert_eq!(h.handle.received_bytes(), 2048);
        assert_eq!(h.usage.total(&Identity::new("u1")), 2048);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_action_is_counted_but_ignored() {
        let mut h = start("u1", Route::Direct);
        h.connector.wait_for_opens(1).await;
        let mut remote = h.connector.take_remote(0);

        let unknown = r#"{"id":"y","action":"HTTP_REQUEST","data":{"url":"http://x"}}"#;
        let pong = r#"{"id":"z","action":"PONG"}"#;
        remote.push_text(unknown);
        remote.push_text(pong);

        let (_, skipped) = next_matching(&mut h.events, is_pong).await;
        assert!(skipped
            .iter()
            .all(|e| matches!(e.kind, StatusKind::Opened { .. })));
        assert!(remote.drain_sent().is_empty());
        assert_eq!(h.handle.received_bytes(), (unknown.len() + pong.len()) as u64);
        assert_eq!(h.handle.state(), SessionState::Authenticating);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_message_is_not_fatal() {
        let mut h = start("u1", Route::Direct);
        h.connector.wait_for_opens(1).await;
        let mut remote = h.connector.take_remote(0);

        remote.push_text("this is not json");
        remote.push_bytes(vec![0xff, 0xfe, 0xfd]);
        let (first, _) =
            next_matching(&mut h.events, |k| matches!(k, StatusKind::ProtocolError { .. })).await;
        assert_eq!(first.identity, "u1");
        let (second, _) =
            next_matching(&mut h.events, |k| matches!(k, StatusKind::ProtocolError { .. })).await;
        assert!(matches!(
            second.kind,
            StatusKind::ProtocolError { ref message } if message.contains("UTF-8")
        ));

        remote.push_text(r#"{"id":"ok","action":"AUTH"}"#);
        let reply: Value = serde_json::from_str(&remote.outbound.recv().await.unwrap()).unwrap();
        assert_eq!(reply["id"], "ok");
        assert_eq!(h.connector.open_count(), 1);
        assert_eq!(h.handle.received_bytes(), 16 + 3 + 27);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_every_interval() {
        let h = start("u1", Route::Direct);
        h.connector.wait_for_opens(1).await;
        let opened_at = h.connector.opens()[0].1;
        let mut remote = h.connector.take_remote(0);

        let first: Value = serde_json::from_str(&remote.outbound.recv().await.unwrap()).unwrap();
        assert_eq!(Instant::now() - opened_at, KEEP_ALIVE);
        assert_eq!(first["action"], "PING");
        assert_eq!(first["version"], "1.0.0");

        let second: Value = serde_json::from_str(&remote.outbound.recv().await.unwrap()).unwrap();
        assert_eq!(Instant::now() - opened_at, KEEP_ALIVE * 2);
        assert_ne!(first["id"], second["id"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_retry_delay() {
        let mut h = start("u1", Route::Direct);
        h.connector.wait_for_opens(1).await;
        let remote = h.connector.take_remote(0);

        remote.close(1000, "bye");
        let (closed, _) =
            next_matching(&mut h.events, |k| matches!(k, StatusKind::Closed { .. })).await;
        assert_eq!(
            closed.kind,
            StatusKind::Closed {
                code: 1000,
                reason: "bye".to_string()
            }
        );
        assert_eq!(h.handle.state(), SessionState::Closing);

        h.connector.wait_for_opens(2).await;
        let opens = h.connector.opens();
        assert_eq!(opens[1].1 - opens[0].1, RETRY);
        assert_eq!(opens[1].0, Route::Direct);
        assert_eq!(h.handle.bindings_opened(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replaced_binding_is_never_pinged() {
        let h = start("u1", Route::Direct);
        h.connector.wait_for_opens(1).await;
        let mut old = h.connector.take_remote(0);

        // Close just before the first keep-alive would fire
        time::sleep(KEEP_ALIVE - Duration::from_secs(1)).await;
        old.close(1006, "");

        h.connector.wait_for_opens(2).await;
        let reopened_at = h.connector.opens()[1].1;
        let mut new = h.connector.take_remote(1);

        let ping: Value = serde_json::from_str(&new.outbound.recv().await.unwrap()).unwrap();
        assert_eq!(ping["action"], "PING");
        assert_eq!(Instant::now() - reopened_at, KEEP_ALIVE);

        // The old binding was dropped without ever sending anything
        assert!(old.outbound.recv().await.is_none());
        assert_eq!(h.connector.max_live(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_usage_persists_across_reconnects() {
        let mut h = start("u1", Route::Direct);
        h.connector.wait_for_opens(1).await;
        let first = h.connector.take_remote(0);

        let a = r#"{"id":"1","action":"PONG"}"#;
        first.push_text(a);
        next_matching(&mut h.events, is_pong).await;
        first.close(1001, "going away");

        h.connector.wait_for_opens(2).await;
        let second = h.connector.take_remote(1);
        let b = r#"{"id":"2","action":"PONG","padding":"0123456789"}"#;
        second.push_text(b);
        let (event, _) = next_matching(&mut h.events, is_pong).await;

        let expected = (a.len() + b.len()) as u64;
        assert_eq!(h.handle.received_bytes(), expected);
        assert_eq!(
            event.kind,
            StatusKind::Pong {
                usage_kb: kilobytes(expected),
                identity_usage_kb: kilobytes(expected),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_is_retried() {
        let connector = MockConnector::new();
        connector.fail_next(1);
        let (sink, mut events) = ChannelEventSink::new();
        let ctx = SessionContext {
            connector: connector.clone(),
            sink: Arc::new(sink),
            usage: UsageTable::new(),
            settings: SessionSettings {
                keep_alive_interval: KEEP_ALIVE,
                retry_delay: RETRY,
                connect_jitter: Duration::ZERO,
            },
        };
        let handle = Session::new(Identity::new("u1"), Route::Direct, None, ctx).spawn();

        let (error, _) = next_matching(&mut events, |k| matches!(k, StatusKind::Error { .. })).await;
        assert!(matches!(error.kind, StatusKind::Error { ref message } if message.contains("scripted")));
        let (reconnecting, _) =
            next_matching(&mut events, |k| matches!(k, StatusKind::Reconnecting { .. })).await;
        assert_eq!(reconnecting.kind, StatusKind::Reconnecting { delay_secs: 20 });

        connector.wait_for_opens(2).await;
        let opens = connector.opens();
        assert_eq!(opens[1].1 - opens[0].1, RETRY);
        handle.wait_for(SessionState::Authenticating).await;
        assert_eq!(handle.bindings_opened(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_triggers_reconnect() {
        let mut h = start("u1", Route::Direct);
        h.connector.wait_for_opens(1).await;
        let remote = h.connector.take_remote(0);

        remote.fail("connection reset");
        let (error, _) = next_matching(&mut h.events, |k| matches!(k, StatusKind::Error { .. })).await;
        assert!(matches!(error.kind, StatusKind::Error { ref message } if message.contains("connection reset")));

        h.connector.wait_for_opens(2).await;
        assert_eq!(h.connector.max_live(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_cycle() {
        let h = start("u1", Route::Direct);

        h.connector.wait_for_opens(1).await;
        h.handle.wait_for(SessionState::Authenticating).await;
        let remote = h.connector.take_remote(0);

        remote.push_text(r#"{"id":"1","action":"AUTH"}"#);
        h.handle.wait_for(SessionState::Active).await;

        remote.close(1000, "");
        h.handle.wait_for(SessionState::Closing).await;
        let closing_at = Instant::now();

        // Connecting is left immediately when the open succeeds, so the
        // reconnect shows up as a second open rather than a state
        h.connector.wait_for_opens(2).await;
        assert_eq!(h.connector.opens()[1].1 - closing_at, RETRY);
        h.handle.wait_for(SessionState::Authenticating).await;
        assert_eq!(h.handle.bindings_opened(), 2);
    }

    struct FailingSink;

    #[async_trait::async_trait]
    impl EventSink for FailingSink {
        async fn emit(&self, _event: &StatusEvent) -> Result<(), String> {
            Err("sink unavailable".to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_sink_does_not_disturb_session() {
        let connector = MockConnector::new();
        let ctx = SessionContext {
            connector: connector.clone(),
            sink: Arc::new(FailingSink),
            usage: UsageTable::new(),
            settings: SessionSettings {
                keep_alive_interval: KEEP_ALIVE,
                retry_delay: RETRY,
                connect_jitter: Duration::ZERO,
            },
        };
        let handle = Session::new(Identity::new("u1"), Route::Direct, None, ctx).spawn();

        connector.wait_for_opens(1).await;
        let mut remote = connector.take_remote(0);
        remote.push_text(r#"{"id":"still-here","action":"AUTH"}"#);
        let reply: Value = serde_json::from_str(&remote.outbound.recv().await.unwrap()).unwrap();
        assert_eq!(reply["id"], "still-here");
        handle.wait_for(SessionState::Active).await;

        let ping: Value = serde_json::from_str(&remote.outbound.recv().await.unwrap()).unwrap();
        assert_eq!(ping["action"], "PING");
        assert_eq!(connector.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_proxied_session_reports_metadata_ip() {
        let connector = MockConnector::new();
        let (sink, mut events) = ChannelEventSink::new();
        let route = Route::proxied("10.0.0.1:1080").unwrap();
        let meta = RouteMetadata {
            ip: "203.0.113.9".to_string(),
            ..Default::default()
        };
        let ctx = SessionContext {
            connector: connector.clone(),
            sink: Arc::new(sink),
            usage: UsageTable::new(),
            settings: SessionSettings {
                keep_alive_interval: KEEP_ALIVE,
                retry_delay: RETRY,
                connect_jitter: Duration::ZERO,
            },
        };
        let _handle = Session::new(Identity::new("u1"), route.clone(), Some(&meta), ctx).spawn();

        let (opened, _) = next_matching(&mut events, |k| matches!(k, StatusKind::Opened { .. })).await;
        assert_eq!(
            opened.kind,
            StatusKind::Opened {
                egress_ip: "203.0.113.9".to_string()
            }
        );
        assert_eq!(opened.route, "socks5://10.0.0.1:1080");
        assert_eq!(opened.session, "u1@10.0.0.1:1080");
        assert_eq!(connector.opens()[0].0, route);
    }
}
