//! Status Event Sink
//!
//! Sessions and the supervisor report what they observe (open, auth, ping,
//! pong, close, error) through the [`EventSink`] trait. Presentation is the
//! sink's business: print to a console, forward into a channel, or drop.

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, Stdout};
use tokio::sync::{mpsc, Mutex};

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusKind {
    /// Binding opened
    Opened { egress_ip: String },
    /// Handshake response sent
    AuthSent { browser_id: String },
    /// Keep-alive sent
    PingSent { egress_ip: String },
    /// Server answered a keep-alive; usage in kilobytes
    Pong {
        usage_kb: String,
        identity_usage_kb: String,
    },
    Closed { code: u16, reason: String },
    Error { message: String },
    /// Inbound message discarded
    ProtocolError { message: String },
    Reconnecting { delay_secs: u64 },
    RouteValidated {
        ip: String,
        region: Option<String>,
        country: Option<String>,
    },
    RouteRejected { reason: String },
}

/// One observation, tagged with the session it belongs to
#[derive(Debug, Clone, Serialize)]
pub struct StatusEvent {
    /// Session label, empty for route-level events
    pub session: String,
    pub identity: String,
    pub route: String,
    #[serde(flatten)]
    pub kind: StatusKind,
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    pub fn new(
        session: impl Into<String>,
        identity: impl Into<String>,
        route: impl Into<String>,
        kind: StatusKind,
    ) -> Self {
        Self {
            session: session.into(),
            identity: identity.into(),
            route: route.into(),
            kind,
            timestamp: Utc::now(),
        }
    }

    /// An event about a route rather than a session
    pub fn for_route(route: impl Into<String>, kind: StatusKind) -> Self {
        Self::new(String::new(), String::new(), route, kind)
    }

    /// Human-readable one-liner
    pub fn describe(&self) -> String {
        match &self.kind {
            StatusKind::Opened { egress_ip } => {
                format!("Connected via {} (egress IP {egress_ip})", self.route)
            }
            StatusKind::AuthSent { .. } => {
                format!("Sent authentication for user {}", self.identity)
            }
            StatusKind::PingSent { egress_ip } => format!("Sent PING from {egress_ip}"),
            StatusKind::Pong {
                usage_kb,
                identity_usage_kb,
            } => format!(
                "Received PONG for user {}, used {usage_kb} KB on this route ({identity_usage_kb} KB total)",
                self.identity
            ),
            StatusKind::Closed { code, reason } => {
                format!("WebSocket closed via {}, code {code} {reason}", self.route)
            }
            StatusKind::Error { message } => format!("Error via {}: {message}", self.route),
            StatusKind::ProtocolError { message } => format!("Discarded message: {message}"),
            StatusKind::Reconnecting { delay_secs } => {
                format!("Reconnecting {} via {} in {delay_secs}s", self.identity, self.route)
            }
            StatusKind::RouteValidated {
                ip,
                region,
                country,
            } => format!(
                "Proxy {} OK, IP {ip}, region {} {}",
                self.route,
                region.as_deref().unwrap_or("-"),
                country.as_deref().unwrap_or("-")
            ),
            StatusKind::RouteRejected { reason } => {
                format!("Proxy error, skipping proxy {}: {reason}", self.route)
            }
        }
    }
}

/// Event sink for reporting status observations
///
/// Errors are returned as strings and only ever logged by callers; a failing
/// sink never disturbs a session.
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    async fn emit(&self, event: &StatusEvent) -> Result<(), String>;
}

/// No-op event sink for testing or headless embedding
#[derive(Default, Clone)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: &StatusEvent) -> Result<(), String> {
        Ok(())
    }
}

/// Stdout event sink for CLI mode - prints events to console
///
/// Clones share one stdout handle, so each event is written as a whole line.
#[derive(Clone)]
pub struct StdoutEventSink {
    /// Whether to print in JSON format
    pub json_output: bool,
    out: Arc<Mutex<Stdout>>,
}

impl Default for StdoutEventSink {
    fn default() -> Self {
        Self::new(false)
    }
}

impl StdoutEventSink {
    pub fn new(json_output: bool) -> Self {
        Self {
            json_output,
            out: Arc::new(Mutex::new(tokio::io::stdout())),
        }
    }

    fn render(&self, event: &StatusEvent) -> Result<String, String> {
        if self.json_output {
            return serde_json::to_string(event).map_err(|e| e.to_string());
        }
        let local: DateTime<Local> = event.timestamp.into();
        let prefix = if event.session.is_empty() {
            String::new()
        } else {
            format!("{} ", event.session)
        };
        Ok(format!(
            "[{}] {prefix}{}",
            local.format("%H:%M:%S"),
            event.describe()
        ))
    }
}

#[async_trait]
impl EventSink for StdoutEventSink {
    async fn emit(&self, event: &StatusEvent) -> Result<(), String> {
        let mut line = self.render(event)?;
        line.push('\n');

        let mut out = self.out.lock().await;
        out.write_all(line.as_bytes())
            .await
            .map_err(|e| e.to_string())?;
        out.flush().await.map_err(|e| e.to_string())
    }
}

/// Forwards every event into an mpsc channel
#[derive(Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<StatusEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StatusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn emit(&self, event: &StatusEvent) -> Result<(), String> {
        self.tx
            .send(event.clone())
            .map_err(|_| "event receiver dropped".to_string())
    }
}
