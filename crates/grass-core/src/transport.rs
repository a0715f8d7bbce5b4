//! Transport bindings
//!
//! A [`Binding`] is one WebSocket connection. It yields inbound events one at
//! a time and accepts outbound text; once it reports a close or an error it is
//! finished and must be discarded. A [`Connector`] opens a fresh binding for a
//! route, so sessions can be driven by an in-memory connector in tests.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{client_async_tls, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::route::Route;
use crate::tunnel::{self, BoxedStream};

/// Close code reported when the peer vanished without a close frame
pub const ABNORMAL_CLOSE: u16 = 1006;
/// Close code reported for a close frame without a status
pub const NO_STATUS_CLOSE: u16 = 1005;

/// Inbound event of a binding
#[derive(Debug)]
pub enum TransportEvent {
    /// Payload of a text or binary frame
    Message(Vec<u8>),
    Closed { code: u16, reason: String },
    Error(TransportError),
}

/// One open connection
#[async_trait]
pub trait Binding: Send {
    /// Fails with [`TransportError::NotOpen`] once the connection is gone
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Next inbound event. Must be cancel-safe.
    async fn next_event(&mut self) -> TransportEvent;

    /// Forcibly tear the connection down
    async fn terminate(&mut self);
}

/// Opens bindings for a route
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Binding: Binding + 'static;

    async fn open(&self, route: &Route) -> Result<Self::Binding, TransportError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<BoxedStream>>;

/// WebSocket binding over an optional proxy tunnel
pub struct WsBinding {
    stream: Option<WsStream>,
}

#[async_trait]
impl Binding for WsBinding {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotOpen)?;
        stream
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn next_event(&mut self) -> TransportEvent {
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return TransportEvent::Closed {
                    code: ABNORMAL_CLOSE,
                    reason: "binding closed".to_string(),
                };
            };

            match stream.next().await {
                Some(Ok(Message::Text(text))) => return TransportEvent::Message(text.into_bytes()),
                Some(Ok(Message::Binary(data))) => return TransportEvent::Message(data),
                Some(Ok(Message::Close(frame))) => {
                    self.stream = None;
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.into_owned()))
                        .unwrap_or((NO_STATUS_CLOSE, String::new()));
                    return TransportEvent::Closed { code, reason };
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // Control frames are answered by tungstenite
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    return TransportEvent::Error(TransportError::Receive(e.to_string()));
                }
                None => {
                    self.stream = None;
                    return TransportEvent::Closed {
                        code: ABNORMAL_CLOSE,
                        reason: String::new(),
                    };
                }
            }
        }
    }

    async fn terminate(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.close(Some(close_frame())).await {
                debug!("Close during terminate failed: {}", e);
            }
        }
    }
}

fn close_frame() -> tokio_tungstenite::tungstenite::protocol::CloseFrame<'static> {
    tokio_tungstenite::tungstenite::protocol::CloseFrame {
        code: CloseCode::Away,
        reason: "terminated".into(),
    }
}

/// Opens [`WsBinding`]s to one fixed endpoint with a fixed header set
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
    headers: Vec<(String, String)>,
}

impl WsConnector {
    pub fn new(
        websocket_url: &str,
        headers: Vec<(String, String)>,
    ) -> Result<Self, TransportError> {
        let url = Url::parse(websocket_url)
            .map_err(|e| TransportError::InvalidUrl(format!("{websocket_url}: {e}")))?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(TransportError::InvalidUrl(format!(
                    "unsupported scheme '{other}'"
                )))
            }
        }
        if url.host_str().is_none() {
            return Err(TransportError::InvalidUrl(format!("{websocket_url}: no host")));
        }
        tunnel::ensure_crypto_provider();
        Ok(Self { url, headers })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, TransportError> {
        Self::new(&config.websocket_url, config.headers.clone())
    }

    fn request(
        &self,
    ) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

        for (name, value) in &self.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    request.headers_mut().insert(name, value);
                }
                _ => warn!("Skipping invalid header '{}'", name),
            }
        }
        Ok(request)
    }
}

#[async_trait]
impl Connector for WsConnector {
    type Binding = WsBinding;

    async fn open(&self, route: &Route) -> Result<WsBinding, TransportError> {
        let host = self
            .url
            .host_str()
            .ok_or_else(|| TransportError::InvalidUrl("no host".to_string()))?;
        let port = self
            .url
            .port_or_known_default()
            .ok_or_else(|| TransportError::InvalidUrl("no port".to_string()))?;

        let stream = tunnel::dial(route, host, port).await?;
        let request = self.request()?;

        let (ws, response) = client_async_tls(request, stream)
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        debug!(
            "WebSocket connected to {} via {} (status: {})",
            self.url,
            route,
            response.status()
        );

        Ok(WsBinding { stream: Some(ws) })
    }
}
