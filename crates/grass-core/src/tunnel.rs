//! Egress tunnels
//!
//! Opens a byte stream to the target host, either directly or through the
//! route's proxy. The WebSocket (and its TLS layer) is then run on top of the
//! returned stream.

use base64::Engine;
use std::sync::{Arc, Once};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_socks::tcp::Socks5Stream;
use tracing::debug;

use crate::error::TransportError;
use crate::route::{ProxyAddress, ProxyScheme, Route};

/// Largest CONNECT response head we accept
const MAX_CONNECT_RESPONSE: usize = 8 * 1024;

/// Trait combining all required stream traits
pub trait TunnelStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> TunnelStream for T {}

/// Type alias for the underlying stream
pub type BoxedStream = Box<dyn TunnelStream>;

static CRYPTO_PROVIDER: Once = Once::new();

/// Install the process-wide rustls crypto provider once
pub(crate) fn ensure_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        // Err means another component already installed one
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Open a stream to `host:port` over `route`
pub async fn dial(route: &Route, host: &str, port: u16) -> Result<BoxedStream, TransportError> {
    match route {
        Route::Direct => {
            let stream = TcpStream::connect((host, port))
                .await
                .map_err(|e| TransportError::Connect(format!("{host}:{port}: {e}")))?;
            Ok(Box::new(stream))
        }
        Route::Proxied(proxy) => match proxy.scheme() {
            ProxyScheme::Socks5 => dial_socks5(proxy, host, port).await,
            ProxyScheme::Http => {
                let stream = connect_proxy(proxy).await?;
                let stream = http_connect(stream, host, port, proxy.credentials()).await?;
                Ok(Box::new(stream))
            }
            ProxyScheme::Https => {
                let stream = connect_proxy(proxy).await?;
                let stream = tls_to_proxy(stream, proxy.host()).await?;
                let stream = http_connect(stream, host, port, proxy.credentials()).await?;
                Ok(Box::new(stream))
            }
        },
    }
}

async fn connect_proxy(proxy: &ProxyAddress) -> Result<TcpStream, TransportError> {
    TcpStream::connect((proxy.host(), proxy.port()))
        .await
        .map_err(|e| TransportError::Proxy(format!("{proxy}: {e}")))
}

async fn dial_socks5(
    proxy: &ProxyAddress,
    host: &str,
    port: u16,
) -> Result<BoxedStream, TransportError> {
    debug!("Connecting to {}:{} via SOCKS5 proxy {}", host, port, proxy);
    let proxy_addr = (proxy.host(), proxy.port());
    let stream = match proxy.credentials() {
        Some((user, pass)) => {
            Socks5Stream::connect_with_password(proxy_addr, (host, port), user, pass).await
        }
        None => Socks5Stream::connect(proxy_addr, (host, port)).await,
    }
    .map_err(|e| TransportError::Proxy(format!("{proxy}: {e}")))?;
    Ok(Box::new(stream))
}

async fn tls_to_proxy(
    stream: TcpStream,
    proxy_host: &str,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>, TransportError> {
    ensure_crypto_provider();

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    let connector = TlsConnector::from(Arc::new(tls_config));
    let server_name = rustls::pki_types::ServerName::try_from(proxy_host.to_string())
        .map_err(|_| TransportError::Tls(format!("invalid server name '{proxy_host}'")))?;

    connector
        .connect(server_name, stream)
        .await
        .map_err(|e| TransportError::Tls(e.to_string()))
}

/// Issue an HTTP `CONNECT` on `stream` and return it once the proxy accepts
pub async fn http_connect<S>(
    mut stream: S,
    host: &str,
    port: u16,
    credentials: Option<(&str, &str)>,
) -> Result<S, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let authority = format!("{host}:{port}");
    let mut request = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n");
    if let Some((user, pass)) = credentials {
        let token = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
        request.push_str(&format!("Proxy-Authorization: Basic {token}\r\n"));
    }
    request.push_str("\r\n");

    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| TransportError::Proxy(format!("CONNECT write failed: {e}")))?;
    stream
        .flush()
        .await
        .map_err(|e| TransportError::Proxy(format!("CONNECT flush failed: {e}")))?;

    // Read byte by byte so no tunneled data is consumed past the head
    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_CONNECT_RESPONSE {
            return Err(TransportError::Proxy("CONNECT response too large".to_string()));
        }
        let n = stream
            .read(&mut byte)
            .await
            .map_err(|e| TransportError::Proxy(format!("CONNECT read failed: {e}")))?;
        if n == 0 {
            return Err(TransportError::Proxy(
                "proxy closed connection during CONNECT".to_string(),
            ));
        }
        head.push(byte[0]);
    }

    let head = String::from_utf8_lossy(&head);
    let status_line = head.lines().next().unwrap_or_default();
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| TransportError::Proxy(format!("bad CONNECT response '{status_line}'")))?;

    if !(200..300).contains(&status) {
        return Err(TransportError::Proxy(format!(
            "CONNECT {authority} rejected: {status_line}"
        )));
    }
    Ok(stream)
}
