//! Egress routes
//!
//! A session reaches the remote endpoint either directly or through a SOCKS5
//! or HTTP(S) proxy. Raw proxy addresses are normalized to a scheme-qualified
//! URL; an address without a scheme is assumed to be SOCKS5.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::error::{CoreError, Result};

const DEFAULT_SOCKS5_PORT: u16 = 1080;

/// Proxy protocol, detected from the address prefix
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProxyScheme {
    Socks5,
    Http,
    Https,
}

impl fmt::Display for ProxyScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyScheme::Socks5 => write!(f, "socks5"),
            ProxyScheme::Http => write!(f, "http"),
            ProxyScheme::Https => write!(f, "https"),
        }
    }
}

/// A normalized proxy address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyAddress {
    url: String,
    scheme: ProxyScheme,
    host: String,
    port: u16,
    username: Option<String>,
    password: Option<String>,
}

impl ProxyAddress {
    /// Normalize and parse a raw proxy address.
    ///
    /// `socks5://`, `http://` and `https://` prefixes (any case) are kept;
    /// an address without a scheme gets `socks5://` prepended. Any other
    /// scheme is rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (scheme, normalized) = match raw.split_once("://") {
            Some((prefix, rest)) => {
                let scheme = match prefix.to_ascii_lowercase().as_str() {
                    "socks5" => ProxyScheme::Socks5,
                    "http" => ProxyScheme::Http,
                    "https" => ProxyScheme::Https,
                    _ => {
                        return Err(CoreError::Configuration(format!(
                            "unsupported proxy scheme '{prefix}' in '{raw}'"
                        )))
                    }
                };
                (scheme, format!("{scheme}://{rest}"))
            }
            None => (ProxyScheme::Socks5, format!("socks5://{raw}")),
        };

        let url = Url::parse(&normalized)
            .map_err(|e| CoreError::Configuration(format!("invalid proxy address '{raw}': {e}")))?;

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| CoreError::Configuration(format!("proxy address '{raw}' has no host")))?
            .to_string();

        let port = match scheme {
            ProxyScheme::Socks5 => url.port().unwrap_or(DEFAULT_SOCKS5_PORT),
            _ => url.port_or_known_default().unwrap_or(80),
        };

        let username = Some(url.username())
            .filter(|u| !u.is_empty())
            .map(String::from);
        let password = url.password().map(String::from);

        Ok(Self {
            url: normalized,
            scheme,
            host,
            port,
            username,
            password,
        })
    }

    /// Full normalized URL, credentials included
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn scheme(&self) -> ProxyScheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Username and password, when the address carries them
    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.username
            .as_deref()
            .map(|user| (user, self.password.as_deref().unwrap_or("")))
    }
}

impl fmt::Display for ProxyAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print credentials
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Egress path for a session's connection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    Direct,
    Proxied(ProxyAddress),
}

impl Route {
    /// Build a proxied route from a raw address
    pub fn proxied(raw: &str) -> Result<Self> {
        ProxyAddress::parse(raw).map(Route::Proxied)
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, Route::Direct)
    }

    pub fn proxy(&self) -> Option<&ProxyAddress> {
        match self {
            Route::Direct => None,
            Route::Proxied(proxy) => Some(proxy),
        }
    }

    /// Short host label for session names
    pub fn host_label(&self) -> String {
        match self {
            Route::Direct => "direct".to_string(),
            Route::Proxied(proxy) => format!("{}:{}", proxy.host, proxy.port),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Direct => write!(f, "direct"),
            Route::Proxied(proxy) => write!(f, "{proxy}"),
        }
    }
}

/// Egress details learned by validating a route
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteMetadata {
    pub ip: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

/// Shown instead of an egress IP for direct sessions
pub const DIRECT_EGRESS_LABEL: &str = "Direct IP";
