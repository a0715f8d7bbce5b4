/// Remote WebSocket endpoint shared by all sessions
pub const DEFAULT_WEBSOCKET_URL: &str = "wss://proxy.wynd.network:4444";

/// IP-metadata endpoint used to validate proxy routes
pub const DEFAULT_IP_CHECK_URL: &str = "https://ipinfo.io/json";

/// Interval between keep-alive pings (seconds)
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 26;

/// Delay before reconnecting a closed session (seconds)
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 20;

/// Upper bound of the random delay before each connect attempt (milliseconds)
pub const DEFAULT_CONNECT_JITTER_MS: u64 = 0;

/// Connect timeout of the validation HTTP client (seconds)
pub const DEFAULT_VALIDATION_TIMEOUT_SECS: u64 = 10;

/// Headers sent on every WebSocket upgrade; identical for all sessions
pub const DEFAULT_HEADERS: &[(&str, &str)] = &[
    (
        "User-Agent",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:92.0) Gecko/20100101 Firefox/92.0",
    ),
    ("Pragma", "no-cache"),
    ("Accept-Language", "uk-UA,uk;q=0.9,en-US;q=0.8,en;q=0.7"),
    ("Cache-Control", "no-cache"),
    ("OS", "Windows"),
    ("Platform", "Desktop"),
    ("Browser", "Mozilla"),
];
