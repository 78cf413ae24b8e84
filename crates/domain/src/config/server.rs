use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_bind")]
    pub bind_addr: String,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub ws: WsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            bind_addr: d_bind(),
            cors: CorsConfig::default(),
            ws: WsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Explicit origin allow-list. Defaults to localhost-only.
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// WebSocket hub
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-connection overflow policy, fixed at hub construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WsOverflowPolicy {
    /// Send a final `error:slow_consumer` and close the connection.
    DropSlow,
    /// Merge adjacent `token_delta` events of the same agent turn.
    Coalesce,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    /// Maximum inbound frame size in bytes.
    #[serde(default = "d_ws_max_frame")]
    pub max_frame_bytes: usize,
    /// Bounded outbound queue length per connection.
    #[serde(default = "d_ws_queue")]
    pub outbound_queue: usize,
    #[serde(default = "d_ws_overflow")]
    pub overflow: WsOverflowPolicy,
    #[serde(default = "d_ws_ping_secs")]
    pub ping_interval_secs: u64,
    /// A missed pong for this long terminates the connection.
    #[serde(default = "d_ws_pong_secs")]
    pub pong_timeout_secs: u64,
    /// Events included in the initial `sync` snapshot.
    #[serde(default = "d_ws_sync_limit")]
    pub sync_limit: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: d_ws_max_frame(),
            outbound_queue: d_ws_queue(),
            overflow: d_ws_overflow(),
            ping_interval_secs: d_ws_ping_secs(),
            pong_timeout_secs: d_ws_pong_secs(),
            sync_limit: d_ws_sync_limit(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auth & rate limiting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Environment variable holding the HMAC key for signed bearer tokens.
    /// When the variable is unset, auth is disabled (dev mode).
    #[serde(default = "d_hmac_key_env")]
    pub hmac_key_env: String,
    #[serde(default = "d_token_ttl")]
    pub token_ttl_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            hmac_key_env: d_hmac_key_env(),
            token_ttl_seconds: d_token_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests per minute for an authenticated token subject.
    #[serde(default = "d_token_rpm")]
    pub per_token_per_minute: u32,
    /// Requests per minute for an unauthenticated peer IP.
    #[serde(default = "d_ip_rpm")]
    pub per_ip_per_minute: u32,
    /// Bucket capacity = rate × this multiplier.
    #[serde(default = "d_burst")]
    pub burst_multiplier: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_token_per_minute: d_token_rpm(),
            per_ip_per_minute: d_ip_rpm(),
            burst_multiplier: d_burst(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_port() -> u16 {
    8300
}
fn d_bind() -> String {
    "127.0.0.1".into()
}
fn d_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".into(),
        "http://127.0.0.1:3000".into(),
    ]
}
fn d_ws_max_frame() -> usize {
    64 * 1024
}
fn d_ws_queue() -> usize {
    256
}
fn d_ws_overflow() -> WsOverflowPolicy {
    WsOverflowPolicy::DropSlow
}
fn d_ws_ping_secs() -> u64 {
    15
}
fn d_ws_pong_secs() -> u64 {
    30
}
fn d_ws_sync_limit() -> usize {
    500
}
fn d_hmac_key_env() -> String {
    "AUTH_TOKEN_HMAC_KEY".into()
}
fn d_token_ttl() -> u64 {
    86_400
}
fn d_token_rpm() -> u32 {
    60
}
fn d_ip_rpm() -> u32 {
    120
}
fn d_burst() -> f64 {
    1.0
}
