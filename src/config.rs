use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

pub const DEFAULT_BASE_URL: &str = "https://ollama.com/v1";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub bundle_root: PathBuf,
    pub static_dir: PathBuf,
    pub cors_origins: CorsOrigins,
    pub max_upload_bytes: usize,
    pub upstream: UpstreamConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsOrigins {
    Any,
    List(Vec<String>),
}

#[derive(Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub max_connections: usize,
    pub max_idle_connections: usize,
    pub generation_timeouts: Timeouts,
    pub probe_timeouts: Timeouts,
}

/// Phase timeouts for one upstream call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub read: Duration,
    pub write: Duration,
    pub pool: Duration,
}

impl Timeouts {
    pub const fn generation() -> Self {
        Self {
            connect: Duration::from_secs(10),
            read: Duration::from_secs(60),
            write: Duration::from_secs(30),
            pool: Duration::from_secs(30),
        }
    }

    pub const fn probe() -> Self {
        Self {
            connect: Duration::from_secs(10),
            read: Duration::from_secs(20),
            write: Duration::from_secs(10),
            pool: Duration::from_secs(10),
        }
    }

    /// Budget for sending the request and reading the whole response.
    pub fn request_budget(&self) -> Duration {
        self.write + self.read
    }
}

// The key never shows up in logs.
impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("max_attempts", &self.max_attempts)
            .field("backoff_base", &self.backoff_base)
            .field("max_connections", &self.max_connections)
            .field("max_idle_connections", &self.max_idle_connections)
            .finish()
    }
}

impl UpstreamConfig {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            max_attempts: 4,
            backoff_base: Duration::from_secs(1),
            max_connections: 4,
            max_idle_connections: 2,
            generation_timeouts: Timeouts::generation(),
            probe_timeouts: Timeouts::probe(),
        }
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host: IpAddr = lookup("HOST")
            .and_then(|v| v.parse().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let port = lookup("PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let listen_addr = SocketAddr::new(host, port);

        let base_url = lookup("OLLAMA_CLOUD_BASE")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let api_key = lookup("OLLAMA_API_KEY").filter(|v| !v.trim().is_empty());

        let mut upstream = UpstreamConfig::new(base_url, api_key);
        upstream.max_attempts = lookup("UPSTREAM_MAX_ATTEMPTS")
            .and_then(|v| v.parse().ok())
            .filter(|n: &u32| *n > 0)
            .unwrap_or(upstream.max_attempts);
        upstream.backoff_base = lookup("UPSTREAM_BACKOFF_MS")
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(upstream.backoff_base);

        let bundle_root = PathBuf::from(lookup("BUNDLE_ROOT").unwrap_or_else(|| "bundles".into()));
        let static_dir = PathBuf::from(lookup("STATIC_DIR").unwrap_or_else(|| ".".into()));

        let cors_origins = lookup("CORS_ALLOW_ORIGINS")
            .map(|raw| parse_origins(&raw))
            .unwrap_or(CorsOrigins::Any);

        let max_upload_bytes = lookup("MAX_UPLOAD_BYTES")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);

        Ok(Self {
            listen_addr,
            bundle_root,
            static_dir,
            cors_origins,
            max_upload_bytes,
            upstream,
        })
    }
}

fn parse_origins(raw: &str) -> CorsOrigins {
    let origins: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        CorsOrigins::Any
    } else {
        CorsOrigins::List(origins)
    }
}
