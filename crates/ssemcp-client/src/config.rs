//! Server entries and their TOML file format.
//!
//! ```toml
//! [[servers]]
//! name = "search"
//! url = "http://localhost:8000/sse"
//! keep_alive = true
//! dynamic_headers = false
//! timeout_secs = 2.5
//! headers = { Authorization = "Bearer abc" }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::client::ConnectionMode;
use crate::error::{McpError, Result};
use crate::headers::HeaderMap;

/// Connection timeout applied to per-call connections, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

fn default_keep_alive() -> bool {
    true
}

fn default_timeout() -> Duration {
    Duration::from_secs(DEFAULT_TIMEOUT_SECS)
}

/// `Duration` as (possibly fractional) seconds.
mod secs_f64 {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// One SSE server the client talks to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SseServerConfig {
    /// Name used in logs and initialization errors.
    pub name: String,
    /// SSE endpoint URL.
    pub url: String,
    /// Headers sent with every connection attempt.
    #[serde(default)]
    pub headers: HeaderMap,
    /// Hold one session for the client's lifetime. Defaults to true.
    #[serde(default = "default_keep_alive")]
    pub keep_alive: bool,
    /// Headers change between attempts, so sessions cannot be reused.
    #[serde(default)]
    pub dynamic_headers: bool,
    /// Timeout for per-call connection attempts. Written as `timeout_secs`
    /// in TOML, fractions allowed. Defaults to 10 seconds.
    #[serde(rename = "timeout_secs", with = "secs_f64", default = "default_timeout")]
    pub timeout: Duration,
}

impl SseServerConfig {
    /// Create an entry with default settings.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            headers: HeaderMap::new(),
            keep_alive: true,
            dynamic_headers: false,
            timeout: default_timeout(),
        }
    }

    /// Add a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set keep-alive.
    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Mark headers as changing between attempts.
    pub fn with_dynamic_headers(mut self, dynamic: bool) -> Self {
        self.dynamic_headers = dynamic;
        self
    }

    /// Set the per-call connection timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Per-call connection timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Lifecycle mode these settings select.
    pub fn mode(&self) -> ConnectionMode {
        ConnectionMode::select(self.dynamic_headers, self.keep_alive)
    }

    /// Parse and validate the endpoint URL.
    pub fn endpoint(&self) -> Result<Url> {
        let url = Url::parse(&self.url)?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(McpError::config(format!(
                "server '{}': unsupported URL scheme '{}'",
                self.name, other
            ))),
        }
    }

    /// Check the entry is usable.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(McpError::config("server name must not be empty"));
        }
        if self.timeout.is_zero() {
            return Err(McpError::config(format!(
                "server '{}': timeout must be greater than zero",
                self.name
            )));
        }
        self.endpoint()?;
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct ServersFile {
    #[serde(default)]
    servers: Vec<SseServerConfig>,
}

/// Parse server entries from TOML text.
pub fn parse_servers(contents: &str) -> Result<Vec<SseServerConfig>> {
    let file: ServersFile = toml::from_str(contents)?;
    let mut seen = std::collections::HashSet::new();
    for server in &file.servers {
        server.validate()?;
        if !seen.insert(server.name.as_str()) {
            return Err(McpError::config(format!(
                "duplicate server name '{}'",
                server.name
            )));
        }
    }
    Ok(file.servers)
}

/// Load server entries from a TOML file.
pub fn load_servers(path: &Path) -> Result<Vec<SseServerConfig>> {
    tracing::debug!(path = %path.display(), "loading server config");
    let contents = std::fs::read_to_string(path).map_err(|e| McpError::ConfigRead {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_servers(&contents)
}

/// Pick the entry named `name`, or the only entry when `name` is `None`.
pub fn select_server(servers: Vec<SseServerConfig>, name: Option<&str>) -> Result<SseServerConfig> {
    match name {
        Some(name) => servers
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| McpError::config(format!("no server named '{}'", name))),
        None => {
            let mut servers = servers;
            match servers.len() {
                1 => Ok(servers.remove(0)),
                0 => Err(McpError::config("no servers configured")),
                n => Err(McpError::config(format!(
                    "{} servers configured, pick one by name",
                    n
                ))),
            }
        }
    }
}
