//! CLI command handlers.

pub mod call;
pub mod tools;

use std::path::Path;

use anyhow::{Context as _, Result, anyhow, bail};

use ssemcp_client::{SseServerConfig, load_servers, select_server};

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Server the command talks to.
    pub server: SseServerConfig,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

/// Build the server entry from `--config`/`--server` or `--url`, plus `-H` headers.
pub fn resolve_server(
    config: Option<&Path>,
    url: Option<&str>,
    name: Option<&str>,
    headers: &[String],
) -> Result<SseServerConfig> {
    let mut server = match (config, url) {
        (_, Some(url)) => SseServerConfig::new(name.unwrap_or("default"), url),
        (Some(path), None) => {
            let servers = load_servers(path)
                .with_context(|| format!("loading servers from {}", path.display()))?;
            select_server(servers, name)?
        }
        (None, None) => bail!("no server given: pass --url or --config (or set SSEMCP_CONFIG)"),
    };

    for header in headers {
        let (key, value) = parse_header(header)?;
        server.headers.insert(key, value);
    }

    server.validate()?;
    Ok(server)
}

/// Split a `KEY=VALUE` header argument.
pub fn parse_header(header: &str) -> Result<(String, String)> {
    match header.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(anyhow!(
            "Invalid header format: '{}'. Use KEY=VALUE.",
            header
        )),
    }
}
