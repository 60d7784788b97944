//! Connection lifecycle controller.
//!
//! [`SseMcpClient`] talks to one server. At `init` it picks one of two
//! lifecycles from the server settings:
//!
//! - **Persistent** (`keep_alive` and static headers): one connection and one
//!   session are opened at `init` and held until `cleanup`.
//! - **Ephemeral** (everything else): `init` opens a throwaway session just to
//!   handshake and list tools, and nothing stays open.
//!
//! Tool calls always run on their own short-lived connection, whatever the
//! lifecycle.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use url::Url;

use crate::config::SseServerConfig;
use crate::error::{McpError, Result};
use crate::headers::{HeaderMap, HeaderSource};
use crate::middleware::{Middleware, attach_middlewares};
use crate::protocol::{CallToolResult, ToolInfo};
use crate::resources::ResourceStack;
use crate::session::{ClientSessionFactory, Session, SessionFactory, SessionGuard};
use crate::tools::ToolRegistry;
use crate::transport::{SseTransport, TransportGateway};

/// How sessions are held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// One session for the client's lifetime.
    Persistent,
    /// A session per operation.
    Ephemeral,
}

impl ConnectionMode {
    /// Headers that change between attempts rule out a reused session.
    pub fn select(dynamic_headers: bool, keep_alive: bool) -> Self {
        if !dynamic_headers && keep_alive {
            Self::Persistent
        } else {
            Self::Ephemeral
        }
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Persistent => write!(f, "persistent"),
            Self::Ephemeral => write!(f, "ephemeral"),
        }
    }
}

enum Lifecycle {
    Persistent { session: Arc<dyn Session> },
    Ephemeral,
}

/// Client for one MCP server reached over SSE.
pub struct SseMcpClient {
    config: SseServerConfig,
    address: Url,
    headers: HeaderSource,
    middlewares: Vec<Arc<dyn Middleware>>,
    gateway: Arc<dyn TransportGateway>,
    sessions: Arc<dyn SessionFactory>,
    lifecycle: Lifecycle,
    resources: ResourceStack,
    tools: ToolRegistry,
}

impl SseMcpClient {
    /// Create a client using the SSE transport and JSON-RPC sessions.
    pub fn new(config: SseServerConfig) -> Result<Self> {
        Self::with_parts(
            config,
            Arc::new(SseTransport::new()?),
            Arc::new(ClientSessionFactory),
        )
    }

    /// Create a client on top of custom transport and session collaborators.
    pub fn with_parts(
        config: SseServerConfig,
        gateway: Arc<dyn TransportGateway>,
        sessions: Arc<dyn SessionFactory>,
    ) -> Result<Self> {
        config.validate()?;
        let address = config.endpoint()?;
        let headers = HeaderSource::from(config.headers.clone());

        Ok(Self {
            config,
            address,
            headers,
            middlewares: Vec::new(),
            gateway,
            sessions,
            lifecycle: Lifecycle::Ephemeral,
            resources: ResourceStack::new(),
            tools: ToolRegistry::new(),
        })
    }

    /// Add a middleware attached to the persistent session at `init`.
    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Compute headers per connection attempt. Implies the ephemeral lifecycle.
    pub fn with_header_provider<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> HeaderMap + Send + Sync + 'static,
    {
        self.headers = HeaderSource::dynamic(provider);
        self.config.dynamic_headers = true;
        self
    }

    /// Server name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Settings this client was built with.
    pub fn config(&self) -> &SseServerConfig {
        &self.config
    }

    /// Lifecycle selected by the current settings.
    pub fn mode(&self) -> ConnectionMode {
        self.config.mode()
    }

    /// Whether a persistent session is currently held.
    pub fn has_session(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Persistent { .. })
    }

    /// Labels of resources held between operations, oldest first.
    pub fn held_resources(&self) -> Vec<String> {
        self.resources.labels()
    }

    /// Tools from the latest successful discovery.
    pub fn tools(&self) -> Arc<Vec<ToolInfo>> {
        self.tools.snapshot()
    }

    /// Registry updated by discovery.
    pub fn tool_registry(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Connect to the server and prepare the client.
    ///
    /// In persistent mode the session opened here is kept until
    /// [`cleanup`](Self::cleanup), and tools are listed only when
    /// `fetch_tools` is set. In ephemeral mode tools are always listed and the
    /// session is closed before returning.
    ///
    /// Any failure releases everything acquired so far and yields
    /// [`McpError::Initialization`]; the cause is logged, not returned.
    pub async fn init(&mut self, fetch_tools: bool) -> Result<()> {
        if self.has_session() || !self.resources.is_empty() {
            tracing::debug!(server = %self.config.name, "re-initializing, releasing previous session");
            self.cleanup().await;
        }

        let mode = self.mode();
        tracing::info!(server = %self.config.name, mode = %mode, "initializing MCP client");

        let mut scope = ResourceStack::new();
        let started = match mode {
            ConnectionMode::Persistent => self.start_persistent(&mut scope, fetch_tools).await,
            ConnectionMode::Ephemeral => self.start_ephemeral(&mut scope).await,
        };

        match started {
            Ok(Lifecycle::Persistent { session }) => {
                self.resources.absorb(scope);
                self.lifecycle = Lifecycle::Persistent { session };
                tracing::info!(
                    server = %self.config.name,
                    tool_count = self.tools.len(),
                    "MCP session established"
                );
                Ok(())
            }
            Ok(Lifecycle::Ephemeral) => {
                report_cleanup(&self.config.name, scope.release_all().await);
                tracing::info!(
                    server = %self.config.name,
                    tool_count = self.tools.len(),
                    "MCP server reachable"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(server = %self.config.name, error = %e, "MCP client initialization failed");
                report_cleanup(&self.config.name, scope.release_all().await);
                self.cleanup().await;
                Err(McpError::initialization(&self.config.name))
            }
        }
    }

    async fn start_persistent(
        &self,
        scope: &mut ResourceStack,
        fetch_tools: bool,
    ) -> Result<Lifecycle> {
        let headers = self.headers.resolve();
        let session = self.open_session(scope, &headers, None).await?;

        let attached = attach_middlewares(session.as_ref(), &self.middlewares, &self.config.name);
        if attached > 0 {
            tracing::debug!(server = %self.config.name, count = attached, "middlewares attached");
        }

        session.initialize().await?;
        if fetch_tools {
            self.discover(session.as_ref()).await?;
        }
        Ok(Lifecycle::Persistent { session })
    }

    async fn start_ephemeral(&self, scope: &mut ResourceStack) -> Result<Lifecycle> {
        let headers = self.headers.resolve();
        let session = self.open_session(scope, &headers, None).await?;
        session.initialize().await?;
        self.discover(session.as_ref()).await?;
        Ok(Lifecycle::Ephemeral)
    }

    /// Open a connection and wrap it in a session, tracking both in `scope`.
    async fn open_session(
        &self,
        scope: &mut ResourceStack,
        headers: &HeaderMap,
        timeout: Option<Duration>,
    ) -> Result<Arc<dyn Session>> {
        let connection = self.gateway.open(&self.address, headers, timeout).await?;
        let (streams, handle) = connection.into_parts();
        scope.push(handle);

        let session = self.sessions.wrap(streams);
        scope.push(Box::new(SessionGuard::new(session.clone())));
        Ok(session)
    }

    async fn discover(&self, session: &dyn Session) -> Result<usize> {
        let tools = session.list_tools().await?;
        let count = tools.len();
        self.tools.replace(tools);
        tracing::debug!(server = %self.config.name, tool_count = count, "tools discovered");
        Ok(count)
    }

    /// Re-list the server's tools.
    ///
    /// Uses the persistent session when one is held, otherwise a fresh
    /// short-lived session. Returns the number of tools found.
    pub async fn refresh_tools(&self) -> Result<usize> {
        if let Lifecycle::Persistent { session } = &self.lifecycle {
            return self.discover(session.as_ref()).await;
        }

        let mut scope = ResourceStack::new();
        let headers = self.headers.resolve();
        let outcome = self.refresh_scoped(&mut scope, &headers).await;
        report_cleanup(&self.config.name, scope.release_all().await);
        outcome
    }

    async fn refresh_scoped(&self, scope: &mut ResourceStack, headers: &HeaderMap) -> Result<usize> {
        let session = self
            .open_session(scope, headers, Some(self.config.timeout()))
            .await?;
        session.initialize().await?;
        self.discover(session.as_ref()).await
    }

    /// Call a tool on its own short-lived connection.
    ///
    /// Only `headers` are sent; the configured headers are not added. The
    /// configured timeout bounds the connection attempt. Errors are returned
    /// as raised.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
        headers: Option<HeaderMap>,
    ) -> Result<CallToolResult> {
        let headers = headers.unwrap_or_default();
        tracing::debug!(server = %self.config.name, tool = %name, "calling tool");

        let mut scope = ResourceStack::new();
        let outcome = self.invoke(&mut scope, &headers, name, arguments).await;
        report_cleanup(&self.config.name, scope.release_all().await);

        if let Err(e) = &outcome {
            tracing::debug!(server = %self.config.name, tool = %name, error = %e, "tool call failed");
        }
        outcome
    }

    async fn invoke(
        &self,
        scope: &mut ResourceStack,
        headers: &HeaderMap,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<CallToolResult> {
        let session = self
            .open_session(scope, headers, Some(self.config.timeout()))
            .await?;
        session.initialize().await?;
        session.call_tool(name, arguments).await
    }

    /// Release everything the client holds, newest first.
    ///
    /// Release failures are logged and do not stop the remaining releases.
    /// Safe to call repeatedly and after a failed `init`.
    pub async fn cleanup(&mut self) {
        self.lifecycle = Lifecycle::Ephemeral;
        if self.resources.is_empty() {
            return;
        }
        tracing::debug!(
            server = %self.config.name,
            resources = ?self.resources.labels(),
            "releasing MCP client resources"
        );
        report_cleanup(&self.config.name, self.resources.release_all().await);
    }
}

fn report_cleanup(server: &str, failures: Vec<McpError>) {
    for failure in failures {
        tracing::warn!(server = %server, error = %failure, "cleanup error");
    }
}

impl fmt::Debug for SseMcpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseMcpClient")
            .field("name", &self.config.name)
            .field("address", &self.address.as_str())
            .field("mode", &self.mode())
            .field("headers", &self.headers)
            .field("middlewares", &self.middlewares)
            .field("has_session", &self.has_session())
            .field("resources", &self.resources)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_selection() {
        assert_eq!(ConnectionMode::select(false, true), ConnectionMode::Persistent);
        assert_eq!(ConnectionMode::select(false, false), ConnectionMode::Ephemeral);
        assert_eq!(ConnectionMode::select(true, true), ConnectionMode::Ephemeral);
        assert_eq!(ConnectionMode::select(true, false), ConnectionMode::Ephemeral);
    }

    #[test]
    fn test_new_client_holds_nothing() {
        let client = SseMcpClient::new(SseServerConfig::new("search", "http://localhost:8000/sse")).unwrap();
        assert_eq!(client.name(), "search");
        assert_eq!(client.mode(), ConnectionMode::Persistent);
        assert!(!client.has_session());
        assert!(client.held_resources().is_empty());
        assert!(client.tools().is_empty());
    }

    #[test]
    fn test_invalid_address_rejected() {
        let err = SseMcpClient::new(SseServerConfig::new("bad", "localhost:8000")).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);

        let err = SseMcpClient::new(SseServerConfig::new("bad", "not a url")).unwrap_err();
        assert!(matches!(err, McpError::InvalidUrl(_)));
    }

    #[test]
    fn test_header_provider_forces_ephemeral() {
        let client = SseMcpClient::new(SseServerConfig::new("search", "http://localhost:8000/sse"))
            .unwrap()
            .with_header_provider(HeaderMap::new);
        assert_eq!(client.mode(), ConnectionMode::Ephemeral);
        assert!(client.config().dynamic_headers);
    }

    #[test]
    fn test_debug_output() {
        let client = SseMcpClient::new(
            SseServerConfig::new("search", "http://localhost:8000/sse")
                .with_header("Authorization", "Bearer secret"),
        )
        .unwrap();
        let debug = format!("{client:?}");
        assert!(debug.contains("search"));
        assert!(debug.contains("persistent") || debug.contains("Persistent"));
        assert!(!debug.contains("secret"));
    }
}
