//! MCP client for servers reached over Server-Sent Events.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  SseMcpClient                                               │
//! │  - persistent or ephemeral session lifecycle                │
//! │  - init / call_tool / refresh_tools / cleanup               │
//! └─────────────────────────────────────────────────────────────┘
//!            │ SessionFactory                │ TransportGateway
//!            ▼                               ▼
//! ┌───────────────────────────┐   ┌─────────────────────────────┐
//! │  ClientSession            │   │  SseTransport               │
//! │  - JSON-RPC 2.0           │◄──│  - GET text/event-stream    │
//! │  - middleware chain       │   │  - POST to endpoint event   │
//! └───────────────────────────┘   └─────────────────────────────┘
//! ```
//!
//! Everything a client opens is tracked on a [`ResourceStack`] and released
//! in reverse order, on `cleanup`, on error, or when a future is dropped.
//!
//! # Usage
//!
//! ```rust,ignore
//! use ssemcp_client::{SseMcpClient, SseServerConfig};
//!
//! let config = SseServerConfig::new("search", "http://localhost:8000/sse")
//!     .with_header("Authorization", "Bearer token123");
//!
//! let mut client = SseMcpClient::new(config)?;
//! client.init(true).await?;
//! for tool in client.tools().iter() {
//!     println!("Tool: {} - {:?}", tool.name, tool.description);
//! }
//!
//! let result = client
//!     .call_tool("search", Some(json!({"query": "rust"})), None)
//!     .await?;
//! println!("Result: {:?}", result.text());
//!
//! client.cleanup().await;
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod headers;
pub mod middleware;
pub mod protocol;
pub mod resources;
pub mod session;
pub mod tools;
pub mod transport;

pub use client::{ConnectionMode, SseMcpClient};
pub use config::{SseServerConfig, load_servers, parse_servers, select_server};
pub use error::{ErrorKind, McpError, Result};
pub use headers::{HeaderMap, HeaderProvider, HeaderSource};
pub use middleware::{Middleware, MiddlewareChain, MiddlewareHost, attach_middlewares};
pub use protocol::{CallToolResult, InitializeResult, ToolContent, ToolInfo};
pub use resources::{Resource, ResourceStack};
pub use session::{ClientSession, ClientSessionFactory, Session, SessionFactory, SessionGuard};
pub use tools::ToolRegistry;
pub use transport::{Connection, MemoryPeer, SseTransport, StreamPair, TransportGateway};
