//! Error types for MCP operations.

use std::time::Duration;

use thiserror::Error;

/// Result type for MCP operations.
pub type Result<T> = std::result::Result<T, McpError>;

/// Error type for MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Failed to open the streaming channel.
    #[error("failed to connect to {address}: {reason}")]
    Connection {
        /// Address the connection was opened against.
        address: String,
        /// Why the attempt failed.
        reason: String,
    },

    /// The connection attempt did not finish within its bound.
    #[error("connection to {address} timed out after {}ms", .timeout.as_millis())]
    ConnectTimeout {
        /// Address the connection was opened against.
        address: String,
        /// The bound that elapsed.
        timeout: Duration,
    },

    /// Protocol negotiation failed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Listing tools failed on a live session.
    #[error("tool discovery failed: {0}")]
    Discovery(String),

    /// A specific tool call failed.
    #[error("tool '{tool}' failed: {message}")]
    Invocation {
        /// Name of the tool that was called.
        tool: String,
        /// JSON-RPC error code, when the server sent one.
        code: Option<i64>,
        /// Error message.
        message: String,
    },

    /// Releasing a resource failed.
    #[error("failed to release {resource}: {reason}")]
    Cleanup {
        /// Label of the resource.
        resource: String,
        /// Why the release failed.
        reason: String,
    },

    /// Initialization of a server failed. The cause is logged, not carried.
    #[error("server {server} error")]
    Initialization {
        /// Name of the server that failed to initialize.
        server: String,
    },

    /// Failed to communicate over an open channel.
    #[error("transport error: {0}")]
    Transport(String),

    /// JSON-RPC protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server returned an error response.
    #[error("server error {code}: {message}")]
    ServerError {
        /// Error code from the server.
        code: i64,
        /// Error message from the server.
        message: String,
        /// Optional additional data.
        data: Option<serde_json::Value>,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing failed.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Failed to read a config file.
    #[error("failed to read config file '{path}': {source}")]
    ConfigRead {
        /// Path of the file.
        path: String,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,
}

/// Coarse classification of an [`McpError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Opening the streaming channel failed or timed out.
    Connection,
    /// Protocol negotiation failed.
    Handshake,
    /// Listing tools failed.
    Discovery,
    /// A tool call failed.
    Invocation,
    /// Releasing a resource failed.
    Cleanup,
    /// Opaque initialization failure.
    Initialization,
    /// Configuration could not be loaded or validated.
    Config,
    /// Anything else: transport, protocol, encoding.
    Other,
}

impl McpError {
    /// Create a connection error.
    pub fn connection(address: impl ToString, reason: impl ToString) -> Self {
        Self::Connection {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a handshake error.
    pub fn handshake(msg: impl ToString) -> Self {
        Self::Handshake(msg.to_string())
    }

    /// Create a discovery error.
    pub fn discovery(msg: impl ToString) -> Self {
        Self::Discovery(msg.to_string())
    }

    /// Create a cleanup error.
    pub fn cleanup(resource: impl Into<String>, reason: impl ToString) -> Self {
        Self::Cleanup {
            resource: resource.into(),
            reason: reason.to_string(),
        }
    }

    /// Create the opaque initialization error for a server.
    pub fn initialization(server: impl Into<String>) -> Self {
        Self::Initialization {
            server: server.into(),
        }
    }

    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a server error from an error response.
    pub fn server_error(
        code: i64,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self::ServerError {
            code,
            message: message.into(),
            data,
        }
    }

    /// Turn an error raised while calling `tool` into an invocation error.
    ///
    /// Server error responses keep their code; invocation errors pass through.
    pub fn into_invocation(self, tool: &str) -> Self {
        match self {
            Self::Invocation { .. } => self,
            Self::ServerError { code, message, .. } => Self::Invocation {
                tool: tool.to_string(),
                code: Some(code),
                message,
            },
            other => Self::Invocation {
                tool: tool.to_string(),
                code: None,
                message: other.to_string(),
            },
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection { .. } | Self::ConnectTimeout { .. } => ErrorKind::Connection,
            Self::Handshake(_) => ErrorKind::Handshake,
            Self::Discovery(_) => ErrorKind::Discovery,
            Self::Invocation { .. } => ErrorKind::Invocation,
            Self::Cleanup { .. } => ErrorKind::Cleanup,
            Self::Initialization { .. } => ErrorKind::Initialization,
            Self::Config(_) | Self::ConfigRead { .. } | Self::ConfigParse(_) => ErrorKind::Config,
            _ => ErrorKind::Other,
        }
    }
}
