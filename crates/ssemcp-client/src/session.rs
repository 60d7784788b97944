//! Request/response sessions over a duplex channel.
//!
//! [`Session`] is the capability the lifecycle controller relies on:
//! handshake, tool listing, tool invocation and close, plus an optional
//! middleware extension point. [`ClientSession`] implements it for JSON-RPC
//! over any [`StreamPair`]: a dispatcher task routes responses to waiting
//! callers by id and answers server pings.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{McpError, Result};
use crate::middleware::{Middleware, MiddlewareChain, MiddlewareHost};
use crate::protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcError,
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsResult,
    ToolInfo, methods,
};
use crate::resources::Resource;
use crate::transport::StreamPair;

/// A negotiated conversation with one server.
#[async_trait]
pub trait Session: Send + Sync {
    /// Perform the protocol handshake.
    async fn initialize(&self) -> Result<InitializeResult>;

    /// List the tools the server exposes.
    async fn list_tools(&self) -> Result<Vec<ToolInfo>>;

    /// Invoke one tool.
    async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<CallToolResult>;

    /// Stop the session. Safe to call more than once.
    async fn close(&self) -> Result<()>;

    /// The middleware extension point, if this session has one.
    fn middleware_host(&self) -> Option<&dyn MiddlewareHost> {
        None
    }
}

/// Builds a session on top of an open channel pair.
pub trait SessionFactory: Send + Sync {
    /// Wrap `streams` into a session.
    fn wrap(&self, streams: StreamPair) -> Arc<dyn Session>;
}

/// Resource-stack entry closing a session on release.
pub struct SessionGuard {
    session: Arc<dyn Session>,
}

impl SessionGuard {
    /// Guard `session`.
    pub fn new(session: Arc<dyn Session>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl Resource for SessionGuard {
    fn label(&self) -> &str {
        "session"
    }

    async fn release(self: Box<Self>) -> Result<()> {
        self.session.close().await
    }
}

/// Factory producing [`ClientSession`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClientSessionFactory;

impl SessionFactory for ClientSessionFactory {
    fn wrap(&self, streams: StreamPair) -> Arc<dyn Session> {
        Arc::new(ClientSession::new(streams))
    }
}

#[derive(Default)]
struct Waiters {
    closed: bool,
    by_id: HashMap<u64, oneshot::Sender<JsonRpcResponse>>,
}

impl Waiters {
    /// Refuse new requests and wake every waiting caller with a closed channel.
    fn shut(&mut self) {
        self.closed = true;
        self.by_id.clear();
    }
}

type SharedWaiters = Arc<Mutex<Waiters>>;

/// Removes a request's waiter if its caller gives up.
struct WaiterSlot<'a> {
    waiters: &'a SharedWaiters,
    id: u64,
}

impl Drop for WaiterSlot<'_> {
    fn drop(&mut self) {
        self.waiters.lock().by_id.remove(&self.id);
    }
}

/// JSON-RPC session with middleware support.
pub struct ClientSession {
    write: mpsc::Sender<JsonRpcMessage>,
    waiters: SharedWaiters,
    next_id: AtomicU64,
    middlewares: RwLock<MiddlewareChain>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    server: RwLock<Option<InitializeResult>>,
}

impl ClientSession {
    /// Start a session over `streams`. Must be called inside a tokio runtime.
    pub fn new(streams: StreamPair) -> Self {
        let StreamPair { read, write } = streams;
        let waiters = SharedWaiters::default();
        let dispatcher = tokio::spawn(dispatch(read, write.clone(), waiters.clone()));

        Self {
            write,
            waiters,
            next_id: AtomicU64::new(1),
            middlewares: RwLock::new(MiddlewareChain::new()),
            dispatcher: Mutex::new(Some(dispatcher)),
            server: RwLock::new(None),
        }
    }

    /// Handshake result, once `initialize` succeeded.
    pub fn server_info(&self) -> Option<InitializeResult> {
        self.server.read().clone()
    }

    /// Whether the session stopped accepting requests.
    pub fn is_closed(&self) -> bool {
        self.waiters.lock().closed
    }

    /// Names of attached middlewares, in order.
    pub fn middleware_names(&self) -> Vec<String> {
        self.middlewares
            .read()
            .names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Send a request and wait for its result.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let chain = self.middlewares.read().clone();
        let mut request = JsonRpcRequest::new(self.next_id.fetch_add(1, Ordering::SeqCst), method, params);
        chain.apply_request(&mut request);

        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = self.waiters.lock();
            if waiters.closed {
                return Err(McpError::ConnectionClosed);
            }
            waiters.by_id.insert(request.id, tx);
        }
        let _slot = WaiterSlot {
            waiters: &self.waiters,
            id: request.id,
        };

        tracing::trace!(id = request.id, method = %method, "sending MCP request");
        self.write
            .send(request.into())
            .await
            .map_err(|_| McpError::ConnectionClosed)?;

        let mut response = rx.await.map_err(|_| McpError::ConnectionClosed)?;
        chain.apply_response(method, &mut response);

        response
            .into_result()
            .map_err(|e| McpError::server_error(e.code, e.message, e.data))
    }

    /// Send a notification (no response expected).
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        if self.is_closed() {
            return Err(McpError::ConnectionClosed);
        }
        self.write
            .send(JsonRpcNotification::new(method, params).into())
            .await
            .map_err(|_| McpError::ConnectionClosed)
    }
}

#[async_trait]
impl Session for ClientSession {
    async fn initialize(&self) -> Result<InitializeResult> {
        let params = serde_json::to_value(InitializeParams::default())?;
        let value = self
            .request(methods::INITIALIZE, Some(params))
            .await
            .map_err(|e| McpError::handshake(e))?;
        let result: InitializeResult =
            serde_json::from_value(value).map_err(|e| McpError::handshake(e))?;

        if !result.is_supported_version() {
            return Err(McpError::handshake(format!(
                "unsupported protocol version: {}",
                result.protocol_version
            )));
        }

        self.notify(methods::INITIALIZED, None)
            .await
            .map_err(|e| McpError::handshake(e))?;

        tracing::info!(
            server = %result.server_info.name,
            version = %result.server_info.version,
            protocol = %result.protocol_version,
            "MCP session initialized"
        );

        *self.server.write() = Some(result.clone());
        Ok(result)
    }

    async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        let value = self
            .request(methods::TOOLS_LIST, None)
            .await
            .map_err(|e| McpError::discovery(e))?;
        let listed: ListToolsResult =
            serde_json::from_value(value).map_err(|e| McpError::discovery(e))?;

        tracing::debug!(tool_count = listed.tools.len(), "listed MCP tools");
        Ok(listed.tools)
    }

    async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<CallToolResult> {
        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })?;
        let value = self
            .request(methods::TOOLS_CALL, Some(params))
            .await
            .map_err(|e| e.into_invocation(name))?;
        let result: CallToolResult =
            serde_json::from_value(value).map_err(|e| McpError::from(e).into_invocation(name))?;

        if result.is_error() {
            tracing::warn!(tool = %name, "tool call returned error");
        } else {
            tracing::debug!(tool = %name, "tool call succeeded");
        }
        Ok(result)
    }

    async fn close(&self) -> Result<()> {
        let dispatcher = self.dispatcher.lock().take();
        self.waiters.lock().shut();
        if let Some(task) = dispatcher {
            task.abort();
            if let Err(e) = task.await {
                if e.is_panic() {
                    return Err(McpError::cleanup("session", "dispatcher panicked"));
                }
            }
            tracing::debug!("MCP session closed");
        }
        Ok(())
    }

    fn middleware_host(&self) -> Option<&dyn MiddlewareHost> {
        Some(self)
    }
}

impl MiddlewareHost for ClientSession {
    fn add_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.middlewares.write().push(middleware);
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        if let Some(task) = self.dispatcher.lock().take() {
            task.abort();
        }
    }
}

/// Route server messages until the channel breaks.
async fn dispatch(
    mut read: mpsc::Receiver<Result<JsonRpcMessage>>,
    write: mpsc::Sender<JsonRpcMessage>,
    waiters: SharedWaiters,
) {
    while let Some(item) = read.recv().await {
        match item {
            Ok(JsonRpcMessage::Response(response)) => {
                let waiter = waiters.lock().by_id.remove(&response.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => tracing::debug!(id = response.id, "response for unknown request"),
                }
            }
            Ok(JsonRpcMessage::Request(request)) => {
                let reply = if request.method == methods::PING {
                    JsonRpcResponse::success(request.id, json!({}))
                } else {
                    JsonRpcResponse::failure(
                        request.id,
                        JsonRpcError::METHOD_NOT_FOUND,
                        format!("method not found: {}", request.method),
                    )
                };
                if write.send(reply.into()).await.is_err() {
                    break;
                }
            }
            Ok(JsonRpcMessage::Notification(notification)) => {
                tracing::debug!(method = %notification.method, "server notification");
            }
            Err(McpError::Json(e)) => {
                tracing::warn!(error = %e, "skipping undecodable server message");
            }
            Err(e) => {
                tracing::warn!(error = %e, "server stream broke");
                break;
            }
        }
    }
    waiters.lock().shut();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryPeer;

    /// Answer client requests with `handler` until the client hangs up.
    fn spawn_peer<F>(mut peer: MemoryPeer, handler: F) -> JoinHandle<Vec<JsonRpcMessage>>
    where
        F: Fn(&JsonRpcRequest) -> Option<JsonRpcResponse> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(message) = peer.incoming.recv().await {
                if let JsonRpcMessage::Request(request) = &message {
                    if let Some(reply) = handler(request) {
                        if peer.outgoing.send(Ok(reply.into())).await.is_err() {
                            break;
                        }
                    }
                }
                seen.push(message);
            }
            seen
        })
    }

    fn scripted(request: &JsonRpcRequest) -> Option<JsonRpcResponse> {
        let reply = match request.method.as_str() {
            methods::INITIALIZE => JsonRpcResponse::success(
                request.id,
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "scripted", "version": "0.3.0"}
                }),
            ),
            methods::TOOLS_LIST => JsonRpcResponse::success(
                request.id,
                json!({"tools": [{"name": "echo", "description": "Echo back the input"}]}),
            ),
            methods::TOOLS_CALL => {
                let params = request.params.clone().unwrap_or_default();
                if params["name"] == "echo" {
                    JsonRpcResponse::success(
                        request.id,
                        json!({"content": [{"type": "text", "text": params["arguments"]["message"]}]}),
                    )
                } else {
                    JsonRpcResponse::failure(
                        request.id,
                        JsonRpcError::INVALID_PARAMS,
                        format!("Unknown tool: {}", params["name"].as_str().unwrap_or_default()),
                    )
                }
            }
            _ => return None,
        };
        Some(reply)
    }

    #[tokio::test]
    async fn test_initialize_list_and_call() {
        let (streams, peer) = StreamPair::memory(8);
        let peer = spawn_peer(peer, scripted);
        let session = ClientSession::new(streams);

        let init = session.initialize().await.unwrap();
        assert_eq!(init.server_info.name, "scripted");
        assert_eq!(session.server_info().unwrap().server_info.version, "0.3.0");

        let tools = session.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");

        let result = session
            .call_tool("echo", Some(json!({"message": "hi"})))
            .await
            .unwrap();
        assert_eq!(result.text(), Some("hi".to_string()));

        session.close().await.unwrap();
        drop(session);

        let seen = peer.await.unwrap();
        let methods_seen: Vec<&str> = seen.iter().filter_map(|m| m.method()).collect();
        assert_eq!(
            methods_seen,
            vec![
                methods::INITIALIZE,
                methods::INITIALIZED,
                methods::TOOLS_LIST,
                methods::TOOLS_CALL
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_tool_is_invocation_error() {
        let (streams, peer) = StreamPair::memory(8);
        let _peer = spawn_peer(peer, scripted);
        let session = ClientSession::new(streams);
        session.initialize().await.unwrap();

        let err = session.call_tool("nope", None).await.unwrap_err();
        match err {
            McpError::Invocation { tool, code, message } => {
                assert_eq!(tool, "nope");
                assert_eq!(code, Some(JsonRpcError::INVALID_PARAMS));
                assert!(message.contains("Unknown tool"));
            }
            other => panic!("Expected invocation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unsupported_protocol_version_fails_handshake() {
        let (streams, peer) = StreamPair::memory(8);
        let _peer = spawn_peer(peer, |request| {
            Some(JsonRpcResponse::success(
                request.id,
                json!({
                    "protocolVersion": "1999-01-01",
                    "serverInfo": {"name": "old", "version": "0.0.1"}
                }),
            ))
        });
        let session = ClientSession::new(streams);

        let err = session.initialize().await.unwrap_err();
        assert!(matches!(err, McpError::Handshake(_)));
        assert!(err.to_string().contains("1999-01-01"));
    }

    #[tokio::test]
    async fn test_server_ping_is_answered() {
        let (streams, mut peer) = StreamPair::memory(8);
        let _session = ClientSession::new(streams);

        peer.outgoing
            .send(Ok(JsonRpcRequest::new(99, methods::PING, None).into()))
            .await
            .unwrap();
        let reply = peer.incoming.recv().await.unwrap();
        match reply {
            JsonRpcMessage::Response(response) => {
                assert_eq!(response.id, 99);
                assert!(!response.is_error());
            }
            other => panic!("Expected response, got {other:?}"),
        }

        peer.outgoing
            .send(Ok(JsonRpcRequest::new(100, "sampling/createMessage", None).into()))
            .await
            .unwrap();
        match peer.incoming.recv().await.unwrap() {
            JsonRpcMessage::Response(response) => {
                assert_eq!(response.error.unwrap().code, JsonRpcError::METHOD_NOT_FOUND);
            }
            other => panic!("Expected response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_broken_stream_fails_waiting_request() {
        let (streams, mut peer) = StreamPair::memory(8);
        let session = Arc::new(ClientSession::new(streams));

        let waiting = {
            let session = session.clone();
            tokio::spawn(async move { session.list_tools().await })
        };
        // Wait for the request to be written before breaking the stream.
        let _request = peer.incoming.recv().await.unwrap();
        peer.outgoing
            .send(Err(McpError::transport("reset by peer")))
            .await
            .unwrap();

        let err = waiting.await.unwrap().unwrap_err();
        assert!(matches!(err, McpError::Discovery(_)));
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_rejects_requests() {
        let (streams, _peer) = StreamPair::memory(8);
        let session = ClientSession::new(streams);

        session.close().await.unwrap();
        session.close().await.unwrap();
        assert!(session.is_closed());

        let err = session.list_tools().await.unwrap_err();
        assert!(matches!(err, McpError::Discovery(_)));
        assert!(err.to_string().contains("connection closed"));
    }

    #[tokio::test]
    async fn test_middleware_applied_to_requests() {
        struct Stamp;
        impl Middleware for Stamp {
            fn name(&self) -> &str {
                "stamp"
            }
            fn on_request(&self, request: &mut JsonRpcRequest) {
                let params = request.params.get_or_insert_with(|| json!({}));
                params["_meta"] = json!({"stamped": true});
            }
        }

        let (streams, peer) = StreamPair::memory(8);
        let peer = spawn_peer(peer, scripted);
        let session = ClientSession::new(streams);
        session
            .middleware_host()
            .expect("client sessions accept middlewares")
            .add_middleware(Arc::new(Stamp));
        assert_eq!(session.middleware_names(), vec!["stamp"]);

        session.initialize().await.unwrap();
        session.list_tools().await.unwrap();
        session.close().await.unwrap();
        drop(session);

        let seen = peer.await.unwrap();
        let stamped = seen
            .iter()
            .filter(|m| matches!(m, JsonRpcMessage::Request(r) if r.params.as_ref().is_some_and(|p| p["_meta"]["stamped"] == true)))
            .count();
        assert_eq!(stamped, 2);
    }
}
