//! Transport layer: opening the streaming channel.
//!
//! A [`TransportGateway`] turns an address and a header map into a
//! [`Connection`]: a duplex [`StreamPair`] plus a handle that closes the
//! stream when released. [`SseTransport`] is the MCP-over-SSE gateway:
//!
//! ```text
//! GET  <url>            Accept: text/event-stream
//!   <- event: endpoint  data: /messages?session_id=...
//!   <- event: message   data: {"jsonrpc":"2.0",...}     (server -> client)
//! POST <endpoint>       {"jsonrpc":"2.0",...}           (client -> server)
//! ```

use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::{Event, Eventsource};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use crate::error::{McpError, Result};
use crate::headers::HeaderMap;
use crate::protocol::{JsonRpcError, JsonRpcMessage, JsonRpcResponse};
use crate::resources::Resource;

/// Buffer size of the channels between the SSE tasks and the session.
pub const CHANNEL_CAPACITY: usize = 32;

/// SSE event carrying the POST endpoint.
const ENDPOINT_EVENT: &str = "endpoint";

/// SSE event carrying a JSON-RPC message.
const MESSAGE_EVENT: &str = "message";

/// The client's side of a duplex message channel.
#[derive(Debug)]
pub struct StreamPair {
    /// Messages from the server. An `Err` item reports a broken or undecodable frame.
    pub read: mpsc::Receiver<Result<JsonRpcMessage>>,
    /// Messages to the server.
    pub write: mpsc::Sender<JsonRpcMessage>,
}

/// The far end of an in-memory [`StreamPair`].
#[derive(Debug)]
pub struct MemoryPeer {
    /// Messages written by the client.
    pub incoming: mpsc::Receiver<JsonRpcMessage>,
    /// Messages delivered to the client.
    pub outgoing: mpsc::Sender<Result<JsonRpcMessage>>,
}

impl StreamPair {
    /// Create a connected in-memory pair, mainly for sessions under test.
    pub fn memory(capacity: usize) -> (Self, MemoryPeer) {
        let (to_client, read) = mpsc::channel(capacity);
        let (write, from_client) = mpsc::channel(capacity);
        (
            Self { read, write },
            MemoryPeer {
                incoming: from_client,
                outgoing: to_client,
            },
        )
    }
}

/// An open streaming connection.
pub struct Connection {
    /// The channel pair to hand to a session.
    pub streams: StreamPair,
    /// Closes the stream when released.
    pub handle: Box<dyn Resource>,
}

impl Connection {
    /// Split into the channel pair and the closing handle.
    pub fn into_parts(self) -> (StreamPair, Box<dyn Resource>) {
        (self.streams, self.handle)
    }
}

/// Opens streaming connections.
#[async_trait]
pub trait TransportGateway: Send + Sync {
    /// Open a connection to `address`, sending `headers`.
    ///
    /// `timeout` bounds only the connection attempt, not the life of the
    /// connection.
    async fn open(
        &self,
        address: &Url,
        headers: &HeaderMap,
        timeout: Option<Duration>,
    ) -> Result<Connection>;
}

/// MCP-over-SSE gateway built on `reqwest`.
#[derive(Debug, Clone)]
pub struct SseTransport {
    http: reqwest::Client,
}

impl SseTransport {
    /// Create a gateway with its own HTTP client.
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| McpError::transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    /// Create a gateway sharing an existing HTTP client.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn connect(&self, address: &Url, headers: &HeaderMap) -> Result<Connection> {
        let mut request = self
            .http
            .get(address.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream");
        for (key, value) in headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| McpError::connection(address, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(McpError::connection(address, format!("HTTP {}", status)));
        }

        let mut events = Box::pin(response.bytes_stream().eventsource());
        let endpoint = wait_for_endpoint(&mut events, address).await?;

        tracing::debug!(url = %address, endpoint = %endpoint, "SSE session endpoint received");

        let (to_session, read) = mpsc::channel(CHANNEL_CAPACITY);
        let (write, from_session) = mpsc::channel(CHANNEL_CAPACITY);

        let reader = tokio::spawn(pump_events(events, to_session.clone()));
        let writer = tokio::spawn(post_messages(
            self.http.clone(),
            endpoint,
            headers.clone(),
            from_session,
            to_session,
        ));

        Ok(Connection {
            streams: StreamPair { read, write },
            handle: Box::new(SseConnection {
                address: address.to_string(),
                reader,
                writer,
            }),
        })
    }
}

#[async_trait]
impl TransportGateway for SseTransport {
    async fn open(
        &self,
        address: &Url,
        headers: &HeaderMap,
        timeout: Option<Duration>,
    ) -> Result<Connection> {
        tracing::debug!(
            url = %address,
            timeout_ms = ?timeout.map(|t| t.as_millis()),
            "opening SSE connection"
        );

        let connect = self.connect(address, headers);
        match timeout {
            Some(limit) => tokio::time::timeout(limit, connect).await.map_err(|_| {
                McpError::ConnectTimeout {
                    address: address.to_string(),
                    timeout: limit,
                }
            })?,
            None => connect.await,
        }
    }
}

/// Read events until the server announces where to POST messages.
async fn wait_for_endpoint<S, E>(events: &mut S, address: &Url) -> Result<Url>
where
    S: Stream<Item = std::result::Result<Event, E>> + Unpin,
    E: Display,
{
    while let Some(event) = events.next().await {
        let event = event.map_err(|e| McpError::connection(address, e))?;
        if event.event != ENDPOINT_EVENT {
            tracing::debug!(event = %event.event, "skipping SSE event before endpoint");
            continue;
        }

        let endpoint = address.join(event.data.trim())?;
        if endpoint.origin() != address.origin() {
            return Err(McpError::connection(
                address,
                format!("endpoint origin does not match connection origin: {}", endpoint),
            ));
        }
        return Ok(endpoint);
    }

    Err(McpError::connection(
        address,
        "stream ended before the endpoint event",
    ))
}

/// Forward `message` events to the session until either side goes away.
async fn pump_events<S, E>(mut events: S, to_session: mpsc::Sender<Result<JsonRpcMessage>>)
where
    S: Stream<Item = std::result::Result<Event, E>> + Unpin,
    E: Display,
{
    while let Some(event) = events.next().await {
        match event {
            Ok(event) if event.event == MESSAGE_EVENT || event.event.is_empty() => {
                let message = serde_json::from_str::<JsonRpcMessage>(&event.data);
                if let Err(e) = &message {
                    tracing::warn!(error = %e, data = %event.data, "undecodable SSE message");
                }
                if to_session.send(message.map_err(McpError::from)).await.is_err() {
                    return;
                }
            }
            Ok(event) => tracing::debug!(event = %event.event, "ignoring SSE event"),
            Err(e) => {
                let _ = to_session
                    .send(Err(McpError::transport(format!("SSE stream error: {}", e))))
                    .await;
                return;
            }
        }
    }
    tracing::debug!("SSE event stream ended");
    // The writer still holds a sender, so the channel alone would not tell the session.
    let _ = to_session.send(Err(McpError::ConnectionClosed)).await;
}

/// POST every outgoing message to the session endpoint.
///
/// A request that cannot be delivered is answered locally with an
/// internal-error response so its caller is not left waiting.
async fn post_messages(
    http: reqwest::Client,
    endpoint: Url,
    headers: HeaderMap,
    mut from_session: mpsc::Receiver<JsonRpcMessage>,
    to_session: mpsc::Sender<Result<JsonRpcMessage>>,
) {
    while let Some(message) = from_session.recv().await {
        let mut request = http.post(endpoint.clone()).json(&message);
        for (key, value) in &headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let outcome = match request.send().await {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => Err(format!("HTTP {}", resp.status())),
            Err(e) => Err(e.to_string()),
        };

        if let Err(reason) = outcome {
            tracing::warn!(endpoint = %endpoint, error = %reason, "failed to post MCP message");
            if let JsonRpcMessage::Request(req) = &message {
                let failure = JsonRpcResponse::failure(
                    req.id,
                    JsonRpcError::INTERNAL_ERROR,
                    format!("failed to deliver request: {}", reason),
                );
                if to_session.send(Ok(failure.into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Background tasks backing one SSE connection.
struct SseConnection {
    address: String,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

#[async_trait]
impl Resource for SseConnection {
    fn label(&self) -> &str {
        "sse connection"
    }

    async fn release(self: Box<Self>) -> Result<()> {
        let mut this = self;
        this.reader.abort();
        this.writer.abort();
        for task in [&mut this.reader, &mut this.writer] {
            if let Err(e) = task.await {
                if e.is_panic() {
                    return Err(McpError::cleanup(
                        "sse connection",
                        format!("background task for {} panicked", this.address),
                    ));
                }
            }
        }
        tracing::debug!(url = %this.address, "SSE connection closed");
        Ok(())
    }
}

impl Drop for SseConnection {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}
