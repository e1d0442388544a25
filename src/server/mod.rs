//! Server Connection Handler
//!
//! Accepts WebSocket connections and runs one handler task per connection.
//!
//! # Connection Phases
//! 1. Awaiting auth: exactly one frame is read, bounded by the auth timeout,
//!    and checked against the [`CredentialSet`]. A bad or missing key gets
//!    `{"error": "Authentication failed"}` and the connection is closed.
//! 2. Serving: requests are read continuously. Each one is dispatched as a
//!    future polled alongside the read loop, and responses are written back
//!    in request order. A malformed frame gets an error response and the
//!    connection stays open.
//! 3. Closed: on disconnect or transport error. Nothing is written afterwards.

use futures_util::stream::FuturesOrdered;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{Map, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};

use crate::aggregate;
use crate::capability::{catalog, Dispatcher, Invocation};
use crate::config::CredentialSet;
use crate::engine::AnalyticsBackend;
use crate::error::{AnalyticsError, Result};
use crate::protocol::{AuthRequest, AuthResponse, Response, METHOD_CALL_TOOL, METHOD_LIST_TOOLS};

/// Default limit for the auth frame
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(30);

const AUTH_REJECTED: &str = "Authentication failed";

/// Run a tool the way a `tools/call` request does
///
/// Free-text queries go through the router and aggregator; every other
/// operation goes straight to the dispatcher.
pub async fn execute_tool<B: AnalyticsBackend>(
    dispatcher: &Dispatcher<B>,
    name: &str,
    arguments: &Map<String, Value>,
) -> Result<Value> {
    match catalog().lookup(name)?.validate(arguments)? {
        Invocation::NaturalLanguageQuery { query } => aggregate::answer(dispatcher, &query).await,
        invocation => dispatcher.invoke(invocation).await,
    }
}

/// Analytics server over a shared backend
pub struct Server<B> {
    dispatcher: Dispatcher<B>,
    credentials: Arc<CredentialSet>,
    auth_timeout: Duration,
}

impl<B> Clone for Server<B> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
            credentials: Arc::clone(&self.credentials),
            auth_timeout: self.auth_timeout,
        }
    }
}

impl<B: AnalyticsBackend> Server<B> {
    pub fn new(backend: Arc<B>, credentials: CredentialSet) -> Self {
        Self {
            dispatcher: Dispatcher::new(backend),
            credentials: Arc::new(credentials),
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_auth_timeout(mut self, auth_timeout: Duration) -> Self {
        self.auth_timeout = auth_timeout;
        self
    }

    /// Accept connections forever, one task each
    pub async fn serve(self, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, credentials = self.credentials.len(), "analytics server listening");
        }

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let server = self.clone();
                    tokio::spawn(async move {
                        server.handle_connection(stream, peer).await;
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    async fn handle_connection(self, stream: TcpStream, peer: SocketAddr) {
        tracing::info!(%peer, "new connection");

        let mut ws = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                tracing::error!(%peer, "WebSocket handshake failed: {}", e);
                return;
            }
        };

        match self.authenticate(&mut ws).await {
            Ok(()) => {
                tracing::info!(%peer, "client authenticated");
                if send_json(&mut ws, &AuthResponse::authenticated()).await.is_ok() {
                    self.serve_requests(ws, peer).await;
                }
            }
            Err(reason) => {
                tracing::warn!(%peer, %reason, "authentication rejected");
                let _ = send_json(&mut ws, &AuthResponse::rejected(AUTH_REJECTED)).await;
                let _ = ws.close(None).await;
            }
        }

        tracing::info!(%peer, "connection closed");
    }

    /// Read and check the first frame
    async fn authenticate(&self, ws: &mut WebSocketStream<TcpStream>) -> std::result::Result<(), String> {
        let first = timeout(self.auth_timeout, next_text(ws))
            .await
            .map_err(|_| format!("no credentials within {:?}", self.auth_timeout))?
            .ok_or_else(|| "connection closed before authenticating".to_string())?;

        let request: AuthRequest =
            serde_json::from_str(&first).map_err(|e| format!("malformed auth frame: {e}"))?;
        tracing::debug!(client_type = ?request.client_type, version = ?request.version, "auth frame");

        if self.credentials.verify(&request.api_key) {
            Ok(())
        } else {
            Err("invalid API key".to_string())
        }
    }

    async fn serve_requests(&self, ws: WebSocketStream<TcpStream>, peer: SocketAddr) {
        let (mut sink, mut stream) = ws.split();
        let mut in_flight = FuturesOrdered::new();

        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => in_flight.push_back(self.respond(text)),
                    Some(Ok(Message::Binary(bytes))) => {
                        in_flight.push_back(self.respond(String::from_utf8_lossy(&bytes).into_owned()));
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!(%peer, "WebSocket error: {}", e);
                        break;
                    }
                },
                Some(response) = in_flight.next(), if !in_flight.is_empty() => {
                    if sink.send(Message::Text(response)).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Handle one request frame, producing the encoded response
    async fn respond(&self, text: String) -> String {
        let response = self.handle_frame(&text).await;
        serde_json::to_string(&response).unwrap_or_else(|e| {
            tracing::error!("Could not encode response: {}", e);
            r#"{"id":null,"error":"Could not encode response","code":"PROTOCOL_ERROR"}"#.to_string()
        })
    }

    async fn handle_frame(&self, text: &str) -> Response {
        let Ok(frame) = serde_json::from_str::<Value>(text) else {
            tracing::debug!("rejecting frame that is not JSON");
            return Response::failure(Value::Null, &AnalyticsError::protocol("Invalid JSON"));
        };

        let id = frame.get("id").cloned().unwrap_or(Value::Null);
        Response::from_outcome(id, self.handle_request(&frame).await)
    }

    async fn handle_request(&self, frame: &Value) -> Result<Value> {
        match frame.get("method").and_then(Value::as_str) {
            Some(METHOD_LIST_TOOLS) => Ok(catalog().to_json()),
            Some(METHOD_CALL_TOOL) => {
                let params = frame
                    .get("params")
                    .and_then(Value::as_object)
                    .ok_or_else(|| AnalyticsError::protocol("Missing params"))?;
                let name = params
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| AnalyticsError::protocol("Missing tool name"))?;
                let arguments = match params.get("arguments") {
                    None | Some(Value::Null) => Map::new(),
                    Some(Value::Object(arguments)) => arguments.clone(),
                    Some(_) => return Err(AnalyticsError::validation("arguments must be an object")),
                };
                execute_tool(&self.dispatcher, name, &arguments).await
            }
            _ => Err(AnalyticsError::protocol("Unknown method")),
        }
    }
}

/// Next text frame, answering pings until one arrives
async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> Option<String> {
    while let Some(message) = ws.next().await {
        match message {
            Ok(Message::Text(text)) => return Some(text),
            Ok(Message::Binary(bytes)) => return Some(String::from_utf8_lossy(&bytes).into_owned()),
            Ok(Message::Ping(data)) => {
                let _ = ws.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
    None
}

async fn send_json<T: Serialize>(ws: &mut WebSocketStream<TcpStream>, message: &T) -> Result<()> {
    let text = serde_json::to_string(message)?;
    ws.send(Message::Text(text))
        .await
        .map_err(|e| AnalyticsError::connection(e.to_string()))
}
