//! Transport Session
//!
//! Client side of the link: connect, authenticate, then multiplex any number
//! of concurrent calls over one connection.
//!
//! # Lifecycle
//! `Unauthenticated → Authenticated → Closed`. No request is sent before the
//! auth handshake succeeds. When the transport drops an established link the
//! session falls back to `Unauthenticated` and the next call reconnects.
//!
//! # Correlation
//! Each request gets a fresh id from a monotonically increasing counter. A
//! background reader routes every response to the waiter registered under its
//! id, so responses may arrive in any order. When the link closes, every
//! waiter still pending is failed with a connection error.
//!
//! # Reconnect
//! Connecting makes up to `retry_attempts` total attempts with exponential
//! backoff between them. Authentication failures are never retried.

pub mod backoff;
pub mod transport;

pub use backoff::{BackoffPolicy, Sleeper, TokioSleeper};
pub use transport::{Link, Transport, WsTransport};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::capability::Operation;
use crate::engine::{DatabaseStatus, SubscriptionSummary};
use crate::error::{AnalyticsError, Result};
use crate::protocol::{AuthRequest, AuthResponse, Request, Response};

/// Session tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Bound on connect + handshake, and on each call's wait
    pub timeout: Duration,

    /// Total connect attempts, including the first
    pub retry_attempts: u32,

    /// Keep-alive period for transports that support it
    pub ping_interval: Duration,

    /// First backoff delay; doubles per failed attempt
    pub backoff_base: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry_attempts: 3,
            ping_interval: Duration::from_secs(20),
            backoff_base: Duration::from_millis(500),
        }
    }
}

impl SessionOptions {
    #[must_use]
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.backoff_base, self.retry_attempts.max(1))
    }
}

/// Authentication state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Closed,
}

type Waiter = oneshot::Sender<Result<Response>>;
type Pending = Arc<Mutex<HashMap<u64, Waiter>>>;

fn lock(pending: &Pending) -> MutexGuard<'_, HashMap<u64, Waiter>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fail every waiter still registered
fn fail_all(pending: &Pending, reason: &str) {
    for (_, waiter) in lock(pending).drain() {
        let _ = waiter.send(Err(AnalyticsError::connection(reason)));
    }
}

/// One authenticated link plus its response reader
struct Connection {
    outbound: mpsc::UnboundedSender<String>,
    pending: Pending,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl Connection {
    fn start(link: Link) -> Self {
        let pending = Pending::default();
        let alive = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(read_responses(link.inbound, Arc::clone(&pending), Arc::clone(&alive)));
        Self { outbound: link.outbound, pending, alive, reader }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        self.reader.abort();
        fail_all(&self.pending, "session closed");
    }
}

/// Route incoming responses to their waiters until the link ends
async fn read_responses(
    mut inbound: mpsc::UnboundedReceiver<String>,
    pending: Pending,
    alive: Arc<AtomicBool>,
) {
    while let Some(frame) = inbound.recv().await {
        let (id, parsed) = decode_response(&frame);

        let waiter = match id {
            Some(id) => lock(&pending).remove(&id),
            None => sole_waiter(&pending),
        };

        match (waiter, parsed) {
            (Some(waiter), Ok(response)) => {
                let _ = waiter.send(Ok(response));
            }
            (Some(waiter), Err(e)) => {
                let _ = waiter.send(Err(AnalyticsError::protocol(format!("Malformed response: {e}"))));
            }
            (None, _) => tracing::warn!(?id, "dropping response that matches no pending request"),
        }
    }

    alive.store(false, Ordering::SeqCst);
    fail_all(&pending, "transport closed while awaiting response");
    tracing::info!("session transport closed");
}

/// Recover the id before the payload, so a malformed payload still reaches its caller
fn decode_response(frame: &str) -> (Option<u64>, serde_json::Result<Response>) {
    match serde_json::from_str::<Value>(frame) {
        Ok(value) => {
            let id = value.get("id").and_then(Value::as_u64);
            (id, serde_json::from_value(value))
        }
        Err(e) => (None, Err(e)),
    }
}

/// A response without a usable id can only be attributed when one call is in flight
fn sole_waiter(pending: &Pending) -> Option<Waiter> {
    let mut map = lock(pending);
    if map.len() != 1 {
        return None;
    }
    let id = map.keys().next().copied()?;
    map.remove(&id)
}

/// Client session over a [`Transport`]
pub struct Session<T, S = TokioSleeper> {
    transport: T,
    sleeper: S,
    endpoint: String,

    /// WARNING: Sensitive data, do not log
    api_key: String,

    options: SessionOptions,
    next_id: AtomicU64,
    closed: AtomicBool,
    connection: tokio::sync::Mutex<Option<Connection>>,
}

impl<T: Transport> Session<T, TokioSleeper> {
    /// Unconnected session; nothing is opened until [`Session::connect`] or the first call
    pub fn new(transport: T, endpoint: impl Into<String>, api_key: impl Into<String>, options: SessionOptions) -> Self {
        Self {
            transport,
            sleeper: TokioSleeper,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            options,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            connection: tokio::sync::Mutex::new(None),
        }
    }

    /// New session, connected and authenticated
    pub async fn establish(
        transport: T,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        options: SessionOptions,
    ) -> Result<Self> {
        let session = Self::new(transport, endpoint, api_key, options);
        session.connect().await?;
        Ok(session)
    }
}

impl<T: Transport, S: Sleeper> Session<T, S> {
    /// Replace the backoff sleeper
    pub fn with_sleeper<S2: Sleeper>(self, sleeper: S2) -> Session<T, S2> {
        Session {
            transport: self.transport,
            sleeper,
            endpoint: self.endpoint,
            api_key: self.api_key,
            options: self.options,
            next_id: self.next_id,
            closed: self.closed,
            connection: self.connection,
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[must_use]
    pub const fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub async fn state(&self) -> SessionState {
        if self.closed.load(Ordering::SeqCst) {
            return SessionState::Closed;
        }
        match self.connection.lock().await.as_ref() {
            Some(conn) if conn.is_alive() => SessionState::Authenticated,
            _ => SessionState::Unauthenticated,
        }
    }

    /// Connect and authenticate, replacing any existing link
    pub async fn connect(&self) -> Result<()> {
        self.ensure_open()?;
        let mut slot = self.connection.lock().await;
        self.reconnect(&mut slot).await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AnalyticsError::connection("session closed"));
        }
        Ok(())
    }

    async fn reconnect(&self, slot: &mut Option<Connection>) -> Result<()> {
        drop(slot.take());

        let policy = self.options.backoff();
        let mut last_error = None;

        for attempt in 0..policy.max_attempts {
            match self.connect_once().await {
                Ok(conn) => {
                    tracing::info!(endpoint = %self.endpoint, attempt = attempt + 1, "session authenticated");
                    *slot = Some(conn);
                    return Ok(());
                }
                Err(err) if !err.is_retryable() => {
                    tracing::error!(endpoint = %self.endpoint, error = %err, "connect failed");
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(
                        endpoint = %self.endpoint,
                        attempt = attempt + 1,
                        max_attempts = policy.max_attempts,
                        error = %err,
                        "connect attempt failed"
                    );
                    last_error = Some(err);
                    if attempt + 1 < policy.max_attempts {
                        self.sleeper.sleep(policy.delay(attempt)).await;
                    }
                }
            }
        }

        let last = last_error.map_or_else(String::new, |e| format!(" (last error: {})", e.detail()));
        Err(AnalyticsError::connection(format!(
            "exhausted retries after {} attempts{last}",
            policy.max_attempts
        )))
    }

    /// Open the transport and run the auth handshake, bounded by the timeout
    async fn connect_once(&self) -> Result<Connection> {
        let handshake = async {
            let mut link = self.transport.open(&self.endpoint, self.options.ping_interval).await?;

            let auth = serde_json::to_string(&AuthRequest::new(self.api_key.as_str()))?;
            link.outbound
                .send(auth)
                .map_err(|_| AnalyticsError::connection("transport closed during handshake"))?;

            let ack = link
                .inbound
                .recv()
                .await
                .ok_or_else(|| AnalyticsError::connection("transport closed during handshake"))?;
            serde_json::from_str::<AuthResponse>(&ack)?.into_result()?;
            Ok::<_, AnalyticsError>(link)
        };

        let link = timeout(self.options.timeout, handshake).await.map_err(|_| {
            AnalyticsError::connection(format!("handshake timed out after {:?}", self.options.timeout))
        })??;

        Ok(Connection::start(link))
    }

    /// Register a waiter and send a frame, reconnecting when the link is gone
    async fn submit(&self, id: u64, frame: String) -> Result<(oneshot::Receiver<Result<Response>>, Pending)> {
        let mut slot = self.connection.lock().await;
        self.ensure_open()?;

        for _ in 0..2 {
            if !slot.as_ref().is_some_and(Connection::is_alive) {
                self.reconnect(&mut slot).await?;
            }
            let Some(conn) = slot.as_ref() else {
                continue;
            };

            let (tx, rx) = oneshot::channel();
            lock(&conn.pending).insert(id, tx);

            // a reader that stops after this check drains the waiter registered above
            if conn.is_alive() && conn.outbound.send(frame.clone()).is_ok() {
                return Ok((rx, Arc::clone(&conn.pending)));
            }

            lock(&conn.pending).remove(&id);
            conn.alive.store(false, Ordering::SeqCst);
        }

        Err(AnalyticsError::connection("transport closed before the request could be sent"))
    }

    async fn request(&self, request: Request) -> Result<Value> {
        let id = request.id.as_u64().unwrap_or_default();
        let frame = serde_json::to_string(&request)?;
        let (rx, pending) = self.submit(id, frame).await?;

        match timeout(self.options.timeout, rx).await {
            Ok(Ok(outcome)) => outcome?.into_result(),
            Ok(Err(_)) => Err(AnalyticsError::connection("transport closed while awaiting response")),
            Err(_) => {
                lock(&pending).remove(&id);
                Err(AnalyticsError::connection(format!(
                    "no response to request {id} within {:?}",
                    self.options.timeout
                )))
            }
        }
    }

    fn fresh_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Invoke one named operation
    pub async fn call(&self, name: &str, arguments: Map<String, Value>) -> Result<Value> {
        let request = Request::call_tool(self.fresh_id(), name, arguments);
        tracing::debug!(id = %request.id, name, "calling");
        self.request(request).await
    }

    /// Fetch the published catalog
    pub async fn list_tools(&self) -> Result<Vec<Value>> {
        match self.request(Request::list_tools(self.fresh_id())).await? {
            Value::Array(tools) => Ok(tools),
            other => Err(AnalyticsError::protocol(format!("tools/list returned a non-list result: {other}"))),
        }
    }

    /// Ask a free-text question
    pub async fn natural_language_query(&self, query: &str) -> Result<Value> {
        let mut arguments = Map::new();
        arguments.insert("query".to_string(), Value::from(query));
        self.call(Operation::NaturalLanguageQuery.name(), arguments).await
    }

    pub async fn database_status(&self) -> Result<DatabaseStatus> {
        let value = self.call(Operation::DatabaseStatus.name(), Map::new()).await?;
        typed(value)
    }

    pub async fn subscription_summary(&self, days: u32) -> Result<SubscriptionSummary> {
        let mut arguments = Map::new();
        arguments.insert("days".to_string(), Value::from(days));
        let value = self.call(Operation::SubscriptionSummary.name(), arguments).await?;
        typed(value)
    }

    /// Close the link; later calls fail. Safe to call more than once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.connection.lock().await.take().is_some() {
            tracing::info!(endpoint = %self.endpoint, "session closed");
        }
    }
}

fn typed<R: DeserializeOwned>(value: Value) -> Result<R> {
    serde_json::from_value(value)
        .map_err(|e| AnalyticsError::protocol(format!("Unexpected result shape: {e}")))
}
