//! Subpulse - Subscription Analytics over an Authenticated WebSocket Link
//!
//! Subpulse exposes a small catalog of analytics operations (database health,
//! subscription counts, payment success rates, summaries) to remote clients
//! over a persistent, authenticated WebSocket session, and answers free-text
//! questions by routing them to one or more of those operations.
//!
//! # Core Principles
//! - Deterministic routing (identical text → identical calls, no language model)
//! - Partial failure stays partial (one failed call never hides its siblings)
//! - Correlation by id (concurrent calls on one link never get mixed up)
//! - Explicit errors with stable codes on the wire and in CLI output
//!
//! # Architecture
//! The server side is a connection handler in front of a capability
//! dispatcher, which calls a pluggable data backend. Free-text queries pass
//! through the router and the aggregator first. The client side is a session
//! that multiplexes calls over one link and reconnects with backoff.
//!
//! # Module Organization
//! - [`error`] - Error types and stable codes
//! - [`protocol`] - Wire message types
//! - [`engine`] - Data backend trait, result types, MySQL backend
//! - [`capability`] - Operation catalog, argument validation, dispatcher
//! - [`router`] - Free text → routed calls
//! - [`aggregate`] - Concurrent execution and merging of routed calls
//! - [`render`] - Plain-text rendering of results
//! - [`server`] - WebSocket listener and per-connection handler
//! - [`session`] - Client session, transports, backoff
//! - [`config`] - Environment and profile configuration
//! - [`output`] - CLI JSON envelopes

pub mod aggregate;
pub mod capability;
pub mod config;
pub mod engine;
pub mod error;
pub mod output;
pub mod protocol;
pub mod render;
pub mod router;
pub mod server;
pub mod session;

// Re-export commonly used types for convenience
pub use aggregate::{CallOutcome, SECTION_DELIMITER};
pub use capability::{catalog, Catalog, Dispatcher, Invocation, Operation, OperationDescriptor};
pub use config::{ClientConfig, ClientProfile, CredentialSet, DatabaseConfig, ServerConfig};
pub use engine::{
    AnalyticsBackend, DatabaseStatus, DateWindow, PaymentStats, RangeAnalytics, SubscriptionStats,
    SubscriptionSummary,
};
pub use error::{AnalyticsError, Result};
pub use output::{ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope};
pub use protocol::{AuthRequest, AuthResponse, Request, Response};
pub use router::{route, RoutedCall};
pub use server::{execute_tool, Server};
pub use session::{BackoffPolicy, Session, SessionOptions, SessionState, Sleeper, Transport, WsTransport};
