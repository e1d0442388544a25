//! Aggregator
//!
//! Runs the calls produced by the router concurrently and merges their
//! outcomes. Each call fills its own slot, so one failure never cancels or
//! hides its siblings, and aggregation itself never fails as a whole.

use futures_util::future::join_all;
use serde_json::Value;

use crate::capability::Dispatcher;
use crate::engine::AnalyticsBackend;
use crate::error::Result;
use crate::render::render_outcome;
use crate::router::{route, RoutedCall};

/// Separator between sections of a composite answer
pub const SECTION_DELIMITER: &str = "\n\n---\n\n";

/// One routed call with its outcome
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome {
    pub call: RoutedCall,
    pub outcome: Result<Value>,
}

impl CallOutcome {
    /// Plain-text rendering of this slot
    #[must_use]
    pub fn render(&self) -> String {
        render_outcome(self.call.operation, &self.outcome)
    }
}

/// Run every call concurrently, returning outcomes in call order
pub async fn execute<B: AnalyticsBackend>(
    dispatcher: &Dispatcher<B>,
    calls: Vec<RoutedCall>,
) -> Vec<CallOutcome> {
    let pending: Vec<_> =
        calls.iter().map(|call| dispatcher.call(call.operation.name(), &call.arguments)).collect();
    let outcomes = join_all(pending).await;

    calls
        .into_iter()
        .zip(outcomes)
        .map(|(call, outcome)| CallOutcome { call, outcome })
        .collect()
}

/// Merge outcomes into the answer for `query`
///
/// A single outcome is returned as is. Several outcomes become one text
/// listing the query and every section in order, errors included.
pub fn merge(query: &str, mut outcomes: Vec<CallOutcome>) -> Result<Value> {
    if outcomes.len() == 1 {
        if let Some(only) = outcomes.pop() {
            return only.outcome;
        }
    }

    let sections: Vec<String> = outcomes.iter().map(CallOutcome::render).collect();
    Ok(Value::String(format!(
        "Combined analysis for: '{query}'\n\n{}",
        sections.join(SECTION_DELIMITER)
    )))
}

/// Route, execute and merge a natural-language query
pub async fn answer<B: AnalyticsBackend>(dispatcher: &Dispatcher<B>, query: &str) -> Result<Value> {
    let outcomes = execute(dispatcher, route(query)).await;
    let failed = outcomes.iter().filter(|o| o.outcome.is_err()).count();
    tracing::info!(query, calls = outcomes.len(), failed, "answered natural-language query");
    merge(query, outcomes)
}
