//! Capability Dispatcher
//!
//! Maps a validated [`Invocation`] onto the matching backend method. Each
//! backend call is spawned onto the runtime so a slow query never holds up the
//! connection that issued it, and a panicking call is reported as a backend
//! error for that one operation.

use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::{catalog, Catalog, Invocation, Operation};
use crate::engine::AnalyticsBackend;
use crate::error::{AnalyticsError, Result};

/// Dispatches named operations to a shared backend
pub struct Dispatcher<B> {
    backend: Arc<B>,
}

impl<B> Clone for Dispatcher<B> {
    fn clone(&self) -> Self {
        Self { backend: Arc::clone(&self.backend) }
    }
}

impl<B: AnalyticsBackend> Dispatcher<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// The catalog this dispatcher validates against
    #[must_use]
    pub fn catalog(&self) -> &'static Catalog {
        catalog()
    }

    /// Validate `arguments` for the named operation and run it
    pub async fn call(&self, name: &str, arguments: &Map<String, Value>) -> Result<Value> {
        let invocation = catalog().lookup(name)?.validate(arguments)?;
        self.invoke(invocation).await
    }

    /// Run an already validated invocation on its own task
    pub async fn invoke(&self, invocation: Invocation) -> Result<Value> {
        let operation = invocation.operation();
        tracing::debug!(%operation, ?invocation, "dispatching");

        let backend = Arc::clone(&self.backend);
        let handle = tokio::spawn(async move { run(backend.as_ref(), invocation).await });

        match handle.await {
            Ok(outcome) => {
                if let Err(err) = &outcome {
                    tracing::warn!(%operation, error = %err, "operation failed");
                }
                outcome
            }
            Err(join_err) => {
                tracing::error!(%operation, error = %join_err, "backend task aborted");
                Err(AnalyticsError::backend(format!("{operation} did not complete: {join_err}")))
            }
        }
    }
}

async fn run<B: AnalyticsBackend>(backend: &B, invocation: Invocation) -> Result<Value> {
    match invocation {
        Invocation::DatabaseStatus => shape(backend.database_status().await?),
        Invocation::SubscriptionsInLastDays { days } => {
            shape(backend.subscriptions_in_last_days(days).await?)
        }
        Invocation::PaymentSuccessRateInLastDays { days } => {
            shape(backend.payment_success_rate_in_last_days(days).await?)
        }
        Invocation::SubscriptionSummary { days } => shape(backend.subscription_summary(days).await?),
        Invocation::AnalyticsByDateRange { start, end } => {
            shape(backend.analytics_by_date_range(start, end).await?)
        }
        Invocation::NaturalLanguageQuery { .. } => Err(AnalyticsError::protocol(format!(
            "{} is answered by the query router, not the backend",
            Operation::NaturalLanguageQuery
        ))),
    }
}

/// Turn a typed backend result into the JSON value sent to clients
fn shape<T: Serialize>(result: T) -> Result<Value> {
    serde_json::to_value(result)
        .map_err(|e| AnalyticsError::backend(format!("Could not encode backend result: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DatabaseStatus, DateWindow, PaymentStats, SubscriptionStats};
    use chrono::NaiveDate;
    use serde_json::json;

    struct FixedBackend;

    fn window() -> DateWindow {
        DateWindow { start: "2024-01-01".into(), end: "2024-01-31".into() }
    }

    impl AnalyticsBackend for FixedBackend {
        async fn database_status(&self) -> Result<DatabaseStatus> {
            Ok(DatabaseStatus {
                status: "connected".into(),
                database: Some("analytics".into()),
                total_subscriptions: Some(120),
                total_payments: Some(340),
            })
        }

        async fn subscriptions_in_last_days(&self, days: u32) -> Result<SubscriptionStats> {
            Ok(SubscriptionStats {
                new_subscriptions: u64::from(days),
                active_subscriptions: 1,
                cancelled_subscriptions: 0,
                period_days: Some(days),
                date_range: window(),
                date_column_used: None,
            })
        }

        async fn payment_success_rate_in_last_days(&self, _days: u32) -> Result<PaymentStats> {
            panic!("payment query exploded");
        }

        async fn subscriptions_between(&self, _s: NaiveDate, _e: NaiveDate) -> Result<SubscriptionStats> {
            Err(AnalyticsError::backend("range not supported"))
        }

        async fn payments_between(&self, _s: NaiveDate, _e: NaiveDate) -> Result<PaymentStats> {
            Err(AnalyticsError::backend("range not supported"))
        }
    }

    fn dispatcher() -> Dispatcher<FixedBackend> {
        Dispatcher::new(Arc::new(FixedBackend))
    }

    #[tokio::test]
    async fn test_call_shapes_result() {
        let value = dispatcher()
            .call("get_subscriptions_in_last_days", json!({"days": 7}).as_object().unwrap())
            .await
            .unwrap();
        assert_eq!(value["new_subscriptions"], 7);
        assert_eq!(value["period_days"], 7);
    }

    #[tokio::test]
    async fn test_validation_happens_before_backend() {
        let err = dispatcher()
            .call("get_subscriptions_in_last_days", json!({"days": 0}).as_object().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::Validation(_)));
    }

    #[tokio::test]
    async fn test_panicking_backend_becomes_backend_error() {
        let err = dispatcher()
            .call("get_payment_success_rate_in_last_days", json!({"days": 7}).as_object().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::Backend(_)));
        assert!(err.detail().contains("get_payment_success_rate_in_last_days"));
    }

    #[tokio::test]
    async fn test_backend_error_passes_through() {
        let err = dispatcher()
            .call(
                "get_analytics_by_date_range",
                json!({"start_date": "2024-01-01", "end_date": "2024-01-31"}).as_object().unwrap(),
            )
            .await
            .unwrap_err();
        assert!(err.detail().contains("range not supported"));
    }

    #[tokio::test]
    async fn test_database_status_is_idempotent() {
        let d = dispatcher();
        let first = d.call("get_database_status", &Map::new()).await.unwrap();
        let second = d.call("get_database_status", &Map::new()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_natural_language_is_not_a_backend_call() {
        let err = dispatcher()
            .invoke(Invocation::NaturalLanguageQuery { query: "db".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::Protocol(_)));
    }
}
