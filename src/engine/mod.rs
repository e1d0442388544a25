//! Analytics Backend Trait and Result Types
//!
//! This module defines the boundary between the server core and the data store.
//! The core never inspects backend internals: it calls the trait methods below
//! and receives either a typed result or an [`AnalyticsError`].
//!
//! # Composite Operations
//! `subscription_summary` and `analytics_by_date_range` have provided
//! implementations that run their two halves concurrently and join them. Both
//! halves always run to completion, and a failure in either is reported with
//! both sub-errors attached.
//!
//! # Engines
//! - [`mysql`] - pooled `mysql_async` implementation (feature `mysql`)

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::future::Future;

use crate::error::{AnalyticsError, Result};

#[cfg(feature = "mysql")]
pub mod mysql;

/// Inclusive date window a metric was computed over
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: String,
    pub end: String,
}

impl DateWindow {
    /// Window from two dates, rendered `YYYY-MM-DD`
    #[must_use]
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start: start.to_string(), end: end.to_string() }
    }

    /// Window ending today and starting `days` days ago
    #[must_use]
    pub fn last_days(today: NaiveDate, days: u32) -> Self {
        Self::new(today - chrono::Duration::days(i64::from(days)), today)
    }
}

/// Database health and basic statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseStatus {
    /// `connected` once the probe query succeeded
    pub status: String,

    /// Name of the connected database
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// Row count of the subscription table, when it exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_subscriptions: Option<u64>,

    /// Row count of the payment table, when it exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_payments: Option<u64>,
}

/// Subscription counts over a window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionStats {
    pub new_subscriptions: u64,
    pub active_subscriptions: u64,
    pub cancelled_subscriptions: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_days: Option<u32>,

    pub date_range: DateWindow,

    /// Which date column the backend matched on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_column_used: Option<String>,
}

/// Payment counts and revenue over a window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentStats {
    /// Percentage with two decimals, e.g. `"87.50%"`
    pub success_rate: String,
    pub total_payments: u64,
    pub successful_payments: u64,

    /// Revenue of successful payments, e.g. `"$1234.00"`
    pub total_revenue: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_days: Option<u32>,

    pub date_range: DateWindow,

    /// Which amount column the backend summed, `N/A` when none exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_column_used: Option<String>,
}

impl PaymentStats {
    /// Format a success percentage the way every backend reports it
    #[must_use]
    pub fn format_rate(successful: u64, total: u64) -> String {
        let rate = if total > 0 { successful as f64 / total as f64 * 100.0 } else { 0.0 };
        format!("{rate:.2}%")
    }

    /// Format a revenue amount the way every backend reports it
    #[must_use]
    pub fn format_revenue(amount: f64) -> String {
        format!("${amount:.2}")
    }
}

/// Combined subscription and payment metrics for the last N days
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSummary {
    pub period_days: u32,
    pub subscriptions: SubscriptionStats,
    pub payments: PaymentStats,
}

/// Combined subscription and payment metrics for an explicit date range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeAnalytics {
    pub start_date: String,
    pub end_date: String,
    pub subscriptions: SubscriptionStats,
    pub payments: PaymentStats,
}

/// Data backend trait
///
/// Every method is independent and may be called concurrently from many
/// connections; implementations share their resources (e.g. a connection pool)
/// internally. Arguments have already been validated against the capability
/// catalog when these are called.
pub trait AnalyticsBackend: Send + Sync + 'static {
    /// Probe connectivity and report basic statistics
    fn database_status(&self) -> impl Future<Output = Result<DatabaseStatus>> + Send;

    /// Subscription counts for the last `days` days
    fn subscriptions_in_last_days(
        &self,
        days: u32,
    ) -> impl Future<Output = Result<SubscriptionStats>> + Send;

    /// Payment success rate for the last `days` days
    fn payment_success_rate_in_last_days(
        &self,
        days: u32,
    ) -> impl Future<Output = Result<PaymentStats>> + Send;

    /// Subscription counts for an inclusive date range
    fn subscriptions_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> impl Future<Output = Result<SubscriptionStats>> + Send;

    /// Payment statistics for an inclusive date range
    fn payments_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> impl Future<Output = Result<PaymentStats>> + Send;

    /// Subscriptions and payments for the last `days` days, fetched concurrently
    fn subscription_summary(
        &self,
        days: u32,
    ) -> impl Future<Output = Result<SubscriptionSummary>> + Send {
        async move {
            let (subscriptions, payments) = tokio::join!(
                self.subscriptions_in_last_days(days),
                self.payment_success_rate_in_last_days(days)
            );
            let (subscriptions, payments) =
                join_halves("Failed to fetch full summary", subscriptions, payments)?;
            Ok(SubscriptionSummary { period_days: days, subscriptions, payments })
        }
    }

    /// Subscriptions and payments for a date range, fetched concurrently
    fn analytics_by_date_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> impl Future<Output = Result<RangeAnalytics>> + Send {
        async move {
            let (subscriptions, payments) =
                tokio::join!(self.subscriptions_between(start, end), self.payments_between(start, end));
            let (subscriptions, payments) =
                join_halves("Failed to fetch range data", subscriptions, payments)?;
            Ok(RangeAnalytics {
                start_date: start.to_string(),
                end_date: end.to_string(),
                subscriptions,
                payments,
            })
        }
    }
}

/// Combine the two halves of a composite operation
///
/// Both outcomes are inspected so that a double failure reports both causes.
fn join_halves(
    context: &str,
    subscriptions: Result<SubscriptionStats>,
    payments: Result<PaymentStats>,
) -> Result<(SubscriptionStats, PaymentStats)> {
    match (subscriptions, payments) {
        (Ok(s), Ok(p)) => Ok((s, p)),
        (s, p) => {
            let describe = |err: Option<AnalyticsError>| {
                err.map_or_else(|| "ok".to_string(), |e| e.detail().to_string())
            };
            Err(AnalyticsError::backend(format!(
                "{context} (subscriptions: {}; payments: {})",
                describe(s.err()),
                describe(p.err())
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn subs(window: DateWindow) -> SubscriptionStats {
        SubscriptionStats {
            new_subscriptions: 10,
            active_subscriptions: 7,
            cancelled_subscriptions: 2,
            period_days: None,
            date_range: window,
            date_column_used: None,
        }
    }

    fn pays(window: DateWindow) -> PaymentStats {
        PaymentStats {
            success_rate: PaymentStats::format_rate(3, 4),
            total_payments: 4,
            successful_payments: 3,
            total_revenue: PaymentStats::format_revenue(29.97),
            period_days: None,
            date_range: window,
            amount_column_used: None,
        }
    }

    /// Backend whose payment half can be made to fail
    struct HalfBackend {
        fail_payments: bool,
        calls: AtomicUsize,
    }

    impl AnalyticsBackend for HalfBackend {
        async fn database_status(&self) -> Result<DatabaseStatus> {
            Ok(DatabaseStatus {
                status: "connected".into(),
                database: None,
                total_subscriptions: None,
                total_payments: None,
            })
        }

        async fn subscriptions_in_last_days(&self, days: u32) -> Result<SubscriptionStats> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(subs(DateWindow::last_days(date("2024-03-31"), days)))
        }

        async fn payment_success_rate_in_last_days(&self, days: u32) -> Result<PaymentStats> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_payments {
                return Err(AnalyticsError::backend("payments table missing"));
            }
            Ok(pays(DateWindow::last_days(date("2024-03-31"), days)))
        }

        async fn subscriptions_between(&self, start: NaiveDate, end: NaiveDate) -> Result<SubscriptionStats> {
            Ok(subs(DateWindow::new(start, end)))
        }

        async fn payments_between(&self, start: NaiveDate, end: NaiveDate) -> Result<PaymentStats> {
            Ok(pays(DateWindow::new(start, end)))
        }
    }

    #[test]
    fn test_rate_and_revenue_formatting() {
        assert_eq!(PaymentStats::format_rate(3, 4), "75.00%");
        assert_eq!(PaymentStats::format_rate(0, 0), "0.00%");
        assert_eq!(PaymentStats::format_revenue(12.5), "$12.50");
    }

    #[test]
    fn test_last_days_window() {
        let window = DateWindow::last_days(date("2024-03-31"), 7);
        assert_eq!(window.start, "2024-03-24");
        assert_eq!(window.end, "2024-03-31");
    }

    #[tokio::test]
    async fn test_summary_joins_both_halves() {
        let backend = HalfBackend { fail_payments: false, calls: AtomicUsize::new(0) };
        let summary = backend.subscription_summary(7).await.unwrap();
        assert_eq!(summary.period_days, 7);
        assert_eq!(summary.subscriptions.new_subscriptions, 10);
        assert_eq!(summary.payments.success_rate, "75.00%");
    }

    #[tokio::test]
    async fn test_summary_failure_runs_both_and_names_cause() {
        let backend = HalfBackend { fail_payments: true, calls: AtomicUsize::new(0) };
        let err = backend.subscription_summary(30).await.unwrap_err();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert!(matches!(err, AnalyticsError::Backend(_)));
        assert!(err.detail().contains("Failed to fetch full summary"));
        assert!(err.detail().contains("payments table missing"));
        assert!(err.detail().contains("subscriptions: ok"));
    }

    #[tokio::test]
    async fn test_range_analytics_carries_dates() {
        let backend = HalfBackend { fail_payments: false, calls: AtomicUsize::new(0) };
        let range = backend
            .analytics_by_date_range(date("2024-01-01"), date("2024-01-31"))
            .await
            .unwrap();
        assert_eq!(range.start_date, "2024-01-01");
        assert_eq!(range.end_date, "2024-01-31");
        assert_eq!(range.payments.date_range.end, "2024-01-31");
    }
}
