//! Plain-text rendering of operation outcomes
//!
//! Used for the sections of a composite natural-language answer. Values that
//! do not have the expected shape are shown as pretty-printed JSON rather than
//! dropped.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Write;

use crate::capability::Operation;
use crate::engine::{DatabaseStatus, PaymentStats, RangeAnalytics, SubscriptionStats, SubscriptionSummary};
use crate::error::{AnalyticsError, Result};

/// Render one outcome, success or error
#[must_use]
pub fn render_outcome(operation: Operation, outcome: &Result<Value>) -> String {
    match outcome {
        Ok(value) => render_value(operation, value),
        Err(err) => render_error(operation, err),
    }
}

/// Render an error slot
#[must_use]
pub fn render_error(operation: Operation, err: &AnalyticsError) -> String {
    format!("Error ({operation}): {err}")
}

/// Render a successful result of `operation`
#[must_use]
pub fn render_value(operation: Operation, value: &Value) -> String {
    let rendered = match operation {
        Operation::DatabaseStatus => typed(value).map(|s: DatabaseStatus| database_status(&s)),
        Operation::SubscriptionsInLastDays => {
            typed(value).map(|s: SubscriptionStats| subscriptions("Subscriptions", &s))
        }
        Operation::PaymentSuccessRateInLastDays => {
            typed(value).map(|p: PaymentStats| payments("Payments", &p))
        }
        Operation::SubscriptionSummary => typed(value).map(|s: SubscriptionSummary| {
            format!(
                "Summary for the last {} days\n\n{}\n\n{}",
                s.period_days,
                subscriptions("Subscriptions", &s.subscriptions),
                payments("Payments", &s.payments)
            )
        }),
        Operation::AnalyticsByDateRange => typed(value).map(|r: RangeAnalytics| {
            format!(
                "Analytics from {} to {}\n\n{}\n\n{}",
                r.start_date,
                r.end_date,
                subscriptions("Subscriptions", &r.subscriptions),
                payments("Payments", &r.payments)
            )
        }),
        Operation::NaturalLanguageQuery => value.as_str().map(str::to_string),
    };

    rendered.unwrap_or_else(|| {
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    })
}

fn typed<T: DeserializeOwned>(value: &Value) -> Option<T> {
    T::deserialize(value).ok()
}

fn database_status(status: &DatabaseStatus) -> String {
    let mut out = format!("Database status: {}", status.status);
    if let Some(name) = &status.database {
        let _ = write!(out, "\nDatabase: {name}");
    }
    if let Some(n) = status.total_subscriptions {
        let _ = write!(out, "\nTotal subscriptions: {n}");
    }
    if let Some(n) = status.total_payments {
        let _ = write!(out, "\nTotal payments: {n}");
    }
    out
}

fn heading(title: &str, period_days: Option<u32>, start: &str, end: &str) -> String {
    match period_days {
        Some(days) => format!("{title} (last {days} days, {start} to {end})"),
        None => format!("{title} ({start} to {end})"),
    }
}

fn subscriptions(title: &str, s: &SubscriptionStats) -> String {
    format!(
        "{}\nNew: {}\nActive: {}\nCancelled: {}",
        heading(title, s.period_days, &s.date_range.start, &s.date_range.end),
        s.new_subscriptions,
        s.active_subscriptions,
        s.cancelled_subscriptions
    )
}

fn payments(title: &str, p: &PaymentStats) -> String {
    format!(
        "{}\nSuccess rate: {}\nTotal payments: {}\nSuccessful payments: {}\nRevenue: {}",
        heading(title, p.period_days, &p.date_range.start, &p.date_range.end),
        p.success_rate,
        p.total_payments,
        p.successful_payments,
        p.total_revenue
    )
}
