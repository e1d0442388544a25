//! Query Router
//!
//! Turns one free-text question into an ordered list of [`RoutedCall`]s using
//! fixed keyword and pattern rules. The router is a pure function: the same
//! input always yields the same calls, and it never returns an empty list.
//!
//! # Rules
//! 1. Matching is case-insensitive; the original text is only kept for display.
//! 2. `compare` produces one summary call per mentioned period (ascending,
//!    deduplicated, `7` and `30` when none is mentioned).
//! 3. Otherwise ` and `, ` vs `, ` versus ` (first present, in that order)
//!    split the text and every segment is resolved on its own.
//! 4. A single segment picks exactly one operation by keyword priority:
//!    database, then pure payment, then pure subscription, else summary.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::capability::{Operation, DEFAULT_SUMMARY_DAYS};

/// Period used when the text names none
pub const DEFAULT_PERIOD_DAYS: i64 = DEFAULT_SUMMARY_DAYS;

/// Periods compared when a `compare` query names none
pub const DEFAULT_COMPARISON: [i64; 2] = [7, 30];

const DAYS_PER_WEEK: i64 = 7;
const DAYS_PER_MONTH: i64 = 30;

/// Multi-intent separators, in priority order
const SEPARATORS: [&str; 3] = [" and ", " vs ", " versus "];

const DATABASE_KEYWORDS: &[&str] = &["database", "db", "status", "health", "connection"];
const PAYMENT_KEYWORDS: &[&str] = &["payment", "pay", "rate", "success", "revenue", "money"];
const SUBSCRIPTION_KEYWORDS: &[&str] = &["subscription", "subs", "sub", "performance", "customer"];
const SUMMARY_KEYWORDS: &[&str] = &["summary", "overview", "metrics", "stats", "statistics", "combined"];

static DAYS: Lazy<Regex> = Lazy::new(|| pattern(r"(\d+)\s*days?"));
static LAST_DAYS: Lazy<Regex> = Lazy::new(|| pattern(r"last\s+(\d+)\s*days?"));
static FOR_DAYS: Lazy<Regex> = Lazy::new(|| pattern(r"for\s+(?:last\s+)?(\d+)\s*days?"));
static WEEKS: Lazy<Regex> = Lazy::new(|| pattern(r"(\d+)\s*weeks?"));
static MONTHS: Lazy<Regex> = Lazy::new(|| pattern(r"(\d+)\s*months?"));
static PAST: Lazy<Regex> = Lazy::new(|| pattern(r"past\s+(\d+)\s*(days?|weeks?|months?)"));

fn pattern(re: &str) -> Regex {
    Regex::new(re).unwrap_or_else(|e| panic!("router pattern {re:?} is invalid: {e}"))
}

/// One operation derived from free text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutedCall {
    pub operation: Operation,
    pub arguments: Map<String, Value>,
}

impl RoutedCall {
    /// A call without arguments
    #[must_use]
    pub fn new(operation: Operation) -> Self {
        Self { operation, arguments: Map::new() }
    }

    /// A call with a `days` argument
    #[must_use]
    pub fn with_days(operation: Operation, days: i64) -> Self {
        let mut arguments = Map::new();
        arguments.insert("days".to_string(), Value::from(days));
        Self { operation, arguments }
    }

    /// The `days` argument, if any
    #[must_use]
    pub fn days(&self) -> Option<i64> {
        self.arguments.get("days").and_then(Value::as_i64)
    }
}

impl std::fmt::Display for RoutedCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.days() {
            Some(days) => write!(f, "{}(days={days})", self.operation),
            None => write!(f, "{}()", self.operation),
        }
    }
}

/// Route free text to an ordered, non-empty list of calls
#[must_use]
pub fn route(input: &str) -> Vec<RoutedCall> {
    let text = input.to_lowercase();

    let calls = if text.contains("compare") {
        route_comparison(&text)
    } else if let Some(separator) = SEPARATORS.iter().find(|sep| text.contains(**sep)) {
        let calls: Vec<RoutedCall> = text
            .split(separator)
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(resolve_single)
            .collect();
        if calls.is_empty() {
            vec![resolve_single(&text)]
        } else {
            calls
        }
    } else {
        vec![resolve_single(&text)]
    };

    tracing::debug!(
        query = input,
        calls = ?calls.iter().map(ToString::to_string).collect::<Vec<_>>(),
        "routed query"
    );
    calls
}

/// One summary call per mentioned period
fn route_comparison(text: &str) -> Vec<RoutedCall> {
    let mut periods: Vec<i64> = DAYS
        .captures_iter(text)
        .filter_map(|c| number(&c, 1))
        .chain(WEEKS.captures_iter(text).filter_map(|c| number(&c, 1)).map(|n| n.saturating_mul(DAYS_PER_WEEK)))
        .chain(MONTHS.captures_iter(text).filter_map(|c| number(&c, 1)).map(|n| n.saturating_mul(DAYS_PER_MONTH)))
        .collect();
    periods.sort_unstable();
    periods.dedup();

    if periods.is_empty() {
        periods = DEFAULT_COMPARISON.to_vec();
    }

    periods
        .into_iter()
        .map(|days| RoutedCall::with_days(Operation::SubscriptionSummary, days))
        .collect()
}

/// Pick exactly one operation for a single-intent segment
fn resolve_single(text: &str) -> RoutedCall {
    let mentions = |keywords: &[&str]| keywords.iter().any(|k| text.contains(k));

    let database = mentions(DATABASE_KEYWORDS);
    let payment = mentions(PAYMENT_KEYWORDS);
    let subscription = mentions(SUBSCRIPTION_KEYWORDS);
    let summary = mentions(SUMMARY_KEYWORDS);

    if database {
        return RoutedCall::new(Operation::DatabaseStatus);
    }

    let days = extract_period(text);
    let operation = if payment && !summary && !subscription {
        Operation::PaymentSuccessRateInLastDays
    } else if subscription && !summary && !payment {
        Operation::SubscriptionsInLastDays
    } else {
        Operation::SubscriptionSummary
    };
    RoutedCall::with_days(operation, days)
}

/// Extract a look-back period in days; the first matching rule wins
#[must_use]
pub fn extract_period(text: &str) -> i64 {
    if let Some(days) = last_number(&DAYS, text) {
        return days;
    }
    if let Some(days) = LAST_DAYS.captures(text).and_then(|c| number(&c, 1)) {
        return days;
    }
    if let Some(days) = FOR_DAYS.captures(text).and_then(|c| number(&c, 1)) {
        return days;
    }
    if let Some(weeks) = last_number(&WEEKS, text) {
        return weeks.saturating_mul(DAYS_PER_WEEK);
    }
    if let Some(months) = last_number(&MONTHS, text) {
        return months.saturating_mul(DAYS_PER_MONTH);
    }
    if let Some(caps) = PAST.captures(text) {
        if let Some(n) = number(&caps, 1) {
            let unit = caps.get(2).map_or("", |m| m.as_str());
            return if unit.starts_with("week") {
                n.saturating_mul(DAYS_PER_WEEK)
            } else if unit.starts_with("month") {
                n.saturating_mul(DAYS_PER_MONTH)
            } else {
                n
            };
        }
    }

    if text.contains("recent") {
        DAYS_PER_WEEK
    } else if text.contains("this month") || text.contains("monthly") {
        DAYS_PER_MONTH
    } else if text.contains("this week") || text.contains("weekly") {
        DAYS_PER_WEEK
    } else {
        DEFAULT_PERIOD_DAYS
    }
}

/// Numeric capture group, saturating on absurdly long digit runs
fn number(caps: &regex::Captures<'_>, group: usize) -> Option<i64> {
    let digits = caps.get(group)?.as_str();
    Some(digits.parse::<i64>().unwrap_or(i64::MAX))
}

fn last_number(re: &Regex, text: &str) -> Option<i64> {
    re.captures_iter(text).filter_map(|c| number(&c, 1)).last()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn summary(days: i64) -> RoutedCall {
        RoutedCall::with_days(Operation::SubscriptionSummary, days)
    }

    #[test]
    fn test_database_status() {
        assert_eq!(route("database status"), vec![RoutedCall::new(Operation::DatabaseStatus)]);
    }

    #[test]
    fn test_database_wins_over_everything() {
        assert_eq!(
            route("DB health with payment summary for 7 days"),
            vec![RoutedCall::new(Operation::DatabaseStatus)]
        );
    }

    #[test]
    fn test_conjunction_split() {
        assert_eq!(
            route("subscription performance for 7 days and payment rate for 15 days"),
            vec![
                RoutedCall::with_days(Operation::SubscriptionsInLastDays, 7),
                RoutedCall::with_days(Operation::PaymentSuccessRateInLastDays, 15),
            ]
        );
    }

    #[test]
    fn test_and_takes_priority_over_vs() {
        assert_eq!(
            route("payment rate for 3 days vs subs and database"),
            vec![
                RoutedCall::with_days(Operation::SubscriptionSummary, 3),
                RoutedCall::new(Operation::DatabaseStatus),
            ]
        );
    }

    #[test]
    fn test_versus_split() {
        assert_eq!(
            route("payments for 2 weeks versus subscriptions for 1 month"),
            vec![
                RoutedCall::with_days(Operation::PaymentSuccessRateInLastDays, 14),
                RoutedCall::with_days(Operation::SubscriptionsInLastDays, 30),
            ]
        );
    }

    #[test]
    fn test_compare_ascending_deduplicated() {
        assert_eq!(route("compare 7 days vs 30 days performance"), vec![summary(7), summary(30)]);
        assert_eq!(
            route("Compare 30 days, 1 month and 7 days and 1 week"),
            vec![summary(7), summary(30)]
        );
    }

    #[test]
    fn test_compare_mixed_units() {
        assert_eq!(route("compare 2 weeks with 3 months"), vec![summary(14), summary(90)]);
    }

    #[test]
    fn test_compare_default_periods() {
        assert_eq!(route("compare performance"), vec![summary(7), summary(30)]);
    }

    #[test]
    fn test_recent_subscription_activity() {
        assert_eq!(
            route("recent subscription activity"),
            vec![RoutedCall::with_days(Operation::SubscriptionsInLastDays, 7)]
        );
    }

    #[test]
    fn test_summary_keyword_wins_over_payment() {
        assert_eq!(route("monthly payment summary"), vec![summary(30)]);
    }

    #[test]
    fn test_payment_and_subscription_collapse_to_summary() {
        assert_eq!(route("payment subscription numbers for 10 days"), vec![summary(10)]);
    }

    #[test]
    fn test_no_keyword_defaults() {
        assert_eq!(route("how are we doing"), vec![summary(30)]);
        assert_eq!(route(""), vec![summary(30)]);
        assert_eq!(route("   "), vec![summary(30)]);
    }

    #[test]
    fn test_blank_segments_fall_back_to_whole_text() {
        assert_eq!(route(" and "), vec![summary(30)]);
    }

    #[test]
    fn test_period_rules() {
        assert_eq!(extract_period("payments for 3 days then 9 days"), 9);
        assert_eq!(extract_period("last 14 days"), 14);
        assert_eq!(extract_period("over 2 weeks"), 14);
        assert_eq!(extract_period("1 week or 3 weeks"), 21);
        assert_eq!(extract_period("past 2 months"), 60);
        assert_eq!(extract_period("recently"), 7);
        assert_eq!(extract_period("this month"), 30);
        assert_eq!(extract_period("weekly numbers"), 7);
        assert_eq!(extract_period("nothing here"), 30);
    }

    #[test]
    fn test_days_beat_weeks() {
        assert_eq!(extract_period("2 weeks or 5 days"), 5);
    }

    #[test]
    fn test_out_of_range_periods_are_kept() {
        assert_eq!(
            route("payments for 0 days"),
            vec![RoutedCall::with_days(Operation::PaymentSuccessRateInLastDays, 0)]
        );
        assert_eq!(extract_period("99999999999999999999999 days"), i64::MAX);
    }

    #[test]
    fn test_routing_is_deterministic() {
        let query = "subscription performance for 7 days and payment rate for 15 days";
        assert_eq!(route(query), route(query));
    }
}
