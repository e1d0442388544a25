//! Capability Catalog and Argument Validation
//!
//! This module holds the fixed set of operations the server exposes, their
//! argument schemas, and the validation that turns an untyped argument map into
//! a typed [`Invocation`].
//!
//! # Validation Strategy
//! - Operation names resolve through a static registry; an unknown name is a
//!   lookup miss, never a runtime probe
//! - Every argument is checked against its declared type and bounds
//! - Missing optional arguments take their declared default
//! - Unknown arguments are rejected
//!
//! The catalog is built once and never mutated, so it is shared without locking.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

use crate::error::{AnalyticsError, Result};

pub mod dispatch;

pub use dispatch::Dispatcher;

/// Smallest accepted look-back window
pub const MIN_DAYS: i64 = 1;

/// Largest accepted look-back window
pub const MAX_DAYS: i64 = 365;

/// Default look-back window for the summary operation
pub const DEFAULT_SUMMARY_DAYS: i64 = 30;

/// Date format accepted by range operations
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Every operation the server exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    #[serde(rename = "get_database_status")]
    DatabaseStatus,
    #[serde(rename = "get_subscriptions_in_last_days")]
    SubscriptionsInLastDays,
    #[serde(rename = "get_payment_success_rate_in_last_days")]
    PaymentSuccessRateInLastDays,
    #[serde(rename = "get_subscription_summary")]
    SubscriptionSummary,
    #[serde(rename = "get_analytics_by_date_range")]
    AnalyticsByDateRange,
    #[serde(rename = "natural_language_query")]
    NaturalLanguageQuery,
}

impl Operation {
    /// All operations, in catalog order
    pub const ALL: [Self; 6] = [
        Self::NaturalLanguageQuery,
        Self::DatabaseStatus,
        Self::SubscriptionsInLastDays,
        Self::PaymentSuccessRateInLastDays,
        Self::SubscriptionSummary,
        Self::AnalyticsByDateRange,
    ];

    /// Wire name of the operation
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::DatabaseStatus => "get_database_status",
            Self::SubscriptionsInLastDays => "get_subscriptions_in_last_days",
            Self::PaymentSuccessRateInLastDays => "get_payment_success_rate_in_last_days",
            Self::SubscriptionSummary => "get_subscription_summary",
            Self::AnalyticsByDateRange => "get_analytics_by_date_range",
            Self::NaturalLanguageQuery => "natural_language_query",
        }
    }

    /// Resolve a wire name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Declared type of an argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Integer,
    String,
    /// A `YYYY-MM-DD` string
    Date,
}

impl ArgType {
    const fn json_type(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::String | Self::Date => "string",
        }
    }
}

/// Schema of a single argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgSpec {
    pub name: &'static str,
    pub ty: ArgType,
    pub required: bool,
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub default: Option<i64>,
    pub description: &'static str,
}

impl ArgSpec {
    const fn days(required: bool, default: Option<i64>, description: &'static str) -> Self {
        Self {
            name: "days",
            ty: ArgType::Integer,
            required,
            min: Some(MIN_DAYS),
            max: Some(MAX_DAYS),
            default,
            description,
        }
    }

    const fn date(name: &'static str, description: &'static str) -> Self {
        Self { name, ty: ArgType::Date, required: true, min: None, max: None, default: None, description }
    }

    fn schema(&self) -> Value {
        let mut schema = Map::new();
        schema.insert("type".into(), json!(self.ty.json_type()));
        schema.insert("description".into(), json!(self.description));
        if self.ty == ArgType::Date {
            schema.insert("format".into(), json!("date"));
        }
        if let Some(min) = self.min {
            schema.insert("minimum".into(), json!(min));
        }
        if let Some(max) = self.max {
            schema.insert("maximum".into(), json!(max));
        }
        if let Some(default) = self.default {
            schema.insert("default".into(), json!(default));
        }
        Value::Object(schema)
    }

    /// Check one supplied value against this spec
    fn check(&self, value: &Value) -> Result<ArgValue> {
        match self.ty {
            ArgType::Integer => {
                let n = value.as_i64().ok_or_else(|| self.bounds_error(value))?;
                if self.min.is_some_and(|min| n < min) || self.max.is_some_and(|max| n > max) {
                    return Err(self.bounds_error(value));
                }
                Ok(ArgValue::Integer(n))
            }
            ArgType::String => value
                .as_str()
                .map(|s| ArgValue::Text(s.to_string()))
                .ok_or_else(|| AnalyticsError::validation(format!("'{}' must be a string", self.name))),
            ArgType::Date => {
                let raw = value.as_str().ok_or_else(|| {
                    AnalyticsError::validation(format!("'{}' must be a YYYY-MM-DD string", self.name))
                })?;
                NaiveDate::parse_from_str(raw, DATE_FORMAT).map(ArgValue::Date).map_err(|e| {
                    AnalyticsError::validation(format!(
                        "Invalid {} format '{raw}'. Use YYYY-MM-DD ({e})",
                        self.name
                    ))
                })
            }
        }
    }

    fn bounds_error(&self, value: &Value) -> AnalyticsError {
        match (self.min, self.max) {
            (Some(min), Some(max)) => AnalyticsError::validation(format!(
                "'{}' must be an integer between {min} and {max}, got {value}",
                self.name
            )),
            _ => AnalyticsError::validation(format!("'{}' must be an integer, got {value}", self.name)),
        }
    }
}

/// A validated argument value
#[derive(Debug, Clone, PartialEq, Eq)]
enum ArgValue {
    Integer(i64),
    Text(String),
    Date(NaiveDate),
}

/// Static description of one operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationDescriptor {
    pub operation: Operation,
    pub description: &'static str,
    pub args: Vec<ArgSpec>,
}

impl OperationDescriptor {
    /// Wire name of the described operation
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.operation.name()
    }

    /// JSON schema of the argument object
    #[must_use]
    pub fn input_schema(&self) -> Value {
        let properties: Map<String, Value> =
            self.args.iter().map(|arg| (arg.name.to_string(), arg.schema())).collect();
        let required: Vec<&str> = self.args.iter().filter(|a| a.required).map(|a| a.name).collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Published form: `{name, description, inputSchema}`
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name(),
            "description": self.description,
            "inputSchema": self.input_schema(),
        })
    }

    /// Validate an argument map against this descriptor
    pub fn validate(&self, arguments: &Map<String, Value>) -> Result<Invocation> {
        if let Some(unknown) = arguments.keys().find(|k| !self.args.iter().any(|a| a.name == k.as_str())) {
            return Err(AnalyticsError::validation(format!(
                "Unexpected argument '{unknown}' for {}",
                self.name()
            )));
        }

        let mut values: HashMap<&'static str, ArgValue> = HashMap::new();
        for spec in &self.args {
            match arguments.get(spec.name) {
                Some(value) => {
                    values.insert(spec.name, spec.check(value)?);
                }
                None => {
                    if let Some(default) = spec.default {
                        values.insert(spec.name, ArgValue::Integer(default));
                    } else if spec.required {
                        return Err(AnalyticsError::validation(format!(
                            "Missing required argument '{}' for {}",
                            spec.name,
                            self.name()
                        )));
                    }
                }
            }
        }

        Invocation::build(self.operation, &values)
    }
}

/// A fully typed, validated call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    DatabaseStatus,
    SubscriptionsInLastDays { days: u32 },
    PaymentSuccessRateInLastDays { days: u32 },
    SubscriptionSummary { days: u32 },
    AnalyticsByDateRange { start: NaiveDate, end: NaiveDate },
    NaturalLanguageQuery { query: String },
}

impl Invocation {
    /// The operation this invocation targets
    #[must_use]
    pub const fn operation(&self) -> Operation {
        match self {
            Self::DatabaseStatus => Operation::DatabaseStatus,
            Self::SubscriptionsInLastDays { .. } => Operation::SubscriptionsInLastDays,
            Self::PaymentSuccessRateInLastDays { .. } => Operation::PaymentSuccessRateInLastDays,
            Self::SubscriptionSummary { .. } => Operation::SubscriptionSummary,
            Self::AnalyticsByDateRange { .. } => Operation::AnalyticsByDateRange,
            Self::NaturalLanguageQuery { .. } => Operation::NaturalLanguageQuery,
        }
    }

    fn build(operation: Operation, values: &HashMap<&'static str, ArgValue>) -> Result<Self> {
        let days = || -> Result<u32> {
            match values.get("days") {
                // bounds already checked by ArgSpec::check
                Some(ArgValue::Integer(n)) => Ok(*n as u32),
                _ => Err(AnalyticsError::validation("Missing required argument 'days'")),
            }
        };
        let date = |name: &str| -> Result<NaiveDate> {
            match values.get(name) {
                Some(ArgValue::Date(d)) => Ok(*d),
                _ => Err(AnalyticsError::validation(format!("Missing required argument '{name}'"))),
            }
        };

        Ok(match operation {
            Operation::DatabaseStatus => Self::DatabaseStatus,
            Operation::SubscriptionsInLastDays => Self::SubscriptionsInLastDays { days: days()? },
            Operation::PaymentSuccessRateInLastDays => {
                Self::PaymentSuccessRateInLastDays { days: days()? }
            }
            Operation::SubscriptionSummary => Self::SubscriptionSummary { days: days()? },
            Operation::AnalyticsByDateRange => {
                let (start, end) = (date("start_date")?, date("end_date")?);
                if start > end {
                    return Err(AnalyticsError::validation("Start date cannot be after end date"));
                }
                Self::AnalyticsByDateRange { start, end }
            }
            Operation::NaturalLanguageQuery => match values.get("query") {
                Some(ArgValue::Text(query)) => Self::NaturalLanguageQuery { query: query.clone() },
                _ => return Err(AnalyticsError::validation("Missing required argument 'query'")),
            },
        })
    }
}

/// The published, immutable set of operation descriptors
#[derive(Debug)]
pub struct Catalog {
    descriptors: Vec<OperationDescriptor>,
}

static CATALOG: Lazy<Catalog> = Lazy::new(Catalog::build);

/// The process-wide catalog
#[must_use]
pub fn catalog() -> &'static Catalog {
    &CATALOG
}

impl Catalog {
    fn build() -> Self {
        let descriptors = Operation::ALL
            .into_iter()
            .map(|operation| match operation {
                Operation::NaturalLanguageQuery => OperationDescriptor {
                    operation,
                    description: "Answer a free-text question about subscription analytics by routing it to one or more operations",
                    args: vec![ArgSpec {
                        name: "query",
                        ty: ArgType::String,
                        required: true,
                        min: None,
                        max: None,
                        default: None,
                        description: "Natural language query about subscription data",
                    }],
                },
                Operation::DatabaseStatus => OperationDescriptor {
                    operation,
                    description: "Check database connection and get basic statistics",
                    args: Vec::new(),
                },
                Operation::SubscriptionsInLastDays => OperationDescriptor {
                    operation,
                    description: "Get subscription statistics for the last N days",
                    args: vec![ArgSpec::days(true, None, "Number of days to look back")],
                },
                Operation::PaymentSuccessRateInLastDays => OperationDescriptor {
                    operation,
                    description: "Get payment success rate statistics for the last N days",
                    args: vec![ArgSpec::days(true, None, "Number of days to look back")],
                },
                Operation::SubscriptionSummary => OperationDescriptor {
                    operation,
                    description: "Get comprehensive subscription and payment summary",
                    args: vec![ArgSpec::days(
                        false,
                        Some(DEFAULT_SUMMARY_DAYS),
                        "Number of days to look back (default: 30)",
                    )],
                },
                Operation::AnalyticsByDateRange => OperationDescriptor {
                    operation,
                    description: "Get subscription and payment analytics for an explicit date range",
                    args: vec![
                        ArgSpec::date("start_date", "First day of the range (YYYY-MM-DD)"),
                        ArgSpec::date("end_date", "Last day of the range (YYYY-MM-DD)"),
                    ],
                },
            })
            .collect();
        Self { descriptors }
    }

    /// All descriptors in catalog order
    pub fn iter(&self) -> impl Iterator<Item = &OperationDescriptor> {
        self.descriptors.iter()
    }

    /// Descriptor of a known operation
    #[must_use]
    pub fn get(&self, operation: Operation) -> &OperationDescriptor {
        self.descriptors
            .iter()
            .find(|d| d.operation == operation)
            .unwrap_or_else(|| unreachable!("catalog is built from Operation::ALL"))
    }

    /// Descriptor by wire name
    pub fn lookup(&self, name: &str) -> Result<&OperationDescriptor> {
        Operation::from_name(name)
            .map(|op| self.get(op))
            .ok_or_else(|| AnalyticsError::protocol(format!("Unknown tool: {name}")))
    }

    /// Published form of the whole catalog, as returned by `tools/list`
    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Array(self.descriptors.iter().map(OperationDescriptor::to_json).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn validate(name: &str, value: Value) -> Result<Invocation> {
        catalog().lookup(name)?.validate(&args(value))
    }

    #[test]
    fn test_names_round_trip() {
        for op in Operation::ALL {
            assert_eq!(Operation::from_name(op.name()), Some(op));
            assert_eq!(serde_json::to_value(op).unwrap(), json!(op.name()));
        }
        assert_eq!(Operation::from_name("drop_tables"), None);
    }

    #[test]
    fn test_catalog_names_are_unique() {
        let mut names: Vec<&str> = catalog().iter().map(OperationDescriptor::name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Operation::ALL.len());
    }

    #[test]
    fn test_unknown_tool_is_lookup_miss() {
        let err = catalog().lookup("get_everything").unwrap_err();
        assert!(matches!(err, AnalyticsError::Protocol(_)));
        assert!(err.detail().contains("get_everything"));
    }

    #[test]
    fn test_days_boundaries() {
        for ok in [1, 365] {
            assert_eq!(
                validate("get_subscriptions_in_last_days", json!({"days": ok})).unwrap(),
                Invocation::SubscriptionsInLastDays { days: ok as u32 }
            );
        }
        for bad in [0, 366] {
            let err = validate("get_payment_success_rate_in_last_days", json!({"days": bad})).unwrap_err();
            assert!(matches!(err, AnalyticsError::Validation(_)));
            assert!(err.detail().contains("between 1 and 365"), "{err}");
        }
    }

    #[test]
    fn test_days_must_be_integer() {
        assert!(validate("get_subscriptions_in_last_days", json!({"days": "7"})).is_err());
        assert!(validate("get_subscriptions_in_last_days", json!({"days": 7.5})).is_err());
    }

    #[test]
    fn test_missing_required_days() {
        let err = validate("get_subscriptions_in_last_days", json!({})).unwrap_err();
        assert!(err.detail().contains("Missing required argument 'days'"));
    }

    #[test]
    fn test_summary_days_default() {
        assert_eq!(
            validate("get_subscription_summary", json!({})).unwrap(),
            Invocation::SubscriptionSummary { days: 30 }
        );
    }

    #[test]
    fn test_unknown_argument_rejected() {
        let err = validate("get_database_status", json!({"verbose": true})).unwrap_err();
        assert!(err.detail().contains("Unexpected argument 'verbose'"));
    }

    #[test]
    fn test_date_range_validation() {
        let ok = validate(
            "get_analytics_by_date_range",
            json!({"start_date": "2024-01-01", "end_date": "2024-01-31"}),
        )
        .unwrap();
        assert!(matches!(ok, Invocation::AnalyticsByDateRange { .. }));

        let bad_format = validate(
            "get_analytics_by_date_range",
            json!({"start_date": "01/01/2024", "end_date": "2024-01-31"}),
        )
        .unwrap_err();
        assert!(bad_format.detail().contains("Invalid start_date format"));

        let reversed = validate(
            "get_analytics_by_date_range",
            json!({"start_date": "2024-02-01", "end_date": "2024-01-01"}),
        )
        .unwrap_err();
        assert!(reversed.detail().contains("Start date cannot be after end date"));
    }

    #[test]
    fn test_natural_language_query_requires_text() {
        assert_eq!(
            validate("natural_language_query", json!({"query": "db status"})).unwrap(),
            Invocation::NaturalLanguageQuery { query: "db status".into() }
        );
        assert!(validate("natural_language_query", json!({"query": 5})).is_err());
        assert!(validate("natural_language_query", json!({})).is_err());
    }

    #[test]
    fn test_summary_schema_publishes_bounds_and_default() {
        let schema = catalog().get(Operation::SubscriptionSummary).input_schema();
        assert_eq!(schema["properties"]["days"]["minimum"], 1);
        assert_eq!(schema["properties"]["days"]["maximum"], 365);
        assert_eq!(schema["properties"]["days"]["default"], 30);
        assert_eq!(schema["required"], json!([]));
    }
}
