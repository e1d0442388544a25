//! MySQL Analytics Backend
//!
//! Implements [`AnalyticsBackend`] over the subscription schema:
//! - `subscription_contract_v2` - one row per subscription contract
//! - `subscription_payment_details` - one row per payment attempt
//!
//! # Implementation Notes
//! - Uses `mysql_async` with a shared pool of at most 5 connections
//! - The subscription date column and the payment amount column differ between
//!   deployments; the first present candidate is used and reported back
//! - Table existence and column lists are looked up once through
//!   `information_schema` and cached for the lifetime of the backend
//! - Interpolated identifiers only ever come from the fixed candidate lists

use chrono::{Local, NaiveDate};
use mysql_async::{prelude::*, Conn, OptsBuilder, Pool, PoolConstraints, PoolOpts};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::capability::DATE_FORMAT;
use crate::config::DatabaseConfig;
use crate::engine::{AnalyticsBackend, DatabaseStatus, DateWindow, PaymentStats, SubscriptionStats};
use crate::error::{AnalyticsError, Result};

/// Upper bound on pooled connections
pub const MAX_CONNECTIONS: usize = 5;

const SUBSCRIPTIONS_TABLE: &str = "subscription_contract_v2";
const PAYMENTS_TABLE: &str = "subscription_payment_details";

/// Candidate subscription date columns, in preference order
const DATE_COLUMNS: &[&str] = &[
    "subcription_start_date",
    "subscription_start_date",
    "start_date",
    "created_date",
    "created_at",
];

/// Candidate payment amount columns, in preference order
const AMOUNT_COLUMNS: &[&str] = &["trans_amount_decimal", "amount", "transaction_amount"];

const ACTIVE_STATUSES: &str = "('ACTIVE', 'active')";
const CANCELLED_STATUSES: &str = "('CLOSED', 'REJECT', 'CANCELLED', 'INACTIVE')";
const PAYMENT_SUCCESS_STATUSES: &str = "('ACTIVE', 'SUCCESS', 'active', 'success')";

/// Reported when no amount column exists
const NO_AMOUNT_COLUMN: &str = "N/A";

/// Pooled MySQL backend
pub struct MySqlBackend {
    pool: Pool,
    database: String,
    tables: Mutex<HashMap<&'static str, bool>>,
    columns: Mutex<HashMap<&'static str, Vec<String>>>,
}

struct SubscriptionCounts {
    new: u64,
    active: u64,
    cancelled: u64,
    date_column: String,
}

struct PaymentCounts {
    total: u64,
    successful: u64,
    revenue: f64,
    amount_column: Option<&'static str>,
}

impl MySqlBackend {
    /// Create the pool; connections are opened lazily on first use
    #[must_use]
    pub fn new(config: &DatabaseConfig) -> Self {
        tracing::info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            max_connections = MAX_CONNECTIONS,
            "MySQL connection pool initialised"
        );
        Self {
            pool: Pool::new(build_mysql_opts(config)),
            database: config.database.clone(),
            tables: Mutex::new(HashMap::new()),
            columns: Mutex::new(HashMap::new()),
        }
    }

    /// Close every pooled connection
    pub async fn disconnect(self) -> Result<()> {
        self.pool
            .disconnect()
            .await
            .map_err(|e| AnalyticsError::backend(format!("Failed to disconnect: {e}")))
    }

    async fn conn(&self) -> Result<Conn> {
        self.pool
            .get_conn()
            .await
            .map_err(|e| AnalyticsError::backend(format!("Database connection failed: {e}")))
    }

    async fn table_exists(&self, conn: &mut Conn, table: &'static str) -> Result<bool> {
        if let Some(&known) = self.tables.lock().unwrap_or_else(PoisonError::into_inner).get(table) {
            return Ok(known);
        }

        let query = "SELECT COUNT(*)
                     FROM information_schema.tables
                     WHERE table_schema = DATABASE() AND table_name = ?";
        let count: Option<u64> = conn
            .exec_first(query, (table,))
            .await
            .map_err(|e| AnalyticsError::backend(format!("Error checking table '{table}': {e}")))?;

        let exists = count.unwrap_or(0) > 0;
        if !exists {
            tracing::warn!(table, "table does not exist");
        }
        self.tables.lock().unwrap_or_else(PoisonError::into_inner).insert(table, exists);
        Ok(exists)
    }

    async fn require_table(&self, conn: &mut Conn, table: &'static str) -> Result<()> {
        if self.table_exists(conn, table).await? {
            Ok(())
        } else {
            Err(AnalyticsError::backend(format!("Table '{table}' not found.")))
        }
    }

    async fn table_columns(&self, conn: &mut Conn, table: &'static str) -> Result<Vec<String>> {
        if let Some(known) = self.columns.lock().unwrap_or_else(PoisonError::into_inner).get(table) {
            return Ok(known.clone());
        }

        let query = "SELECT column_name
                     FROM information_schema.columns
                     WHERE table_schema = DATABASE() AND table_name = ?
                     ORDER BY ordinal_position";
        let columns: Vec<String> = conn.exec(query, (table,)).await.map_err(|e| {
            AnalyticsError::backend(format!("Error getting columns for '{table}': {e}"))
        })?;

        self.columns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table, columns.clone());
        Ok(columns)
    }

    async fn count_subscriptions(&self, start: NaiveDate, end: NaiveDate) -> Result<SubscriptionCounts> {
        let mut conn = self.conn().await?;
        self.require_table(&mut conn, SUBSCRIPTIONS_TABLE).await?;

        let columns = self.table_columns(&mut conn, SUBSCRIPTIONS_TABLE).await?;
        let date_column = find_column(&columns, DATE_COLUMNS).ok_or_else(|| {
            AnalyticsError::backend(format!("No date column found. Available: {columns:?}"))
        })?;

        let query = format!(
            "SELECT COUNT(*),
                    SUM(CASE WHEN status IN {ACTIVE_STATUSES} THEN 1 ELSE 0 END),
                    SUM(CASE WHEN status IN {CANCELLED_STATUSES} THEN 1 ELSE 0 END)
             FROM {SUBSCRIPTIONS_TABLE}
             WHERE {date_column} BETWEEN ? AND ?"
        );
        let row: Option<(u64, Option<u64>, Option<u64>)> = conn
            .exec_first(query, (sql_date(start), sql_date(end)))
            .await
            .map_err(|e| AnalyticsError::backend(format!("DB query failed: {e}")))?;
        let (new, active, cancelled) =
            row.ok_or_else(|| AnalyticsError::backend("No data returned"))?;

        Ok(SubscriptionCounts {
            new,
            active: active.unwrap_or(0),
            cancelled: cancelled.unwrap_or(0),
            date_column: date_column.to_string(),
        })
    }

    async fn count_payments(&self, start: NaiveDate, end: NaiveDate) -> Result<PaymentCounts> {
        let mut conn = self.conn().await?;
        self.require_table(&mut conn, PAYMENTS_TABLE).await?;

        let columns = self.table_columns(&mut conn, PAYMENTS_TABLE).await?;
        let amount_column = find_column(&columns, AMOUNT_COLUMNS);
        let amount = amount_column.unwrap_or("0");

        let query = format!(
            "SELECT COUNT(*),
                    SUM(CASE WHEN status IN {PAYMENT_SUCCESS_STATUSES} THEN 1 ELSE 0 END),
                    SUM(CASE WHEN status IN {PAYMENT_SUCCESS_STATUSES} THEN {amount} ELSE 0 END)
             FROM {PAYMENTS_TABLE}
             WHERE created_date BETWEEN ? AND ?"
        );
        let row: Option<(u64, Option<u64>, Option<f64>)> = conn
            .exec_first(query, (sql_date(start), sql_date(end)))
            .await
            .map_err(|e| AnalyticsError::backend(format!("DB query failed: {e}")))?;
        let (total, successful, revenue) =
            row.ok_or_else(|| AnalyticsError::backend("No data returned"))?;

        Ok(PaymentCounts {
            total,
            successful: successful.unwrap_or(0),
            revenue: revenue.unwrap_or(0.0),
            amount_column,
        })
    }

    async fn subscription_stats(
        &self,
        window: (NaiveDate, NaiveDate),
        period_days: Option<u32>,
    ) -> Result<SubscriptionStats> {
        let (start, end) = window;
        let counts = self.count_subscriptions(start, end).await?;
        Ok(SubscriptionStats {
            new_subscriptions: counts.new,
            active_subscriptions: counts.active,
            cancelled_subscriptions: counts.cancelled,
            period_days,
            date_range: DateWindow::new(start, end),
            date_column_used: Some(counts.date_column),
        })
    }

    async fn payment_stats(&self, window: (NaiveDate, NaiveDate), period_days: Option<u32>) -> Result<PaymentStats> {
        let (start, end) = window;
        let counts = self.count_payments(start, end).await?;
        Ok(PaymentStats {
            success_rate: PaymentStats::format_rate(counts.successful, counts.total),
            total_payments: counts.total,
            successful_payments: counts.successful,
            total_revenue: PaymentStats::format_revenue(counts.revenue),
            period_days,
            date_range: DateWindow::new(start, end),
            amount_column_used: Some(counts.amount_column.unwrap_or(NO_AMOUNT_COLUMN).to_string()),
        })
    }
}

impl AnalyticsBackend for MySqlBackend {
    async fn database_status(&self) -> Result<DatabaseStatus> {
        let mut conn = self.conn().await?;

        let probe: Option<u8> = conn
            .query_first("SELECT 1")
            .await
            .map_err(|e| AnalyticsError::backend(format!("DB check failed: {e}")))?;
        if probe.is_none() {
            return Err(AnalyticsError::backend("Test query failed"));
        }

        let mut status = DatabaseStatus {
            status: "connected".to_string(),
            database: Some(self.database.clone()),
            total_subscriptions: None,
            total_payments: None,
        };

        if self.table_exists(&mut conn, SUBSCRIPTIONS_TABLE).await? {
            status.total_subscriptions = count_rows(&mut conn, SUBSCRIPTIONS_TABLE).await?;
        }
        if self.table_exists(&mut conn, PAYMENTS_TABLE).await? {
            status.total_payments = count_rows(&mut conn, PAYMENTS_TABLE).await?;
        }

        Ok(status)
    }

    async fn subscriptions_in_last_days(&self, days: u32) -> Result<SubscriptionStats> {
        self.subscription_stats(last_days(days), Some(days)).await
    }

    async fn payment_success_rate_in_last_days(&self, days: u32) -> Result<PaymentStats> {
        self.payment_stats(last_days(days), Some(days)).await
    }

    async fn subscriptions_between(&self, start: NaiveDate, end: NaiveDate) -> Result<SubscriptionStats> {
        self.subscription_stats((start, end), None).await
    }

    async fn payments_between(&self, start: NaiveDate, end: NaiveDate) -> Result<PaymentStats> {
        self.payment_stats((start, end), None).await
    }
}

/// Build MySQL connection options from DatabaseConfig
fn build_mysql_opts(config: &DatabaseConfig) -> OptsBuilder {
    let constraints = PoolConstraints::new(0, MAX_CONNECTIONS).unwrap_or_default();

    OptsBuilder::default()
        .ip_or_hostname(config.host.clone())
        .tcp_port(config.port)
        .user(Some(config.user.clone()))
        .pass(Some(config.password.clone()))
        .db_name(Some(config.database.clone()))
        .pool_opts(PoolOpts::default().with_constraints(constraints))
}

async fn count_rows(conn: &mut Conn, table: &'static str) -> Result<Option<u64>> {
    conn.query_first(format!("SELECT COUNT(*) FROM {table}"))
        .await
        .map_err(|e| AnalyticsError::backend(format!("Counting rows of '{table}' failed: {e}")))
}

/// First candidate present in `columns`
fn find_column(columns: &[String], candidates: &[&'static str]) -> Option<&'static str> {
    candidates.iter().copied().find(|c| columns.iter().any(|col| col == c))
}

/// `[today - days, today]` in local time
fn last_days(days: u32) -> (NaiveDate, NaiveDate) {
    let today = Local::now().date_naive();
    (today - chrono::Duration::days(i64::from(days)), today)
}

fn sql_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}
