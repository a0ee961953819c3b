//! DuckDB-backed persistence for securities and their quote history.
//!
//! The store speaks plain record types (strings for wire datetimes, `f64`
//! for prices); domain-level parsing and validation live in
//! `tickvault-core`. Every statement is parameterized.

pub mod migrations;
pub mod pool;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use duckdb::{params, params_from_iter, Connection};
use log::debug;
use thiserror::Error;

pub use pool::{ConnectionPool, PooledConnection};

/// Security type names accepted by the store.
pub const SECURITY_TYPES: &[&str] = &["share", "etf", "bond", "currency"];

/// Currency codes accepted by the store.
pub const CURRENCIES: &[&str] = &["RUB", "USD", "EUR", "CNY"];

/// Currency assigned when a security is created without a known one.
pub const DEFAULT_CURRENCY: &str = "RUB";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    DuckDb(#[from] duckdb::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("security has no id")]
    EmptyId,

    #[error("security has no type or type is unknown")]
    UnknownType,

    #[error("security {id} does not exist")]
    NotFound { id: String },

    #[error("wrong type name: {value}")]
    InvalidTypeFilter { value: String },

    #[error("wrong currency name: {value}")]
    InvalidCurrencyFilter { value: String },
}

impl StoreError {
    /// True for key-validation failures (empty id, missing/unknown type).
    #[must_use]
    pub const fn is_invalid_key(&self) -> bool {
        matches!(self, Self::EmptyId | Self::UnknownType)
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub db_path: PathBuf,
    pub max_pool_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let home = resolve_home();
        Self {
            db_path: home.join("store").join("quotes.duckdb"),
            max_pool_size: 4,
        }
    }
}

/// A persisted security row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityRecord {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub currency: String,
}

/// A persisted quote row. `begin`/`end` carry the store wire format
/// `YYYY-MM-DD HH:MM:SS`.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteRecord {
    pub interval: u8,
    pub begin: String,
    pub end: String,
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
}

/// What to do when a snapshot quote collides with an already-persisted row
/// for the same (security, begin, interval) key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SnapshotPolicy {
    /// First write wins; the existing row stays untouched.
    #[default]
    KeepExisting,
    /// The fetched quote supersedes the persisted one.
    ReplaceExisting,
}

/// Handle to the securities/quotes database.
#[derive(Clone)]
pub struct QuoteStore {
    pool: ConnectionPool,
}

impl QuoteStore {
    pub fn open_default() -> Result<Self, StoreError> {
        Self::open(StoreConfig::default())
    }

    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let pool = ConnectionPool::new(config.db_path.clone(), config.max_pool_size);
        let store = Self { pool };
        store.initialize()?;
        Ok(store)
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        let connection = self.pool.acquire()?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        self.pool.db_path()
    }

    /// Check whether a security with the given id and type is registered.
    pub fn security_exists(&self, id: &str, kind: &str) -> Result<bool, StoreError> {
        validate_key(id, kind)?;

        let connection = self.pool.acquire()?;
        let count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM securities WHERE id = ? AND type = ?",
            params![id, kind],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Check whether a quote row exists for (security, begin, interval).
    pub fn quotes_exist(&self, id: &str, begin: &str, interval: u8) -> Result<bool, StoreError> {
        let connection = self.pool.acquire()?;
        quote_exists_on(&connection, id, begin, interval)
    }

    /// Fetch a security's name/currency and its full quote history.
    ///
    /// Rows come back in storage order; callers are responsible for
    /// re-sorting the series ascending by begin.
    pub fn load_security(
        &self,
        id: &str,
        kind: &str,
    ) -> Result<(SecurityRecord, Vec<QuoteRecord>), StoreError> {
        if !self.security_exists(id, kind)? {
            return Err(StoreError::NotFound { id: id.to_owned() });
        }

        let connection = self.pool.acquire()?;
        let record = connection.query_row(
            "SELECT name, currency FROM securities WHERE id = ?",
            params![id],
            |row| {
                Ok(SecurityRecord {
                    id: id.to_owned(),
                    name: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    kind: kind.to_owned(),
                    currency: row.get(1)?,
                })
            },
        )?;

        let mut statement = connection.prepare(
            r#"SELECT interv, CAST("begin" AS VARCHAR), CAST("end" AS VARCHAR),
                      open, close, high, low
               FROM security_quotes WHERE security = ?"#,
        )?;
        let rows = statement.query_map(params![id], |row| {
            Ok(QuoteRecord {
                interval: row.get::<_, i64>(0)? as u8,
                begin: row.get(1)?,
                end: row.get(2)?,
                open: row.get::<_, Option<f64>>(3)?.unwrap_or_default(),
                close: row.get::<_, Option<f64>>(4)?.unwrap_or_default(),
                high: row.get::<_, Option<f64>>(5)?.unwrap_or_default(),
                low: row.get::<_, Option<f64>>(6)?.unwrap_or_default(),
            })
        })?;

        let mut quotes = Vec::new();
        for row in rows {
            quotes.push(row?);
        }

        Ok((record, quotes))
    }

    /// List every registered security matching the optional type/currency
    /// filters, each carrying only its most recent quote (latest end date).
    /// Result is sorted ascending by security id.
    pub fn load_all(
        &self,
        type_filter: Option<&str>,
        currency_filter: Option<&str>,
    ) -> Result<Vec<(SecurityRecord, Option<QuoteRecord>)>, StoreError> {
        let type_filter = normalize_type_filter(type_filter)?;
        let currency_filter = normalize_currency_filter(currency_filter)?;

        let connection = self.pool.acquire()?;
        let mut statement = connection.prepare(
            r#"
WITH last_price_dates AS (
    SELECT
        s.id,
        s.name,
        s.type,
        s.currency,
        max(sq."end") AS "end"
    FROM securities AS s
        LEFT OUTER JOIN security_quotes AS sq ON s.id = sq.security
    WHERE (? IS NULL OR s.type = ?)
      AND (? IS NULL OR s.currency = ?)
    GROUP BY s.id, s.name, s.type, s.currency
)
SELECT
    pd.id,
    pd.name,
    pd.type,
    pd.currency,
    COALESCE(sq.interv, 0) AS interv,
    CAST(sq."begin" AS VARCHAR),
    CAST(sq."end" AS VARCHAR),
    COALESCE(sq.open, 0.0),
    COALESCE(sq.close, 0.0),
    COALESCE(sq.high, 0.0),
    COALESCE(sq.low, 0.0)
FROM last_price_dates AS pd
    LEFT OUTER JOIN security_quotes AS sq
        ON pd.id = sq.security AND pd."end" = sq."end"
ORDER BY pd.id
"#,
        )?;

        let rows = statement.query_map(
            params![type_filter, type_filter, currency_filter, currency_filter],
            |row| {
                let record = SecurityRecord {
                    id: row.get(0)?,
                    name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    kind: row.get(2)?,
                    currency: row.get(3)?,
                };
                let begin: Option<String> = row.get(5)?;
                let end: Option<String> = row.get(6)?;
                let quote = match (begin, end) {
                    (Some(begin), Some(end)) => Some(QuoteRecord {
                        interval: row.get::<_, i64>(4)? as u8,
                        begin,
                        end,
                        open: row.get(7)?,
                        close: row.get(8)?,
                        high: row.get(9)?,
                        low: row.get(10)?,
                    }),
                    _ => None,
                };
                Ok((record, quote))
            },
        )?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }

        Ok(result)
    }

    /// Register a security. Already-registered ids are left untouched; an
    /// unknown currency defaults to RUB.
    pub fn create(&self, record: &SecurityRecord) -> Result<(), StoreError> {
        validate_key(&record.id, &record.kind)?;

        let connection = self.pool.acquire()?;
        connection.execute(
            "INSERT OR IGNORE INTO securities (id, name, type, currency) VALUES (?, ?, ?, ?)",
            params![
                record.id,
                record.name,
                record.kind,
                effective_currency(&record.currency)
            ],
        )?;
        Ok(())
    }

    /// Register a batch of securities in one statement, silently skipping
    /// ids that are already present. A pre-existing entry never fails the
    /// batch.
    pub fn create_batch(&self, records: &[SecurityRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        for record in records {
            validate_key(&record.id, &record.kind)?;
        }

        let placeholders = vec!["(?, ?, ?, ?)"; records.len()].join(", ");
        let sql = format!(
            "INSERT OR IGNORE INTO securities (id, name, type, currency) VALUES {placeholders}"
        );

        let mut values = Vec::with_capacity(records.len() * 4);
        for record in records {
            values.push(record.id.clone());
            values.push(record.name.clone());
            values.push(record.kind.clone());
            values.push(effective_currency(&record.currency).to_owned());
        }

        let connection = self.pool.acquire()?;
        connection.execute(&sql, params_from_iter(values))?;
        Ok(())
    }

    /// Remove a security and all of its quotes. A security that was never
    /// registered is a no-op. Quotes go first to satisfy the foreign key.
    pub fn delete(&self, id: &str, kind: &str) -> Result<(), StoreError> {
        if !self.security_exists(id, kind)? {
            return Ok(());
        }

        let connection = self.pool.acquire()?;
        connection.execute(
            "DELETE FROM security_quotes WHERE security = ?",
            params![id],
        )?;
        connection.execute("DELETE FROM securities WHERE id = ?", params![id])?;
        Ok(())
    }

    /// Replace every persisted quote for (security, interval) whose begin
    /// falls within `[from, till]` with the fetched rows, atomically.
    ///
    /// An empty fetch is a no-op so that an upstream holiday/weekend
    /// response cannot wipe a previously populated window.
    pub fn replace_range(
        &self,
        id: &str,
        kind: &str,
        quotes: &[QuoteRecord],
        from: &str,
        till: &str,
        interval: u8,
    ) -> Result<(), StoreError> {
        if !self.security_exists(id, kind)? {
            return Err(StoreError::NotFound { id: id.to_owned() });
        }

        if quotes.is_empty() {
            return Ok(());
        }

        let connection = self.pool.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<(), StoreError> {
            let deleted = connection.execute(
                r#"DELETE FROM security_quotes
                   WHERE security = ? AND interv = ?
                     AND "begin" >= CAST(? AS TIMESTAMP)
                     AND "begin" <= CAST(? AS TIMESTAMP)"#,
                params![id, i64::from(interval), from, till],
            )?;

            for quote in quotes {
                insert_quote_on(&connection, id, quote)?;
            }

            debug!(
                "replace_range {id}: deleted {deleted}, inserted {} quotes",
                quotes.len()
            );
            Ok(())
        })();

        finalize_transaction(&connection, result)
    }

    /// Insert one day-snapshot quote per security. Rows whose key already
    /// exists are handled per `policy`; this path deletes only under
    /// [`SnapshotPolicy::ReplaceExisting`].
    pub fn upsert_snapshot(
        &self,
        entries: &[(String, QuoteRecord)],
        policy: SnapshotPolicy,
    ) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }

        let connection = self.pool.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<(), StoreError> {
            for (id, quote) in entries {
                let exists = quote_exists_on(&connection, id, &quote.begin, quote.interval)?;
                if exists {
                    match policy {
                        SnapshotPolicy::KeepExisting => continue,
                        SnapshotPolicy::ReplaceExisting => {
                            connection.execute(
                                r#"DELETE FROM security_quotes
                                   WHERE security = ? AND "begin" = CAST(? AS TIMESTAMP)
                                     AND interv = ?"#,
                                params![id, quote.begin, i64::from(quote.interval)],
                            )?;
                        }
                    }
                }

                insert_quote_on(&connection, id, quote)?;
            }
            Ok(())
        })();

        finalize_transaction(&connection, result)
    }
}

fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, StoreError>,
) -> Result<T, StoreError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

fn insert_quote_on(
    connection: &Connection,
    id: &str,
    quote: &QuoteRecord,
) -> Result<(), StoreError> {
    connection.execute(
        r#"INSERT INTO security_quotes (security, "begin", "end", interv, open, close, high, low)
           VALUES (?, CAST(? AS TIMESTAMP), CAST(? AS TIMESTAMP), ?, ?, ?, ?, ?)"#,
        params![
            id,
            quote.begin,
            quote.end,
            i64::from(quote.interval),
            quote.open,
            quote.close,
            quote.high,
            quote.low
        ],
    )?;
    Ok(())
}

fn quote_exists_on(
    connection: &Connection,
    id: &str,
    begin: &str,
    interval: u8,
) -> Result<bool, StoreError> {
    let count: i64 = connection.query_row(
        r#"SELECT COUNT(*) FROM security_quotes
           WHERE security = ? AND "begin" = CAST(? AS TIMESTAMP) AND interv = ?"#,
        params![id, begin, i64::from(interval)],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn validate_key(id: &str, kind: &str) -> Result<(), StoreError> {
    if id.is_empty() {
        return Err(StoreError::EmptyId);
    }
    if kind.is_empty() || !SECURITY_TYPES.contains(&kind) {
        return Err(StoreError::UnknownType);
    }
    Ok(())
}

fn effective_currency(currency: &str) -> &str {
    if CURRENCIES.contains(&currency) {
        currency
    } else {
        DEFAULT_CURRENCY
    }
}

fn normalize_type_filter(filter: Option<&str>) -> Result<Option<String>, StoreError> {
    match filter {
        None => Ok(None),
        Some(value) => {
            let normalized = value.trim().to_ascii_lowercase();
            if !SECURITY_TYPES.contains(&normalized.as_str()) {
                return Err(StoreError::InvalidTypeFilter {
                    value: value.to_owned(),
                });
            }
            Ok(Some(normalized))
        }
    }
}

fn normalize_currency_filter(filter: Option<&str>) -> Result<Option<String>, StoreError> {
    match filter {
        None => Ok(None),
        Some(value) => {
            let normalized = value.trim().to_ascii_uppercase();
            if !CURRENCIES.contains(&normalized.as_str()) {
                return Err(StoreError::InvalidCurrencyFilter {
                    value: value.to_owned(),
                });
            }
            Ok(Some(normalized))
        }
    }
}

fn resolve_home() -> PathBuf {
    if let Some(path) = env::var_os("TICKVAULT_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".tickvault");
    }

    PathBuf::from(".tickvault")
}
