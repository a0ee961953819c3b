//! Fetch-and-reconcile orchestration: pulls quotes from the feed client and
//! folds them into the store. All collaborators are injected; the service
//! holds no global state.

use std::sync::{Arc, Mutex};

use log::{error, warn};
use time::Date;

use tickvault_store::{QuoteRecord, QuoteStore, SecurityRecord, SnapshotPolicy};

use crate::analytics::{rank_period_change, PeriodChange, PeriodEntry};
use crate::domain::{Interval, Quote, QuoteSeries, Security, SecurityCurrency, SecurityType, UtcDateTime};
use crate::error::EngineError;
use crate::fanout::{parallel_each, FanoutConfig};
use crate::moex::MoexClient;

/// Ties the feed client and the quote store together.
#[derive(Clone)]
pub struct SyncService {
    store: Arc<QuoteStore>,
    client: Arc<MoexClient>,
    fanout: FanoutConfig,
    snapshot_policy: SnapshotPolicy,
}

impl SyncService {
    pub fn new(store: Arc<QuoteStore>, client: Arc<MoexClient>) -> Self {
        Self {
            store,
            client,
            fanout: FanoutConfig::default(),
            snapshot_policy: SnapshotPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_fanout(mut self, fanout: FanoutConfig) -> Self {
        self.fanout = fanout;
        self
    }

    #[must_use]
    pub fn with_snapshot_policy(mut self, policy: SnapshotPolicy) -> Self {
        self.snapshot_policy = policy;
        self
    }

    /// Refetch one security's quotes over `[from, till]` and reconcile the
    /// window in the store, returning the persisted series read back.
    pub async fn refresh_series(
        &self,
        security: &Security,
        from: UtcDateTime,
        till: UtcDateTime,
        interval: Interval,
    ) -> Result<QuoteSeries, EngineError> {
        let kind = security.kind.as_str();
        if !self.store.security_exists(&security.id, kind)? {
            return Err(EngineError::UnknownSecurity {
                id: security.id.clone(),
            });
        }

        let fetched = self
            .client
            .fetch_series(&security.id, security.kind, from, till, interval)
            .await?;

        let records: Vec<QuoteRecord> = fetched.quotes().iter().map(quote_to_record).collect();
        self.store.replace_range(
            &security.id,
            kind,
            &records,
            &from.format_wire(),
            &till.format_wire(),
            interval.as_code(),
        )?;

        let (_, series) = self.load(&security.id, security.kind)?;
        Ok(series)
    }

    /// Hydrate one security and its full history from the store.
    pub fn load(
        &self,
        id: &str,
        kind: SecurityType,
    ) -> Result<(Security, QuoteSeries), EngineError> {
        let (record, quote_records) = self.store.load_security(id, kind.as_str())?;

        let mut quotes = Vec::with_capacity(quote_records.len());
        for quote_record in &quote_records {
            quotes.push(record_to_quote(id, quote_record)?);
        }

        let security = record_to_security(&record);
        Ok((security, QuoteSeries::from_quotes(quotes)))
    }

    /// List every registered security matching the filters, carrying its
    /// latest persisted quote.
    pub fn load_all(
        &self,
        type_filter: Option<&str>,
        currency_filter: Option<&str>,
    ) -> Result<Vec<(Security, Option<Quote>)>, EngineError> {
        let rows = self.store.load_all(type_filter, currency_filter)?;

        let mut listed = Vec::with_capacity(rows.len());
        for (record, quote_record) in &rows {
            let quote = match quote_record {
                Some(quote_record) => Some(record_to_quote(&record.id, quote_record)?),
                None => None,
            };
            listed.push((record_to_security(record), quote));
        }

        Ok(listed)
    }

    /// Pull the latest daily snapshot for every security matching the
    /// filters and fold it into the store under the configured policy.
    /// Returns the number of snapshot quotes written or skipped.
    pub async fn refresh_latest(
        &self,
        type_filter: Option<&str>,
        currency_filter: Option<&str>,
        date: Date,
    ) -> Result<usize, EngineError> {
        let listed = self.load_all(type_filter, currency_filter)?;
        let securities: Vec<Security> = listed.into_iter().map(|(security, _)| security).collect();
        if securities.is_empty() {
            return Ok(0);
        }

        let snapshot = self.client.fetch_snapshot(&securities, date).await?;
        let entries: Vec<(String, QuoteRecord)> = snapshot
            .into_iter()
            .map(|(id, quote)| {
                let record = quote_to_record(&quote);
                (id, record)
            })
            .collect();

        self.store.upsert_snapshot(&entries, self.snapshot_policy)?;
        Ok(entries.len())
    }

    /// Register every security that is not yet in the store, in parallel.
    pub async fn ensure_registered(&self, securities: Vec<Security>) -> Result<(), EngineError> {
        let store = Arc::clone(&self.store);
        parallel_each(securities, self.fanout.limit, move |security: Security| {
            let store = Arc::clone(&store);
            async move {
                store.create(&security_to_record(&security))?;
                Ok(())
            }
        })
        .await
    }

    /// Refresh a batch of series in parallel. Every refresh runs to
    /// completion; failures are reported together.
    pub async fn refresh_series_batch(
        &self,
        securities: Vec<Security>,
        from: UtcDateTime,
        till: UtcDateTime,
        interval: Interval,
    ) -> Result<(), EngineError> {
        let service = self.clone();
        parallel_each(securities, self.fanout.limit, move |security: Security| {
            let service = service.clone();
            async move {
                service
                    .refresh_series(&security, from, till, interval)
                    .await?;
                Ok(())
            }
        })
        .await
    }

    /// Register and refresh the given securities, then rank them by percent
    /// change over `[from, till]`. A security whose refresh fails is left
    /// out of the ranking rather than failing the whole request.
    pub async fn rank_listed(
        &self,
        securities: Vec<Security>,
        from: UtcDateTime,
        till: UtcDateTime,
        interval: Interval,
    ) -> Result<Vec<PeriodChange>, EngineError> {
        self.ensure_registered(securities.clone()).await?;

        let entries: Arc<Mutex<Vec<PeriodEntry>>> = Arc::new(Mutex::new(Vec::new()));
        let accumulator = Arc::clone(&entries);
        let service = self.clone();

        parallel_each(securities, self.fanout.limit, move |security: Security| {
            let service = service.clone();
            let entries = Arc::clone(&accumulator);
            async move {
                let series = match service.refresh_series(&security, from, till, interval).await {
                    Ok(series) => series,
                    Err(err) => {
                        warn!("skipping {security} in ranking: {err}");
                        return Ok(());
                    }
                };

                let window: Vec<_> = series
                    .of_interval(interval)
                    .quotes()
                    .iter()
                    .filter(|quote| quote.begin >= from && quote.begin <= till)
                    .copied()
                    .collect();
                let (Some(first), Some(last)) = (window.first(), window.last()) else {
                    return Ok(());
                };

                entries
                    .lock()
                    .expect("ranking accumulator lock")
                    .push(PeriodEntry {
                        id: security.id,
                        open: first.open,
                        close: last.close,
                    });
                Ok(())
            }
        })
        .await?;

        let collected = std::mem::take(&mut *entries.lock().expect("ranking accumulator lock"));
        Ok(rank_period_change(collected))
    }
}

fn quote_to_record(quote: &Quote) -> QuoteRecord {
    QuoteRecord {
        interval: quote.interval.as_code(),
        begin: quote.begin.format_wire(),
        end: quote.end.format_wire(),
        open: quote.open,
        close: quote.close,
        high: quote.high,
        low: quote.low,
    }
}

/// A persisted datetime that no longer parses means the store file itself
/// is damaged; that is unrecoverable, unlike any feed-side fault.
fn record_to_quote(id: &str, record: &QuoteRecord) -> Result<Quote, EngineError> {
    let interval = Interval::from_code(i64::from(record.interval))?;

    let begin = record.begin.as_str();
    let begin = UtcDateTime::parse_wire(begin).unwrap_or_else(|_| {
        error!("store corruption: unreadable begin '{begin}' for {id}");
        panic!("store corruption: unreadable begin datetime for {id}");
    });
    let end = record.end.as_str();
    let end = UtcDateTime::parse_wire(end).unwrap_or_else(|_| {
        error!("store corruption: unreadable end '{end}' for {id}");
        panic!("store corruption: unreadable end datetime for {id}");
    });

    Ok(Quote {
        interval,
        begin,
        end,
        open: record.open,
        close: record.close,
        high: record.high,
        low: record.low,
    })
}

fn security_to_record(security: &Security) -> SecurityRecord {
    SecurityRecord {
        id: security.id.clone(),
        name: security.name.clone(),
        kind: security.kind.as_str().to_owned(),
        currency: security.currency.as_str().to_owned(),
    }
}

fn record_to_security(record: &SecurityRecord) -> Security {
    Security {
        id: record.id.clone(),
        name: record.name.clone(),
        kind: SecurityType::parse(&record.kind),
        currency: SecurityCurrency::parse(&record.currency),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;
    use tickvault_store::StoreConfig;

    use super::*;
    use crate::http_client::NoopHttpClient;

    fn offline_service(dir: &tempfile::TempDir) -> SyncService {
        let store = QuoteStore::open(StoreConfig {
            db_path: dir.path().join("quotes.duckdb"),
            max_pool_size: 2,
        })
        .expect("store open");
        let client = MoexClient::new(Arc::new(NoopHttpClient));
        SyncService::new(Arc::new(store), Arc::new(client))
    }

    fn share(id: &str) -> Security {
        Security::quick(id, SecurityType::Share).expect("valid security")
    }

    #[tokio::test]
    async fn refresh_series_rejects_unregistered_security() {
        let dir = tempdir().expect("tempdir");
        let service = offline_service(&dir);

        let from = UtcDateTime::parse("2024-03-01 00:00:00").expect("from");
        let err = service
            .refresh_series(&share("GAZP"), from, from, Interval::Day)
            .await
            .expect_err("must fail");
        assert!(matches!(err, EngineError::UnknownSecurity { .. }));
    }

    #[tokio::test]
    async fn ensure_registered_is_idempotent_across_batches() {
        let dir = tempdir().expect("tempdir");
        let service = offline_service(&dir);

        let batch = vec![share("GAZP"), share("LKOH")];
        service
            .ensure_registered(batch.clone())
            .await
            .expect("first batch");
        service
            .ensure_registered(batch)
            .await
            .expect("second batch");

        let listed = service.load_all(Some("share"), None).expect("load_all");
        let ids: Vec<&str> = listed
            .iter()
            .map(|(security, _)| security.id.as_str())
            .collect();
        assert_eq!(ids, vec!["GAZP", "LKOH"]);
    }

    #[tokio::test]
    async fn ensure_registered_aggregates_invalid_entries() {
        let dir = tempdir().expect("tempdir");
        let service = offline_service(&dir);

        let mut broken = share("GAZP");
        broken.kind = SecurityType::Unknown;

        let err = service
            .ensure_registered(vec![broken])
            .await
            .expect_err("must fail");
        assert!(matches!(err, EngineError::Aggregate(_)));
    }

    #[test]
    fn quote_record_conversion_round_trips() {
        let quote = Quote {
            interval: Interval::Day,
            begin: UtcDateTime::parse("2024-03-01 00:00:00").expect("begin"),
            end: UtcDateTime::parse("2024-03-02 00:00:00").expect("end"),
            open: 159.0,
            close: 160.0,
            high: 161.0,
            low: 158.5,
        };

        let record = quote_to_record(&quote);
        assert_eq!(record.begin, "2024-03-01 00:00:00");

        let restored = record_to_quote("GAZP", &record).expect("restore");
        assert_eq!(restored, quote);
    }

    #[test]
    fn unknown_interval_code_fails_read_back() {
        let record = QuoteRecord {
            interval: 2,
            begin: String::from("2024-03-01 00:00:00"),
            end: String::from("2024-03-02 00:00:00"),
            open: 1.0,
            close: 1.0,
            high: 1.0,
            low: 1.0,
        };

        let err = record_to_quote("GAZP", &record).expect_err("must fail");
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    #[should_panic(expected = "store corruption")]
    fn corrupt_persisted_datetime_aborts() {
        let record = QuoteRecord {
            interval: 24,
            begin: String::from("not-a-datetime"),
            end: String::from("2024-03-02 00:00:00"),
            open: 1.0,
            close: 1.0,
            high: 1.0,
            low: 1.0,
        };

        let _ = record_to_quote("GAZP", &record);
    }
}
