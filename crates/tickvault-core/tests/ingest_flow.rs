//! End-to-end flow over a real temporary store and a routed offline feed:
//! register, refresh series, pull a daily snapshot, rank.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tempfile::tempdir;
use time::macros::date;

use tickvault_core::{
    FanoutConfig, HttpClient, HttpError, HttpRequest, HttpResponse, Interval, MoexClient,
    QuoteStore, Security, SecurityType, StoreConfig, SyncService, UtcDateTime,
};

/// Answers requests by URL substring, so concurrent fetches stay
/// deterministic.
struct RoutedHttpClient {
    routes: Vec<(&'static str, String)>,
}

impl HttpClient for RoutedHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        let response = self
            .routes
            .iter()
            .find(|(fragment, _)| request.url.contains(fragment))
            .map(|(_, body)| HttpResponse::ok_json(body.clone()))
            .ok_or_else(|| HttpError::non_retryable(format!("unrouted url: {}", request.url)));
        Box::pin(async move { response })
    }
}

fn candles(rows: serde_json::Value) -> String {
    serde_json::json!({
        "candles": {
            "columns": ["open", "close", "high", "low", "value", "volume", "begin", "end"],
            "data": rows
        }
    })
    .to_string()
}

fn history(rows: serde_json::Value) -> String {
    serde_json::json!({
        "history": {
            "columns": ["BOARDID", "TRADEDATE", "SHORTNAME", "SECID", "NUMTRADES", "VALUE",
                        "OPEN", "LOW", "HIGH", "CLOSE"],
            "data": rows
        }
    })
    .to_string()
}

fn feed() -> Arc<RoutedHttpClient> {
    Arc::new(RoutedHttpClient {
        routes: vec![
            (
                "securities/GAZP/candles",
                candles(serde_json::json!([
                    [10.0, 10.0, 10.2, 9.8, 0.0, 100, "2024-03-01 00:00:00", "2024-03-02 00:00:00"],
                    [11.8, 12.0, 12.1, 11.6, 0.0, 100, "2024-03-04 00:00:00", "2024-03-05 00:00:00"]
                ])),
            ),
            (
                "securities/LKOH/candles",
                candles(serde_json::json!([
                    [50.0, 50.0, 50.5, 49.5, 0.0, 100, "2024-03-01 00:00:00", "2024-03-02 00:00:00"],
                    [44.0, 45.0, 45.5, 43.8, 0.0, 100, "2024-03-04 00:00:00", "2024-03-05 00:00:00"]
                ])),
            ),
            (
                "date=2024-03-05&start=0",
                history(serde_json::json!([
                    ["TQBR", "2024-03-05", "Gazprom", "GAZP", 10, 1.0, 12.0, 11.9, 12.6, 12.5]
                ])),
            ),
            ("start=100", history(serde_json::json!([]))),
        ],
    })
}

fn service(dir: &tempfile::TempDir) -> SyncService {
    let store = QuoteStore::open(StoreConfig {
        db_path: dir.path().join("quotes.duckdb"),
        max_pool_size: 2,
    })
    .expect("store open");
    let client = MoexClient::with_base_url(feed(), "http://feed.test/iss");
    SyncService::new(Arc::new(store), Arc::new(client)).with_fanout(FanoutConfig { limit: 2 })
}

fn share(id: &str) -> Security {
    Security::quick(id, SecurityType::Share).expect("valid security")
}

#[tokio::test]
async fn batch_refresh_reports_failures_without_stopping_siblings() {
    let dir = tempdir().expect("tempdir");
    let service = service(&dir);

    // GAZP is registered, SBER is not; the batch must still refresh GAZP
    service
        .ensure_registered(vec![share("GAZP")])
        .await
        .expect("register");

    let from = UtcDateTime::parse("2024-03-01 00:00:00").expect("from");
    let till = UtcDateTime::parse("2024-03-05 00:00:00").expect("till");

    let err = service
        .refresh_series_batch(vec![share("GAZP"), share("SBER")], from, till, Interval::Day)
        .await
        .expect_err("must aggregate");
    assert!(err.to_string().contains("SBER"));
    assert!(!err.to_string().contains("GAZP:"));

    let (_, gazp) = service.load("GAZP", SecurityType::Share).expect("load");
    assert_eq!(gazp.len(), 2);
}

#[tokio::test]
async fn register_refresh_snapshot_and_rank() {
    let dir = tempdir().expect("tempdir");
    let service = service(&dir);

    let securities = vec![share("GAZP"), share("LKOH")];
    service
        .ensure_registered(securities.clone())
        .await
        .expect("register");

    let from = UtcDateTime::parse("2024-03-01 00:00:00").expect("from");
    let till = UtcDateTime::parse("2024-03-05 00:00:00").expect("till");

    // refresh is idempotent: a second pass over the same window must not
    // duplicate rows
    let series = service
        .refresh_series(&securities[0], from, till, Interval::Day)
        .await
        .expect("first refresh");
    assert_eq!(series.len(), 2);

    let series = service
        .refresh_series(&securities[0], from, till, Interval::Day)
        .await
        .expect("second refresh");
    assert_eq!(series.len(), 2);
    assert!((series.quotes()[0].close - 10.0).abs() < f64::EPSILON);
    assert!((series.quotes()[1].close - 12.0).abs() < f64::EPSILON);

    // ranking refreshes both series concurrently and sorts worst first
    let ranked = service
        .rank_listed(securities, from, till, Interval::Day)
        .await
        .expect("rank");
    let ids: Vec<&str> = ranked.iter().map(|row| row.id.as_str()).collect();
    assert_eq!(ids, vec!["LKOH", "GAZP"]);
    assert!((ranked[0].change - -10.0).abs() < f64::EPSILON);
    assert!((ranked[1].change - 20.0).abs() < f64::EPSILON);

    // the daily snapshot adds one settled quote for GAZP; LKOH is absent
    // from the listing and simply stays as it was
    let written = service
        .refresh_latest(Some("share"), None, date!(2024 - 03 - 05))
        .await
        .expect("snapshot");
    assert_eq!(written, 1);

    let (_, gazp) = service.load("GAZP", SecurityType::Share).expect("load");
    assert_eq!(gazp.len(), 3);
    let latest = gazp.last_quote().expect("latest");
    assert_eq!(latest.begin.format_date(), "2024-03-05");
    assert!((latest.close - 12.5).abs() < f64::EPSILON);

    // first write wins on a repeated snapshot for the same day
    service
        .refresh_latest(Some("share"), None, date!(2024 - 03 - 05))
        .await
        .expect("repeat snapshot");
    let (_, gazp) = service.load("GAZP", SecurityType::Share).expect("reload");
    assert_eq!(gazp.len(), 3);
}
