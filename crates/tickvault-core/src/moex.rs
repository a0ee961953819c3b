//! MOEX ISS feed client.
//!
//! Two endpoints are used: per-security candles for interval series, and
//! the daily history listing for bulk snapshots. Payload tables are decoded
//! by column name against the `columns` array the feed sends alongside each
//! table, so a column reshuffle upstream surfaces as `MalformedPayload`
//! instead of silently mispriced quotes.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use log::debug;
use serde_json::Value;
use time::Date;

use crate::domain::{Interval, Quote, QuoteSeries, Security, SecurityType, UtcDateTime};
use crate::error::EngineError;
use crate::http_client::{HttpClient, HttpRequest};

const DEFAULT_BASE_URL: &str = "https://iss.moex.com/iss";

/// Page size of the history listing endpoint.
const SNAPSHOT_PAGE_SIZE: usize = 100;

/// Highest page offset requested before a trading day is considered fully
/// read.
const SNAPSHOT_MAX_START: usize = 900;

/// How many calendar days the snapshot walks back looking for the most
/// recent trading day.
const SNAPSHOT_LOOKBACK_DAYS: u8 = 14;

/// Board assumed when the instrument route does not pin one.
const DEFAULT_BOARD: &str = "TQBR";

/// Trading venue coordinates for one instrument class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrumentRoute {
    pub engine: &'static str,
    pub market: &'static str,
    pub board: Option<&'static str>,
}

/// Map an instrument class onto its ISS engine/market/board triple.
pub fn instrument_route(kind: SecurityType) -> Result<InstrumentRoute, EngineError> {
    match kind {
        SecurityType::Share => Ok(InstrumentRoute {
            engine: "stock",
            market: "shares",
            board: None,
        }),
        SecurityType::Etf => Ok(InstrumentRoute {
            engine: "stock",
            market: "shares",
            board: Some("TQTF"),
        }),
        SecurityType::Bond => Ok(InstrumentRoute {
            engine: "stock",
            market: "bonds",
            board: None,
        }),
        SecurityType::Currency => Ok(InstrumentRoute {
            engine: "currency",
            market: "index",
            board: None,
        }),
        SecurityType::Unknown => Err(EngineError::UnsupportedInstrumentType {
            value: kind.as_str().to_owned(),
        }),
    }
}

/// Client for the MOEX ISS JSON API.
pub struct MoexClient {
    http: Arc<dyn HttpClient>,
    base_url: String,
}

impl MoexClient {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self::with_base_url(http, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(http: Arc<dyn HttpClient>, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// Fetch the candle series for one security over `[from, till]`.
    pub async fn fetch_series(
        &self,
        id: &str,
        kind: SecurityType,
        from: UtcDateTime,
        till: UtcDateTime,
        interval: Interval,
    ) -> Result<QuoteSeries, EngineError> {
        let route = instrument_route(kind)?;
        let board_segment = route
            .board
            .map(|board| format!("/boards/{board}"))
            .unwrap_or_default();

        let url = format!(
            "{base}/engines/{engine}/markets/{market}{board_segment}/securities/{id}/candles.json?from={from}&till={till}&interval={code}",
            base = self.base_url,
            engine = route.engine,
            market = route.market,
            id = urlencoding::encode(id),
            from = urlencoding::encode(&from.format_wire()),
            till = urlencoding::encode(&till.format_wire()),
            code = interval.as_code(),
        );

        let payload = self.get_json(&url).await?;
        let table = PayloadTable::from_payload(&payload, "candles")?;

        let open = table.column("open")?;
        let close = table.column("close")?;
        let high = table.column("high")?;
        let low = table.column("low")?;
        let begin = table.column("begin")?;
        let end = table.column("end")?;

        let mut quotes = Vec::with_capacity(table.rows().len());
        for row in table.rows() {
            let begin = UtcDateTime::parse_wire(&table.string_cell(row, begin)?).map_err(|_| {
                malformed("candles", "begin cell is not a feed datetime")
            })?;
            let end = UtcDateTime::parse_wire(&table.string_cell(row, end)?)
                .map_err(|_| malformed("candles", "end cell is not a feed datetime"))?;

            quotes.push(Quote {
                interval,
                begin,
                end,
                open: table.number_cell(row, open)?,
                close: table.number_cell(row, close)?,
                high: table.number_cell(row, high)?,
                low: table.number_cell(row, low)?,
            });
        }

        debug!("fetched {} candles for {id}", quotes.len());
        Ok(QuoteSeries::from_quotes(quotes))
    }

    /// Fetch one day-interval quote per requested security from the daily
    /// history listing, walking back from `date` to the most recent trading
    /// day when the requested one has no data.
    ///
    /// Securities absent from the listing are simply missing from the
    /// result; only transport and payload faults are errors.
    pub async fn fetch_snapshot(
        &self,
        securities: &[Security],
        date: Date,
    ) -> Result<HashMap<String, Quote>, EngineError> {
        let mut by_class: BTreeMap<&'static str, (SecurityType, HashSet<&str>)> = BTreeMap::new();
        for security in securities {
            by_class
                .entry(security.kind.as_str())
                .or_insert_with(|| (security.kind, HashSet::new()))
                .1
                .insert(security.id.as_str());
        }

        let mut snapshot = HashMap::new();
        for (class, (kind, wanted)) in by_class {
            let route = instrument_route(kind)?;
            self.snapshot_class(route, class, &wanted, date, &mut snapshot)
                .await?;
        }

        Ok(snapshot)
    }

    async fn snapshot_class(
        &self,
        route: InstrumentRoute,
        class: &str,
        wanted: &HashSet<&str>,
        date: Date,
        snapshot: &mut HashMap<String, Quote>,
    ) -> Result<(), EngineError> {
        let expected_board = route.board.unwrap_or(DEFAULT_BOARD);

        let mut day = date;
        let mut lookback = 0_u8;
        loop {
            let mut rows = Vec::new();
            let mut first_page_empty = false;

            let mut start = 0;
            while start <= SNAPSHOT_MAX_START {
                let page = self.history_page(route, day, start).await?;
                if page.is_empty() {
                    first_page_empty = start == 0;
                    break;
                }
                rows.extend(page);
                start += SNAPSHOT_PAGE_SIZE;
            }

            if !first_page_empty {
                debug!("{class} snapshot resolved at {day} with {} rows", rows.len());
                let begin = UtcDateTime::from_date(day);
                for row in rows {
                    let (Some(id), Some(close)) = (row.id, row.close) else {
                        continue;
                    };
                    if row.board != expected_board || !wanted.contains(id.as_str()) {
                        continue;
                    }
                    snapshot.entry(id).or_insert(Quote {
                        interval: Interval::Day,
                        begin,
                        end: begin.next_day(),
                        open: row.open,
                        close,
                        high: row.high,
                        low: row.low,
                    });
                }
                return Ok(());
            }

            lookback += 1;
            if lookback >= SNAPSHOT_LOOKBACK_DAYS {
                debug!("{class} snapshot found no trading day near {date}");
                return Ok(());
            }
            day = day.previous_day().unwrap_or(day);
        }
    }

    async fn history_page(
        &self,
        route: InstrumentRoute,
        day: Date,
        start: usize,
    ) -> Result<Vec<HistoryRow>, EngineError> {
        let url = format!(
            "{base}/history/engines/{engine}/markets/{market}/securities.json?date={date}&start={start}",
            base = self.base_url,
            engine = route.engine,
            market = route.market,
            date = UtcDateTime::from_date(day).format_date(),
        );

        let payload = self.get_json(&url).await?;
        let table = PayloadTable::from_payload(&payload, "history")?;

        let board = table.column("BOARDID")?;
        let id = table.column("SECID")?;
        let open = table.column("OPEN")?;
        let low = table.column("LOW")?;
        let high = table.column("HIGH")?;
        let close = table.column("CLOSE")?;

        let mut rows = Vec::with_capacity(table.rows().len());
        for row in table.rows() {
            rows.push(HistoryRow {
                board: table.string_cell(row, board)?,
                id: table.optional_string_cell(row, id)?,
                open: table.optional_number_cell(row, open)?.unwrap_or_default(),
                low: table.optional_number_cell(row, low)?.unwrap_or_default(),
                high: table.optional_number_cell(row, high)?.unwrap_or_default(),
                close: table.optional_number_cell(row, close)?,
            });
        }

        Ok(rows)
    }

    async fn get_json(&self, url: &str) -> Result<Value, EngineError> {
        let response = self
            .http
            .execute(HttpRequest::get(url))
            .await
            .map_err(|error| EngineError::Upstream(error.message().to_owned()))?;

        if !response.is_success() {
            return Err(EngineError::Upstream(format!(
                "unexpected status {} from {url}",
                response.status
            )));
        }

        serde_json::from_str(&response.body)
            .map_err(|error| EngineError::MalformedPayload(format!("invalid JSON: {error}")))
    }
}

struct HistoryRow {
    board: String,
    id: Option<String>,
    open: f64,
    low: f64,
    high: f64,
    close: Option<f64>,
}

/// One `{"columns": [...], "data": [[...]]}` table out of an ISS payload.
struct PayloadTable<'a> {
    name: &'static str,
    columns: Vec<&'a str>,
    rows: &'a [Value],
}

impl<'a> PayloadTable<'a> {
    fn from_payload(payload: &'a Value, name: &'static str) -> Result<Self, EngineError> {
        let table = payload
            .get(name)
            .ok_or_else(|| malformed(name, "table is missing"))?;

        let columns = table
            .get("columns")
            .and_then(Value::as_array)
            .ok_or_else(|| malformed(name, "columns array is missing"))?
            .iter()
            .map(|value| {
                value
                    .as_str()
                    .ok_or_else(|| malformed(name, "column name is not a string"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let rows = table
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| malformed(name, "data array is missing"))?;

        Ok(Self {
            name,
            columns,
            rows,
        })
    }

    fn rows(&self) -> &'a [Value] {
        self.rows
    }

    fn column(&self, column: &'static str) -> Result<usize, EngineError> {
        self.columns
            .iter()
            .position(|name| *name == column)
            .ok_or_else(|| {
                EngineError::MalformedPayload(format!(
                    "table '{}' has no column '{column}'",
                    self.name
                ))
            })
    }

    fn cell(&self, row: &'a Value, index: usize) -> Result<&'a Value, EngineError> {
        row.as_array()
            .and_then(|cells| cells.get(index))
            .ok_or_else(|| malformed(self.name, "row is shorter than the declared columns"))
    }

    fn string_cell(&self, row: &'a Value, index: usize) -> Result<String, EngineError> {
        self.cell(row, index)?
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| malformed(self.name, "expected a string cell"))
    }

    fn optional_string_cell(&self, row: &'a Value, index: usize) -> Result<Option<String>, EngineError> {
        let cell = self.cell(row, index)?;
        if cell.is_null() {
            return Ok(None);
        }
        cell.as_str()
            .map(|value| Some(value.to_owned()))
            .ok_or_else(|| malformed(self.name, "expected a string or null cell"))
    }

    fn number_cell(&self, row: &'a Value, index: usize) -> Result<f64, EngineError> {
        self.cell(row, index)?
            .as_f64()
            .ok_or_else(|| malformed(self.name, "expected a numeric cell"))
    }

    fn optional_number_cell(&self, row: &'a Value, index: usize) -> Result<Option<f64>, EngineError> {
        let cell = self.cell(row, index)?;
        if cell.is_null() {
            return Ok(None);
        }
        cell.as_f64()
            .map(Some)
            .ok_or_else(|| malformed(self.name, "expected a numeric or null cell"))
    }
}

fn malformed(table: &str, reason: &str) -> EngineError {
    EngineError::MalformedPayload(format!("table '{table}': {reason}"))
}
