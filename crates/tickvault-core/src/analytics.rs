//! Derived price analytics: daily/cumulative change, two-leg spreads, and
//! period-change rankings. Everything here is computed on read and never
//! persisted.

use std::collections::BTreeMap;

use serde::Serialize;
use time::Date;

use crate::domain::QuoteSeries;

/// Per-quote percentage changes over a window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChangeRecord {
    pub date: Date,
    pub close: f64,
    /// Percent change versus the previous retained close; 0 for the first
    /// quote or when the previous close is 0.
    pub day_change: f64,
    /// Percent change versus the first retained close; 0 when the baseline
    /// is 0.
    pub total_change: f64,
}

/// Day-aligned difference between two change series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SpreadRecord {
    pub close_a: Option<f64>,
    pub close_b: Option<f64>,
    pub day_spread: Option<f64>,
    pub total_spread: Option<f64>,
}

/// One security's open/close over a ranking period.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodEntry {
    pub id: String,
    pub open: f64,
    pub close: f64,
}

/// A ranked period-change row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodChange {
    pub id: String,
    pub open: f64,
    pub close: f64,
    /// Percent change rounded to two decimals; 0 when the open is not a
    /// positive price.
    pub change: f64,
}

/// Day-over-day and cumulative change for every quote whose end falls
/// within `[from, till]`.
#[must_use]
pub fn derive_changes(series: &QuoteSeries, from: Date, till: Date) -> Vec<ChangeRecord> {
    let mut records = Vec::new();
    let mut baseline = 0.0;
    let mut previous = 0.0;

    for quote in series.quotes() {
        let date = quote.end.date();
        if date < from || date > till {
            continue;
        }

        if records.is_empty() {
            baseline = quote.close;
            previous = quote.close;
            records.push(ChangeRecord {
                date,
                close: quote.close,
                day_change: 0.0,
                total_change: 0.0,
            });
            continue;
        }

        records.push(ChangeRecord {
            date,
            close: quote.close,
            day_change: percent_change(previous, quote.close),
            total_change: percent_change(baseline, quote.close),
        });
        previous = quote.close;
    }

    records
}

/// Difference between two change series, aligned by end date.
///
/// Each leg's day/total trackers advance only on dates where both legs have
/// a close, so a gap in one leg does not skew the other. Dates with only
/// one leg priced still appear in the result, with the spread unset.
#[must_use]
pub fn derive_spread(
    series_a: &QuoteSeries,
    series_b: &QuoteSeries,
    from: Date,
    till: Date,
) -> BTreeMap<Date, SpreadRecord> {
    let closes_a = closes_by_date(series_a, from, till);
    let closes_b = closes_by_date(series_b, from, till);

    let mut dates: Vec<Date> = closes_a.keys().chain(closes_b.keys()).copied().collect();
    dates.sort_unstable();
    dates.dedup();

    let mut leg_a = LegTracker::default();
    let mut leg_b = LegTracker::default();
    let mut spread = BTreeMap::new();

    for date in dates {
        let close_a = closes_a.get(&date).copied();
        let close_b = closes_b.get(&date).copied();

        let record = match (close_a, close_b) {
            (Some(a), Some(b)) => {
                let (day_a, total_a) = leg_a.advance(a);
                let (day_b, total_b) = leg_b.advance(b);
                SpreadRecord {
                    close_a,
                    close_b,
                    day_spread: Some(day_a - day_b),
                    total_spread: Some(total_a - total_b),
                }
            }
            _ => SpreadRecord {
                close_a,
                close_b,
                ..SpreadRecord::default()
            },
        };

        spread.insert(date, record);
    }

    spread
}

/// Rank securities by percent change over a period, worst first. Ties break
/// by id.
#[must_use]
pub fn rank_period_change(entries: Vec<PeriodEntry>) -> Vec<PeriodChange> {
    let mut ranked: Vec<PeriodChange> = entries
        .into_iter()
        .map(|entry| {
            let change = if entry.open > 0.0 {
                ((entry.close - entry.open) / entry.open * 10_000.0).round() / 100.0
            } else {
                0.0
            };
            PeriodChange {
                id: entry.id,
                open: entry.open,
                close: entry.close,
                change,
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        a.change
            .partial_cmp(&b.change)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    ranked
}

#[derive(Default)]
struct LegTracker {
    baseline: Option<f64>,
    previous: f64,
}

impl LegTracker {
    /// Feed the next close, returning (day change, total change).
    fn advance(&mut self, close: f64) -> (f64, f64) {
        let Some(baseline) = self.baseline else {
            self.baseline = Some(close);
            self.previous = close;
            return (0.0, 0.0);
        };

        let day = percent_change(self.previous, close);
        let total = percent_change(baseline, close);
        self.previous = close;
        (day, total)
    }
}

fn percent_change(reference: f64, close: f64) -> f64 {
    if reference != 0.0 {
        (close - reference) / reference * 100.0
    } else {
        0.0
    }
}

fn closes_by_date(series: &QuoteSeries, from: Date, till: Date) -> BTreeMap<Date, f64> {
    let mut closes = BTreeMap::new();
    for quote in series.quotes() {
        let date = quote.end.date();
        if date >= from && date <= till {
            closes.insert(date, quote.close);
        }
    }
    closes
}
