use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use time::Date;

use super::{Interval, UtcDateTime};

/// One candle: open/close/high/low over `[begin, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub interval: Interval,
    pub begin: UtcDateTime,
    pub end: UtcDateTime,
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
}

impl Quote {
    fn key(&self) -> (u8, UtcDateTime) {
        (self.interval.as_code(), self.begin)
    }
}

/// An ordered quote history for one security.
///
/// The invariant maintained by every constructor and mutator: quotes are
/// sorted ascending by begin, with at most one quote per (interval, begin).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuoteSeries {
    quotes: Vec<Quote>,
}

impl QuoteSeries {
    /// Build a series from quotes in any order. When two quotes share an
    /// (interval, begin) key, the one appearing first in `quotes` wins.
    #[must_use]
    pub fn from_quotes(quotes: Vec<Quote>) -> Self {
        let mut series = Self::default();
        series.merge(quotes);
        series
    }

    /// Fold incoming quotes into the series. Quotes already present keep
    /// their values; only new (interval, begin) keys are added.
    pub fn merge(&mut self, incoming: Vec<Quote>) {
        let mut seen: HashSet<(u8, UtcDateTime)> =
            self.quotes.iter().map(Quote::key).collect();

        for quote in incoming {
            if seen.insert(quote.key()) {
                self.quotes.push(quote);
            }
        }

        self.quotes
            .sort_by(|a, b| a.begin.cmp(&b.begin).then(a.interval.as_code().cmp(&b.interval.as_code())));
    }

    #[must_use]
    pub fn quotes(&self) -> &[Quote] {
        &self.quotes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    /// The sub-series holding only quotes of the given interval.
    #[must_use]
    pub fn of_interval(&self, interval: Interval) -> Self {
        Self {
            quotes: self
                .quotes
                .iter()
                .filter(|quote| quote.interval == interval)
                .copied()
                .collect(),
        }
    }

    /// The latest quote whose end falls on or before the given date.
    #[must_use]
    pub fn quote_for_date(&self, date: Date) -> Option<&Quote> {
        self.quotes
            .iter()
            .rev()
            .find(|quote| quote.end.date() <= date)
    }

    #[must_use]
    pub fn last_quote(&self) -> Option<&Quote> {
        self.quotes.last()
    }
}

impl IntoIterator for QuoteSeries {
    type Item = Quote;
    type IntoIter = std::vec::IntoIter<Quote>;

    fn into_iter(self) -> Self::IntoIter {
        self.quotes.into_iter()
    }
}
