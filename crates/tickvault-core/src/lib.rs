//! Quote ingestion, reconciliation, and analytics for tickvault.
//!
//! This crate contains:
//! - Canonical domain models (securities, intervals, quote series)
//! - The MOEX ISS feed client behind an injectable HTTP transport
//! - A bounded fan-out coordinator for batch operations
//! - Derived analytics (changes, spreads, period rankings)
//! - The sync service tying the feed client to the quote store

pub mod analytics;
pub mod domain;
pub mod error;
pub mod fanout;
pub mod http_client;
pub mod moex;
pub mod sync;

pub use analytics::{
    derive_changes, derive_spread, rank_period_change, ChangeRecord, PeriodChange, PeriodEntry,
    SpreadRecord,
};
pub use domain::{Interval, Quote, QuoteSeries, Security, SecurityCurrency, SecurityType, UtcDateTime};
pub use error::{EngineError, ValidationError};
pub use fanout::{parallel_each, FanoutConfig};
pub use http_client::{HttpClient, HttpError, HttpRequest, HttpResponse, NoopHttpClient, ReqwestHttpClient};
pub use moex::{instrument_route, InstrumentRoute, MoexClient};
pub use sync::SyncService;
pub use tickvault_store::{
    QuoteRecord, QuoteStore, SecurityRecord, SnapshotPolicy, StoreConfig, StoreError,
};
