mod interval;
mod quote;
mod security;
mod timestamp;

pub use interval::Interval;
pub use quote::{Quote, QuoteSeries};
pub use security::{Security, SecurityCurrency, SecurityType};
pub use timestamp::UtcDateTime;
