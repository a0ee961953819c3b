use std::fmt::{Display, Formatter};

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::format_description::well_known::Rfc3339;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime, PrimitiveDateTime, Time};

use crate::ValidationError;

/// Wire format used by the exchange feed and the quote store.
const WIRE_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Timestamp guaranteed to be UTC.
///
/// Feed payloads and persisted rows carry `YYYY-MM-DD HH:MM:SS` without an
/// offset; those values are taken as UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UtcDateTime(OffsetDateTime);

impl UtcDateTime {
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    /// Parse either the feed wire format or RFC3339.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        Self::parse_wire(input).or_else(|_| {
            OffsetDateTime::parse(input, &Rfc3339)
                .map(|parsed| Self(parsed.to_offset(time::UtcOffset::UTC)))
                .map_err(|_| ValidationError::InvalidTimestamp {
                    value: input.to_owned(),
                })
        })
    }

    /// Parse the `YYYY-MM-DD HH:MM:SS` wire format.
    pub fn parse_wire(input: &str) -> Result<Self, ValidationError> {
        PrimitiveDateTime::parse(input, WIRE_FORMAT)
            .map(|parsed| Self(parsed.assume_utc()))
            .map_err(|_| ValidationError::InvalidTimestamp {
                value: input.to_owned(),
            })
    }

    #[must_use]
    pub const fn from_date(date: Date) -> Self {
        Self(PrimitiveDateTime::new(date, Time::MIDNIGHT).assume_utc())
    }

    #[must_use]
    pub const fn into_inner(self) -> OffsetDateTime {
        self.0
    }

    #[must_use]
    pub const fn date(self) -> Date {
        self.0.date()
    }

    #[must_use]
    pub fn next_day(self) -> Self {
        Self(self.0 + Duration::days(1))
    }

    #[must_use]
    pub fn previous_day(self) -> Self {
        Self(self.0 - Duration::days(1))
    }

    pub fn format_wire(self) -> String {
        self.0
            .format(WIRE_FORMAT)
            .expect("UtcDateTime must be wire formattable")
    }

    pub fn format_date(self) -> String {
        self.0
            .format(DATE_FORMAT)
            .expect("UtcDateTime must be date formattable")
    }

    pub fn format_rfc3339(self) -> String {
        self.0
            .format(&Rfc3339)
            .expect("UtcDateTime must be RFC3339 formattable")
    }
}

impl Display for UtcDateTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format_wire())
    }
}

impl Serialize for UtcDateTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.format_rfc3339())
    }
}

impl<'de> Deserialize<'de> for UtcDateTime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::parse(&value).map_err(D::Error::custom)
    }
}
