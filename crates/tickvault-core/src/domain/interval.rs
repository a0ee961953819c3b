use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Candle bucket sizes supported by the exchange feed.
///
/// The wire codes are the feed's own and not self-describing: a day is 24,
/// a week 7, a month 31, a quarter 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Minute,
    TenMinutes,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
}

impl Interval {
    pub const ALL: [Self; 7] = [
        Self::Minute,
        Self::TenMinutes,
        Self::Hour,
        Self::Day,
        Self::Week,
        Self::Month,
        Self::Quarter,
    ];

    #[must_use]
    pub const fn as_code(self) -> u8 {
        match self {
            Self::Minute => 1,
            Self::TenMinutes => 10,
            Self::Hour => 60,
            Self::Day => 24,
            Self::Week => 7,
            Self::Month => 31,
            Self::Quarter => 4,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, ValidationError> {
        match code {
            1 => Ok(Self::Minute),
            10 => Ok(Self::TenMinutes),
            60 => Ok(Self::Hour),
            24 => Ok(Self::Day),
            7 => Ok(Self::Week),
            31 => Ok(Self::Month),
            4 => Ok(Self::Quarter),
            value => Err(ValidationError::InvalidInterval { value }),
        }
    }
}

impl Display for Interval {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Minute => "minute",
            Self::TenMinutes => "ten_minutes",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Quarter => "quarter",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for interval in Interval::ALL {
            let decoded = Interval::from_code(i64::from(interval.as_code())).expect("must decode");
            assert_eq!(decoded, interval);
        }
    }

    #[test]
    fn rejects_unknown_code() {
        let err = Interval::from_code(2).expect_err("must fail");
        assert!(matches!(err, ValidationError::InvalidInterval { value: 2 }));
    }
}
