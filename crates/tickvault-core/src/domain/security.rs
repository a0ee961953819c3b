use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Instrument classes tracked by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityType {
    Share,
    Etf,
    Bond,
    Currency,
    Unknown,
}

impl SecurityType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Share => "share",
            Self::Etf => "etf",
            Self::Bond => "bond",
            Self::Currency => "currency",
            Self::Unknown => "unknown",
        }
    }

    /// Unrecognized names map to [`SecurityType::Unknown`] rather than an
    /// error; registration is where unknown types get rejected.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "share" => Self::Share,
            "etf" => Self::Etf,
            "bond" => Self::Bond,
            "currency" => Self::Currency,
            _ => Self::Unknown,
        }
    }
}

impl Display for SecurityType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settlement currencies tracked by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SecurityCurrency {
    Rub,
    Usd,
    Eur,
    Cny,
    Unknown,
}

impl SecurityCurrency {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rub => "RUB",
            Self::Usd => "USD",
            Self::Eur => "EUR",
            Self::Cny => "CNY",
            Self::Unknown => "unknown",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "RUB" | "SUR" => Self::Rub,
            "USD" => Self::Usd,
            "EUR" => Self::Eur,
            "CNY" => Self::Cny,
            _ => Self::Unknown,
        }
    }
}

impl Display for SecurityCurrency {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered security.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Security {
    pub id: String,
    pub name: String,
    pub kind: SecurityType,
    pub currency: SecurityCurrency,
}

impl Security {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: SecurityType,
        currency: SecurityCurrency,
    ) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ValidationError::EmptySecurityId);
        }
        if kind == SecurityType::Unknown {
            return Err(ValidationError::UnknownSecurityType);
        }

        Ok(Self {
            id,
            name: name.into(),
            kind,
            currency,
        })
    }

    /// Shorthand for a security known only by its id. The display name
    /// defaults to the id and the currency stays unresolved.
    pub fn quick(id: impl Into<String>, kind: SecurityType) -> Result<Self, ValidationError> {
        let id = id.into();
        let name = id.clone();
        Self::new(id, name, kind, SecurityCurrency::Unknown)
    }
}

impl Display for Security {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_types_case_insensitively() {
        assert_eq!(SecurityType::parse("Share"), SecurityType::Share);
        assert_eq!(SecurityType::parse(" ETF "), SecurityType::Etf);
        assert_eq!(SecurityType::parse("warrant"), SecurityType::Unknown);
    }

    #[test]
    fn maps_legacy_ruble_code() {
        assert_eq!(SecurityCurrency::parse("SUR"), SecurityCurrency::Rub);
        assert_eq!(SecurityCurrency::parse("rub"), SecurityCurrency::Rub);
        assert_eq!(SecurityCurrency::parse("GBP"), SecurityCurrency::Unknown);
    }

    #[test]
    fn rejects_empty_id_and_unknown_type() {
        let err = Security::quick("", SecurityType::Share).expect_err("must fail");
        assert_eq!(err, ValidationError::EmptySecurityId);

        let err = Security::quick("GAZP", SecurityType::Unknown).expect_err("must fail");
        assert_eq!(err, ValidationError::UnknownSecurityType);
    }
}
