//! Sampling granularity shared by every symbol in a store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeframeError {
    #[error("invalid amount {amount} for {unit:?}: {reason}")]
    InvalidAmount {
        amount: u32,
        unit: TimeframeUnit,
        reason: &'static str,
    },

    #[error("cannot parse timeframe '{0}' (expected e.g. 1Min, 15Min, 1Hour, 1Day, 1Week, 1Month)")]
    Unparsable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeframeUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl TimeframeUnit {
    fn token(self) -> &'static str {
        match self {
            TimeframeUnit::Minute => "Min",
            TimeframeUnit::Hour => "Hour",
            TimeframeUnit::Day => "Day",
            TimeframeUnit::Week => "Week",
            TimeframeUnit::Month => "Month",
        }
    }
}

/// Bar granularity, e.g. `15Min` or `1Day`.
///
/// Displays and parses using the provider's wire tokens, so the same string
/// works in config files, CLI flags, and request parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timeframe {
    amount: u32,
    unit: TimeframeUnit,
}

impl Timeframe {
    pub const DAY: Timeframe = Timeframe {
        amount: 1,
        unit: TimeframeUnit::Day,
    };
    pub const MINUTE: Timeframe = Timeframe {
        amount: 1,
        unit: TimeframeUnit::Minute,
    };

    pub fn new(amount: u32, unit: TimeframeUnit) -> Result<Self, TimeframeError> {
        let invalid = |reason| TimeframeError::InvalidAmount {
            amount,
            unit,
            reason,
        };
        match unit {
            TimeframeUnit::Minute if !(1..=59).contains(&amount) => {
                Err(invalid("minutes must be between 1 and 59"))
            }
            TimeframeUnit::Hour if !(1..=23).contains(&amount) => {
                Err(invalid("hours must be between 1 and 23"))
            }
            TimeframeUnit::Day | TimeframeUnit::Week if amount != 1 => {
                Err(invalid("days and weeks only support an amount of 1"))
            }
            TimeframeUnit::Month if ![1, 2, 3, 6, 12].contains(&amount) => {
                Err(invalid("months must be one of 1, 2, 3, 6, 12"))
            }
            _ => Ok(Self { amount, unit }),
        }
    }

    pub fn amount(&self) -> u32 {
        self.amount
    }

    pub fn unit(&self) -> TimeframeUnit {
        self.unit
    }
}

impl Default for Timeframe {
    fn default() -> Self {
        Self::DAY
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit.token())
    }
}

impl FromStr for Timeframe {
    type Err = TimeframeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| TimeframeError::Unparsable(s.to_string()))?;
        let (digits, token) = s.split_at(split);
        let amount = if digits.is_empty() {
            1
        } else {
            digits
                .parse()
                .map_err(|_| TimeframeError::Unparsable(s.to_string()))?
        };
        let unit = match token.to_ascii_lowercase().as_str() {
            "min" => TimeframeUnit::Minute,
            "hour" => TimeframeUnit::Hour,
            "day" => TimeframeUnit::Day,
            "week" => TimeframeUnit::Week,
            "month" => TimeframeUnit::Month,
            _ => return Err(TimeframeError::Unparsable(s.to_string())),
        };
        Self::new(amount, unit)
    }
}

impl TryFrom<String> for Timeframe {
    type Error = TimeframeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(timeframe: Timeframe) -> Self {
        timeframe.to_string()
    }
}
