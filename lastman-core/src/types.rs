use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of decimal places between one display unit and one base unit.
pub const DECIMALS: u32 = 18;

/// Base units in one display unit.
pub const UNIT: u128 = 10u128.pow(DECIMALS);

/// Value in the smallest indivisible unit of the settlement substrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Amount(u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_units(units: u128) -> Self {
        Self(units)
    }

    pub const fn units(self) -> u128 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_sub(rhs.0).map(Amount)
    }

    pub fn saturating_add(self, rhs: Amount) -> Amount {
        Amount(self.0.saturating_add(rhs.0))
    }

    pub fn saturating_sub(self, rhs: Amount) -> Amount {
        Amount(self.0.saturating_sub(rhs.0))
    }

    /// `floor(self * numerator / denominator)` without intermediate overflow.
    pub fn mul_div_floor(self, numerator: u128, denominator: u128) -> Amount {
        debug_assert!(denominator > 0);
        let whole = self.0 / denominator;
        let rest = self.0 % denominator;
        Amount(
            whole
                .saturating_mul(numerator)
                .saturating_add(rest.saturating_mul(numerator) / denominator),
        )
    }

    /// Parse a decimal display amount such as `"0.01"` or `"12"`.
    pub fn parse_decimal(s: &str) -> Result<Amount, AmountParseError> {
        let s = s.trim();
        let (int_part, frac_part) = match s.split_once('.') {
            Some((i, f)) => (i, f),
            None => (s, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(AmountParseError(s.to_string()));
        }
        if frac_part.len() > DECIMALS as usize {
            return Err(AmountParseError(s.to_string()));
        }

        let int_units: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| AmountParseError(s.to_string()))?
        };
        let frac_units: u128 = if frac_part.is_empty() {
            0
        } else {
            let padded = format!("{:0<width$}", frac_part, width = DECIMALS as usize);
            padded.parse().map_err(|_| AmountParseError(s.to_string()))?
        };

        int_units
            .checked_mul(UNIT)
            .and_then(|v| v.checked_add(frac_units))
            .map(Amount)
            .ok_or_else(|| AmountParseError(s.to_string()))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let int_part = self.0 / UNIT;
        let frac_part = self.0 % UNIT;
        if frac_part == 0 {
            return write!(f, "{}", int_part);
        }
        let frac = format!("{:0width$}", frac_part, width = DECIMALS as usize);
        write!(f, "{}.{}", int_part, frac.trim_end_matches('0'))
    }
}

impl From<Amount> for String {
    fn from(amount: Amount) -> Self {
        amount.0.to_string()
    }
}

impl TryFrom<String> for Amount {
    type Error = AmountParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value
            .parse::<u128>()
            .map(Amount)
            .map_err(|_| AmountParseError(value))
    }
}

/// Parses the decimal display form, e.g. `0.01005`.
impl FromStr for Amount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Amount::parse_decimal(s)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid amount: {0}")]
pub struct AmountParseError(String);

/// Opaque participant identity (an account address on the settlement substrate).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl FromStr for Identity {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(pub u64);

impl RoundId {
    pub const FIRST: RoundId = RoundId(1);

    pub fn next(self) -> RoundId {
        RoundId(self.0 + 1)
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation handle returned by the oracle transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A bonus slot is keyed by its round and the deposit number that opened it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotId {
    pub round_id: RoundId,
    pub deposit_number: u64,
}

impl SlotId {
    pub fn new(round_id: RoundId, deposit_number: u64) -> Self {
        Self {
            round_id,
            deposit_number,
        }
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.round_id, self.deposit_number)
    }
}
