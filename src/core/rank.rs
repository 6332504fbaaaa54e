//! Fractional rank keys for sibling ordering.
//!
//! A key is a string of base-36 digits read as the fraction `0.d1d2d3...`.
//! Plain byte comparison of two keys agrees with numeric comparison of the
//! fractions, so siblings sort with `Ord for str`. A key never ends in the
//! zero digit, which guarantees that some key always sorts before it.
//!
//! Inserting between two neighbours produces the shortest digit string that
//! lies strictly between them. No other sibling's key is ever rewritten.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const BASE: u8 = 36;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RankKey(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RankError {
    #[error("empty rank key")]
    Empty,
    #[error("invalid rank digit {0:?}")]
    InvalidDigit(char),
    #[error("rank key may not end in the zero digit")]
    TrailingZero,
    #[error("rank keys out of order: {low:?} is not below {high:?}")]
    NotOrdered { low: String, high: String },
}

impl RankKey {
    pub fn parse(text: &str) -> Result<Self, RankError> {
        if text.is_empty() {
            return Err(RankError::Empty);
        }
        if let Some(bad) = text
            .chars()
            .find(|c| !c.is_ascii() || digit_value(*c as u8).is_none())
        {
            return Err(RankError::InvalidDigit(bad));
        }
        if text.ends_with('0') {
            return Err(RankError::TrailingZero);
        }
        Ok(Self(text.to_string()))
    }

    /// Key for the first child of an empty sibling list.
    pub fn initial() -> Self {
        Self::from_digits(&[BASE / 2])
    }

    pub fn before(&self) -> Self {
        Self::from_digits(&midpoint(&[], Some(&self.digits())))
    }

    pub fn after(&self) -> Self {
        Self::from_digits(&midpoint(&self.digits(), None))
    }

    /// Returns a key strictly between `low` and `high`.
    pub fn between(low: &RankKey, high: &RankKey) -> Result<Self, RankError> {
        if low >= high {
            return Err(RankError::NotOrdered {
                low: low.0.clone(),
                high: high.0.clone(),
            });
        }
        Ok(Self::from_digits(&midpoint(
            &low.digits(),
            Some(&high.digits()),
        )))
    }

    /// Picks a key for the gap between two optional neighbours.
    ///
    /// `None` on either side means the start or end of the sibling list.
    pub fn for_gap(prev: Option<&RankKey>, next: Option<&RankKey>) -> Result<Self, RankError> {
        match (prev, next) {
            (None, None) => Ok(Self::initial()),
            (Some(prev), None) => Ok(prev.after()),
            (None, Some(next)) => Ok(next.before()),
            (Some(prev), Some(next)) => Self::between(prev, next),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn digits(&self) -> Vec<u8> {
        self.0.bytes().filter_map(digit_value).collect()
    }

    fn from_digits(digits: &[u8]) -> Self {
        Self(
            digits
                .iter()
                .map(|d| ALPHABET[usize::from(*d)] as char)
                .collect(),
        )
    }
}

/// Shortest digit string strictly between `low` and `high`.
///
/// `low` is padded with zero digits; `None` for `high` is the exclusive
/// upper bound 1.0.
fn midpoint(low: &[u8], high: Option<&[u8]>) -> Vec<u8> {
    if let Some(high) = high {
        let mut shared = 0;
        while shared < high.len() && low.get(shared).copied().unwrap_or(0) == high[shared] {
            shared += 1;
        }
        if shared > 0 {
            let mut out = high[..shared].to_vec();
            out.extend(midpoint(
                low.get(shared..).unwrap_or(&[]),
                Some(&high[shared..]),
            ));
            return out;
        }
    }

    let lo = low.first().copied().unwrap_or(0);
    let hi = high.and_then(|h| h.first().copied()).unwrap_or(BASE);
    if hi > lo + 1 {
        return vec![(lo + hi) / 2];
    }

    match high {
        // The one-digit prefix of `high` is already below it and above `low`.
        Some(high) if high.len() > 1 => vec![high[0]],
        _ => {
            let mut out = vec![lo];
            out.extend(midpoint(low.get(1..).unwrap_or(&[]), None));
            out
        }
    }
}

fn digit_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'z' => Some(byte - b'a' + 10),
        _ => None,
    }
}

impl fmt::Display for RankKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RankKey {
    type Err = RankError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RankKey {
    type Error = RankError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RankKey> for String {
    fn from(key: RankKey) -> Self {
        key.0
    }
}
