//! Peer identifiers.
//!
//! The hub hands out identifiers starting at 1 and never reuses one for the
//! lifetime of a hub process, so gaps after disconnects are expected.

use std::fmt;
use std::num::{NonZeroU64, ParseIntError};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier assigned by the hub to a connected peer.
///
/// Serialized as a bare JSON number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(NonZeroU64);

impl PeerId {
    /// The first identifier a hub assigns.
    pub const FIRST: PeerId = PeerId(NonZeroU64::MIN);

    /// Creates an identifier, returning `None` for zero.
    pub fn new(value: u64) -> Option<Self> {
        NonZeroU64::new(value).map(Self)
    }

    /// Returns the raw numeric value.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when parsing a [`PeerId`] from a string.
#[derive(Debug, Error)]
pub enum ParsePeerIdError {
    /// Not a number.
    #[error("invalid peer id: {0}")]
    Invalid(#[from] ParseIntError),

    /// Zero is never assigned.
    #[error("peer id must be positive")]
    Zero,
}

impl FromStr for PeerId {
    type Err = ParsePeerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u64 = s.trim().parse()?;
        Self::new(value).ok_or(ParsePeerIdError::Zero)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_not_an_id() {
        assert!(PeerId::new(0).is_none());
        assert_eq!(PeerId::new(1), Some(PeerId::FIRST));
    }

    #[test]
    fn serializes_as_number() {
        let id = PeerId::new(42).unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");

        let parsed: PeerId = serde_json::from_str("7").unwrap();
        assert_eq!(parsed.get(), 7);

        assert!(serde_json::from_str::<PeerId>("0").is_err());
    }

    #[test]
    fn parse_from_str() {
        assert_eq!(" 3 ".parse::<PeerId>().unwrap().get(), 3);
        assert!(matches!("0".parse::<PeerId>(), Err(ParsePeerIdError::Zero)));
        assert!(matches!(
            "abc".parse::<PeerId>(),
            Err(ParsePeerIdError::Invalid(_))
        ));
    }

    #[test]
    fn ordering_follows_value() {
        let mut ids = vec![PeerId::new(3).unwrap(), PeerId::FIRST, PeerId::new(2).unwrap()];
        ids.sort();
        let raw: Vec<u64> = ids.into_iter().map(PeerId::get).collect();
        assert_eq!(raw, vec![1, 2, 3]);
    }
}
