//! Primitive Types
//!
//! Identities, amounts and the fixed-point constants shared by every
//! component of the staking core.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Underlying-asset or receipt-token quantity in base units.
pub type Amount = u128;

/// Fixed-point scale for rates and the commission correction factor.
pub const SCALE: u128 = 1_000_000_000_000_000_000;

/// Denominator for parts-per-100000 quantities (rate deviation, commission).
pub const RATE_DENOMINATOR: u32 = 100_000;

/// Number of oracle seats.
pub const ORACLE_SEATS: usize = 3;

/// Distinct seats that must agree before a report is finalized.
pub const QUORUM: usize = 2;

// =============================================================================
// IDENTITY
// =============================================================================

/// 20-byte account / oracle address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Identity([u8; 20]);

impl Identity {
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Deterministic identity derived from a human-readable label.
    ///
    /// Takes the first 20 bytes of `sha256(label)`, so `"oracle-a"` always
    /// maps to the same address in configs, scenarios and tests.
    pub fn from_label(label: &str) -> Self {
        let digest = Sha256::digest(label.as_bytes());
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest[..20]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Error returned when an address string is malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdentityError(pub String);

impl fmt::Display for ParseIdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid identity '{}': expected 0x + 40 hex chars", self.0)
    }
}

impl std::error::Error for ParseIdentityError {}

impl FromStr for Identity {
    type Err = ParseIdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let body = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| ParseIdentityError(s.to_string()))?;
        if body.len() != 40 {
            return Err(ParseIdentityError(s.to_string()));
        }
        let raw = hex::decode(body).map_err(|_| ParseIdentityError(s.to_string()))?;
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&raw);
        Ok(Self(bytes))
    }
}

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
