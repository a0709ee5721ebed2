//! Common types used throughout the ticket buyer

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::str::FromStr;

/// Number of atoms in one coin
pub const ATOMS_PER_COIN: i64 = 100_000_000;

/// Monetary amount in atoms.
///
/// Signed on purpose: `balance - min_balance` may go negative and the node can
/// report a non-positive ticket price, both of which must stay representable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(pub i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_atoms(atoms: i64) -> Self {
        Self(atoms)
    }

    /// Convert a coin value (as reported by RPC or written in config) to atoms.
    /// Returns `None` for NaN, infinities, and values outside the i64 range.
    pub fn from_coins(coins: f64) -> Option<Self> {
        if !coins.is_finite() {
            return None;
        }
        let atoms = (coins * ATOMS_PER_COIN as f64).round();
        if atoms < i64::MIN as f64 || atoms > i64::MAX as f64 {
            return None;
        }
        Some(Self(atoms as i64))
    }

    pub const fn atoms(self) -> i64 {
        self.0
    }

    pub fn to_coins(self) -> f64 {
        self.0 as f64 / ATOMS_PER_COIN as f64
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn saturating_sub(self, rhs: Amount) -> Amount {
        Amount(self.0.saturating_sub(rhs.0))
    }

    /// `self * n`, saturating at the i64 bounds
    pub fn saturating_mul(self, n: u32) -> Amount {
        Amount(self.0.saturating_mul(i64::from(n)))
    }

    /// How many whole `unit`s fit in `self`. Zero when either side is not positive.
    pub fn whole_units_of(self, unit: Amount) -> u64 {
        if self.0 <= 0 || unit.0 <= 0 {
            return 0;
        }
        (self.0 / unit.0) as u64
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, rhs: Amount) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sub for Amount {
    type Output = Amount;

    fn sub(self, rhs: Amount) -> Amount {
        self.saturating_sub(rhs)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let per = ATOMS_PER_COIN as u64;
        write!(f, "{}{}.{:08}", sign, abs / per, abs % per)
    }
}

/// 32-byte transaction hash, displayed and parsed as lowercase hex
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TxHash(pub [u8; 32]);

impl TxHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({})", self)
    }
}

impl FromStr for TxHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out)?;
        Ok(Self(out))
    }
}

impl Serialize for TxHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Identifies a block: its hash and height
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStamp {
    pub hash: TxHash,
    pub height: i64,
}

impl fmt::Display for BlockStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.height, self.hash)
    }
}

/// A ticket pending in the mempool or already mined.
/// Ownership is determined at query time, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRef {
    pub hash: TxHash,
    pub address: String,
    pub value: Amount,
}

/// One transaction output as reported by the node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: Amount,
    /// Encoded payout addresses; a ticket's voting output carries exactly one
    pub addresses: Vec<String>,
}

/// Verbose transaction lookup result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerboseTransaction {
    pub hash: TxHash,
    pub outputs: Vec<TxOutput>,
}

impl VerboseTransaction {
    /// Reference to the ticket this transaction represents, built from its voting output
    pub fn ticket_ref(&self) -> Option<TicketRef> {
        let voting = self.outputs.first()?;
        let address = voting.addresses.first()?.clone();
        Some(TicketRef {
            hash: self.hash,
            address,
            value: voting.value,
        })
    }
}

/// Mempool ticket fee aggregate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketFeeInfo {
    /// Number of tickets currently in the mempool, regardless of owner
    pub number: u32,
}

/// Stake-related counters maintained by the wallet backend.
/// May lag the chain briefly after a new block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeInfo {
    pub own_mempool_tickets: u32,
    pub all_mempool_tickets: u32,
    pub immature: u32,
    pub live: u32,
    pub difficulty: Amount,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_from_coins() {
        assert_eq!(Amount::from_coins(1.5), Some(Amount(150_000_000)));
        assert_eq!(Amount::from_coins(0.00000001), Some(Amount(1)));
        assert_eq!(Amount::from_coins(f64::NAN), None);
        assert_eq!(Amount::from_coins(f64::INFINITY), None);
    }

    #[test]
    fn test_amount_display() {
        assert_eq!(Amount(150_000_000).to_string(), "1.50000000");
        assert_eq!(Amount(-1).to_string(), "-0.00000001");
        assert_eq!(Amount::ZERO.to_string(), "0.00000000");
    }

    #[test]
    fn test_whole_units_of() {
        assert_eq!(Amount(9_000).whole_units_of(Amount(100)), 90);
        assert_eq!(Amount(99).whole_units_of(Amount(100)), 0);
        assert_eq!(Amount(-500).whole_units_of(Amount(100)), 0);
        assert_eq!(Amount(500).whole_units_of(Amount(0)), 0);
        assert_eq!(Amount(500).whole_units_of(Amount(-5)), 0);
    }

    #[test]
    fn test_tx_hash_hex() {
        let s = "ab".repeat(32);
        let h: TxHash = s.parse().unwrap();
        assert_eq!(h.to_string(), s);
        assert!("zz".parse::<TxHash>().is_err());

        let json = serde_json::to_string(&h).unwrap();
        let back: TxHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn test_ticket_ref_requires_voting_address() {
        let tx = VerboseTransaction {
            hash: TxHash([1; 32]),
            outputs: vec![TxOutput {
                value: Amount(100),
                addresses: vec![],
            }],
        };
        assert!(tx.ticket_ref().is_none());
    }
}
