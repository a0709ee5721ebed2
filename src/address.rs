//! Payout address decoding
//!
//! Addresses are base58check strings laid out as
//! `[2-byte network id][20-byte script hash][4-byte checksum]`, where the
//! checksum is the first four bytes of the double SHA-256 of the first 22.
//!
//! Ownership checks must compare [`Address::script_address`], never the encoded
//! string: two encodings of the same script hash (different network ids, or
//! the same bytes re-encoded) are the same payout destination.

use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const NET_ID_LEN: usize = 2;
const SCRIPT_HASH_LEN: usize = 20;
const CHECKSUM_LEN: usize = 4;
const DECODED_LEN: usize = NET_ID_LEN + SCRIPT_HASH_LEN + CHECKSUM_LEN;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("invalid base58 encoding: {0}")]
    Base58(String),

    #[error("invalid decoded length {actual} (expected {expected})")]
    Length { actual: usize, expected: usize },

    #[error("checksum mismatch")]
    Checksum,
}

/// A decoded payout address
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Address {
    net_id: [u8; NET_ID_LEN],
    script_hash: [u8; SCRIPT_HASH_LEN],
}

impl Address {
    pub fn new(net_id: [u8; NET_ID_LEN], script_hash: [u8; SCRIPT_HASH_LEN]) -> Self {
        Self { net_id, script_hash }
    }

    pub fn decode(encoded: &str) -> Result<Self, AddressError> {
        let raw = bs58::decode(encoded.trim())
            .into_vec()
            .map_err(|e| AddressError::Base58(e.to_string()))?;
        if raw.len() != DECODED_LEN {
            return Err(AddressError::Length {
                actual: raw.len(),
                expected: DECODED_LEN,
            });
        }

        let (payload, checksum) = raw.split_at(NET_ID_LEN + SCRIPT_HASH_LEN);
        if checksum != &double_sha256(payload)[..CHECKSUM_LEN] {
            return Err(AddressError::Checksum);
        }

        let mut net_id = [0u8; NET_ID_LEN];
        net_id.copy_from_slice(&payload[..NET_ID_LEN]);
        let mut script_hash = [0u8; SCRIPT_HASH_LEN];
        script_hash.copy_from_slice(&payload[NET_ID_LEN..]);
        Ok(Self { net_id, script_hash })
    }

    pub fn encode(&self) -> String {
        let mut raw = Vec::with_capacity(DECODED_LEN);
        raw.extend_from_slice(&self.net_id);
        raw.extend_from_slice(&self.script_hash);
        let checksum = double_sha256(&raw);
        raw.extend_from_slice(&checksum[..CHECKSUM_LEN]);
        bs58::encode(raw).into_string()
    }

    /// Raw script hash bytes, without network id or checksum
    pub fn script_address(&self) -> &[u8] {
        &self.script_hash
    }

    pub fn net_id(&self) -> [u8; NET_ID_LEN] {
        self.net_id
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.encode())
    }
}

fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    out
}
