//! Ledger Identifiers
//!
//! 32-byte IDs (chains, assets, transactions) in CB58 text form and 20-byte
//! short IDs (secp256k1 key hashes) rendered as `P-avax1...` style bech32
//! addresses.

use std::fmt;
use std::str::FromStr;

use bech32::{Bech32, Hrp};
use k256::ecdsa::VerifyingKey;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const ID_LEN: usize = 32;
pub const SHORT_ID_LEN: usize = 20;
const CHECKSUM_LEN: usize = 4;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("Invalid base58: {0}")]
    Base58(String),

    #[error("Bad checksum")]
    Checksum,

    #[error("Expected {expected} bytes, got {got}")]
    Length { expected: usize, got: usize },

    #[error("Invalid bech32 address: {0}")]
    Bech32(String),

    #[error("Address HRP mismatch: expected {expected}, got {got}")]
    HrpMismatch { expected: String, got: String },
}

/// Last 4 bytes of SHA-256, appended to CB58 and hex payloads
pub fn checksum(bytes: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = Sha256::digest(bytes);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[digest.len() - CHECKSUM_LEN..]);
    out
}

/// Encode bytes as CB58 (base58 with SHA-256 checksum)
pub fn cb58_encode(bytes: &[u8]) -> String {
    let mut payload = bytes.to_vec();
    payload.extend_from_slice(&checksum(bytes));
    bs58::encode(payload).into_string()
}

/// Decode CB58 text, verifying the trailing checksum
pub fn cb58_decode(s: &str) -> Result<Vec<u8>, IdError> {
    let raw = bs58::decode(s)
        .into_vec()
        .map_err(|e| IdError::Base58(e.to_string()))?;
    if raw.len() < CHECKSUM_LEN {
        return Err(IdError::Checksum);
    }
    let (body, sum) = raw.split_at(raw.len() - CHECKSUM_LEN);
    if checksum(body) != sum {
        return Err(IdError::Checksum);
    }
    Ok(body.to_vec())
}

/// 32-byte identifier (blockchain, asset or transaction)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Id(pub [u8; ID_LEN]);

impl Id {
    pub const EMPTY: Id = Id([0u8; ID_LEN]);

    pub fn from_slice(bytes: &[u8]) -> Result<Self, IdError> {
        let arr: [u8; ID_LEN] = bytes.try_into().map_err(|_| IdError::Length {
            expected: ID_LEN,
            got: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// SHA-256 of `bytes` (transaction IDs)
    pub fn digest(bytes: &[u8]) -> Self {
        let mut out = [0u8; ID_LEN];
        out.copy_from_slice(&Sha256::digest(bytes));
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }

    pub fn to_cb58(&self) -> String {
        cb58_encode(&self.0)
    }
}

impl FromStr for Id {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_slice(&cb58_decode(s.trim())?)
    }
}

impl TryFrom<String> for Id {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Id> for String {
    fn from(id: Id) -> Self {
        id.to_cb58()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_cb58())
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.to_cb58())
    }
}

impl serde::Serialize for Id {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_cb58())
    }
}

impl<'de> serde::Deserialize<'de> for Id {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// 20-byte key hash: `ripemd160(sha256(compressed_pubkey))`
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct ShortId(pub [u8; SHORT_ID_LEN]);

impl ShortId {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, IdError> {
        let arr: [u8; SHORT_ID_LEN] = bytes.try_into().map_err(|_| IdError::Length {
            expected: SHORT_ID_LEN,
            got: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    pub fn from_public_key(key: &VerifyingKey) -> Self {
        let compressed = key.to_encoded_point(true);
        let sha = Sha256::digest(compressed.as_bytes());
        let mut out = [0u8; SHORT_ID_LEN];
        out.copy_from_slice(&Ripemd160::digest(sha));
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; SHORT_ID_LEN] {
        &self.0
    }

    /// Format as `<alias>-<bech32>` (e.g. `P-avax1...`)
    pub fn to_address(&self, chain_alias: &str, hrp: &str) -> Result<String, IdError> {
        let hrp = Hrp::parse(hrp).map_err(|e| IdError::Bech32(e.to_string()))?;
        let encoded = bech32::encode::<Bech32>(hrp, &self.0)
            .map_err(|e| IdError::Bech32(e.to_string()))?;
        Ok(format!("{}-{}", chain_alias, encoded))
    }

    /// Parse `P-avax1...`, `X-fuji1...` or a bare `avax1...` address.
    ///
    /// Returns the chain alias (empty when absent) and the short ID.
    pub fn parse_address(address: &str, expected_hrp: &str) -> Result<(String, Self), IdError> {
        let address = address.trim();
        let (alias, bech) = match address.split_once('-') {
            Some((alias, rest)) => (alias.to_string(), rest),
            None => (String::new(), address),
        };
        let (hrp, data) = bech32::decode(bech).map_err(|e| IdError::Bech32(e.to_string()))?;
        if hrp.as_str() != expected_hrp {
            return Err(IdError::HrpMismatch {
                expected: expected_hrp.to_string(),
                got: hrp.as_str().to_string(),
            });
        }
        Ok((alias, Self::from_slice(&data)?))
    }
}

impl fmt::Debug for ShortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShortId(0x{})", hex::encode(self.0))
    }
}

impl fmt::Display for ShortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}
