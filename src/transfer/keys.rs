//! Key Sources
//!
//! A key source provides addresses and secp256k1 signatures over 32-byte
//! hashes. Two kinds exist: a secret held in memory and an index on a
//! hardware device that asks its user to confirm every signature.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use alloy::primitives::{Address, keccak256};
use async_trait::async_trait;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use thiserror::Error;
use tracing::info;

use super::types::Endpoint;
use crate::ids::{ShortId, cb58_decode};

const SOFT_KEY_PREFIX: &str = "PrivateKey-";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("Invalid private key: {0}")]
    InvalidSecret(String),

    #[error("Cannot read key file: {0}")]
    Io(String),

    #[error("Hardware device error: {0}")]
    Device(String),

    #[error("Signature rejected on device")]
    UserRejected,

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Cannot format address: {0}")]
    Address(String),
}

/// 65-byte `r || s || v` signature with `v` in {0, 1}
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature(pub [u8; 65]);

impl RecoverableSignature {
    pub fn new(signature: &Signature, recovery_id: RecoveryId) -> Self {
        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&signature.to_bytes());
        out[64] = recovery_id.to_byte();
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; 65] {
        &self.0
    }

    pub fn parity(&self) -> bool {
        self.0[64] == 1
    }

    /// Split into the k256 signature and recovery ID
    pub fn parts(&self) -> Result<(Signature, RecoveryId), KeyError> {
        let signature = Signature::from_slice(&self.0[..64])
            .map_err(|e| KeyError::InvalidSignature(e.to_string()))?;
        let recovery_id = RecoveryId::from_byte(self.0[64])
            .ok_or_else(|| KeyError::InvalidSignature(format!("bad recovery id {}", self.0[64])))?;
        Ok((signature, recovery_id))
    }

    /// Public key that produced this signature over `hash`
    pub fn recover(&self, hash: &[u8; 32]) -> Result<VerifyingKey, KeyError> {
        let (signature, recovery_id) = self.parts()?;
        VerifyingKey::recover_from_prehash(hash, &signature, recovery_id)
            .map_err(|e| KeyError::InvalidSignature(e.to_string()))
    }
}

impl fmt::Debug for RecoverableSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecoverableSignature(0x{})", hex::encode(self.0))
    }
}

/// Ethereum-style account address of a public key
pub fn evm_address(key: &VerifyingKey) -> Address {
    let uncompressed = key.to_encoded_point(false);
    let hash = keccak256(&uncompressed.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// Address provider and hash signer
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Key source name for logging
    fn name(&self) -> &'static str;

    fn public_key(&self) -> &VerifyingKey;

    /// Each signature needs a human in the loop
    fn requires_manual_confirmation(&self) -> bool;

    /// Can sign a same-ledger P-Chain base transaction
    fn can_sign_base_tx(&self) -> bool;

    async fn sign_hash(&self, hash: &[u8; 32]) -> Result<RecoverableSignature, KeyError>;

    fn short_id(&self) -> ShortId {
        ShortId::from_public_key(self.public_key())
    }

    fn evm_address(&self) -> Address {
        evm_address(self.public_key())
    }

    /// Address of this key on `endpoint`
    fn address_for(&self, endpoint: Endpoint, hrp: &str) -> Result<String, KeyError> {
        match endpoint {
            Endpoint::PChain | Endpoint::XChain => self
                .short_id()
                .to_address(&endpoint.alias(), hrp)
                .map_err(|e| KeyError::Address(e.to_string())),
            Endpoint::CChain | Endpoint::Evm(_) => Ok(self.evm_address().to_checksum(None)),
        }
    }
}

/// In-memory secp256k1 secret
pub struct LocalSecret {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl LocalSecret {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let signing_key =
            SigningKey::from_slice(bytes).map_err(|e| KeyError::InvalidSecret(e.to_string()))?;
        let verifying_key = *signing_key.verifying_key();
        Ok(Self {
            signing_key,
            verifying_key,
        })
    }

    /// Parse `PrivateKey-<cb58>` or (optionally `0x`-prefixed) hex
    pub fn parse(text: &str) -> Result<Self, KeyError> {
        let text = text.trim();
        if let Some(encoded) = text.strip_prefix(SOFT_KEY_PREFIX) {
            let bytes = cb58_decode(encoded).map_err(|e| KeyError::InvalidSecret(e.to_string()))?;
            return Self::from_bytes(&bytes);
        }
        let hex_text = text.strip_prefix("0x").unwrap_or(text);
        let bytes = hex::decode(hex_text).map_err(|e| KeyError::InvalidSecret(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn load(path: &Path) -> Result<Self, KeyError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| KeyError::Io(format!("{}: {}", path.display(), e)))?;
        Self::parse(&text)
    }
}

impl fmt::Debug for LocalSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSecret")
            .field("short_id", &self.short_id())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl KeySource for LocalSecret {
    fn name(&self) -> &'static str {
        "local"
    }

    fn public_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    fn requires_manual_confirmation(&self) -> bool {
        false
    }

    fn can_sign_base_tx(&self) -> bool {
        true
    }

    async fn sign_hash(&self, hash: &[u8; 32]) -> Result<RecoverableSignature, KeyError> {
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(hash)
            .map_err(|e| KeyError::InvalidSignature(e.to_string()))?;
        Ok(RecoverableSignature::new(&signature, recovery_id))
    }
}

/// Transport to a hardware signer
#[async_trait]
pub trait HardwareDevice: Send + Sync {
    /// SEC1-encoded public key at derivation index `index`
    async fn public_key(&self, index: u32) -> Result<Vec<u8>, KeyError>;

    /// Sign a 32-byte hash; blocks until the user confirms or rejects
    async fn sign_hash(&self, index: u32, hash: &[u8; 32]) -> Result<[u8; 65], KeyError>;

    /// Device firmware can sign P-Chain base transactions
    fn supports_base_tx(&self) -> bool {
        false
    }
}

/// Key at a derivation index on a hardware device
pub struct HardwareIndexed {
    device: Arc<dyn HardwareDevice>,
    index: u32,
    verifying_key: VerifyingKey,
}

impl HardwareIndexed {
    pub async fn connect(device: Arc<dyn HardwareDevice>, index: u32) -> Result<Self, KeyError> {
        let sec1 = device.public_key(index).await?;
        let verifying_key =
            VerifyingKey::from_sec1_bytes(&sec1).map_err(|e| KeyError::Device(e.to_string()))?;
        Ok(Self {
            device,
            index,
            verifying_key,
        })
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Debug for HardwareIndexed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardwareIndexed")
            .field("index", &self.index)
            .field("short_id", &self.short_id())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl KeySource for HardwareIndexed {
    fn name(&self) -> &'static str {
        "hardware"
    }

    fn public_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    fn requires_manual_confirmation(&self) -> bool {
        true
    }

    fn can_sign_base_tx(&self) -> bool {
        self.device.supports_base_tx()
    }

    async fn sign_hash(&self, hash: &[u8; 32]) -> Result<RecoverableSignature, KeyError> {
        info!(
            index = self.index,
            hash = %hex::encode(hash),
            "Confirm the signature on your device"
        );
        let raw = self.device.sign_hash(self.index, hash).await?;
        let signature = RecoverableSignature(raw);
        // Device must have signed with the key it reported
        if signature.recover(hash)? != self.verifying_key {
            return Err(KeyError::InvalidSignature(
                "device signature does not match its public key".to_string(),
            ));
        }
        Ok(signature)
    }
}

/// Scriptable device for tests
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub struct MockDevice {
        secret: LocalSecret,
        sign_count: AtomicUsize,
        reject_next: Mutex<bool>,
        wrong_key: Option<LocalSecret>,
    }

    impl MockDevice {
        pub fn new(secret_hex: &str) -> Self {
            Self {
                secret: LocalSecret::parse(secret_hex).unwrap(),
                sign_count: AtomicUsize::new(0),
                reject_next: Mutex::new(false),
                wrong_key: None,
            }
        }

        /// Report one key, sign with another
        pub fn with_wrong_signer(mut self, other_hex: &str) -> Self {
            self.wrong_key = Some(LocalSecret::parse(other_hex).unwrap());
            self
        }

        pub fn set_reject_next(&self, reject: bool) {
            *self.reject_next.lock().unwrap() = reject;
        }

        pub fn sign_count(&self) -> usize {
            self.sign_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HardwareDevice for MockDevice {
        async fn public_key(&self, _index: u32) -> Result<Vec<u8>, KeyError> {
            Ok(self
                .secret
                .public_key()
                .to_encoded_point(true)
                .as_bytes()
                .to_vec())
        }

        async fn sign_hash(&self, _index: u32, hash: &[u8; 32]) -> Result<[u8; 65], KeyError> {
            {
                let mut reject = self.reject_next.lock().unwrap();
                if *reject {
                    *reject = false;
                    return Err(KeyError::UserRejected);
                }
            }
            self.sign_count.fetch_add(1, Ordering::SeqCst);
            let signer = self.wrong_key.as_ref().unwrap_or(&self.secret);
            Ok(signer.sign_hash(hash).await?.0)
        }
    }
}
