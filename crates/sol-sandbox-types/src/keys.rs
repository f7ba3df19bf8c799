//! Ed25519 keys, signatures and hashes.
//!
//! - [`Pubkey`]: 32-byte account address, displayed in base58
//! - [`Keypair`]: signing key; funding accounts are read from Solana CLI
//!   JSON keypair files (a JSON array of 64 bytes: secret then public)
//! - [`Signature`]: 64-byte ed25519 signature, displayed in base58
//! - [`Hash`]: 32-byte blockhash, displayed in base58
//!
//! ```
//! use sol_sandbox_types::keys::{Keypair, Pubkey};
//!
//! let kp = Keypair::generate();
//! let sig = kp.sign(b"message");
//! assert!(kp.pubkey().verify(b"message", &sig));
//!
//! let parsed: Pubkey = kp.pubkey().to_string().parse().unwrap();
//! assert_eq!(parsed, kp.pubkey());
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// Errors from key parsing and loading.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid base58 {what}: {value}")]
    InvalidBase58 { what: &'static str, value: String },

    #[error("invalid {what} length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("keypair bytes are inconsistent (public half does not match secret)")]
    InconsistentKeypair,

    #[error("failed to read keypair file {path}: {message}")]
    KeypairFile { path: String, message: String },
}

fn decode_fixed<const N: usize>(s: &str, what: &'static str) -> Result<[u8; N], KeyError> {
    let bytes = bs58::decode(s.trim())
        .into_vec()
        .map_err(|_| KeyError::InvalidBase58 {
            what,
            value: s.to_string(),
        })?;
    let actual = bytes.len();
    bytes.try_into().map_err(|_| KeyError::InvalidLength {
        what,
        expected: N,
        actual,
    })
}

// =============================================================================
// Pubkey
// =============================================================================

/// A 32-byte account address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Pubkey([u8; 32]);

impl Pubkey {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Verify an ed25519 signature made by this key over `message`.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&self.0) else {
            return false;
        };
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        key.verify(message, &sig).is_ok()
    }
}

/// The system program (all-zero address, `11111111111111111111111111111111`).
pub const SYSTEM_PROGRAM_ID: Pubkey = Pubkey([0u8; 32]);

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pubkey({})", self)
    }
}

impl FromStr for Pubkey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_fixed::<32>(s, "pubkey").map(Self)
    }
}

// Human-readable formats (JSON) carry base58 strings; binary formats carry the
// raw 32 bytes with no length prefix, which is what instruction data expects.
impl Serialize for Pubkey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Pubkey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(de::Error::custom)
        } else {
            <[u8; 32]>::deserialize(deserializer).map(Self)
        }
    }
}

// =============================================================================
// Signature / Hash
// =============================================================================

/// A 64-byte ed25519 signature. The first signature of a transaction is its id.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature([u8; 64]);

impl Signature {
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self([0u8; 64])
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self)
    }
}

impl FromStr for Signature {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_fixed::<64>(s, "signature").map(Self)
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// A 32-byte hash (recent blockhash).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash([u8; 32]);

impl Hash {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self)
    }
}

impl FromStr for Hash {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_fixed::<32>(s, "hash").map(Self)
    }
}

// =============================================================================
// Keypair
// =============================================================================

/// An ed25519 signing keypair.
#[derive(Clone)]
pub struct Keypair(SigningKey);

impl Keypair {
    /// Generate a fresh keypair from the OS random source.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self(SigningKey::generate(&mut csprng))
    }

    /// Deterministic keypair from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self(SigningKey::from_bytes(seed))
    }

    /// Parse the 64-byte `secret || public` layout used by keypair files.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let arr: [u8; 64] = bytes.try_into().map_err(|_| KeyError::InvalidLength {
            what: "keypair",
            expected: 64,
            actual: bytes.len(),
        })?;
        SigningKey::from_keypair_bytes(&arr)
            .map(Self)
            .map_err(|_| KeyError::InconsistentKeypair)
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        self.0.to_keypair_bytes()
    }

    /// Read a Solana CLI keypair file (JSON array of 64 integers).
    pub fn read_from_file(path: &Path) -> Result<Self, KeyError> {
        let file_err = |message: String| KeyError::KeypairFile {
            path: path.display().to_string(),
            message,
        };
        let data = std::fs::read_to_string(path).map_err(|e| file_err(e.to_string()))?;
        let bytes: Vec<u8> = serde_json::from_str(&data).map_err(|e| file_err(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Write the keypair in Solana CLI JSON format.
    pub fn write_to_file(&self, path: &Path) -> Result<(), KeyError> {
        let file_err = |message: String| KeyError::KeypairFile {
            path: path.display().to_string(),
            message,
        };
        let json = serde_json::to_string(&self.to_bytes().to_vec())
            .map_err(|e| file_err(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| file_err(e.to_string()))?;
        }
        std::fs::write(path, json).map_err(|e| file_err(e.to_string()))
    }

    pub fn pubkey(&self) -> Pubkey {
        Pubkey(self.0.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.0.sign(message).to_bytes())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair({})", self.pubkey())
    }
}
