//! Encoding utilities for base64, base58 and digests.
//!
//! Provides shared encoding/decoding functions used across workspace crates.
//! Program buffers travel as base64 over HTTP and RPC; keys and signatures
//! are displayed in base58.

use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};

// =============================================================================
// Base64 Encoding/Decoding
// =============================================================================

/// Encode bytes to base64 string.
pub fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decode base64 string to bytes with context-aware error message.
///
/// # Arguments
/// * `b64` - Base64 encoded string
/// * `context` - Description for error messages (e.g., "program buffer")
pub fn base64_decode(b64: &str, context: &str) -> Result<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(b64.trim())
        .map_err(|e| anyhow!("Failed to decode {} from base64: {}", context, e))
}

/// Decode base64 string to bytes, returning None on failure.
pub fn try_base64_decode(b64: &str) -> Option<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(b64.trim())
        .ok()
}

// =============================================================================
// Base58
// =============================================================================

pub fn base58_encode(bytes: &[u8]) -> String {
    bs58::encode(bytes).into_string()
}

pub fn base58_decode(s: &str, context: &str) -> Result<Vec<u8>> {
    bs58::decode(s.trim())
        .into_vec()
        .map_err(|e| anyhow!("Invalid {} base58 '{}': {}", context, s, e))
}

// =============================================================================
// Digests
// =============================================================================

pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Lowercase hex SHA-256 of `bytes`, used as the artifact content hash.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(sha256(bytes))
}
