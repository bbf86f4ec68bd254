//! Ethereum address derivation from secp256k1 public keys.
//!
//! The custody service hands out its public key once, as DER. After
//! [`crate::der::decode_public_key`] the raw point goes through the standard
//! Ethereum address computation:
//!
//! 1. Take the uncompressed public key (65 bytes: `0x04 || x || y`)
//! 2. Drop the `0x04` prefix, leaving `x || y` (64 bytes)
//! 3. Keccak-256 the 64 bytes
//! 4. Keep the last 20 bytes of the digest
//!
//! # Example
//!
//! ```
//! use kms_evm_signer_core::Address;
//!
//! // Public key of the private key `1` (the generator point).
//! let point = hex::decode(concat!(
//!     "04",
//!     "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
//!     "483ada7726a3c4655da4fbfc0e1108a8fd17b448a68554199c47d08ffb10d4b8",
//! ))
//! .unwrap();
//! let address = Address::from_public_key_bytes(&point).unwrap();
//! assert_eq!(address.to_hex(), "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf");
//! ```

use std::fmt;

use alloy_primitives::{Address as AlloyAddress, keccak256};
use k256::ecdsa::VerifyingKey;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An Ethereum address (20 bytes).
///
/// Wraps [`alloy_primitives::Address`]; serializes as a plain hex string so it
/// can sit directly inside JSON-RPC payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(AlloyAddress);

impl Address {
    /// The length of an Ethereum address in bytes.
    pub const BYTE_LEN: usize = 20;

    /// Creates a new address from a 20-byte array.
    #[must_use]
    pub const fn new(bytes: [u8; Self::BYTE_LEN]) -> Self {
        Self(AlloyAddress::new(bytes))
    }

    /// Derives the address of a secp256k1 verifying key.
    ///
    /// # Example
    ///
    /// ```
    /// use k256::ecdsa::SigningKey;
    /// use kms_evm_signer_core::Address;
    ///
    /// let key = SigningKey::from_slice(&[0x01; 32]).unwrap();
    /// let address = Address::from_public_key(key.verifying_key());
    /// assert_eq!(address.to_hex().len(), 42);
    /// ```
    #[must_use]
    pub fn from_public_key(public_key: &VerifyingKey) -> Self {
        // Uncompressed encoding is always 0x04 || x || y
        let encoded = public_key.to_encoded_point(false);
        Self::from_coordinates(&encoded.as_bytes()[1..])
    }

    /// Derives an address from raw uncompressed public key bytes.
    ///
    /// # Arguments
    ///
    /// * `bytes` - Either 65 bytes (`0x04 || x || y`) or 64 bytes (`x || y`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if:
    /// - The byte length is not 64 or 65
    /// - For 65-byte input, the first byte is not `0x04`
    pub fn from_public_key_bytes(bytes: &[u8]) -> Result<Self> {
        let coordinates = match bytes.len() {
            64 => bytes,
            65 => {
                if bytes[0] != 0x04 {
                    return Err(Error::Decode(
                        "65-byte public key must start with 0x04".to_string(),
                    ));
                }
                &bytes[1..]
            }
            len => {
                return Err(Error::Decode(format!(
                    "expected 64 or 65 public key bytes, got {len}"
                )));
            }
        };

        Ok(Self::from_coordinates(coordinates))
    }

    /// Hashes `x || y` and keeps the low 20 bytes.
    fn from_coordinates(coordinates: &[u8]) -> Self {
        let hash = keccak256(coordinates);

        let mut address_bytes = [0u8; Self::BYTE_LEN];
        address_bytes.copy_from_slice(&hash[12..]);
        Self::new(address_bytes)
    }

    /// Returns the address as a byte slice.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; Self::BYTE_LEN] {
        &self.0.0.0
    }

    /// Returns the EIP-55 mixed-case checksum form with `0x` prefix.
    #[must_use]
    pub fn to_checksum_hex(&self) -> String {
        self.0.to_checksum(None)
    }

    /// Returns the lowercase hex form with `0x` prefix.
    ///
    /// This is the form reported by `eth_accounts`.
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.as_bytes()))
    }

    /// Parses an address from a hex string, optionally prefixed with `0x`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HexDecodeFailed`] if the hex string is invalid, or
    /// [`Error::Decode`] if the decoded bytes are not 20 bytes.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
        let bytes: [u8; Self::BYTE_LEN] = hex::decode(hex_str)?.try_into().map_err(|bytes: Vec<u8>| {
            Error::Decode(format!(
                "expected {} address bytes, got {}",
                Self::BYTE_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self::new(bytes))
    }

    /// Returns the inner [`alloy_primitives::Address`].
    #[must_use]
    pub const fn inner(&self) -> AlloyAddress {
        self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_checksum_hex())
    }
}

impl From<AlloyAddress> for Address {
    fn from(addr: AlloyAddress) -> Self {
        Self(addr)
    }
}

impl From<Address> for AlloyAddress {
    fn from(addr: Address) -> Self {
        addr.0
    }
}
