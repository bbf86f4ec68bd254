//! Canonical Ethereum signature type for secp256k1 ECDSA.
//!
//! A [`Signature`] is what remains of a custody signature after decoding,
//! low-S normalization and recovery id search (see [`crate::crypto`]):
//!
//! - `r`: the x-coordinate of the ephemeral point
//! - `s`: the signature scalar, always `<= n / 2`
//! - `recovery_id`: `0` or `1`, selecting which public key produced it
//!
//! How the recovery id lands on the wire depends on the transaction type:
//! EIP-1559 transactions carry it as `yParity`, EIP-155 legacy transactions
//! fold it into `v = chain_id * 2 + 35 + recovery_id`.
//!
//! # Example
//!
//! ```
//! use alloy_primitives::U256;
//! use kms_evm_signer_core::Signature;
//!
//! let sig = Signature::new(U256::from(1), U256::from(2), 1);
//! assert_eq!(sig.legacy_v(1), U256::from(38));
//! ```

use core::fmt;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

/// An Ethereum ECDSA signature over secp256k1, in canonical form.
///
/// # Wire Format
///
/// As raw bytes the signature is 65 bytes: `r (32) || s (32) || recovery_id (1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    r: U256,
    s: U256,
    recovery_id: u8,
}

impl Signature {
    /// The length of a serialized signature in bytes.
    pub const BYTE_LEN: usize = 65;

    /// Creates a new signature from its components.
    ///
    /// The caller is responsible for `s` being canonical and `recovery_id`
    /// being `0` or `1`; [`crate::crypto::create_ethereum_signature`] upholds
    /// both.
    #[must_use]
    pub const fn new(r: U256, s: U256, recovery_id: u8) -> Self {
        Self { r, s, recovery_id }
    }

    /// Returns the R component.
    #[must_use]
    pub const fn r(&self) -> U256 {
        self.r
    }

    /// Returns the S component.
    #[must_use]
    pub const fn s(&self) -> U256 {
        self.s
    }

    /// Returns the recovery id (`0` or `1`).
    #[must_use]
    pub const fn recovery_id(&self) -> u8 {
        self.recovery_id
    }

    /// Returns the EIP-155 `v` value for a legacy transaction on `chain_id`.
    ///
    /// Computed in 256 bits, so chain ids above `u64::MAX / 2` do not wrap.
    #[must_use]
    pub fn legacy_v(&self, chain_id: u64) -> U256 {
        U256::from(chain_id) * U256::from(2) + U256::from(35) + U256::from(self.recovery_id)
    }

    /// Serializes the signature to `r || s || recovery_id`.
    ///
    /// # Example
    ///
    /// ```
    /// use alloy_primitives::U256;
    /// use kms_evm_signer_core::Signature;
    ///
    /// let sig = Signature::new(U256::from(1), U256::from(2), 0);
    /// let bytes = sig.to_bytes();
    /// assert_eq!(bytes[31], 1);
    /// assert_eq!(bytes[63], 2);
    /// ```
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::BYTE_LEN] {
        let mut bytes = [0u8; Self::BYTE_LEN];
        bytes[0..32].copy_from_slice(&self.r.to_be_bytes::<32>());
        bytes[32..64].copy_from_slice(&self.s.to_be_bytes::<32>());
        bytes[64] = self.recovery_id;
        bytes
    }

    /// Encodes the signature as a hex string with `0x` prefix.
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_bytes()))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
