//! Signature canonicalization and recovery for secp256k1 ECDSA.
//!
//! A custody service signs digests with plain ECDSA. Turning that into an
//! Ethereum signature takes three steps:
//!
//! 1. Decode the DER signature ([`crate::der`])
//! 2. Normalize S to the lower half of the curve order ([`canonicalize`])
//! 3. Find the recovery id that reproduces the signer address ([`recover_id`])
//!
//! The custody service never reports a recovery id, so it is searched for
//! rather than assumed.
//!
//! # Example
//!
//! ```
//! use alloy_primitives::U256;
//! use kms_evm_signer_core::crypto::{SECP256K1_HALF_N, canonicalize};
//!
//! let (_, s) = canonicalize(U256::from(1), SECP256K1_HALF_N + U256::from(1));
//! assert!(s <= SECP256K1_HALF_N);
//! ```

use alloy_primitives::{B256, U256};
use k256::ecdsa::{RecoveryId, Signature as K256Signature, VerifyingKey};
use tracing::debug;

use crate::address::Address;
use crate::der::decode_signature;
use crate::error::{Error, Result};
use crate::signature::Signature;

/// The order `n` of the secp256k1 curve.
pub const SECP256K1_N: U256 = U256::from_be_bytes([
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE,
    0xBA, 0xAE, 0xDC, 0xE6, 0xAF, 0x48, 0xA0, 0x3B, 0xBF, 0xD2, 0x5E, 0x8C, 0xD0, 0x36, 0x41, 0x41,
]);

/// `floor(n / 2)`, the largest canonical S value.
pub const SECP256K1_HALF_N: U256 = U256::from_be_bytes([
    0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0x5D, 0x57, 0x6E, 0x73, 0x57, 0xA4, 0x50, 0x1D, 0xDF, 0xE9, 0x2F, 0x46, 0x68, 0x1B, 0x20, 0xA0,
]);

/// Normalizes a signature to low-S form.
///
/// Per EIP-2, an S value above `n / 2` is replaced with `n - S`. Both
/// `(r, s)` and `(r, n - s)` verify for the same message, so only the lower
/// one is accepted on chain. Applying this twice never changes the result.
///
/// # Example
///
/// ```
/// use alloy_primitives::U256;
/// use kms_evm_signer_core::crypto::{SECP256K1_N, canonicalize};
///
/// let r = U256::from(7);
/// let (_, s) = canonicalize(r, SECP256K1_N - U256::from(1));
/// assert_eq!(s, U256::from(1));
/// ```
#[must_use]
pub fn canonicalize(r: U256, s: U256) -> (U256, U256) {
    if s > SECP256K1_HALF_N {
        (r, SECP256K1_N - s)
    } else {
        (r, s)
    }
}

/// Finds the recovery id for which `(r, s)` recovers to `expected`.
///
/// Candidates `0` and `1` (the `27`/`28` of pre-EIP-155 signatures) are tried
/// in order and the first one whose recovered key hashes to `expected` is
/// returned.
///
/// # Errors
///
/// Returns [`Error::Recovery`] if neither candidate matches, which means the
/// remote key is not the expected signer.
pub fn recover_id(digest: &B256, r: U256, s: U256, expected: &Address) -> Result<u8> {
    let signature = K256Signature::from_scalars(r.to_be_bytes::<32>(), s.to_be_bytes::<32>())
        .map_err(|_| Error::Recovery)?;

    for candidate in 0u8..2u8 {
        if recover_address(digest, &signature, candidate).as_ref() == Some(expected) {
            return Ok(candidate);
        }
    }

    debug!(target: "kms_signer", %expected, "no recovery id matched");
    Err(Error::Recovery)
}

/// Recovers the signer address for one recovery id candidate.
fn recover_address(digest: &B256, signature: &K256Signature, candidate: u8) -> Option<Address> {
    let recovery_id = RecoveryId::from_byte(candidate)?;
    VerifyingKey::recover_from_prehash(digest.as_slice(), signature, recovery_id)
        .ok()
        .map(|key| Address::from_public_key(&key))
}

/// Creates an Ethereum signature from a DER signature returned by custody.
///
/// This function:
///
/// 1. Decodes the DER signature
/// 2. Normalizes S to low-S form
/// 3. Searches the recovery id against the expected signer address
///
/// # Errors
///
/// Returns [`Error::Decode`] if the DER is malformed and [`Error::Recovery`]
/// if the signature does not belong to `expected`.
pub fn create_ethereum_signature(
    der_signature: &[u8],
    digest: &B256,
    expected: &Address,
) -> Result<Signature> {
    let raw = decode_signature(der_signature)?;
    let (r, s) = canonicalize(raw.r, raw.s);
    let recovery_id = recover_id(digest, r, s, expected)?;

    Ok(Signature::new(r, s, recovery_id))
}
