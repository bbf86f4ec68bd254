//! Remote custody of signing keys.
//!
//! The signer never holds private key material. It talks to a custody service
//! (a cloud KMS, an HSM gateway, ...) through the [`CustodyService`] trait,
//! which knows only two operations:
//!
//! - fetch the public key of a key handle, as a DER `SubjectPublicKeyInfo`
//! - sign a 32-byte digest with a key handle, returning a DER ECDSA signature
//!
//! Everything Ethereum-specific (address derivation, low-S normalization,
//! recovery id search) happens on this side of the trait, in
//! [`crate::crypto`] and [`crate::address`].
//!
//! # Backends
//!
//! - [`LocalCustody`]: in-process `k256` keys, for development and tests
//!
//! Cloud backends implement the trait outside this crate.
//!
//! # Example
//!
//! ```ignore
//! use kms_evm_signer_core::custody::{CustodyService, KeyId, SigningRequest};
//!
//! let key_id = KeyId::from("alias/deployer");
//! let spki = custody.public_key(&key_id).await?;
//! let der = custody
//!     .sign_digest(&SigningRequest { key_id, digest })
//!     .await?;
//! ```

mod local;

use std::fmt;
use std::sync::Arc;

use alloy_primitives::B256;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use local::LocalCustody;

/// An opaque handle naming a key inside the custody service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(String);

impl KeyId {
    /// Creates a key handle.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the handle as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for KeyId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for KeyId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A digest to be signed by one custody key. Consumed once per transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningRequest {
    /// The key to sign with.
    pub key_id: KeyId,

    /// The Keccak-256 digest of the unsigned transaction.
    pub digest: B256,
}

/// A remote service holding secp256k1 private keys.
///
/// Implementations must not retry on their own; a failure is reported once
/// and surfaces to the caller of `eth_sendTransaction`.
#[async_trait]
pub trait CustodyService: Send + Sync {
    /// Fetches the public key of `key_id`.
    ///
    /// # Returns
    ///
    /// The DER-encoded `SubjectPublicKeyInfo`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::RemoteSign`] if the service fails.
    async fn public_key(&self, key_id: &KeyId) -> Result<Vec<u8>>;

    /// Signs the digest of `request` without hashing it again.
    ///
    /// # Returns
    ///
    /// The DER-encoded ECDSA signature `SEQUENCE { r, s }`. `s` may be in
    /// either half of the curve order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::RemoteSign`] if the service fails.
    async fn sign_digest(&self, request: &SigningRequest) -> Result<Vec<u8>>;
}

#[async_trait]
impl<T: CustodyService + ?Sized> CustodyService for Arc<T> {
    async fn public_key(&self, key_id: &KeyId) -> Result<Vec<u8>> {
        (**self).public_key(key_id).await
    }

    async fn sign_digest(&self, request: &SigningRequest) -> Result<Vec<u8>> {
        (**self).sign_digest(request).await
    }
}
