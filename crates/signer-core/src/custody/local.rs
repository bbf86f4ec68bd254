//! In-process custody backend.
//!
//! WARNING: keys live in process memory. For development and testing only.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::{Signature as K256Signature, SigningKey};
use k256::pkcs8::EncodePublicKey;

use super::{CustodyService, KeyId, SigningRequest};
use crate::address::Address;
use crate::error::{Error, Result};

/// Custody backed by in-memory secp256k1 keys.
///
/// Answers exactly like a remote service would: SPKI public keys and DER
/// signatures, so the whole decoding path runs against it.
#[derive(Clone, Default)]
pub struct LocalCustody {
    keys: BTreeMap<KeyId, SigningKey>,
}

impl fmt::Debug for LocalCustody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCustody")
            .field("keys", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl LocalCustody {
    /// Creates an empty key store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `key` under `key_id`, replacing any previous key.
    #[must_use]
    pub fn with_key(mut self, key_id: impl Into<KeyId>, key: SigningKey) -> Self {
        self.keys.insert(key_id.into(), key);
        self
    }

    /// Adds a key given as 32 hex-encoded bytes, `0x` prefix optional.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HexDecodeFailed`] for invalid hex and
    /// [`Error::InvalidConfig`] if the bytes are not a valid secret scalar.
    pub fn insert_hex(&mut self, key_id: impl Into<KeyId>, secret_hex: &str) -> Result<()> {
        let bytes = hex::decode(secret_hex.trim_start_matches("0x"))?;
        let key = SigningKey::from_slice(&bytes)
            .map_err(|_| Error::InvalidConfig("invalid secp256k1 private key".to_string()))?;
        self.keys.insert(key_id.into(), key);
        Ok(())
    }

    /// Returns the address of `key_id`, if present.
    #[must_use]
    pub fn address(&self, key_id: &KeyId) -> Option<Address> {
        self.keys
            .get(key_id)
            .map(|key| Address::from_public_key(key.verifying_key()))
    }

    fn key(&self, key_id: &KeyId) -> Result<&SigningKey> {
        self.keys
            .get(key_id)
            .ok_or_else(|| Error::RemoteSign(format!("unknown key {key_id}")))
    }
}

#[async_trait]
impl CustodyService for LocalCustody {
    async fn public_key(&self, key_id: &KeyId) -> Result<Vec<u8>> {
        let document = self
            .key(key_id)?
            .verifying_key()
            .to_public_key_der()
            .map_err(|err| Error::RemoteSign(format!("public key encoding failed: {err}")))?;
        Ok(document.as_bytes().to_vec())
    }

    async fn sign_digest(&self, request: &SigningRequest) -> Result<Vec<u8>> {
        let signature: K256Signature = self
            .key(&request.key_id)?
            .sign_prehash(request.digest.as_slice())
            .map_err(|err| Error::RemoteSign(err.to_string()))?;
        Ok(signature.to_der().as_bytes().to_vec())
    }
}
