//! The signing orchestrator.
//!
//! [`KmsSigner`] is the pipeline handler that turns `eth_sendTransaction`
//! into `eth_sendRawTransaction`, with the private key kept in a
//! [`CustodyService`]. It also answers `eth_accounts` and
//! `eth_requestAccounts` with the custody key's address.
//!
//! # Per-transaction flow
//!
//! 1. Resolve the sender address (derived once from the custody public key)
//! 2. Resolve the nonce from `eth_getTransactionCount(sender, "pending")`
//!    unless the caller supplied one
//! 3. Resolve the chain id (queried once with `eth_chainId`)
//! 4. Build the unsigned transaction and hash it
//! 5. Have the custody service sign the digest
//! 6. Decode, normalize and complete the signature with its recovery id
//! 7. Submit the signed encoding and return the node's answer unmodified
//!
//! Fee fields must already be present; put a [`crate::FeeEstimator`] in front
//! of the signer to fill them.
//!
//! # Concurrency
//!
//! The sender and the chain id are resolved at most once per instance. The
//! nonce is not: two sends racing on one instance may both read the same
//! pending nonce, and the node will reject or replace one of them.

use std::fmt;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::address::Address;
use crate::crypto::create_ethereum_signature;
use crate::custody::{CustodyService, KeyId, SigningRequest};
use crate::der::{UNCOMPRESSED_POINT_LEN, decode_public_key};
use crate::error::{Error, Result};
use crate::rpc::{Handler, Next, RpcCall, Transport, method, parse_u64_quantity};
use crate::transaction::TransactionRequest;

/// The sender identity of a custody key, derived once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRecord {
    /// The custody key handle.
    pub key_id: KeyId,

    /// The Ethereum address of the key.
    pub address: Address,

    /// The uncompressed public key, `0x04 || x || y`.
    pub raw_public_key: [u8; UNCOMPRESSED_POINT_LEN],
}

/// Signs transactions with a custody key and submits them.
pub struct KmsSigner<C> {
    key_id: KeyId,
    custody: C,
    sender: OnceCell<AddressRecord>,
    chain_id: OnceCell<u64>,
}

impl<C> fmt::Debug for KmsSigner<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KmsSigner")
            .field("key_id", &self.key_id)
            .field("sender", &self.sender.get().map(|record| record.address))
            .field("chain_id", &self.chain_id.get())
            .finish_non_exhaustive()
    }
}

impl<C: CustodyService> KmsSigner<C> {
    /// Creates a signer for `key_id`. Nothing is fetched until first use.
    #[must_use]
    pub fn new(key_id: impl Into<KeyId>, custody: C) -> Self {
        Self {
            key_id: key_id.into(),
            custody,
            sender: OnceCell::new(),
            chain_id: OnceCell::new(),
        }
    }

    /// Returns the custody key handle.
    #[must_use]
    pub const fn key_id(&self) -> &KeyId {
        &self.key_id
    }

    /// Returns the sender identity, fetching the public key on first use.
    ///
    /// # Errors
    ///
    /// Returns the custody service error, or [`Error::Decode`] if the public
    /// key is not a valid secp256k1 SPKI. A failed derivation is retried on
    /// the next call.
    pub async fn address_record(&self) -> Result<&AddressRecord> {
        self.sender
            .get_or_try_init(|| async {
                let spki = self.custody.public_key(&self.key_id).await?;
                let raw_public_key = decode_public_key(&spki)?;
                let address = Address::from_public_key_bytes(&raw_public_key)?;

                info!(target: "kms_signer", key_id = %self.key_id, %address, "derived signer address");
                Ok::<_, Error>(AddressRecord {
                    key_id: self.key_id.clone(),
                    address,
                    raw_public_key,
                })
            })
            .await
    }

    /// Returns the sender address.
    ///
    /// # Errors
    ///
    /// See [`Self::address_record`].
    pub async fn address(&self) -> Result<Address> {
        Ok(self.address_record().await?.address)
    }

    /// Returns the chain id of the node behind `node`, queried once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChainIdQuery`] if the query fails.
    pub async fn chain_id(&self, node: &dyn Transport) -> Result<u64> {
        self.chain_id
            .get_or_try_init(|| async {
                let response = node
                    .request(RpcCall::new(method::CHAIN_ID, vec![]))
                    .await
                    .map_err(|err| Error::ChainIdQuery(err.to_string()))?;
                parse_u64_quantity(&response).map_err(|err| Error::ChainIdQuery(err.to_string()))
            })
            .await
            .copied()
    }

    /// Queries the pending nonce of `sender`. Never cached.
    async fn pending_nonce(&self, sender: &Address, node: &dyn Transport) -> Result<u64> {
        let response = node
            .request(RpcCall::new(
                method::GET_TRANSACTION_COUNT,
                vec![json!(sender.to_hex()), json!("pending")],
            ))
            .await
            .map_err(|err| Error::NonceQuery(err.to_string()))?;
        parse_u64_quantity(&response).map_err(|err| Error::NonceQuery(err.to_string()))
    }

    /// Signs `request` and returns the `0x`-prefixed raw transaction.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidTransaction`] if `from` or `chainId` disagree with
    ///   the signer, or the request is incomplete
    /// - [`Error::NonceQuery`] / [`Error::ChainIdQuery`] if the node fails
    /// - [`Error::RemoteSign`] if custody fails or returns no signature
    /// - [`Error::Decode`] / [`Error::Recovery`] if the signature is unusable
    pub async fn sign_transaction(
        &self,
        request: &TransactionRequest,
        node: &dyn Transport,
    ) -> Result<String> {
        let sender = self.address().await?;
        if let Some(from) = request.from {
            if from != sender {
                return Err(Error::InvalidTransaction(format!(
                    "from {from} does not match signer {sender}"
                )));
            }
        }

        let nonce = match request.nonce()? {
            Some(nonce) => nonce,
            None => self.pending_nonce(&sender, node).await?,
        };

        let chain_id = self.chain_id(node).await?;
        if let Some(requested) = request.chain_id()? {
            if requested != chain_id {
                return Err(Error::InvalidTransaction(format!(
                    "chainId {requested} does not match node chain id {chain_id}"
                )));
            }
        }

        let tx = request.build(chain_id, nonce)?;
        let digest = tx.signing_hash();

        let der = self
            .custody
            .sign_digest(&SigningRequest {
                key_id: self.key_id.clone(),
                digest,
            })
            .await?;
        if der.is_empty() {
            return Err(Error::RemoteSign(
                "custody service returned no signature".to_string(),
            ));
        }

        let signature = create_ethereum_signature(&der, &digest, &sender)?;
        Ok(tx.signed_hex(&signature))
    }

    /// Signs `request` and submits it with `eth_sendRawTransaction`.
    ///
    /// Returns whatever the node answers, normally the transaction hash.
    ///
    /// # Errors
    ///
    /// See [`Self::sign_transaction`]; submission errors are propagated.
    pub async fn send_transaction(
        &self,
        request: &TransactionRequest,
        node: &dyn Transport,
    ) -> Result<Value> {
        let raw = self.sign_transaction(request, node).await?;
        debug!(target: "kms_signer", key_id = %self.key_id, "submitting signed transaction");

        node.request(RpcCall::new(method::SEND_RAW_TRANSACTION, vec![json!(raw)]))
            .await
    }
}

#[async_trait]
impl<C: CustodyService> Handler for KmsSigner<C> {
    async fn handle(&self, call: RpcCall, next: Next<'_>) -> Result<Value> {
        match call.method.as_str() {
            method::SEND_TRANSACTION => {
                let tx = call.params.first().ok_or_else(|| {
                    Error::InvalidTransaction("missing transaction object".to_string())
                })?;
                let request = TransactionRequest::from_value(tx)?;
                self.send_transaction(&request, &next).await
            }
            method::ACCOUNTS | method::REQUEST_ACCOUNTS => {
                Ok(json!([self.address().await?.to_hex()]))
            }
            _ => next.request(call).await,
        }
    }
}
