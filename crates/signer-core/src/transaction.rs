//! Ethereum transaction types and signing payload generation.
//!
//! Two transaction formats are supported:
//!
//! - **EIP-155 Legacy Transactions**: `gasPrice` with chain id replay protection
//! - **EIP-1559 Transactions**: type 2 with `maxFeePerGas` and `maxPriorityFeePerGas`
//!
//! # Signing Flow
//!
//! 1. Parse the caller's `eth_sendTransaction` object into a [`TransactionRequest`]
//! 2. [`TransactionRequest::build`] it with the resolved chain id and nonce
//! 3. Call [`Transaction::signing_hash`] to get the digest for the custody service
//! 4. Combine the transaction with the canonical [`Signature`] via
//!    [`Transaction::signed_rlp`] and submit the bytes
//!
//! # Example
//!
//! ```
//! use alloy_primitives::U256;
//! use kms_evm_signer_core::{Address, Eip1559Transaction, Transaction};
//!
//! let tx = Transaction::Eip1559(Eip1559Transaction {
//!     chain_id: 1,
//!     nonce: 0,
//!     max_priority_fee_per_gas: U256::from(1_000_000_000u64),
//!     max_fee_per_gas: U256::from(100_000_000_000u64),
//!     gas_limit: 21000,
//!     to: Some(Address::new([0x11; 20])),
//!     value: U256::from(1_000_000_000_000_000_000u128),
//!     data: Default::default(),
//!     access_list: vec![],
//! });
//!
//! let digest = tx.signing_hash();
//! // Ask the custody service to sign `digest`...
//! ```

use alloy_primitives::{B256, Bytes, U256, keccak256};
use alloy_rlp::{Encodable, Header};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::{Error, Result};
use crate::signature::Signature;

/// An access list entry for EIP-2930/EIP-1559 transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessListEntry {
    /// The address being accessed.
    pub address: alloy_primitives::Address,

    /// The storage keys being accessed at this address.
    pub storage_keys: Vec<B256>,
}

/// An EIP-155 legacy transaction.
///
/// [EIP-155]: https://eips.ethereum.org/EIPS/eip-155
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyTransaction {
    /// The chain ID for replay protection.
    pub chain_id: u64,

    /// The transaction nonce.
    pub nonce: u64,

    /// The gas price in wei.
    pub gas_price: U256,

    /// The gas limit.
    pub gas_limit: u64,

    /// The recipient address, or `None` for contract creation.
    pub to: Option<Address>,

    /// The value to transfer in wei.
    pub value: U256,

    /// The transaction input data.
    pub data: Bytes,
}

impl LegacyTransaction {
    /// Writes `nonce, gasPrice, gasLimit, to, value, data`.
    fn encode_common(&self, out: &mut Vec<u8>) {
        self.nonce.encode(out);
        self.gas_price.encode(out);
        self.gas_limit.encode(out);
        encode_optional_address(self.to.as_ref(), out);
        self.value.encode(out);
        self.data.encode(out);
    }

    /// Generates the signing hash for this transaction.
    ///
    /// For EIP-155 transactions, the signing hash is:
    /// `keccak256(rlp([nonce, gasPrice, gasLimit, to, value, data, chainId, 0, 0]))`
    #[must_use]
    pub fn signing_hash(&self) -> B256 {
        let mut buf = Vec::new();

        encode_rlp_list(&mut buf, |buf| {
            self.encode_common(buf);
            self.chain_id.encode(buf);
            0u8.encode(buf);
            0u8.encode(buf);
        });

        keccak256(&buf)
    }

    /// Encodes the signed transaction.
    ///
    /// The recovery id is folded into `v = chain_id * 2 + 35 + recovery_id`.
    #[must_use]
    pub fn signed_rlp(&self, signature: &Signature) -> Vec<u8> {
        let mut buf = Vec::new();

        encode_rlp_list(&mut buf, |buf| {
            self.encode_common(buf);
            signature.legacy_v(self.chain_id).encode(buf);
            signature.r().encode(buf);
            signature.s().encode(buf);
        });

        buf
    }
}

/// An EIP-1559 (Type 2) transaction.
///
/// [EIP-1559]: https://eips.ethereum.org/EIPS/eip-1559
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eip1559Transaction {
    /// The chain ID.
    pub chain_id: u64,

    /// The transaction nonce.
    pub nonce: u64,

    /// The maximum priority fee per gas (tip).
    pub max_priority_fee_per_gas: U256,

    /// The maximum total fee per gas.
    pub max_fee_per_gas: U256,

    /// The gas limit.
    pub gas_limit: u64,

    /// The recipient address, or `None` for contract creation.
    pub to: Option<Address>,

    /// The value to transfer in wei.
    pub value: U256,

    /// The transaction input data.
    pub data: Bytes,

    /// The access list.
    pub access_list: Vec<AccessListEntry>,
}

impl Eip1559Transaction {
    /// The transaction type identifier for EIP-1559.
    pub const TX_TYPE: u8 = 0x02;

    fn encode_common(&self, out: &mut Vec<u8>) {
        self.chain_id.encode(out);
        self.nonce.encode(out);
        self.max_priority_fee_per_gas.encode(out);
        self.max_fee_per_gas.encode(out);
        self.gas_limit.encode(out);
        encode_optional_address(self.to.as_ref(), out);
        self.value.encode(out);
        self.data.encode(out);
        encode_access_list(&self.access_list, out);
    }

    /// Generates the signing hash for this transaction.
    ///
    /// For EIP-1559 transactions, the signing hash is:
    /// `keccak256(0x02 || rlp([chainId, nonce, maxPriorityFeePerGas, maxFeePerGas,
    ///   gasLimit, to, value, data, accessList]))`
    #[must_use]
    pub fn signing_hash(&self) -> B256 {
        let mut buf = Vec::with_capacity(256);
        buf.push(Self::TX_TYPE);
        encode_rlp_list(&mut buf, |buf| self.encode_common(buf));
        keccak256(&buf)
    }

    /// Encodes the signed transaction, type prefix included.
    ///
    /// The recovery id is carried as-is as `yParity`.
    #[must_use]
    pub fn signed_rlp(&self, signature: &Signature) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256);
        buf.push(Self::TX_TYPE);

        encode_rlp_list(&mut buf, |buf| {
            self.encode_common(buf);
            signature.recovery_id().encode(buf);
            signature.r().encode(buf);
            signature.s().encode(buf);
        });

        buf
    }
}

/// Encodes an RLP list using a closure to write elements.
fn encode_rlp_list<F>(out: &mut Vec<u8>, f: F)
where
    F: FnOnce(&mut Vec<u8>),
{
    let mut content = Vec::new();
    f(&mut content);

    let header = Header {
        list: true,
        payload_length: content.len(),
    };
    header.encode(out);
    out.extend_from_slice(&content);
}

/// Encodes an optional address; contract creation is the empty string.
fn encode_optional_address(addr: Option<&Address>, out: &mut Vec<u8>) {
    match addr {
        Some(a) => a.inner().encode(out),
        None => out.push(alloy_rlp::EMPTY_STRING_CODE),
    }
}

/// Encodes an access list to RLP.
fn encode_access_list(access_list: &[AccessListEntry], out: &mut Vec<u8>) {
    encode_rlp_list(out, |out| {
        for entry in access_list {
            encode_rlp_list(out, |out| {
                entry.address.encode(out);
                encode_rlp_list(out, |out| {
                    for key in &entry.storage_keys {
                        key.encode(out);
                    }
                });
            });
        }
    });
}

/// A unified transaction type supporting multiple formats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Transaction {
    /// EIP-155 legacy transaction.
    #[serde(rename = "legacy")]
    Legacy(LegacyTransaction),
    /// EIP-1559 (Type 2) transaction.
    #[serde(rename = "eip1559")]
    Eip1559(Eip1559Transaction),
}

impl Transaction {
    /// Returns the signing hash for this transaction.
    #[must_use]
    pub fn signing_hash(&self) -> B256 {
        match self {
            Self::Legacy(tx) => tx.signing_hash(),
            Self::Eip1559(tx) => tx.signing_hash(),
        }
    }

    /// Returns the chain ID for this transaction.
    #[must_use]
    pub const fn chain_id(&self) -> u64 {
        match self {
            Self::Legacy(tx) => tx.chain_id,
            Self::Eip1559(tx) => tx.chain_id,
        }
    }

    /// Returns the nonce for this transaction.
    #[must_use]
    pub const fn nonce(&self) -> u64 {
        match self {
            Self::Legacy(tx) => tx.nonce,
            Self::Eip1559(tx) => tx.nonce,
        }
    }

    /// Encodes the signed transaction.
    #[must_use]
    pub fn signed_rlp(&self, signature: &Signature) -> Vec<u8> {
        match self {
            Self::Legacy(tx) => tx.signed_rlp(signature),
            Self::Eip1559(tx) => tx.signed_rlp(signature),
        }
    }

    /// Encodes the signed transaction as `0x`-prefixed hex, the form
    /// `eth_sendRawTransaction` expects.
    #[must_use]
    pub fn signed_hex(&self, signature: &Signature) -> String {
        format!("0x{}", hex::encode(self.signed_rlp(signature)))
    }
}

/// The transaction object of an `eth_sendTransaction` call.
///
/// All quantities are optional here; fees are filled in by the fee estimator
/// and the nonce and chain id by the signer before [`Self::build`] runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    /// The sender. Must match the custody key when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,

    /// The recipient, absent for contract creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,

    /// The gas limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<U256>,

    /// The legacy gas price.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<U256>,

    /// The EIP-1559 fee cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<U256>,

    /// The EIP-1559 tip cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<U256>,

    /// The value in wei.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,

    /// The input data; `input` is accepted as an alias.
    #[serde(default, alias = "input", skip_serializing_if = "Option::is_none")]
    pub data: Option<Bytes>,

    /// The nonce; resolved from the node when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<U256>,

    /// The chain id; must match the node when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<U256>,

    /// The EIP-2930 access list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_list: Option<Vec<AccessListEntry>>,
}

impl TransactionRequest {
    /// Parses the first parameter of an `eth_sendTransaction` call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransaction`] if `value` is not a transaction
    /// object.
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|err| Error::InvalidTransaction(format!("malformed transaction: {err}")))
    }

    /// Returns `true` if both EIP-1559 fee fields are set.
    #[must_use]
    pub const fn has_eip1559_fees(&self) -> bool {
        self.max_fee_per_gas.is_some() && self.max_priority_fee_per_gas.is_some()
    }

    /// Returns `true` if the caller priced the transaction completely, either
    /// with `gasPrice` or with both EIP-1559 fields.
    #[must_use]
    pub const fn is_priced(&self) -> bool {
        self.gas_price.is_some() || self.has_eip1559_fees()
    }

    /// Returns the requested nonce, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransaction`] if it exceeds 64 bits.
    pub fn nonce(&self) -> Result<Option<u64>> {
        self.nonce.map(|nonce| to_u64(nonce, "nonce")).transpose()
    }

    /// Returns the requested chain id, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransaction`] if it exceeds 64 bits.
    pub fn chain_id(&self) -> Result<Option<u64>> {
        self.chain_id
            .map(|chain_id| to_u64(chain_id, "chainId"))
            .transpose()
    }

    /// Builds the unsigned transaction.
    ///
    /// Both EIP-1559 fee fields select a type 2 transaction; otherwise
    /// `gasPrice` selects a legacy one.
    ///
    /// # Arguments
    ///
    /// * `chain_id` - The resolved chain id
    /// * `nonce` - The resolved nonce
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransaction`] if the gas limit is missing, a
    /// quantity does not fit in 64 bits, or the fee fields are incomplete.
    pub fn build(&self, chain_id: u64, nonce: u64) -> Result<Transaction> {
        let gas = self
            .gas
            .ok_or_else(|| Error::InvalidTransaction("missing gas limit".to_string()))?;
        let gas_limit = to_u64(gas, "gas")?;
        let value = self.value.unwrap_or_default();
        let data = self.data.clone().unwrap_or_default();

        if let (Some(max_fee_per_gas), Some(max_priority_fee_per_gas)) =
            (self.max_fee_per_gas, self.max_priority_fee_per_gas)
        {
            return Ok(Transaction::Eip1559(Eip1559Transaction {
                chain_id,
                nonce,
                max_priority_fee_per_gas,
                max_fee_per_gas,
                gas_limit,
                to: self.to,
                value,
                data,
                access_list: self.access_list.clone().unwrap_or_default(),
            }));
        }

        match self.gas_price {
            Some(gas_price) => Ok(Transaction::Legacy(LegacyTransaction {
                chain_id,
                nonce,
                gas_price,
                gas_limit,
                to: self.to,
                value,
                data,
            })),
            None => Err(Error::InvalidTransaction(
                "missing fee fields: need gasPrice or maxFeePerGas and maxPriorityFeePerGas"
                    .to_string(),
            )),
        }
    }
}

fn to_u64(value: U256, field: &str) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| Error::InvalidTransaction(format!("{field} {value} exceeds 64 bits")))
}
