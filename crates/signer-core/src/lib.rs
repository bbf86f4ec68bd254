//! KMS EVM Signer Core Library
//!
//! This crate signs Ethereum transactions with a secp256k1 key that never
//! leaves a remote custody service (a cloud KMS or HSM), and picks fees from
//! live node feedback.
//!
//! # Overview
//!
//! A custody service only knows how to hand out a DER public key and sign a
//! digest with plain ECDSA. Ethereum wants more: an address, a low-S
//! signature and a recovery id. This library bridges the two and plugs into a
//! JSON-RPC request pipeline:
//!
//! - **Fee Estimation**: fills `maxFeePerGas`/`maxPriorityFeePerGas` from
//!   `eth_feeHistory`, or `gasPrice` on legacy nodes, with configurable floors
//! - **Signing**: turns `eth_sendTransaction` into `eth_sendRawTransaction`
//! - **Accounts**: answers `eth_accounts` with the custody key's address
//! - **DER Decoding**: signatures and `SubjectPublicKeyInfo` public keys
//! - **Canonicalization**: low-S normalization and recovery id search
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Caller (deploy scripts)                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Pipeline:   FeeEstimator  ──▶  KmsSigner  ──▶  Transport    │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │  Transaction │   Address     │  CustodyService               │
//! │  Encoding    │   Derivation  │  (remote KMS / LocalCustody)  │
//! ├──────────────┴───────────────┼──────────────────────────────┤
//! │  Crypto: canonicalize, recover_id  │   DER codec            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use kms_evm_signer_core::{NetworkConfig, Pipeline, RpcCall, Transport};
//!
//! let config = NetworkConfig::from_json(r#"{ "kmsKeyId": "alias/deployer" }"#)?;
//! let pipeline = Pipeline::from_config(&config, kms_client, http_transport)?
//!     .expect("kmsKeyId is set");
//!
//! let accounts = pipeline.request(RpcCall::new("eth_accounts", vec![])).await?;
//! let tx_hash = pipeline
//!     .request(RpcCall::new("eth_sendTransaction", vec![tx]))
//!     .await?;
//! ```
//!
//! ## Address Derivation
//!
//! ```rust
//! use kms_evm_signer_core::Address;
//!
//! // Derive address from a 64-byte public key (x || y)
//! let pubkey_bytes = [0u8; 64];
//! let address = Address::from_public_key_bytes(&pubkey_bytes).unwrap();
//! println!("Address: {address}");
//! ```
//!
//! # Logging
//!
//! Events are emitted with [`tracing`] under the `kms_signer` target. The
//! library never installs a subscriber.
//!
//! # Security Considerations
//!
//! - Private keys never leave the custody service
//! - Signatures are normalized to low-S form to prevent malleability
//! - A signature that does not recover to the custody address is rejected
//! - Nonces are not coordinated between concurrent sends on one instance

// Modules
pub mod address;
pub mod config;
pub mod crypto;
pub mod custody;
pub mod der;
pub mod error;
pub mod fees;
pub mod rpc;
pub mod signature;
pub mod signer;
pub mod transaction;

// Re-exports for convenience
pub use address::Address;
pub use config::{FeeFloor, NetworkConfig};
pub use custody::{CustodyService, KeyId, LocalCustody, SigningRequest};
pub use error::{Error, Result};
pub use fees::{
    BaseFeeSupport, Eip1559Fees, FeeDetectionState, FeeEstimator, FeeHistorySupport,
    FeeSuggestion, GasFloors,
};
pub use rpc::{Handler, Next, Pipeline, RpcCall, Transport};
pub use signature::Signature;
pub use signer::{AddressRecord, KmsSigner};
pub use transaction::{
    AccessListEntry, Eip1559Transaction, LegacyTransaction, Transaction, TransactionRequest,
};

// Re-export commonly used alloy types
pub use alloy_primitives::{B256, U256};
