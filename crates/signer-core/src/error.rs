//! Error types for the KMS EVM signer library.
//!
//! This module provides a single error type [`enum@Error`] covering every
//! failure mode of the remote-signature adapter and the request pipeline.
//!
//! # Error Categories
//!
//! - **Custody errors**: malformed DER material, recovery mismatches, and
//!   failures reported by the remote custody service
//! - **Node errors**: transport failures and JSON-RPC errors, including the
//!   nonce and chain id queries
//! - **Request errors**: invalid transaction requests and configuration
//!
//! Soft signals such as a node without base-fee support are not errors: the
//! fee estimator downgrades itself silently (see [`crate::fees`]).
//!
//! # Example
//!
//! ```
//! use kms_evm_signer_core::Error;
//!
//! fn example() -> Result<(), Error> {
//!     let err = Error::Recovery;
//!     assert!(matches!(err, Error::Recovery));
//!     Ok(())
//! }
//! ```

use core::result::Result as CoreResult;
use hex::FromHexError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// The main error type for the KMS EVM signer library.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Custody Errors
    // =========================================================================
    /// A DER signature or public key returned by the custody service is
    /// malformed, or one of its integers is out of range.
    #[error("DER decoding failed: {0}")]
    Decode(String),

    /// Neither recovery identifier reproduces the expected signer address.
    ///
    /// This means the remote key does not belong to the expected sender and
    /// is never retried.
    #[error("no recovery id reproduces the expected signer address")]
    Recovery,

    /// The custody service failed or returned no signature.
    #[error("remote signing failed: {0}")]
    RemoteSign(String),

    // =========================================================================
    // Node Errors
    // =========================================================================
    /// The pending transaction count of the sender could not be queried.
    #[error("nonce query failed: {0}")]
    NonceQuery(String),

    /// The chain id could not be queried.
    #[error("chain id query failed: {0}")]
    ChainIdQuery(String),

    /// The underlying transport failed to deliver a request.
    ///
    /// Returned by [`crate::rpc::Transport`] implementations (HTTP clients
    /// and the like); nothing in this crate produces it itself.
    #[error("transport error: {0}")]
    Transport(String),

    /// The node answered with a JSON-RPC error object.
    #[error("JSON-RPC error {code}: {message}")]
    Rpc {
        /// The JSON-RPC error code.
        code: i64,
        /// The error message reported by the node.
        message: String,
    },

    /// The node answered with a value of an unexpected shape.
    #[error("invalid node response: {0}")]
    InvalidResponse(String),

    // =========================================================================
    // Request Errors
    // =========================================================================
    /// The transaction request cannot be signed as given.
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    /// The network configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // =========================================================================
    // Serialization Errors
    // =========================================================================
    /// Failed to parse hex data.
    #[error("hex decoding failed: {0}")]
    HexDecodeFailed(String),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    JsonError(String),
}

impl From<FromHexError> for Error {
    fn from(err: FromHexError) -> Self {
        Error::HexDecodeFailed(err.to_string())
    }
}

impl From<SerdeJsonError> for Error {
    fn from(err: SerdeJsonError) -> Self {
        Error::JsonError(err.to_string())
    }
}

/// A specialized [`Result`] type for signer operations.
pub type Result<T> = CoreResult<T, Error>;
