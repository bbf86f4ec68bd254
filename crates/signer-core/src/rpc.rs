//! JSON-RPC request plumbing.
//!
//! Every request travels as an [`RpcCall`] envelope (`method` + ordered
//! `params`) and is answered with a raw [`serde_json::Value`]. Two traits meet
//! at this boundary:
//!
//! - [`Transport`]: anything that can answer a call. HTTP/WebSocket clients
//!   implement it outside this crate; a [`Pipeline`] implements it too.
//! - [`Handler`]: one link of a [`Pipeline`]. It may answer a call itself,
//!   rewrite it, or pass it on to [`Next`], which is the remainder of the
//!   pipeline ending in the transport.
//!
//! ```text
//! caller ──▶ FeeEstimator ──▶ KmsSigner ──▶ transport ──▶ node
//!              (handler)       (handler)
//! ```
//!
//! Handlers issue their own outbound calls (`eth_gasPrice`, `eth_chainId`,
//! ...) through the same [`Next`], so a handler only ever sees the part of
//! the pipeline that sits behind it.

use std::fmt;
use std::sync::Arc;

use alloy_primitives::U256;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// JSON-RPC method names used by this crate.
pub mod method {
    /// Sign and submit a transaction.
    pub const SEND_TRANSACTION: &str = "eth_sendTransaction";
    /// List the accounts controlled by the signer.
    pub const ACCOUNTS: &str = "eth_accounts";
    /// EIP-1102 account request.
    pub const REQUEST_ACCOUNTS: &str = "eth_requestAccounts";
    /// Submit a signed raw transaction.
    pub const SEND_RAW_TRANSACTION: &str = "eth_sendRawTransaction";
    /// Fetch a block by number.
    pub const GET_BLOCK_BY_NUMBER: &str = "eth_getBlockByNumber";
    /// Fetch base fees and priority fee percentiles.
    pub const FEE_HISTORY: &str = "eth_feeHistory";
    /// Fetch the legacy gas price.
    pub const GAS_PRICE: &str = "eth_gasPrice";
    /// Fetch the transaction count of an account.
    pub const GET_TRANSACTION_COUNT: &str = "eth_getTransactionCount";
    /// Fetch the chain id.
    pub const CHAIN_ID: &str = "eth_chainId";
}

/// A JSON-RPC call envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcCall {
    /// The method name, e.g. `eth_sendTransaction`.
    pub method: String,

    /// The positional parameters.
    #[serde(default)]
    pub params: Vec<Value>,
}

impl RpcCall {
    /// Creates a call with the given method and parameters.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// Returns `true` if this call is for `method`.
    #[must_use]
    pub fn is(&self, method: &str) -> bool {
        self.method == method
    }
}

/// Something that can answer JSON-RPC calls.
///
/// Implementations perform network I/O and JSON encoding; timeouts and
/// retries belong to them as well.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `call` and returns the `result` member of the response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the call cannot be delivered and
    /// [`Error::Rpc`] if the node answers with an error object.
    async fn request(&self, call: RpcCall) -> Result<Value>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn request(&self, call: RpcCall) -> Result<Value> {
        (**self).request(call).await
    }
}

/// One link of a [`Pipeline`].
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handles `call`, delegating to `next` for anything it does not answer.
    ///
    /// # Errors
    ///
    /// Propagates errors from `next` and reports handler-specific failures.
    async fn handle(&self, call: RpcCall, next: Next<'_>) -> Result<Value>;
}

/// The remainder of a [`Pipeline`] behind the current handler.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    handlers: &'a [Box<dyn Handler>],
    transport: &'a dyn Transport,
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<'a> Transport for Next<'a> {
    async fn request(&self, call: RpcCall) -> Result<Value> {
        match self.handlers.split_first() {
            Some((handler, rest)) => {
                let next = Next {
                    handlers: rest,
                    transport: self.transport,
                };
                handler.handle(call, next).await
            }
            None => self.transport.request(call).await,
        }
    }
}

/// An ordered list of handlers in front of a transport.
///
/// The first handler added sees every call first. The pipeline is itself a
/// [`Transport`], so callers use it exactly like the transport it wraps.
///
/// # Example
///
/// ```ignore
/// let pipeline = Pipeline::new(http)
///     .with_handler(FeeEstimator::new(floors))
///     .with_handler(KmsSigner::new(key_id, custody));
/// let hash = pipeline.request(RpcCall::new("eth_sendTransaction", vec![tx])).await?;
/// ```
pub struct Pipeline {
    handlers: Vec<Box<dyn Handler>>,
    transport: Box<dyn Transport>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Creates an empty pipeline that forwards everything to `transport`.
    #[must_use]
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            handlers: Vec::new(),
            transport: Box::new(transport),
        }
    }

    /// Appends a handler behind the ones already installed.
    #[must_use]
    pub fn with_handler(mut self, handler: impl Handler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Returns the number of installed handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` if no handler is installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn head(&self) -> Next<'_> {
        Next {
            handlers: &self.handlers,
            transport: self.transport.as_ref(),
        }
    }
}

#[async_trait]
impl Transport for Pipeline {
    async fn request(&self, call: RpcCall) -> Result<Value> {
        self.head().request(call).await
    }
}

/// Parses a JSON-RPC quantity (`"0x…"` hex string or JSON integer).
///
/// # Errors
///
/// Returns [`Error::InvalidResponse`] if `value` is not a quantity.
pub fn parse_quantity(value: &Value) -> Result<U256> {
    match value {
        Value::String(text) => {
            let digits = text
                .strip_prefix("0x")
                .or_else(|| text.strip_prefix("0X"))
                .filter(|digits| !digits.is_empty())
                .ok_or_else(|| Error::InvalidResponse(format!("invalid quantity {text:?}")))?;
            U256::from_str_radix(digits, 16)
                .map_err(|err| Error::InvalidResponse(format!("invalid quantity {text:?}: {err}")))
        }
        Value::Number(number) => number
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| Error::InvalidResponse(format!("invalid quantity {number}"))),
        other => Err(Error::InvalidResponse(format!(
            "expected quantity, got {other}"
        ))),
    }
}

/// Parses a JSON-RPC quantity that must fit in a `u64`.
///
/// # Errors
///
/// Returns [`Error::InvalidResponse`] if `value` is not a quantity or is too
/// large.
pub fn parse_u64_quantity(value: &Value) -> Result<u64> {
    let quantity = parse_quantity(value)?;
    u64::try_from(quantity)
        .map_err(|_| Error::InvalidResponse(format!("quantity {quantity} exceeds 64 bits")))
}

/// Encodes `value` as a JSON-RPC quantity string.
#[must_use]
pub fn quantity(value: U256) -> Value {
    Value::String(format!("0x{value:x}"))
}
