//! Automatic fee estimation for `eth_sendTransaction`.
//!
//! The [`FeeEstimator`] sits in front of the signer and fills in whichever
//! fee fields a transaction is missing. It prefers EIP-1559 fields and falls
//! back to `eth_gasPrice` when the node cannot help:
//!
//! ```text
//!            ┌───────────── base fee support? ─────────────┐
//!            │ Unknown: eth_getBlockByNumber("latest")      │
//!            ▼                                              ▼
//!      Eip1559Capable                                  LegacyOnly
//!            │                                              │
//!   eth_feeHistory("0x1", "latest", [0.5])                  │
//!      ok │          │ any failure                          │
//!         ▼          ▼                                      ▼
//!   (maxFee, tip)   Unavailable ──────────────────▶ eth_gasPrice
//! ```
//!
//! Each detection flag reaches its terminal value at most once per estimator
//! instance. A node without base fees or with a broken `eth_feeHistory` is
//! never asked again.
//!
//! Configured [`GasFloors`] raise the EIP-1559 fields to a minimum, whether
//! the caller supplied them or they were computed. Legacy `gasPrice` is never
//! floored.

use std::sync::{Mutex, PoisonError};

use alloy_primitives::U256;
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::rpc::{Handler, Next, RpcCall, Transport, method, parse_quantity, quantity};

/// Number of consecutive full blocks the fee cap must survive.
pub const BASE_FEE_MAX_FULL_BLOCKS: u32 = 3;

/// The reward percentile requested from `eth_feeHistory`.
pub const REWARD_PERCENTILE: f64 = 0.5;

/// Whether the node reports a base fee in its blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BaseFeeSupport {
    /// Not queried yet.
    #[default]
    Unknown,
    /// The latest block carries `baseFeePerGas`.
    Eip1559Capable,
    /// The latest block has no base fee; legacy pricing only.
    LegacyOnly,
}

/// Whether `eth_feeHistory` works on the node.
///
/// Only [`Self::Unavailable`] is terminal. [`Self::Available`] records that
/// the last query succeeded; the next one is still made and may fail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FeeHistorySupport {
    /// Not queried yet.
    #[default]
    Unknown,
    /// The last query succeeded. Not terminal.
    Available,
    /// A query failed; never asked again.
    Unavailable,
}

/// What the estimator has learned about its node.
///
/// `base_fee` leaves `Unknown` once and never changes again.
/// `fee_history` may go `Unknown -> Available`, and from either of those to
/// `Unavailable`, which is terminal. Only a move to `Unavailable` changes
/// what the estimator does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeeDetectionState {
    /// Base fee support of the node.
    pub base_fee: BaseFeeSupport,
    /// Fee history support of the node.
    pub fee_history: FeeHistorySupport,
}

impl FeeDetectionState {
    /// Records the base fee support, returning `true` if this changed the state.
    pub fn settle_base_fee(&mut self, support: BaseFeeSupport) -> bool {
        if self.base_fee != BaseFeeSupport::Unknown || support == BaseFeeSupport::Unknown {
            return false;
        }
        self.base_fee = support;
        true
    }

    /// Records the outcome of a fee history query, returning `true` if this
    /// changed the state.
    pub fn settle_fee_history(&mut self, support: FeeHistorySupport) -> bool {
        if self.fee_history == FeeHistorySupport::Unavailable
            || self.fee_history == support
            || support == FeeHistorySupport::Unknown
        {
            return false;
        }
        self.fee_history = support;
        true
    }

    /// Returns `true` if EIP-1559 fees can no longer be computed.
    #[must_use]
    pub fn eip1559_ruled_out(&self) -> bool {
        self.base_fee == BaseFeeSupport::LegacyOnly
            || self.fee_history == FeeHistorySupport::Unavailable
    }
}

/// A pair of EIP-1559 fee values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eip1559Fees {
    /// The fee cap per gas.
    pub max_fee_per_gas: U256,
    /// The tip cap per gas.
    pub max_priority_fee_per_gas: U256,
}

/// What the node suggests paying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeSuggestion {
    /// Computed from the latest base fee and reward percentile.
    Eip1559(Eip1559Fees),
    /// The node's `eth_gasPrice`.
    Legacy {
        /// The suggested gas price.
        gas_price: U256,
    },
}

/// Minimum values for the EIP-1559 fee fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GasFloors {
    /// Minimum `maxFeePerGas`.
    pub min_max_fee_per_gas: Option<U256>,
    /// Minimum `maxPriorityFeePerGas`.
    pub min_max_priority_fee_per_gas: Option<U256>,
}

impl GasFloors {
    /// Raises `value` to the `maxFeePerGas` floor.
    #[must_use]
    pub fn max_fee(&self, value: U256) -> U256 {
        self.min_max_fee_per_gas.map_or(value, |floor| value.max(floor))
    }

    /// Raises `value` to the `maxPriorityFeePerGas` floor.
    #[must_use]
    pub fn priority_fee(&self, value: U256) -> U256 {
        self.min_max_priority_fee_per_gas
            .map_or(value, |floor| value.max(floor))
    }

    /// Applies both floors, then makes sure the fee cap is not below the tip.
    #[must_use]
    pub fn finalize(&self, fees: Eip1559Fees) -> Eip1559Fees {
        let mut max_fee_per_gas = self.max_fee(fees.max_fee_per_gas);
        let max_priority_fee_per_gas = self.priority_fee(fees.max_priority_fee_per_gas);

        // NOTE: additive bump, preserved as-is. Suspect: the tip is added on
        // top of the cap instead of the cap being raised to the tip.
        if max_fee_per_gas < max_priority_fee_per_gas {
            max_fee_per_gas = max_fee_per_gas.saturating_add(max_priority_fee_per_gas);
        }

        Eip1559Fees {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        }
    }
}

/// Computes the fee cap for the next [`BASE_FEE_MAX_FULL_BLOCKS`] blocks.
///
/// `floor(next_base_fee * 9^(N-1) / 8^(N-1)) + reward`, since the base fee
/// grows by at most 1/8 per full block. Returns `None` on overflow.
///
/// # Example
///
/// ```
/// use alloy_primitives::U256;
/// use kms_evm_signer_core::fees::max_fee_from_history;
///
/// let cap = max_fee_from_history(U256::from(1100), U256::from(50));
/// assert_eq!(cap, Some(U256::from(1442)));
/// ```
#[must_use]
pub fn max_fee_from_history(next_base_fee: U256, reward: U256) -> Option<U256> {
    let exponent = U256::from(BASE_FEE_MAX_FULL_BLOCKS - 1);
    let growth = U256::from(9).pow(exponent);
    let period = U256::from(8).pow(exponent);

    next_base_fee
        .checked_mul(growth)?
        .checked_div(period)?
        .checked_add(reward)
}

/// Extracts `(next base fee, reward)` from an `eth_feeHistory` response.
fn parse_fee_history(response: &Value) -> Option<Eip1559Fees> {
    let next_base_fee = parse_quantity(response.get("baseFeePerGas")?.get(1)?).ok()?;
    let reward = parse_quantity(response.get("reward")?.get(0)?.get(0)?).ok()?;

    Some(Eip1559Fees {
        max_fee_per_gas: max_fee_from_history(next_base_fee, reward)?,
        max_priority_fee_per_gas: reward,
    })
}

/// Reads an optional fee quantity from a transaction object.
fn read_fee(tx: &Map<String, Value>, field: &str) -> Result<Option<U256>> {
    match tx.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => parse_quantity(value)
            .map(Some)
            .map_err(|_| Error::InvalidTransaction(format!("invalid {field}: {value}"))),
    }
}

/// Fills missing fee fields of outgoing transactions.
///
/// # Example
///
/// ```ignore
/// let estimator = FeeEstimator::new(GasFloors {
///     min_max_fee_per_gas: Some(U256::from(2_000)),
///     min_max_priority_fee_per_gas: None,
/// });
/// let pipeline = Pipeline::new(node).with_handler(estimator);
/// ```
#[derive(Debug, Default)]
pub struct FeeEstimator {
    floors: GasFloors,
    detection: Mutex<FeeDetectionState>,
}

impl FeeEstimator {
    /// Creates an estimator with the given floors and nothing detected yet.
    #[must_use]
    pub fn new(floors: GasFloors) -> Self {
        Self {
            floors,
            detection: Mutex::new(FeeDetectionState::default()),
        }
    }

    /// Returns the configured floors.
    #[must_use]
    pub const fn floors(&self) -> &GasFloors {
        &self.floors
    }

    /// Returns a snapshot of the detection state.
    #[must_use]
    pub fn detection(&self) -> FeeDetectionState {
        *self.detection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle_base_fee(&self, support: BaseFeeSupport) {
        let changed = self
            .detection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .settle_base_fee(support);
        if changed {
            debug!(target: "kms_signer", ?support, "base fee support detected");
        }
    }

    fn settle_fee_history(&self, support: FeeHistorySupport) {
        let changed = self
            .detection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .settle_fee_history(support);
        if changed && support == FeeHistorySupport::Unavailable {
            warn!(target: "kms_signer", "eth_feeHistory failed, falling back to eth_gasPrice for good");
        } else if changed {
            debug!(target: "kms_signer", ?support, "fee history support detected");
        }
    }

    /// Computes EIP-1559 fees from the node's fee history.
    ///
    /// Returns `Ok(None)` when the node has no base fee or its fee history is
    /// unusable; both outcomes are remembered.
    ///
    /// # Errors
    ///
    /// Propagates a failure of the initial `eth_getBlockByNumber` query.
    pub async fn suggest_eip1559(&self, node: &dyn Transport) -> Result<Option<Eip1559Fees>> {
        if self.detection().base_fee == BaseFeeSupport::Unknown {
            let block = node
                .request(RpcCall::new(
                    method::GET_BLOCK_BY_NUMBER,
                    vec![json!("latest"), json!(false)],
                ))
                .await?;
            let support = match block.get("baseFeePerGas") {
                Some(fee) if !fee.is_null() => BaseFeeSupport::Eip1559Capable,
                _ => BaseFeeSupport::LegacyOnly,
            };
            self.settle_base_fee(support);
        }

        if self.detection().eip1559_ruled_out() {
            return Ok(None);
        }

        let response = node
            .request(RpcCall::new(
                method::FEE_HISTORY,
                vec![json!("0x1"), json!("latest"), json!([REWARD_PERCENTILE])],
            ))
            .await;

        match response.ok().as_ref().and_then(parse_fee_history) {
            Some(fees) => {
                self.settle_fee_history(FeeHistorySupport::Available);
                Ok(Some(fees))
            }
            None => {
                self.settle_fee_history(FeeHistorySupport::Unavailable);
                Ok(None)
            }
        }
    }

    /// Queries `eth_gasPrice`.
    ///
    /// # Errors
    ///
    /// Propagates transport errors and rejects a non-quantity answer.
    pub async fn gas_price(&self, node: &dyn Transport) -> Result<U256> {
        let response = node.request(RpcCall::new(method::GAS_PRICE, vec![])).await?;
        parse_quantity(&response)
    }

    /// Suggests fees, EIP-1559 if possible and `eth_gasPrice` otherwise.
    ///
    /// # Errors
    ///
    /// Propagates failures of the block and gas price queries.
    pub async fn suggest(&self, node: &dyn Transport) -> Result<FeeSuggestion> {
        match self.suggest_eip1559(node).await? {
            Some(fees) => Ok(FeeSuggestion::Eip1559(fees)),
            None => Ok(FeeSuggestion::Legacy {
                gas_price: self.gas_price(node).await?,
            }),
        }
    }

    /// Fills the fee fields of a JSON transaction object in place.
    ///
    /// A transaction priced by the caller (`gasPrice`, or both EIP-1559
    /// fields) only has its EIP-1559 fields floored. Otherwise missing fields
    /// are filled from [`Self::suggest`]; a caller who gave neither EIP-1559
    /// field gets a legacy `gasPrice` when the node has no EIP-1559 fees.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransaction`] for malformed fee fields and
    /// propagates node failures.
    pub async fn fill(&self, tx: &mut Map<String, Value>, node: &dyn Transport) -> Result<()> {
        let has_gas_price = tx.get("gasPrice").is_some_and(|value| !value.is_null());
        let max_fee = read_fee(tx, "maxFeePerGas")?;
        let priority_fee = read_fee(tx, "maxPriorityFeePerGas")?;

        if has_gas_price || (max_fee.is_some() && priority_fee.is_some()) {
            if let Some(fee) = max_fee {
                tx.insert("maxFeePerGas".to_string(), quantity(self.floors.max_fee(fee)));
            }
            if let Some(fee) = priority_fee {
                tx.insert(
                    "maxPriorityFeePerGas".to_string(),
                    quantity(self.floors.priority_fee(fee)),
                );
            }
            return Ok(());
        }

        let suggested = match self.suggest(node).await? {
            FeeSuggestion::Eip1559(fees) => fees,
            FeeSuggestion::Legacy { gas_price } if max_fee.is_none() && priority_fee.is_none() => {
                tx.insert("gasPrice".to_string(), quantity(gas_price));
                return Ok(());
            }
            FeeSuggestion::Legacy { gas_price } => Eip1559Fees {
                max_fee_per_gas: gas_price,
                max_priority_fee_per_gas: gas_price,
            },
        };

        let fees = self.floors.finalize(Eip1559Fees {
            max_fee_per_gas: max_fee.unwrap_or(suggested.max_fee_per_gas),
            max_priority_fee_per_gas: priority_fee.unwrap_or(suggested.max_priority_fee_per_gas),
        });

        tx.insert("maxFeePerGas".to_string(), quantity(fees.max_fee_per_gas));
        tx.insert(
            "maxPriorityFeePerGas".to_string(),
            quantity(fees.max_priority_fee_per_gas),
        );
        Ok(())
    }
}

#[async_trait]
impl Handler for FeeEstimator {
    async fn handle(&self, mut call: RpcCall, next: Next<'_>) -> Result<Value> {
        if call.is(method::SEND_TRANSACTION) {
            if let Some(Value::Object(tx)) = call.params.first_mut() {
                self.fill(tx, &next).await?;
            }
        }
        next.request(call).await
    }
}
