//! Per-network configuration.
//!
//! A network entry enables remote signing by naming a custody key and may set
//! fee floors:
//!
//! ```json
//! {
//!   "kmsKeyId": "alias/deployer",
//!   "minMaxFeePerGas": "30000000000",
//!   "minMaxPriorityFeePerGas": 1500000000
//! }
//! ```
//!
//! Floors accept a JSON number or a string, decimal or `0x`-hex. Unknown keys
//! (URLs, timeouts, ...) belong to the transport and are ignored here.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use serde_json::Number;

use crate::custody::{CustodyService, KeyId};
use crate::error::{Error, Result};
use crate::fees::{FeeEstimator, GasFloors};
use crate::rpc::{Pipeline, Transport};
use crate::signer::KmsSigner;

/// A fee floor as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeeFloor {
    /// A JSON number. Values past `u64` and exponent literals arrive as
    /// floats and must still be whole.
    Number(Number),
    /// A decimal or `0x`-prefixed hex string.
    Text(String),
}

impl FeeFloor {
    /// Parses the floor into wei.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the string is not a number, or the
    /// number is negative or fractional.
    pub fn to_u256(&self) -> Result<U256> {
        match self {
            Self::Number(number) => number_to_u256(number),
            Self::Text(text) => text
                .trim()
                .parse::<U256>()
                .map_err(|err| Error::InvalidConfig(format!("invalid fee floor {text:?}: {err}"))),
        }
    }
}

fn number_to_u256(number: &Number) -> Result<U256> {
    if let Some(value) = number.as_u64() {
        return Ok(U256::from(value));
    }

    let invalid = || Error::InvalidConfig(format!("fee floor {number} is not a whole number of wei"));
    let value = number.as_f64().ok_or_else(invalid)?;
    if !value.is_finite() || value < 0.0 || value.fract() > 0.0 {
        return Err(invalid());
    }
    format!("{value:.0}").parse::<U256>().map_err(|_| invalid())
}

/// Signer settings of one network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    /// The custody key used for this network. Remote signing is off without it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_key_id: Option<KeyId>,

    /// Minimum `maxFeePerGas`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_max_fee_per_gas: Option<FeeFloor>,

    /// Minimum `maxPriorityFeePerGas`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_max_priority_fee_per_gas: Option<FeeFloor>,
}

impl NetworkConfig {
    /// Parses a network entry from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::JsonError`] for malformed JSON and
    /// [`Error::InvalidConfig`] for unparsable fee floors.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.gas_floors()?;
        Ok(config)
    }

    /// Returns the configured fee floors in wei.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for unparsable fee floors.
    pub fn gas_floors(&self) -> Result<GasFloors> {
        Ok(GasFloors {
            min_max_fee_per_gas: self
                .min_max_fee_per_gas
                .as_ref()
                .map(FeeFloor::to_u256)
                .transpose()?,
            min_max_priority_fee_per_gas: self
                .min_max_priority_fee_per_gas
                .as_ref()
                .map(FeeFloor::to_u256)
                .transpose()?,
        })
    }
}

impl Pipeline {
    /// Builds the signing pipeline for a network.
    ///
    /// Installs the fee estimator in front of the signer, both in front of
    /// `transport`. Returns `Ok(None)` when the network has no `kmsKeyId`,
    /// in which case the caller keeps using `transport` directly.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for unparsable fee floors.
    pub fn from_config<C, T>(config: &NetworkConfig, custody: C, transport: T) -> Result<Option<Self>>
    where
        C: CustodyService + 'static,
        T: Transport + 'static,
    {
        let Some(key_id) = config.kms_key_id.clone() else {
            return Ok(None);
        };

        let pipeline = Self::new(transport)
            .with_handler(FeeEstimator::new(config.gas_floors()?))
            .with_handler(KmsSigner::new(key_id, custody));
        Ok(Some(pipeline))
    }
}
