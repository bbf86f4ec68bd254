//! Fee estimation against a scripted node.

// Silence unused crate dependency warnings for test binary
use alloy_rlp as _;
use proptest as _;
use serde as _;
use thiserror as _;
use tracing as _;

mod common;

use std::sync::Arc;

use alloy_primitives::U256;
use common::{BlockScript, FeeHistoryScript, MockNode};
use kms_evm_signer_core::{
    BaseFeeSupport, Error, FeeEstimator, FeeHistorySupport, GasFloors, Pipeline, RpcCall,
    Transport,
};
use serde_json::{Value, json};

/// A pipeline with only the estimator, so `eth_sendTransaction` reaches the
/// node, which echoes the filled transaction back.
fn estimator_pipeline(node: &Arc<MockNode>, floors: GasFloors) -> Pipeline {
    Pipeline::new(Arc::clone(node)).with_handler(FeeEstimator::new(floors))
}

async fn send(pipeline: &Pipeline, tx: Value) -> Value {
    pipeline
        .request(RpcCall::new("eth_sendTransaction", vec![tx]))
        .await
        .unwrap()
}

#[tokio::test]
async fn fills_eip1559_fees_from_history() {
    let node = Arc::new(MockNode::london());
    let pipeline = estimator_pipeline(&node, GasFloors::default());

    let tx = send(&pipeline, json!({ "gas": "0x5208" })).await;

    assert_eq!(tx["maxFeePerGas"], "0x5a2");
    assert_eq!(tx["maxPriorityFeePerGas"], "0x32");
    assert!(tx.get("gasPrice").is_none());
    assert_eq!(tx["gas"], "0x5208");

    let history = node
        .calls()
        .into_iter()
        .find(|call| call.is("eth_feeHistory"))
        .unwrap();
    assert_eq!(history.params, vec![json!("0x1"), json!("latest"), json!([0.5])]);
}

#[tokio::test]
async fn max_fee_floor_applies_to_computed_fees() {
    let node = Arc::new(MockNode::london());
    let floors = GasFloors {
        min_max_fee_per_gas: Some(U256::from(2000)),
        min_max_priority_fee_per_gas: None,
    };
    let pipeline = estimator_pipeline(&node, floors);

    let tx = send(&pipeline, json!({})).await;

    assert_eq!(tx["maxFeePerGas"], "0x7d0");
    assert_eq!(tx["maxPriorityFeePerGas"], "0x32");
}

#[tokio::test]
async fn priority_floor_above_cap_bumps_cap_additively() {
    let node = Arc::new(MockNode::london());
    let floors = GasFloors {
        min_max_fee_per_gas: None,
        min_max_priority_fee_per_gas: Some(U256::from(5000)),
    };
    let pipeline = estimator_pipeline(&node, floors);

    let tx = send(&pipeline, json!({})).await;

    // 1442 < 5000, so the cap becomes 1442 + 5000.
    assert_eq!(tx["maxPriorityFeePerGas"], "0x1388");
    assert_eq!(tx["maxFeePerGas"], "0x192a");
}

#[tokio::test]
async fn failed_fee_history_is_never_retried() {
    let node = Arc::new(MockNode::new(BlockScript::London, FeeHistoryScript::Unsupported));
    let estimator = FeeEstimator::new(GasFloors::default());
    let pipeline = Pipeline::new(Arc::clone(&node)).with_handler(estimator);

    for _ in 0..3 {
        let tx = send(&pipeline, json!({})).await;
        assert_eq!(tx["gasPrice"], "0x64");
        assert!(tx.get("maxFeePerGas").is_none());
    }

    assert_eq!(node.count("eth_getBlockByNumber"), 1);
    assert_eq!(node.count("eth_feeHistory"), 1);
    assert_eq!(node.count("eth_gasPrice"), 3);
}

#[tokio::test]
async fn detection_state_is_observable() {
    let node = MockNode::new(BlockScript::London, FeeHistoryScript::Malformed);
    let estimator = FeeEstimator::new(GasFloors::default());

    assert_eq!(estimator.suggest_eip1559(&node).await.unwrap(), None);
    let state = estimator.detection();
    assert_eq!(state.base_fee, BaseFeeSupport::Eip1559Capable);
    assert_eq!(state.fee_history, FeeHistorySupport::Unavailable);

    assert_eq!(estimator.suggest_eip1559(&node).await.unwrap(), None);
    assert_eq!(node.count("eth_feeHistory"), 1);
}

#[tokio::test]
async fn legacy_node_gets_gas_price() {
    let node = Arc::new(MockNode::new(BlockScript::PreLondon, FeeHistoryScript::Ok));
    let pipeline = estimator_pipeline(&node, GasFloors::default());

    let tx = send(&pipeline, json!({})).await;
    send(&pipeline, json!({})).await;

    assert_eq!(tx["gasPrice"], "0x64");
    assert_eq!(node.count("eth_getBlockByNumber"), 1);
    assert_eq!(node.count("eth_feeHistory"), 0);
}

#[tokio::test]
async fn missing_block_counts_as_legacy() {
    let node = MockNode::new(BlockScript::Missing, FeeHistoryScript::Ok);
    let estimator = FeeEstimator::new(GasFloors::default());

    assert_eq!(estimator.suggest_eip1559(&node).await.unwrap(), None);
    assert_eq!(estimator.detection().base_fee, BaseFeeSupport::LegacyOnly);
}

#[tokio::test]
async fn gas_price_stands_in_for_requested_eip1559_fields() {
    let node = Arc::new(MockNode::new(BlockScript::London, FeeHistoryScript::Unsupported));
    let pipeline = estimator_pipeline(&node, GasFloors::default());

    let tx = send(&pipeline, json!({ "maxPriorityFeePerGas": "0xa" })).await;

    assert_eq!(tx["maxFeePerGas"], "0x64");
    assert_eq!(tx["maxPriorityFeePerGas"], "0xa");
    assert!(tx.get("gasPrice").is_none());
}

#[tokio::test]
async fn legacy_gas_price_passes_through_unfloored() {
    let node = Arc::new(MockNode::london());
    let floors = GasFloors {
        min_max_fee_per_gas: Some(U256::from(2000)),
        min_max_priority_fee_per_gas: Some(U256::from(2000)),
    };
    let pipeline = estimator_pipeline(&node, floors);

    let tx = send(&pipeline, json!({ "gasPrice": "0x1", "to": common::SENDER })).await;

    assert_eq!(tx, json!({ "gasPrice": "0x1", "to": common::SENDER }));
    assert_eq!(node.calls().len(), 1);
}

#[tokio::test]
async fn supplied_eip1559_fees_are_only_floored() {
    let node = Arc::new(MockNode::london());
    let floors = GasFloors {
        min_max_fee_per_gas: Some(U256::from(2000)),
        min_max_priority_fee_per_gas: None,
    };
    let pipeline = estimator_pipeline(&node, floors);

    let tx = send(
        &pipeline,
        json!({ "maxFeePerGas": "0x1", "maxPriorityFeePerGas": "0x1" }),
    )
    .await;

    assert_eq!(tx["maxFeePerGas"], "0x7d0");
    assert_eq!(tx["maxPriorityFeePerGas"], "0x1");
    assert_eq!(node.count("eth_feeHistory"), 0);
}

#[tokio::test]
async fn malformed_fee_field_is_rejected() {
    let node = Arc::new(MockNode::london());
    let pipeline = estimator_pipeline(&node, GasFloors::default());

    let result = pipeline
        .request(RpcCall::new(
            "eth_sendTransaction",
            vec![json!({ "maxFeePerGas": "cheap" })],
        ))
        .await;

    assert!(matches!(result, Err(Error::InvalidTransaction(_))));
    assert!(node.calls().is_empty());
}

#[tokio::test]
async fn other_methods_pass_through() {
    let node = Arc::new(MockNode::london());
    let pipeline = estimator_pipeline(&node, GasFloors::default());

    let block = pipeline
        .request(RpcCall::new("eth_blockNumber", vec![]))
        .await
        .unwrap();

    assert_eq!(block, json!("0x10"));
    assert_eq!(node.calls().len(), 1);
}
