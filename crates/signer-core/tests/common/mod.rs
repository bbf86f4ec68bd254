//! Shared fixtures: a scripted JSON-RPC node and misbehaving custody services.

#![expect(dead_code, reason = "each test binary uses a different subset of the fixtures")]

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use alloy_primitives::{B256, U256, keccak256};
use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use k256::ecdsa::Signature as K256Signature;
use kms_evm_signer_core::crypto::SECP256K1_N;
use kms_evm_signer_core::rpc::quantity;
use kms_evm_signer_core::{
    Address, CustodyService, Error, KeyId, LocalCustody, Result, RpcCall, Signature, SigningRequest,
    Transaction, Transport,
};
use serde_json::{Value, json};

/// The custody key handle used throughout the tests.
pub const KEY_ID: &str = "deployer";

/// The EIP-155 example key, `0x46` repeated.
pub fn secret_key() -> SigningKey {
    SigningKey::from_slice(&[0x46; 32]).unwrap()
}

/// The address of [`secret_key`], lowercase.
pub const SENDER: &str = "0x9d8a62f656a8d1615c1294fd71e9cfb3e4855a4f";

pub fn custody() -> LocalCustody {
    LocalCustody::new().with_key(KEY_ID, secret_key())
}

/// What `eth_getBlockByNumber("latest")` answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockScript {
    /// A block with `baseFeePerGas = 1000`.
    London,
    /// A block without a base fee.
    PreLondon,
    /// `null`.
    Missing,
}

/// What `eth_feeHistory` answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeHistoryScript {
    /// Base fees `[1000, 1100]`, reward `[[50]]`.
    Ok,
    /// A method-not-found error.
    Unsupported,
    /// A response without rewards.
    Malformed,
}

/// The gas price the node suggests (100 wei).
pub const GAS_PRICE: u64 = 100;

/// A JSON-RPC node answering from a fixed script.
///
/// Every call is recorded, including those failed by [`Self::failing_on`]. `eth_sendTransaction` echoes its transaction
/// object back so tests can inspect what the handlers filled in.
/// `eth_sendRawTransaction` bumps the pending nonce and answers with the
/// Keccak-256 of the raw bytes.
pub struct MockNode {
    block: BlockScript,
    fee_history: FeeHistoryScript,
    chain_id: u64,
    pending_nonce: AtomicU64,
    yield_after_nonce: bool,
    unreachable: Option<&'static str>,
    calls: Mutex<Vec<RpcCall>>,
}

impl MockNode {
    pub fn new(block: BlockScript, fee_history: FeeHistoryScript) -> Self {
        Self {
            block,
            fee_history,
            chain_id: 1,
            pending_nonce: AtomicU64::new(9),
            yield_after_nonce: false,
            unreachable: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A London node with a working fee history.
    pub fn london() -> Self {
        Self::new(BlockScript::London, FeeHistoryScript::Ok)
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    /// Suspends every nonce query once after reading the pending count, so
    /// concurrent sends interleave there.
    pub fn yielding_after_nonce(mut self) -> Self {
        self.yield_after_nonce = true;
        self
    }

    /// Fails every `method` call as if the connection dropped.
    pub fn failing_on(mut self, method: &'static str) -> Self {
        self.unreachable = Some(method);
        self
    }

    pub fn calls(&self) -> Vec<RpcCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls().iter().filter(|call| call.is(method)).count()
    }

    /// The raw transactions submitted so far.
    pub fn raw_transactions(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter(|call| call.is("eth_sendRawTransaction"))
            .map(|call| call.params[0].as_str().unwrap().to_string())
            .collect()
    }

    fn answer(&self, call: &RpcCall) -> Result<Value> {
        if self.unreachable.is_some_and(|method| call.is(method)) {
            return Err(Error::Transport("connection refused".to_string()));
        }
        match call.method.as_str() {
            "eth_getBlockByNumber" => Ok(match self.block {
                BlockScript::London => json!({ "number": "0x10", "baseFeePerGas": "0x3e8" }),
                BlockScript::PreLondon => json!({ "number": "0x10" }),
                BlockScript::Missing => Value::Null,
            }),
            "eth_feeHistory" => match self.fee_history {
                FeeHistoryScript::Ok => Ok(json!({
                    "oldestBlock": "0x10",
                    "baseFeePerGas": ["0x3e8", "0x44c"],
                    "gasUsedRatio": [0.5],
                    "reward": [["0x32"]],
                })),
                FeeHistoryScript::Unsupported => Err(method_not_found(&call.method)),
                FeeHistoryScript::Malformed => Ok(json!({
                    "oldestBlock": "0x10",
                    "baseFeePerGas": ["0x3e8", "0x44c"],
                    "gasUsedRatio": [0.5],
                })),
            },
            "eth_gasPrice" => Ok(quantity(U256::from(GAS_PRICE))),
            "eth_chainId" => Ok(quantity(U256::from(self.chain_id))),
            "eth_blockNumber" => Ok(json!("0x10")),
            "eth_getTransactionCount" => {
                Ok(quantity(U256::from(self.pending_nonce.load(Ordering::SeqCst))))
            }
            "eth_sendTransaction" => Ok(call.params[0].clone()),
            "eth_sendRawTransaction" => {
                let raw = call.params[0].as_str().unwrap();
                let bytes = hex::decode(raw.trim_start_matches("0x")).unwrap();
                self.pending_nonce.fetch_add(1, Ordering::SeqCst);
                Ok(json!(format!("0x{}", hex::encode(keccak256(&bytes)))))
            }
            other => Err(method_not_found(other)),
        }
    }
}

fn method_not_found(method: &str) -> Error {
    Error::Rpc {
        code: -32601,
        message: format!("the method {method} does not exist/is not available"),
    }
}

#[async_trait]
impl Transport for MockNode {
    async fn request(&self, call: RpcCall) -> Result<Value> {
        let result = self.answer(&call);
        let is_nonce_query = call.is("eth_getTransactionCount");
        self.calls.lock().unwrap().push(call);

        if is_nonce_query && self.yield_after_nonce {
            tokio::task::yield_now().await;
        }
        result
    }
}

/// How [`ScriptedCustody`] misbehaves.
#[derive(Debug, Clone)]
pub enum CustodyScript {
    /// Answers like [`LocalCustody`].
    Honest,
    /// Returns the high-S twin of every signature.
    HighS,
    /// Returns an empty signature.
    Empty,
    /// Signs with a different key than the one it reports.
    OtherKey(SigningKey),
}

/// A custody service wrapping [`LocalCustody`] that counts public key
/// fetches and can misbehave.
pub struct ScriptedCustody {
    inner: LocalCustody,
    script: CustodyScript,
    fetches: AtomicUsize,
}

impl ScriptedCustody {
    pub fn new(script: CustodyScript) -> Self {
        Self {
            inner: custody(),
            script,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn public_key_fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CustodyService for ScriptedCustody {
    async fn public_key(&self, key_id: &KeyId) -> Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.public_key(key_id).await
    }

    async fn sign_digest(&self, request: &SigningRequest) -> Result<Vec<u8>> {
        match &self.script {
            CustodyScript::Honest => self.inner.sign_digest(request).await,
            CustodyScript::HighS => {
                let der = self.inner.sign_digest(request).await?;
                let signature = K256Signature::from_der(&der).unwrap();
                let (r, s) = signature.split_bytes();
                let high_s = SECP256K1_N - U256::from_be_slice(&s);
                let twin = K256Signature::from_scalars(r, high_s.to_be_bytes::<32>()).unwrap();
                Ok(twin.to_der().as_bytes().to_vec())
            }
            CustodyScript::Empty => Ok(Vec::new()),
            CustodyScript::OtherKey(key) => {
                LocalCustody::new()
                    .with_key(request.key_id.clone(), key.clone())
                    .sign_digest(request)
                    .await
            }
        }
    }
}

/// Signs `tx` with [`secret_key`] directly through `k256`, bypassing the
/// DER round trip, and returns the raw transaction hex.
pub fn sign_locally(tx: &Transaction) -> String {
    let digest: B256 = tx.signing_hash();
    let (signature, recovery_id) = secret_key()
        .sign_prehash_recoverable(digest.as_slice())
        .unwrap();
    let (r, s) = signature.split_bytes();
    let signature = Signature::new(
        U256::from_be_slice(&r),
        U256::from_be_slice(&s),
        recovery_id.to_byte(),
    );
    tx.signed_hex(&signature)
}

/// The recipient used by the transaction fixtures.
pub fn recipient() -> Address {
    Address::new([0x35; 20])
}
