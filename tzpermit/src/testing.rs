//! In-memory doubles for the capability traits.

use alloy_primitives::Bytes;
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::capability::{ChainClient, ContractProxy, FeeEstimate, Signer, UnsignedCall};
use crate::encoding::blake2b_256;
use crate::error::{EncodingError, EstimationError, RpcError, SigningError};
use crate::michelson::{EntrypointSchema, Micheline, TypedValue, pack};
use crate::permit::PermitStorage;
use crate::transfer::EntrypointArgs;
use crate::types::{Address, AddressKind, ChainId, PublicKey, Signature, SignatureKind};

/// Calls observed across all doubles sharing one log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    PublicKeyHash,
    PublicKey,
    Sign,
    Storage,
    ChainId,
    Pack,
    Estimate,
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

fn record(log: &CallLog, call: Call) {
    log.lock().unwrap().push(call);
}

pub fn addr(byte: u8) -> Address {
    Address::new(AddressKind::Ed25519, [byte; 20])
}

pub fn fee(suggested_fee: u64) -> FeeEstimate {
    FeeEstimate {
        gas_limit: 1_000,
        storage_limit: 0,
        suggested_fee,
    }
}

#[derive(Debug, Clone)]
pub struct MockSigner {
    seed: u8,
    refuse: bool,
    log: CallLog,
}

impl MockSigner {
    pub fn public_key_value(&self) -> PublicKey {
        PublicKey::Ed25519([self.seed; 32])
    }

    pub fn address(&self) -> Address {
        self.public_key_value().hash()
    }

    pub fn refusing(mut self) -> Self {
        self.refuse = true;
        self
    }

    pub fn signature_for(payload: &[u8]) -> Signature {
        let digest = blake2b_256(payload);
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&digest);
        bytes[32..].copy_from_slice(&digest);
        Signature::new(SignatureKind::Ed25519, bytes)
    }
}

#[async_trait]
impl Signer for MockSigner {
    async fn public_key_hash(&self) -> Result<Address, SigningError> {
        record(&self.log, Call::PublicKeyHash);
        Ok(self.address())
    }

    async fn public_key(&self) -> Result<PublicKey, SigningError> {
        record(&self.log, Call::PublicKey);
        Ok(self.public_key_value())
    }

    async fn sign(&self, payload: &[u8]) -> Result<Signature, SigningError> {
        record(&self.log, Call::Sign);
        if self.refuse {
            return Err(SigningError::Refused("user rejected".into()));
        }
        Ok(Self::signature_for(payload))
    }
}

type EstimateResult = Result<Vec<FeeEstimate>, EstimationError>;

#[derive(Debug, Clone)]
pub struct MockChain {
    log: CallLog,
    packed: Arc<Mutex<Vec<Micheline>>>,
    estimated: Arc<Mutex<Vec<(Address, Vec<UnsignedCall>)>>>,
    estimates: EstimateResult,
    pack_delay: Option<Duration>,
    fail_chain_id: bool,
}

impl MockChain {
    pub const CHAIN_ID: ChainId = ChainId::new([0x7a, 0x06, 0xa7, 0x70]);

    pub fn new() -> Self {
        Self {
            log: CallLog::default(),
            packed: Arc::default(),
            estimated: Arc::default(),
            estimates: Ok(Vec::new()),
            pack_delay: None,
            fail_chain_id: false,
        }
    }

    pub fn log(&self) -> CallLog {
        Arc::clone(&self.log)
    }

    pub fn signer(&self, seed: u8) -> MockSigner {
        MockSigner {
            seed,
            refuse: false,
            log: self.log(),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log.lock().unwrap().clone()
    }

    pub fn packed_values(&self) -> Vec<Micheline> {
        self.packed.lock().unwrap().clone()
    }

    pub fn estimated(&self) -> Vec<(Address, Vec<UnsignedCall>)> {
        self.estimated.lock().unwrap().clone()
    }

    pub fn with_estimates(mut self, estimates: Vec<FeeEstimate>) -> Self {
        self.estimates = Ok(estimates);
        self
    }

    pub fn failing_estimation(mut self, error: EstimationError) -> Self {
        self.estimates = Err(error);
        self
    }

    pub const fn with_pack_delay(mut self, delay: Duration) -> Self {
        self.pack_delay = Some(delay);
        self
    }

    pub const fn failing_chain_id(mut self) -> Self {
        self.fail_chain_id = true;
        self
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn pack_data(&self, data: &Micheline, ty: &Micheline) -> Result<Bytes, RpcError> {
        record(&self.log, Call::Pack);
        self.packed.lock().unwrap().push(data.clone());
        if let Some(delay) = self.pack_delay {
            tokio::time::sleep(delay).await;
        }
        pack(data, ty).map_err(|e| RpcError::Node {
            status: 400,
            body: e.to_string(),
        })
    }

    async fn chain_id(&self) -> Result<ChainId, RpcError> {
        record(&self.log, Call::ChainId);
        if self.fail_chain_id {
            return Err(RpcError::Transport("connection refused".into()));
        }
        Ok(Self::CHAIN_ID)
    }

    async fn estimate_batch(
        &self,
        source: &dyn Signer,
        calls: &[UnsignedCall],
    ) -> Result<Vec<FeeEstimate>, EstimationError> {
        record(&self.log, Call::Estimate);
        let source = source.public_key_hash().await.map_err(EstimationError::Source)?;
        self.estimated.lock().unwrap().push((source, calls.to_vec()));
        self.estimates.clone()
    }
}

#[derive(Debug, Clone)]
pub struct MockContract {
    address: Address,
    schema: EntrypointSchema,
    storage: PermitStorage,
    log: CallLog,
}

fn permit_type() -> Micheline {
    serde_json::from_value(json!({
        "prim": "list",
        "args": [{ "prim": "pair", "args": [
            { "prim": "key" },
            { "prim": "pair", "args": [{ "prim": "signature" }, { "prim": "bytes" }] }
        ]}]
    }))
    .unwrap()
}

fn fa2_transfer_type() -> Micheline {
    serde_json::from_value(json!({
        "prim": "list",
        "args": [{ "prim": "pair", "args": [
            { "prim": "address", "annots": ["%from_"] },
            { "prim": "list", "annots": ["%txs"], "args": [{ "prim": "pair", "args": [
                { "prim": "address", "annots": ["%to_"] },
                { "prim": "pair", "args": [
                    { "prim": "nat", "annots": ["%token_id"] },
                    { "prim": "nat", "annots": ["%amount"] }
                ]}
            ]}]}
        ]}]
    }))
    .unwrap()
}

fn fa12_transfer_type() -> Micheline {
    serde_json::from_value(json!({
        "prim": "pair",
        "args": [
            { "prim": "address", "annots": [":from"] },
            { "prim": "pair", "args": [
                { "prim": "address", "annots": [":to"] },
                { "prim": "nat", "annots": [":value"] }
            ]}
        ]
    }))
    .unwrap()
}

impl MockContract {
    fn with_entrypoints(log: CallLog, counter: u64, entrypoints: Vec<(&str, Micheline)>) -> Self {
        let entrypoints: BTreeMap<String, Micheline> =
            entrypoints.into_iter().map(|(k, v)| (k.to_owned(), v)).collect();
        Self {
            address: Address::new(AddressKind::Originated, [0xc0; 20]),
            schema: EntrypointSchema::new(entrypoints),
            storage: PermitStorage {
                permit_counter: counter,
                default_expiry: None,
            },
            log,
        }
    }

    pub fn fa2(log: CallLog, counter: u64) -> Self {
        Self::with_entrypoints(
            log,
            counter,
            vec![("transfer", fa2_transfer_type()), ("permit", permit_type())],
        )
    }

    pub fn fa12(log: CallLog) -> Self {
        Self::with_entrypoints(
            log,
            0,
            vec![("transfer", fa12_transfer_type()), ("permit", permit_type())],
        )
    }

    pub fn without_transfer(log: CallLog, counter: u64) -> Self {
        Self::with_entrypoints(log, counter, vec![("permit", permit_type())])
    }
}

#[async_trait]
impl ContractProxy for MockContract {
    fn address(&self) -> Address {
        self.address
    }

    async fn storage(&self) -> Result<PermitStorage, RpcError> {
        record(&self.log, Call::Storage);
        Ok(self.storage)
    }

    fn encode_entrypoint_call(&self, entrypoint: &str, args: &EntrypointArgs) -> Result<TypedValue, EncodingError> {
        self.schema.encode_call(entrypoint, &args.to_json())
    }
}
