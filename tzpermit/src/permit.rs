//! Building signed TZIP-17 permits for relayed token transfers.
//!
//! A permit lets a relayer submit a `transfer` on behalf of an account. The
//! account signs the packed pair
//! `Pair (Pair contract chain_id) (Pair permit_counter hash)` where `hash` is
//! the blake2b digest of the packed transfer arguments. The contract
//! recomputes the hash from the arguments the relayer submits and accepts the
//! call only if it matches a registered permit.
//!
//! [`PermitBuilder`] runs the sequence end to end: it appends the relayer's
//! fee leg, reads the counter, hashes the arguments, packs and signs.

use alloy_primitives::{B256, Bytes};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::capability::{ChainClient, ContractProxy, Signer};
use crate::constants::TRANSFER_ENTRYPOINT;
use crate::encoding::{blake2b_256, hex_bytes};
use crate::error::{GasStationError, RpcError};
use crate::michelson::schema::find_field;
use crate::michelson::{Micheline, TypedValue};
use crate::transfer::{EntrypointArgs, PermitParam, TransferBatch};
use crate::types::{Address, ChainId, PublicKey, Signature};

macro_rules! traced {
    ($fut:expr, $span:expr) => {{
        #[cfg(feature = "telemetry")]
        {
            use tracing::Instrument;
            $fut.instrument($span).await
        }
        #[cfg(not(feature = "telemetry"))]
        {
            $fut.await
        }
    }};
}

/// Permit fields of a contract's storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermitStorage {
    /// Number of permits the contract has accepted so far.
    pub permit_counter: u64,
    /// Default permit lifetime in seconds, when the contract defines one.
    pub default_expiry: Option<u64>,
}

impl PermitStorage {
    /// Extracts the permit fields from a storage value and its type.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::MissingStorageField`] if the storage has no
    /// `%permit_counter` natural number.
    pub fn from_storage(ty: &Micheline, value: &Micheline) -> Result<Self, RpcError> {
        let permit_counter = find_field(ty, value, "permit_counter")
            .as_ref()
            .and_then(as_u64)
            .ok_or(RpcError::MissingStorageField("permit_counter"))?;
        let default_expiry = find_field(ty, value, "default_expiry")
            .as_ref()
            .and_then(as_u64);
        Ok(Self {
            permit_counter,
            default_expiry,
        })
    }
}

fn as_u64(node: &Micheline) -> Option<u64> {
    match node {
        Micheline::Int { int } => u64::try_from(*int).ok(),
        Micheline::Prim { prim, args, .. } if prim == "Some" => args.first().and_then(as_u64),
        _ => None,
    }
}

/// What the account asks the relayer to do.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermitRequest {
    /// Receiving account of the intended transfer.
    pub destination: Address,
    /// Token id, for multi-asset contracts.
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<u64>,
    /// Amount of the intended transfer.
    #[serde_as(as = "DisplayFromStr")]
    pub amount: u128,
    /// Amount credited to the relayer for submitting.
    #[serde_as(as = "DisplayFromStr")]
    pub relayer_fee: u128,
}

impl PermitRequest {
    /// Creates a request without token id and without relayer fee.
    #[must_use]
    pub const fn new(destination: Address, amount: u128) -> Self {
        Self {
            destination,
            token_id: None,
            amount,
            relayer_fee: 0,
        }
    }

    /// Sets the token id.
    #[must_use]
    pub const fn with_token_id(mut self, token_id: u64) -> Self {
        self.token_id = Some(token_id);
        self
    }

    /// Sets the relayer fee.
    #[must_use]
    pub const fn with_relayer_fee(mut self, relayer_fee: u128) -> Self {
        self.relayer_fee = relayer_fee;
        self
    }
}

/// A signed permit, ready to be registered through the `permit` entrypoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermitPayload {
    /// Key of the signing account.
    pub public_key: PublicKey,
    /// Signature over [`packed`](Self::packed).
    pub signature: Signature,
    /// Blake2b digest of the packed transfer arguments.
    #[serde(with = "hex_bytes::b256")]
    pub hash: B256,
    /// The packed permit pair that was signed.
    #[serde(with = "hex_bytes")]
    pub packed: Bytes,
}

impl From<&PermitPayload> for PermitParam {
    fn from(payload: &PermitPayload) -> Self {
        Self {
            public_key: payload.public_key.clone(),
            signature: payload.signature,
            hash: payload.hash,
        }
    }
}

/// Hashes packed call arguments into a permit hash.
#[must_use]
pub fn permit_hash(packed_args: &[u8]) -> B256 {
    B256::from(blake2b_256(packed_args))
}

/// The value and type whose packing an account signs to grant a permit.
#[must_use]
pub fn permit_signing_data(contract: &Address, chain_id: &ChainId, counter: u64, hash: &B256) -> TypedValue {
    let prim = |name: &str| Micheline::prim(name, vec![]);
    TypedValue {
        value: Micheline::pair(
            Micheline::pair(Micheline::string(contract.to_string()), Micheline::string(chain_id.to_string())),
            Micheline::pair(Micheline::int(i128::from(counter)), Micheline::bytes(hash.to_vec())),
        ),
        ty: Micheline::prim(
            "pair",
            vec![
                Micheline::prim("pair", vec![prim("address"), prim("chain_id")]),
                Micheline::prim("pair", vec![prim("nat"), prim("bytes")]),
            ],
        ),
    }
}

type LockSlots = DashMap<(Address, Address), Arc<Mutex<()>>>;

/// Per-(account, contract) locks around the counter-to-signature section.
///
/// Two builds for the same pair that overlap would read the same counter and
/// produce two permits of which the contract accepts at most one. Sharing one
/// `PermitLocks` between builders serializes them.
///
/// A pair's slot is dropped once its last holder or waiter is gone.
#[derive(Debug, Clone, Default)]
pub struct PermitLocks {
    slots: Arc<LockSlots>,
}

impl PermitLocks {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive use of the (account, contract) pair.
    pub async fn acquire(&self, account: Address, contract: Address) -> PermitLock {
        let key = (account, contract);
        let slot = {
            let entry = self.slots.entry(key).or_default();
            Arc::clone(entry.value())
        };
        let guard = slot.lock_owned().await;
        PermitLock {
            guard: Some(guard),
            key,
            slots: Arc::clone(&self.slots),
        }
    }

    /// Number of pairs currently held or waited on.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no pair is held or waited on.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Exclusive hold on one (account, contract) pair, released on drop.
#[derive(Debug)]
pub struct PermitLock {
    guard: Option<OwnedMutexGuard<()>>,
    key: (Address, Address),
    slots: Arc<LockSlots>,
}

impl Drop for PermitLock {
    fn drop(&mut self) {
        // The guard holds its own reference to the slot.
        drop(self.guard.take());
        self.slots
            .remove_if(&self.key, |_, slot| Arc::strong_count(slot) == 1);
    }
}

/// Builds permits for the account behind a [`Signer`].
#[derive(Debug, Clone)]
pub struct PermitBuilder<S, C> {
    signer: S,
    chain: C,
    relayer: Address,
    locks: PermitLocks,
}

impl<S, C> PermitBuilder<S, C> {
    /// Creates a builder paying the fee leg to `relayer`.
    pub fn new(signer: S, chain: C, relayer: Address) -> Self {
        Self {
            signer,
            chain,
            relayer,
            locks: PermitLocks::new(),
        }
    }

    /// Shares a lock table with other builders.
    #[must_use]
    pub fn with_locks(mut self, locks: PermitLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Account credited with the relayer fee.
    pub const fn relayer(&self) -> &Address {
        &self.relayer
    }

    /// The chain client.
    pub const fn chain(&self) -> &C {
        &self.chain
    }
}

impl<S: Signer, C: ChainClient> PermitBuilder<S, C> {
    /// Builds the relayed transfer batch and a signed permit for it.
    ///
    /// The permit counter is read after the pair lock is taken and the lock
    /// is held until the signature exists.
    ///
    /// # Errors
    ///
    /// Returns [`GasStationError::Encoding`] if the contract schema rejects
    /// the arguments, [`GasStationError::Signing`] if the signer fails and
    /// [`GasStationError::Rpc`] if a node read or pack call fails. No
    /// collaborator is called after the first failure.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "permit.build", skip_all, err, fields(contract = %contract.address()))
    )]
    pub async fn build<P: ContractProxy + ?Sized>(
        &self,
        contract: &P,
        request: &PermitRequest,
    ) -> Result<(TransferBatch, PermitPayload), GasStationError> {
        let source = self.signer.public_key_hash().await?;
        let batch = TransferBatch::with_relayer_fee(
            source,
            request.destination,
            request.token_id,
            request.amount,
            self.relayer,
            request.relayer_fee,
        );
        let contract_address = contract.address();

        let guard = self.locks.acquire(source, contract_address).await;
        let storage = traced!(
            contract.storage(),
            tracing::info_span!("permit.storage", contract = %contract_address)
        )?;
        let chain_id = self.chain.chain_id().await?;

        let call = contract.encode_entrypoint_call(TRANSFER_ENTRYPOINT, &EntrypointArgs::from(batch.clone()))?;
        let packed_args = traced!(
            self.chain.pack_data(&call.value, &call.ty),
            tracing::info_span!("permit.pack_args")
        )?;
        let hash = permit_hash(&packed_args);

        let signing = permit_signing_data(&contract_address, &chain_id, storage.permit_counter, &hash);
        let packed = self.chain.pack_data(&signing.value, &signing.ty).await?;
        let signature = traced!(
            self.signer.sign(&packed),
            tracing::info_span!("permit.sign", counter = storage.permit_counter)
        )?;
        drop(guard);

        let public_key = self.signer.public_key().await?;

        #[cfg(feature = "telemetry")]
        tracing::debug!(%source, counter = storage.permit_counter, %hash, "permit signed");

        Ok((
            batch,
            PermitPayload {
                public_key,
                signature,
                hash,
                packed,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EncodingError, SigningError};
    use crate::michelson::pack;
    use crate::testing::{Call, MockChain, MockContract, MockSigner, addr};
    use std::time::Duration;

    fn request() -> PermitRequest {
        PermitRequest::new(addr(2), 1_000).with_token_id(7).with_relayer_fee(15)
    }

    #[tokio::test]
    async fn test_build_produces_two_legs_and_signature() {
        let chain = MockChain::new();
        let signer = chain.signer(1);
        let contract = MockContract::fa2(chain.log(), 5);
        let builder = PermitBuilder::new(signer.clone(), chain.clone(), addr(9));

        let (batch, permit) = builder.build(&contract, &request()).await.unwrap();

        let [entry] = batch.sources() else { panic!("one source") };
        assert_eq!(entry.source(), &signer.address());
        let [leg, fee] = entry.txs() else { panic!("two legs") };
        assert_eq!((leg.destination(), leg.token_id(), leg.amount()), (&addr(2), Some(7), 1_000));
        assert_eq!((fee.destination(), fee.token_id(), fee.amount()), (&addr(9), Some(7), 15));

        assert_eq!(permit.public_key, signer.public_key_value());
        assert_eq!(permit.signature, MockSigner::signature_for(&permit.packed));
    }

    #[tokio::test]
    async fn test_hash_covers_packed_transfer_arguments() {
        let chain = MockChain::new();
        let contract = MockContract::fa2(chain.log(), 0);
        let builder = PermitBuilder::new(chain.signer(1), chain.clone(), addr(9));

        let (batch, permit) = builder.build(&contract, &request()).await.unwrap();

        let call = contract
            .encode_entrypoint_call(TRANSFER_ENTRYPOINT, &EntrypointArgs::from(batch))
            .unwrap();
        let packed = pack(&call.value, &call.ty).unwrap();
        assert_eq!(permit.hash, permit_hash(&packed));

        let (_, again) = builder.build(&contract, &request()).await.unwrap();
        assert_eq!(again.hash, permit.hash);
        assert_eq!(again.packed, permit.packed);
    }

    #[tokio::test]
    async fn test_any_field_change_changes_hash() {
        let chain = MockChain::new();
        let contract = MockContract::fa2(chain.log(), 0);
        let builder = PermitBuilder::new(chain.signer(1), chain.clone(), addr(9));
        let (_, base) = builder.build(&contract, &request()).await.unwrap();

        let variants = [
            PermitRequest::new(addr(3), 1_000).with_token_id(7).with_relayer_fee(15),
            PermitRequest::new(addr(2), 1_001).with_token_id(7).with_relayer_fee(15),
            PermitRequest::new(addr(2), 1_000).with_token_id(8).with_relayer_fee(15),
            PermitRequest::new(addr(2), 1_000).with_token_id(7).with_relayer_fee(16),
        ];
        for variant in &variants {
            let (_, permit) = builder.build(&contract, variant).await.unwrap();
            assert_ne!(permit.hash, base.hash, "{variant:?}");
        }
        let (_, other_relayer) = PermitBuilder::new(chain.signer(1), chain.clone(), addr(8))
            .build(&contract, &request())
            .await
            .unwrap();
        assert_ne!(other_relayer.hash, base.hash);
    }

    #[tokio::test]
    async fn test_packed_pair_contains_storage_counter() {
        let chain = MockChain::new();
        let contract = MockContract::fa2(chain.log(), 5);
        let builder = PermitBuilder::new(chain.signer(1), chain.clone(), addr(9));

        let (_, permit) = builder.build(&contract, &request()).await.unwrap();

        let signing = permit_signing_data(&contract.address(), &MockChain::CHAIN_ID, 5, &permit.hash);
        assert_eq!(permit.packed, pack(&signing.value, &signing.ty).unwrap());
        let packed_pairs = chain.packed_values();
        let (_, counter_pair) = packed_pairs[1].split_pair().unwrap();
        let (counter, _) = counter_pair.split_pair().unwrap();
        assert_eq!(counter, &Micheline::int(5));
    }

    #[tokio::test]
    async fn test_signer_failure_stops_sequence() {
        let chain = MockChain::new();
        let contract = MockContract::fa2(chain.log(), 1);
        let signer = chain.signer(1).refusing();
        let builder = PermitBuilder::new(signer, chain.clone(), addr(9));

        let err = builder.build(&contract, &request()).await.unwrap_err();

        assert!(matches!(err, GasStationError::Signing(SigningError::Refused(_))));
        assert_eq!(
            chain.calls(),
            [
                Call::PublicKeyHash,
                Call::Storage,
                Call::ChainId,
                Call::Pack,
                Call::Pack,
                Call::Sign,
            ]
        );
    }

    #[tokio::test]
    async fn test_encoding_failure_before_any_packing() {
        let chain = MockChain::new();
        let contract = MockContract::without_transfer(chain.log(), 1);
        let builder = PermitBuilder::new(chain.signer(1), chain.clone(), addr(9));

        let err = builder.build(&contract, &request()).await.unwrap_err();

        assert_eq!(
            err,
            GasStationError::Encoding(EncodingError::UnknownEntrypoint("transfer".into()))
        );
        assert!(!chain.calls().contains(&Call::Pack));
    }

    #[tokio::test]
    async fn test_rpc_failure_propagates_unmodified() {
        let chain = MockChain::new().failing_chain_id();
        let contract = MockContract::fa2(chain.log(), 1);
        let builder = PermitBuilder::new(chain.signer(1), chain.clone(), addr(9));

        let err = builder.build(&contract, &request()).await.unwrap_err();

        assert_eq!(err, GasStationError::Rpc(RpcError::Transport("connection refused".into())));
        assert!(!chain.calls().contains(&Call::Sign));
    }

    #[tokio::test]
    async fn test_concurrent_builds_for_same_pair_are_serialized() {
        let chain = MockChain::new().with_pack_delay(Duration::from_millis(20));
        let contract = MockContract::fa2(chain.log(), 1);
        let locks = PermitLocks::new();
        let first = PermitBuilder::new(chain.signer(1), chain.clone(), addr(9)).with_locks(locks.clone());
        let second = PermitBuilder::new(chain.signer(1), chain.clone(), addr(9)).with_locks(locks);

        let (a, b) = futures_util::future::join(
            first.build(&contract, &request()),
            second.build(&contract, &request()),
        )
        .await;
        a.unwrap();
        b.unwrap();

        // Each storage read must be followed by that build's signature before
        // the next storage read happens.
        let sequence: Vec<Call> = chain
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Storage | Call::Sign))
            .collect();
        assert_eq!(sequence, [Call::Storage, Call::Sign, Call::Storage, Call::Sign]);
    }

    #[tokio::test]
    async fn test_lock_slots_are_released() {
        let locks = PermitLocks::new();

        let held = locks.acquire(addr(1), addr(5)).await;
        let other = locks.acquire(addr(2), addr(5)).await;
        assert_eq!(locks.len(), 2);
        drop(held);
        assert_eq!(locks.len(), 1);
        drop(other);
        assert!(locks.is_empty());

        let first = locks.acquire(addr(1), addr(5)).await;
        let waiter = tokio::spawn({
            let locks = locks.clone();
            async move { drop(locks.acquire(addr(1), addr(5)).await) }
        });
        tokio::task::yield_now().await;
        drop(first);
        assert_eq!(locks.len(), 1, "slot kept while a waiter is queued");
        waiter.await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_build_leaves_no_lock_slot_behind() {
        let chain = MockChain::new();
        let contract = MockContract::fa2(chain.log(), 1);
        let locks = PermitLocks::new();
        let builder = PermitBuilder::new(chain.signer(1), chain.clone(), addr(9)).with_locks(locks.clone());

        builder.build(&contract, &request()).await.unwrap();
        assert!(locks.is_empty());

        let failing = PermitBuilder::new(chain.signer(1).refusing(), chain.clone(), addr(9)).with_locks(locks.clone());
        failing.build(&contract, &request()).await.unwrap_err();
        assert!(locks.is_empty());
    }

    #[test]
    fn test_storage_reader_handles_missing_and_optional_fields() {
        let ty = Micheline::prim(
            "pair",
            vec![
                Micheline::prim_annotated("nat", vec![], vec!["%permit_counter".into()]),
                Micheline::prim_annotated(
                    "option",
                    vec![Micheline::prim("nat", vec![])],
                    vec!["%default_expiry".into()],
                ),
            ],
        );
        let value = Micheline::pair(Micheline::int(9), Micheline::prim("Some", vec![Micheline::int(60)]));
        assert_eq!(
            PermitStorage::from_storage(&ty, &value).unwrap(),
            PermitStorage {
                permit_counter: 9,
                default_expiry: Some(60)
            }
        );
        assert_eq!(
            PermitStorage::from_storage(&Micheline::prim("nat", vec![]), &Micheline::int(1)),
            Err(RpcError::MissingStorageField("permit_counter"))
        );
    }
}
