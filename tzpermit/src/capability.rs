//! Capabilities the permit flow is built on.
//!
//! [`PermitBuilder`](crate::permit::PermitBuilder) and
//! [`FeeEstimator`](crate::estimate::FeeEstimator) never reach for a global
//! client: they are handed a [`Signer`], a [`ChainClient`] and a
//! [`ContractProxy`]. The `tzpermit-rpc` crate provides node-backed
//! implementations; tests substitute doubles.

use alloy_primitives::Bytes;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{EncodingError, EstimationError, RpcError, SigningError};
use crate::michelson::{Micheline, TypedValue};
use crate::permit::PermitStorage;
use crate::transfer::EntrypointArgs;
use crate::types::{Address, ChainId, PublicKey, Signature};

/// Produces signatures for one account.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Address of the signing account.
    async fn public_key_hash(&self) -> Result<Address, SigningError>;

    /// Public key of the signing account.
    async fn public_key(&self) -> Result<PublicKey, SigningError>;

    /// Signs an opaque payload.
    async fn sign(&self, payload: &[u8]) -> Result<Signature, SigningError>;
}

/// A contract call that has not been signed or assigned a counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedCall {
    /// Called contract.
    pub destination: Address,
    /// Called entrypoint.
    pub entrypoint: String,
    /// Encoded arguments.
    pub parameters: Micheline,
    /// Tez sent along, in mutez.
    pub amount: u64,
}

/// Simulated cost of one operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeeEstimate {
    /// Gas limit covering the consumed gas.
    pub gas_limit: u64,
    /// Storage limit covering paid storage.
    pub storage_limit: u64,
    /// Suggested baker fee, in mutez.
    pub suggested_fee: u64,
}

/// Read access to a chain node.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Packs `data` of type `ty` as the `PACK` instruction would.
    async fn pack_data(&self, data: &Micheline, ty: &Micheline) -> Result<Bytes, RpcError>;

    /// Identifier of the chain the node follows.
    async fn chain_id(&self) -> Result<ChainId, RpcError>;

    /// Simulates `calls` as one operation group sent by `source` and returns
    /// one estimate per call, in order.
    async fn estimate_batch(
        &self,
        source: &dyn Signer,
        calls: &[UnsignedCall],
    ) -> Result<Vec<FeeEstimate>, EstimationError>;
}

/// Typed access to one deployed contract.
#[async_trait]
pub trait ContractProxy: Send + Sync {
    /// Address of the contract.
    fn address(&self) -> Address;

    /// Reads the permit-related fields of the current storage.
    async fn storage(&self) -> Result<PermitStorage, RpcError>;

    /// Encodes arguments through the entrypoint's parameter type.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError`] if the entrypoint is unknown or the
    /// arguments do not fit its type.
    fn encode_entrypoint_call(&self, entrypoint: &str, args: &EntrypointArgs) -> Result<TypedValue, EncodingError>;

    /// Builds an unsigned call of the entrypoint.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError`] under the same conditions as
    /// [`encode_entrypoint_call`](Self::encode_entrypoint_call).
    fn build_unsigned_call(&self, entrypoint: &str, args: &EntrypointArgs) -> Result<UnsignedCall, EncodingError> {
        let TypedValue { value, .. } = self.encode_entrypoint_call(entrypoint, args)?;
        Ok(UnsignedCall {
            destination: self.address(),
            entrypoint: entrypoint.to_owned(),
            parameters: value,
            amount: 0,
        })
    }
}

#[async_trait]
impl<T: Signer + ?Sized> Signer for Arc<T> {
    async fn public_key_hash(&self) -> Result<Address, SigningError> {
        (**self).public_key_hash().await
    }

    async fn public_key(&self) -> Result<PublicKey, SigningError> {
        (**self).public_key().await
    }

    async fn sign(&self, payload: &[u8]) -> Result<Signature, SigningError> {
        (**self).sign(payload).await
    }
}

#[async_trait]
impl<T: ChainClient + ?Sized> ChainClient for Arc<T> {
    async fn pack_data(&self, data: &Micheline, ty: &Micheline) -> Result<Bytes, RpcError> {
        (**self).pack_data(data, ty).await
    }

    async fn chain_id(&self) -> Result<ChainId, RpcError> {
        (**self).chain_id().await
    }

    async fn estimate_batch(
        &self,
        source: &dyn Signer,
        calls: &[UnsignedCall],
    ) -> Result<Vec<FeeEstimate>, EstimationError> {
        (**self).estimate_batch(source, calls).await
    }
}

#[async_trait]
impl<T: ContractProxy + ?Sized> ContractProxy for Arc<T> {
    fn address(&self) -> Address {
        (**self).address()
    }

    async fn storage(&self) -> Result<PermitStorage, RpcError> {
        (**self).storage().await
    }

    fn encode_entrypoint_call(&self, entrypoint: &str, args: &EntrypointArgs) -> Result<TypedValue, EncodingError> {
        (**self).encode_entrypoint_call(entrypoint, args)
    }

    fn build_unsigned_call(&self, entrypoint: &str, args: &EntrypointArgs) -> Result<UnsignedCall, EncodingError> {
        (**self).build_unsigned_call(entrypoint, args)
    }
}

/// An identity that can appear as the source of simulated operations but can
/// never sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOnlySigner {
    public_key: PublicKey,
    address: Address,
}

impl ReadOnlySigner {
    /// Binds the identity of `public_key`, deriving its address.
    #[must_use]
    pub fn from_public_key(public_key: PublicKey) -> Self {
        let address = public_key.hash();
        Self {
            public_key,
            address,
        }
    }

    /// Address of the identity.
    #[must_use]
    pub const fn address(&self) -> &Address {
        &self.address
    }
}

#[async_trait]
impl Signer for ReadOnlySigner {
    async fn public_key_hash(&self) -> Result<Address, SigningError> {
        Ok(self.address)
    }

    async fn public_key(&self) -> Result<PublicKey, SigningError> {
        Ok(self.public_key.clone())
    }

    async fn sign(&self, _payload: &[u8]) -> Result<Signature, SigningError> {
        Err(SigningError::ReadOnly(self.address.to_string()))
    }
}
