#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Permit meta-transactions for Tezos tokens.
//!
//! A permit (TZIP-17) lets an account authorize a relayer to submit a token
//! transfer on its behalf, with the relayer paying the baker fee and taking a
//! token fee leg in return. This crate builds such permits and prices their
//! relay.
//!
//! # Architecture
//!
//! - [`permit`] - [`PermitBuilder`]: relayer fee leg, counter read, permit
//!   hash, packing and signature
//! - [`estimate`] - [`FeeEstimator`]: simulation of the `permit` + relayed
//!   call batch under a read-only identity
//! - [`station`] - [`GasStation`]: both steps behind one call
//! - [`capability`] - the [`Signer`], [`ChainClient`] and [`ContractProxy`]
//!   capabilities everything above is built on
//! - [`michelson`] - Micheline model, `PACK`, schema encoder and forging
//! - [`transfer`] - FA2 / FA1.2 transfer argument shapes
//! - [`types`] and [`encoding`] - addresses, keys, signatures, base58check
//!   and blake2b
//!
//! Node-backed capabilities live in the `tzpermit-rpc` crate.
//!
//! # Feature Flags
//!
//! - `telemetry` - `tracing` spans around the permit and estimation steps

pub mod capability;
pub mod config;
pub mod constants;
pub mod encoding;
pub mod error;
pub mod estimate;
pub mod michelson;
pub mod permit;
pub mod station;
pub mod transfer;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use capability::{ChainClient, ContractProxy, FeeEstimate, ReadOnlySigner, Signer, UnsignedCall};
pub use config::{ConfigError, GasStationConfig};
pub use error::{EncodingError, EstimationError, GasStationError, RpcError, SigningError};
pub use estimate::FeeEstimator;
pub use michelson::{EntrypointSchema, Micheline, TypedValue};
pub use permit::{PermitBuilder, PermitLock, PermitLocks, PermitPayload, PermitRequest, PermitStorage};
pub use station::{GasStation, PreparedPermit};
pub use transfer::{EntrypointArgs, PermitParam, TransferArgs, TransferBatch, TransferLeg, TransferSource};
pub use types::{Address, AddressKind, ChainId, PublicKey, Signature, SignatureKind};
