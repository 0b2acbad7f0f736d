#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Tezos node backend for `tzpermit`.
//!
//! [`TezosRpcClient`] implements [`tzpermit::ChainClient`] over a node's JSON
//! RPC, and [`RpcContract`] implements [`tzpermit::ContractProxy`] for a
//! deployed contract.
//!
//! ```no_run
//! use tzpermit::{GasStation, GasStationConfig, PermitRequest};
//! use tzpermit_rpc::{RpcContract, TezosRpcClient};
//!
//! # async fn run(signer: impl tzpermit::Signer, contract: tzpermit::Address, to: tzpermit::Address)
//! #     -> Result<(), Box<dyn std::error::Error>> {
//! let config = GasStationConfig::load()?;
//! let client = TezosRpcClient::from_config(&config)?;
//! let contract = RpcContract::at(client.clone(), contract).await?;
//! let station = GasStation::from_config(&config, signer, client);
//! let prepared = station.prepare(&contract, &PermitRequest::new(to, 100).with_relayer_fee(1)).await?;
//! println!("relay costs {} mutez", prepared.estimated_fee);
//! # Ok(())
//! # }
//! ```
//!
//! # Feature Flags
//!
//! - `telemetry` - `tracing` spans around node requests

pub mod client;
pub mod contract;
pub mod error;
pub mod simulate;

pub use client::{ContractScript, TezosRpcClient};
pub use contract::RpcContract;
pub use error::TezosRpcError;
