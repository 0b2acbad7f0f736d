//! The gas station: permit building and relay fee estimation behind one
//! entry point.

use serde::{Deserialize, Serialize};

#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::capability::{ChainClient, ContractProxy, Signer};
use crate::config::GasStationConfig;
use crate::constants::TRANSFER_ENTRYPOINT;
use crate::error::GasStationError;
use crate::estimate::FeeEstimator;
use crate::permit::{PermitBuilder, PermitLocks, PermitPayload, PermitRequest};
use crate::transfer::{EntrypointArgs, TransferBatch};
use crate::types::{Address, PublicKey};

/// Everything a relayer needs to submit a permitted transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedPermit {
    /// The transfer arguments the permit covers.
    pub batch: TransferBatch,
    /// The signed permit.
    pub permit: PermitPayload,
    /// Estimated total fee of the relay batch, in mutez.
    pub estimated_fee: u64,
}

/// Builds permits and prices their relay for one account.
#[derive(Debug, Clone)]
pub struct GasStation<S, C> {
    builder: PermitBuilder<S, C>,
    estimator: FeeEstimator<C>,
}

impl<S, C: Clone> GasStation<S, C> {
    /// Creates a station paying fees to `relayer` and simulating as the
    /// account of `estimator_key`.
    pub fn new(signer: S, chain: C, relayer: Address, estimator_key: PublicKey) -> Self {
        Self {
            builder: PermitBuilder::new(signer, chain.clone(), relayer),
            estimator: FeeEstimator::new(chain, estimator_key),
        }
    }

    /// Creates a station using the relayer and estimator identity of `config`.
    pub fn from_config(config: &GasStationConfig, signer: S, chain: C) -> Self {
        Self::new(signer, chain, config.relayer, config.estimator_public_key.clone())
    }

    /// Shares a permit lock table with other stations.
    #[must_use]
    pub fn with_locks(mut self, locks: PermitLocks) -> Self {
        self.builder = self.builder.with_locks(locks);
        self
    }

    /// The permit builder.
    pub const fn builder(&self) -> &PermitBuilder<S, C> {
        &self.builder
    }

    /// The fee estimator.
    pub const fn estimator(&self) -> &FeeEstimator<C> {
        &self.estimator
    }
}

impl<S: Signer, C: ChainClient> GasStation<S, C> {
    /// Signs a permit for `request` on `contract` and estimates the fee of
    /// relaying it.
    ///
    /// # Errors
    ///
    /// Returns the first [`GasStationError`] of either step; nothing is
    /// returned for a permit whose estimation failed.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "gas_station.prepare", skip_all, err, fields(contract = %contract.address()))
    )]
    pub async fn prepare<P: ContractProxy + ?Sized>(
        &self,
        contract: &P,
        request: &PermitRequest,
    ) -> Result<PreparedPermit, GasStationError> {
        let (batch, permit) = self.builder.build(contract, request).await?;
        let args = EntrypointArgs::from(batch.clone());
        let estimated_fee = self
            .estimator
            .estimate(contract, &permit, TRANSFER_ENTRYPOINT, &args)
            .await?;
        Ok(PreparedPermit {
            batch,
            permit,
            estimated_fee,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EstimationError;
    use crate::testing::{Call, MockChain, MockContract, addr, fee};

    #[tokio::test]
    async fn test_prepare_builds_then_estimates() {
        let chain = MockChain::new().with_estimates(vec![fee(100), fee(250)]);
        let contract = MockContract::fa2(chain.log(), 2);
        let config = GasStationConfig {
            relayer: addr(9),
            estimator_public_key: PublicKey::Ed25519([8; 32]),
            rpc_url: "http://localhost:8732".to_owned(),
            request_timeout_secs: None,
        };
        let station = GasStation::from_config(&config, chain.signer(1), chain.clone());

        let prepared = station
            .prepare(&contract, &PermitRequest::new(addr(2), 10).with_relayer_fee(1))
            .await
            .unwrap();

        assert_eq!(prepared.estimated_fee, 350);
        assert_eq!(prepared.batch.sources()[0].txs()[1].destination(), &addr(9));
        let (source, calls) = chain.estimated().pop().unwrap();
        assert_eq!(source, PublicKey::Ed25519([8; 32]).hash());
        assert_eq!(calls[1].entrypoint, "transfer");
        assert_eq!(chain.calls().last(), Some(&Call::Estimate));
    }

    #[tokio::test]
    async fn test_prepare_surfaces_estimation_failure() {
        let chain = MockChain::new().failing_estimation(EstimationError::Rejected("script_rejected".into()));
        let contract = MockContract::fa2(chain.log(), 0);
        let station = GasStation::new(chain.signer(1), chain.clone(), addr(9), PublicKey::Ed25519([8; 32]));

        let err = station
            .prepare(&contract, &PermitRequest::new(addr(2), 10))
            .await
            .unwrap_err();

        assert!(matches!(err, GasStationError::Estimation(EstimationError::Rejected(_))));
    }
}
