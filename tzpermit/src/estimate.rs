//! Fee estimation for relayed permit batches.
//!
//! The relayer submits two operations in one group: the `permit` call that
//! registers the signed permit and the relayed call itself. The node's
//! simulation needs a source account but no valid signature, so the batch
//! is simulated under a read-only identity. That account must be revealed
//! on chain, or the node rejects the simulation.

#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::capability::{ChainClient, ContractProxy, FeeEstimate, ReadOnlySigner};
use crate::constants::PERMIT_ENTRYPOINT;
use crate::error::{EstimationError, GasStationError};
use crate::permit::PermitPayload;
use crate::transfer::{EntrypointArgs, PermitParam};
use crate::types::PublicKey;

/// Estimates what a relayer pays to submit a permit and the call it permits.
#[derive(Debug, Clone)]
pub struct FeeEstimator<C> {
    chain: C,
    identity: ReadOnlySigner,
}

impl<C> FeeEstimator<C> {
    /// Creates an estimator simulating as the account of `identity`.
    pub fn new(chain: C, identity: PublicKey) -> Self {
        Self {
            chain,
            identity: ReadOnlySigner::from_public_key(identity),
        }
    }

    /// The identity simulations run under.
    pub const fn identity(&self) -> &ReadOnlySigner {
        &self.identity
    }
}

impl<C: ChainClient> FeeEstimator<C> {
    /// Estimates the total fee, in mutez, of registering `permit` and then
    /// calling `entrypoint` with `args` on `contract`.
    ///
    /// # Errors
    ///
    /// Returns [`GasStationError::Encoding`] if either call cannot be encoded
    /// and [`GasStationError::Estimation`] if the simulation fails. A failed
    /// simulation never yields a partial total.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "permit.estimate", skip_all, err, fields(contract = %contract.address(), entrypoint = %entrypoint))
    )]
    pub async fn estimate<P: ContractProxy + ?Sized>(
        &self,
        contract: &P,
        permit: &PermitPayload,
        entrypoint: &str,
        args: &EntrypointArgs,
    ) -> Result<u64, GasStationError> {
        let calls = [
            contract.build_unsigned_call(PERMIT_ENTRYPOINT, &EntrypointArgs::Permit(vec![PermitParam::from(permit)]))?,
            contract.build_unsigned_call(entrypoint, args)?,
        ];
        let estimates = self.chain.estimate_batch(&self.identity, &calls).await?;
        let total = total_fee(&estimates, calls.len())?;

        #[cfg(feature = "telemetry")]
        tracing::debug!(total, operations = estimates.len(), "relay batch estimated");

        Ok(total)
    }
}

/// Sums the suggested fees of a simulated batch of `expected` operations.
///
/// # Errors
///
/// Returns [`EstimationError::ResultCount`] if the simulation covered a
/// different number of operations and [`EstimationError::Overflow`] if the
/// sum does not fit in `u64`.
pub fn total_fee(estimates: &[FeeEstimate], expected: usize) -> Result<u64, EstimationError> {
    if estimates.len() != expected {
        return Err(EstimationError::ResultCount {
            expected,
            actual: estimates.len(),
        });
    }
    estimates
        .iter()
        .try_fold(0u64, |acc, e| acc.checked_add(e.suggested_fee))
        .ok_or(EstimationError::Overflow)
}
