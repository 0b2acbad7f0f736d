//! `run_operation` request and result shapes, and fee derivation from a
//! simulated operation group.

use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use tzpermit::constants::{gas_limit_for, suggested_fee};
use tzpermit::michelson::TransactionContent;
use tzpermit::michelson::forge::GROUP_OVERHEAD_BYTES;
use tzpermit::{ChainId, EstimationError, FeeEstimate, Signature};

/// Storage burned when an operation allocates a new account.
pub const ORIGINATION_SIZE: u64 = 257;

/// The resource limits of `GET context/constants` that bound a simulation.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ProtocolConstants {
    /// Gas one operation may declare.
    #[serde_as(as = "DisplayFromStr")]
    pub hard_gas_limit_per_operation: u64,
    /// Gas all operations of a block may declare together.
    #[serde_as(as = "DisplayFromStr")]
    pub hard_gas_limit_per_block: u64,
    /// Storage one operation may declare.
    #[serde_as(as = "DisplayFromStr")]
    pub hard_storage_limit_per_operation: u64,
}

impl ProtocolConstants {
    /// Gas limit for each of `operations` contents of one group, so that the
    /// group fits in a block.
    #[must_use]
    pub fn gas_limit_per_content(&self, operations: usize) -> u64 {
        let share = u64::try_from(operations)
            .ok()
            .filter(|n| *n > 0)
            .map_or(self.hard_gas_limit_per_block, |n| self.hard_gas_limit_per_block / n);
        share.min(self.hard_gas_limit_per_operation)
    }
}

/// Body of `POST helpers/scripts/run_operation`.
#[derive(Debug, Clone, Serialize)]
pub struct RunOperationRequest<'a> {
    /// The operation group to simulate.
    pub operation: UnsignedOperation<'a>,
    /// Chain the group is simulated on.
    pub chain_id: ChainId,
}

/// An operation group carrying a placeholder signature.
#[derive(Debug, Clone, Serialize)]
pub struct UnsignedOperation<'a> {
    /// Block hash the group is anchored to.
    pub branch: &'a str,
    /// The contents, in submission order.
    pub contents: &'a [TransactionContent],
    /// Never checked by the simulation.
    pub signature: Signature,
}

/// Result of `run_operation`.
#[derive(Debug, Clone, Deserialize)]
pub struct RunOperationResponse {
    /// One entry per submitted content, in order.
    pub contents: Vec<ContentResult>,
}

/// Simulated outcome of one content.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentResult {
    /// Receipt of the content.
    pub metadata: ContentMetadata,
}

/// Receipt of one content.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentMetadata {
    /// Result of the content itself.
    pub operation_result: OperationResult,
    /// Results of operations emitted by called contracts.
    #[serde(default)]
    pub internal_operation_results: Vec<InternalOperationResult>,
}

/// Receipt of an internal operation.
#[derive(Debug, Clone, Deserialize)]
pub struct InternalOperationResult {
    /// Result of the internal operation.
    pub result: OperationResult,
}

/// Status and resource usage of one applied (or not) operation.
#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationResult {
    /// `applied`, `failed`, `backtracked` or `skipped`.
    pub status: String,
    /// Gas consumed, in milligas.
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub consumed_milligas: Option<u64>,
    /// Storage growth paid by the source, in bytes.
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub paid_storage_size_diff: Option<u64>,
    /// Whether the operation created the destination account.
    #[serde(default)]
    pub allocated_destination_contract: bool,
    /// Errors reported for a failed operation.
    #[serde(default)]
    pub errors: Vec<NodeError>,
}

/// An error entry of an operation receipt.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeError {
    /// Error identifier, e.g. `proto.alpha.michelson_v1.script_rejected`.
    pub id: String,
}

impl OperationResult {
    fn is_applied(&self) -> bool {
        self.status == "applied"
    }

    fn storage_bytes(&self) -> u64 {
        let allocation = if self.allocated_destination_contract {
            ORIGINATION_SIZE
        } else {
            0
        };
        self.paid_storage_size_diff
            .unwrap_or_default()
            .saturating_add(allocation)
    }

    fn rejection(&self) -> EstimationError {
        if self.errors.is_empty() {
            return EstimationError::Rejected(self.status.clone());
        }
        let ids: Vec<&str> = self.errors.iter().map(|e| e.id.as_str()).collect();
        EstimationError::Rejected(format!("{}: {}", self.status, ids.join(", ")))
    }
}

impl ContentMetadata {
    fn results(&self) -> impl Iterator<Item = &OperationResult> {
        std::iter::once(&self.operation_result)
            .chain(self.internal_operation_results.iter().map(|i| &i.result))
    }
}

/// Turns a simulation of `contents` into one fee estimate per content.
///
/// # Errors
///
/// Returns [`EstimationError::ResultCount`] if the receipts do not match the
/// contents one to one, [`EstimationError::Rejected`] if any operation
/// (internal ones included) was not applied, and
/// [`EstimationError::Overflow`] if a fee does not fit in `u64`.
pub fn fee_estimates(
    contents: &[TransactionContent],
    response: &RunOperationResponse,
) -> Result<Vec<FeeEstimate>, EstimationError> {
    if response.contents.len() != contents.len() {
        return Err(EstimationError::ResultCount {
            expected: contents.len(),
            actual: response.contents.len(),
        });
    }
    if contents.is_empty() {
        return Ok(Vec::new());
    }

    // A failed operation backtracks the others; report the failure itself.
    let mut not_applied = response
        .contents
        .iter()
        .flat_map(|c| c.metadata.results())
        .filter(|r| !r.is_applied());
    if let Some(first) = not_applied.next() {
        let failed = std::iter::once(first)
            .chain(not_applied)
            .find(|r| r.status == "failed")
            .unwrap_or(first);
        return Err(failed.rejection());
    }

    let overhead_share = u64::try_from(GROUP_OVERHEAD_BYTES.div_ceil(contents.len()))
        .map_err(|_| EstimationError::Overflow)?;

    contents
        .iter()
        .zip(&response.contents)
        .map(|(content, result)| {
            let (milligas, storage_limit) = result
                .metadata
                .results()
                .fold((0u64, 0u64), |(gas, storage), r| {
                    (
                        gas.saturating_add(r.consumed_milligas.unwrap_or_default()),
                        storage.saturating_add(r.storage_bytes()),
                    )
                });
            let gas_limit = gas_limit_for(milligas);
            let suggested_fee = settled_fee(content, gas_limit, storage_limit, overhead_share)?;
            Ok(FeeEstimate {
                gas_limit,
                storage_limit,
                suggested_fee,
            })
        })
        .collect()
}

/// The fee is itself part of the forged bytes, so it is recomputed until its
/// own encoding stops changing the size.
fn settled_fee(
    content: &TransactionContent,
    gas_limit: u64,
    storage_limit: u64,
    overhead: u64,
) -> Result<u64, EstimationError> {
    let mut content = content.clone().with_limits(gas_limit, storage_limit);
    let mut fee = 0;
    for _ in 0..4 {
        content.fee = fee;
        let forged = content
            .forge()
            .map_err(|e| EstimationError::Rejected(format!("cannot forge operation: {e}")))?;
        let size = u64::try_from(forged.len())
            .ok()
            .and_then(|len| len.checked_add(overhead))
            .ok_or(EstimationError::Overflow)?;
        let next = suggested_fee(gas_limit, size).ok_or(EstimationError::Overflow)?;
        if next == fee {
            break;
        }
        fee = next;
    }
    Ok(fee)
}
