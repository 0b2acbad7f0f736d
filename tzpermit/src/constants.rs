//! Entrypoint names and fee parameters.

/// Entrypoint that moves tokens.
pub const TRANSFER_ENTRYPOINT: &str = "transfer";

/// TZIP-17 entrypoint that registers permits.
pub const PERMIT_ENTRYPOINT: &str = "permit";

/// Flat part of every suggested fee, in mutez.
pub const MINIMAL_FEE_MUTEZ: u64 = 100;

/// Fee per gas unit, in nanotez.
pub const MINIMAL_NANOTEZ_PER_GAS_UNIT: u64 = 100;

/// Fee per forged byte, in mutez.
pub const MINIMAL_MUTEZ_PER_BYTE: u64 = 1;

/// Gas units added on top of the simulated consumption.
pub const GAS_SAFETY_MARGIN: u64 = 100;

/// Protocol gas limit of a single operation. Budgets the node's `pack_data`
/// calls; simulations use the limits the node reports.
pub const HARD_GAS_LIMIT_PER_OPERATION: u64 = 1_040_000;

/// Gas limit covering `consumed_milligas`, with the safety margin.
#[must_use]
pub const fn gas_limit_for(consumed_milligas: u64) -> u64 {
    consumed_milligas.div_ceil(1000).saturating_add(GAS_SAFETY_MARGIN)
}

/// Suggested baker fee for an operation, in mutez:
/// `100 + ceil(gas_limit * 100 / 1000) + size`.
///
/// Returns `None` on overflow.
#[must_use]
pub fn suggested_fee(gas_limit: u64, size_bytes: u64) -> Option<u64> {
    let gas_fee = gas_limit.checked_mul(MINIMAL_NANOTEZ_PER_GAS_UNIT)?.div_ceil(1000);
    MINIMAL_FEE_MUTEZ
        .checked_add(gas_fee)?
        .checked_add(size_bytes.checked_mul(MINIMAL_MUTEZ_PER_BYTE)?)
}
