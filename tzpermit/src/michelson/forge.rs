//! Transaction operation contents and their binary forging.
//!
//! Only the transaction kind is needed: forged sizes feed the per-byte part
//! of the suggested fee.

use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};

use super::{Micheline, encode_micheline};
use crate::error::EncodingError;
use crate::michelson::pack::write_zarith_nat;
use crate::types::Address;

/// Operation tag of a transaction.
pub const TRANSACTION_TAG: u8 = 0x6c;

/// Bytes of an operation group that are not part of any content: the branch
/// block hash and the trailing signature.
pub const GROUP_OVERHEAD_BYTES: usize = 32 + 64;

/// Smart-contract call parameters of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameters {
    /// Target entrypoint.
    pub entrypoint: String,
    /// Argument value.
    pub value: Micheline,
}

/// A transaction operation content, as submitted to `run_operation`.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionContent {
    /// Always `"transaction"`.
    pub kind: String,
    /// Paying account.
    pub source: Address,
    /// Fee in mutez.
    #[serde_as(as = "DisplayFromStr")]
    pub fee: u64,
    /// Source account counter.
    #[serde_as(as = "DisplayFromStr")]
    pub counter: u64,
    /// Gas limit.
    #[serde_as(as = "DisplayFromStr")]
    pub gas_limit: u64,
    /// Storage limit in bytes.
    #[serde_as(as = "DisplayFromStr")]
    pub storage_limit: u64,
    /// Amount of tez sent, in mutez.
    #[serde_as(as = "DisplayFromStr")]
    pub amount: u64,
    /// Receiving account or contract.
    pub destination: Address,
    /// Call parameters, absent for plain transfers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Parameters>,
}

impl TransactionContent {
    /// Creates a zero-fee transaction from `source` to `destination`.
    #[must_use]
    pub fn new(source: Address, destination: Address, counter: u64) -> Self {
        Self {
            kind: "transaction".to_owned(),
            source,
            fee: 0,
            counter,
            gas_limit: 0,
            storage_limit: 0,
            amount: 0,
            destination,
            parameters: None,
        }
    }

    /// Sets the call parameters.
    #[must_use]
    pub fn with_parameters(mut self, entrypoint: impl Into<String>, value: Micheline) -> Self {
        self.parameters = Some(Parameters {
            entrypoint: entrypoint.into(),
            value,
        });
        self
    }

    /// Sets gas and storage limits.
    #[must_use]
    pub const fn with_limits(mut self, gas_limit: u64, storage_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self.storage_limit = storage_limit;
        self
    }

    /// Forges the content to its binary form.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError`] if the source is not an implicit account or
    /// the parameters contain unknown primitives.
    pub fn forge(&self) -> Result<Vec<u8>, EncodingError> {
        let source = self
            .source
            .to_key_hash_bytes()
            .ok_or_else(|| EncodingError::mismatch("implicit source", self.source.to_string()))?;

        let mut out = vec![TRANSACTION_TAG];
        out.extend_from_slice(&source);
        for n in [self.fee, self.counter, self.gas_limit, self.storage_limit, self.amount] {
            write_zarith_nat(&mut out, u128::from(n));
        }
        out.extend_from_slice(&self.destination.to_contract_bytes());

        match &self.parameters {
            None => out.push(0x00),
            Some(params) => {
                out.push(0xff);
                forge_entrypoint(&mut out, &params.entrypoint)?;
                let value = encode_micheline(&params.value)?;
                let len = u32::try_from(value.len()).map_err(|_| EncodingError::OutOfRange {
                    ty: "parameters",
                    value: value.len().to_string(),
                })?;
                out.extend_from_slice(&len.to_be_bytes());
                out.extend_from_slice(&value);
            }
        }
        Ok(out)
    }
}

fn forge_entrypoint(out: &mut Vec<u8>, name: &str) -> Result<(), EncodingError> {
    let tag = match name {
        "default" => Some(0),
        "root" => Some(1),
        "do" => Some(2),
        "set_delegate" => Some(3),
        "remove_delegate" => Some(4),
        "deposit" => Some(5),
        "stake" => Some(6),
        "unstake" => Some(7),
        "finalize_unstake" => Some(8),
        "set_delegate_parameters" => Some(9),
        _ => None,
    };
    if let Some(tag) = tag {
        out.push(tag);
        return Ok(());
    }
    let len = u8::try_from(name.len()).map_err(|_| EncodingError::OutOfRange {
        ty: "entrypoint",
        value: name.to_owned(),
    })?;
    out.push(0xff);
    out.push(len);
    out.extend_from_slice(name.as_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AddressKind;

    fn content() -> TransactionContent {
        TransactionContent::new(
            Address::new(AddressKind::Ed25519, [1; 20]),
            Address::new(AddressKind::Originated, [2; 20]),
            7,
        )
    }

    #[test]
    fn test_forge_plain_transfer_layout() {
        let forged = content().with_limits(1_040, 257).forge().unwrap();
        let mut expected = vec![0x6c, 0x00];
        expected.extend_from_slice(&[1; 20]);
        expected.extend_from_slice(&[0x00, 0x07, 0x90, 0x08, 0x81, 0x02, 0x00]);
        expected.push(0x01);
        expected.extend_from_slice(&[2; 20]);
        expected.extend_from_slice(&[0x00, 0x00]);
        assert_eq!(forged, expected);
    }

    #[test]
    fn test_forge_named_entrypoint() {
        let forged = content()
            .with_parameters("permit", Micheline::prim("Unit", vec![]))
            .forge()
            .unwrap();
        let tail = &forged[forged.len() - 15..];
        assert_eq!(tail, &[0xff, 0xff, 6, b'p', b'e', b'r', b'm', b'i', b't', 0, 0, 0, 2, 0x03, 0x0b][..]);
    }

    #[test]
    fn test_forge_rejects_originated_source() {
        let mut op = content();
        op.source = Address::new(AddressKind::Originated, [3; 20]);
        assert!(op.forge().is_err());
    }

    #[test]
    fn test_json_uses_decimal_strings() {
        let json = serde_json::to_value(content().with_limits(10, 20)).unwrap();
        assert_eq!(json["kind"], "transaction");
        assert_eq!(json["counter"], "7");
        assert_eq!(json["gas_limit"], "10");
        assert!(json.get("parameters").is_none());
    }
}
