//! Error types for permit building and fee estimation.
//!
//! Each failure class of the permit flow has its own enum; [`GasStationError`]
//! aggregates them for callers that drive the whole sequence. Nothing here is
//! recovered locally: every error aborts the sequence that raised it.

use crate::types::ParseError;

/// Arguments could not be encoded through a contract's Michelson schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodingError {
    /// The contract does not expose the requested entrypoint.
    #[error("unknown entrypoint {0:?}")]
    UnknownEntrypoint(String),
    /// A value does not fit the Michelson type it is encoded as.
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        /// The Michelson type (or shape) that was required.
        expected: String,
        /// What was actually supplied.
        found: String,
    },
    /// A numeric value is outside the range of its type.
    #[error("{value} is out of range for {ty}")]
    OutOfRange {
        /// The Michelson type.
        ty: &'static str,
        /// The offending value.
        value: String,
    },
    /// A record field required by the schema was not supplied.
    #[error("missing field {0:?}")]
    MissingField(String),
    /// The Michelson type cannot be handled.
    #[error("unsupported michelson type {0}")]
    UnsupportedType(String),
    /// A primitive name has no binary encoding.
    #[error("unknown michelson primitive {0:?}")]
    UnknownPrimitive(String),
    /// Transfer arguments match neither the FA2 nor the FA1.2 shape.
    #[error("unsupported transfer argument shape: {0}")]
    UnsupportedShape(String),
    /// A base58 identifier inside the arguments is malformed.
    #[error(transparent)]
    Identifier(#[from] ParseError),
}

impl EncodingError {
    pub(crate) fn mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }
}

/// The signer refused or failed to produce a signature or key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SigningError {
    /// The signer declined the request.
    #[error("signer refused: {0}")]
    Refused(String),
    /// The signer failed while producing the signature or key.
    #[error("signer failed: {0}")]
    Failed(String),
    /// The identity can only be used for simulation.
    #[error("read-only identity {0} cannot sign")]
    ReadOnly(String),
}

/// A node or transport failure while reading chain state or packing data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),
    /// The node answered with a non-success status.
    #[error("node returned {status}: {body}")]
    Node {
        /// HTTP status code.
        status: u16,
        /// Response body, as text.
        body: String,
    },
    /// The response could not be decoded.
    #[error("malformed node response: {0}")]
    Decode(String),
    /// Contract storage lacks a field the permit flow needs.
    #[error("contract storage has no {0} field")]
    MissingStorageField(&'static str),
}

/// The node rejected or could not run the fee simulation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EstimationError {
    /// At least one simulated operation was not applied.
    #[error("simulation rejected: {0}")]
    Rejected(String),
    /// The simulation returned a different number of results than submitted.
    #[error("simulation returned {actual} results for {expected} operations")]
    ResultCount {
        /// Operations submitted.
        expected: usize,
        /// Results received.
        actual: usize,
    },
    /// The summed fee does not fit in `u64` mutez.
    #[error("estimated fee overflows")]
    Overflow,
    /// The simulation identity could not be resolved.
    #[error("simulation source unavailable: {0}")]
    Source(#[source] SigningError),
    /// The simulation request itself failed.
    #[error("simulation request failed: {0}")]
    Rpc(#[from] RpcError),
}

/// Any failure of the permit building or estimation sequence.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GasStationError {
    /// Schema encoding failed.
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    /// Signing failed.
    #[error(transparent)]
    Signing(#[from] SigningError),
    /// A node read or pack call failed.
    #[error(transparent)]
    Rpc(#[from] RpcError),
    /// Fee simulation failed.
    #[error(transparent)]
    Estimation(#[from] EstimationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_convert_into_aggregate() {
        let err: GasStationError = SigningError::Refused("user rejected".into()).into();
        assert!(matches!(err, GasStationError::Signing(SigningError::Refused(_))));
        assert_eq!(err.to_string(), "signer refused: user rejected");

        let err: GasStationError = EstimationError::from(RpcError::Transport("timeout".into())).into();
        assert!(matches!(err, GasStationError::Estimation(EstimationError::Rpc(_))));
    }
}
