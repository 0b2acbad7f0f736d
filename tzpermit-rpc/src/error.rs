//! Errors of the node RPC client.

use http::StatusCode;
use tzpermit::{EstimationError, RpcError};

/// Errors that can occur while talking to a Tezos node.
#[derive(Debug, thiserror::Error)]
pub enum TezosRpcError {
    /// URL parse error.
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        /// Human-readable context.
        context: &'static str,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },
    /// HTTP transport error.
    #[error("HTTP error: {context}: {source}")]
    Http {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// JSON deserialization error.
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// Unexpected HTTP status code.
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        /// Human-readable context.
        context: &'static str,
        /// The HTTP status code.
        status: StatusCode,
        /// The response body.
        body: String,
    },
    /// Failed to read response body.
    #[error("Failed to read response body as text: {context}: {source}")]
    ResponseBodyRead {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// The body decoded but a value inside it is malformed.
    #[error("Invalid value in response: {context}: {reason}")]
    InvalidValue {
        /// Human-readable context.
        context: &'static str,
        /// What is wrong with the value.
        reason: String,
    },
}

impl From<TezosRpcError> for RpcError {
    fn from(err: TezosRpcError) -> Self {
        match err {
            TezosRpcError::HttpStatus { status, body, .. } => Self::Node {
                status: status.as_u16(),
                body,
            },
            TezosRpcError::JsonDeserialization { .. } | TezosRpcError::InvalidValue { .. } => {
                Self::Decode(err.to_string())
            }
            TezosRpcError::UrlParse { .. }
            | TezosRpcError::Http { .. }
            | TezosRpcError::ResponseBodyRead { .. } => Self::Transport(err.to_string()),
        }
    }
}

impl From<TezosRpcError> for EstimationError {
    fn from(err: TezosRpcError) -> Self {
        Self::Rpc(err.into())
    }
}
