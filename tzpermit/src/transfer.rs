//! Token transfer arguments.
//!
//! Callers never hand raw Michelson trees to the permit flow. Arguments are
//! one of a closed set of shapes ([`EntrypointArgs`]); untyped Micheline from
//! the outside is decoded once with [`TransferArgs::from_micheline`].

use alloy_primitives::{B256, hex};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use serde_with::{DisplayFromStr, serde_as};

use crate::error::EncodingError;
use crate::michelson::Micheline;
use crate::types::{Address, PublicKey, Signature};

/// One leg of a token transfer.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLeg {
    #[serde(rename = "to_")]
    destination: Address,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token_id: Option<u64>,
    #[serde_as(as = "DisplayFromStr")]
    amount: u128,
}

impl TransferLeg {
    /// Creates a transfer leg.
    #[must_use]
    pub const fn new(destination: Address, token_id: Option<u64>, amount: u128) -> Self {
        Self {
            destination,
            token_id,
            amount,
        }
    }

    /// Receiving account.
    #[must_use]
    pub const fn destination(&self) -> &Address {
        &self.destination
    }

    /// Token id, if the token contract is multi-asset.
    #[must_use]
    pub const fn token_id(&self) -> Option<u64> {
        self.token_id
    }

    /// Amount in the token's smallest unit.
    #[must_use]
    pub const fn amount(&self) -> u128 {
        self.amount
    }

    fn to_json(&self) -> Value {
        json!({
            "to_": self.destination.to_string(),
            "token_id": self.token_id.unwrap_or_default().to_string(),
            "amount": self.amount.to_string(),
        })
    }
}

/// All legs sent from one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSource {
    #[serde(rename = "from_")]
    source: Address,
    txs: Vec<TransferLeg>,
}

impl TransferSource {
    /// Creates a source entry.
    #[must_use]
    pub const fn new(source: Address, txs: Vec<TransferLeg>) -> Self {
        Self { source, txs }
    }

    /// Sending account.
    #[must_use]
    pub const fn source(&self) -> &Address {
        &self.source
    }

    /// Legs in submission order.
    #[must_use]
    pub fn txs(&self) -> &[TransferLeg] {
        &self.txs
    }
}

/// FA2 `transfer` arguments: transfer legs grouped by source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferBatch(Vec<TransferSource>);

impl TransferBatch {
    /// Creates a batch from source entries.
    #[must_use]
    pub const fn new(sources: Vec<TransferSource>) -> Self {
        Self(sources)
    }

    /// Builds the relayed batch: the intended leg followed by the relayer's
    /// fee leg, both from `source` and for the same token id.
    #[must_use]
    pub fn with_relayer_fee(
        source: Address,
        destination: Address,
        token_id: Option<u64>,
        amount: u128,
        relayer: Address,
        relayer_fee: u128,
    ) -> Self {
        Self(vec![TransferSource::new(
            source,
            vec![
                TransferLeg::new(destination, token_id, amount),
                TransferLeg::new(relayer, token_id, relayer_fee),
            ],
        )])
    }

    /// Source entries in submission order.
    #[must_use]
    pub fn sources(&self) -> &[TransferSource] {
        &self.0
    }

    fn to_json(&self) -> Value {
        Value::Array(
            self.0
                .iter()
                .map(|s| {
                    json!({
                        "from_": s.source.to_string(),
                        "txs": s.txs.iter().map(TransferLeg::to_json).collect::<Vec<_>>(),
                    })
                })
                .collect(),
        )
    }
}

/// Arguments of a token contract's `transfer` entrypoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferArgs {
    /// FA2 (TZIP-12) batched transfer.
    Fa2(TransferBatch),
    /// FA1.2 (TZIP-7) single transfer.
    Fa12 {
        /// Sending account.
        from: Address,
        /// Receiving account.
        to: Address,
        /// Amount in the token's smallest unit.
        value: u128,
    },
}

impl TransferArgs {
    /// Decodes `transfer` arguments from untyped Micheline.
    ///
    /// Exactly two shapes are accepted: the FA2 list
    /// `{ Pair from { Pair to (Pair token_id amount) ; ... } ; ... }` and the
    /// FA1.2 triple `Pair from (Pair to value)`. Addresses may be readable
    /// strings or optimized bytes; combs may be flat or nested.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError::UnsupportedShape`] for any other tree, and
    /// [`EncodingError::OutOfRange`] for negative or oversized numbers.
    pub fn from_micheline(node: &Micheline) -> Result<Self, EncodingError> {
        match node {
            Micheline::Seq(sources) => sources
                .iter()
                .map(decode_fa2_source)
                .collect::<Result<_, _>>()
                .map(|sources| Self::Fa2(TransferBatch(sources))),
            Micheline::Prim { prim, .. } if prim == "Pair" => {
                let (from, rest) = split(node)?;
                let (to, value) = split(&rest)?;
                Ok(Self::Fa12 {
                    from: decode_address(from)?,
                    to: decode_address(to)?,
                    value: decode_amount(&value)?,
                })
            }
            other => Err(EncodingError::UnsupportedShape(other.kind())),
        }
    }

    /// Structured JSON form accepted by the schema encoder.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Fa2(batch) => batch.to_json(),
            Self::Fa12 { from, to, value } => json!({
                "from": from.to_string(),
                "to": to.to_string(),
                "value": value.to_string(),
            }),
        }
    }
}

fn split(node: &Micheline) -> Result<(&Micheline, Micheline), EncodingError> {
    node.split_pair()
        .ok_or_else(|| EncodingError::UnsupportedShape(format!("expected pair, found {}", node.kind())))
}

fn decode_address(node: &Micheline) -> Result<Address, EncodingError> {
    match node {
        Micheline::String { string } => Ok(string.parse()?),
        Micheline::Bytes { bytes } => Ok(Address::from_contract_bytes(bytes)?),
        other => Err(EncodingError::UnsupportedShape(format!(
            "expected address, found {}",
            other.kind()
        ))),
    }
}

fn decode_amount(node: &Micheline) -> Result<u128, EncodingError> {
    match node {
        Micheline::Int { int } => u128::try_from(*int).map_err(|_| EncodingError::OutOfRange {
            ty: "nat",
            value: int.to_string(),
        }),
        other => Err(EncodingError::UnsupportedShape(format!(
            "expected nat, found {}",
            other.kind()
        ))),
    }
}

fn decode_token_id(node: &Micheline) -> Result<u64, EncodingError> {
    let amount = decode_amount(node)?;
    u64::try_from(amount).map_err(|_| EncodingError::OutOfRange {
        ty: "token_id",
        value: amount.to_string(),
    })
}

fn decode_fa2_source(node: &Micheline) -> Result<TransferSource, EncodingError> {
    let (from, txs) = split(node)?;
    let Micheline::Seq(txs) = txs else {
        return Err(EncodingError::UnsupportedShape(format!(
            "expected transfer list, found {}",
            txs.kind()
        )));
    };
    let txs = txs
        .iter()
        .map(|tx| {
            let (to, rest) = split(tx)?;
            let (token_id, amount) = split(&rest)?;
            Ok(TransferLeg::new(
                decode_address(to)?,
                Some(decode_token_id(token_id)?),
                decode_amount(&amount)?,
            ))
        })
        .collect::<Result<_, EncodingError>>()?;
    Ok(TransferSource::new(decode_address(from)?, txs))
}

/// One element of a TZIP-17 `permit` call: `pair key (pair signature bytes)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermitParam {
    /// Key of the account granting the permit.
    pub public_key: PublicKey,
    /// Signature over the packed permit pair.
    pub signature: Signature,
    /// Hash of the permitted call arguments.
    pub hash: B256,
}

impl PermitParam {
    fn to_json(&self) -> Value {
        json!([
            self.public_key.to_string(),
            self.signature.to_string(),
            hex::encode(self.hash),
        ])
    }
}

/// Arguments of an entrypoint the permit flow calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntrypointArgs {
    /// Token `transfer`.
    Transfer(TransferArgs),
    /// TZIP-17 `permit`.
    Permit(Vec<PermitParam>),
}

impl EntrypointArgs {
    /// Structured JSON form accepted by the schema encoder.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Transfer(args) => args.to_json(),
            Self::Permit(params) => Value::Array(params.iter().map(PermitParam::to_json).collect()),
        }
    }
}

impl From<TransferArgs> for EntrypointArgs {
    fn from(args: TransferArgs) -> Self {
        Self::Transfer(args)
    }
}

impl From<TransferBatch> for EntrypointArgs {
    fn from(batch: TransferBatch) -> Self {
        Self::Transfer(TransferArgs::Fa2(batch))
    }
}
