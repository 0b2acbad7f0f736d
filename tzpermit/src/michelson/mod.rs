//! Michelson data model and codecs.
//!
//! [`Micheline`] is the generic node tree shared by code, types and data. It
//! serializes to the JSON form spoken by the Tezos node. The submodules
//! implement `PACK` ([`pack`]), the typed argument encoder ([`schema`]) and
//! operation forging ([`forge`]).

pub mod forge;
pub mod pack;
pub mod schema;

use alloy_primitives::Bytes;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};

use crate::encoding::hex_bytes;

pub use forge::TransactionContent;
pub use pack::{encode_micheline, pack};
pub use schema::{EntrypointSchema, TypedValue};

/// A Micheline node.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Micheline {
    /// Arbitrary-precision integer literal (bounded to `i128` here).
    Int {
        /// The value, a decimal string on the wire.
        #[serde_as(as = "DisplayFromStr")]
        int: i128,
    },
    /// String literal.
    String {
        /// The value.
        string: String,
    },
    /// Byte sequence literal.
    Bytes {
        /// The value, bare hex on the wire.
        #[serde(with = "hex_bytes")]
        bytes: Bytes,
    },
    /// Primitive application.
    Prim {
        /// Primitive name, e.g. `Pair` or `nat`.
        prim: String,
        /// Arguments.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<Micheline>,
        /// Annotations such as `%from_` or `:to`.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        annots: Vec<String>,
    },
    /// Sequence of nodes.
    Seq(Vec<Micheline>),
}

impl Micheline {
    /// Integer literal.
    #[must_use]
    pub const fn int(value: i128) -> Self {
        Self::Int { int: value }
    }

    /// String literal.
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::String {
            string: value.into(),
        }
    }

    /// Bytes literal.
    #[must_use]
    pub fn bytes(value: impl Into<Bytes>) -> Self {
        Self::Bytes {
            bytes: value.into(),
        }
    }

    /// Primitive application without annotations.
    #[must_use]
    pub fn prim(name: impl Into<String>, args: Vec<Self>) -> Self {
        Self::Prim {
            prim: name.into(),
            args,
            annots: Vec::new(),
        }
    }

    /// Primitive application with annotations.
    #[must_use]
    pub fn prim_annotated(name: impl Into<String>, args: Vec<Self>, annots: Vec<String>) -> Self {
        Self::Prim {
            prim: name.into(),
            args,
            annots,
        }
    }

    /// `Pair a b`.
    #[must_use]
    pub fn pair(left: Self, right: Self) -> Self {
        Self::prim("Pair", vec![left, right])
    }

    /// Returns the primitive name if this node is a primitive application.
    #[must_use]
    pub fn prim_name(&self) -> Option<&str> {
        match self {
            Self::Prim { prim, .. } => Some(prim),
            _ => None,
        }
    }

    /// Returns the arguments of a primitive application, or an empty slice.
    #[must_use]
    pub fn args(&self) -> &[Self] {
        match self {
            Self::Prim { args, .. } => args,
            _ => &[],
        }
    }

    /// Returns the annotations of a primitive application, or an empty slice.
    #[must_use]
    pub fn annots(&self) -> &[String] {
        match self {
            Self::Prim { annots, .. } => annots,
            _ => &[],
        }
    }

    /// Returns the field annotation (`%name`) without its sigil.
    #[must_use]
    pub fn field_annot(&self) -> Option<&str> {
        self.annots().iter().find_map(|a| a.strip_prefix('%'))
    }

    /// Returns the type annotation (`:name`) without its sigil.
    #[must_use]
    pub fn type_annot(&self) -> Option<&str> {
        self.annots().iter().find_map(|a| a.strip_prefix(':'))
    }

    /// Short description of the node kind, used in error messages.
    #[must_use]
    pub fn kind(&self) -> String {
        match self {
            Self::Int { .. } => "int literal".to_owned(),
            Self::String { .. } => "string literal".to_owned(),
            Self::Bytes { .. } => "bytes literal".to_owned(),
            Self::Prim { prim, .. } => format!("primitive {prim}"),
            Self::Seq(_) => "sequence".to_owned(),
        }
    }

    /// Splits a pair node into its head and the right comb of the rest.
    ///
    /// Accepts `Pair a b ...` and the sequence form `{ a ; b ; ... }` for
    /// values, and `pair a b ...` for types. The tail of an n-ary comb is
    /// rebuilt as a nested pair of the same primitive.
    #[must_use]
    pub fn split_pair(&self) -> Option<(&Self, Self)> {
        let (name, items) = match self {
            Self::Prim { prim, args, .. } if (prim == "Pair" || prim == "pair") && args.len() >= 2 => {
                (prim.as_str(), args.as_slice())
            }
            Self::Seq(items) if items.len() >= 2 => ("Pair", items.as_slice()),
            _ => return None,
        };
        let (head, tail) = items.split_first()?;
        let rest = if tail.len() == 1 {
            tail[0].clone()
        } else {
            Self::prim(name, tail.to_vec())
        };
        Some((head, rest))
    }
}
