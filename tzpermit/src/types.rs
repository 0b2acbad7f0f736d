//! Tezos account, key, signature and chain identifiers.
//!
//! All types parse from and print to their base58check form, serialize as
//! that string, and expose the binary form used by `PACK` and operation
//! forging.

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::fmt;
use std::str::FromStr;

use crate::encoding::{self, Base58Error, Prefix, b58_decode_array, b58_encode};

/// Error returned when parsing an identifier fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// No known prefix matches the input.
    #[error("unrecognized {kind} {input:?}")]
    UnknownPrefix {
        /// What was being parsed.
        kind: &'static str,
        /// The rejected input.
        input: String,
    },
    /// A known prefix matched but the payload is malformed.
    #[error("invalid {kind}: {source}")]
    Base58 {
        /// What was being parsed.
        kind: &'static str,
        /// The underlying decoding error.
        #[source]
        source: Base58Error,
    },
    /// A binary form could not be decoded.
    #[error("invalid binary {kind}")]
    Binary {
        /// What was being decoded.
        kind: &'static str,
    },
}

/// The account family of an [`Address`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AddressKind {
    /// `tz1` implicit account (Ed25519).
    Ed25519,
    /// `tz2` implicit account (Secp256k1).
    Secp256k1,
    /// `tz3` implicit account (P-256).
    P256,
    /// `tz4` implicit account (BLS12-381).
    Bls,
    /// `KT1` originated contract.
    Originated,
}

impl AddressKind {
    const fn prefix(self) -> Prefix {
        match self {
            Self::Ed25519 => encoding::TZ1,
            Self::Secp256k1 => encoding::TZ2,
            Self::P256 => encoding::TZ3,
            Self::Bls => encoding::TZ4,
            Self::Originated => encoding::KT1,
        }
    }

    /// Tag byte used for implicit accounts in binary encodings.
    const fn implicit_tag(self) -> Option<u8> {
        match self {
            Self::Ed25519 => Some(0),
            Self::Secp256k1 => Some(1),
            Self::P256 => Some(2),
            Self::Bls => Some(3),
            Self::Originated => None,
        }
    }

    const fn from_implicit_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Ed25519),
            1 => Some(Self::Secp256k1),
            2 => Some(Self::P256),
            3 => Some(Self::Bls),
            _ => None,
        }
    }
}

/// A Tezos account address: an implicit account or an originated contract.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    kind: AddressKind,
    hash: [u8; 20],
}

impl Address {
    /// Creates an address from its kind and 20-byte hash.
    #[must_use]
    pub const fn new(kind: AddressKind, hash: [u8; 20]) -> Self {
        Self { kind, hash }
    }

    /// Returns the account family.
    #[must_use]
    pub const fn kind(&self) -> AddressKind {
        self.kind
    }

    /// Returns the 20-byte hash.
    #[must_use]
    pub const fn hash(&self) -> &[u8; 20] {
        &self.hash
    }

    /// Returns `true` for `tz` accounts.
    #[must_use]
    pub const fn is_implicit(&self) -> bool {
        !matches!(self.kind, AddressKind::Originated)
    }

    /// Returns the 22-byte `contract_id` encoding used by `PACK` and forging.
    ///
    /// Implicit: `0x00 ‖ tag ‖ hash`; originated: `0x01 ‖ hash ‖ 0x00`.
    #[must_use]
    pub fn to_contract_bytes(&self) -> [u8; 22] {
        let mut out = [0u8; 22];
        if let Some(tag) = self.kind.implicit_tag() {
            out[1] = tag;
            out[2..].copy_from_slice(&self.hash);
        } else {
            out[0] = 1;
            out[1..21].copy_from_slice(&self.hash);
        }
        out
    }

    /// Returns the 21-byte `public_key_hash` encoding (`tag ‖ hash`).
    ///
    /// Returns `None` for originated contracts.
    #[must_use]
    pub fn to_key_hash_bytes(&self) -> Option<[u8; 21]> {
        let tag = self.kind.implicit_tag()?;
        let mut out = [0u8; 21];
        out[0] = tag;
        out[1..].copy_from_slice(&self.hash);
        Some(out)
    }

    /// Decodes an address from its binary form, as found in optimized
    /// Micheline values.
    ///
    /// Accepts the 22-byte `contract_id` form optionally followed by an
    /// entrypoint name, which is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Binary`] if the bytes are not an address.
    pub fn from_contract_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        let err = ParseError::Binary { kind: "address" };
        if bytes.len() < 22 {
            return Err(err);
        }
        let mut hash = [0u8; 20];
        match bytes[0] {
            0 => {
                let kind = AddressKind::from_implicit_tag(bytes[1]).ok_or(err)?;
                hash.copy_from_slice(&bytes[2..22]);
                Ok(Self::new(kind, hash))
            }
            1 if bytes[21] == 0 => {
                hash.copy_from_slice(&bytes[1..21]);
                Ok(Self::new(AddressKind::Originated, hash))
            }
            _ => Err(err),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&b58_encode(self.kind.prefix(), &self.hash))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // `KT1...%entrypoint` names an entrypoint of the same contract.
        let s = s.split_once('%').map_or(s, |(addr, _)| addr);
        let kind = match s.get(..3) {
            Some("tz1") => AddressKind::Ed25519,
            Some("tz2") => AddressKind::Secp256k1,
            Some("tz3") => AddressKind::P256,
            Some("tz4") => AddressKind::Bls,
            Some("KT1") => AddressKind::Originated,
            _ => {
                return Err(ParseError::UnknownPrefix {
                    kind: "address",
                    input: s.to_owned(),
                });
            }
        };
        let hash = b58_decode_array(kind.prefix(), s).map_err(|source| ParseError::Base58 {
            kind: "address",
            source,
        })?;
        Ok(Self::new(kind, hash))
    }
}

/// A public key of one of the supported curves.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum PublicKey {
    /// `edpk` key.
    Ed25519([u8; 32]),
    /// `sppk` compressed key.
    Secp256k1([u8; 33]),
    /// `p2pk` compressed key.
    P256([u8; 33]),
}

impl PublicKey {
    /// Returns the raw key bytes without the curve tag.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Ed25519(b) => b,
            Self::Secp256k1(b) | Self::P256(b) => b,
        }
    }

    /// Returns the tagged binary form (`tag ‖ key`) used by `PACK`.
    #[must_use]
    pub fn to_tagged_bytes(&self) -> Vec<u8> {
        let tag = match self {
            Self::Ed25519(_) => 0u8,
            Self::Secp256k1(_) => 1,
            Self::P256(_) => 2,
        };
        let mut out = Vec::with_capacity(1 + self.as_bytes().len());
        out.push(tag);
        out.extend_from_slice(self.as_bytes());
        out
    }

    /// Derives the implicit account address of this key.
    #[must_use]
    pub fn hash(&self) -> Address {
        let kind = match self {
            Self::Ed25519(_) => AddressKind::Ed25519,
            Self::Secp256k1(_) => AddressKind::Secp256k1,
            Self::P256(_) => AddressKind::P256,
        };
        Address::new(kind, encoding::blake2b_160(self.as_bytes()))
    }

    /// Decodes a tagged binary key.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Binary`] on an unknown tag or wrong length.
    pub fn from_tagged_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        let err = ParseError::Binary { kind: "public key" };
        let (tag, key) = bytes.split_first().ok_or_else(|| err.clone())?;
        match tag {
            0 => key.try_into().map(Self::Ed25519).map_err(|_| err),
            1 => key.try_into().map(Self::Secp256k1).map_err(|_| err),
            2 => key.try_into().map(Self::P256).map_err(|_| err),
            _ => Err(err),
        }
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self {
            Self::Ed25519(_) => encoding::EDPK,
            Self::Secp256k1(_) => encoding::SPPK,
            Self::P256(_) => encoding::P2PK,
        };
        f.write_str(&b58_encode(prefix, self.as_bytes()))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({self})")
    }
}

impl FromStr for PublicKey {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let map = |source| ParseError::Base58 {
            kind: "public key",
            source,
        };
        match s.get(..4) {
            Some("edpk") => b58_decode_array(encoding::EDPK, s).map(Self::Ed25519).map_err(map),
            Some("sppk") => b58_decode_array(encoding::SPPK, s).map(Self::Secp256k1).map_err(map),
            Some("p2pk") => b58_decode_array(encoding::P2PK, s).map(Self::P256).map_err(map),
            _ => Err(ParseError::UnknownPrefix {
                kind: "public key",
                input: s.to_owned(),
            }),
        }
    }
}

/// Curve family of a [`Signature`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureKind {
    /// `edsig`.
    Ed25519,
    /// `spsig1`.
    Secp256k1,
    /// `p2sig`.
    P256,
    /// `sig`, curve not recorded.
    Generic,
}

impl SignatureKind {
    const fn prefix(self) -> Prefix {
        match self {
            Self::Ed25519 => encoding::EDSIG,
            Self::Secp256k1 => encoding::SPSIG,
            Self::P256 => encoding::P2SIG,
            Self::Generic => encoding::GENERIC_SIG,
        }
    }
}

/// A 64-byte signature.
///
/// The binary form carries no curve tag; the kind only affects the printed
/// prefix.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature {
    kind: SignatureKind,
    bytes: [u8; 64],
}

impl Signature {
    /// Creates a signature from raw bytes.
    #[must_use]
    pub const fn new(kind: SignatureKind, bytes: [u8; 64]) -> Self {
        Self { kind, bytes }
    }

    /// The all-zero generic signature used to simulate unsigned operations.
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(SignatureKind::Generic, [0u8; 64])
    }

    /// Returns the signature kind.
    #[must_use]
    pub const fn kind(&self) -> SignatureKind {
        self.kind
    }

    /// Returns the raw 64 bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.bytes
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&b58_encode(self.kind.prefix(), &self.bytes))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({self})")
    }
}

impl FromStr for Signature {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = if s.starts_with("edsig") {
            SignatureKind::Ed25519
        } else if s.starts_with("spsig1") {
            SignatureKind::Secp256k1
        } else if s.starts_with("p2sig") {
            SignatureKind::P256
        } else if s.starts_with("sig") {
            SignatureKind::Generic
        } else {
            return Err(ParseError::UnknownPrefix {
                kind: "signature",
                input: s.to_owned(),
            });
        };
        let bytes = b58_decode_array(kind.prefix(), s).map_err(|source| ParseError::Base58 {
            kind: "signature",
            source,
        })?;
        Ok(Self::new(kind, bytes))
    }
}

/// A Tezos chain identifier (`Net...`).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainId([u8; 4]);

impl ChainId {
    /// Creates a chain id from its four bytes.
    #[must_use]
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Returns the four raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&b58_encode(encoding::CHAIN_ID, &self.0))
    }
}

impl fmt::Debug for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainId({self})")
    }
}

impl FromStr for ChainId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        b58_decode_array(encoding::CHAIN_ID, s)
            .map(Self)
            .map_err(|source| ParseError::Base58 {
                kind: "chain id",
                source,
            })
    }
}

/// Implements string-based serde for a `Display + FromStr` type.
macro_rules! serde_via_str {
    ($($ty:ty),* $(,)?) => {$(
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }
    )*};
}

serde_via_str!(Address, PublicKey, Signature, ChainId);
