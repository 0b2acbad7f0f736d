//! Base58check, blake2b and hex utilities.
//!
//! Tezos prints every hash, key and signature as base58check with a short
//! binary prefix that makes the rendered string start with a recognizable
//! tag (`tz1`, `KT1`, `edpk`, `edsig`, `Net`, ...). This module owns those
//! prefixes and the digests used to derive hashes.

use blake2::digest::consts::{U20, U32};
use blake2::{Blake2b, Digest};

/// Blake2b with a 32-byte output, as used by `BLAKE2B` in Michelson.
type Blake2b256 = Blake2b<U32>;

/// Blake2b with a 20-byte output, as used for public key hashes.
type Blake2b160 = Blake2b<U20>;

/// A base58check prefix together with the payload length it wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prefix {
    /// Bytes prepended to the payload before base58check encoding.
    pub bytes: &'static [u8],
    /// Expected payload length (without prefix and checksum).
    pub payload_len: usize,
}

/// Ed25519 public key hash (`tz1`).
pub const TZ1: Prefix = Prefix { bytes: &[6, 161, 159], payload_len: 20 };
/// Secp256k1 public key hash (`tz2`).
pub const TZ2: Prefix = Prefix { bytes: &[6, 161, 161], payload_len: 20 };
/// P-256 public key hash (`tz3`).
pub const TZ3: Prefix = Prefix { bytes: &[6, 161, 164], payload_len: 20 };
/// BLS12-381 public key hash (`tz4`).
pub const TZ4: Prefix = Prefix { bytes: &[6, 161, 166], payload_len: 20 };
/// Originated contract hash (`KT1`).
pub const KT1: Prefix = Prefix { bytes: &[2, 90, 121], payload_len: 20 };
/// Ed25519 public key (`edpk`).
pub const EDPK: Prefix = Prefix { bytes: &[13, 15, 37, 217], payload_len: 32 };
/// Secp256k1 public key (`sppk`).
pub const SPPK: Prefix = Prefix { bytes: &[3, 254, 226, 86], payload_len: 33 };
/// P-256 public key (`p2pk`).
pub const P2PK: Prefix = Prefix { bytes: &[3, 178, 139, 127], payload_len: 33 };
/// Ed25519 signature (`edsig`).
pub const EDSIG: Prefix = Prefix { bytes: &[9, 245, 205, 134, 18], payload_len: 64 };
/// Secp256k1 signature (`spsig1`).
pub const SPSIG: Prefix = Prefix { bytes: &[13, 115, 101, 19, 63], payload_len: 64 };
/// P-256 signature (`p2sig`).
pub const P2SIG: Prefix = Prefix { bytes: &[54, 240, 44, 52], payload_len: 64 };
/// Curve-agnostic signature (`sig`).
pub const GENERIC_SIG: Prefix = Prefix { bytes: &[4, 130, 43], payload_len: 64 };
/// Chain identifier (`Net`).
pub const CHAIN_ID: Prefix = Prefix { bytes: &[87, 82, 0], payload_len: 4 };
/// Block hash (`B`).
pub const BLOCK_HASH: Prefix = Prefix { bytes: &[1, 52], payload_len: 32 };

/// Errors from decoding a base58check string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Base58Error {
    /// The string is not valid base58 or the checksum does not match.
    #[error("invalid base58check string: {0}")]
    Invalid(String),
    /// The decoded bytes do not start with the expected prefix.
    #[error("unexpected base58 prefix")]
    Prefix,
    /// The payload has the wrong length for its prefix.
    #[error("unexpected payload length {actual}, expected {expected}")]
    Length {
        /// Payload length found.
        actual: usize,
        /// Payload length required by the prefix.
        expected: usize,
    },
}

/// Encodes `payload` as base58check with the given prefix.
#[must_use]
pub fn b58_encode(prefix: Prefix, payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(prefix.bytes.len() + payload.len());
    data.extend_from_slice(prefix.bytes);
    data.extend_from_slice(payload);
    bs58::encode(data).with_check().into_string()
}

/// Decodes a base58check string and strips the expected prefix.
///
/// # Errors
///
/// Returns [`Base58Error`] if the checksum, prefix or payload length is wrong.
pub fn b58_decode(prefix: Prefix, input: &str) -> Result<Vec<u8>, Base58Error> {
    let data = bs58::decode(input)
        .with_check(None)
        .into_vec()
        .map_err(|e| Base58Error::Invalid(e.to_string()))?;
    let payload = data.strip_prefix(prefix.bytes).ok_or(Base58Error::Prefix)?;
    if payload.len() != prefix.payload_len {
        return Err(Base58Error::Length {
            actual: payload.len(),
            expected: prefix.payload_len,
        });
    }
    Ok(payload.to_vec())
}

/// Decodes into a fixed-size array.
///
/// # Errors
///
/// Returns [`Base58Error`] under the same conditions as [`b58_decode`].
pub fn b58_decode_array<const N: usize>(prefix: Prefix, input: &str) -> Result<[u8; N], Base58Error> {
    let payload = b58_decode(prefix, input)?;
    payload.try_into().map_err(|v: Vec<u8>| Base58Error::Length {
        actual: v.len(),
        expected: N,
    })
}

/// Computes the 32-byte blake2b digest of `data`.
#[must_use]
pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    let digest = Blake2b256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Computes the 20-byte blake2b digest of `data`.
#[must_use]
pub fn blake2b_160(data: &[u8]) -> [u8; 20] {
    let digest = Blake2b160::digest(data);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

/// Serde helpers for bytes rendered as bare hex (no `0x` prefix), the format
/// used by the Tezos node.
pub mod hex_bytes {
    use alloy_primitives::{B256, Bytes, hex};
    use serde::{Deserialize, Deserializer, Serializer, de};

    /// Serializes any byte slice as bare hex.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S, T>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: AsRef<[u8]>,
    {
        serializer.serialize_str(&hex::encode(value.as_ref()))
    }

    /// Deserializes bare or `0x`-prefixed hex into [`Bytes`].
    ///
    /// # Errors
    ///
    /// Fails if the string is not valid hex.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map(Bytes::from).map_err(de::Error::custom)
    }

    /// Serde helpers for a 32-byte digest rendered as bare hex.
    pub mod b256 {
        use super::{B256, Deserialize, Deserializer, Serializer, de, hex};

        /// Serializes a digest as bare hex.
        ///
        /// # Errors
        ///
        /// Propagates serializer errors.
        pub fn serialize<S: Serializer>(value: &B256, serializer: S) -> Result<S::Ok, S::Error> {
            super::serialize(value, serializer)
        }

        /// Deserializes a 32-byte digest from hex.
        ///
        /// # Errors
        ///
        /// Fails if the string is not 32 bytes of valid hex.
        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<B256, D::Error> {
            let s = String::deserialize(deserializer)?;
            let bytes = hex::decode(&s).map_err(de::Error::custom)?;
            B256::try_from(bytes.as_slice()).map_err(de::Error::custom)
        }
    }
}
