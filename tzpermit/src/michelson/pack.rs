//! Binary Micheline encoding and `PACK`.
//!
//! [`pack`] reproduces what the Michelson `PACK` instruction (and the node's
//! `pack_data` RPC) produces: a `0x05` prefix followed by the binary
//! encoding of the value after it has been normalized against its type.

use alloy_primitives::Bytes;

use super::Micheline;
use crate::error::EncodingError;
use crate::types::{Address, ChainId, PublicKey, Signature};

/// Leading byte of every packed value.
pub const PACK_PREFIX: u8 = 0x05;

const TAG_INT: u8 = 0x00;
const TAG_STRING: u8 = 0x01;
const TAG_SEQ: u8 = 0x02;
const TAG_PRIM_0: u8 = 0x03;
const TAG_PRIM_1: u8 = 0x05;
const TAG_PRIM_2: u8 = 0x07;
const TAG_PRIM_N: u8 = 0x09;
const TAG_BYTES: u8 = 0x0a;

/// Primitive names indexed by their binary code.
const PRIMITIVES: &[&str] = &[
    "parameter", "storage", "code", "False", "Elt", "Left", "None", "Pair", "Right", "Some",
    "True", "Unit", "PACK", "UNPACK", "BLAKE2B", "SHA256", "SHA512", "ABS", "ADD", "AMOUNT",
    "AND", "BALANCE", "CAR", "CDR", "CHECK_SIGNATURE", "COMPARE", "CONCAT", "CONS",
    "CREATE_ACCOUNT", "CREATE_CONTRACT", "IMPLICIT_ACCOUNT", "DIP", "DROP", "DUP", "EDIV",
    "EMPTY_MAP", "EMPTY_SET", "EQ", "EXEC", "FAILWITH", "GE", "GET", "GT", "HASH_KEY", "IF",
    "IF_CONS", "IF_LEFT", "IF_NONE", "INT", "LAMBDA", "LE", "LEFT", "LOOP", "LSL", "LSR", "LT",
    "MAP", "MEM", "MUL", "NEG", "NEQ", "NIL", "NONE", "NOT", "NOW", "OR", "PAIR", "PUSH",
    "RIGHT", "SIZE", "SOME", "SOURCE", "SENDER", "SELF", "STEPS_TO_QUOTA", "SUB", "SWAP",
    "TRANSFER_TOKENS", "SET_DELEGATE", "UNIT", "UPDATE", "XOR", "ITER", "LOOP_LEFT", "ADDRESS",
    "CONTRACT", "ISNAT", "CAST", "RENAME", "bool", "contract", "int", "key", "key_hash",
    "lambda", "list", "map", "big_map", "nat", "option", "or", "pair", "set", "signature",
    "string", "bytes", "mutez", "timestamp", "unit", "operation", "address", "SLICE", "DIG",
    "DUG", "EMPTY_BIG_MAP", "APPLY", "chain_id", "CHAIN_ID", "LEVEL", "SELF_ADDRESS", "never",
    "NEVER", "UNPAIR", "VOTING_POWER", "TOTAL_VOTING_POWER", "KECCAK", "SHA3", "PAIRING_CHECK",
    "bls12_381_g1", "bls12_381_g2", "bls12_381_fr", "sapling_state",
    "sapling_transaction_deprecated", "SAPLING_EMPTY_STATE", "SAPLING_VERIFY_UPDATE", "ticket",
    "TICKET_DEPRECATED", "READ_TICKET", "SPLIT_TICKET", "JOIN_TICKETS", "GET_AND_UPDATE",
    "chest", "chest_key", "OPEN_CHEST", "VIEW", "view", "constant", "SUB_MUTEZ",
    "tx_rollup_l2_address", "MIN_BLOCK_TIME", "sapling_transaction", "EMIT", "Lambda_rec",
    "LAMBDA_REC", "TICKET", "BYTES", "NAT",
];

fn prim_code(name: &str) -> Result<u8, EncodingError> {
    PRIMITIVES
        .iter()
        .position(|p| *p == name)
        .and_then(|i| u8::try_from(i).ok())
        .ok_or_else(|| EncodingError::UnknownPrimitive(name.to_owned()))
}

/// Appends a signed zarith integer.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn write_zarith_int(out: &mut Vec<u8>, value: i128) {
    let mut abs = value.unsigned_abs();
    let mut byte = (abs & 0x3f) as u8;
    if value < 0 {
        byte |= 0x40;
    }
    abs >>= 6;
    if abs == 0 {
        out.push(byte);
        return;
    }
    out.push(byte | 0x80);
    write_zarith_nat(out, abs);
}

/// Appends an unsigned zarith integer.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn write_zarith_nat(out: &mut Vec<u8>, mut value: u128) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn write_len_prefixed(out: &mut Vec<u8>, body: &[u8]) -> Result<(), EncodingError> {
    let len = u32::try_from(body.len()).map_err(|_| EncodingError::OutOfRange {
        ty: "bytes",
        value: body.len().to_string(),
    })?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(body);
    Ok(())
}

fn write_node(out: &mut Vec<u8>, node: &Micheline) -> Result<(), EncodingError> {
    match node {
        Micheline::Int { int } => {
            out.push(TAG_INT);
            write_zarith_int(out, *int);
        }
        Micheline::String { string } => {
            out.push(TAG_STRING);
            write_len_prefixed(out, string.as_bytes())?;
        }
        Micheline::Bytes { bytes } => {
            out.push(TAG_BYTES);
            write_len_prefixed(out, bytes)?;
        }
        Micheline::Seq(items) => {
            let mut body = Vec::new();
            for item in items {
                write_node(&mut body, item)?;
            }
            out.push(TAG_SEQ);
            write_len_prefixed(out, &body)?;
        }
        Micheline::Prim { prim, args, annots } => {
            let code = prim_code(prim)?;
            let annotated = !annots.is_empty();
            let annots = annots.join(" ");
            if args.len() <= 2 {
                // Tags 0x03..0x08: the annotated variant directly follows the bare one.
                let base = match args.len() {
                    0 => TAG_PRIM_0,
                    1 => TAG_PRIM_1,
                    _ => TAG_PRIM_2,
                };
                out.push(base + u8::from(annotated));
                out.push(code);
                for arg in args {
                    write_node(out, arg)?;
                }
                if annotated {
                    write_len_prefixed(out, annots.as_bytes())?;
                }
            } else {
                let mut body = Vec::new();
                for arg in args {
                    write_node(&mut body, arg)?;
                }
                out.push(TAG_PRIM_N);
                out.push(code);
                write_len_prefixed(out, &body)?;
                write_len_prefixed(out, annots.as_bytes())?;
            }
        }
    }
    Ok(())
}

/// Encodes a Micheline node in the binary format, without the `PACK` prefix.
///
/// # Errors
///
/// Returns [`EncodingError::UnknownPrimitive`] for primitive names with no
/// binary code.
pub fn encode_micheline(node: &Micheline) -> Result<Vec<u8>, EncodingError> {
    let mut out = Vec::new();
    write_node(&mut out, node)?;
    Ok(out)
}

/// Packs `data` of Michelson type `ty`, as the `PACK` instruction would.
///
/// # Errors
///
/// Returns [`EncodingError`] if `data` does not inhabit `ty` or `ty` cannot be
/// packed (lambdas, operations, tickets and similar).
pub fn pack(data: &Micheline, ty: &Micheline) -> Result<Bytes, EncodingError> {
    let normalized = normalize(data, ty)?;
    let mut out = vec![PACK_PREFIX];
    write_node(&mut out, &normalized)?;
    Ok(out.into())
}

fn expect_int(data: &Micheline, ty: &'static str) -> Result<i128, EncodingError> {
    match data {
        Micheline::Int { int } => Ok(*int),
        other => Err(EncodingError::mismatch(ty, other.kind())),
    }
}

fn natural(data: &Micheline, ty: &'static str) -> Result<Micheline, EncodingError> {
    let value = expect_int(data, ty)?;
    let in_range = value >= 0 && (ty != "mutez" || i64::try_from(value).is_ok());
    if in_range {
        Ok(Micheline::int(value))
    } else {
        Err(EncodingError::OutOfRange {
            ty,
            value: value.to_string(),
        })
    }
}

fn bool_value(data: &Micheline) -> Result<Micheline, EncodingError> {
    match data.prim_name() {
        Some(value @ ("True" | "False")) if data.args().is_empty() => Ok(Micheline::prim(value, vec![])),
        _ => Err(EncodingError::mismatch("bool", data.kind())),
    }
}

/// Converts a readable string to its optimized byte form, passing bytes through.
fn optimized(
    data: &Micheline,
    ty: &'static str,
    convert: impl FnOnce(&str) -> Result<Vec<u8>, EncodingError>,
) -> Result<Micheline, EncodingError> {
    match data {
        Micheline::String { string } => convert(string).map(Micheline::bytes),
        Micheline::Bytes { .. } => Ok(data.clone()),
        other => Err(EncodingError::mismatch(ty, other.kind())),
    }
}

fn address_bytes(s: &str) -> Result<Vec<u8>, EncodingError> {
    let address: Address = s.parse()?;
    let mut out = address.to_contract_bytes().to_vec();
    if let Some((_, entrypoint)) = s.split_once('%') {
        if entrypoint != "default" {
            out.extend_from_slice(entrypoint.as_bytes());
        }
    }
    Ok(out)
}

fn key_hash_bytes(s: &str) -> Result<Vec<u8>, EncodingError> {
    let address: Address = s.parse()?;
    address
        .to_key_hash_bytes()
        .map(|b| b.to_vec())
        .ok_or_else(|| EncodingError::mismatch("key_hash", "originated address"))
}

fn type_arg<'a>(ty: &'a Micheline, index: usize) -> Result<&'a Micheline, EncodingError> {
    ty.args()
        .get(index)
        .ok_or_else(|| EncodingError::mismatch("well-formed type", ty.kind()))
}

fn seq_items<'a>(data: &'a Micheline, ty: &str) -> Result<&'a [Micheline], EncodingError> {
    match data {
        Micheline::Seq(items) => Ok(items),
        other => Err(EncodingError::mismatch(ty, other.kind())),
    }
}

/// Rewrites `data` into the canonical form `PACK` hashes: typed strings become
/// optimized bytes, pair combs become nested binary pairs, annotations vanish.
fn normalize(data: &Micheline, ty: &Micheline) -> Result<Micheline, EncodingError> {
    let Some(name) = ty.prim_name() else {
        return Err(EncodingError::mismatch("type", ty.kind()));
    };
    match name {
        "int" => expect_int(data, "int").map(Micheline::int),
        "nat" => natural(data, "nat"),
        "mutez" => natural(data, "mutez"),
        "string" => match data {
            Micheline::String { .. } => Ok(data.clone()),
            other => Err(EncodingError::mismatch("string", other.kind())),
        },
        "bytes" => match data {
            Micheline::Bytes { .. } => Ok(data.clone()),
            other => Err(EncodingError::mismatch("bytes", other.kind())),
        },
        "bool" => bool_value(data),
        "unit" => match data.prim_name() {
            Some("Unit") => Ok(Micheline::prim("Unit", vec![])),
            _ => Err(EncodingError::mismatch("unit", data.kind())),
        },
        "timestamp" => expect_int(data, "timestamp").map(Micheline::int),
        "address" | "contract" => optimized(data, "address", address_bytes),
        "key_hash" => optimized(data, "key_hash", key_hash_bytes),
        "key" => optimized(data, "key", |s| Ok(s.parse::<PublicKey>()?.to_tagged_bytes())),
        "signature" => optimized(data, "signature", |s| Ok(s.parse::<Signature>()?.as_bytes().to_vec())),
        "chain_id" => optimized(data, "chain_id", |s| Ok(s.parse::<ChainId>()?.as_bytes().to_vec())),
        "option" => match (data.prim_name(), data.args()) {
            (Some("None"), []) => Ok(Micheline::prim("None", vec![])),
            (Some("Some"), [inner]) => Ok(Micheline::prim("Some", vec![normalize(inner, type_arg(ty, 0)?)?])),
            _ => Err(EncodingError::mismatch("option", data.kind())),
        },
        "or" => match (data.prim_name(), data.args()) {
            (Some("Left"), [inner]) => Ok(Micheline::prim("Left", vec![normalize(inner, type_arg(ty, 0)?)?])),
            (Some("Right"), [inner]) => Ok(Micheline::prim("Right", vec![normalize(inner, type_arg(ty, 1)?)?])),
            _ => Err(EncodingError::mismatch("or", data.kind())),
        },
        "pair" => {
            let (ty_head, ty_rest) = ty
                .split_pair()
                .ok_or_else(|| EncodingError::mismatch("well-formed pair type", ty.kind()))?;
            let (head, rest) = data
                .split_pair()
                .ok_or_else(|| EncodingError::mismatch("pair", data.kind()))?;
            Ok(Micheline::pair(normalize(head, ty_head)?, normalize(&rest, &ty_rest)?))
        }
        "list" | "set" => {
            let elem = type_arg(ty, 0)?;
            seq_items(data, name)?
                .iter()
                .map(|item| normalize(item, elem))
                .collect::<Result<_, _>>()
                .map(Micheline::Seq)
        }
        "map" | "big_map" => {
            if name == "big_map" && matches!(data, Micheline::Int { .. }) {
                return Ok(data.clone());
            }
            let (key_ty, value_ty) = (type_arg(ty, 0)?, type_arg(ty, 1)?);
            seq_items(data, name)?
                .iter()
                .map(|elt| match (elt.prim_name(), elt.args()) {
                    (Some("Elt"), [k, v]) => Ok(Micheline::prim(
                        "Elt",
                        vec![normalize(k, key_ty)?, normalize(v, value_ty)?],
                    )),
                    _ => Err(EncodingError::mismatch("Elt", elt.kind())),
                })
                .collect::<Result<_, _>>()
                .map(Micheline::Seq)
        }
        other => Err(EncodingError::UnsupportedType(other.to_owned())),
    }
}
