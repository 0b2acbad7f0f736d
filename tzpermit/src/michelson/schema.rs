//! Typed encoding of structured arguments through entrypoint types.
//!
//! Arguments arrive as JSON in the shape wallets and indexers use for
//! Michelson records: pairs flatten into objects keyed by their field (`%`)
//! or type (`:`) annotations, lists become arrays, options become `null` or a
//! value. [`EntrypointSchema::encode_call`] turns such JSON into a
//! [`Micheline`] value checked against the entrypoint's parameter type.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::Micheline;
use crate::error::EncodingError;
use crate::types::{Address, ChainId, PublicKey, Signature};

/// A Michelson value together with the type it inhabits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedValue {
    /// The encoded value.
    pub value: Micheline,
    /// Its Michelson type.
    #[serde(rename = "type")]
    pub ty: Micheline,
}

/// Parameter types of a contract, by entrypoint name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrypointSchema {
    entrypoints: BTreeMap<String, Micheline>,
}

impl EntrypointSchema {
    /// Creates a schema from an entrypoint table, as returned by the node's
    /// `entrypoints` RPC.
    #[must_use]
    pub const fn new(entrypoints: BTreeMap<String, Micheline>) -> Self {
        Self { entrypoints }
    }

    /// Derives the entrypoint table from a contract's `parameter` type.
    ///
    /// Every field-annotated branch of the `or` tree is an entrypoint. The
    /// whole type is also reachable as `default` unless a branch claims it.
    #[must_use]
    pub fn from_parameter_type(parameter: &Micheline) -> Self {
        fn collect(ty: &Micheline, out: &mut BTreeMap<String, Micheline>) {
            if let Some(name) = ty.field_annot() {
                out.entry(name.to_owned()).or_insert_with(|| ty.clone());
            }
            if ty.prim_name() == Some("or") {
                for branch in ty.args() {
                    collect(branch, out);
                }
            }
        }

        let mut entrypoints = BTreeMap::new();
        collect(parameter, &mut entrypoints);
        entrypoints
            .entry("default".to_owned())
            .or_insert_with(|| parameter.clone());
        Self { entrypoints }
    }

    /// Returns the names of all entrypoints.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entrypoints.keys().map(String::as_str)
    }

    /// Returns the parameter type of an entrypoint.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError::UnknownEntrypoint`] if the contract has no
    /// such entrypoint.
    pub fn entrypoint_type(&self, name: &str) -> Result<&Micheline, EncodingError> {
        self.entrypoints
            .get(name)
            .ok_or_else(|| EncodingError::UnknownEntrypoint(name.to_owned()))
    }

    /// Encodes structured JSON arguments for an entrypoint call.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError`] if the entrypoint is unknown or the arguments
    /// do not fit its type.
    pub fn encode_call(&self, name: &str, args: &Value) -> Result<TypedValue, EncodingError> {
        let ty = self.entrypoint_type(name)?;
        Ok(TypedValue {
            value: encode_value(ty, args)?,
            ty: ty.clone(),
        })
    }
}

/// Encodes a JSON value as Michelson data of type `ty`.
///
/// # Errors
///
/// Returns [`EncodingError`] if the value does not fit the type.
pub fn encode_value(ty: &Micheline, value: &Value) -> Result<Micheline, EncodingError> {
    let Some(name) = ty.prim_name() else {
        return Err(EncodingError::mismatch("type", ty.kind()));
    };
    match name {
        "int" => parse_int(value, "int").map(Micheline::int),
        "timestamp" => parse_int(value, "timestamp").map(Micheline::int),
        "nat" => parse_natural(value, "nat"),
        "mutez" => parse_natural(value, "mutez"),
        "string" => expect_str(value, "string").map(Micheline::string),
        "bytes" => {
            let s = expect_str(value, "bytes")?;
            alloy_primitives::hex::decode(s)
                .map(Micheline::bytes)
                .map_err(|_| EncodingError::mismatch("hex bytes", s))
        }
        "bool" => value
            .as_bool()
            .map(|b| Micheline::prim(if b { "True" } else { "False" }, vec![]))
            .ok_or_else(|| EncodingError::mismatch("bool", json_kind(value))),
        "unit" => Ok(Micheline::prim("Unit", vec![])),
        "address" | "contract" => {
            let s = expect_str(value, "address")?;
            s.parse::<Address>()?;
            Ok(Micheline::string(s))
        }
        "key_hash" => {
            let s = expect_str(value, "key_hash")?;
            if !s.parse::<Address>()?.is_implicit() {
                return Err(EncodingError::mismatch("key_hash", s));
            }
            Ok(Micheline::string(s))
        }
        "key" => typed_string::<PublicKey>(value, "key"),
        "signature" => typed_string::<Signature>(value, "signature"),
        "chain_id" => typed_string::<ChainId>(value, "chain_id"),
        "option" => {
            if value.is_null() {
                Ok(Micheline::prim("None", vec![]))
            } else {
                Ok(Micheline::prim("Some", vec![encode_value(type_arg(ty, 0)?, value)?]))
            }
        }
        "list" | "set" => {
            let elem = type_arg(ty, 0)?;
            value
                .as_array()
                .ok_or_else(|| EncodingError::mismatch(name, json_kind(value)))?
                .iter()
                .map(|item| encode_value(elem, item))
                .collect::<Result<_, _>>()
                .map(Micheline::Seq)
        }
        "map" | "big_map" => encode_map(ty, value),
        "or" => encode_or(ty, value),
        "pair" => encode_pair(ty, value),
        other => Err(EncodingError::UnsupportedType(other.to_owned())),
    }
}

fn json_kind(value: &Value) -> String {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
    .to_owned()
}

fn type_arg<'a>(ty: &'a Micheline, index: usize) -> Result<&'a Micheline, EncodingError> {
    ty.args()
        .get(index)
        .ok_or_else(|| EncodingError::mismatch("well-formed type", ty.kind()))
}

fn expect_str<'a>(value: &'a Value, ty: &str) -> Result<&'a str, EncodingError> {
    value
        .as_str()
        .ok_or_else(|| EncodingError::mismatch(ty, json_kind(value)))
}

fn typed_string<T>(value: &Value, ty: &str) -> Result<Micheline, EncodingError>
where
    T: std::str::FromStr<Err = crate::types::ParseError>,
{
    let s = expect_str(value, ty)?;
    s.parse::<T>()?;
    Ok(Micheline::string(s))
}

fn parse_int(value: &Value, ty: &'static str) -> Result<i128, EncodingError> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => return Err(EncodingError::mismatch(ty, json_kind(other))),
    };
    if text.is_empty() || !text.trim_start_matches('-').bytes().all(|b| b.is_ascii_digit()) {
        return Err(EncodingError::mismatch(ty, text));
    }
    text.parse::<i128>()
        .map_err(|_| EncodingError::OutOfRange { ty, value: text })
}

fn parse_natural(value: &Value, ty: &'static str) -> Result<Micheline, EncodingError> {
    let int = parse_int(value, ty)?;
    if int < 0 || (ty == "mutez" && i64::try_from(int).is_err()) {
        return Err(EncodingError::OutOfRange {
            ty,
            value: int.to_string(),
        });
    }
    Ok(Micheline::int(int))
}

fn encode_map(ty: &Micheline, value: &Value) -> Result<Micheline, EncodingError> {
    let (key_ty, value_ty) = (type_arg(ty, 0)?, type_arg(ty, 1)?);
    let elt = |k: &Value, v: &Value| -> Result<Micheline, EncodingError> {
        Ok(Micheline::prim("Elt", vec![encode_value(key_ty, k)?, encode_value(value_ty, v)?]))
    };
    match value {
        Value::Object(entries) => entries
            .iter()
            .map(|(k, v)| elt(&Value::String(k.clone()), v))
            .collect::<Result<_, _>>()
            .map(Micheline::Seq),
        Value::Array(entries) => entries
            .iter()
            .map(|entry| match entry.as_array().map(Vec::as_slice) {
                Some([k, v]) => elt(k, v),
                _ => Err(EncodingError::mismatch("[key, value]", json_kind(entry))),
            })
            .collect::<Result<_, _>>()
            .map(Micheline::Seq),
        other => Err(EncodingError::mismatch("map", json_kind(other))),
    }
}

/// Finds the branch of an `or` tree named `key`, returning the path of
/// `Left`/`Right` wrappers and the branch type.
fn or_branch<'a>(ty: &'a Micheline, key: &str) -> Option<(Vec<&'static str>, &'a Micheline)> {
    let [left, right] = ty.args() else {
        return None;
    };
    for (side, branch) in [("Left", left), ("Right", right)] {
        if key == side || branch.field_annot() == Some(key) {
            return Some((vec![side], branch));
        }
        if branch.prim_name() == Some("or") && branch.field_annot().is_none() {
            if let Some((mut path, found)) = or_branch(branch, key) {
                path.insert(0, side);
                return Some((path, found));
            }
        }
    }
    None
}

fn encode_or(ty: &Micheline, value: &Value) -> Result<Micheline, EncodingError> {
    let entry = value
        .as_object()
        .filter(|o| o.len() == 1)
        .and_then(|o| o.iter().next())
        .ok_or_else(|| EncodingError::mismatch("single-key object for or", json_kind(value)))?;
    let (path, branch) =
        or_branch(ty, entry.0).ok_or_else(|| EncodingError::MissingField(entry.0.clone()))?;
    let mut node = encode_value(branch, entry.1)?;
    for side in path.into_iter().rev() {
        node = Micheline::prim(side, vec![node]);
    }
    Ok(node)
}

/// A pair flattens into its children unless it is itself a named field.
fn flattens(ty: &Micheline, root: bool) -> bool {
    ty.prim_name() == Some("pair") && (root || ty.field_annot().is_none())
}

fn pair_leaves<'a>(ty: &'a Micheline, root: bool, out: &mut Vec<&'a Micheline>) {
    if flattens(ty, root) {
        for arg in ty.args() {
            pair_leaves(arg, false, out);
        }
    } else {
        out.push(ty);
    }
}

fn assemble(
    ty: &Micheline,
    root: bool,
    values: &mut impl Iterator<Item = Micheline>,
) -> Result<Micheline, EncodingError> {
    if flattens(ty, root) {
        let args = ty
            .args()
            .iter()
            .map(|arg| assemble(arg, false, values))
            .collect::<Result<_, _>>()?;
        Ok(Micheline::prim("Pair", args))
    } else {
        values
            .next()
            .ok_or_else(|| EncodingError::mismatch("pair field", "nothing"))
    }
}

fn encode_pair(ty: &Micheline, value: &Value) -> Result<Micheline, EncodingError> {
    let mut leaves = Vec::new();
    pair_leaves(ty, true, &mut leaves);

    let encoded: Vec<Micheline> = match value {
        Value::Array(items) => {
            if items.len() != leaves.len() {
                return Err(EncodingError::mismatch(
                    format!("{} pair fields", leaves.len()),
                    format!("{} items", items.len()),
                ));
            }
            leaves
                .iter()
                .zip(items)
                .map(|(leaf, item)| encode_value(leaf, item))
                .collect::<Result<_, _>>()?
        }
        Value::Object(fields) => leaves
            .iter()
            .enumerate()
            .map(|(index, leaf)| {
                let key = leaf
                    .field_annot()
                    .or_else(|| leaf.type_annot())
                    .map_or_else(|| index.to_string(), str::to_owned);
                let item = fields
                    .get(&key)
                    .ok_or(EncodingError::MissingField(key))?;
                encode_value(leaf, item)
            })
            .collect::<Result<_, _>>()?,
        other => return Err(EncodingError::mismatch("pair", json_kind(other))),
    };
    assemble(ty, true, &mut encoded.into_iter())
}

/// Reads the field annotated `%name` out of a value, walking its type in
/// parallel.
#[must_use]
pub fn find_field(ty: &Micheline, value: &Micheline, name: &str) -> Option<Micheline> {
    if ty.field_annot() == Some(name) {
        return Some(value.clone());
    }
    if ty.prim_name() != Some("pair") {
        return None;
    }
    let (ty_head, ty_rest) = ty.split_pair()?;
    let (head, rest) = value.split_pair()?;
    find_field(ty_head, head, name).or_else(|| find_field(&ty_rest, &rest, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AddressKind;
    use serde_json::json;

    fn parse(v: Value) -> Micheline {
        serde_json::from_value(v).unwrap()
    }

    fn fa2_transfer_type() -> Micheline {
        parse(json!({
            "prim": "list",
            "args": [{
                "prim": "pair",
                "args": [
                    { "prim": "address", "annots": ["%from_"] },
                    {
                        "prim": "list",
                        "args": [{
                            "prim": "pair",
                            "args": [
                                { "prim": "address", "annots": ["%to_"] },
                                {
                                    "prim": "pair",
                                    "args": [
                                        { "prim": "nat", "annots": ["%token_id"] },
                                        { "prim": "nat", "annots": ["%amount"] }
                                    ]
                                }
                            ]
                        }],
                        "annots": ["%txs"]
                    }
                ]
            }]
        }))
    }

    fn addr(byte: u8) -> String {
        Address::new(AddressKind::Ed25519, [byte; 20]).to_string()
    }

    #[test]
    fn test_encode_fa2_transfer_record() {
        let ty = fa2_transfer_type();
        let args = json!([{
            "from_": addr(1),
            "txs": [{ "to_": addr(2), "token_id": "0", "amount": "100" }]
        }]);
        let value = encode_value(&ty, &args).unwrap();
        assert_eq!(
            value,
            Micheline::Seq(vec![Micheline::pair(
                Micheline::string(addr(1)),
                Micheline::Seq(vec![Micheline::pair(
                    Micheline::string(addr(2)),
                    Micheline::pair(Micheline::int(0), Micheline::int(100)),
                )]),
            )])
        );
        assert!(super::super::pack(&value, &ty).is_ok());
    }

    #[test]
    fn test_encode_by_type_annotation_and_position() {
        let ty = parse(json!({
            "prim": "pair",
            "args": [
                { "prim": "address", "annots": [":from"] },
                { "prim": "pair", "args": [
                    { "prim": "address", "annots": [":to"] },
                    { "prim": "nat", "annots": [":value"] }
                ]}
            ]
        }));
        let by_name = encode_value(&ty, &json!({ "from": addr(1), "to": addr(2), "value": 7 })).unwrap();
        let by_position = encode_value(&ty, &json!([addr(1), addr(2), "7"])).unwrap();
        assert_eq!(by_name, by_position);
    }

    #[test]
    fn test_rejects_negative_nat_and_bad_address() {
        let ty = fa2_transfer_type();
        let negative = json!([{ "from_": addr(1), "txs": [{ "to_": addr(2), "token_id": 0, "amount": -1 }] }]);
        assert!(matches!(
            encode_value(&ty, &negative),
            Err(EncodingError::OutOfRange { ty: "nat", .. })
        ));
        let malformed = json!([{ "from_": "tz1notanaddress", "txs": [] }]);
        assert!(matches!(encode_value(&ty, &malformed), Err(EncodingError::Identifier(_))));
        let missing = json!([{ "from_": addr(1) }]);
        assert_eq!(
            encode_value(&ty, &missing),
            Err(EncodingError::MissingField("txs".into()))
        );
    }

    #[test]
    fn test_rejects_amount_beyond_i128() {
        let ty = Micheline::prim("nat", vec![]);
        let huge = json!("1000000000000000000000000000000000000000000");
        assert!(matches!(encode_value(&ty, &huge), Err(EncodingError::OutOfRange { .. })));
        assert!(matches!(
            encode_value(&ty, &json!("12abc")),
            Err(EncodingError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_entrypoints_from_parameter_type() {
        let parameter = parse(json!({
            "prim": "or",
            "args": [
                { "prim": "list", "args": [{ "prim": "nat" }], "annots": ["%transfer"] },
                { "prim": "or", "args": [
                    { "prim": "unit", "annots": ["%pause"] },
                    { "prim": "nat", "annots": ["%permit"] }
                ]}
            ]
        }));
        let schema = EntrypointSchema::from_parameter_type(&parameter);
        let names: Vec<_> = schema.names().collect();
        assert_eq!(names, ["default", "pause", "permit", "transfer"]);
        assert_eq!(
            schema.encode_call("nope", &json!(null)),
            Err(EncodingError::UnknownEntrypoint("nope".into()))
        );
        assert_eq!(
            encode_value(&parameter, &json!({ "permit": 3 })).unwrap(),
            Micheline::prim("Right", vec![Micheline::prim("Right", vec![Micheline::int(3)])])
        );
    }

    #[test]
    fn test_find_field_in_comb_storage() {
        let ty = parse(json!({
            "prim": "pair",
            "args": [
                { "prim": "big_map", "args": [{ "prim": "address" }, { "prim": "nat" }], "annots": ["%ledger"] },
                { "prim": "nat", "annots": ["%default_expiry"] },
                { "prim": "nat", "annots": ["%permit_counter"] }
            ]
        }));
        let value = parse(json!({
            "prim": "Pair",
            "args": [{ "int": "12" }, { "int": "3600" }, { "int": "5" }]
        }));
        assert_eq!(find_field(&ty, &value, "permit_counter"), Some(Micheline::int(5)));
        assert_eq!(find_field(&ty, &value, "default_expiry"), Some(Micheline::int(3600)));
        assert_eq!(find_field(&ty, &value, "missing"), None);
    }
}
