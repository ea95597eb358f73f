//! Request parameter payloads carried in `OracleRequest.data`.
//!
//! Payloads are CBOR. Most producers write "diet" CBOR: a flat sequence of
//! alternating text keys and values with no enclosing map header. A payload
//! that does start with a map header is accepted too, but the map must then
//! account for every byte of the input.

use std::collections::BTreeMap;

use alloy_primitives::{Bytes, U256, U512};
use minicbor::{
    data::{Int, Tag, Type},
    Decoder, Encoder,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum container nesting accepted while decoding.
pub const MAX_NESTING_DEPTH: usize = 32;

const TAG_POSITIVE_BIGNUM: u64 = 2;
const TAG_NEGATIVE_BIGNUM: u64 = 3;

/// Decoded request parameters, keyed by name.
pub type RequestParams = BTreeMap<String, PayloadValue>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum PayloadValue {
    Bytes(Bytes),
    Text(String),
    Unsigned(u64),
    /// Negative integers that fit in an i128 (CBOR major type 1).
    Signed(i128),
    /// Positive bignum (tag 2) wider than 64 bits.
    BigUnsigned(U256),
    /// Negative bignum (tag 3). The value represented is `-1 - n`.
    BigNegative(U256),
    Float(f64),
    Bool(bool),
    Null,
    Map(RequestParams),
    Array(Vec<PayloadValue>),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("malformed cbor: {0}")]
    Malformed(String),

    #[error("parameter keys must be text strings, found {0}")]
    NonTextKey(String),

    #[error("duplicate parameter key \"{0}\"")]
    DuplicateKey(String),

    #[error("unsupported cbor item: {0}")]
    Unsupported(String),

    #[error("unexpected break marker at offset {0}")]
    UnexpectedBreak(usize),

    #[error("nesting deeper than {MAX_NESTING_DEPTH} levels")]
    TooDeep,

    #[error("bignum of {0} bytes does not fit in 256 bits")]
    BignumTooLarge(usize),

    #[error("{0} trailing bytes after top-level map")]
    TrailingBytes(usize),

    #[error("cbor encode: {0}")]
    Encode(String),
}

impl From<minicbor::decode::Error> for PayloadError {
    fn from(err: minicbor::decode::Error) -> Self {
        PayloadError::Malformed(err.to_string())
    }
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for PayloadError {
    fn from(err: minicbor::encode::Error<E>) -> Self {
        PayloadError::Encode(err.to_string())
    }
}

/// Decodes a request payload into its parameter map.
///
/// An empty payload yields an empty map.
pub fn decode_request_params(bytes: &[u8]) -> Result<RequestParams, PayloadError> {
    if bytes.is_empty() {
        return Ok(RequestParams::new());
    }

    let mut decoder = Decoder::new(bytes);

    match decoder.datatype()? {
        Type::Map | Type::MapIndef => {
            let params = decode_map(&mut decoder, 1)?;
            let remaining = bytes.len() - decoder.position();
            if remaining > 0 {
                return Err(PayloadError::TrailingBytes(remaining));
            }
            Ok(params)
        }
        _ => {
            let mut params = RequestParams::new();
            while decoder.position() < bytes.len() {
                let key = decode_key(&mut decoder)?;
                let value = decode_value(&mut decoder, 1)?;
                insert_unique(&mut params, key, value)?;
            }
            Ok(params)
        }
    }
}

/// Encodes parameters in the headerless form, keys in sorted order.
pub fn encode_request_params(params: &RequestParams) -> Result<Vec<u8>, PayloadError> {
    let mut encoder = Encoder::new(Vec::new());
    for (key, value) in params {
        encoder.str(key)?;
        encode_value(&mut encoder, value)?;
    }
    Ok(encoder.into_writer())
}

impl PayloadValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PayloadValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Lossless where JSON allows it. Byte strings become 0x-hex, bignums
    /// become decimal strings and non-finite floats become null.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;

        match self {
            PayloadValue::Bytes(b) => Value::String(const_hex::encode_prefixed(b)),
            PayloadValue::Text(s) => Value::String(s.clone()),
            PayloadValue::Unsigned(n) => Value::from(*n),
            PayloadValue::Signed(n) => match i64::try_from(*n) {
                Ok(n) => Value::from(n),
                Err(_) => Value::String(n.to_string()),
            },
            PayloadValue::BigUnsigned(n) => Value::String(n.to_string()),
            PayloadValue::BigNegative(n) => Value::String(format!("-{}", negative_magnitude(*n))),
            PayloadValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            PayloadValue::Bool(b) => Value::Bool(*b),
            PayloadValue::Null => Value::Null,
            PayloadValue::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            PayloadValue::Array(items) => Value::Array(items.iter().map(|v| v.to_json()).collect()),
        }
    }
}

fn insert_unique(
    params: &mut RequestParams,
    key: String,
    value: PayloadValue,
) -> Result<(), PayloadError> {
    if params.contains_key(&key) {
        return Err(PayloadError::DuplicateKey(key));
    }
    params.insert(key, value);
    Ok(())
}

// -1 - n can reach -2^256, one past what U256 holds
fn negative_magnitude(n: U256) -> U512 {
    let mut limbs = [0u64; 8];
    limbs[..4].copy_from_slice(n.as_limbs());
    U512::from_limbs(limbs) + U512::from(1u64)
}

fn check_depth(depth: usize) -> Result<(), PayloadError> {
    if depth > MAX_NESTING_DEPTH {
        Err(PayloadError::TooDeep)
    } else {
        Ok(())
    }
}

// consumes a break marker if one is next
fn at_break(decoder: &mut Decoder<'_>) -> Result<bool, PayloadError> {
    if decoder.datatype()? == Type::Break {
        decoder.set_position(decoder.position() + 1);
        Ok(true)
    } else {
        Ok(false)
    }
}

fn decode_key(decoder: &mut Decoder<'_>) -> Result<String, PayloadError> {
    match decoder.datatype()? {
        Type::String | Type::StringIndef => decode_text(decoder),
        Type::Break => Err(PayloadError::UnexpectedBreak(decoder.position())),
        other => Err(PayloadError::NonTextKey(format!("{other:?}"))),
    }
}

fn decode_text(decoder: &mut Decoder<'_>) -> Result<String, PayloadError> {
    let mut text = String::new();
    for chunk in decoder.str_iter()? {
        text.push_str(chunk?);
    }
    Ok(text)
}

fn decode_bytes(decoder: &mut Decoder<'_>) -> Result<Vec<u8>, PayloadError> {
    let mut bytes = Vec::new();
    for chunk in decoder.bytes_iter()? {
        bytes.extend_from_slice(chunk?);
    }
    Ok(bytes)
}

fn decode_map(decoder: &mut Decoder<'_>, depth: usize) -> Result<RequestParams, PayloadError> {
    check_depth(depth)?;

    let mut map = RequestParams::new();
    match decoder.map()? {
        Some(len) => {
            for _ in 0..len {
                let key = decode_key(decoder)?;
                let value = decode_value(decoder, depth + 1)?;
                insert_unique(&mut map, key, value)?;
            }
        }
        None => {
            while !at_break(decoder)? {
                let key = decode_key(decoder)?;
                let value = decode_value(decoder, depth + 1)?;
                insert_unique(&mut map, key, value)?;
            }
        }
    }
    Ok(map)
}

fn decode_array(
    decoder: &mut Decoder<'_>,
    depth: usize,
) -> Result<Vec<PayloadValue>, PayloadError> {
    check_depth(depth)?;

    // length prefixes are untrusted, never preallocate from them
    let mut items = Vec::new();
    match decoder.array()? {
        Some(len) => {
            for _ in 0..len {
                items.push(decode_value(decoder, depth + 1)?);
            }
        }
        None => {
            while !at_break(decoder)? {
                items.push(decode_value(decoder, depth + 1)?);
            }
        }
    }
    Ok(items)
}

fn decode_value(decoder: &mut Decoder<'_>, depth: usize) -> Result<PayloadValue, PayloadError> {
    let value = match decoder.datatype()? {
        Type::Bool => PayloadValue::Bool(decoder.bool()?),
        Type::Null => {
            decoder.null()?;
            PayloadValue::Null
        }
        Type::Undefined => {
            decoder.undefined()?;
            PayloadValue::Null
        }
        Type::U8 | Type::U16 | Type::U32 | Type::U64 => PayloadValue::Unsigned(decoder.u64()?),
        Type::I8 | Type::I16 | Type::I32 | Type::I64 | Type::Int => {
            PayloadValue::Signed(i128::from(decoder.int()?))
        }
        Type::F16 => PayloadValue::Float(f64::from(decoder.f16()?)),
        Type::F32 => PayloadValue::Float(f64::from(decoder.f32()?)),
        Type::F64 => PayloadValue::Float(decoder.f64()?),
        Type::Bytes | Type::BytesIndef => PayloadValue::Bytes(decode_bytes(decoder)?.into()),
        Type::String | Type::StringIndef => PayloadValue::Text(decode_text(decoder)?),
        Type::Array | Type::ArrayIndef => PayloadValue::Array(decode_array(decoder, depth)?),
        Type::Map | Type::MapIndef => PayloadValue::Map(decode_map(decoder, depth)?),
        Type::Tag => decode_tagged(decoder, depth)?,
        Type::Break => return Err(PayloadError::UnexpectedBreak(decoder.position())),
        other => return Err(PayloadError::Unsupported(format!("{other:?}"))),
    };
    Ok(value)
}

fn decode_tagged(decoder: &mut Decoder<'_>, depth: usize) -> Result<PayloadValue, PayloadError> {
    let tag = decoder.tag()?;
    match tag.as_u64() {
        TAG_POSITIVE_BIGNUM => {
            let n = decode_bignum(decoder)?;
            Ok(match u64::try_from(n) {
                Ok(small) => PayloadValue::Unsigned(small),
                Err(_) => PayloadValue::BigUnsigned(n),
            })
        }
        TAG_NEGATIVE_BIGNUM => {
            let n = decode_bignum(decoder)?;
            Ok(match u64::try_from(n) {
                Ok(small) => PayloadValue::Signed(-1 - i128::from(small)),
                Err(_) => PayloadValue::BigNegative(n),
            })
        }
        // other semantic tags carry no meaning here
        _ => {
            check_depth(depth + 1)?;
            decode_value(decoder, depth + 1)
        }
    }
}

fn decode_bignum(decoder: &mut Decoder<'_>) -> Result<U256, PayloadError> {
    match decoder.datatype()? {
        Type::Bytes | Type::BytesIndef => {
            let raw = decode_bytes(decoder)?;
            let significant = &raw[raw.iter().take_while(|b| **b == 0).count()..];
            U256::try_from_be_slice(significant).ok_or(PayloadError::BignumTooLarge(raw.len()))
        }
        other => Err(PayloadError::Unsupported(format!(
            "bignum tag over {other:?}"
        ))),
    }
}

fn encode_value(
    encoder: &mut Encoder<Vec<u8>>,
    value: &PayloadValue,
) -> Result<(), PayloadError> {
    match value {
        PayloadValue::Bytes(b) => {
            encoder.bytes(b)?;
        }
        PayloadValue::Text(s) => {
            encoder.str(s)?;
        }
        PayloadValue::Unsigned(n) => {
            encoder.u64(*n)?;
        }
        PayloadValue::Signed(n) => {
            let int = Int::try_from(*n).map_err(|e| PayloadError::Encode(e.to_string()))?;
            encoder.int(int)?;
        }
        PayloadValue::BigUnsigned(n) => {
            encoder
                .tag(Tag::new(TAG_POSITIVE_BIGNUM))?
                .bytes(&n.to_be_bytes_trimmed_vec())?;
        }
        PayloadValue::BigNegative(n) => {
            encoder
                .tag(Tag::new(TAG_NEGATIVE_BIGNUM))?
                .bytes(&n.to_be_bytes_trimmed_vec())?;
        }
        PayloadValue::Float(f) => {
            encoder.f64(*f)?;
        }
        PayloadValue::Bool(b) => {
            encoder.bool(*b)?;
        }
        PayloadValue::Null => {
            encoder.null()?;
        }
        PayloadValue::Map(map) => {
            encoder.map(map.len() as u64)?;
            for (key, value) in map {
                encoder.str(key)?;
                encode_value(encoder, value)?;
            }
        }
        PayloadValue::Array(items) => {
            encoder.array(items.len() as u64)?;
            for item in items {
                encode_value(encoder, item)?;
            }
        }
    }
    Ok(())
}
