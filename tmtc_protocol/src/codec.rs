//! Conversion between semantic values and fixed-width parameter rows.
//!
//! Every row is `bytes_per_row` bytes long and laid out big-endian. Vector
//! parameters are sequences of rows, each converted independently.

use serde::{Deserialize, Serialize};

use crate::error::{CodecError, ModelError};
use crate::types::{ParameterDefinition, TypeClass, TypeStr};

/// A parameter or argument value on the ground side of the codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Bool(bool),
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Bytes(Vec<u8>),
    /// A parameter referenced by name (parameterref types).
    Name(String),
    /// Several rows of a vector parameter.
    Rows(Vec<Value>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Unsigned(_) => "unsigned integer",
            Value::Signed(_) => "signed integer",
            Value::Float(_) => "float",
            Value::Bytes(_) => "bytes",
            Value::Name(_) => "name",
            Value::Rows(_) => "row sequence",
        }
    }

    pub fn as_unsigned(&self) -> Option<u64> {
        match *self {
            Value::Unsigned(v) => Some(v),
            Value::Signed(v) => u64::try_from(v).ok(),
            Value::Bool(b) => Some(u64::from(b)),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

macro_rules! value_from {
    ($variant:ident, $target:ty: $($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::$variant(<$target>::from(v))
            }
        })*
    };
}

value_from!(Unsigned, u64: u8, u16, u32, u64);
value_from!(Signed, i64: i8, i16, i32, i64);
value_from!(Float, f64: f32, f64);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Name(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Name(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Rows(v)
    }
}

/// Parameter name lookups needed by parameterref rows.
pub trait ParameterNames {
    fn parameter_id(&self, name: &str) -> Result<u32, ModelError>;
    fn parameter_name(&self, id: u32) -> Option<&str>;
}

// ================================ Encode ====================================

/// Encode a single row.
///
/// `validate_len` is only switched off for parameter-block elements, which
/// carry no row length of their own.
pub fn encode(
    value: &Value,
    def: &ParameterDefinition,
    validate_len: bool,
    names: &dyn ParameterNames,
) -> Result<Vec<u8>, CodecError> {
    if let Value::Rows(_) = value {
        return Err(conversion(value, def, "a single row is expected"));
    }

    match def.type_str {
        TypeStr::ParameterRef => {
            let id = match value {
                Value::Name(name) => names
                    .parameter_id(name)
                    .map(u64::from)
                    .map_err(|source| CodecError::Reference {
                        name: name.clone(),
                        source,
                    })?,
                other => unsigned_of(other, def)?,
            };
            pack_unsigned(id, def)
        }
        TypeStr::Unsigned | TypeStr::Bitfield => pack_unsigned(unsigned_of(value, def)?, def),
        TypeStr::Signed => pack_signed(signed_of(value, def)?, def),
        TypeStr::Float => pack_float(value, def),
        TypeStr::Raw | TypeStr::Varaw => pack_raw(value, def, validate_len),
    }
}

/// Encode a value into the rows a set command carries, following the type class.
pub fn encode_rows(
    value: &Value,
    def: &ParameterDefinition,
    validate_len: bool,
    names: &dyn ParameterNames,
) -> Result<Vec<Vec<u8>>, CodecError> {
    match (def.type_class.is_vector(), value) {
        (true, Value::Rows(rows)) => rows
            .iter()
            .map(|row| encode(row, def, validate_len, names))
            .collect(),
        (true, single) => Ok(vec![encode(single, def, validate_len, names)?]),
        (false, Value::Rows(_)) => Err(conversion(
            value,
            def,
            &format!("{} type class takes a single value", def.type_class),
        )),
        (false, single) => Ok(vec![encode(single, def, validate_len, names)?]),
    }
}

fn conversion(value: &Value, def: &ParameterDefinition, reason: &str) -> CodecError {
    CodecError::Conversion {
        kind: value.kind(),
        type_str: def.type_str,
        reason: reason.to_string(),
    }
}

fn unsigned_of(value: &Value, def: &ParameterDefinition) -> Result<u64, CodecError> {
    match *value {
        Value::Unsigned(v) => Ok(v),
        Value::Bool(b) => Ok(u64::from(b)),
        Value::Signed(v) => u64::try_from(v).map_err(|_| CodecError::Range {
            value: v.to_string(),
            type_str: def.type_str,
            bits: def.bytes_per_row * 8,
        }),
        _ => Err(conversion(value, def, "an integer is expected")),
    }
}

fn signed_of(value: &Value, def: &ParameterDefinition) -> Result<i128, CodecError> {
    match *value {
        Value::Signed(v) => Ok(i128::from(v)),
        Value::Unsigned(v) => Ok(i128::from(v)),
        Value::Bool(b) => Ok(i128::from(b)),
        _ => Err(conversion(value, def, "an integer is expected")),
    }
}

fn pack_unsigned(v: u64, def: &ParameterDefinition) -> Result<Vec<u8>, CodecError> {
    let width = def.bytes_per_row as usize;
    if width < 8 && (v >> (width * 8)) != 0 {
        return Err(CodecError::Range {
            value: v.to_string(),
            type_str: def.type_str,
            bits: def.bytes_per_row * 8,
        });
    }
    Ok(widen(&v.to_be_bytes(), width, 0x00))
}

fn pack_signed(v: i128, def: &ParameterDefinition) -> Result<Vec<u8>, CodecError> {
    let bits = def.bits_per_row;
    if bits == 0 || bits > 64 {
        return Err(CodecError::Conversion {
            kind: "signed integer",
            type_str: def.type_str,
            reason: format!("{bits}-bit signed rows are not supported"),
        });
    }
    let lower = -(1i128 << (bits - 1));
    let upper = (1i128 << (bits - 1)) - 1;
    if !(lower..=upper).contains(&v) {
        return Err(CodecError::Range {
            value: v.to_string(),
            type_str: def.type_str,
            bits,
        });
    }
    // in range for at most 64 bits, so the cast is lossless
    let v = v as i64;
    let fill = if v < 0 { 0xFF } else { 0x00 };
    Ok(widen(&v.to_be_bytes(), def.bytes_per_row as usize, fill))
}

fn pack_float(value: &Value, def: &ParameterDefinition) -> Result<Vec<u8>, CodecError> {
    let v = match *value {
        Value::Float(f) => f,
        Value::Signed(i) => i as f64,
        Value::Unsigned(u) => u as f64,
        _ => return Err(conversion(value, def, "a number is expected")),
    };
    match def.bytes_per_row {
        4 => {
            let single = v as f32;
            if v.is_finite() && single.is_infinite() {
                return Err(CodecError::Range {
                    value: v.to_string(),
                    type_str: def.type_str,
                    bits: 32,
                });
            }
            Ok(single.to_be_bytes().to_vec())
        }
        8 => Ok(v.to_be_bytes().to_vec()),
        other => Err(conversion(
            value,
            def,
            &format!("float rows are 4 or 8 bytes, not {other}"),
        )),
    }
}

fn pack_raw(
    value: &Value,
    def: &ParameterDefinition,
    validate_len: bool,
) -> Result<Vec<u8>, CodecError> {
    if def.type_class == TypeClass::VarRaw {
        let bytes = value
            .as_bytes()
            .ok_or_else(|| conversion(value, def, "a byte sequence is expected"))?;
        let (min, max) = (def.min_rows as usize, def.max_rows as usize);
        if !(min..=max).contains(&bytes.len()) {
            return Err(CodecError::Length {
                type_str: def.type_str,
                min,
                max,
                actual: bytes.len(),
            });
        }
        return Ok(bytes.to_vec());
    }

    match value {
        Value::Unsigned(_) | Value::Signed(_) | Value::Bool(_) => {
            pack_unsigned(unsigned_of(value, def)?, def)
        }
        Value::Bytes(bytes) => {
            let expected = def.bytes_per_row as usize;
            if validate_len && bytes.len() != expected {
                return Err(CodecError::Length {
                    type_str: def.type_str,
                    min: expected,
                    max: expected,
                    actual: bytes.len(),
                });
            }
            Ok(bytes.clone())
        }
        _ => Err(conversion(value, def, "an integer or byte sequence is expected")),
    }
}

/// Right-align `be` (8 big-endian bytes) in a row of `width` bytes.
fn widen(be: &[u8; 8], width: usize, fill: u8) -> Vec<u8> {
    if width >= be.len() {
        let mut row = vec![fill; width - be.len()];
        row.extend_from_slice(be);
        row
    } else {
        be[be.len() - width..].to_vec()
    }
}

// ================================ Decode ====================================

/// Decode a single row.
pub fn decode(
    row: &[u8],
    def: &ParameterDefinition,
    names: &dyn ParameterNames,
) -> Result<Value, CodecError> {
    match def.type_str {
        TypeStr::Unsigned => Ok(Value::Unsigned(read_unsigned(row, def)?)),
        // only the single-bit bitfield reads as a flag
        TypeStr::Bitfield if def.bits_per_row == 1 => Ok(Value::Bool(read_unsigned(row, def)? != 0)),
        TypeStr::Bitfield => Ok(Value::Unsigned(read_unsigned(row, def)?)),
        TypeStr::Signed => Ok(Value::Signed(read_signed(row, def)?)),
        TypeStr::Float => match row.len() {
            4 => {
                let mut be = [0u8; 4];
                be.copy_from_slice(row);
                Ok(Value::Float(f64::from(f32::from_be_bytes(be))))
            }
            8 => {
                let mut be = [0u8; 8];
                be.copy_from_slice(row);
                Ok(Value::Float(f64::from_be_bytes(be)))
            }
            _ => Err(decode_error(row, def, "float rows are 4 or 8 bytes")),
        },
        TypeStr::ParameterRef => {
            let id = read_unsigned(row, def)?;
            // stale or cross-build references keep their numeric id
            let name = u32::try_from(id)
                .ok()
                .and_then(|id| names.parameter_name(id));
            Ok(match name {
                Some(name) => Value::Name(name.to_string()),
                None => Value::Unsigned(id),
            })
        }
        TypeStr::Raw | TypeStr::Varaw => Ok(Value::Bytes(row.to_vec())),
    }
}

pub fn decode_rows(
    rows: &[Vec<u8>],
    def: &ParameterDefinition,
    names: &dyn ParameterNames,
) -> Result<Vec<Value>, CodecError> {
    rows.iter().map(|row| decode(row, def, names)).collect()
}

fn decode_error(row: &[u8], def: &ParameterDefinition, reason: &'static str) -> CodecError {
    CodecError::Decode {
        type_str: def.type_str,
        actual: row.len(),
        reason,
    }
}

fn read_unsigned(row: &[u8], def: &ParameterDefinition) -> Result<u64, CodecError> {
    let split = row.len().saturating_sub(8);
    let (high, low) = row.split_at(split);
    if high.iter().any(|&b| b != 0) {
        return Err(decode_error(row, def, "value wider than 64 bits"));
    }
    Ok(low.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
}

fn read_signed(row: &[u8], def: &ParameterDefinition) -> Result<i64, CodecError> {
    if row.is_empty() || row.len() > 8 {
        return Err(decode_error(row, def, "signed rows are 1 to 8 bytes"));
    }
    let raw = row.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
    let shift = 64 - 8 * row.len() as u32;
    Ok(((raw << shift) as i64) >> shift)
}
