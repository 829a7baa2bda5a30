use serde::{Deserialize, Serialize};
use std::fmt;

use crate::BLOCK_ELEMENT_MAX_ROWS;

// =============================== Enums ======================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Parameter,
    ParameterBlock,
    Action,
    Event,
    EventSource,
    Exception,
    Component,
    ComponentGroup,
}

impl EntityKind {
    pub const ALL: [EntityKind; 8] = [
        EntityKind::Parameter,
        EntityKind::ParameterBlock,
        EntityKind::Action,
        EntityKind::Event,
        EntityKind::EventSource,
        EntityKind::Exception,
        EntityKind::Component,
        EntityKind::ComponentGroup,
    ];

    pub fn label(self) -> &'static str {
        match self {
            EntityKind::Parameter => "parameter",
            EntityKind::ParameterBlock => "parameter block",
            EntityKind::Action => "action",
            EntityKind::Event => "event",
            EntityKind::EventSource => "event source",
            EntityKind::Exception => "exception",
            EntityKind::Component => "component",
            EntityKind::ComponentGroup => "component group",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How the bytes of a single row are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeStr {
    Unsigned,
    Signed,
    Float,
    #[serde(rename = "parameterref")]
    ParameterRef,
    Bitfield,
    Raw,
    Varaw,
}

impl TypeStr {
    pub fn as_str(self) -> &'static str {
        match self {
            TypeStr::Unsigned => "unsigned",
            TypeStr::Signed => "signed",
            TypeStr::Float => "float",
            TypeStr::ParameterRef => "parameterref",
            TypeStr::Bitfield => "bitfield",
            TypeStr::Raw => "raw",
            TypeStr::Varaw => "varaw",
        }
    }
}

impl fmt::Display for TypeStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of a parameter: a single value, a raw block, or a vector of rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeClass {
    Value,
    FixedRaw,
    VarRaw,
    FixedVector,
    VarVector,
}

impl TypeClass {
    pub fn is_vector(self) -> bool {
        matches!(self, TypeClass::FixedVector | TypeClass::VarVector)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TypeClass::Value => "value",
            TypeClass::FixedRaw => "fixed_raw",
            TypeClass::VarRaw => "var_raw",
            TypeClass::FixedVector => "fixed_vector",
            TypeClass::VarVector => "var_vector",
        }
    }
}

impl fmt::Display for TypeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgumentTypeClass {
    Fixed,
    Variable,
}

/// Event severity, packed into the top two bits of a 16-bit event id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info = 0,
    Error = 1,
    ComponentFatal = 2,
    SystemFatal = 3,
}

impl Severity {
    pub const MASK: u16 = 0xC000;
    const SHIFT: u16 = 14;

    /// Severity encoded in the top two bits of `raw`.
    pub fn from_bits(raw: u16) -> Self {
        match (raw & Self::MASK) >> Self::SHIFT {
            0 => Severity::Info,
            1 => Severity::Error,
            2 => Severity::ComponentFatal,
            _ => Severity::SystemFatal,
        }
    }

    /// Split a raw event id into the bare id and its severity.
    pub fn split_event_id(raw: u16) -> (u16, Severity) {
        (raw & !Self::MASK, Self::from_bits(raw))
    }

    pub fn mask(self) -> u16 {
        (self as u16) << Self::SHIFT
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Error => "error",
            Severity::ComponentFatal => "component_fatal",
            Severity::SystemFatal => "system_fatal",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ======================== Parameter type description ========================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    #[serde(default)]
    pub signature: String,
    pub type_str: TypeStr,
    pub type_class: TypeClass,

    // Row bounds
    pub min_rows: u32,
    pub max_rows: u32,

    // Row layout
    pub bits_per_row: u32,
    pub bytes_per_row: u32,
    #[serde(default)]
    pub storage_bytes_per_row: u32,
    #[serde(default)]
    pub unused_bits_per_row: u32,

    #[serde(default)]
    pub is_raw: bool,
    #[serde(default)]
    pub is_fixed_size: bool,
    #[serde(default)]
    pub is_read_only: bool,
    #[serde(default)]
    pub is_config: bool,
}

impl ParameterDefinition {
    /// Checks the layout invariants every definition loaded from a database must hold.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_rows > self.max_rows {
            return Err(format!(
                "min_rows {} greater than max_rows {}",
                self.min_rows, self.max_rows
            ));
        }
        if self.bytes_per_row != self.bits_per_row.div_ceil(8) {
            return Err(format!(
                "{} bits per row does not fit {} bytes per row",
                self.bits_per_row, self.bytes_per_row
            ));
        }
        if self.type_str == TypeStr::Float && !matches!(self.bytes_per_row, 4 | 8) {
            return Err(format!("float rows of {} bytes", self.bytes_per_row));
        }
        Ok(())
    }

    /// Parameter blocks carry no type data, so their elements are treated as raw byte vectors.
    pub fn block_element() -> Self {
        Self {
            signature: String::new(),
            type_str: TypeStr::Raw,
            type_class: TypeClass::VarVector,
            min_rows: 1,
            max_rows: BLOCK_ELEMENT_MAX_ROWS,
            bits_per_row: 8,
            bytes_per_row: 1,
            storage_bytes_per_row: 1,
            unused_bits_per_row: 0,
            is_raw: true,
            is_fixed_size: false,
            is_read_only: false,
            is_config: false,
        }
    }

    /// Raw definition used to encode an action argument.
    ///
    /// The row bounds carry the argument's byte-length bounds, so a variable
    /// argument accepts any length in `min_bytes..=max_bytes`.
    pub fn for_argument(argument: &Argument) -> Self {
        let type_class = if argument.is_fixed_size {
            TypeClass::FixedRaw
        } else {
            TypeClass::VarRaw
        };
        Self {
            signature: argument.signature.clone(),
            type_str: TypeStr::Raw,
            type_class,
            min_rows: argument.min_bytes,
            max_rows: argument.max_bytes,
            bits_per_row: 8 * argument.min_bytes,
            bytes_per_row: argument.min_bytes,
            storage_bytes_per_row: 1,
            unused_bits_per_row: 0,
            is_raw: true,
            is_fixed_size: argument.is_fixed_size,
            is_read_only: false,
            is_config: false,
        }
    }
}

/// Dimensions of a parameter instance as reported by the onboard software.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSize {
    /// overall size in bytes
    pub size: u32,
    /// number of rows
    pub length: u32,
}

/// Description of an argument to an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argument {
    #[serde(flatten)]
    pub element: crate::entity::Element,
    #[serde(default)]
    pub signature: String,
    pub min_bytes: u32,
    pub max_bytes: u32,
    pub type_class: ArgumentTypeClass,
    pub is_fixed_size: bool,
}
