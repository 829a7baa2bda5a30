use thiserror::Error;

use crate::types::{EntityKind, TypeStr};

/// Failures querying the spacecraft database.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("spacecraft database not loaded")]
    NotLoaded,
    #[error("no matching {kind} name found for '{name}'")]
    NotFound { kind: EntityKind, name: String },
    #[error("{kind} name '{name}' is ambiguous ({count} candidates)", count = .candidates.len())]
    Ambiguous {
        kind: EntityKind,
        name: String,
        candidates: Vec<u32>,
    },
    #[error("{kind} {id} not present in deployment")]
    UnknownId { kind: EntityKind, id: u32 },
    #[error("duplicate {kind} id {id}")]
    DuplicateId { kind: EntityKind, id: u32 },
    #[error("duplicate {kind} name '{name}'")]
    DuplicateName { kind: EntityKind, name: String },
    #[error("index {index} past the id range of parameter block '{block}'")]
    BlockIndex { block: String, index: u32 },
    #[error("invalid definition for {name}: {reason}")]
    InvalidDefinition { name: String, reason: String },
    #[error("component group {0} contains itself")]
    GroupCycle(u32),
    #[error("action '{action}' has no argument {argument}")]
    NoArgument { action: String, argument: String },
}

/// Failures converting between values and parameter rows.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("cannot convert {kind} to {type_str} type: {reason}")]
    Conversion {
        kind: &'static str,
        type_str: TypeStr,
        reason: String,
    },
    #[error("value {value} outside {type_str} {bits}-bit range")]
    Range {
        value: String,
        type_str: TypeStr,
        bits: u32,
    },
    #[error("{type_str} row length {actual} not in {min}..={max}")]
    Length {
        type_str: TypeStr,
        min: usize,
        max: usize,
        actual: usize,
    },
    #[error("cannot resolve parameter reference '{name}': {source}")]
    Reference {
        name: String,
        #[source]
        source: ModelError,
    },
    #[error("cannot decode {actual}-byte {type_str} row: {reason}")]
    Decode {
        type_str: TypeStr,
        actual: usize,
        reason: &'static str,
    },
}
