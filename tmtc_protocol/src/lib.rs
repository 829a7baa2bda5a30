// lib.rs: Shared TM/TC data model: entity descriptions, row codec, name lookup

pub mod codec;
pub mod entity;
pub mod error;
pub mod lookup;
pub mod model;
pub mod types;

pub use codec::{ParameterNames, Value, decode, decode_rows, encode, encode_rows};
pub use entity::{
    ActionDefinition, ActionInstance, ComponentGroup, ComponentGroupRecord, ComponentInstance,
    ComponentRecord, ComponentTree, Deployment, DeploymentInstance, Documentation, Element,
    EventDefinition, EventInstance, EventSourceDefinition, EventSourceInstance, ExceptionInstance,
    ParameterBlockInstance, ParameterInstance,
};
pub use error::{CodecError, ModelError};
pub use lookup::{NameTrie, Node, Resolution};
pub use model::{Entity, EntityModel, EntityRef, EntityTable};
pub use types::{
    Argument, ArgumentTypeClass, EntityKind, ParameterDefinition, ParameterSize, Severity,
    TypeClass, TypeStr,
};

// =============================== Common =====================================

/// Default period to wait for a response to a telecommand.
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;
/// Largest buffer a single uplink/downlink transfer may carry.
pub const MAX_TRANSFER_BYTES: usize = 16 * 1024;
pub const DEFAULT_UPLINK_RETRIES: u32 = 5;
pub const DEFAULT_DOWNLINK_RETRIES: u32 = 10;
/// Row ceiling of the synthesized definition used for parameter-block elements.
pub const BLOCK_ELEMENT_MAX_ROWS: u32 = 65535;
