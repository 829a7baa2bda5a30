use serde::{Deserialize, Serialize};

use crate::types::{Argument, ParameterDefinition, Severity};

// ============================ Common attributes =============================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Documentation {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub html: String,
}

/// Attributes shared by every item in the spacecraft database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub id: u32,
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub documentation: Documentation,
    #[serde(default)]
    pub index: u32,
}

// ============================ Instances =====================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterInstance {
    #[serde(flatten)]
    pub element: Element,
    pub definition: ParameterDefinition,
}

/// The database holds no type information for the parameters inside a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterBlockInstance {
    #[serde(flatten)]
    pub element: Element,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDefinition {
    #[serde(default)]
    pub signature: String,
    /// At most one argument in the current protocol.
    #[serde(default)]
    pub arguments: Vec<Argument>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionInstance {
    #[serde(flatten)]
    pub element: Element,
    pub definition: ActionDefinition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDefinition {
    #[serde(default)]
    pub signature: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventInstance {
    #[serde(flatten)]
    pub element: Element,
    pub definition: EventDefinition,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSourceDefinition {
    #[serde(default)]
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSourceInstance {
    #[serde(flatten)]
    pub element: Element,
    #[serde(default)]
    pub definition: EventSourceDefinition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionInstance {
    #[serde(flatten)]
    pub element: Element,
}

// ===================== Component hierarchy (database form) ==================

/// Component as stored in the database: owned entities are referenced by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRecord {
    #[serde(flatten)]
    pub element: Element,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub actions: Vec<u32>,
    #[serde(default)]
    pub parameters: Vec<u32>,
    #[serde(default)]
    pub events: Vec<u32>,
    #[serde(default)]
    pub event_sources: Vec<u32>,
    #[serde(default)]
    pub exceptions: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentGroupRecord {
    #[serde(flatten)]
    pub element: Element,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub components: Vec<u32>,
    #[serde(default)]
    pub groups: Vec<u32>,
}

/// Top level of the deployment's component tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentTree {
    #[serde(default)]
    pub components: Vec<u32>,
    #[serde(default)]
    pub groups: Vec<u32>,
}

/// Everything the entity database collaborator hands over at session start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub documentation: Documentation,

    #[serde(default)]
    pub parameters: Vec<ParameterInstance>,
    #[serde(default)]
    pub parameter_blocks: Vec<ParameterBlockInstance>,
    #[serde(default)]
    pub actions: Vec<ActionInstance>,
    #[serde(default)]
    pub events: Vec<EventInstance>,
    #[serde(default)]
    pub event_sources: Vec<EventSourceInstance>,
    #[serde(default)]
    pub exceptions: Vec<ExceptionInstance>,
    #[serde(default)]
    pub components: Vec<ComponentRecord>,
    #[serde(default)]
    pub component_groups: Vec<ComponentGroupRecord>,
    #[serde(default)]
    pub tree: ComponentTree,
}

// ===================== Component hierarchy (assembled) ======================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentInstance {
    #[serde(flatten)]
    pub element: Element,
    pub signature: String,
    pub actions: Vec<ActionInstance>,
    pub parameters: Vec<ParameterInstance>,
    pub events: Vec<EventInstance>,
    pub event_sources: Vec<EventSourceInstance>,
    pub exceptions: Vec<ExceptionInstance>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentGroup {
    #[serde(flatten)]
    pub element: Element,
    pub signature: String,
    pub components: Vec<ComponentInstance>,
    pub component_groups: Vec<ComponentGroup>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentInstance {
    pub name: String,
    pub description: String,
    pub documentation: Documentation,
    pub components: Vec<ComponentInstance>,
    pub component_groups: Vec<ComponentGroup>,
}
