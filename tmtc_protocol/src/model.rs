//! Immutable, id-indexed view of a loaded deployment.

use std::collections::{HashMap, HashSet};
use std::fmt;

use tracing::{debug, info};

use crate::codec::ParameterNames;
use crate::entity::*;
use crate::error::ModelError;
use crate::lookup::{NameTrie, Resolution};
use crate::types::{Argument, EntityKind, ParameterDefinition};

// =============================== References =================================

/// An entity addressed either by numeric id or by a full or partial name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Id(u32),
    Name(String),
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Id(id) => write!(f, "#{id}"),
            EntityRef::Name(name) => f.write_str(name),
        }
    }
}

impl From<u32> for EntityRef {
    fn from(id: u32) -> Self {
        EntityRef::Id(id)
    }
}

impl From<&str> for EntityRef {
    fn from(name: &str) -> Self {
        EntityRef::Name(name.to_string())
    }
}

impl From<String> for EntityRef {
    fn from(name: String) -> Self {
        EntityRef::Name(name)
    }
}

impl From<&String> for EntityRef {
    fn from(name: &String) -> Self {
        EntityRef::Name(name.clone())
    }
}

/// Anything stored in an [`EntityTable`].
pub trait Entity {
    fn element(&self) -> &Element;
}

macro_rules! impl_entity {
    ($($t:ty),*) => {
        $(impl Entity for $t {
            fn element(&self) -> &Element {
                &self.element
            }
        })*
    };
}

impl_entity!(
    ParameterInstance,
    ParameterBlockInstance,
    ActionInstance,
    EventInstance,
    EventSourceInstance,
    ExceptionInstance,
    ComponentRecord,
    ComponentGroupRecord
);

// =============================== Tables =====================================

/// Entities of one kind, indexed by id, by exact full name and by name suffix.
#[derive(Debug, Clone)]
pub struct EntityTable<T> {
    kind: EntityKind,
    by_id: HashMap<u32, T>,
    by_name: HashMap<String, u32>,
    trie: NameTrie,
}

impl<T: Entity> EntityTable<T> {
    pub fn build(kind: EntityKind, items: Vec<T>) -> Result<Self, ModelError> {
        let mut by_id = HashMap::with_capacity(items.len());
        let mut by_name = HashMap::with_capacity(items.len());
        for item in items {
            let el = item.element();
            let (id, full_name) = (el.id, el.full_name.clone());
            if by_id.contains_key(&id) {
                return Err(ModelError::DuplicateId { kind, id });
            }
            if by_name.contains_key(&full_name) {
                return Err(ModelError::DuplicateName {
                    kind,
                    name: full_name,
                });
            }
            by_name.insert(full_name, id);
            by_id.insert(id, item);
        }

        // short names with a dot in them cannot be split into segments
        let trie = NameTrie::build(
            by_id
                .values()
                .map(Entity::element)
                .filter(|el| !el.name.contains('.'))
                .map(|el| (el.full_name.as_str(), el.id)),
        );
        debug!(%kind, entries = by_id.len(), indexed = trie.len(), "entity table built");

        Ok(Self {
            kind,
            by_id,
            by_name,
            trie,
        })
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Ids pass through untouched; names are matched exactly, then by suffix.
    pub fn resolve(&self, reference: &EntityRef) -> Result<u32, ModelError> {
        let name = match reference {
            EntityRef::Id(id) => return Ok(*id),
            EntityRef::Name(name) => name,
        };
        if let Some(id) = self.by_name.get(name) {
            return Ok(*id);
        }
        match self.trie.resolve(name) {
            Resolution::Resolved(id) => Ok(id),
            Resolution::Unresolved => Err(ModelError::NotFound {
                kind: self.kind,
                name: name.clone(),
            }),
            Resolution::Ambiguous(candidates) => Err(ModelError::Ambiguous {
                kind: self.kind,
                name: name.clone(),
                candidates,
            }),
        }
    }

    /// Full name of the entity with this id.
    pub fn identify(&self, id: u32) -> Result<&str, ModelError> {
        self.get(id)
            .map(|item| item.element().full_name.as_str())
            .ok_or(ModelError::UnknownId {
                kind: self.kind,
                id,
            })
    }

    pub fn lookup(&self, reference: &EntityRef) -> Result<&T, ModelError> {
        let id = self.resolve(reference)?;
        self.get(id).ok_or(ModelError::UnknownId {
            kind: self.kind,
            id,
        })
    }

    pub fn get(&self, id: u32) -> Option<&T> {
        self.by_id.get(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Entities in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.by_id.values()
    }

    /// Full names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    fn collect(&self, ids: &[u32]) -> Result<Vec<T>, ModelError>
    where
        T: Clone,
    {
        ids.iter()
            .map(|&id| {
                self.get(id).cloned().ok_or(ModelError::UnknownId {
                    kind: self.kind,
                    id,
                })
            })
            .collect()
    }

    fn check_refs(&self, ids: &[u32]) -> Result<(), ModelError> {
        match ids.iter().find(|id| !self.contains(**id)) {
            Some(&id) => Err(ModelError::UnknownId {
                kind: self.kind,
                id,
            }),
            None => Ok(()),
        }
    }
}

// =============================== Model ======================================

#[derive(Debug, Clone)]
pub struct EntityModel {
    name: String,
    description: String,
    documentation: Documentation,
    pub parameters: EntityTable<ParameterInstance>,
    pub parameter_blocks: EntityTable<ParameterBlockInstance>,
    pub actions: EntityTable<ActionInstance>,
    pub events: EntityTable<EventInstance>,
    pub event_sources: EntityTable<EventSourceInstance>,
    pub exceptions: EntityTable<ExceptionInstance>,
    pub components: EntityTable<ComponentRecord>,
    pub component_groups: EntityTable<ComponentGroupRecord>,
    tree: ComponentTree,
}

impl EntityModel {
    /// Validate a deployment record and index it.
    pub fn load(deployment: Deployment) -> Result<Self, ModelError> {
        for p in &deployment.parameters {
            p.definition
                .validate()
                .map_err(|reason| ModelError::InvalidDefinition {
                    name: p.element.full_name.clone(),
                    reason,
                })?;
        }
        for a in &deployment.actions {
            if a.definition.arguments.len() > 1 {
                return Err(ModelError::InvalidDefinition {
                    name: a.element.full_name.clone(),
                    reason: format!("{} arguments, at most one supported", a.definition.arguments.len()),
                });
            }
        }

        let model = Self {
            name: deployment.name,
            description: deployment.description,
            documentation: deployment.documentation,
            parameters: EntityTable::build(EntityKind::Parameter, deployment.parameters)?,
            parameter_blocks: EntityTable::build(
                EntityKind::ParameterBlock,
                deployment.parameter_blocks,
            )?,
            actions: EntityTable::build(EntityKind::Action, deployment.actions)?,
            events: EntityTable::build(EntityKind::Event, deployment.events)?,
            event_sources: EntityTable::build(EntityKind::EventSource, deployment.event_sources)?,
            exceptions: EntityTable::build(EntityKind::Exception, deployment.exceptions)?,
            components: EntityTable::build(EntityKind::Component, deployment.components)?,
            component_groups: EntityTable::build(
                EntityKind::ComponentGroup,
                deployment.component_groups,
            )?,
            tree: deployment.tree,
        };
        model.check_tree()?;

        info!(
            deployment = %model.name,
            parameters = model.parameters.len(),
            parameter_blocks = model.parameter_blocks.len(),
            actions = model.actions.len(),
            events = model.events.len(),
            event_sources = model.event_sources.len(),
            exceptions = model.exceptions.len(),
            components = model.components.len(),
            component_groups = model.component_groups.len(),
            "entity model loaded"
        );
        Ok(model)
    }

    fn check_tree(&self) -> Result<(), ModelError> {
        for c in self.components.by_id.values() {
            self.actions.check_refs(&c.actions)?;
            self.parameters.check_refs(&c.parameters)?;
            self.events.check_refs(&c.events)?;
            self.event_sources.check_refs(&c.event_sources)?;
            self.exceptions.check_refs(&c.exceptions)?;
        }
        for g in self.component_groups.by_id.values() {
            self.components.check_refs(&g.components)?;
            self.component_groups.check_refs(&g.groups)?;
        }
        self.components.check_refs(&self.tree.components)?;
        self.component_groups.check_refs(&self.tree.groups)?;

        let mut done = HashSet::new();
        for &id in self.component_groups.by_id.keys() {
            self.visit_group(id, &mut Vec::new(), &mut done)?;
        }
        Ok(())
    }

    fn visit_group(
        &self,
        id: u32,
        path: &mut Vec<u32>,
        done: &mut HashSet<u32>,
    ) -> Result<(), ModelError> {
        if done.contains(&id) {
            return Ok(());
        }
        if path.contains(&id) {
            return Err(ModelError::GroupCycle(id));
        }
        path.push(id);
        if let Some(group) = self.component_groups.get(id) {
            for &child in &group.groups {
                self.visit_group(child, path, done)?;
            }
        }
        path.pop();
        done.insert(id);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_len(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Parameter => self.parameters.len(),
            EntityKind::ParameterBlock => self.parameter_blocks.len(),
            EntityKind::Action => self.actions.len(),
            EntityKind::Event => self.events.len(),
            EntityKind::EventSource => self.event_sources.len(),
            EntityKind::Exception => self.exceptions.len(),
            EntityKind::Component => self.components.len(),
            EntityKind::ComponentGroup => self.component_groups.len(),
        }
    }

    pub fn resolve(&self, kind: EntityKind, reference: &EntityRef) -> Result<u32, ModelError> {
        match kind {
            EntityKind::Parameter => self.parameters.resolve(reference),
            EntityKind::ParameterBlock => self.parameter_blocks.resolve(reference),
            EntityKind::Action => self.actions.resolve(reference),
            EntityKind::Event => self.events.resolve(reference),
            EntityKind::EventSource => self.event_sources.resolve(reference),
            EntityKind::Exception => self.exceptions.resolve(reference),
            EntityKind::Component => self.components.resolve(reference),
            EntityKind::ComponentGroup => self.component_groups.resolve(reference),
        }
    }

    pub fn identify(&self, kind: EntityKind, id: u32) -> Result<&str, ModelError> {
        match kind {
            EntityKind::Parameter => self.parameters.identify(id),
            EntityKind::ParameterBlock => self.parameter_blocks.identify(id),
            EntityKind::Action => self.actions.identify(id),
            EntityKind::Event => self.events.identify(id),
            EntityKind::EventSource => self.event_sources.identify(id),
            EntityKind::Exception => self.exceptions.identify(id),
            EntityKind::Component => self.components.identify(id),
            EntityKind::ComponentGroup => self.component_groups.identify(id),
        }
    }

    /// Sorted full names of every entity of `kind`.
    pub fn names(&self, kind: EntityKind) -> Vec<&str> {
        match kind {
            EntityKind::Parameter => self.parameters.names(),
            EntityKind::ParameterBlock => self.parameter_blocks.names(),
            EntityKind::Action => self.actions.names(),
            EntityKind::Event => self.events.names(),
            EntityKind::EventSource => self.event_sources.names(),
            EntityKind::Exception => self.exceptions.names(),
            EntityKind::Component => self.components.names(),
            EntityKind::ComponentGroup => self.component_groups.names(),
        }
    }

    // ---------------------------- Instances --------------------------------

    pub fn parameter_instance(&self, r: &EntityRef) -> Result<&ParameterInstance, ModelError> {
        self.parameters.lookup(r)
    }

    pub fn parameter_block_instance(
        &self,
        r: &EntityRef,
    ) -> Result<&ParameterBlockInstance, ModelError> {
        self.parameter_blocks.lookup(r)
    }

    /// A stand-in instance for the parameter at `index` inside a block.
    pub fn parameter_instance_for_parameter_block(
        &self,
        block: &EntityRef,
        index: u32,
    ) -> Result<ParameterInstance, ModelError> {
        let block = self.parameter_blocks.lookup(block)?;
        let el = &block.element;
        let id = el.id.checked_add(index).ok_or_else(|| ModelError::BlockIndex {
            block: el.full_name.clone(),
            index,
        })?;
        Ok(ParameterInstance {
            element: Element {
                id,
                name: format!("{}{index}", el.name),
                full_name: format!("{}{index}", el.full_name),
                description: format!("A parameter from the {} parameter block", el.full_name),
                documentation: el.documentation.clone(),
                index,
            },
            definition: ParameterDefinition::block_element(),
        })
    }

    pub fn action_instance(&self, r: &EntityRef) -> Result<&ActionInstance, ModelError> {
        self.actions.lookup(r)
    }

    /// Argument of an action, by position (`EntityRef::Id`) or by name.
    pub fn argument(&self, action: &EntityRef, argument: &EntityRef) -> Result<&Argument, ModelError> {
        let action = self.actions.lookup(action)?;
        let args = &action.definition.arguments;
        let found = match argument {
            EntityRef::Id(index) => args.get(*index as usize),
            EntityRef::Name(name) => args
                .iter()
                .find(|a| a.element.name == *name || a.element.full_name == *name),
        };
        found.ok_or_else(|| ModelError::NoArgument {
            action: action.element.full_name.clone(),
            argument: argument.to_string(),
        })
    }

    pub fn event_instance(&self, r: &EntityRef) -> Result<&EventInstance, ModelError> {
        self.events.lookup(r)
    }

    pub fn event_source_instance(&self, r: &EntityRef) -> Result<&EventSourceInstance, ModelError> {
        self.event_sources.lookup(r)
    }

    pub fn onboard_exception(&self, r: &EntityRef) -> Result<&ExceptionInstance, ModelError> {
        self.exceptions.lookup(r)
    }

    // ---------------------------- Hierarchy --------------------------------

    /// A component with the entities it owns embedded.
    pub fn component_instance(&self, r: &EntityRef) -> Result<ComponentInstance, ModelError> {
        let record = self.components.lookup(r)?;
        self.assemble_component(record)
    }

    fn assemble_component(&self, record: &ComponentRecord) -> Result<ComponentInstance, ModelError> {
        Ok(ComponentInstance {
            element: record.element.clone(),
            signature: record.signature.clone(),
            actions: self.actions.collect(&record.actions)?,
            parameters: self.parameters.collect(&record.parameters)?,
            events: self.events.collect(&record.events)?,
            event_sources: self.event_sources.collect(&record.event_sources)?,
            exceptions: self.exceptions.collect(&record.exceptions)?,
        })
    }

    /// A component group with member components and sub-groups expanded.
    pub fn component_group(&self, r: &EntityRef) -> Result<ComponentGroup, ModelError> {
        let record = self.component_groups.lookup(r)?;
        self.assemble_group(record)
    }

    fn assemble_group(&self, record: &ComponentGroupRecord) -> Result<ComponentGroup, ModelError> {
        let components = self
            .components
            .collect(&record.components)?
            .iter()
            .map(|c| self.assemble_component(c))
            .collect::<Result<_, _>>()?;
        let component_groups = self
            .component_groups
            .collect(&record.groups)?
            .iter()
            .map(|g| self.assemble_group(g))
            .collect::<Result<_, _>>()?;
        Ok(ComponentGroup {
            element: record.element.clone(),
            signature: record.signature.clone(),
            components,
            component_groups,
        })
    }

    /// The whole deployment tree.
    pub fn deployment(&self) -> Result<DeploymentInstance, ModelError> {
        let components = self
            .components
            .collect(&self.tree.components)?
            .iter()
            .map(|c| self.assemble_component(c))
            .collect::<Result<_, _>>()?;
        let component_groups = self
            .component_groups
            .collect(&self.tree.groups)?
            .iter()
            .map(|g| self.assemble_group(g))
            .collect::<Result<_, _>>()?;
        Ok(DeploymentInstance {
            name: self.name.clone(),
            description: self.description.clone(),
            documentation: self.documentation.clone(),
            components,
            component_groups,
        })
    }
}

impl ParameterNames for EntityModel {
    fn parameter_id(&self, name: &str) -> Result<u32, ModelError> {
        self.parameters.resolve(&EntityRef::Name(name.to_string()))
    }

    fn parameter_name(&self, id: u32) -> Option<&str> {
        self.parameters.identify(id).ok()
    }
}
