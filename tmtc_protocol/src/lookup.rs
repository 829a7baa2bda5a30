//! Suffix lookup for dotted entity names.
//!
//! Names are stored with their segments reversed, so any trailing part of a
//! full name (`obc.mode` for `platform.obc.mode`) walks the trie from the root.
//! A lookup resolves when the last matched node ends a stored name, or when
//! exactly one stored name ends below it.

use std::collections::BTreeMap;

use tracing::warn;

/// One name segment. `id` is set when a full name ends here; a shorter
/// name can end on a node that longer names pass through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    pub id: Option<u32>,
    pub children: BTreeMap<String, Node>,
}

impl Node {
    /// Ids ending at or below this node, this node's own first, then in key order.
    pub fn leaves(&self) -> Vec<u32> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect(&self, out: &mut Vec<u32>) {
        out.extend(self.id);
        self.children.values().for_each(|c| c.collect(out));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Unresolved,
    Resolved(u32),
    Ambiguous(Vec<u32>),
}

#[derive(Debug, Clone)]
pub struct NameTrie {
    root: Node,
    len: usize,
}

impl Default for NameTrie {
    fn default() -> Self {
        Self::new()
    }
}

impl NameTrie {
    pub fn new() -> Self {
        Self {
            root: Node::default(),
            len: 0,
        }
    }

    /// Build from `(full_name, id)` pairs.
    pub fn build<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, u32)>,
    {
        let mut trie = Self::new();
        for (name, id) in entries {
            trie.insert(name, id);
        }
        trie
    }

    /// Insert a full name. Returns false when the same name is already
    /// stored; the first id is kept.
    pub fn insert(&mut self, full_name: &str, id: u32) -> bool {
        if full_name.is_empty() {
            return false;
        }
        let mut node = &mut self.root;
        for seg in full_name.split('.').rev() {
            node = node.children.entry(seg.to_string()).or_default();
        }
        if let Some(existing) = node.id {
            warn!(name = full_name, id, existing, "duplicate name left out of the index");
            return false;
        }
        node.id = Some(id);
        self.len += 1;
        true
    }

    /// Resolve a full name or any dotted suffix of one. A query that ends
    /// exactly on a stored name resolves to it even when longer names share
    /// the suffix.
    pub fn resolve(&self, partial: &str) -> Resolution {
        if partial.is_empty() {
            return Resolution::Unresolved;
        }

        let mut node = &self.root;
        for seg in partial.split('.').rev() {
            match node.children.get(seg) {
                Some(child) => node = child,
                None => return Resolution::Unresolved,
            }
        }
        if let Some(id) = node.id {
            return Resolution::Resolved(id);
        }
        let ids = node.leaves();
        match ids.as_slice() {
            [] => Resolution::Unresolved,
            [id] => Resolution::Resolved(*id),
            _ => Resolution::Ambiguous(ids),
        }
    }

    /// Number of names stored.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
