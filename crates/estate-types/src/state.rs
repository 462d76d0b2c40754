use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::reference::EntityReference;
use crate::temporal::Timestamp;
use crate::version::Version;

/// Persisted representation of one entity at one point in time.
///
/// A state is a full snapshot: every write replaces the whole stored record,
/// never a subset of its fields. Maps are ordered so that serialization is
/// deterministic.
///
/// Property and association names are qualified names chosen by the
/// consuming layer; this crate does not interpret them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityState {
    /// Identity the state is stored under.
    pub identity: EntityReference,
    /// Declared entity type name. Routing metadata only, not a schema.
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Concurrency token assigned by the store layer.
    pub version: Version,
    /// Time of the last successful write.
    #[serde(default = "Timestamp::epoch")]
    pub last_modified: Timestamp,
    /// Property name to serialized value. Nested objects are allowed.
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    /// Single-valued associations; `None` is an unset association.
    #[serde(default)]
    pub associations: BTreeMap<String, Option<EntityReference>>,
    /// Ordered multi-valued associations.
    #[serde(default)]
    pub many_associations: BTreeMap<String, Vec<EntityReference>>,
    /// Keyed associations.
    #[serde(default)]
    pub named_associations: BTreeMap<String, BTreeMap<String, EntityReference>>,
}

impl EntityState {
    /// An empty state at the initial version.
    pub fn new(identity: EntityReference, entity_type: impl Into<String>) -> Self {
        Self {
            identity,
            entity_type: entity_type.into(),
            version: Version::initial(),
            last_modified: Timestamp::epoch(),
            properties: BTreeMap::new(),
            associations: BTreeMap::new(),
            many_associations: BTreeMap::new(),
            named_associations: BTreeMap::new(),
        }
    }

    // ---- Builders ----

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_property(name, value);
        self
    }

    pub fn with_association(mut self, name: impl Into<String>, target: Option<EntityReference>) -> Self {
        self.set_association(name, target);
        self
    }

    pub fn with_many_association(
        mut self,
        name: impl Into<String>,
        targets: impl IntoIterator<Item = EntityReference>,
    ) -> Self {
        self.many_associations
            .insert(name.into(), targets.into_iter().collect());
        self
    }

    pub fn with_named_association(
        mut self,
        name: impl Into<String>,
        key: impl Into<String>,
        target: EntityReference,
    ) -> Self {
        self.put_named_association(name, key, target);
        self
    }

    // ---- Properties ----

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Set a property, returning the previous value.
    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.properties.insert(name.into(), value.into())
    }

    pub fn remove_property(&mut self, name: &str) -> Option<Value> {
        self.properties.remove(name)
    }

    // ---- Associations ----

    /// The target of a single-valued association, if declared and set.
    pub fn association(&self, name: &str) -> Option<&EntityReference> {
        self.associations.get(name).and_then(Option::as_ref)
    }

    pub fn set_association(&mut self, name: impl Into<String>, target: Option<EntityReference>) {
        self.associations.insert(name.into(), target);
    }

    pub fn many_association(&self, name: &str) -> &[EntityReference] {
        self.many_associations
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Insert `target` at `index` (clamped to the end) unless it is already
    /// present. Returns `true` if the association changed.
    pub fn add_many_association(
        &mut self,
        name: impl Into<String>,
        index: usize,
        target: EntityReference,
    ) -> bool {
        let targets = self.many_associations.entry(name.into()).or_default();
        if targets.contains(&target) {
            return false;
        }
        let index = index.min(targets.len());
        targets.insert(index, target);
        true
    }

    /// Remove `target`. Returns `true` if it was present.
    pub fn remove_many_association(&mut self, name: &str, target: &EntityReference) -> bool {
        match self.many_associations.get_mut(name) {
            Some(targets) => {
                let before = targets.len();
                targets.retain(|t| t != target);
                targets.len() != before
            }
            None => false,
        }
    }

    pub fn named_association(&self, name: &str, key: &str) -> Option<&EntityReference> {
        self.named_associations.get(name).and_then(|m| m.get(key))
    }

    /// Put `key -> target`, returning the previous target for that key.
    pub fn put_named_association(
        &mut self,
        name: impl Into<String>,
        key: impl Into<String>,
        target: EntityReference,
    ) -> Option<EntityReference> {
        self.named_associations
            .entry(name.into())
            .or_default()
            .insert(key.into(), target)
    }

    pub fn remove_named_association(&mut self, name: &str, key: &str) -> Option<EntityReference> {
        self.named_associations.get_mut(name)?.remove(key)
    }

    /// Every entity this state points at, across all association kinds,
    /// in name order.
    pub fn referenced_entities(&self) -> impl Iterator<Item = &EntityReference> {
        let single = self.associations.values().filter_map(Option::as_ref);
        let many = self.many_associations.values().flatten();
        let named = self.named_associations.values().flat_map(|m| m.values());
        single.chain(many).chain(named)
    }

    /// Copy of this state carrying a new version and modification time.
    pub fn stamped(&self, version: Version, last_modified: Timestamp) -> Self {
        Self {
            version,
            last_modified,
            ..self.clone()
        }
    }
}
