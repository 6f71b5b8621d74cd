//! Message group registry contract.
//!
//! The index does not own message groups; it enumerates whatever the
//! registry reports. This module defines the contract plus the group kinds
//! a deployment can declare in a definitions file:
//!
//! - [`StaticGroup`] - a fixed key list
//! - [`AggregateGroup`] - a meta group whose keys are its members' keys
//!
//! # Definitions file
//!
//! ```toml
//! [[group]]
//! id = "core"
//! namespace = 8
//! keys = ["Mainpage", "Edit"]
//!
//! [[aggregate]]
//! id = "all"
//! namespace = 8
//! members = ["core"]
//! ```

use crate::core::error::IndexResult;
use crate::index::key::GroupId;
use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// A message group as seen by the index.
pub trait MessageGroup: Send + Sync {
    /// Group identifier.
    fn id(&self) -> &GroupId;

    /// Namespace the group's keys live in.
    fn namespace(&self) -> i32;

    /// Whether the group's source actually exists. Registered groups whose
    /// source is gone are skipped by rebuilds.
    fn exists(&self) -> bool {
        true
    }

    /// Whether the group derives its keys from other groups.
    fn is_meta(&self) -> bool {
        false
    }

    /// Raw (un-normalized) message keys.
    fn keys(&self) -> IndexResult<Vec<String>>;
}

/// Source of all registered groups, in enumeration order.
pub trait GroupRegistry: Send + Sync {
    /// Every registered group.
    fn groups(&self) -> Vec<Arc<dyn MessageGroup>>;
}

/// Group with a fixed key list.
#[derive(Debug, Clone)]
pub struct StaticGroup {
    id: GroupId,
    namespace: i32,
    keys: Vec<String>,
    exists: bool,
}

impl StaticGroup {
    /// Create an existing group.
    pub fn new<I, S>(id: impl Into<GroupId>, namespace: i32, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            namespace,
            keys: keys.into_iter().map(Into::into).collect(),
            exists: true,
        }
    }

    /// Create a registered group whose source no longer exists.
    pub fn missing(id: impl Into<GroupId>, namespace: i32) -> Self {
        Self {
            id: id.into(),
            namespace,
            keys: Vec::new(),
            exists: false,
        }
    }
}

impl MessageGroup for StaticGroup {
    fn id(&self) -> &GroupId {
        &self.id
    }

    fn namespace(&self) -> i32 {
        self.namespace
    }

    fn exists(&self) -> bool {
        self.exists
    }

    fn keys(&self) -> IndexResult<Vec<String>> {
        Ok(self.keys.clone())
    }
}

/// Meta group whose keys are the union of its members' keys.
pub struct AggregateGroup {
    id: GroupId,
    namespace: i32,
    members: Vec<Arc<dyn MessageGroup>>,
}

impl AggregateGroup {
    /// Create an aggregate over `members`.
    pub fn new(id: impl Into<GroupId>, namespace: i32, members: Vec<Arc<dyn MessageGroup>>) -> Self {
        Self {
            id: id.into(),
            namespace,
            members,
        }
    }

    /// Member groups.
    pub fn members(&self) -> &[Arc<dyn MessageGroup>] {
        &self.members
    }
}

impl MessageGroup for AggregateGroup {
    fn id(&self) -> &GroupId {
        &self.id
    }

    fn namespace(&self) -> i32 {
        self.namespace
    }

    fn is_meta(&self) -> bool {
        true
    }

    fn keys(&self) -> IndexResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for member in self.members.iter().filter(|m| m.exists()) {
            for key in member.keys()? {
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }
}

/// Registry holding groups in registration order.
#[derive(Default)]
pub struct StaticRegistry {
    groups: RwLock<Vec<Arc<dyn MessageGroup>>>,
}

impl StaticRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry from groups in enumeration order.
    pub fn with_groups(groups: Vec<Arc<dyn MessageGroup>>) -> Self {
        Self {
            groups: RwLock::new(groups),
        }
    }

    /// Append a group.
    pub fn register(&self, group: Arc<dyn MessageGroup>) {
        self.groups.write().push(group);
    }

    /// Remove a group by id. Returns true if it was registered.
    pub fn unregister(&self, id: &GroupId) -> bool {
        let mut groups = self.groups.write();
        let before = groups.len();
        groups.retain(|g| g.id() != id);
        groups.len() != before
    }

    /// Number of registered groups.
    pub fn len(&self) -> usize {
        self.groups.read().len()
    }

    /// Check if no group is registered.
    pub fn is_empty(&self) -> bool {
        self.groups.read().is_empty()
    }

    /// Load groups from a TOML definitions file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read group definitions: {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("invalid group definitions: {}", path.display()))
    }

    /// Load groups from TOML definitions.
    pub fn from_toml(content: &str) -> Result<Self> {
        let defs: GroupDefinitions =
            toml::from_str(content).context("failed to parse group definitions")?;
        defs.into_registry()
    }
}

impl GroupRegistry for StaticRegistry {
    fn groups(&self) -> Vec<Arc<dyn MessageGroup>> {
        self.groups.read().clone()
    }
}

/// Declared group set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupDefinitions {
    /// Plain groups.
    #[serde(default, rename = "group")]
    pub groups: Vec<GroupDefinition>,

    /// Aggregate (meta) groups.
    #[serde(default, rename = "aggregate")]
    pub aggregates: Vec<AggregateDefinition>,
}

/// Plain group declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupDefinition {
    pub id: String,
    pub namespace: i32,
    #[serde(default)]
    pub keys: Vec<String>,
    /// Set to false to keep a group registered while its source is gone.
    #[serde(default = "default_exists")]
    pub exists: bool,
}

/// Aggregate group declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateDefinition {
    pub id: String,
    pub namespace: i32,
    pub members: Vec<String>,
}

fn default_exists() -> bool {
    true
}

impl GroupDefinitions {
    /// Build a registry: plain groups first, then aggregates, each in
    /// declaration order.
    pub fn into_registry(self) -> Result<StaticRegistry> {
        let mut by_id: HashMap<String, Arc<dyn MessageGroup>> = HashMap::new();
        let mut ordered: Vec<Arc<dyn MessageGroup>> = Vec::new();

        for def in self.groups {
            if by_id.contains_key(&def.id) {
                anyhow::bail!("group '{}' is declared twice", def.id);
            }
            let group: Arc<dyn MessageGroup> = if def.exists {
                Arc::new(StaticGroup::new(def.id.as_str(), def.namespace, def.keys))
            } else {
                Arc::new(StaticGroup::missing(def.id.as_str(), def.namespace))
            };
            by_id.insert(def.id, Arc::clone(&group));
            ordered.push(group);
        }

        for def in self.aggregates {
            if by_id.contains_key(&def.id) {
                anyhow::bail!("group '{}' is declared twice", def.id);
            }
            let mut members = Vec::with_capacity(def.members.len());
            for member in &def.members {
                let group = by_id.get(member).with_context(|| {
                    format!("aggregate '{}' references unknown group '{}'", def.id, member)
                })?;
                members.push(Arc::clone(group));
            }
            let group: Arc<dyn MessageGroup> =
                Arc::new(AggregateGroup::new(def.id.as_str(), def.namespace, members));
            by_id.insert(def.id, Arc::clone(&group));
            ordered.push(group);
        }

        Ok(StaticRegistry::with_groups(ordered))
    }
}
