//! Group registry
//!
//! Name -> group lookup shared by the embedding application and the peer
//! server. Registering a name that already exists replaces the old group.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::group::{Getter, Group, GroupConfig};

/// Concurrent map of cache groups
#[derive(Debug, Default)]
pub struct GroupRegistry {
    groups: DashMap<String, Arc<Group>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a group with no load timeout
    pub fn new_group<G>(&self, name: &str, cache_bytes: i64, getter: G) -> Arc<Group>
    where
        G: Getter + 'static,
    {
        self.new_group_with(GroupConfig::new(name, cache_bytes), Arc::new(getter))
    }

    /// Create and register a group from a full config
    pub fn new_group_with(&self, config: GroupConfig, getter: Arc<dyn Getter>) -> Arc<Group> {
        let name = config.name.clone();
        let cache_bytes = config.cache_bytes;
        let group = Arc::new(Group::new(config, getter));

        if self.groups.insert(name.clone(), Arc::clone(&group)).is_some() {
            warn!(group = %name, "Replaced existing group");
        } else {
            info!(group = %name, cache_bytes, "Registered group");
        }
        group
    }

    pub fn get_group(&self, name: &str) -> Option<Arc<Group>> {
        self.groups.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Registered group names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// All registered groups, sorted by name
    pub fn groups(&self) -> Vec<Arc<Group>> {
        let mut groups: Vec<Arc<Group>> = self.groups.iter().map(|e| Arc::clone(e.value())).collect();
        groups.sort_by(|a, b| a.name().cmp(b.name()));
        groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
