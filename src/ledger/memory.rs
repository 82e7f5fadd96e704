use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{LedgerError, Result};
use crate::ledger::{
    sort_chronologically, Group, GroupId, Item, ItemId, Version, VersionId, VersionLedger,
};

#[derive(Debug, Default)]
struct Tables {
    groups: BTreeMap<GroupId, Group>,
    items: BTreeMap<ItemId, Item>,
    versions: BTreeMap<VersionId, (ItemId, Version)>,
    next_id: u64,
}

impl Tables {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-process ledger holding groups, items and versions
///
/// Identifiers are allocated from a single counter, so they are unique
/// across all three tables. Deleting a group cascades to its items, and
/// deleting an item cascades to its versions.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    tables: RwLock<Tables>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create a group; names are unique
    pub fn create_group(&self, name: &str) -> Result<Group> {
        let mut tables = self.write();
        if tables.groups.values().any(|g| g.name == name) {
            return Err(LedgerError::DuplicateGroup { name: name.to_string() }.into());
        }

        let group = Group { id: tables.allocate(), name: name.to_string() };
        tables.groups.insert(group.id, group.clone());
        debug!("Created group {} ({})", group.id, group.name);
        Ok(group)
    }

    /// All groups in creation order
    pub fn groups(&self) -> Vec<Group> {
        self.read().groups.values().cloned().collect()
    }

    /// Create an item inside an existing group
    pub fn create_item(&self, group_id: GroupId, name: &str) -> Result<Item> {
        let mut tables = self.write();
        if !tables.groups.contains_key(&group_id) {
            return Err(LedgerError::GroupNotFound { group_id }.into());
        }

        let item = Item { id: tables.allocate(), group_id, name: name.to_string() };
        tables.items.insert(item.id, item.clone());
        debug!("Created item {} in group {}", item.id, group_id);
        Ok(item)
    }

    /// Items of a group in creation order
    pub fn items_in_group(&self, group_id: GroupId) -> Result<Vec<Item>> {
        let tables = self.read();
        if !tables.groups.contains_key(&group_id) {
            return Err(LedgerError::GroupNotFound { group_id }.into());
        }

        Ok(tables.items.values().filter(|i| i.group_id == group_id).cloned().collect())
    }

    /// Register a stored file as a new version of an item
    pub fn add_version(
        &self,
        item_id: ItemId,
        storage_path: impl Into<PathBuf>,
        created_at: DateTime<Utc>,
    ) -> Result<Version> {
        let mut tables = self.write();
        if !tables.items.contains_key(&item_id) {
            return Err(LedgerError::ItemNotFound { item_id }.into());
        }

        let version = Version {
            id: tables.allocate(),
            storage_path: storage_path.into(),
            created_at,
        };
        tables.versions.insert(version.id, (item_id, version.clone()));
        Ok(version)
    }

    /// Versions newest first, the order used for display listings
    pub fn recent_versions(&self, item_id: ItemId) -> Result<Vec<Version>> {
        let mut versions = self.list_versions(item_id)?;
        versions.reverse();
        Ok(versions)
    }

    /// Delete a group together with its items and their versions
    pub fn delete_group(&self, group_id: GroupId) -> Result<()> {
        let mut tables = self.write();
        if tables.groups.remove(&group_id).is_none() {
            return Err(LedgerError::GroupNotFound { group_id }.into());
        }

        let doomed: Vec<ItemId> = tables
            .items
            .values()
            .filter(|i| i.group_id == group_id)
            .map(|i| i.id)
            .collect();
        for item_id in &doomed {
            tables.items.remove(item_id);
        }
        tables.versions.retain(|_, (owner, _)| !doomed.contains(owner));
        Ok(())
    }

    /// Delete an item together with its versions
    pub fn delete_item(&self, item_id: ItemId) -> Result<()> {
        let mut tables = self.write();
        if tables.items.remove(&item_id).is_none() {
            return Err(LedgerError::ItemNotFound { item_id }.into());
        }
        tables.versions.retain(|_, (owner, _)| *owner != item_id);
        Ok(())
    }
}

impl VersionLedger for MemoryLedger {
    fn item(&self, item_id: ItemId) -> Result<Item> {
        self.read()
            .items
            .get(&item_id)
            .cloned()
            .ok_or_else(|| LedgerError::ItemNotFound { item_id }.into())
    }

    fn list_versions(&self, item_id: ItemId) -> Result<Vec<Version>> {
        let tables = self.read();
        if !tables.items.contains_key(&item_id) {
            return Err(LedgerError::ItemNotFound { item_id }.into());
        }

        let mut versions: Vec<Version> = tables
            .versions
            .values()
            .filter(|(owner, _)| *owner == item_id)
            .map(|(_, version)| version.clone())
            .collect();
        sort_chronologically(&mut versions);
        Ok(versions)
    }
}
