//! # Version Ledger
//!
//! Records of groups, items and their version histories. The render
//! pipeline only reads from a ledger; it never updates or deletes rows.

pub mod directory;
pub mod memory;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use directory::DirectoryLedger;
pub use memory::MemoryLedger;

pub type GroupId = u64;
pub type ItemId = u64;
pub type VersionId = u64;

/// A named collection of items
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
}

/// A creative work belonging to a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub group_id: GroupId,
    pub name: String,
}

/// One stored binary artifact of an item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub id: VersionId,

    /// Path relative to the media root
    pub storage_path: PathBuf,

    pub created_at: DateTime<Utc>,
}

impl Version {
    /// File name component of the storage path
    pub fn filename(&self) -> Option<&str> {
        self.storage_path.file_name().and_then(|name| name.to_str())
    }
}

/// Read access to version histories
pub trait VersionLedger: Send + Sync {
    /// Look up an item, failing with `ItemNotFound` for unknown ids
    fn item(&self, item_id: ItemId) -> Result<Item>;

    /// Versions of an item, ascending by creation time then id
    fn list_versions(&self, item_id: ItemId) -> Result<Vec<Version>>;
}

/// Order versions chronologically, breaking ties by id
pub fn sort_chronologically(versions: &mut [Version]) {
    versions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}
