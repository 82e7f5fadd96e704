use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{debug, warn};

use crate::error::{LedgerError, Result};
use crate::ledger::{sort_chronologically, Item, ItemId, Version, VersionLedger};
use crate::media::{TIMELAPSE_PREFIX, UPLOAD_STAMP_FORMAT};

/// Read-only ledger derived from the media root layout
///
/// Expects `<root>/<group_id>/<item_id>/<file>`. Creation time comes from the
/// `YYYYmmddHHMMSS_` prefix written by [`MediaStore::store_upload`], falling
/// back to the file's modification time. Version ids are positions in
/// filename order, which keeps them stable while the directory only grows.
///
/// [`MediaStore::store_upload`]: crate::media::MediaStore::store_upload
#[derive(Debug, Clone)]
pub struct DirectoryLedger {
    root: PathBuf,
}

impl DirectoryLedger {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    fn numeric_dirs(dir: &Path) -> Result<Vec<u64>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(|n| n.parse().ok()) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn is_version_file(name: &str) -> bool {
        !name.starts_with('.') && !name.starts_with(TIMELAPSE_PREFIX)
    }

    fn created_at(name: &str, path: &Path) -> Result<DateTime<Utc>> {
        if let Some(stamp) = name.get(..14) {
            if name.as_bytes().get(14) == Some(&b'_') {
                if let Ok(naive) = NaiveDateTime::parse_from_str(stamp, UPLOAD_STAMP_FORMAT) {
                    return Ok(naive.and_utc());
                }
            }
        }

        debug!("No upload stamp on {}, using mtime", name);
        let modified = fs::metadata(path)?.modified()?;
        Ok(DateTime::<Utc>::from(modified))
    }
}

impl VersionLedger for DirectoryLedger {
    fn item(&self, item_id: ItemId) -> Result<Item> {
        let owners: Vec<u64> = Self::numeric_dirs(&self.root)?
            .into_iter()
            .filter(|group_id| self.root.join(group_id.to_string()).join(item_id.to_string()).is_dir())
            .collect();

        match owners.as_slice() {
            [] => Err(LedgerError::ItemNotFound { item_id }.into()),
            [group_id] => Ok(Item {
                id: item_id,
                group_id: *group_id,
                name: item_id.to_string(),
            }),
            _ => {
                warn!("Item {} appears under groups {:?}", item_id, owners);
                Err(LedgerError::Corrupt {
                    details: format!("item {} exists in {} groups", item_id, owners.len()),
                }
                .into())
            }
        }
    }

    fn list_versions(&self, item_id: ItemId) -> Result<Vec<Version>> {
        let item = self.item(item_id)?;
        let relative_dir = PathBuf::from(item.group_id.to_string()).join(item_id.to_string());
        let dir = self.root.join(&relative_dir);

        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if Self::is_version_file(&name) => names.push(name),
                Ok(_) => {}
                Err(raw) => warn!("Skipping non UTF-8 file name {:?}", raw),
            }
        }
        names.sort();

        let mut versions = Vec::with_capacity(names.len());
        for (index, name) in names.into_iter().enumerate() {
            let created_at = Self::created_at(&name, &dir.join(&name))?;
            versions.push(Version {
                id: index as u64 + 1,
                storage_path: relative_dir.join(&name),
                created_at,
            });
        }

        sort_chronologically(&mut versions);
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ArtfolioError;
    use tempfile::tempdir;

    #[test]
    fn test_versions_from_layout() {
        let root = tempdir().unwrap();
        let item_dir = root.path().join("3").join("8");
        fs::create_dir_all(&item_dir).unwrap();
        fs::write(item_dir.join("20240102030405_b.png"), b"b").unwrap();
        fs::write(item_dir.join("20240101000000_a.png"), b"a").unwrap();
        fs::write(item_dir.join("timelapse_20240103T000000.000000Z.mp4"), b"v").unwrap();
        fs::write(item_dir.join(".DS_Store"), b"").unwrap();

        let ledger = DirectoryLedger::new(root.path());
        let item = ledger.item(8).unwrap();
        assert_eq!(item.group_id, 3);

        let versions = ledger.list_versions(8).unwrap();
        let paths: Vec<_> = versions.iter().map(|v| v.storage_path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("3/8/20240101000000_a.png"),
                PathBuf::from("3/8/20240102030405_b.png"),
            ]
        );
        assert_eq!(versions[1].created_at.to_rfc3339(), "2024-01-02T03:04:05+00:00");
    }

    #[test]
    fn test_unknown_item() {
        let root = tempdir().unwrap();
        let ledger = DirectoryLedger::new(root.path());
        assert!(matches!(
            ledger.list_versions(1),
            Err(ArtfolioError::Ledger(LedgerError::ItemNotFound { item_id: 1 }))
        ));
    }

    #[test]
    fn test_missing_root_means_no_items() {
        let ledger = DirectoryLedger::new("/no/such/media/root");
        assert!(ledger.item(1).is_err());
    }

    #[test]
    fn test_item_in_two_groups_is_corrupt() {
        let root = tempdir().unwrap();
        fs::create_dir_all(root.path().join("1").join("5")).unwrap();
        fs::create_dir_all(root.path().join("2").join("5")).unwrap();

        let ledger = DirectoryLedger::new(root.path());
        assert!(matches!(
            ledger.item(5),
            Err(ArtfolioError::Ledger(LedgerError::Corrupt { .. }))
        ));
    }

    #[test]
    fn test_empty_item_dir_has_no_versions() {
        let root = tempdir().unwrap();
        fs::create_dir_all(root.path().join("1").join("2")).unwrap();

        let ledger = DirectoryLedger::new(root.path());
        assert!(ledger.list_versions(2).unwrap().is_empty());
    }
}
