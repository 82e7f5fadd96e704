//! # Media Store
//!
//! Maps ledger storage paths onto the media root, stores incoming uploads
//! and hands out collision-free names for rendered videos.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::config::MediaConfig;
use crate::error::{MediaError, Result};
use crate::ledger::{GroupId, ItemId};

/// Filename prefix of rendered timelapse videos
pub const TIMELAPSE_PREFIX: &str = "timelapse_";

/// Timestamp prepended to uploaded files
pub const UPLOAD_STAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Compact ISO-8601 used in timelapse filenames, microsecond precision
const TIMELAPSE_STAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";

/// Where an upload ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUpload {
    /// Path relative to the media root, as recorded in the ledger
    pub storage_path: PathBuf,
    pub filename: String,
}

/// Filesystem view of the media root
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
    public_prefix: String,
}

impl MediaStore {
    pub fn new<P: Into<PathBuf>>(root: P, public_prefix: &str) -> Self {
        Self {
            root: root.into(),
            public_prefix: public_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &MediaConfig) -> Self {
        Self::new(config.root.clone(), &config.public_prefix)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding an item's versions and renders
    pub fn item_dir(&self, group_id: GroupId, item_id: ItemId) -> PathBuf {
        self.root.join(group_id.to_string()).join(item_id.to_string())
    }

    /// Resolve a ledger storage path under the media root
    ///
    /// Only plain relative paths are accepted.
    pub fn resolve<P: AsRef<Path>>(&self, storage_path: P) -> Result<PathBuf> {
        let storage_path = storage_path.as_ref();
        let plain = storage_path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));

        if !plain || storage_path.as_os_str().is_empty() {
            return Err(MediaError::InvalidPath {
                path: storage_path.display().to_string(),
            }
            .into());
        }

        Ok(self.root.join(storage_path))
    }

    /// Public reference of a file in an item directory
    pub fn public_url(&self, group_id: GroupId, item_id: ItemId, filename: &str) -> String {
        format!("{}/{}/{}/{}", self.public_prefix, group_id, item_id, filename)
    }

    /// Copy an incoming file into the item directory under a timestamped name
    ///
    /// The content is stored as-is; nothing is decoded or validated. Names
    /// with control characters are refused. When the timestamped name is
    /// already taken, `_2`, `_3`, ... is appended to the stem so an earlier
    /// version is never overwritten.
    pub fn store_upload(
        &self,
        group_id: GroupId,
        item_id: ItemId,
        source: &Path,
        original_name: &str,
        now: DateTime<Utc>,
    ) -> Result<StoredUpload> {
        let base = Path::new(original_name)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty() && !n.chars().any(char::is_control))
            .ok_or_else(|| MediaError::InvalidFilename { name: original_name.to_string() })?;

        let stamp = now.format(UPLOAD_STAMP_FORMAT).to_string();
        let dir = self.item_dir(group_id, item_id);
        fs::create_dir_all(&dir)?;

        let mut input = File::open(source)?;
        let mut attempt = 1u32;
        let (filename, mut target) = loop {
            let filename = upload_filename(&stamp, base, attempt);
            match OpenOptions::new().write(true).create_new(true).open(dir.join(&filename)) {
                Ok(file) => break (filename, file),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        };

        let bytes = io::copy(&mut input, &mut target)?;
        info!("Stored upload {} ({} bytes)", filename, bytes);

        Ok(StoredUpload {
            storage_path: PathBuf::from(group_id.to_string())
                .join(item_id.to_string())
                .join(&filename),
            filename,
        })
    }

    /// Reserve a fresh timelapse output path for an item
    ///
    /// The file is created empty with create-new semantics. On a name clash
    /// the timestamp moves forward one microsecond, so no two calls ever get
    /// the same path.
    pub fn reserve_output(
        &self,
        group_id: GroupId,
        item_id: ItemId,
        now: DateTime<Utc>,
    ) -> Result<(PathBuf, String)> {
        let dir = self.item_dir(group_id, item_id);
        fs::create_dir_all(&dir)?;
        let dir = fs::canonicalize(dir)?;

        let mut stamp = now;
        loop {
            let filename = timelapse_filename(stamp);
            let path = dir.join(&filename);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => {
                    debug!("Reserved output {}", path.display());
                    return Ok((path, filename));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    stamp += Duration::microseconds(1);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// `<stamp>_<name>`, with `_<attempt>` before the extension after the first try
fn upload_filename(stamp: &str, base: &str, attempt: u32) -> String {
    if attempt <= 1 {
        return format!("{}_{}", stamp, base);
    }

    let name = Path::new(base);
    let stem = name.file_stem().and_then(|s| s.to_str()).unwrap_or(base);
    match name.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}_{}_{}.{}", stamp, stem, attempt, ext),
        None => format!("{}_{}_{}", stamp, stem, attempt),
    }
}

/// `timelapse_<UTC compact ISO-8601>.mp4`
pub fn timelapse_filename(at: DateTime<Utc>) -> String {
    format!("{}{}.mp4", TIMELAPSE_PREFIX, at.format(TIMELAPSE_STAMP_FORMAT))
}
