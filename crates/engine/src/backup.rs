//! Backup and restore
//!
//! A backup is a consistent checkpoint of the database directory plus a
//! manifest `{created_at, triple_count, schema_version}` protected by a
//! CRC. Restore validates the manifest shape, version and CRC before
//! copying anything, and the restored store re-counts its triples
//! against the manifest.

use crate::store::validate_path;
use serde::{Deserialize, Serialize};
use std::path::Path;
use triad_core::{Error, Result};

/// Backup format version.
pub const BACKUP_SCHEMA_VERSION: u32 = 1;

/// Name of the checkpointed database directory inside a backup.
pub const DATA_DIR: &str = "data";

/// Name of the manifest file inside a backup.
pub const MANIFEST_FILE: &str = "manifest.json";

/// The backup manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// RFC 3339 creation timestamp
    pub created_at: String,
    /// Triples in the store at backup time
    pub triple_count: u64,
    /// Backup format version
    pub schema_version: u32,
    /// CRC32 over `created_at`, `triple_count` and `schema_version`
    pub crc: u32,
}

impl Manifest {
    /// Build a manifest for the current store state.
    pub fn new(triple_count: u64) -> Manifest {
        let created_at = chrono::Utc::now().to_rfc3339();
        let crc = Self::checksum(&created_at, triple_count, BACKUP_SCHEMA_VERSION);
        Manifest {
            created_at,
            triple_count,
            schema_version: BACKUP_SCHEMA_VERSION,
            crc,
        }
    }

    fn checksum(created_at: &str, triple_count: u64, schema_version: u32) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(created_at.as_bytes());
        hasher.update(&triple_count.to_be_bytes());
        hasher.update(&schema_version.to_be_bytes());
        hasher.finalize()
    }

    /// Verify the version and CRC.
    pub fn verify(&self) -> Result<()> {
        if self.schema_version != BACKUP_SCHEMA_VERSION {
            return Err(Error::verification_failed(format!(
                "backup schema version {} unsupported",
                self.schema_version
            )));
        }
        let expected = Self::checksum(&self.created_at, self.triple_count, self.schema_version);
        if expected != self.crc {
            return Err(Error::verification_failed("backup manifest CRC mismatch"));
        }
        Ok(())
    }

    /// Write the manifest into a backup directory.
    pub fn write(&self, backup_dir: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| Error::internal(format!("manifest encode: {e}")))?;
        std::fs::write(backup_dir.join(MANIFEST_FILE), bytes)?;
        Ok(())
    }

    /// Read and verify the manifest of a backup directory.
    pub fn read(backup_dir: &Path, root: Option<&Path>) -> Result<Manifest> {
        validate_path(backup_dir, root)?;
        let path = backup_dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Err(Error::not_found(format!(
                "backup manifest {}",
                path.display()
            )));
        }
        let bytes = std::fs::read(&path)?;
        let manifest: Manifest = serde_json::from_slice(&bytes)
            .map_err(|e| Error::verification_failed(format!("backup manifest malformed: {e}")))?;
        manifest.verify()?;
        Ok(manifest)
    }
}

/// Recursively copy a directory tree.
pub fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
