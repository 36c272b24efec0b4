use crate::core::definition::ItemDefinition;
use std::collections::BTreeSet;
use std::io::{Cursor, Write};
use std::sync::Mutex;
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const MANIFEST_ENTRY: &str = "definitions.json";
pub const THUMBNAIL_EXTENSION: &str = "jpg";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Manifest serialization failed: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("Entry already exists: {name}")]
    DuplicateEntry { name: String },

    #[error("Entry name is reserved: {name}")]
    ReservedName { name: String },

    #[error("Archive lock poisoned by a panicked writer")]
    Poisoned,
}

/// Archive entry name for the thumbnail of `identifier`.
pub fn thumbnail_entry_name(identifier: &str) -> String {
    format!("{}.{}", identifier, THUMBNAIL_EXTENSION)
}

struct Staging {
    writer: ZipWriter<Cursor<Vec<u8>>>,
    entries: BTreeSet<String>,
    removed: BTreeSet<String>,
}

/// Owns the output zip for one gallery build.
///
/// `insert` is safe to call from many workers at once; writes are serialized
/// behind a mutex. `remove` and `finalize` need exclusive ownership, so they
/// can only run once every worker has dropped its handle. `finalize` consumes
/// the assembler, so the manifest is written exactly once.
pub struct ArchiveAssembler {
    staging: Mutex<Staging>,
}

impl ArchiveAssembler {
    pub fn new() -> Self {
        Self {
            staging: Mutex::new(Staging {
                writer: ZipWriter::new(Cursor::new(Vec::new())),
                entries: BTreeSet::new(),
                removed: BTreeSet::new(),
            }),
        }
    }

    /// Write a thumbnail entry. Thumbnails are already compressed, so they are stored.
    pub fn insert(&self, name: &str, bytes: &[u8]) -> Result<(), ArchiveError> {
        if name == MANIFEST_ENTRY {
            return Err(ArchiveError::ReservedName {
                name: name.to_string(),
            });
        }

        let mut staging = self.staging.lock().map_err(|_| ArchiveError::Poisoned)?;
        if staging.entries.contains(name) {
            return Err(ArchiveError::DuplicateEntry {
                name: name.to_string(),
            });
        }

        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        staging.writer.start_file(name, options)?;
        // Recorded before the payload so a failed write is still prunable.
        staging.entries.insert(name.to_string());
        staging.writer.write_all(bytes)?;
        Ok(())
    }

    /// Drop an entry from the sealed output. Unknown or already removed names
    /// are a no-op; returns whether anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let staging = match self.staging.get_mut() {
            Ok(staging) => staging,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !staging.entries.contains(name) {
            return false;
        }
        staging.removed.insert(name.to_string())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.staging
            .lock()
            .map(|s| s.entries.contains(name) && !s.removed.contains(name))
            .unwrap_or(false)
    }

    /// Names of all live entries, sorted.
    pub fn entry_names(&mut self) -> Vec<String> {
        let staging = match self.staging.get_mut() {
            Ok(staging) => staging,
            Err(poisoned) => poisoned.into_inner(),
        };
        staging.entries.difference(&staging.removed).cloned().collect()
    }

    /// Seal the archive: copy surviving entries, append the manifest with
    /// maximal compression, and return the finished zip bytes.
    pub fn finalize(self, manifest: &[ItemDefinition]) -> Result<Vec<u8>, ArchiveError> {
        let staging = self.staging.into_inner().map_err(|_| ArchiveError::Poisoned)?;
        let staged = staging.writer.finish()?.into_inner();

        let mut source = ZipArchive::new(Cursor::new(staged))?;
        let mut output = ZipWriter::new(Cursor::new(Vec::new()));

        for index in 0..source.len() {
            let entry = source.by_index_raw(index)?;
            if staging.removed.contains(entry.name()) {
                continue;
            }
            output.raw_copy_file(entry)?;
        }

        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(9));
        output.start_file(MANIFEST_ENTRY, options)?;
        serde_json::to_writer(&mut output, manifest)?;

        let bytes = output.finish()?.into_inner();
        tracing::info!(
            entries = staging.entries.len() - staging.removed.len(),
            manifest = manifest.len(),
            bytes = bytes.len(),
            "sealed archive"
        );
        Ok(bytes)
    }
}

impl Default for ArchiveAssembler {
    fn default() -> Self {
        Self::new()
    }
}
