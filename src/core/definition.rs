use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Directory under the input root that holds one subdirectory per item.
pub const DEFINITIONS_DIR: &str = "Definitions";
pub const DEFINITION_FILE_NAME: &str = "definition.json";

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("Definitions directory not found: {path}")]
    MissingDirectory { path: String },
}

/// One gallery item as authored on disk and as written to the manifest.
///
/// Fields this crate does not interpret are kept in `extra` and written back
/// verbatim, so the manifest stays readable by existing consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDefinition {
    /// Content identifier; also the archive entry key.
    #[serde(default)]
    pub md5: String,
    pub source: String,
    pub full: CropGeometry,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Set once tag enrichment has run for this item.
    #[serde(default)]
    pub requeried: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ItemDefinition {
    /// The content identifier, or `None` when it is empty or blank.
    pub fn identifier(&self) -> Option<&str> {
        let id = self.md5.trim();
        if id.is_empty() { None } else { Some(id) }
    }
}

/// Crop geometry for the "full" presentation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CropGeometry {
    #[serde(default)]
    pub offset: Offset,
    /// Output pixels per source pixel.
    #[serde(default = "default_scale")]
    pub scale: f64,
    pub final_size: Size,
    #[serde(default)]
    pub fit: FitMode,
}

fn default_scale() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offset {
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FitMode {
    /// Resize exactly to the target box.
    #[default]
    Stretch,
    /// Preserve aspect ratio inside the target box.
    Contain,
}

/// A definition together with the file it was read from.
#[derive(Debug, Clone)]
pub struct LoadedDefinition {
    pub definition: ItemDefinition,
    pub path: PathBuf,
}

/// Ordered, identifier-unique collection of item definitions.
#[derive(Debug, Default)]
pub struct DefinitionStore {
    entries: Vec<LoadedDefinition>,
}

impl DefinitionStore {
    /// Recursively load every `definition.json` under `<root>/Definitions`.
    ///
    /// Discovery order is file-name sorted. Unreadable or malformed files are
    /// logged and skipped, as are later definitions reusing an identifier.
    pub fn load(root: &Path) -> Result<Self, DefinitionError> {
        let dir = root.join(DEFINITIONS_DIR);
        if !dir.is_dir() {
            return Err(DefinitionError::MissingDirectory {
                path: dir.to_string_lossy().to_string(),
            });
        }

        let mut store = Self::default();
        let mut seen = HashSet::new();

        for entry in WalkDir::new(&dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
        {
            let path = entry.path();
            if !entry.file_type().is_file() || entry.file_name() != DEFINITION_FILE_NAME {
                continue;
            }

            let definition = match read_definition(path) {
                Ok(definition) => definition,
                Err(reason) => {
                    tracing::warn!(path = %path.display(), %reason, "skipping definition");
                    continue;
                }
            };

            if let Some(id) = definition.identifier() {
                if !seen.insert(id.to_string()) {
                    tracing::warn!(path = %path.display(), identifier = id, "duplicate identifier, skipping");
                    continue;
                }
            }

            store.entries.push(LoadedDefinition {
                definition,
                path: path.to_path_buf(),
            });
        }

        tracing::info!(count = store.entries.len(), dir = %dir.display(), "loaded definitions");
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LoadedDefinition] {
        &self.entries
    }

    /// Definitions in discovery order.
    pub fn definitions(&self) -> Vec<ItemDefinition> {
        self.entries.iter().map(|e| e.definition.clone()).collect()
    }

    /// Path of the file the definition with `identifier` was loaded from.
    pub fn path_of(&self, identifier: &str) -> Option<&Path> {
        self.entries
            .iter()
            .find(|e| e.definition.identifier() == Some(identifier))
            .map(|e| e.path.as_path())
    }
}

fn read_definition(path: &Path) -> Result<ItemDefinition, String> {
    let text = fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&text).map_err(|e| e.to_string())
}
