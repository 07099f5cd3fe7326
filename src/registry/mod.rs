//! Server discovery: one server per subdirectory of the servers root, launched
//! from the first artifact found in it.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("cannot read servers directory {}: {source}", path.display())]
    Inaccessible {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDefinition {
    /// Directory name, unique within a scan
    pub name: String,
    pub artifact_path: PathBuf,
}

impl ServerDefinition {
    /// Directory the server is launched from.
    pub fn working_dir(&self) -> &Path {
        self.artifact_path.parent().unwrap_or_else(|| Path::new("."))
    }
}

/// Scan `root` for server directories.
///
/// Only `root` being unreadable is an error; subdirectories that can't be
/// listed or hold no artifact are left out.
pub fn scan(root: &Path, extension: &str) -> Result<BTreeMap<String, ServerDefinition>, RegistryError> {
    let entries = fs::read_dir(root).map_err(|source| RegistryError::Inaccessible {
        path: root.to_path_buf(),
        source,
    })?;

    let mut servers = BTreeMap::new();
    for entry in entries.flatten() {
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            tracing::warn!("Skipping server directory with non UTF-8 name: {}", dir.display());
            continue;
        };
        match first_artifact(&dir, extension) {
            Some(artifact_path) => {
                servers.insert(name.clone(), ServerDefinition { name, artifact_path });
            }
            None => tracing::debug!("No .{} artifact in {}, skipping", extension, dir.display()),
        }
    }
    Ok(servers)
}

/// First matching file in directory-listing order.
fn first_artifact(dir: &Path, extension: &str) -> Option<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Cannot list {}: {}", dir.display(), e);
            return None;
        }
    };
    entries
        .flatten()
        .map(|e| e.path())
        .find(|path| path.is_file() && has_extension(path, extension))
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}

/// Cached view over the last scan.
pub struct ServerRegistry {
    root: PathBuf,
    extension: String,
    cached: RwLock<BTreeMap<String, ServerDefinition>>,
}

impl ServerRegistry {
    pub fn new(root: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            root: root.into(),
            extension: extension.trim_start_matches('.').to_string(),
            cached: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the servers root if it does not exist yet.
    pub fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)
    }

    /// Rescan and replace the cache. On failure the previous cache is kept.
    pub fn refresh(&self) -> Result<Vec<ServerDefinition>, RegistryError> {
        let servers = scan(&self.root, &self.extension)?;
        tracing::info!("Found {} servers in {}", servers.len(), self.root.display());
        let list = servers.values().cloned().collect();
        *self.cached.write().unwrap_or_else(|p| p.into_inner()) = servers;
        Ok(list)
    }

    /// Definitions from the last scan, sorted by name.
    pub fn list(&self) -> Vec<ServerDefinition> {
        self.cached
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<ServerDefinition> {
        self.cached
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .cloned()
    }
}
