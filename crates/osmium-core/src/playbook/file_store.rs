//! File-backed playbook store.
//!
//! Layout under the data directory:
//!
//! ```text
//! <dir>/playbook.json          latest version
//! <dir>/versions/v000001.json  every published version
//! ```
//!
//! Every file is written to a temp file in the same directory and renamed into
//! place, so readers never observe a half-written document.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::error::{PlaybookError, Result};
use super::store::{PlaybookStore, next_snapshot};
use super::types::{Playbook, PlaybookDraft};

const CURRENT_FILE: &str = "playbook.json";
const VERSIONS_DIR: &str = "versions";

/// Playbook store persisting one JSON document per version.
#[derive(Debug)]
pub struct FilePlaybookStore {
    root: PathBuf,
    current: Mutex<Option<Arc<Playbook>>>,
}

impl FilePlaybookStore {
    /// Opens (or creates) a store rooted at `dir`.
    ///
    /// # Errors
    /// Returns error if the directory cannot be created or the current
    /// document is unreadable or invalid.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let root = dir.as_ref().to_path_buf();
        fs::create_dir_all(root.join(VERSIONS_DIR))?;

        let current_path = root.join(CURRENT_FILE);
        let current = if current_path.exists() {
            let playbook = Self::read_document(&current_path)?;
            debug!(version = playbook.version(), path = %current_path.display(), "Loaded playbook");
            Some(Arc::new(playbook))
        } else {
            None
        };

        Ok(Self { root, current: Mutex::new(current) })
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn version_path(&self, version: u64) -> PathBuf {
        self.root.join(VERSIONS_DIR).join(format!("v{:06}.json", version))
    }

    fn read_document(path: &Path) -> Result<Playbook> {
        let content = fs::read_to_string(path)?;
        let playbook: Playbook = serde_json::from_str(&content)?;
        playbook.validate()?;
        Ok(playbook)
    }

    fn write_atomic(&self, path: &Path, playbook: &Playbook) -> Result<()> {
        let dir = path.parent().unwrap_or(&self.root);
        let mut tmp = NamedTempFile::new_in(dir)?;
        let json = serde_json::to_string_pretty(playbook)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| PlaybookError::Io(e.error))?;
        Ok(())
    }
}

impl PlaybookStore for FilePlaybookStore {
    fn load(&self) -> Result<Arc<Playbook>> {
        let current = self.current.lock().expect("Playbook store lock poisoned");
        current.clone().ok_or(PlaybookError::NotFound)
    }

    fn load_version(&self, version: u64) -> Result<Arc<Playbook>> {
        if let Some(current) = self.current.lock().expect("Playbook store lock poisoned").as_ref() {
            if current.version() == version {
                return Ok(Arc::clone(current));
            }
        }

        let path = self.version_path(version);
        if !path.exists() {
            return Err(PlaybookError::VersionMissing(version));
        }
        Ok(Arc::new(Self::read_document(&path)?))
    }

    fn versions(&self) -> Result<Vec<u64>> {
        let mut versions: Vec<u64> = fs::read_dir(self.root.join(VERSIONS_DIR))?
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                name.strip_prefix('v')?.strip_suffix(".json")?.parse().ok()
            })
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }

    fn publish(&self, draft: PlaybookDraft) -> Result<Arc<Playbook>> {
        let mut current = self.current.lock().expect("Playbook store lock poisoned");
        let next = next_snapshot(current.as_deref(), draft)?;

        self.write_atomic(&self.version_path(next.version()), &next)?;
        self.write_atomic(&self.root.join(CURRENT_FILE), &next)?;

        info!(
            version = next.version(),
            items = next.len(),
            path = %self.root.display(),
            "Published playbook"
        );

        let next = Arc::new(next);
        *current = Some(Arc::clone(&next));
        Ok(next)
    }
}
