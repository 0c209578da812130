//! CLI configuration loading.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use osmium_core::{FilePlaybookStore, OsmiumConfig};

/// Load and validate configuration.
///
/// Configuration precedence:
/// 1. CLI arguments (`--data-dir`)
/// 2. Explicit `--config` file
/// 3. Local config file (./osmium.toml)
/// 4. Global config file (~/.osmium/config.toml)
/// 5. Defaults
pub fn load_config(path: Option<&Path>, data_dir: Option<PathBuf>) -> Result<OsmiumConfig> {
    let mut config = match path {
        Some(path) => OsmiumConfig::load_from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => OsmiumConfig::discover_and_load().context("Failed to load configuration")?,
    };

    if let Some(data_dir) = data_dir {
        config.playbook.data_dir = data_dir;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Open the file-backed playbook store under the configured data directory.
pub fn open_store(config: &OsmiumConfig) -> Result<FilePlaybookStore> {
    let dir = &config.playbook.data_dir;
    FilePlaybookStore::open(dir)
        .with_context(|| format!("Failed to open playbook store at {}", dir.display()))
}
