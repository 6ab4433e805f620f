pub mod config;
pub mod migrations;
pub mod state;
pub mod toggle;
pub mod traffic;

use std::path::Path;

use anyhow::Context;
use switchyard_state::StateStore;
use tracing::debug;

/// Open (creating if needed) the store under `data_dir`.
pub fn open_store(data_dir: &Path) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating data directory {}", data_dir.display()))?;
    let path = data_dir.join("switchyard.redb");
    debug!(path = %path.display(), "opening state store");
    StateStore::open(&path).with_context(|| format!("opening {}", path.display()))
}
