//! CLI command implementations.

pub mod commits;
pub mod inspect;
pub mod verify;

use std::path::Path;
use std::sync::Arc;
use tessera_store::{Directory, FsDirectory};

/// Opens the index directory at `path` without creating it.
pub fn open_directory(path: &Path) -> Result<Arc<dyn Directory>, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No index directory at {}", path.display()).into());
    }
    Ok(Arc::new(FsDirectory::open(path)?))
}

/// Output format shared by the reporting commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}
