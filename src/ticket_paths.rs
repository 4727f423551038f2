//! Centralized home-based storage paths for all ticketflow persistence.
//!
//! Everything lives under `~/.ticketflow/` (overridable with
//! `TICKETFLOW_HOME`):
//! - `store/<repo-hash>/` — ticket records, checkpoints and inboxes
//! - `logs/<repo-hash>/`  — structured event logs
//! - `tracker/<repo-hash>/` — the file-backed tracker's records

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// The name of the ticketflow directory.
const TICKETFLOW_DIR: &str = ".ticketflow";

/// Returns the ticketflow home: `$TICKETFLOW_HOME` or `~/.ticketflow/`.
///
/// Creates the directory if it doesn't exist.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined or created.
pub fn ticketflow_home_dir() -> Result<PathBuf> {
    let base = match std::env::var_os("TICKETFLOW_HOME") {
        Some(dir) => PathBuf::from(dir),
        None => dirs::home_dir()
            .context("Could not determine home directory for ticket storage")?
            .join(TICKETFLOW_DIR),
    };
    fs::create_dir_all(&base)
        .with_context(|| format!("Failed to create ticketflow directory: {}", base.display()))?;
    Ok(base)
}

/// Short stable hash qualifying data dirs by repository path, so one home
/// serves many checkouts.
pub fn repo_hash(repo_dir: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(repo_dir.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    let hex = format!("{:x}", digest);
    hex.chars().take(12).collect()
}

/// Returns the store directory: `~/.ticketflow/store/<repo-hash>/`
pub fn store_dir(repo_dir: &Path) -> Result<PathBuf> {
    let dir = ticketflow_home_dir()?
        .join("store")
        .join(repo_hash(repo_dir));
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create store directory: {}", dir.display()))?;
    Ok(dir)
}

/// Returns the logs directory: `~/.ticketflow/logs/<repo-hash>/`
pub fn logs_dir(repo_dir: &Path) -> Result<PathBuf> {
    let dir = ticketflow_home_dir()?
        .join("logs")
        .join(repo_hash(repo_dir));
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create logs directory: {}", dir.display()))?;
    Ok(dir)
}

/// Returns the tracker directory: `~/.ticketflow/tracker/<repo-hash>/`
pub fn tracker_dir(repo_dir: &Path) -> Result<PathBuf> {
    let dir = ticketflow_home_dir()?
        .join("tracker")
        .join(repo_hash(repo_dir));
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create tracker directory: {}", dir.display()))?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn repo_hash_is_stable_and_short() {
        let a = repo_hash(Path::new("/work/project"));
        let b = repo_hash(Path::new("/work/project"));
        let c = repo_hash(Path::new("/work/other"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.chars().count(), 12);
    }

    #[test]
    #[serial]
    fn home_override_is_respected() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("TICKETFLOW_HOME", dir.path());
        let home = ticketflow_home_dir().unwrap();
        assert_eq!(home, dir.path());
        let store = store_dir(Path::new("/work/project")).unwrap();
        assert!(store.starts_with(dir.path()));
        std::env::remove_var("TICKETFLOW_HOME");
    }
}
