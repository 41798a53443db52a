//! Persistence for finished run records, one pretty-printed JSON file each.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Error, Result};
use crate::record::RunRecord;

/// Writes run records into a directory, one file per run.
///
/// File names carry the puzzle id, a wall-clock timestamp, and a run-id
/// prefix, so repeated runs of the same puzzle never collide.
pub struct RunStore {
    dir: PathBuf,
}

impl RunStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| Error::Storage(format!("creating {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    /// Persist a record and return the path it was written to.
    pub fn save(&self, record: &RunRecord) -> Result<PathBuf> {
        let timestamp = record.started_at.format("%Y%m%d_%H%M%S");
        let id_hex = record.run_id.simple().to_string();
        let short_id = &id_hex[..8];
        let path = self.dir.join(format!(
            "run_{}_{timestamp}_{short_id}.json",
            sanitize(&record.puzzle.id)
        ));

        let json = serde_json::to_string_pretty(record)?;
        fs::write(&path, json)
            .map_err(|e| Error::Storage(format!("writing {}: {e}", path.display())))?;
        info!(path = %path.display(), "run record saved");
        Ok(path)
    }

    /// Read a previously saved record back.
    pub fn load(&self, path: &Path) -> Result<RunRecord> {
        let json = fs::read_to_string(path)
            .map_err(|e| Error::Storage(format!("reading {}: {e}", path.display())))?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Keep puzzle ids filesystem-safe.
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Puzzle, RunStatus};
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn test_save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = RunStore::new(dir.path()).unwrap();

        let mut record = RunRecord::new(Puzzle::new("party-8", "eight people at a table"));
        record.status = RunStatus::Failed;

        let path = store.save(&record).unwrap();
        assert!(path.exists());
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("run_party-8_"));
        assert!(name.ends_with(".json"));

        let back = store.load(&path).unwrap();
        assert_eq!(back.run_id, record.run_id);
        assert_eq!(back.puzzle.id, "party-8");
        assert_eq!(back.status, RunStatus::Failed);
    }

    #[test]
    fn test_puzzle_id_is_sanitized_in_file_name() {
        let dir = tempdir().unwrap();
        let store = RunStore::new(dir.path()).unwrap();

        let record = RunRecord::new(Puzzle::new("a/b c", "..."));
        let path = store.save(&record).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("run_a_b_c_"));
    }

    #[test]
    fn test_nested_store_directory_is_created() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("runs").join("2026");
        let store = RunStore::new(&nested).unwrap();

        let record = RunRecord::new(Puzzle::new("p1", "..."));
        assert!(store.save(&record).is_ok());
        assert!(nested.is_dir());
    }
}
