//! Persisted run state
//!
//! The store holds a JSON snapshot of exactly one [`Plan`], written after
//! every step declaration and every step outcome. The file is the single
//! record of what has already happened on this host.
//!
//! # Atomicity
//!
//! A snapshot is serialized into a temporary file in the destination
//! directory, flushed to disk, then renamed over the previous snapshot, and
//! the directory entry is flushed too. A crash at any point leaves either
//! the old snapshot or the new one, never a truncated mix, and a returned
//! `save` survives power loss.

use crate::error::{PlanError, Result};
use crate::plan::Plan;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Directory under the target user's home that holds the snapshot
pub const STATE_DIR: &str = ".hostplan";

/// Snapshot file name inside [`STATE_DIR`]
pub const STATE_FILE: &str = "state.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the well-known location under `home`
    pub fn for_home(home: &Path) -> Self {
        Self::new(home.join(STATE_DIR).join(STATE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Replace the snapshot with `plan`
    pub fn save(&self, plan: &Plan) -> Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, plan)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| PlanError::Io(e.error))?;
        sync_dir(dir)?;

        tracing::trace!(path = %self.path.display(), steps = plan.len(), "state persisted");
        Ok(())
    }

    /// Read the snapshot back.
    ///
    /// # Errors
    ///
    /// - `NoPreviousRun` if no snapshot exists
    /// - `CorruptState` if it cannot be decoded
    pub fn load(&self) -> Result<Plan> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(PlanError::NoPreviousRun {
                    path: self.path.clone(),
                });
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                return Err(self.corrupt(e.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let plan: Plan = serde_json::from_str(&content).map_err(|e| self.corrupt(e.to_string()))?;
        tracing::debug!(
            path = %self.path.display(),
            plan = plan.name(),
            steps = plan.len(),
            "state loaded"
        );
        Ok(plan)
    }

    fn corrupt(&self, reason: String) -> PlanError {
        PlanError::CorruptState {
            path: self.path.clone(),
            reason,
        }
    }
}

/// Flush a directory so a rename inside it is durable
pub(crate) fn sync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Step;
    use crate::registry::CommandId;

    fn sample_plan() -> Plan {
        let mut plan = Plan::new("workstation", "dev box", "1").with_data_dir("/tmp/data");
        plan.push_step(Step::new(
            "Install editors".into(),
            CommandId::InstallPackages,
            vec!["vim emacs".into()],
        ));
        plan.push_step(Step::new(
            "Add docker group".into(),
            CommandId::AddGroup,
            vec!["docker".into()],
        ));
        plan
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(dir.path().join("nested").join("state.json"));

        let mut plan = sample_plan();
        plan.step_mut(0).expect("step").mark_completed();
        plan.step_mut(1).expect("step").mark_failed("groupadd exited with status 10".into(), 1);
        store.save(&plan).expect("save");

        let loaded = store.load().expect("load");
        assert_eq!(loaded, plan);
        assert_eq!(loaded.data_dir(), Some(Path::new("/tmp/data")));
    }

    #[test]
    fn test_missing_file_is_no_previous_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(dir.path().join("state.json"));
        assert!(!store.exists());
        assert!(matches!(store.load(), Err(PlanError::NoPreviousRun { .. })));
    }

    #[test]
    fn test_garbage_is_corrupt_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        fs::write(&path, "{\"name\": \"half").expect("write");

        let err = StateStore::new(&path).load().unwrap_err();
        assert!(matches!(err, PlanError::CorruptState { .. }));
    }

    #[test]
    fn test_unknown_command_in_state_is_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        fs::write(
            &path,
            r#"{"name":"p","version":"1","steps":[{"description":"x","command":"FormatDisk","params":[],"status":{"state":"pending"}}]}"#,
        )
        .expect("write");

        assert!(matches!(
            StateStore::new(&path).load(),
            Err(PlanError::CorruptState { .. })
        ));
    }

    #[test]
    fn test_save_replaces_whole_file_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(dir.path().join("state.json"));

        store.save(&sample_plan()).expect("first save");
        store.save(&Plan::new("smaller", "", "1")).expect("second save");

        let loaded = store.load().expect("load");
        assert_eq!(loaded.name(), "smaller");
        assert!(loaded.is_empty());

        let entries: Vec<_> = fs::read_dir(dir.path())
            .expect("read_dir")
            .map(|e| e.expect("entry").file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("state.json")]);
    }

    #[test]
    fn test_sync_dir_flushes_existing_directory_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        sync_dir(dir.path()).expect("sync");
        assert!(sync_dir(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_for_home_location() {
        let store = StateStore::for_home(Path::new("/home/ana"));
        assert_eq!(store.path(), Path::new("/home/ana/.hostplan/state.json"));
    }
}
