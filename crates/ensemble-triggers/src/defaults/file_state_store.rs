//! File-system backed state store.
//!
//! Layout:
//! ```text
//! {trigger_dir}/running.json    sorted array of running trigger keys
//! {trigger_dir}/submitted.json  ensemble → trigger → workflow names
//! {trigger_dir}/triggers.json   trigger key → start arguments
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::StateStoreError;
use crate::traits::StateStore;
use crate::types::{StartPatternIntervalTrigger, SubmittedWorkflows, TriggerKey};

const RUNNING_FILE: &str = "running.json";
const SUBMITTED_FILE: &str = "submitted.json";
const DEFINITIONS_FILE: &str = "triggers.json";

/// JSON snapshot files in a single directory.
///
/// Atomic writes use a temp-file-then-rename pattern so a crash mid-write
/// leaves the previous snapshot intact.
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Create a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StateStoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| StateStoreError::Io {
            context: format!("create {}", dir.display()),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn running_path(&self) -> PathBuf {
        self.dir.join(RUNNING_FILE)
    }

    pub fn submitted_path(&self) -> PathBuf {
        self.dir.join(SUBMITTED_FILE)
    }

    pub fn definitions_path(&self) -> PathBuf {
        self.dir.join(DEFINITIONS_FILE)
    }
}

/// Atomic write: serialize to temp file, then rename over the target.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StateStoreError> {
    let data = serde_json::to_vec_pretty(value).map_err(|source| StateStoreError::Serialize {
        context: path.display().to_string(),
        source,
    })?;
    let temp_path = path.with_extension("json.tmp");
    std::fs::write(&temp_path, &data).map_err(|source| StateStoreError::Io {
        context: format!("write {}", temp_path.display()),
        source,
    })?;
    std::fs::rename(&temp_path, path).map_err(|source| StateStoreError::Io {
        context: format!("rename {}", temp_path.display()),
        source,
    })
}

fn read_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T, StateStoreError> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(source) => {
            return Err(StateStoreError::Io {
                context: format!("read {}", path.display()),
                source,
            })
        }
    };
    serde_json::from_slice(&data).map_err(|source| StateStoreError::Serialize {
        context: path.display().to_string(),
        source,
    })
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load_running(&self) -> Result<BTreeSet<TriggerKey>, StateStoreError> {
        read_json(&self.running_path())
    }

    async fn save_running(&self, running: &BTreeSet<TriggerKey>) -> Result<(), StateStoreError> {
        write_json(&self.running_path(), running)
    }

    async fn load_submitted(&self) -> Result<SubmittedWorkflows, StateStoreError> {
        read_json(&self.submitted_path())
    }

    async fn save_submitted(&self, submitted: &SubmittedWorkflows) -> Result<(), StateStoreError> {
        write_json(&self.submitted_path(), submitted)
    }

    async fn load_definitions(
        &self,
    ) -> Result<BTreeMap<TriggerKey, StartPatternIntervalTrigger>, StateStoreError> {
        read_json(&self.definitions_path())
    }

    async fn save_definitions(
        &self,
        definitions: &BTreeMap<TriggerKey, StartPatternIntervalTrigger>,
    ) -> Result<(), StateStoreError> {
        write_json(&self.definitions_path(), definitions)
    }
}
