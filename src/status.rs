use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::sync::Mutex;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::{CaseRecord, CaseState, DocketNumber};
use crate::error::DocketError;
use crate::store::Store;

/// Full contents of the status file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocketStatus {
    #[serde(default)]
    pub term: Option<String>,
    #[serde(default)]
    pub cases: BTreeMap<DocketNumber, CaseRecord>,
}

impl DocketStatus {
    pub fn case(&self, docket: &DocketNumber) -> Option<&CaseRecord> {
        self.cases.get(docket)
    }

    pub fn case_mut(&mut self, docket: &DocketNumber) -> Option<&mut CaseRecord> {
        self.cases.get_mut(docket)
    }

    pub fn count_in(&self, state: CaseState) -> usize {
        self.cases
            .values()
            .filter(|record| record.state == state)
            .count()
    }
}

/// Load/save access to the status record. All updates are whole-file: load,
/// mutate one record, save. Callers hold [`crate::store::StoreLock`] while
/// doing so.
pub trait StatusStore {
    fn load(&self) -> Result<DocketStatus, DocketError>;
    fn save(&self, status: &DocketStatus) -> Result<(), DocketError>;

    /// Load, apply `f` to the record for `docket` if it is tracked, save.
    /// Returns whether the record existed.
    fn update_case<F>(&self, docket: &DocketNumber, f: F) -> Result<bool, DocketError>
    where
        F: FnOnce(&mut CaseRecord),
    {
        let mut status = self.load()?;
        let Some(record) = status.case_mut(docket) else {
            return Ok(false);
        };
        f(record);
        self.save(&status)?;
        Ok(true)
    }
}

#[derive(Debug, Clone)]
pub struct JsonStatusStore {
    path: Utf8PathBuf,
}

impl JsonStatusStore {
    pub fn new(store: &Store) -> Self {
        Self {
            path: store.status_path(),
        }
    }

    pub fn at(path: Utf8PathBuf) -> Self {
        Self { path }
    }
}

impl StatusStore for JsonStatusStore {
    fn load(&self) -> Result<DocketStatus, DocketError> {
        let content = match fs::read_to_string(self.path.as_std_path()) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(DocketStatus::default());
            }
            Err(err) => return Err(DocketError::Filesystem(err.to_string())),
        };
        serde_json::from_str(&content).map_err(|err| DocketError::Parse {
            what: "status file",
            message: format!("{}: {err}", self.path),
        })
    }

    fn save(&self, status: &DocketStatus) -> Result<(), DocketError> {
        Store::write_json_atomic(&self.path, status)
    }
}

/// In-memory store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    state: Mutex<DocketStatus>,
}

impl MemoryStatusStore {
    pub fn new(status: DocketStatus) -> Self {
        Self {
            state: Mutex::new(status),
        }
    }

    pub fn snapshot(&self) -> DocketStatus {
        self.state
            .lock()
            .map(|state| state.clone())
            .unwrap_or_default()
    }
}

impl StatusStore for MemoryStatusStore {
    fn load(&self) -> Result<DocketStatus, DocketError> {
        Ok(self.snapshot())
    }

    fn save(&self, status: &DocketStatus) -> Result<(), DocketError> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| DocketError::Filesystem("status store poisoned".to_string()))?;
        *guard = status.clone();
        Ok(())
    }
}
