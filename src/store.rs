use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use fs2::FileExt;
use serde::Serialize;
use tracing::debug;

use crate::error::DocketError;

pub const STATUS_FILE: &str = "docket_status.json";
pub const CASE_INFO_FILE: &str = "case_info.txt";
pub const CITATION_INDEX_FILE: &str = "_citation_index.json";

/// On-disk layout of the data directory:
///
/// ```text
/// data/
///   docket_status.json
///   opinions/<Case_Name>.txt
///   cases/<docket>/case_info.txt
///   cases/<docket>/briefs/*.pdf
///   cases/<docket>/transcript/*.pdf
///   cases/<docket>/<step artifacts>
/// ```
#[derive(Debug, Clone)]
pub struct Store {
    data_root: Utf8PathBuf,
}

impl Store {
    pub fn new(data_dir: &Utf8Path) -> Result<Self, DocketError> {
        if data_dir.is_absolute() {
            return Ok(Self::new_with_root(data_dir.to_path_buf()));
        }
        let cwd = std::env::current_dir().map_err(|err| DocketError::Filesystem(err.to_string()))?;
        let data_root = Utf8PathBuf::from_path_buf(cwd.join(data_dir.as_std_path()))
            .map_err(|_| DocketError::Filesystem("invalid data path".to_string()))?;
        Ok(Self { data_root })
    }

    pub fn new_with_root(data_root: Utf8PathBuf) -> Self {
        Self { data_root }
    }

    pub fn data_root(&self) -> &Utf8Path {
        &self.data_root
    }

    pub fn status_path(&self) -> Utf8PathBuf {
        self.data_root.join(STATUS_FILE)
    }

    pub fn cases_dir(&self) -> Utf8PathBuf {
        self.data_root.join("cases")
    }

    pub fn opinions_dir(&self) -> Utf8PathBuf {
        self.data_root.join("opinions")
    }

    pub fn case_dir(&self, directory: &str) -> Utf8PathBuf {
        self.cases_dir().join(directory)
    }

    pub fn ensure_case_dirs(&self, directory: &str) -> Result<Utf8PathBuf, DocketError> {
        let case_dir = self.case_dir(directory);
        for dir in [briefs_dir(&case_dir), transcript_dir(&case_dir)] {
            fs::create_dir_all(dir.as_std_path())
                .map_err(|err| DocketError::Filesystem(err.to_string()))?;
        }
        Ok(case_dir)
    }

    /// Takes the single-writer lock on the status file. Held until the guard
    /// is dropped.
    pub fn lock_exclusive(&self) -> Result<StoreLock, DocketError> {
        fs::create_dir_all(self.data_root.as_std_path())
            .map_err(|err| DocketError::Filesystem(err.to_string()))?;
        let lock_path = self.data_root.join(format!("{STATUS_FILE}.lock"));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path.as_std_path())
            .map_err(|err| DocketError::Filesystem(err.to_string()))?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                debug!(path = %lock_path, "acquired status lock");
                Ok(StoreLock {
                    _file: file,
                    path: lock_path,
                })
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                Err(DocketError::StoreLocked(lock_path.into_std_path_buf()))
            }
            Err(err) => Err(DocketError::Filesystem(err.to_string())),
        }
    }

    pub fn write_json_atomic<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), DocketError> {
        let content = serde_json::to_vec_pretty(value)
            .map_err(|err| DocketError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(path, &content)
    }

    /// Writes to a sibling temp file and renames it over `path`, so a crash
    /// mid-write leaves the previous file intact.
    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), DocketError> {
        let parent = path
            .parent()
            .ok_or_else(|| DocketError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| DocketError::Filesystem(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix(".docket-write")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| DocketError::Filesystem(err.to_string()))?;
        fs::write(temp.path(), content).map_err(|err| DocketError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| DocketError::Filesystem(err.to_string()))?;
        Ok(())
    }

    /// Moves a file, falling back to copy + remove across filesystems.
    pub fn move_file(source: &Path, dest: &Utf8Path) -> Result<(), DocketError> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| DocketError::Filesystem(err.to_string()))?;
        }
        if fs::rename(source, dest.as_std_path()).is_ok() {
            return Ok(());
        }
        fs::copy(source, dest.as_std_path())
            .map_err(|err| DocketError::Filesystem(err.to_string()))?;
        fs::remove_file(source).map_err(|err| DocketError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

/// Exclusive advisory lock on the status file; released on drop.
#[derive(Debug)]
pub struct StoreLock {
    _file: File,
    path: Utf8PathBuf,
}

impl StoreLock {
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        debug!(path = %self.path, "releasing status lock");
    }
}

pub fn briefs_dir(case_dir: &Utf8Path) -> Utf8PathBuf {
    case_dir.join("briefs")
}

pub fn transcript_dir(case_dir: &Utf8Path) -> Utf8PathBuf {
    case_dir.join("transcript")
}

pub fn case_info_path(case_dir: &Utf8Path) -> Utf8PathBuf {
    case_dir.join(CASE_INFO_FILE)
}

pub fn citation_index_path(case_dir: &Utf8Path) -> Utf8PathBuf {
    case_dir.join(CITATION_INDEX_FILE)
}

/// Files directly inside `dir` with extension `ext` (case-insensitive),
/// sorted by name. A missing directory yields an empty list.
pub fn files_with_ext(dir: &Utf8Path, ext: &str) -> Vec<Utf8PathBuf> {
    let Ok(entries) = fs::read_dir(dir.as_std_path()) else {
        return Vec::new();
    };
    let mut files = entries
        .flatten()
        .filter_map(|entry| Utf8PathBuf::from_path_buf(entry.path()).ok())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .map(|value| value.eq_ignore_ascii_case(ext))
                .unwrap_or(false)
        })
        .collect::<Vec<_>>();
    files.sort();
    files
}

pub fn has_pdf(dir: &Utf8Path) -> bool {
    !files_with_ext(dir, "pdf").is_empty()
}
