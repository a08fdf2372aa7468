//! Append-only run record store.
//!
//! ## Layout
//!
//! ```text
//! <root>/
//!   data-10Mbps-50ms-0-60s/
//!     v1@0.json
//!     v1@1.json
//!     feature%2Ffast@0.json
//!   data-1Mbps-200ms-0.05-30s/
//!     ...
//! ```
//!
//! One pretty-printed JSON [`RunRecord`] per file, grouped into one dataset
//! directory per profile. Revision identifiers are percent-escaped so any
//! identifier maps to a single file name.
//!
//! Records are written to a dot-prefixed temp file, synced, and then linked
//! into place, so a reader sees either the whole record or nothing. An
//! existing record is never replaced.

use crate::error::StoreError;
use bench_types::{CellKey, NetworkConditionProfile, RunRecord};
use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const RECORD_EXTENSION: &str = "json";

/// A file the loader could not use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadIssue {
    /// Offending file.
    pub path: PathBuf,
    /// What is wrong with it.
    pub problem: String,
}

impl fmt::Display for LoadIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.problem)
    }
}

/// Records read from the store plus every file that was skipped.
#[derive(Debug, Clone, Default)]
pub struct LoadedRecords {
    /// Valid records, ordered by cell key.
    pub records: Vec<RunRecord>,
    /// Files skipped because they could not be read or did not match.
    pub issues: Vec<LoadIssue>,
}

/// File-per-record store rooted at a results directory.
#[derive(Debug, Clone)]
pub struct RunStore {
    root: PathBuf,
}

impl RunStore {
    /// Open a store. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Results directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Dataset directory of a profile.
    pub fn dataset_dir(&self, profile: &NetworkConditionProfile) -> PathBuf {
        self.root.join(profile.dataset_dir_name())
    }

    /// File holding the record of a cell.
    pub fn record_path(&self, key: &CellKey) -> PathBuf {
        self.dataset_dir(&key.profile).join(record_file_name(&key.revision, key.repetition))
    }

    /// True if a record for this cell exists.
    pub fn contains(&self, key: &CellKey) -> bool {
        self.record_path(key).is_file()
    }

    /// Read the record of a cell, if present.
    pub fn get(&self, key: &CellKey) -> Result<Option<RunRecord>, StoreError> {
        let path = self.record_path(key);
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|source| StoreError::Encoding { path, source }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    /// Persist a record.
    ///
    /// Fails with [`StoreError::AlreadyExists`] if the cell already has one.
    pub fn append(&self, record: &RunRecord) -> Result<PathBuf, StoreError> {
        let key = record.key();
        let dir = self.dataset_dir(&key.profile);
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;

        let path = self.record_path(&key);
        if path.exists() {
            return Err(StoreError::AlreadyExists { path });
        }

        let json = serde_json::to_vec_pretty(record).map_err(|source| StoreError::Encoding {
            path: path.clone(),
            source,
        })?;

        let tmp = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4().as_simple()));
        let result = write_synced(&tmp, &json).and_then(|()| fs::hard_link(&tmp, &path));
        let _ = fs::remove_file(&tmp);

        match result {
            Ok(()) => {
                debug!("Stored {} at {}", key, path.display());
                Ok(path)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(StoreError::AlreadyExists { path }),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    /// Every dataset directory with a parseable profile name.
    pub fn datasets(&self) -> Result<Vec<(NetworkConditionProfile, PathBuf)>, StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.root.clone(),
                    source,
                })
            }
        };

        let mut datasets = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: self.root.clone(),
                source,
            })?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Ok(profile) = NetworkConditionProfile::from_dataset_dir_name(name) {
                datasets.push((profile, path));
            }
        }
        datasets.sort();
        Ok(datasets)
    }

    /// Load every record of every dataset.
    pub fn load_all(&self) -> Result<LoadedRecords, StoreError> {
        let mut loaded = LoadedRecords::default();
        for (profile, dir) in self.datasets()? {
            self.load_dir(&profile, &dir, &mut loaded)?;
        }
        loaded.records.sort_by_key(RunRecord::key);
        Ok(loaded)
    }

    /// Load the records of one profile.
    pub fn load_dataset(&self, profile: &NetworkConditionProfile) -> Result<LoadedRecords, StoreError> {
        let mut loaded = LoadedRecords::default();
        let dir = self.dataset_dir(profile);
        if dir.is_dir() {
            self.load_dir(profile, &dir, &mut loaded)?;
        }
        loaded.records.sort_by_key(RunRecord::key);
        Ok(loaded)
    }

    fn load_dir(
        &self,
        profile: &NetworkConditionProfile,
        dir: &Path,
        loaded: &mut LoadedRecords,
    ) -> Result<(), StoreError> {
        let entries = fs::read_dir(dir).map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.')
                || path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION)
                || name == crate::report::SUMMARY_FILE_NAME
            {
                continue;
            }

            match read_record(&path, profile) {
                Ok(record) => loaded.records.push(record),
                Err(problem) => {
                    warn!("Skipping {}: {}", path.display(), problem);
                    loaded.issues.push(LoadIssue { path, problem });
                }
            }
        }
        Ok(())
    }
}

fn read_record(path: &Path, profile: &NetworkConditionProfile) -> Result<RunRecord, String> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or("file name is not valid UTF-8")?;
    let (revision, repetition) =
        parse_record_file_name(name).ok_or_else(|| format!("unexpected record file name {:?}", name))?;

    let bytes = fs::read(path).map_err(|e| format!("unreadable: {}", e))?;
    let record: RunRecord =
        serde_json::from_slice(&bytes).map_err(|e| format!("malformed record: {}", e))?;

    if record.profile != *profile {
        return Err(format!(
            "record profile {} does not match its dataset {}",
            record.profile, profile
        ));
    }
    if record.revision != revision || record.repetition != repetition {
        return Err(format!(
            "record is for {}@{} but stored as {}@{}",
            record.revision, record.repetition, revision, repetition
        ));
    }
    Ok(record)
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// `<escaped revision>@<repetition>.json`
fn record_file_name(revision: &str, repetition: u32) -> String {
    format!("{}@{}.{}", escape_revision(revision), repetition, RECORD_EXTENSION)
}

fn parse_record_file_name(name: &str) -> Option<(String, u32)> {
    let stem = name.strip_suffix(RECORD_EXTENSION)?.strip_suffix('.')?;
    let (revision, repetition) = stem.rsplit_once('@')?;
    Some((unescape_revision(revision)?, repetition.parse().ok()?))
}

/// Percent-escape everything outside `[A-Za-z0-9._-]`, plus a leading dot.
pub(crate) fn escape_revision(revision: &str) -> String {
    let mut out = String::with_capacity(revision.len());
    for (i, b) in revision.bytes().enumerate() {
        let keep = b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || (b == b'.' && i > 0);
        if keep {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

fn unescape_revision(escaped: &str) -> Option<String> {
    let bytes = escaped.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = escaped.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
