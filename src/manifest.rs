//! Persistent record of what the cache orchestrator last wrote.
//!
//! Each source file has its own record under `<root>/<cache_dir>/manifest/`,
//! stored at the source's root-relative path with `.json` appended, so
//! `config/app.dx` is recorded in `manifest/config/app.dx.json`. A record holds
//! the fingerprint of the source text last written and the cache artifacts
//! derived from it. The orchestrator compares the file on disk against this
//! record before overwriting it.
//!
//! Writers of different sources touch different record files, so they never
//! overwrite each other's state.

use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Record layout version. A record with a different version is ignored.
pub const MANIFEST_VERSION: u32 = 1;

const RECORD_EXTENSION: &str = ".json";

/// The serialized form a cache artifact holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactFormat {
    /// Canonical LLM text (`.llm`).
    Llm,
    /// Machine binary (`.machine`).
    Machine,
}

impl ArtifactFormat {
    /// Both formats, in the order they are written.
    pub const ALL: [ArtifactFormat; 2] = [ArtifactFormat::Llm, ArtifactFormat::Machine];

    /// File extension of the artifact, without the dot.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            ArtifactFormat::Llm => "llm",
            ArtifactFormat::Machine => "machine",
        }
    }
}

/// One derived file in the cache directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheArtifact {
    /// Path relative to the project root.
    pub path: PathBuf,
    pub format: ArtifactFormat,
    /// Fingerprint of the artifact's bytes.
    pub content_fingerprint: Fingerprint,
    /// Fingerprint of the source text the artifact was derived from.
    pub source_fingerprint: Fingerprint,
}

/// What the orchestrator knows about one source file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Fingerprint of the source text last written or adopted.
    pub fingerprint: Fingerprint,
    pub artifacts: Vec<CacheArtifact>,
    pub written_at: DateTime<Utc>,
}

/// On-disk form of one record.
#[derive(Serialize)]
struct StoredRecordRef<'a> {
    version: u32,
    source: &'a str,
    record: &'a SourceRecord,
}

#[derive(Deserialize)]
struct StoredRecord {
    version: u32,
    source: String,
    record: SourceRecord,
}

impl SourceRecord {
    /// Returns `true` if this record was written after `other`.
    #[must_use]
    pub fn is_newer_than(&self, other: &SourceRecord) -> bool {
        self.written_at > other.written_at
    }
}

/// The source records of one project, keyed by root-relative source path.
///
/// # Examples
///
/// ```rust
/// use dx_serializer::manifest::{Manifest, SourceRecord};
/// use dx_serializer::Fingerprint;
///
/// let mut manifest = Manifest::new();
/// manifest.insert(
///     "config/app.dx",
///     SourceRecord {
///         fingerprint: Fingerprint::of(b"#c:name|dx"),
///         artifacts: Vec::new(),
///         written_at: chrono::Utc::now(),
///     },
/// );
/// assert!(manifest.get("config/app.dx").is_some());
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Manifest {
    sources: BTreeMap<String, SourceRecord>,
}

impl Manifest {
    /// Creates an empty manifest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every usable record under a manifest directory.
    ///
    /// A missing directory is an empty manifest. Unreadable, malformed or
    /// other-version records are skipped with a warning, which costs conflict
    /// detection for the next write of those sources.
    #[must_use]
    pub fn load(dir: &Path) -> Self {
        let mut manifest = Manifest::new();
        let mut files = Vec::new();
        if let Err(e) = collect_records(dir, &mut files) {
            warn!(dir = %dir.display(), error = %e, "manifest directory not fully read");
        }
        for path in files {
            let Some(key) = path
                .strip_prefix(dir)
                .ok()
                .and_then(key_of_record)
            else {
                continue;
            };
            if let Some(record) = Self::load_record(dir, &key) {
                manifest.insert(key, record);
            }
        }
        debug!(dir = %dir.display(), sources = manifest.len(), "loaded manifest");
        manifest
    }

    /// Loads the record of one source key, if it exists and is usable.
    #[must_use]
    pub fn load_record(dir: &Path, key: &str) -> Option<SourceRecord> {
        let path = record_path(dir, key);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "manifest record unreadable, ignoring it");
                return None;
            }
        };
        match serde_json::from_slice::<StoredRecord>(&content) {
            Ok(stored) if stored.version == MANIFEST_VERSION && stored.source == key => {
                Some(stored.record)
            }
            Ok(stored) => {
                warn!(
                    path = %path.display(),
                    version = stored.version,
                    source = %stored.source,
                    "manifest record does not match, ignoring it"
                );
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "manifest record corrupt, ignoring it");
                None
            }
        }
    }

    /// Serializes the record of one source key as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] naming `path` if serialization fails.
    pub fn record_json(key: &str, record: &SourceRecord, path: &Path) -> Result<Vec<u8>> {
        let stored = StoredRecordRef {
            version: MANIFEST_VERSION,
            source: key,
            record,
        };
        serde_json::to_vec_pretty(&stored).map_err(|e| Error::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Returns the record for a source key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&SourceRecord> {
        self.sources.get(key)
    }

    /// Inserts or replaces the record for a source key.
    pub fn insert(&mut self, key: impl Into<String>, record: SourceRecord) -> Option<SourceRecord> {
        self.sources.insert(key.into(), record)
    }

    /// Keeps whichever of the held record and `record` was written last.
    pub fn merge(&mut self, key: impl Into<String>, record: SourceRecord) {
        let key = key.into();
        match self.sources.get(&key) {
            Some(held) if !record.is_newer_than(held) => {}
            _ => {
                self.sources.insert(key, record);
            }
        }
    }

    /// Number of tracked sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Returns `true` if no source is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Iterates over `(key, record)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SourceRecord)> {
        self.sources.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Path of the record file of a source key inside a manifest directory.
#[must_use]
pub fn record_path(dir: &Path, key: &str) -> PathBuf {
    let mut path = dir.to_path_buf();
    let mut parts = key.split('/').peekable();
    while let Some(part) = parts.next() {
        if parts.peek().is_some() {
            path.push(part);
        } else {
            path.push(format!("{part}{RECORD_EXTENSION}"));
        }
    }
    path
}

/// Inverse of [`record_path`] for a path relative to the manifest directory.
fn key_of_record(relative: &Path) -> Option<String> {
    let key = source_key(relative);
    let key = key.strip_suffix(RECORD_EXTENSION)?;
    (!key.is_empty() && !key.ends_with('/')).then(|| key.to_string())
}

fn collect_records(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            collect_records(&path, out)?;
        } else if path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(RECORD_EXTENSION))
        {
            out.push(path);
        }
    }
    Ok(())
}

/// Builds the manifest key of a root-relative path: its normal components
/// joined with `/`, whatever the platform separator.
#[must_use]
pub fn source_key(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(text: &[u8]) -> SourceRecord {
        let fingerprint = Fingerprint::of(text);
        SourceRecord {
            fingerprint,
            artifacts: vec![CacheArtifact {
                path: PathBuf::from(".dx/cache/config/app.llm"),
                format: ArtifactFormat::Llm,
                content_fingerprint: fingerprint,
                source_fingerprint: fingerprint,
            }],
            written_at: Utc::now(),
        }
    }

    fn store(dir: &Path, key: &str, record: &SourceRecord) {
        let path = record_path(dir, key);
        let json = Manifest::record_json(key, record, &path).unwrap();
        crate::cache::write_atomic(&path, &json).unwrap();
    }

    #[test]
    fn test_record_path_mirrors_source() {
        let dir = Path::new("cache/manifest");
        assert_eq!(
            record_path(dir, "config/app.dx"),
            Path::new("cache/manifest/config/app.dx.json")
        );
        assert_eq!(key_of_record(Path::new("config/app.dx.json")).as_deref(), Some("config/app.dx"));
        assert_eq!(key_of_record(Path::new("config/.tmpXyz")), None);
    }

    #[test]
    fn test_store_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let a = record(b"#c:name|dx");
        let b = record(b"#c:name|other");
        store(dir.path(), "config/app.dx", &a);
        store(dir.path(), "app.json", &b);

        let loaded = Manifest::load(dir.path());
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get("config/app.dx"), Some(&a));
        assert_eq!(loaded.get("app.json"), Some(&b));
        assert_eq!(loaded.get("config/app.dx").unwrap().artifacts[0].format, ArtifactFormat::Llm);
        assert_eq!(Manifest::load_record(dir.path(), "app.json"), Some(b));
    }

    #[test]
    fn test_load_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Manifest::load(&dir.path().join("manifest")).is_empty());
        assert!(Manifest::load_record(dir.path(), "app.dx").is_none());
    }

    #[test]
    fn test_corrupt_record_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        store(dir.path(), "good.dx", &record(b"good"));
        std::fs::write(record_path(dir.path(), "bad.dx"), "not json {{").unwrap();

        let loaded = Manifest::load(dir.path());
        assert_eq!(loaded.len(), 1);
        assert!(loaded.get("good.dx").is_some());
    }

    #[test]
    fn test_other_version_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = record_path(dir.path(), "app.dx");
        let json = serde_json::json!({
            "version": MANIFEST_VERSION + 1,
            "source": "app.dx",
            "record": serde_json::to_value(record(b"x")).unwrap(),
        });
        std::fs::write(&path, json.to_string()).unwrap();
        assert!(Manifest::load_record(dir.path(), "app.dx").is_none());
    }

    #[test]
    fn test_record_of_another_source_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = record_path(dir.path(), "a.dx");
        let json = Manifest::record_json("b.dx", &record(b"x"), &path).unwrap();
        std::fs::write(&path, json).unwrap();
        assert!(Manifest::load(dir.path()).is_empty());
    }

    #[test]
    fn test_merge_keeps_latest() {
        let older = record(b"old");
        let mut newer = record(b"new");
        newer.written_at = older.written_at + chrono::Duration::seconds(1);

        let mut manifest = Manifest::new();
        manifest.merge("a.dx", newer.clone());
        manifest.merge("a.dx", older);
        assert_eq!(manifest.get("a.dx"), Some(&newer));
    }

    #[test]
    fn test_format_serializes_snake_case() {
        let json = serde_json::to_string(&ArtifactFormat::Machine).unwrap();
        assert_eq!(json, "\"machine\"");
        assert_eq!(ArtifactFormat::Machine.extension(), "machine");
    }

    #[test]
    fn test_source_key() {
        assert_eq!(source_key(Path::new("config/app.dx")), "config/app.dx");
        assert_eq!(source_key(Path::new("./app.dx")), "app.dx");
    }
}
