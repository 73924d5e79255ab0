//! Keeps a source file and its cache artifacts consistent.
//!
//! For a source `config/app.dx` under project root `R` the orchestrator
//! maintains:
//!
//! - `R/config/app.dx`: canonical LLM text, the source of truth
//! - `R/.dx/cache/config/app.llm`: the same text
//! - `R/.dx/cache/config/app.machine`: the machine buffer
//! - `R/.dx/cache/manifest/config/app.dx.json`: fingerprints of what was last
//!   written
//!
//! Every file is written to a temporary sibling and renamed into place, so a
//! concurrent reader sees either the old or the new content. Orchestrators
//! writing different sources share no file. Concurrent writers to one source
//! are not locked out. Instead, before overwriting, the file on disk is
//! compared against the latest recorded fingerprint, re-read from the record
//! file, and a mismatch is reported as [`Error::Conflict`].
//!
//! ## Examples
//!
//! ```rust
//! use dx_serializer::{llm, CacheOptions, CacheOrchestrator};
//!
//! let root = tempfile::tempdir().unwrap();
//! let mut cache = CacheOrchestrator::open(root.path(), CacheOptions::new());
//!
//! let doc = llm::decode("#c:name|dx").unwrap();
//! let report = cache.apply(&doc, "config/app.dx").unwrap();
//! assert_eq!(report.artifacts.len(), 2);
//!
//! let paths = cache.cache_paths("config/app.dx").unwrap();
//! assert!(paths.llm.ends_with(".dx/cache/config/app.llm"));
//! assert!(paths.machine.exists());
//! ```

use crate::document::Document;
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::llm::{self, References};
use crate::machine;
use crate::manifest::{
    record_path, source_key, ArtifactFormat, CacheArtifact, Manifest, SourceRecord,
};
use crate::options::CacheOptions;
use chrono::Utc;
use rayon::prelude::*;
use std::collections::{BTreeSet, HashSet};
use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Where the two artifacts of one source live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachePaths {
    pub llm: PathBuf,
    pub machine: PathBuf,
}

impl CachePaths {
    /// Returns the path of one format.
    #[must_use]
    pub fn get(&self, format: ArtifactFormat) -> &Path {
        match format {
            ArtifactFormat::Llm => &self.llm,
            ArtifactFormat::Machine => &self.machine,
        }
    }
}

/// A successful [`CacheOrchestrator::apply`] or regeneration.
#[derive(Clone, Debug, PartialEq)]
pub struct ApplyReport {
    /// The source file written or adopted.
    pub source: PathBuf,
    /// Fingerprint of the source text now on disk.
    pub fingerprint: Fingerprint,
    /// The artifacts written, with root-relative paths.
    pub artifacts: Vec<CacheArtifact>,
}

/// Outcome for one source of [`CacheOrchestrator::regenerate`].
#[derive(Clone, Debug)]
pub struct Regenerated {
    pub source: PathBuf,
    pub outcome: Result<ApplyReport>,
}

/// State of the cache directory against the manifest.
///
/// All paths are absolute (joined onto the project root) and sorted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Artifacts matching both their recorded content and the current source.
    pub fresh: Vec<PathBuf>,
    /// Recorded artifacts that are missing, modified, or derived from a source
    /// that has since changed.
    pub stale: Vec<PathBuf>,
    /// Artifact files no manifest record mentions.
    pub untracked: Vec<PathBuf>,
}

impl VerifyReport {
    /// Returns `true` if no recorded artifact is stale.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.stale.is_empty()
    }
}

/// Writes source files and their cache artifacts under one project root.
#[derive(Debug)]
pub struct CacheOrchestrator {
    root: PathBuf,
    options: CacheOptions,
    manifest: Manifest,
    /// Keys whose record could not be written yet.
    unsaved: BTreeSet<String>,
}

impl CacheOrchestrator {
    /// Opens the cache of a project root, loading the usable manifest
    /// records. Nothing is written until the first apply.
    pub fn open(root: impl Into<PathBuf>, options: CacheOptions) -> Self {
        let root = root.into();
        let manifest = Manifest::load(&root.join(&options.cache_dir).join(&options.manifest_dir));
        CacheOrchestrator {
            root,
            options,
            manifest,
            unsaved: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// The records this orchestrator loaded, wrote or adopted.
    #[must_use]
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Absolute path of the manifest directory.
    #[must_use]
    pub fn manifest_dir(&self) -> PathBuf {
        self.root
            .join(&self.options.cache_dir)
            .join(&self.options.manifest_dir)
    }

    /// Returns the record of a source as this orchestrator last saw it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutsideRoot`] if `source` is not under the root.
    pub fn record(&self, source: impl AsRef<Path>) -> Result<Option<&SourceRecord>> {
        let relative = self.relative(source.as_ref())?;
        Ok(self.manifest.get(&source_key(&relative)))
    }

    /// Returns the cache artifact paths of a source.
    ///
    /// Relative sources are taken relative to the root. The cache mirrors the
    /// source's directory and replaces its extension with `.llm` and
    /// `.machine`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutsideRoot`] if `source` is not under the root.
    pub fn cache_paths(&self, source: impl AsRef<Path>) -> Result<CachePaths> {
        let relative = self.relative(source.as_ref())?;
        let (llm, machine) = self.relative_cache_paths(&relative);
        Ok(CachePaths {
            llm: self.root.join(llm),
            machine: self.root.join(machine),
        })
    }

    /// Writes an edited document to its source file and refreshes both cache
    /// artifacts.
    ///
    /// Both forms are encoded before anything touches the disk. The source is
    /// then checked against its latest record, including one written by
    /// another orchestrator: if it changed since it was last written, nothing
    /// is written. Reference lines already present in the source are carried
    /// over. To accept an external edit, run [`regenerate`](Self::regenerate)
    /// on the source first.
    ///
    /// # Errors
    ///
    /// - [`Error::OutsideRoot`] if `source` is not under the root
    /// - [`Error::Encoding`] if the document is invalid
    /// - [`Error::Conflict`] if the source was modified or removed externally
    /// - [`Error::Io`] if the source itself could not be written
    /// - [`Error::StaleCache`] if the source was written but some artifacts
    ///   or its manifest record were not
    pub fn apply(&mut self, doc: &Document, source: impl AsRef<Path>) -> Result<ApplyReport> {
        let relative = self.relative(source.as_ref())?;
        let key = source_key(&relative);
        let path = self.root.join(&relative);

        let machine_bytes = machine::encode(doc)?;
        let existing = read_existing(&path)?;
        self.refresh(&key);
        self.check_conflict(&key, &path, existing.as_deref())?;

        let refs = existing
            .as_deref()
            .and_then(|bytes| carried_references(&path, bytes))
            .unwrap_or_default();
        let text = llm::encode_with_references(doc, &refs)?;

        self.write_with_retry(&path, text.as_bytes())?;
        let fingerprint = Fingerprint::of(text.as_bytes());
        info!(source = %key, %fingerprint, "wrote source");

        let (artifacts, mut stale) =
            self.write_artifacts(&relative, fingerprint, text.as_bytes(), &machine_bytes);
        let record = SourceRecord {
            fingerprint,
            artifacts: artifacts.clone(),
            written_at: Utc::now(),
        };
        match self.persist(&key, &record) {
            Ok(()) => {
                self.unsaved.remove(&key);
            }
            Err(e) => {
                warn!(source = %key, error = %e, "manifest record not saved");
                self.unsaved.insert(key.clone());
                stale.push(record_path(&self.manifest_dir(), &key));
            }
        }
        self.manifest.insert(key.clone(), record);

        if stale.is_empty() {
            Ok(ApplyReport {
                source: path,
                fingerprint,
                artifacts,
            })
        } else {
            warn!(source = %key, stale = stale.len(), "cache left stale");
            Err(Error::StaleCache { path, stale })
        }
    }

    /// Rebuilds the artifacts of many sources from the files on disk.
    ///
    /// Sources are processed in parallel. Each one is decoded from disk and
    /// its current content is adopted as the new recorded fingerprint, which
    /// also clears a pending conflict. Every source writes its own artifacts
    /// and record, and failures are returned per source in the outcomes.
    pub fn regenerate<P>(&mut self, sources: &[P]) -> Vec<Regenerated>
    where
        P: AsRef<Path> + Sync,
    {
        let this: &Self = self;
        let results: Vec<_> = sources
            .par_iter()
            .map(|source| {
                let (record, outcome) = this.adopt(source.as_ref());
                (
                    record,
                    Regenerated {
                        source: source.as_ref().to_path_buf(),
                        outcome,
                    },
                )
            })
            .collect();

        let mut outcomes = Vec::with_capacity(results.len());
        for (record, regenerated) in results {
            if let Some((key, record, saved)) = record {
                if saved {
                    self.unsaved.remove(&key);
                } else {
                    self.unsaved.insert(key.clone());
                }
                self.manifest.insert(key, record);
            }
            outcomes.push(regenerated);
        }

        let failed = outcomes.iter().filter(|r| r.outcome.is_err()).count();
        info!(sources = outcomes.len(), failed, "regenerated cache");
        outcomes
    }

    /// Compares the cache directory against the manifest records on disk,
    /// together with any newer records this orchestrator has not saved.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the cache directory cannot be listed.
    pub fn verify(&self) -> Result<VerifyReport> {
        let mut report = VerifyReport::default();
        let mut tracked = HashSet::new();

        let mut manifest = Manifest::load(&self.manifest_dir());
        for (key, record) in self.manifest.iter() {
            manifest.merge(key, record.clone());
        }
        for (key, record) in manifest.iter() {
            let source_current = fs::read(self.root.join(key))
                .map(|bytes| Fingerprint::of(&bytes) == record.fingerprint)
                .unwrap_or(false);
            for artifact in &record.artifacts {
                let path = self.root.join(&artifact.path);
                let content_current = fs::read(&path)
                    .map(|bytes| Fingerprint::of(&bytes) == artifact.content_fingerprint)
                    .unwrap_or(false);
                if source_current
                    && content_current
                    && artifact.source_fingerprint == record.fingerprint
                {
                    report.fresh.push(path.clone());
                } else {
                    report.stale.push(path.clone());
                }
                tracked.insert(path);
            }
        }

        let cache_dir = self.root.join(&self.options.cache_dir);
        let mut found = Vec::new();
        collect_artifacts(&cache_dir, &mut found).map_err(|e| Error::io(&cache_dir, &e))?;
        report.untracked = found
            .into_iter()
            .filter(|path| !tracked.contains(path))
            .collect();

        report.fresh.sort();
        report.stale.sort();
        report.untracked.sort();
        if !report.is_consistent() {
            warn!(stale = report.stale.len(), "stale cache artifacts");
        }
        Ok(report)
    }

    /// Writes the manifest records that could not be saved earlier.
    ///
    /// # Errors
    ///
    /// Returns the first [`Error::Io`] of a record that still cannot be
    /// written after the configured number of attempts. Such records stay
    /// pending for the next call.
    pub fn save(&mut self) -> Result<()> {
        let mut first_error = None;
        for key in std::mem::take(&mut self.unsaved) {
            let Some(record) = self.manifest.get(&key) else {
                continue;
            };
            if let Err(e) = self.persist(&key, record) {
                warn!(source = %key, error = %e, "manifest record not saved");
                first_error.get_or_insert(e);
                self.unsaved.insert(key);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Returns `true` if every record this orchestrator holds is on disk.
    #[must_use]
    pub fn is_saved(&self) -> bool {
        self.unsaved.is_empty()
    }

    /// Picks up a record of `key` written since this orchestrator last saw it.
    fn refresh(&mut self, key: &str) {
        if let Some(stored) = Manifest::load_record(&self.manifest_dir(), key) {
            self.manifest.merge(key, stored);
        }
    }

    fn persist(&self, key: &str, record: &SourceRecord) -> Result<()> {
        let path = record_path(&self.manifest_dir(), key);
        let json = Manifest::record_json(key, record, &path)?;
        self.write_with_retry(&path, &json)
    }

    /// Resolves a source against the root into a clean relative path.
    fn relative(&self, source: &Path) -> Result<PathBuf> {
        let outside = || Error::OutsideRoot {
            path: source.to_path_buf(),
        };
        let relative = if source.is_absolute() {
            source.strip_prefix(&self.root).map_err(|_| outside())?
        } else {
            source
        };

        let mut clean = PathBuf::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => clean.push(part),
                Component::CurDir => {}
                _ => return Err(outside()),
            }
        }
        if clean.file_stem().is_none() {
            return Err(outside());
        }
        Ok(clean)
    }

    fn relative_cache_paths(&self, relative: &Path) -> (PathBuf, PathBuf) {
        let dir = match relative.parent() {
            Some(parent) => self.options.cache_dir.join(parent),
            None => self.options.cache_dir.clone(),
        };
        let stem = relative.file_stem().unwrap_or_default();
        let with_ext = |ext: &str| {
            let mut name = OsString::from(stem);
            name.push(".");
            name.push(ext);
            dir.join(name)
        };
        (
            with_ext(ArtifactFormat::Llm.extension()),
            with_ext(ArtifactFormat::Machine.extension()),
        )
    }

    fn check_conflict(&self, key: &str, path: &Path, existing: Option<&[u8]>) -> Result<()> {
        let Some(record) = self.manifest.get(key) else {
            return Ok(());
        };
        let found = existing.map(Fingerprint::of);
        if found == Some(record.fingerprint) {
            return Ok(());
        }
        warn!(
            source = %key,
            expected = %record.fingerprint,
            found = ?found,
            "source changed since last write"
        );
        Err(Error::Conflict {
            path: path.to_path_buf(),
            expected: record.fingerprint,
            found,
        })
    }

    /// Writes both artifacts, returning the records of all of them and the
    /// paths of those that could not be written.
    fn write_artifacts(
        &self,
        relative: &Path,
        source_fingerprint: Fingerprint,
        llm_bytes: &[u8],
        machine_bytes: &[u8],
    ) -> (Vec<CacheArtifact>, Vec<PathBuf>) {
        let (llm_path, machine_path) = self.relative_cache_paths(relative);
        let outputs = [
            (ArtifactFormat::Llm, llm_path, llm_bytes),
            (ArtifactFormat::Machine, machine_path, machine_bytes),
        ];

        let mut artifacts = Vec::with_capacity(outputs.len());
        let mut stale = Vec::new();
        for (format, path, bytes) in outputs {
            let absolute = self.root.join(&path);
            if let Err(e) = self.write_with_retry(&absolute, bytes) {
                warn!(artifact = %absolute.display(), error = %e, "artifact not written");
                stale.push(absolute);
            }
            artifacts.push(CacheArtifact {
                path,
                format,
                content_fingerprint: Fingerprint::of(bytes),
                source_fingerprint,
            });
        }
        (artifacts, stale)
    }

    /// Rebuilds one source's artifacts from disk without touching the source.
    fn adopt(&self, source: &Path) -> (Option<(String, SourceRecord, bool)>, Result<ApplyReport>) {
        let prepared = self.relative(source).and_then(|relative| {
            let path = self.root.join(&relative);
            let bytes = fs::read(&path).map_err(|e| Error::io(&path, &e))?;
            let (doc, refs) = llm::decode_with_references(llm::text_from_bytes(&bytes)?)?;
            let text = llm::encode_with_references(&doc, &refs)?;
            let machine_bytes = machine::encode(&doc)?;
            Ok((relative, path, Fingerprint::of(&bytes), text, machine_bytes))
        });
        let (relative, path, fingerprint, text, machine_bytes) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(source = %source.display(), error = %e, "source not regenerated");
                return (None, Err(e));
            }
        };

        let key = source_key(&relative);
        let (artifacts, mut stale) =
            self.write_artifacts(&relative, fingerprint, text.as_bytes(), &machine_bytes);
        let record = SourceRecord {
            fingerprint,
            artifacts: artifacts.clone(),
            written_at: Utc::now(),
        };
        let saved = match self.persist(&key, &record) {
            Ok(()) => true,
            Err(e) => {
                warn!(source = %key, error = %e, "manifest record not saved");
                stale.push(record_path(&self.manifest_dir(), &key));
                false
            }
        };
        let outcome = if stale.is_empty() {
            Ok(ApplyReport {
                source: path,
                fingerprint,
                artifacts,
            })
        } else {
            Err(Error::StaleCache { path, stale })
        };
        (Some((key, record, saved)), outcome)
    }

    fn write_with_retry(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let attempts = self.options.write_attempts.max(1);
        let mut attempt = 1;
        loop {
            match write_atomic(path, bytes) {
                Ok(()) => {
                    info!(path = %path.display(), bytes = bytes.len(), "wrote file");
                    return Ok(());
                }
                Err(e) if attempt < attempts => {
                    warn!(path = %path.display(), attempt, error = %e, "write failed, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(Error::io(path, &e)),
            }
        }
    }
}

/// Writes `bytes` to a temporary file beside `path` and renames it into
/// place, creating parent directories first.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;
    let mut file = NamedTempFile::new_in(parent)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn read_existing(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(path, &e)),
    }
}

/// Reference lines of the source about to be overwritten. An unreadable
/// source carries none.
fn carried_references(path: &Path, bytes: &[u8]) -> Option<References> {
    let parsed = llm::text_from_bytes(bytes).and_then(llm::decode_with_references);
    match parsed {
        Ok((_, refs)) => Some(refs),
        Err(e) => {
            debug!(
                path = %path.display(),
                error = %e,
                "existing source not parsed, dropping references"
            );
            None
        }
    }
}

fn collect_artifacts(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            collect_artifacts(&path, out)?;
        } else if path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ArtifactFormat::ALL.iter().any(|f| f.extension() == ext))
        {
            out.push(path);
        }
    }
    Ok(())
}
