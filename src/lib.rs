//! # dx_serializer
//!
//! One document model, three serialized forms, and a cache that keeps them
//! consistent on disk.
//!
//! ## The three forms
//!
//! - **LLM** ([`llm`]): compact, sigil-based canonical text. This is what
//!   source files contain and what gets handed to language models.
//! - **Human** ([`human`]): an aligned table view for editing, with
//!   abbreviated keys expanded through a [`KeyRegistry`] and wide tables
//!   wrapped into column groups.
//! - **Machine** ([`machine`]): a fingerprinted binary buffer read in place
//!   through a zero-copy view.
//!
//! All three decode to the same [`Document`]: an ordered context map plus
//! named tabular sections with typed columns. The [`convert`] module goes
//! between any two forms directly and imports or exports JSON.
//!
//! ## Quick Start
//!
//! ```rust
//! use dx_serializer::{human, llm, machine, KeyRegistry};
//!
//! let doc = llm::decode("#c:name|dx;version|0.0.1").unwrap();
//!
//! let text = human::encode(&doc, &KeyRegistry::standard()).unwrap();
//! assert_eq!(text, "[config]\nname    = dx\nversion = 0.0.1\n");
//!
//! let bytes = machine::encode(&doc).unwrap();
//! assert_eq!(machine::decode(&bytes).unwrap().materialize().unwrap(), doc);
//! ```
//!
//! ## Editing a source file
//!
//! An editor renders the source for a person with [`render_for_editing`] and
//! writes the result back with [`commit_edit`], which refreshes the
//! `.dx/cache` artifacts and refuses to overwrite a file that changed under
//! it:
//!
//! ```rust
//! use dx_serializer::{commit_edit, render_for_editing, KeyRegistry};
//!
//! let root = tempfile::tempdir().unwrap();
//! let registry = KeyRegistry::standard();
//!
//! let view = render_for_editing(b"#c:name|dx", &registry).unwrap();
//! let edited = view.replace("= dx", "= dx-core");
//! commit_edit(&edited, root.path(), "app.dx", &registry).unwrap();
//!
//! let source = std::fs::read_to_string(root.path().join("app.dx")).unwrap();
//! assert_eq!(source, "#c:name|dx-core\n");
//! ```
//!
//! ## Safety Guarantees
//!
//! - No `unsafe` code blocks
//! - Machine buffers are validated in full before a view is handed out
//! - Every codec refuses a document that breaks its invariants instead of
//!   writing something it cannot read back

pub mod base62;
pub mod cache;
pub mod convert;
pub mod document;
pub mod error;
mod escape;
pub mod fingerprint;
pub mod human;
pub mod layout;
pub mod llm;
pub mod machine;
pub mod manifest;
pub mod map;
pub mod options;
pub mod registry;
pub mod value;

pub use cache::{ApplyReport, CacheOrchestrator, CachePaths, Regenerated, VerifyReport};
pub use convert::{
    document_to_json, human_to_llm, human_to_machine, json_to_document, llm_to_human,
    llm_to_machine, machine_to_human, machine_to_llm,
};
pub use document::{
    is_valid_name, Column, Document, InvariantViolation, Row, Section, TypeHint,
};
pub use error::{Error, Result};
pub use fingerprint::Fingerprint;
pub use machine::MachineView;
pub use manifest::{ArtifactFormat, CacheArtifact};
pub use map::ContextMap;
pub use options::{CacheOptions, LayoutOptions};
pub use registry::KeyRegistry;
pub use value::Value;

use std::path::Path;

/// Renders the bytes of a source file as the human view.
///
/// # Examples
///
/// ```rust
/// use dx_serializer::{render_for_editing, KeyRegistry};
///
/// let text = render_for_editing(b"#f(nm|port%i)\ndx|80\n", &KeyRegistry::standard()).unwrap();
/// assert!(text.starts_with("[forge]\n# expanded: [forge], name\n"));
/// ```
///
/// # Errors
///
/// Returns [`Error::Parse`] if the bytes are not valid UTF-8 or not valid
/// canonical text.
#[must_use = "this returns the result of the operation, errors must be handled"]
pub fn render_for_editing(source: &[u8], registry: &KeyRegistry) -> Result<String> {
    let doc = llm::decode(llm::text_from_bytes(source)?)?;
    human::encode(&doc, registry)
}

/// Decodes an edited human view and writes it to `source` under `root`,
/// refreshing the cache with default [`CacheOptions`].
///
/// # Errors
///
/// Returns [`Error::Parse`] if the human text is malformed, and otherwise
/// anything [`CacheOrchestrator::apply`] returns, notably
/// [`Error::Conflict`] when the source changed since it was last written.
#[must_use = "this returns the result of the operation, errors must be handled"]
pub fn commit_edit(
    human_text: &str,
    root: impl AsRef<Path>,
    source: impl AsRef<Path>,
    registry: &KeyRegistry,
) -> Result<ApplyReport> {
    let doc = human::decode(human_text, registry)?;
    let mut cache = CacheOrchestrator::open(root.as_ref(), CacheOptions::default());
    cache.apply(&doc, source)
}
