//! Error types for the three codecs and the cache orchestrator.
//!
//! ## Error Categories
//!
//! - **Parse**: malformed or unknown sigils, arity mismatches, duplicate ids
//!   or keys. Always carries the 1-based line number and aborts the whole decode.
//! - **Encoding**: the document breaks an invariant (type disagreement,
//!   negative base-62 value, oversized string). Aborts the whole encode.
//! - **Integrity**: a machine buffer failed its magic, version, fingerprint or
//!   structural check. The buffer must be re-derived from the LLM source.
//! - **Conflict**: the source file changed on disk since the orchestrator last
//!   wrote it. Nothing was written.
//! - **StaleCache**: the source was written but one or more cache artifacts
//!   could not be.
//!
//! ## Examples
//!
//! ```rust
//! use dx_serializer::{llm, Error};
//!
//! let err = llm::decode("#c:a|1\n#c:a|2").unwrap_err();
//! assert!(matches!(err, Error::Parse { line: 2, .. }));
//! ```

use crate::document::InvariantViolation;
use crate::fingerprint::Fingerprint;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Represents every failure surfaced by decoding, encoding or cache writes.
///
/// None of these are retried automatically: a parse or integrity failure
/// cannot succeed again without new input.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Text input could not be decoded.
    #[error("Parse error at line {line}: {reason}")]
    Parse { line: usize, reason: String },

    /// The document cannot be encoded because it violates invariants.
    #[error("Encoding error: {}", join_violations(.violations))]
    Encoding { violations: Vec<InvariantViolation> },

    /// A machine buffer was refused.
    #[error("Integrity error: {reason}")]
    Integrity { reason: String },

    /// The source file was modified outside the orchestrator.
    #[error("Conflict at {}: expected fingerprint {expected}, found {}", .path.display(), describe_found(.found))]
    Conflict {
        path: PathBuf,
        expected: Fingerprint,
        found: Option<Fingerprint>,
    },

    /// The source was written but the listed cache artifacts are out of date.
    #[error("Stale cache for {}: {} artifact(s) not written", .path.display(), .stale.len())]
    StaleCache { path: PathBuf, stale: Vec<PathBuf> },

    /// The source path does not live under the project root.
    #[error("Path {} is outside the project root", .path.display())]
    OutsideRoot { path: PathBuf },

    /// IO error during reading or writing.
    #[error("IO error at {}: {reason}", .path.display())]
    Io { path: PathBuf, reason: String },
}

fn join_violations(violations: &[InvariantViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn describe_found(found: &Option<Fingerprint>) -> String {
    match found {
        Some(fp) => fp.to_string(),
        None => "no file".to_string(),
    }
}

impl Error {
    /// Creates a parse error at a 1-based line.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use dx_serializer::Error;
    ///
    /// let err = Error::parse(10, "unknown sigil");
    /// assert!(err.to_string().contains("line 10"));
    /// ```
    pub fn parse<T: fmt::Display>(line: usize, reason: T) -> Self {
        Error::Parse {
            line,
            reason: reason.to_string(),
        }
    }

    /// Creates an encoding error from the violations found by validation.
    pub fn encoding(violations: Vec<InvariantViolation>) -> Self {
        Error::Encoding { violations }
    }

    /// Creates an integrity error for a refused machine buffer.
    pub fn integrity<T: fmt::Display>(reason: T) -> Self {
        Error::Integrity {
            reason: reason.to_string(),
        }
    }

    /// Creates an IO error bound to the path that caused it.
    pub fn io(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            reason: err.to_string(),
        }
    }

    /// Returns the line number for parse errors.
    #[must_use]
    pub fn line(&self) -> Option<usize> {
        match self {
            Error::Parse { line, .. } => Some(*line),
            _ => None,
        }
    }

    /// Returns `true` for errors that a later attempt with the same input could fix.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Io { .. } | Error::StaleCache { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_display() {
        let err = Error::parse(3, "row has 2 fields, schema expects 3");
        let msg = err.to_string();
        assert!(msg.contains("line 3"));
        assert!(msg.contains("expects 3"));
        assert_eq!(err.line(), Some(3));
    }

    #[test]
    fn test_encoding_display_joins_violations() {
        let err = Error::encoding(vec![
            InvariantViolation::DuplicateSectionId {
                id: "forge".to_string(),
            },
            InvariantViolation::ReservedSectionId {
                id: "config".to_string(),
            },
        ]);
        let msg = err.to_string();
        assert!(msg.contains("forge"));
        assert!(msg.contains("; "));
    }

    #[test]
    fn test_conflict_display() {
        let err = Error::Conflict {
            path: PathBuf::from("config/app.dx"),
            expected: Fingerprint::of(b"ours"),
            found: None,
        };
        let msg = err.to_string();
        assert!(msg.contains("config/app.dx"));
        assert!(msg.contains("no file"));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_io_is_transient() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = Error::io("/tmp/x", &io);
        assert!(err.is_transient());
        assert!(err.to_string().contains("denied"));
    }
}
