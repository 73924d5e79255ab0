//! The in-memory document model shared by all three codecs.
//!
//! A [`Document`] is intentionally two-level: a flat [`ContextMap`] of
//! scalar or array fields, plus zero or more named flat tables
//! ([`Section`]). There is no deeper nesting.
//!
//! ## Validation
//!
//! [`Document::validate`] checks every structural rule and returns the list of
//! [`InvariantViolation`]s without mutating anything. Encoders refuse a
//! document with violations, and decoders refuse to return one.
//!
//! ```rust
//! use dx_serializer::{Column, Document, Section, TypeHint, Value};
//!
//! let doc = Document::new()
//!     .with_context("name", "dx")
//!     .with_section(
//!         Section::new("deps", vec![
//!             Column::new("id", TypeHint::AutoId),
//!             Column::new("crate", TypeHint::String),
//!             Column::new("major", TypeHint::Int),
//!         ])
//!         .with_row(vec![Value::from("serde"), Value::from(1)]),
//!     );
//!
//! assert!(doc.validate().is_empty());
//! assert_eq!(
//!     doc.sections[0].expanded_row(0),
//!     Some(vec![Value::from(1), Value::from("serde"), Value::from(1)])
//! );
//! ```

use crate::error::{Error, Result};
use crate::{ContextMap, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Longest string, in bytes, any codec will encode.
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

/// Largest number of elements in one array value.
pub const MAX_ARRAY_LEN: usize = u16::MAX as usize;

/// Section id used by the human view for the context block.
pub const RESERVED_SECTION_ID: &str = "config";

/// A stored row: one value per non-auto-id column, in column order.
pub type Row = Vec<Value>;

/// Per-column type tag controlling compact encoding.
///
/// # Examples
///
/// ```rust
/// use dx_serializer::TypeHint;
///
/// assert_eq!(TypeHint::from_suffix('x'), Some(TypeHint::Base62));
/// assert_eq!(TypeHint::Bool.suffix(), Some('b'));
/// assert_eq!(TypeHint::String.suffix(), None);
/// assert!(!TypeHint::AutoId.is_stored());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeHint {
    #[default]
    String,
    Int,
    Float,
    Bool,
    Base62,
    AutoId,
}

impl TypeHint {
    /// Every type hint, in tag order.
    pub const ALL: [TypeHint; 6] = [
        TypeHint::String,
        TypeHint::Int,
        TypeHint::Float,
        TypeHint::Bool,
        TypeHint::Base62,
        TypeHint::AutoId,
    ];

    /// Returns the `%t` suffix written after a column name, or `None` for
    /// plain string columns.
    #[must_use]
    pub const fn suffix(self) -> Option<char> {
        match self {
            TypeHint::String => None,
            TypeHint::Int => Some('i'),
            TypeHint::Float => Some('f'),
            TypeHint::Bool => Some('b'),
            TypeHint::Base62 => Some('x'),
            TypeHint::AutoId => Some('#'),
        }
    }

    /// Parses a `%t` suffix character. `s` is accepted as an explicit string.
    #[must_use]
    pub const fn from_suffix(c: char) -> Option<Self> {
        match c {
            's' => Some(TypeHint::String),
            'i' => Some(TypeHint::Int),
            'f' => Some(TypeHint::Float),
            'b' => Some(TypeHint::Bool),
            'x' => Some(TypeHint::Base62),
            '#' => Some(TypeHint::AutoId),
            _ => None,
        }
    }

    /// Returns the name shown in human view headers, e.g. `port (int)`.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            TypeHint::String => "string",
            TypeHint::Int => "int",
            TypeHint::Float => "float",
            TypeHint::Bool => "bool",
            TypeHint::Base62 => "base62",
            TypeHint::AutoId => "auto",
        }
    }

    /// Parses a human view label.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|hint| hint.label() == label)
    }

    /// Returns the one-byte tag used by the machine format.
    #[must_use]
    pub(crate) const fn code(self) -> u8 {
        match self {
            TypeHint::String => 0,
            TypeHint::Int => 1,
            TypeHint::Float => 2,
            TypeHint::Bool => 3,
            TypeHint::Base62 => 4,
            TypeHint::AutoId => 5,
        }
    }

    #[must_use]
    pub(crate) fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code)).copied()
    }

    /// Returns `true` for columns whose cells are right-aligned numbers.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(
            self,
            TypeHint::Int | TypeHint::Float | TypeHint::Base62 | TypeHint::AutoId
        )
    }

    /// Returns `false` for auto-id columns, which never hold a stored value.
    #[must_use]
    pub const fn is_stored(self) -> bool {
        !matches!(self, TypeHint::AutoId)
    }

    fn accepts_scalar(self, value: &Value) -> bool {
        match (self, value) {
            (TypeHint::String, Value::String(_))
            | (TypeHint::Int, Value::Integer(_))
            | (TypeHint::Float, Value::Float(_))
            | (TypeHint::Bool, Value::Bool(_)) => true,
            (TypeHint::Base62, Value::Integer(n)) => *n >= 0,
            _ => false,
        }
    }

    /// Returns `true` if `value`, or every element of it, matches this type.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match value {
            Value::Array(items) => items.iter().all(|item| self.accepts_scalar(item)),
            scalar => self.accepts_scalar(scalar),
        }
    }
}

/// A named, typed column of a [`Section`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub type_hint: TypeHint,
}

impl Column {
    /// Creates a column.
    #[must_use]
    pub fn new(name: impl Into<String>, type_hint: TypeHint) -> Self {
        Column {
            name: name.into(),
            type_hint,
        }
    }
}

/// A named flat table inside a [`Document`].
///
/// Rows store values for the stored columns only. An auto-id column has no
/// stored cell; its value is the 1-based row position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
}

impl Section {
    /// Creates a section with no rows.
    #[must_use]
    pub fn new(id: impl Into<String>, columns: Vec<Column>) -> Self {
        Section {
            id: id.into(),
            columns,
            rows: Vec::new(),
        }
    }

    /// Appends a row, builder style.
    #[must_use]
    pub fn with_row(mut self, row: Row) -> Self {
        self.rows.push(row);
        self
    }

    /// Appends a row.
    pub fn push_row(&mut self, row: Row) {
        self.rows.push(row);
    }

    /// Returns the columns that carry a stored value, in order.
    pub fn stored_columns(&self) -> impl Iterator<Item = &Column> + '_ {
        self.columns.iter().filter(|c| c.type_hint.is_stored())
    }

    /// Returns the number of fields each stored row must have.
    #[must_use]
    pub fn stored_width(&self) -> usize {
        self.stored_columns().count()
    }

    /// Returns the position of the auto-id column, if any.
    #[must_use]
    pub fn auto_id_index(&self) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.type_hint == TypeHint::AutoId)
    }

    /// Returns row `index` with the auto-id value spliced in, giving one
    /// value per declared column.
    #[must_use]
    pub fn expanded_row(&self, index: usize) -> Option<Vec<Value>> {
        let row = self.rows.get(index)?;
        let mut cells = Vec::with_capacity(self.columns.len());
        let mut stored = row.iter();
        for column in &self.columns {
            if column.type_hint.is_stored() {
                cells.push(stored.next()?.clone());
            } else {
                cells.push(Value::Integer(auto_id_value(index)));
            }
        }
        Some(cells)
    }
}

/// Returns the auto-id value of the row at `index`.
#[inline]
#[must_use]
pub fn auto_id_value(index: usize) -> i64 {
    i64::try_from(index).map_or(i64::MAX, |i| i.saturating_add(1))
}

/// A rule broken by a document.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum InvariantViolation {
    #[error("invalid name {name:?}")]
    InvalidName { name: String },

    #[error("section id {id:?} is reserved")]
    ReservedSectionId { id: String },

    #[error("duplicate section id {id:?}")]
    DuplicateSectionId { id: String },

    #[error("section {section:?} declares column {column:?} twice")]
    DuplicateColumn { section: String, column: String },

    #[error("section {section:?} has no stored columns")]
    EmptySchema { section: String },

    #[error("section {section:?} has more than one auto-id column")]
    MultipleAutoId { section: String },

    #[error("section {section:?} row {row} has {found} fields, schema expects {expected}")]
    RowArity {
        section: String,
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("{location}: expected {expected:?}, found {found}")]
    TypeMismatch {
        location: String,
        expected: TypeHint,
        found: String,
    },

    #[error("{location}: negative value {value} in base62 column")]
    NegativeBase62 { location: String, value: i64 },

    #[error("{location}: float is not finite")]
    NonFiniteFloat { location: String },

    #[error("{location}: string of {len} bytes exceeds 65535")]
    StringTooLong { location: String, len: usize },

    #[error("{location}: array of {len} elements exceeds 65535")]
    ArrayTooLong { location: String, len: usize },

    #[error("{location}: arrays cannot be nested")]
    NestedArray { location: String },

    #[error("encoded form of {len} bytes does not fit 32-bit offsets")]
    TooLarge { len: usize },

    /// Only raised by exports that put context fields and sections in one
    /// namespace, such as JSON.
    #[error("{key:?} names both a context field and a section")]
    KeyClash { key: String },
}

impl InvariantViolation {
    /// Returns the section the violation belongs to, if any.
    #[must_use]
    pub fn section(&self) -> Option<&str> {
        match self {
            InvariantViolation::ReservedSectionId { id }
            | InvariantViolation::DuplicateSectionId { id } => Some(id),
            InvariantViolation::DuplicateColumn { section, .. }
            | InvariantViolation::EmptySchema { section }
            | InvariantViolation::MultipleAutoId { section }
            | InvariantViolation::RowArity { section, .. } => Some(section),
            InvariantViolation::TypeMismatch { location, .. }
            | InvariantViolation::NegativeBase62 { location, .. }
            | InvariantViolation::NonFiniteFloat { location }
            | InvariantViolation::StringTooLong { location, .. }
            | InvariantViolation::ArrayTooLong { location, .. }
            | InvariantViolation::NestedArray { location } => location
                .split_once('[')
                .map(|(section, _)| section),
            InvariantViolation::InvalidName { .. }
            | InvariantViolation::TooLarge { .. }
            | InvariantViolation::KeyClash { .. } => None,
        }
    }
}

/// Returns `true` if `name` matches `[A-Za-z_][A-Za-z0-9_.-]*`.
///
/// Context keys, section ids and column names all follow this rule, so none
/// of them ever needs quoting.
///
/// # Examples
///
/// ```rust
/// use dx_serializer::is_valid_name;
///
/// assert!(is_valid_name("ci_cd"));
/// assert!(is_valid_name("i18n.locale"));
/// assert!(!is_valid_name("9lives"));
/// assert!(!is_valid_name("has space"));
/// ```
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// The canonical in-memory document.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct Document {
    pub context: ContextMap,
    pub sections: Vec<Section>,
}

impl Document {
    /// Creates an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a context field, builder style.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Adds a section, builder style.
    #[must_use]
    pub fn with_section(mut self, section: Section) -> Self {
        self.sections.push(section);
        self
    }

    /// Looks up a section by id.
    #[must_use]
    pub fn section(&self, id: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == id)
    }

    /// Checks every document invariant. Never mutates.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use dx_serializer::{Column, Document, InvariantViolation, Section, TypeHint, Value};
    ///
    /// let doc = Document::new().with_section(
    ///     Section::new("ports", vec![Column::new("port", TypeHint::Int)])
    ///         .with_row(vec![Value::from("eighty")]),
    /// );
    ///
    /// let violations = doc.validate();
    /// assert!(matches!(violations[0], InvariantViolation::TypeMismatch { .. }));
    /// ```
    #[must_use]
    pub fn validate(&self) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();

        for (key, value) in &self.context {
            check_name(key, &mut violations);
            check_value(value, None, &format!("context.{key}"), &mut violations);
        }

        let mut seen = HashSet::new();
        for section in &self.sections {
            if !seen.insert(section.id.as_str()) {
                violations.push(InvariantViolation::DuplicateSectionId {
                    id: section.id.clone(),
                });
            }
            check_section(section, &mut violations);
        }

        violations
    }

    /// Returns `true` if [`validate`](Self::validate) finds nothing.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }

    /// Refuses a document about to be encoded.
    pub(crate) fn ensure_valid(&self) -> Result<()> {
        let violations = self.validate();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(Error::encoding(violations))
        }
    }

    /// Refuses a freshly decoded document, reporting the first violation at
    /// the line `line_of` attributes to it.
    pub(crate) fn into_decoded(
        self,
        line_of: impl Fn(&InvariantViolation) -> usize,
    ) -> Result<Document> {
        match self.validate().into_iter().next() {
            None => Ok(self),
            Some(violation) => Err(Error::parse(line_of(&violation), violation)),
        }
    }
}

fn check_name(name: &str, violations: &mut Vec<InvariantViolation>) {
    if !is_valid_name(name) {
        violations.push(InvariantViolation::InvalidName {
            name: name.to_string(),
        });
    }
}

fn check_section(section: &Section, violations: &mut Vec<InvariantViolation>) {
    check_name(&section.id, violations);
    if section.id == RESERVED_SECTION_ID {
        violations.push(InvariantViolation::ReservedSectionId {
            id: section.id.clone(),
        });
    }

    let mut names = HashSet::new();
    for column in &section.columns {
        check_name(&column.name, violations);
        if !names.insert(column.name.as_str()) {
            violations.push(InvariantViolation::DuplicateColumn {
                section: section.id.clone(),
                column: column.name.clone(),
            });
        }
    }

    let width = section.stored_width();
    if width == 0 {
        violations.push(InvariantViolation::EmptySchema {
            section: section.id.clone(),
        });
    }
    if section.columns.len() - width > 1 {
        violations.push(InvariantViolation::MultipleAutoId {
            section: section.id.clone(),
        });
    }

    for (index, row) in section.rows.iter().enumerate() {
        if row.len() != width {
            violations.push(InvariantViolation::RowArity {
                section: section.id.clone(),
                row: index,
                expected: width,
                found: row.len(),
            });
            continue;
        }
        for (column, value) in section.stored_columns().zip(row) {
            let location = format!("{}[{index}].{}", section.id, column.name);
            check_value(value, Some(column.type_hint), &location, violations);
        }
    }
}

fn check_value(
    value: &Value,
    hint: Option<TypeHint>,
    location: &str,
    violations: &mut Vec<InvariantViolation>,
) {
    match value {
        Value::Array(items) => {
            if items.len() > MAX_ARRAY_LEN {
                violations.push(InvariantViolation::ArrayTooLong {
                    location: location.to_string(),
                    len: items.len(),
                });
            }
            for item in items {
                if item.is_array() {
                    violations.push(InvariantViolation::NestedArray {
                        location: location.to_string(),
                    });
                } else {
                    check_scalar(item, hint, location, violations);
                }
            }
        }
        scalar => check_scalar(scalar, hint, location, violations),
    }
}

fn check_scalar(
    value: &Value,
    hint: Option<TypeHint>,
    location: &str,
    violations: &mut Vec<InvariantViolation>,
) {
    match value {
        Value::String(s) if s.len() > MAX_STRING_LEN => {
            violations.push(InvariantViolation::StringTooLong {
                location: location.to_string(),
                len: s.len(),
            });
        }
        Value::Float(f) if !f.is_finite() => {
            violations.push(InvariantViolation::NonFiniteFloat {
                location: location.to_string(),
            });
        }
        _ => {}
    }

    let Some(hint) = hint else { return };
    match (hint, value) {
        (TypeHint::Base62, Value::Integer(n)) if *n < 0 => {
            violations.push(InvariantViolation::NegativeBase62 {
                location: location.to_string(),
                value: *n,
            });
        }
        _ if !hint.accepts(value) => {
            violations.push(InvariantViolation::TypeMismatch {
                location: location.to_string(),
                expected: hint,
                found: value.type_name().to_string(),
            });
        }
        _ => {}
    }
}
