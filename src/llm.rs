//! The compact canonical text form written to source files.
//!
//! ## Grammar
//!
//! The format is line oriented:
//!
//! - `#c:k1|v1;k2|v2` holds context fields. Values are untyped and written as
//!   literal text (`true`, `42`, `1.5`, `dx`).
//! - `#:k|v` is a reference line. References live outside the document and
//!   are returned separately by [`decode_with_references`].
//! - `#id(col1|col2%i|col3%#)` opens a section. A `%t` suffix sets the
//!   column type: `i` int, `f` float, `b` bool, `x` base-62, `#` auto-id,
//!   `s` string (the default).
//! - Every other non-blank line is a `|`-separated row of the open section.
//!   Auto-id columns take no field. Bools are written `+`/`-`, base-62 columns
//!   as digits, arrays as `*a,b,c`.
//!
//! Blank lines are ignored and any `#` line closes the open section.
//!
//! ## Examples
//!
//! ```rust
//! use dx_serializer::{llm, Value};
//!
//! let doc = llm::decode("#c:name|dx;version|0.0.1").unwrap();
//! assert_eq!(doc.context.get("name"), Some(&Value::from("dx")));
//! assert_eq!(doc.context.get("version"), Some(&Value::from("0.0.1")));
//!
//! let text = llm::encode(&doc).unwrap();
//! assert_eq!(text, "#c:name|dx;version|0.0.1\n");
//! ```

use crate::base62;
use crate::document::{is_valid_name, Column, Document, InvariantViolation, Section, TypeHint};
use crate::error::{Error, Result};
use crate::escape::{
    infer_scalar, is_quoted, looks_like_literal, needs_quotes, quote_if, split_quoted, unquote,
};
use crate::Value;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

/// Reference lines (`#:k|v`), in file order.
pub type References = IndexMap<String, String>;

/// Encodes a document into canonical text.
///
/// Output is deterministic: context first in insertion order, then sections
/// in declaration order with rows in stored order. Every line ends in `\n`.
///
/// # Errors
///
/// Returns [`Error::Encoding`] if the document fails validation.
pub fn encode(doc: &Document) -> Result<String> {
    encode_with_references(doc, &References::new())
}

/// Encodes a document followed by reference lines.
///
/// # Errors
///
/// Returns [`Error::Encoding`] if the document fails validation or a
/// reference key is not a valid name.
///
/// # Examples
///
/// ```rust
/// use dx_serializer::{llm, Document};
/// use dx_serializer::llm::References;
///
/// let mut refs = References::new();
/// refs.insert("base".to_string(), "../shared.dx".to_string());
///
/// let text = llm::encode_with_references(&Document::new(), &refs).unwrap();
/// assert_eq!(text, "#:base|../shared.dx\n");
/// ```
pub fn encode_with_references(doc: &Document, refs: &References) -> Result<String> {
    doc.ensure_valid()?;
    let bad_refs: Vec<_> = refs
        .keys()
        .filter(|key| !is_valid_name(key))
        .map(|key| InvariantViolation::InvalidName { name: key.clone() })
        .collect();
    if !bad_refs.is_empty() {
        return Err(Error::encoding(bad_refs));
    }

    let mut out = String::new();

    if !doc.context.is_empty() {
        out.push_str("#c:");
        for (i, (key, value)) in doc.context.iter().enumerate() {
            if i > 0 {
                out.push(';');
            }
            out.push_str(key);
            out.push('|');
            out.push_str(&context_text(value));
        }
        out.push('\n');
    }

    for (key, value) in refs {
        out.push_str("#:");
        out.push_str(key);
        out.push('|');
        out.push_str(&quote_if(value, needs_quotes(value, &[])));
        out.push('\n');
    }

    for section in &doc.sections {
        write_section(&mut out, section);
    }

    debug!(
        context = doc.context.len(),
        sections = doc.sections.len(),
        bytes = out.len(),
        "encoded llm document"
    );
    Ok(out)
}

fn write_section(out: &mut String, section: &Section) {
    out.push('#');
    out.push_str(&section.id);
    out.push('(');
    for (i, column) in section.columns.iter().enumerate() {
        if i > 0 {
            out.push('|');
        }
        out.push_str(&column.name);
        if let Some(suffix) = column.type_hint.suffix() {
            out.push('%');
            out.push(suffix);
        }
    }
    out.push_str(")\n");

    for row in &section.rows {
        for (i, (column, value)) in section.stored_columns().zip(row).enumerate() {
            if i > 0 {
                out.push('|');
            }
            out.push_str(&cell_text(column.type_hint, value));
        }
        out.push('\n');
    }
}

fn context_text(value: &Value) -> String {
    fn scalar(value: &Value, extra: &[char]) -> String {
        match value {
            Value::String(s) => quote_if(s, needs_quotes(s, extra) || looks_like_literal(s)),
            other => other.to_string(),
        }
    }

    match value {
        Value::Array(items) => {
            let elements: Vec<_> = items.iter().map(|v| scalar(v, &[';', ','])).collect();
            format!("*{}", elements.join(","))
        }
        other => scalar(other, &[';']),
    }
}

fn cell_text(hint: TypeHint, value: &Value) -> String {
    fn scalar(hint: TypeHint, value: &Value, extra: &[char]) -> String {
        match (hint, value) {
            (_, Value::String(s)) => quote_if(s, needs_quotes(s, extra)),
            (_, Value::Bool(b)) => (if *b { "+" } else { "-" }).to_string(),
            (TypeHint::Base62, Value::Integer(n)) => {
                base62::encode(*n).unwrap_or_else(|| n.to_string())
            }
            (_, other) => other.to_string(),
        }
    }

    match value {
        Value::Array(items) => {
            let elements: Vec<_> = items.iter().map(|v| scalar(hint, v, &[','])).collect();
            format!("*{}", elements.join(","))
        }
        other => scalar(hint, other, &[]),
    }
}

/// Decodes canonical text into a document, dropping reference lines.
///
/// # Errors
///
/// Fails the whole parse with [`Error::Parse`] on an unknown sigil, a
/// duplicate section id or context key, an unterminated section header, a
/// row outside any section, a row whose field count disagrees with its
/// schema, or a field that does not match its column type.
///
/// # Examples
///
/// ```rust
/// use dx_serializer::{llm, Value};
///
/// let doc = llm::decode("#forge(id%#|name|stars%x)\ndx|5A\ncore|0\n").unwrap();
/// let forge = doc.section("forge").unwrap();
/// assert_eq!(forge.rows[0], vec![Value::from("dx"), Value::from(320)]);
/// assert_eq!(forge.expanded_row(1).unwrap()[0], Value::from(2));
/// ```
pub fn decode(text: &str) -> Result<Document> {
    decode_with_references(text).map(|(doc, _)| doc)
}

/// Decodes canonical text, also returning its reference lines.
///
/// # Errors
///
/// Same as [`decode`]; a duplicate reference key is also a parse error.
pub fn decode_with_references(text: &str) -> Result<(Document, References)> {
    let mut parser = Parser::default();
    for (index, raw) in text.lines().enumerate() {
        parser.line(index + 1, raw.trim_end_matches('\r'))?;
    }
    parser.finish()
}

/// Interprets raw source bytes as text, reporting invalid UTF-8 as a parse
/// error on the line where it starts.
pub(crate) fn text_from_bytes(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|e| {
        let line = bytes[..e.valid_up_to()].iter().filter(|&&b| b == b'\n').count() + 1;
        Error::parse(line, format!("invalid UTF-8: {e}"))
    })
}

#[derive(Default)]
struct Parser {
    doc: Document,
    refs: References,
    open: Option<Section>,
    section_ids: HashSet<String>,
    section_lines: HashMap<String, usize>,
    context_line: Option<usize>,
}

impl Parser {
    fn line(&mut self, line_no: usize, line: &str) -> Result<()> {
        if line.trim().is_empty() {
            return Ok(());
        }

        let Some(rest) = line.strip_prefix('#') else {
            return self.row(line_no, line);
        };

        self.close_section();
        if let Some(fields) = rest.strip_prefix("c:") {
            self.context(line_no, fields)
        } else if let Some(reference) = rest.strip_prefix(':') {
            self.reference(line_no, reference)
        } else {
            self.section_header(line_no, rest)
        }
    }

    fn close_section(&mut self) {
        if let Some(section) = self.open.take() {
            trace!(id = %section.id, rows = section.rows.len(), "closed section");
            self.doc.sections.push(section);
        }
    }

    fn context(&mut self, line_no: usize, fields: &str) -> Result<()> {
        self.context_line.get_or_insert(line_no);
        if fields.is_empty() {
            return Ok(());
        }
        let pairs = split_quoted(fields, ';').map_err(|e| Error::parse(line_no, e))?;
        for pair in pairs {
            let (key, raw) = pair.split_once('|').ok_or_else(|| {
                Error::parse(line_no, format!("context entry {pair:?} has no value"))
            })?;
            if !is_valid_name(key) {
                return Err(Error::parse(line_no, format!("invalid context key {key:?}")));
            }
            if self.doc.context.contains_key(key) {
                return Err(Error::parse(line_no, format!("duplicate context key {key:?}")));
            }
            let value = context_value(raw).map_err(|e| Error::parse(line_no, e))?;
            self.doc.context.insert(key.to_string(), value);
        }
        Ok(())
    }

    fn reference(&mut self, line_no: usize, reference: &str) -> Result<()> {
        let (key, raw) = reference
            .split_once('|')
            .ok_or_else(|| Error::parse(line_no, "reference line has no value"))?;
        if !is_valid_name(key) {
            return Err(Error::parse(line_no, format!("invalid reference key {key:?}")));
        }
        if self.refs.contains_key(key) {
            return Err(Error::parse(line_no, format!("duplicate reference {key:?}")));
        }
        let value = unquote(raw).map_err(|e| Error::parse(line_no, e))?;
        self.refs.insert(key.to_string(), value);
        Ok(())
    }

    fn section_header(&mut self, line_no: usize, rest: &str) -> Result<()> {
        let unknown = || Error::parse(line_no, format!("unknown sigil #{rest}"));
        let (id, schema) = rest.split_once('(').ok_or_else(unknown)?;
        if !is_valid_name(id) {
            return Err(unknown());
        }
        let schema = schema
            .strip_suffix(')')
            .ok_or_else(|| Error::parse(line_no, format!("unterminated section #{id}")))?;
        if schema.is_empty() {
            return Err(Error::parse(line_no, format!("section {id:?} declares no columns")));
        }
        if !self.section_ids.insert(id.to_string()) {
            return Err(Error::parse(line_no, format!("duplicate section id {id:?}")));
        }

        let columns = schema
            .split('|')
            .map(|token| parse_column(token).map_err(|e| Error::parse(line_no, e)))
            .collect::<Result<Vec<_>>>()?;

        self.section_lines.insert(id.to_string(), line_no);
        self.open = Some(Section::new(id, columns));
        Ok(())
    }

    fn row(&mut self, line_no: usize, line: &str) -> Result<()> {
        let section = self
            .open
            .as_mut()
            .ok_or_else(|| Error::parse(line_no, "row outside of any section"))?;

        let fields = split_quoted(line, '|').map_err(|e| Error::parse(line_no, e))?;
        let expected = section.stored_width();
        if fields.len() != expected {
            return Err(Error::parse(
                line_no,
                format!(
                    "row has {} fields, schema of {:?} expects {expected}",
                    fields.len(),
                    section.id
                ),
            ));
        }

        let row = section
            .stored_columns()
            .zip(fields)
            .map(|(column, field)| {
                cell_value(column.type_hint, field)
                    .map_err(|e| Error::parse(line_no, format!("column {:?}: {e}", column.name)))
            })
            .collect::<Result<Vec<_>>>()?;
        section.rows.push(row);
        Ok(())
    }

    fn finish(mut self) -> Result<(Document, References)> {
        self.close_section();
        let Parser {
            doc,
            refs,
            section_lines,
            context_line,
            ..
        } = self;

        let doc = doc.into_decoded(|violation| {
            violation
                .section()
                .and_then(|id| section_lines.get(id).copied())
                .or(context_line)
                .unwrap_or(1)
        })?;

        debug!(
            context = doc.context.len(),
            sections = doc.sections.len(),
            references = refs.len(),
            "decoded llm document"
        );
        Ok((doc, refs))
    }
}

fn parse_column(token: &str) -> std::result::Result<Column, String> {
    let (name, hint) = match token.split_once('%') {
        None => (token, TypeHint::String),
        Some((name, suffix)) => {
            let mut chars = suffix.chars();
            let hint = match (chars.next(), chars.next()) {
                (Some(c), None) => TypeHint::from_suffix(c),
                _ => None,
            }
            .ok_or_else(|| format!("unknown type suffix %{suffix}"))?;
            (name, hint)
        }
    };
    if !is_valid_name(name) {
        return Err(format!("invalid column name {name:?}"));
    }
    Ok(Column::new(name, hint))
}

fn context_value(raw: &str) -> std::result::Result<Value, String> {
    match raw.strip_prefix('*') {
        Some(list) => array_elements(list)?
            .into_iter()
            .map(infer_scalar)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Value::Array),
        None => infer_scalar(raw),
    }
}

fn cell_value(hint: TypeHint, field: &str) -> std::result::Result<Value, String> {
    match field.strip_prefix('*') {
        Some(list) => array_elements(list)?
            .into_iter()
            .map(|element| scalar_value(hint, element))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Value::Array),
        None => scalar_value(hint, field),
    }
}

fn array_elements(list: &str) -> std::result::Result<Vec<&str>, String> {
    if list.is_empty() {
        Ok(Vec::new())
    } else {
        split_quoted(list, ',')
    }
}

fn scalar_value(hint: TypeHint, field: &str) -> std::result::Result<Value, String> {
    let invalid = || format!("invalid {} value {field:?}", hint.label());
    match hint {
        TypeHint::String => unquote(field).map(Value::String),
        _ if is_quoted(field) => Err(invalid()),
        TypeHint::Int => field.parse().map(Value::Integer).map_err(|_| invalid()),
        TypeHint::Float => field.parse().map(Value::Float).map_err(|_| invalid()),
        TypeHint::Bool => match field {
            "+" | "true" => Ok(Value::Bool(true)),
            "-" | "false" => Ok(Value::Bool(false)),
            _ => Err(invalid()),
        },
        TypeHint::Base62 => base62::decode(field).map(Value::Integer).ok_or_else(invalid),
        TypeHint::AutoId => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        Document::new()
            .with_context("name", "dx")
            .with_context("debug", true)
            .with_context("count", "42")
            .with_context("tags", Value::from(vec![Value::from("a,b"), Value::from(3)]))
            .with_section(
                Section::new(
                    "forge",
                    vec![
                        Column::new("id", TypeHint::AutoId),
                        Column::new("name", TypeHint::String),
                        Column::new("stars", TypeHint::Base62),
                        Column::new("ok", TypeHint::Bool),
                        Column::new("ratio", TypeHint::Float),
                    ],
                )
                .with_row(vec![
                    Value::from("dx"),
                    Value::from(320),
                    Value::from(true),
                    Value::from(1.0),
                ])
                .with_row(vec![
                    Value::from("#hash | pipe"),
                    Value::from(0),
                    Value::from(false),
                    Value::from(-2.5e-9),
                ]),
            )
    }

    #[test]
    fn test_encode_layout() {
        let text = encode(&sample()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "#c:name|dx;debug|true;count|\"42\";tags|*\"a,b\",3");
        assert_eq!(lines[1], "#forge(id%#|name|stars%x|ok%b|ratio%f)");
        assert_eq!(lines[2], "dx|5A|+|1.0");
        assert_eq!(lines[3], "\"#hash | pipe\"|0|-|-2.5e-9");
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_roundtrip() {
        let doc = sample();
        assert_eq!(decode(&encode(&doc).unwrap()).unwrap(), doc);
    }

    #[test]
    fn test_typed_arrays_and_empty_values() {
        let doc = Document::new().with_section(
            Section::new(
                "t",
                vec![
                    Column::new("s", TypeHint::String),
                    Column::new("n", TypeHint::Int),
                ],
            )
            .with_row(vec![
                Value::from(vec![Value::from(""), Value::from("x")]),
                Value::from(vec![]),
            ])
            .with_row(vec![Value::from(""), Value::from(vec![Value::from(-1)])]),
        );
        let text = encode(&doc).unwrap();
        assert_eq!(text, "#t(s|n%i)\n*\"\",x|*\n\"\"|*-1\n");
        assert_eq!(decode(&text).unwrap(), doc);
    }

    #[test]
    fn test_blank_lines_and_crlf() {
        let doc = decode("#c:a|1\r\n\r\n#s(x%i)\r\n\r\n7\r\n").unwrap();
        assert_eq!(doc.context.get("a"), Some(&Value::from(1)));
        assert_eq!(doc.sections[0].rows, vec![vec![Value::from(7)]]);
    }

    #[test]
    fn test_references() {
        let (doc, refs) = decode_with_references("#:base|\"a|b\"\n#c:x|1\n").unwrap();
        assert_eq!(refs.get("base").map(String::as_str), Some("a|b"));
        assert_eq!(doc.context.len(), 1);
        let text = encode_with_references(&doc, &refs).unwrap();
        assert_eq!(text, "#c:x|1\n#:base|\"a|b\"\n");
    }

    #[test]
    fn test_parse_errors_carry_lines() {
        let cases = [
            ("#c:a|1\n#?what", 2),
            ("#s(a)\n#s(b)", 2),
            ("#c:a|1;a|2", 1),
            ("#s(a|b)\nx|y\nx", 3),
            ("x|y", 1),
            ("#s(a|b", 1),
            ("#s(a%q)", 1),
            ("#s(n%i)\nabc", 2),
            ("#s()", 1),
            ("#config(a)\nx", 1),
            ("#s(id%#)\n", 1),
        ];
        for (text, line) in cases {
            let err = decode(text).unwrap_err();
            assert_eq!(err.line(), Some(line), "{text:?}: {err}");
        }
    }

    #[test]
    fn test_encode_refuses_invalid() {
        let doc = Document::new().with_section(
            Section::new("s", vec![Column::new("n", TypeHint::Int)])
                .with_row(vec![Value::from("x")]),
        );
        assert!(matches!(encode(&doc), Err(Error::Encoding { .. })));
    }

    #[test]
    fn test_invalid_utf8_reports_line() {
        let err = text_from_bytes(b"#c:a|1\n#s(a)\n\xff").unwrap_err();
        assert_eq!(err.line(), Some(3));
        assert_eq!(text_from_bytes(b"#c:a|1").unwrap(), "#c:a|1");
    }
}
