//! Direct conversions between the three forms, and JSON import and export.
//!
//! Each helper decodes into a [`Document`] and encodes the target form, so it
//! fails wherever that decode or encode would.
//!
//! ## JSON
//!
//! [`json_to_document`] maps a JSON object onto the two-level document model:
//!
//! - a scalar or an array of scalars becomes a context field
//! - a nested object is flattened into dotted keys (`{"a": {"b": 1}}` gives
//!   `a.b = 1`)
//! - a non-empty array of objects becomes a section named after its key, with
//!   the fields of its first object as columns, in order
//!
//! Column types are inferred from every value in the column: only bools give
//! a bool column, only integers an int column, only numbers a float column.
//! Anything else is a string column holding the values' JSON text. `null` has
//! no document form and is refused.
//!
//! [`document_to_json`] writes the same shape back. Auto-id columns export as
//! numbers, and a section without rows exports as an empty array, which reads
//! back as an empty context field.
//!
//! ## Examples
//!
//! ```rust
//! use dx_serializer::convert;
//!
//! let json = r#"{"name": "dx", "deps": [{"crate": "serde", "major": 1}]}"#;
//! let text = convert::json_to_llm(json).unwrap();
//! assert_eq!(text, "#c:name|dx\n#deps(crate|major%i)\nserde|1\n");
//! ```

use crate::document::{Column, Document, InvariantViolation, Section, TypeHint};
use crate::error::{Error, Result};
use crate::registry::KeyRegistry;
use crate::{human, llm, machine, Value};
use serde_json::{Map, Number, Value as Json};
use tracing::debug;

/// Renders canonical text as the human view.
///
/// # Errors
///
/// Returns [`Error::Parse`] if the text is malformed.
pub fn llm_to_human(text: &str, registry: &KeyRegistry) -> Result<String> {
    human::encode(&llm::decode(text)?, registry)
}

/// Converts an edited human view back to canonical text.
///
/// # Errors
///
/// Returns [`Error::Parse`] if the view is malformed.
pub fn human_to_llm(text: &str, registry: &KeyRegistry) -> Result<String> {
    llm::encode(&human::decode(text, registry)?)
}

/// Encodes canonical text as a machine buffer.
///
/// # Errors
///
/// Returns [`Error::Parse`] if the text is malformed, or [`Error::Encoding`]
/// if the document does not fit the machine layout.
pub fn llm_to_machine(text: &str) -> Result<Vec<u8>> {
    machine::encode(&llm::decode(text)?)
}

/// Recovers canonical text from a machine buffer.
///
/// # Errors
///
/// Returns [`Error::Integrity`] if the buffer is refused.
pub fn machine_to_llm(bytes: &[u8]) -> Result<String> {
    llm::encode(&machine::decode(bytes)?.materialize()?)
}

/// Encodes a human view as a machine buffer.
///
/// # Errors
///
/// Returns [`Error::Parse`] if the view is malformed, or [`Error::Encoding`]
/// if the document does not fit the machine layout.
pub fn human_to_machine(text: &str, registry: &KeyRegistry) -> Result<Vec<u8>> {
    machine::encode(&human::decode(text, registry)?)
}

/// Renders a machine buffer as the human view.
///
/// # Errors
///
/// Returns [`Error::Integrity`] if the buffer is refused.
pub fn machine_to_human(bytes: &[u8], registry: &KeyRegistry) -> Result<String> {
    human::encode(&machine::decode(bytes)?.materialize()?, registry)
}

/// Imports a JSON object as canonical text.
///
/// # Errors
///
/// See [`json_to_document`].
pub fn json_to_llm(json: &str) -> Result<String> {
    llm::encode(&json_to_document(json)?)
}

/// Exports canonical text as pretty-printed JSON.
///
/// # Errors
///
/// Returns [`Error::Parse`] if the text is malformed, or anything
/// [`document_to_json`] returns.
pub fn llm_to_json(text: &str) -> Result<String> {
    document_to_json(&llm::decode(text)?)
}

/// Maps a JSON object onto a document.
///
/// # Errors
///
/// Returns [`Error::Parse`] if the input is not JSON, its root is not an
/// object, it holds `null` or nested arrays, the rows of a table disagree on
/// their fields, or the resulting document breaks an invariant. Only syntax
/// errors carry their real line; shape errors are reported at line 1 with the
/// offending JSON path.
///
/// # Examples
///
/// ```rust
/// use dx_serializer::{convert::json_to_document, Value};
///
/// let doc = json_to_document(r#"{"server": {"port": 8080}, "tags": ["a", "b"]}"#).unwrap();
/// assert_eq!(doc.context.get("server.port"), Some(&Value::from(8080)));
/// assert_eq!(doc.context.get("tags").and_then(Value::as_array).map(<[_]>::len), Some(2));
/// ```
pub fn json_to_document(json: &str) -> Result<Document> {
    let root: Json = serde_json::from_str(json).map_err(|e| Error::parse(e.line().max(1), e))?;
    let Json::Object(fields) = root else {
        return Err(Error::parse(1, "JSON root must be an object"));
    };

    let mut doc = Document::new();
    import_object(&fields, "", &mut doc)?;
    let doc = doc.into_decoded(|_| 1)?;
    debug!(
        context = doc.context.len(),
        sections = doc.sections.len(),
        "imported json document"
    );
    Ok(doc)
}

/// Writes a document as a pretty-printed JSON object.
///
/// # Errors
///
/// Returns [`Error::Encoding`] if the document fails validation or a section
/// id equals a context key, since both become keys of one JSON object.
pub fn document_to_json(doc: &Document) -> Result<String> {
    doc.ensure_valid()?;

    let mut root = Map::new();
    for (key, value) in &doc.context {
        root.insert(key.clone(), json_value(value));
    }
    for section in &doc.sections {
        if root.contains_key(&section.id) {
            return Err(Error::encoding(vec![InvariantViolation::KeyClash {
                key: section.id.clone(),
            }]));
        }
        let rows = (0..section.rows.len())
            .filter_map(|r| section.expanded_row(r))
            .map(|row| {
                let fields = section
                    .columns
                    .iter()
                    .zip(&row)
                    .map(|(column, value)| (column.name.clone(), json_value(value)))
                    .collect();
                Json::Object(fields)
            })
            .collect();
        root.insert(section.id.clone(), Json::Array(rows));
    }

    Ok(format!("{:#}\n", Json::Object(root)))
}

fn import_object(fields: &Map<String, Json>, prefix: &str, doc: &mut Document) -> Result<()> {
    for (key, value) in fields {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Json::Object(nested) => import_object(nested, &name, doc)?,
            Json::Array(items) if !items.is_empty() && items.iter().all(Json::is_object) => {
                let section = import_section(&name, items)?;
                doc.sections.push(section);
            }
            other => {
                let value = context_value(other, &name)?;
                if doc.context.insert(name.clone(), value).is_some() {
                    return Err(shape_error(&name, "key appears twice once flattened"));
                }
            }
        }
    }
    Ok(())
}

fn import_section(id: &str, items: &[Json]) -> Result<Section> {
    let rows: Vec<&Map<String, Json>> = items.iter().filter_map(Json::as_object).collect();
    let names: Vec<&String> = rows.first().map(|row| row.keys().collect()).unwrap_or_default();

    let mut columns = Vec::with_capacity(names.len());
    let mut cells: Vec<Vec<Value>> = vec![Vec::with_capacity(names.len()); rows.len()];
    for (r, row) in rows.iter().enumerate() {
        if row.len() != names.len() {
            return Err(shape_error(&format!("{id}[{r}]"), "fields differ from the first row"));
        }
    }
    for name in names {
        let raw = rows
            .iter()
            .enumerate()
            .map(|(r, row)| {
                row.get(name.as_str()).ok_or_else(|| {
                    shape_error(&format!("{id}[{r}]"), format!("missing field {name:?}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let hint = infer_hint(&raw);
        for (r, value) in raw.into_iter().enumerate() {
            cells[r].push(cell(value, hint, &format!("{id}[{r}].{name}"))?);
        }
        columns.push(Column::new(name.as_str(), hint));
    }

    let mut section = Section::new(id, columns);
    section.rows = cells;
    Ok(section)
}

/// Narrowest column type holding every scalar of a column, arrays included.
fn infer_hint(values: &[&Json]) -> TypeHint {
    let scalars = values.iter().flat_map(|value| match value {
        Json::Array(items) => items.iter().collect::<Vec<_>>(),
        other => vec![*other],
    });
    let (mut total, mut bools, mut ints, mut numbers) = (0usize, 0usize, 0usize, 0usize);
    for item in scalars {
        total += 1;
        match item {
            Json::Bool(_) => bools += 1,
            Json::Number(n) => {
                numbers += 1;
                if n.is_i64() {
                    ints += 1;
                }
            }
            _ => {}
        }
    }

    if total == 0 {
        TypeHint::String
    } else if bools == total {
        TypeHint::Bool
    } else if ints == total {
        TypeHint::Int
    } else if numbers == total {
        TypeHint::Float
    } else {
        TypeHint::String
    }
}

fn cell(value: &Json, hint: TypeHint, location: &str) -> Result<Value> {
    match value {
        Json::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| typed_scalar(item, hint, &format!("{location}[{i}]")))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        other => typed_scalar(other, hint, location),
    }
}

fn typed_scalar(value: &Json, hint: TypeHint, location: &str) -> Result<Value> {
    match (hint, value) {
        (TypeHint::String, Json::Number(_) | Json::Bool(_)) => Ok(Value::String(value.to_string())),
        (TypeHint::Float, Json::Number(n)) => Ok(Value::Float(float(n))),
        _ => scalar(value, location),
    }
}

fn context_value(value: &Json, location: &str) -> Result<Value> {
    match value {
        Json::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| scalar(item, &format!("{location}[{i}]")))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        other => scalar(other, location),
    }
}

fn scalar(value: &Json, location: &str) -> Result<Value> {
    match value {
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::Number(n) => Ok(match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Float(float(n)),
        }),
        Json::String(s) => Ok(Value::String(s.clone())),
        Json::Null => Err(shape_error(location, "null has no document form")),
        Json::Array(_) | Json::Object(_) => {
            Err(shape_error(location, "expected a string, number or bool"))
        }
    }
}

/// Without arbitrary precision every JSON number has an `f64` form; NaN is
/// refused by validation.
fn float(n: &Number) -> f64 {
    n.as_f64().unwrap_or(f64::NAN)
}

fn json_value(value: &Value) -> Json {
    match value {
        Value::Bool(b) => Json::Bool(*b),
        Value::Integer(i) => Json::from(*i),
        Value::Float(f) => Number::from_f64(*f).map_or(Json::Null, Json::Number),
        Value::String(s) => Json::String(s.clone()),
        Value::Array(items) => Json::Array(items.iter().map(json_value).collect()),
    }
}

fn shape_error(location: &str, reason: impl std::fmt::Display) -> Error {
    Error::parse(1, format!("`{location}`: {reason}"))
}
