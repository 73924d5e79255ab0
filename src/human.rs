//! The editor-facing table view.
//!
//! The context block is rendered as `[config]` with aligned `key = value`
//! lines. Every section becomes a `[name]` block holding a table laid out by
//! the [`layout`](crate::layout) engine. Column types other than string are
//! shown in the header, e.g. `port (int)`.
//!
//! ## Key expansion
//!
//! Short keys are shown in full through a [`KeyRegistry`]. A block lists the
//! names it expanded on a `# expanded:` line right under its header, with the
//! block's own name written as `[name]`. Decoding collapses exactly those
//! names, so a document whose keys are already full names reads back
//! unchanged. Any other line starting with `#` is a comment.
//!
//! ```text
//! [forge]
//! # expanded: [forge], name, repository
//! name  repository
//! dx    https://example.org/org/dx
//! ```
//!
//! ## Examples
//!
//! ```rust
//! use dx_serializer::{human, llm, KeyRegistry};
//!
//! let doc = llm::decode("#c:name|dx;version|0.0.1").unwrap();
//! let text = human::encode(&doc, &KeyRegistry::standard()).unwrap();
//! assert_eq!(text, "[config]\nname    = dx\nversion = 0.0.1\n");
//!
//! assert_eq!(human::decode(&text, &KeyRegistry::standard()).unwrap(), doc);
//! ```

use crate::document::{is_valid_name, Column, Document, Section, TypeHint, RESERVED_SECTION_ID};
use crate::error::{Error, Result};
use crate::escape::{
    infer_scalar, is_quoted, looks_like_literal, needs_quotes, quote_if, split_quoted, unquote,
};
use crate::layout::{self, Align, LayoutColumn};
use crate::{KeyRegistry, LayoutOptions, Value};
use std::collections::{HashMap, HashSet};
use tracing::debug;

const LEGEND_PREFIX: &str = "# expanded:";

/// Smallest column gap the table tokenizer can split on.
const MIN_COLUMN_GAP: usize = 2;

/// Encodes a document into the human view with default layout options.
///
/// # Errors
///
/// Returns [`Error::Encoding`] if the document fails validation.
pub fn encode(doc: &Document, registry: &KeyRegistry) -> Result<String> {
    encode_with_options(doc, registry, &LayoutOptions::default())
}

/// Encodes a document into the human view.
///
/// # Errors
///
/// Returns [`Error::Encoding`] if the document fails validation.
///
/// # Examples
///
/// ```rust
/// use dx_serializer::{human, Column, Document, KeyRegistry, LayoutOptions, Section, TypeHint, Value};
///
/// let doc = Document::new().with_section(
///     Section::new("f", vec![
///         Column::new("nm", TypeHint::String),
///         Column::new("port", TypeHint::Int),
///     ])
///     .with_row(vec![Value::from("web"), Value::from(8080)]),
/// );
///
/// let text = human::encode_with_options(&doc, &KeyRegistry::standard(), &LayoutOptions::new()).unwrap();
/// assert_eq!(
///     text,
///     "[forge]\n# expanded: [forge], name\nname  port (int)\nweb         8080\n"
/// );
/// ```
pub fn encode_with_options(
    doc: &Document,
    registry: &KeyRegistry,
    options: &LayoutOptions,
) -> Result<String> {
    doc.ensure_valid()?;
    let options = LayoutOptions {
        column_gap: options.column_gap.max(MIN_COLUMN_GAP),
        ..options.clone()
    };

    let mut blocks = Vec::with_capacity(doc.sections.len() + 1);
    if !doc.context.is_empty() {
        blocks.push(config_block(doc, registry));
    }
    for section in &doc.sections {
        blocks.push(section_block(section, registry, &options));
    }

    let mut out = String::new();
    for (i, block) in blocks.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        for line in block {
            out.push_str(line);
            out.push('\n');
        }
    }

    debug!(
        context = doc.context.len(),
        sections = doc.sections.len(),
        bytes = out.len(),
        "encoded human document"
    );
    Ok(out)
}

/// How one name is shown in a block.
struct DisplayName<'a> {
    text: &'a str,
    expanded: bool,
}

/// Expands each name unless expansion is not invertible or would clash with
/// another name of the same block.
fn display_names<'a>(names: &[&'a str], registry: &'a KeyRegistry) -> Vec<DisplayName<'a>> {
    names
        .iter()
        .map(|&name| {
            let full = registry.expand(name);
            let expanded = full != name
                && registry.collapse(full) == name
                && is_valid_name(full)
                && !names.contains(&full);
            DisplayName {
                text: if expanded { full } else { name },
                expanded,
            }
        })
        .collect()
}

fn legend_line(header: Option<&str>, names: &[DisplayName<'_>]) -> Option<String> {
    let entries: Vec<String> = header
        .map(|h| format!("[{h}]"))
        .into_iter()
        .chain(
            names
                .iter()
                .filter(|n| n.expanded)
                .map(|n| n.text.to_string()),
        )
        .collect();
    if entries.is_empty() {
        None
    } else {
        Some(format!("{LEGEND_PREFIX} {}", entries.join(", ")))
    }
}

fn config_block(doc: &Document, registry: &KeyRegistry) -> Vec<String> {
    let keys: Vec<&str> = doc.context.keys().map(String::as_str).collect();
    let names = display_names(&keys, registry);

    let mut lines = vec![format!("[{RESERVED_SECTION_ID}]")];
    lines.extend(legend_line(None, &names));

    let width = names
        .iter()
        .map(|n| n.text.chars().count())
        .max()
        .unwrap_or(0);
    for (name, value) in names.iter().zip(doc.context.values()) {
        lines.push(format!(
            "{:<width$} = {}",
            name.text,
            value_text(None, value)
        ));
    }
    lines
}

fn section_block(section: &Section, registry: &KeyRegistry, options: &LayoutOptions) -> Vec<String> {
    let full = registry.expand(&section.id);
    let header_expanded = full != section.id
        && registry.collapse(full) == section.id
        && is_valid_name(full)
        && full != RESERVED_SECTION_ID;
    let header = if header_expanded { full } else { section.id.as_str() };

    let column_names: Vec<&str> = section.columns.iter().map(|c| c.name.as_str()).collect();
    let names = display_names(&column_names, registry);

    let mut lines = vec![format!("[{header}]")];
    lines.extend(legend_line(header_expanded.then_some(header), &names));

    let columns: Vec<LayoutColumn> = section
        .columns
        .iter()
        .zip(&names)
        .map(|(column, name)| {
            let header = match column.type_hint {
                TypeHint::String => name.text.to_string(),
                hint => format!("{} ({})", name.text, hint.label()),
            };
            let align = if column.type_hint.is_numeric() {
                Align::Right
            } else {
                Align::Left
            };
            LayoutColumn::new(header, align)
        })
        .collect();

    let rows: Vec<Vec<String>> = (0..section.rows.len())
        .filter_map(|i| section.expanded_row(i))
        .map(|cells| {
            section
                .columns
                .iter()
                .zip(&cells)
                .map(|(column, value)| value_text(Some(column.type_hint), value))
                .collect()
        })
        .collect();

    lines.extend(layout::render(&columns, &rows, options));
    lines
}

/// Strings that would be misread inside a table cell or a `key = value` line.
fn needs_human_quotes(s: &str) -> bool {
    needs_quotes(s, &[',']) || s.starts_with('[') || s.contains("  ")
}

/// Formats a value; `hint` is `None` for untyped context fields.
fn value_text(hint: Option<TypeHint>, value: &Value) -> String {
    let scalar = |value: &Value| match value {
        Value::String(s) => {
            let ambiguous = hint.is_none() && looks_like_literal(s);
            quote_if(s, ambiguous || needs_human_quotes(s))
        }
        other => other.to_string(),
    };

    match value {
        Value::Array(items) => match items.as_slice() {
            [] => "[]".to_string(),
            [single] => format!("{},", scalar(single)),
            many => many.iter().map(scalar).collect::<Vec<_>>().join(", "),
        },
        other => scalar(other),
    }
}

/// Decodes the human view back into a document.
///
/// # Errors
///
/// Returns [`Error::Parse`] for content outside any block, a duplicate block,
/// a malformed `key = value` line, an unknown column type, a table whose
/// wrapped groups do not line up, or a cell that does not match its column
/// type.
pub fn decode(text: &str, registry: &KeyRegistry) -> Result<Document> {
    let blocks = split_blocks(text)?;
    let mut doc = Document::new();
    let mut seen = HashSet::new();
    let mut section_lines = HashMap::new();
    let mut config_line = None;

    for block in &blocks {
        if block.name == RESERVED_SECTION_ID {
            if config_line.replace(block.line).is_some() {
                return Err(Error::parse(block.line, "duplicate [config] block"));
            }
            decode_config(block, registry, &mut doc)?;
            continue;
        }

        let id = if block.legend.contains(format!("[{}]", block.name).as_str()) {
            registry.collapse(block.name)
        } else {
            block.name
        };
        if !seen.insert(id) {
            return Err(Error::parse(block.line, format!("duplicate section id {id:?}")));
        }
        section_lines.insert(id.to_string(), block.line);
        doc.sections.push(decode_section(block, id, registry)?);
    }

    let doc = doc.into_decoded(|violation| {
        violation
            .section()
            .and_then(|id| section_lines.get(id).copied())
            .or(config_line)
            .unwrap_or(1)
    })?;

    debug!(
        context = doc.context.len(),
        sections = doc.sections.len(),
        "decoded human document"
    );
    Ok(doc)
}

struct Block<'a> {
    line: usize,
    name: &'a str,
    legend: HashSet<&'a str>,
    body: Vec<(usize, &'a str)>,
}

fn block_name(line: &str) -> Option<&str> {
    line.strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .filter(|name| is_valid_name(name))
}

fn split_blocks(text: &str) -> Result<Vec<Block<'_>>> {
    let mut blocks: Vec<Block<'_>> = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim_end();

        if let Some(name) = block_name(line) {
            blocks.push(Block {
                line: line_no,
                name,
                legend: HashSet::new(),
                body: Vec::new(),
            });
            continue;
        }

        let trimmed = line.trim_start();
        if trimmed.starts_with('#') {
            if let (Some(list), Some(block)) =
                (trimmed.strip_prefix(LEGEND_PREFIX), blocks.last_mut())
            {
                block.legend.extend(list.split(',').map(str::trim).filter(|s| !s.is_empty()));
            }
            continue;
        }

        match blocks.last_mut() {
            Some(block) => block.body.push((line_no, line)),
            None if trimmed.is_empty() => {}
            None => return Err(Error::parse(line_no, "content outside of any [section] block")),
        }
    }
    Ok(blocks)
}

fn decode_config(block: &Block<'_>, registry: &KeyRegistry, doc: &mut Document) -> Result<()> {
    for &(line_no, line) in &block.body {
        if line.trim().is_empty() {
            continue;
        }
        let (key, raw) = line
            .split_once('=')
            .ok_or_else(|| Error::parse(line_no, "expected `key = value`"))?;
        let key = key.trim();
        let key = if block.legend.contains(key) {
            registry.collapse(key)
        } else {
            key
        };
        if !is_valid_name(key) {
            return Err(Error::parse(line_no, format!("invalid context key {key:?}")));
        }
        if doc.context.contains_key(key) {
            return Err(Error::parse(line_no, format!("duplicate context key {key:?}")));
        }
        let value = parse_value(raw.trim(), None).map_err(|e| Error::parse(line_no, e))?;
        doc.context.insert(key.to_string(), value);
    }
    Ok(())
}

fn decode_section(block: &Block<'_>, id: &str, registry: &KeyRegistry) -> Result<Section> {
    let table = layout::parse(&block.body)?;
    let header_line = block
        .body
        .iter()
        .find(|(_, line)| !line.trim().is_empty())
        .map_or(block.line, |&(line_no, _)| line_no);
    if table.header.is_empty() {
        return Err(Error::parse(block.line, format!("section {id:?} has no header line")));
    }

    let columns = table
        .header
        .iter()
        .map(|token| parse_header(token, &block.legend, registry))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::parse(header_line, e))?;

    let mut section = Section::new(id, columns);
    for (line_no, cells) in table.rows {
        let row = section
            .columns
            .iter()
            .zip(cells)
            .filter(|(column, _)| column.type_hint.is_stored())
            .map(|(column, cell)| {
                parse_value(cell, Some(column.type_hint))
                    .map_err(|e| Error::parse(line_no, format!("column {:?}: {e}", column.name)))
            })
            .collect::<Result<Vec<_>>>()?;
        section.rows.push(row);
    }
    Ok(section)
}

fn parse_header(
    token: &str,
    legend: &HashSet<&str>,
    registry: &KeyRegistry,
) -> std::result::Result<Column, String> {
    let (name, hint) = match token.strip_suffix(')').and_then(|t| t.rsplit_once(" (")) {
        Some((name, label)) => {
            let hint = TypeHint::from_label(label)
                .ok_or_else(|| format!("unknown column type ({label})"))?;
            (name, hint)
        }
        None => (token, TypeHint::String),
    };
    let name = if legend.contains(name) {
        registry.collapse(name)
    } else {
        name
    };
    Ok(Column::new(name, hint))
}

/// Parses a cell or context value; `[]` is an empty array, a comma outside
/// quotes makes an array.
fn parse_value(raw: &str, hint: Option<TypeHint>) -> std::result::Result<Value, String> {
    if raw == "[]" {
        return Ok(Value::Array(Vec::new()));
    }
    let parts = split_quoted(raw, ',')?;
    if let [single] = parts.as_slice() {
        return parse_scalar(single.trim(), hint);
    }

    let mut items: Vec<&str> = parts.iter().map(|p| p.trim()).collect();
    if items.last() == Some(&"") {
        items.pop();
    }
    items
        .into_iter()
        .map(|item| {
            if item.is_empty() {
                Err("empty array element".to_string())
            } else {
                parse_scalar(item, hint)
            }
        })
        .collect::<std::result::Result<Vec<_>, _>>()
        .map(Value::Array)
}

fn parse_scalar(field: &str, hint: Option<TypeHint>) -> std::result::Result<Value, String> {
    let Some(hint) = hint else {
        return infer_scalar(field);
    };
    let invalid = || format!("invalid {} value {field:?}", hint.label());
    match hint {
        TypeHint::String => unquote(field).map(Value::String),
        _ if is_quoted(field) => Err(invalid()),
        TypeHint::Int | TypeHint::Base62 => {
            field.parse().map(Value::Integer).map_err(|_| invalid())
        }
        TypeHint::Float => field.parse().map(Value::Float).map_err(|_| invalid()),
        TypeHint::Bool => match field {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(invalid()),
        },
        TypeHint::AutoId => Err(invalid()),
    }
}
