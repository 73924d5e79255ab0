//! Quoting, escaping and quote-aware splitting shared by the text codecs.
//!
//! A string is written bare unless it could be misread, in which case it is
//! wrapped in double quotes with `\" \\ \n \r \t \uXXXX` escapes. Each codec
//! adds its own set of characters that force quoting on top of the common
//! rules in [`needs_quotes`].

use crate::Value;
use std::fmt::Write as _;

/// Returns `true` if `s` must be quoted in any text form.
///
/// `extra` lists characters that are structural in the caller's context,
/// e.g. `;` inside an LLM context line.
pub(crate) fn needs_quotes(s: &str, extra: &[char]) -> bool {
    let Some(first) = s.chars().next() else {
        return true;
    };
    let last = s.chars().next_back().unwrap_or(first);
    if first.is_whitespace() || last.is_whitespace() || matches!(first, '#' | '*') {
        return true;
    }
    s.chars()
        .any(|c| matches!(c, '|' | '"' | '\\') || c.is_control() || extra.contains(&c))
}

/// Returns `true` if untyped inference would read `s` as something other
/// than a string.
pub(crate) fn looks_like_literal(s: &str) -> bool {
    s == "true" || s == "false" || s.parse::<i64>().is_ok() || s.parse::<f64>().is_ok()
}

/// Wraps `s` in double quotes, escaping as needed.
pub(crate) fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04x}", u32::from(c));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Writes `s` bare or quoted depending on `needs_quotes`.
pub(crate) fn quote_if(s: &str, needed: bool) -> String {
    if needed {
        quote(s)
    } else {
        s.to_string()
    }
}

/// Returns `true` if the field is written in quoted form.
#[inline]
pub(crate) fn is_quoted(field: &str) -> bool {
    field.starts_with('"')
}

/// Reads a bare or quoted field back into its string.
///
/// A quoted field must close exactly at its end: `"ab"c` is refused.
pub(crate) fn unquote(field: &str) -> Result<String, String> {
    let Some(body) = field.strip_prefix('"') else {
        return Ok(field.to_string());
    };

    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                let rest = chars.as_str();
                return if rest.is_empty() {
                    Ok(out)
                } else {
                    Err(format!("unexpected text after closing quote: {rest:?}"))
                };
            }
            '\\' => match chars.next() {
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('t') => out.push('\t'),
                Some('u') => {
                    let hex: String = chars.by_ref().take(4).collect();
                    let code = u32::from_str_radix(&hex, 16)
                        .ok()
                        .filter(|_| hex.len() == 4)
                        .and_then(char::from_u32)
                        .ok_or_else(|| format!("invalid unicode escape \\u{hex}"))?;
                    out.push(code);
                }
                Some(other) => return Err(format!("invalid escape \\{other}")),
                None => break,
            },
            c => out.push(c),
        }
    }
    Err("unterminated quoted string".to_string())
}

/// Splits `s` on `delim`, ignoring delimiters inside quoted strings.
pub(crate) fn split_quoted(s: &str, delim: char) -> Result<Vec<&str>, String> {
    let mut fields = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if in_quotes {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_quotes = false;
            }
        } else if c == '"' {
            in_quotes = true;
        } else if c == delim {
            fields.push(&s[start..i]);
            start = i + c.len_utf8();
        }
    }

    if in_quotes {
        return Err("unterminated quoted string".to_string());
    }
    fields.push(&s[start..]);
    Ok(fields)
}

/// Splits a table line into cells on runs of two or more spaces outside
/// quoted strings. Single spaces stay inside the cell.
pub(crate) fn split_on_gaps(line: &str) -> Result<Vec<&str>, String> {
    let line = line.trim();
    let bytes = line.as_bytes();
    let mut cells = Vec::new();
    let mut start = 0;
    let mut i = 0;
    let mut in_quotes = false;

    while i < bytes.len() {
        let b = bytes[i];
        if in_quotes {
            if b == b'\\' {
                i += 1;
            } else if b == b'"' {
                in_quotes = false;
            }
        } else if b == b'"' {
            in_quotes = true;
        } else if b == b' ' && bytes.get(i + 1) == Some(&b' ') {
            cells.push(&line[start..i]);
            while bytes.get(i) == Some(&b' ') {
                i += 1;
            }
            start = i;
            continue;
        }
        i += 1;
    }

    if in_quotes {
        return Err("unterminated quoted string".to_string());
    }
    if start < line.len() {
        cells.push(&line[start..]);
    }
    Ok(cells)
}

/// Infers the value of an untyped field: `true`/`false`, then integer, then
/// finite float, else string. Quoted fields are always strings.
pub(crate) fn infer_scalar(field: &str) -> Result<Value, String> {
    if is_quoted(field) {
        return unquote(field).map(Value::String);
    }
    Ok(match field {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => {
            if let Ok(n) = field.parse::<i64>() {
                Value::Integer(n)
            } else if let Some(f) = field.parse::<f64>().ok().filter(|f| f.is_finite()) {
                Value::Float(f)
            } else {
                Value::String(field.to_string())
            }
        }
    })
}
