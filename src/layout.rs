//! Table layout for the human view.
//!
//! [`render`] turns pre-formatted cells into aligned lines. When the table is
//! wider than [`LayoutOptions::max_line_width`], columns are packed greedily
//! into groups and every row is printed as a stack of sub-tables:
//!
//! ```text
//! name  repository
//! dx    https://example.org/org/dx
//!
//! container  ci_cd
//! none       none
//!
//!
//! name  repository
//! ...
//! ```
//!
//! One blank line separates groups of the same row and two blank lines
//! separate rows. [`parse`] relies on that difference to stitch the groups
//! back together.

use crate::error::{Error, Result};
use crate::escape::split_on_gaps;
use crate::LayoutOptions;
use std::ops::Range;

/// Horizontal alignment of a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Align {
    #[default]
    Left,
    Right,
}

/// A column header together with its alignment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayoutColumn {
    pub header: String,
    pub align: Align,
}

impl LayoutColumn {
    /// Creates a column.
    #[must_use]
    pub fn new(header: impl Into<String>, align: Align) -> Self {
        LayoutColumn {
            header: header.into(),
            align,
        }
    }
}

/// Display width of a cell, counted in characters.
#[inline]
fn width(s: &str) -> usize {
    s.chars().count()
}

/// Returns the width of each column: its widest header or cell.
#[must_use]
pub fn column_widths(columns: &[LayoutColumn], rows: &[Vec<String>]) -> Vec<usize> {
    columns
        .iter()
        .enumerate()
        .map(|(i, column)| {
            rows.iter()
                .filter_map(|row| row.get(i))
                .map(|cell| width(cell))
                .fold(width(&column.header), usize::max)
        })
        .collect()
}

/// Packs columns left to right into groups that fit `max_line_width`.
///
/// A column wider than the limit on its own gets a group to itself and is
/// never truncated.
///
/// # Examples
///
/// ```rust
/// use dx_serializer::layout::group_columns;
/// use dx_serializer::LayoutOptions;
///
/// let options = LayoutOptions::new().with_max_line_width(10);
/// assert_eq!(group_columns(&[4, 4, 12, 3], &options), vec![0..2, 2..3, 3..4]);
/// ```
#[must_use]
pub fn group_columns(widths: &[usize], options: &LayoutOptions) -> Vec<Range<usize>> {
    let mut groups = Vec::new();
    let mut start = 0;
    let mut used = 0;

    for (i, &w) in widths.iter().enumerate() {
        if i == start {
            used = w;
        } else if used + options.column_gap + w <= options.max_line_width {
            used += options.column_gap + w;
        } else {
            groups.push(start..i);
            start = i;
            used = w;
        }
    }
    if start < widths.len() {
        groups.push(start..widths.len());
    }
    groups
}

/// Renders a table into lines (without line terminators).
///
/// Cells must already be formatted; `rows[r][c]` belongs under
/// `columns[c]`. Trailing spaces are trimmed from every line.
///
/// # Examples
///
/// ```rust
/// use dx_serializer::layout::{render, Align, LayoutColumn};
/// use dx_serializer::LayoutOptions;
///
/// let columns = vec![
///     LayoutColumn::new("name", Align::Left),
///     LayoutColumn::new("port (int)", Align::Right),
/// ];
/// let rows = vec![vec!["web".to_string(), "8080".to_string()]];
///
/// let lines = render(&columns, &rows, &LayoutOptions::new());
/// assert_eq!(lines, vec!["name  port (int)", "web         8080"]);
/// ```
#[must_use]
pub fn render(columns: &[LayoutColumn], rows: &[Vec<String>], options: &LayoutOptions) -> Vec<String> {
    let widths = column_widths(columns, rows);
    let groups = group_columns(&widths, options);
    let headers: Vec<&str> = columns.iter().map(|c| c.header.as_str()).collect();

    let line = |range: &Range<usize>, cells: &[&str]| -> String {
        let gap = " ".repeat(options.column_gap);
        let parts: Vec<String> = range
            .clone()
            .map(|i| {
                let cell = cells.get(i).copied().unwrap_or("");
                let w = widths[i];
                match columns[i].align {
                    Align::Left => format!("{cell:<w$}"),
                    Align::Right => format!("{cell:>w$}"),
                }
            })
            .collect();
        parts.join(&gap).trim_end().to_string()
    };

    let mut lines = Vec::new();
    if groups.len() <= 1 {
        let all = 0..columns.len();
        lines.push(line(&all, &headers));
        for row in rows {
            let cells: Vec<&str> = row.iter().map(String::as_str).collect();
            lines.push(line(&all, &cells));
        }
        return lines;
    }

    if rows.is_empty() {
        for (g, range) in groups.iter().enumerate() {
            if g > 0 {
                lines.push(String::new());
            }
            lines.push(line(range, &headers));
        }
        return lines;
    }

    for (r, row) in rows.iter().enumerate() {
        if r > 0 {
            lines.push(String::new());
            lines.push(String::new());
        }
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        for (g, range) in groups.iter().enumerate() {
            if g > 0 {
                lines.push(String::new());
            }
            lines.push(line(range, &headers));
            lines.push(line(range, &cells));
        }
    }
    lines
}

/// A table read back from rendered lines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedTable<'a> {
    pub header: Vec<&'a str>,
    /// Each row with the line number of its first fragment.
    pub rows: Vec<(usize, Vec<&'a str>)>,
}

/// Parses lines produced by [`render`], stitching wrapped groups back into
/// full rows.
///
/// `lines` pairs each line with its 1-based line number for error reporting.
///
/// # Errors
///
/// Returns [`Error::Parse`] if a line's cell count disagrees with its
/// header, if the groups of one row have different line counts, or if the
/// stitched header of a row differs from the first one.
pub fn parse<'a>(lines: &[(usize, &'a str)]) -> Result<ParsedTable<'a>> {
    let records = split_records(lines);
    let mut table: Option<ParsedTable<'a>> = None;

    for record in records {
        let (header, rows) = stitch_record(&record)?;
        match table.as_mut() {
            None => table = Some(ParsedTable { header, rows }),
            Some(table) => {
                if header != table.header {
                    let line = record.first().and_then(|p| p.first()).map_or(0, |l| l.0);
                    return Err(Error::parse(
                        line,
                        "wrapped row header does not match the table header",
                    ));
                }
                table.rows.extend(rows);
            }
        }
    }

    Ok(table.unwrap_or(ParsedTable {
        header: Vec::new(),
        rows: Vec::new(),
    }))
}

type Paragraph<'a> = Vec<(usize, &'a str)>;

/// Splits lines into records (separated by two or more blank lines), each
/// made of paragraphs (separated by exactly one blank line).
fn split_records<'a>(lines: &[(usize, &'a str)]) -> Vec<Vec<Paragraph<'a>>> {
    let mut records: Vec<Vec<Paragraph<'a>>> = Vec::new();
    let mut blanks = 0;

    for &(line_no, text) in lines {
        if text.trim().is_empty() {
            blanks += 1;
            continue;
        }
        match records.last_mut() {
            Some(record) if blanks < 2 => {
                if blanks == 1 || record.is_empty() {
                    record.push(Vec::new());
                }
                if let Some(paragraph) = record.last_mut() {
                    paragraph.push((line_no, text));
                }
            }
            _ => records.push(vec![vec![(line_no, text)]]),
        }
        blanks = 0;
    }
    records
}

type Stitched<'a> = (Vec<&'a str>, Vec<(usize, Vec<&'a str>)>);

fn stitch_record<'a>(record: &[Paragraph<'a>]) -> Result<Stitched<'a>> {
    let mut header = Vec::new();
    let mut rows: Vec<(usize, Vec<&'a str>)> = Vec::new();

    for (p, paragraph) in record.iter().enumerate() {
        let Some((&(head_line, head_text), values)) = paragraph.split_first() else {
            continue;
        };
        let cells = split_on_gaps(head_text).map_err(|e| Error::parse(head_line, e))?;
        let columns = cells.len();
        header.extend(cells);

        if p == 0 {
            rows = values.iter().map(|&(line, _)| (line, Vec::new())).collect();
        } else if values.len() != rows.len() {
            return Err(Error::parse(
                head_line,
                format!(
                    "column group has {} rows, the first group has {}",
                    values.len(),
                    rows.len()
                ),
            ));
        }

        for (row, &(line_no, text)) in rows.iter_mut().zip(values) {
            let cells = split_on_gaps(text).map_err(|e| Error::parse(line_no, e))?;
            if cells.len() != columns {
                return Err(Error::parse(
                    line_no,
                    format!("line has {} cells, header has {columns}", cells.len()),
                ));
            }
            row.1.extend(cells);
        }
    }
    Ok((header, rows))
}
