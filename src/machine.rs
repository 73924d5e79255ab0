//! The zero-copy binary form.
//!
//! ## Layout
//!
//! All integers are little-endian. Table offsets are absolute; heap offsets
//! inside slots are relative to the start of the heap.
//!
//! ```text
//! 0..4    magic "DXMB"
//! 4..6    version (u16)
//! 6..8    reserved, zero
//! 8..40   SHA-256 of bytes 40..end
//! 40..48  context table offset, entry count (u32, u32)
//! 48..56  section table offset, entry count (u32, u32)
//! 56..60  heap offset (u32)
//! 60..64  total length (u32)
//! ```
//!
//! A context entry is a key slot followed by a value slot (32 bytes). A
//! section descriptor is a name slot, then the offset and count of its
//! column entries and of its rows (32 bytes). A column entry is a name slot,
//! a type byte and three bytes of padding (20 bytes). Rows are runs of value
//! slots, one per stored column.
//!
//! Every value lives in a 16-byte slot whose first byte is a tag:
//!
//! | tag | meaning | payload |
//! |---|---|---|
//! | 0 | inline string | length at 1, bytes at 2..16 |
//! | 1 | heap string | heap offset at 4..8, length (u16) at 8..10 |
//! | 2 | integer | i64 at 8..16 |
//! | 3 | float | f64 bits at 8..16 |
//! | 4 | bool | 0 or 1 at 8 |
//! | 5 | array | heap offset at 4..8, count (u16) at 8..10 |
//!
//! Array elements are scalar slots stored contiguously in the heap.
//!
//! ## Examples
//!
//! ```rust
//! use dx_serializer::machine::{self, ValueRef};
//! use dx_serializer::llm;
//!
//! let doc = llm::decode("#c:name|dx\n#forge(id%#|repo)\nhttps://example.org/org/dx\n").unwrap();
//! let bytes = machine::encode(&doc).unwrap();
//!
//! let view = machine::decode(&bytes).unwrap();
//! assert_eq!(view.context_get("name"), Some(ValueRef::Str("dx")));
//!
//! let forge = view.section_by_id("forge").unwrap();
//! assert_eq!(forge.cell(0, 0), Some(ValueRef::Integer(1)));
//! assert_eq!(forge.cell(0, 1), Some(ValueRef::Str("https://example.org/org/dx")));
//!
//! assert_eq!(view.materialize().unwrap(), doc);
//! ```

use crate::document::{auto_id_value, Column, Document, InvariantViolation, Section, TypeHint};
use crate::error::{Error, Result};
use crate::fingerprint::{Fingerprint, FINGERPRINT_LEN};
use crate::Value;
use std::ops::Range;
use tracing::debug;

/// Magic bytes opening every buffer.
pub const MAGIC: [u8; 4] = *b"DXMB";

/// Current layout version.
pub const VERSION: u16 = 1;

/// Size of the fixed header.
pub const HEADER_LEN: usize = 64;

/// Size of one value slot.
pub const SLOT_LEN: usize = 16;

/// Longest string stored inside its slot instead of the heap.
pub const INLINE_CAPACITY: usize = 14;

const CONTEXT_ENTRY_LEN: usize = 2 * SLOT_LEN;
const SECTION_ENTRY_LEN: usize = 32;
const COLUMN_ENTRY_LEN: usize = 20;

/// Bytes covered by the fingerprint start here.
const FINGERPRINT_START: usize = 8 + FINGERPRINT_LEN;

const TAG_INLINE_STR: u8 = 0;
const TAG_HEAP_STR: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_BOOL: u8 = 4;
const TAG_ARRAY: u8 = 5;

type Slot = [u8; SLOT_LEN];

/// Encodes a document into a machine buffer.
///
/// The output is deterministic and carries a fingerprint over everything
/// after the fingerprint field.
///
/// # Errors
///
/// Returns [`Error::Encoding`] if the document fails validation or the
/// buffer would outgrow 32-bit offsets.
pub fn encode(doc: &Document) -> Result<Vec<u8>> {
    doc.ensure_valid()?;

    let ctx_offset = HEADER_LEN;
    let sec_offset = ctx_offset + doc.context.len() * CONTEXT_ENTRY_LEN;
    let mut cursor = sec_offset + doc.sections.len() * SECTION_ENTRY_LEN;

    let mut column_offsets = Vec::with_capacity(doc.sections.len());
    for section in &doc.sections {
        column_offsets.push(cursor);
        cursor += section.columns.len() * COLUMN_ENTRY_LEN;
    }
    let mut row_offsets = Vec::with_capacity(doc.sections.len());
    for section in &doc.sections {
        row_offsets.push(cursor);
        cursor += section.rows.len() * section.stored_width() * SLOT_LEN;
    }
    let heap_offset = cursor;

    let mut out = vec![0u8; heap_offset];
    let mut heap = Heap::default();

    for (i, (key, value)) in doc.context.iter().enumerate() {
        let at = ctx_offset + i * CONTEXT_ENTRY_LEN;
        let key_slot = heap.string(key)?;
        let value_slot = heap.value(value)?;
        out[at..at + SLOT_LEN].copy_from_slice(&key_slot);
        out[at + SLOT_LEN..at + CONTEXT_ENTRY_LEN].copy_from_slice(&value_slot);
    }

    for (i, section) in doc.sections.iter().enumerate() {
        let at = sec_offset + i * SECTION_ENTRY_LEN;
        let name = heap.string(&section.id)?;
        out[at..at + SLOT_LEN].copy_from_slice(&name);
        put_u32(&mut out, at + 16, column_offsets[i])?;
        put_u32(&mut out, at + 20, section.columns.len())?;
        put_u32(&mut out, at + 24, row_offsets[i])?;
        put_u32(&mut out, at + 28, section.rows.len())?;

        for (c, column) in section.columns.iter().enumerate() {
            let at = column_offsets[i] + c * COLUMN_ENTRY_LEN;
            let name = heap.string(&column.name)?;
            out[at..at + SLOT_LEN].copy_from_slice(&name);
            out[at + SLOT_LEN] = column.type_hint.code();
        }

        let mut at = row_offsets[i];
        for row in &section.rows {
            for value in row {
                let slot = heap.value(value)?;
                out[at..at + SLOT_LEN].copy_from_slice(&slot);
                at += SLOT_LEN;
            }
        }
    }

    out.extend_from_slice(&heap.bytes);
    let total = out.len();

    out[0..4].copy_from_slice(&MAGIC);
    out[4..6].copy_from_slice(&VERSION.to_le_bytes());
    put_u32(&mut out, 40, ctx_offset)?;
    put_u32(&mut out, 44, doc.context.len())?;
    put_u32(&mut out, 48, sec_offset)?;
    put_u32(&mut out, 52, doc.sections.len())?;
    put_u32(&mut out, 56, heap_offset)?;
    put_u32(&mut out, 60, total)?;

    let fingerprint = Fingerprint::of(&out[FINGERPRINT_START..]);
    out[8..FINGERPRINT_START].copy_from_slice(fingerprint.as_bytes());

    debug!(
        bytes = total,
        heap = heap.bytes.len(),
        sections = doc.sections.len(),
        "encoded machine document"
    );
    Ok(out)
}

fn too_large(len: usize) -> Error {
    Error::encoding(vec![InvariantViolation::TooLarge { len }])
}

fn put_u32(out: &mut [u8], at: usize, value: usize) -> Result<()> {
    let value = u32::try_from(value).map_err(|_| too_large(value))?;
    out[at..at + 4].copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Heap under construction; offsets handed out are relative to its start.
#[derive(Default)]
struct Heap {
    bytes: Vec<u8>,
}

impl Heap {
    fn offset(&self) -> Result<u32> {
        u32::try_from(self.bytes.len()).map_err(|_| too_large(self.bytes.len()))
    }

    fn string(&mut self, s: &str) -> Result<Slot> {
        let mut slot = [0u8; SLOT_LEN];
        let len = u16::try_from(s.len()).map_err(|_| too_large(s.len()))?;
        if s.len() <= INLINE_CAPACITY {
            slot[0] = TAG_INLINE_STR;
            slot[1] = len as u8;
            slot[2..2 + s.len()].copy_from_slice(s.as_bytes());
        } else {
            slot[0] = TAG_HEAP_STR;
            slot[4..8].copy_from_slice(&self.offset()?.to_le_bytes());
            slot[8..10].copy_from_slice(&len.to_le_bytes());
            self.bytes.extend_from_slice(s.as_bytes());
        }
        Ok(slot)
    }

    fn value(&mut self, value: &Value) -> Result<Slot> {
        let mut slot = [0u8; SLOT_LEN];
        match value {
            Value::String(s) => return self.string(s),
            Value::Integer(n) => {
                slot[0] = TAG_INT;
                slot[8..16].copy_from_slice(&n.to_le_bytes());
            }
            Value::Float(f) => {
                slot[0] = TAG_FLOAT;
                slot[8..16].copy_from_slice(&f.to_bits().to_le_bytes());
            }
            Value::Bool(b) => {
                slot[0] = TAG_BOOL;
                slot[8] = u8::from(*b);
            }
            Value::Array(items) => {
                let count = u16::try_from(items.len()).map_err(|_| too_large(items.len()))?;
                let elements = items
                    .iter()
                    .map(|item| self.value(item))
                    .collect::<Result<Vec<_>>>()?;
                slot[0] = TAG_ARRAY;
                slot[4..8].copy_from_slice(&self.offset()?.to_le_bytes());
                slot[8..10].copy_from_slice(&count.to_le_bytes());
                for element in &elements {
                    self.bytes.extend_from_slice(element);
                }
            }
        }
        Ok(slot)
    }
}

/// Borrowed value read straight out of a machine buffer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ValueRef<'a> {
    Str(&'a str),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Array(ArrayRef<'a>),
}

impl ValueRef<'_> {
    /// Copies the value out of the buffer.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match *self {
            ValueRef::Str(s) => Value::String(s.to_string()),
            ValueRef::Integer(n) => Value::Integer(n),
            ValueRef::Float(f) => Value::Float(f),
            ValueRef::Bool(b) => Value::Bool(b),
            ValueRef::Array(array) => Value::Array(array.iter().map(|v| v.to_value()).collect()),
        }
    }
}

/// A borrowed array of scalar slots in the heap.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ArrayRef<'a> {
    heap: &'a [u8],
    offset: usize,
    len: usize,
}

impl<'a> ArrayRef<'a> {
    /// Returns the number of elements.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the array has no elements.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns element `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<ValueRef<'a>> {
        if index >= self.len {
            return None;
        }
        let slot = slot_at(self.heap, self.offset + index * SLOT_LEN)?;
        read_slot(slot, self.heap)
    }

    /// Iterates over the elements.
    pub fn iter(&self) -> impl Iterator<Item = ValueRef<'a>> + '_ {
        (0..self.len).filter_map(move |i| self.get(i))
    }
}

fn u16_at(buf: &[u8], at: usize) -> Option<u16> {
    buf.get(at..at + 2)?.try_into().ok().map(u16::from_le_bytes)
}

fn u32_at(buf: &[u8], at: usize) -> Option<usize> {
    let bytes: [u8; 4] = buf.get(at..at + 4)?.try_into().ok()?;
    usize::try_from(u32::from_le_bytes(bytes)).ok()
}

fn u64_at(buf: &[u8], at: usize) -> Option<u64> {
    buf.get(at..at + 8)?.try_into().ok().map(u64::from_le_bytes)
}

fn slot_at(buf: &[u8], at: usize) -> Option<&Slot> {
    buf.get(at..at.checked_add(SLOT_LEN)?)?.try_into().ok()
}

fn read_slot<'a>(slot: &'a Slot, heap: &'a [u8]) -> Option<ValueRef<'a>> {
    match slot[0] {
        TAG_INLINE_STR => {
            let len = usize::from(slot[1]);
            let bytes = slot.get(2..2 + len).filter(|_| len <= INLINE_CAPACITY)?;
            std::str::from_utf8(bytes).ok().map(ValueRef::Str)
        }
        TAG_HEAP_STR => {
            let offset = u32_at(slot, 4)?;
            let len = usize::from(u16_at(slot, 8)?);
            let bytes = heap.get(offset..offset.checked_add(len)?)?;
            std::str::from_utf8(bytes).ok().map(ValueRef::Str)
        }
        TAG_INT => u64_at(slot, 8).map(|bits| ValueRef::Integer(bits as i64)),
        TAG_FLOAT => u64_at(slot, 8).map(|bits| ValueRef::Float(f64::from_bits(bits))),
        TAG_BOOL => match slot[8] {
            0 => Some(ValueRef::Bool(false)),
            1 => Some(ValueRef::Bool(true)),
            _ => None,
        },
        TAG_ARRAY => {
            let offset = u32_at(slot, 4)?;
            let len = usize::from(u16_at(slot, 8)?);
            heap.get(offset..offset.checked_add(len * SLOT_LEN)?)?;
            Some(ValueRef::Array(ArrayRef { heap, offset, len }))
        }
        _ => None,
    }
}

fn read_str<'a>(slot: &'a Slot, heap: &'a [u8]) -> Option<&'a str> {
    match read_slot(slot, heap)? {
        ValueRef::Str(s) => Some(s),
        _ => None,
    }
}

/// A validated, read-only view over a machine buffer.
///
/// Accessors compute offsets into the borrowed buffer and never allocate.
#[derive(Clone, Copy, Debug)]
pub struct MachineView<'a> {
    buf: &'a [u8],
    heap: &'a [u8],
    fingerprint: Fingerprint,
    ctx_offset: usize,
    ctx_count: usize,
    sec_offset: usize,
    sec_count: usize,
}

/// Validates a machine buffer and returns a view over it.
///
/// Magic, version, length, fingerprint and every offset, tag and string are
/// checked before the view is returned.
///
/// # Errors
///
/// Returns [`Error::Integrity`] on any mismatch. A refused buffer should be
/// regenerated from its canonical text source.
///
/// # Examples
///
/// ```rust
/// use dx_serializer::{machine, Document, Error};
///
/// let mut bytes = machine::encode(&Document::new().with_context("k", 1)).unwrap();
/// let last = bytes.len() - 1;
/// bytes[last] ^= 0xff;
/// assert!(matches!(machine::decode(&bytes), Err(Error::Integrity { .. })));
/// ```
pub fn decode(bytes: &[u8]) -> Result<MachineView<'_>> {
    let view = MachineView::parse(bytes).map_err(|reason| {
        debug!(%reason, len = bytes.len(), "refused machine buffer");
        Error::integrity(reason)
    })?;
    debug!(
        bytes = bytes.len(),
        sections = view.sec_count,
        "decoded machine document"
    );
    Ok(view)
}

impl<'a> MachineView<'a> {
    fn parse(buf: &'a [u8]) -> std::result::Result<Self, String> {
        if buf.len() < HEADER_LEN {
            return Err(format!("buffer of {} bytes is shorter than the header", buf.len()));
        }
        if buf[0..4] != MAGIC {
            return Err("bad magic".to_string());
        }
        let version = u16_at(buf, 4).unwrap_or_default();
        if version != VERSION {
            return Err(format!("unsupported version {version}"));
        }
        if buf[6..8] != [0, 0] {
            return Err("reserved header bytes are not zero".to_string());
        }

        let field = |at: usize| u32_at(buf, at).ok_or_else(|| "truncated header".to_string());
        let total = field(60)?;
        if total != buf.len() {
            return Err(format!(
                "header length {total} does not match buffer length {}",
                buf.len()
            ));
        }

        let mut stored = [0u8; FINGERPRINT_LEN];
        stored.copy_from_slice(&buf[8..FINGERPRINT_START]);
        let fingerprint = Fingerprint::from_bytes(stored);
        if Fingerprint::of(&buf[FINGERPRINT_START..]) != fingerprint {
            return Err("fingerprint mismatch".to_string());
        }

        let heap_offset = field(56)?;
        let heap = buf
            .get(heap_offset..)
            .filter(|_| heap_offset >= HEADER_LEN)
            .ok_or_else(|| format!("heap offset {heap_offset} out of bounds"))?;

        let view = MachineView {
            buf,
            heap,
            fingerprint,
            ctx_offset: field(40)?,
            ctx_count: field(44)?,
            sec_offset: field(48)?,
            sec_count: field(52)?,
        };
        view.check_structure(heap_offset)?;
        Ok(view)
    }

    /// Walks every table once, so accessors can rely on well-formed slots.
    fn check_structure(&self, limit: usize) -> std::result::Result<(), String> {
        let within = |offset: usize, count: usize, size: usize| -> Option<Range<usize>> {
            let end = count.checked_mul(size)?.checked_add(offset)?;
            (offset >= HEADER_LEN && end <= limit).then_some(offset..end)
        };

        let ctx = within(self.ctx_offset, self.ctx_count, CONTEXT_ENTRY_LEN)
            .ok_or("context table out of bounds")?;
        for at in ctx.step_by(CONTEXT_ENTRY_LEN) {
            self.check_name(at)?;
            self.check_value(at + SLOT_LEN, None)?;
        }

        let sections = within(self.sec_offset, self.sec_count, SECTION_ENTRY_LEN)
            .ok_or("section table out of bounds")?;
        for at in sections.step_by(SECTION_ENTRY_LEN) {
            self.check_name(at)?;
            let field = |offset| u32_at(self.buf, at + offset).ok_or("truncated section descriptor");
            let (col_offset, col_count) = (field(16)?, field(20)?);
            let (row_offset, row_count) = (field(24)?, field(28)?);

            let columns = within(col_offset, col_count, COLUMN_ENTRY_LEN)
                .ok_or("column table out of bounds")?;
            let mut hints = Vec::with_capacity(col_count);
            for col in columns.step_by(COLUMN_ENTRY_LEN) {
                self.check_name(col)?;
                let code = self.buf[col + SLOT_LEN];
                let hint = TypeHint::from_code(code)
                    .ok_or_else(|| format!("unknown column type {code}"))?;
                if hint.is_stored() {
                    hints.push(hint);
                }
            }

            let rows = within(row_offset, row_count, hints.len() * SLOT_LEN)
                .ok_or("rows out of bounds")?;
            for (i, at) in rows.step_by(SLOT_LEN).enumerate() {
                self.check_value(at, Some(hints[i % hints.len()]))?;
            }
        }
        Ok(())
    }

    fn check_name(&self, at: usize) -> std::result::Result<(), String> {
        slot_at(self.buf, at)
            .and_then(|slot| read_str(slot, self.heap))
            .map(|_| ())
            .ok_or_else(|| format!("malformed name slot at {at}"))
    }

    fn check_value(&self, at: usize, hint: Option<TypeHint>) -> std::result::Result<(), String> {
        let malformed = || format!("malformed value slot at {at}");
        let value = slot_at(self.buf, at)
            .and_then(|slot| read_slot(slot, self.heap))
            .ok_or_else(malformed)?;

        let fits = |value: &ValueRef<'_>| match (hint, value) {
            (None, ValueRef::Array(_)) => false,
            (None, _)
            | (Some(TypeHint::String), ValueRef::Str(_))
            | (Some(TypeHint::Int | TypeHint::Base62), ValueRef::Integer(_))
            | (Some(TypeHint::Float), ValueRef::Float(_))
            | (Some(TypeHint::Bool), ValueRef::Bool(_)) => true,
            _ => false,
        };

        let ok = match value {
            ValueRef::Array(array) => {
                (0..array.len()).all(|i| array.get(i).is_some_and(|v| fits(&v)))
            }
            scalar => fits(&scalar),
        };
        if ok {
            Ok(())
        } else {
            Err(format!("value slot at {at} does not match its column type"))
        }
    }

    /// Returns the fingerprint stored in the header.
    #[must_use]
    pub const fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Returns the number of context fields.
    #[must_use]
    pub const fn context_len(&self) -> usize {
        self.ctx_count
    }

    /// Returns context field `index` as `(key, value)`.
    #[must_use]
    pub fn context_entry(&self, index: usize) -> Option<(&'a str, ValueRef<'a>)> {
        if index >= self.ctx_count {
            return None;
        }
        let at = self.ctx_offset + index * CONTEXT_ENTRY_LEN;
        let key = read_str(slot_at(self.buf, at)?, self.heap)?;
        let value = read_slot(slot_at(self.buf, at + SLOT_LEN)?, self.heap)?;
        Some((key, value))
    }

    /// Looks up a context field by key.
    #[must_use]
    pub fn context_get(&self, key: &str) -> Option<ValueRef<'a>> {
        self.context()
            .find(|(k, _)| *k == key)
            .map(|(_, value)| value)
    }

    /// Iterates over context fields in stored order.
    pub fn context(&self) -> impl Iterator<Item = (&'a str, ValueRef<'a>)> + '_ {
        (0..self.ctx_count).filter_map(move |i| self.context_entry(i))
    }

    /// Returns the number of sections.
    #[must_use]
    pub const fn section_count(&self) -> usize {
        self.sec_count
    }

    /// Returns section `index`.
    #[must_use]
    pub fn section(&self, index: usize) -> Option<SectionView<'a>> {
        if index >= self.sec_count {
            return None;
        }
        let at = self.sec_offset + index * SECTION_ENTRY_LEN;
        let id = read_str(slot_at(self.buf, at)?, self.heap)?;
        let mut section = SectionView {
            buf: self.buf,
            heap: self.heap,
            id,
            columns_offset: u32_at(self.buf, at + 16)?,
            column_count: u32_at(self.buf, at + 20)?,
            rows_offset: u32_at(self.buf, at + 24)?,
            row_count: u32_at(self.buf, at + 28)?,
            stored_width: 0,
        };
        section.stored_width = (0..section.column_count)
            .filter(|&c| section.column(c).is_some_and(|(_, hint)| hint.is_stored()))
            .count();
        Some(section)
    }

    /// Looks up a section by id.
    #[must_use]
    pub fn section_by_id(&self, id: &str) -> Option<SectionView<'a>> {
        self.sections().find(|s| s.id() == id)
    }

    /// Iterates over sections in stored order.
    pub fn sections(&self) -> impl Iterator<Item = SectionView<'a>> + '_ {
        (0..self.sec_count).filter_map(move |i| self.section(i))
    }

    /// Copies the whole buffer into an owned [`Document`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Integrity`] if the buffer is well formed but holds a
    /// document that breaks an invariant, e.g. duplicate section ids.
    pub fn materialize(&self) -> Result<Document> {
        let mut doc = Document::new();
        for (key, value) in self.context() {
            if doc.context.insert(key.to_string(), value.to_value()).is_some() {
                return Err(Error::integrity(format!("duplicate context key {key:?}")));
            }
        }

        for view in self.sections() {
            let columns = (0..view.column_count())
                .filter_map(|c| view.column(c))
                .map(|(name, hint)| Column::new(name, hint))
                .collect();
            let mut section = Section::new(view.id(), columns);
            for r in 0..view.row_count() {
                let row = (0..view.stored_width)
                    .map(|c| view.stored_cell(r, c).map(|v| v.to_value()))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| {
                        Error::integrity(format!("unreadable row {r} in {:?}", view.id()))
                    })?;
                section.rows.push(row);
            }
            doc.sections.push(section);
        }

        match doc.validate().into_iter().next() {
            None => Ok(doc),
            Some(violation) => Err(Error::integrity(violation)),
        }
    }
}

/// A borrowed section of a [`MachineView`].
#[derive(Clone, Copy, Debug)]
pub struct SectionView<'a> {
    buf: &'a [u8],
    heap: &'a [u8],
    id: &'a str,
    columns_offset: usize,
    column_count: usize,
    rows_offset: usize,
    row_count: usize,
    stored_width: usize,
}

impl<'a> SectionView<'a> {
    /// Returns the section id.
    #[must_use]
    pub const fn id(&self) -> &'a str {
        self.id
    }

    /// Returns the number of declared columns, auto-id included.
    #[must_use]
    pub const fn column_count(&self) -> usize {
        self.column_count
    }

    /// Returns the number of rows.
    #[must_use]
    pub const fn row_count(&self) -> usize {
        self.row_count
    }

    /// Returns the name and type of column `index`.
    #[must_use]
    pub fn column(&self, index: usize) -> Option<(&'a str, TypeHint)> {
        if index >= self.column_count {
            return None;
        }
        let at = self.columns_offset + index * COLUMN_ENTRY_LEN;
        let name = read_str(slot_at(self.buf, at)?, self.heap)?;
        let hint = TypeHint::from_code(*self.buf.get(at + SLOT_LEN)?)?;
        Some((name, hint))
    }

    /// Returns the cell at `row` under declared column `column`.
    ///
    /// Auto-id columns yield the 1-based row position.
    #[must_use]
    pub fn cell(&self, row: usize, column: usize) -> Option<ValueRef<'a>> {
        let (_, hint) = self.column(column)?;
        if !hint.is_stored() {
            return (row < self.row_count).then(|| ValueRef::Integer(auto_id_value(row)));
        }
        let stored_index = (0..column)
            .filter(|&c| self.column(c).is_some_and(|(_, h)| h.is_stored()))
            .count();
        self.stored_cell(row, stored_index)
    }

    /// Returns the `index`-th stored value of `row`, skipping auto-id columns.
    #[must_use]
    pub fn stored_cell(&self, row: usize, index: usize) -> Option<ValueRef<'a>> {
        if row >= self.row_count || index >= self.stored_width {
            return None;
        }
        let at = self.rows_offset + (row * self.stored_width + index) * SLOT_LEN;
        read_slot(slot_at(self.buf, at)?, self.heap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        Document::new()
            .with_context("name", "dx")
            .with_context("description", "a string long enough to spill onto the heap")
            .with_context("list", Value::from(vec![Value::from(1), Value::from("two")]))
            .with_section(
                Section::new(
                    "forge",
                    vec![
                        Column::new("id", TypeHint::AutoId),
                        Column::new("name", TypeHint::String),
                        Column::new("stars", TypeHint::Base62),
                        Column::new("ratio", TypeHint::Float),
                        Column::new("ok", TypeHint::Bool),
                    ],
                )
                .with_row(vec![
                    Value::from("dx"),
                    Value::from(320),
                    Value::from(0.5),
                    Value::from(true),
                ])
                .with_row(vec![
                    Value::from("exactly14bytes"),
                    Value::from(0),
                    Value::from(-1.25),
                    Value::from(false),
                ]),
            )
    }

    #[test]
    fn test_roundtrip() {
        let doc = sample();
        let bytes = encode(&doc).unwrap();
        assert_eq!(&bytes[0..4], b"DXMB");
        assert_eq!(decode(&bytes).unwrap().materialize().unwrap(), doc);
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(encode(&sample()).unwrap(), encode(&sample()).unwrap());
    }

    #[test]
    fn test_inline_threshold() {
        let mut heap = Heap::default();
        let inline = heap.string("exactly14bytes").unwrap();
        assert_eq!(inline[0], TAG_INLINE_STR);
        assert!(heap.bytes.is_empty());
        let spilled = heap.string("fifteen-bytes!!").unwrap();
        assert_eq!(spilled[0], TAG_HEAP_STR);
        assert_eq!(heap.bytes.len(), 15);
    }

    #[test]
    fn test_accessors() {
        let bytes = encode(&sample()).unwrap();
        let view = decode(&bytes).unwrap();
        assert_eq!(view.context_len(), 3);
        assert_eq!(
            view.context_get("description"),
            Some(ValueRef::Str("a string long enough to spill onto the heap"))
        );
        let Some(ValueRef::Array(list)) = view.context_get("list") else {
            panic!("expected array");
        };
        assert_eq!(list.len(), 2);
        assert_eq!(list.get(1), Some(ValueRef::Str("two")));
        assert_eq!(list.get(2), None);

        let forge = view.section(0).unwrap();
        assert_eq!(forge.id(), "forge");
        assert_eq!(forge.column(2), Some(("stars", TypeHint::Base62)));
        assert_eq!(forge.cell(1, 0), Some(ValueRef::Integer(2)));
        assert_eq!(forge.cell(1, 1), Some(ValueRef::Str("exactly14bytes")));
        assert_eq!(forge.cell(0, 4), Some(ValueRef::Bool(true)));
        assert_eq!(forge.stored_cell(0, 2), Some(ValueRef::Float(0.5)));
        assert_eq!(forge.cell(2, 1), None);
        assert!(view.section_by_id("missing").is_none());
    }

    #[test]
    fn test_any_flipped_byte_is_refused() {
        let bytes = encode(&sample()).unwrap();
        for i in 0..bytes.len() {
            let mut corrupt = bytes.clone();
            corrupt[i] ^= 0x01;
            assert!(
                matches!(decode(&corrupt), Err(Error::Integrity { .. })),
                "byte {i} flipped but buffer accepted"
            );
        }
    }

    #[test]
    fn test_truncated_and_empty() {
        let bytes = encode(&sample()).unwrap();
        assert!(decode(&bytes[..bytes.len() - 1]).is_err());
        assert!(decode(&[]).is_err());
        assert!(decode(&bytes[..HEADER_LEN]).is_err());
    }

    #[test]
    fn test_bad_structure_with_valid_fingerprint() {
        let mut bytes = encode(&Document::new().with_context("k", 1)).unwrap();
        // context count far past the buffer, then re-sign
        bytes[44..48].copy_from_slice(&1000u32.to_le_bytes());
        let fp = Fingerprint::of(&bytes[FINGERPRINT_START..]);
        bytes[8..FINGERPRINT_START].copy_from_slice(fp.as_bytes());
        let err = decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("out of bounds"), "{err}");
    }

    #[test]
    fn test_empty_document() {
        let bytes = encode(&Document::new()).unwrap();
        assert_eq!(bytes.len(), HEADER_LEN);
        let view = decode(&bytes).unwrap();
        assert_eq!(view.section_count(), 0);
        assert_eq!(view.materialize().unwrap(), Document::new());
    }
}
