//! Column storage for compressed tiles.
//!
//! The engines talk to storage only through [`TableStore`]: variable-length
//! byte rows for tile payloads, scalar rows for per-tile scale, zero and
//! null values, and an ordered header. [`MemoryTable`] is the in-memory
//! implementation; `crate::fits` persists it as a FITS binary table.

use alloc::format;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::codec::ByteWidth;
use crate::error::{Error, Result};
use crate::header::Header;
use crate::pixel::PixelType;

/// Element type of a column, named by its TFORM letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// B -- unsigned byte.
    U8,
    /// I -- 16-bit signed integer.
    I16,
    /// J -- 32-bit signed integer.
    I32,
    /// E -- 32-bit IEEE float.
    F32,
    /// D -- 64-bit IEEE float.
    F64,
}

impl ElementType {
    pub const fn code(self) -> char {
        match self {
            ElementType::U8 => 'B',
            ElementType::I16 => 'I',
            ElementType::I32 => 'J',
            ElementType::F32 => 'E',
            ElementType::F64 => 'D',
        }
    }

    pub fn from_code(code: u8) -> Result<ElementType> {
        match code {
            b'B' => Ok(ElementType::U8),
            b'I' => Ok(ElementType::I16),
            b'J' => Ok(ElementType::I32),
            b'E' => Ok(ElementType::F32),
            b'D' => Ok(ElementType::F64),
            _ => Err(Error::InvalidValue),
        }
    }

    pub const fn size(self) -> usize {
        match self {
            ElementType::U8 => 1,
            ElementType::I16 => 2,
            ElementType::I32 | ElementType::F32 => 4,
            ElementType::F64 => 8,
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, ElementType::F32 | ElementType::F64)
    }

    /// The integer element type holding values of `width`.
    pub const fn for_width(width: ByteWidth) -> ElementType {
        match width {
            ByteWidth::One => ElementType::U8,
            ByteWidth::Two => ElementType::I16,
            ByteWidth::Four => ElementType::I32,
        }
    }

    /// The integer width of this element type, `None` for floats.
    pub const fn width(self) -> Option<ByteWidth> {
        match self {
            ElementType::U8 => Some(ByteWidth::One),
            ElementType::I16 => Some(ByteWidth::Two),
            ElementType::I32 => Some(ByteWidth::Four),
            _ => None,
        }
    }

    /// The element type that holds raw pixels of a floating-point image.
    pub fn raw_float(ty: PixelType) -> Option<ElementType> {
        match ty {
            PixelType::F32 => Some(ElementType::F32),
            PixelType::F64 => Some(ElementType::F64),
            _ => None,
        }
    }
}

/// The shape of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// One variable-length array per row (`1P<t>`).
    VarArray(ElementType),
    /// One scalar per row (`1<t>`).
    Scalar(ElementType),
}

impl ColumnType {
    pub fn element(self) -> ElementType {
        match self {
            ColumnType::VarArray(e) | ColumnType::Scalar(e) => e,
        }
    }

    /// The TFORM spelling, e.g. `1PB` or `1D`.
    pub fn tform(self) -> String {
        match self {
            ColumnType::VarArray(e) => format!("1P{}", e.code()),
            ColumnType::Scalar(e) => format!("1{}", e.code()),
        }
    }

    /// Parse a TFORM value. A `(maxlen)` suffix is ignored and the repeat
    /// count must be 1 (or absent).
    pub fn parse_tform(s: &str) -> Result<ColumnType> {
        let s = s.trim();
        let s = s.find('(').map_or(s, |paren| &s[..paren]);
        let digits = s.bytes().take_while(u8::is_ascii_digit).count();
        let repeat = &s[..digits];
        if !repeat.is_empty() && repeat != "1" {
            return Err(Error::InvalidValue);
        }
        match &s.as_bytes()[digits..] {
            [b'P' | b'Q', code] => Ok(ColumnType::VarArray(ElementType::from_code(*code)?)),
            [code] => Ok(ColumnType::Scalar(ElementType::from_code(*code)?)),
            _ => Err(Error::InvalidValue),
        }
    }
}

/// Row and column storage used by the compression engines.
///
/// Rows are 1-based. Byte rows hold big-endian element bytes and a row that
/// was never written reads back empty. Scalar rows that were never written
/// read back as 0.
pub trait TableStore {
    fn num_rows(&self) -> usize;

    /// Grow or shrink the table. New rows are empty.
    fn set_num_rows(&mut self, rows: usize) -> Result<()>;

    /// Case-insensitive column lookup.
    fn column_index(&self, name: &str) -> Option<usize>;

    /// Add a column, or return the existing one of that name.
    fn declare_column(&mut self, name: &str, ty: ColumnType) -> Result<usize>;

    fn column_type(&self, col: usize) -> Option<ColumnType>;

    /// Change a column's element type. Fails once the column holds data of
    /// a different element size.
    fn set_column_type(&mut self, col: usize, ty: ColumnType) -> Result<()>;

    fn read_bytes(&self, col: usize, row: usize) -> Result<Vec<u8>>;

    fn write_bytes(&mut self, col: usize, row: usize, bytes: &[u8]) -> Result<()>;

    fn read_scalar(&self, col: usize, row: usize) -> Result<f64>;

    fn write_scalar(&mut self, col: usize, row: usize, value: f64) -> Result<()>;

    fn header(&self) -> &Header;

    fn header_mut(&mut self) -> &mut Header;
}

// ---------------------------------------------------------------------------
// In-memory table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum ColumnData {
    Var(Vec<Vec<u8>>),
    Scalar(Vec<f64>),
}

#[derive(Debug, Clone, PartialEq)]
struct Column {
    name: String,
    ty: ColumnType,
    data: ColumnData,
}

impl Column {
    fn new(name: &str, ty: ColumnType, rows: usize) -> Column {
        let data = match ty {
            ColumnType::VarArray(_) => ColumnData::Var(vec![Vec::new(); rows]),
            ColumnType::Scalar(_) => ColumnData::Scalar(vec![0.0; rows]),
        };
        Column {
            name: String::from(name),
            ty,
            data,
        }
    }

    fn resize(&mut self, rows: usize) {
        match &mut self.data {
            ColumnData::Var(v) => v.resize(rows, Vec::new()),
            ColumnData::Scalar(v) => v.resize(rows, 0.0),
        }
    }
}

/// A [`TableStore`] held entirely in memory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryTable {
    header: Header,
    columns: Vec<Column>,
    rows: usize,
}

impl MemoryTable {
    pub fn new() -> MemoryTable {
        MemoryTable::default()
    }

    /// Start from an existing header, with no columns or rows.
    pub fn with_header(header: Header) -> MemoryTable {
        MemoryTable {
            header,
            ..MemoryTable::default()
        }
    }

    /// Column names and types in declaration order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, ColumnType)> + '_ {
        self.columns.iter().map(|c| (c.name.as_str(), c.ty))
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    fn column(&self, col: usize) -> Result<&Column> {
        self.columns
            .get(col)
            .ok_or(Error::InvalidHeader("no such column"))
    }

    fn slot(&self, row: usize) -> Result<usize> {
        if row == 0 || row > self.rows {
            return Err(Error::InvalidGeometry("table row out of range"));
        }
        Ok(row - 1)
    }
}

impl TableStore for MemoryTable {
    fn num_rows(&self) -> usize {
        self.rows
    }

    fn set_num_rows(&mut self, rows: usize) -> Result<()> {
        for column in &mut self.columns {
            column.resize(rows);
        }
        self.rows = rows;
        Ok(())
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    fn declare_column(&mut self, name: &str, ty: ColumnType) -> Result<usize> {
        if let Some(col) = self.column_index(name) {
            return Ok(col);
        }
        self.columns.push(Column::new(name, ty, self.rows));
        Ok(self.columns.len() - 1)
    }

    fn column_type(&self, col: usize) -> Option<ColumnType> {
        self.columns.get(col).map(|c| c.ty)
    }

    fn set_column_type(&mut self, col: usize, ty: ColumnType) -> Result<()> {
        let column = self
            .columns
            .get_mut(col)
            .ok_or(Error::InvalidHeader("no such column"))?;
        match (&column.data, ty) {
            (ColumnData::Var(rows), ColumnType::VarArray(e)) => {
                let resized = e.size() != column.ty.element().size();
                if resized && rows.iter().any(|r| !r.is_empty()) {
                    return Err(Error::InvalidHeader("cannot retype a column holding data"));
                }
            }
            (ColumnData::Scalar(_), ColumnType::Scalar(_)) => {}
            _ => return Err(Error::InvalidHeader("cannot change a column's shape")),
        }
        column.ty = ty;
        Ok(())
    }

    fn read_bytes(&self, col: usize, row: usize) -> Result<Vec<u8>> {
        let i = self.slot(row)?;
        match &self.column(col)?.data {
            ColumnData::Var(rows) => Ok(rows[i].clone()),
            ColumnData::Scalar(_) => Err(Error::InvalidHeader("not a variable-length column")),
        }
    }

    fn write_bytes(&mut self, col: usize, row: usize, bytes: &[u8]) -> Result<()> {
        let i = self.slot(row)?;
        let column = self
            .columns
            .get_mut(col)
            .ok_or(Error::InvalidHeader("no such column"))?;
        let size = column.ty.element().size();
        if bytes.len() % size != 0 {
            return Err(Error::CorruptRecord {
                expected: bytes.len() / size * size + size,
                found: bytes.len(),
            });
        }
        match &mut column.data {
            ColumnData::Var(rows) => {
                rows[i] = bytes.to_vec();
                Ok(())
            }
            ColumnData::Scalar(_) => Err(Error::InvalidHeader("not a variable-length column")),
        }
    }

    fn read_scalar(&self, col: usize, row: usize) -> Result<f64> {
        let i = self.slot(row)?;
        match &self.column(col)?.data {
            ColumnData::Scalar(rows) => Ok(rows[i]),
            ColumnData::Var(_) => Err(Error::InvalidHeader("not a scalar column")),
        }
    }

    fn write_scalar(&mut self, col: usize, row: usize, value: f64) -> Result<()> {
        let i = self.slot(row)?;
        let column = self
            .columns
            .get_mut(col)
            .ok_or(Error::InvalidHeader("no such column"))?;
        match &mut column.data {
            ColumnData::Scalar(rows) => {
                rows[i] = value;
                Ok(())
            }
            ColumnData::Var(_) => Err(Error::InvalidHeader("not a scalar column")),
        }
    }

    fn header(&self) -> &Header {
        &self.header
    }

    fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }
}
