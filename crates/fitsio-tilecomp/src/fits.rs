//! Persisting a [`MemoryTable`] as a FITS file.
//!
//! The file holds an empty primary HDU followed by one BINTABLE extension.
//! Variable-length columns use `P` descriptors into the heap that follows
//! the main table. CHECKSUM and DATASUM are stamped on the table HDU.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::block::{pad_to_block, padded_byte_len, DATA_PAD_BYTE};
use crate::checksum::{stamp_checksum, verify};
use crate::endian::BigEndian;
use crate::error::{Error, Result};
use crate::header::{parse_header_blocks, serialize_header, Card, Header};
use crate::keywords::indexed_suffix;
use crate::table::{ColumnType, ElementType, MemoryTable, TableStore};
use crate::value::Value;

/// Table structure keywords, rebuilt on every write.
const STRUCTURAL: &[&str] = &[
    "XTENSION", "BITPIX", "NAXIS", "NAXIS1", "NAXIS2", "PCOUNT", "GCOUNT", "TFIELDS", "THEAP",
    "CHECKSUM", "DATASUM",
];
const STRUCTURAL_INDEXED: &[&str] = &["TTYPE", "TFORM", "TDIM"];

fn is_structural(card: &Card) -> bool {
    let kw = card.keyword_str();
    STRUCTURAL.contains(&kw) || STRUCTURAL_INDEXED.iter().any(|p| indexed_suffix(kw, p).is_some())
}

fn primary_header() -> Header {
    let mut h = Header::new();
    h.set("SIMPLE", Value::Logical(true), Some("file does conform to FITS standard"));
    h.set("BITPIX", Value::Integer(8), Some("number of bits per data pixel"));
    h.set("NAXIS", Value::Integer(0), Some("number of data axes"));
    h.set("EXTEND", Value::Logical(true), Some("FITS dataset may contain extensions"));
    h
}

/// Bytes a column takes in the main table.
fn cell_width(ty: ColumnType) -> usize {
    match ty {
        ColumnType::VarArray(_) => 8,
        ColumnType::Scalar(e) => e.size(),
    }
}

fn put_scalar(out: &mut Vec<u8>, element: ElementType, v: f64) {
    match element {
        ElementType::U8 => out.push(v as u8),
        ElementType::I16 => out.extend_from_slice(&(v as i16).to_be_bytes()),
        ElementType::I32 => out.extend_from_slice(&(v as i32).to_be_bytes()),
        ElementType::F32 => out.extend_from_slice(&(v as f32).to_be_bytes()),
        ElementType::F64 => out.extend_from_slice(&v.to_be_bytes()),
    }
}

fn get_scalar(element: ElementType, cell: &[u8]) -> f64 {
    match element {
        ElementType::U8 => cell[0] as f64,
        ElementType::I16 => i16::read_be(cell) as f64,
        ElementType::I32 => i32::read_be(cell) as f64,
        ElementType::F32 => f32::read_be(cell) as f64,
        ElementType::F64 => f64::read_be(cell),
    }
}

fn descriptor_field(v: usize) -> Result<[u8; 4]> {
    i32::try_from(v)
        .map(i32::to_be_bytes)
        .map_err(|_| Error::InvalidHeader("heap exceeds the 32-bit descriptor range"))
}

/// Serialize `table` as a complete FITS file.
pub fn to_fits_bytes(table: &MemoryTable) -> Result<Vec<u8>> {
    let columns: Vec<(String, ColumnType)> = table
        .columns()
        .map(|(name, ty)| (String::from(name), ty))
        .collect();
    let naxis1: usize = columns.iter().map(|(_, ty)| cell_width(*ty)).sum();
    let rows = table.num_rows();

    let mut data = Vec::with_capacity(naxis1 * rows);
    let mut heap = Vec::new();
    for row in 1..=rows {
        for (col, (_, ty)) in columns.iter().enumerate() {
            match *ty {
                ColumnType::VarArray(e) => {
                    let bytes = table.read_bytes(col, row)?;
                    data.extend_from_slice(&descriptor_field(bytes.len() / e.size())?);
                    data.extend_from_slice(&descriptor_field(heap.len())?);
                    heap.extend_from_slice(&bytes);
                }
                ColumnType::Scalar(e) => put_scalar(&mut data, e, table.read_scalar(col, row)?),
            }
        }
    }
    let heap_len = heap.len();
    data.extend_from_slice(&heap);

    let mut h = Header::new();
    h.set("XTENSION", Value::String(String::from("BINTABLE")), Some("binary table extension"));
    h.set("BITPIX", Value::Integer(8), Some("8-bit bytes"));
    h.set("NAXIS", Value::Integer(2), Some("2-dimensional binary table"));
    h.set("NAXIS1", Value::Integer(naxis1 as i64), Some("width of table in bytes"));
    h.set("NAXIS2", Value::Integer(rows as i64), Some("number of rows in table"));
    h.set("PCOUNT", Value::Integer(heap_len as i64), Some("size of special data area"));
    h.set("GCOUNT", Value::Integer(1), Some("one data group (required keyword)"));
    h.set("TFIELDS", Value::Integer(columns.len() as i64), Some("number of fields in each row"));
    for (i, (name, ty)) in columns.iter().enumerate() {
        h.set(&format!("TTYPE{}", i + 1), Value::String(name.clone()), None);
        h.set(&format!("TFORM{}", i + 1), Value::String(ty.tform()), None);
    }
    for card in table.header().iter().filter(|c| !is_structural(c)) {
        h.push(card.clone());
    }
    stamp_checksum(&mut h, &data);

    let mut out = serialize_header(&primary_header());
    out.extend_from_slice(&serialize_header(&h));
    pad_to_block(&mut data, DATA_PAD_BYTE);
    out.extend_from_slice(&data);
    log::debug!(
        "serialized {rows} rows x {} columns, heap {heap_len} bytes, file {} bytes",
        columns.len(),
        out.len()
    );
    Ok(out)
}

fn to_usize(v: i64) -> Result<usize> {
    usize::try_from(v).map_err(|_| Error::InvalidValue)
}

/// Bytes in the data unit of an HDU, before padding.
fn data_len(h: &Header) -> Result<usize> {
    let bitpix = h.require_integer("BITPIX")?;
    let naxis = h.get_integer("NAXIS").unwrap_or(0);
    if naxis == 0 {
        return Ok(0);
    }
    let mut n = 1usize;
    for i in 1..=naxis {
        let len = h
            .get_integer(&format!("NAXIS{i}"))
            .ok_or(Error::MissingKeyword("NAXISn"))?;
        n = n.checked_mul(to_usize(len)?).ok_or(Error::InvalidValue)?;
    }
    let pcount = to_usize(h.get_integer("PCOUNT").unwrap_or(0))?;
    let gcount = to_usize(h.get_integer("GCOUNT").unwrap_or(1))?;
    Ok(bitpix.unsigned_abs() as usize / 8 * gcount * (pcount + n))
}

/// Read the first compressed-image table (`ZIMAGE = T`) of a FITS file.
///
/// A failing CHECKSUM or DATASUM is logged, not treated as an error.
pub fn from_fits_bytes(bytes: &[u8]) -> Result<MemoryTable> {
    let (primary, header_len) = parse_header_blocks(bytes)?;
    if primary.get_logical("SIMPLE") != Some(true) {
        return Err(Error::InvalidHeader("not a FITS file"));
    }
    let mut offset = header_len + padded_byte_len(data_len(&primary)?);
    while offset < bytes.len() {
        let (header, header_len) = parse_header_blocks(&bytes[offset..])?;
        let start = offset + header_len;
        let len = data_len(&header)?;
        if start + len > bytes.len() {
            return Err(Error::UnexpectedEof);
        }
        let is_table = header.get_string("XTENSION").map(str::trim) == Some("BINTABLE");
        if is_table && header.get_logical("ZIMAGE") == Some(true) {
            let data = &bytes[start..start + len];
            let status = verify(&header, &bytes[offset..start], data);
            if !status.is_ok() {
                log::warn!("compressed image table fails its checksum: {status:?}");
            }
            return read_table(&header, data);
        }
        offset = start + padded_byte_len(len);
    }
    Err(Error::InvalidHeader("no compressed image table in file"))
}

struct Layout {
    name: String,
    ty: ColumnType,
    offset: usize,
    /// 64-bit `Q` descriptors.
    wide: bool,
}

fn read_table(h: &Header, data: &[u8]) -> Result<MemoryTable> {
    let naxis1 = to_usize(h.require_integer("NAXIS1")?)?;
    let rows = to_usize(h.require_integer("NAXIS2")?)?;
    let tfields = to_usize(h.require_integer("TFIELDS")?)?;
    let theap = match h.get_integer("THEAP") {
        Some(v) => to_usize(v)?,
        None => naxis1 * rows,
    };

    let mut layout = Vec::with_capacity(tfields);
    let mut width = 0;
    for n in 1..=tfields {
        let tform = h
            .get_string(&format!("TFORM{n}"))
            .ok_or(Error::MissingKeyword("TFORMn"))?;
        let ty = ColumnType::parse_tform(tform)?;
        let wide = tform.trim().trim_start_matches(|c: char| c.is_ascii_digit()).starts_with('Q');
        let name = h.get_string(&format!("TTYPE{n}")).unwrap_or("").trim();
        layout.push(Layout {
            name: String::from(name),
            ty,
            offset: width,
            wide,
        });
        width += if wide { 16 } else { cell_width(ty) };
    }
    if width != naxis1 {
        return Err(Error::InvalidHeader("NAXIS1 does not match the column widths"));
    }

    let body: Vec<Card> = h.iter().filter(|c| !is_structural(c)).cloned().collect();
    let mut table = MemoryTable::with_header(Header::from_cards(body));
    let cols = layout
        .iter()
        .map(|c| table.declare_column(&c.name, c.ty))
        .collect::<Result<Vec<_>>>()?;
    table.set_num_rows(rows)?;

    for row in 0..rows {
        let base = row * naxis1;
        for (c, &col) in layout.iter().zip(&cols) {
            let cell = &data[base + c.offset..];
            match c.ty {
                ColumnType::VarArray(e) => {
                    let (count, start) = if c.wide {
                        (i64::read_be(cell), i64::read_be(&cell[8..]))
                    } else {
                        (i32::read_be(cell) as i64, i32::read_be(&cell[4..]) as i64)
                    };
                    let from = theap + to_usize(start)?;
                    let to = from + to_usize(count)? * e.size();
                    let payload = data.get(from..to).ok_or(Error::UnexpectedEof)?;
                    table.write_bytes(col, row + 1, payload)?;
                }
                ColumnType::Scalar(e) => {
                    table.write_scalar(col, row + 1, get_scalar(e, cell))?;
                }
            }
        }
    }
    log::debug!("read compressed table: {rows} rows, {tfields} columns");
    Ok(table)
}

/// Write `table` to a FITS file at `path`.
#[cfg(feature = "std")]
pub fn write_file<P: AsRef<std::path::Path>>(path: P, table: &MemoryTable) -> Result<()> {
    std::fs::write(path, to_fits_bytes(table)?)?;
    Ok(())
}

/// Read the compressed-image table of the FITS file at `path`.
#[cfg(feature = "std")]
pub fn read_file<P: AsRef<std::path::Path>>(path: P) -> Result<MemoryTable> {
    from_fits_bytes(&std::fs::read(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BLOCK_SIZE;
    use alloc::vec;

    fn sample() -> MemoryTable {
        let mut t = MemoryTable::new();
        let data = t
            .declare_column("COMPRESSED_DATA", ColumnType::VarArray(ElementType::U8))
            .unwrap();
        let shorts = t
            .declare_column("UNCOMPRESSED_DATA", ColumnType::VarArray(ElementType::I16))
            .unwrap();
        let scale = t
            .declare_column("ZSCALE", ColumnType::Scalar(ElementType::F64))
            .unwrap();
        t.set_num_rows(3).unwrap();
        t.write_bytes(data, 1, &[1, 2, 3]).unwrap();
        t.write_bytes(shorts, 2, &[0, 7, 0xFF, 0xFE]).unwrap();
        t.write_bytes(data, 3, &[9; 10]).unwrap();
        t.write_scalar(scale, 1, 0.125).unwrap();
        t.write_scalar(scale, 3, -4.5).unwrap();
        let h = t.header_mut();
        h.set("ZIMAGE", Value::Logical(true), None);
        h.set("ZCMPTYPE", Value::String(String::from("RICE_1")), None);
        t
    }

    #[test]
    fn table_round_trip() {
        let t = sample();
        let bytes = to_fits_bytes(&t).unwrap();
        assert_eq!(bytes.len() % BLOCK_SIZE, 0);
        let back = from_fits_bytes(&bytes).unwrap();
        assert_eq!(back.num_rows(), 3);
        assert_eq!(
            back.columns().collect::<Vec<_>>(),
            t.columns().collect::<Vec<_>>()
        );
        for col in 0..2 {
            for row in 1..=3 {
                assert_eq!(back.read_bytes(col, row).unwrap(), t.read_bytes(col, row).unwrap());
            }
        }
        assert_eq!(back.read_scalar(2, 1).unwrap(), 0.125);
        assert_eq!(back.read_scalar(2, 3).unwrap(), -4.5);
        assert_eq!(back.header().get_string("ZCMPTYPE"), Some("RICE_1"));
        assert!(!back.header().contains("TFORM1"));
        assert!(!back.header().contains("CHECKSUM"));
    }

    #[test]
    fn table_hdu_is_checksummed() {
        let bytes = to_fits_bytes(&sample()).unwrap();
        let (table_header, len) = parse_header_blocks(&bytes[BLOCK_SIZE..]).unwrap();
        assert_eq!(table_header.get_integer("PCOUNT"), Some(17));
        let start = BLOCK_SIZE + len;
        let data = &bytes[start..start + data_len(&table_header).unwrap()];
        let status = verify(&table_header, &bytes[BLOCK_SIZE..start], data);
        assert_eq!(status.checksum, Some(true));
        assert_eq!(status.datasum, Some(true));
    }

    #[test]
    fn file_without_compressed_table() {
        let bytes = serialize_header(&primary_header());
        assert!(matches!(
            from_fits_bytes(&bytes),
            Err(Error::InvalidHeader(_))
        ));
    }

    #[test]
    fn truncated_file() {
        let bytes = to_fits_bytes(&sample()).unwrap();
        let cut = &bytes[..2 * BLOCK_SIZE];
        assert!(from_fits_bytes(cut).is_err());
    }

    #[test]
    fn corrupted_data_still_reads() {
        let mut bytes = to_fits_bytes(&sample()).unwrap();
        let (_, len) = parse_header_blocks(&bytes[BLOCK_SIZE..]).unwrap();
        // last payload byte of row 3
        let heap_end = BLOCK_SIZE + len + 3 * 24 + 17;
        bytes[heap_end - 1] = 0;
        let back = from_fits_bytes(&bytes).unwrap();
        assert_eq!(back.read_bytes(0, 3).unwrap()[9], 0);
    }

    #[test]
    fn wide_descriptors_are_read() {
        let mut h = Header::new();
        h.set("XTENSION", Value::String(String::from("BINTABLE")), None);
        h.set("BITPIX", Value::Integer(8), None);
        h.set("NAXIS", Value::Integer(2), None);
        h.set("NAXIS1", Value::Integer(16), None);
        h.set("NAXIS2", Value::Integer(1), None);
        h.set("PCOUNT", Value::Integer(2), None);
        h.set("GCOUNT", Value::Integer(1), None);
        h.set("TFIELDS", Value::Integer(1), None);
        h.set("TTYPE1", Value::String(String::from("COMPRESSED_DATA")), None);
        h.set("TFORM1", Value::String(String::from("1QB(2)")), None);
        h.set("ZIMAGE", Value::Logical(true), None);
        let mut data = vec![0u8; 18];
        data[7] = 2;
        data[16] = 0xAB;
        data[17] = 0xCD;

        let mut bytes = serialize_header(&primary_header());
        bytes.extend_from_slice(&serialize_header(&h));
        bytes.extend_from_slice(&data);
        let t = from_fits_bytes(&bytes).unwrap();
        assert_eq!(t.read_bytes(0, 1).unwrap(), vec![0xAB, 0xCD]);
    }

    #[cfg(feature = "std")]
    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.fits");
        write_file(&path, &sample()).unwrap();
        let back = read_file(&path).unwrap();
        assert_eq!(back.read_bytes(0, 3).unwrap(), vec![9; 10]);
    }
}
