//! GZIP_1: deflate over the big-endian integer bytes of a tile.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use super::{ByteWidth, CodecParams, CompressionAlgorithm, PixelCodec};
use crate::endian::{self, BigEndian};
use crate::error::{Error, Result};

/// Fixed member header: deflate, no flags, no mtime, unknown OS.
const GZIP_HEADER: [u8; 10] = [0x1f, 0x8b, 0x08, 0, 0, 0, 0, 0, 0, 0xff];

/// Wrap `raw` in a single gzip member.
fn gzip(raw: &[u8], level: u8) -> Vec<u8> {
    let deflated = miniz_oxide::deflate::compress_to_vec(raw, level);
    let mut out = Vec::with_capacity(GZIP_HEADER.len() + deflated.len() + 8);
    out.extend_from_slice(&GZIP_HEADER);
    out.extend_from_slice(&deflated);
    out.extend_from_slice(&crc32fast::hash(raw).to_le_bytes());
    out.extend_from_slice(&(raw.len() as u32).to_le_bytes());
    out
}

/// Split a gzip member into its deflate payload and its CRC-32/ISIZE
/// trailer.
fn split_gzip(data: &[u8]) -> Result<(&[u8], u32, u32)> {
    let bad = |what: &str| Error::DecompressionFailed(format!("bad gzip {what}"));
    if data.len() < 18 || data[0] != 0x1f || data[1] != 0x8b || data[2] != 0x08 {
        return Err(bad("magic"));
    }
    let flg = data[3];
    let mut pos = 10usize;
    if flg & 0x04 != 0 {
        // FEXTRA
        let xlen = data
            .get(pos..pos + 2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]) as usize)
            .ok_or_else(|| bad("extra field"))?;
        pos += 2 + xlen;
    }
    for flag in [0x08, 0x10] {
        // FNAME, FCOMMENT: null-terminated strings
        if flg & flag != 0 {
            let end = data
                .get(pos..)
                .and_then(|rest| rest.iter().position(|&b| b == 0))
                .ok_or_else(|| bad("header string"))?;
            pos += end + 1;
        }
    }
    if flg & 0x02 != 0 {
        // FHCRC
        pos += 2;
    }
    if data.len() < pos + 8 {
        return Err(bad("trailer"));
    }
    let trailer = &data[data.len() - 8..];
    let crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let isize = u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);
    Ok((&data[pos..data.len() - 8], crc, isize))
}

/// Inflate a gzip member, checking its trailer. zlib and raw deflate
/// streams are accepted too.
fn inflate(compressed: &[u8]) -> Result<Vec<u8>> {
    let failed = |e: miniz_oxide::inflate::DecompressError| {
        Error::DecompressionFailed(format!("inflate: {:?}", e.status))
    };
    if compressed.len() >= 2 && compressed[0] == 0x1f && compressed[1] == 0x8b {
        let (payload, crc, isize) = split_gzip(compressed)?;
        let raw = miniz_oxide::inflate::decompress_to_vec(payload).map_err(failed)?;
        if raw.len() as u32 != isize || crc32fast::hash(&raw) != crc {
            return Err(Error::DecompressionFailed(String::from(
                "gzip trailer does not match the inflated data",
            )));
        }
        return Ok(raw);
    }
    miniz_oxide::inflate::decompress_to_vec_zlib(compressed)
        .or_else(|_| miniz_oxide::inflate::decompress_to_vec(compressed))
        .map_err(failed)
}

fn pack(values: &[i32], width: ByteWidth) -> Result<Vec<u8>> {
    let (lo, hi) = width.range();
    if let Some(v) = values.iter().find(|&&v| (v as i64) < lo || (v as i64) > hi) {
        return Err(Error::CompressionFailed(format!(
            "value {v} does not fit {} bytes",
            width.bytes()
        )));
    }
    let bytes = match width {
        ByteWidth::One => values.iter().map(|&v| v as u8).collect(),
        ByteWidth::Two => {
            let shorts: Vec<i16> = values.iter().map(|&v| v as i16).collect();
            endian::to_be_bytes(&shorts)
        }
        ByteWidth::Four => endian::to_be_bytes(values),
    };
    Ok(bytes)
}

fn unpack(bytes: &[u8], width: ByteWidth) -> Vec<i32> {
    match width {
        ByteWidth::One => bytes.iter().map(|&b| b as i32).collect(),
        ByteWidth::Two => bytes
            .chunks_exact(2)
            .map(|c| i16::read_be(c) as i32)
            .collect(),
        ByteWidth::Four => bytes.chunks_exact(4).map(i32::read_be).collect(),
    }
}

/// The GZIP_1 codec.
///
/// Output is one gzip member. Input may be gzip, zlib or raw deflate. The
/// integer width is inferred from the inflated length, so tiles written at a
/// different width than the reader expects still decode.
#[derive(Debug, Clone, Copy)]
pub struct GzipCodec {
    /// Deflate level, 0 to 10.
    pub level: u8,
}

impl Default for GzipCodec {
    fn default() -> Self {
        GzipCodec { level: 6 }
    }
}

impl PixelCodec for GzipCodec {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Gzip
    }

    fn accepts(&self, _width: ByteWidth) -> bool {
        true
    }

    fn max_encoded_len(&self, count: usize, width: ByteWidth, _params: &CodecParams) -> usize {
        match width {
            ByteWidth::One | ByteWidth::Two => (count as f64 * 2.0 / 1.3) as usize,
            ByteWidth::Four => count * 4 / 2,
        }
    }

    fn encode(&self, values: &[i32], width: ByteWidth, _params: &CodecParams) -> Result<Vec<u8>> {
        let raw = pack(values, width)?;
        Ok(gzip(&raw, self.level))
    }

    fn decode(
        &self,
        bytes: &[u8],
        count: usize,
        width: ByteWidth,
        _params: &CodecParams,
    ) -> Result<Vec<i32>> {
        let raw = inflate(bytes)?;
        let actual = if raw.len() == count * width.bytes() {
            width
        } else {
            [ByteWidth::Two, ByteWidth::Four, ByteWidth::One]
                .into_iter()
                .find(|w| raw.len() == count * w.bytes())
                .ok_or(Error::CorruptRecord {
                    expected: count * width.bytes(),
                    found: raw.len(),
                })?
        };
        Ok(unpack(&raw, actual))
    }
}
