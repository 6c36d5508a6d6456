//! RICE_1: adaptive Rice coding of pixel differences.
//!
//! Stream layout: the first pixel verbatim (big-endian, `width` bytes), then
//! one coding block per `blocksize` pixels. Each block starts with an
//! `fsbits`-wide code: 0 means every difference in the block is zero,
//! `fsmax + 1` means the differences follow verbatim in `bbits` bits each,
//! anything else is `fs + 1` for a Rice split of `fs` low bits. Differences
//! are zigzag-mapped to unsigned before coding.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use super::{ByteWidth, CodecParams, CompressionAlgorithm, PixelCodec};
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RiceParams {
    fsbits: u32,
    fsmax: u32,
    bbits: u32,
}

impl RiceParams {
    const fn for_width(width: ByteWidth) -> Self {
        match width {
            ByteWidth::One => RiceParams {
                fsbits: 3,
                fsmax: 6,
                bbits: 8,
            },
            ByteWidth::Two => RiceParams {
                fsbits: 4,
                fsmax: 14,
                bbits: 16,
            },
            ByteWidth::Four => RiceParams {
                fsbits: 5,
                fsmax: 25,
                bbits: 32,
            },
        }
    }
}

#[inline]
fn zigzag(diff: i32) -> u32 {
    (if diff < 0 { !(diff << 1) } else { diff << 1 }) as u32
}

#[inline]
fn unzigzag(diff: u32) -> i32 {
    (if diff & 1 == 0 { diff >> 1 } else { !(diff >> 1) }) as i32
}

// ---------------------------------------------------------------------------
// Bit I/O
// ---------------------------------------------------------------------------

struct BitWriter {
    out: Vec<u8>,
    acc: u64,
    nbits: u32,
}

impl BitWriter {
    fn with_capacity(n: usize) -> Self {
        BitWriter {
            out: Vec::with_capacity(n),
            acc: 0,
            nbits: 0,
        }
    }

    /// Append the low `n` bits of `value`, most significant first.
    fn write(&mut self, value: u32, n: u32) {
        if n == 0 {
            return;
        }
        self.acc = (self.acc << n) | (value as u64 & ((1u64 << n) - 1));
        self.nbits += n;
        while self.nbits >= 8 {
            self.nbits -= 8;
            self.out.push((self.acc >> self.nbits) as u8);
        }
        self.acc &= (1u64 << self.nbits) - 1;
    }

    /// `zeros` zero bits followed by a one bit.
    fn write_unary(&mut self, mut zeros: u32) {
        while zeros >= 24 {
            self.write(0, 24);
            zeros -= 24;
        }
        self.write(1, zeros + 1);
    }

    fn finish(mut self) -> Vec<u8> {
        if self.nbits > 0 {
            self.out.push((self.acc << (8 - self.nbits)) as u8);
        }
        self.out
    }
}

struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    acc: u64,
    nbits: u32,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        BitReader {
            data,
            pos: 0,
            acc: 0,
            nbits: 0,
        }
    }

    fn refill(&mut self) -> Result<()> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| exhausted(self.data.len()))?;
        self.pos += 1;
        self.acc = (self.acc << 8) | byte as u64;
        self.nbits += 8;
        Ok(())
    }

    fn read(&mut self, n: u32) -> Result<u32> {
        while self.nbits < n {
            self.refill()?;
        }
        self.nbits -= n;
        let v = (self.acc >> self.nbits) & ((1u64 << n) - 1);
        self.acc &= (1u64 << self.nbits) - 1;
        Ok(v as u32)
    }

    /// Count zero bits up to and including the next one bit.
    fn read_unary(&mut self) -> Result<u32> {
        let mut zeros = 0;
        loop {
            if self.nbits == 0 {
                self.refill()?;
            }
            if self.acc == 0 {
                zeros += self.nbits;
                self.nbits = 0;
                continue;
            }
            let lead = self.nbits - (64 - self.acc.leading_zeros());
            zeros += lead;
            self.nbits -= lead + 1;
            self.acc &= (1u64 << self.nbits) - 1;
            return Ok(zeros);
        }
    }
}

fn exhausted(len: usize) -> Error {
    Error::DecompressionFailed(format!("rice stream ended early after {len} bytes"))
}

// ---------------------------------------------------------------------------
// Coding
// ---------------------------------------------------------------------------

fn rice_encode(
    values: &[i32],
    width: ByteWidth,
    blocksize: usize,
    capacity: usize,
) -> Result<Vec<u8>> {
    let params = RiceParams::for_width(width);
    let (lo, hi) = width.range();
    let mut w = BitWriter::with_capacity(capacity);

    let Some(&first) = values.first() else {
        return Ok(Vec::new());
    };
    let mut lastpix = first;
    w.write(width.normalize(first) as u32, params.bbits);

    let mut diffs = Vec::with_capacity(blocksize);
    for block in values.chunks(blocksize) {
        diffs.clear();
        let mut pixelsum = 0u64;
        for &v in block {
            if (v as i64) < lo || (v as i64) > hi {
                return Err(Error::CompressionFailed(format!(
                    "value {v} does not fit {}-byte rice coding",
                    width.bytes()
                )));
            }
            let pdiff = width.normalize(v.wrapping_sub(lastpix));
            let pdiff = if width == ByteWidth::One { pdiff as u8 as i8 as i32 } else { pdiff };
            let d = zigzag(pdiff);
            pixelsum += d as u64;
            diffs.push(d);
            lastpix = v;
        }

        let n = block.len() as f64;
        let dpsum = ((pixelsum as f64 - (block.len() / 2) as f64 - 1.0) / n).max(0.0);
        let mut psum = (dpsum as u32) >> 1;
        let mut fs = 0u32;
        while psum > 0 {
            psum >>= 1;
            fs += 1;
        }

        if fs >= params.fsmax {
            w.write(params.fsmax + 1, params.fsbits);
            for &d in &diffs {
                w.write(d, params.bbits);
            }
        } else if fs == 0 && pixelsum == 0 {
            w.write(0, params.fsbits);
        } else {
            w.write(fs + 1, params.fsbits);
            let mask = (1u32 << fs) - 1;
            for &d in &diffs {
                w.write_unary(d >> fs);
                w.write(d & mask, fs);
            }
        }
    }
    Ok(w.finish())
}

fn rice_decode(bytes: &[u8], count: usize, width: ByteWidth, blocksize: usize) -> Result<Vec<i32>> {
    let params = RiceParams::for_width(width);
    let mut out = Vec::with_capacity(count);
    if count == 0 {
        return Ok(out);
    }
    let mut r = BitReader::new(bytes);
    let mut lastpix = width.normalize(r.read(params.bbits)? as i32);

    while out.len() < count {
        let n = blocksize.min(count - out.len());
        let code = r.read(params.fsbits)?;
        if code == 0 {
            out.extend(core::iter::repeat(lastpix).take(n));
        } else if code - 1 == params.fsmax {
            for _ in 0..n {
                let d = r.read(params.bbits)?;
                lastpix = width.normalize(unzigzag(d).wrapping_add(lastpix));
                out.push(lastpix);
            }
        } else if code - 1 < params.fsmax {
            let fs = code - 1;
            for _ in 0..n {
                let top = r.read_unary()?;
                let low = r.read(fs)?;
                let wide = ((top as u64) << fs) | low as u64;
                let d = u32::try_from(wide).map_err(|_| {
                    Error::DecompressionFailed(String::from("rice difference overflows"))
                })?;
                lastpix = width.normalize(unzigzag(d).wrapping_add(lastpix));
                out.push(lastpix);
            }
        } else {
            return Err(Error::DecompressionFailed(format!(
                "invalid rice block code {code}"
            )));
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// The RICE_1 codec. Accepts all three integer widths.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiceCodec;

impl PixelCodec for RiceCodec {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Rice
    }

    fn accepts(&self, _width: ByteWidth) -> bool {
        true
    }

    fn max_encoded_len(&self, count: usize, width: ByteWidth, params: &CodecParams) -> usize {
        width.bytes() * count + count / params.blocksize.max(1) + 2 + 4
    }

    fn encode(&self, values: &[i32], width: ByteWidth, params: &CodecParams) -> Result<Vec<u8>> {
        if params.blocksize == 0 {
            return Err(Error::CompressionFailed(String::from("rice block size is zero")));
        }
        let capacity = self.max_encoded_len(values.len(), width, params);
        rice_encode(values, width, params.blocksize, capacity)
    }

    fn decode(
        &self,
        bytes: &[u8],
        count: usize,
        width: ByteWidth,
        params: &CodecParams,
    ) -> Result<Vec<i32>> {
        if params.blocksize == 0 {
            return Err(Error::DecompressionFailed(String::from("rice block size is zero")));
        }
        rice_decode(bytes, count, width, params.blocksize)
    }
}
