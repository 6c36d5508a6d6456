//! Copying pixels between a tile and a (possibly strided or mirrored)
//! requested section.
//!
//! Both buffers are dense arrays with dimension 0 fastest. The tile buffer
//! covers its [`TileExtent`]; the section buffer holds only the sampled
//! pixels, shaped by [`Section::shape`].

use alloc::vec::Vec;

use crate::error::{Error, Result};
use crate::geometry::{Section, TileExtent};

/// Pairs of (offset in tile, offset in section) along one axis for every
/// sampled pixel the two ranges share. Pixels that fall between lattice
/// points of a strided request are skipped.
fn axis_pairs(
    tile_first: usize,
    tile_last: usize,
    sec_first: usize,
    sec_last: usize,
    stride: isize,
    out_len: usize,
) -> Vec<(usize, usize)> {
    let lo = tile_first.max(sec_first);
    let hi = tile_last.min(sec_last);
    if lo > hi {
        return Vec::new();
    }
    let step = stride.unsigned_abs();
    let misalign = (lo - sec_first) % step;
    let start = if misalign == 0 { lo } else { lo + step - misalign };
    (start..=hi)
        .step_by(step)
        .map(|p| {
            let k = (p - sec_first) / step;
            let o = if stride > 0 { k } else { out_len - 1 - k };
            (p - tile_first, o)
        })
        .collect()
}

/// Element strides of a dense array with dimension 0 fastest.
fn dense_strides(shape: &[usize]) -> Vec<usize> {
    let mut acc = 1;
    shape
        .iter()
        .map(|&n| {
            let s = acc;
            acc *= n;
            s
        })
        .collect()
}

/// Visit every run of pixels shared by the tile and the section.
///
/// The callback receives (tile offset, section offset, run length). Runs are
/// whole rows only when dimension 0 is read forward with unit stride;
/// otherwise every pixel is visited on its own.
fn for_each_run<F>(extent: &TileExtent, section: &Section, mut f: F) -> Result<usize>
where
    F: FnMut(usize, usize, usize),
{
    let ndim = extent.first.len();
    if section.ndim() != ndim {
        return Err(Error::InvalidGeometry("section and tile dimensionality differ"));
    }
    let out_shape = section.shape();
    let mut axes = Vec::with_capacity(ndim);
    for d in 0..ndim {
        let pairs = axis_pairs(
            extent.first[d],
            extent.last[d],
            section.first()[d],
            section.last()[d],
            section.stride()[d],
            out_shape[d],
        );
        if pairs.is_empty() {
            return Ok(0);
        }
        axes.push(pairs);
    }

    let tile_strides = dense_strides(&extent.shape());
    let out_strides = dense_strides(&out_shape);
    let contiguous = section.contiguous_rows();
    let mut cursor = alloc::vec![0usize; ndim];
    let mut copied = 0;

    loop {
        let mut tile_base = 0;
        let mut out_base = 0;
        for d in 1..ndim {
            let (t, o) = axes[d][cursor[d]];
            tile_base += t * tile_strides[d];
            out_base += o * out_strides[d];
        }
        if contiguous {
            let (t, o) = axes[0][0];
            f(tile_base + t, out_base + o, axes[0].len());
        } else {
            for &(t, o) in &axes[0] {
                f(tile_base + t, out_base + o, 1);
            }
        }
        copied += axes[0].len();

        // Advance the odometer over dimensions 1..ndim.
        let mut d = 1;
        loop {
            if d >= ndim {
                return Ok(copied);
            }
            cursor[d] += 1;
            if cursor[d] < axes[d].len() {
                break;
            }
            cursor[d] = 0;
            d += 1;
        }
    }
}

fn check_lengths(tile_len: usize, extent: &TileExtent, sec_len: usize, section: &Section) -> Result<()> {
    if tile_len != extent.len() {
        return Err(Error::CorruptRecord {
            expected: extent.len(),
            found: tile_len,
        });
    }
    if sec_len != section.len() {
        return Err(Error::InvalidGeometry("section buffer has the wrong length"));
    }
    Ok(())
}

/// Copy the pixels a tile shares with `section` into the section buffer.
///
/// Returns the number of pixels copied.
pub fn copy_out<T: Copy>(
    tile: &[T],
    extent: &TileExtent,
    out: &mut [T],
    section: &Section,
) -> Result<usize> {
    check_lengths(tile.len(), extent, out.len(), section)?;
    for_each_run(extent, section, |t, o, n| {
        out[o..o + n].copy_from_slice(&tile[t..t + n]);
    })
}

/// Overwrite the tile pixels shared with `section` from the section buffer.
///
/// Returns the number of pixels merged.
pub fn merge_in<T: Copy>(
    tile: &mut [T],
    extent: &TileExtent,
    input: &[T],
    section: &Section,
) -> Result<usize> {
    check_lengths(tile.len(), extent, input.len(), section)?;
    for_each_run(extent, section, |t, i, n| {
        tile[t..t + n].copy_from_slice(&input[i..i + n]);
    })
}
