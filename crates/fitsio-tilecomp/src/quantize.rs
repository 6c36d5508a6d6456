//! Lossy quantization of floating-point tiles.
//!
//! A tile is mapped to integers through `i = round((v - zero) / scale)`,
//! where `scale` is the background noise divided by the quantize level. The
//! noise is estimated from second differences along each row, so smooth
//! images quantize finely and noisy images coarsely.

use alloc::vec::Vec;

use crate::pixel::Pixel;

/// Integer that stands for a null pixel in a quantized tile.
pub const NULL_VALUE: i32 = -2_147_483_647;

/// Values reserved below the quantized range for the null sentinel.
const RESERVED_VALUES: f64 = 1.0;

/// Converts a median of second differences to a Gaussian sigma.
const NOISE3_FACTOR: f64 = 0.6052697;

/// Minimum number of good pixels in a row for it to contribute to the noise.
const MIN_ROW_PIXELS: usize = 5;

/// Why a tile could not be quantized. The tile is then stored raw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotQuantizable {
    /// Quantize level 0 turns quantization off.
    Disabled,
    /// Fewer than two pixels.
    TooFewPixels,
    /// Every pixel is null.
    NoValidPixels,
    /// A non-null pixel is infinite.
    NonFinite,
    /// The quantization step came out as zero.
    ZeroNoise,
    /// The data range does not fit in 32-bit integers at this step.
    RangeTooLarge,
}

impl core::fmt::Display for NotQuantizable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            NotQuantizable::Disabled => "quantization disabled",
            NotQuantizable::TooFewPixels => "too few pixels",
            NotQuantizable::NoValidPixels => "no valid pixels",
            NotQuantizable::NonFinite => "infinite pixel value",
            NotQuantizable::ZeroNoise => "zero quantization step",
            NotQuantizable::RangeTooLarge => "data range too large",
        };
        f.write_str(msg)
    }
}

/// A quantized tile.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantized {
    pub ints: Vec<i32>,
    /// Written to the ZSCALE column.
    pub scale: f64,
    /// Written to the ZZERO column.
    pub zero: f64,
    /// At least one pixel was null and holds [`NULL_VALUE`].
    pub any_null: bool,
}

/// Summary statistics of the good pixels of a tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseStats {
    pub ngood: usize,
    pub min: f64,
    pub max: f64,
    /// Estimated Gaussian sigma of the background.
    pub noise: f64,
}

fn is_null<F: Pixel>(v: F, null: Option<F>) -> bool {
    v.to_f64().is_nan() || null.is_some_and(|n| v == n)
}

/// Lower-middle element after a partial sort.
fn select_median(values: &mut [f64]) -> f64 {
    let k = (values.len() - 1) / 2;
    let (_, m, _) = values.select_nth_unstable_by(k, |a, b| a.total_cmp(b));
    *m
}

/// Estimate the background noise of a tile from the median of
/// `|2 v[i] - v[i-2] - v[i+2]|` along each row.
///
/// Tiles narrower than 5 pixels are treated as a single row.
pub fn estimate_noise<F: Pixel>(data: &[F], nx: usize, ny: usize, null: Option<F>) -> NoiseStats {
    let (nx, ny) = if nx < MIN_ROW_PIXELS {
        (nx * ny, 1)
    } else {
        (nx, ny)
    };

    let mut ngood = 0usize;
    let mut min = f64::MAX;
    let mut max = f64::MIN;
    let mut row_medians = Vec::with_capacity(ny);
    let mut good = Vec::with_capacity(nx);
    let mut diffs = Vec::with_capacity(nx);

    for row in data.chunks(nx.max(1)).take(ny) {
        good.clear();
        for &v in row {
            if is_null(v, null) {
                continue;
            }
            let x = v.to_f64();
            min = min.min(x);
            max = max.max(x);
            good.push(x);
        }
        ngood += good.len();
        if good.len() < MIN_ROW_PIXELS {
            continue;
        }
        diffs.clear();
        diffs.extend(
            good.windows(5)
                .map(|w| libm::fabs(2.0 * w[2] - w[0] - w[4])),
        );
        row_medians.push(select_median(&mut diffs));
    }

    let median = match row_medians.len() {
        0 => 0.0,
        1 => row_medians[0],
        n => {
            row_medians.sort_unstable_by(|a, b| a.total_cmp(b));
            (row_medians[(n - 1) / 2] + row_medians[n / 2]) / 2.0
        }
    };

    NoiseStats {
        ngood,
        min,
        max,
        noise: NOISE3_FACTOR * median,
    }
}

/// Quantize a floating-point tile of `nx` by `ny` pixels.
///
/// A positive `qlevel` sets the step to noise / qlevel. A negative `qlevel`
/// is used directly as the step. Zero disables quantization. NaN pixels and
/// pixels equal to `null` become [`NULL_VALUE`].
///
/// Tiles holding only integral values are passed through with scale 1 and
/// zero 0, which is lossless.
pub fn quantize<F: Pixel>(
    data: &[F],
    nx: usize,
    ny: usize,
    qlevel: f32,
    null: Option<F>,
) -> Result<Quantized, NotQuantizable> {
    if qlevel == 0.0 {
        return Err(NotQuantizable::Disabled);
    }
    if data.len() <= 1 {
        return Err(NotQuantizable::TooFewPixels);
    }
    if data
        .iter()
        .any(|&v| !is_null(v, null) && v.to_f64().is_infinite())
    {
        return Err(NotQuantizable::NonFinite);
    }

    let stats = estimate_noise(data, nx, ny, null);
    if stats.ngood == 0 {
        return Err(NotQuantizable::NoValidPixels);
    }
    let any_null = stats.ngood < data.len();

    if let Some(q) = integral_passthrough(data, null, any_null) {
        return Ok(q);
    }

    let delta = if qlevel > 0.0 {
        stats.noise / qlevel as f64
    } else {
        -(qlevel as f64)
    };
    if delta == 0.0 {
        return Err(NotQuantizable::ZeroNoise);
    }
    if (stats.max - stats.min) / delta > 2.0 * 2_147_483_647.0 - RESERVED_VALUES {
        return Err(NotQuantizable::RangeTooLarge);
    }

    let zero = if !any_null {
        if (stats.max - stats.min) / delta < 2_147_483_647.0 - RESERVED_VALUES {
            libm::round(stats.min / delta) * delta
        } else {
            (stats.min + stats.max) / 2.0
        }
    } else {
        stats.min - delta * (NULL_VALUE as f64 + RESERVED_VALUES)
    };

    let ints = data
        .iter()
        .map(|&v| {
            if is_null(v, null) {
                NULL_VALUE
            } else {
                let q = libm::round((v.to_f64() - zero) / delta);
                q.clamp(i32::MIN as f64, i32::MAX as f64) as i32
            }
        })
        .collect();

    Ok(Quantized {
        ints,
        scale: delta,
        zero,
        any_null,
    })
}

fn integral_passthrough<F: Pixel>(data: &[F], null: Option<F>, any_null: bool) -> Option<Quantized> {
    let fits = |x: f64| libm::trunc(x) == x && x > NULL_VALUE as f64 && x <= i32::MAX as f64;
    let all_integral = data
        .iter()
        .all(|&v| is_null(v, null) || fits(v.to_f64()));
    if !all_integral {
        return None;
    }
    let ints = data
        .iter()
        .map(|&v| {
            if is_null(v, null) {
                NULL_VALUE
            } else {
                v.to_f64() as i32
            }
        })
        .collect();
    Some(Quantized {
        ints,
        scale: 1.0,
        zero: 0.0,
        any_null,
    })
}
