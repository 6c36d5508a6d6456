//! Conversion between typed pixels and the integers a codec works on.
//!
//! Writing maps each sample through `stored = (physical - zero) / scale`;
//! reading applies `physical = stored * scale + zero`. For integer pixels
//! only the identity and the unsigned-bias pairs are accepted. Null samples
//! are swapped for the integer sentinel before any scaling, and on read the
//! sentinel is recognised before scaling, so it is never distorted.

use alloc::vec::Vec;

use crate::codec::ByteWidth;
use crate::error::{Error, Result};
use crate::pixel::Pixel;

/// A linear map between stored integers and physical values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scaling {
    pub scale: f64,
    pub zero: f64,
}

impl Scaling {
    pub const IDENTITY: Scaling = Scaling {
        scale: 1.0,
        zero: 0.0,
    };

    pub const fn new(scale: f64, zero: f64) -> Scaling {
        Scaling { scale, zero }
    }

    /// Scale 1 and the conventional bias of `T`.
    pub fn conventional<T: Pixel>() -> Scaling {
        Scaling::new(1.0, T::TYPE.conventional_zero())
    }

    pub fn is_identity(&self) -> bool {
        self.scale == 1.0 && self.zero == 0.0
    }
}

impl Default for Scaling {
    fn default() -> Self {
        Scaling::IDENTITY
    }
}

/// What to do when a converted value does not fit its destination type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Clamp to the type's limits and report through the overflow flag.
    #[default]
    Clamp,
    /// Fail with [`Error::OutOfRange`].
    Fail,
}

impl OverflowPolicy {
    /// Apply the policy to an overflow flag.
    pub fn check(self, overflow: bool) -> Result<()> {
        match (self, overflow) {
            (OverflowPolicy::Fail, true) => Err(Error::OutOfRange),
            _ => Ok(()),
        }
    }
}

/// How null samples are reported when reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NullCheck<T> {
    /// Do not look for the sentinel.
    Off,
    /// Replace null samples with this value.
    Substitute(T),
    /// Set null samples to zero and report their positions.
    Flag,
}

impl<T> NullCheck<T> {
    pub fn is_off(&self) -> bool {
        matches!(self, NullCheck::Off)
    }
}

/// A null flag value in the caller's pixels and the integer that stands in
/// for it in the stored tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NullSub<T> {
    pub flag: T,
    pub sentinel: i32,
}

/// Integers ready for a codec.
#[derive(Debug, Clone, PartialEq)]
pub struct IntTile {
    pub values: Vec<i32>,
    pub width: ByteWidth,
    /// At least one sample was replaced by the sentinel.
    pub any_null: bool,
    /// At least one sample was clamped to the width's range.
    pub overflow: bool,
}

/// Decoded pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded<T> {
    pub values: Vec<T>,
    /// Per-pixel null flags, present only for [`NullCheck::Flag`].
    pub flags: Option<Vec<bool>>,
    pub any_null: bool,
    pub overflow: bool,
}

fn check_sentinel(sentinel: i32, width: ByteWidth) -> Result<()> {
    let (lo, hi) = width.range();
    if (sentinel as i64) < lo || (sentinel as i64) > hi {
        return Err(Error::OutOfRange);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Convert integer pixels to codec integers.
///
/// `scaling` must be exactly the identity for signed types, or scale 1 with
/// the conventional bias for unsigned types (and -128 for `i8`). Anything
/// else fails with [`Error::UnsupportedScaling`]. `width` must be at least
/// the native width of `T`.
pub fn ints_to_codec<T: Pixel>(
    pixels: &[T],
    scaling: Scaling,
    width: ByteWidth,
    null: Option<NullSub<T>>,
) -> Result<IntTile> {
    let ty = T::TYPE;
    if ty.is_float() {
        return Err(Error::UnsupportedScaling {
            scale: scaling.scale,
            zero: scaling.zero,
        });
    }
    if scaling.scale != 1.0 || scaling.zero != ty.conventional_zero() {
        return Err(Error::UnsupportedScaling {
            scale: scaling.scale,
            zero: scaling.zero,
        });
    }
    if width < ty.native_width() {
        return Err(Error::UnsupportedWidth {
            algorithm: crate::codec::CompressionAlgorithm::NoCompress,
            width: width.bytes(),
        });
    }
    if let Some(sub) = null {
        check_sentinel(sub.sentinel, width)?;
    }

    let zero = scaling.zero as i64;
    let mut any_null = false;
    let values = pixels
        .iter()
        .map(|&p| match null {
            Some(sub) if p == sub.flag => {
                any_null = true;
                sub.sentinel
            }
            _ => (p.to_f64() as i64 - zero) as i32,
        })
        .collect();
    Ok(IntTile {
        values,
        width,
        any_null,
        overflow: false,
    })
}

/// Convert floating-point pixels to codec integers with an explicit scaling,
/// rounding half away from zero and clamping to the range of `width`.
///
/// NaN samples count as null. With no sentinel configured they become 0 and
/// set the overflow flag.
pub fn floats_to_codec<T: Pixel>(
    pixels: &[T],
    scaling: Scaling,
    width: ByteWidth,
    null: Option<NullSub<T>>,
) -> Result<IntTile> {
    if scaling.scale == 0.0 {
        return Err(Error::UnsupportedScaling {
            scale: scaling.scale,
            zero: scaling.zero,
        });
    }
    if let Some(sub) = null {
        check_sentinel(sub.sentinel, width)?;
    }
    let (lo, hi) = width.range();
    let mut any_null = false;
    let mut overflow = false;
    let values = pixels
        .iter()
        .map(|&p| {
            let x = p.to_f64();
            let is_null = x.is_nan() || null.is_some_and(|sub| p == sub.flag);
            if is_null {
                if let Some(sub) = null {
                    any_null = true;
                    return sub.sentinel;
                }
                overflow = true;
                return 0;
            }
            let v = libm::round((x - scaling.zero) / scaling.scale);
            if v < lo as f64 {
                overflow = true;
                lo as i32
            } else if v > hi as f64 {
                overflow = true;
                hi as i32
            } else {
                v as i32
            }
        })
        .collect();
    Ok(IntTile {
        values,
        width,
        any_null,
        overflow,
    })
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Build output pixels from samples where `None` marks a null.
fn collect_samples<T: Pixel, I>(samples: I, len: usize, check: NullCheck<T>) -> Decoded<T>
where
    I: Iterator<Item = Option<f64>>,
{
    let mut values = Vec::with_capacity(len);
    let mut flags = matches!(check, NullCheck::Flag).then(|| Vec::with_capacity(len));
    let mut any_null = false;
    let mut overflow = false;
    for sample in samples {
        let is_null = match sample {
            None => {
                any_null = true;
                values.push(match check {
                    NullCheck::Substitute(v) => v,
                    _ => T::default(),
                });
                true
            }
            Some(x) => {
                let (v, clamped) = T::from_f64(x);
                overflow |= clamped;
                values.push(v);
                false
            }
        };
        if let Some(f) = flags.as_mut() {
            f.push(is_null);
        }
    }
    Decoded {
        values,
        flags,
        any_null,
        overflow,
    }
}

/// Convert decoded codec integers to output pixels.
///
/// When `check` is not [`NullCheck::Off`], integers equal to `sentinel` are
/// treated as null before scaling. Integer outputs truncate toward zero and
/// clamp to their type.
pub fn codec_to_pixels<T: Pixel>(
    ints: &[i32],
    scaling: Scaling,
    sentinel: Option<i32>,
    check: NullCheck<T>,
) -> Decoded<T> {
    let detect = if check.is_off() { None } else { sentinel };
    let samples = ints.iter().map(|&i| {
        if Some(i) == detect {
            None
        } else {
            Some(i as f64 * scaling.scale + scaling.zero)
        }
    });
    collect_samples(samples, ints.len(), check)
}

/// Convert raw floating-point samples (the uncompressed fallback) to output
/// pixels. NaN samples are null unless `check` is off.
pub fn raw_to_pixels<T: Pixel>(raw: &[f64], check: NullCheck<T>) -> Decoded<T> {
    let detect = !check.is_off();
    let samples = raw
        .iter()
        .map(|&x| if detect && x.is_nan() { None } else { Some(x) });
    collect_samples(samples, raw.len(), check)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn identity_shorts() {
        let t = ints_to_codec(&[1i16, -5, 300], Scaling::IDENTITY, ByteWidth::Two, None).unwrap();
        assert_eq!(t.values, vec![1, -5, 300]);
        assert!(!t.any_null);
    }

    #[test]
    fn unsigned_bias() {
        let t = ints_to_codec(
            &[0u16, 32768, 65535],
            Scaling::conventional::<u16>(),
            ByteWidth::Two,
            None,
        )
        .unwrap();
        assert_eq!(t.values, vec![-32768, 0, 32767]);

        let t = ints_to_codec(
            &[0u32, u32::MAX],
            Scaling::conventional::<u32>(),
            ByteWidth::Four,
            None,
        )
        .unwrap();
        assert_eq!(t.values, vec![i32::MIN, i32::MAX]);

        let t = ints_to_codec(&[-128i8, 0, 127], Scaling::conventional::<i8>(), ByteWidth::One, None)
            .unwrap();
        assert_eq!(t.values, vec![0, 128, 255]);
    }

    #[test]
    fn bytes_upcast_for_four_byte_codecs() {
        let t = ints_to_codec(&[-128i8, 127], Scaling::conventional::<i8>(), ByteWidth::Four, None)
            .unwrap();
        assert_eq!(t.width, ByteWidth::Four);
        assert_eq!(t.values, vec![0, 255]);
    }

    #[test]
    fn rejects_other_scaling() {
        for scaling in [Scaling::new(2.0, 0.0), Scaling::new(1.0, 32768.0)] {
            let err = ints_to_codec(&[1i16], scaling, ByteWidth::Two, None).unwrap_err();
            assert!(matches!(err, Error::UnsupportedScaling { .. }));
        }
        let err = ints_to_codec(&[1u16], Scaling::IDENTITY, ByteWidth::Two, None).unwrap_err();
        assert!(matches!(err, Error::UnsupportedScaling { .. }));
    }

    #[test]
    fn rejects_narrow_width() {
        assert!(ints_to_codec(&[1i32], Scaling::IDENTITY, ByteWidth::Two, None).is_err());
    }

    #[test]
    fn null_substituted_before_bias() {
        let null = NullSub {
            flag: 65535u16,
            sentinel: -32768,
        };
        let t = ints_to_codec(
            &[65535u16, 0, 65534],
            Scaling::conventional::<u16>(),
            ByteWidth::Two,
            Some(null),
        )
        .unwrap();
        assert!(t.any_null);
        assert_eq!(t.values, vec![-32768, -32768, 32766]);
    }

    #[test]
    fn sentinel_outside_width_is_rejected() {
        let null = NullSub {
            flag: 0u8,
            sentinel: 300,
        };
        assert!(matches!(
            ints_to_codec(&[0u8], Scaling::IDENTITY, ByteWidth::One, Some(null)),
            Err(Error::OutOfRange)
        ));
    }

    #[test]
    fn floats_round_half_away() {
        let t = floats_to_codec(&[0.5f32, -0.5, 1.49, 2.5], Scaling::IDENTITY, ByteWidth::Four, None)
            .unwrap();
        assert_eq!(t.values, vec![1, -1, 1, 3]);
        assert!(!t.overflow);
    }

    #[test]
    fn floats_scaled_and_clamped() {
        let t = floats_to_codec(
            &[10.0f64, 1.0e9, f64::NAN],
            Scaling::new(0.5, 0.0),
            ByteWidth::Two,
            None,
        )
        .unwrap();
        assert_eq!(t.values, vec![20, 32767, 0]);
        assert!(t.overflow);
    }

    #[test]
    fn floats_nan_becomes_sentinel() {
        let null = NullSub {
            flag: -999.0f32,
            sentinel: i32::MIN,
        };
        let t = floats_to_codec(
            &[f32::NAN, -999.0, 3.0],
            Scaling::IDENTITY,
            ByteWidth::Four,
            Some(null),
        )
        .unwrap();
        assert_eq!(t.values, vec![i32::MIN, i32::MIN, 3]);
        assert!(t.any_null);
        assert!(!t.overflow);
    }

    #[test]
    fn decode_with_flags() {
        let d = codec_to_pixels::<u16>(
            &[-32768, 0, 5],
            Scaling::conventional::<u16>(),
            Some(-32768),
            NullCheck::Flag,
        );
        assert_eq!(d.values, vec![0, 32768, 32773]);
        assert_eq!(d.flags, Some(vec![true, false, false]));
        assert!(d.any_null);
    }

    #[test]
    fn decode_substitute() {
        let d = codec_to_pixels::<f32>(
            &[7, -2147483647],
            Scaling::new(0.25, 10.0),
            Some(-2147483647),
            NullCheck::Substitute(f32::NAN),
        );
        assert_eq!(d.values[0], 11.75);
        assert!(d.values[1].is_nan());
        assert!(d.flags.is_none());
    }

    #[test]
    fn decode_off_ignores_sentinel() {
        let d = codec_to_pixels::<i32>(&[-7], Scaling::IDENTITY, Some(-7), NullCheck::Off);
        assert_eq!(d.values, vec![-7]);
        assert!(!d.any_null);
    }

    #[test]
    fn decode_clamps_to_output() {
        let d = codec_to_pixels::<u8>(&[300, -1, 17], Scaling::IDENTITY, None, NullCheck::Off);
        assert_eq!(d.values, vec![255, 0, 17]);
        assert!(d.overflow);
        assert!(OverflowPolicy::Fail.check(d.overflow).is_err());
        assert!(OverflowPolicy::Clamp.check(d.overflow).is_ok());
    }

    #[test]
    fn raw_nan_is_null() {
        let d = raw_to_pixels::<f64>(&[1.5, f64::NAN], NullCheck::Flag);
        assert_eq!(d.values, vec![1.5, 0.0]);
        assert_eq!(d.flags, Some(vec![false, true]));
    }
}
