//! Typed pixel buffers.
//!
//! [`PixelBuffer`] is the tagged form used wherever the element type is only
//! known at run time (the tile cache, raw fallback payloads). The [`Pixel`]
//! trait is the static form used by the generic read and write paths.

use alloc::vec;
use alloc::vec::Vec;

use crate::codec::ByteWidth;
use crate::endian::{self, BigEndian};
use crate::error::{Error, Result};

/// The in-memory element type of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelType {
    U8,
    I8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl PixelType {
    /// The BITPIX stored in the table header. Unsigned and signed-byte types
    /// are stored as their signed or unsigned neighbour plus a BZERO offset.
    pub const fn bitpix(self) -> i64 {
        match self {
            PixelType::U8 | PixelType::I8 => 8,
            PixelType::I16 | PixelType::U16 => 16,
            PixelType::I32 | PixelType::U32 => 32,
            PixelType::F32 => -32,
            PixelType::F64 => -64,
        }
    }

    /// Size of one element in bytes.
    pub const fn byte_size(self) -> usize {
        match self {
            PixelType::U8 | PixelType::I8 => 1,
            PixelType::I16 | PixelType::U16 => 2,
            PixelType::I32 | PixelType::U32 | PixelType::F32 => 4,
            PixelType::F64 => 8,
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, PixelType::F32 | PixelType::F64)
    }

    /// The BZERO that maps this type onto its stored BITPIX.
    pub const fn conventional_zero(self) -> f64 {
        match self {
            PixelType::I8 => -128.0,
            PixelType::U16 => 32768.0,
            PixelType::U32 => 2_147_483_648.0,
            _ => 0.0,
        }
    }

    /// The integer width this type occupies before any codec upcast.
    pub const fn native_width(self) -> ByteWidth {
        match self {
            PixelType::U8 | PixelType::I8 => ByteWidth::One,
            PixelType::I16 | PixelType::U16 => ByteWidth::Two,
            _ => ByteWidth::Four,
        }
    }

    /// Recover the in-memory type from a stored BITPIX and its scaling
    /// keywords.
    pub fn from_bitpix(bitpix: i64, bscale: f64, bzero: f64) -> Result<PixelType> {
        let unit = bscale == 1.0;
        let ty = match bitpix {
            8 if unit && bzero == -128.0 => PixelType::I8,
            8 => PixelType::U8,
            16 if unit && bzero == 32768.0 => PixelType::U16,
            16 => PixelType::I16,
            32 if unit && bzero == 2_147_483_648.0 => PixelType::U32,
            32 => PixelType::I32,
            -32 => PixelType::F32,
            -64 => PixelType::F64,
            _ => return Err(Error::InvalidHeader("unsupported ZBITPIX")),
        };
        Ok(ty)
    }
}

/// A pixel element type that the engine can read and write.
pub trait Pixel:
    bytemuck::Pod + BigEndian + Default + PartialEq + core::fmt::Debug + 'static
{
    const TYPE: PixelType;

    fn to_f64(self) -> f64;

    /// Convert from `f64`, clamping to the type's range. Integer types
    /// truncate toward zero. The flag is set when clamping happened.
    fn from_f64(v: f64) -> (Self, bool);

    fn into_buffer(data: Vec<Self>) -> PixelBuffer;

    fn from_buffer(buf: PixelBuffer) -> Option<Vec<Self>>;

    fn view(buf: &PixelBuffer) -> Option<&[Self]>;
}

macro_rules! impl_int_pixel {
    ($t:ty, $variant:ident) => {
        impl Pixel for $t {
            const TYPE: PixelType = PixelType::$variant;

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn from_f64(v: f64) -> (Self, bool) {
                if v.is_nan() {
                    (0 as $t, true)
                } else if v < <$t>::MIN as f64 {
                    (<$t>::MIN, true)
                } else if v > <$t>::MAX as f64 {
                    (<$t>::MAX, true)
                } else {
                    (v as $t, false)
                }
            }

            fn into_buffer(data: Vec<Self>) -> PixelBuffer {
                PixelBuffer::$variant(data)
            }

            fn from_buffer(buf: PixelBuffer) -> Option<Vec<Self>> {
                match buf {
                    PixelBuffer::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn view(buf: &PixelBuffer) -> Option<&[Self]> {
                match buf {
                    PixelBuffer::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

macro_rules! impl_float_pixel {
    ($t:ty, $variant:ident) => {
        impl Pixel for $t {
            const TYPE: PixelType = PixelType::$variant;

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn from_f64(v: f64) -> (Self, bool) {
                if !v.is_finite() {
                    (v as $t, false)
                } else if v < <$t>::MIN as f64 {
                    (<$t>::MIN, true)
                } else if v > <$t>::MAX as f64 {
                    (<$t>::MAX, true)
                } else {
                    (v as $t, false)
                }
            }

            fn into_buffer(data: Vec<Self>) -> PixelBuffer {
                PixelBuffer::$variant(data)
            }

            fn from_buffer(buf: PixelBuffer) -> Option<Vec<Self>> {
                match buf {
                    PixelBuffer::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn view(buf: &PixelBuffer) -> Option<&[Self]> {
                match buf {
                    PixelBuffer::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

impl_int_pixel!(u8, U8);
impl_int_pixel!(i8, I8);
impl_int_pixel!(i16, I16);
impl_int_pixel!(u16, U16);
impl_int_pixel!(i32, I32);
impl_int_pixel!(u32, U32);
impl_float_pixel!(f32, F32);
impl_float_pixel!(f64, F64);

/// Pixel data tagged with its element type.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelBuffer {
    U8(Vec<u8>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

macro_rules! with_buffer {
    ($buf:expr, $v:ident => $body:expr) => {
        match $buf {
            PixelBuffer::U8($v) => $body,
            PixelBuffer::I8($v) => $body,
            PixelBuffer::I16($v) => $body,
            PixelBuffer::U16($v) => $body,
            PixelBuffer::I32($v) => $body,
            PixelBuffer::U32($v) => $body,
            PixelBuffer::F32($v) => $body,
            PixelBuffer::F64($v) => $body,
        }
    };
}

impl PixelBuffer {
    /// A zero-filled buffer of `len` elements.
    pub fn zeros(ty: PixelType, len: usize) -> PixelBuffer {
        match ty {
            PixelType::U8 => PixelBuffer::U8(vec![0; len]),
            PixelType::I8 => PixelBuffer::I8(vec![0; len]),
            PixelType::I16 => PixelBuffer::I16(vec![0; len]),
            PixelType::U16 => PixelBuffer::U16(vec![0; len]),
            PixelType::I32 => PixelBuffer::I32(vec![0; len]),
            PixelType::U32 => PixelBuffer::U32(vec![0; len]),
            PixelType::F32 => PixelBuffer::F32(vec![0.0; len]),
            PixelType::F64 => PixelBuffer::F64(vec![0.0; len]),
        }
    }

    pub fn pixel_type(&self) -> PixelType {
        match self {
            PixelBuffer::U8(_) => PixelType::U8,
            PixelBuffer::I8(_) => PixelType::I8,
            PixelBuffer::I16(_) => PixelType::I16,
            PixelBuffer::U16(_) => PixelType::U16,
            PixelBuffer::I32(_) => PixelType::I32,
            PixelBuffer::U32(_) => PixelType::U32,
            PixelBuffer::F32(_) => PixelType::F32,
            PixelBuffer::F64(_) => PixelType::F64,
        }
    }

    pub fn len(&self) -> usize {
        with_buffer!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element `i` widened to `f64`.
    pub fn get_f64(&self, i: usize) -> Option<f64> {
        with_buffer!(self, v => v.get(i).map(|&x| x.to_f64()))
    }

    /// Big-endian bytes of the whole buffer.
    pub fn to_be_bytes(&self) -> Vec<u8> {
        match self {
            PixelBuffer::U8(v) => v.clone(),
            PixelBuffer::I8(v) => bytemuck::cast_slice::<i8, u8>(v).to_vec(),
            other => with_buffer!(other, v => endian::to_be_bytes(v)),
        }
    }

    /// Decode big-endian bytes of element type `ty`.
    pub fn from_be_bytes(ty: PixelType, bytes: &[u8]) -> Result<PixelBuffer> {
        let buf = match ty {
            PixelType::U8 => PixelBuffer::U8(bytes.to_vec()),
            PixelType::I8 => PixelBuffer::I8(bytemuck::pod_collect_to_vec(bytes)),
            PixelType::I16 => PixelBuffer::I16(endian::from_be_bytes(bytes)?),
            PixelType::U16 => PixelBuffer::U16(endian::from_be_bytes(bytes)?),
            PixelType::I32 => PixelBuffer::I32(endian::from_be_bytes(bytes)?),
            PixelType::U32 => PixelBuffer::U32(endian::from_be_bytes(bytes)?),
            PixelType::F32 => PixelBuffer::F32(endian::from_be_bytes(bytes)?),
            PixelType::F64 => PixelBuffer::F64(endian::from_be_bytes(bytes)?),
        };
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_bitpix_of_unsigned_types() {
        assert_eq!(PixelType::U16.bitpix(), 16);
        assert_eq!(PixelType::U32.bitpix(), 32);
        assert_eq!(PixelType::I8.bitpix(), 8);
        assert_eq!(PixelType::F64.bitpix(), -64);
    }

    #[test]
    fn from_bitpix_recognises_bias() {
        assert_eq!(
            PixelType::from_bitpix(16, 1.0, 32768.0).unwrap(),
            PixelType::U16
        );
        assert_eq!(PixelType::from_bitpix(16, 1.0, 0.0).unwrap(), PixelType::I16);
        assert_eq!(PixelType::from_bitpix(8, 1.0, -128.0).unwrap(), PixelType::I8);
        assert_eq!(
            PixelType::from_bitpix(32, 1.0, 2_147_483_648.0).unwrap(),
            PixelType::U32
        );
        assert!(PixelType::from_bitpix(64, 1.0, 0.0).is_err());
    }

    #[test]
    fn int_from_f64_clamps_and_truncates() {
        assert_eq!(i16::from_f64(1.9), (1, false));
        assert_eq!(i16::from_f64(-1.9), (-1, false));
        assert_eq!(i16::from_f64(40000.0), (i16::MAX, true));
        assert_eq!(u8::from_f64(-3.0), (0, true));
    }

    #[test]
    fn float_from_f64_keeps_nan() {
        let (v, overflow) = f32::from_f64(f64::NAN);
        assert!(v.is_nan());
        assert!(!overflow);
        assert_eq!(f32::from_f64(1e300), (f32::MAX, true));
    }

    #[test]
    fn buffer_be_bytes() {
        let buf = PixelBuffer::I16(vec![1, -1]);
        let bytes = buf.to_be_bytes();
        assert_eq!(bytes, vec![0, 1, 0xFF, 0xFF]);
        assert_eq!(PixelBuffer::from_be_bytes(PixelType::I16, &bytes).unwrap(), buf);
    }

    #[test]
    fn signed_bytes_round_trip() {
        let buf = PixelBuffer::I8(vec![-128, 0, 127]);
        let bytes = buf.to_be_bytes();
        assert_eq!(bytes, vec![0x80, 0, 0x7F]);
        assert_eq!(PixelBuffer::from_be_bytes(PixelType::I8, &bytes).unwrap(), buf);
    }

    #[test]
    fn typed_views() {
        let buf = u16::into_buffer(vec![1, 2, 3]);
        assert_eq!(buf.pixel_type(), PixelType::U16);
        assert_eq!(u16::view(&buf), Some(&[1u16, 2, 3][..]));
        assert!(i16::view(&buf).is_none());
        assert_eq!(buf.get_f64(2), Some(3.0));
    }
}
