//! Big-endian byte conversion for table payloads.
//!
//! FITS stores all binary data most-significant byte first. Heap payloads,
//! raw fallback tiles and the NOCOMPRESS column all go through these helpers.

use alloc::vec::Vec;

use crate::error::{Error, Result};

/// A fixed-size value with a big-endian byte representation.
pub trait BigEndian: Copy {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Decode from the first `SIZE` bytes of `buf`.
    fn read_be(buf: &[u8]) -> Self;

    /// Encode into the first `SIZE` bytes of `buf`.
    fn write_be(self, buf: &mut [u8]);
}

macro_rules! impl_big_endian {
    ($($t:ty),*) => {
        $(
            impl BigEndian for $t {
                const SIZE: usize = core::mem::size_of::<$t>();

                #[inline]
                fn read_be(buf: &[u8]) -> Self {
                    let mut raw = [0u8; core::mem::size_of::<$t>()];
                    raw.copy_from_slice(&buf[..Self::SIZE]);
                    <$t>::from_be_bytes(raw)
                }

                #[inline]
                fn write_be(self, buf: &mut [u8]) {
                    buf[..Self::SIZE].copy_from_slice(&self.to_be_bytes());
                }
            }
        )*
    };
}

impl_big_endian!(u8, i8, i16, u16, i32, u32, i64, f32, f64);

/// Encode a slice of values as a contiguous big-endian byte vector.
pub fn to_be_bytes<T: BigEndian>(values: &[T]) -> Vec<u8> {
    let mut out = alloc::vec![0u8; values.len() * T::SIZE];
    for (chunk, &v) in out.chunks_exact_mut(T::SIZE).zip(values) {
        v.write_be(chunk);
    }
    out
}

/// Decode a big-endian byte slice into values.
///
/// Fails with [`Error::CorruptRecord`] if the length is not a whole number of
/// elements.
pub fn from_be_bytes<T: BigEndian>(bytes: &[u8]) -> Result<Vec<T>> {
    if bytes.len() % T::SIZE != 0 {
        return Err(Error::CorruptRecord {
            expected: (bytes.len() / T::SIZE + 1) * T::SIZE,
            found: bytes.len(),
        });
    }
    Ok(bytes.chunks_exact(T::SIZE).map(T::read_be).collect())
}
