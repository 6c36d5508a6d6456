//! Pluggable integer codecs and the registry that selects one per image.
//!
//! A codec turns a tile of integers, all representable in a declared
//! [`ByteWidth`], into an opaque byte stream and back. RICE_1, GZIP_1 and
//! NOCOMPRESS ship with the crate; PLIO_1 and HCOMPRESS_1 are registered by
//! the caller through [`CodecRegistry::register`].

mod gzip;
mod nocompress;
mod rice;

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{Error, Result};

pub use gzip::GzipCodec;
pub use nocompress::NoCompressCodec;
pub use rice::RiceCodec;

/// Default Rice block size written to ZVAL1.
pub const DEFAULT_BLOCKSIZE: usize = 32;

/// Compression algorithm named by the ZCMPTYPE keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CompressionAlgorithm {
    Rice,
    Gzip,
    Plio,
    Hcompress,
    NoCompress,
}

impl CompressionAlgorithm {
    /// The ZCMPTYPE spelling.
    pub const fn name(self) -> &'static str {
        match self {
            CompressionAlgorithm::Rice => "RICE_1",
            CompressionAlgorithm::Gzip => "GZIP_1",
            CompressionAlgorithm::Plio => "PLIO_1",
            CompressionAlgorithm::Hcompress => "HCOMPRESS_1",
            CompressionAlgorithm::NoCompress => "NOCOMPRESS",
        }
    }

    /// Parse a ZCMPTYPE value. `RICE_ONE` is accepted as an old alias of
    /// `RICE_1`.
    pub fn from_name(name: &str) -> Result<CompressionAlgorithm> {
        let alg = match name.trim().to_ascii_uppercase().as_str() {
            "RICE_1" | "RICE_ONE" => CompressionAlgorithm::Rice,
            "GZIP_1" => CompressionAlgorithm::Gzip,
            "PLIO_1" => CompressionAlgorithm::Plio,
            "HCOMPRESS_1" => CompressionAlgorithm::Hcompress,
            "NOCOMPRESS" => CompressionAlgorithm::NoCompress,
            _ => return Err(Error::UnknownAlgorithm(String::from(name.trim()))),
        };
        Ok(alg)
    }

    /// PLIO and H-compress work on 4-byte integers only.
    pub const fn requires_four_bytes(self) -> bool {
        matches!(
            self,
            CompressionAlgorithm::Plio | CompressionAlgorithm::Hcompress
        )
    }
}

impl core::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Width of the integers handed to a codec.
///
/// One-byte values are unsigned (0..=255), two-byte values are signed 16-bit
/// and four-byte values are signed 32-bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ByteWidth {
    One,
    Two,
    Four,
}

impl ByteWidth {
    pub const fn bytes(self) -> usize {
        match self {
            ByteWidth::One => 1,
            ByteWidth::Two => 2,
            ByteWidth::Four => 4,
        }
    }

    pub fn from_bytes(n: i64) -> Option<ByteWidth> {
        match n {
            1 => Some(ByteWidth::One),
            2 => Some(ByteWidth::Two),
            4 => Some(ByteWidth::Four),
            _ => None,
        }
    }

    /// Inclusive value range representable at this width.
    pub const fn range(self) -> (i64, i64) {
        match self {
            ByteWidth::One => (0, 255),
            ByteWidth::Two => (i16::MIN as i64, i16::MAX as i64),
            ByteWidth::Four => (i32::MIN as i64, i32::MAX as i64),
        }
    }

    /// Reinterpret the low bits of `v` at this width.
    #[inline]
    pub const fn normalize(self, v: i32) -> i32 {
        match self {
            ByteWidth::One => v & 0xFF,
            ByteWidth::Two => v as i16 as i32,
            ByteWidth::Four => v,
        }
    }
}

/// Per-tile parameters handed to a codec.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CodecParams {
    /// Rice block size (pixels per coding block).
    pub blocksize: usize,
    /// Tile extent along dimension 0.
    pub nx: usize,
    /// Tile pixel count divided by `nx`.
    pub ny: usize,
    /// H-compress scale, already resolved to an absolute value.
    pub hcomp_scale: f32,
    /// H-compress smoothing on decode.
    pub hcomp_smooth: bool,
}

impl Default for CodecParams {
    fn default() -> Self {
        CodecParams {
            blocksize: DEFAULT_BLOCKSIZE,
            nx: 0,
            ny: 1,
            hcomp_scale: 0.0,
            hcomp_smooth: false,
        }
    }
}

/// An integer tile compressor.
///
/// Implementations must treat every tile independently: no state may carry
/// from one `encode` or `decode` call to the next.
pub trait PixelCodec {
    /// The algorithm this codec implements.
    fn algorithm(&self) -> CompressionAlgorithm;

    /// Whether the codec can take integers of `width` directly.
    fn accepts(&self, width: ByteWidth) -> bool;

    /// Upper estimate of the encoded size, used to pre-size buffers.
    ///
    /// Rice uses `width * count + count / blocksize + 6`. H-compress codecs
    /// are expected to return `2.2 * count + 26` for 1- and 2-byte sources
    /// and `4.4 * count + 26` otherwise. A payload larger than the estimate
    /// is still accepted.
    fn max_encoded_len(&self, count: usize, width: ByteWidth, params: &CodecParams) -> usize;

    /// Compress `values`, each representable at `width`.
    fn encode(&self, values: &[i32], width: ByteWidth, params: &CodecParams) -> Result<Vec<u8>>;

    /// Decompress exactly `count` values of `width`.
    fn decode(
        &self,
        bytes: &[u8],
        count: usize,
        width: ByteWidth,
        params: &CodecParams,
    ) -> Result<Vec<i32>>;
}

/// Codecs keyed by algorithm.
pub struct CodecRegistry {
    codecs: BTreeMap<CompressionAlgorithm, Box<dyn PixelCodec>>,
}

impl CodecRegistry {
    /// A registry with no codecs.
    pub fn empty() -> CodecRegistry {
        CodecRegistry {
            codecs: BTreeMap::new(),
        }
    }

    /// A registry holding the RICE_1, GZIP_1 and NOCOMPRESS codecs.
    pub fn with_builtin() -> CodecRegistry {
        let mut reg = CodecRegistry::empty();
        reg.register(Box::new(RiceCodec));
        reg.register(Box::new(GzipCodec::default()));
        reg.register(Box::new(NoCompressCodec));
        reg
    }

    /// Add or replace the codec for its algorithm, returning the old one.
    pub fn register(&mut self, codec: Box<dyn PixelCodec>) -> Option<Box<dyn PixelCodec>> {
        self.codecs.insert(codec.algorithm(), codec)
    }

    pub fn get(&self, algorithm: CompressionAlgorithm) -> Result<&dyn PixelCodec> {
        self.codecs
            .get(&algorithm)
            .map(|c| c.as_ref())
            .ok_or(Error::CodecUnavailable(algorithm))
    }

    pub fn contains(&self, algorithm: CompressionAlgorithm) -> bool {
        self.codecs.contains_key(&algorithm)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        CodecRegistry::with_builtin()
    }
}

impl core::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.codecs.keys()).finish()
    }
}

/// The width a codec will be fed for a source of native width `native`.
///
/// Codecs that cannot take the native width get 4-byte integers.
pub fn select_width(codec: &dyn PixelCodec, native: ByteWidth) -> Result<ByteWidth> {
    if codec.accepts(native) {
        Ok(native)
    } else if codec.accepts(ByteWidth::Four) {
        Ok(ByteWidth::Four)
    } else {
        Err(Error::UnsupportedWidth {
            algorithm: codec.algorithm(),
            width: native.bytes(),
        })
    }
}
