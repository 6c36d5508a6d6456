use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use crate::codec::CompressionAlgorithm;
use crate::pixel::PixelType;

/// Position of a tile inside the compressed table, attached to errors raised
/// while a specific tile was being processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileLocation {
    /// Zero-based tile index per dimension.
    pub index: Vec<usize>,
    /// One-based table row holding the tile.
    pub row: usize,
}

impl core::fmt::Display for TileLocation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "tile {:?} (row {})", self.index, self.row)
    }
}

/// All errors that can occur while compressing or decompressing tiled images.
#[derive(Debug)]
pub enum Error {
    /// Bad dimensionality, tile shape or pixel section.
    InvalidGeometry(&'static str),
    /// An integer image was given a scale/zero pair outside the accepted set.
    UnsupportedScaling { scale: f64, zero: f64 },
    /// A ZCMPTYPE value that names no known algorithm.
    UnknownAlgorithm(String),
    /// No codec is registered for the algorithm.
    CodecUnavailable(CompressionAlgorithm),
    /// The codec cannot handle the requested integer width.
    UnsupportedWidth {
        algorithm: CompressionAlgorithm,
        width: usize,
    },
    /// Encoding a tile failed.
    CompressionFailed(String),
    /// Decoding a tile failed.
    DecompressionFailed(String),
    /// A stored row holds a different number of bytes than its pixel count needs.
    CorruptRecord { expected: usize, found: usize },
    /// A converted value did not fit the destination type.
    OutOfRange,
    /// Pixels of one type were handed to an image of another.
    TypeMismatch { image: PixelType, pixels: PixelType },
    /// Malformed header or table structure.
    InvalidHeader(&'static str),
    /// A required keyword was not found in the header.
    MissingKeyword(&'static str),
    /// A header value could not be parsed correctly.
    InvalidValue,
    /// Premature end of data while reading.
    UnexpectedEof,
    /// An I/O error from the standard library.
    #[cfg(feature = "std")]
    Io(std::io::Error),
    /// An error raised while processing a specific tile.
    Tile {
        location: TileLocation,
        source: Box<Error>,
    },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    /// Attach a tile location. Errors that already carry one are left alone.
    pub fn at(self, location: TileLocation) -> Error {
        match self {
            Error::Tile { .. } => self,
            other => Error::Tile {
                location,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, with any tile location stripped.
    pub fn root(&self) -> &Error {
        match self {
            Error::Tile { source, .. } => source.root(),
            other => other,
        }
    }

    /// The tile location, if the error was raised inside a tile loop.
    pub fn location(&self) -> Option<&TileLocation> {
        match self {
            Error::Tile { location, .. } => Some(location),
            _ => None,
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::InvalidGeometry(msg) => write!(f, "invalid tile geometry: {msg}"),
            Error::UnsupportedScaling { scale, zero } => {
                write!(f, "unsupported scaling for integer image: scale {scale}, zero {zero}")
            }
            Error::UnknownAlgorithm(name) => write!(f, "unknown compression algorithm: {name}"),
            Error::CodecUnavailable(alg) => write!(f, "no codec registered for {alg}"),
            Error::UnsupportedWidth { algorithm, width } => {
                write!(f, "{algorithm} does not accept {width}-byte integers")
            }
            Error::CompressionFailed(msg) => write!(f, "compression failed: {msg}"),
            Error::DecompressionFailed(msg) => write!(f, "decompression failed: {msg}"),
            Error::CorruptRecord { expected, found } => {
                write!(f, "corrupt tile record: expected {expected} bytes, found {found}")
            }
            Error::OutOfRange => write!(f, "value out of range for destination type"),
            Error::TypeMismatch { image, pixels } => {
                write!(f, "cannot store {pixels:?} pixels in an image of type {image:?}")
            }
            Error::InvalidHeader(msg) => write!(f, "invalid header: {msg}"),
            Error::MissingKeyword(kw) => write!(f, "missing required keyword: {kw}"),
            Error::InvalidValue => write!(f, "invalid header value"),
            Error::UnexpectedEof => write!(f, "unexpected end of file"),
            #[cfg(feature = "std")]
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Tile { location, source } => write!(f, "{location}: {source}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Tile { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

#[cfg(feature = "std")]
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}
