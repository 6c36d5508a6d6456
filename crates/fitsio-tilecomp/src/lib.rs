#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod block;
pub mod cache;
pub mod checksum;
pub mod codec;
pub mod compress;
pub mod convert;
pub mod decompress;
pub mod descriptor;
pub mod endian;
pub mod error;
pub mod fits;
pub mod geometry;
pub mod header;
pub mod image;
pub mod keywords;
pub mod overlap;
pub mod pixel;
pub mod quantize;
pub mod table;
pub mod value;

pub use block::{BLOCK_SIZE, CARDS_PER_BLOCK, CARD_SIZE};
pub use codec::{ByteWidth, CodecParams, CodecRegistry, CompressionAlgorithm, PixelCodec};
pub use compress::{CompressionEngine, CompressionSummary, EngineState, TileReport, TileWriter};
pub use convert::{NullCheck, OverflowPolicy, Scaling};
pub use decompress::{DecompressionEngine, ReadResult};
pub use descriptor::{CompressionOptions, ImageDescriptor, NullPolicy};
pub use error::{Error, Result, TileLocation};
pub use geometry::{Section, TileExtent, TileGeometry, TileIndex, MAX_DIM};
pub use image::TiledImage;
pub use pixel::{Pixel, PixelBuffer, PixelType};
pub use table::{ColumnType, ElementType, MemoryTable, TableStore};
