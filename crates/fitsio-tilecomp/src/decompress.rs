//! Reading pixels back out of a compressed table.
//!
//! Every tile overlapping the requested section is decoded (or taken from the
//! [`TileCache`]) and the overlap is copied into the caller's buffer.

use alloc::format;
use alloc::vec;
use alloc::vec::Vec;

use crate::cache::{CachedTile, TileCache, TileKey};
use crate::codec::{select_width, CodecRegistry, NoCompressCodec, PixelCodec};
use crate::convert::{codec_to_pixels, raw_to_pixels, Decoded, NullCheck, Scaling};
use crate::descriptor::{
    ImageDescriptor, NullPolicy, COMPRESSED_DATA, UNCOMPRESSED_DATA, ZBLANK, ZSCALE, ZZERO,
};
use crate::endian;
use crate::error::{Error, Result, TileLocation};
use crate::geometry::{Section, TileExtent, TileIndex};
use crate::overlap::copy_out;
use crate::pixel::Pixel;
use crate::table::{ElementType, TableStore};

/// Pixels read from a section.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadResult<T> {
    /// Section pixels, dimension 0 fastest.
    pub pixels: Vec<T>,
    /// Per-pixel null flags, present only for [`NullCheck::Flag`].
    pub null_flags: Option<Vec<bool>>,
    /// A tile touched by the read held nulls.
    pub any_null: bool,
    /// Values were clamped to the output type.
    pub overflow: bool,
}

fn codec_failure(e: Error) -> Error {
    match e {
        Error::DecompressionFailed(_) | Error::CorruptRecord { .. } => e,
        other => Error::DecompressionFailed(format!("{other}")),
    }
}

/// Reads sections of one compressed image.
pub struct DecompressionEngine<'a, S: TableStore + ?Sized> {
    store: &'a S,
    descriptor: &'a ImageDescriptor,
    registry: &'a CodecRegistry,
    cache: &'a mut TileCache,
}

impl<'a, S: TableStore + ?Sized> DecompressionEngine<'a, S> {
    pub fn new(
        store: &'a S,
        descriptor: &'a ImageDescriptor,
        registry: &'a CodecRegistry,
        cache: &'a mut TileCache,
    ) -> DecompressionEngine<'a, S> {
        DecompressionEngine {
            store,
            descriptor,
            registry,
            cache,
        }
    }

    /// Read `section` as pixels of type `T`.
    pub fn read_pixels<T: Pixel>(
        &mut self,
        section: &Section,
        check: NullCheck<T>,
    ) -> Result<ReadResult<T>> {
        let d = self.descriptor;
        let range = d.geometry.covering(section)?;
        let n = section.len();
        let mut result = ReadResult {
            pixels: vec![T::default(); n],
            null_flags: matches!(check, NullCheck::Flag).then(|| vec![false; n]),
            any_null: false,
            overflow: false,
        };
        log::trace!(
            "reading {n} pixels from {:?}..={:?}",
            section.first(),
            section.last()
        );

        for index in range.iter() {
            let row = d.geometry.row_of(&index);
            let extent = d.geometry.extent_of(&index);
            let location = || TileLocation {
                index: index.0.clone(),
                row,
            };
            let (store, registry) = (self.store, self.registry);
            let tile = self
                .cache
                .get_or_try_insert(TileKey::new(row, &check), || {
                    decode_tile(store, d, registry, row, &extent, check)
                })
                .map_err(|e| e.at(location()))?;

            let values = T::view(&tile.pixels)
                .ok_or(Error::InvalidHeader("cached tile has the wrong pixel type"))?;
            let copied = copy_out(values, &extent, &mut result.pixels, section)
                .map_err(|e| e.at(location()))?;
            if copied == 0 {
                continue;
            }
            if let (Some(out), Some(flags)) = (result.null_flags.as_mut(), tile.flags.as_ref()) {
                copy_out(flags, &extent, out, section).map_err(|e| e.at(location()))?;
            }
            result.any_null |= tile.any_null;
            if tile.overflow {
                d.overflow.check(true).map_err(|e| e.at(location()))?;
                log::warn!("row {row}: values clamped to {:?}", T::TYPE);
                result.overflow = true;
            }
        }
        Ok(result)
    }

    /// Read every pixel of one tile.
    pub fn decompress_tile<T: Pixel>(
        &mut self,
        index: &TileIndex,
        check: NullCheck<T>,
    ) -> Result<ReadResult<T>> {
        let extent = self.descriptor.geometry.extent_of(index);
        self.read_pixels(&Section::from_extent(&extent), check)
    }
}

/// Decode the tile stored in `row`.
fn decode_tile<T: Pixel, S: TableStore + ?Sized>(
    store: &S,
    d: &ImageDescriptor,
    registry: &CodecRegistry,
    row: usize,
    extent: &TileExtent,
    check: NullCheck<T>,
) -> Result<CachedTile> {
    let count = extent.len();
    let params = d.codec_params(extent);

    let compressed = match store.column_index(COMPRESSED_DATA) {
        Some(col) => store.read_bytes(col, row)?,
        None => Vec::new(),
    };
    let decoded: Decoded<T> = if !compressed.is_empty() {
        let codec = registry.get(d.algorithm)?;
        let width = select_width(codec, d.bytepix)?;
        let ints = codec
            .decode(&compressed, count, width, &params)
            .map_err(codec_failure)?;
        codec_to_pixels(&ints, tile_scaling(store, d, row)?, sentinel(store, d, row)?, check)
    } else {
        let uncompressed = match store.column_index(UNCOMPRESSED_DATA) {
            Some(col) => Some((col, store.read_bytes(col, row)?)),
            None => None,
        };
        match uncompressed {
            Some((col, bytes)) if !bytes.is_empty() => {
                let element = store
                    .column_type(col)
                    .map(|t| t.element())
                    .ok_or(Error::InvalidHeader("no such column"))?;
                if bytes.len() != count * element.size() {
                    return Err(Error::CorruptRecord {
                        expected: count * element.size(),
                        found: bytes.len(),
                    });
                }
                match element {
                    ElementType::F32 => {
                        let raw: Vec<f64> = endian::from_be_bytes::<f32>(&bytes)?
                            .into_iter()
                            .map(f64::from)
                            .collect();
                        raw_to_pixels(&raw, check)
                    }
                    ElementType::F64 => raw_to_pixels(&endian::from_be_bytes::<f64>(&bytes)?, check),
                    integer => {
                        let width = integer
                            .width()
                            .ok_or(Error::InvalidHeader("unsupported UNCOMPRESSED_DATA type"))?;
                        let ints = NoCompressCodec.decode(&bytes, count, width, &params)?;
                        codec_to_pixels(&ints, d.scaling, sentinel(store, d, row)?, check)
                    }
                }
            }
            _ => {
                log::warn!("row {row}: no stored data, reading zeros");
                Decoded {
                    values: vec![T::default(); count],
                    flags: matches!(check, NullCheck::Flag).then(|| vec![false; count]),
                    any_null: false,
                    overflow: false,
                }
            }
        }
    };

    Ok(CachedTile {
        pixels: T::into_buffer(decoded.values),
        flags: decoded.flags,
        any_null: decoded.any_null,
        overflow: decoded.overflow,
    })
}

/// Scale and zero turning the row's codec integers into pixel values.
fn tile_scaling<S: TableStore + ?Sized>(store: &S, d: &ImageDescriptor, row: usize) -> Result<Scaling> {
    if !d.pixel_type.is_float() {
        return Ok(d.scaling);
    }
    let stored = match (store.column_index(ZSCALE), store.column_index(ZZERO)) {
        (Some(sc), Some(zc)) => Scaling::new(store.read_scalar(sc, row)?, store.read_scalar(zc, row)?),
        _ => d.tile_scaling.unwrap_or(Scaling::IDENTITY),
    };
    Ok(if stored.is_identity() { d.scaling } else { stored })
}

/// The integer standing in for null pixels in `row`.
fn sentinel<S: TableStore + ?Sized>(store: &S, d: &ImageDescriptor, row: usize) -> Result<Option<i32>> {
    Ok(match d.null_policy {
        NullPolicy::NoNulls => None,
        NullPolicy::Constant(v) => Some(v),
        NullPolicy::PerRow => match store.column_index(ZBLANK) {
            Some(col) => Some(store.read_scalar(col, row)? as i32),
            None => None,
        },
    })
}
