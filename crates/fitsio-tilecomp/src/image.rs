//! A compressed image bound to the table that stores it.
//!
//! [`TiledImage`] ties together a [`TableStore`], the image's
//! [`ImageDescriptor`], the codec registry and the tile cache. It is the
//! entry point most callers need: create or open an image, write pixels
//! (whole or in part) and read sections back.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::cache::TileCache;
use crate::codec::{CodecRegistry, PixelCodec};
use crate::compress::{check_pixel_type, CompressionEngine, CompressionSummary, TileWriter};
use crate::convert::{NullCheck, OverflowPolicy, Scaling};
use crate::decompress::{DecompressionEngine, ReadResult};
use crate::descriptor::{CompressionOptions, ImageDescriptor, NullPolicy, COMPRESSED_DATA};
use crate::error::{Error, Result};
use crate::geometry::Section;
use crate::header::Header;
use crate::keywords::{image_to_table_header, table_to_image_header};
use crate::pixel::{Pixel, PixelType};
use crate::quantize::NULL_VALUE;
use crate::table::TableStore;

/// A tile-compressed image stored in a table.
pub struct TiledImage<S: TableStore> {
    store: S,
    descriptor: ImageDescriptor,
    registry: CodecRegistry,
    cache: TileCache,
}

impl<S: TableStore> TiledImage<S> {
    /// Lay out an empty table for a new image of extent `naxes`.
    pub fn create(
        mut store: S,
        options: &CompressionOptions,
        naxes: &[usize],
        pixel_type: PixelType,
    ) -> Result<TiledImage<S>> {
        if store.num_rows() != 0 || store.column_index(COMPRESSED_DATA).is_some() {
            return Err(Error::InvalidHeader("table already holds an image"));
        }
        let descriptor = ImageDescriptor::new(options, naxes, pixel_type)?;
        descriptor.init_table(&mut store)?;
        Ok(TiledImage {
            store,
            descriptor,
            registry: CodecRegistry::with_builtin(),
            cache: TileCache::new(),
        })
    }

    /// Like [`create`](Self::create), taking the extent, type, scaling and
    /// null value from an uncompressed image header. The header's other
    /// keywords are carried into the table.
    pub fn create_from_header(
        mut store: S,
        image: &Header,
        options: &CompressionOptions,
    ) -> Result<TiledImage<S>> {
        let naxis = image.require_integer("NAXIS")?;
        let mut naxes = Vec::new();
        for d in 1..=naxis.max(0) {
            let n = image
                .get_integer(&alloc::format!("NAXIS{d}"))
                .ok_or(Error::MissingKeyword("NAXISn"))?;
            naxes.push(usize::try_from(n).map_err(|_| Error::InvalidValue)?);
        }
        let bscale = image.get_float("BSCALE").unwrap_or(1.0);
        let bzero = image.get_float("BZERO").unwrap_or(0.0);
        let pixel_type = PixelType::from_bitpix(image.require_integer("BITPIX")?, bscale, bzero)?;

        let mut options = options.clone();
        if !pixel_type.is_float() {
            if options.scaling.is_none() && (image.contains("BSCALE") || image.contains("BZERO")) {
                options.scaling = Some(Scaling::new(bscale, bzero));
            }
            if options.null_value.is_none() {
                options.null_value = image
                    .get_integer("BLANK")
                    .map(|blank| blank as f64 * bscale + bzero);
            }
        }

        for card in image_to_table_header(image).iter() {
            if card.keyword_str() == "BLANK" {
                continue;
            }
            match &card.value {
                Some(value) if !card.is_commentary() => store.header_mut().set(
                    card.keyword_str(),
                    value.clone(),
                    card.comment.as_deref(),
                ),
                _ => store.header_mut().push(card.clone()),
            }
        }
        TiledImage::create(store, &options, &naxes, pixel_type)
    }

    /// Bind to a table that already holds a compressed image.
    pub fn open(store: S) -> Result<TiledImage<S>> {
        let descriptor = ImageDescriptor::from_table(&store)?;
        Ok(TiledImage {
            store,
            descriptor,
            registry: CodecRegistry::with_builtin(),
            cache: TileCache::new(),
        })
    }

    pub fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }

    pub fn naxes(&self) -> &[usize] {
        self.descriptor.geometry.naxes()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Add or replace a codec, e.g. PLIO_1 or HCOMPRESS_1.
    pub fn register_codec(&mut self, codec: Box<dyn PixelCodec>) {
        self.registry.register(codec);
        self.cache.invalidate();
    }

    pub fn set_overflow_policy(&mut self, policy: OverflowPolicy) {
        self.descriptor.overflow = policy;
        self.cache.invalidate();
    }

    /// The header of the uncompressed image this table represents.
    pub fn image_header(&self) -> Header {
        table_to_image_header(self.store.header())
    }

    /// Tile cache hits and misses so far.
    pub fn cache_stats(&self) -> (u64, u64) {
        self.cache.stats()
    }

    /// Compress a whole image, dimension 0 fastest.
    pub fn write_image<T: Pixel>(&mut self, data: &[T]) -> Result<CompressionSummary> {
        self.cache.invalidate();
        CompressionEngine::new(&mut self.store, &self.descriptor, &self.registry, data)?
            .compress_image()
    }

    /// Overwrite the box `first..=last` (1-based) with `data`.
    ///
    /// Every tile the box touches is decoded, merged and compressed again.
    /// Tiles not yet written count as zeros.
    pub fn write_pixels<T: Pixel>(
        &mut self,
        first: &[usize],
        last: &[usize],
        data: &[T],
    ) -> Result<()> {
        check_pixel_type::<T>(self.descriptor.pixel_type)?;
        if first.iter().zip(last).any(|(f, l)| f > l) {
            return Err(Error::InvalidGeometry("write bounds must be ascending"));
        }
        let section = Section::contiguous(first, last)?;
        if data.len() != section.len() {
            return Err(Error::InvalidGeometry("pixel buffer has the wrong length"));
        }
        let geometry = &self.descriptor.geometry;
        let range = geometry.covering(&section)?;
        let check = rewrite_check::<T>(&self.descriptor);

        let mut any_null = false;
        for index in range.iter() {
            let row = geometry.row_of(&index);
            let extent = geometry.extent_of(&index);
            let mut tile = DecompressionEngine::new(
                &self.store,
                &self.descriptor,
                &self.registry,
                &mut self.cache,
            )
            .decompress_tile(&index, check)?
            .pixels;
            crate::overlap::merge_in(&mut tile, &extent, data, &section)?;

            let report = TileWriter::new(&mut self.store, &self.descriptor, &self.registry)?
                .write_tile(&index, &tile)?;
            any_null |= report.any_null;
            self.cache.invalidate_row(row);
        }
        if any_null {
            TileWriter::new(&mut self.store, &self.descriptor, &self.registry)?
                .write_null_keyword();
            if self.descriptor.pixel_type.is_float()
                && self.descriptor.null_policy == NullPolicy::NoNulls
            {
                self.descriptor.null_policy = NullPolicy::Constant(NULL_VALUE);
                self.cache.invalidate();
            }
        }
        log::debug!("rewrote {:?}..={:?}", section.first(), section.last());
        Ok(())
    }

    /// Read `section` as pixels of type `T`.
    pub fn read_section<T: Pixel>(
        &mut self,
        section: &Section,
        check: NullCheck<T>,
    ) -> Result<ReadResult<T>> {
        DecompressionEngine::new(&self.store, &self.descriptor, &self.registry, &mut self.cache)
            .read_pixels(section, check)
    }

    /// Read the whole image.
    pub fn read_all<T: Pixel>(&mut self, check: NullCheck<T>) -> Result<ReadResult<T>> {
        let section = Section::full(self.descriptor.geometry.naxes());
        self.read_section(&section, check)
    }

    /// Read the whole image as an array indexed `[.., y, x]`.
    #[cfg(feature = "array")]
    pub fn read_array<T: Pixel>(&mut self) -> Result<ndarray::ArrayD<T>> {
        let pixels = self.read_all::<T>(NullCheck::Off)?.pixels;
        let shape: Vec<usize> = self.naxes().iter().rev().copied().collect();
        ndarray::Array::from_shape_vec(shape, pixels)
            .map_err(|_| Error::InvalidGeometry("pixel count does not match the image shape"))
    }
}

/// Null handling for reading a tile that is about to be rewritten, chosen so
/// the rewrite maps null pixels back to the sentinel.
fn rewrite_check<T: Pixel>(d: &ImageDescriptor) -> NullCheck<T> {
    match d.null_value {
        Some(v) => NullCheck::Substitute(T::from_f64(v).0),
        None if T::TYPE.is_float() => NullCheck::Substitute(T::from_f64(f64::NAN).0),
        None => NullCheck::Off,
    }
}
