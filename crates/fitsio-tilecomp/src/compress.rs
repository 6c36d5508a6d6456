//! Tile-by-tile compression of an image into a table.
//!
//! [`TileWriter`] turns the pixels of one tile into a table row.
//! [`CompressionEngine`] walks every tile of a whole image through it, one
//! [`CompressionEngine::step`] at a time.
//!
//! A failing tile aborts the image. Rows written before it stay as they are.

use alloc::format;
use alloc::vec;
use alloc::vec::Vec;

use crate::codec::{
    select_width, ByteWidth, CodecRegistry, CompressionAlgorithm, PixelCodec,
};
use crate::convert::{floats_to_codec, ints_to_codec, NullSub, Scaling};
use crate::descriptor::{
    ImageDescriptor, NullPolicy, COMPRESSED_DATA, UNCOMPRESSED_DATA, ZBLANK, ZSCALE, ZZERO,
};
use crate::error::{Error, Result, TileLocation};
use crate::geometry::{Section, TileExtent, TileIndex};
use crate::overlap::copy_out;
use crate::pixel::{Pixel, PixelBuffer, PixelType};
use crate::quantize::{estimate_noise, quantize, NULL_VALUE};
use crate::table::{ColumnType, ElementType, TableStore};
use crate::value::Value;

/// Largest value a PLIO_1 tile can hold.
pub const PLIO_MAX: i32 = 16_777_215;

/// What happened to one tile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TileReport {
    /// The tile contained null pixels.
    pub any_null: bool,
    /// Values were clamped to fit the stored integers.
    pub overflow: bool,
    /// The tile went to the raw fallback column.
    pub raw: bool,
    /// Bytes written for the tile.
    pub payload_len: usize,
    /// The codec's size estimate for the tile, 0 for raw tiles.
    pub estimate: usize,
}

/// Pixels of type `T` can be written to an image of `image` type: the same
/// stored BITPIX for integer pixels, anything for float pixels.
pub(crate) fn check_pixel_type<T: Pixel>(image: PixelType) -> Result<()> {
    let ty = T::TYPE;
    let ok = ty.is_float() || image.is_float() || ty.bitpix() == image.bitpix();
    if ok {
        Ok(())
    } else {
        Err(Error::TypeMismatch { image, pixels: ty })
    }
}

fn codec_failure(e: Error) -> Error {
    match e {
        Error::CompressionFailed(_) | Error::UnsupportedWidth { .. } => e,
        other => Error::CompressionFailed(format!("{other}")),
    }
}

/// Encodes single tiles and writes them to their rows.
pub struct TileWriter<'a, S: TableStore + ?Sized> {
    store: &'a mut S,
    descriptor: &'a ImageDescriptor,
    codec: &'a dyn PixelCodec,
}

impl<'a, S: TableStore + ?Sized> TileWriter<'a, S> {
    pub fn new(
        store: &'a mut S,
        descriptor: &'a ImageDescriptor,
        registry: &'a CodecRegistry,
    ) -> Result<TileWriter<'a, S>> {
        let codec = registry.get(descriptor.algorithm)?;
        Ok(TileWriter {
            store,
            descriptor,
            codec,
        })
    }

    /// Compress the pixels of one tile and write its row. `pixels` covers
    /// the tile's clipped extent, dimension 0 fastest.
    pub fn write_tile<T: Pixel>(&mut self, index: &TileIndex, pixels: &[T]) -> Result<TileReport> {
        let row = self.descriptor.geometry.row_of(index);
        let report = self.encode_row(index, row, pixels).map_err(|e| {
            e.at(TileLocation {
                index: index.0.clone(),
                row,
            })
        })?;
        log::trace!(
            "row {row}: {} bytes{}",
            report.payload_len,
            if report.raw { " (raw)" } else { "" }
        );
        Ok(report)
    }

    fn encode_row<T: Pixel>(
        &mut self,
        index: &TileIndex,
        row: usize,
        pixels: &[T],
    ) -> Result<TileReport> {
        let d = self.descriptor;
        check_pixel_type::<T>(d.pixel_type)?;
        let extent = d.geometry.extent_of(index);
        if pixels.len() != extent.len() {
            return Err(Error::InvalidGeometry("tile buffer has the wrong length"));
        }
        let mut params = d.codec_params(&extent);
        let width = select_width(self.codec, d.bytepix)?;
        let mut report = TileReport::default();

        let (ints, tile_scaling) = if d.pixel_type.is_float() {
            let null = d.null_value.map(|v| T::from_f64(v).0);
            if d.algorithm == CompressionAlgorithm::NoCompress {
                return self.write_raw(row, pixels, null);
            }
            match quantize(pixels, params.nx, params.ny, d.quantize_level, null) {
                Ok(q) => {
                    report.any_null = q.any_null;
                    (q.ints, Some(Scaling::new(q.scale, q.zero)))
                }
                Err(reason) => {
                    log::warn!("row {row}: storing tile uncompressed ({reason})");
                    return self.write_raw(row, pixels, null);
                }
            }
        } else {
            let null = match (d.null_policy, d.null_value) {
                (NullPolicy::Constant(sentinel), Some(v)) => Some(NullSub {
                    flag: T::from_f64(v).0,
                    sentinel,
                }),
                _ => None,
            };
            let tile = if T::TYPE.is_float() {
                floats_to_codec(pixels, d.scaling, width, null)?
            } else {
                ints_to_codec(pixels, d.scaling, width, null)?
            };
            report.any_null = tile.any_null;
            report.overflow = tile.overflow;
            (tile.values, None)
        };

        if report.overflow {
            d.overflow.check(true)?;
            log::warn!("row {row}: values clamped to the stored integer range");
        }

        match d.algorithm {
            CompressionAlgorithm::Plio => {
                if let Some(v) = ints.iter().find(|&&v| !(0..=PLIO_MAX).contains(&v)) {
                    return Err(Error::CompressionFailed(format!(
                        "PLIO_1 cannot store {v}: values must lie in 0..={PLIO_MAX}"
                    )));
                }
            }
            CompressionAlgorithm::Hcompress => {
                params.hcomp_scale = if d.hcomp_scale > 0.0 {
                    let sentinel = if report.any_null {
                        d.constant_blank()
                    } else {
                        None
                    };
                    let noise = estimate_noise(&ints, params.nx, params.ny, sentinel).noise;
                    (d.hcomp_scale as f64 * noise) as f32
                } else {
                    libm::fabsf(d.hcomp_scale)
                };
            }
            _ => {}
        }

        report.estimate = self.codec.max_encoded_len(ints.len(), width, &params);
        let bytes = self
            .codec
            .encode(&ints, width, &params)
            .map_err(codec_failure)?;
        report.payload_len = bytes.len();
        if bytes.len() > report.estimate {
            log::debug!(
                "row {row}: {} byte payload exceeds the {} estimate of {}",
                bytes.len(),
                d.algorithm,
                report.estimate
            );
        }

        if d.algorithm == CompressionAlgorithm::NoCompress {
            let col = self.uncompressed_column(ElementType::for_width(width))?;
            self.store.write_bytes(col, row, &bytes)?;
            self.clear(COMPRESSED_DATA, row)?;
        } else {
            let col = self
                .store
                .column_index(COMPRESSED_DATA)
                .ok_or(Error::InvalidHeader("table has no COMPRESSED_DATA column"))?;
            self.store.write_bytes(col, row, &bytes)?;
            self.clear(UNCOMPRESSED_DATA, row)?;
        }

        if let Some(s) = tile_scaling {
            if let (Some(sc), Some(zc)) = (
                self.store.column_index(ZSCALE),
                self.store.column_index(ZZERO),
            ) {
                self.store.write_scalar(sc, row, s.scale)?;
                self.store.write_scalar(zc, row, s.zero)?;
            }
        }
        Ok(report)
    }

    /// Store the pixels of a float tile verbatim. Pixels equal to `null`
    /// are stored as NaN.
    fn write_raw<T: Pixel>(
        &mut self,
        row: usize,
        pixels: &[T],
        null: Option<T>,
    ) -> Result<TileReport> {
        let as_stored = |p: &T| {
            if null == Some(*p) {
                f64::NAN
            } else {
                p.to_f64()
            }
        };
        let buffer = match self.descriptor.pixel_type {
            PixelType::F32 => {
                PixelBuffer::F32(pixels.iter().map(|p| f32::from_f64(as_stored(p)).0).collect())
            }
            _ => PixelBuffer::F64(pixels.iter().map(as_stored).collect()),
        };
        let any_null = (0..buffer.len()).any(|i| buffer.get_f64(i).is_some_and(f64::is_nan));
        let element = ElementType::raw_float(buffer.pixel_type())
            .ok_or(Error::InvalidHeader("raw fallback needs a float image"))?;

        let bytes = buffer.to_be_bytes();
        let col = self.uncompressed_column(element)?;
        self.store.write_bytes(col, row, &bytes)?;
        self.clear(COMPRESSED_DATA, row)?;
        Ok(TileReport {
            any_null,
            overflow: false,
            raw: true,
            payload_len: bytes.len(),
            estimate: 0,
        })
    }

    /// The UNCOMPRESSED_DATA column, created on first use and grown to
    /// `element`.
    fn uncompressed_column(&mut self, element: ElementType) -> Result<usize> {
        let ty = ColumnType::VarArray(element);
        let col = self.store.declare_column(UNCOMPRESSED_DATA, ty)?;
        if self.store.column_type(col) != Some(ty) {
            self.store.set_column_type(col, ty)?;
        }
        Ok(col)
    }

    /// Empty `name`'s row, if the column exists.
    fn clear(&mut self, name: &str, row: usize) -> Result<()> {
        if let Some(col) = self.store.column_index(name) {
            if !self.store.read_bytes(col, row)?.is_empty() {
                self.store.write_bytes(col, row, &[])?;
            }
        }
        Ok(())
    }

    /// Record that the image holds nulls. Float images get the ZBLANK
    /// keyword right after ZCMPTYPE; integer images already carry theirs.
    pub fn write_null_keyword(&mut self) {
        let d = self.descriptor;
        if !d.pixel_type.is_float() {
            return;
        }
        let blank = d.constant_blank().unwrap_or(NULL_VALUE);
        self.store.header_mut().set_after(
            "ZCMPTYPE",
            ZBLANK,
            Value::Integer(blank as i64),
            Some("null value in the compressed integer array"),
        );
    }
}

/// Progress of a [`CompressionEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Created, no tile written yet.
    Configuring,
    /// The tile with this 0-based sequence number is next.
    Emitting(usize),
    /// Every tile is written.
    Done,
}

/// Totals over a whole image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompressionSummary {
    pub tiles: usize,
    pub raw_tiles: usize,
    pub any_null: bool,
    pub overflow: bool,
    pub bytes: usize,
}

/// Compresses a whole in-memory image, one tile per [`step`](Self::step).
///
/// Tiles are emitted in row order, dimension 0 fastest. A caller may stop
/// between steps; the rows already written stay.
pub struct CompressionEngine<'a, S: TableStore + ?Sized, T: Pixel> {
    writer: TileWriter<'a, S>,
    data: &'a [T],
    image: TileExtent,
    state: EngineState,
    summary: CompressionSummary,
}

impl<'a, S: TableStore + ?Sized, T: Pixel> CompressionEngine<'a, S, T> {
    /// `data` holds the whole image, dimension 0 fastest.
    pub fn new(
        store: &'a mut S,
        descriptor: &'a ImageDescriptor,
        registry: &'a CodecRegistry,
        data: &'a [T],
    ) -> Result<CompressionEngine<'a, S, T>> {
        check_pixel_type::<T>(descriptor.pixel_type)?;
        let geometry = &descriptor.geometry;
        if data.len() != geometry.image_len() {
            return Err(Error::InvalidGeometry("image buffer has the wrong length"));
        }
        let image = TileExtent {
            first: vec![1; geometry.ndim()],
            last: geometry.naxes().to_vec(),
        };
        Ok(CompressionEngine {
            writer: TileWriter::new(store, descriptor, registry)?,
            data,
            image,
            state: EngineState::Configuring,
            summary: CompressionSummary::default(),
        })
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn summary(&self) -> CompressionSummary {
        self.summary
    }

    /// Write the next tile.
    pub fn step(&mut self) -> Result<EngineState> {
        let d = self.writer.descriptor;
        let seq = match self.state {
            EngineState::Done => return Ok(EngineState::Done),
            EngineState::Configuring => {
                log::debug!(
                    "compressing {:?} image {:?} with {}: {} tiles of {:?}",
                    d.pixel_type,
                    d.geometry.naxes(),
                    d.algorithm,
                    d.geometry.num_tiles(),
                    d.geometry.tile_shape()
                );
                0
            }
            EngineState::Emitting(seq) => seq,
        };

        let index = d.geometry.index_of_row(seq + 1)?;
        let extent = d.geometry.extent_of(&index);
        let mut tile = vec![T::default(); extent.len()];
        copy_out(self.data, &self.image, &mut tile, &Section::from_extent(&extent))?;
        let report = self.writer.write_tile(&index, &tile)?;

        let s = &mut self.summary;
        s.tiles += 1;
        s.raw_tiles += report.raw as usize;
        s.any_null |= report.any_null;
        s.overflow |= report.overflow;
        s.bytes += report.payload_len;

        self.state = if seq + 1 == d.geometry.num_tiles() {
            if self.summary.any_null {
                self.writer.write_null_keyword();
            }
            log::debug!(
                "compressed {} tiles into {} bytes ({} raw)",
                self.summary.tiles,
                self.summary.bytes,
                self.summary.raw_tiles
            );
            EngineState::Done
        } else {
            EngineState::Emitting(seq + 1)
        };
        Ok(self.state)
    }

    /// Write every remaining tile.
    pub fn compress_image(mut self) -> Result<CompressionSummary> {
        while self.step()? != EngineState::Done {}
        Ok(self.summary)
    }
}
