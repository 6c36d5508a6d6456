//! Compression settings for one image and their table representation.
//!
//! [`CompressionOptions`] is what a caller fills in; [`ImageDescriptor`] is
//! the validated, immutable form the engines work from. A descriptor can be
//! written into an empty [`TableStore`] with [`ImageDescriptor::init_table`]
//! and recovered from an existing one with [`ImageDescriptor::from_table`].

use alloc::string::String;
use alloc::vec::Vec;

use crate::codec::{ByteWidth, CodecParams, CompressionAlgorithm, DEFAULT_BLOCKSIZE};
use crate::convert::{OverflowPolicy, Scaling};
use crate::error::{Error, Result};
use crate::geometry::{TileExtent, TileGeometry, MAX_DIM};
use crate::keywords::COMPRESSED_EXTNAME;
use crate::pixel::PixelType;
use crate::quantize::NULL_VALUE;
use crate::table::{ColumnType, ElementType, TableStore};
use crate::value::Value;

/// Column holding the codec output of each tile.
pub const COMPRESSED_DATA: &str = "COMPRESSED_DATA";
/// Column holding tiles stored without a codec: NOCOMPRESS integers or the
/// raw pixels of float tiles that could not be quantized.
pub const UNCOMPRESSED_DATA: &str = "UNCOMPRESSED_DATA";
/// Per-tile quantization scale.
pub const ZSCALE: &str = "ZSCALE";
/// Per-tile quantization zero point.
pub const ZZERO: &str = "ZZERO";
/// Per-tile null sentinel.
pub const ZBLANK: &str = "ZBLANK";

/// Default quantize level for float images.
pub const DEFAULT_QUANTIZE_LEVEL: f32 = 16.0;

/// Where the null sentinel of an image comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullPolicy {
    /// The image cannot hold nulls.
    NoNulls,
    /// One sentinel for the whole image.
    Constant(i32),
    /// Each row carries its own sentinel in the ZBLANK column.
    PerRow,
}

/// Caller-facing compression settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionOptions {
    pub algorithm: CompressionAlgorithm,
    /// Requested tile shape. 0 means the full image extent and missing
    /// trailing dimensions mean 1.
    pub tile: Vec<usize>,
    /// Rice block size.
    pub blocksize: usize,
    /// Float quantization: positive is noise / level, negative is the step
    /// itself, 0 stores every float tile raw.
    pub quantize_level: f32,
    /// H-compress scale: positive multiplies the tile noise, negative is
    /// used as an absolute value.
    pub hcomp_scale: f32,
    pub hcomp_smooth: bool,
    pub overflow: OverflowPolicy,
    /// Pixel value the caller uses for "no data".
    pub null_value: Option<f64>,
    /// BSCALE/BZERO of an integer image. Defaults to the conventional bias
    /// of the pixel type.
    pub scaling: Option<Scaling>,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        CompressionOptions {
            algorithm: CompressionAlgorithm::Rice,
            tile: Vec::new(),
            blocksize: DEFAULT_BLOCKSIZE,
            quantize_level: DEFAULT_QUANTIZE_LEVEL,
            hcomp_scale: 0.0,
            hcomp_smooth: false,
            overflow: OverflowPolicy::Clamp,
            null_value: None,
            scaling: None,
        }
    }
}

impl CompressionOptions {
    pub fn new(algorithm: CompressionAlgorithm) -> CompressionOptions {
        CompressionOptions {
            algorithm,
            ..CompressionOptions::default()
        }
    }

    pub fn tile(mut self, tile: &[usize]) -> Self {
        self.tile = tile.to_vec();
        self
    }

    pub fn blocksize(mut self, blocksize: usize) -> Self {
        self.blocksize = blocksize;
        self
    }

    pub fn quantize_level(mut self, level: f32) -> Self {
        self.quantize_level = level;
        self
    }

    pub fn hcompress(mut self, scale: f32, smooth: bool) -> Self {
        self.hcomp_scale = scale;
        self.hcomp_smooth = smooth;
        self
    }

    pub fn overflow(mut self, policy: OverflowPolicy) -> Self {
        self.overflow = policy;
        self
    }

    pub fn null_value(mut self, value: f64) -> Self {
        self.null_value = Some(value);
        self
    }

    pub fn scaling(mut self, scaling: Scaling) -> Self {
        self.scaling = Some(scaling);
        self
    }
}

/// Everything the engines need to know about one compressed image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDescriptor {
    pub pixel_type: PixelType,
    pub geometry: TileGeometry,
    pub algorithm: CompressionAlgorithm,
    pub blocksize: usize,
    /// Integer width declared for the codec before any upcast.
    pub bytepix: ByteWidth,
    pub quantize_level: f32,
    pub hcomp_scale: f32,
    pub hcomp_smooth: bool,
    /// BSCALE/BZERO.
    pub scaling: Scaling,
    /// Image-wide ZSCALE/ZZERO keywords, used when there are no such columns.
    pub tile_scaling: Option<Scaling>,
    pub null_policy: NullPolicy,
    /// The caller's null pixel value, in physical units.
    pub null_value: Option<f64>,
    pub overflow: OverflowPolicy,
}

impl ImageDescriptor {
    /// Validate `options` for an image of extent `naxes` and element type
    /// `pixel_type`.
    pub fn new(
        options: &CompressionOptions,
        naxes: &[usize],
        pixel_type: PixelType,
    ) -> Result<ImageDescriptor> {
        let geometry = match options.algorithm {
            CompressionAlgorithm::Hcompress => TileGeometry::for_hcompress(naxes, &options.tile)?,
            _ => TileGeometry::new(naxes, &options.tile)?,
        };
        if options.blocksize == 0 {
            return Err(Error::InvalidValue);
        }

        let scaling = match (pixel_type.is_float(), options.scaling) {
            (true, Some(s)) if !s.is_identity() => {
                return Err(Error::UnsupportedScaling {
                    scale: s.scale,
                    zero: s.zero,
                })
            }
            (true, _) => Scaling::IDENTITY,
            (false, Some(s)) if s.scale == 0.0 => {
                return Err(Error::UnsupportedScaling {
                    scale: s.scale,
                    zero: s.zero,
                })
            }
            (false, Some(s)) => s,
            (false, None) => Scaling::new(1.0, pixel_type.conventional_zero()),
        };

        let null_policy = if pixel_type.is_float() {
            NullPolicy::Constant(NULL_VALUE)
        } else {
            match options.null_value {
                Some(v) => NullPolicy::Constant(integer_blank(v, pixel_type, scaling)?),
                None => NullPolicy::NoNulls,
            }
        };

        Ok(ImageDescriptor {
            pixel_type,
            geometry,
            algorithm: options.algorithm,
            blocksize: options.blocksize,
            bytepix: pixel_type.native_width(),
            quantize_level: options.quantize_level,
            hcomp_scale: options.hcomp_scale,
            hcomp_smooth: options.hcomp_smooth,
            scaling,
            tile_scaling: None,
            null_policy,
            null_value: options.null_value,
            overflow: options.overflow,
        })
    }

    /// Codec parameters for one tile.
    pub fn codec_params(&self, extent: &TileExtent) -> CodecParams {
        let shape = extent.shape();
        let nx = shape.first().copied().unwrap_or(1).max(1);
        CodecParams {
            blocksize: self.blocksize,
            nx,
            ny: extent.len() / nx,
            hcomp_scale: self.hcomp_scale,
            hcomp_smooth: self.hcomp_smooth,
        }
    }

    /// The constant sentinel, if any.
    pub fn constant_blank(&self) -> Option<i32> {
        match self.null_policy {
            NullPolicy::Constant(v) => Some(v),
            _ => None,
        }
    }

    /// Declare the columns, write the compression keywords and size the
    /// table to one row per tile.
    pub fn init_table<S: TableStore + ?Sized>(&self, store: &mut S) -> Result<()> {
        let data_type = match self.algorithm {
            CompressionAlgorithm::Plio => ElementType::I16,
            _ => ElementType::U8,
        };
        store.declare_column(COMPRESSED_DATA, ColumnType::VarArray(data_type))?;
        if self.pixel_type.is_float() {
            store.declare_column(ZSCALE, ColumnType::Scalar(ElementType::F64))?;
            store.declare_column(ZZERO, ColumnType::Scalar(ElementType::F64))?;
        }
        store.set_num_rows(self.geometry.num_tiles())?;

        let h = store.header_mut();
        h.set("ZIMAGE", Value::Logical(true), Some("extension contains compressed image"));
        h.set(
            "ZBITPIX",
            Value::Integer(self.pixel_type.bitpix()),
            Some("data type of original image"),
        );
        h.set(
            "ZNAXIS",
            Value::Integer(self.geometry.ndim() as i64),
            Some("dimension of original image"),
        );
        for (d, &n) in self.geometry.naxes().iter().enumerate() {
            h.set(
                &alloc::format!("ZNAXIS{}", d + 1),
                Value::Integer(n as i64),
                Some("length of original image axis"),
            );
        }
        for (d, &t) in self.geometry.tile_shape().iter().enumerate() {
            h.set(
                &alloc::format!("ZTILE{}", d + 1),
                Value::Integer(t as i64),
                Some("size of tiles to be compressed"),
            );
        }
        h.set(
            "ZCMPTYPE",
            Value::String(String::from(self.algorithm.name())),
            Some("compression algorithm"),
        );

        match self.algorithm {
            CompressionAlgorithm::Rice => {
                set_param(h, 1, "BLOCKSIZE", Value::Integer(self.blocksize as i64));
                set_param(h, 2, "BYTEPIX", Value::Integer(self.bytepix.bytes() as i64));
            }
            CompressionAlgorithm::Hcompress => {
                set_param(h, 1, "SCALE", Value::Float(self.hcomp_scale as f64));
                set_param(h, 2, "SMOOTH", Value::Integer(self.hcomp_smooth as i64));
            }
            _ => {}
        }

        if !self.pixel_type.is_float() && self.scaling != Scaling::IDENTITY {
            h.set("BSCALE", Value::Float(self.scaling.scale), None);
            h.set("BZERO", Value::Float(self.scaling.zero), None);
        }
        if !self.pixel_type.is_float() {
            if let NullPolicy::Constant(blank) = self.null_policy {
                h.set_after(
                    "ZCMPTYPE",
                    ZBLANK,
                    Value::Integer(blank as i64),
                    Some("null value in the compressed integer array"),
                );
            }
        }
        if !h.contains("EXTNAME") {
            h.set(
                "EXTNAME",
                Value::String(String::from(COMPRESSED_EXTNAME)),
                Some("name of this binary table extension"),
            );
        }
        log::debug!(
            "initialised {} table: naxes {:?}, tile {:?}, {} rows",
            self.algorithm,
            self.geometry.naxes(),
            self.geometry.tile_shape(),
            self.geometry.num_tiles()
        );
        Ok(())
    }

    /// Rebuild the descriptor of an existing compressed table.
    pub fn from_table<S: TableStore + ?Sized>(store: &S) -> Result<ImageDescriptor> {
        let h = store.header();
        let cmptype = h
            .get_string("ZCMPTYPE")
            .ok_or(Error::MissingKeyword("ZCMPTYPE"))?;
        let algorithm = CompressionAlgorithm::from_name(cmptype)?;

        let zbitpix = h.require_integer("ZBITPIX")?;
        let znaxis = h.require_integer("ZNAXIS")?;
        if znaxis < 1 || znaxis > MAX_DIM as i64 {
            return Err(Error::InvalidGeometry(
                "number of dimensions must be between 1 and 6",
            ));
        }
        let ndim = znaxis as usize;
        let mut naxes = Vec::with_capacity(ndim);
        for d in 1..=ndim {
            let n = h
                .get_integer(&alloc::format!("ZNAXIS{d}"))
                .ok_or(Error::MissingKeyword("ZNAXISn"))?;
            naxes.push(usize::try_from(n).map_err(|_| Error::InvalidValue)?);
        }
        let mut tile = Vec::with_capacity(ndim);
        for d in 1..=ndim {
            let t = match h.get_integer(&alloc::format!("ZTILE{d}")) {
                Some(t) => usize::try_from(t).map_err(|_| Error::InvalidValue)?,
                None if d == 1 => naxes[0],
                None => 1,
            };
            if t == 0 {
                return Err(Error::InvalidGeometry("tile dimensions must be positive"));
            }
            tile.push(t);
        }
        let geometry = TileGeometry::new(&naxes, &tile)?;
        if store.num_rows() != geometry.num_tiles() {
            return Err(Error::InvalidHeader(
                "row count does not match the number of tiles",
            ));
        }

        let bscale = h.get_float("BSCALE").unwrap_or(1.0);
        let bzero = h.get_float("BZERO").unwrap_or(0.0);
        let pixel_type = PixelType::from_bitpix(zbitpix, bscale, bzero)?;

        let mut blocksize = DEFAULT_BLOCKSIZE;
        let mut bytepix = match algorithm {
            CompressionAlgorithm::Rice => 4,
            _ => pixel_type.native_width().bytes() as i64,
        };
        let mut hcomp_scale = 0.0;
        let mut hcomp_smooth = false;
        for i in 1.. {
            let Some(name) = h.get_string(&alloc::format!("ZNAME{i}")) else {
                break;
            };
            let value = h.get(&alloc::format!("ZVAL{i}"));
            match name.trim().to_ascii_uppercase().as_str() {
                "BLOCKSIZE" => {
                    if let Some(v) = value.and_then(Value::as_i64) {
                        blocksize = usize::try_from(v).map_err(|_| Error::InvalidValue)?;
                    }
                }
                "BYTEPIX" => {
                    if let Some(v) = value.and_then(Value::as_i64) {
                        bytepix = v;
                    }
                }
                "SCALE" => hcomp_scale = value.and_then(Value::as_f64).unwrap_or(0.0) as f32,
                "SMOOTH" => hcomp_smooth = value.and_then(Value::as_i64).unwrap_or(0) != 0,
                _ => {}
            }
        }
        if algorithm == CompressionAlgorithm::Rice && blocksize < 16 && bytepix > 8 {
            // written in the wrong order by some old writers
            let swapped = blocksize as i64;
            blocksize = bytepix as usize;
            bytepix = swapped;
        }
        if blocksize == 0 {
            return Err(Error::InvalidValue);
        }
        let bytepix = ByteWidth::from_bytes(bytepix).ok_or(Error::InvalidValue)?;

        let tile_scaling = match (h.get_float("ZSCALE"), h.get_float("ZZERO")) {
            (Some(s), z) => Some(Scaling::new(s, z.unwrap_or(0.0))),
            (None, Some(z)) => Some(Scaling::new(1.0, z)),
            (None, None) => None,
        };

        let null_policy = if store.column_index(ZBLANK).is_some() {
            NullPolicy::PerRow
        } else if let Some(blank) = h.get_integer(ZBLANK).or_else(|| h.get_integer("BLANK")) {
            NullPolicy::Constant(i32::try_from(blank).map_err(|_| Error::InvalidValue)?)
        } else if pixel_type.is_float() {
            // a later write may quantize NaN without any ZBLANK yet
            NullPolicy::Constant(NULL_VALUE)
        } else {
            NullPolicy::NoNulls
        };

        let descriptor = ImageDescriptor {
            pixel_type,
            geometry,
            algorithm,
            blocksize,
            bytepix,
            quantize_level: DEFAULT_QUANTIZE_LEVEL,
            hcomp_scale,
            hcomp_smooth,
            scaling: Scaling::new(bscale, bzero),
            tile_scaling,
            null_policy,
            null_value: None,
            overflow: OverflowPolicy::Clamp,
        };
        log::debug!(
            "opened {} image: {:?} {:?}, tile {:?}",
            descriptor.algorithm,
            descriptor.pixel_type,
            descriptor.geometry.naxes(),
            descriptor.geometry.tile_shape()
        );
        Ok(descriptor)
    }
}

fn set_param(h: &mut crate::header::Header, i: usize, name: &str, value: Value) {
    h.set(
        &alloc::format!("ZNAME{i}"),
        Value::String(String::from(name)),
        Some("compression option"),
    );
    h.set(&alloc::format!("ZVAL{i}"), value, Some("option value"));
}

/// Stored sentinel for a caller null value of an integer image.
fn integer_blank(null: f64, pixel_type: PixelType, scaling: Scaling) -> Result<i32> {
    let stored = libm::round((null - scaling.zero) / scaling.scale);
    let (lo, hi) = pixel_type.native_width().range();
    if stored < lo as f64 || stored > hi as f64 {
        return Err(Error::OutOfRange);
    }
    Ok(stored as i32)
}
