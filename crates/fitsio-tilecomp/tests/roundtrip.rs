//! End-to-end tests for fitsio-tilecomp.
//!
//! Images are compressed into in-memory tables and read back through the
//! public API only. Pixel data comes from a fixed-seed generator so every
//! run sees the same values.

use std::cell::Cell;
use std::rc::Rc;

use fitsio_tilecomp::codec::{ByteWidth, CodecParams, CompressionAlgorithm, PixelCodec};
use fitsio_tilecomp::compress::PLIO_MAX;
use fitsio_tilecomp::fits;
use fitsio_tilecomp::{
    CompressionOptions, Error, MemoryTable, NullCheck, Pixel, PixelType, Section, TableStore,
    TileGeometry, TiledImage,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// xorshift32, good enough for test pixels.
struct Rng(u32);

impl Rng {
    fn next(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }

    /// Uniform in [-1, 1).
    fn unit(&mut self) -> f64 {
        (self.next() as f64 / u32::MAX as f64) * 2.0 - 1.0
    }
}

fn new_image(
    options: CompressionOptions,
    naxes: &[usize],
    pixel_type: PixelType,
) -> TiledImage<MemoryTable> {
    TiledImage::create(MemoryTable::new(), &options, naxes, pixel_type).unwrap()
}

/// Pixels of a 2-D section taken by hand from a full image buffer.
fn pick<T: Copy>(
    full: &[T],
    nx: usize,
    first: [usize; 2],
    last: [usize; 2],
    step: [usize; 2],
) -> Vec<T> {
    let mut out = Vec::new();
    for y in (first[1]..=last[1]).step_by(step[1]) {
        for x in (first[0]..=last[0]).step_by(step[0]) {
            out.push(full[(y - 1) * nx + (x - 1)]);
        }
    }
    out
}

/// Physical value range of an integer pixel type.
fn type_range(ty: PixelType) -> (f64, f64) {
    match ty {
        PixelType::U8 => (0.0, 255.0),
        PixelType::I8 => (-128.0, 127.0),
        PixelType::I16 => (i16::MIN as f64, i16::MAX as f64),
        PixelType::U16 => (0.0, u16::MAX as f64),
        PixelType::I32 => (i32::MIN as f64, i32::MAX as f64),
        PixelType::U32 => (0.0, u32::MAX as f64),
        other => panic!("{other:?} is not an integer type"),
    }
}

fn random_pixels<T: Pixel>(rng: &mut Rng, n: usize, lo: f64, hi: f64) -> Vec<T> {
    (0..n)
        .map(|_| {
            let u = rng.next() as f64 / u32::MAX as f64;
            T::from_f64((lo + u * (hi - lo)).round()).0
        })
        .collect()
}

/// Compress random pixels of type `T` with a random tile shape between 4x4
/// and 64x64 and check they read back unchanged.
fn random_round_trip<T: Pixel>(rng: &mut Rng, alg: CompressionAlgorithm) {
    let ty = T::TYPE;
    let tile = [4 + rng.next() as usize % 61, 4 + rng.next() as usize % 61];
    let naxes: Vec<usize> = tile
        .iter()
        .map(|&t| {
            let whole = t * (1 + rng.next() as usize % 2);
            // H-compress edge tiles must keep 4 pixels
            if alg == CompressionAlgorithm::Hcompress {
                whole
            } else {
                whole + rng.next() as usize % t
            }
        })
        .collect();

    let (mut lo, mut hi) = type_range(ty);
    if alg == CompressionAlgorithm::Plio {
        let zero = ty.conventional_zero();
        lo = lo.max(zero);
        hi = hi.min(zero + PLIO_MAX as f64);
    }
    let data: Vec<T> = random_pixels(rng, naxes[0] * naxes[1], lo, hi);

    let mut img = new_image(CompressionOptions::new(alg).tile(&tile), &naxes, ty);
    if alg.requires_four_bytes() {
        img.register_codec(word_codec(alg).0);
    }
    img.write_image(&data)
        .unwrap_or_else(|e| panic!("{alg} {ty:?} tile {tile:?}: {e}"));
    let back = img.read_all::<T>(NullCheck::Off).unwrap().pixels;
    assert_eq!(back, data, "{alg} {ty:?} tile {tile:?} image {naxes:?}");
}

// ---------------------------------------------------------------------------
// Lossless codecs
// ---------------------------------------------------------------------------

#[test]
fn random_tiles_round_trip_for_every_codec_and_type() {
    let mut rng = Rng(0x9E37_79B9);
    for alg in [
        CompressionAlgorithm::Rice,
        CompressionAlgorithm::Gzip,
        CompressionAlgorithm::NoCompress,
        CompressionAlgorithm::Plio,
        CompressionAlgorithm::Hcompress,
    ] {
        for _ in 0..2 {
            random_round_trip::<u8>(&mut rng, alg);
            random_round_trip::<i8>(&mut rng, alg);
            random_round_trip::<i16>(&mut rng, alg);
            random_round_trip::<u16>(&mut rng, alg);
            random_round_trip::<i32>(&mut rng, alg);
            random_round_trip::<u32>(&mut rng, alg);
        }
    }
}

#[test]
fn integer_images_survive_every_builtin_codec() {
    let mut rng = Rng(0x2545_F491);
    let data: Vec<i32> = (0..600).map(|_| (rng.next() % 200_000) as i32 - 100_000).collect();
    for alg in [
        CompressionAlgorithm::Rice,
        CompressionAlgorithm::Gzip,
        CompressionAlgorithm::NoCompress,
    ] {
        let mut img = new_image(
            CompressionOptions::new(alg).tile(&[25, 4]),
            &[30, 20],
            PixelType::I32,
        );
        img.write_image(&data).unwrap();
        let back = img.read_all::<i32>(NullCheck::Off).unwrap();
        assert_eq!(back.pixels, data, "{alg}");
    }
}

#[test]
fn every_integer_type_round_trips_through_rice() {
    let bytes: Vec<u8> = (0..=255).collect();
    let mut img = new_image(CompressionOptions::default(), &[16, 16], PixelType::U8);
    img.write_image(&bytes).unwrap();
    assert_eq!(img.read_all::<u8>(NullCheck::Off).unwrap().pixels, bytes);

    let signed: Vec<i8> = (-128..=127).collect();
    let mut img = new_image(CompressionOptions::default(), &[256], PixelType::I8);
    img.write_image(&signed).unwrap();
    assert_eq!(img.read_all::<i8>(NullCheck::Off).unwrap().pixels, signed);

    let words: Vec<u32> = (0..64).map(|i| i * 67_000_000).collect();
    let mut img = new_image(CompressionOptions::default(), &[8, 8], PixelType::U32);
    img.write_image(&words).unwrap();
    assert_eq!(img.read_all::<u32>(NullCheck::Off).unwrap().pixels, words);
}

// ---------------------------------------------------------------------------
// Tiling and sections
// ---------------------------------------------------------------------------

#[test]
fn tiles_cover_the_image_exactly_once() {
    let naxes = [10, 7, 3];
    let g = TileGeometry::new(&naxes, &[4, 3, 2]).unwrap();
    assert_eq!(g.tile_counts(), &[3, 3, 2]);

    let mut hits = vec![0u32; g.image_len()];
    for (row, index) in g.tiles().enumerate() {
        assert_eq!(g.row_of(&index), row + 1);
        let e = g.extent_of(&index);
        for z in e.first[2]..=e.last[2] {
            for y in e.first[1]..=e.last[1] {
                for x in e.first[0]..=e.last[0] {
                    hits[((z - 1) * 7 + (y - 1)) * 10 + (x - 1)] += 1;
                }
            }
        }
    }
    assert!(hits.iter().all(|&h| h == 1));
}

#[test]
fn strided_section_across_tiles() {
    let data: Vec<i16> = (0..35).map(|i| i * 10).collect();
    let mut img = new_image(
        CompressionOptions::default().tile(&[3, 2]),
        &[7, 5],
        PixelType::I16,
    );
    img.write_image(&data).unwrap();

    let s = Section::new(&[1, 1], &[7, 5], &[2, 2]).unwrap();
    let r = img.read_section::<i16>(&s, NullCheck::Off).unwrap();
    assert_eq!(r.pixels, pick(&data, 7, [1, 1], [7, 5], [2, 2]));

    let s = Section::new(&[2, 2], &[6, 4], &[3, 1]).unwrap();
    let r = img.read_section::<i16>(&s, NullCheck::Off).unwrap();
    assert_eq!(r.pixels, pick(&data, 7, [2, 2], [6, 4], [3, 1]));
}

#[test]
fn descending_bounds_read_mirrored() {
    let data: Vec<i32> = (1..=9).collect();
    let mut img = new_image(CompressionOptions::default().tile(&[4]), &[9], PixelType::I32);
    img.write_image(&data).unwrap();
    let s = Section::new(&[7], &[2], &[1]).unwrap();
    let r = img.read_section::<i32>(&s, NullCheck::Off).unwrap();
    assert_eq!(r.pixels, vec![7, 6, 5, 4, 3, 2]);
}

#[test]
fn reads_can_widen_or_convert() {
    let data: Vec<i16> = vec![-3, 0, 7, 1000];
    let mut img = new_image(CompressionOptions::default(), &[4], PixelType::I16);
    img.write_image(&data).unwrap();
    let wide = img.read_all::<i32>(NullCheck::Off).unwrap();
    assert_eq!(wide.pixels, vec![-3, 0, 7, 1000]);
    let float = img.read_all::<f64>(NullCheck::Off).unwrap();
    assert_eq!(float.pixels, vec![-3.0, 0.0, 7.0, 1000.0]);
}

// ---------------------------------------------------------------------------
// Nulls
// ---------------------------------------------------------------------------

#[test]
fn null_bytes_are_flagged() {
    let mut img = new_image(
        CompressionOptions::default().null_value(255.0),
        &[4],
        PixelType::U8,
    );
    img.write_image(&[1u8, 2, 255, 4]).unwrap();
    let r = img.read_all::<u8>(NullCheck::Flag).unwrap();
    assert!(r.any_null);
    assert_eq!(r.null_flags, Some(vec![false, false, true, false]));
}

#[test]
fn null_shorts_substitute() {
    let mut img = new_image(
        CompressionOptions::new(CompressionAlgorithm::Gzip).null_value(-1.0),
        &[5],
        PixelType::I16,
    );
    img.write_image(&[10i16, -1, 30, -1, 50]).unwrap();
    let r = img.read_all::<i16>(NullCheck::Substitute(-99)).unwrap();
    assert_eq!(r.pixels, vec![10, -99, 30, -99, 50]);
}

#[test]
fn null_ints_are_invisible_when_unchecked() {
    let mut img = new_image(
        CompressionOptions::default().null_value(-999.0),
        &[3],
        PixelType::I32,
    );
    img.write_image(&[-999i32, 0, 999]).unwrap();
    let r = img.read_all::<i32>(NullCheck::Off).unwrap();
    assert_eq!(r.pixels, vec![-999, 0, 999]);
    assert!(!r.any_null);
}

#[test]
fn nan_written_after_reopening_reads_as_null() {
    let mut rng = Rng(99);
    let data: Vec<f32> = (0..16).map(|_| (10.0 + rng.unit()) as f32).collect();
    let mut img = new_image(CompressionOptions::default(), &[8, 2], PixelType::F32);
    img.write_image(&data).unwrap();
    assert!(!img.store().header().contains("ZBLANK"));

    let mut img = TiledImage::open(img.into_store()).unwrap();
    img.write_pixels(&[3, 1], &[3, 1], &[f32::NAN]).unwrap();
    assert!(img.store().header().contains("ZBLANK"));

    let r = img.read_all::<f32>(NullCheck::Flag).unwrap();
    assert!(r.any_null);
    let flags = r.null_flags.unwrap();
    assert!(flags[2]);
    assert_eq!(flags.iter().filter(|&&f| f).count(), 1);

    let r = img.read_all::<f32>(NullCheck::Substitute(-1.0)).unwrap();
    assert_eq!(r.pixels[2], -1.0);
}

#[test]
fn biased_nulls_survive_reopening() {
    let mut img = new_image(
        CompressionOptions::default().null_value(7.0),
        &[4],
        PixelType::U32,
    );
    img.write_image(&[7u32, 8, 4_000_000_000, 7]).unwrap();
    let mut img = TiledImage::open(img.into_store()).unwrap();
    let r = img.read_all::<u32>(NullCheck::Flag).unwrap();
    assert_eq!(r.null_flags, Some(vec![true, false, false, true]));
    assert_eq!(r.pixels[1..3], [8, 4_000_000_000]);
}

#[test]
fn float_nans_read_back_as_nulls() {
    let mut img = new_image(CompressionOptions::default(), &[6], PixelType::F32);
    img.write_image(&[1.0f32, f32::NAN, 3.0, 4.0, f32::NAN, 6.0]).unwrap();
    let r = img.read_all::<f32>(NullCheck::Substitute(-1.0)).unwrap();
    assert!(r.any_null);
    assert_eq!(r.pixels[1], -1.0);
    assert_eq!(r.pixels[4], -1.0);
    assert!((r.pixels[2] - 3.0).abs() < 0.5);
}

#[test]
fn non_finite_tiles_are_stored_raw() {
    let mut img = new_image(
        CompressionOptions::default().tile(&[4, 1]),
        &[4, 3],
        PixelType::F32,
    );
    let data = [
        f32::INFINITY,
        f32::NEG_INFINITY,
        f32::NAN,
        1.0,
        f32::NAN,
        f32::INFINITY,
        f32::NAN,
        f32::NEG_INFINITY,
        1.0,
        2.0,
        3.0,
        4.0,
    ];
    let summary = img.write_image(&data).unwrap();
    assert_eq!(summary.raw_tiles, 2);

    let r = img.read_all::<f32>(NullCheck::Off).unwrap();
    for (got, want) in r.pixels.iter().zip(&data) {
        assert_eq!(got.to_bits(), want.to_bits());
    }
}

// ---------------------------------------------------------------------------
// Quantized floats
// ---------------------------------------------------------------------------

#[test]
fn quantized_floats_read_consistently() {
    let mut rng = Rng(42);
    let mut data = Vec::new();
    for y in 0..10 {
        for x in 0..10 {
            data.push((100.0 + x as f64 + 10.0 * y as f64 + rng.unit()) as f32);
        }
    }
    let mut img = new_image(
        CompressionOptions::new(CompressionAlgorithm::Rice)
            .tile(&[10, 1])
            .quantize_level(16.0),
        &[10, 10],
        PixelType::F32,
    );
    let summary = img.write_image(&data).unwrap();
    assert_eq!(summary.tiles, 10);
    assert_eq!(summary.raw_tiles, 0);

    let full = img.read_all::<f32>(NullCheck::Off).unwrap().pixels;
    for (got, want) in full.iter().zip(&data) {
        assert!((got - want).abs() < 0.5, "{got} vs {want}");
    }

    let s = Section::contiguous(&[2, 3], &[5, 7]).unwrap();
    let part = img.read_section::<f32>(&s, NullCheck::Off).unwrap().pixels;
    assert_eq!(part.len(), 20);
    assert_eq!(part, pick(&full, 10, [2, 3], [5, 7], [1, 1]));
}

// ---------------------------------------------------------------------------
// Partial writes
// ---------------------------------------------------------------------------

#[test]
fn partial_write_across_tile_corners() {
    let mut img = new_image(
        CompressionOptions::new(CompressionAlgorithm::Gzip).tile(&[8, 8]),
        &[16, 16],
        PixelType::I16,
    );
    let base: Vec<i16> = (0..256).collect();
    img.write_image(&base).unwrap();

    let patch = vec![-1i16; 16];
    img.write_pixels(&[7, 7], &[10, 10], &patch).unwrap();

    let r = img.read_all::<i16>(NullCheck::Off).unwrap();
    for y in 1..=16usize {
        for x in 1..=16usize {
            let i = (y - 1) * 16 + (x - 1);
            let inside = (7..=10).contains(&x) && (7..=10).contains(&y);
            assert_eq!(r.pixels[i], if inside { -1 } else { base[i] }, "({x}, {y})");
        }
    }
}

#[test]
fn partial_write_into_an_unwritten_image() {
    let mut img = new_image(
        CompressionOptions::default().tile(&[8, 8]),
        &[8, 8],
        PixelType::I32,
    );
    img.write_pixels(&[3, 3], &[4, 4], &[1i32, 2, 3, 4]).unwrap();
    let r = img.read_all::<i32>(NullCheck::Off).unwrap();
    assert_eq!(r.pixels.iter().filter(|&&v| v != 0).count(), 4);
    assert_eq!(r.pixels[2 * 8 + 2], 1);
    assert_eq!(r.pixels[3 * 8 + 3], 4);
}

#[test]
fn partial_write_checks_its_buffer() {
    let mut img = new_image(CompressionOptions::default(), &[8, 8], PixelType::I32);
    assert!(matches!(
        img.write_pixels(&[1, 1], &[2, 2], &[1i32, 2, 3]),
        Err(Error::InvalidGeometry(_))
    ));
}

// ---------------------------------------------------------------------------
// FITS files
// ---------------------------------------------------------------------------

#[test]
fn fits_file_round_trip() {
    let mut rng = Rng(7);
    let data: Vec<u16> = (0..1200).map(|_| (rng.next() % 65536) as u16).collect();
    let mut img = new_image(
        CompressionOptions::default().tile(&[40, 5]),
        &[40, 30],
        PixelType::U16,
    );
    img.write_image(&data).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("image.fits.fz");
    fits::write_file(&path, img.store()).unwrap();

    let mut back = TiledImage::open(fits::read_file(&path).unwrap()).unwrap();
    assert_eq!(back.naxes(), &[40, 30]);
    assert_eq!(back.descriptor().pixel_type, PixelType::U16);
    assert_eq!(back.read_all::<u16>(NullCheck::Off).unwrap().pixels, data);
    assert_eq!(back.image_header().get_integer("BITPIX"), Some(16));
}

// ---------------------------------------------------------------------------
// External codecs
// ---------------------------------------------------------------------------

/// Stores values as big-endian i32, like a codec that only takes 4-byte
/// integers.
struct WordCodec {
    algorithm: CompressionAlgorithm,
    last_scale: Rc<Cell<f32>>,
}

impl PixelCodec for WordCodec {
    fn algorithm(&self) -> CompressionAlgorithm {
        self.algorithm
    }

    fn accepts(&self, width: ByteWidth) -> bool {
        width == ByteWidth::Four
    }

    fn max_encoded_len(&self, count: usize, _: ByteWidth, _: &CodecParams) -> usize {
        count * 4
    }

    fn encode(
        &self,
        values: &[i32],
        _: ByteWidth,
        params: &CodecParams,
    ) -> fitsio_tilecomp::Result<Vec<u8>> {
        self.last_scale.set(params.hcomp_scale);
        Ok(values.iter().flat_map(|v| v.to_be_bytes()).collect())
    }

    fn decode(
        &self,
        bytes: &[u8],
        count: usize,
        _: ByteWidth,
        _: &CodecParams,
    ) -> fitsio_tilecomp::Result<Vec<i32>> {
        if bytes.len() != count * 4 {
            return Err(Error::DecompressionFailed(format!("{} bytes", bytes.len())));
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|c| i32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}

fn word_codec(algorithm: CompressionAlgorithm) -> (Box<WordCodec>, Rc<Cell<f32>>) {
    let scale = Rc::new(Cell::new(f32::NAN));
    let codec = Box::new(WordCodec {
        algorithm,
        last_scale: Rc::clone(&scale),
    });
    (codec, scale)
}

#[test]
fn plio_codec_plugs_in() {
    let mut img = new_image(
        CompressionOptions::new(CompressionAlgorithm::Plio),
        &[6],
        PixelType::I32,
    );
    let (codec, _) = word_codec(CompressionAlgorithm::Plio);
    img.register_codec(codec);

    let data = [0i32, 1, 2, 16_777_215, 5, 6];
    img.write_image(&data).unwrap();
    assert_eq!(img.read_all::<i32>(NullCheck::Off).unwrap().pixels, data);

    let err = img.write_image(&[0i32, -1, 0, 0, 0, 0]).unwrap_err();
    assert!(matches!(err.root(), Error::CompressionFailed(_)));
    assert!(err.location().is_some());
}

#[test]
fn hcompress_scale_is_made_absolute() {
    let mut img = new_image(
        CompressionOptions::new(CompressionAlgorithm::Hcompress).hcompress(-2.5, false),
        &[16, 16],
        PixelType::I16,
    );
    let (codec, scale) = word_codec(CompressionAlgorithm::Hcompress);
    img.register_codec(codec);

    let data: Vec<i16> = (0..256).map(|i| (i % 37) as i16).collect();
    img.write_image(&data).unwrap();
    assert_eq!(scale.get(), 2.5);
    assert_eq!(img.read_all::<i16>(NullCheck::Off).unwrap().pixels, data);
    assert!(img.store().header().get_string("ZNAME1").is_some());
}

#[test]
fn missing_codec_is_reported() {
    let mut img = new_image(
        CompressionOptions::new(CompressionAlgorithm::Plio),
        &[4],
        PixelType::I32,
    );
    assert!(matches!(
        img.write_image(&[1i32, 2, 3, 4]),
        Err(Error::CodecUnavailable(CompressionAlgorithm::Plio))
    ));
}
