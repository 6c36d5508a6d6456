//! The last decompressed tile.
//!
//! Reads that walk a section tile by tile, or several small reads that land
//! in the same tile, decode it only once. The cache holds exactly one tile
//! and belongs to a single [`DecompressionEngine`](crate::DecompressionEngine).

use alloc::vec::Vec;

use crate::convert::NullCheck;
use crate::pixel::{Pixel, PixelBuffer, PixelType};

/// How nulls were reported when the cached tile was decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum NullMode {
    Off,
    /// Substitute value, compared bitwise so NaN matches NaN.
    Substitute(u64),
    Flag,
}

/// Identifies a decoded tile: the row it came from, the output element type
/// and the null handling it was decoded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileKey {
    row: usize,
    pixel_type: PixelType,
    mode: NullMode,
}

impl TileKey {
    pub fn new<T: Pixel>(row: usize, check: &NullCheck<T>) -> TileKey {
        let mode = match check {
            NullCheck::Off => NullMode::Off,
            NullCheck::Substitute(v) => NullMode::Substitute(v.to_f64().to_bits()),
            NullCheck::Flag => NullMode::Flag,
        };
        TileKey {
            row,
            pixel_type: T::TYPE,
            mode,
        }
    }

    pub fn row(&self) -> usize {
        self.row
    }
}

/// A decoded tile.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedTile {
    pub pixels: PixelBuffer,
    pub flags: Option<Vec<bool>>,
    pub any_null: bool,
    pub overflow: bool,
}

/// Single-entry tile cache.
#[derive(Debug, Default)]
pub struct TileCache {
    entry: Option<(TileKey, CachedTile)>,
    hits: u64,
    misses: u64,
}

impl TileCache {
    pub fn new() -> TileCache {
        TileCache::default()
    }

    /// The cached tile, if it matches `key`.
    pub fn get(&mut self, key: &TileKey) -> Option<&CachedTile> {
        match &self.entry {
            Some((k, tile)) if k == key => {
                self.hits += 1;
                log::trace!("tile cache hit: row {}", key.row);
                Some(tile)
            }
            _ => {
                self.misses += 1;
                log::trace!("tile cache miss: row {}", key.row);
                None
            }
        }
    }

    /// The tile for `key`, decoding it with `decode` on a miss.
    ///
    /// A failed decode leaves the previous entry in place.
    pub fn get_or_try_insert<E, F>(&mut self, key: TileKey, decode: F) -> Result<&CachedTile, E>
    where
        F: FnOnce() -> Result<CachedTile, E>,
    {
        let entry = match self.entry.take() {
            Some((k, tile)) if k == key => {
                self.hits += 1;
                log::trace!("tile cache hit: row {}", key.row);
                (k, tile)
            }
            previous => {
                self.misses += 1;
                log::trace!("tile cache miss: row {}", key.row);
                match decode() {
                    Ok(tile) => (key, tile),
                    Err(e) => {
                        self.entry = previous;
                        return Err(e);
                    }
                }
            }
        };
        Ok(&self.entry.insert(entry).1)
    }

    /// Replace the cached tile.
    pub fn put(&mut self, key: TileKey, tile: CachedTile) {
        self.entry = Some((key, tile));
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
    }

    /// Drop the cached tile if it came from `row`.
    pub fn invalidate_row(&mut self, row: usize) {
        if self.row() == Some(row) {
            self.entry = None;
        }
    }

    /// Row of the cached tile.
    pub fn row(&self) -> Option<usize> {
        self.entry.as_ref().map(|(k, _)| k.row)
    }

    /// Lookups served from the cache and lookups that missed.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn tile(values: Vec<i16>) -> CachedTile {
        CachedTile {
            pixels: PixelBuffer::I16(values),
            flags: None,
            any_null: false,
            overflow: false,
        }
    }

    #[test]
    fn hit_requires_same_row_type_and_mode() {
        let mut cache = TileCache::new();
        let key = TileKey::new::<i16>(3, &NullCheck::Off);
        cache.put(key, tile(vec![1, 2]));
        assert!(cache.get(&key).is_some());
        assert!(cache.get(&TileKey::new::<i16>(4, &NullCheck::Off)).is_none());
        assert!(cache.get(&TileKey::new::<i32>(3, &NullCheck::Off)).is_none());
        assert!(cache.get(&TileKey::new::<i16>(3, &NullCheck::Flag)).is_none());
        assert_eq!(cache.stats(), (1, 3));
    }

    #[test]
    fn nan_substitute_matches_itself() {
        let a = TileKey::new::<f32>(1, &NullCheck::Substitute(f32::NAN));
        let b = TileKey::new::<f32>(1, &NullCheck::Substitute(f32::NAN));
        assert_eq!(a, b);
        assert_ne!(a, TileKey::new::<f32>(1, &NullCheck::Substitute(0.0)));
    }

    #[test]
    fn holds_one_tile() {
        let mut cache = TileCache::new();
        let a = TileKey::new::<i16>(1, &NullCheck::Off);
        let b = TileKey::new::<i16>(2, &NullCheck::Off);
        cache.put(a, tile(vec![1]));
        cache.put(b, tile(vec![2]));
        assert!(cache.get(&a).is_none());
        assert_eq!(cache.row(), Some(2));
    }

    #[test]
    fn failed_decode_keeps_previous_entry() {
        let mut cache = TileCache::new();
        let a = TileKey::new::<i16>(1, &NullCheck::Off);
        let b = TileKey::new::<i16>(2, &NullCheck::Off);
        cache.put(a, tile(vec![1]));
        let r: Result<&CachedTile, &str> = cache.get_or_try_insert(b, || Err("bad tile"));
        assert_eq!(r.unwrap_err(), "bad tile");
        assert_eq!(cache.row(), Some(1));

        let mut calls = 0;
        for _ in 0..2 {
            let t: Result<&CachedTile, ()> = cache.get_or_try_insert(b, || {
                calls += 1;
                Ok(tile(vec![2]))
            });
            assert_eq!(t.unwrap().pixels, PixelBuffer::I16(vec![2]));
        }
        assert_eq!(calls, 1);
        assert_eq!(cache.stats(), (1, 2));
    }

    #[test]
    fn invalidate_row_only_matches_its_row() {
        let mut cache = TileCache::new();
        cache.put(TileKey::new::<i16>(5, &NullCheck::Off), tile(vec![0]));
        cache.invalidate_row(4);
        assert_eq!(cache.row(), Some(5));
        cache.invalidate_row(5);
        assert_eq!(cache.row(), None);
    }
}
