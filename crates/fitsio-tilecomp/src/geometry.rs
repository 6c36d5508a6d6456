//! Tile geometry: how an N-dimensional image is cut into tiles, and how tiles
//! map to table rows.
//!
//! Pixel coordinates are 1-based and inclusive, matching FITS conventions.
//! Tile indices are 0-based. Dimension 0 is the fastest-varying axis, so tile
//! rows are numbered with dimension 0 innermost.

use alloc::vec;
use alloc::vec::Vec;

use crate::error::{Error, Result};

/// Largest image dimensionality the tiled format supports.
pub const MAX_DIM: usize = 6;

/// Candidate H-compress tile heights, in order of preference.
const HCOMPRESS_ROW_CHOICES: [usize; 9] = [16, 24, 20, 30, 28, 26, 22, 18, 14];

/// Position of a tile in the tile grid, 0-based per dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileIndex(pub Vec<usize>);

/// First and last pixel (1-based, inclusive) of a tile, clipped to the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileExtent {
    pub first: Vec<usize>,
    pub last: Vec<usize>,
}

impl TileExtent {
    /// Pixel count per dimension.
    pub fn shape(&self) -> Vec<usize> {
        self.first
            .iter()
            .zip(&self.last)
            .map(|(&f, &l)| l - f + 1)
            .collect()
    }

    /// Total pixel count.
    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, pixel: &[usize]) -> bool {
        pixel.len() == self.first.len()
            && pixel
                .iter()
                .zip(self.first.iter().zip(&self.last))
                .all(|(&p, (&f, &l))| f <= p && p <= l)
    }
}

/// A requested pixel rectangle with a per-dimension sampling stride.
///
/// `first <= last` always holds after construction. A request given with
/// `first > last` in some dimension is stored with the bounds swapped and a
/// negative stride, meaning the output runs in mirrored order along that
/// dimension. The sampled lattice is anchored on the lower bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    first: Vec<usize>,
    last: Vec<usize>,
    stride: Vec<isize>,
}

impl Section {
    /// Build a section from 1-based bounds and positive strides.
    pub fn new(first: &[usize], last: &[usize], stride: &[usize]) -> Result<Section> {
        let n = first.len();
        if n == 0 || n > MAX_DIM || last.len() != n || stride.len() != n {
            return Err(Error::InvalidGeometry(
                "section bounds and strides must share a dimensionality of 1 to 6",
            ));
        }
        let mut section = Section {
            first: Vec::with_capacity(n),
            last: Vec::with_capacity(n),
            stride: Vec::with_capacity(n),
        };
        for d in 0..n {
            if first[d] == 0 || last[d] == 0 {
                return Err(Error::InvalidGeometry("pixel coordinates are 1-based"));
            }
            if stride[d] == 0 {
                return Err(Error::InvalidGeometry("stride must be at least 1"));
            }
            let step = stride[d] as isize;
            if first[d] > last[d] {
                section.first.push(last[d]);
                section.last.push(first[d]);
                section.stride.push(-step);
            } else {
                section.first.push(first[d]);
                section.last.push(last[d]);
                section.stride.push(step);
            }
        }
        Ok(section)
    }

    /// A unit-stride section spanning `first..=last`.
    pub fn contiguous(first: &[usize], last: &[usize]) -> Result<Section> {
        Section::new(first, last, &vec![1; first.len()])
    }

    /// The whole image.
    pub fn full(naxes: &[usize]) -> Section {
        Section {
            first: vec![1; naxes.len()],
            last: naxes.to_vec(),
            stride: vec![1; naxes.len()],
        }
    }

    /// The exact pixel rectangle of a tile.
    pub fn from_extent(extent: &TileExtent) -> Section {
        Section {
            first: extent.first.clone(),
            last: extent.last.clone(),
            stride: vec![1; extent.first.len()],
        }
    }

    pub fn first(&self) -> &[usize] {
        &self.first
    }

    pub fn last(&self) -> &[usize] {
        &self.last
    }

    pub fn stride(&self) -> &[isize] {
        &self.stride
    }

    pub fn ndim(&self) -> usize {
        self.first.len()
    }

    /// Number of sampled pixels per dimension.
    pub fn shape(&self) -> Vec<usize> {
        (0..self.ndim())
            .map(|d| (self.last[d] - self.first[d]) / self.stride[d].unsigned_abs() + 1)
            .collect()
    }

    /// Total number of sampled pixels.
    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whole runs along dimension 0 can be copied at once only when that
    /// dimension is read forward with unit stride.
    pub fn contiguous_rows(&self) -> bool {
        self.stride.first() == Some(&1)
    }
}

/// The inclusive box of tile indices overlapping a section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRange {
    pub first: Vec<usize>,
    pub last: Vec<usize>,
}

impl TileRange {
    /// Iterate the tile indices in the range, dimension 0 fastest.
    pub fn iter(&self) -> impl Iterator<Item = TileIndex> + '_ {
        let total: usize = self
            .first
            .iter()
            .zip(&self.last)
            .map(|(&f, &l)| l - f + 1)
            .product();
        (0..total).map(move |mut k| {
            let mut index = Vec::with_capacity(self.first.len());
            for (&f, &l) in self.first.iter().zip(&self.last) {
                let span = l - f + 1;
                index.push(f + k % span);
                k /= span;
            }
            TileIndex(index)
        })
    }
}

/// The tiling of one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileGeometry {
    naxes: Vec<usize>,
    tile: Vec<usize>,
    counts: Vec<usize>,
}

impl TileGeometry {
    /// Tile an image of extent `naxes` with the requested tile shape.
    ///
    /// A request of 0 in a dimension means the full image extent. Dimensions
    /// beyond the end of `tile_request` default to 1.
    pub fn new(naxes: &[usize], tile_request: &[usize]) -> Result<TileGeometry> {
        check_naxes(naxes)?;
        if tile_request.len() > naxes.len() {
            return Err(Error::InvalidGeometry(
                "tile shape has more dimensions than the image",
            ));
        }
        let tile: Vec<usize> = naxes
            .iter()
            .enumerate()
            .map(|(d, &n)| match tile_request.get(d).copied().unwrap_or(1) {
                0 => n,
                t => t,
            })
            .collect();
        Ok(TileGeometry::from_parts(naxes, tile))
    }

    /// Tile an image for H-compress, which is inherently two-dimensional.
    ///
    /// `[0, 0, ..]` compresses the whole plane as one tile. `[0, 1, ..]`
    /// (row tiling) is replaced by full-width tiles of a height chosen so the
    /// last tile keeps at least 4 rows. The first two tile dimensions must be
    /// at least 4 and no edge tile may be thinner than 4 pixels; a tile one
    /// pixel larger is tried before giving up.
    pub fn for_hcompress(naxes: &[usize], tile_request: &[usize]) -> Result<TileGeometry> {
        check_naxes(naxes)?;
        if naxes.len() < 2 {
            return Err(Error::InvalidGeometry(
                "H-compress cannot be used with 1-dimensional images",
            ));
        }
        if naxes[0] < 4 || naxes[1] < 4 {
            return Err(Error::InvalidGeometry(
                "H-compress minimum image dimension is 4 pixels",
            ));
        }
        if tile_request.len() > naxes.len() {
            return Err(Error::InvalidGeometry(
                "tile shape has more dimensions than the image",
            ));
        }

        let mut tile: Vec<usize> = (0..naxes.len())
            .map(|d| tile_request.get(d).copied().unwrap_or(1))
            .collect();
        match (tile[0], tile[1]) {
            (0, 0) => {
                tile[0] = naxes[0];
                tile[1] = naxes[1];
                tile[2..].iter_mut().for_each(|t| *t = 1);
            }
            (0, 1) => {
                tile[0] = naxes[0];
                tile[1] = hcompress_rows(naxes[1]);
            }
            _ => {}
        }
        for (t, &n) in tile.iter_mut().zip(naxes) {
            if *t == 0 {
                *t = n;
            }
        }
        if tile[0] < 4 || tile[1] < 4 {
            return Err(Error::InvalidGeometry(
                "H-compress minimum tile dimension is 4 pixels",
            ));
        }
        for d in 0..2 {
            if thin_edge(naxes[d], tile[d]) {
                tile[d] += 1;
                if thin_edge(naxes[d], tile[d]) {
                    return Err(Error::InvalidGeometry(
                        "last H-compress tile would have fewer than 4 pixels",
                    ));
                }
            }
        }
        Ok(TileGeometry::from_parts(naxes, tile))
    }

    fn from_parts(naxes: &[usize], tile: Vec<usize>) -> TileGeometry {
        let counts = naxes
            .iter()
            .zip(&tile)
            .map(|(&n, &t)| (n - 1) / t + 1)
            .collect();
        TileGeometry {
            naxes: naxes.to_vec(),
            tile,
            counts,
        }
    }

    pub fn ndim(&self) -> usize {
        self.naxes.len()
    }

    pub fn naxes(&self) -> &[usize] {
        &self.naxes
    }

    /// Nominal tile shape. Edge tiles may be smaller.
    pub fn tile_shape(&self) -> &[usize] {
        &self.tile
    }

    /// Number of tiles along each dimension.
    pub fn tile_counts(&self) -> &[usize] {
        &self.counts
    }

    pub fn num_tiles(&self) -> usize {
        self.counts.iter().product()
    }

    /// Pixel count of a full (unclipped) tile.
    pub fn max_tile_len(&self) -> usize {
        self.naxes
            .iter()
            .zip(&self.tile)
            .map(|(&n, &t)| n.min(t))
            .product()
    }

    /// Total pixel count of the image.
    pub fn image_len(&self) -> usize {
        self.naxes.iter().product()
    }

    /// The tile holding a 1-based pixel coordinate.
    pub fn tile_index_of(&self, pixel: &[usize]) -> Result<TileIndex> {
        if pixel.len() != self.ndim() {
            return Err(Error::InvalidGeometry("pixel has the wrong dimensionality"));
        }
        pixel
            .iter()
            .zip(self.naxes.iter().zip(&self.tile))
            .map(|(&p, (&n, &t))| {
                if p == 0 || p > n {
                    Err(Error::InvalidGeometry("pixel lies outside the image"))
                } else {
                    Ok((p - 1) / t)
                }
            })
            .collect::<Result<Vec<_>>>()
            .map(TileIndex)
    }

    /// Pixel extent of a tile, clipped to the image.
    pub fn extent_of(&self, index: &TileIndex) -> TileExtent {
        let first: Vec<usize> = index.0.iter().zip(&self.tile).map(|(&i, &t)| i * t + 1).collect();
        let last = first
            .iter()
            .zip(self.tile.iter().zip(&self.naxes))
            .map(|(&f, (&t, &n))| (f + t - 1).min(n))
            .collect();
        TileExtent { first, last }
    }

    /// 1-based table row of a tile.
    pub fn row_of(&self, index: &TileIndex) -> usize {
        let mut row = 0;
        let mut scale = 1;
        for (&i, &c) in index.0.iter().zip(&self.counts) {
            row += i * scale;
            scale *= c;
        }
        row + 1
    }

    /// Inverse of [`TileGeometry::row_of`].
    pub fn index_of_row(&self, row: usize) -> Result<TileIndex> {
        if row == 0 || row > self.num_tiles() {
            return Err(Error::InvalidGeometry("row lies outside the tile grid"));
        }
        let mut k = row - 1;
        let index = self
            .counts
            .iter()
            .map(|&c| {
                let i = k % c;
                k /= c;
                i
            })
            .collect();
        Ok(TileIndex(index))
    }

    /// Every tile in row order.
    pub fn tiles(&self) -> impl Iterator<Item = TileIndex> + '_ {
        (1..=self.num_tiles()).map(move |row| {
            let mut k = row - 1;
            TileIndex(
                self.counts
                    .iter()
                    .map(|&c| {
                        let i = k % c;
                        k /= c;
                        i
                    })
                    .collect(),
            )
        })
    }

    /// The box of tiles that can contain any pixel selected by `section`.
    pub fn covering(&self, section: &Section) -> Result<TileRange> {
        if section.ndim() != self.ndim() {
            return Err(Error::InvalidGeometry("section has the wrong dimensionality"));
        }
        if section.last().iter().zip(&self.naxes).any(|(&l, &n)| l > n) {
            return Err(Error::InvalidGeometry("section lies outside the image"));
        }
        let mut range = TileRange {
            first: Vec::with_capacity(self.ndim()),
            last: Vec::with_capacity(self.ndim()),
        };
        for d in 0..self.ndim() {
            let t = self.tile[d];
            range.first.push((section.first()[d] - 1) / t);
            range
                .last
                .push(((section.last()[d] - 1) / t).min(self.counts[d] - 1));
        }
        Ok(range)
    }
}

fn check_naxes(naxes: &[usize]) -> Result<()> {
    if naxes.is_empty() || naxes.len() > MAX_DIM {
        return Err(Error::InvalidGeometry(
            "number of dimensions must be between 1 and 6",
        ));
    }
    if naxes.contains(&0) {
        return Err(Error::InvalidGeometry("image dimensions must be positive"));
    }
    Ok(())
}

/// True when the last tile along an axis would be 1 to 3 pixels wide.
fn thin_edge(n: usize, t: usize) -> bool {
    let remain = n % t;
    remain > 0 && remain < 4
}

fn hcompress_rows(nrows: usize) -> usize {
    if nrows <= 30 {
        return nrows;
    }
    HCOMPRESS_ROW_CHOICES
        .iter()
        .copied()
        .find(|&k| nrows % k == 0 || nrows % k > 3)
        .unwrap_or(17)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_row_tiling() {
        let g = TileGeometry::new(&[10, 10], &[0, 1]).unwrap();
        assert_eq!(g.tile_shape(), &[10, 1]);
        assert_eq!(g.tile_counts(), &[1, 10]);
        assert_eq!(g.num_tiles(), 10);
        assert_eq!(g.max_tile_len(), 10);
    }

    #[test]
    fn missing_request_dims_are_one() {
        let g = TileGeometry::new(&[7, 5, 3], &[0]).unwrap();
        assert_eq!(g.tile_shape(), &[7, 1, 1]);
        assert_eq!(g.num_tiles(), 15);
    }

    #[test]
    fn rejects_bad_dimensionality() {
        assert!(TileGeometry::new(&[], &[]).is_err());
        assert!(TileGeometry::new(&[2; 7], &[]).is_err());
        assert!(TileGeometry::new(&[4, 0], &[]).is_err());
        assert!(TileGeometry::new(&[4, 4], &[1, 1, 1]).is_err());
    }

    #[test]
    fn edge_tiles_are_clipped() {
        let g = TileGeometry::new(&[10, 7], &[4, 3]).unwrap();
        assert_eq!(g.tile_counts(), &[3, 3]);
        let edge = g.extent_of(&TileIndex(vec![2, 2]));
        assert_eq!(edge.first, vec![9, 7]);
        assert_eq!(edge.last, vec![10, 7]);
        assert_eq!(edge.shape(), vec![2, 1]);
    }

    #[test]
    fn row_numbering_dimension_zero_fastest() {
        let g = TileGeometry::new(&[10, 7], &[4, 3]).unwrap();
        assert_eq!(g.row_of(&TileIndex(vec![0, 0])), 1);
        assert_eq!(g.row_of(&TileIndex(vec![2, 0])), 3);
        assert_eq!(g.row_of(&TileIndex(vec![0, 1])), 4);
        assert_eq!(g.row_of(&TileIndex(vec![2, 2])), 9);
        for row in 1..=g.num_tiles() {
            assert_eq!(g.row_of(&g.index_of_row(row).unwrap()), row);
        }
        assert!(g.index_of_row(0).is_err());
        assert!(g.index_of_row(10).is_err());
    }

    #[test]
    fn tiles_iterate_in_row_order() {
        let g = TileGeometry::new(&[5, 5, 2], &[2, 3, 1]).unwrap();
        let rows: Vec<usize> = g.tiles().map(|t| g.row_of(&t)).collect();
        let expected: Vec<usize> = (1..=g.num_tiles()).collect();
        assert_eq!(rows, expected);
    }

    #[test]
    fn tile_index_of_pixel() {
        let g = TileGeometry::new(&[10, 7], &[4, 3]).unwrap();
        assert_eq!(g.tile_index_of(&[1, 1]).unwrap(), TileIndex(vec![0, 0]));
        assert_eq!(g.tile_index_of(&[5, 3]).unwrap(), TileIndex(vec![1, 0]));
        assert_eq!(g.tile_index_of(&[10, 7]).unwrap(), TileIndex(vec![2, 2]));
        assert!(g.tile_index_of(&[11, 1]).is_err());
        assert!(g.tile_index_of(&[0, 1]).is_err());
    }

    #[test]
    fn mirrored_section_is_normalised() {
        let s = Section::new(&[5, 2], &[2, 6], &[1, 2]).unwrap();
        assert_eq!(s.first(), &[2, 2]);
        assert_eq!(s.last(), &[5, 6]);
        assert_eq!(s.stride(), &[-1, 2]);
        assert_eq!(s.shape(), vec![4, 3]);
        assert!(!s.contiguous_rows());
    }

    #[test]
    fn covering_range() {
        let g = TileGeometry::new(&[10, 10], &[4, 4]).unwrap();
        let s = Section::contiguous(&[3, 5], &[9, 6]).unwrap();
        let r = g.covering(&s).unwrap();
        assert_eq!(r.first, vec![0, 1]);
        assert_eq!(r.last, vec![2, 1]);
        let tiles: Vec<TileIndex> = r.iter().collect();
        assert_eq!(
            tiles,
            vec![
                TileIndex(vec![0, 1]),
                TileIndex(vec![1, 1]),
                TileIndex(vec![2, 1])
            ]
        );
        let outside = Section::contiguous(&[1, 1], &[11, 1]).unwrap();
        assert!(g.covering(&outside).is_err());
    }

    #[test]
    fn hcompress_whole_image() {
        let g = TileGeometry::for_hcompress(&[20, 12, 3], &[0, 0, 5]).unwrap();
        assert_eq!(g.tile_shape(), &[20, 12, 1]);
    }

    #[test]
    fn hcompress_row_heuristic() {
        let g = TileGeometry::for_hcompress(&[100, 25], &[0, 1]).unwrap();
        assert_eq!(g.tile_shape(), &[100, 25]);
        // 100 % 16 == 4 keeps a 4-row edge tile
        let g = TileGeometry::for_hcompress(&[64, 100], &[0, 1]).unwrap();
        assert_eq!(g.tile_shape(), &[64, 16]);
        // 50 % 16 == 2 rejects 16, 50 % 24 == 2 rejects 24, 50 % 20 == 10 accepts
        let g = TileGeometry::for_hcompress(&[64, 50], &[0, 1]).unwrap();
        assert_eq!(g.tile_shape(), &[64, 20]);
    }

    #[test]
    fn hcompress_enlarges_once() {
        // 33 % 10 == 3, 33 % 11 == 0
        let g = TileGeometry::for_hcompress(&[33, 40], &[10, 10]).unwrap();
        assert_eq!(g.tile_shape(), &[11, 10]);
        // 34 % 10 == 4 is fine, 41 % 10 == 1 and 41 % 11 == 8
        let g = TileGeometry::for_hcompress(&[34, 41], &[10, 10]).unwrap();
        assert_eq!(g.tile_shape(), &[10, 11]);
        // 22 % 9 == 4 ok; 13 % 5 == 3 then 13 % 6 == 1
        assert!(TileGeometry::for_hcompress(&[22, 13], &[9, 5]).is_err());
    }

    #[test]
    fn hcompress_rejects_small() {
        assert!(TileGeometry::for_hcompress(&[16], &[0]).is_err());
        assert!(TileGeometry::for_hcompress(&[3, 16], &[0, 1]).is_err());
        assert!(TileGeometry::for_hcompress(&[16, 16], &[3, 8]).is_err());
    }
}
