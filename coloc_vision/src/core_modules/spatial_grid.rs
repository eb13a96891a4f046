// THEORY:
// The `SpatialGrid` partitions the image plane into square buckets whose side is
// the largest expected cell diameter. Every overlay region is registered in each
// bucket its bounding box touches, so a base region only has to look at the
// buckets under its own bounding box to find every overlay region that could
// possibly overlap it.
//
// Key architectural principles:
// 1.  **Index Arena**: Buckets store integer indices into the caller's region
//     list, never references. The grid is built for one matching call and
//     dropped at its end; nothing is cached across calls.
// 2.  **Registration Order**: Regions are registered in list order, so each
//     bucket's contents are ascending. `candidates` returns the de-duplicated
//     union in that same ascending order, which is what makes matching
//     deterministic.
// 3.  **Clamped Edges**: Bounding boxes that spill past the image border are
//     clamped into the outermost buckets rather than dropped.

use crate::core_modules::region::BoundingBox;
use crate::error::ConfigError;
use std::num::NonZeroU32;

/// A uniform bucket grid over one image, holding region indices.
#[derive(Debug, Clone)]
pub struct SpatialGrid {
    /// Side length of a bucket in pixels.
    bucket_size: u32,
    /// Number of bucket columns, `ceil(image_width / bucket_size)`.
    grid_width: u32,
    /// Number of bucket rows, `ceil(image_height / bucket_size)`.
    grid_height: u32,
    /// Row-major buckets, each a list of registered region indices.
    buckets: Vec<Vec<usize>>,
}

impl SpatialGrid {
    /// Creates an empty grid for an image of the given size.
    pub fn new(image_width: u32, image_height: u32, bucket_size: u32) -> Result<Self, ConfigError> {
        let bucket_size = NonZeroU32::new(bucket_size).ok_or(ConfigError::NonPositiveBucketSize)?;
        Ok(Self::with_bucket_size(image_width, image_height, bucket_size))
    }

    pub fn with_bucket_size(image_width: u32, image_height: u32, bucket_size: NonZeroU32) -> Self {
        let bucket_size = bucket_size.get();
        let grid_width = image_width.div_ceil(bucket_size).max(1);
        let grid_height = image_height.div_ceil(bucket_size).max(1);
        Self {
            bucket_size,
            grid_width,
            grid_height,
            buckets: vec![Vec::new(); (grid_width * grid_height) as usize],
        }
    }

    /// Builds a grid and registers every bounding box under its position in the iterator.
    pub fn from_boxes<I>(image_width: u32, image_height: u32, bucket_size: u32, boxes: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = BoundingBox>,
    {
        let mut grid = Self::new(image_width, image_height, bucket_size)?;
        for (index, bbox) in boxes.into_iter().enumerate() {
            grid.insert(index, &bbox);
        }
        Ok(grid)
    }

    pub fn grid_width(&self) -> u32 {
        self.grid_width
    }

    pub fn grid_height(&self) -> u32 {
        self.grid_height
    }

    pub fn bucket_size(&self) -> u32 {
        self.bucket_size
    }

    /// Registers `index` in every bucket the bounding box intersects.
    pub fn insert(&mut self, index: usize, bbox: &BoundingBox) {
        let Some((columns, rows)) = self.bucket_span(bbox) else {
            return;
        };
        for row in rows {
            for column in columns.clone() {
                self.buckets[(row * self.grid_width + column) as usize].push(index);
            }
        }
    }

    /// The flat index of the bucket holding pixel `(x, y)`, if it lies on the grid.
    pub fn bucket_of(&self, x: u32, y: u32) -> Option<usize> {
        let column = x / self.bucket_size;
        let row = y / self.bucket_size;
        if column >= self.grid_width || row >= self.grid_height {
            return None;
        }
        Some((row * self.grid_width + column) as usize)
    }

    /// Indices registered in a single bucket.
    pub fn bucket(&self, bucket_index: usize) -> &[usize] {
        self.buckets.get(bucket_index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// De-duplicated, ascending union of the indices registered in every bucket
    /// the bounding box intersects.
    pub fn candidates(&self, bbox: &BoundingBox) -> Vec<usize> {
        let Some((columns, rows)) = self.bucket_span(bbox) else {
            return Vec::new();
        };
        let mut found = Vec::new();
        for row in rows {
            for column in columns.clone() {
                found.extend_from_slice(&self.buckets[(row * self.grid_width + column) as usize]);
            }
        }
        found.sort_unstable();
        found.dedup();
        found
    }

    /// Column and row ranges covered by a bounding box, clamped to the grid.
    fn bucket_span(
        &self,
        bbox: &BoundingBox,
    ) -> Option<(std::ops::RangeInclusive<u32>, std::ops::RangeInclusive<u32>)> {
        if bbox.width == 0 || bbox.height == 0 {
            return None;
        }
        let size = self.bucket_size as u64;
        let clamp_col = |v: u64| (v / size).min(self.grid_width as u64 - 1) as u32;
        let clamp_row = |v: u64| (v / size).min(self.grid_height as u64 - 1) as u32;
        let columns = clamp_col(bbox.x as u64)..=clamp_col(bbox.right() - 1);
        let rows = clamp_row(bbox.y as u64)..=clamp_row(bbox.bottom() - 1);
        Some((columns, rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: u32, y: u32, width: u32, height: u32) -> BoundingBox {
        BoundingBox { x, y, width, height }
    }

    #[test]
    fn grid_dimensions_round_up() {
        let grid = SpatialGrid::new(105, 40, 10).expect("valid grid");
        assert_eq!(grid.grid_width(), 11);
        assert_eq!(grid.grid_height(), 4);
    }

    #[test]
    fn a_non_zero_bucket_size_needs_no_validation() {
        let size = NonZeroU32::new(10).expect("non-zero");
        let grid = SpatialGrid::with_bucket_size(105, 40, size);
        assert_eq!((grid.grid_width(), grid.grid_height()), (11, 4));
        assert_eq!(grid.bucket_size(), 10);
    }

    #[test]
    fn zero_bucket_size_is_a_configuration_error() {
        assert_eq!(
            SpatialGrid::new(100, 100, 0).unwrap_err(),
            ConfigError::NonPositiveBucketSize
        );
    }

    #[test]
    fn a_region_spanning_two_buckets_is_found_from_either() {
        let mut grid = SpatialGrid::new(100, 100, 10).expect("valid grid");
        // Straddles the border between bucket columns 0 and 1 on row 0.
        grid.insert(7, &bbox(6, 2, 8, 4));

        let left = grid.bucket_of(0, 0).expect("on grid");
        let right = grid.bucket_of(10, 0).expect("on grid");
        assert_eq!(grid.bucket(left), &[7]);
        assert_eq!(grid.bucket(right), &[7]);

        assert_eq!(grid.candidates(&bbox(0, 0, 3, 3)), vec![7]);
        assert_eq!(grid.candidates(&bbox(15, 5, 3, 3)), vec![7]);
        assert!(grid.candidates(&bbox(25, 5, 3, 3)).is_empty());
    }

    #[test]
    fn candidates_are_unique_and_in_registration_order() {
        let grid = SpatialGrid::from_boxes(
            100,
            100,
            10,
            vec![bbox(0, 0, 25, 25), bbox(12, 12, 2, 2), bbox(50, 50, 5, 5)],
        )
        .expect("valid grid");

        assert_eq!(grid.candidates(&bbox(5, 5, 10, 10)), vec![0, 1]);
    }

    #[test]
    fn boxes_past_the_border_land_in_edge_buckets() {
        let mut grid = SpatialGrid::new(30, 30, 10).expect("valid grid");
        grid.insert(0, &bbox(28, 28, 10, 10));
        let corner = grid.bucket_of(29, 29).expect("on grid");
        assert_eq!(grid.bucket(corner), &[0]);
        assert_eq!(grid.bucket_of(30, 0), None);
    }

    #[test]
    fn empty_boxes_are_never_registered() {
        let mut grid = SpatialGrid::new(30, 30, 10).expect("valid grid");
        grid.insert(0, &bbox(5, 5, 0, 4));
        assert!(grid.candidates(&bbox(0, 0, 30, 30)).is_empty());
    }
}
