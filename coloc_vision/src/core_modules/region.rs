// THEORY:
// A `Region` is one segmented cell: a bounding box in image space plus a boolean
// membership mask laid out row-major in the box's local coordinates. It carries
// no intensity data and knows nothing about which channel produced it, so the
// same type flows through filtering, matching and statistics for every channel.
//
// Key architectural principles:
// 1.  **Immutable Data Container**: Once built, a region never changes. Matching
//     and statistics borrow regions; nothing in the engine owns or edits them.
// 2.  **Validated at the Border**: The only way in is through a constructor that
//     checks the mask covers the bounding box exactly. A mismatch means the
//     segmentation collaborator is broken, and the caller gets a geometry error.
// 3.  **Cheap Membership**: `contains` is a bounds check and a single index, which
//     is what the comparators call once per overlay pixel.

use crate::core_modules::intensity_image::IntensityImage;
use crate::error::{ColocError, Result};
use image::{GrayImage, ImageBuffer, Luma};
use std::collections::BTreeMap;

/// A 2D point in image space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

/// An axis-aligned rectangle, origin at its top-left pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// One past the right-most column.
    pub fn right(&self) -> u64 {
        self.x as u64 + self.width as u64
    }

    /// One past the bottom-most row.
    pub fn bottom(&self) -> u64 {
        self.y as u64 + self.height as u64
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        (self.x as u64) < other.right()
            && (other.x as u64) < self.right()
            && (self.y as u64) < other.bottom()
            && (other.y as u64) < self.bottom()
    }

    pub fn as_tuple(&self) -> (u32, u32, u32, u32) {
        (self.x, self.y, self.width, self.height)
    }
}

/// A segmented cell: bounding box plus pixel membership mask.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    /// Top-left corner of the bounding box in image coordinates.
    origin: Point,
    width: u32,
    height: u32,
    /// Row-major membership, `width * height` cells, relative to `origin`.
    mask: Vec<bool>,
    /// Cached count of set mask cells.
    area: usize,
}

impl Region {
    /// Builds a region from a local mask. Fails if the mask does not have exactly
    /// `width * height` cells.
    pub fn new(x: u32, y: u32, width: u32, height: u32, mask: Vec<bool>) -> Result<Self> {
        if mask.len() != width as usize * height as usize {
            return Err(ColocError::Geometry {
                width,
                height,
                mask_len: mask.len(),
            });
        }
        let area = mask.iter().filter(|&&set| set).count();
        Ok(Self {
            origin: Point { x, y },
            width,
            height,
            mask,
            area,
        })
    }

    /// A fully-set rectangular region.
    pub fn rectangle(x: u32, y: u32, width: u32, height: u32) -> Self {
        let cells = width as usize * height as usize;
        Self {
            origin: Point { x, y },
            width,
            height,
            mask: vec![true; cells],
            area: cells,
        }
    }

    /// Builds a region from an 8-bit mask image placed at `(x, y)`; any non-zero pixel is a member.
    pub fn from_mask_image(x: u32, y: u32, mask: &GrayImage) -> Self {
        let (width, height) = mask.dimensions();
        let mask: Vec<bool> = mask.pixels().map(|Luma([v])| *v != 0).collect();
        let area = mask.iter().filter(|&&set| set).count();
        Self {
            origin: Point { x, y },
            width,
            height,
            mask,
            area,
        }
    }

    pub fn origin(&self) -> Point {
        self.origin
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of set mask cells.
    pub fn area(&self) -> usize {
        self.area
    }

    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox {
            x: self.origin.x,
            y: self.origin.y,
            width: self.width,
            height: self.height,
        }
    }

    /// True iff the global point lies inside the bounding box on a set mask cell.
    #[inline]
    pub fn contains(&self, global_x: u32, global_y: u32) -> bool {
        let (Some(local_x), Some(local_y)) = (
            global_x.checked_sub(self.origin.x),
            global_y.checked_sub(self.origin.y),
        ) else {
            return false;
        };
        if local_x >= self.width || local_y >= self.height {
            return false;
        }
        self.mask[(local_y * self.width + local_x) as usize]
    }

    /// Iterates over member pixels in global image coordinates, row by row.
    pub fn pixels(&self) -> impl Iterator<Item = Point> + '_ {
        let width = self.width.max(1);
        self.mask
            .iter()
            .enumerate()
            .filter(|(_, set)| **set)
            .map(move |(i, _)| Point {
                x: self.origin.x + i as u32 % width,
                y: self.origin.y + i as u32 / width,
            })
    }

    /// Centre of mass of the member pixels, `None` for an empty mask.
    pub fn centroid(&self) -> Option<(f64, f64)> {
        if self.area == 0 {
            return None;
        }
        let (sum_x, sum_y) = self
            .pixels()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x as f64, sy + p.y as f64));
        Some((sum_x / self.area as f64, sum_y / self.area as f64))
    }

    /// Whether the bounding boxes of the two regions overlap at all.
    pub fn intersects(&self, other: &Region) -> bool {
        self.bounding_box().intersects(&other.bounding_box())
    }

    /// Mean raw intensity over the member pixels that fall inside `image`.
    /// Returns 0.0 when no member pixel can be sampled.
    pub fn mean_intensity<I: IntensityImage + ?Sized>(&self, image: &I) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;
        for value in self.pixels().filter_map(|p| image.intensity(p.x, p.y)) {
            sum += value;
            count += 1;
        }
        if count == 0 { 0.0 } else { sum / count as f64 }
    }
}

/// Converts a label image (0 = background, every other value one cell) into
/// regions ordered by ascending label.
pub fn regions_from_labels(labels: &ImageBuffer<Luma<u16>, Vec<u16>>) -> Vec<Region> {
    // label -> (min_x, min_y, max_x, max_y)
    let mut extents: BTreeMap<u16, (u32, u32, u32, u32)> = BTreeMap::new();
    for (x, y, Luma([label])) in labels.enumerate_pixels() {
        if *label == 0 {
            continue;
        }
        extents
            .entry(*label)
            .and_modify(|e| {
                e.0 = e.0.min(x);
                e.1 = e.1.min(y);
                e.2 = e.2.max(x);
                e.3 = e.3.max(y);
            })
            .or_insert((x, y, x, y));
    }

    extents
        .into_iter()
        .map(|(label, (min_x, min_y, max_x, max_y))| {
            let width = max_x - min_x + 1;
            let height = max_y - min_y + 1;
            let mut mask = Vec::with_capacity((width * height) as usize);
            for y in min_y..=max_y {
                for x in min_x..=max_x {
                    mask.push(labels.get_pixel(x, y).0[0] == label);
                }
            }
            let area = mask.iter().filter(|&&set| set).count();
            Region {
                origin: Point { x: min_x, y: min_y },
                width,
                height,
                mask,
                area,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plus_shape() -> Region {
        #[rustfmt::skip]
        let mask = vec![
            false, true,  false,
            true,  true,  true,
            false, true,  false,
        ];
        Region::new(10, 20, 3, 3, mask).expect("valid mask")
    }

    #[test]
    fn mask_must_cover_the_bounding_box() {
        let err = Region::new(0, 0, 3, 2, vec![true; 5]).unwrap_err();
        assert!(matches!(
            err,
            ColocError::Geometry {
                width: 3,
                height: 2,
                mask_len: 5
            }
        ));
    }

    #[test]
    fn area_counts_set_cells_only() {
        assert_eq!(plus_shape().area(), 5);
        assert_eq!(Region::rectangle(0, 0, 4, 3).area(), 12);
    }

    #[test]
    fn contains_uses_global_coordinates_and_the_mask() {
        let region = plus_shape();
        assert!(region.contains(11, 21));
        assert!(region.contains(10, 21));
        assert!(!region.contains(10, 20)); // corner is outside the plus
        assert!(!region.contains(9, 21));
        assert!(!region.contains(13, 21));
        assert!(!region.contains(0, 0));
    }

    #[test]
    fn bounding_box_reports_origin_and_size() {
        assert_eq!(plus_shape().bounding_box().as_tuple(), (10, 20, 3, 3));
    }

    #[test]
    fn pixels_walk_member_cells_in_global_space() {
        let pixels: Vec<Point> = plus_shape().pixels().collect();
        assert_eq!(pixels.len(), 5);
        assert_eq!(pixels[0], Point { x: 11, y: 20 });
        assert_eq!(pixels[4], Point { x: 11, y: 22 });
        assert_eq!(plus_shape().centroid(), Some((11.0, 21.0)));
    }

    #[test]
    fn mean_intensity_translates_into_image_space() {
        let image = GrayImage::from_fn(40, 40, |x, _| Luma([x as u8]));
        // Columns 10, 11, 11, 11, 12 -> mean 11.
        assert_eq!(plus_shape().mean_intensity(&image), 11.0);
    }

    #[test]
    fn mean_intensity_skips_pixels_outside_the_image() {
        let image = GrayImage::from_pixel(2, 2, Luma([50]));
        let region = Region::rectangle(1, 1, 3, 3);
        assert_eq!(region.mean_intensity(&image), 50.0);

        let far_away = Region::rectangle(100, 100, 2, 2);
        assert_eq!(far_away.mean_intensity(&image), 0.0);
    }

    #[test]
    fn label_images_become_one_region_per_label() {
        let labels = ImageBuffer::from_fn(6, 4, |x, y| {
            Luma([match (x, y) {
                (0..=1, 0..=1) => 3u16,
                (4..=5, 2..=3) => 1u16,
                (4, 0) => 1u16,
                _ => 0u16,
            }])
        });

        let regions = regions_from_labels(&labels);
        assert_eq!(regions.len(), 2);

        // Label 1 comes first and spans rows 0..=3 in columns 4..=5.
        assert_eq!(regions[0].bounding_box().as_tuple(), (4, 0, 2, 4));
        assert_eq!(regions[0].area(), 5);
        assert!(regions[0].contains(4, 0));
        assert!(!regions[0].contains(5, 0));

        assert_eq!(regions[1].bounding_box().as_tuple(), (0, 0, 2, 2));
        assert_eq!(regions[1].area(), 4);
    }

    #[test]
    fn mask_images_mark_non_zero_pixels() {
        let mask = GrayImage::from_fn(3, 1, |x, _| Luma([if x == 1 { 0 } else { 255 }]));
        let region = Region::from_mask_image(5, 5, &mask);
        assert_eq!(region.area(), 2);
        assert!(region.contains(5, 5));
        assert!(!region.contains(6, 5));
    }
}
