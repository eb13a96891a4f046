// THEORY:
// The statistics engine turns a list of regions plus one raw intensity image into
// one `RegionStats` record per region, in the same order. Values are taken from
// the raw image (never a quantized display copy), so the raw integrated density
// is the exact sum of what sits under the mask.
//
// A region with no sampled pixels produces an all-zero record instead of an
// error. Such a record keeps `area == 0`, which is how reports tell "no data"
// apart from a measured zero.

use crate::core_modules::intensity_image::IntensityImage;
use crate::core_modules::region::Region;
use std::borrow::Borrow;

/// Intensity statistics of one region on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegionStats {
    /// Number of mask pixels that were sampled.
    pub area: usize,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    /// `mean * area`.
    pub integrated_density: f64,
    /// Sum of the raw pixel values under the mask.
    pub raw_integrated_density: f64,
}

impl RegionStats {
    /// True for the zeroed record of a region with nothing to sample.
    pub fn is_empty(&self) -> bool {
        self.area == 0
    }

    /// Computes the record from raw values. Consumes the buffer to sort it in place.
    pub fn from_values(mut values: Vec<f64>) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        values.sort_unstable_by(f64::total_cmp);

        let area = values.len();
        let sum: f64 = values.iter().sum();
        let mean = sum / area as f64;
        let mid = area / 2;
        let median = if area % 2 == 1 {
            values[mid]
        } else {
            (values[mid - 1] + values[mid]) / 2.0
        };

        Self {
            area,
            mean,
            median,
            min: values[0],
            max: values[area - 1],
            integrated_density: mean * area as f64,
            raw_integrated_density: sum,
        }
    }
}

/// Channel-level roll-up of a record list.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatsSummary {
    pub count: usize,
    /// Records with `area == 0`.
    pub empty: usize,
    pub total_area: usize,
    /// Mean of the non-empty records' means.
    pub mean_of_means: f64,
}

/// Statistics for a single region.
pub fn region_stats<I: IntensityImage + ?Sized>(region: &Region, image: &I) -> RegionStats {
    let values: Vec<f64> = region
        .pixels()
        .filter_map(|p| image.intensity(p.x, p.y))
        .collect();
    RegionStats::from_values(values)
}

/// One record per region, in input order.
pub fn compute_stats<R, I>(regions: &[R], image: &I) -> Vec<RegionStats>
where
    R: Borrow<Region>,
    I: IntensityImage + ?Sized,
{
    regions
        .iter()
        .map(|region| region_stats(region.borrow(), image))
        .collect()
}

/// How many records have a mean strictly above `threshold`.
pub fn count_above_threshold(records: &[RegionStats], threshold: f64) -> usize {
    records.iter().filter(|r| r.mean > threshold).count()
}

pub fn summarize(records: &[RegionStats]) -> StatsSummary {
    let measured: Vec<&RegionStats> = records.iter().filter(|r| !r.is_empty()).collect();
    let mean_of_means = if measured.is_empty() {
        0.0
    } else {
        measured.iter().map(|r| r.mean).sum::<f64>() / measured.len() as f64
    };
    StatsSummary {
        count: records.len(),
        empty: records.len() - measured.len(),
        total_area: measured.iter().map(|r| r.area).sum(),
        mean_of_means,
    }
}
