// THEORY:
// The intensity filter removes dim, background-noise regions from a channel
// before they reach the matcher. It is a min-max-normalized cutoff, not a
// rank-based percentile:
//
//     cutoff = max - (max - min) * (percentage / 100)
//
// where min and max are taken over the mean intensities of the regions in the
// list. Only regions whose mean is strictly above the cutoff survive, so a
// region sitting exactly on the cutoff is dropped. With the default of 90 the
// dimmest tenth of the intensity range is discarded.
//
// This is a stateless utility: it reads the regions and the image and returns
// which entries to keep.

use crate::core_modules::intensity_image::IntensityImage;
use crate::core_modules::region::Region;
use crate::error::ConfigError;
use std::borrow::Borrow;

pub const DEFAULT_INTENSITY_PERCENTAGE: f64 = 90.0;

pub mod intensity_filter {
    use super::*;

    /// Percentages outside [0, 100] or non-finite values are configuration errors.
    pub fn validate_percentage(percentage: f64) -> Result<(), ConfigError> {
        if percentage.is_finite() && (0.0..=100.0).contains(&percentage) {
            Ok(())
        } else {
            Err(ConfigError::InvalidPercentage(percentage))
        }
    }

    /// The cutoff for a set of mean intensities, `None` for an empty set.
    pub fn cutoff(means: &[f64], percentage: f64) -> Option<f64> {
        let max = means.iter().copied().reduce(f64::max)?;
        let min = means.iter().copied().reduce(f64::min)?;
        Some(max - (max - min) * (percentage / 100.0))
    }

    /// Indices of the regions whose mean intensity is strictly above the cutoff,
    /// in input order.
    pub fn retained_indices<R, I>(
        regions: &[R],
        image: &I,
        percentage: f64,
    ) -> Result<Vec<usize>, ConfigError>
    where
        R: Borrow<Region>,
        I: IntensityImage + ?Sized,
    {
        validate_percentage(percentage)?;
        let means: Vec<f64> = regions
            .iter()
            .map(|r| r.borrow().mean_intensity(image))
            .collect();
        let Some(cutoff) = cutoff(&means, percentage) else {
            return Ok(Vec::new());
        };
        log::debug!(
            "intensity cutoff {:.3} at {}% over {} regions",
            cutoff,
            percentage,
            regions.len()
        );
        Ok(means
            .iter()
            .enumerate()
            .filter(|&(_, &mean)| mean > cutoff)
            .map(|(i, _)| i)
            .collect())
    }

    /// The retained regions themselves, borrowed from `regions`.
    pub fn filter_regions<'a, R, I>(
        regions: &'a [R],
        image: &I,
        percentage: f64,
    ) -> Result<Vec<&'a Region>, ConfigError>
    where
        R: Borrow<Region>,
        I: IntensityImage + ?Sized,
    {
        Ok(retained_indices(regions, image, percentage)?
            .into_iter()
            .map(|i| regions[i].borrow())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::intensity_filter::*;
    use super::*;
    use image::{GrayImage, Luma};

    /// Four 2x2 regions side by side with flat intensities 10, 20, 30, 100.
    fn fixture() -> (Vec<Region>, GrayImage) {
        let levels = [10u8, 20, 30, 100];
        let image = GrayImage::from_fn(8, 2, |x, _| Luma([levels[(x / 2) as usize]]));
        let regions = (0..4).map(|i| Region::rectangle(i * 2, 0, 2, 2)).collect();
        (regions, image)
    }

    #[test]
    fn cutoff_is_min_max_normalized() {
        let cutoff = cutoff(&[10.0, 20.0, 30.0, 100.0], 90.0).expect("non-empty");
        assert!((cutoff - 19.0).abs() < 1e-9);
        assert_eq!(super::intensity_filter::cutoff(&[], 90.0), None);
    }

    #[test]
    fn keeps_regions_strictly_above_the_cutoff() {
        let (regions, image) = fixture();
        let kept = retained_indices(&regions, &image, DEFAULT_INTENSITY_PERCENTAGE).expect("valid");
        assert_eq!(kept, vec![1, 2, 3]);

        let borrowed = filter_regions(&regions, &image, 90.0).expect("valid");
        assert_eq!(borrowed, vec![&regions[1], &regions[2], &regions[3]]);
    }

    #[test]
    fn a_region_on_the_cutoff_is_excluded() {
        let (regions, image) = fixture();
        // 100 - 90 * 0.5 = 55: only the brightest survives; at 0% the cutoff is the max itself.
        assert_eq!(retained_indices(&regions, &image, 50.0).expect("valid"), vec![3]);
        assert!(retained_indices(&regions, &image, 0.0).expect("valid").is_empty());
        // At 100% the cutoff is the minimum, which is itself dropped.
        assert_eq!(retained_indices(&regions, &image, 100.0).expect("valid"), vec![1, 2, 3]);
    }

    #[test]
    fn empty_input_keeps_nothing() {
        let image = GrayImage::new(4, 4);
        let none: Vec<Region> = Vec::new();
        assert!(retained_indices(&none, &image, 90.0).expect("valid").is_empty());
    }

    #[test]
    fn percentage_is_validated() {
        let (regions, image) = fixture();
        assert_eq!(
            retained_indices(&regions, &image, 120.0).unwrap_err(),
            ConfigError::InvalidPercentage(120.0)
        );
        assert!(validate_percentage(f64::NAN).is_err());
    }
}
