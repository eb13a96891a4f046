// THEORY:
// A `Comparator` decides whether two regions from different channels colocalize.
// Both variants count the overlay pixels that land inside the base region and
// differ only in the denominator:
//   - `LooseOverlap` divides by the base area ("does anything of the overlay
//     touch the base?"), typically with a 1% threshold.
//   - `MajorityContainment` divides by the overlay area ("does most of the
//     overlay sit inside the base?"), typically with a 50% threshold.
// Both are directional: swapping base and overlay changes the answer.
//
// The set of variants is closed, so this is a plain enum rather than a trait
// object. Comparators hold nothing but their threshold and are pure.

use crate::core_modules::region::Region;
use crate::error::ConfigError;

pub const DEFAULT_LOOSE_THRESHOLD: f64 = 0.01;
pub const DEFAULT_CONTAINMENT_THRESHOLD: f64 = 0.5;

/// Policy deciding whether an overlay region colocalizes with a base region.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", content = "threshold", rename_all = "snake_case"))]
pub enum Comparator {
    /// Overlay pixels inside the base, divided by the base area.
    LooseOverlap(f64),
    /// Overlay pixels inside the base, divided by the overlay area.
    MajorityContainment(f64),
}

impl Comparator {
    pub fn loose() -> Self {
        Comparator::LooseOverlap(DEFAULT_LOOSE_THRESHOLD)
    }

    pub fn majority() -> Self {
        Comparator::MajorityContainment(DEFAULT_CONTAINMENT_THRESHOLD)
    }

    pub fn threshold(&self) -> f64 {
        match *self {
            Comparator::LooseOverlap(t) | Comparator::MajorityContainment(t) => t,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Comparator::LooseOverlap(_) => "loose_overlap",
            Comparator::MajorityContainment(_) => "majority_containment",
        }
    }

    /// Thresholds must be finite and lie in (0, 1].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let value = self.threshold();
        if value.is_finite() && value > 0.0 && value <= 1.0 {
            Ok(())
        } else {
            Err(ConfigError::InvalidThreshold {
                name: self.name(),
                value,
            })
        }
    }

    /// The ratio this comparator thresholds. Zero when the bounding boxes are
    /// disjoint or the denominator region is empty.
    pub fn overlap_score(&self, base: &Region, overlay: &Region) -> f64 {
        let denominator = match self {
            Comparator::LooseOverlap(_) => base.area(),
            Comparator::MajorityContainment(_) => overlay.area(),
        };
        if denominator == 0 || !base.intersects(overlay) {
            return 0.0;
        }
        overlapping_pixels(base, overlay) as f64 / denominator as f64
    }

    pub fn matches(&self, base: &Region, overlay: &Region) -> bool {
        let score = self.overlap_score(base, overlay);
        score > 0.0 && score >= self.threshold()
    }
}

/// Number of overlay member pixels that are also base member pixels.
pub fn overlapping_pixels(base: &Region, overlay: &Region) -> usize {
    overlay.pixels().filter(|p| base.contains(p.x, p.y)).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disjoint_regions_never_match() {
        let a = Region::rectangle(0, 0, 10, 10);
        let b = Region::rectangle(10, 0, 10, 10);
        for comparator in [
            Comparator::loose(),
            Comparator::majority(),
            Comparator::LooseOverlap(1e-9),
            Comparator::MajorityContainment(1e-9),
        ] {
            assert!(!comparator.matches(&a, &b));
            assert!(!comparator.matches(&b, &a));
        }
    }

    #[test]
    fn identical_regions_fully_coincide() {
        let a = Region::rectangle(5, 5, 8, 6);
        let copy = a.clone();
        assert!(Comparator::LooseOverlap(1.0).matches(&a, &copy));
        assert!(Comparator::MajorityContainment(1.0).matches(&a, &copy));
    }

    #[test]
    fn loose_overlap_divides_by_base_area() {
        // 10x10 base, 2x2 overlay fully inside: 4 / 100.
        let base = Region::rectangle(0, 0, 10, 10);
        let overlay = Region::rectangle(3, 3, 2, 2);
        let loose = Comparator::LooseOverlap(0.04);
        assert!((loose.overlap_score(&base, &overlay) - 0.04).abs() < 1e-12);
        assert!(loose.matches(&base, &overlay));
        assert!(!Comparator::LooseOverlap(0.05).matches(&base, &overlay));

        // Swapped: 4 / 4.
        assert_eq!(loose.overlap_score(&overlay, &base), 1.0);
    }

    #[test]
    fn majority_containment_divides_by_overlay_area() {
        let base = Region::rectangle(0, 0, 10, 10);
        // 4x2 overlay straddling the right edge: 2x2 of it is inside.
        let overlay = Region::rectangle(8, 0, 4, 2);
        let majority = Comparator::majority();
        assert_eq!(majority.overlap_score(&base, &overlay), 0.5);
        assert!(majority.matches(&base, &overlay));

        let mostly_out = Region::rectangle(9, 0, 4, 2);
        assert!(!majority.matches(&base, &mostly_out));
    }

    #[test]
    fn empty_regions_score_zero() {
        let empty = Region::new(0, 0, 2, 2, vec![false; 4]).expect("valid mask");
        let full = Region::rectangle(0, 0, 2, 2);
        assert_eq!(Comparator::loose().overlap_score(&empty, &full), 0.0);
        assert_eq!(Comparator::majority().overlap_score(&full, &empty), 0.0);
    }

    #[test]
    fn repeated_calls_agree() {
        let base = Region::rectangle(0, 0, 6, 6);
        let overlay = Region::rectangle(4, 4, 6, 6);
        let c = Comparator::loose();
        let first = c.matches(&base, &overlay);
        assert!((0..10).all(|_| c.matches(&base, &overlay) == first));
    }

    #[test]
    fn thresholds_are_validated() {
        assert!(Comparator::loose().validate().is_ok());
        assert!(Comparator::LooseOverlap(1.0).validate().is_ok());
        assert!(Comparator::LooseOverlap(0.0).validate().is_err());
        assert!(Comparator::MajorityContainment(1.5).validate().is_err());
        assert!(matches!(
            Comparator::MajorityContainment(f64::NAN).validate(),
            Err(ConfigError::InvalidThreshold {
                name: "majority_containment",
                ..
            })
        ));
    }
}
