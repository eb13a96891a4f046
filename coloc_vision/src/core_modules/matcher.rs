// THEORY:
// The `SpatialMatcher` pairs every base region with at most one overlay region
// that the configured `Comparator` accepts. Instead of testing all |A|x|B|
// pairs, it indexes the overlay list into a `SpatialGrid` and only evaluates the
// overlay regions registered in the buckets under each base region's bounding
// box. Average cost is |A| times the bucket occupancy; the worst case (every
// region in one bucket) falls back to the naive bound.
//
// Algorithm:
// 1.  Build a fresh grid over the overlay list for this call.
// 2.  For each base region, in input order, gather the candidate indices.
// 3.  Evaluate candidates in registration order. Under `FirstMatch` the first
//     accepted candidate wins; under `BestOverlap` the highest score wins and
//     ties go to the earlier candidate.
// 4.  Unmatched base regions are silently left out of the result.
//
// Three-channel colocalization is built by chaining: the overlay side of a first
// match becomes the base side of a second match against the third channel.

use crate::core_modules::comparator::Comparator;
use crate::core_modules::region::Region;
use crate::core_modules::spatial_grid::SpatialGrid;
use crate::error::ConfigError;
use log::debug;
use std::borrow::Borrow;
use std::num::NonZeroU32;

/// How a winner is chosen among accepted candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum MatchPolicy {
    /// The first accepted candidate in registration order.
    #[default]
    FirstMatch,
    /// The accepted candidate with the highest overlap score.
    BestOverlap,
}

/// Index-aligned matched regions: `base[i]` colocalizes with `overlay[i]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchedPairs<'a> {
    pub base: Vec<&'a Region>,
    pub overlay: Vec<&'a Region>,
    /// `(base_index, overlay_index)` into the lists handed to the matcher.
    pub indices: Vec<(usize, usize)>,
    /// Candidates evaluated while matching.
    pub evaluations: usize,
}

impl<'a> MatchedPairs<'a> {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    fn push(&mut self, base: (usize, &'a Region), overlay: (usize, &'a Region)) {
        self.base.push(base.1);
        self.overlay.push(overlay.1);
        self.indices.push((base.0, overlay.0));
    }
}

/// Index-aligned three-channel result of a chained match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainedMatch<'a> {
    pub base: Vec<&'a Region>,
    pub overlay: Vec<&'a Region>,
    pub third: Vec<&'a Region>,
    /// `(base_index, overlay_index, third_index)` into the original lists.
    pub indices: Vec<(usize, usize, usize)>,
}

impl ChainedMatch<'_> {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Grid-accelerated matcher for one image size and one comparator.
#[derive(Debug, Clone)]
pub struct SpatialMatcher {
    image_width: u32,
    image_height: u32,
    /// Bucket side, the largest expected cell diameter.
    bucket_size: NonZeroU32,
    comparator: Comparator,
    policy: MatchPolicy,
    /// When set, an overlay region can be claimed by one base region only.
    exclusive_overlay: bool,
}

impl SpatialMatcher {
    pub fn new(
        image_width: u32,
        image_height: u32,
        bucket_size: u32,
        comparator: Comparator,
    ) -> Result<Self, ConfigError> {
        let bucket_size = NonZeroU32::new(bucket_size).ok_or(ConfigError::NonPositiveBucketSize)?;
        comparator.validate()?;
        Ok(Self {
            image_width,
            image_height,
            bucket_size,
            comparator,
            policy: MatchPolicy::FirstMatch,
            exclusive_overlay: false,
        })
    }

    pub fn with_policy(mut self, policy: MatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_exclusive_overlay(mut self, exclusive: bool) -> Self {
        self.exclusive_overlay = exclusive;
        self
    }

    pub fn comparator(&self) -> Comparator {
        self.comparator
    }

    /// Matches every base region against the overlay list.
    pub fn match_regions<'a, B, O>(&self, base: &'a [B], overlay: &'a [O]) -> MatchedPairs<'a>
    where
        B: Borrow<Region>,
        O: Borrow<Region>,
    {
        let mut pairs = MatchedPairs::default();
        if base.is_empty() || overlay.is_empty() {
            return pairs;
        }

        let mut grid =
            SpatialGrid::with_bucket_size(self.image_width, self.image_height, self.bucket_size);
        for (index, region) in overlay.iter().enumerate() {
            grid.insert(index, &region.borrow().bounding_box());
        }
        debug!(
            "matching {} base against {} overlay regions on a {}x{} grid",
            base.len(),
            overlay.len(),
            grid.grid_width(),
            grid.grid_height()
        );

        let mut claimed = vec![false; overlay.len()];

        for (base_index, base_region) in base.iter().enumerate() {
            let base_region = base_region.borrow();
            let candidates = grid
                .candidates(&base_region.bounding_box())
                .into_iter()
                .filter(|&j| !(self.exclusive_overlay && claimed[j]));

            let winner = match self.policy {
                MatchPolicy::FirstMatch => candidates
                    .inspect(|_| pairs.evaluations += 1)
                    .find(|&j| self.comparator.matches(base_region, overlay[j].borrow())),
                MatchPolicy::BestOverlap => {
                    let mut best: Option<(usize, f64)> = None;
                    for j in candidates {
                        pairs.evaluations += 1;
                        let overlay_region = overlay[j].borrow();
                        if !self.comparator.matches(base_region, overlay_region) {
                            continue;
                        }
                        let score = self.comparator.overlap_score(base_region, overlay_region);
                        if best.is_none_or(|(_, s)| score > s) {
                            best = Some((j, score));
                        }
                    }
                    best.map(|(j, _)| j)
                }
            };

            if let Some(overlay_index) = winner {
                claimed[overlay_index] = true;
                pairs.push(
                    (base_index, base_region),
                    (overlay_index, overlay[overlay_index].borrow()),
                );
            }
        }

        debug!(
            "{} pairs from {} comparator evaluations",
            pairs.len(),
            pairs.evaluations
        );
        pairs
    }

    /// Extends a two-channel match to a third channel by matching the matched
    /// overlay regions against `third`.
    pub fn chain<'a, T>(&self, pairs: &MatchedPairs<'a>, third: &'a [T]) -> ChainedMatch<'a>
    where
        T: Borrow<Region>,
    {
        let second = self.match_regions(&pairs.overlay, third);
        let mut chained = ChainedMatch::default();
        for &(k, third_index) in &second.indices {
            let (base_index, overlay_index) = pairs.indices[k];
            chained.base.push(pairs.base[k]);
            chained.overlay.push(pairs.overlay[k]);
            chained.third.push(third[third_index].borrow());
            chained.indices.push((base_index, overlay_index, third_index));
        }
        chained
    }
}
