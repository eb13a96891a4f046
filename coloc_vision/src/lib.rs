// THEORY:
// This file is the entry point for the `coloc_vision` library crate.
//
// The public surface is the `ColocPipeline` (one image at a time) and the
// `BatchPipeline` (a background worker that runs images strictly in sequence),
// together with their configuration and report types. The building blocks in
// `core_modules` (regions, comparators, the spatial grid and matcher, intensity
// statistics and the intensity filter) are public as well, for callers that
// want to drive a single stage directly.

pub mod batch_pipeline;
pub mod core_modules;
pub mod error;
pub mod pipeline;

pub use core_modules::comparator::Comparator;
pub use core_modules::intensity_image::{
    FloatImage, IntensityImage, LabelImage, open_intensity_image, open_label_image,
};
pub use core_modules::intensity_stats::{RegionStats, count_above_threshold};
pub use core_modules::matcher::{ChainedMatch, MatchPolicy, MatchedPairs, SpatialMatcher};
pub use core_modules::region::{BoundingBox, Point, Region, regions_from_labels};
pub use error::{ColocError, ConfigError, Result};
