// THEORY:
// The `pipeline` module is the top-level API for one image (or one stack frame).
// It takes the segmented regions and raw intensity image of every channel and
// runs the full colocalization sequence to completion, synchronously:
//
//   Stage 0: check the channel indices and image sizes against the config.
//   Stage 1: drop empty regions and apply the intensity filter per channel.
//   Stage 2: match base regions against overlay regions on a spatial grid.
//   Stage 3: measure intensity statistics for every matched pair.
//   Stage 4: optionally chain the matched overlay regions to a third channel.
//   Stage 5: optionally count base regions whose signal clears a threshold.
//
// The result is a self-contained `FrameReport` that owns its data (indices into
// the caller's region lists, boxes and statistics) so it can be handed to a
// reporting collaborator and discarded. Reports are delivered to an explicit
// `ReportSink`; nothing is staged in global state.

use crate::core_modules::comparator::Comparator;
use crate::core_modules::intensity_filter::{DEFAULT_INTENSITY_PERCENTAGE, intensity_filter};
use crate::core_modules::intensity_image::IntensityImage;
use crate::core_modules::intensity_stats::{RegionStats, compute_stats, count_above_threshold};
use crate::core_modules::matcher::{MatchPolicy, SpatialMatcher};
use crate::core_modules::region::{BoundingBox, Region};
use crate::error::{ConfigError, Result};
use image::{ImageBuffer, Luma};
use log::{info, warn};

/// The default raw image type: 16-bit grayscale, as most microscopes write it.
pub type RawImage = ImageBuffer<Luma<u16>, Vec<u16>>;

pub const DEFAULT_CELL_DIAMETER: u32 = 40;

/// Configuration for the ColocPipeline, allowing for tunable behavior.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ColocConfig {
    /// Largest expected cell diameter in pixels; used as the matcher's bucket size.
    pub cell_diameter: u32,
    /// Channel whose regions form the base side of the first match.
    pub base_channel: usize,
    /// Channel whose regions are matched against the base.
    pub overlay_channel: usize,
    /// Optional third channel, matched against the matched overlay regions.
    pub third_channel: Option<usize>,
    pub pair_comparator: Comparator,
    pub third_comparator: Comparator,
    pub match_policy: MatchPolicy,
    /// Forbid one overlay region from being claimed by several base regions.
    pub exclusive_overlay: bool,
    /// Intensity filter percentage, `None` disables filtering.
    pub intensity_percentage: Option<f64>,
    /// Channels the intensity filter applies to.
    pub filter_channels: Vec<usize>,
    /// Mean signal a base region needs on the overlay channel to count as positive.
    pub positivity_threshold: Option<f64>,
}

impl Default for ColocConfig {
    fn default() -> Self {
        Self {
            cell_diameter: DEFAULT_CELL_DIAMETER,
            base_channel: 0,
            overlay_channel: 1,
            third_channel: None,
            pair_comparator: Comparator::loose(),
            third_comparator: Comparator::majority(),
            match_policy: MatchPolicy::FirstMatch,
            exclusive_overlay: false,
            intensity_percentage: Some(DEFAULT_INTENSITY_PERCENTAGE),
            filter_channels: vec![1],
            positivity_threshold: None,
        }
    }
}

impl ColocConfig {
    /// Checks everything that does not depend on the supplied channels.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.cell_diameter == 0 {
            return Err(ConfigError::NonPositiveBucketSize);
        }
        self.pair_comparator.validate()?;
        if self.third_channel.is_some() {
            self.third_comparator.validate()?;
        }
        if let Some(percentage) = self.intensity_percentage {
            intensity_filter::validate_percentage(percentage)?;
        }
        if self.base_channel == self.overlay_channel {
            return Err(ConfigError::DuplicateChannel(self.overlay_channel));
        }
        if let Some(third) = self.third_channel {
            if third == self.base_channel || third == self.overlay_channel {
                return Err(ConfigError::DuplicateChannel(third));
            }
        }
        Ok(())
    }

    /// Checks that every configured channel index exists among `available` channels.
    pub fn validate_channels(&self, available: usize) -> std::result::Result<(), ConfigError> {
        let referenced = [self.base_channel, self.overlay_channel]
            .into_iter()
            .chain(self.third_channel)
            .chain(self.filter_channels.iter().copied());
        for index in referenced {
            if index >= available {
                return Err(ConfigError::InvalidChannel { index, available });
            }
        }
        Ok(())
    }
}

/// One channel of one image: its segmented regions and raw intensities.
#[derive(Debug, Clone)]
pub struct ChannelInput<I = RawImage> {
    pub regions: Vec<Region>,
    pub image: I,
}

impl<I> ChannelInput<I> {
    pub fn new(regions: Vec<Region>, image: I) -> Self {
        Self { regions, image }
    }
}

/// A confirmed base/overlay pair with its measurements.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PairRecord {
    /// Index into the base channel's original region list.
    pub base_index: usize,
    /// Index into the overlay channel's original region list.
    pub overlay_index: usize,
    pub base_box: BoundingBox,
    pub overlay_box: BoundingBox,
    /// Base region measured on the base channel.
    pub base_stats: RegionStats,
    /// Overlay region measured on the overlay channel.
    pub overlay_stats: RegionStats,
    /// Base region measured on the overlay channel (signal under the cell).
    pub base_signal_stats: RegionStats,
}

/// A pair that also colocalized with a third-channel region.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TripleRecord {
    pub base_index: usize,
    pub overlay_index: usize,
    /// Index into the third channel's original region list.
    pub third_index: usize,
    pub third_box: BoundingBox,
    /// Third region measured on the third channel.
    pub third_stats: RegionStats,
}

/// Everything measured for one image or stack frame.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FrameReport {
    /// Name of the file the channels were read from.
    pub source: String,
    /// Frame index within a stack, 0 for single images.
    pub frame: usize,
    pub image_width: u32,
    pub image_height: u32,
    /// Base regions that entered matching.
    pub base_regions: usize,
    /// Overlay regions that entered matching.
    pub overlay_regions: usize,
    /// Third-channel regions that entered matching, when chaining.
    pub third_regions: Option<usize>,
    pub pairs: Vec<PairRecord>,
    pub triples: Vec<TripleRecord>,
    /// Base regions whose overlay-channel mean is above the positivity threshold.
    pub positive_count: Option<usize>,
}

impl FrameReport {
    /// Fraction of base regions that found an overlay partner.
    pub fn transduction_ratio(&self) -> f64 {
        if self.base_regions == 0 {
            0.0
        } else {
            self.pairs.len() as f64 / self.base_regions as f64
        }
    }

    /// `(source, pair)` associations in match order.
    pub fn associations(&self) -> impl Iterator<Item = (&str, &PairRecord)> {
        self.pairs.iter().map(move |pair| (self.source.as_str(), pair))
    }
}

/// Receives finished reports. Implemented by whatever formats or displays them.
pub trait ReportSink {
    fn accept(&mut self, report: FrameReport);
}

impl ReportSink for Vec<FrameReport> {
    fn accept(&mut self, report: FrameReport) {
        self.push(report);
    }
}

/// Keeps reports in arrival order.
#[derive(Debug, Default)]
pub struct CollectingSink {
    reports: Vec<FrameReport>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> &[FrameReport] {
        &self.reports
    }

    pub fn into_reports(self) -> Vec<FrameReport> {
        self.reports
    }

    /// Every `(source, pair)` association across all collected reports.
    pub fn associations(&self) -> impl Iterator<Item = (&str, &PairRecord)> {
        self.reports.iter().flat_map(|report| report.associations())
    }
}

impl ReportSink for CollectingSink {
    fn accept(&mut self, report: FrameReport) {
        self.reports.push(report);
    }
}

/// The main, top-level struct for the colocalization engine.
#[derive(Debug, Clone)]
pub struct ColocPipeline {
    config: ColocConfig,
}

impl ColocPipeline {
    pub fn new(config: ColocConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ColocConfig {
        &self.config
    }

    /// Analyzes one image and hands the report to `sink`.
    pub fn analyze_into<I, S>(
        &self,
        source: &str,
        frame: usize,
        channels: &[ChannelInput<I>],
        sink: &mut S,
    ) -> Result<()>
    where
        I: IntensityImage,
        S: ReportSink + ?Sized,
    {
        let report = self.analyze(source, frame, channels)?;
        sink.accept(report);
        Ok(())
    }

    /// Runs every stage for one image and returns its report.
    pub fn analyze<I: IntensityImage>(
        &self,
        source: &str,
        frame: usize,
        channels: &[ChannelInput<I>],
    ) -> Result<FrameReport> {
        let config = &self.config;

        // --- Stage 0: Channel Validation ---
        config.validate_channels(channels.len())?;
        let (image_width, image_height) = channels[config.base_channel].image.dimensions();
        for (channel, input) in channels.iter().enumerate() {
            let (width, height) = input.image.dimensions();
            if (width, height) != (image_width, image_height) {
                return Err(ConfigError::ImageSizeMismatch {
                    channel,
                    expected_width: image_width,
                    expected_height: image_height,
                    actual_width: width,
                    actual_height: height,
                }
                .into());
            }
        }

        // --- Stage 1: Region Preparation ---
        let base = &channels[config.base_channel];
        let overlay = &channels[config.overlay_channel];
        let base_kept = self.prepare_channel(config.base_channel, base)?;
        let overlay_kept = self.prepare_channel(config.overlay_channel, overlay)?;
        let base_list: Vec<&Region> = base_kept.iter().map(|&i| &base.regions[i]).collect();
        let overlay_list: Vec<&Region> = overlay_kept.iter().map(|&i| &overlay.regions[i]).collect();

        // --- Stage 2: Spatial Matching ---
        let pair_matcher = self.matcher(image_width, image_height, config.pair_comparator)?;
        let pairs = pair_matcher.match_regions(&base_list, &overlay_list);

        // --- Stage 3: Pair Statistics ---
        let base_stats = compute_stats(&pairs.base, &base.image);
        let overlay_stats = compute_stats(&pairs.overlay, &overlay.image);
        let base_signal_stats = compute_stats(&pairs.base, &overlay.image);
        let pair_records: Vec<PairRecord> = pairs
            .indices
            .iter()
            .enumerate()
            .map(|(k, &(b, o))| PairRecord {
                base_index: base_kept[b],
                overlay_index: overlay_kept[o],
                base_box: pairs.base[k].bounding_box(),
                overlay_box: pairs.overlay[k].bounding_box(),
                base_stats: base_stats[k],
                overlay_stats: overlay_stats[k],
                base_signal_stats: base_signal_stats[k],
            })
            .collect();

        // --- Stage 4: Chained Third-Channel Matching ---
        let mut triples = Vec::new();
        let mut third_regions = None;
        if let Some(third_channel) = config.third_channel {
            let third = &channels[third_channel];
            let third_kept = self.prepare_channel(third_channel, third)?;
            let third_list: Vec<&Region> = third_kept.iter().map(|&i| &third.regions[i]).collect();
            third_regions = Some(third_list.len());

            let third_matcher = self.matcher(image_width, image_height, config.third_comparator)?;
            let chained = third_matcher.chain(&pairs, &third_list);
            let third_stats = compute_stats(&chained.third, &third.image);
            triples = chained
                .indices
                .iter()
                .enumerate()
                .map(|(k, &(b, o, t))| TripleRecord {
                    base_index: base_kept[b],
                    overlay_index: overlay_kept[o],
                    third_index: third_kept[t],
                    third_box: chained.third[k].bounding_box(),
                    third_stats: third_stats[k],
                })
                .collect();
        }

        // --- Stage 5: Positivity Count ---
        let positive_count = config.positivity_threshold.map(|threshold| {
            let signal = compute_stats(&base_list, &overlay.image);
            count_above_threshold(&signal, threshold)
        });

        info!(
            "{} [frame {}]: {} of {} base regions matched {} overlay regions{}",
            source,
            frame,
            pair_records.len(),
            base_list.len(),
            overlay_list.len(),
            match third_regions {
                Some(_) => format!(", {} three-channel matches", triples.len()),
                None => String::new(),
            }
        );

        Ok(FrameReport {
            source: source.to_string(),
            frame,
            image_width,
            image_height,
            base_regions: base_list.len(),
            overlay_regions: overlay_list.len(),
            third_regions,
            pairs: pair_records,
            triples,
            positive_count,
        })
    }

    /// Original indices of the regions of one channel that enter matching.
    fn prepare_channel<I: IntensityImage>(
        &self,
        channel: usize,
        input: &ChannelInput<I>,
    ) -> Result<Vec<usize>> {
        let non_empty: Vec<usize> = input
            .regions
            .iter()
            .enumerate()
            .filter(|(_, r)| r.area() > 0)
            .map(|(i, _)| i)
            .collect();
        let dropped = input.regions.len() - non_empty.len();
        if dropped > 0 {
            warn!("channel {}: dropped {} regions with an empty mask", channel, dropped);
        }

        let percentage = match self.config.intensity_percentage {
            Some(p) if self.config.filter_channels.contains(&channel) => p,
            _ => return Ok(non_empty),
        };
        let candidates: Vec<&Region> = non_empty.iter().map(|&i| &input.regions[i]).collect();
        let retained = intensity_filter::retained_indices(&candidates, &input.image, percentage)?;
        Ok(retained.into_iter().map(|k| non_empty[k]).collect())
    }

    fn matcher(&self, width: u32, height: u32, comparator: Comparator) -> Result<SpatialMatcher> {
        Ok(
            SpatialMatcher::new(width, height, self.config.cell_diameter, comparator)?
                .with_policy(self.config.match_policy)
                .with_exclusive_overlay(self.config.exclusive_overlay),
        )
    }
}
