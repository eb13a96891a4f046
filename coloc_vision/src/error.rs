// THEORY:
// Every failure the engine can report falls into one of three families.
// Configuration mistakes are caught once, before any image is touched.
// Geometry violations mean the segmentation collaborator handed us a region
// whose mask disagrees with its bounding box; the current image is abandoned.
// Image failures come from decoding collaborators and are passed through as-is.
// Unmatched regions and empty masks are normal outcomes and never appear here.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ColocError>;

/// Problems with the analysis configuration, detected before processing begins.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("channel index {index} is out of range ({available} channels supplied)")]
    InvalidChannel { index: usize, available: usize },

    #[error("channel {0} is used for more than one matching role")]
    DuplicateChannel(usize),

    #[error("bucket size (cell diameter) must be greater than zero")]
    NonPositiveBucketSize,

    #[error("threshold `{name}` must be a finite value in (0, 1], got {value}")]
    InvalidThreshold { name: &'static str, value: f64 },

    #[error("intensity percentage must lie in [0, 100], got {0}")]
    InvalidPercentage(f64),

    #[error(
        "channel {channel} image is {actual_width}x{actual_height}, expected {expected_width}x{expected_height}"
    )]
    ImageSizeMismatch {
        channel: usize,
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },
}

#[derive(Debug, Error)]
pub enum ColocError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The mask handed over by segmentation does not cover its bounding box exactly.
    #[error(
        "region mask holds {mask_len} cells but its bounding box is {width}x{height}"
    )]
    Geometry {
        width: u32,
        height: u32,
        mask_len: usize,
    },

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("batch cancelled before this job started")]
    Cancelled,

    #[error("batch worker is no longer running")]
    WorkerUnavailable,
}
