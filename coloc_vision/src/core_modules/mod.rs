pub mod comparator;
pub mod intensity_filter;
pub mod intensity_image;
pub mod intensity_stats;
pub mod matcher;
pub mod region;
pub mod spatial_grid;
