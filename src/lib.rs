pub mod config;
pub mod dataset;
pub mod error;
pub mod failure;
pub mod feature;
pub mod geometry;
pub mod image;
pub mod my_types;
pub mod scale;
pub mod spectral;
pub mod tracker;
pub mod translation;

#[cfg(test)]
mod test_utils;

pub use config::TrackerConfig;
pub use geometry::BoundingBox;
pub use tracker::{TrackResult, Tracker};
