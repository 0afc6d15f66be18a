//! Transformation module.
//!
//! - Reshape: wide discharge rows to one row per diagnosis
//! - Pipeline: read, reshape, export and load helpers

pub mod pipeline;
pub mod reshape;

pub use pipeline::*;
pub use reshape::{reshape, ReshapeStats, Reshaped};
