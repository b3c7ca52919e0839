// THEORY:
// This file is the entry point of the `clahe_vision` library crate. It exposes
// the `ClahePipeline` and its configuration as the high-level interface for
// contrast-limited adaptive histogram equalization, plus the load/save helpers
// that sit around it. The building blocks (`core_modules`) are public so the
// individual stages can be used and tested on their own, but most callers only
// need the re-exports below.

pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;

pub use core_modules::pixel_buffer::GrayPicture;
pub use core_modules::utils::image_helper::{load, save};
pub use error::{ClaheError, Result};
pub use pipeline::{
    ClaheConfig, ClahePipeline, TileGeometry, equalize_adaptive, equalize_adaptive_blocking,
};
