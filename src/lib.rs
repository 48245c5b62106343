//! Photo Booth - dual-feed segmentation compositing pipeline
//!
//! Captures a camera feed, crops two user-defined regions out of it, runs
//! person segmentation and pose presence on each region, and composites the
//! live video with per-class confidence masks on the GPU. Presence drives a
//! countdown-to-capture sequence per feed slot.

pub mod app;
pub mod camera;
pub mod crop;
pub mod ml;
pub mod pipeline;
pub mod presence;
pub mod render;
pub mod settings;

pub use app::App;
