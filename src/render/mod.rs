//! GPU rendering: mask texture cache, compositor pass, still capture

pub mod capture;
pub mod compositor;
pub mod mask_cache;

pub use compositor::{Compositor, CompositeParams, LayoutMode};
pub use mask_cache::{MaskTextureCache, MASK_UNIT_COUNT};
