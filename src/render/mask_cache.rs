//! Mask texture cache
//!
//! Owns one GPU texture per mask channel (4 units: cutout + tint per feed
//! slot). Confidence values are converted to 8-bit fixed point and written
//! only when the content actually changed; a dimension change between
//! frames reallocates the texture instead of reusing a stale size.

use crate::ml::SEG_DIMENSION;

/// Mask channels: 2 per feed slot (cutout, tint)
pub const MASK_UNIT_COUNT: usize = 4;

/// Stride for the cheap content comparison; exactness is not required,
/// only that visually identical frames usually skip the re-upload
const COMPARE_STRIDE: usize = 97;

/// What the stager decided for one mask frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// Content matches the previous upload; skip the GPU write
    Unchanged,
    /// Content staged for upload; `realloc` when dimensions changed
    Upload { realloc: bool },
}

struct UnitState {
    width: u32,
    height: u32,
    /// Fixed-point content of the last staged upload
    last: Vec<u8>,
}

/// CPU half of the cache: fixed-point conversion and change detection
pub struct MaskStager {
    units: [UnitState; MASK_UNIT_COUNT],
    scratch: Vec<u8>,
}

impl MaskStager {
    pub fn new(width: u32, height: u32) -> Self {
        let size = (width * height) as usize;
        Self {
            units: std::array::from_fn(|_| UnitState {
                width,
                height,
                last: vec![0u8; size],
            }),
            scratch: vec![0u8; size],
        }
    }

    pub fn dimensions(&self, unit: usize) -> (u32, u32) {
        (self.units[unit].width, self.units[unit].height)
    }

    /// Staged bytes for a unit (what an `Upload` outcome writes)
    pub fn staged(&self, unit: usize) -> &[u8] {
        &self.units[unit].last
    }

    /// Stage a confidence mask: quantize to `round(v * 255)` and diff
    pub fn stage(&mut self, unit: usize, data: &[f32], width: u32, height: u32) -> StageOutcome {
        let size = (width * height) as usize;
        self.scratch.clear();
        self.scratch
            .extend(data.iter().take(size).map(|&v| quantize(v)));
        self.scratch.resize(size, 0);
        self.commit(unit, width, height)
    }

    /// Stage an all-zero mask for a frame where the class is absent
    pub fn stage_clear(&mut self, unit: usize, width: u32, height: u32) -> StageOutcome {
        let size = (width * height) as usize;
        self.scratch.clear();
        self.scratch.resize(size, 0);
        self.commit(unit, width, height)
    }

    fn commit(&mut self, unit: usize, width: u32, height: u32) -> StageOutcome {
        let state = &mut self.units[unit];
        let realloc = state.width != width || state.height != height;

        if !realloc && strided_equal(&self.scratch, &state.last) {
            return StageOutcome::Unchanged;
        }

        state.width = width;
        state.height = height;
        std::mem::swap(&mut state.last, &mut self.scratch);
        StageOutcome::Upload { realloc }
    }
}

/// Convert a [0,1] confidence to 8-bit fixed point
fn quantize(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Strided sample comparison; equal lengths plus matching samples count as
/// unchanged (a full per-pixel diff is deliberately not required)
fn strided_equal(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    if a.is_empty() {
        return true;
    }
    if a[0] != b[0] || a[a.len() - 1] != b[b.len() - 1] {
        return false;
    }
    a.iter()
        .step_by(COMPARE_STRIDE)
        .zip(b.iter().step_by(COMPARE_STRIDE))
        .all(|(x, y)| x == y)
}

/// GPU half: the actual textures plus upload/clear entry points
pub struct MaskTextureCache {
    stager: MaskStager,
    textures: Vec<wgpu::Texture>,
    views: Vec<wgpu::TextureView>,
    /// Bumped on every reallocation so bind groups can be rebuilt
    generation: u64,
}

impl MaskTextureCache {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let mut textures = Vec::with_capacity(MASK_UNIT_COUNT);
        let mut views = Vec::with_capacity(MASK_UNIT_COUNT);
        for unit in 0..MASK_UNIT_COUNT {
            let texture = Self::create_texture(device, unit, SEG_DIMENSION, SEG_DIMENSION);
            views.push(texture.create_view(&wgpu::TextureViewDescriptor::default()));
            textures.push(texture);
        }

        let cache = Self {
            stager: MaskStager::new(SEG_DIMENSION, SEG_DIMENSION),
            textures,
            views,
            generation: 0,
        };

        // Start from all-clear masks
        for unit in 0..MASK_UNIT_COUNT {
            cache.write_unit(queue, unit);
        }

        cache
    }

    fn create_texture(device: &wgpu::Device, unit: usize, width: u32, height: u32) -> wgpu::Texture {
        device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&format!("Mask Texture {}", unit)),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        })
    }

    pub fn view(&self, unit: usize) -> &wgpu::TextureView {
        &self.views[unit]
    }

    /// Changes when any texture is reallocated; bind groups referencing the
    /// views must be rebuilt when this moves
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Upload one confidence mask to a unit
    pub fn upload(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        unit: usize,
        data: &[f32],
        width: u32,
        height: u32,
    ) {
        let outcome = self.stager.stage(unit, data, width, height);
        self.apply(device, queue, unit, outcome);
    }

    /// Upload an all-zero mask when no mask exists for the class this frame
    pub fn clear(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        unit: usize,
        width: u32,
        height: u32,
    ) {
        let outcome = self.stager.stage_clear(unit, width, height);
        self.apply(device, queue, unit, outcome);
    }

    fn apply(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        unit: usize,
        outcome: StageOutcome,
    ) {
        match outcome {
            StageOutcome::Unchanged => {}
            StageOutcome::Upload { realloc } => {
                if realloc {
                    let (w, h) = self.stager.dimensions(unit);
                    log::info!("Reallocating mask texture {}: {}x{}", unit, w, h);
                    let texture = Self::create_texture(device, unit, w, h);
                    self.views[unit] =
                        texture.create_view(&wgpu::TextureViewDescriptor::default());
                    self.textures[unit] = texture;
                    self.generation += 1;
                }
                self.write_unit(queue, unit);
            }
        }
    }

    fn write_unit(&self, queue: &wgpu::Queue, unit: usize) {
        let (width, height) = self.stager.dimensions(unit);
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.textures[unit],
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            self.stager.staged(unit),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_covers_full_scale() {
        assert_eq!(quantize(0.0), 0);
        assert_eq!(quantize(1.0), 255);
        assert_eq!(quantize(0.5), 128);
        assert_eq!(quantize(-3.0), 0);
        assert_eq!(quantize(7.0), 255);
    }

    #[test]
    fn full_mask_then_clear_shows_full_difference() {
        let mut stager = MaskStager::new(4, 4);
        let ones = vec![1.0f32; 16];

        assert_eq!(
            stager.stage(0, &ones, 4, 4),
            StageOutcome::Upload { realloc: false }
        );
        assert!(stager.staged(0).iter().all(|&b| b == 255));

        assert_eq!(
            stager.stage_clear(0, 4, 4),
            StageOutcome::Upload { realloc: false }
        );
        assert!(stager.staged(0).iter().all(|&b| b == 0));
    }

    #[test]
    fn identical_reupload_is_detected_unchanged() {
        let mut stager = MaskStager::new(4, 4);
        let mask: Vec<f32> = (0..16).map(|i| i as f32 / 15.0).collect();

        assert!(matches!(
            stager.stage(0, &mask, 4, 4),
            StageOutcome::Upload { .. }
        ));
        assert_eq!(stager.stage(0, &mask, 4, 4), StageOutcome::Unchanged);

        // Clear after clear also skips
        stager.stage_clear(1, 4, 4);
        assert_eq!(stager.stage_clear(1, 4, 4), StageOutcome::Unchanged);
    }

    #[test]
    fn changed_content_uploads_again() {
        let mut stager = MaskStager::new(4, 4);
        let a = vec![0.25f32; 16];
        let mut b = a.clone();
        b[0] = 0.9;

        stager.stage(2, &a, 4, 4);
        assert_eq!(
            stager.stage(2, &b, 4, 4),
            StageOutcome::Upload { realloc: false }
        );
    }

    #[test]
    fn dimension_change_forces_realloc() {
        let mut stager = MaskStager::new(4, 4);
        let small = vec![0.5f32; 16];
        let large = vec![0.5f32; 64];

        stager.stage(3, &small, 4, 4);
        assert_eq!(
            stager.stage(3, &large, 8, 8),
            StageOutcome::Upload { realloc: true }
        );
        assert_eq!(stager.dimensions(3), (8, 8));
        assert_eq!(stager.staged(3).len(), 64);
    }

    #[test]
    fn units_are_independent() {
        let mut stager = MaskStager::new(4, 4);
        let mask = vec![0.75f32; 16];
        stager.stage(0, &mask, 4, 4);
        // Same content on a different unit still uploads
        assert!(matches!(
            stager.stage(1, &mask, 4, 4),
            StageOutcome::Upload { .. }
        ));
    }
}
