//! Compositor pass
//!
//! Single full-screen pass that renders both feed slots into the output
//! texture. The quad layout shows masks and cropped video side by side for
//! alignment; the overlay layout renders the segmented cutouts with soft
//! alpha and tinting. All per-frame parameters travel in one uniform
//! buffer so switching layouts is a field write, not a pipeline swap.

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use super::mask_cache::{MaskTextureCache, MASK_UNIT_COUNT};

/// How the two feed slots are arranged in the output
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LayoutMode {
    /// Four horizontal quarters: slot 0 masks, slot 0 video, slot 1 masks,
    /// slot 1 video
    Quad,
    /// Two halves, each compositing its slot's cutout over transparency
    Overlay,
}

impl LayoutMode {
    pub fn toggled(self) -> Self {
        match self {
            LayoutMode::Quad => LayoutMode::Overlay,
            LayoutMode::Overlay => LayoutMode::Quad,
        }
    }

    fn as_u32(self) -> u32 {
        match self {
            LayoutMode::Quad => 0,
            LayoutMode::Overlay => 1,
        }
    }
}

/// Uniform block for the composite shader; layout mirrors `Params` in
/// composite.wgsl
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CompositeParams {
    /// Normalized crop rect per slot (x, y, w, h in video UV)
    pub capture_areas: [[f32; 4]; 2],
    /// Aspect-fit placement rect per slot, normalized within its half
    pub placements: [[f32; 4]; 2],
    /// RGB tint per mask unit (alpha unused)
    pub tints: [[f32; 4]; MASK_UNIT_COUNT],
    /// x: brightness, y: contrast, z: mirror (0/1), w: flash amount
    pub adjust: [f32; 4],
    /// x: cutout ramp low, y: ramp high, zw: mask texel size
    pub cutout: [f32; 4],
    /// x: layout mode, y: tint overlay enabled
    pub mode: [u32; 4],
}

impl CompositeParams {
    pub fn set_layout(&mut self, layout: LayoutMode) {
        self.mode[0] = layout.as_u32();
    }

    pub fn set_tint_enabled(&mut self, enabled: bool) {
        self.mode[1] = enabled as u32;
    }
}

impl Default for CompositeParams {
    fn default() -> Self {
        Self {
            capture_areas: [[0.0, 0.0, 1.0, 1.0]; 2],
            placements: [[0.0, 0.0, 1.0, 1.0]; 2],
            tints: [[1.0, 1.0, 1.0, 1.0]; MASK_UNIT_COUNT],
            adjust: [0.0, 1.0, 0.0, 0.0],
            cutout: [0.3, 0.7, 0.0, 0.0],
            mode: [LayoutMode::Quad.as_u32(), 1, 0, 0],
        }
    }
}

pub struct Compositor {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    params_buffer: wgpu::Buffer,
    bind_group: Option<wgpu::BindGroup>,
    /// Mask cache generation the bind group was built against
    bound_mask_generation: u64,
    /// Video texture generation the bind group was built against
    bound_video_generation: u64,
}

impl Compositor {
    pub fn new(device: &wgpu::Device, output_format: wgpu::TextureFormat) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Composite Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/composite.wgsl").into()),
        });

        let mut entries = vec![
            // Video texture
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
        ];
        // Mask textures at bindings 2..=5
        for unit in 0..MASK_UNIT_COUNT {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: 2 + unit as u32,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
        }
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: 2 + MASK_UNIT_COUNT as u32,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Composite Bind Group Layout"),
            entries: &entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Composite Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Composite Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: output_format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Composite Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Composite Params"),
            contents: bytemuck::bytes_of(&CompositeParams::default()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        Self {
            pipeline,
            bind_group_layout,
            sampler,
            params_buffer,
            bind_group: None,
            bound_mask_generation: 0,
            bound_video_generation: 0,
        }
    }

    /// Rebuild the bind group when either the video texture or a mask
    /// texture has been (re)allocated since the last build
    pub fn ensure_bind_group(
        &mut self,
        device: &wgpu::Device,
        video_view: &wgpu::TextureView,
        video_generation: u64,
        mask_cache: &MaskTextureCache,
    ) {
        let current = (video_generation, mask_cache.generation());
        if self.bind_group.is_some()
            && current == (self.bound_video_generation, self.bound_mask_generation)
        {
            return;
        }

        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(video_view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(&self.sampler),
            },
        ];
        for unit in 0..MASK_UNIT_COUNT {
            entries.push(wgpu::BindGroupEntry {
                binding: 2 + unit as u32,
                resource: wgpu::BindingResource::TextureView(mask_cache.view(unit)),
            });
        }
        entries.push(wgpu::BindGroupEntry {
            binding: 2 + MASK_UNIT_COUNT as u32,
            resource: self.params_buffer.as_entire_binding(),
        });

        self.bind_group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Composite Bind Group"),
            layout: &self.bind_group_layout,
            entries: &entries,
        }));
        self.bound_video_generation = video_generation;
        self.bound_mask_generation = mask_cache.generation();
    }

    pub fn write_params(&self, queue: &wgpu::Queue, params: &CompositeParams) {
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(params));
    }

    /// Record the composite pass into `encoder`, clearing `target` first
    pub fn render(&self, encoder: &mut wgpu::CommandEncoder, target: &wgpu::TextureView) {
        let Some(bind_group) = &self.bind_group else {
            return;
        };

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Composite Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.draw(0..3, 0..1);
    }
}

/// CPU mirror of the quad layout mapping, used by the capture path to find
/// which output rectangle holds a slot's video quarter
pub fn quad_video_rect(slot: usize, output_w: u32, output_h: u32) -> (u32, u32, u32, u32) {
    let quarter_w = output_w / 4;
    let quarter = slot as u32 * 2 + 1;
    (quarter * quarter_w, 0, quarter_w, output_h)
}

/// CPU mirror of the overlay layout mapping: the half of the output a slot
/// renders into
pub fn overlay_half_rect(slot: usize, output_w: u32, output_h: u32) -> (u32, u32, u32, u32) {
    let half_w = output_w / 2;
    (slot as u32 * half_w, 0, half_w, output_h)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_match_wgsl_block_size() {
        // 2 + 2 + 4 vec4s of f32 plus adjust, cutout, and mode vec4s
        assert_eq!(std::mem::size_of::<CompositeParams>(), 176);
        assert_eq!(std::mem::size_of::<CompositeParams>() % 16, 0);
    }

    #[test]
    fn layout_toggle_alternates() {
        assert_eq!(LayoutMode::Quad.toggled(), LayoutMode::Overlay);
        assert_eq!(LayoutMode::Overlay.toggled(), LayoutMode::Quad);
        assert_eq!(LayoutMode::Quad.as_u32(), 0);
        assert_eq!(LayoutMode::Overlay.as_u32(), 1);
    }

    #[test]
    fn mode_fields_update_in_place() {
        let mut params = CompositeParams::default();
        params.set_layout(LayoutMode::Overlay);
        assert_eq!(params.mode[0], 1);
        params.set_tint_enabled(false);
        assert_eq!(params.mode[1], 0);
    }

    #[test]
    fn quad_video_rects_land_in_quarters_two_and_four() {
        assert_eq!(quad_video_rect(0, 1920, 1080), (480, 0, 480, 1080));
        assert_eq!(quad_video_rect(1, 1920, 1080), (1440, 0, 480, 1080));
    }

    #[test]
    fn overlay_halves_split_the_output() {
        assert_eq!(overlay_half_rect(0, 1920, 1080), (0, 0, 960, 1080));
        assert_eq!(overlay_half_rect(1, 1920, 1080), (960, 0, 960, 1080));
    }
}
