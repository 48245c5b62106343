//! Application state holding wgpu graphics context
//!
//! This module contains the core graphics state including the wgpu device,
//! queue, surface, and configuration, plus the per-frame booth orchestration:
//! camera upload, inference scheduling, mask upload, presence routing, the
//! composite pass, and still capture.

use std::sync::Arc;
use std::time::Instant;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::window::Window;

use crate::camera::{CameraCapture, RegionExtractor};
use crate::ml::{MaskClass, SegmentationEngine, SEG_DIMENSION};
use crate::pipeline::{PipelineState, SLOT_COUNT};
use crate::presence::{SequenceEvent, Stage};
use crate::render::capture::capture_region;
use crate::render::compositor::{quad_video_rect, overlay_half_rect, CompositeParams, Compositor, LayoutMode};
use crate::render::MaskTextureCache;
use crate::settings::BoothSettings;
use crate::crop::RectF;

/// Output canvas resolution
const OUTPUT_WIDTH: u32 = 1920;
const OUTPUT_HEIGHT: u32 = 1080;

/// Per-frame decay of the capture flash
const FLASH_DECAY: f32 = 0.85;

/// Main application state
pub struct App {
    /// Reference to the window
    window: Arc<Window>,
    /// The wgpu surface for presenting rendered frames
    surface: wgpu::Surface<'static>,
    /// The wgpu device for creating GPU resources
    device: wgpu::Device,
    /// The command queue for submitting GPU work
    queue: wgpu::Queue,
    /// Surface configuration
    config: wgpu::SurfaceConfiguration,
    /// Current window size in physical pixels
    size: PhysicalSize<u32>,

    // Camera capture
    camera: Option<CameraCapture>,
    camera_texture: Option<wgpu::Texture>,
    camera_texture_view: Option<wgpu::TextureView>,
    last_camera_frame: u64,
    /// Bumped whenever the camera texture is (re)created
    video_generation: u64,
    /// Source size the slots were last recomputed against
    last_source_size: (u32, u32),

    // Segmentation + presence
    engine: Option<SegmentationEngine>,
    extractor: RegionExtractor,

    // Booth state
    pipeline: PipelineState,
    settings: BoothSettings,
    flash: f32,
    pending_captures: Vec<usize>,

    // Compositing
    mask_cache: MaskTextureCache,
    compositor: Compositor,
    /// Default black texture bound as video until a camera frame arrives
    default_texture_view: wgpu::TextureView,

    // Output texture (what gets presented and captured)
    output_texture: wgpu::Texture,
    output_texture_view: wgpu::TextureView,
    output_bind_group: wgpu::BindGroup,

    // Present pipeline (output -> window)
    passthrough_pipeline: wgpu::RenderPipeline,

    // egui integration
    egui_ctx: egui::Context,
    egui_state: egui_winit::State,
    egui_renderer: egui_wgpu::Renderer,

    // Frame timing
    frame_count: u64,
    fps: f64,
    last_fps_update: Instant,
    frames_since_update: u64,
}

impl App {
    /// Create a new App instance with initialized wgpu context
    pub async fn new(window: Arc<Window>) -> Self {
        let size = window.inner_size();

        // Create wgpu instance
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .expect("Failed to create surface");

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .expect("Failed to find suitable GPU adapter");

        log::info!("Using GPU: {}", adapter.get_info().name);
        log::info!("Backend: {:?}", adapter.get_info().backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Photo Booth Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .expect("Failed to create device");

        let surface_caps = surface.get_capabilities(&adapter);

        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);

        log::info!("Surface format: {:?}", surface_format);

        let present_mode = if surface_caps
            .present_modes
            .contains(&wgpu::PresentMode::Mailbox)
        {
            wgpu::PresentMode::Mailbox
        } else {
            wgpu::PresentMode::Fifo
        };

        log::info!("Present mode: {:?}", present_mode);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 1,
        };

        surface.configure(&device, &config);

        // Create output texture
        let output_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Output Texture"),
            size: wgpu::Extent3d {
                width: OUTPUT_WIDTH,
                height: OUTPUT_HEIGHT,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Bgra8UnormSrgb,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let output_texture_view =
            output_texture.create_view(&wgpu::TextureViewDescriptor::default());

        // Create sampler
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        // Create passthrough pipeline (output -> window)
        let passthrough_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Passthrough Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/passthrough.wgsl").into()),
        });

        let passthrough_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Passthrough Bind Group Layout"),
                entries: &[
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
                ],
            });

        let passthrough_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Passthrough Pipeline Layout"),
                bind_group_layouts: &[&passthrough_bind_group_layout],
                push_constant_ranges: &[],
            });

        let passthrough_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Passthrough Pipeline"),
            layout: Some(&passthrough_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &passthrough_shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &passthrough_shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        // Output bind group is cached - the output texture never changes
        let output_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Output Bind Group"),
            layout: &passthrough_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&output_texture_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
            ],
        });

        // Default black texture stands in for the video until a frame arrives
        let default_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Default Texture"),
            size: wgpu::Extent3d {
                width: 4,
                height: 4,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let black_pixels = vec![0u8; 4 * 4 * 4];
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &default_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &black_pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * 4),
                rows_per_image: Some(4),
            },
            wgpu::Extent3d {
                width: 4,
                height: 4,
                depth_or_array_layers: 1,
            },
        );
        let default_texture_view =
            default_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let mask_cache = MaskTextureCache::new(&device, &queue);
        let compositor = Compositor::new(&device, wgpu::TextureFormat::Bgra8UnormSrgb);

        // Initialize egui
        let egui_ctx = egui::Context::default();
        let mut style = (*egui_ctx.style()).clone();
        style.visuals.window_shadow = egui::epaint::Shadow::NONE;
        egui_ctx.set_style(style);

        let egui_state = egui_winit::State::new(
            egui_ctx.clone(),
            egui::ViewportId::ROOT,
            &window,
            Some(window.scale_factor() as f32),
            None,
            None,
        );

        let egui_renderer = egui_wgpu::Renderer::new(&device, surface_format, None, 1, false);

        let settings = BoothSettings::load();
        let pipeline = PipelineState::new([
            rect_from_percent(settings.crops[0].as_array()),
            rect_from_percent(settings.crops[1].as_array()),
        ]);

        let now = Instant::now();

        Self {
            window,
            surface,
            device,
            queue,
            config,
            size,
            camera: None,
            camera_texture: None,
            camera_texture_view: None,
            last_camera_frame: 0,
            video_generation: 0,
            last_source_size: (0, 0),
            engine: None,
            extractor: RegionExtractor::new(SEG_DIMENSION, SEG_DIMENSION),
            pipeline,
            settings,
            flash: 0.0,
            pending_captures: Vec::new(),
            mask_cache,
            compositor,
            default_texture_view,
            output_texture,
            output_texture_view,
            output_bind_group,
            passthrough_pipeline,
            egui_ctx,
            egui_state,
            egui_renderer,
            frame_count: 0,
            fps: 60.0,
            last_fps_update: now,
            frames_since_update: 0,
        }
    }

    /// Handle a window event, returning true if egui consumed it
    pub fn handle_window_event(&mut self, event: &WindowEvent) -> bool {
        let response = self.egui_state.on_window_event(&self.window, event);
        response.consumed
    }

    /// Resize the surface
    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.size = new_size;
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.device, &self.config);
        }
    }

    /// Get current size
    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    pub fn target_fps(&self) -> u32 {
        self.settings.target_fps
    }

    pub fn camera_index(&self) -> u32 {
        self.settings.camera_index
    }

    pub fn toggle_layout(&mut self) {
        self.settings.layout = self.settings.layout.toggled();
        log::info!("Layout: {:?}", self.settings.layout);
    }

    pub fn toggle_mirror(&mut self) {
        self.settings.mirror = !self.settings.mirror;
        log::info!("Mirror: {}", self.settings.mirror);
    }

    pub fn save_settings(&self) {
        match self.settings.save() {
            Ok(()) => log::info!("Settings saved"),
            Err(e) => log::error!("{}", e),
        }
    }

    /// Connect to a camera
    pub fn connect_camera(&mut self, camera_index: u32) {
        log::info!("Connecting to camera {}", camera_index);

        match CameraCapture::new(camera_index) {
            Ok(capture) => {
                self.camera = Some(capture);
                self.settings.camera_index = camera_index;
                // Texture is created lazily when the first frame arrives
                self.camera_texture = None;
                self.camera_texture_view = None;
                self.last_camera_frame = 0;
                self.last_source_size = (0, 0);

                if self.engine.is_none() {
                    self.init_engine();
                }
            }
            Err(e) => {
                log::error!("Failed to connect camera: {}", e);
            }
        }
    }

    /// Disconnect current camera
    pub fn disconnect_camera(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            camera.stop();
        }
        self.camera_texture = None;
        self.camera_texture_view = None;
        log::info!("Camera disconnected");
    }

    fn init_engine(&mut self) {
        log::info!("Initializing segmentation engine...");
        match SegmentationEngine::new() {
            Ok(engine) => self.engine = Some(engine),
            Err(e) => log::warn!("Failed to initialize segmentation: {}", e),
        }
    }

    /// Poll for a new camera frame and upload it to the video texture
    fn update_camera(&mut self) {
        let Some(camera) = &self.camera else { return };
        let Some(frame) = camera.latest_frame() else {
            return;
        };

        if frame.frame_number <= self.last_camera_frame && self.camera_texture.is_some() {
            return;
        }
        self.last_camera_frame = frame.frame_number;

        let needs_new_texture = match &self.camera_texture {
            None => true,
            Some(tex) => {
                let size = tex.size();
                size.width != frame.width || size.height != frame.height
            }
        };

        if needs_new_texture {
            log::info!("Creating video texture: {}x{}", frame.width, frame.height);

            let camera_texture = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("Video Texture"),
                size: wgpu::Extent3d {
                    width: frame.width,
                    height: frame.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8UnormSrgb,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });

            self.camera_texture_view =
                Some(camera_texture.create_view(&wgpu::TextureViewDescriptor::default()));
            self.camera_texture = Some(camera_texture);
            self.video_generation += 1;
        }

        if let Some(camera_texture) = &self.camera_texture {
            self.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: camera_texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                &frame.data,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(frame.width * 4),
                    rows_per_image: Some(frame.height),
                },
                wgpu::Extent3d {
                    width: frame.width,
                    height: frame.height,
                    depth_or_array_layers: 1,
                },
            );
        }

        if self.last_source_size != (frame.width, frame.height) {
            self.last_source_size = (frame.width, frame.height);
            self.recompute_slots();
        }
    }

    /// Push the persisted crop rects into the pipeline and re-derive
    /// pixel crops and placements
    fn recompute_slots(&mut self) {
        for i in 0..SLOT_COUNT {
            let pct = self.settings.crops[i].as_array();
            self.pipeline
                .slot_mut(i)
                .crop
                .set_percent(rect_from_percent(pct));
        }
        let (sw, sh) = self.last_source_size;
        self.pipeline.recompute_slots(
            sw as f32,
            sh as f32,
            (OUTPUT_WIDTH / 2) as f32,
            OUTPUT_HEIGHT as f32,
        );
    }

    /// Schedule this frame's inference job, if any
    fn update_inference(&mut self) {
        let Some(camera) = &self.camera else { return };
        let Some(engine) = &self.engine else { return };
        if !camera.is_ready() {
            return;
        }
        let Some(frame) = camera.latest_frame() else {
            return;
        };

        let engine_ref = &*engine;
        let Some(plan) = self.pipeline.plan(|s| engine_ref.is_in_flight(s)) else {
            return;
        };

        let region = self.pipeline.slot(plan.slot).crop.pixels();
        if let Some(crop) = self.extractor.extract(&frame, region) {
            engine_ref.submit(plan.slot, crop, frame.frame_number, plan.run_presence);
        }
    }

    /// Drain finished inference results: upload masks, route presence
    fn drain_results(&mut self, now: Instant) {
        let mut fired = Vec::new();

        for slot in 0..SLOT_COUNT {
            let Some(mut result) = self
                .engine
                .as_ref()
                .and_then(|engine| engine.take_result(slot))
            else {
                continue;
            };

            if let Some(ref mut masks) = result.masks {
                let (w, h) = (masks.width, masks.height);
                // Unit layout: cutout then tint channel per slot
                let channels = [
                    (MaskClass::Background, slot * 2),
                    (MaskClass::Clothes, slot * 2 + 1),
                ];
                for (class, unit) in channels {
                    match masks.take(class) {
                        Some(mask) => {
                            self.mask_cache
                                .upload(&self.device, &self.queue, unit, &mask, w, h)
                        }
                        None => self.mask_cache.clear(&self.device, &self.queue, unit, w, h),
                    }
                }
            }

            if let Some(found) = result.presence {
                if let Some(event) = self.pipeline.handle_presence(slot, found, now) {
                    fired.push((slot, event));
                }
            }
        }

        for (slot, event) in fired {
            self.handle_sequence_event(slot, event);
        }
    }

    fn handle_sequence_event(&mut self, slot: usize, event: SequenceEvent) {
        match event {
            SequenceEvent::Prepare => log::info!("Slot {}: countdown armed", slot),
            SequenceEvent::Count(n) => log::debug!("Slot {}: {}", slot, n),
            SequenceEvent::Capture => {
                log::info!("Slot {}: capture!", slot);
                self.flash = 1.0;
                self.pending_captures.push(slot);
            }
        }
    }

    /// Save pending still captures from the output texture
    fn run_pending_captures(&mut self) {
        if self.pending_captures.is_empty() {
            return;
        }
        for slot in std::mem::take(&mut self.pending_captures) {
            let rect = match self.settings.layout {
                LayoutMode::Quad => quad_video_rect(slot, OUTPUT_WIDTH, OUTPUT_HEIGHT),
                LayoutMode::Overlay => overlay_half_rect(slot, OUTPUT_WIDTH, OUTPUT_HEIGHT),
            };
            let label = format!("slot{}", slot);
            if let Err(e) = capture_region(
                &self.device,
                &self.queue,
                &self.output_texture,
                rect,
                &label,
            ) {
                log::error!("Capture failed: {}", e);
            }
        }
    }

    fn composite_params(&self) -> CompositeParams {
        let mut params = CompositeParams::default();
        let (sw, sh) = self.last_source_size;

        for i in 0..SLOT_COUNT {
            let slot = self.pipeline.slot(i);
            params.capture_areas[i] = slot.crop.normalized(sw as f32, sh as f32);
            let place = slot.placement();
            params.placements[i] = [place.x, place.y, place.w, place.h];
        }
        for (i, tint) in self.settings.tints.iter().enumerate() {
            params.tints[i] = [tint[0], tint[1], tint[2], 1.0];
        }
        params.adjust = [
            self.settings.brightness,
            self.settings.contrast,
            self.settings.mirror as u32 as f32,
            self.flash,
        ];
        params.cutout = [
            self.settings.cutout_low,
            self.settings.cutout_high,
            1.0 / SEG_DIMENSION as f32,
            1.0 / SEG_DIMENSION as f32,
        ];
        params.set_layout(self.settings.layout);
        params.set_tint_enabled(self.settings.tint_enabled);
        params
    }

    /// Render a frame
    pub fn render(&mut self) -> Result<(), wgpu::SurfaceError> {
        let now = Instant::now();

        self.update_camera();
        self.update_inference();
        self.drain_results(now);

        let fired = self.pipeline.tick(now);
        for (slot, event) in fired {
            self.handle_sequence_event(slot, event);
        }

        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });

        // Composite both slots into the output texture
        let video_view = self
            .camera_texture_view
            .as_ref()
            .unwrap_or(&self.default_texture_view)
            .clone();
        self.compositor.ensure_bind_group(
            &self.device,
            &video_view,
            self.video_generation,
            &self.mask_cache,
        );
        let params = self.composite_params();
        self.compositor.write_params(&self.queue, &params);
        self.compositor.render(&mut encoder, &self.output_texture_view);

        // Present the output texture to the window
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Present Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
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

            render_pass.set_pipeline(&self.passthrough_pipeline);
            render_pass.set_bind_group(0, &self.output_bind_group, &[]);
            render_pass.draw(0..3, 0..1);
        }

        // Render egui UI
        self.render_ui(&mut encoder, &view);

        self.queue.submit(std::iter::once(encoder.finish()));

        // Stills read from the frame just composited
        self.run_pending_captures();

        output.present();

        self.flash *= FLASH_DECAY;
        if self.flash < 0.01 {
            self.flash = 0.0;
        }

        self.update_fps();

        Ok(())
    }

    fn countdown_text(stage: Stage) -> Option<String> {
        match stage {
            Stage::Idle => None,
            Stage::Preparing => Some("Get ready...".to_string()),
            Stage::Counting(n) => Some(format!("{}", n)),
        }
    }

    fn render_ui(&mut self, encoder: &mut wgpu::CommandEncoder, view: &wgpu::TextureView) {
        let raw_input = self.egui_state.take_egui_input(&self.window);

        // Snapshot state before running egui
        let fps = self.fps;
        let camera_connected = self.camera.is_some();
        let camera_frame_count = self.camera.as_ref().map(|c| c.frame_count()).unwrap_or(0);
        let engine_ready = self.engine.as_ref().map(|e| e.is_ready()).unwrap_or(false);
        let engine_initializing = self.engine.is_some() && !engine_ready;
        let available_cameras = CameraCapture::list_cameras();
        let stages: [Stage; SLOT_COUNT] =
            std::array::from_fn(|i| self.pipeline.sequence(i).stage());
        let window_size = self.size;

        let mut settings = self.settings.clone();
        let old_crops: Vec<[f32; 4]> = settings.crops.iter().map(|c| c.as_array()).collect();

        let mut connect_camera_index: Option<u32> = None;
        let mut disconnect_camera = false;
        let mut init_engine = false;
        let mut save_settings = false;

        let full_output = self.egui_ctx.run(raw_input, |ctx| {
            egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.label("Photo Booth");
                    ui.separator();
                    ui.label(format!("FPS: {:.1}", fps));
                    ui.separator();
                    if camera_connected {
                        ui.label(format!("Camera frames: {}", camera_frame_count));
                        ui.separator();
                    }
                    ui.label(format!("Layout: {:?}", settings.layout));
                    if ui.button("Switch").clicked() {
                        settings.layout = settings.layout.toggled();
                    }
                });
            });

            egui::SidePanel::left("controls").show(ctx, |ui| {
                ui.heading("Camera");
                ui.separator();

                if camera_connected {
                    ui.label("Camera connected");
                    if ui.button("Disconnect").clicked() {
                        disconnect_camera = true;
                    }
                } else if available_cameras.is_empty() {
                    ui.label("No cameras found");
                } else {
                    ui.label("Available cameras:");
                    for cam in &available_cameras {
                        if ui.button(format!("{}: {}", cam.index, cam.name)).clicked() {
                            connect_camera_index = Some(cam.index);
                        }
                    }
                }

                ui.separator();
                ui.heading("Crops");
                for (i, crop) in settings.crops.iter_mut().enumerate() {
                    ui.label(format!("Slot {}", i));
                    ui.add(egui::Slider::new(&mut crop.x, 0.0..=98.0).text("X %"));
                    ui.add(egui::Slider::new(&mut crop.y, 0.0..=98.0).text("Y %"));
                    ui.add(egui::Slider::new(&mut crop.w, 2.0..=100.0).text("W %"));
                    ui.add(egui::Slider::new(&mut crop.h, 2.0..=100.0).text("H %"));
                    ui.add_space(4.0);
                }

                ui.separator();
                ui.heading("Video");
                ui.add(egui::Slider::new(&mut settings.brightness, -1.0..=1.0).text("Brightness"));
                ui.add(egui::Slider::new(&mut settings.contrast, 0.0..=2.0).text("Contrast"));
                ui.checkbox(&mut settings.mirror, "Mirror");

                ui.separator();
                ui.heading("Cutout");
                ui.add(egui::Slider::new(&mut settings.cutout_low, 0.0..=1.0).text("Ramp low"));
                ui.add(egui::Slider::new(&mut settings.cutout_high, 0.0..=1.0).text("Ramp high"));
                ui.checkbox(&mut settings.tint_enabled, "Tint clothes");

                for (i, tint) in settings.tints.iter_mut().enumerate() {
                    ui.horizontal(|ui| {
                        ui.label(format!("Tint {}:", i));
                        let mut color = egui::Color32::from_rgb(
                            (tint[0] * 255.0) as u8,
                            (tint[1] * 255.0) as u8,
                            (tint[2] * 255.0) as u8,
                        );
                        if ui.color_edit_button_srgba(&mut color).changed() {
                            *tint = [
                                color.r() as f32 / 255.0,
                                color.g() as f32 / 255.0,
                                color.b() as f32 / 255.0,
                            ];
                        }
                    });
                }

                ui.separator();
                ui.heading("Detection");
                if engine_ready {
                    ui.label("Models loaded");
                    for (i, stage) in stages.iter().enumerate() {
                        ui.label(format!("Slot {}: {:?}", i, stage));
                    }
                } else if engine_initializing {
                    ui.label("Initializing...");
                } else {
                    ui.label("Not initialized");
                    if ui.button("Initialize").clicked() {
                        init_engine = true;
                    }
                }

                ui.separator();
                if ui.button("Save settings").clicked() {
                    save_settings = true;
                }
            });

            // Countdown overlays, one per output half
            for (i, stage) in stages.iter().enumerate() {
                if let Some(text) = Self::countdown_text(*stage) {
                    let x = window_size.width as f32 * (0.25 + 0.5 * i as f32);
                    let y = window_size.height as f32 * 0.4;
                    egui::Area::new(egui::Id::new(("countdown", i)))
                        .fixed_pos(egui::pos2(x, y))
                        .pivot(egui::Align2::CENTER_CENTER)
                        .show(ctx, |ui| {
                            ui.label(
                                egui::RichText::new(text)
                                    .size(72.0)
                                    .strong()
                                    .color(egui::Color32::WHITE),
                            );
                        });
                }
            }
        });

        // Apply UI actions
        settings.sanitize();
        let crops_changed = settings
            .crops
            .iter()
            .zip(&old_crops)
            .any(|(c, old)| c.as_array() != *old);
        self.settings = settings;
        if crops_changed {
            self.recompute_slots();
        }
        if let Some(idx) = connect_camera_index {
            self.connect_camera(idx);
        }
        if disconnect_camera {
            self.disconnect_camera();
        }
        if init_engine {
            self.init_engine();
        }
        if save_settings {
            self.save_settings();
        }

        self.egui_state
            .handle_platform_output(&self.window, full_output.platform_output);

        let paint_jobs = self
            .egui_ctx
            .tessellate(full_output.shapes, full_output.pixels_per_point);

        for (id, image_delta) in &full_output.textures_delta.set {
            self.egui_renderer
                .update_texture(&self.device, &self.queue, *id, image_delta);
        }

        let screen_descriptor = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [self.config.width, self.config.height],
            pixels_per_point: self.window.scale_factor() as f32,
        };

        self.egui_renderer.update_buffers(
            &self.device,
            &self.queue,
            encoder,
            &paint_jobs,
            &screen_descriptor,
        );

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("egui Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            let render_pass_static: &mut wgpu::RenderPass<'static> =
                unsafe { std::mem::transmute(&mut render_pass) };

            self.egui_renderer
                .render(render_pass_static, &paint_jobs, &screen_descriptor);
        }

        for id in &full_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }
    }

    fn update_fps(&mut self) {
        self.frame_count += 1;
        self.frames_since_update += 1;

        let now = Instant::now();
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f64();
        if elapsed >= 1.0 {
            self.fps = self.frames_since_update as f64 / elapsed;
            self.frames_since_update = 0;
            self.last_fps_update = now;
        }
    }
}

fn rect_from_percent(pct: [f32; 4]) -> RectF {
    RectF::new(pct[0], pct[1], pct[2], pct[3])
}
