//! WebGPU render context: uploads each frame as a texture and draws it with a
//! fullscreen triangle into an offscreen target sized to the surface.

use tracing::{debug, info, instrument, trace};
use wgpu::*;

use super::surface::{ContextFactory, RenderContext};
use crate::error::RenderError;
use crate::pipeline::transform::ProcessedBuffer;
use crate::GpuBackend;

const TARGET_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

const SHADER: &str = r#"
    struct VsOut {
        @builtin(position) position: vec4<f32>,
        @location(0) uv: vec2<f32>,
    };

    @vertex
    fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VsOut {
        // Fullscreen triangle trick
        let uv = vec2<f32>(f32((vertex_index << 1u) & 2u), f32(vertex_index & 2u));
        var out: VsOut;
        out.position = vec4<f32>(uv * vec2<f32>(2.0, -2.0) + vec2<f32>(-1.0, 1.0), 0.0, 1.0);
        out.uv = uv;
        return out;
    }

    @group(0) @binding(0) var frame_texture: texture_2d<f32>;
    @group(0) @binding(1) var frame_sampler: sampler;

    @fragment
    fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
        return textureSample(frame_texture, frame_sampler, in.uv);
    }
"#;

impl GpuBackend {
    pub fn backends(self) -> Backends {
        match self {
            GpuBackend::Vulkan => Backends::VULKAN,
            GpuBackend::Metal => Backends::METAL,
            GpuBackend::Dx12 => Backends::DX12,
            GpuBackend::OpenGl => Backends::GL,
            GpuBackend::Auto => Backends::all(),
        }
    }
}

/// Builds a [`WgpuRenderContext`] per surface, each with its own device.
#[derive(Debug, Clone, Copy)]
pub struct WgpuContextFactory {
    backend: GpuBackend,
}

impl WgpuContextFactory {
    pub fn new(backend: GpuBackend) -> Self {
        Self { backend }
    }
}

impl ContextFactory for WgpuContextFactory {
    fn create(&self, width: u32, height: u32) -> Result<Box<dyn RenderContext>, RenderError> {
        let context = pollster::block_on(WgpuRenderContext::new(self.backend, width, height))?;
        Ok(Box::new(context))
    }
}

/// Frame texture plus the bind group that samples it
struct SourceTexture {
    texture: Texture,
    bind_group: BindGroup,
}

pub struct WgpuRenderContext {
    device: Device,
    queue: Queue,
    pipeline: RenderPipeline,
    bind_group_layout: BindGroupLayout,
    sampler: Sampler,
    target: Texture,
    target_view: TextureView,
    source: Option<SourceTexture>,
}

impl WgpuRenderContext {
    /// Initialize WebGPU
    #[instrument]
    pub async fn new(backend: GpuBackend, width: u32, height: u32) -> Result<Self, RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::ContextCreation(format!(
                "zero-sized surface {width}x{height}"
            )));
        }

        let instance = Instance::new(InstanceDescriptor {
            backends: backend.backends(),
            ..Default::default()
        });

        // Get adapter - prefer high-performance
        let adapter = instance
            .request_adapter(&RequestAdapterOptions {
                power_preference: PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| RenderError::ContextCreation("no suitable GPU adapter found".into()))?;

        info!("GPU: {}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(
                &DeviceDescriptor {
                    label: Some("Edgeview GPU Device"),
                    required_features: Features::empty(),
                    required_limits: Limits::downlevel_defaults(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|e| RenderError::ContextCreation(e.to_string()))?;

        let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("Frame Bind Group Layout"),
            entries: &[
                BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Texture {
                        sample_type: TextureSampleType::Float { filterable: true },
                        view_dimension: TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 1,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Sampler(SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let sampler = device.create_sampler(&SamplerDescriptor {
            label: Some("Frame Sampler"),
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            ..Default::default()
        });

        let pipeline = Self::create_render_pipeline(&device, &bind_group_layout);
        let (target, target_view) = Self::create_target(&device, width, height);

        Ok(Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
            sampler,
            target,
            target_view,
            source: None,
        })
    }

    fn create_target(device: &Device, width: u32, height: u32) -> (Texture, TextureView) {
        let target = device.create_texture(&TextureDescriptor {
            label: Some("Surface Target"),
            size: Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = target.create_view(&TextureViewDescriptor::default());
        (target, view)
    }

    fn create_source(&self, width: u32, height: u32) -> SourceTexture {
        let texture = self.device.create_texture(&TextureDescriptor {
            label: Some("Frame Texture"),
            size: Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&TextureViewDescriptor::default());
        let bind_group = self.device.create_bind_group(&BindGroupDescriptor {
            label: Some("Frame Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(&view),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::Sampler(&self.sampler),
                },
            ],
        });
        SourceTexture {
            texture,
            bind_group,
        }
    }

    fn create_render_pipeline(device: &Device, layout: &BindGroupLayout) -> RenderPipeline {
        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("Display Shader"),
            source: ShaderSource::Wgsl(SHADER.into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("Display Pipeline Layout"),
            bind_group_layouts: &[layout],
            push_constant_ranges: &[],
        });

        device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("Display Pipeline"),
            layout: Some(&pipeline_layout),
            cache: None,
            vertex: VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[],
            },
            fragment: Some(FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(ColorTargetState {
                    format: TARGET_FORMAT,
                    blend: Some(BlendState::REPLACE),
                    write_mask: ColorWrites::ALL,
                })],
            }),
            primitive: PrimitiveState {
                topology: PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: MultisampleState::default(),
            multiview: None,
        })
    }

    fn upload(&mut self, frame: &ProcessedBuffer) {
        let stale = self.source.as_ref().map_or(true, |s| {
            s.texture.width() != frame.width || s.texture.height() != frame.height
        });
        if stale {
            debug!(frame.width, frame.height, "recreating frame texture");
            self.source = Some(self.create_source(frame.width, frame.height));
        }
        let Some(source) = self.source.as_ref() else {
            return;
        };

        self.queue.write_texture(
            ImageCopyTexture {
                texture: &source.texture,
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            &frame.data,
            ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(ProcessedBuffer::BYTES_PER_PIXEL as u32 * frame.width),
                rows_per_image: Some(frame.height),
            },
            Extent3d {
                width: frame.width,
                height: frame.height,
                depth_or_array_layers: 1,
            },
        );
    }
}

impl RenderContext for WgpuRenderContext {
    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        if self.target.width() == width && self.target.height() == height {
            return;
        }
        let (target, view) = Self::create_target(&self.device, width, height);
        self.target = target;
        self.target_view = view;
    }

    fn draw(&mut self, frame: &ProcessedBuffer) -> Result<(), RenderError> {
        self.device.push_error_scope(ErrorFilter::Validation);

        self.upload(frame);
        let Some(source) = self.source.as_ref() else {
            let _ = pollster::block_on(self.device.pop_error_scope());
            return Err(RenderError::Draw("no frame texture".into()));
        };

        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });

        {
            let mut render_pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &self.target_view,
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Clear(Color::BLACK),
                        store: StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            render_pass.set_pipeline(&self.pipeline);
            render_pass.set_bind_group(0, &source.bind_group, &[]);
            render_pass.draw(0..3, 0..1); // Fullscreen triangle
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        let _ = self.device.poll(Maintain::Poll);

        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(RenderError::Draw(err.to_string()));
        }
        trace!(frame.width, frame.height, "frame drawn");
        Ok(())
    }
}
