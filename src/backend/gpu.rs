use std::collections::HashMap;
use std::sync::OnceLock;

use crate::{
    PixelBuffer, PixfxError, PixfxResult,
    backend::PipelineState,
    filters::{self, Filter},
};

/// Capabilities reported by the one-shot GPU probe.
#[derive(Clone, Copy, Debug)]
pub struct GpuCaps {
    pub max_texture_size: u32,
}

static PROBE: OnceLock<Option<GpuCaps>> = OnceLock::new();

/// Probe GPU availability exactly once per process. Absence of an adapter
/// is a normal branch, never an error.
pub fn probe() -> Option<GpuCaps> {
    *PROBE.get_or_init(|| {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }));
        match adapter {
            Ok(adapter) => {
                let caps = GpuCaps {
                    max_texture_size: adapter.limits().max_texture_dimension_2d,
                };
                tracing::debug!(max_texture_size = caps.max_texture_size, "gpu probe ok");
                Some(caps)
            }
            Err(err) => {
                tracing::debug!(?err, "gpu probe found no adapter");
                None
            }
        }
    })
}

struct FilterProgram {
    pipeline: wgpu::RenderPipeline,
}

struct CachedTexture {
    texture: wgpu::Texture,
    width: u32,
    height: u32,
}

/// How a filter pass reads its source texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sampling {
    Linear,
    Nearest,
    /// The shader uses `textureLoad` only and binds no sampler.
    LoadOnly,
}

/// One full-surface GPU draw. `params` is appended after the implicit
/// `vec4(out_w, out_h, src_w, src_h)` header and must stay vec4-aligned.
pub struct PassSpec<'s> {
    pub cache_key: String,
    pub fragment: &'s str,
    pub params: Vec<f32>,
    pub data: Option<Vec<f32>>,
    pub aux: Option<&'s PixelBuffer>,
    pub sampling: Sampling,
    pub output_size: (u32, u32),
}

const VERTEX_SOURCE: &str = r#"
@vertex
fn vs(@builtin(vertex_index) vi: u32) -> @builtin(position) vec4<f32> {
  var p = array<vec2<f32>, 3>(
    vec2<f32>(-1.0, -1.0),
    vec2<f32>( 3.0, -1.0),
    vec2<f32>(-1.0,  3.0),
  );
  return vec4<f32>(p[vi], 0.0, 1.0);
}
"#;

/// Per-invocation GPU context threaded through a filter chain. Textures
/// are cheap reference-counted handles; the program cache is borrowed
/// from the owning backend for the duration of the chain.
pub struct GpuState<'a> {
    device: wgpu::Device,
    queue: wgpu::Queue,
    programs: &'a mut HashMap<String, FilterProgram>,
    sampler_linear: wgpu::Sampler,
    sampler_nearest: wgpu::Sampler,
    original: wgpu::Texture,
    source: wgpu::Texture,
    target: Option<wgpu::Texture>,
    /// Monotonic pass index; pass 0 reads `original` instead of `source`.
    pub pass: u32,
    /// Remaining pass countdown shared across the whole chain. Multi-pass
    /// filters must inflate this before running their extra passes.
    pub passes: u32,
    pub source_width: u32,
    pub source_height: u32,
}

impl GpuState<'_> {
    fn program_for(&mut self, spec: &PassSpec<'_>) -> PixfxResult<wgpu::RenderPipeline> {
        if let Some(program) = self.programs.get(&spec.cache_key) {
            return Ok(program.pipeline.clone());
        }

        let source = format!("{VERTEX_SOURCE}\n{}", spec.fragment);

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("pixfx_filter_shader"),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("pixfx_filter_pipeline"),
                layout: None,
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs"),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    buffers: &[],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some("fs"),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: wgpu::TextureFormat::Rgba8Unorm,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(PixfxError::shader(&spec.cache_key, err.to_string()));
        }

        tracing::debug!(key = %spec.cache_key, "compiled filter program");
        self.programs.insert(
            spec.cache_key.clone(),
            FilterProgram {
                pipeline: pipeline.clone(),
            },
        );
        Ok(pipeline)
    }

    /// Execute one full-surface draw: bind the (cached) program, upload
    /// the pass parameters, draw into the target texture, then swap the
    /// source/target roles and advance the pass counters.
    pub fn run_pass(&mut self, spec: PassSpec<'_>) -> PixfxResult<()> {
        if !spec.params.len().is_multiple_of(4) {
            return Err(PixfxError::pipeline(
                "pass params must be vec4-aligned (len % 4 == 0)",
            ));
        }
        let (out_w, out_h) = spec.output_size;
        let pipeline = self.program_for(&spec)?;

        let mut params = Vec::with_capacity(4 + spec.params.len());
        params.extend_from_slice(&[
            out_w as f32,
            out_h as f32,
            self.source_width as f32,
            self.source_height as f32,
        ]);
        params.extend_from_slice(&spec.params);

        let params_buf = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("pixfx_pass_params"),
            size: (params.len() * 4) as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.queue
            .write_buffer(&params_buf, 0, bytemuck::cast_slice(&params));

        let data_buf = spec.data.as_ref().map(|data| {
            let buf = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("pixfx_pass_data"),
                size: (data.len() * 4) as u64,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            self.queue.write_buffer(&buf, 0, bytemuck::cast_slice(data));
            buf
        });

        let aux_tex = match spec.aux {
            Some(image) => Some(upload_texture(
                &self.device,
                &self.queue,
                image,
                wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            )?),
            None => None,
        };

        let needs_target = match &self.target {
            Some(t) => t.width() != out_w || t.height() != out_h,
            None => true,
        };
        if needs_target {
            self.target = Some(create_texture(&self.device, out_w, out_h, ping_pong_usages())?);
        }

        let read = if self.pass == 0 {
            &self.original
        } else {
            &self.source
        };
        let read_view = read.create_view(&wgpu::TextureViewDescriptor::default());
        let Some(target) = self.target.take() else {
            return Err(PixfxError::pipeline("ping-pong target texture missing"));
        };
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());

        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&read_view),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: params_buf.as_entire_binding(),
            },
        ];
        match spec.sampling {
            Sampling::Linear => entries.push(wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(&self.sampler_linear),
            }),
            Sampling::Nearest => entries.push(wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(&self.sampler_nearest),
            }),
            Sampling::LoadOnly => {}
        }
        if let Some(buf) = &data_buf {
            entries.push(wgpu::BindGroupEntry {
                binding: 3,
                resource: buf.as_entire_binding(),
            });
        }
        let aux_view = aux_tex
            .as_ref()
            .map(|t| t.create_view(&wgpu::TextureViewDescriptor::default()));
        if let Some(view) = &aux_view {
            entries.push(wgpu::BindGroupEntry {
                binding: 4,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("pixfx_pass_bg"),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &entries,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("pixfx_pass_encoder"),
            });
        {
            let mut rp = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("pixfx_pass_rp"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target_view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            rp.set_pipeline(&pipeline);
            rp.set_bind_group(0, &bind_group, &[]);
            rp.draw(0..3, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));

        // Ping-pong: the freshly drawn texture becomes the next source.
        let old_source = std::mem::replace(&mut self.source, target);
        self.target = Some(old_source);
        self.source_width = out_w;
        self.source_height = out_h;
        self.pass += 1;
        self.passes = self.passes.saturating_sub(1);
        Ok(())
    }
}

/// GPU backend: owns the wgpu device/queue, a shader-program cache keyed
/// by filter cache-key and a texture cache keyed by caller-supplied source
/// identity, and executes filter chains via framebuffer ping-pong.
pub struct GpuFilterBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    sampler_linear: wgpu::Sampler,
    sampler_nearest: wgpu::Sampler,
    programs: HashMap<String, FilterProgram>,
    textures: HashMap<String, CachedTexture>,
    max_texture_size: u32,
}

impl GpuFilterBackend {
    /// Acquire an adapter and device. Returns `Err` when no suitable GPU
    /// exists; the selector treats that as "unsupported" and falls back.
    pub fn new() -> PixfxResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| match e {
            wgpu::RequestAdapterError::NotFound { .. } => {
                PixfxError::pipeline("no gpu adapter available")
            }
            other => PixfxError::pipeline(format!("wgpu request_adapter failed: {other:?}")),
        })?;

        let (device, queue) =
            pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
                label: None,
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                experimental_features: wgpu::ExperimentalFeatures::default(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            }))
            .map_err(|e| PixfxError::pipeline(format!("wgpu request_device failed: {e:?}")))?;

        let max_texture_size = device.limits().max_texture_dimension_2d;

        let sampler = |filter: wgpu::FilterMode, label: &str| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: filter,
                min_filter: filter,
                mipmap_filter: wgpu::FilterMode::Nearest,
                ..Default::default()
            })
        };
        let sampler_linear = sampler(wgpu::FilterMode::Linear, "pixfx_sampler_linear");
        let sampler_nearest = sampler(wgpu::FilterMode::Nearest, "pixfx_sampler_nearest");

        Ok(Self {
            device,
            queue,
            sampler_linear,
            sampler_nearest,
            programs: HashMap::new(),
            textures: HashMap::new(),
            max_texture_size,
        })
    }

    pub fn max_texture_size(&self) -> u32 {
        self.max_texture_size
    }

    /// Upload (or reuse the cached) source texture, run the chain with
    /// ping-pong textures, then read the final surface back into `target`.
    /// The original texture persists only when a `cache_key` was given.
    pub fn apply_filters(
        &mut self,
        filters: &[Filter],
        source: &PixelBuffer,
        target: &mut PixelBuffer,
        cache_key: Option<&str>,
    ) -> PixfxResult<()> {
        let active = filters::active(filters);
        if active.is_empty() {
            *target = source.clone();
            return Ok(());
        }
        if source.width > self.max_texture_size || source.height > self.max_texture_size {
            return Err(PixfxError::validation(format!(
                "source {}x{} exceeds max texture size {}",
                source.width, source.height, self.max_texture_size
            )));
        }

        let original = self.original_texture(source, cache_key)?;
        let ping = create_texture(
            &self.device,
            source.width,
            source.height,
            ping_pong_usages(),
        )?;

        let mut state = PipelineState::Gpu(GpuState {
            device: self.device.clone(),
            queue: self.queue.clone(),
            programs: &mut self.programs,
            sampler_linear: self.sampler_linear.clone(),
            sampler_nearest: self.sampler_nearest.clone(),
            original,
            source: ping,
            target: None,
            pass: 0,
            passes: active.len() as u32,
            source_width: source.width,
            source_height: source.height,
        });
        for filter in &active {
            filter.apply_to(&mut state)?;
        }

        #[allow(irrefutable_let_patterns)]
        if let PipelineState::Gpu(state) = state {
            readback(
                &self.device,
                &self.queue,
                &state.source,
                state.source_width,
                state.source_height,
                target,
            )?;
        }
        Ok(())
    }

    fn original_texture(
        &mut self,
        source: &PixelBuffer,
        cache_key: Option<&str>,
    ) -> PixfxResult<wgpu::Texture> {
        let usages = wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST;
        let Some(key) = cache_key else {
            return upload_texture(&self.device, &self.queue, source, usages);
        };

        if let Some(cached) = self.textures.get(key)
            && cached.width == source.width
            && cached.height == source.height
        {
            return Ok(cached.texture.clone());
        }

        let texture = upload_texture(&self.device, &self.queue, source, usages)?;
        self.textures.insert(
            key.to_string(),
            CachedTexture {
                texture: texture.clone(),
                width: source.width,
                height: source.height,
            },
        );
        Ok(texture)
    }

    /// Delete the cached source texture for one identity key.
    pub fn evict_caches_for_key(&mut self, key: &str) {
        if self.textures.remove(key).is_some() {
            tracing::debug!(key, "evicted cached texture");
        }
    }

    /// Drop every cached shader program and texture. Remaining device
    /// resources are released when the backend itself is dropped.
    pub fn clear_caches(&mut self) {
        self.programs.clear();
        self.textures.clear();
        tracing::debug!("cleared gpu filter caches");
    }
}

/// Copy a GPU surface back into a CPU buffer: copy-texture-to-buffer with
/// the mandatory row alignment, map, then strip the row padding.
fn readback(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    width: u32,
    height: u32,
    target: &mut PixelBuffer,
) -> PixfxResult<()> {
    let bytes_per_row_unpadded = width
        .checked_mul(4)
        .ok_or_else(|| PixfxError::pipeline("readback width overflow"))?;
    let bytes_per_row = align_to(bytes_per_row_unpadded, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
    let buffer_size = (bytes_per_row as u64)
        .checked_mul(height as u64)
        .ok_or_else(|| PixfxError::pipeline("readback buffer size overflow"))?;

    let readback = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("pixfx_readback"),
        size: buffer_size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("pixfx_readback_encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &readback,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(Some(encoder.finish()));

    let buffer_slice = readback.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    buffer_slice.map_async(wgpu::MapMode::Read, move |res| {
        let _ = tx.send(res);
    });
    device
        .poll(wgpu::PollType::wait_indefinitely())
        .map_err(|e| PixfxError::pipeline(format!("wgpu poll failed: {e:?}")))?;
    rx.recv()
        .map_err(|_| PixfxError::pipeline("readback channel closed"))?
        .map_err(|e| PixfxError::pipeline(format!("readback map failed: {e:?}")))?;

    let mapped = buffer_slice.get_mapped_range();
    let row_bytes = (width as usize) * 4;
    let padded_row_bytes = bytes_per_row as usize;
    let mut out = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * padded_row_bytes;
        out.extend_from_slice(&mapped[start..start + row_bytes]);
    }
    drop(mapped);
    readback.unmap();

    *target = PixelBuffer::from_rgba8(width, height, out)?;
    Ok(())
}

fn ping_pong_usages() -> wgpu::TextureUsages {
    wgpu::TextureUsages::RENDER_ATTACHMENT
        | wgpu::TextureUsages::TEXTURE_BINDING
        | wgpu::TextureUsages::COPY_SRC
        | wgpu::TextureUsages::COPY_DST
}

fn create_texture(
    device: &wgpu::Device,
    width: u32,
    height: u32,
    usage: wgpu::TextureUsages,
) -> PixfxResult<wgpu::Texture> {
    if width == 0 || height == 0 {
        return Err(PixfxError::validation("texture dimensions must be > 0"));
    }
    Ok(device.create_texture(&wgpu::TextureDescriptor {
        label: Some("pixfx_surface"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage,
        view_formats: &[],
    }))
}

fn upload_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    source: &PixelBuffer,
    usage: wgpu::TextureUsages,
) -> PixfxResult<wgpu::Texture> {
    let texture = create_texture(device, source.width, source.height, usage)?;
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &source.data,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(source.width * 4),
            rows_per_image: Some(source.height),
        },
        wgpu::Extent3d {
            width: source.width,
            height: source.height,
            depth_or_array_layers: 1,
        },
    );
    Ok(texture)
}

fn align_to(value: u32, alignment: u32) -> u32 {
    let mask = alignment - 1;
    (value + mask) & !mask
}
