//! # Frame Filter (GPU Stage)
//!
//! Applies the user's fragment shader to every incoming stream texture and
//! produces RGBA pixel blocks for the encoder.
//!
//! The user supplies only a WGSL fragment entry point:
//!
//! ```wgsl
//! @fragment
//! fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
//!     return textureSample(source_texture, source_sampler, in.uv);
//! }
//! ```
//!
//! The filter prepends a prelude declaring `VertexOutput`, the source texture
//! at `@group(0) @binding(0)`, the sampler at `@binding(1)`, and a built-in
//! vertex stage that synthesizes a full-screen triangle from the vertex
//! index, so no vertex buffers are bound. The composed module is parsed and
//! validated with naga before any GPU object is created, so a broken shader
//! is reported as a compile error instead of a device loss.

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::RingBuffer;
use crate::error::{FilterError, FilterResult};
use crate::gpu::context::GpuContext;
use crate::gpu::render_pass::RenderPass;
use crate::gpu::stream_texture::{StreamTexture, TextureRing};

/// Prelude prepended to every user fragment shader.
///
/// The triangle covers the viewport with `uv` pointing down, so output row 0
/// samples the top of the source and the readback needs no flip.
const SHADER_PRELUDE: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@group(0) @binding(0) var source_texture: texture_2d<f32>;
@group(0) @binding(1) var source_sampler: sampler;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    var out: VertexOutput;
    let corner = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    out.position = vec4<f32>(corner * 2.0 - 1.0, 0.0, 1.0);
    out.uv = vec2<f32>(corner.x, 1.0 - corner.y);
    return out;
}
"#;

/// Joins the prelude with the user's fragment source.
pub fn compose_shader(fragment_source: &str) -> String {
    format!("{SHADER_PRELUDE}\n{fragment_source}")
}

/// Parses and validates a composed shader module.
///
/// Returns the compile diagnostics as the error string so the CLI can print
/// them verbatim.
pub fn validate_shader(source: &str) -> Result<(), String> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| e.emit_to_string(source))?;

    let has_fragment_entry = module
        .entry_points
        .iter()
        .any(|ep| ep.stage == naga::ShaderStage::Fragment && ep.name == "fs_main");
    if !has_fragment_entry {
        return Err("fragment entry point 'fs_main' not found".to_string());
    }

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| e.emit_to_string(source))?;
    Ok(())
}

/// Raw RGBA pixel block with the timing its frame carried.
pub struct PixelBlock {
    pub data: Vec<u8>,
    /// Presentation timestamp in microseconds.
    pub pts: i64,
    /// Frame duration in microseconds.
    pub duration: i64,
}

/// Ring of rendered pixel blocks between the frame filter and the encoder.
pub type PixelRing = RingBuffer<PixelBlock>;

/// GPU stage: one render pipeline built from the user's fragment shader plus
/// the render pass it draws into.
pub struct FrameFilter {
    gpu: &'static GpuContext,
    pass: RenderPass,
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    /// One bind group per stream texture, keyed by texture id. The rings hold
    /// a fixed handful of textures, so this fills up once and the per-frame
    /// path allocates nothing.
    bind_groups: HashMap<u32, Arc<wgpu::BindGroup>>,
}

impl FrameFilter {
    /// Compiles the user's fragment shader and builds the pipeline for a
    /// `width`×`height` output.
    ///
    /// `linear` selects linear texture filtering; pass `false` when the
    /// output size is an integer multiple of the source so nearest sampling
    /// stays exact.
    pub fn new(
        width: u32,
        height: u32,
        fragment_source: &str,
        linear: bool,
    ) -> FilterResult<Self> {
        let source = compose_shader(fragment_source);
        validate_shader(&source).map_err(FilterError::shader)?;

        let gpu = GpuContext::global()?;
        let pass = RenderPass::new(gpu, width, height)?;

        let module = gpu
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("filter_shader"),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });

        let layout = gpu
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("filter_bind_group_layout"),
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

        let pipeline_layout = gpu
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("filter_pipeline_layout"),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });

        let pipeline = gpu
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("filter_pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: "vs_main",
                    compilation_options: Default::default(),
                    buffers: &[],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: "fs_main",
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: wgpu::TextureFormat::Rgba8Unorm,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
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

        let mode = if linear {
            wgpu::FilterMode::Linear
        } else {
            wgpu::FilterMode::Nearest
        };
        let sampler = gpu.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("filter_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: mode,
            min_filter: mode,
            ..Default::default()
        });

        Ok(Self {
            gpu,
            pass,
            pipeline,
            layout,
            sampler,
            bind_groups: HashMap::new(),
        })
    }

    pub fn width(&self) -> u32 {
        self.pass.width()
    }

    pub fn height(&self) -> u32 {
        self.pass.height()
    }

    fn bind_group_for(&mut self, texture: &StreamTexture) -> Arc<wgpu::BindGroup> {
        if let Some(group) = self.bind_groups.get(&texture.id()) {
            return Arc::clone(group);
        }
        let group = Arc::new(self.gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("filter_bind_group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(texture.view()),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        }));
        self.bind_groups.insert(texture.id(), Arc::clone(&group));
        group
    }

    /// Kicks off the render of one input texture: begin pass, bind, draw the
    /// full-screen triangle, submit. Does not wait for completion.
    pub fn begin_frame(&mut self, texture: &StreamTexture) {
        let bind_group = self.bind_group_for(texture);
        self.pass.start(self.gpu);
        self.pass.bind(bind_group);
        self.pass.invoke(&self.pipeline);
        self.pass.execute(self.gpu);
    }

    /// Waits for the in-flight render and reads the result into `out`
    /// (tightly packed RGBA, top-left origin).
    pub fn finish_frame(&mut self, out: &mut Vec<u8>) -> FilterResult<()> {
        self.pass.wait(self.gpu);
        self.pass.read_back(self.gpu, out)
    }

    /// Threaded-shape loop: filters every texture from `input` into `output`
    /// until the upstream finishes, then finishes `output`.
    ///
    /// The input slot is held until the readback completes so the converter
    /// cannot overwrite a texture the GPU is still reading.
    ///
    /// On a GPU failure `output` is finished and the error returned with
    /// `input` left as-is; the driver terminates the upstream stages and
    /// runs the queued tail out.
    pub fn run(&mut self, input: &TextureRing, output: &PixelRing) -> FilterResult<()> {
        let block_len = self.width() as usize * self.height() as usize * 4;
        output.init(|_| PixelBlock {
            data: vec![0u8; block_len],
            pts: 0,
            duration: 0,
        });

        while let Some(slot) = input.get_to_read() {
            self.begin_frame(&slot.texture);
            let mut out = output.get_to_write();
            out.pts = slot.pts;
            out.duration = slot.duration;
            let result = {
                let out = &mut *out;
                self.finish_frame(&mut out.data)
            };
            if let Err(e) = result {
                // Fatal: the render target is the encoder's only pixel
                // source. Close the downstream ring and propagate; the
                // driver stops the upstream before draining it.
                drop(out);
                drop(slot);
                output.finish();
                return Err(e);
            }
        }
        output.finish();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDENTITY: &str = r#"
        @fragment
        fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
            return textureSample(source_texture, source_sampler, in.uv);
        }
    "#;

    const INVERT: &str = r#"
        @fragment
        fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
            let color = textureSample(source_texture, source_sampler, in.uv);
            return vec4<f32>(vec3<f32>(1.0) - color.rgb, color.a);
        }
    "#;

    #[test]
    fn test_identity_shader_validates() {
        assert!(validate_shader(&compose_shader(IDENTITY)).is_ok());
    }

    #[test]
    fn test_invert_shader_validates() {
        assert!(validate_shader(&compose_shader(INVERT)).is_ok());
    }

    #[test]
    fn test_bundled_shaders_validate() {
        for source in [
            include_str!("../../shaders/identity.wgsl"),
            include_str!("../../shaders/invert.wgsl"),
            include_str!("../../shaders/grayscale.wgsl"),
        ] {
            assert!(validate_shader(&compose_shader(source)).is_ok());
        }
    }

    #[test]
    fn test_syntax_error_rejected() {
        let broken = "@fragment fn fs_main( -> f32 {";
        assert!(validate_shader(&compose_shader(broken)).is_err());
    }

    #[test]
    fn test_missing_entry_point_rejected() {
        let wrong_name = r#"
            @fragment
            fn main_fs(in: VertexOutput) -> @location(0) vec4<f32> {
                return vec4<f32>(0.0);
            }
        "#;
        let err = validate_shader(&compose_shader(wrong_name)).unwrap_err();
        assert!(err.contains("fs_main"));
    }

    #[test]
    fn test_type_error_rejected() {
        let bad_types = r#"
            @fragment
            fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
                return in.uv;
            }
        "#;
        assert!(validate_shader(&compose_shader(bad_types)).is_err());
    }
}
