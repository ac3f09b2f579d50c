//! Offscreen render pass with host readback.
//!
//! One [`RenderPass`] owns the RGBA8 color target the user's fragment shader
//! renders into and a persistent staging buffer for reading the result back.
//! A frame moves through the fixed cycle
//! `start → bind → invoke → execute → wait → read_back`; only one cycle is in
//! flight per pass, and `wait` enforces read-after-write between the submit
//! and the readback.
//!
//! wgpu requires buffer copies to use row strides aligned to 256 bytes, so
//! the readback buffer is row-padded and `read_back` strips the padding while
//! copying into the caller's tightly packed RGBA array. Readback rows are
//! top-left origin, so no flip is needed.

use std::sync::Arc;

use crate::error::{FilterError, FilterResult};
use crate::gpu::context::GpuContext;

pub struct RenderPass {
    width: u32,
    height: u32,
    view: wgpu::TextureView,
    target: wgpu::Texture,
    readback: wgpu::Buffer,
    padded_bytes_per_row: u32,
    encoder: Option<wgpu::CommandEncoder>,
    bound: Option<Arc<wgpu::BindGroup>>,
}

impl RenderPass {
    /// Creates a render pass with a `width`×`height` RGBA8 color target that
    /// can be copied out to the host.
    pub fn new(gpu: &GpuContext, width: u32, height: u32) -> FilterResult<Self> {
        let max = gpu.max_texture_dimension();
        if width == 0 || height == 0 || width > max || height > max {
            return Err(FilterError::graphics(
                "render pass creation",
                format!("unsupported target size {width}x{height} (device limit {max})"),
            ));
        }

        let target = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("filter_target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = target.create_view(&wgpu::TextureViewDescriptor::default());

        let unpadded = width * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = unpadded.div_ceil(align) * align;

        let readback = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("filter_readback"),
            size: padded_bytes_per_row as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Ok(Self {
            width,
            height,
            view,
            target,
            readback,
            padded_bytes_per_row,
            encoder: None,
            bound: None,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Begins a new cycle. Any previously recorded but unsubmitted work is
    /// discarded.
    pub fn start(&mut self, gpu: &GpuContext) {
        self.encoder = Some(
            gpu.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("filter_pass_encoder"),
                }),
        );
        self.bound = None;
    }

    /// Binds the input resources for this cycle.
    pub fn bind(&mut self, bind_group: Arc<wgpu::BindGroup>) {
        self.bound = Some(bind_group);
    }

    /// Records the full-screen triangle draw with the given pipeline and the
    /// bound resources.
    pub fn invoke(&mut self, pipeline: &wgpu::RenderPipeline) {
        let encoder = self
            .encoder
            .as_mut()
            .expect("render pass invoked before start");
        let bind_group = self
            .bound
            .as_ref()
            .expect("render pass invoked before bind");

        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("filter_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.view,
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
        rpass.set_pipeline(pipeline);
        rpass.set_bind_group(0, bind_group, &[]);
        rpass.draw(0..3, 0..1);
    }

    /// Submits the recorded work, including the copy of the color target into
    /// the readback buffer.
    pub fn execute(&mut self, gpu: &GpuContext) {
        let mut encoder = self
            .encoder
            .take()
            .expect("render pass executed before start");
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &self.readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_bytes_per_row),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        gpu.queue.submit(Some(encoder.finish()));
        self.bound = None;
    }

    /// Blocks until the submitted work has completed on the GPU.
    pub fn wait(&self, gpu: &GpuContext) {
        let _ = gpu.device.poll(wgpu::Maintain::Wait);
    }

    /// Copies the rendered RGBA pixels into `out` (resized to
    /// `width * height * 4`), row padding stripped.
    pub fn read_back(&self, gpu: &GpuContext, out: &mut Vec<u8>) -> FilterResult<()> {
        let unpadded = self.width as usize * 4;
        let padded = self.padded_bytes_per_row as usize;
        out.resize(unpadded * self.height as usize, 0);

        let slice = self.readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = gpu.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| FilterError::graphics("readback", "map callback dropped"))?
            .map_err(|e| FilterError::graphics("readback", format!("buffer map failed: {e:?}")))?;

        {
            let data = slice.get_mapped_range();
            for row in 0..self.height as usize {
                let src = row * padded;
                let dst = row * unpadded;
                out[dst..dst + unpadded].copy_from_slice(&data[src..src + unpadded]);
            }
        }
        self.readback.unmap();
        Ok(())
    }
}
