//! CPU-updatable GPU textures for decoded frames.
//!
//! A [`StreamTexture`] is a BGRA8 2D texture whose contents are rewritten
//! from the CPU once per frame. The caller writes into a persistent staging
//! buffer through a callback (the converter runs its color conversion
//! directly into it) and the buffer is then uploaded in one `write_texture`
//! call. The staging buffer is allocated once, so per-frame updates never
//! allocate.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{FilterError, FilterResult};
use crate::gpu::context::GpuContext;

static NEXT_ID: AtomicU32 = AtomicU32::new(0);

/// GPU-resident 2D texture with CPU-writable backing, keyed by an integer id.
pub struct StreamTexture {
    id: u32,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    staging: Vec<u8>,
    width: u32,
    height: u32,
}

impl StreamTexture {
    /// Creates a `width`×`height` BGRA8 stream texture.
    pub fn new(gpu: &GpuContext, width: u32, height: u32) -> FilterResult<Self> {
        let max = gpu.max_texture_dimension();
        if width == 0 || height == 0 || width > max || height > max {
            return Err(FilterError::graphics(
                "stream texture creation",
                format!("unsupported texture size {width}x{height} (device limit {max})"),
            ));
        }

        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("stream_texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Bgra8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(Self {
            id,
            texture,
            view,
            staging: vec![0u8; width as usize * height as usize * 4],
            width,
            height,
        })
    }

    /// Rewrites the texture contents.
    ///
    /// `fill` receives the staging buffer (`height` rows of `pitch` bytes,
    /// BGRA interleaved) and the pitch `width * 4`; whatever it writes is
    /// uploaded afterwards.
    pub fn update_with(&mut self, gpu: &GpuContext, fill: impl FnOnce(&mut [u8], usize)) {
        let pitch = self.width as usize * 4;
        fill(&mut self.staging, pitch);

        gpu.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &self.staging,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(pitch as u32),
                rows_per_image: None,
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Texture ring slot: the texture plus the timing the frame carried.
pub struct TextureSlot {
    pub texture: StreamTexture,
    /// Presentation timestamp in microseconds.
    pub pts: i64,
    /// Frame duration in microseconds.
    pub duration: i64,
}

/// Ring of stream textures between the converter and the frame filter.
pub type TextureRing = crate::core::RingBuffer<TextureSlot>;
