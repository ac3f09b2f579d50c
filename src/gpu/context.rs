//! Process-global graphics context.
//!
//! The graphics backend is a singleton: one instance, one adapter, one
//! device/queue pair shared by every stream texture and render pass. `wgpu`
//! serializes access to the device and queue internally, so stages on
//! different threads may upload and render concurrently without extra
//! locking.

use log::info;

use crate::error::{FilterError, FilterResult};

/// Shared device/queue pair. Obtain through [`GpuContext::global`].
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Returns the process-wide context, creating it on first use.
    ///
    /// Fails when no suitable adapter exists (headless machines without a
    /// software rasterizer) or the device request is denied.
    pub fn global() -> FilterResult<&'static GpuContext> {
        static GPU: std::sync::OnceLock<Result<GpuContext, String>> = std::sync::OnceLock::new();
        GPU.get_or_init(|| GpuContext::new().map_err(|e| e.to_string()))
            .as_ref()
            .map_err(|reason| FilterError::graphics("device initialization", reason))
    }

    fn new() -> FilterResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| FilterError::graphics("request adapter", "no suitable GPU adapter"))?;

        let info_line = adapter.get_info();
        info!("using adapter {} ({:?})", info_line.name, info_line.backend);

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("video_filter_device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
            },
            None,
        ))
        .map_err(|e| FilterError::graphics("request device", e))?;

        Ok(Self { device, queue })
    }

    /// Largest 2D texture dimension the device supports.
    pub fn max_texture_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }
}
