//! # Graphics Stage Module
//!
//! Everything that touches the GPU: the process-global device context, the
//! CPU-updatable stream textures that carry decoded frames onto the GPU, the
//! offscreen render pass with host readback, and the frame filter that runs
//! the user's fragment shader.

pub mod context;
pub mod filter;
pub mod render_pass;
pub mod stream_texture;

pub use context::GpuContext;
pub use filter::{FrameFilter, PixelBlock, PixelRing};
pub use render_pass::RenderPass;
pub use stream_texture::{StreamTexture, TextureRing, TextureSlot};
