//! # WGSL Video Filter
//!
//! A video transcoding pipeline that applies a user-supplied WGSL fragment
//! shader to every frame of an input video and writes a re-encoded output.
//!
//! ## Architecture
//!
//! The pipeline is a linear chain of stages connected by bounded SPSC ring
//! buffers:
//!
//! ```text
//! decode ──▶ convert (native→BGRA) ──▶ GPU render pass ──▶ encode
//!        frame ring             texture ring      pixel ring
//! ```
//!
//! - **Decoder** (`codec::decoder`): demuxes the container, seeks to the
//!   requested time sections, and decodes video packets into reusable frame
//!   slots, rewriting PTS/duration into microseconds.
//! - **Format converter** (`codec::converter`): color-converts decoded
//!   frames into BGRA stream textures (and RGBA back to the codec's native
//!   format on the encoder side).
//! - **Frame filter** (`gpu::filter`): runs the user's fragment shader over
//!   a full-screen triangle and reads the RGBA result back to the host.
//! - **Encoder** (`codec::encoder`): re-encodes rendered pixels with the
//!   source's codec and timing; other streams pass through untouched.
//!
//! The public API mirrors the hybrid design of the stages themselves: an
//! async surface for ecosystem integration over a synchronous,
//! thread-per-stage core.
//!
//! ## Example
//!
//! ```rust,no_run
//! use wgsl_video_filter::{FilterOptions, filter_video};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = FilterOptions {
//!         input: "in.mp4".into(),
//!         shader: "shaders/invert.wgsl".into(),
//!         output: "out.mp4".into(),
//!         width: Some(1280),
//!         height: None,
//!         sections: Vec::new(),
//!         threaded: false,
//!     };
//!     filter_video(options).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Shader contract
//!
//! The shader file defines one WGSL fragment entry point:
//!
//! ```wgsl
//! @fragment
//! fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
//!     return textureSample(source_texture, source_sampler, in.uv);
//! }
//! ```
//!
//! `VertexOutput` (with a `uv` coordinate), the BGRA `source_texture` at
//! binding 0, the `source_sampler` at binding 1, and the full-screen-triangle
//! vertex stage are provided by the pipeline.

use std::path::PathBuf;

use ffmpeg_next as ffmpeg;

pub mod codec;
pub mod config;
pub mod core;
pub mod error;
pub mod gpu;
mod session;

pub use codec::section::Section;
pub use error::{FilterError, FilterResult};

/// Options for one filter run.
#[derive(Debug, Clone)]
pub struct FilterOptions {
    /// Input video path.
    pub input: PathBuf,

    /// WGSL fragment shader path (must define `fs_main`).
    pub shader: PathBuf,

    /// Output video path; the container format follows the extension.
    pub output: PathBuf,

    /// Requested output width; `None` derives it from the source (and the
    /// requested height, if any) preserving aspect ratio.
    pub width: Option<u32>,

    /// Requested output height; `None` derives it like `width`.
    pub height: Option<u32>,

    /// Source ranges to include, in microseconds. Empty means the whole
    /// video. Processed in the given order.
    pub sections: Vec<Section>,

    /// Run decoder, converter, and encoder on their own threads instead of
    /// the single-threaded inline loop.
    pub threaded: bool,
}

/// Runs the filter pipeline to completion.
///
/// Validates the shader, probes the input, builds the GPU pipeline, and
/// transcodes every selected frame through the fragment shader into the
/// output container. Returns after the container trailer is written.
///
/// # Errors
///
/// Returns a [`FilterError`] whose kind identifies the failing stage; the
/// CLI maps it to the documented exit codes. Per-frame codec errors do not
/// fail the run; they are logged and the frame is dropped.
pub async fn filter_video(options: FilterOptions) -> FilterResult<()> {
    ffmpeg::init().map_err(|e| error::FilterError::demux("initialize codec backend", e))?;

    if options.threaded {
        session::run_threaded(&options)
    } else {
        session::run_inline(&options)
    }
}

/// Resolves the output dimensions from the source size and the request.
///
/// With neither dimension requested the source size is used. With one
/// requested, the other preserves the aspect ratio, rounded to the nearest
/// integer. Codecs want even dimensions, so odd results are bumped up by
/// one, including odd *requested* values.
pub fn resolve_output_size(
    src_width: u32,
    src_height: u32,
    new_width: Option<u32>,
    new_height: Option<u32>,
) -> (u32, u32) {
    let requested_w = new_width.filter(|w| *w > 0);
    let requested_h = new_height.filter(|h| *h > 0);

    let (mut width, mut height) = match (requested_w, requested_h) {
        (None, None) => (src_width, src_height),
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => {
            let h = (w as f64 * src_height as f64 / src_width as f64).round() as u32;
            (w, h)
        }
        (None, Some(h)) => {
            let w = (h as f64 * src_width as f64 / src_height as f64).round() as u32;
            (w, h)
        }
    };
    width += width & 1;
    height += height & 1;
    (width, height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_source_size() {
        assert_eq!(resolve_output_size(1920, 1080, None, None), (1920, 1080));
        assert_eq!(resolve_output_size(1920, 1080, Some(0), Some(0)), (1920, 1080));
    }

    #[test]
    fn test_width_given_derives_height() {
        assert_eq!(
            resolve_output_size(1920, 1080, Some(1280), None),
            (1280, 720)
        );
    }

    #[test]
    fn test_height_given_derives_width_and_evens_both() {
        // 1920 * 721 / 1080 = 1281.78 → 1282 (already even); 721 is odd → 722.
        assert_eq!(
            resolve_output_size(1920, 1080, None, Some(721)),
            (1282, 722)
        );
    }

    #[test]
    fn test_odd_derived_dimension_bumped_up() {
        // 500 * 1080 / 1920 = 281.25 → 281 → 282.
        assert_eq!(
            resolve_output_size(1920, 1080, Some(500), None),
            (500, 282)
        );
    }

    #[test]
    fn test_both_given_used_verbatim_modulo_evening() {
        assert_eq!(
            resolve_output_size(1920, 1080, Some(641), Some(359)),
            (642, 360)
        );
    }
}
