//! # Filter Session
//!
//! Orchestrates the pipeline stages in one of two shapes:
//!
//! - **Inline**: one thread does everything. The decode loop feeds a
//!   render/encode latch: while frame *n* renders on the GPU, frame *n - 1*
//!   is read back and encoded, so the GPU and the codec overlap by exactly
//!   one frame and PTS order into the encoder stays monotone.
//! - **Threaded**: decoder, converter, and encoder each own a worker thread,
//!   the GPU filter runs on the calling thread, and bounded rings carry
//!   frames end to end. End-of-stream propagates through the rings' done
//!   flags; workers are joined when their stages drop.
//!
//! Both shapes share the decoder's section/drop logic and the same setup
//! order as the CLI's exit codes: shader validation, input probe, GPU
//! pipeline, output container.

use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use ffmpeg_next as ffmpeg;

use ffmpeg::Rational;
use ffmpeg::format::Pixel;
use ffmpeg::util::frame::video::Video as Frame;
use log::{info, warn};

use crate::FilterOptions;
use crate::codec::converter::PixelFormatConverter;
use crate::codec::decoder::{FrameRing, FrameSink, VideoDecoder};
use crate::codec::encoder::{EncoderStage, VideoEncoder};
use crate::error::{FilterError, FilterResult};
use crate::gpu::context::GpuContext;
use crate::gpu::filter::{FrameFilter, PixelRing, compose_shader, validate_shader};
use crate::gpu::stream_texture::{StreamTexture, TextureRing};
use crate::resolve_output_size;

/// Decoded frames buffered ahead of the converter.
const FRAME_RING_CAPACITY: usize = 4;
/// Stream textures in flight between converter and filter.
const TEXTURE_RING_CAPACITY: usize = 2;
/// Rendered pixel blocks buffered ahead of the encoder.
const PIXEL_RING_CAPACITY: usize = 2;

/// Nearest sampling is exact when the output is an integer multiple of the
/// source; anything else wants linear filtering.
fn needs_linear_sampling(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> bool {
    !(src_w > 0 && src_h > 0 && dst_w % src_w == 0 && dst_h % src_h == 0)
}

fn read_shader(path: &Path) -> FilterResult<String> {
    std::fs::read_to_string(path)
        .map_err(|e| FilterError::io_path("read shader source", path.display().to_string(), e))
}

/// Shared setup for both shapes: validate the shader, probe the input, and
/// resolve the output size. Returns the decoder, the shader source, and the
/// resolved dimensions.
fn prepare(options: &FilterOptions) -> FilterResult<(VideoDecoder, String, u32, u32)> {
    let fragment = read_shader(&options.shader)?;
    // Validate before touching the container so a broken shader exits with
    // its own code and no output file is created.
    validate_shader(&compose_shader(&fragment)).map_err(FilterError::shader)?;

    let decoder = VideoDecoder::open(&options.input)?;
    let (width, height) = resolve_output_size(
        decoder.width(),
        decoder.height(),
        options.width,
        options.height,
    );
    info!(
        "{}x{} -> {}x{}",
        decoder.width(),
        decoder.height(),
        width,
        height
    );
    Ok((decoder, fragment, width, height))
}

/// One-shot single-threaded run.
pub(crate) fn run_inline(options: &FilterOptions) -> FilterResult<()> {
    let (mut decoder, fragment, width, height) = prepare(options)?;

    let linear = needs_linear_sampling(decoder.width(), decoder.height(), width, height);
    let filter = FrameFilter::new(width, height, &fragment, linear)?;
    let gpu = GpuContext::global()?;
    let texture = StreamTexture::new(gpu, decoder.width(), decoder.height())?;
    let converter = PixelFormatConverter::new(
        decoder.pixel_format(),
        Pixel::BGRA,
        decoder.width(),
        decoder.height(),
    )?;

    let settings = decoder.make_encoder(width, height);
    let encoder = VideoEncoder::open(&settings, &options.input, &options.output)?;

    let mut sink = InlineSink {
        gpu,
        texture,
        converter,
        filter,
        encoder: Some(encoder),
        pixels: Vec::new(),
        pending: None,
        // With explicit sections the read loop revisits parts of the source,
        // which would duplicate pass-through packets; only the full-source
        // run copies the other streams.
        pass_other_streams: options.sections.is_empty(),
        duration_us: decoder.duration().max(1),
    };
    decoder.run(&options.sections, &mut sink)?;
    sink.finish()
}

/// The inline driver's frame visitor: a one-frame latch between "render this
/// frame" and "encode the previous one".
struct InlineSink {
    gpu: &'static GpuContext,
    texture: StreamTexture,
    converter: PixelFormatConverter,
    filter: FrameFilter,
    encoder: Option<VideoEncoder>,
    pixels: Vec<u8>,
    /// µs PTS/duration of the frame currently rendering on the GPU.
    pending: Option<(i64, i64)>,
    pass_other_streams: bool,
    duration_us: i64,
}

impl InlineSink {
    fn encode_pending(&mut self) -> FilterResult<()> {
        if let Some((pts, duration)) = self.pending.take() {
            self.filter.finish_frame(&mut self.pixels)?;
            if let Some(encoder) = &mut self.encoder {
                encoder.push(&self.pixels, pts, duration);
            }
            print!("\r{:6.2}%", pts as f64 * 100.0 / self.duration_us as f64);
            let _ = std::io::stdout().flush();
        }
        Ok(())
    }

    /// Encodes the last pending render and closes the container.
    fn finish(mut self) -> FilterResult<()> {
        self.encode_pending()?;
        println!();
        match self.encoder.take() {
            Some(encoder) => encoder.finish(),
            None => Ok(()),
        }
    }
}

impl FrameSink for InlineSink {
    fn frame(&mut self, frame: &Frame, pts: i64, duration: i64) -> FilterResult<()> {
        self.encode_pending()?;

        let converter = &mut self.converter;
        self.texture.update_with(self.gpu, |staging, pitch| {
            if let Err(e) = converter.convert_to_packed(frame, staging, pitch) {
                warn!("dropping frame at pts {pts}: {e}");
            }
        });
        self.filter.begin_frame(&self.texture);
        self.pending = Some((pts, duration));
        Ok(())
    }

    fn passthrough(&mut self, packet: ffmpeg::Packet, time_base: Rational) -> FilterResult<()> {
        if self.pass_other_streams {
            if let Some(encoder) = &mut self.encoder {
                encoder.write_passthrough(packet, time_base);
            }
        }
        Ok(())
    }
}

/// Fully threaded run: each stage owns a thread, rings in between.
pub(crate) fn run_threaded(options: &FilterOptions) -> FilterResult<()> {
    let (mut decoder, fragment, width, height) = prepare(options)?;

    let linear = needs_linear_sampling(decoder.width(), decoder.height(), width, height);
    let mut filter = FrameFilter::new(width, height, &fragment, linear)?;

    // The converter worker allocates the stream textures; fail fast here
    // instead of inside the thread when the source cannot be a texture.
    let gpu = GpuContext::global()?;
    let max = gpu.max_texture_dimension();
    if decoder.width() == 0 || decoder.height() == 0 || decoder.width() > max || decoder.height() > max {
        return Err(FilterError::graphics(
            "stream texture creation",
            format!(
                "unsupported source size {}x{} (device limit {max})",
                decoder.width(),
                decoder.height()
            ),
        ));
    }

    let settings = decoder.make_encoder(width, height);
    let mut converter = decoder.make_format_converter();

    let frame_ring = Arc::new(FrameRing::new(FRAME_RING_CAPACITY));
    let texture_ring = Arc::new(TextureRing::new(TEXTURE_RING_CAPACITY));
    let pixel_ring = Arc::new(PixelRing::new(PIXEL_RING_CAPACITY));
    let (packet_tx, packet_rx) = std::sync::mpsc::channel();

    let encoder_stage = EncoderStage::spawn(
        settings,
        options.input.clone(),
        options.output.clone(),
        Arc::clone(&pixel_ring),
        packet_rx,
    );
    decoder.start(
        Arc::clone(&frame_ring),
        options.sections.clone(),
        options.sections.is_empty().then_some(packet_tx),
        true,
    );
    converter.start(Arc::clone(&frame_ring), Arc::clone(&texture_ring), true);

    // The GPU stage runs here; EOS arrives through the rings.
    let filter_result = filter.run(&texture_ring, &pixel_ring);
    if filter_result.is_err() {
        // GPU failure is fatal. Stop the decoder instead of letting it chew
        // through the rest of the file, mark its ring done on its behalf
        // (terminate exits without doing so), and run the queued tail out so
        // the converter and decoder can unblock and be joined.
        decoder.terminate();
        frame_ring.finish();
        while texture_ring.get_to_read().is_some() {}
    }
    let encoder_result = encoder_stage.join();

    // Joins the converter and decoder workers.
    drop(converter);
    drop(decoder);

    filter_result?;
    encoder_result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_sampling_decision() {
        // Same size: nearest is exact.
        assert!(!needs_linear_sampling(1920, 1080, 1920, 1080));
        // Integer upscale: still exact.
        assert!(!needs_linear_sampling(960, 540, 1920, 1080));
        // Fractional resize wants linear.
        assert!(needs_linear_sampling(1920, 1080, 1280, 720));
    }
}
