//! # Pixel Format Conversion
//!
//! Two conversion shapes connect the codec's native pixel format with the
//! GPU-friendly interleaved formats:
//!
//! - frame → texture: decoded native frames become BGRA rows written straight
//!   into a stream texture's staging buffer ([`ConverterStage`]).
//! - RGBA → frame: rendered pixels become native-format frames on the way
//!   into the encoder (the encoder owns a [`PixelFormatConverter`] for this).
//!
//! When the source format already matches the target, the converter
//! short-circuits to a row-wise copy instead of running `swscale`.

use std::sync::Arc;
use std::thread::JoinHandle;

use ffmpeg_next as ffmpeg;

use ffmpeg::format::Pixel;
use ffmpeg::software::scaling::{context::Context as Scaler, flag::Flags};
use ffmpeg::util::frame::video::Video as Frame;
use log::{error, warn};

use crate::codec::decoder::FrameRing;
use crate::codec::{copy_frame, frame_duration};
use crate::error::{FilterError, FilterResult};
use crate::gpu::context::GpuContext;
use crate::gpu::stream_texture::{StreamTexture, TextureRing, TextureSlot};

/// One-direction color converter between a frame format and a packed
/// four-byte-per-pixel format, with preallocated scratch.
///
/// Not `Send` (the underlying `SwsContext` is thread-bound); each stage
/// builds its converter on the thread that runs it.
pub struct PixelFormatConverter {
    scaler: Option<Scaler>,
    /// Destination-format frame for the packed output path; present only
    /// when an actual conversion runs.
    scratch: Option<Frame>,
    src_format: Pixel,
    width: u32,
    height: u32,
}

impl PixelFormatConverter {
    /// Builds a `src_format` → `dst_format` converter for `width`×`height`
    /// frames. Matching formats yield a copy-only converter.
    pub fn new(
        src_format: Pixel,
        dst_format: Pixel,
        width: u32,
        height: u32,
    ) -> FilterResult<Self> {
        let (scaler, scratch) = if src_format == dst_format {
            (None, None)
        } else {
            let scaler = Scaler::get(
                src_format,
                width,
                height,
                dst_format,
                width,
                height,
                Flags::POINT,
            )
            .map_err(|e| FilterError::decode("create color converter", e))?;
            (Some(scaler), Some(Frame::new(dst_format, width, height)))
        };
        Ok(Self {
            scaler,
            scratch,
            src_format,
            width,
            height,
        })
    }

    /// Converts `src` into the preallocated destination frame.
    pub fn convert(&mut self, src: &Frame, dst: &mut Frame) -> FilterResult<()> {
        match &mut self.scaler {
            Some(scaler) => scaler
                .run(src, dst)
                .map_err(|e| FilterError::decode("color conversion", e)),
            None => {
                copy_frame(src, dst);
                Ok(())
            }
        }
    }

    /// Converts `src` into tightly packed rows of `pitch` bytes
    /// (`width * 4`), e.g. a stream texture's staging buffer.
    pub fn convert_to_packed(
        &mut self,
        src: &Frame,
        dst: &mut [u8],
        pitch: usize,
    ) -> FilterResult<()> {
        debug_assert_eq!(pitch, self.width as usize * 4);
        match (&mut self.scaler, &mut self.scratch) {
            (Some(scaler), Some(scratch)) => {
                scaler
                    .run(src, scratch)
                    .map_err(|e| FilterError::decode("color conversion", e))?;
                copy_plane_rows(scratch, dst, pitch, self.height as usize);
                Ok(())
            }
            _ => {
                // Already four bytes per pixel in the right order; the frame
                // stride may still be padded, hence the row-wise copy.
                copy_plane_rows(src, dst, pitch, self.height as usize);
                Ok(())
            }
        }
    }

    pub fn source_format(&self) -> Pixel {
        self.src_format
    }
}

fn copy_plane_rows(frame: &Frame, dst: &mut [u8], pitch: usize, rows: usize) {
    let stride = frame.stride(0);
    let data = frame.data(0);
    for row in 0..rows {
        dst[row * pitch..][..pitch].copy_from_slice(&data[row * stride..][..pitch]);
    }
}

/// Frame-ring → texture-ring stage.
///
/// Created by the decoder (`make_format_converter`) so it inherits the source
/// width, height, and pixel format. The worker initializes the texture ring
/// (it is that ring's producer), converts each decoded frame into the next
/// texture's staging buffer, and carries the frame's µs PTS/duration along in
/// the slot. When the frame ring drains, the texture ring is finished.
pub struct ConverterStage {
    width: u32,
    height: u32,
    src_format: Pixel,
    worker: Option<JoinHandle<()>>,
}

impl ConverterStage {
    pub(crate) fn new(width: u32, height: u32, src_format: Pixel) -> Self {
        Self {
            width,
            height,
            src_format,
            worker: None,
        }
    }

    /// Starts the stage, either inline on the caller's thread or on a worker
    /// joined when the stage drops.
    pub fn start(&mut self, input: Arc<FrameRing>, output: Arc<TextureRing>, spawn_worker: bool) {
        let width = self.width;
        let height = self.height;
        let src_format = self.src_format;
        let work = move || convert_loop(width, height, src_format, &input, &output);
        if spawn_worker {
            self.worker = Some(std::thread::spawn(work));
        } else {
            work();
        }
    }
}

impl Drop for ConverterStage {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn convert_loop(width: u32, height: u32, src_format: Pixel, input: &FrameRing, output: &TextureRing) {
    let setup = || -> FilterResult<(&'static GpuContext, Vec<StreamTexture>, PixelFormatConverter)> {
        let gpu = GpuContext::global()?;
        let mut textures = Vec::with_capacity(output.capacity());
        for _ in 0..output.capacity() {
            textures.push(StreamTexture::new(gpu, width, height)?);
        }
        let converter = PixelFormatConverter::new(src_format, Pixel::BGRA, width, height)?;
        Ok((gpu, textures, converter))
    };

    let (gpu, mut textures, mut converter) = match setup() {
        Ok(parts) => parts,
        Err(e) => {
            error!("format converter setup failed: {e}");
            // Unblock both neighbors: drain the producer, end the consumer.
            output.finish();
            while input.get_to_read().is_some() {}
            return;
        }
    };

    output.init(|_| TextureSlot {
        texture: textures.pop().expect("texture per slot"),
        pts: 0,
        duration: 0,
    });

    while let Some(frame) = input.get_to_read() {
        let mut slot = output.get_to_write();
        slot.pts = frame.pts().unwrap_or(0);
        slot.duration = frame_duration(&frame);
        let TextureSlot { texture, pts, .. } = &mut *slot;
        let pts = *pts;
        texture.update_with(gpu, |staging, pitch| {
            if let Err(e) = converter.convert_to_packed(&frame, staging, pitch) {
                warn!("dropping frame at pts {pts}: {e}");
            }
        });
    }
    output.finish();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_plane_rows_strips_stride_padding() {
        // 2x2 BGRA frame; ffmpeg may pad the stride past width*4.
        let mut frame = Frame::new(Pixel::BGRA, 2, 2);
        let stride = frame.stride(0);
        assert!(stride >= 8);
        {
            let data = frame.data_mut(0);
            for row in 0..2 {
                for byte in 0..8 {
                    data[row * stride + byte] = (row * 8 + byte) as u8;
                }
            }
        }

        let mut packed = vec![0u8; 16];
        copy_plane_rows(&frame, &mut packed, 8, 2);
        assert_eq!(packed, (0..16).collect::<Vec<u8>>());
    }

    #[test]
    fn test_matching_formats_need_no_scaler() {
        let converter = PixelFormatConverter::new(Pixel::BGRA, Pixel::BGRA, 8, 8).unwrap();
        assert!(converter.scaler.is_none());
    }
}
