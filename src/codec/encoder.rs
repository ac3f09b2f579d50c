//! # Video Encoder Stage
//!
//! Wraps rendered RGBA pixels into the output container. The output clones
//! every input stream (so pass-through packets keep their indices) and
//! replaces the video stream with a re-encode configured from the source:
//! same codec, area-scaled bitrate, GOP 4, one B-frame, native pixel format.
//!
//! Upstream already rewrote all timing into microseconds, so the encoder
//! context runs on a 1/1_000_000 time base and packets are rescaled from µs
//! to the muxer-assigned stream time base on write. Note that when sections
//! are given out of time order the incoming PTS are non-monotone across
//! section boundaries; they are passed to the codec as-is.
//!
//! Per-frame failures (send/receive/convert) are logged with the PTS and the
//! frame is dropped; only setup and flush failures are errors.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::thread::JoinHandle;

use ffmpeg_next as ffmpeg;

use ffmpeg::format::Pixel;
use ffmpeg::util::frame::video::Video as Frame;
use ffmpeg::{Rational, codec, encoder, format};
use log::warn;

use crate::codec::converter::PixelFormatConverter;
use crate::codec::{micros_time_base, set_frame_duration};
use crate::error::{FilterError, FilterResult};
use crate::gpu::filter::PixelRing;

/// Encoder configuration derived from the probed source stream by
/// [`crate::codec::VideoDecoder::make_encoder`]. Plain data; moves freely
/// into the encoder worker.
#[derive(Clone, Copy)]
pub struct EncoderSettings {
    pub codec_id: codec::Id,
    pub width: u32,
    pub height: u32,
    pub pixel_format: Pixel,
    pub bit_rate: usize,
    pub frame_rate: Option<Rational>,
    pub video_stream_index: usize,
}

/// A non-video packet forwarded from the decoder for pass-through, together
/// with its source stream's time base.
pub struct PassthroughPacket {
    pub packet: ffmpeg::Packet,
    pub time_base: Rational,
}

/// Scales the source bitrate proportionally to the output area; when the
/// source bitrate is unknown, falls back to one bit per output pixel per
/// second.
pub(crate) fn scaled_bit_rate(
    source_bit_rate: usize,
    source: (u32, u32),
    target: (u32, u32),
    frame_rate: Option<Rational>,
) -> usize {
    let source_area = (source.0 as u64 * source.1 as u64).max(1);
    let target_area = target.0 as u64 * target.1 as u64;
    let scaled = source_bit_rate as u64 * target_area / source_area;
    if scaled > 0 {
        return scaled as usize;
    }
    let fps = frame_rate
        .filter(|r| r.denominator() != 0 && r.numerator() > 0)
        .map(|r| (r.numerator() / r.denominator()).max(1) as u64)
        .unwrap_or(30);
    (target_area * fps) as usize
}

pub struct VideoEncoder {
    octx: format::context::Output,
    encoder: encoder::Video,
    video_stream_index: usize,
    ost_time_base: Rational,
    rgba_frame: Frame,
    /// RGBA → native conversion for codecs that do not take RGBA directly.
    preprocessor: Option<(PixelFormatConverter, Frame)>,
    packet: ffmpeg::Packet,
    width: u32,
    height: u32,
}

impl VideoEncoder {
    /// Prepares the output container and opens the encoder.
    ///
    /// `input_path` is re-probed for the stream layout so every input stream
    /// gets a matching output stream (parameters copied, codec tag cleared);
    /// the video stream at `settings.video_stream_index` is replaced by the
    /// re-encode.
    pub fn open(
        settings: &EncoderSettings,
        input_path: &Path,
        output_path: &Path,
    ) -> FilterResult<Self> {
        let ictx = format::input(input_path)
            .map_err(|e| FilterError::demux("reopen input for stream layout", e))?;
        let mut octx = format::output(output_path)
            .map_err(|e| FilterError::encode("allocate output context", e))?;

        let codec = encoder::find(settings.codec_id).ok_or_else(|| {
            FilterError::encode(
                "find encoder",
                format!("no encoder available for {:?}", settings.codec_id),
            )
        })?;

        for ist in ictx.streams() {
            if ist.index() == settings.video_stream_index {
                octx.add_stream(codec)
                    .map_err(|e| FilterError::encode("add video stream", e))?;
            } else {
                let mut ost = octx
                    .add_stream(encoder::find(codec::Id::None))
                    .map_err(|e| FilterError::encode("add pass-through stream", e))?;
                ost.set_parameters(ist.parameters());
                // Keep the muxer from rejecting the source container's tag.
                unsafe {
                    (*ost.parameters().as_mut_ptr()).codec_tag = 0;
                }
            }
        }

        let mut video = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| FilterError::encode("create encoder context", e))?;
        video.set_width(settings.width);
        video.set_height(settings.height);
        video.set_format(settings.pixel_format);
        video.set_time_base(micros_time_base());
        video.set_frame_rate(settings.frame_rate);
        video.set_bit_rate(settings.bit_rate);
        video.set_gop(4);
        video.set_max_b_frames(1);
        if octx
            .format()
            .flags()
            .contains(format::flag::Flags::GLOBAL_HEADER)
        {
            video.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let opened = video
            .open_as(codec)
            .map_err(|e| FilterError::encode("open encoder", e))?;
        octx.stream_mut(settings.video_stream_index)
            .ok_or_else(|| FilterError::encode("configure video stream", "stream missing"))?
            .set_parameters(&opened);

        octx.write_header()
            .map_err(|e| FilterError::encode("write header", e))?;

        // The muxer may adjust the stream time base while writing the header;
        // rescale against what it actually chose.
        let ost_time_base = octx
            .stream(settings.video_stream_index)
            .expect("video stream exists")
            .time_base();

        let preprocessor = if settings.pixel_format != Pixel::RGBA {
            Some((
                PixelFormatConverter::new(
                    Pixel::RGBA,
                    settings.pixel_format,
                    settings.width,
                    settings.height,
                )?,
                Frame::new(settings.pixel_format, settings.width, settings.height),
            ))
        } else {
            None
        };

        Ok(Self {
            octx,
            encoder: opened,
            video_stream_index: settings.video_stream_index,
            ost_time_base,
            rgba_frame: Frame::new(Pixel::RGBA, settings.width, settings.height),
            preprocessor,
            packet: ffmpeg::Packet::empty(),
            width: settings.width,
            height: settings.height,
        })
    }

    /// Encodes one rendered frame. `rgba` is tightly packed
    /// `width * height * 4` bytes; `pts`/`duration` are microseconds.
    pub fn push(&mut self, rgba: &[u8], pts: i64, duration: i64) {
        let pitch = self.width as usize * 4;
        let rows = self.height as usize;
        {
            let stride = self.rgba_frame.stride(0);
            let data = self.rgba_frame.data_mut(0);
            for row in 0..rows {
                data[row * stride..][..pitch].copy_from_slice(&rgba[row * pitch..][..pitch]);
            }
        }

        let frame = match &mut self.preprocessor {
            Some((converter, native)) => {
                if let Err(e) = converter.convert(&self.rgba_frame, native) {
                    warn!("dropping frame at pts {pts}: {e}");
                    return;
                }
                native
            }
            None => &mut self.rgba_frame,
        };
        frame.set_pts(Some(pts));
        set_frame_duration(frame, duration);

        if let Err(e) = self.encoder.send_frame(frame) {
            warn!("dropping frame at pts {pts}: {e}");
            return;
        }
        self.drain_packets();
    }

    /// Rescales and writes a pass-through packet from another stream.
    pub fn write_passthrough(&mut self, mut packet: ffmpeg::Packet, source_time_base: Rational) {
        let index = packet.stream();
        let Some(ost) = self.octx.stream(index) else {
            warn!("dropping pass-through packet for unknown stream {index}");
            return;
        };
        packet.rescale_ts(source_time_base, ost.time_base());
        packet.set_position(-1);
        if let Err(e) = packet.write_interleaved(&mut self.octx) {
            warn!("failed to write pass-through packet: {e}");
        }
    }

    /// Drains buffered B-frames out of the codec and writes the container
    /// trailer.
    pub fn finish(mut self) -> FilterResult<()> {
        self.encoder
            .send_eof()
            .map_err(|e| FilterError::encode("flush encoder", e))?;
        self.drain_packets();
        self.octx
            .write_trailer()
            .map_err(|e| FilterError::encode("write trailer", e))
    }

    fn drain_packets(&mut self) {
        while self.encoder.receive_packet(&mut self.packet).is_ok() {
            self.packet.set_stream(self.video_stream_index);
            self.packet
                .rescale_ts(micros_time_base(), self.ost_time_base);
            if let Err(e) = self.packet.write_interleaved(&mut self.octx) {
                warn!("failed to write packet at pts {:?}: {e}", self.packet.pts());
            }
        }
    }
}

/// Threaded-shape encoder worker: consumes the pixel ring and the
/// pass-through channel, owns the output container for its whole life.
pub struct EncoderStage {
    worker: Option<JoinHandle<FilterResult<()>>>,
}

impl EncoderStage {
    pub fn spawn(
        settings: EncoderSettings,
        input_path: PathBuf,
        output_path: PathBuf,
        pixels: Arc<PixelRing>,
        passthrough: Receiver<PassthroughPacket>,
    ) -> Self {
        let worker = std::thread::spawn(move || {
            let mut encoder = match VideoEncoder::open(&settings, &input_path, &output_path) {
                Ok(encoder) => encoder,
                Err(e) => {
                    // Keep the upstream stages from blocking forever on a
                    // ring nobody reads.
                    while pixels.get_to_read().is_some() {}
                    return Err(e);
                }
            };

            while let Some(block) = pixels.get_to_read() {
                for p in passthrough.try_iter() {
                    encoder.write_passthrough(p.packet, p.time_base);
                }
                encoder.push(&block.data, block.pts, block.duration);
            }
            // The decoder is done once the pixel ring finishes, so the
            // channel holds everything it will ever hold.
            for p in passthrough.try_iter() {
                encoder.write_passthrough(p.packet, p.time_base);
            }
            encoder.finish()
        });
        Self {
            worker: Some(worker),
        }
    }

    /// Waits for the worker and returns its result.
    pub fn join(mut self) -> FilterResult<()> {
        match self.worker.take() {
            Some(worker) => worker
                .join()
                .map_err(|_| FilterError::pipeline("encoder worker panicked"))?,
            None => Ok(()),
        }
    }
}

impl Drop for EncoderStage {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_rate_scales_with_area() {
        // Halving both dimensions quarters the bitrate.
        assert_eq!(
            scaled_bit_rate(8_000_000, (1920, 1080), (960, 540), None),
            2_000_000
        );
        // Identity when dimensions match.
        assert_eq!(
            scaled_bit_rate(8_000_000, (1920, 1080), (1920, 1080), None),
            8_000_000
        );
    }

    #[test]
    fn test_bit_rate_fallback_uses_area_times_fps() {
        assert_eq!(
            scaled_bit_rate(0, (1920, 1080), (1280, 720), Some(Rational::new(30, 1))),
            1280 * 720 * 30
        );
        // Unknown frame rate falls back to 30.
        assert_eq!(
            scaled_bit_rate(0, (1920, 1080), (1280, 720), None),
            1280 * 720 * 30
        );
    }
}
