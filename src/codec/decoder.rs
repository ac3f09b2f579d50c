//! # Video Decoder Stage
//!
//! Opens a container, probes the first video stream, and decodes it into a
//! frame ring, optionally restricted to a list of time sections.
//!
//! `open` only probes: stream layout, dimensions, duration, pixel format,
//! time base, codec. The ffmpeg contexts used for the actual decode are
//! created by `start` on whichever thread runs the loop (inline or worker),
//! so no codec context ever crosses a thread boundary.
//!
//! Frames copied into the ring have their PTS and duration rewritten to
//! microseconds; everything downstream works in µs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::thread::JoinHandle;

use ffmpeg_next as ffmpeg;

use ffmpeg::format::Pixel;
use ffmpeg::util::frame::video::Video as Frame;
use ffmpeg::{Rational, codec, format, media};
use log::{error, warn};

use crate::codec::converter::ConverterStage;
use crate::codec::encoder::{EncoderSettings, PassthroughPacket, scaled_bit_rate};
use crate::codec::section::{Section, normalize_sections};
use crate::codec::{copy_frame, frame_duration, set_frame_duration, ticks_to_micros};
use crate::core::RingBuffer;
use crate::error::{FilterError, FilterResult};

/// Ring of decoded frames between the decoder and the format converter.
pub type FrameRing = RingBuffer<Frame>;

/// Everything the probe learns about the video stream. Plain data so it can
/// move into the decode worker.
#[derive(Clone, Copy)]
struct StreamInfo {
    stream_index: usize,
    width: u32,
    height: u32,
    duration_us: i64,
    time_base: Rational,
    pixel_format: Pixel,
    codec_id: codec::Id,
    bit_rate: usize,
    frame_rate: Option<Rational>,
}

/// Receives what the decode loop produces: admitted video frames (with µs
/// timing) and non-video packets for pass-through.
pub(crate) trait FrameSink {
    fn frame(&mut self, frame: &Frame, pts: i64, duration: i64) -> FilterResult<()>;
    fn passthrough(
        &mut self,
        packet: ffmpeg::Packet,
        time_base: Rational,
    ) -> FilterResult<()>;
}

pub struct VideoDecoder {
    path: PathBuf,
    info: StreamInfo,
    terminate: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl VideoDecoder {
    /// Opens `path` and probes its first video stream.
    pub fn open(path: &Path) -> FilterResult<Self> {
        let ictx =
            format::input(path).map_err(|e| FilterError::demux("open input", e))?;

        let stream = ictx
            .streams()
            .best(media::Type::Video)
            .ok_or_else(|| FilterError::demux("find video stream", "no video stream"))?;
        let stream_index = stream.index();
        let time_base = stream.time_base();
        let parameters = stream.parameters();
        let codec_id = parameters.id();

        if ffmpeg::decoder::find(codec_id).is_none() {
            return Err(FilterError::decode(
                "find decoder",
                format!("no decoder available for {codec_id:?}"),
            ));
        }

        let decoder = codec::context::Context::from_parameters(parameters)
            .map_err(|e| FilterError::decode("decoder parameters", e))?
            .decoder()
            .video()
            .map_err(|e| FilterError::decode("decoder open", e))?;

        let info = StreamInfo {
            stream_index,
            width: decoder.width(),
            height: decoder.height(),
            duration_us: ictx.duration().max(0),
            time_base,
            pixel_format: decoder.format(),
            codec_id,
            bit_rate: decoder.bit_rate(),
            frame_rate: decoder.frame_rate(),
        };
        log::info!(
            "opened {}: {}x{}, {:.2} s, {:?}",
            path.display(),
            info.width,
            info.height,
            info.duration_us as f64 / 1_000_000.0,
            info.pixel_format
        );

        Ok(Self {
            path: path.to_path_buf(),
            info,
            terminate: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }

    pub fn width(&self) -> u32 {
        self.info.width
    }

    pub fn height(&self) -> u32 {
        self.info.height
    }

    /// Source duration in microseconds.
    pub fn duration(&self) -> i64 {
        self.info.duration_us
    }

    pub fn pixel_format(&self) -> Pixel {
        self.info.pixel_format
    }

    /// Builds the frame→texture converter stage from the probed stream.
    pub fn make_format_converter(&self) -> ConverterStage {
        ConverterStage::new(self.info.width, self.info.height, self.info.pixel_format)
    }

    /// Builds the encoder settings for a `width`×`height` output: same codec
    /// as the source, bitrate scaled by output area (with an area·fps
    /// fallback when the source bitrate is unknown), GOP 4, one B-frame,
    /// native pixel format.
    pub fn make_encoder(&self, width: u32, height: u32) -> EncoderSettings {
        EncoderSettings {
            codec_id: self.info.codec_id,
            width,
            height,
            pixel_format: self.info.pixel_format,
            bit_rate: scaled_bit_rate(
                self.info.bit_rate,
                (self.info.width, self.info.height),
                (width, height),
                self.info.frame_rate,
            ),
            frame_rate: self.info.frame_rate,
            video_stream_index: self.info.stream_index,
        }
    }

    /// Starts decoding into `output`. Non-video packets go to `passthrough`
    /// when given. With `spawn_worker` the loop runs on its own thread,
    /// joined when the decoder drops; otherwise it runs to completion on the
    /// caller's thread.
    pub fn start(
        &mut self,
        output: Arc<FrameRing>,
        sections: Vec<Section>,
        passthrough: Option<Sender<PassthroughPacket>>,
        spawn_worker: bool,
    ) {
        let path = self.path.clone();
        let info = self.info;
        let terminate = Arc::clone(&self.terminate);

        let work = move || {
            output.init(|_| Frame::new(info.pixel_format, info.width, info.height));
            let mut sink = RingSink {
                ring: &output,
                passthrough,
            };
            match decode_sections(&path, info, &sections, &terminate, &mut sink) {
                Ok(()) => output.finish(),
                Err(e) => {
                    error!("decode failed: {e}");
                    output.finish();
                }
            }
        };

        if spawn_worker {
            self.worker = Some(std::thread::spawn(work));
        } else {
            work();
        }
    }

    /// Runs the decode loop inline against an arbitrary sink (the inline
    /// driver's render/encode latch).
    pub(crate) fn run(
        &mut self,
        sections: &[Section],
        sink: &mut dyn FrameSink,
    ) -> FilterResult<()> {
        decode_sections(&self.path, self.info, sections, &self.terminate, sink)
    }

    /// Requests an early exit; the decode loop polls this on every packet and
    /// every decoded frame and returns without marking its ring done. Callers
    /// tear the pipeline down afterwards (finish the rings they own, drain
    /// the queued tail, join the workers).
    pub fn terminate(&self) {
        self.terminate.store(true, Ordering::Relaxed);
    }
}

impl Drop for VideoDecoder {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

struct RingSink<'a> {
    ring: &'a FrameRing,
    passthrough: Option<Sender<PassthroughPacket>>,
}

impl FrameSink for RingSink<'_> {
    fn frame(&mut self, frame: &Frame, pts: i64, duration: i64) -> FilterResult<()> {
        let mut slot = self.ring.get_to_write();
        copy_frame(frame, &mut slot);
        slot.set_pts(Some(pts));
        set_frame_duration(&mut slot, duration);
        Ok(())
    }

    fn passthrough(
        &mut self,
        packet: ffmpeg::Packet,
        time_base: Rational,
    ) -> FilterResult<()> {
        if let Some(sender) = &self.passthrough {
            // The encoder side hanging up just means pass-through is over.
            let _ = sender.send(PassthroughPacket { packet, time_base });
        }
        Ok(())
    }
}

/// Whether the drop policy ended the current section.
enum SectionState {
    Continue,
    Past,
}

/// The decode engine shared by the threaded and inline shapes: re-opens the
/// input, then per section seeks, decodes, filters by the drop policy, and
/// feeds the sink with µs timing.
fn decode_sections(
    path: &Path,
    info: StreamInfo,
    sections: &[Section],
    terminate: &AtomicBool,
    sink: &mut dyn FrameSink,
) -> FilterResult<()> {
    let sections = normalize_sections(sections, info.duration_us);

    let mut ictx =
        format::input(path).map_err(|e| FilterError::demux("reopen input", e))?;
    let mut decoder = codec::context::Context::from_parameters(
        ictx.stream(info.stream_index)
            .ok_or_else(|| FilterError::demux("reopen input", "video stream vanished"))?
            .parameters(),
    )
    .map_err(|e| FilterError::decode("decoder parameters", e))?
    .decoder()
    .video()
    .map_err(|e| FilterError::decode("decoder open", e))?;

    let mut frame = Frame::empty();

    for section in sections {
        if terminate.load(Ordering::Relaxed) {
            return Ok(());
        }
        decoder.flush();
        // Backward seek: land on the nearest keyframe at or before the
        // section start (microseconds, container time base).
        if let Err(e) = ictx.seek(section.start, ..=section.start) {
            warn!("seek to {} us failed: {e}", section.start);
        }

        let mut reached_end = false;
        for (stream, packet) in ictx.packets() {
            if terminate.load(Ordering::Relaxed) {
                return Ok(());
            }
            if stream.index() != info.stream_index {
                sink.passthrough(packet, stream.time_base())?;
                continue;
            }
            match decoder.send_packet(&packet) {
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => {
                    warn!("dropping packet at dts {:?}: {e}", packet.dts());
                    continue;
                }
            }
            match drain_frames(&mut decoder, &mut frame, &section, &info, terminate, sink)? {
                SectionState::Past => {
                    reached_end = true;
                    break;
                }
                SectionState::Continue => {}
            }
        }

        if !reached_end {
            // EOF inside the section: flush buffered B-frames before moving
            // on so trailing frames are not lost.
            let _ = decoder.send_eof();
            let _ = drain_frames(&mut decoder, &mut frame, &section, &info, terminate, sink)?;
        }
    }
    Ok(())
}

fn drain_frames(
    decoder: &mut ffmpeg::decoder::Video,
    frame: &mut Frame,
    section: &Section,
    info: &StreamInfo,
    terminate: &AtomicBool,
    sink: &mut dyn FrameSink,
) -> FilterResult<SectionState> {
    while decoder.receive_frame(frame).is_ok() {
        // One packet can yield a burst of frames; re-check the flag before
        // each publish so a terminated decoder never blocks on a ring whose
        // consumer is gone.
        if terminate.load(Ordering::Relaxed) {
            return Ok(SectionState::Past);
        }
        let low = ticks_to_micros(frame.pts().unwrap_or(0), info.time_base);
        let high = low + ticks_to_micros(frame_duration(frame), info.time_base);
        if high < section.start {
            // Keyframe overshoot from the backward seek; not ours yet.
            continue;
        }
        if low > section.end {
            return Ok(SectionState::Past);
        }
        sink.frame(frame, low, high - low)?;
    }
    Ok(SectionState::Continue)
}
