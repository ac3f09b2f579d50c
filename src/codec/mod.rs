//! # Codec Stage Module
//!
//! The CPU side of the pipeline: demux/decode, pixel-format conversion, and
//! encode/mux, all built on the `ffmpeg` libraries. Stages communicate
//! exclusively through the ring buffers in [`crate::core`].
//!
//! All timing downstream of the decoder is in microseconds: the decoder
//! rewrites frame PTS/duration from stream time-base ticks to µs when it
//! copies a frame into its ring slot, and the encoder rescales from µs to the
//! output stream's time base when it writes packets.

use ffmpeg_next as ffmpeg;

use ffmpeg::Rational;
use ffmpeg::util::frame::video::Video as Frame;

pub mod converter;
pub mod decoder;
pub mod encoder;
pub mod section;

pub use converter::{ConverterStage, PixelFormatConverter};
pub use decoder::{FrameRing, VideoDecoder};
pub use encoder::{EncoderSettings, EncoderStage, PassthroughPacket, VideoEncoder};
pub use section::{Section, normalize_sections};

/// Time base the encoder runs in; everything after the decoder is µs.
pub fn micros_time_base() -> Rational {
    Rational::new(1, 1_000_000)
}

/// Converts stream time-base ticks to microseconds.
///
/// Intermediate math is 128-bit: `ticks · 1e6` alone can overflow 64 bits for
/// long inputs with fine-grained time bases.
pub fn ticks_to_micros(ticks: i64, time_base: Rational) -> i64 {
    if time_base.denominator() == 0 {
        return 0;
    }
    (ticks as i128 * 1_000_000 * time_base.numerator() as i128
        / time_base.denominator() as i128) as i64
}

/// Frame duration in the frame's own time base.
///
/// No safe accessor exists for `AVFrame.duration` in this binding version.
pub(crate) fn frame_duration(frame: &Frame) -> i64 {
    unsafe { (*frame.as_ptr()).duration }
}

pub(crate) fn set_frame_duration(frame: &mut Frame, duration: i64) {
    unsafe {
        (*frame.as_mut_ptr()).duration = duration;
    }
}

/// Deep-copies pixel data and properties between frames of the same
/// format/size. `av_frame_copy` handles per-plane stride differences that a
/// slice copy would get wrong.
pub(crate) fn copy_frame(src: &Frame, dst: &mut Frame) {
    unsafe {
        if ffmpeg::ffi::av_frame_copy(dst.as_mut_ptr(), src.as_ptr()) < 0 {
            log::warn!("frame copy failed at pts {:?}", src.pts());
        }
        ffmpeg::ffi::av_frame_copy_props(dst.as_mut_ptr(), src.as_ptr());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_to_micros_common_bases() {
        // 90 kHz: one second of ticks.
        assert_eq!(ticks_to_micros(90_000, Rational::new(1, 90_000)), 1_000_000);
        // NTSC frame duration in 1/30000: 1001 ticks = one frame ≈ 33.366 ms.
        assert_eq!(ticks_to_micros(1001, Rational::new(1, 30_000)), 33_366);
        // Millisecond base.
        assert_eq!(ticks_to_micros(1, Rational::new(1, 1_000)), 1_000);
    }

    #[test]
    fn test_ticks_to_micros_no_overflow_on_long_input() {
        // Ten hours at 90 kHz would overflow i64 without widening.
        let ten_hours_ticks = 90_000i64 * 3600 * 10;
        assert_eq!(
            ticks_to_micros(ten_hours_ticks, Rational::new(1, 90_000)),
            36_000_000_000
        );
    }

    #[test]
    fn test_ticks_to_micros_degenerate_base() {
        assert_eq!(ticks_to_micros(100, Rational::new(1, 0)), 0);
    }
}
