//! Abstract codec operations.
//!
//! The engine never parses codec bitstreams itself. Video frame
//! reconstruction and audio PCM synthesis live behind the traits here, so
//! any Theora and Vorbis binding (or a test double) can plug in. Header
//! parsers double as stream classifiers during bootstrap: a packet the
//! parser refuses is simply not a stream of that kind.

use serde::{Deserialize, Serialize};

use crate::ogg::Packet;

// ============================================================================
// Results
// ============================================================================

/// Outcome of offering a packet to a header parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderResult {
    /// The packet was a valid header and has been absorbed.
    Consumed,
    /// The packet does not belong to this codec at all.
    NotAHeader,
    /// The packet claimed to be a header but failed to parse.
    Invalid,
}

/// Outcome of submitting a data packet to the video decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitResult {
    /// A new frame was reconstructed.
    Decoded { granule: i64 },
    /// The packet repeats the previous frame. The planes are unchanged but
    /// the granule still advances.
    Duplicate { granule: i64 },
    /// The packet was not decodable and should be skipped.
    Rejected,
}

// ============================================================================
// Parameters
// ============================================================================

/// Properties of a fully parsed video header set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoParams {
    /// Coded frame dimensions. Always multiples of the codec block size.
    pub frame_width: u32,
    pub frame_height: u32,
    /// Picture rectangle inside the coded frame.
    pub pic_x: u32,
    pub pic_y: u32,
    pub pic_width: u32,
    pub pic_height: u32,
    pub fps_numerator: u32,
    pub fps_denominator: u32,
    /// Right-shift that extracts the key frame number from a granule.
    pub keyframe_granule_shift: u8,
    /// Codec version as (major, minor, subminor).
    pub version: (u8, u8, u8),
}

impl VideoParams {
    pub fn fps(&self) -> f32 {
        self.fps_numerator as f32 / self.fps_denominator as f32
    }

    /// Granule value to pin into a freshly allocated decoder when playback
    /// resumes at the start of the stream.
    ///
    /// Version 3.2.0 streams count granules from zero; every later version
    /// counts from one. The difference is tabulated here so no call site
    /// needs to know about it.
    pub fn initial_seek_granule(&self) -> i64 {
        match self.version {
            (3, 2, 0) => 0,
            _ => 1,
        }
    }
}

/// Properties of a fully parsed audio header set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioParams {
    pub channels: u32,
    pub sample_rate: u32,
}

/// Decoded luma/chroma planes handed to the pixel transform.
pub struct YcbcrPlanes<'a> {
    pub y: &'a [u8],
    pub y_stride: usize,
    pub cb: &'a [u8],
    pub cb_stride: usize,
    pub cr: &'a [u8],
    pub cr_stride: usize,
}

// ============================================================================
// Video traits
// ============================================================================

/// Incremental parser for the three-packet video header sequence.
pub trait VideoHeaders: Send {
    fn header_in(&mut self, packet: &Packet) -> HeaderResult;

    /// Number of headers absorbed so far (0..=3).
    fn count(&self) -> u8;

    fn is_complete(&self) -> bool {
        self.count() >= 3
    }

    /// Available once all three headers are in.
    fn params(&self) -> Option<&VideoParams>;

    /// Allocates a decoder from the retained setup data. Callable any number
    /// of times; seek and restart reallocate the decoder from here.
    fn alloc_decoder(&self) -> Box<dyn VideoDecoder>;
}

/// A live video decoder instance.
pub trait VideoDecoder: Send {
    fn submit(&mut self, packet: &Packet) -> SubmitResult;

    /// Frame number a granule position maps to.
    fn granule_frame(&self, granule: i64) -> i64;

    /// Presentation time in seconds of the end of the frame at `granule`.
    fn granule_time(&self, granule: i64) -> f64;

    /// Overwrites the decoder's granule tracking. Required after seeking,
    /// since the decoder cannot know the position otherwise.
    fn set_granule(&mut self, granule: i64);

    /// Planes of the most recently decoded frame.
    fn planes(&self) -> YcbcrPlanes<'_>;
}

// ============================================================================
// Audio traits
// ============================================================================

/// Incremental parser for the three-packet audio header sequence.
pub trait AudioHeaders: Send {
    fn header_in(&mut self, packet: &Packet) -> HeaderResult;

    fn count(&self) -> u8;

    fn is_complete(&self) -> bool {
        self.count() >= 3
    }

    /// Value of the `LANGUAGE=` comment, when present.
    fn language(&self) -> Option<&str>;

    /// Available once all three headers are in.
    fn params(&self) -> Option<&AudioParams>;

    /// Allocates synthesis state for the parsed stream.
    fn alloc_synth(&self) -> Box<dyn AudioSynth>;
}

/// A live audio synthesis instance.
pub trait AudioSynth: Send {
    /// Runs one packet through synthesis. Returns false when the packet is
    /// rejected; rejected packets are skipped without ending playback.
    fn synthesize(&mut self, packet: &Packet) -> bool;

    /// Frames of PCM ready for extraction without further input.
    fn pcm_out(&mut self) -> usize;

    /// Per-channel PCM buffers. Each holds at least [`pcm_out`] frames.
    ///
    /// [`pcm_out`]: AudioSynth::pcm_out
    fn pcm_channels(&self) -> &[Vec<f32>];

    /// Marks `frames` frames as consumed from the synthesis buffer.
    fn consumed(&mut self, frames: usize);

    /// Time in seconds a granule position maps to.
    fn granule_time(&self, granule: i64) -> f64;

    /// Discards buffered synthesis state, as after a seek.
    fn restart(&mut self);
}

// ============================================================================
// Factory and output seam
// ============================================================================

/// Hands out fresh header parsers during bootstrap.
///
/// Every beginning-of-stream page gets classified by offering its first
/// packet to parsers created here, so the factory must tolerate parsers
/// that are created and immediately discarded.
pub trait CodecFamily: Send + Sync {
    fn new_video_headers(&self) -> Box<dyn VideoHeaders>;
    fn new_audio_headers(&self) -> Box<dyn AudioHeaders>;
}

/// Converts decoded planes into the consumer's frame payload.
///
/// Called exactly once per published frame, on the decoder thread. The
/// payload layout is owned by the consumer and opaque to the engine.
pub trait PixelTransform: Send {
    fn transform(&mut self, planes: &YcbcrPlanes<'_>, payload: &mut Vec<u8>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_granule_is_tabulated_by_version() {
        let mut params = VideoParams {
            frame_width: 320,
            frame_height: 240,
            pic_x: 0,
            pic_y: 0,
            pic_width: 320,
            pic_height: 240,
            fps_numerator: 30,
            fps_denominator: 1,
            keyframe_granule_shift: 6,
            version: (3, 2, 0),
        };
        assert_eq!(params.initial_seek_granule(), 0);

        params.version = (3, 2, 1);
        assert_eq!(params.initial_seek_granule(), 1);
        params.version = (3, 3, 0);
        assert_eq!(params.initial_seek_granule(), 1);
        params.version = (4, 0, 0);
        assert_eq!(params.initial_seek_granule(), 1);
    }

    #[test]
    fn fps_is_a_ratio() {
        let params = VideoParams {
            frame_width: 320,
            frame_height: 240,
            pic_x: 0,
            pic_y: 0,
            pic_width: 320,
            pic_height: 240,
            fps_numerator: 30000,
            fps_denominator: 1001,
            keyframe_granule_shift: 6,
            version: (3, 2, 1),
        };
        assert!((params.fps() - 29.97).abs() < 0.01);
    }
}
