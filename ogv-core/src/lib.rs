//! # OGV Core
//!
//! Clip engine for Ogg streams carrying a Theora video track and optional
//! Vorbis audio tracks. The engine demultiplexes the container, keeps a
//! bounded queue of decoded frames synchronized to a presentation clock,
//! buffers audio ahead of playback, and supports byte-level seeking with
//! key-frame alignment and looped playback.
//!
//! Codec bitstream work stays outside: Theora and Vorbis bindings plug in
//! through the traits in [`codec`], pixel conversion through
//! [`codec::PixelTransform`], and audio output through
//! [`audio::AudioSinkFactory`].

// ============================================================================
// Container
// ============================================================================
pub mod ogg;
pub mod source;

// ============================================================================
// Codec seams
// ============================================================================
pub mod codec;

// ============================================================================
// Playback
// ============================================================================
pub mod audio;
pub mod clip;
pub mod clock;
pub mod frame_queue;
pub mod output;

// ============================================================================
// Support
// ============================================================================
pub mod language;
pub mod util;

pub use clip::{Clip, ClipError, ClipOptions, ClipStats};
pub use clock::{ManualClock, PresentationClock, SystemClock};
pub use frame_queue::{FrameQueue, VideoFrame};
pub use source::{DataSource, FileDataSource, MemoryDataSource};
