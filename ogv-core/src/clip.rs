//! The clip engine: bootstrap, steady-state decode, seek, restart.
//!
//! A [`Clip`] owns one video stream and at most one audio stream pulled out
//! of an Ogg container. The host drives it with [`decode_next_frame`] once
//! per tick; decoded frames land in the bounded frame queue and synthesized
//! audio lands in the packet queue, always buffered ahead of the
//! presentation clock. Seeks are latched with [`seek`] and executed at the
//! top of the next tick.
//!
//! [`decode_next_frame`]: Clip::decode_next_frame
//! [`seek`]: Clip::seek

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::audio::{AudioShared, AudioSharedHandle, AudioSinkFactory};
use crate::clock::PresentationClock;
use crate::codec::{
    AudioHeaders, AudioParams, AudioSynth, CodecFamily, HeaderResult, PixelTransform,
    SubmitResult, VideoDecoder, VideoHeaders, VideoParams,
};
use crate::frame_queue::FrameQueue;
use crate::language::{check_language, LanguageMatch};
use crate::ogg::{Packet, PacketOut, PageOut, StreamState, SyncState, HOLE_RETRY_LIMIT};
use crate::source::DataSource;
use crate::util::pot_ceil;

/// Bytes requested from the data source per ingest round.
pub const BUFFER_SIZE: usize = 4096;

/// Maximum probes attempted by the coarse byte-level seek.
const SEEK_PROBE_LIMIT: u32 = 100;

/// The coarse seek stops once it lands within this many frames below the
/// target.
const SEEK_STOP_WINDOW: i64 = 10;

/// Maximum number of growing tail windows scanned by the duration probe.
const DURATION_PROBE_WINDOWS: u64 = 50;

// ============================================================================
// Errors and options
// ============================================================================

/// Failures that abort [`Clip::load`]. Runtime decode problems are logged
/// and absorbed instead.
#[derive(Debug, Error)]
pub enum ClipError {
    #[error("stream ended before the video headers completed")]
    TruncatedHeaders,
    #[error("invalid video header: {0}")]
    InvalidVideoHeader(String),
    #[error("no video stream found in container")]
    NoVideoStream,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Host configuration for a clip.
#[derive(Debug, Clone)]
pub struct ClipOptions {
    /// Frame queue capacity. Clamped to at least 1.
    pub precached_frames_count: usize,
    /// Round the stride up to the next power of two.
    pub use_pot_stride: bool,
    /// BCP-47 style short tag ("en", "en-US"). Empty means no preference.
    pub audio_language_preference: String,
    /// Spacing of frames the drop-ahead policy must keep. Streams with a
    /// different group-of-pictures layout should set their own interval.
    pub keyframe_interval: u32,
    /// Per-sample multiplier applied when audio packets are queued.
    pub audio_gain: f32,
}

impl Default for ClipOptions {
    fn default() -> Self {
        Self {
            precached_frames_count: 8,
            use_pot_stride: false,
            audio_language_preference: String::new(),
            keyframe_interval: 16,
            audio_gain: 1.0,
        }
    }
}

/// Host-facing snapshot of playback state.
#[derive(Debug, Clone, Serialize)]
pub struct ClipStats {
    pub width: u32,
    pub height: u32,
    pub fps: f32,
    pub frames_count: i64,
    pub duration: f32,
    pub iteration: u32,
    pub dropped_frames: u64,
    pub last_decoded_frame_number: u64,
    pub ready_frames: usize,
    pub queued_audio_seconds: f32,
}

// ============================================================================
// Stream state
// ============================================================================

/// The retained audio stream after selection.
struct AudioStream {
    stream: StreamState,
    headers: Box<dyn AudioHeaders>,
    synth: Box<dyn AudioSynth>,
    params: AudioParams,
}

/// An audio stream still completing its headers during bootstrap.
struct AudioCandidate {
    stream: StreamState,
    headers: Box<dyn AudioHeaders>,
    /// Position in enumeration order, used as the selection tie-breaker.
    order: usize,
}

struct BootstrapOut {
    sync: SyncState,
    video_stream: StreamState,
    video_headers: Box<dyn VideoHeaders>,
    audio: Option<(StreamState, Box<dyn AudioHeaders>)>,
}

// ============================================================================
// Clip
// ============================================================================

/// A loaded video plus optional audio source with decoded-frame output.
pub struct Clip {
    source: Box<dyn DataSource>,
    clock: Arc<dyn PresentationClock>,
    options: ClipOptions,
    transform: Box<dyn PixelTransform>,

    sync: SyncState,
    video_stream: StreamState,
    video_headers: Box<dyn VideoHeaders>,
    video_decoder: Box<dyn VideoDecoder>,
    video_params: VideoParams,

    audio: Option<AudioStream>,
    audio_shared: AudioSharedHandle,
    audio_sink_active: bool,

    frame_queue: FrameQueue,

    width: u32,
    height: u32,
    stride: u32,
    sub_frame_x: u32,
    sub_frame_y: u32,
    sub_frame_width: u32,
    sub_frame_height: u32,
    fps: f32,
    frame_duration: f32,
    frames_count: i64,
    duration: f32,

    iteration: u32,
    end_of_file: bool,
    restarted: bool,
    seek_frame: i64,
    auto_restart: bool,
    audio_gain: f32,
    audio_channels: u32,
    audio_frequency: u32,
    dropped_frames: u64,
    read_audio_samples: u64,
    last_decoded_frame_number: u64,
}

impl Clip {
    /// Bootstraps a clip from a byte source.
    ///
    /// Completes the codec header sequences, selects the best audio stream
    /// by language preference, probes the duration from the file tail, and
    /// rewinds for playback. Fails only on header-phase problems; every
    /// provisional allocation is released on the error paths.
    pub fn load(
        mut source: Box<dyn DataSource>,
        codecs: &dyn CodecFamily,
        transform: Box<dyn PixelTransform>,
        clock: Arc<dyn PresentationClock>,
        sink_factory: Option<&dyn AudioSinkFactory>,
        options: ClipOptions,
    ) -> Result<Self, ClipError> {
        let preference = options.audio_language_preference.clone();
        let bootstrap = read_headers(
            &mut *source,
            codecs,
            sink_factory.is_some(),
            &preference,
        )?;
        let BootstrapOut {
            mut sync,
            video_stream,
            video_headers,
            audio,
        } = bootstrap;

        let video_params = video_headers
            .params()
            .cloned()
            .ok_or_else(|| ClipError::InvalidVideoHeader("incomplete parameters".into()))?;
        let video_decoder = video_headers.alloc_decoder();

        let width = video_params.frame_width;
        let height = video_params.frame_height;
        let mut stride = width;
        if options.use_pot_stride {
            stride = pot_ceil(stride);
        }
        let fps = video_params.fps();
        let frame_queue = FrameQueue::new(options.precached_frames_count);
        info!(width, height, fps, "clip loaded");

        // Find the duration by scanning growing windows at the end of the
        // file for the last video granule.
        let mut frames_count: i64 = -1;
        if let Some(stream_size) = source.size() {
            for i in 1..=DURATION_PROBE_WINDOWS {
                let window = BUFFER_SIZE as u64 * i;
                sync.reset();
                source.seek(stream_size.saturating_sub(window))?;
                sync.pump(&mut *source, window as usize)?;
                sync.page_seek();
                loop {
                    let page = match sync.page_out() {
                        PageOut::Page(page) => page,
                        PageOut::Desync => continue,
                        PageOut::NeedData => break,
                    };
                    if page.serial() != video_stream.serial() {
                        continue;
                    }
                    let granule = page.granule();
                    if granule >= 0 {
                        frames_count = video_decoder.granule_frame(granule) + 1;
                    } else if frames_count > 0 {
                        // Delta frames trailing the last granule-bearing page.
                        frames_count += 1;
                    }
                }
                if frames_count > 0 || stream_size < window {
                    break;
                }
            }
        }
        let mut duration = -1.0;
        if frames_count < 0 {
            warn!("unable to determine clip duration");
        } else {
            duration = frames_count as f32 / fps;
            debug!(duration, "clip duration");
        }

        // Back to the start of the stream for playback.
        sync.reset();
        source.seek(0)?;

        let mut audio_stream = None;
        let mut audio_shared: AudioSharedHandle = Arc::new(Mutex::new(AudioShared::new(
            AudioParams {
                channels: 0,
                sample_rate: 0,
            },
        )));
        let mut audio_sink_active = false;
        let mut audio_channels = 0;
        let mut audio_frequency = 0;
        if let Some((stream, headers)) = audio {
            if let Some(params) = headers.params().copied() {
                let synth = headers.alloc_synth();
                audio_channels = params.channels;
                audio_frequency = params.sample_rate;
                let mut shared = AudioShared::new(params);
                if let Some(factory) = sink_factory {
                    shared.sink = factory.create(params.channels, params.sample_rate);
                }
                audio_sink_active = shared.sink.is_some();
                audio_shared = Arc::new(Mutex::new(shared));
                audio_stream = Some(AudioStream {
                    stream,
                    headers,
                    synth,
                    params,
                });
            }
        }

        let audio_gain = options.audio_gain;
        Ok(Self {
            source,
            clock,
            transform,
            sync,
            video_stream,
            video_headers,
            video_decoder,
            sub_frame_x: video_params.pic_x,
            sub_frame_y: video_params.pic_y,
            sub_frame_width: video_params.pic_width,
            sub_frame_height: video_params.pic_height,
            video_params,
            audio: audio_stream,
            audio_shared,
            audio_sink_active,
            frame_queue,
            width,
            height,
            stride,
            fps,
            frame_duration: 1.0 / fps,
            frames_count,
            duration,
            iteration: 0,
            end_of_file: false,
            restarted: false,
            seek_frame: -1,
            auto_restart: false,
            audio_gain,
            audio_channels,
            audio_frequency,
            dropped_frames: 0,
            read_audio_samples: 0,
            last_decoded_frame_number: 0,
            options,
        })
    }

    // ========================================================================
    // Decode tick
    // ========================================================================

    /// Decodes one frame into the frame queue.
    ///
    /// A latched seek is executed first. Returns false when no progress was
    /// possible this tick: the queue is full, the stream ended without auto
    /// restart, or end of file was already reached.
    pub fn decode_next_frame(&mut self) -> bool {
        if self.seek_frame >= 0 {
            self.execute_seek();
        }
        if self.end_of_file {
            return false;
        }
        let Some(mut frame) = self.frame_queue.request_empty() else {
            return false;
        };

        let mut should_restart = false;
        let mut published = false;
        loop {
            if let Some(packet) = self.read_video_packet() {
                let granule = match self.video_decoder.submit(&packet) {
                    SubmitResult::Decoded { granule } | SubmitResult::Duplicate { granule } => {
                        granule
                    }
                    SubmitResult::Rejected => continue,
                };
                let time = self.video_decoder.granule_time(granule) as f32;
                let frame_number = self.video_decoder.granule_frame(granule).max(0) as u64;
                let anchor = self.options.keyframe_interval.max(1) as u64;
                // Late frames are discarded before publication so a slow
                // decode catches back up with the clock. Frames on the
                // anchor interval are always kept.
                if (time as f64) < self.clock.now()
                    && !self.restarted
                    && frame_number % anchor != 0
                {
                    self.dropped_frames += 1;
                    continue;
                }
                frame.time_to_display = time - self.frame_duration;
                frame.iteration = self.iteration;
                frame.frame_number = frame_number;
                self.last_decoded_frame_number = frame_number;
                {
                    let planes = self.video_decoder.planes();
                    self.transform.transform(&planes, &mut frame.payload);
                }
                self.frame_queue.publish(frame);
                published = true;
                break;
            }
            if !self.read_data() {
                self.frame_queue.release_empty(frame);
                should_restart = self.auto_restart;
                break;
            }
        }

        if self.audio_active() {
            self.run_audio_pump();
        }
        if published && self.restarted {
            self.restarted = false;
        }
        if should_restart {
            self.iteration += 1;
            self.execute_restart();
        }
        published || should_restart
    }

    /// Pulls one video packet, retrying through transient hole reports.
    fn read_video_packet(&mut self) -> Option<Packet> {
        for _ in 0..HOLE_RETRY_LIMIT {
            match self.video_stream.packet_out() {
                PacketOut::Packet(packet) => return Some(packet),
                PacketOut::NeedData => return None,
                PacketOut::Hole => continue,
            }
        }
        None
    }

    /// Ingests container data, routing pages to the stream reassemblers.
    ///
    /// Keeps reading until the audio side is buffered one second past the
    /// clock, the audio stream ends, or no audio is retained. Returns false
    /// on exhaustion, setting end of file unless auto restart will run.
    fn read_data(&mut self) -> bool {
        let mut audio = self.audio.take();
        let result = self.read_data_impl(audio.as_mut());
        self.audio = audio;
        result
    }

    fn read_data_impl(&mut self, mut audio: Option<&mut AudioStream>) -> bool {
        let audio_active = self.audio_sink_active && audio.is_some();
        let mut audio_eos = false;
        let mut audio_time = 0.0f64;
        let mut time = self.clock.now();
        if self.restarted {
            time = 0.0;
        }
        loop {
            let bytes = match self.sync.pump(&mut *self.source, BUFFER_SIZE) {
                Ok(n) => n,
                Err(err) => {
                    warn!("read failed: {err}");
                    0
                }
            };
            if bytes == 0 {
                if !self.auto_restart {
                    self.end_of_file = true;
                    info!("clip finished playing");
                }
                return false;
            }
            loop {
                let page = match self.sync.page_out() {
                    PageOut::Page(page) => page,
                    PageOut::Desync => continue,
                    PageOut::NeedData => break,
                };
                if page.serial() == self.video_stream.serial() {
                    self.video_stream.page_in(&page);
                }
                if audio_active {
                    if let Some(audio) = audio.as_deref_mut() {
                        if page.serial() == audio.stream.serial() {
                            audio_time = audio.synth.granule_time(page.granule());
                            audio_eos = page.eos();
                            audio.stream.page_in(&page);
                        }
                    }
                }
            }
            if !(audio_active && !audio_eos && audio_time < time + 1.0) {
                break;
            }
        }
        true
    }

    // ========================================================================
    // Audio pump
    // ========================================================================

    fn audio_active(&self) -> bool {
        self.audio_sink_active && self.audio.is_some()
    }

    fn run_audio_pump(&mut self) {
        let Some(mut audio) = self.audio.take() else {
            return;
        };
        let shared = Arc::clone(&self.audio_shared);
        {
            let mut guard = shared.lock();
            let _ = self.decode_audio_core(&mut audio, &mut guard);
        }
        self.audio = Some(audio);
    }

    /// Synthesizes audio until the queue leads the video by the frame queue
    /// depth plus one second. Returns the granule-derived timestamp of the
    /// first packet seen, advanced past subsequently queued samples, or a
    /// negative value when no timestamp was latched.
    fn decode_audio_core(&mut self, audio: &mut AudioStream, shared: &mut AudioShared) -> f32 {
        if self.restarted {
            return -1.0;
        }
        let mut time_stamp = -1.0f32;
        let mut read_past_timestamp = false;
        let video_time = self.last_decoded_frame_number as f32 / self.fps;
        let min_lead = self.frame_queue.capacity() as f32 / self.fps + 1.0;
        loop {
            let frames = audio.synth.pcm_out();
            if frames == 0 {
                match audio.stream.packet_out() {
                    PacketOut::Packet(packet) => {
                        if audio.synth.synthesize(&packet) {
                            if time_stamp < 0.0 && packet.granule >= 0 {
                                time_stamp = audio.synth.granule_time(packet.granule) as f32;
                            } else if time_stamp >= 0.0 {
                                read_past_timestamp = true;
                            }
                        }
                        continue;
                    }
                    PacketOut::NeedData | PacketOut::Hole => {}
                }
                let audio_time = self.read_audio_samples as f32 / self.audio_frequency as f32;
                if audio_time - video_time >= min_lead || !self.read_data_impl(Some(audio)) {
                    break;
                }
                continue;
            }
            shared
                .queue
                .enqueue(audio.synth.pcm_channels(), frames, self.audio_gain);
            self.read_audio_samples += frames as u64;
            if read_past_timestamp {
                time_stamp += frames as f32 / audio.params.sample_rate as f32;
            }
            audio.synth.consumed(frames);
        }
        time_stamp
    }

    /// Hands queued packets to the sink. Called from the host tick; does
    /// nothing while the clock is paused.
    pub fn decoded_audio_check(&mut self) {
        if !self.audio_active() || self.clock.paused() {
            return;
        }
        let shared = Arc::clone(&self.audio_shared);
        let mut guard = shared.lock();
        let AudioShared { queue, sink } = &mut *guard;
        if let Some(sink) = sink.as_mut() {
            while let Some(packet) = queue.pop() {
                sink.queue(packet);
            }
        }
    }

    // ========================================================================
    // Seek
    // ========================================================================

    fn execute_seek(&mut self) {
        let target_frame = self.seek_frame;
        if self.source.size().is_none() {
            warn!("cannot seek a source of unknown size");
            self.seek_frame = -1;
            return;
        }
        info!(frame = target_frame, "seeking");
        let target_time = target_frame as f32 / self.fps;
        self.clock.seek(target_time as f64);
        let was_paused = self.clock.paused();
        if !was_paused {
            self.clock.pause();
        }
        self.end_of_file = false;
        self.restarted = false;
        self.frame_queue.reset();

        self.video_stream.reset();
        self.video_decoder = self.video_headers.alloc_decoder();
        if self.audio_active() {
            let shared = Arc::clone(&self.audio_shared);
            let mut guard = shared.lock();
            if let Some(audio) = self.audio.as_mut() {
                audio.stream.reset();
                audio.synth.restart();
            }
            guard.queue.clear();
        }

        // Locate the key frame preceding the target, then reposition to just
        // before it. Decoding forward from there lands on the target.
        let key_frame = self.seek_page(target_frame, true);
        self.seek_page((key_frame - 1).max(0), false);

        let mut granule_set = false;
        if key_frame <= 1 {
            self.video_decoder
                .set_granule(self.video_params.initial_seek_granule());
            granule_set = true;
        }

        if target_frame != 0 {
            loop {
                match self.video_stream.packet_out() {
                    PacketOut::Packet(packet) => {
                        if !granule_set {
                            if packet.granule < 0 {
                                // Delta remnants before the key frame.
                                continue;
                            }
                            self.video_decoder.set_granule(packet.granule);
                            granule_set = true;
                        }
                        let granule = match self.video_decoder.submit(&packet) {
                            SubmitResult::Decoded { granule }
                            | SubmitResult::Duplicate { granule } => granule,
                            SubmitResult::Rejected => continue,
                        };
                        if self.video_decoder.granule_frame(granule) >= target_frame - 1 {
                            break;
                        }
                    }
                    PacketOut::NeedData | PacketOut::Hole => {
                        if !self.read_data() {
                            warn!("fine seek failed, stream exhausted");
                            if !was_paused {
                                self.clock.play();
                            }
                            self.seek_frame = -1;
                            return;
                        }
                    }
                }
            }
        }

        if self.audio_active() {
            if let Some(mut audio) = self.audio.take() {
                let shared = Arc::clone(&self.audio_shared);
                let mut guard = shared.lock();
                let mut time_stamp;
                loop {
                    time_stamp = self.decode_audio_core(&mut audio, &mut guard);
                    if time_stamp >= 0.0 {
                        break;
                    }
                    if !self.read_data_impl(Some(&mut audio)) {
                        time_stamp = target_time;
                        break;
                    }
                }
                // The queue now holds audio ending at time_stamp. Either too
                // much of it lies before the target and the head is trimmed,
                // or there is a gap to fill with silence.
                let rate = (self.audio_frequency * self.audio_channels) as f32;
                let queue = &mut guard.queue;
                let mut queue_start = time_stamp - queue.seconds();
                if target_time > queue_start {
                    while let Some(head_samples) = queue.head_sample_count() {
                        let head_seconds = head_samples as f32 / rate;
                        if target_time < queue_start + head_seconds {
                            let trim = ((target_time - queue_start) * rate) as usize;
                            queue.trim_head(trim);
                            break;
                        }
                        queue_start += head_seconds;
                        queue.pop();
                    }
                } else if !queue.is_empty() {
                    let missing = ((queue_start - target_time) * rate) as usize;
                    if missing > 0 {
                        queue.prepend_silence(missing);
                    }
                }
                self.read_audio_samples =
                    (time_stamp.max(0.0) * self.audio_frequency as f32) as u64;
                drop(guard);
                self.audio = Some(audio);
                // The realignment pump may have drained the source; frames
                // around the target are still buffered and must decode.
                self.end_of_file = false;
            }
        }

        self.last_decoded_frame_number = target_frame.max(0) as u64;
        if !was_paused {
            self.clock.play();
        }
        self.seek_frame = -1;
    }

    /// Binary-searches byte offsets for a video page near `target_frame`.
    ///
    /// With `return_keyframe` the key frame number extracted from the found
    /// granule is returned. Otherwise the source is left positioned at the
    /// final search midpoint with the sync scratch cleared, ready for
    /// forward decoding, and -1 is returned.
    fn seek_page(&mut self, target_frame: i64, return_keyframe: bool) -> i64 {
        let stream_size = self.source.size().unwrap_or(0);
        let mut seek_min: u64 = 0;
        let mut seek_max: u64 = stream_size;
        let mut granule: i64 = 0;
        if target_frame == 0 {
            if let Err(err) = self.source.seek(0) {
                warn!("seek failed: {err}");
            }
        } else {
            for _ in 0..SEEK_PROBE_LIMIT {
                self.sync.reset();
                let midpoint = seek_min / 2 + seek_max / 2;
                if self.source.seek(midpoint).is_err() {
                    break;
                }
                let mut close_enough = false;
                loop {
                    match self.sync.page_out() {
                        PageOut::Page(page) => {
                            if page.serial() != self.video_stream.serial() {
                                continue;
                            }
                            let page_granule = page.granule();
                            if page_granule < 0 {
                                continue;
                            }
                            granule = page_granule;
                            let frame = self.video_decoder.granule_frame(granule);
                            if frame < target_frame && target_frame - frame < SEEK_STOP_WINDOW {
                                close_enough = true;
                                break;
                            }
                            // Shrink the search interval and probe again.
                            if target_frame - 1 > frame {
                                seek_min = midpoint;
                            } else {
                                seek_max = midpoint;
                            }
                            break;
                        }
                        PageOut::Desync => continue,
                        PageOut::NeedData => match self.sync.pump(&mut *self.source, BUFFER_SIZE) {
                            Ok(0) | Err(_) => break,
                            Ok(_) => {}
                        },
                    }
                }
                if close_enough {
                    break;
                }
            }
        }
        if return_keyframe {
            return granule >> self.video_params.keyframe_granule_shift;
        }
        self.sync.reset();
        self.sync.page_seek();
        if target_frame == 0 {
            return -1;
        }
        if let Err(err) = self.source.seek((seek_min + seek_max) / 2) {
            warn!("seek failed: {err}");
        }
        -1
    }

    // ========================================================================
    // Restart
    // ========================================================================

    /// Rewinds to byte zero for the next playback iteration.
    fn execute_restart(&mut self) {
        let was_paused = self.clock.paused();
        if !was_paused {
            self.clock.pause();
        }
        self.video_decoder.set_granule(0);
        self.video_decoder = self.video_headers.alloc_decoder();
        self.video_stream.reset();
        if self.audio_active() {
            if let Some(audio) = self.audio.as_mut() {
                self.read_audio_samples = 0;
                // Flush packets still in flight through the synthesizer
                // without letting their PCM reach the queue.
                loop {
                    match audio.stream.packet_out() {
                        PacketOut::Packet(packet) => {
                            if audio.synth.synthesize(&packet) {
                                let frames = audio.synth.pcm_out();
                                if frames > 0 {
                                    audio.synth.consumed(frames);
                                }
                            }
                        }
                        PacketOut::Hole => continue,
                        PacketOut::NeedData => break,
                    }
                }
                audio.stream.reset();
            }
        }
        self.sync.reset();
        if let Err(err) = self.source.seek(0) {
            warn!("restart seek failed: {err}");
        }
        // The replacement decoder allocated above needs its own granule
        // write; the first one landed on the decoder that was freed.
        self.video_decoder.set_granule(0);
        self.last_decoded_frame_number = 0;
        self.end_of_file = false;
        self.restarted = true;
        if !was_paused {
            self.clock.play();
        }
    }

    // ========================================================================
    // Host surface
    // ========================================================================

    /// Latches a seek. The work runs at the top of the next decode tick.
    pub fn seek(&mut self, frame: i64) {
        self.seek_frame = frame.max(0);
    }

    /// Latches a seek to a time in seconds.
    pub fn seek_to_time(&mut self, seconds: f32) {
        self.seek((seconds * self.fps) as i64);
    }

    pub fn set_auto_restart(&mut self, value: bool) {
        self.auto_restart = value;
    }

    pub fn auto_restart(&self) -> bool {
        self.auto_restart
    }

    pub fn set_audio_gain(&mut self, gain: f32) {
        self.audio_gain = gain.max(0.0);
    }

    pub fn audio_gain(&self) -> f32 {
        self.audio_gain
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row stride of the output payload, optionally rounded up to a power
    /// of two.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn sub_frame_x(&self) -> u32 {
        self.sub_frame_x
    }

    pub fn sub_frame_y(&self) -> u32 {
        self.sub_frame_y
    }

    pub fn sub_frame_width(&self) -> u32 {
        self.sub_frame_width
    }

    pub fn sub_frame_height(&self) -> u32 {
        self.sub_frame_height
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn frame_duration(&self) -> f32 {
        self.frame_duration
    }

    /// Total frame count, negative when unknown.
    pub fn frames_count(&self) -> i64 {
        self.frames_count
    }

    /// Duration in seconds, negative when unknown.
    pub fn duration(&self) -> f32 {
        self.duration
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn end_of_file(&self) -> bool {
        self.end_of_file
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    pub fn last_decoded_frame_number(&self) -> u64 {
        self.last_decoded_frame_number
    }

    pub fn read_audio_samples(&self) -> u64 {
        self.read_audio_samples
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn audio_channels(&self) -> u32 {
        self.audio_channels
    }

    pub fn audio_frequency(&self) -> u32 {
        self.audio_frequency
    }

    /// Language tag of the retained audio stream.
    pub fn audio_language(&self) -> Option<&str> {
        self.audio.as_ref().and_then(|audio| audio.headers.language())
    }

    pub fn frame_queue(&self) -> &FrameQueue {
        &self.frame_queue
    }

    /// The audio mutex: packet queue plus sink handle.
    pub fn audio_shared(&self) -> &AudioSharedHandle {
        &self.audio_shared
    }

    pub fn stats(&self) -> ClipStats {
        ClipStats {
            width: self.width,
            height: self.height,
            fps: self.fps,
            frames_count: self.frames_count,
            duration: self.duration,
            iteration: self.iteration,
            dropped_frames: self.dropped_frames,
            last_decoded_frame_number: self.last_decoded_frame_number,
            ready_frames: self.frame_queue.ready_count(),
            queued_audio_seconds: self.audio_shared.lock().queue.seconds(),
        }
    }
}

// ============================================================================
// Header bootstrap
// ============================================================================

/// Completes the three-packet header sequence of the video stream and every
/// candidate audio stream, then selects the audio stream to retain.
fn read_headers(
    source: &mut dyn DataSource,
    codecs: &dyn CodecFamily,
    decode_audio: bool,
    preference: &str,
) -> Result<BootstrapOut, ClipError> {
    let mut sync = SyncState::new();
    let mut video_headers = codecs.new_video_headers();
    let mut video_stream: Option<StreamState> = None;
    let mut candidates: BTreeMap<u32, AudioCandidate> = BTreeMap::new();
    let mut provisional = codecs.new_audio_headers();
    let mut insertion_order = 0usize;

    // Classify beginning-of-stream pages. Each gets a probe reassembler;
    // the first packet decides which codec, if any, claims the stream.
    'bos: loop {
        if sync.pump(source, BUFFER_SIZE)? == 0 {
            break;
        }
        loop {
            let page = match sync.page_out() {
                PageOut::Page(page) => page,
                PageOut::NeedData => break,
                PageOut::Desync => continue,
            };
            if !page.bos() {
                // First data-bearing page: route it and move on to header
                // completion.
                if let Some(stream) = video_stream.as_mut() {
                    stream.page_in(&page);
                }
                if let Some(candidate) = candidates.get_mut(&page.serial()) {
                    candidate.stream.page_in(&page);
                }
                break 'bos;
            }
            let mut probe = StreamState::new(page.serial());
            probe.page_in(&page);
            let packet = match probe.packet_out() {
                PacketOut::Packet(packet) => packet,
                _ => continue,
            };
            if video_stream.is_none()
                && video_headers.header_in(&packet) == HeaderResult::Consumed
            {
                video_stream = Some(probe);
            } else if decode_audio && provisional.header_in(&packet) == HeaderResult::Consumed {
                let headers = std::mem::replace(&mut provisional, codecs.new_audio_headers());
                candidates.entry(page.serial()).or_insert(AudioCandidate {
                    stream: probe,
                    headers,
                    order: insertion_order,
                });
                insertion_order += 1;
            }
            // Streams claimed by neither codec are dropped with their probe.
        }
    }

    // Complete the secondary headers, feeding pages as needed. Audio
    // streams that fail header parsing are dropped; the video stream must
    // finish or loading fails.
    loop {
        let mut done = true;

        if let Some(stream) = video_stream.as_mut() {
            while !video_headers.is_complete() {
                match stream.packet_out() {
                    PacketOut::Packet(packet) => match video_headers.header_in(&packet) {
                        HeaderResult::Consumed => {}
                        HeaderResult::NotAHeader | HeaderResult::Invalid => {
                            return Err(ClipError::InvalidVideoHeader(
                                "rejected header packet".into(),
                            ))
                        }
                    },
                    PacketOut::NeedData => break,
                    PacketOut::Hole => {
                        return Err(ClipError::InvalidVideoHeader(
                            "header stream out of sync".into(),
                        ))
                    }
                }
            }
            if !video_headers.is_complete() {
                done = false;
            }
        }

        let mut broken: Vec<u32> = Vec::new();
        for (serial, candidate) in candidates.iter_mut() {
            while !candidate.headers.is_complete() {
                match candidate.stream.packet_out() {
                    PacketOut::Packet(packet) => {
                        match candidate.headers.header_in(&packet) {
                            HeaderResult::Consumed => {}
                            HeaderResult::NotAHeader | HeaderResult::Invalid => {
                                broken.push(*serial);
                                break;
                            }
                        }
                    }
                    PacketOut::NeedData => break,
                    PacketOut::Hole => {
                        broken.push(*serial);
                        break;
                    }
                }
            }
            if !candidate.headers.is_complete() && !broken.contains(serial) {
                done = false;
            }
        }
        for serial in broken {
            debug!(serial, "dropping audio stream with invalid headers");
            candidates.remove(&serial);
        }

        if done {
            break;
        }

        match sync.page_out() {
            PageOut::Page(page) => {
                if let Some(stream) = video_stream.as_mut() {
                    stream.page_in(&page);
                }
                if let Some(candidate) = candidates.get_mut(&page.serial()) {
                    candidate.stream.page_in(&page);
                }
            }
            PageOut::Desync => {}
            PageOut::NeedData => {
                if sync.pump(source, BUFFER_SIZE)? == 0 {
                    // Exhausted mid-headers: fatal only for video. Audio
                    // candidates stuck below three headers are dropped.
                    if video_headers.count() > 0 && !video_headers.is_complete() {
                        return Err(ClipError::TruncatedHeaders);
                    }
                    candidates.retain(|serial, candidate| {
                        let complete = candidate.headers.is_complete();
                        if !complete {
                            debug!(serial, "dropping audio stream with truncated headers");
                        }
                        complete
                    });
                    break;
                }
            }
        }
    }

    let video_stream = video_stream.ok_or(ClipError::NoVideoStream)?;
    if !video_headers.is_complete() {
        return Err(ClipError::TruncatedHeaders);
    }

    let audio = select_audio_stream(candidates, preference);
    Ok(BootstrapOut {
        sync,
        video_stream,
        video_headers,
        audio,
    })
}

/// Ranks completed candidates by language match strength, breaking ties
/// toward the later-enumerated stream, and keeps the winner.
fn select_audio_stream(
    candidates: BTreeMap<u32, AudioCandidate>,
    preference: &str,
) -> Option<(StreamState, Box<dyn AudioHeaders>)> {
    let mut ordered: Vec<AudioCandidate> = candidates.into_values().collect();
    ordered.sort_by_key(|candidate| candidate.order);

    let mut best_match = LanguageMatch::None;
    let mut selected: Option<AudioCandidate> = None;
    for candidate in ordered {
        let strength = if preference.is_empty() {
            LanguageMatch::None
        } else {
            candidate
                .headers
                .language()
                .map(|language| check_language(preference, language))
                .unwrap_or(LanguageMatch::None)
        };
        if selected.is_none() || strength >= best_match {
            best_match = strength;
            selected = Some(candidate);
        }
    }
    selected.map(|candidate| {
        debug!(
            language = candidate.headers.language().unwrap_or(""),
            "selected audio stream"
        );
        (candidate.stream, candidate.headers)
    })
}

// ============================================================================
// Tests
// ============================================================================
