//! Audio packet queue and output seam.
//!
//! Synthesized PCM is queued as interleaved packets until the host tick
//! hands it to the sink. The queue is the one structure shared with the
//! audio side, so it lives behind the audio mutex together with the sink
//! handle. Seek realignment edits the queue in place: whole packets are
//! dropped from the head, the straddling packet is trimmed, or silence is
//! prepended when playback resumes before the queued range.

use std::collections::VecDeque;

use parking_lot::Mutex;
use std::sync::Arc;

use crate::codec::AudioParams;

/// One block of interleaved PCM.
#[derive(Debug, Clone)]
pub struct AudioPacket {
    /// Interleaved samples, `frames * channels` long.
    pub samples: Vec<f32>,
}

impl AudioPacket {
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

// ============================================================================
// Packet queue
// ============================================================================

/// FIFO of decoded audio awaiting delivery to the sink. Head is oldest.
pub struct AudioPacketQueue {
    packets: VecDeque<AudioPacket>,
    channels: u32,
    sample_rate: u32,
}

impl AudioPacketQueue {
    pub fn new(params: AudioParams) -> Self {
        Self {
            packets: VecDeque::new(),
            channels: params.channels,
            sample_rate: params.sample_rate,
        }
    }

    /// Interleaves `frames` frames from per-channel buffers, applies the
    /// gain, and appends the result as one packet.
    pub fn enqueue(&mut self, channels: &[Vec<f32>], frames: usize, gain: f32) {
        let mut samples = Vec::with_capacity(frames * channels.len());
        for frame in 0..frames {
            for channel in channels {
                samples.push(channel[frame] * gain);
            }
        }
        self.packets.push_back(AudioPacket { samples });
    }

    pub fn pop(&mut self) -> Option<AudioPacket> {
        self.packets.pop_front()
    }

    pub fn clear(&mut self) {
        self.packets.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn packet_count(&self) -> usize {
        self.packets.len()
    }

    /// Interleaved sample count of the head packet.
    pub fn head_sample_count(&self) -> Option<usize> {
        self.packets.front().map(AudioPacket::sample_count)
    }

    /// Total queued samples across all packets.
    pub fn total_samples(&self) -> usize {
        self.packets.iter().map(AudioPacket::sample_count).sum()
    }

    /// Queued audio measured in seconds.
    pub fn seconds(&self) -> f32 {
        let rate = self.sample_rate * self.channels;
        if rate == 0 {
            return 0.0;
        }
        self.total_samples() as f32 / rate as f32
    }

    /// Drops the leading `samples` interleaved samples from the head packet.
    pub fn trim_head(&mut self, samples: usize) {
        if let Some(head) = self.packets.front_mut() {
            let n = samples.min(head.samples.len());
            head.samples.drain(..n);
            if head.samples.is_empty() {
                self.packets.pop_front();
            }
        }
    }

    /// Prepends `samples` zero samples to the head packet. No-op on an
    /// empty queue.
    pub fn prepend_silence(&mut self, samples: usize) {
        if let Some(head) = self.packets.front_mut() {
            let mut padded = vec![0.0f32; samples + head.samples.len()];
            padded[samples..].copy_from_slice(&head.samples);
            head.samples = padded;
        }
    }
}

// ============================================================================
// Sink seam
// ============================================================================

/// Consumer of synchronized audio packets. Implementations own their output
/// thread or callback; packets handed over here are gone from the queue.
pub trait AudioSink {
    fn queue(&mut self, packet: AudioPacket);
}

/// Builds a sink for a clip once its audio parameters are known. Returning
/// None leaves the clip video-only.
pub trait AudioSinkFactory {
    fn create(&self, channels: u32, sample_rate: u32) -> Option<Box<dyn AudioSink>>;
}

/// State guarded by the audio mutex: the packet queue plus the sink handle.
pub struct AudioShared {
    pub queue: AudioPacketQueue,
    pub sink: Option<Box<dyn AudioSink>>,
}

impl AudioShared {
    pub fn new(params: AudioParams) -> Self {
        Self {
            queue: AudioPacketQueue::new(params),
            sink: None,
        }
    }
}

/// The audio mutex shared between the decoder thread and the sink side.
pub type AudioSharedHandle = Arc<Mutex<AudioShared>>;

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(channels: u32, sample_rate: u32) -> AudioPacketQueue {
        AudioPacketQueue::new(AudioParams {
            channels,
            sample_rate,
        })
    }

    #[test]
    fn enqueue_interleaves_and_applies_gain() {
        let mut q = queue(2, 100);
        let left = vec![0.1f32, 0.2, 0.3];
        let right = vec![-0.1f32, -0.2, -0.3];
        q.enqueue(&[left, right], 3, 2.0);

        let packet = q.pop().unwrap();
        assert_eq!(packet.samples.len(), 6);
        assert!((packet.samples[0] - 0.2).abs() < 1e-6);
        assert!((packet.samples[1] + 0.2).abs() < 1e-6);
        assert!((packet.samples[4] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn seconds_accounts_for_rate_and_channels() {
        let mut q = queue(2, 100);
        q.enqueue(&[vec![0.0; 50], vec![0.0; 50]], 50, 1.0);
        // 50 frames at 100 Hz.
        assert!((q.seconds() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn trim_head_shortens_then_drops() {
        let mut q = queue(1, 100);
        q.enqueue(&[(0..10).map(|i| i as f32).collect()], 10, 1.0);
        q.trim_head(4);
        assert_eq!(q.head_sample_count(), Some(6));
        assert!((q.packets.front().unwrap().samples[0] - 4.0).abs() < 1e-6);

        q.trim_head(100);
        assert!(q.is_empty());
    }

    #[test]
    fn prepend_silence_pads_the_head() {
        let mut q = queue(1, 100);
        q.enqueue(&[vec![1.0; 5]], 5, 1.0);
        q.prepend_silence(3);
        assert_eq!(q.head_sample_count(), Some(8));
        let head = q.pop().unwrap();
        assert_eq!(&head.samples[..3], &[0.0, 0.0, 0.0]);
        assert_eq!(&head.samples[3..], &[1.0; 5]);

        // Prepending to an empty queue is a no-op.
        q.prepend_silence(10);
        assert!(q.is_empty());
    }

    #[test]
    fn fifo_order_is_preserved() {
        let mut q = queue(1, 100);
        q.enqueue(&[vec![1.0]], 1, 1.0);
        q.enqueue(&[vec![2.0]], 1, 1.0);
        assert_eq!(q.total_samples(), 2);
        assert!((q.pop().unwrap().samples[0] - 1.0).abs() < 1e-6);
        assert!((q.pop().unwrap().samples[0] - 2.0).abs() < 1e-6);
        assert!(q.pop().is_none());
    }
}
