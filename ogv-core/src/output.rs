//! Default audio sink backed by cpal.
//!
//! Packets handed over by the clip tick land in a lock-free ring; the cpal
//! output callback drains it from the audio thread. Underruns play silence
//! rather than blocking the callback.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapProd, HeapRb};

use crate::audio::{AudioPacket, AudioSink, AudioSinkFactory};

/// Ring depth in seconds of audio.
const RING_SECONDS: usize = 2;

/// Audio sink writing to the default output device.
pub struct CpalSink {
    producer: HeapProd<f32>,
    // Dropping the stream stops playback; keep it alive with the sink.
    _stream: cpal::Stream,
}

impl CpalSink {
    /// Opens the default output device at the clip's channel count and
    /// sample rate. Returns None when no usable device exists.
    pub fn new(channels: u32, sample_rate: u32) -> Option<Self> {
        let host = cpal::default_host();
        let device = host.default_output_device()?;
        let config = StreamConfig {
            channels: channels as u16,
            sample_rate: SampleRate(sample_rate),
            buffer_size: BufferSize::Default,
        };

        let ring = HeapRb::<f32>::new((sample_rate * channels) as usize * RING_SECONDS);
        let (producer, mut consumer) = ring.split();

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _| {
                    let filled = consumer.pop_slice(data);
                    for sample in &mut data[filled..] {
                        *sample = 0.0;
                    }
                },
                |err| tracing::warn!("audio output stream error: {err}"),
                None,
            )
            .ok()?;
        stream.play().ok()?;

        Some(Self {
            producer,
            _stream: stream,
        })
    }
}

impl AudioSink for CpalSink {
    fn queue(&mut self, packet: AudioPacket) {
        let pushed = self.producer.push_slice(&packet.samples);
        if pushed < packet.samples.len() {
            tracing::debug!(
                dropped = packet.samples.len() - pushed,
                "audio ring full, dropping samples"
            );
        }
    }
}

/// Factory producing [`CpalSink`] instances.
pub struct CpalSinkFactory;

impl AudioSinkFactory for CpalSinkFactory {
    fn create(&self, channels: u32, sample_rate: u32) -> Option<Box<dyn AudioSink>> {
        match CpalSink::new(channels, sample_rate) {
            Some(sink) => Some(Box::new(sink)),
            None => {
                tracing::warn!("no audio output device, playing video only");
                None
            }
        }
    }
}
