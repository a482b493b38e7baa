//! Presentation clocks.
//!
//! The decoder never owns wall time. It asks a clock where playback stands,
//! pauses it while seeking, and moves it on seek. Hosts can supply the
//! wall-clock implementation here or drive time themselves with
//! [`ManualClock`].

use std::time::Instant;

use parking_lot::Mutex;

/// Playback time source consumed by the clip engine.
pub trait PresentationClock: Send + Sync {
    /// Current playback time in seconds.
    fn now(&self) -> f64;
    fn pause(&self);
    fn play(&self);
    fn paused(&self) -> bool;
    /// Jumps the clock to `time` seconds, preserving the pause state.
    fn seek(&self, time: f64);
}

// ============================================================================
// Wall clock
// ============================================================================

struct SystemClockInner {
    /// Accumulated playback time up to the last pause or seek.
    base: f64,
    /// Set while running.
    started: Option<Instant>,
}

/// Monotonic wall clock. Starts paused at zero.
pub struct SystemClock {
    inner: Mutex<SystemClockInner>,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SystemClockInner {
                base: 0.0,
                started: None,
            }),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PresentationClock for SystemClock {
    fn now(&self) -> f64 {
        let inner = self.inner.lock();
        match inner.started {
            Some(started) => inner.base + started.elapsed().as_secs_f64(),
            None => inner.base,
        }
    }

    fn pause(&self) {
        let mut inner = self.inner.lock();
        if let Some(started) = inner.started.take() {
            inner.base += started.elapsed().as_secs_f64();
        }
    }

    fn play(&self) {
        let mut inner = self.inner.lock();
        if inner.started.is_none() {
            inner.started = Some(Instant::now());
        }
    }

    fn paused(&self) -> bool {
        self.inner.lock().started.is_none()
    }

    fn seek(&self, time: f64) {
        let mut inner = self.inner.lock();
        inner.base = time;
        if inner.started.is_some() {
            inner.started = Some(Instant::now());
        }
    }
}

// ============================================================================
// Host stepped clock
// ============================================================================

/// Clock advanced explicitly by the host.
///
/// Useful for offline decoding, frame stepping, and tests where wall time
/// must not leak into the result.
pub struct ManualClock {
    state: Mutex<(f64, bool)>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new((0.0, true)),
        }
    }

    /// Moves the clock to an absolute time without touching the pause state.
    pub fn set(&self, time: f64) {
        self.state.lock().0 = time;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PresentationClock for ManualClock {
    fn now(&self) -> f64 {
        self.state.lock().0
    }

    fn pause(&self) {
        self.state.lock().1 = true;
    }

    fn play(&self) {
        self.state.lock().1 = false;
    }

    fn paused(&self) -> bool {
        self.state.lock().1
    }

    fn seek(&self, time: f64) {
        self.state.lock().0 = time;
    }
}
