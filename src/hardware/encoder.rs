//! Interrupt-driven quadrature position tracking.
//!
//! One [`EncoderChannel`] per [`Axis`], each with its own counter and its own
//! debounce timestamp, so activity on one axis never masks edges on another.
//! Everything here is lock-free: `on_edge` runs in GPIO callback context and
//! only touches the atomics of the axis that fired.
//!
//! Decoding is single-bit: on an accepted edge the two channel levels are read
//! once and `delta = if a ^ b { -1 } else { +1 }`. This is cheaper than a full
//! four-state transition table and adequate at the 1 ms debounce rate, but a
//! bouncing contact that survives the debounce window is counted as motion.

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::Axis;

/// Instantaneous A/B levels of one encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLevels {
    pub a: bool,
    pub b: bool,
}

impl ChannelLevels {
    pub fn new(a: bool, b: bool) -> Self {
        Self { a, b }
    }

    /// Levels that decode to the given direction.
    pub fn for_direction(forward: bool) -> Self {
        if forward { Self::new(true, true) } else { Self::new(true, false) }
    }

    pub fn delta(self) -> i32 {
        if self.a ^ self.b { -1 } else { 1 }
    }
}

/// Marks a channel that has never accepted an edge.
const NO_EDGE: u64 = u64::MAX;

/// Per-axis counter and debounce state.
#[derive(Debug)]
struct EncoderChannel {
    position: AtomicI32,
    /// Timestamp of the last accepted edge, or [`NO_EDGE`].
    last_edge_us: AtomicU64,
}

impl Default for EncoderChannel {
    fn default() -> Self {
        Self {
            position: AtomicI32::new(0),
            last_edge_us: AtomicU64::new(NO_EDGE),
        }
    }
}

impl EncoderChannel {
    /// Debounce gate. The first edge an axis ever sees is always accepted.
    /// Concurrent edges on one axis race on a single compare-exchange, so at
    /// most one of them wins a debounce window.
    fn accept(&self, timestamp_us: u32, debounce_us: u32) -> bool {
        let mut last = self.last_edge_us.load(Ordering::Acquire);
        loop {
            if last != NO_EDGE && timestamp_us.wrapping_sub(last as u32) < debounce_us {
                return false;
            }
            match self.last_edge_us.compare_exchange_weak(
                last,
                u64::from(timestamp_us),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => last = actual,
            }
        }
    }
}

/// Encoder positions of all four axes, keyed the way telemetry reports them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderReadings {
    pub stepper: i32,
    pub base: i32,
    pub joint2: i32,
    pub claw: i32,
}

/// Arena of per-axis encoder channels indexed by [`Axis`].
#[derive(Debug)]
pub struct EncoderTrack {
    channels: [EncoderChannel; 4],
    debounce_us: u32,
}

impl EncoderTrack {
    pub fn new(debounce_us: u32) -> Self {
        Self {
            channels: Default::default(),
            debounce_us,
        }
    }

    fn channel(&self, axis: Axis) -> &EncoderChannel {
        &self.channels[axis.index()]
    }

    /// Handle an edge on either channel of `axis`.
    ///
    /// `read_levels` is only called once the edge has passed the debounce
    /// gate. Returns whether the edge was counted.
    pub fn on_edge<F>(&self, axis: Axis, timestamp_us: u32, read_levels: F) -> bool
    where
        F: FnOnce() -> ChannelLevels,
    {
        let channel = self.channel(axis);
        if !channel.accept(timestamp_us, self.debounce_us) {
            return false;
        }
        let delta = read_levels().delta();
        channel.position.fetch_add(delta, Ordering::AcqRel);
        true
    }

    pub fn position(&self, axis: Axis) -> i32 {
        self.channel(axis).position.load(Ordering::Acquire)
    }

    /// Open-loop accounting for an emitted step pulse.
    pub fn record_step(&self, axis: Axis, forward: bool) {
        let delta = if forward { 1 } else { -1 };
        self.channel(axis).position.fetch_add(delta, Ordering::AcqRel);
    }

    /// Zero every counter. Debounce history is kept, so an edge landing right
    /// after the reset is still gated against the previous one.
    pub fn reset_all(&self) {
        for channel in &self.channels {
            channel.position.store(0, Ordering::Release);
        }
    }

    pub fn readings(&self) -> EncoderReadings {
        EncoderReadings {
            stepper: self.position(Axis::Vertical),
            base: self.position(Axis::Base),
            joint2: self.position(Axis::Elbow),
            claw: self.position(Axis::Claw),
        }
    }
}

impl Default for EncoderTrack {
    fn default() -> Self {
        Self::new(1000)
    }
}
