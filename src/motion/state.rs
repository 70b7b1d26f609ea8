// src/motion/state.rs - Executor state and the flags shared with other tasks
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::kinematics::JointTarget;

/// State of the motion executor. Only the control task mutates it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionState {
    Idle,
    Calibrating,
    Moving { target: JointTarget, started_at: Instant },
    Stopped,
}

impl MotionState {
    pub fn phase(&self) -> MotionPhase {
        match self {
            MotionState::Idle => MotionPhase::Idle,
            MotionState::Calibrating => MotionPhase::Calibrating,
            MotionState::Moving { .. } => MotionPhase::Moving,
            MotionState::Stopped => MotionPhase::Stopped,
        }
    }
}

/// Data-free mirror of [`MotionState`] readable from any task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum MotionPhase {
    Idle = 0,
    Calibrating = 1,
    Moving = 2,
    Stopped = 3,
}

impl MotionPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => MotionPhase::Calibrating,
            2 => MotionPhase::Moving,
            3 => MotionPhase::Stopped,
            _ => MotionPhase::Idle,
        }
    }
}

/// Pose the executor last commanded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommandedPose {
    pub base_deg: i32,
    pub elbow_deg: i32,
    pub claw_deg: i32,
    pub z_mm: i32,
}

/// Lock-free state shared between the control task and its submitters.
///
/// `stop` is the StopFlag polled by every loop that emits actuator commands.
/// `estop_epoch` counts emergency stops so requests queued before a stop are
/// not started after it. `move_seq` numbers moves so a queued move that has
/// been overtaken by a newer one is dropped.
#[derive(Debug)]
pub struct ControlShared {
    stop: AtomicBool,
    estop_epoch: AtomicU64,
    move_seq: AtomicU64,
    phase: AtomicU8,
}

impl ControlShared {
    pub fn new() -> Self {
        Self {
            stop: AtomicBool::new(false),
            estop_epoch: AtomicU64::new(0),
            move_seq: AtomicU64::new(0),
            phase: AtomicU8::new(MotionPhase::Idle as u8),
        }
    }

    pub fn raise_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn clear_stop(&self) {
        self.stop.store(false, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn epoch(&self) -> u64 {
        self.estop_epoch.load(Ordering::SeqCst)
    }

    /// Start a new emergency-stop epoch, then raise the flag. Returns the new
    /// epoch.
    ///
    /// The epoch moves first so a concurrent [`rearm`](Self::rearm) either
    /// sees it or has its clear overwritten by the raise.
    pub fn request_emergency_stop(&self) -> u64 {
        let epoch = self.estop_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.raise_stop();
        epoch
    }

    /// Clear the flag for a request submitted in `epoch`. Returns false, with
    /// the flag raised again, when an emergency stop has started since.
    pub fn rearm(&self, epoch: u64) -> bool {
        self.clear_stop();
        if self.epoch() > epoch {
            self.raise_stop();
            return false;
        }
        true
    }

    /// Whether a loop working for a request from `epoch` must yield.
    pub fn halted_since(&self, epoch: u64) -> bool {
        self.stop_requested() || self.epoch() > epoch
    }

    pub fn next_move_seq(&self) -> u64 {
        self.move_seq.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn latest_move_seq(&self) -> u64 {
        self.move_seq.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> MotionPhase {
        MotionPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn set_phase(&self, phase: MotionPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }
}

impl Default for ControlShared {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    #[test]
    fn test_phase_round_trip_through_atomic() {
        let shared = ControlShared::new();
        assert_eq!(shared.phase(), MotionPhase::Idle);
        for phase in [MotionPhase::Calibrating, MotionPhase::Moving, MotionPhase::Stopped] {
            shared.set_phase(phase);
            assert_eq!(shared.phase(), phase);
        }
    }

    #[test]
    fn test_sequence_and_epoch_counters() {
        let shared = ControlShared::new();
        assert_eq!(shared.next_move_seq(), 1);
        assert_eq!(shared.next_move_seq(), 2);
        assert_eq!(shared.latest_move_seq(), 2);
        assert_eq!(shared.epoch(), 0);
        assert_eq!(shared.request_emergency_stop(), 1);
        assert_eq!(shared.epoch(), 1);
        assert!(shared.stop_requested());
    }

    #[test]
    fn test_rearm_refuses_after_emergency_stop() {
        let shared = ControlShared::new();
        shared.raise_stop();
        assert!(shared.rearm(0));
        assert!(!shared.stop_requested());

        shared.raise_stop();
        shared.request_emergency_stop();
        assert!(!shared.rearm(0));
        assert!(shared.stop_requested());
        assert!(shared.halted_since(0));
        assert!(shared.rearm(1));
        assert!(!shared.halted_since(1));
    }

    #[test]
    fn test_emergency_stop_racing_rearm_is_never_lost() {
        for _ in 0..2_000 {
            let shared = Arc::new(ControlShared::new());
            shared.raise_stop();
            let barrier = Arc::new(Barrier::new(2));
            let stopper = {
                let shared = shared.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    shared.request_emergency_stop();
                })
            };
            barrier.wait();
            shared.rearm(0);
            stopper.join().unwrap();
            assert!(shared.stop_requested(), "emergency stop lost to a concurrent rearm");
            assert!(shared.halted_since(0));
        }
    }

    #[test]
    fn test_moving_state_exposes_phase() {
        let state = MotionState::Moving {
            target: JointTarget { base_deg: 10, elbow_deg: 20 },
            started_at: Instant::now(),
        };
        assert_eq!(state.phase(), MotionPhase::Moving);
        assert_eq!(MotionState::Stopped.phase(), MotionPhase::Stopped);
    }
}
