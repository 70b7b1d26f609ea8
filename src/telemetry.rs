// src/telemetry.rs - Outbound state records and their fan-out
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::hardware::{EncoderReadings, EncoderTrack};
use crate::motion::{CommandedPose, ControlShared, MotionPhase};

/// What produced a telemetry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryEvent {
    Startup,
    Calibrated,
    Reached { x: f64, y: f64, z: i32 },
    DirectReached,
    Stopped,
    Resumed,
    Interrupted,
    Rejected,
    Periodic,
}

/// Result of the last operation: `ok` or the error's name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl OperationOutcome {
    pub fn ok() -> Self {
        Self { ok: true, error: None, detail: None }
    }

    pub fn failed(name: &str, detail: String) -> Self {
        Self { ok: false, error: Some(name.to_string()), detail: Some(detail) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub encoders: EncoderReadings,
    pub commanded: CommandedPose,
    pub effective_max_reach: f64,
    pub state: MotionPhase,
    pub outcome: OperationOutcome,
    pub event: TelemetryEvent,
    pub timestamp: DateTime<Utc>,
}

impl Telemetry {
    /// One-line status in the firmware's console register.
    pub fn status_line(&self) -> String {
        if let Some(detail) = &self.outcome.detail {
            if !self.outcome.ok {
                return format!("[ERROR] {}", detail);
            }
        }
        match &self.event {
            TelemetryEvent::Startup => "=== Robotic Arm Ready ===".to_string(),
            TelemetryEvent::Calibrated => "Calibration complete".to_string(),
            TelemetryEvent::Reached { x, y, z } => format!("Reached: {:.1},{:.1},{}", x, y, z),
            TelemetryEvent::DirectReached => format!(
                "Reached joints: base={} elbow={} claw={} z={}",
                self.commanded.base_deg, self.commanded.elbow_deg, self.commanded.claw_deg, self.commanded.z_mm
            ),
            TelemetryEvent::Stopped => "[STOP] All movement halted".to_string(),
            TelemetryEvent::Resumed => "[INFO] Resumed".to_string(),
            TelemetryEvent::Interrupted => "[INFO] Motion interrupted".to_string(),
            TelemetryEvent::Rejected => "[ERROR] Command rejected".to_string(),
            TelemetryEvent::Periodic => format!(
                "ENC stepper={} base={} joint2={} claw={}",
                self.encoders.stepper, self.encoders.base, self.encoders.joint2, self.encoders.claw
            ),
        }
    }
}

/// Broadcast of every record plus the latest operation record.
#[derive(Debug, Clone)]
pub struct TelemetryHub {
    tx: broadcast::Sender<Telemetry>,
    latest: Arc<watch::Sender<Telemetry>>,
}

impl TelemetryHub {
    pub fn new(initial: Telemetry) -> Self {
        let (tx, _) = broadcast::channel(256);
        let (latest, _) = watch::channel(initial);
        Self { tx, latest: Arc::new(latest) }
    }

    /// Publish an operation record and make it the latest snapshot.
    pub fn publish(&self, telemetry: Telemetry) {
        tracing::debug!("Telemetry: {}", telemetry.status_line());
        self.latest.send_replace(telemetry.clone());
        // No subscribers is fine.
        let _ = self.tx.send(telemetry);
    }

    /// Publish to subscribers only, leaving the latest snapshot untouched.
    pub fn broadcast(&self, telemetry: Telemetry) {
        let _ = self.tx.send(telemetry);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Telemetry> {
        self.tx.subscribe()
    }

    pub fn latest(&self) -> Telemetry {
        self.latest.borrow().clone()
    }
}

/// Republish fresh encoder readings at `hz` while the arm is idle.
pub fn spawn_cadence(
    hub: TelemetryHub,
    tracks: Arc<EncoderTrack>,
    shared: Arc<ControlShared>,
    hz: u32,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    let period = Duration::from_secs_f64(1.0 / f64::from(hz.max(1)));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Telemetry cadence shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if shared.phase() != MotionPhase::Idle {
                        continue;
                    }
                    let mut record = hub.latest();
                    record.encoders = tracks.readings();
                    record.state = MotionPhase::Idle;
                    record.event = TelemetryEvent::Periodic;
                    record.outcome = OperationOutcome::ok();
                    record.timestamp = Utc::now();
                    hub.broadcast(record);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(event: TelemetryEvent) -> Telemetry {
        Telemetry {
            encoders: EncoderReadings::default(),
            commanded: CommandedPose { base_deg: 90, elbow_deg: 90, claw_deg: 90, z_mm: 0 },
            effective_max_reach: 23.7,
            state: MotionPhase::Idle,
            outcome: OperationOutcome::ok(),
            event,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_status_lines() {
        let reached = record(TelemetryEvent::Reached { x: 10.0, y: 5.0, z: 3 });
        assert_eq!(reached.status_line(), "Reached: 10.0,5.0,3");
        assert_eq!(record(TelemetryEvent::Calibrated).status_line(), "Calibration complete");
        assert_eq!(record(TelemetryEvent::Stopped).status_line(), "[STOP] All movement halted");

        let mut rejected = record(TelemetryEvent::Rejected);
        rejected.outcome = OperationOutcome::failed("unreachable", "Target unreachable".to_string());
        assert_eq!(rejected.status_line(), "[ERROR] Target unreachable");
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(record(TelemetryEvent::Calibrated)).unwrap();
        assert_eq!(json["event"]["kind"], "calibrated");
        assert_eq!(json["state"], "idle");
        assert_eq!(json["encoders"]["joint2"], 0);
        assert!(json["outcome"].get("error").is_none());
    }

    #[tokio::test]
    async fn test_publish_updates_latest_and_subscribers() {
        let hub = TelemetryHub::new(record(TelemetryEvent::Startup));
        let mut rx = hub.subscribe();
        hub.publish(record(TelemetryEvent::Calibrated));
        assert_eq!(rx.recv().await.unwrap().event, TelemetryEvent::Calibrated);
        assert_eq!(hub.latest().event, TelemetryEvent::Calibrated);

        hub.broadcast(record(TelemetryEvent::Periodic));
        assert_eq!(rx.recv().await.unwrap().event, TelemetryEvent::Periodic);
        assert_eq!(hub.latest().event, TelemetryEvent::Calibrated);
    }
}
