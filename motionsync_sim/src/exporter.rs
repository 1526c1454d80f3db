//! JSON exporter for simulation runs.
//!
//! Captures per-frame ground truth and every peer's view of every avatar so
//! a run can be replayed or plotted offline.

use crate::error::SimResult;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// A single frame of simulation data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    /// Simulation time in seconds
    pub time_sec: f64,

    /// Ground truth body positions
    pub bodies: Vec<BodyPosition>,

    /// What each peer believes
    pub peers: Vec<PeerFrame>,

    /// Events (partitions, joins, requests, ...)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SimEvent>,
}

/// Position of an avatar body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyPosition {
    pub avatar: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub moving: bool,
}

impl BodyPosition {
    pub fn new(avatar: String, pos: Vector3<f64>, moving: bool) -> Self {
        Self {
            avatar,
            x: pos.x,
            y: pos.y,
            z: pos.z,
            moving,
        }
    }
}

/// One peer's view of the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerFrame {
    pub peer: String,
    pub clock_skew_ms: i64,
    pub avatars: Vec<AvatarView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub following: Option<String>,
}

/// One avatar as seen by one peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvatarView {
    pub avatar: String,
    pub motion: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<f64>,
    pub volume_enabled: bool,
}

/// Simulation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimEvent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl SimEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: None,
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: Some("warn".to_string()),
        }
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            passed: false,
            failure_reason: None,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
    }

    /// Writes to a pretty-printed JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> SimResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_tracks_duration() {
        let mut export = SimExport::new("clock_skew", 7);
        export.add_frame(SimFrame {
            time_sec: 1.5,
            bodies: vec![BodyPosition::new("a".into(), Vector3::new(1.0, 0.0, 2.0), false)],
            peers: vec![],
            events: vec![SimEvent::info("start")],
        });
        export.finalize(true, None);

        assert_eq!(export.duration_sec, 1.5);
        let json = serde_json::to_string(&export).unwrap();
        assert!(json.contains("\"scenario\":\"clock_skew\""));
        assert!(!json.contains("failure_reason"));
    }

    #[test]
    fn test_write_to_file() {
        let path = std::env::temp_dir().join(format!("motionsync-export-{}.json", std::process::id()));
        let export = SimExport::new("crowd", 1);
        export.write_to_file(&path).unwrap();

        let read: SimExport = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(read.scenario, "crowd");
        let _ = std::fs::remove_file(&path);
    }
}
