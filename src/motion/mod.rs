// Motion telemetry: command parsing, sticky state resolution, interpolation

pub mod interpolate;
pub mod parser;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use interpolate::{
    interpolate_segment, segment_steps, travel_time_secs, InterpolatedPoint, INTERPOLATION_RATE_HZ,
    MAX_SEGMENT_STEPS,
};
pub use parser::{is_motion_command, parse_motion_line, MotionFields};

/// One fully resolved machine position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Feed rate in distance/minute; `0.0` until a feed has been seen
    pub feed: f64,
    /// Extruder position; `0.0` until an extrusion value has been seen
    pub extrusion: f64,
    pub timestamp: DateTime<Utc>,
}

/// Sticky last-known-value resolution across consecutive command lines.
///
/// Z starts at 0.0. X and Y are never defaulted: no sample is produced until
/// both have been observed at least once.
#[derive(Debug, Clone, Default)]
pub struct MotionTracker {
    x: Option<f64>,
    y: Option<f64>,
    z: f64,
    feed: Option<f64>,
    extrusion: Option<f64>,
}

impl MotionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one command line into the tracked state.
    ///
    /// Returns the resolved sample when the line carried at least one motion
    /// token and X/Y are known.
    pub fn update(&mut self, line: &str) -> Option<MotionSample> {
        let previous_z = self.z;
        let fields = parse_motion_line(line, previous_z);

        let touched = fields.x.is_some()
            || fields.y.is_some()
            || fields.feed.is_some()
            || fields.extrusion.is_some()
            || fields.z != previous_z;
        if !touched {
            return None;
        }

        self.x = fields.x.or(self.x);
        self.y = fields.y.or(self.y);
        self.z = fields.z;
        self.feed = fields.feed.or(self.feed);
        self.extrusion = fields.extrusion.or(self.extrusion);

        Some(MotionSample {
            x: self.x?,
            y: self.y?,
            z: self.z,
            feed: self.feed.unwrap_or(0.0),
            extrusion: self.extrusion.unwrap_or(0.0),
            timestamp: Utc::now(),
        })
    }

    pub fn last_z(&self) -> f64 {
        self.z
    }
}
