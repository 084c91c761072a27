// Time-proportional densification of the segment between two motion samples

use super::MotionSample;
use serde::Serialize;
use tracing::warn;

/// Synthetic points per second of travel
pub const INTERPOLATION_RATE_HZ: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct InterpolatedPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub extrusion: f64,
}

impl From<&MotionSample> for InterpolatedPoint {
    fn from(sample: &MotionSample) -> Self {
        Self {
            x: sample.x,
            y: sample.y,
            z: sample.z,
            extrusion: sample.extrusion,
        }
    }
}

/// Seconds needed to travel from `previous` to `current` at `current.feed`
/// (distance/minute). `None` when the feed is not positive.
pub fn travel_time_secs(previous: &MotionSample, current: &MotionSample) -> Option<f64> {
    if !(current.feed > 0.0) {
        return None;
    }

    let distance = ((current.x - previous.x).powi(2)
        + (current.y - previous.y).powi(2)
        + (current.z - previous.z).powi(2))
    .sqrt();

    Some(distance / (current.feed / 60.0))
}

/// Upper bound on interpolation steps for one segment (ten minutes of travel
/// at the interpolation rate). Longer segments are sent at this resolution.
pub const MAX_SEGMENT_STEPS: usize = 30_000;

/// Interpolation steps between `previous` and `current`; `0` when only
/// `current` is to be emitted (no usable feed, zero-length move).
pub fn segment_steps(previous: &MotionSample, current: &MotionSample) -> usize {
    let Some(time_delay) = travel_time_secs(previous, current) else {
        return 0;
    };

    let steps = (time_delay * INTERPOLATION_RATE_HZ).ceil();
    if !steps.is_finite() || steps < 1.0 {
        if steps.is_infinite() {
            warn!(
                "Segment travel time overflowed (feed {}), clamping to {} steps",
                current.feed, MAX_SEGMENT_STEPS
            );
            return MAX_SEGMENT_STEPS;
        }
        return 0;
    }

    if steps > MAX_SEGMENT_STEPS as f64 {
        warn!(
            "Segment needs {} steps at feed {}, clamping to {}",
            steps, current.feed, MAX_SEGMENT_STEPS
        );
        return MAX_SEGMENT_STEPS;
    }
    steps as usize
}

/// Points from `previous` to `current`, both endpoints included, produced lazily.
///
/// The count is `ceil(travel_time * 50) + 1`, bounded by `MAX_SEGMENT_STEPS + 1`.
/// Without a usable feed, or for a zero-length move, only `current` is produced.
pub fn interpolate_segment(
    previous: &MotionSample,
    current: &MotionSample,
) -> impl Iterator<Item = InterpolatedPoint> + Send + 'static {
    let start = InterpolatedPoint::from(previous);
    let end = InterpolatedPoint::from(current);

    let (first, steps) = match segment_steps(previous, current) {
        0 => (1, 1),
        steps => (0, steps),
    };

    (first..=steps).map(move |i| {
        if i == steps {
            return end;
        }
        let t = i as f64 / steps as f64;
        InterpolatedPoint {
            x: start.x + t * (end.x - start.x),
            y: start.y + t * (end.y - start.y),
            z: start.z + t * (end.z - start.z),
            extrusion: start.extrusion + t * (end.extrusion - start.extrusion),
        }
    })
}
