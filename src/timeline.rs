//! Conversion between show time (milliseconds) and timeline geometry.
//!
//! The mapping is linear: `0 ms` sits at position `0.0` and the show's total
//! duration sits at `extent`. Positions outside `[0, extent]` are clamped, so a
//! pointer dragged past either edge pins to the show start or end.

use serde::{Deserialize, Serialize};

/// The visible timeline: how many units wide it is and how much show time it spans.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub total_duration_ms: u64,
    pub extent: f64,
}

impl Viewport {
    pub fn new(total_duration_ms: u64, extent: f64) -> Self {
        Self {
            total_duration_ms,
            extent,
        }
    }

    pub fn to_position(&self, timestamp_ms: u64) -> f64 {
        to_position(timestamp_ms, self.total_duration_ms, self.extent)
    }

    pub fn to_time(&self, position: f64) -> u64 {
        to_time(position, self.total_duration_ms, self.extent)
    }

    /// Unclamped signed time for a position, used for pointer deltas.
    pub fn to_signed_time(&self, position: f64) -> i64 {
        if !valid(self.total_duration_ms, self.extent) {
            return 0;
        }
        (position / self.extent * self.total_duration_ms as f64).round() as i64
    }
}

fn valid(total_duration_ms: u64, extent: f64) -> bool {
    total_duration_ms > 0 && extent.is_finite() && extent > 0.0
}

pub fn to_position(timestamp_ms: u64, total_duration_ms: u64, extent: f64) -> f64 {
    if !valid(total_duration_ms, extent) {
        return 0.0;
    }
    timestamp_ms as f64 / total_duration_ms as f64 * extent
}

pub fn to_time(position: f64, total_duration_ms: u64, extent: f64) -> u64 {
    if !valid(total_duration_ms, extent) || position.is_nan() {
        return 0;
    }
    let position = position.clamp(0.0, extent);
    (position / extent * total_duration_ms as f64).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_within_one_unit() {
        let cases = [
            (0, 60_000, 1200.0),
            (12_345, 60_000, 1200.0),
            (59_999, 60_000, 1200.0),
            (3_000, 5_000, 333.0),
            (1, 7, 0.5),
            (180_000, 180_000, 1920.0),
        ];
        for (t, total, extent) in cases {
            let position = to_position(t, total, extent);
            let back = to_time(position, total, extent);
            let unit_ms = total as f64 / extent;
            assert!(
                (back as f64 - t as f64).abs() <= unit_ms.max(1.0),
                "{t} -> {position} -> {back}"
            );
        }
    }

    #[test]
    fn positions_are_clamped_to_extent() {
        let viewport = Viewport::new(10_000, 500.0);
        assert_eq!(viewport.to_time(-40.0), 0);
        assert_eq!(viewport.to_time(900.0), 10_000);
        assert_eq!(viewport.to_time(250.0), 5_000);
        assert_eq!(viewport.to_signed_time(-50.0), -1_000);
    }

    #[test]
    fn degenerate_viewport_maps_to_origin() {
        assert_eq!(to_position(500, 0, 100.0), 0.0);
        assert_eq!(to_time(50.0, 1000, 0.0), 0);
        assert_eq!(to_time(f64::NAN, 1000, 100.0), 0);
    }
}
