//! # Face Presence Gate
//!
//! Watches per-frame face detections (delivered by an external detector) and
//! fires a capture exactly once when both eye landmarks stay inside a target
//! rectangle continuously for a fixed dwell time.
//!
//! ## Rules:
//! - Both eyes must be *strictly* inside the zone on a frame, and the
//!   detection confidence must clear the configured floor.
//! - The in-zone condition must hold with no gap frames for the full dwell
//!   duration; any break frame cancels the pending timer and the full dwell
//!   must be re-earned.
//! - The capture fires at most once per arming; `reset()` rearms.
//!
//! Time is injected (`Instant` per observation) so the dwell logic is
//! deterministic under test.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// A point in normalized [0, 1] image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// One face detection delivered by the external detector.
///
/// The detector is a black box: zero-or-one of these per frame, with a
/// confidence score and the two eye landmarks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub confidence: f32,
    pub left_eye: Point,
    pub right_eye: Point,
}

/// The rectangle (normalized coordinates) the eyes must stay inside.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetZone {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl TargetZone {
    /// Strict interior containment; landmarks on the border do not count.
    pub fn contains(&self, point: Point) -> bool {
        point.x > self.x
            && point.x < self.x + self.width
            && point.y > self.y
            && point.y < self.y + self.height
    }
}

impl Default for TargetZone {
    fn default() -> Self {
        // Centered head-and-shoulders region of the frame.
        Self {
            x: 0.2,
            y: 0.05,
            width: 0.6,
            height: 0.9,
        }
    }
}

/// The face snapshot handed out when the gate fires.
#[derive(Debug, Clone)]
pub struct CapturedFace {
    /// Encoded frame image, exactly as supplied by the host for the frame
    /// that completed the dwell.
    pub image: Vec<u8>,
    pub captured_at: chrono::DateTime<chrono::Utc>,
}

/// Dwell-gated capture state.
pub struct FacePresenceGate {
    zone: TargetZone,
    dwell: Duration,
    min_confidence: f32,
    held_since: Option<Instant>,
    fired: bool,
}

impl FacePresenceGate {
    pub fn new(zone: TargetZone, dwell: Duration, min_confidence: f32) -> Self {
        Self {
            zone,
            dwell,
            min_confidence,
            held_since: None,
            fired: false,
        }
    }

    /// Feed one frame's detection result into the gate.
    ///
    /// ## Parameters:
    /// - **detection**: zero-or-one detections for this frame
    /// - **frame_image**: the host-encoded image of this frame, copied into
    ///   the capture when the dwell completes
    /// - **now**: observation time, injected by the caller
    ///
    /// ## Returns:
    /// - **Some(CapturedFace)**: the dwell just completed; fires once
    /// - **None**: still waiting, condition broken, or already fired
    pub fn observe(
        &mut self,
        detection: Option<&FaceDetection>,
        frame_image: &[u8],
        now: Instant,
    ) -> Option<CapturedFace> {
        if self.fired {
            return None;
        }

        let in_zone = detection.is_some_and(|d| {
            d.confidence >= self.min_confidence
                && self.zone.contains(d.left_eye)
                && self.zone.contains(d.right_eye)
        });

        if !in_zone {
            if self.held_since.is_some() {
                trace!("Face left the target zone, dwell timer cancelled");
            }
            self.held_since = None;
            return None;
        }

        let held_since = *self.held_since.get_or_insert(now);
        if now.duration_since(held_since) < self.dwell {
            return None;
        }

        self.fired = true;
        debug!(
            "Face held in zone for {:?}, capturing frame ({} bytes)",
            self.dwell,
            frame_image.len()
        );
        Some(CapturedFace {
            image: frame_image.to_vec(),
            captured_at: chrono::Utc::now(),
        })
    }

    /// Discard dwell progress and rearm the gate.
    ///
    /// Called when verification restarts; the next capture requires the full
    /// dwell again.
    pub fn reset(&mut self) {
        self.held_since = None;
        self.fired = false;
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DWELL: Duration = Duration::from_millis(2000);

    fn gate() -> FacePresenceGate {
        FacePresenceGate::new(TargetZone::default(), DWELL, 0.7)
    }

    fn centered() -> FaceDetection {
        FaceDetection {
            confidence: 0.9,
            left_eye: Point { x: 0.4, y: 0.4 },
            right_eye: Point { x: 0.6, y: 0.4 },
        }
    }

    fn off_zone() -> FaceDetection {
        FaceDetection {
            confidence: 0.9,
            left_eye: Point { x: 0.05, y: 0.4 },
            right_eye: Point { x: 0.25, y: 0.4 },
        }
    }

    #[test]
    fn test_capture_fires_after_continuous_dwell() {
        let mut gate = gate();
        let t0 = Instant::now();

        assert!(gate.observe(Some(&centered()), b"f0", t0).is_none());
        assert!(gate
            .observe(Some(&centered()), b"f1", t0 + Duration::from_millis(1000))
            .is_none());
        let captured = gate
            .observe(Some(&centered()), b"f2", t0 + DWELL)
            .expect("dwell complete");
        assert_eq!(captured.image, b"f2");

        // Fires exactly once per arming.
        assert!(gate
            .observe(Some(&centered()), b"f3", t0 + DWELL * 2)
            .is_none());
    }

    /// Holding for dwell - epsilon then breaking must not fire; a subsequent
    /// full hold fires exactly once.
    #[test]
    fn test_break_cancels_and_requires_full_redwell() {
        let mut gate = gate();
        let t0 = Instant::now();

        gate.observe(Some(&centered()), b"", t0);
        assert!(gate
            .observe(Some(&centered()), b"", t0 + DWELL - Duration::from_millis(1))
            .is_none());

        // Break: one off-zone frame cancels the pending timer.
        assert!(gate
            .observe(Some(&off_zone()), b"", t0 + DWELL)
            .is_none());

        // Even though total in-zone time now exceeds the dwell, the timer
        // restarted from the break.
        let t1 = t0 + DWELL + Duration::from_millis(10);
        assert!(gate.observe(Some(&centered()), b"", t1).is_none());
        assert!(gate
            .observe(Some(&centered()), b"", t1 + DWELL - Duration::from_millis(1))
            .is_none());
        assert!(gate.observe(Some(&centered()), b"held", t1 + DWELL).is_some());
        assert!(gate.has_fired());
    }

    #[test]
    fn test_no_detection_frame_breaks_the_hold() {
        let mut gate = gate();
        let t0 = Instant::now();

        gate.observe(Some(&centered()), b"", t0);
        assert!(gate.observe(None, b"", t0 + Duration::from_millis(500)).is_none());
        // Timer restarted at the next in-zone frame.
        let t1 = t0 + Duration::from_millis(600);
        gate.observe(Some(&centered()), b"", t1);
        assert!(gate.observe(Some(&centered()), b"", t1 + DWELL / 2).is_none());
        assert!(gate.observe(Some(&centered()), b"", t1 + DWELL).is_some());
    }

    #[test]
    fn test_low_confidence_counts_as_no_face() {
        let mut gate = gate();
        let t0 = Instant::now();
        let weak = FaceDetection {
            confidence: 0.5,
            ..centered()
        };

        gate.observe(Some(&centered()), b"", t0);
        assert!(gate
            .observe(Some(&weak), b"", t0 + Duration::from_millis(500))
            .is_none());
        // The weak frame broke the hold.
        assert!(gate.observe(Some(&centered()), b"", t0 + DWELL).is_none());
    }

    #[test]
    fn test_reset_rearms_for_one_more_capture() {
        let mut gate = gate();
        let t0 = Instant::now();

        gate.observe(Some(&centered()), b"", t0);
        assert!(gate.observe(Some(&centered()), b"first", t0 + DWELL).is_some());

        gate.reset();
        assert!(!gate.has_fired());
        let t1 = t0 + DWELL + Duration::from_secs(1);
        gate.observe(Some(&centered()), b"", t1);
        assert!(gate.observe(Some(&centered()), b"", t1 + DWELL / 2).is_none());
        assert!(gate.observe(Some(&centered()), b"second", t1 + DWELL).is_some());
    }

    #[test]
    fn test_zone_containment_is_strict() {
        let zone = TargetZone::default();
        assert!(!zone.contains(Point { x: 0.2, y: 0.5 }));
        assert!(!zone.contains(Point { x: 0.8, y: 0.5 }));
        assert!(zone.contains(Point { x: 0.201, y: 0.5 }));
    }
}
