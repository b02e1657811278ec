//! Thumbs up/down classification from thumb-tip vs index-tip offset.
//!
//! Per hand id, a short time-bounded buffer of `thumb.y - index.y` (image
//! space, y grows downward) is averaged. A mean below `-threshold` means
//! the thumb sits above the index finger (thumbs up); above `+threshold`
//! means thumbs down. Emissions are debounced per hand and latched so a
//! held pose fires once until the hand returns to neutral.

use std::collections::{BTreeMap, VecDeque};

use anyhow::ensure;
use tracing::debug;

use super::event::{Gesture, GestureEvent, GestureSource, HandId};
use super::filter::FrameClock;
use super::pose::Landmark;

/// Hand landmark index of the thumb tip.
pub const THUMB_TIP: usize = 4;
/// Hand landmark index of the index finger tip.
pub const INDEX_TIP: usize = 8;
/// Landmarks in a full hand skeleton.
pub const HAND_LANDMARK_COUNT: usize = 21;

// ── Observation ────────────────────────────────────────────

/// One detected hand for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandObservation {
    pub id: HandId,
    pub thumb_tip: Landmark,
    pub index_tip: Landmark,
}

impl HandObservation {
    pub fn new(id: HandId, thumb_tip: Landmark, index_tip: Landmark) -> Self {
        Self {
            id,
            thumb_tip,
            index_tip,
        }
    }

    /// Pick thumb and index tips out of a full 21-point hand skeleton.
    pub fn from_landmarks(id: HandId, landmarks: &[Landmark]) -> anyhow::Result<Self> {
        ensure!(
            landmarks.len() >= HAND_LANDMARK_COUNT,
            "hand {} has {} landmarks, need {}",
            id,
            landmarks.len(),
            HAND_LANDMARK_COUNT
        );
        Ok(Self::new(id, landmarks[THUMB_TIP], landmarks[INDEX_TIP]))
    }

    /// `(dy, dx)` of thumb relative to index, or `None` if either tip is unusable.
    fn offset(&self, min_visibility: f32) -> Option<(f64, f64)> {
        if !self.thumb_tip.usable(min_visibility) || !self.index_tip.usable(min_visibility) {
            return None;
        }
        Some((
            (self.thumb_tip.y - self.index_tip.y) as f64,
            (self.thumb_tip.x - self.index_tip.x) as f64,
        ))
    }
}

// ── Config ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HandGestureConfig {
    pub enabled: bool,
    /// Rolling buffer length (ms).
    pub window_ms: f64,
    /// Samples required in the window before classifying.
    pub min_samples: usize,
    /// Mean vertical offset (normalized units) that counts as a thumbs pose.
    pub threshold: f64,
    /// Minimum time (ms) between two emissions for one hand.
    pub debounce_ms: f64,
    /// Reject poses whose mean |dx| exceeds this multiple of mean |dy|.
    /// Zero disables the check.
    pub max_sideways_ratio: f64,
    /// Tips below this visibility are ignored for the frame.
    pub min_visibility: f32,
}

impl Default for HandGestureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_ms: 300.0,
            min_samples: 3,
            threshold: 0.02,
            debounce_ms: 1000.0,
            max_sideways_ratio: 1.5,
            min_visibility: 0.25,
        }
    }
}

impl HandGestureConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.window_ms > 0.0,
            "hand.window_ms must be positive, got {}",
            self.window_ms
        );
        ensure!(self.min_samples > 0, "hand.min_samples must be at least 1");
        ensure!(
            self.threshold > 0.0,
            "hand.threshold must be positive, got {}",
            self.threshold
        );
        ensure!(
            self.debounce_ms >= 0.0,
            "hand.debounce_ms must be non-negative, got {}",
            self.debounce_ms
        );
        ensure!(
            self.max_sideways_ratio >= 0.0,
            "hand.max_sideways_ratio must be non-negative, got {}",
            self.max_sideways_ratio
        );
        ensure!(
            (0.0..=1.0).contains(&self.min_visibility),
            "hand.min_visibility must be within [0, 1], got {}",
            self.min_visibility
        );
        Ok(())
    }
}

// ── Per-hand tracking ──────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct OffsetSample {
    dy: f64,
    dx: f64,
    timestamp_ms: f64,
}

#[derive(Debug, Clone, Default)]
struct HandTrack {
    samples: VecDeque<OffsetSample>,
    last_emit_ms: Option<f64>,
    /// Gesture already emitted for the current pose.
    latched: Option<Gesture>,
}

// ── Classifier ─────────────────────────────────────────────

pub struct HandGestureClassifier {
    pub config: HandGestureConfig,
    hands: BTreeMap<HandId, HandTrack>,
    clock: FrameClock,
}

impl HandGestureClassifier {
    pub fn new(config: HandGestureConfig) -> Self {
        Self {
            config,
            hands: BTreeMap::new(),
            clock: FrameClock::new(),
        }
    }

    /// Number of hands currently buffered.
    pub fn tracked(&self) -> usize {
        self.hands.len()
    }

    /// Process all hands of one frame. Hands absent from `hands` are dropped.
    pub fn update(&mut self, hands: &[HandObservation], now_ms: f64) -> Vec<GestureEvent> {
        let now_ms = self.clock.tick(now_ms);
        let before = self.hands.len();
        self.hands
            .retain(|id, _| hands.iter().any(|h| h.id == *id));
        if self.hands.len() != before {
            debug!("Purged {} stale hand(s)", before - self.hands.len());
        }

        if !self.config.enabled {
            return Vec::new();
        }

        let mut events = Vec::new();
        for obs in hands {
            if let Some(event) = self.update_hand(obs, now_ms) {
                events.push(event);
            }
        }
        events
    }

    fn update_hand(&mut self, obs: &HandObservation, now_ms: f64) -> Option<GestureEvent> {
        let cfg = &self.config;
        let track = self.hands.entry(obs.id).or_default();

        let Some((dy, dx)) = obs.offset(cfg.min_visibility) else {
            debug!(hand = obs.id, "Skipping hand sample: tips not visible");
            return None;
        };
        track.samples.push_back(OffsetSample {
            dy,
            dx,
            timestamp_ms: now_ms,
        });
        while track
            .samples
            .front()
            .is_some_and(|s| now_ms - s.timestamp_ms > cfg.window_ms)
        {
            track.samples.pop_front();
        }
        if track.samples.len() < cfg.min_samples {
            return None;
        }

        let n = track.samples.len() as f64;
        let mean_dy = track.samples.iter().map(|s| s.dy).sum::<f64>() / n;
        let mean_abs_dy = track.samples.iter().map(|s| s.dy.abs()).sum::<f64>() / n;
        let mean_abs_dx = track.samples.iter().map(|s| s.dx.abs()).sum::<f64>() / n;

        let gesture = if mean_dy > cfg.threshold {
            Gesture::ThumbsDown
        } else if mean_dy < -cfg.threshold {
            Gesture::ThumbsUp
        } else {
            track.latched = None;
            return None;
        };

        if track.latched == Some(gesture) {
            return None;
        }
        if cfg.max_sideways_ratio > 0.0 && mean_abs_dx > cfg.max_sideways_ratio * mean_abs_dy {
            debug!(
                hand = obs.id,
                "Rejected {}: sideways pose (dx {:.3} dy {:.3})",
                gesture.as_str(),
                mean_abs_dx,
                mean_abs_dy
            );
            return None;
        }
        if track
            .last_emit_ms
            .is_some_and(|last| now_ms - last < cfg.debounce_ms)
        {
            return None;
        }

        let confidence = ((mean_dy.abs() - cfg.threshold) / cfg.threshold).min(1.0);
        track.last_emit_ms = Some(now_ms);
        track.latched = Some(gesture);
        debug!(
            hand = obs.id,
            "Hand gesture {} (mean offset {:.3}, confidence {:.2})",
            gesture.as_str(),
            mean_dy,
            confidence
        );
        Some(GestureEvent {
            source: GestureSource::Hand,
            id: obs.id,
            gesture,
            confidence: confidence as f32,
            timestamp_ms: now_ms,
        })
    }

    pub fn reset(&mut self) {
        self.hands.clear();
    }

    pub fn status_sexp(&self) -> String {
        let ids: Vec<String> = self.hands.keys().map(|id| id.to_string()).collect();
        format!(
            "(:enabled {} :hands ({}))",
            if self.config.enabled { "t" } else { "nil" },
            ids.join(" ")
        )
    }
}

// ── Test helpers ───────────────────────────────────────────

#[cfg(test)]
fn hand(id: HandId, dy: f32) -> HandObservation {
    HandObservation::new(id, Landmark::new(0.50, 0.50 + dy), Landmark::new(0.51, 0.50))
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP_MS: f64 = 1000.0 / 30.0;

    fn run(
        clf: &mut HandGestureClassifier,
        start: u32,
        frames: u32,
        obs: &[HandObservation],
    ) -> Vec<GestureEvent> {
        let mut events = Vec::new();
        for i in start..start + frames {
            events.extend(clf.update(obs, i as f64 * STEP_MS));
        }
        events
    }

    #[test]
    fn test_held_thumbs_up_emits_once() {
        let mut clf = HandGestureClassifier::new(HandGestureConfig::default());
        let events = run(&mut clf, 0, 40, &[hand(0, -0.05)]);
        assert_eq!(events.len(), 1, "{:?}", events);
        assert_eq!(events[0].gesture, Gesture::ThumbsUp);
        assert_eq!(events[0].source, GestureSource::Hand);
        assert_eq!(events[0].confidence, 1.0);
    }

    #[test]
    fn test_needs_min_samples() {
        let mut clf = HandGestureClassifier::new(HandGestureConfig::default());
        let events = run(&mut clf, 0, 2, &[hand(0, -0.05)]);
        assert!(events.is_empty());
        let events = run(&mut clf, 2, 1, &[hand(0, -0.05)]);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_flip_after_debounce_emits_thumbs_down() {
        let mut clf = HandGestureClassifier::new(HandGestureConfig::default());
        let first = run(&mut clf, 0, 40, &[hand(0, -0.05)]);
        assert_eq!(first.len(), 1);
        let second = run(&mut clf, 40, 40, &[hand(0, 0.05)]);
        assert_eq!(second.len(), 1, "{:?}", second);
        assert_eq!(second[0].gesture, Gesture::ThumbsDown);
    }

    #[test]
    fn test_flip_inside_debounce_waits() {
        let mut clf = HandGestureClassifier::new(HandGestureConfig::default());
        let first = run(&mut clf, 0, 10, &[hand(0, -0.05)]);
        assert_eq!(first.len(), 1);
        let first_t = first[0].timestamp_ms;

        let second = run(&mut clf, 10, 40, &[hand(0, 0.05)]);
        assert_eq!(second.len(), 1, "{:?}", second);
        assert_eq!(second[0].gesture, Gesture::ThumbsDown);
        assert!(second[0].timestamp_ms - first_t >= 1000.0 - 1e-6);
    }

    #[test]
    fn test_neutral_rearms_latch() {
        let mut clf = HandGestureClassifier::new(HandGestureConfig::default());
        assert_eq!(run(&mut clf, 0, 20, &[hand(0, -0.05)]).len(), 1);
        assert!(run(&mut clf, 20, 20, &[hand(0, 0.0)]).is_empty());
        assert_eq!(run(&mut clf, 40, 20, &[hand(0, -0.05)]).len(), 1);
    }

    #[test]
    fn test_small_offset_ignored() {
        let mut clf = HandGestureClassifier::new(HandGestureConfig::default());
        assert!(run(&mut clf, 0, 30, &[hand(0, 0.015)]).is_empty());
    }

    #[test]
    fn test_sideways_pose_rejected() {
        let mut clf = HandGestureClassifier::new(HandGestureConfig::default());
        let sideways = HandObservation::new(3, Landmark::new(0.40, 0.47), Landmark::new(0.50, 0.50));
        assert!(run(&mut clf, 0, 20, &[sideways]).is_empty());
    }

    #[test]
    fn test_stale_hands_purged() {
        let mut clf = HandGestureClassifier::new(HandGestureConfig::default());
        run(&mut clf, 0, 2, &[hand(0, -0.05), hand(1, 0.05)]);
        assert_eq!(clf.tracked(), 2);
        clf.update(&[hand(1, 0.05)], 100.0);
        assert_eq!(clf.tracked(), 1);
        clf.update(&[], 133.0);
        assert_eq!(clf.tracked(), 0);
    }

    #[test]
    fn test_hands_are_independent() {
        let mut clf = HandGestureClassifier::new(HandGestureConfig::default());
        let events = run(&mut clf, 0, 5, &[hand(0, -0.05), hand(1, 0.05)]);
        assert_eq!(events.len(), 2, "{:?}", events);
        assert!(events.iter().any(|e| e.id == 0 && e.gesture == Gesture::ThumbsUp));
        assert!(events.iter().any(|e| e.id == 1 && e.gesture == Gesture::ThumbsDown));
    }

    #[test]
    fn test_invisible_tip_skipped() {
        let mut clf = HandGestureClassifier::new(HandGestureConfig::default());
        let mut obs = hand(0, -0.05);
        obs.thumb_tip = obs.thumb_tip.with_visibility(0.1);
        assert!(run(&mut clf, 0, 10, &[obs]).is_empty());
        assert_eq!(clf.tracked(), 1);
    }

    #[test]
    fn test_from_landmarks() {
        let mut lms = vec![Landmark::new(0.0, 0.0); HAND_LANDMARK_COUNT];
        lms[THUMB_TIP] = Landmark::new(0.1, 0.2);
        lms[INDEX_TIP] = Landmark::new(0.3, 0.4);
        let obs = HandObservation::from_landmarks(5, &lms).unwrap();
        assert_eq!(obs.thumb_tip.y, 0.2);
        assert_eq!(obs.index_tip.x, 0.3);
        assert!(HandObservation::from_landmarks(5, &lms[..8]).is_err());
    }

    #[test]
    fn test_confidence_scales_with_excess_over_threshold() {
        let mut clf = HandGestureClassifier::new(HandGestureConfig::default());
        let events = run(&mut clf, 0, 3, &[hand(0, -0.03)]);
        assert_eq!(events.len(), 1);
        assert!((events[0].confidence - 0.5).abs() < 1e-3, "{}", events[0].confidence);

        let mut clf = HandGestureClassifier::new(HandGestureConfig::default());
        let events = run(&mut clf, 0, 3, &[hand(0, 0.021)]);
        assert_eq!(events.len(), 1);
        assert!(events[0].confidence < 0.1, "{}", events[0].confidence);
    }

    #[test]
    fn test_non_finite_timestamp_keeps_window_bounded() {
        let mut clf = HandGestureClassifier::new(HandGestureConfig::default());
        run(&mut clf, 0, 5, &[hand(0, 0.0)]);
        clf.update(&[hand(0, 0.0)], f64::NAN);
        run(&mut clf, 6, 60, &[hand(0, 0.0)]);
        let buffered = clf.hands[&0].samples.len();
        assert!(buffered <= 10, "window grew to {} samples", buffered);

        let events = run(&mut clf, 66, 9, &[hand(0, 0.05)]);
        assert_eq!(events.len(), 1, "{:?}", events);
        assert_eq!(events[0].gesture, Gesture::ThumbsDown);
    }

    #[test]
    fn test_min_visibility_range_checked() {
        let cfg = HandGestureConfig {
            min_visibility: 1.5,
            ..HandGestureConfig::default()
        };
        assert!(cfg.validate().is_err());
        assert!(HandGestureConfig::default().validate().is_ok());
    }
}
