//! Head nod/shake recognition from smoothed yaw and pitch.
//!
//! Each axis runs an independent swing machine:
//!
//! ```text
//! Idle --(|v| > threshold)--> Started { direction, start, peak }
//! Started --(opposite |v| > threshold, peak >= min_amplitude)--> Idle + candidate
//! Started --(opposite |v| > threshold, peak too small)--> Idle
//! Started --(window elapsed)--> Idle
//! ```
//!
//! Yaw candidates become "no", pitch candidates "yes". A candidate only
//! emits if the other axis was quiet over the guard window and the
//! subject's shared refractory period has elapsed. While both machines are
//! idle and the head is nearly still, the baseline drifts toward the
//! current pose with a slow time constant.

use std::collections::VecDeque;

use anyhow::ensure;
use tracing::{debug, info};

use super::event::{Gesture, GestureEvent, GestureSource, SubjectId};
use super::pose::Orientation;

// ── Axis ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Yaw,
    Pitch,
}

impl Axis {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yaw => "yaw",
            Self::Pitch => "pitch",
        }
    }

    /// The gesture a completed swing on this axis means.
    pub fn gesture(&self) -> Gesture {
        match self {
            Self::Yaw => Gesture::No,
            Self::Pitch => Gesture::Yes,
        }
    }
}

// ── Config ─────────────────────────────────────────────────

/// Per-axis swing thresholds.
#[derive(Debug, Clone)]
pub struct AxisConfig {
    /// Speed (units/s) that starts a swing and counts as a reversal.
    pub velocity_threshold: f64,
    /// Displacement from baseline the swing must reach at some point.
    pub min_amplitude: f64,
    /// Time (ms) allowed between swing start and reversal.
    pub window_ms: f64,
    /// Mean |displacement| on this axis that vetoes the other axis.
    pub cross_talk_limit: f64,
}

impl AxisConfig {
    fn validate(&self, axis: Axis) -> anyhow::Result<()> {
        let name = axis.as_str();
        ensure!(
            self.velocity_threshold > 0.0,
            "head.{name}.velocity_threshold must be positive, got {}",
            self.velocity_threshold
        );
        ensure!(
            self.min_amplitude >= 0.0,
            "head.{name}.min_amplitude must be non-negative, got {}",
            self.min_amplitude
        );
        ensure!(
            self.window_ms > 0.0,
            "head.{name}.window_ms must be positive, got {}",
            self.window_ms
        );
        ensure!(
            self.cross_talk_limit > 0.0,
            "head.{name}.cross_talk_limit must be positive, got {}",
            self.cross_talk_limit
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct HeadGestureConfig {
    /// Shake ("no") thresholds.
    pub yaw: AxisConfig,
    /// Nod ("yes") thresholds.
    pub pitch: AxisConfig,
    /// Veto when the other axis's mean |displacement| reaches this fraction
    /// of the swinging axis's own mean.
    pub cross_talk_ratio: f64,
    /// Rolling window (ms) for the cross-axis guard.
    pub guard_window_ms: f64,
    /// Minimum time (ms) between two emissions for one subject.
    pub refractory_ms: f64,
    /// Frames of zeroed velocity on the emitting axis after an emission.
    pub velocity_hold_frames: u32,
    /// Baseline drift time constant (ms). Zero disables drift.
    pub drift_time_constant_ms: f64,
    /// Both |velocities| must stay below this for drift to apply.
    pub drift_max_velocity: f64,
}

impl Default for HeadGestureConfig {
    fn default() -> Self {
        Self {
            yaw: AxisConfig {
                velocity_threshold: 0.25,
                min_amplitude: 0.06,
                window_ms: 700.0,
                cross_talk_limit: 0.03,
            },
            pitch: AxisConfig {
                velocity_threshold: 0.30,
                min_amplitude: 0.10,
                window_ms: 600.0,
                cross_talk_limit: 0.05,
            },
            cross_talk_ratio: 0.5,
            guard_window_ms: 700.0,
            refractory_ms: 1000.0,
            velocity_hold_frames: 3,
            drift_time_constant_ms: 3000.0,
            drift_max_velocity: 0.05,
        }
    }
}

impl HeadGestureConfig {
    /// Preset for pose input expressed in degrees.
    pub fn degrees() -> Self {
        Self {
            yaw: AxisConfig {
                velocity_threshold: 30.0,
                min_amplitude: 8.0,
                window_ms: 700.0,
                cross_talk_limit: 4.0,
            },
            pitch: AxisConfig {
                velocity_threshold: 30.0,
                min_amplitude: 8.0,
                window_ms: 600.0,
                cross_talk_limit: 4.0,
            },
            drift_max_velocity: 5.0,
            ..Self::default()
        }
    }

    pub fn axis(&self, axis: Axis) -> &AxisConfig {
        match axis {
            Axis::Yaw => &self.yaw,
            Axis::Pitch => &self.pitch,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.yaw.validate(Axis::Yaw)?;
        self.pitch.validate(Axis::Pitch)?;
        ensure!(
            self.cross_talk_ratio > 0.0,
            "head.cross_talk_ratio must be positive, got {}",
            self.cross_talk_ratio
        );
        ensure!(
            self.guard_window_ms > 0.0,
            "head.guard_window_ms must be positive, got {}",
            self.guard_window_ms
        );
        ensure!(
            self.refractory_ms >= 0.0,
            "head.refractory_ms must be non-negative, got {}",
            self.refractory_ms
        );
        ensure!(
            self.drift_time_constant_ms >= 0.0,
            "head.drift_time_constant_ms must be non-negative (0 disables), got {}",
            self.drift_time_constant_ms
        );
        ensure!(
            self.drift_max_velocity >= 0.0,
            "head.drift_max_velocity must be non-negative, got {}",
            self.drift_max_velocity
        );
        Ok(())
    }
}

/// Axis activity in `[0, 1]`: the larger of each axis's speed relative to
/// its swing threshold.
pub fn activity(config: &HeadGestureConfig, yaw_velocity: f64, pitch_velocity: f64) -> f64 {
    let yaw = (yaw_velocity.abs() / config.yaw.velocity_threshold).min(1.0);
    let pitch = (pitch_velocity.abs() / config.pitch.velocity_threshold).min(1.0);
    yaw.max(pitch)
}

// ── Swing machine ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SwingState {
    Idle,
    Started {
        /// Sign of the starting velocity.
        direction: f64,
        start_ms: f64,
        /// Largest |displacement| seen since the swing started.
        peak: f64,
    },
}

/// Single-axis swing detector.
#[derive(Debug, Clone)]
pub struct AxisMachine {
    state: SwingState,
    /// Remaining frames of zeroed velocity.
    hold_frames: u32,
}

impl Default for AxisMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl AxisMachine {
    pub fn new() -> Self {
        Self {
            state: SwingState::Idle,
            hold_frames: 0,
        }
    }

    pub fn state(&self) -> SwingState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == SwingState::Idle
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Zero velocity for the next `frames` updates.
    pub fn hold(&mut self, frames: u32) {
        self.hold_frames = frames;
    }

    /// Apply any pending hold to a velocity reading.
    fn held(&mut self, velocity: f64) -> f64 {
        if self.hold_frames > 0 {
            self.hold_frames -= 1;
            0.0
        } else {
            velocity
        }
    }

    /// Advance one frame. Returns a confidence when a swing completes with
    /// enough amplitude.
    pub fn update(
        &mut self,
        config: &AxisConfig,
        velocity: f64,
        displacement: f64,
        now_ms: f64,
    ) -> Option<f32> {
        let fast = velocity.abs() > config.velocity_threshold;
        match self.state {
            SwingState::Idle => {
                if fast {
                    self.state = SwingState::Started {
                        direction: velocity.signum(),
                        start_ms: now_ms,
                        peak: displacement.abs(),
                    };
                }
                None
            }
            SwingState::Started {
                direction,
                start_ms,
                peak,
            } => {
                let peak = peak.max(displacement.abs());
                if now_ms - start_ms > config.window_ms {
                    self.state = SwingState::Idle;
                    return None;
                }
                if fast && velocity.signum() == -direction {
                    self.state = SwingState::Idle;
                    if peak >= config.min_amplitude {
                        let confidence = (velocity.abs() / config.velocity_threshold).min(1.0);
                        return Some(confidence as f32);
                    }
                    return None;
                }
                self.state = SwingState::Started {
                    direction,
                    start_ms,
                    peak,
                };
                None
            }
        }
    }
}

// ── Per-subject FSM ────────────────────────────────────────

/// One frame of conditioned head motion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadSample {
    /// Smoothed pose.
    pub pose: Orientation,
    pub yaw_velocity: f64,
    pub pitch_velocity: f64,
    pub timestamp_ms: f64,
    /// Seconds since the previous frame (already sanitized).
    pub dt_s: f64,
}

#[derive(Debug, Clone, Copy)]
struct GuardEntry {
    yaw: f64,
    pitch: f64,
    timestamp_ms: f64,
}

/// Dual-axis nod/shake recognizer for one subject.
#[derive(Debug, Clone, Default)]
pub struct HeadGestureFsm {
    yaw: AxisMachine,
    pitch: AxisMachine,
    /// Recent baseline displacements for the cross-axis guard.
    guard: VecDeque<GuardEntry>,
    last_emit_ms: Option<f64>,
}

impl HeadGestureFsm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn machine(&self, axis: Axis) -> &AxisMachine {
        match axis {
            Axis::Yaw => &self.yaw,
            Axis::Pitch => &self.pitch,
        }
    }

    pub fn last_emit_ms(&self) -> Option<f64> {
        self.last_emit_ms
    }

    /// Clear swings, holds, the guard window and the refractory timer.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Process one frame against `baseline`, which may drift.
    pub fn update(
        &mut self,
        config: &HeadGestureConfig,
        id: SubjectId,
        sample: &HeadSample,
        baseline: &mut Orientation,
    ) -> Vec<GestureEvent> {
        let now = sample.timestamp_ms;
        let yaw_v = self.yaw.held(sample.yaw_velocity);
        let pitch_v = self.pitch.held(sample.pitch_velocity);

        let yaw_d = sample.pose.yaw - baseline.yaw;
        let pitch_d = sample.pose.pitch - baseline.pitch;

        self.guard.push_back(GuardEntry {
            yaw: yaw_d,
            pitch: pitch_d,
            timestamp_ms: now,
        });
        while self
            .guard
            .front()
            .is_some_and(|e| now - e.timestamp_ms > config.guard_window_ms)
        {
            self.guard.pop_front();
        }
        let (yaw_mean, pitch_mean) = self.guard_means();

        let yaw_candidate = self.yaw.update(&config.yaw, yaw_v, yaw_d, now);
        let pitch_candidate = self.pitch.update(&config.pitch, pitch_v, pitch_d, now);

        let mut events = Vec::new();
        let checks = [
            (Axis::Yaw, yaw_candidate, yaw_mean, pitch_mean, &config.pitch),
            (Axis::Pitch, pitch_candidate, pitch_mean, yaw_mean, &config.yaw),
        ];
        for (axis, candidate, own_mean, other_mean, other_cfg) in checks {
            let Some(confidence) = candidate else {
                continue;
            };
            if other_mean >= other_cfg.cross_talk_limit
                || other_mean >= config.cross_talk_ratio * own_mean
            {
                debug!(
                    subject = id,
                    "Vetoed {} on {}: cross-axis mean {:.4} vs own {:.4}",
                    axis.gesture().as_str(),
                    axis.as_str(),
                    other_mean,
                    own_mean
                );
                continue;
            }
            if self
                .last_emit_ms
                .is_some_and(|last| now - last < config.refractory_ms)
            {
                debug!(
                    subject = id,
                    "Suppressed {} inside refractory period",
                    axis.gesture().as_str()
                );
                continue;
            }

            self.last_emit_ms = Some(now);
            match axis {
                Axis::Yaw => self.yaw.hold(config.velocity_hold_frames),
                Axis::Pitch => self.pitch.hold(config.velocity_hold_frames),
            }
            info!(
                subject = id,
                "Head gesture {} (confidence {:.2})",
                axis.gesture().as_str(),
                confidence
            );
            events.push(GestureEvent {
                source: GestureSource::Head,
                id,
                gesture: axis.gesture(),
                confidence,
                timestamp_ms: now,
            });
        }

        if config.drift_time_constant_ms > 0.0
            && self.yaw.is_idle()
            && self.pitch.is_idle()
            && yaw_v.abs() < config.drift_max_velocity
            && pitch_v.abs() < config.drift_max_velocity
        {
            let k = 1.0 - (-(sample.dt_s * 1000.0) / config.drift_time_constant_ms).exp();
            baseline.yaw += k * (sample.pose.yaw - baseline.yaw);
            baseline.pitch += k * (sample.pose.pitch - baseline.pitch);
        }

        events
    }

    fn guard_means(&self) -> (f64, f64) {
        if self.guard.is_empty() {
            return (0.0, 0.0);
        }
        let n = self.guard.len() as f64;
        let yaw = self.guard.iter().map(|e| e.yaw.abs()).sum::<f64>() / n;
        let pitch = self.guard.iter().map(|e| e.pitch.abs()).sum::<f64>() / n;
        (yaw, pitch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP_MS: f64 = 1000.0 / 30.0;

    fn sample(frame: u32, yaw: f64, pitch: f64, yaw_v: f64, pitch_v: f64) -> HeadSample {
        HeadSample {
            pose: Orientation::new(yaw, pitch),
            yaw_velocity: yaw_v,
            pitch_velocity: pitch_v,
            timestamp_ms: frame as f64 * STEP_MS,
            dt_s: STEP_MS / 1000.0,
        }
    }

    /// Drive a yaw out-and-back swing: (yaw displacement, yaw velocity)
    /// per frame, pitch flat.
    fn drive_yaw(
        fsm: &mut HeadGestureFsm,
        cfg: &HeadGestureConfig,
        baseline: &mut Orientation,
        start: u32,
        frames: &[(f64, f64)],
    ) -> Vec<GestureEvent> {
        let mut events = Vec::new();
        for (i, &(yaw, v)) in frames.iter().enumerate() {
            let s = sample(start + i as u32, yaw, 0.0, v, 0.0);
            events.extend(fsm.update(cfg, 1, &s, baseline));
        }
        events
    }

    fn shake_frames() -> Vec<(f64, f64)> {
        vec![
            (0.00, 0.0),
            (0.03, 0.5),
            (0.08, 0.8),
            (0.12, 0.6),
            (0.10, -0.4),
            (0.04, -0.8),
            (0.00, -0.3),
            (0.00, 0.0),
        ]
    }

    #[test]
    fn test_axis_idle_to_started() {
        let cfg = HeadGestureConfig::default();
        let mut m = AxisMachine::new();
        assert!(m.update(&cfg.yaw, 0.1, 0.0, 0.0).is_none());
        assert!(m.is_idle());
        assert!(m.update(&cfg.yaw, 0.5, 0.02, 33.0).is_none());
        match m.state() {
            SwingState::Started { direction, .. } => assert_eq!(direction, 1.0),
            other => panic!("expected started, got {:?}", other),
        }
    }

    #[test]
    fn test_axis_reversal_with_amplitude_emits() {
        let cfg = HeadGestureConfig::default();
        let mut m = AxisMachine::new();
        m.update(&cfg.yaw, 0.5, 0.02, 0.0);
        m.update(&cfg.yaw, 0.6, 0.09, 33.0);
        let c = m.update(&cfg.yaw, -0.3, 0.07, 66.0).expect("candidate");
        assert!((c - 1.0).abs() < 1e-6, "confidence {}", c);
        assert!(m.is_idle());
    }

    #[test]
    fn test_axis_confidence_saturates() {
        let cfg = HeadGestureConfig::default();
        let mut m = AxisMachine::new();
        m.update(&cfg.yaw, 0.5, 0.1, 0.0);
        let c = m.update(&cfg.yaw, -2.0, 0.1, 33.0).expect("candidate");
        assert_eq!(c, 1.0);
    }

    #[test]
    fn test_axis_small_amplitude_rejected() {
        let cfg = HeadGestureConfig::default();
        let mut m = AxisMachine::new();
        m.update(&cfg.yaw, 0.5, 0.01, 0.0);
        assert!(m.update(&cfg.yaw, -0.5, 0.02, 33.0).is_none());
        assert!(m.is_idle());
    }

    #[test]
    fn test_axis_times_out() {
        let cfg = HeadGestureConfig::default();
        let mut m = AxisMachine::new();
        m.update(&cfg.yaw, 0.5, 0.2, 0.0);
        assert!(m.update(&cfg.yaw, 0.0, 0.2, 500.0).is_none());
        assert!(!m.is_idle());
        // Past the 700 ms window the reversal no longer counts.
        assert!(m.update(&cfg.yaw, -0.5, 0.2, 701.0).is_none());
        assert!(m.is_idle());
    }

    #[test]
    fn test_same_direction_does_not_complete() {
        let cfg = HeadGestureConfig::default();
        let mut m = AxisMachine::new();
        m.update(&cfg.yaw, 0.5, 0.2, 0.0);
        assert!(m.update(&cfg.yaw, 0.9, 0.3, 33.0).is_none());
        assert!(!m.is_idle());
    }

    #[test]
    fn test_fsm_shake_emits_no() {
        let cfg = HeadGestureConfig::default();
        let mut fsm = HeadGestureFsm::new();
        let mut baseline = Orientation::default();
        let events = drive_yaw(&mut fsm, &cfg, &mut baseline, 0, &shake_frames());
        assert_eq!(events.len(), 1, "{:?}", events);
        assert_eq!(events[0].gesture, Gesture::No);
        assert_eq!(events[0].source, GestureSource::Head);
        assert_eq!(events[0].id, 1);
    }

    #[test]
    fn test_fsm_cross_axis_veto() {
        let cfg = HeadGestureConfig::default();
        let mut fsm = HeadGestureFsm::new();
        let mut baseline = Orientation::default();
        let mut events = Vec::new();
        // Pitch sits 0.08 off baseline the whole time: well past the limit.
        for (i, &(yaw, v)) in shake_frames().iter().enumerate() {
            let s = sample(i as u32, yaw, 0.08, v, 0.0);
            events.extend(fsm.update(&cfg, 1, &s, &mut baseline));
        }
        assert!(events.is_empty(), "expected veto, got {:?}", events);
    }

    #[test]
    fn test_fsm_refractory_blocks_second_swing() {
        let cfg = HeadGestureConfig::default();
        let mut fsm = HeadGestureFsm::new();
        let mut baseline = Orientation::default();
        let first = drive_yaw(&mut fsm, &cfg, &mut baseline, 0, &shake_frames());
        assert_eq!(first.len(), 1);
        // Second identical swing starts 8 frames later (~270 ms).
        let second = drive_yaw(&mut fsm, &cfg, &mut baseline, 8, &shake_frames());
        assert!(second.is_empty(), "refractory failed: {:?}", second);
        // After the refractory period it fires again.
        let third = drive_yaw(&mut fsm, &cfg, &mut baseline, 60, &shake_frames());
        assert_eq!(third.len(), 1, "{:?}", third);
    }

    #[test]
    fn test_velocity_hold_after_emission() {
        let cfg = HeadGestureConfig::default();
        let mut fsm = HeadGestureFsm::new();
        let mut baseline = Orientation::default();
        drive_yaw(&mut fsm, &cfg, &mut baseline, 0, &shake_frames()[..6]);
        // Emission happened on the reversal frame; fast readings are now held.
        let s = sample(6, 0.0, 0.0, 0.9, 0.0);
        fsm.update(&cfg, 1, &s, &mut baseline);
        assert!(fsm.machine(Axis::Yaw).is_idle(), "hold should swallow velocity");
    }

    #[test]
    fn test_drift_moves_baseline_slowly() {
        let cfg = HeadGestureConfig::default();
        let mut fsm = HeadGestureFsm::new();
        let mut baseline = Orientation::default();
        for i in 0..30 {
            let s = sample(i, 0.05, 0.0, 0.0, 0.0);
            fsm.update(&cfg, 1, &s, &mut baseline);
        }
        // One second of stillness with a 3 s time constant: about 28%.
        assert!(baseline.yaw > 0.01 && baseline.yaw < 0.02, "baseline {}", baseline.yaw);
    }

    #[test]
    fn test_drift_disabled_at_zero() {
        let cfg = HeadGestureConfig {
            drift_time_constant_ms: 0.0,
            ..HeadGestureConfig::default()
        };
        let mut fsm = HeadGestureFsm::new();
        let mut baseline = Orientation::default();
        for i in 0..30 {
            let s = sample(i, 0.05, 0.0, 0.0, 0.0);
            fsm.update(&cfg, 1, &s, &mut baseline);
        }
        assert_eq!(baseline, Orientation::default());
    }

    #[test]
    fn test_activity_meter() {
        let cfg = HeadGestureConfig::default();
        assert_eq!(activity(&cfg, 0.0, 0.0), 0.0);
        assert!((activity(&cfg, 0.125, 0.0) - 0.5).abs() < 1e-9);
        assert_eq!(activity(&cfg, 0.0, -3.0), 1.0);
    }

    #[test]
    fn test_validate() {
        assert!(HeadGestureConfig::default().validate().is_ok());
        assert!(HeadGestureConfig::degrees().validate().is_ok());
        let mut bad = HeadGestureConfig::default();
        bad.pitch.window_ms = -1.0;
        let err = bad.validate().unwrap_err();
        assert!(err.to_string().contains("pitch.window_ms"), "{}", err);
    }
}
