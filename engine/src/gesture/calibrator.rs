//! Neutral-pose calibration: wait for stillness, capture, average.
//!
//! State machine per subject:
//!
//! ```text
//! WaitStable --(still_frames still samples)--> Capturing
//! Capturing  --(capture_frames still samples)--> Ready (baseline = mean)
//! Capturing  --(motion)--> WaitStable, re-anchored on the current sample
//! WaitStable --(motion)--> WaitStable, re-anchored on the current sample
//! ```
//!
//! Motion during calibration is never an error; calibration simply starts
//! over until the subject holds still long enough.

use anyhow::ensure;
use tracing::debug;

use super::pose::Orientation;

// ── State ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationState {
    WaitStable,
    Capturing,
    Ready,
}

impl CalibrationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WaitStable => "wait-stable",
            Self::Capturing => "capturing",
            Self::Ready => "ready",
        }
    }
}

/// How far a sample is from the stillness reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    /// `hypot(dyaw, dpitch)`
    Euclidean,
    /// `|dyaw| + |dpitch|`
    Manhattan,
}

impl DistanceMetric {
    pub fn distance(&self, a: Orientation, b: Orientation) -> f64 {
        let dy = a.yaw - b.yaw;
        let dp = a.pitch - b.pitch;
        match self {
            Self::Euclidean => dy.hypot(dp),
            Self::Manhattan => dy.abs() + dp.abs(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Euclidean => "euclidean",
            Self::Manhattan => "manhattan",
        }
    }
}

// ── Config ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CalibrationConfig {
    /// Distance from the reference below which a sample counts as still.
    pub still_threshold: f64,
    /// Consecutive still samples required before capture begins.
    pub still_frames: u32,
    /// Still samples averaged into the baseline.
    pub capture_frames: u32,
    pub metric: DistanceMetric,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            still_threshold: 0.03,
            still_frames: 15,
            capture_frames: 30,
            metric: DistanceMetric::Euclidean,
        }
    }
}

impl CalibrationConfig {
    /// Preset for pose input expressed in degrees.
    pub fn degrees() -> Self {
        Self {
            still_threshold: 2.0,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.still_threshold > 0.0,
            "calibration.still_threshold must be positive, got {}",
            self.still_threshold
        );
        ensure!(self.still_frames > 0, "calibration.still_frames must be at least 1");
        ensure!(self.capture_frames > 0, "calibration.capture_frames must be at least 1");
        Ok(())
    }
}

// ── Update result ──────────────────────────────────────────

/// Progress report returned by every [`Calibrator::update`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationUpdate {
    pub state: CalibrationState,
    /// Fraction of the active phase completed, in `[0, 1]`.
    pub progress: f64,
    /// Whether this sample was within the stillness threshold.
    pub still: bool,
    /// Set only on the update that completes calibration.
    pub baseline: Option<Orientation>,
}

// ── Calibrator ─────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Calibrator {
    state: CalibrationState,
    active: bool,
    reference: Orientation,
    still_count: u32,
    capture_count: u32,
    sum_yaw: f64,
    sum_pitch: f64,
    baseline: Option<Orientation>,
}

impl Default for Calibrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Calibrator {
    /// An idle calibrator. Call [`start`](Self::start) to begin.
    pub fn new() -> Self {
        Self {
            state: CalibrationState::WaitStable,
            active: false,
            reference: Orientation::default(),
            still_count: 0,
            capture_count: 0,
            sum_yaw: 0.0,
            sum_pitch: 0.0,
            baseline: None,
        }
    }

    /// Begin (or restart) calibration anchored on `reference`.
    pub fn start(&mut self, reference: Orientation) {
        *self = Self {
            active: true,
            reference,
            ..Self::new()
        };
    }

    /// Skip calibration and adopt an externally supplied baseline.
    pub fn finish_with(&mut self, baseline: Orientation) {
        *self = Self {
            state: CalibrationState::Ready,
            reference: baseline,
            baseline: Some(baseline),
            ..Self::new()
        };
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    /// Frozen baseline once `Ready`.
    pub fn baseline(&self) -> Option<Orientation> {
        self.baseline
    }

    /// Feed one (ideally smoothed) sample.
    pub fn update(&mut self, config: &CalibrationConfig, sample: Orientation) -> CalibrationUpdate {
        let still = config.metric.distance(sample, self.reference) < config.still_threshold;

        if !self.active {
            return CalibrationUpdate {
                state: self.state,
                progress: if self.state == CalibrationState::Ready { 1.0 } else { 0.0 },
                still,
                baseline: None,
            };
        }

        match self.state {
            CalibrationState::WaitStable => {
                if still {
                    self.still_count += 1;
                    if self.still_count >= config.still_frames {
                        debug!("Calibration: still for {} frames, capturing", self.still_count);
                        self.state = CalibrationState::Capturing;
                        self.capture_count = 0;
                        self.sum_yaw = 0.0;
                        self.sum_pitch = 0.0;
                    }
                } else {
                    self.still_count = 0;
                    self.reference = sample;
                }
            }
            CalibrationState::Capturing => {
                if still {
                    self.sum_yaw += sample.yaw;
                    self.sum_pitch += sample.pitch;
                    self.capture_count += 1;
                    if self.capture_count >= config.capture_frames {
                        let n = self.capture_count as f64;
                        let baseline = Orientation::new(self.sum_yaw / n, self.sum_pitch / n);
                        self.state = CalibrationState::Ready;
                        self.active = false;
                        self.baseline = Some(baseline);
                        debug!(
                            "Calibration complete: baseline yaw {:.4} pitch {:.4}",
                            baseline.yaw, baseline.pitch
                        );
                        return CalibrationUpdate {
                            state: self.state,
                            progress: 1.0,
                            still,
                            baseline: Some(baseline),
                        };
                    }
                } else {
                    debug!("Calibration: motion during capture, restarting");
                    self.start(sample);
                }
            }
            CalibrationState::Ready => {}
        }

        CalibrationUpdate {
            state: self.state,
            progress: self.progress(config),
            still,
            baseline: None,
        }
    }

    fn progress(&self, config: &CalibrationConfig) -> f64 {
        let frac = |n: u32, of: u32| (n as f64 / of.max(1) as f64).clamp(0.0, 1.0);
        match self.state {
            CalibrationState::WaitStable => frac(self.still_count, config.still_frames),
            CalibrationState::Capturing => frac(self.capture_count, config.capture_frames),
            CalibrationState::Ready => 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(cal: &mut Calibrator, cfg: &CalibrationConfig, s: Orientation, n: usize) -> Vec<CalibrationUpdate> {
        (0..n).map(|_| cal.update(cfg, s)).collect()
    }

    #[test]
    fn test_new_is_idle() {
        let cal = Calibrator::new();
        assert!(!cal.is_active());
        assert_eq!(cal.state(), CalibrationState::WaitStable);
        assert!(cal.baseline().is_none());
    }

    #[test]
    fn test_constant_signal_reaches_ready() {
        let cfg = CalibrationConfig::default();
        let mut cal = Calibrator::new();
        let s = Orientation::new(0.12, -0.04);
        cal.start(s);
        let updates = feed(&mut cal, &cfg, s, (cfg.still_frames + cfg.capture_frames) as usize);

        let last = updates.last().unwrap();
        assert_eq!(last.state, CalibrationState::Ready);
        let b = last.baseline.expect("baseline on completion");
        assert!((b.yaw - 0.12).abs() < 1e-9);
        assert!((b.pitch + 0.04).abs() < 1e-9);
        assert!(!cal.is_active());

        // Exactly one update carried the baseline.
        assert_eq!(updates.iter().filter(|u| u.baseline.is_some()).count(), 1);
    }

    #[test]
    fn test_ready_is_frozen() {
        let cfg = CalibrationConfig::default();
        let mut cal = Calibrator::new();
        let s = Orientation::new(0.0, 0.0);
        cal.start(s);
        feed(&mut cal, &cfg, s, 45);
        let u = cal.update(&cfg, Orientation::new(0.5, 0.5));
        assert_eq!(u.state, CalibrationState::Ready);
        assert!(u.baseline.is_none());
        assert!(!u.still);
        assert_eq!(u.progress, 1.0);
        assert_eq!(cal.baseline(), Some(s));
    }

    #[test]
    fn test_continuous_motion_never_ready() {
        let cfg = CalibrationConfig::default();
        let mut cal = Calibrator::new();
        cal.start(Orientation::new(0.0, 0.0));
        for i in 1..500 {
            // Each step moves 0.05, above the 0.03 threshold.
            let u = cal.update(&cfg, Orientation::new(0.05 * i as f64, 0.0));
            assert_eq!(u.state, CalibrationState::WaitStable);
            assert!(!u.still);
            assert_eq!(u.progress, 0.0);
        }
    }

    #[test]
    fn test_motion_during_capture_restarts() {
        let cfg = CalibrationConfig::default();
        let mut cal = Calibrator::new();
        let s = Orientation::new(0.0, 0.0);
        cal.start(s);
        feed(&mut cal, &cfg, s, 20);
        assert_eq!(cal.state(), CalibrationState::Capturing);

        let moved = Orientation::new(0.1, 0.0);
        let u = cal.update(&cfg, moved);
        assert_eq!(u.state, CalibrationState::WaitStable);
        assert!(cal.is_active());

        // New reference is the moved sample; a full cycle there completes.
        let updates = feed(&mut cal, &cfg, moved, 45);
        let b = updates.last().unwrap().baseline.expect("baseline");
        assert!((b.yaw - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_wait_reanchors_on_slow_drift() {
        let cfg = CalibrationConfig::default();
        let mut cal = Calibrator::new();
        cal.start(Orientation::new(0.0, 0.0));
        // Jump away, then hold: the hold point becomes the reference.
        cal.update(&cfg, Orientation::new(0.2, 0.0));
        let updates = feed(&mut cal, &cfg, Orientation::new(0.2, 0.0), 45);
        assert_eq!(updates.last().unwrap().state, CalibrationState::Ready);
    }

    #[test]
    fn test_progress_fraction() {
        let cfg = CalibrationConfig::default();
        let mut cal = Calibrator::new();
        let s = Orientation::new(0.0, 0.0);
        cal.start(s);
        let updates = feed(&mut cal, &cfg, s, 30);
        assert!((updates[4].progress - 5.0 / 15.0).abs() < 1e-9);
        // Frame 15 switches to capturing with nothing captured yet.
        assert_eq!(updates[14].state, CalibrationState::Capturing);
        assert_eq!(updates[14].progress, 0.0);
        assert!((updates[29].progress - 15.0 / 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_manhattan_metric_is_stricter() {
        let a = Orientation::new(0.0, 0.0);
        let b = Orientation::new(0.02, 0.02);
        assert!(DistanceMetric::Euclidean.distance(a, b) < 0.03);
        assert!(DistanceMetric::Manhattan.distance(a, b) > 0.03);
    }

    #[test]
    fn test_finish_with_explicit_baseline() {
        let cfg = CalibrationConfig::default();
        let mut cal = Calibrator::new();
        cal.start(Orientation::new(0.0, 0.0));
        cal.finish_with(Orientation::new(0.3, 0.1));
        assert!(!cal.is_active());
        assert_eq!(cal.state(), CalibrationState::Ready);
        assert_eq!(cal.baseline(), Some(Orientation::new(0.3, 0.1)));
        assert_eq!(cal.update(&cfg, Orientation::new(0.3, 0.1)).state, CalibrationState::Ready);
    }

    #[test]
    fn test_validate() {
        assert!(CalibrationConfig::default().validate().is_ok());
        let bad = CalibrationConfig {
            capture_frames: 0,
            ..CalibrationConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
