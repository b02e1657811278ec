//! Session registry: owns every tracked subject and hand.
//!
//! Each frame marks all subjects unseen, routes every reported face through
//! its subject's filters, calibrator and head FSM (creating the subject on
//! first sighting), then evicts subjects unseen for longer than the absence
//! timeout. Hands go through a shared [`HandGestureClassifier`].

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use super::calibrator::{CalibrationState, CalibrationUpdate, Calibrator};
use super::event::{GestureEvent, SubjectId};
use super::filter::{interval_s, AxisSignal, FrameClock};
use super::hand::{HandGestureClassifier, HandObservation};
use super::head::{self, HeadGestureFsm, HeadSample};
use super::pose::{Orientation, PoseSample, PoseSource};
use crate::config::EngineConfig;

// ── Frame input ────────────────────────────────────────────

/// One detected face for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceObservation {
    pub id: SubjectId,
    pub pose: PoseSource,
}

/// Everything the detector produced for one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    /// Monotonic timestamp (ms).
    pub timestamp_ms: f64,
    pub faces: Vec<FaceObservation>,
    pub hands: Vec<HandObservation>,
}

/// Which subjects an explicit calibration request applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationTarget {
    Subject(SubjectId),
    All,
}

/// Calibration progress for one subject during the latest frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationReport {
    pub id: SubjectId,
    pub update: CalibrationUpdate,
}

impl CalibrationReport {
    pub fn to_sexp(&self) -> String {
        let u = &self.update;
        let baseline = u
            .baseline
            .map(|b| format!(" :baseline-yaw {:.5} :baseline-pitch {:.5}", b.yaw, b.pitch))
            .unwrap_or_default();
        format!(
            "(:type :event :event :calibration :id {} :state :{} :progress {:.3} :still {}{})",
            self.id,
            u.state.as_str(),
            u.progress,
            if u.still { "t" } else { "nil" },
            baseline,
        )
    }
}

/// Read-only view of a subject.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubjectSnapshot {
    pub id: SubjectId,
    /// Smoothed pose.
    pub pose: Orientation,
    pub baseline: Orientation,
    pub calibration: CalibrationState,
    pub calibrating: bool,
    /// Head gestures are being recognized.
    pub armed: bool,
    pub last_seen_ms: f64,
}

// ── Per-subject state ──────────────────────────────────────

struct Subject {
    yaw: AxisSignal,
    pitch: AxisSignal,
    baseline: Orientation,
    calibrator: Calibrator,
    head: HeadGestureFsm,
    armed: bool,
    seen: bool,
    last_seen_ms: f64,
    prev_ms: f64,
    activity: f64,
}

impl Subject {
    /// New subject seeded from its first complete sample. With
    /// auto-calibration that sample is also the first calibration tick.
    fn new(
        config: &EngineConfig,
        raw: Orientation,
        now_ms: f64,
    ) -> (Self, Option<CalibrationUpdate>) {
        let yaw = AxisSignal::new(&config.filter, raw.yaw, now_ms);
        let pitch = AxisSignal::new(&config.filter, raw.pitch, now_ms);
        let pose = Orientation::new(yaw.value(), pitch.value());
        let mut calibrator = Calibrator::new();
        let calibration = config.registry.auto_calibrate.then(|| {
            calibrator.start(pose);
            calibrator.update(&config.calibration, pose)
        });
        let subject = Self {
            yaw,
            pitch,
            baseline: raw,
            calibrator,
            head: HeadGestureFsm::new(),
            armed: !config.registry.auto_calibrate,
            seen: true,
            last_seen_ms: now_ms,
            prev_ms: now_ms,
            activity: 0.0,
        };
        (subject, calibration)
    }

    fn pose(&self) -> Orientation {
        Orientation::new(self.yaw.value(), self.pitch.value())
    }

    fn update(
        &mut self,
        config: &EngineConfig,
        id: SubjectId,
        sample: PoseSample,
        now_ms: f64,
    ) -> (Vec<GestureEvent>, Option<CalibrationUpdate>) {
        let dt_s = interval_s(self.prev_ms, now_ms);
        self.prev_ms = now_ms;

        let yaw = self.yaw.update(&config.filter, sample.yaw, now_ms);
        let pitch = self.pitch.update(&config.filter, sample.pitch, now_ms);
        self.activity = head::activity(&config.head, yaw.velocity, pitch.velocity);
        let pose = Orientation::new(yaw.value, pitch.value);

        if self.calibrator.is_active() {
            let update = self.calibrator.update(&config.calibration, pose);
            if let Some(baseline) = update.baseline {
                info!(
                    subject = id,
                    "Subject calibrated: baseline yaw {:.4} pitch {:.4}",
                    baseline.yaw,
                    baseline.pitch
                );
                self.baseline = baseline;
                self.armed = true;
                self.head.reset();
            }
            return (Vec::new(), Some(update));
        }
        if !self.armed {
            return (Vec::new(), None);
        }

        let sample = HeadSample {
            pose,
            yaw_velocity: yaw.velocity,
            pitch_velocity: pitch.velocity,
            timestamp_ms: now_ms,
            dt_s,
        };
        let events = self
            .head
            .update(&config.head, id, &sample, &mut self.baseline);
        (events, None)
    }

    fn calibrate(&mut self, baseline: Option<Orientation>) {
        self.head.reset();
        match baseline {
            Some(b) => {
                self.baseline = b;
                self.calibrator.finish_with(b);
                self.armed = true;
            }
            None => {
                self.calibrator.start(self.pose());
                self.armed = false;
            }
        }
    }

    fn snapshot(&self, id: SubjectId) -> SubjectSnapshot {
        SubjectSnapshot {
            id,
            pose: self.pose(),
            baseline: self.baseline,
            calibration: self.calibrator.state(),
            calibrating: self.calibrator.is_active(),
            armed: self.armed,
            last_seen_ms: self.last_seen_ms,
        }
    }
}

// ── Registry ───────────────────────────────────────────────

pub struct SessionRegistry {
    config: EngineConfig,
    subjects: BTreeMap<SubjectId, Subject>,
    hands: HandGestureClassifier,
    calibration_reports: Vec<CalibrationReport>,
    meter: f64,
    clock: FrameClock,
}

impl SessionRegistry {
    /// Validate `config` and build an empty registry.
    pub fn new(config: EngineConfig) -> anyhow::Result<Self> {
        config.validate()?;
        info!(
            "Session registry initialized (auto-calibrate: {}, lost timeout {:.0}ms)",
            config.registry.auto_calibrate, config.registry.lost_timeout_ms
        );
        Ok(Self {
            hands: HandGestureClassifier::new(config.hand.clone()),
            config,
            subjects: BTreeMap::new(),
            calibration_reports: Vec::new(),
            meter: 0.0,
            clock: FrameClock::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Process one detector frame: faces then hands.
    pub fn update(&mut self, frame: &Frame) -> Vec<GestureEvent> {
        let now_ms = self.frame_time(frame.timestamp_ms);
        let mut events = self.update_faces(&frame.faces, now_ms);
        events.extend(self.update_hands(&frame.hands, now_ms));
        events
    }

    fn frame_time(&mut self, timestamp_ms: f64) -> f64 {
        let now_ms = self.clock.tick(timestamp_ms);
        if now_ms != timestamp_ms {
            debug!("Unusable frame timestamp {}, using {:.1}ms", timestamp_ms, now_ms);
        }
        now_ms
    }

    /// Head gestures for one frame of faces.
    pub fn update_faces(&mut self, faces: &[FaceObservation], now_ms: f64) -> Vec<GestureEvent> {
        let now_ms = self.frame_time(now_ms);
        for subject in self.subjects.values_mut() {
            subject.seen = false;
        }
        self.calibration_reports.clear();
        self.meter = 0.0;

        let mut events = Vec::new();
        for face in faces {
            let sample = face.pose.sample(self.config.registry.min_visibility);
            match self.subjects.get_mut(&face.id) {
                Some(subject) if subject.seen => {
                    debug!(subject = face.id, "Duplicate face in frame, ignoring");
                }
                Some(subject) => {
                    subject.seen = true;
                    subject.last_seen_ms = now_ms;
                    let (gestures, calibration) =
                        subject.update(&self.config, face.id, sample, now_ms);
                    events.extend(gestures);
                    if let Some(update) = calibration {
                        self.calibration_reports.push(CalibrationReport { id: face.id, update });
                    }
                    self.meter = self.meter.max(subject.activity);
                }
                None => match sample.complete() {
                    Some(raw) => {
                        info!(
                            subject = face.id,
                            "New subject: baseline yaw {:.4} pitch {:.4}",
                            raw.yaw,
                            raw.pitch
                        );
                        let (subject, calibration) = Subject::new(&self.config, raw, now_ms);
                        self.subjects.insert(face.id, subject);
                        if let Some(update) = calibration {
                            self.calibration_reports.push(CalibrationReport { id: face.id, update });
                        }
                    }
                    None => {
                        debug!(
                            subject = face.id,
                            "First sighting without a complete pose, waiting"
                        );
                    }
                },
            }
        }

        let timeout = self.config.registry.lost_timeout_ms;
        self.subjects.retain(|id, subject| {
            let keep = subject.seen || now_ms - subject.last_seen_ms <= timeout;
            if !keep {
                info!(
                    subject = *id,
                    "Subject evicted after {:.0}ms absence",
                    now_ms - subject.last_seen_ms
                );
            }
            keep
        });

        events
    }

    /// Hand gestures for one frame of hands.
    pub fn update_hands(&mut self, hands: &[HandObservation], now_ms: f64) -> Vec<GestureEvent> {
        let now_ms = self.frame_time(now_ms);
        self.hands.update(hands, now_ms)
    }

    /// Drop every subject and hand.
    pub fn reset(&mut self) {
        info!(
            "Registry reset ({} subjects, {} hands dropped)",
            self.subjects.len(),
            self.hands.tracked()
        );
        self.subjects.clear();
        self.hands.reset();
        self.calibration_reports.clear();
        self.meter = 0.0;
    }

    /// Restart calibration, or adopt `baseline` directly when given.
    /// Returns how many subjects were affected.
    pub fn calibrate(&mut self, target: CalibrationTarget, baseline: Option<Orientation>) -> usize {
        let count = match target {
            CalibrationTarget::Subject(id) => match self.subjects.get_mut(&id) {
                Some(subject) => {
                    subject.calibrate(baseline);
                    1
                }
                None => {
                    warn!(subject = id, "Calibration requested for unknown subject");
                    0
                }
            },
            CalibrationTarget::All => {
                for subject in self.subjects.values_mut() {
                    subject.calibrate(baseline);
                }
                self.subjects.len()
            }
        };
        if count > 0 {
            match baseline {
                Some(b) => info!(
                    "Explicit baseline yaw {:.4} pitch {:.4} applied to {} subject(s)",
                    b.yaw, b.pitch, count
                ),
                None => info!("Calibration restarted for {} subject(s)", count),
            }
        }
        count
    }

    /// Calibration progress produced by the latest frame.
    pub fn calibration_reports(&self) -> &[CalibrationReport] {
        &self.calibration_reports
    }

    /// Axis activity in `[0, 1]` across subjects updated in the latest frame.
    pub fn meter(&self) -> f64 {
        self.meter
    }

    pub fn subject(&self, id: SubjectId) -> Option<SubjectSnapshot> {
        self.subjects.get(&id).map(|s| s.snapshot(id))
    }

    pub fn subjects(&self) -> impl Iterator<Item = SubjectSnapshot> + '_ {
        self.subjects.iter().map(|(id, s)| s.snapshot(*id))
    }

    pub fn subject_count(&self) -> usize {
        self.subjects.len()
    }

    pub fn hand_count(&self) -> usize {
        self.hands.tracked()
    }

    /// Generate s-expression for IPC status.
    pub fn status_sexp(&self) -> String {
        let subjects: Vec<String> = self
            .subjects()
            .map(|s| {
                format!(
                    "(:id {} :yaw {:.4} :pitch {:.4} :baseline-yaw {:.4} :baseline-pitch {:.4} :calibration :{} :armed {} :last-seen {:.0})",
                    s.id,
                    s.pose.yaw,
                    s.pose.pitch,
                    s.baseline.yaw,
                    s.baseline.pitch,
                    s.calibration.as_str(),
                    if s.armed { "t" } else { "nil" },
                    s.last_seen_ms,
                )
            })
            .collect();
        format!(
            "(:subjects ({}) :hand {} :meter {:.3})",
            subjects.join(" "),
            self.hands.status_sexp(),
            self.meter,
        )
    }
}

// ── Test helpers ───────────────────────────────────────────

#[cfg(test)]
const STEP_MS: f64 = 1000.0 / 30.0;

/// Piecewise-linear signal: from `start`, move to each target over `n` frames.
#[cfg(test)]
fn ramp(start: f64, segments: &[(f64, u32)]) -> Vec<f64> {
    let mut out = Vec::new();
    let mut cur = start;
    for &(target, n) in segments {
        for i in 1..=n {
            out.push(cur + (target - cur) * i as f64 / n as f64);
        }
        cur = target;
    }
    out
}

#[cfg(test)]
fn still(n: usize) -> Vec<f64> {
    vec![0.0; n]
}

/// 50 still frames then a 0 -> +0.3 -> -0.3 swing and hold.
#[cfg(test)]
fn swing() -> Vec<f64> {
    let mut v = still(50);
    v.extend(ramp(0.0, &[(0.3, 5), (-0.3, 10), (-0.3, 40)]));
    v
}

#[cfg(test)]
fn angles(id: SubjectId, yaw: f64, pitch: f64) -> FaceObservation {
    FaceObservation {
        id,
        pose: PoseSource::Angles { yaw, pitch },
    }
}

/// Feed subject 0 one frame per sample at 30 fps, starting at `t = 0`.
#[cfg(test)]
fn drive(reg: &mut SessionRegistry, yaw: &[f64], pitch: &[f64]) -> Vec<GestureEvent> {
    let mut events = Vec::new();
    for (i, (&y, &p)) in yaw.iter().zip(pitch).enumerate() {
        let frame = Frame {
            timestamp_ms: i as f64 * STEP_MS,
            faces: vec![angles(0, y, p)],
            hands: Vec::new(),
        };
        events.extend(reg.update(&frame));
    }
    events
}

#[cfg(test)]
fn count(events: &[GestureEvent], gesture: super::event::Gesture) -> usize {
    events.iter().filter(|e| e.gesture == gesture).count()
}
