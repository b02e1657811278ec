//! Gesture engine: smoothing, calibration, and nod/shake/thumbs recognition.
//!
//! Provides:
//! - `filter`: One-Euro filter and per-axis signal conditioning
//! - `pose`: landmark and rotation-matrix pose extraction
//! - `calibrator`: neutral-pose calibration state machine
//! - `head`: dual-axis nod/shake FSM with cross-axis veto
//! - `hand`: thumbs up/down classifier
//! - `registry`: per-subject state ownership and lifecycle

pub mod calibrator;
pub mod event;
pub mod filter;
pub mod hand;
pub mod head;
pub mod pose;
pub mod registry;

pub use calibrator::{CalibrationState, CalibrationUpdate, Calibrator};
pub use event::{Gesture, GestureEvent, GestureSource, HandId, SubjectId, Vote};
pub use hand::{HandGestureClassifier, HandObservation};
pub use head::HeadGestureFsm;
pub use pose::{FaceKeypoints, Landmark, Orientation, PoseSource};
pub use registry::{CalibrationReport, CalibrationTarget, FaceObservation, Frame, SessionRegistry};
