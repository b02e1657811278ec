//! Engine configuration: every tunable threshold in one place.
//!
//! Defaults are tuned for 2-D landmark input (normalized image units at
//! roughly 30 fps). [`EngineConfig::degrees`] retunes for Euler angles
//! extracted from a face transform matrix.

use anyhow::{ensure, Context};

use crate::gesture::calibrator::CalibrationConfig;
use crate::gesture::filter::FilterConfig;
use crate::gesture::hand::HandGestureConfig;
use crate::gesture::head::HeadGestureConfig;

/// Subject lifecycle settings.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Evict a subject after this long (ms) without a sighting.
    pub lost_timeout_ms: f64,
    /// Start calibration for every new subject and hold gestures until it
    /// completes. When false, gestures run against the seeded baseline.
    pub auto_calibrate: bool,
    /// Face landmarks below this visibility count as missing.
    pub min_visibility: f32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            lost_timeout_ms: 1000.0,
            auto_calibrate: true,
            min_visibility: 0.25,
        }
    }
}

impl RegistryConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.lost_timeout_ms > 0.0,
            "registry.lost_timeout_ms must be positive, got {}",
            self.lost_timeout_ms
        );
        ensure!(
            (0.0..=1.0).contains(&self.min_visibility),
            "registry.min_visibility must be within [0, 1], got {}",
            self.min_visibility
        );
        Ok(())
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub filter: FilterConfig,
    pub calibration: CalibrationConfig,
    pub head: HeadGestureConfig,
    pub hand: HandGestureConfig,
    pub registry: RegistryConfig,
}

impl EngineConfig {
    /// Preset for face poses given in degrees.
    pub fn degrees() -> Self {
        Self {
            filter: FilterConfig::degrees(),
            calibration: CalibrationConfig::degrees(),
            head: HeadGestureConfig::degrees(),
            ..Self::default()
        }
    }

    /// Check every section. Called once at construction; the engine never
    /// revalidates mid-stream.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.filter.validate().context("invalid filter config")?;
        self.calibration
            .validate()
            .context("invalid calibration config")?;
        self.head.validate().context("invalid head gesture config")?;
        self.hand.validate().context("invalid hand gesture config")?;
        self.registry.validate().context("invalid registry config")?;
        Ok(())
    }

    /// Generate s-expression for IPC config.
    pub fn config_sexp(&self) -> String {
        let h = &self.head;
        format!(
            "(:filter (:min-cutoff {:.3} :beta {:.4} :d-cutoff {:.3} :max-velocity {:.2}) \
             :calibration (:still-threshold {:.4} :still-frames {} :capture-frames {} :metric :{}) \
             :head (:yaw (:velocity {:.3} :amplitude {:.3} :window-ms {:.0} :cross-talk {:.3}) \
             :pitch (:velocity {:.3} :amplitude {:.3} :window-ms {:.0} :cross-talk {:.3}) \
             :cross-talk-ratio {:.2} :guard-window-ms {:.0} :refractory-ms {:.0} :hold-frames {} \
             :drift-tau-ms {:.0} :drift-max-velocity {:.3}) \
             :hand (:enabled {} :window-ms {:.0} :min-samples {} :threshold {:.3} :debounce-ms {:.0} :sideways-ratio {:.2}) \
             :registry (:lost-timeout-ms {:.0} :auto-calibrate {} :min-visibility {:.2}))",
            self.filter.min_cutoff,
            self.filter.beta,
            self.filter.d_cutoff,
            self.filter.max_velocity,
            self.calibration.still_threshold,
            self.calibration.still_frames,
            self.calibration.capture_frames,
            self.calibration.metric.as_str(),
            h.yaw.velocity_threshold,
            h.yaw.min_amplitude,
            h.yaw.window_ms,
            h.yaw.cross_talk_limit,
            h.pitch.velocity_threshold,
            h.pitch.min_amplitude,
            h.pitch.window_ms,
            h.pitch.cross_talk_limit,
            h.cross_talk_ratio,
            h.guard_window_ms,
            h.refractory_ms,
            h.velocity_hold_frames,
            h.drift_time_constant_ms,
            h.drift_max_velocity,
            if self.hand.enabled { "t" } else { "nil" },
            self.hand.window_ms,
            self.hand.min_samples,
            self.hand.threshold,
            self.hand.debounce_ms,
            self.hand.max_sideways_ratio,
            self.registry.lost_timeout_ms,
            if self.registry.auto_calibrate { "t" } else { "nil" },
            self.registry.min_visibility,
        )
    }
}
