//! One-Euro adaptive low-pass filter and per-axis signal conditioning.
//!
//! The filter trades jitter against lag by raising its cutoff frequency
//! with the estimated speed of the signal: slow drift is smoothed hard,
//! deliberate fast motion passes through with little delay.
//!
//! `AxisSignal` wraps one filter with the per-frame plumbing every head
//! axis needs: holding the last raw value when a landmark is missing,
//! slew-limiting detector glitches, and deriving a clamped velocity.

use anyhow::ensure;

/// Frame interval used when a caller supplies a non-positive or
/// non-finite timestamp delta.
pub const NOMINAL_DT_S: f64 = 1.0 / 60.0;

// ── Config ─────────────────────────────────────────────────

/// One-Euro filter and conditioning parameters.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Minimum cutoff frequency (Hz) applied to a still signal.
    pub min_cutoff: f64,
    /// Speed coefficient: cutoff grows by `beta * |derivative|`.
    pub beta: f64,
    /// Cutoff frequency (Hz) of the derivative low-pass.
    pub d_cutoff: f64,
    /// Largest plausible axis speed (units/s). Raw steps are slew-limited
    /// to this and derived velocities are clamped to it.
    pub max_velocity: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_cutoff: 1.0,
            beta: 0.5,
            d_cutoff: 1.0,
            max_velocity: 2.0,
        }
    }
}

impl FilterConfig {
    /// Preset for pose input expressed in degrees.
    pub fn degrees() -> Self {
        Self {
            min_cutoff: 1.0,
            beta: 0.005,
            d_cutoff: 1.0,
            max_velocity: 200.0,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.min_cutoff > 0.0 && self.min_cutoff.is_finite(),
            "filter.min_cutoff must be positive, got {}",
            self.min_cutoff
        );
        ensure!(
            self.beta >= 0.0 && self.beta.is_finite(),
            "filter.beta must be non-negative, got {}",
            self.beta
        );
        ensure!(
            self.d_cutoff > 0.0 && self.d_cutoff.is_finite(),
            "filter.d_cutoff must be positive, got {}",
            self.d_cutoff
        );
        ensure!(
            self.max_velocity > 0.0,
            "filter.max_velocity must be positive, got {}",
            self.max_velocity
        );
        Ok(())
    }
}

/// Seconds between two millisecond timestamps, falling back to
/// [`NOMINAL_DT_S`] when the interval is unusable.
pub fn interval_s(prev_ms: f64, now_ms: f64) -> f64 {
    let dt = (now_ms - prev_ms) / 1000.0;
    if dt > 0.0 && dt.is_finite() {
        dt
    } else {
        NOMINAL_DT_S
    }
}

/// Last usable frame timestamp.
///
/// A non-finite timestamp is replaced by the previous one advanced by
/// [`NOMINAL_DT_S`], so time-bounded buffers only ever hold comparable
/// times.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameClock {
    last_ms: Option<f64>,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Usable timestamp (ms) for a frame stamped `now_ms`.
    pub fn tick(&mut self, now_ms: f64) -> f64 {
        let t = if now_ms.is_finite() {
            now_ms
        } else {
            self.last_ms
                .map_or(0.0, |last| last + NOMINAL_DT_S * 1000.0)
        };
        self.last_ms = Some(t);
        t
    }
}

/// Exponential smoothing factor for a cutoff frequency at a sampling period.
fn smoothing_factor(dt_s: f64, cutoff_hz: f64) -> f64 {
    let r = 2.0 * std::f64::consts::PI * cutoff_hz * dt_s;
    r / (r + 1.0)
}

// ── One-Euro filter ────────────────────────────────────────

/// Single-channel One-Euro filter.
#[derive(Debug, Clone, Default)]
pub struct OneEuroFilter {
    x_prev: Option<f64>,
    dx_prev: f64,
    t_prev_ms: f64,
}

impl OneEuroFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter one sample. The first sample seeds the state and is returned
    /// unchanged.
    pub fn update(&mut self, config: &FilterConfig, x: f64, timestamp_ms: f64) -> f64 {
        let x_prev = match self.x_prev {
            Some(prev) => prev,
            None => {
                if !x.is_finite() {
                    return x;
                }
                self.x_prev = Some(x);
                self.t_prev_ms = timestamp_ms;
                return x;
            }
        };
        if !x.is_finite() {
            return x_prev;
        }

        let dt = interval_s(self.t_prev_ms, timestamp_ms);
        if timestamp_ms.is_finite() {
            self.t_prev_ms = timestamp_ms;
        }

        let a_d = smoothing_factor(dt, config.d_cutoff);
        let dx = (x - x_prev) / dt;
        let dx_hat = a_d * dx + (1.0 - a_d) * self.dx_prev;

        let cutoff = config.min_cutoff + config.beta * dx_hat.abs();
        let a = smoothing_factor(dt, cutoff);
        let x_hat = a * x + (1.0 - a) * x_prev;

        self.x_prev = Some(x_hat);
        self.dx_prev = dx_hat;
        x_hat
    }

    /// Last filtered value, if seeded.
    pub fn value(&self) -> Option<f64> {
        self.x_prev
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ── Axis conditioning ──────────────────────────────────────

/// Smoothed value and velocity of one axis for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisReading {
    pub value: f64,
    /// Clamped to `±max_velocity`.
    pub velocity: f64,
}

/// Conditioned signal for a single pose axis.
#[derive(Debug, Clone)]
pub struct AxisSignal {
    filter: OneEuroFilter,
    /// Last accepted (slew-limited) raw value.
    raw: f64,
    /// Last smoothed value.
    value: f64,
    velocity: f64,
    t_prev_ms: f64,
}

impl AxisSignal {
    /// Seed from the first raw sample of a subject.
    pub fn new(config: &FilterConfig, raw: f64, timestamp_ms: f64) -> Self {
        let mut filter = OneEuroFilter::new();
        let value = filter.update(config, raw, timestamp_ms);
        Self {
            filter,
            raw,
            value,
            velocity: 0.0,
            t_prev_ms: timestamp_ms,
        }
    }

    /// Feed one frame. `None` (missing or low-visibility landmark) holds the
    /// previous raw value so the axis keeps decaying smoothly instead of
    /// jumping.
    pub fn update(
        &mut self,
        config: &FilterConfig,
        raw: Option<f64>,
        timestamp_ms: f64,
    ) -> AxisReading {
        let dt = interval_s(self.t_prev_ms, timestamp_ms);
        if timestamp_ms.is_finite() {
            self.t_prev_ms = timestamp_ms;
        }

        let limit = config.max_velocity * dt;
        if let Some(raw) = raw.filter(|r| r.is_finite()) {
            self.raw += (raw - self.raw).clamp(-limit, limit);
        }

        let smoothed = self.filter.update(config, self.raw, timestamp_ms);
        self.velocity =
            ((smoothed - self.value) / dt).clamp(-config.max_velocity, config.max_velocity);
        self.value = smoothed;

        AxisReading {
            value: self.value,
            velocity: self.velocity,
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn velocity(&self) -> f64 {
        self.velocity
    }
}
