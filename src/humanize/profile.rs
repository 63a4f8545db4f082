//! Distribution parameters for gesture synthesis.
//!
//! Pressure and contact-size values are fractions of the device's axis
//! maximum so one profile fits any device; positional values are in screen
//! pixels.

use serde::Deserialize;

/// A log-normal delay distribution, clamped to bounds.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct DelayDistribution {
    /// Most likely delay.
    pub mode_ms: f64,
    /// Log-space standard deviation.
    pub sigma: f64,
    /// Lower clamp.
    pub min_ms: f64,
    /// Upper clamp.
    pub max_ms: f64,
}

/// Parameters for one humanizer instance.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HumanizerConfig {
    /// Time between consecutive event packets.
    pub event_interval_ms: u64,

    /// Tap jitter σ is `element_size / jitter_sigma_factor`.
    pub jitter_sigma_factor: f64,
    /// Constant horizontal bias added to tap jitter.
    pub jitter_bias_x: f64,
    /// Constant vertical bias added to tap jitter (fingers land low).
    pub jitter_bias_y: f64,

    /// Contact pressure at touch-down and release.
    pub min_pressure: f64,
    /// Lower bound of the per-tap peak pressure.
    pub peak_pressure_min: f64,
    /// Upper bound of the per-tap peak pressure.
    pub peak_pressure_max: f64,
    /// σ of per-step pressure noise.
    pub pressure_noise: f64,

    /// Most likely tap contact duration.
    pub tap_duration_mode_ms: f64,
    /// Shortest tap contact duration.
    pub tap_duration_min_ms: f64,
    /// Longest tap contact duration.
    pub tap_duration_max_ms: f64,

    /// Touch major at minimum pressure.
    pub touch_major_min: f64,
    /// Touch major at peak pressure.
    pub touch_major_max: f64,
    /// σ of per-step touch-major noise.
    pub touch_major_noise: f64,

    /// σ of per-step finger tremor during a tap.
    pub micro_movement_radius: f64,

    /// σ of swipe start/end point jitter.
    pub swipe_endpoint_jitter: f64,
    /// σ of per-step swipe path jitter.
    pub swipe_micro_jitter: f64,
    /// Nominal swipe pressure.
    pub swipe_pressure: f64,
    /// σ of per-step swipe pressure noise.
    pub swipe_pressure_noise: f64,

    /// Reaction time before an action.
    pub pre_action_delay: DelayDistribution,
    /// Settling time after an action.
    pub post_action_delay: DelayDistribution,
}

impl Default for HumanizerConfig {
    fn default() -> Self {
        Self {
            event_interval_ms: 8,
            jitter_sigma_factor: 6.0,
            jitter_bias_x: 0.0,
            jitter_bias_y: 1.5,
            min_pressure: 0.15,
            peak_pressure_min: 0.45,
            peak_pressure_max: 0.75,
            pressure_noise: 0.02,
            tap_duration_mode_ms: 85.0,
            tap_duration_min_ms: 45.0,
            tap_duration_max_ms: 180.0,
            touch_major_min: 0.15,
            touch_major_max: 0.35,
            touch_major_noise: 0.02,
            micro_movement_radius: 0.6,
            swipe_endpoint_jitter: 6.0,
            swipe_micro_jitter: 1.2,
            swipe_pressure: 0.5,
            swipe_pressure_noise: 0.03,
            pre_action_delay: DelayDistribution {
                mode_ms: 180.0,
                sigma: 0.35,
                min_ms: 80.0,
                max_ms: 600.0,
            },
            post_action_delay: DelayDistribution {
                mode_ms: 250.0,
                sigma: 0.45,
                min_ms: 100.0,
                max_ms: 1200.0,
            },
        }
    }
}

impl HumanizerConfig {
    /// Quick, light touches and short pauses.
    pub fn brisk() -> Self {
        Self {
            jitter_sigma_factor: 5.0,
            peak_pressure_min: 0.35,
            peak_pressure_max: 0.6,
            tap_duration_mode_ms: 60.0,
            tap_duration_min_ms: 40.0,
            tap_duration_max_ms: 120.0,
            pre_action_delay: DelayDistribution {
                mode_ms: 120.0,
                sigma: 0.3,
                min_ms: 60.0,
                max_ms: 350.0,
            },
            post_action_delay: DelayDistribution {
                mode_ms: 150.0,
                sigma: 0.35,
                min_ms: 60.0,
                max_ms: 600.0,
            },
            ..Self::default()
        }
    }

    /// Slow, firm, accurate touches.
    pub fn deliberate() -> Self {
        Self {
            jitter_sigma_factor: 8.0,
            peak_pressure_min: 0.55,
            peak_pressure_max: 0.85,
            tap_duration_mode_ms: 120.0,
            tap_duration_min_ms: 70.0,
            tap_duration_max_ms: 240.0,
            micro_movement_radius: 0.4,
            pre_action_delay: DelayDistribution {
                mode_ms: 320.0,
                sigma: 0.4,
                min_ms: 150.0,
                max_ms: 1200.0,
            },
            post_action_delay: DelayDistribution {
                mode_ms: 450.0,
                sigma: 0.45,
                min_ms: 200.0,
                max_ms: 2000.0,
            },
            ..Self::default()
        }
    }

    /// Look up a named profile (`default`, `brisk`, `deliberate`).
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "default" => Some(Self::default()),
            "brisk" => Some(Self::brisk()),
            "deliberate" => Some(Self::deliberate()),
            _ => None,
        }
    }

    /// Names accepted by [`HumanizerConfig::by_name`].
    pub const PROFILE_NAMES: &'static [&'static str] = &["default", "brisk", "deliberate"];
}
