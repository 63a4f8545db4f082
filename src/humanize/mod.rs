//! Human-like touch gesture synthesis.
//!
//! Turns an intended tap point or swipe path into the raw multi-touch
//! (protocol B) event sequence a real finger could have produced:
//!
//! ```text
//! step 0      TRACKING_ID=id  BTN_TOUCH=1
//! every step  X  Y  PRESSURE  TOUCH_MAJOR  SYN
//! last step   TRACKING_ID=-1  BTN_TOUCH=0  SYN
//! ```
//!
//! Taps get Gaussian aim error with a slight directional bias, a log-normal
//! contact time, a half-sine pressure envelope (soft attack, peak, release)
//! with contact size following pressure, and per-step tremor. Swipes follow
//! a cubic ease-in-out along the path with their own jitter and a roughly
//! flat pressure.
//!
//! Nothing here does I/O. All randomness comes from the caller's
//! [`Sampler`], so a seeded sampler gives reproducible gestures.

pub mod profile;
pub mod sampler;

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rand::Rng;

use crate::input::{abs, key, InputEvent};
use crate::socket::protocol::DeviceInfo;

pub use profile::{DelayDistribution, HumanizerConfig};
pub use sampler::{Sampler, StdSampler};

/// Log-space σ of the tap duration distribution.
const TAP_DURATION_SIGMA: f64 = 0.3;

/// Step bounds for taps.
const TAP_STEPS: (usize, usize) = (5, 30);

/// Step bounds for swipes.
const SWIPE_STEPS: (usize, usize) = (10, 100);

/// Lowest tracking ID handed out; the counter is seeded below 10,000.
const TRACKING_ID_MIN: u32 = 1000;
const TRACKING_ID_SEED_MAX: u32 = 10_000;
/// Largest tracking ID before wrapping back to the minimum.
const TRACKING_ID_MAX: u32 = 65_535;

/// Cubic ease-in-out: slow start, fast middle, slow finish.
pub fn ease_in_out_cubic(t: f64) -> f64 {
    if t < 0.5 {
        4.0 * t * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
    }
}

/// Gesture generator for one behavior profile.
///
/// Shared across connection handlers; the only mutable state is the atomic
/// tracking-ID counter.
#[derive(Debug)]
pub struct Humanizer {
    config: HumanizerConfig,
    next_tracking_id: AtomicU32,
}

impl Humanizer {
    /// Humanizer with a randomly seeded tracking-ID counter.
    pub fn new(config: HumanizerConfig) -> Self {
        let start = rand::rng().random_range(TRACKING_ID_MIN..TRACKING_ID_SEED_MAX);
        Self::with_tracking_start(config, start)
    }

    /// Humanizer whose first tracking ID is `start`.
    pub fn with_tracking_start(config: HumanizerConfig, start: u32) -> Self {
        Self {
            config,
            next_tracking_id: AtomicU32::new(start.clamp(TRACKING_ID_MIN, TRACKING_ID_MAX)),
        }
    }

    /// Active parameters.
    pub fn config(&self) -> &HumanizerConfig {
        &self.config
    }

    /// Fixed interval between event packets.
    pub fn event_interval(&self) -> Duration {
        Duration::from_millis(self.config.event_interval_ms)
    }

    /// Next tracking ID, wrapping from 65535 back to 1000.
    pub fn next_tracking_id(&self) -> i32 {
        let previous = self
            .next_tracking_id
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| {
                Some(if id >= TRACKING_ID_MAX { TRACKING_ID_MIN } else { id + 1 })
            })
            .unwrap_or(TRACKING_ID_MIN);
        previous as i32
    }

    /// Humanized tap at screen point `(x, y)` on an element `element_size`
    /// pixels across.
    pub fn generate_tap(
        &self,
        sampler: &mut dyn Sampler,
        x: i32,
        y: i32,
        element_size: f64,
        device: &DeviceInfo,
    ) -> Vec<InputEvent> {
        let cfg = &self.config;
        let axes = Axes::new(device);

        // Aim error, clamped to the element's bounding box.
        let half = (element_size / 2.0).max(0.0);
        let sigma = element_size.max(0.0) / cfg.jitter_sigma_factor;
        let (cx, cy) = (f64::from(x), f64::from(y));
        let aim_x = (cx + sampler.normal(0.0, sigma) + cfg.jitter_bias_x).clamp(cx - half, cx + half);
        let aim_y = (cy + sampler.normal(0.0, sigma) + cfg.jitter_bias_y).clamp(cy - half, cy + half);

        let duration = sampler
            .log_normal(cfg.tap_duration_mode_ms, TAP_DURATION_SIGMA)
            .max(cfg.tap_duration_min_ms)
            .min(cfg.tap_duration_max_ms);
        let steps = step_count(duration, cfg.event_interval_ms, TAP_STEPS);

        let max_p = f64::from(device.max_pressure.max(0));
        let min_p = cfg.min_pressure * max_p;
        let peak_p = sampler.uniform_range(cfg.peak_pressure_min, cfg.peak_pressure_max) * max_p;
        let peak_p = peak_p.max(min_p);

        let tracking_id = self.next_tracking_id();
        let mut events = Vec::with_capacity(steps * 5 + 5);

        for i in 0..steps {
            let t = i as f64 / (steps - 1) as f64;

            let envelope = min_p + (peak_p - min_p) * (std::f64::consts::PI * t).sin();
            let pressure = (envelope + sampler.normal(0.0, cfg.pressure_noise * max_p)).clamp(min_p, peak_p);
            let normalized = if peak_p > min_p {
                (pressure - min_p) / (peak_p - min_p)
            } else {
                0.0
            };
            let touch_major = self.touch_major(sampler, normalized, device);

            let tremor_x = sampler.normal(0.0, cfg.micro_movement_radius);
            let tremor_y = sampler.normal(0.0, cfg.micro_movement_radius);

            if i == 0 {
                push_touch_down(&mut events, tracking_id);
            }
            push_contact(
                &mut events,
                axes.x(aim_x + tremor_x),
                axes.y(aim_y + tremor_y),
                pressure.round() as i32,
                touch_major,
            );
            if i == steps - 1 {
                push_touch_up(&mut events);
            }
        }

        events
    }

    /// Humanized swipe along `points` (screen coordinates) over
    /// `duration_ms`.
    ///
    /// The first and last points are jittered; intermediate points are
    /// followed as given. Progress along the path is measured by arc length
    /// and eased with [`ease_in_out_cubic`]. Returns no events for an empty
    /// path.
    pub fn generate_swipe(
        &self,
        sampler: &mut dyn Sampler,
        points: &[(i32, i32)],
        duration_ms: i64,
        device: &DeviceInfo,
    ) -> Vec<InputEvent> {
        let cfg = &self.config;
        if points.is_empty() {
            return Vec::new();
        }
        let axes = Axes::new(device);

        let mut path: Vec<(f64, f64)> = points
            .iter()
            .map(|&(x, y)| (f64::from(x), f64::from(y)))
            .collect();
        let last = path.len() - 1;
        for idx in [0, last] {
            path[idx].0 += sampler.normal(0.0, cfg.swipe_endpoint_jitter);
            path[idx].1 += sampler.normal(0.0, cfg.swipe_endpoint_jitter);
        }
        let path = Polyline::new(path);

        let steps = step_count(duration_ms.max(0) as f64, cfg.event_interval_ms, SWIPE_STEPS);

        let max_p = f64::from(device.max_pressure.max(0));
        let base_p = cfg.swipe_pressure * max_p;
        let floor_p = cfg.min_pressure * max_p;

        let tracking_id = self.next_tracking_id();
        let mut events = Vec::with_capacity(steps * 5 + 5);

        for i in 0..steps {
            let t = i as f64 / (steps - 1) as f64;
            let (px, py) = path.at(ease_in_out_cubic(t));
            let jx = sampler.normal(0.0, cfg.swipe_micro_jitter);
            let jy = sampler.normal(0.0, cfg.swipe_micro_jitter);

            let pressure = (base_p + sampler.normal(0.0, cfg.swipe_pressure_noise * max_p)).clamp(floor_p, max_p);
            let normalized = if max_p > 0.0 { pressure / max_p } else { 0.0 };
            let touch_major = self.touch_major(sampler, normalized, device);

            if i == 0 {
                push_touch_down(&mut events, tracking_id);
            }
            push_contact(
                &mut events,
                axes.x(px + jx),
                axes.y(py + jy),
                pressure.round() as i32,
                touch_major,
            );
            if i == steps - 1 {
                push_touch_up(&mut events);
            }
        }

        events
    }

    /// Reaction time to wait before performing an action.
    pub fn pre_action_delay(&self, sampler: &mut dyn Sampler) -> Duration {
        sample_delay(sampler, &self.config.pre_action_delay)
    }

    /// Settling time to wait after performing an action.
    pub fn post_action_delay(&self, sampler: &mut dyn Sampler) -> Duration {
        sample_delay(sampler, &self.config.post_action_delay)
    }

    /// Contact size for a normalized pressure in `[0, 1]`.
    fn touch_major(&self, sampler: &mut dyn Sampler, normalized: f64, device: &DeviceInfo) -> i32 {
        let cfg = &self.config;
        let max_tm = f64::from(device.max_touch_major.max(0));
        let fraction = cfg.touch_major_min + (cfg.touch_major_max - cfg.touch_major_min) * normalized;
        let value = fraction * max_tm + sampler.normal(0.0, cfg.touch_major_noise * max_tm);
        value.clamp(0.0, max_tm).round() as i32
    }
}

fn sample_delay(sampler: &mut dyn Sampler, dist: &DelayDistribution) -> Duration {
    let ms = sampler
        .log_normal(dist.mode_ms, dist.sigma)
        .max(dist.min_ms)
        .min(dist.max_ms);
    Duration::from_secs_f64(ms.max(0.0) / 1000.0)
}

fn step_count(duration_ms: f64, interval_ms: u64, (min, max): (usize, usize)) -> usize {
    let raw = (duration_ms / interval_ms.max(1) as f64).round();
    (raw.max(0.0) as usize).clamp(min, max)
}

fn push_touch_down(events: &mut Vec<InputEvent>, tracking_id: i32) {
    events.push(InputEvent::abs(abs::MT_TRACKING_ID, tracking_id));
    events.push(InputEvent::key(key::BTN_TOUCH, true));
}

fn push_contact(events: &mut Vec<InputEvent>, x: i32, y: i32, pressure: i32, touch_major: i32) {
    events.push(InputEvent::abs(abs::MT_POSITION_X, x));
    events.push(InputEvent::abs(abs::MT_POSITION_Y, y));
    events.push(InputEvent::abs(abs::MT_PRESSURE, pressure));
    events.push(InputEvent::abs(abs::MT_TOUCH_MAJOR, touch_major));
    events.push(InputEvent::syn());
}

fn push_touch_up(events: &mut Vec<InputEvent>) {
    events.push(InputEvent::abs(abs::MT_TRACKING_ID, -1));
    events.push(InputEvent::key(key::BTN_TOUCH, false));
    events.push(InputEvent::syn());
}

/// Screen-to-device coordinate mapping, clamped to the axis range.
#[derive(Debug, Clone, Copy)]
struct Axes {
    scale_x: f64,
    scale_y: f64,
    max_x: f64,
    max_y: f64,
}

impl Axes {
    fn new(device: &DeviceInfo) -> Self {
        let scale = |max: i32, screen: i32| {
            if screen > 1 && max > 0 {
                f64::from(max) / f64::from(screen - 1)
            } else {
                1.0
            }
        };
        Self {
            scale_x: scale(device.max_x, device.screen_width),
            scale_y: scale(device.max_y, device.screen_height),
            max_x: f64::from(device.max_x.max(0)),
            max_y: f64::from(device.max_y.max(0)),
        }
    }

    fn x(&self, screen_x: f64) -> i32 {
        (screen_x * self.scale_x).clamp(0.0, self.max_x).round() as i32
    }

    fn y(&self, screen_y: f64) -> i32 {
        (screen_y * self.scale_y).clamp(0.0, self.max_y).round() as i32
    }
}

/// Path through points, addressable by fraction of total length.
#[derive(Debug)]
struct Polyline {
    points: Vec<(f64, f64)>,
    /// Cumulative length at each point; `cumulative[0] == 0`.
    cumulative: Vec<f64>,
}

impl Polyline {
    fn new(points: Vec<(f64, f64)>) -> Self {
        let mut cumulative = Vec::with_capacity(points.len());
        let mut total = 0.0;
        cumulative.push(0.0);
        for pair in points.windows(2) {
            total += (pair[1].0 - pair[0].0).hypot(pair[1].1 - pair[0].1);
            cumulative.push(total);
        }
        Self { points, cumulative }
    }

    fn total(&self) -> f64 {
        self.cumulative.last().copied().unwrap_or(0.0)
    }

    /// Point at `fraction` of the total length.
    fn at(&self, fraction: f64) -> (f64, f64) {
        let total = self.total();
        if self.points.len() == 1 || total <= 0.0 {
            return self.points[0];
        }
        let target = fraction.clamp(0.0, 1.0) * total;
        // First segment whose end reaches the target.
        let seg = self
            .cumulative
            .iter()
            .skip(1)
            .position(|&c| c >= target)
            .unwrap_or(self.points.len() - 2);
        let (start, end) = (self.points[seg], self.points[seg + 1]);
        let seg_len = self.cumulative[seg + 1] - self.cumulative[seg];
        let local = if seg_len > 0.0 {
            (target - self.cumulative[seg]) / seg_len
        } else {
            0.0
        };
        (
            start.0 + (end.0 - start.0) * local,
            start.1 + (end.1 - start.1) * local,
        )
    }
}
