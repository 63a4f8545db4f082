//! The single source of randomness for gesture synthesis.
//!
//! Every distribution the humanizer uses (jitter, pressure noise, log-normal
//! durations and delays) is a location/scale transform of one standard
//! Gaussian produced here by the Box–Muller transform.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Uniform and Gaussian draws for the humanizer.
///
/// Implementations only provide [`Sampler::uniform`]; the Gaussian and the
/// derived distributions have default implementations.
pub trait Sampler: Send {
    /// Uniform draw in `[0, 1)`.
    fn uniform(&mut self) -> f64;

    /// Standard normal draw via Box–Muller over two uniform draws.
    fn gaussian(&mut self) -> f64 {
        let (z0, _) = box_muller(self.uniform(), self.uniform());
        z0
    }

    /// Normal draw with the given mean and standard deviation.
    fn normal(&mut self, mean: f64, std_dev: f64) -> f64 {
        mean + std_dev * self.gaussian()
    }

    /// Log-normal draw parameterized by its mode.
    ///
    /// For `ln X ~ N(μ, σ²)` the mode is `exp(μ − σ²)`, so `μ = ln(mode) + σ²`.
    fn log_normal(&mut self, mode: f64, sigma: f64) -> f64 {
        let mu = mode.max(f64::MIN_POSITIVE).ln() + sigma * sigma;
        (mu + sigma * self.gaussian()).exp()
    }

    /// Uniform draw in `[low, high)`.
    fn uniform_range(&mut self, low: f64, high: f64) -> f64 {
        low + (high - low) * self.uniform()
    }
}

/// Box–Muller transform: two uniforms in `[0, 1)` to two independent
/// standard normals.
pub fn box_muller(u1: f64, u2: f64) -> (f64, f64) {
    // ln(0) is undefined; shift u1 into (0, 1].
    let radius = (-2.0 * (1.0 - u1).ln()).sqrt();
    let theta = std::f64::consts::TAU * u2;
    (radius * theta.cos(), radius * theta.sin())
}

/// Sampler over `StdRng`, caching the second Box–Muller output.
#[derive(Debug)]
pub struct StdSampler {
    rng: StdRng,
    spare: Option<f64>,
}

impl StdSampler {
    /// Seeded from the operating system.
    pub fn from_os_rng() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
            spare: None,
        }
    }

    /// Deterministic sampler for tests and reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            spare: None,
        }
    }
}

impl Sampler for StdSampler {
    fn uniform(&mut self) -> f64 {
        self.rng.random::<f64>()
    }

    fn gaussian(&mut self) -> f64 {
        if let Some(z) = self.spare.take() {
            return z;
        }
        let u1 = self.uniform();
        let u2 = self.uniform();
        let (z0, z1) = box_muller(u1, u2);
        self.spare = Some(z1);
        z0
    }
}

/// Sampler with no variance: every Gaussian is 0, every uniform is 0.5.
///
/// Makes gesture shapes exactly predictable in tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct FlatSampler;

#[cfg(test)]
impl Sampler for FlatSampler {
    fn uniform(&mut self) -> f64 {
        0.5
    }

    fn gaussian(&mut self) -> f64 {
        0.0
    }
}
