//! Second-order IIR filter model
//!
//! Maps a [`FilterSpec`] onto normalized biquad coefficients using the RBJ
//! Audio-EQ-Cookbook formulas, and runs those coefficients over samples with a
//! two-variable transposed direct form II state.
//!
//! Coefficients and filter state are kept in `f64`: low corners at high sample
//! rates put the poles within a few ulps of `z = 1` in `f32`, where rounding
//! alone makes the filter unstable. Samples stay `f32`. Every parameter is
//! clamped into its valid range before design, and a design that still comes
//! out non-finite or unstable is replaced by the identity filter.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::warn;

/// Parameter constraints for EQ bands
///
/// All parameters are clamped to these ranges to prevent
/// invalid states and ensure numerical stability.
pub mod params {
    /// Audible range covered by the editor graph (Hz)
    pub const MIN_FREQUENCY_HZ: f32 = 20.0;
    pub const MAX_FREQUENCY_HZ: f32 = 20000.0;

    /// Display range of the editor graph (dB)
    pub const MIN_GAIN_DB: f32 = -24.0;
    pub const MAX_GAIN_DB: f32 = 24.0;

    /// Hard storage limit for band gain (dB)
    pub const GAIN_LIMIT_DB: f32 = 60.0;

    /// Q factor range
    pub const MIN_Q: f32 = 0.025;
    pub const MAX_Q: f32 = 40.0;

    /// Lowest corner frequency handed to a filter design (Hz)
    pub const FREQUENCY_FLOOR_HZ: f32 = 1.0;

    /// Highest corner frequency as a fraction of the sample rate
    pub const NYQUIST_FRACTION: f64 = 0.49;

    pub const DEFAULT_FREQUENCY_HZ: f32 = 1000.0;
    pub const DEFAULT_GAIN_DB: f32 = 0.0;
    pub const DEFAULT_Q: f32 = 1.0;
    pub const DEFAULT_SAMPLE_RATE: f64 = 44100.0;
}

/// Shape of a single EQ band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FilterType {
    LowShelf,
    HighShelf,
    #[default]
    Peak,
    Notch,
    LowPass,
    HighPass,
}

impl FilterType {
    pub const ALL: [FilterType; 6] = [
        FilterType::LowShelf,
        FilterType::HighShelf,
        FilterType::Peak,
        FilterType::Notch,
        FilterType::LowPass,
        FilterType::HighPass,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FilterType::LowShelf => "Low Shelf",
            FilterType::HighShelf => "High Shelf",
            FilterType::Peak => "Peak",
            FilterType::Notch => "Notch",
            FilterType::LowPass => "Low Pass",
            FilterType::HighPass => "High Pass",
        }
    }

    /// Whether the gain parameter changes the realized filter
    pub fn uses_gain(&self) -> bool {
        matches!(
            self,
            FilterType::LowShelf | FilterType::HighShelf | FilterType::Peak
        )
    }
}

/// Complete parameter set of one band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(rename = "type")]
    pub kind: FilterType,
    pub frequency_hz: f32,
    pub gain_db: f32,
    pub q: f32,
    pub sample_rate_hz: f64,
}

impl Default for FilterSpec {
    fn default() -> Self {
        Self {
            kind: FilterType::Peak,
            frequency_hz: params::DEFAULT_FREQUENCY_HZ,
            gain_db: params::DEFAULT_GAIN_DB,
            q: params::DEFAULT_Q,
            sample_rate_hz: params::DEFAULT_SAMPLE_RATE,
        }
    }
}

impl FilterSpec {
    /// Build a spec with every field clamped into its valid range
    pub fn new(kind: FilterType, frequency_hz: f32, gain_db: f32, q: f32, sample_rate_hz: f64) -> Self {
        Self {
            kind,
            frequency_hz,
            gain_db,
            q,
            sample_rate_hz,
        }
        .sanitized()
    }

    /// Clamp every field into its valid range
    #[must_use]
    pub fn sanitized(self) -> Self {
        let sample_rate_hz = sanitize_sample_rate(self.sample_rate_hz);
        Self {
            kind: self.kind,
            frequency_hz: sanitize_frequency(self.frequency_hz, sample_rate_hz),
            gain_db: sanitize_gain(self.gain_db),
            q: sanitize_q(self.q),
            sample_rate_hz,
        }
    }

    /// Design the biquad for this spec
    pub fn coefficients(&self) -> BiquadCoeffs {
        BiquadCoeffs::design(self)
    }
}

/// Highest frequency a filter may be tuned to at this sample rate
pub fn max_frequency_for(sample_rate_hz: f64) -> f32 {
    (sample_rate_hz * params::NYQUIST_FRACTION) as f32
}

/// Clamp a corner frequency into `(0, sample_rate / 2)`
pub fn sanitize_frequency(frequency_hz: f32, sample_rate_hz: f64) -> f32 {
    let upper = max_frequency_for(sample_rate_hz).max(params::FREQUENCY_FLOOR_HZ);
    if frequency_hz.is_nan() {
        warn!("NaN frequency replaced by default");
        return params::DEFAULT_FREQUENCY_HZ.clamp(params::FREQUENCY_FLOOR_HZ, upper);
    }
    frequency_hz.clamp(params::FREQUENCY_FLOOR_HZ, upper)
}

/// Clamp a gain into the storage limit
pub fn sanitize_gain(gain_db: f32) -> f32 {
    if gain_db.is_nan() {
        warn!("NaN gain replaced by 0 dB");
        return params::DEFAULT_GAIN_DB;
    }
    gain_db.clamp(-params::GAIN_LIMIT_DB, params::GAIN_LIMIT_DB)
}

/// Clamp Q strictly above zero
pub fn sanitize_q(q: f32) -> f32 {
    if q.is_nan() {
        warn!("NaN Q replaced by default");
        return params::DEFAULT_Q;
    }
    q.clamp(params::MIN_Q, params::MAX_Q)
}

/// Replace an unusable sample rate by the default one
pub fn sanitize_sample_rate(sample_rate_hz: f64) -> f64 {
    if sample_rate_hz.is_finite() && sample_rate_hz > 0.0 {
        sample_rate_hz
    } else {
        warn!(sample_rate_hz, "Invalid sample rate replaced by default");
        params::DEFAULT_SAMPLE_RATE
    }
}

/// Biquad filter coefficients
///
/// Denominator is normalized so that `a0 == 1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BiquadCoeffs {
    /// Numerator coefficients
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    /// Denominator coefficients (a0 is normalized to 1.0)
    pub a1: f64,
    pub a2: f64,
}

impl Default for BiquadCoeffs {
    fn default() -> Self {
        Self::identity()
    }
}

impl BiquadCoeffs {
    /// Unity gain (no filtering)
    pub const fn identity() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }

    /// Design coefficients for any filter type
    ///
    /// Parameters are sanitized first, so this never fails.
    #[must_use]
    pub fn design(spec: &FilterSpec) -> Self {
        let spec = spec.sanitized();
        let coeffs = Self::cookbook(&spec);

        if coeffs.is_finite() && coeffs.is_stable() {
            coeffs
        } else {
            warn!(?spec, ?coeffs, "Unusable biquad design, falling back to identity");
            Self::identity()
        }
    }

    /// Cookbook formula for the spec's type, without any fallback
    fn cookbook(spec: &FilterSpec) -> Self {
        let sr = spec.sample_rate_hz;
        let freq = f64::from(spec.frequency_hz);
        let gain = f64::from(spec.gain_db);
        let q = f64::from(spec.q);

        match spec.kind {
            FilterType::LowShelf => Self::low_shelf(sr, freq, gain, q),
            FilterType::HighShelf => Self::high_shelf(sr, freq, gain, q),
            FilterType::Peak => Self::peaking(sr, freq, gain, q),
            FilterType::Notch => Self::notch(sr, freq, q),
            FilterType::LowPass => Self::low_pass(sr, freq, q),
            FilterType::HighPass => Self::high_pass(sr, freq, q),
        }
    }

    /// Calculate coefficients for a low shelf filter
    ///
    /// Boosts or cuts frequencies below the corner frequency.
    #[must_use]
    pub fn low_shelf(sample_rate: f64, freq: f64, gain_db: f64, q: f64) -> Self {
        let a = 10.0_f64.powf(gain_db / 40.0);
        let (cos_w0, alpha) = angular(sample_rate, freq, q);
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        Self::normalized(
            a * ((a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
            2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0),
            a * ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
            (a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
            -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0),
            (a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
        )
    }

    /// Calculate coefficients for a high shelf filter
    ///
    /// Boosts or cuts frequencies above the corner frequency.
    #[must_use]
    pub fn high_shelf(sample_rate: f64, freq: f64, gain_db: f64, q: f64) -> Self {
        let a = 10.0_f64.powf(gain_db / 40.0);
        let (cos_w0, alpha) = angular(sample_rate, freq, q);
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        Self::normalized(
            a * ((a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
            -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0),
            a * ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
            (a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
            2.0 * ((a - 1.0) - (a + 1.0) * cos_w0),
            (a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
        )
    }

    /// Calculate coefficients for a peaking EQ filter
    ///
    /// Boosts or cuts frequencies around a center frequency.
    #[must_use]
    pub fn peaking(sample_rate: f64, freq: f64, gain_db: f64, q: f64) -> Self {
        let a = 10.0_f64.powf(gain_db / 40.0);
        let (cos_w0, alpha) = angular(sample_rate, freq, q);

        Self::normalized(
            1.0 + alpha * a,
            -2.0 * cos_w0,
            1.0 - alpha * a,
            1.0 + alpha / a,
            -2.0 * cos_w0,
            1.0 - alpha / a,
        )
    }

    /// Calculate coefficients for a notch filter
    #[must_use]
    pub fn notch(sample_rate: f64, freq: f64, q: f64) -> Self {
        let (cos_w0, alpha) = angular(sample_rate, freq, q);

        Self::normalized(
            1.0,
            -2.0 * cos_w0,
            1.0,
            1.0 + alpha,
            -2.0 * cos_w0,
            1.0 - alpha,
        )
    }

    /// Calculate coefficients for a resonant low pass filter
    #[must_use]
    pub fn low_pass(sample_rate: f64, freq: f64, q: f64) -> Self {
        let (cos_w0, alpha) = angular(sample_rate, freq, q);

        Self::normalized(
            (1.0 - cos_w0) / 2.0,
            1.0 - cos_w0,
            (1.0 - cos_w0) / 2.0,
            1.0 + alpha,
            -2.0 * cos_w0,
            1.0 - alpha,
        )
    }

    /// Calculate coefficients for a resonant high pass filter
    #[must_use]
    pub fn high_pass(sample_rate: f64, freq: f64, q: f64) -> Self {
        let (cos_w0, alpha) = angular(sample_rate, freq, q);

        Self::normalized(
            (1.0 + cos_w0) / 2.0,
            -(1.0 + cos_w0),
            (1.0 + cos_w0) / 2.0,
            1.0 + alpha,
            -2.0 * cos_w0,
            1.0 - alpha,
        )
    }

    fn normalized(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> Self {
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    pub fn is_finite(&self) -> bool {
        [self.b0, self.b1, self.b2, self.a1, self.a2]
            .iter()
            .all(|c| c.is_finite())
    }

    /// Both poles strictly inside the unit circle (stability triangle)
    pub fn is_stable(&self) -> bool {
        self.a2.abs() < 1.0 && self.a1.abs() < 1.0 + self.a2
    }

    /// Exact magnitude of the realized filter in dB
    ///
    /// Evaluates `H(z)` on the unit circle. The editor curve does not use this;
    /// it draws the analytic estimate from `EqBand::estimate_response_db`.
    pub fn magnitude_db(&self, frequency_hz: f64, sample_rate_hz: f64) -> f64 {
        let w = 2.0 * PI * frequency_hz / sample_rate_hz;
        let z1 = Complex64::from_polar(1.0, -w);
        let z2 = z1 * z1;

        let num = Complex64::new(self.b0, 0.0) + z1 * self.b1 + z2 * self.b2;
        let den = Complex64::new(1.0, 0.0) + z1 * self.a1 + z2 * self.a2;

        20.0 * (num.norm() / den.norm()).max(1e-12).log10()
    }
}

#[inline]
fn angular(sample_rate: f64, freq: f64, q: f64) -> (f64, f64) {
    let w0 = 2.0 * PI * freq / sample_rate;
    (w0.cos(), w0.sin() / (2.0 * q))
}

/// Per-channel filter memory
///
/// Transposed direct form II: two state variables per channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BiquadState {
    s1: f64,
    s2: f64,
}

impl BiquadState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a single sample
    ///
    /// A result that is not a finite `f32` clears the state and yields
    /// silence.
    #[inline]
    pub fn process_sample(&mut self, coeffs: &BiquadCoeffs, x: f32) -> f32 {
        let x = f64::from(x);
        let y = coeffs.b0 * x + self.s1;
        self.s1 = coeffs.b1 * x - coeffs.a1 * y + self.s2;
        self.s2 = coeffs.b2 * x - coeffs.a2 * y;

        let y = y as f32;
        if y.is_finite() {
            y
        } else {
            self.reset();
            0.0
        }
    }

    /// Process a buffer of samples in place
    pub fn process(&mut self, coeffs: &BiquadCoeffs, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            *sample = self.process_sample(coeffs, *sample);
        }
        self.snap_to_zero();
    }

    /// Reset filter state
    pub fn reset(&mut self) {
        self.s1 = 0.0;
        self.s2 = 0.0;
    }

    /// Flush decaying tails before they turn denormal
    #[inline]
    fn snap_to_zero(&mut self) {
        const TINY: f64 = 1.0e-20;
        if self.s1.abs() < TINY {
            self.s1 = 0.0;
        }
        if self.s2.abs() < TINY {
            self.s2 = 0.0;
        }
    }
}
