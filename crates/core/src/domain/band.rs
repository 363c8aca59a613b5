//! A single EQ band: one biquad with per-channel state
//!
//! Bands are addressed by [`BandId`] rather than by reference so the editor can
//! hold on to a band across structural changes of the chain.

use crate::domain::audio::{AudioBuffer, ProcessSpec, MAX_CHANNELS};
use crate::domain::filter::{
    params, sanitize_frequency, sanitize_gain, sanitize_q, sanitize_sample_rate, BiquadCoeffs,
    BiquadState, FilterSpec, FilterType,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

static NEXT_BAND_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BandId(u64);

impl BandId {
    /// Allocate a process-wide unique identifier
    pub fn next() -> Self {
        Self(NEXT_BAND_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "band-{}", self.0)
    }
}

/// Marker position on the editor graph, in editor pixels
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BandPosition {
    pub x: f32,
    pub y: f32,
}

impl BandPosition {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// One parametric EQ band
#[derive(Debug, Clone, PartialEq)]
pub struct EqBand {
    id: BandId,
    spec: FilterSpec,
    coeffs: BiquadCoeffs,
    states: Vec<BiquadState>,
    position: BandPosition,
}

impl Default for EqBand {
    fn default() -> Self {
        Self::from_spec(FilterSpec::default())
    }
}

impl EqBand {
    /// Create a 1 kHz peak band at 0 dB
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a band with the given shape at the default sample rate
    pub fn with_params(kind: FilterType, frequency_hz: f32, gain_db: f32, q: f32) -> Self {
        Self::from_spec(FilterSpec::new(
            kind,
            frequency_hz,
            gain_db,
            q,
            params::DEFAULT_SAMPLE_RATE,
        ))
    }

    pub fn from_spec(spec: FilterSpec) -> Self {
        let spec = spec.sanitized();
        Self {
            id: BandId::next(),
            coeffs: spec.coefficients(),
            spec,
            states: Vec::new(),
            position: BandPosition::new(0.5, 0.5),
        }
    }

    pub fn id(&self) -> BandId {
        self.id
    }

    pub fn spec(&self) -> &FilterSpec {
        &self.spec
    }

    pub fn kind(&self) -> FilterType {
        self.spec.kind
    }

    pub fn frequency(&self) -> f32 {
        self.spec.frequency_hz
    }

    pub fn gain(&self) -> f32 {
        self.spec.gain_db
    }

    pub fn q(&self) -> f32 {
        self.spec.q
    }

    pub fn sample_rate(&self) -> f64 {
        self.spec.sample_rate_hz
    }

    pub fn coefficients(&self) -> &BiquadCoeffs {
        &self.coeffs
    }

    pub fn position(&self) -> BandPosition {
        self.position
    }

    /// Number of channels the band was prepared for
    pub fn num_channels(&self) -> usize {
        self.states.len()
    }

    pub fn set_frequency(&mut self, frequency_hz: f32) {
        self.spec.frequency_hz = sanitize_frequency(frequency_hz, self.spec.sample_rate_hz);
        self.update_coefficients();
    }

    pub fn set_gain(&mut self, gain_db: f32) {
        self.spec.gain_db = sanitize_gain(gain_db);
        self.update_coefficients();
    }

    pub fn set_q(&mut self, q: f32) {
        self.spec.q = sanitize_q(q);
        self.update_coefficients();
    }

    pub fn set_type(&mut self, kind: FilterType) {
        self.spec.kind = kind;
        self.update_coefficients();
    }

    pub fn set_sample_rate(&mut self, sample_rate_hz: f64) {
        self.spec.sample_rate_hz = sanitize_sample_rate(sample_rate_hz);
        self.spec.frequency_hz = sanitize_frequency(self.spec.frequency_hz, self.spec.sample_rate_hz);
        self.update_coefficients();
    }

    /// Replace every parameter at once
    ///
    /// The sample rate stays the one the band was prepared with.
    pub fn set_spec(&mut self, spec: FilterSpec) {
        self.spec = FilterSpec {
            sample_rate_hz: self.spec.sample_rate_hz,
            ..spec
        }
        .sanitized();
        self.update_coefficients();
    }

    pub fn set_position(&mut self, position: BandPosition) {
        self.position = position;
    }

    /// Install a parameter set whose coefficients were designed elsewhere
    ///
    /// Spec and coefficients are swapped together, so a reader between two
    /// blocks always sees a matching pair. When the designer assumed a
    /// different sample rate, the coefficients are redesigned here.
    pub fn publish(&mut self, spec: FilterSpec, coeffs: BiquadCoeffs) {
        if spec.sample_rate_hz == self.spec.sample_rate_hz && coeffs.is_finite() {
            self.spec = spec;
            self.coeffs = coeffs;
        } else {
            self.spec = FilterSpec {
                sample_rate_hz: self.spec.sample_rate_hz,
                ..spec
            }
            .sanitized();
            self.coeffs = self.spec.coefficients();
        }
    }

    /// Size per-channel state, clear it and redesign for the new sample rate
    ///
    /// Room for [`MAX_CHANNELS`] states is reserved on first use, so later
    /// calls to [`EqBand::prepare_in_place`] never allocate.
    pub fn prepare(&mut self, spec: &ProcessSpec) {
        let wanted = spec.num_channels.max(MAX_CHANNELS);
        if self.states.capacity() < wanted {
            self.states.reserve_exact(wanted - self.states.len());
        }
        self.prepare_in_place(spec);

        debug!(
            band = %self.id,
            sample_rate = self.spec.sample_rate_hz,
            channels = spec.num_channels,
            "Band prepared"
        );
    }

    /// Adopt a context within the state already reserved
    ///
    /// Safe on the audio thread: no allocation, no logging for a valid
    /// context. Returns `false` and leaves the band untouched when the
    /// channel count exceeds the reserved state.
    pub fn prepare_in_place(&mut self, spec: &ProcessSpec) -> bool {
        if spec.num_channels > self.states.capacity() {
            return false;
        }
        self.states.resize(spec.num_channels, BiquadState::new());
        self.reset();

        let sample_rate_hz = sanitize_sample_rate(spec.sample_rate);
        if sample_rate_hz != self.spec.sample_rate_hz {
            self.spec.sample_rate_hz = sample_rate_hz;
            self.spec.frequency_hz = sanitize_frequency(self.spec.frequency_hz, sample_rate_hz);
        }
        self.coeffs = self.spec.coefficients();
        true
    }

    /// True when the band already matches this context
    pub fn is_prepared_for(&self, spec: &ProcessSpec) -> bool {
        self.states.len() == spec.num_channels && self.spec.sample_rate_hz == spec.sample_rate
    }

    /// Clear filter memory on every channel
    pub fn reset(&mut self) {
        for state in &mut self.states {
            state.reset();
        }
    }

    /// Filter a block in place
    ///
    /// Channels beyond the prepared channel count pass through untouched.
    pub fn process(&mut self, buffer: &mut AudioBuffer) {
        let channels = buffer.num_channels().min(self.states.len());
        for ch in 0..channels {
            self.states[ch].process(&self.coeffs, buffer.channel_mut(ch));
        }
    }

    /// Closed-form estimate of this band's contribution in dB
    ///
    /// This is a smooth shape function per filter type, not the magnitude of
    /// the realized biquad (see [`BiquadCoeffs::magnitude_db`]). Peak and notch
    /// use a resonant bump around the center; shelves and pass filters use
    /// asymptotic slopes. The notch depth follows the band gain even though the
    /// realized notch ignores it.
    pub fn estimate_response_db(&self, frequency_hz: f32) -> f32 {
        let ratio = frequency_hz.max(1.0e-3) / self.spec.frequency_hz;
        let gain = self.spec.gain_db;
        let q = self.spec.q;

        let response = match self.spec.kind {
            FilterType::Peak => gain / (1.0 + ((ratio - 1.0 / ratio) / q).powi(2)),
            FilterType::LowShelf => gain / (1.0 + (ratio / q).powi(2)),
            FilterType::HighShelf => gain / (1.0 + (1.0 / (ratio * q)).powi(2)),
            FilterType::LowPass => (-12.0 * ratio.max(0.001).log2()).min(0.0),
            FilterType::HighPass => (-12.0 * (1.0 / ratio).max(0.001).log2()).min(0.0),
            FilterType::Notch => {
                let bandwidth = 1.0 / q;
                -gain / (1.0 + ((ratio - 1.0 / ratio) / bandwidth).powi(2))
            }
        };

        if response.is_finite() {
            response
        } else {
            0.0
        }
    }

    fn update_coefficients(&mut self) {
        self.coeffs = self.spec.coefficients();

        trace!(
            band = %self.id,
            "{} updated: {:.1} Hz, {:.1} dB, Q {:.2}",
            self.spec.kind.name(),
            self.spec.frequency_hz,
            self.spec.gain_db,
            self.spec.q
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f64 = 48000.0;

    fn generate_sine(frequency: f32, amplitude: f32, samples: usize) -> Vec<f32> {
        (0..samples)
            .map(|i| {
                amplitude
                    * (2.0 * std::f32::consts::PI * frequency * i as f32 / SAMPLE_RATE as f32).sin()
            })
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    fn prepared(kind: FilterType, freq: f32, gain: f32, q: f32, channels: usize) -> EqBand {
        let mut band = EqBand::with_params(kind, freq, gain, q);
        band.prepare(&ProcessSpec::new(SAMPLE_RATE, 512, channels));
        band
    }

    #[test]
    fn test_band_defaults() {
        let band = EqBand::new();
        assert_eq!(band.kind(), FilterType::Peak);
        assert_eq!(band.frequency(), 1000.0);
        assert_eq!(band.gain(), 0.0);
        assert_eq!(band.q(), 1.0);
        assert_eq!(band.num_channels(), 0);
    }

    #[test]
    fn test_band_ids_are_unique() {
        let a = EqBand::new();
        let b = EqBand::new();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn test_setters_recompute_coefficients() {
        let mut band = prepared(FilterType::Peak, 1000.0, 0.0, 1.0, 2);
        let flat = *band.coefficients();

        band.set_gain(6.0);
        assert_ne!(*band.coefficients(), flat);
        assert_eq!(*band.coefficients(), band.spec().coefficients());

        band.set_type(FilterType::HighPass);
        assert_eq!(
            *band.coefficients(),
            FilterSpec::new(FilterType::HighPass, 1000.0, 6.0, 1.0, SAMPLE_RATE).coefficients()
        );

        band.set_q(3.0);
        band.set_frequency(250.0);
        assert_eq!(band.q(), 3.0);
        assert_eq!(band.frequency(), 250.0);
        assert_eq!(*band.coefficients(), band.spec().coefficients());
    }

    #[test]
    fn test_set_spec_keeps_sample_rate() {
        let mut band = prepared(FilterType::Peak, 1000.0, 0.0, 1.0, 1);
        band.set_spec(FilterSpec::new(FilterType::LowShelf, 200.0, f32::NAN, 2.0, 8000.0));

        assert_eq!(band.kind(), FilterType::LowShelf);
        assert_eq!(band.gain(), 0.0);
        assert_eq!(band.spec().sample_rate_hz, SAMPLE_RATE);
        assert_eq!(*band.coefficients(), band.spec().coefficients());
    }

    #[test]
    fn test_frequency_clamped_below_nyquist() {
        let mut band = EqBand::new();
        band.prepare(&ProcessSpec::new(16000.0, 256, 1));

        band.set_frequency(12000.0);
        assert!(band.frequency() < 8000.0);
        assert!(band.coefficients().is_finite());

        band.set_q(-1.0);
        assert!(band.q() > 0.0);
    }

    #[test]
    fn test_prepare_resizes_and_reclamps() {
        let mut band = EqBand::with_params(FilterType::LowPass, 18000.0, 0.0, 0.707);
        band.prepare(&ProcessSpec::new(SAMPLE_RATE, 512, 2));
        assert_eq!(band.num_channels(), 2);
        assert_eq!(band.frequency(), 18000.0);

        band.prepare(&ProcessSpec::new(22050.0, 512, 1));
        assert_eq!(band.num_channels(), 1);
        assert!(band.frequency() < 11025.0);
        assert_eq!(band.sample_rate(), 22050.0);
    }

    #[test]
    fn test_prepare_in_place_reuses_state() {
        let mut band = prepared(FilterType::Peak, 1000.0, 6.0, 1.0, 2);
        let storage = band.states.as_ptr();
        let capacity = band.states.capacity();
        assert!(capacity >= MAX_CHANNELS);

        assert!(band.prepare_in_place(&ProcessSpec::new(96000.0, 512, 6)));
        assert_eq!(band.num_channels(), 6);
        assert_eq!(band.sample_rate(), 96000.0);
        assert_eq!(band.states.as_ptr(), storage);
        assert_eq!(band.states.capacity(), capacity);
        assert_eq!(*band.coefficients(), band.spec().coefficients());
    }

    #[test]
    fn test_prepare_in_place_refuses_without_room() {
        let mut band = EqBand::new();
        assert!(!band.prepare_in_place(&ProcessSpec::new(48000.0, 512, 2)));
        assert_eq!(band.num_channels(), 0);
    }

    #[test]
    fn test_peak_boost_at_center() {
        let mut band = prepared(FilterType::Peak, 1000.0, 12.0, 4.0, 1);
        let input = generate_sine(1000.0, 0.25, SAMPLE_RATE as usize);
        let mut buffer = AudioBuffer::from_channels(&[input.clone()]);

        band.process(&mut buffer);

        let tail = input.len() - 4800;
        let gain_db = 20.0 * (rms(&buffer.channel(0)[tail..]) / rms(&input[tail..])).log10();
        assert!((gain_db - 12.0).abs() < 0.1, "measured {gain_db} dB");
    }

    #[test]
    fn test_notch_attenuates_center() {
        let mut band = prepared(FilterType::Notch, 1000.0, 0.0, 2.0, 1);
        let input = generate_sine(1000.0, 0.5, SAMPLE_RATE as usize);
        let mut buffer = AudioBuffer::from_channels(&[input.clone()]);

        band.process(&mut buffer);

        let tail = input.len() - 4800;
        let gain_db = 20.0 * (rms(&buffer.channel(0)[tail..]) / rms(&input[tail..])).log10();
        assert!(gain_db < -20.0, "measured {gain_db} dB");
    }

    #[test]
    fn test_channels_have_independent_state() {
        let mut band = prepared(FilterType::LowPass, 500.0, 0.0, 0.707, 2);
        let mut buffer = AudioBuffer::from_channels(&[vec![1.0; 64], vec![0.0; 64]]);

        band.process(&mut buffer);

        assert!(buffer.channel(0).iter().any(|&s| s != 0.0));
        assert!(buffer.channel(1).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_unprepared_channels_pass_through() {
        let mut band = prepared(FilterType::Peak, 1000.0, 12.0, 1.0, 1);
        let second = generate_sine(1000.0, 0.5, 256);
        let mut buffer = AudioBuffer::from_channels(&[generate_sine(1000.0, 0.5, 256), second.clone()]);

        band.process(&mut buffer);

        assert_eq!(buffer.channel(1), second.as_slice());
    }

    #[test]
    fn test_publish_swaps_pair() {
        let mut band = prepared(FilterType::Peak, 1000.0, 0.0, 1.0, 1);
        let spec = FilterSpec::new(FilterType::LowShelf, 200.0, 4.0, 0.707, SAMPLE_RATE);
        let coeffs = spec.coefficients();

        band.publish(spec, coeffs);

        assert_eq!(*band.spec(), spec);
        assert_eq!(*band.coefficients(), coeffs);
    }

    #[test]
    fn test_publish_redesigns_for_other_sample_rate() {
        let mut band = prepared(FilterType::Peak, 1000.0, 0.0, 1.0, 1);
        let foreign = FilterSpec::new(FilterType::Peak, 1000.0, 6.0, 1.0, 44100.0);

        band.publish(foreign, foreign.coefficients());

        assert_eq!(band.sample_rate(), SAMPLE_RATE);
        assert_eq!(
            *band.coefficients(),
            FilterSpec::new(FilterType::Peak, 1000.0, 6.0, 1.0, SAMPLE_RATE).coefficients()
        );
    }

    #[test]
    fn test_estimate_shapes() {
        let peak = EqBand::with_params(FilterType::Peak, 1000.0, 6.0, 1.0);
        assert!((peak.estimate_response_db(1000.0) - 6.0).abs() < 1e-5);
        assert!(peak.estimate_response_db(20.0).abs() < 0.01);

        let notch = EqBand::with_params(FilterType::Notch, 1000.0, 10.0, 2.0);
        assert!((notch.estimate_response_db(1000.0) + 10.0).abs() < 1e-5);

        let low_pass = EqBand::with_params(FilterType::LowPass, 1000.0, 0.0, 0.707);
        assert_eq!(low_pass.estimate_response_db(500.0), 0.0);
        assert!((low_pass.estimate_response_db(2000.0) + 12.0).abs() < 1e-4);

        let high_pass = EqBand::with_params(FilterType::HighPass, 1000.0, 0.0, 0.707);
        assert!((high_pass.estimate_response_db(500.0) + 12.0).abs() < 1e-4);
        assert_eq!(high_pass.estimate_response_db(4000.0), 0.0);

        let low_shelf = EqBand::with_params(FilterType::LowShelf, 1000.0, 8.0, 1.0);
        assert!((low_shelf.estimate_response_db(20.0) - 8.0).abs() < 0.01);
        assert!((low_shelf.estimate_response_db(1000.0) - 4.0).abs() < 1e-5);

        let high_shelf = EqBand::with_params(FilterType::HighShelf, 1000.0, -8.0, 1.0);
        assert!((high_shelf.estimate_response_db(20000.0) + 8.0).abs() < 0.05);
    }

    #[test]
    fn test_estimate_is_an_approximation() {
        // The display estimate and the realized filter disagree at the corner
        let mut band = EqBand::with_params(FilterType::LowPass, 1000.0, 0.0, 0.707);
        band.prepare(&ProcessSpec::new(SAMPLE_RATE, 512, 1));

        let estimate = band.estimate_response_db(1000.0);
        let exact = band.coefficients().magnitude_db(1000.0, SAMPLE_RATE) as f32;

        assert_eq!(estimate, 0.0);
        assert!((exact + 3.0).abs() < 0.1);
    }

    #[test]
    fn test_estimate_is_finite_at_edges() {
        for kind in FilterType::ALL {
            let band = EqBand::with_params(kind, 1000.0, 24.0, 0.1);
            for freq in [0.0, -10.0, 1.0e-9, 20.0, 20000.0, 1.0e9] {
                assert!(band.estimate_response_db(freq).is_finite(), "{kind:?} at {freq}");
            }
        }
    }
}
