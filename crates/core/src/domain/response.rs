//! Response curve sampling and graph coordinates
//!
//! The curve is what the editor draws: the chain's estimated total response at
//! log-spaced frequencies across the audible range. It is derived state and
//! never persisted.

use crate::domain::chain::BandChain;
use crate::domain::filter::params;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CURVE_POINTS: usize = 200;
pub const CURVE_MIN_HZ: f32 = params::MIN_FREQUENCY_HZ;
pub const CURVE_MAX_HZ: f32 = params::MAX_FREQUENCY_HZ;

/// One `(frequency, gain)` sample of the response
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub frequency_hz: f32,
    pub gain_db: f32,
}

/// Ordered response samples, low to high frequency
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseCurve {
    points: Vec<CurvePoint>,
}

impl ResponseCurve {
    pub fn points(&self) -> &[CurvePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CurvePoint> {
        self.points.iter()
    }

    /// Point with the largest absolute gain
    pub fn extremum(&self) -> Option<CurvePoint> {
        self.points
            .iter()
            .copied()
            .max_by(|a, b| a.gain_db.abs().total_cmp(&b.gain_db.abs()))
    }

    /// True when every point sits at 0 dB
    pub fn is_flat(&self) -> bool {
        self.points.iter().all(|p| p.gain_db == 0.0)
    }
}

/// Samples a [`BandChain`] at fixed log-spaced frequencies
#[derive(Debug, Clone)]
pub struct ResponseCurveSampler {
    frequencies: Vec<f32>,
}

impl Default for ResponseCurveSampler {
    fn default() -> Self {
        Self::new(DEFAULT_CURVE_POINTS)
    }
}

impl ResponseCurveSampler {
    /// Sampler over 20 Hz to 20 kHz; at least two points are used
    pub fn new(num_points: usize) -> Self {
        Self::with_range(num_points, CURVE_MIN_HZ, CURVE_MAX_HZ)
    }

    pub fn with_range(num_points: usize, min_hz: f32, max_hz: f32) -> Self {
        let num_points = num_points.max(2);
        let span = (max_hz / min_hz).ln();
        let frequencies = (0..num_points)
            .map(|i| {
                let t = i as f32 / (num_points - 1) as f32;
                min_hz * (span * t).exp()
            })
            .collect();
        Self { frequencies }
    }

    pub fn num_points(&self) -> usize {
        self.frequencies.len()
    }

    pub fn frequencies(&self) -> &[f32] {
        &self.frequencies
    }

    pub fn sample(&self, chain: &BandChain) -> ResponseCurve {
        let mut curve = ResponseCurve {
            points: Vec::with_capacity(self.frequencies.len()),
        };
        self.sample_into(chain, &mut curve);
        curve
    }

    /// Resample into an existing curve, reusing its storage
    pub fn sample_into(&self, chain: &BandChain, curve: &mut ResponseCurve) {
        curve.points.clear();
        curve
            .points
            .extend(self.frequencies.iter().map(|&frequency_hz| CurvePoint {
                frequency_hz,
                gain_db: chain.total_response_db(frequency_hz),
            }));
    }
}

/// Maps between editor pixels and (frequency, gain)
///
/// x runs log-scaled from 20 Hz at the left edge to 20 kHz at the right edge;
/// y runs linearly from +24 dB at the top to -24 dB at the bottom.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GraphMapping {
    pub width: f32,
    pub height: f32,
}

impl Default for GraphMapping {
    fn default() -> Self {
        Self::new(800.0, 400.0)
    }
}

impl GraphMapping {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width: width.max(1.0),
            height: height.max(1.0),
        }
    }

    fn span(&self) -> f32 {
        CURVE_MAX_HZ / CURVE_MIN_HZ
    }

    /// Pointer x to frequency; x is clamped to the graph
    pub fn x_to_frequency(&self, x: f32) -> f32 {
        let t = (x / self.width).clamp(0.0, 1.0);
        CURVE_MIN_HZ * self.span().powf(t)
    }

    /// Pointer y to gain; y is clamped to the graph
    pub fn y_to_gain(&self, y: f32) -> f32 {
        let t = (y / self.height).clamp(0.0, 1.0);
        params::MIN_GAIN_DB + (1.0 - t) * (params::MAX_GAIN_DB - params::MIN_GAIN_DB)
    }

    pub fn frequency_to_x(&self, frequency_hz: f32) -> f32 {
        let t = (frequency_hz.max(f32::MIN_POSITIVE) / CURVE_MIN_HZ).ln() / self.span().ln();
        t * self.width
    }

    pub fn gain_to_y(&self, gain_db: f32) -> f32 {
        let t = (gain_db - params::MIN_GAIN_DB) / (params::MAX_GAIN_DB - params::MIN_GAIN_DB);
        (1.0 - t) * self.height
    }

    pub fn point_to_screen(&self, point: &CurvePoint) -> (f32, f32) {
        (
            self.frequency_to_x(point.frequency_hz),
            self.gain_to_y(point.gain_db),
        )
    }

    /// Project a curve into pixel coordinates for drawing
    pub fn curve_to_screen(&self, curve: &ResponseCurve) -> Vec<(f32, f32)> {
        curve.iter().map(|p| self.point_to_screen(p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::audio::ProcessSpec;
    use crate::domain::band::EqBand;
    use crate::domain::filter::{FilterSpec, FilterType};

    fn boosted_chain() -> BandChain {
        let mut chain = BandChain::new();
        chain.prepare(&ProcessSpec::new(48000.0, 512, 2));
        chain
            .add_band(EqBand::from_spec(FilterSpec::new(
                FilterType::Peak,
                1000.0,
                9.0,
                2.0,
                48000.0,
            )))
            .unwrap();
        chain
            .add_band(EqBand::from_spec(FilterSpec::new(
                FilterType::HighPass,
                20.0,
                0.0,
                0.707,
                48000.0,
            )))
            .unwrap();
        chain
    }

    #[test]
    fn test_default_frequencies() {
        let sampler = ResponseCurveSampler::default();
        let freqs = sampler.frequencies();

        assert_eq!(freqs.len(), 200);
        assert!((freqs[0] - 20.0).abs() < 1e-3);
        assert!((freqs[199] - 20000.0).abs() < 0.5);
        assert!(freqs.windows(2).all(|w| w[1] > w[0]));

        let ratio = freqs[1] / freqs[0];
        assert!((freqs[150] / freqs[149] - ratio).abs() < 1e-3);
    }

    #[test]
    fn test_minimum_two_points() {
        assert_eq!(ResponseCurveSampler::new(0).num_points(), 2);
    }

    #[test]
    fn test_empty_chain_is_flat() {
        let curve = ResponseCurveSampler::default().sample(&BandChain::new());
        assert_eq!(curve.len(), 200);
        assert!(curve.is_flat());
    }

    #[test]
    fn test_points_follow_total_response() {
        let chain = boosted_chain();
        let curve = ResponseCurveSampler::new(64).sample(&chain);

        for point in curve.iter() {
            assert_eq!(point.gain_db, chain.total_response_db(point.frequency_hz));
        }
        let peak = curve.extremum().unwrap();
        assert!((peak.frequency_hz - 1000.0).abs() < 150.0);
    }

    #[test]
    fn test_sample_is_idempotent() {
        let chain = boosted_chain();
        let sampler = ResponseCurveSampler::default();
        let first = sampler.sample(&chain);

        let mut reused = ResponseCurve::default();
        sampler.sample_into(&chain, &mut reused);
        sampler.sample_into(&chain, &mut reused);

        assert_eq!(first, reused);
    }

    #[test]
    fn test_mapping_corners() {
        let mapping = GraphMapping::new(600.0, 300.0);

        assert!((mapping.x_to_frequency(0.0) - 20.0).abs() < 1e-3);
        assert!((mapping.x_to_frequency(600.0) - 20000.0).abs() < 0.5);
        assert!((mapping.x_to_frequency(300.0) - 632.46).abs() < 0.1);
        assert_eq!(mapping.y_to_gain(0.0), 24.0);
        assert_eq!(mapping.y_to_gain(300.0), -24.0);
        assert_eq!(mapping.y_to_gain(150.0), 0.0);

        assert!((mapping.x_to_frequency(-50.0) - 20.0).abs() < 1e-3);
        assert_eq!(mapping.y_to_gain(1000.0), -24.0);
    }

    #[test]
    fn test_mapping_inverse() {
        let mapping = GraphMapping::default();
        let x = mapping.frequency_to_x(mapping.x_to_frequency(123.0));
        let y = mapping.gain_to_y(mapping.y_to_gain(77.0));
        assert!((x - 123.0).abs() < 0.01);
        assert!((y - 77.0).abs() < 0.01);
    }

    #[test]
    fn test_curve_to_screen() {
        let mapping = GraphMapping::new(400.0, 200.0);
        let curve = ResponseCurveSampler::new(10).sample(&BandChain::new());
        let screen = mapping.curve_to_screen(&curve);

        assert_eq!(screen.len(), 10);
        assert!(screen[0].0.abs() < 1e-3);
        assert!((screen[9].0 - 400.0).abs() < 0.01);
        assert!(screen.iter().all(|&(_, y)| y == 100.0));
    }
}
