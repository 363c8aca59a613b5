//! Signal helpers shared by the integration tests

use std::f64::consts::PI;

/// Sine of unit phase origin, starting `offset` samples into the wave
pub fn generate_sine_wave(
    frequency: f32,
    amplitude: f32,
    sample_rate: f64,
    num_samples: usize,
    offset: usize,
) -> Vec<f32> {
    (0..num_samples)
        .map(|i| {
            let t = (i + offset) as f64 / sample_rate;
            amplitude * (2.0 * PI * f64::from(frequency) * t).sin() as f32
        })
        .collect()
}

/// A single unit sample followed by silence
pub fn impulse(num_samples: usize) -> Vec<f32> {
    let mut samples = vec![0.0; num_samples];
    if let Some(first) = samples.first_mut() {
        *first = 1.0;
    }
    samples
}

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let energy: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (energy / samples.len() as f64).sqrt() as f32
}

/// Level change from `input` to `output` in dB
pub fn gain_db(input: &[f32], output: &[f32]) -> f32 {
    20.0 * (rms(output) / rms(input)).log10()
}
