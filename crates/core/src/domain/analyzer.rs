//! Windowed FFT spectrum analysis
//!
//! Each channel fills a FIFO of `fft_size` samples. When it is full the block
//! is Hann-windowed, transformed, and reduced to `fft_size / 2 + 1` magnitude
//! bins, then the FIFO starts over. Everything is allocated in `new`; pushing
//! samples never allocates.

use crate::domain::audio::{AudioBuffer, AudioError, Result};
use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::fmt;
use std::sync::Arc;

/// Smallest supported FFT order (16 samples)
pub const MIN_ORDER: u32 = 4;
/// Largest supported FFT order (65536 samples)
pub const MAX_ORDER: u32 = 16;
/// Order used by the editor: 2048 samples, about 46 ms at 44.1 kHz
pub const DEFAULT_ORDER: u32 = 11;
/// Level reported for silent bins
pub const MAGNITUDE_FLOOR_DB: f32 = -100.0;

/// Symmetric Hann window scaled so its samples sum to `len`
fn hann_window(len: usize) -> Vec<f32> {
    let denom = (len.max(2) - 1) as f32;
    let mut window: Vec<f32> = (0..len)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / denom).cos()))
        .collect();

    let sum: f32 = window.iter().sum();
    if sum > 0.0 {
        let scale = len as f32 / sum;
        for w in &mut window {
            *w *= scale;
        }
    }
    window
}

/// Single-channel spectrum analyzer
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    order: u32,
    fft_size: usize,
    fifo: Vec<f32>,
    fifo_index: usize,
    window: Vec<f32>,
    buffer: Vec<Complex32>,
    scratch: Vec<Complex32>,
    magnitudes: Vec<f32>,
    new_data: bool,
}

impl fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("order", &self.order)
            .field("fifo_index", &self.fifo_index)
            .field("new_data", &self.new_data)
            .finish()
    }
}

impl SpectrumAnalyzer {
    /// Create an analyzer with `fft_size = 2^order`
    pub fn new(order: u32) -> Result<Self> {
        if !(MIN_ORDER..=MAX_ORDER).contains(&order) {
            return Err(AudioError::InvalidConfiguration(format!(
                "FFT order {} outside {}..={}",
                order, MIN_ORDER, MAX_ORDER
            )));
        }

        let fft_size = 1usize << order;
        let fft = FftPlanner::<f32>::new().plan_fft_forward(fft_size);
        let scratch = vec![Complex32::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        Ok(Self {
            fft,
            order,
            fft_size,
            fifo: vec![0.0; fft_size],
            fifo_index: 0,
            window: hann_window(fft_size),
            buffer: vec![Complex32::new(0.0, 0.0); fft_size],
            scratch,
            magnitudes: vec![0.0; fft_size / 2 + 1],
            new_data: false,
        })
    }

    pub fn order(&self) -> u32 {
        self.order
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of magnitude bins, `fft_size / 2 + 1`
    pub fn num_bins(&self) -> usize {
        self.magnitudes.len()
    }

    /// Feed one sample
    ///
    /// Returns `true` when this sample completed a frame and a new spectrum
    /// was computed.
    #[inline]
    pub fn push_sample(&mut self, sample: f32) -> bool {
        self.fifo[self.fifo_index] = sample;
        self.fifo_index += 1;

        if self.fifo_index == self.fft_size {
            self.transform();
            self.fifo_index = 0;
            self.new_data = true;
            true
        } else {
            false
        }
    }

    /// Feed a run of samples
    pub fn push_samples(&mut self, samples: &[f32]) {
        for &sample in samples {
            self.push_sample(sample);
        }
    }

    fn transform(&mut self) {
        for ((dst, &sample), &w) in self.buffer.iter_mut().zip(&self.fifo).zip(&self.window) {
            *dst = Complex32::new(sample * w, 0.0);
        }

        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        let scale = 2.0 / self.fft_size as f32;
        let nyquist = self.fft_size / 2;
        for (bin, magnitude) in self.magnitudes.iter_mut().enumerate() {
            let value = self.buffer[bin];
            *magnitude = if bin == 0 || bin == nyquist {
                value.re.abs() * scale
            } else {
                value.norm() * scale
            };
        }
    }

    /// Normalized magnitude of one bin
    ///
    /// # Panics
    /// When `bin > fft_size / 2`.
    pub fn magnitude_for_bin(&self, bin: usize) -> f32 {
        assert!(
            bin < self.magnitudes.len(),
            "bin {} out of range (0..={})",
            bin,
            self.fft_size / 2
        );
        self.magnitudes[bin]
    }

    /// Magnitude of one bin in dB, floored at [`MAGNITUDE_FLOOR_DB`]
    pub fn magnitude_db_for_bin(&self, bin: usize) -> f32 {
        let magnitude = self.magnitude_for_bin(bin);
        if magnitude > 0.0 {
            (20.0 * magnitude.log10()).max(MAGNITUDE_FLOOR_DB)
        } else {
            MAGNITUDE_FLOOR_DB
        }
    }

    /// Latest magnitude spectrum
    pub fn magnitudes(&self) -> &[f32] {
        &self.magnitudes
    }

    /// Center frequency of a bin
    pub fn bin_frequency(&self, bin: usize, sample_rate_hz: f64) -> f32 {
        (bin as f64 * sample_rate_hz / self.fft_size as f64) as f32
    }

    /// Bin with the largest magnitude
    pub fn peak_bin(&self) -> usize {
        self.magnitudes
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(bin, _)| bin)
            .unwrap_or(0)
    }

    pub fn is_new_data_available(&self) -> bool {
        self.new_data
    }

    pub fn reset_new_data_flag(&mut self) {
        self.new_data = false;
    }

    /// Drop buffered samples and the last spectrum
    pub fn reset(&mut self) {
        self.fifo.fill(0.0);
        self.fifo_index = 0;
        self.magnitudes.fill(0.0);
        self.new_data = false;
    }
}

/// One [`SpectrumAnalyzer`] per channel
#[derive(Debug)]
pub struct MultiChannelAnalyzer {
    analyzers: Vec<SpectrumAnalyzer>,
    sample_rate: f64,
}

impl MultiChannelAnalyzer {
    pub fn new(num_channels: usize, order: u32, sample_rate: f64) -> Result<Self> {
        if num_channels == 0 {
            return Err(AudioError::InvalidConfiguration(
                "Analyzer needs at least one channel".to_string(),
            ));
        }
        let analyzers = (0..num_channels)
            .map(|_| SpectrumAnalyzer::new(order))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            analyzers,
            sample_rate,
        })
    }

    pub fn num_channels(&self) -> usize {
        self.analyzers.len()
    }

    pub fn fft_size(&self) -> usize {
        self.analyzers[0].fft_size()
    }

    pub fn num_bins(&self) -> usize {
        self.analyzers[0].num_bins()
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
    }

    /// # Panics
    /// When `channel` is not below the analyzer's channel count.
    pub fn channel(&self, channel: usize) -> &SpectrumAnalyzer {
        self.check_channel(channel);
        &self.analyzers[channel]
    }

    /// Feed one sample of one channel
    ///
    /// # Panics
    /// When `channel` is not below the analyzer's channel count.
    #[inline]
    pub fn push_sample(&mut self, channel: usize, sample: f32) -> bool {
        self.check_channel(channel);
        self.analyzers[channel].push_sample(sample)
    }

    /// Push every sample of every channel the analyzer covers
    ///
    /// Extra channels in the block are ignored.
    pub fn process_buffer(&mut self, buffer: &AudioBuffer) {
        for (analyzer, samples) in self.analyzers.iter_mut().zip(buffer.channels()) {
            analyzer.push_samples(samples);
        }
    }

    /// # Panics
    /// On an invalid channel or bin.
    pub fn magnitude_for_bin(&self, channel: usize, bin: usize) -> f32 {
        self.channel(channel).magnitude_for_bin(bin)
    }

    pub fn is_new_data_available(&self, channel: usize) -> bool {
        self.channel(channel).is_new_data_available()
    }

    pub fn reset_new_data_flag(&mut self, channel: usize) {
        self.check_channel(channel);
        self.analyzers[channel].reset_new_data_flag();
    }

    pub fn bin_frequency(&self, bin: usize) -> f32 {
        self.analyzers[0].bin_frequency(bin, self.sample_rate)
    }

    pub fn reset(&mut self) {
        for analyzer in &mut self.analyzers {
            analyzer.reset();
        }
    }

    fn check_channel(&self, channel: usize) {
        assert!(
            channel < self.analyzers.len(),
            "channel {} out of range ({} channels)",
            channel,
            self.analyzers.len()
        );
    }
}
