//! Audio stream abstractions shared by the processing and presentation paths
//!
//! The host shell owns the real stream. This module only describes what the
//! core needs from it: the processing context handed to `prepare`, and a
//! channel-major block of samples handed to `process`.

use crate::domain::band::BandId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur in the EQ engine
#[derive(Debug, Error)]
pub enum AudioError {
    /// A configuration value is out of its supported range
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// No band with this identity lives in the chain
    #[error("Band not found: {0}")]
    BandNotFound(BandId),

    /// A band with this identity is already in the chain
    #[error("Duplicate band: {0}")]
    DuplicateBand(BandId),

    /// The chain cannot hold more bands without reallocating
    #[error("Band chain is full ({0} bands)")]
    ChainFull(usize),

    /// The other side of a real-time channel went away
    #[error("Stream error: {0}")]
    StreamError(String),
}

pub type Result<T> = std::result::Result<T, AudioError>;

/// Most channels a stream may carry
///
/// Band state reserves room for this many channels, so a band can follow a
/// channel-count change without allocating.
pub const MAX_CHANNELS: usize = 32;

/// Processing context negotiated with the host
///
/// Passed to `prepare` once per stream (re)configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub sample_rate: f64,
    pub max_block_size: usize,
    pub num_channels: usize,
}

impl ProcessSpec {
    pub const DEFAULT_SAMPLE_RATE: f64 = 44100.0;

    pub fn new(sample_rate: f64, max_block_size: usize, num_channels: usize) -> Self {
        Self {
            sample_rate,
            max_block_size,
            num_channels,
        }
    }

    /// Nyquist frequency for this context
    pub fn nyquist(&self) -> f64 {
        self.sample_rate * 0.5
    }

    /// Check the context can be processed
    pub fn validate(&self) -> Result<()> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(AudioError::InvalidConfiguration(format!(
                "sample rate {} must be positive",
                self.sample_rate
            )));
        }
        if !(1..=MAX_CHANNELS).contains(&self.num_channels) {
            return Err(AudioError::InvalidConfiguration(format!(
                "channel count {} outside 1..={}",
                self.num_channels, MAX_CHANNELS
            )));
        }
        Ok(())
    }
}

impl Default for ProcessSpec {
    fn default() -> Self {
        Self {
            sample_rate: Self::DEFAULT_SAMPLE_RATE,
            max_block_size: 512,
            num_channels: 2,
        }
    }
}

/// Channel-major block of audio samples
///
/// Each channel occupies a contiguous run of `capacity` samples, of which the
/// first `num_frames` are live. Changing the frame count within capacity never
/// reallocates, so a buffer sized in `prepare` can be reused on the audio thread.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    data: Vec<f32>,
    num_channels: usize,
    num_frames: usize,
    capacity: usize,
}

impl AudioBuffer {
    /// Create a silent buffer
    pub fn new(num_channels: usize, num_frames: usize) -> Self {
        Self {
            data: vec![0.0; num_channels * num_frames],
            num_channels,
            num_frames,
            capacity: num_frames,
        }
    }

    /// Build a buffer from one vector per channel
    ///
    /// Channels shorter than the longest one are padded with silence.
    pub fn from_channels(channels: &[Vec<f32>]) -> Self {
        let num_frames = channels.iter().map(Vec::len).max().unwrap_or(0);
        let mut buffer = Self::new(channels.len(), num_frames);
        for (ch, samples) in channels.iter().enumerate() {
            buffer.channel_mut(ch)[..samples.len()].copy_from_slice(samples);
        }
        buffer
    }

    /// De-interleave host data into a new buffer
    pub fn from_interleaved(samples: &[f32], num_channels: usize) -> Self {
        let num_channels = num_channels.max(1);
        let num_frames = samples.len() / num_channels;
        let mut buffer = Self::new(num_channels, num_frames);
        buffer.read_interleaved(samples);
        buffer
    }

    /// Overwrite this buffer from interleaved data without reallocating
    ///
    /// Returns the number of frames copied, bounded by the buffer capacity.
    pub fn read_interleaved(&mut self, samples: &[f32]) -> usize {
        let frames = (samples.len() / self.num_channels.max(1)).min(self.capacity);
        self.num_frames = frames;
        for ch in 0..self.num_channels {
            let start = ch * self.capacity;
            for (frame, dst) in self.data[start..start + frames].iter_mut().enumerate() {
                *dst = samples[frame * self.num_channels + ch];
            }
        }
        frames
    }

    /// Interleave this buffer into host memory
    ///
    /// Returns the number of frames written.
    pub fn write_interleaved(&self, out: &mut [f32]) -> usize {
        let frames = (out.len() / self.num_channels.max(1)).min(self.num_frames);
        for ch in 0..self.num_channels {
            for (frame, &sample) in self.channel(ch)[..frames].iter().enumerate() {
                out[frame * self.num_channels + ch] = sample;
            }
        }
        frames
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the live frame count, clamped to capacity
    pub fn set_num_frames(&mut self, num_frames: usize) {
        self.num_frames = num_frames.min(self.capacity);
    }

    pub fn channel(&self, ch: usize) -> &[f32] {
        let start = ch * self.capacity;
        &self.data[start..start + self.num_frames]
    }

    pub fn channel_mut(&mut self, ch: usize) -> &mut [f32] {
        let start = ch * self.capacity;
        &mut self.data[start..start + self.num_frames]
    }

    /// Iterate over the live samples of each channel
    pub fn channels(&self) -> impl Iterator<Item = &[f32]> {
        (0..self.num_channels).map(move |ch| self.channel(ch))
    }

    /// Zero every live sample
    pub fn clear(&mut self) {
        for ch in 0..self.num_channels {
            self.channel_mut(ch).fill(0.0);
        }
    }

    /// True when every live sample is a finite number
    pub fn is_finite(&self) -> bool {
        self.channels().all(|samples| samples.iter().all(|s| s.is_finite()))
    }
}
