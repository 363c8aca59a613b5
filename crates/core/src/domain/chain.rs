//! Ordered series of EQ bands
//!
//! Bands are applied in insertion order. Each band is independent, so the
//! order only matters up to floating-point rounding.

use crate::domain::audio::{AudioBuffer, AudioError, ProcessSpec, Result};
use crate::domain::band::{BandId, BandPosition, EqBand};
use crate::domain::filter::{params, FilterSpec, FilterType};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Upper bound on bands held by one chain
///
/// Storage for this many bands is reserved up front so adding a band on the
/// audio thread never reallocates.
pub const MAX_BANDS: usize = 32;

/// Persisted description of one band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandSettings {
    #[serde(rename = "type")]
    pub kind: FilterType,
    pub frequency_hz: f32,
    pub gain_db: f32,
    pub q: f32,
    #[serde(default)]
    pub position: BandPosition,
}

impl BandSettings {
    pub fn new(kind: FilterType, frequency_hz: f32, gain_db: f32, q: f32) -> Self {
        Self {
            kind,
            frequency_hz,
            gain_db,
            q,
            position: BandPosition::new(0.5, 0.5),
        }
    }

    pub fn from_band(band: &EqBand) -> Self {
        Self {
            kind: band.kind(),
            frequency_hz: band.frequency(),
            gain_db: band.gain(),
            q: band.q(),
            position: band.position(),
        }
    }

    /// Build a fresh band at the given sample rate
    pub fn to_band(&self, sample_rate_hz: f64) -> EqBand {
        let mut band = EqBand::from_spec(FilterSpec::new(
            self.kind,
            self.frequency_hz,
            self.gain_db,
            self.q,
            sample_rate_hz,
        ));
        band.set_position(self.position);
        band
    }

    /// Low shelf, peak and high shelf, all flat
    pub fn default_bands() -> Vec<BandSettings> {
        vec![
            BandSettings::new(FilterType::LowShelf, 100.0, 0.0, params::DEFAULT_Q),
            BandSettings::new(FilterType::Peak, 1000.0, 0.0, params::DEFAULT_Q),
            BandSettings::new(FilterType::HighShelf, 5000.0, 0.0, params::DEFAULT_Q),
        ]
    }
}

/// Ordered, identity-addressed collection of bands
#[derive(Debug)]
pub struct BandChain {
    bands: Vec<EqBand>,
    spec: ProcessSpec,
    capacity: usize,
}

impl Clone for BandChain {
    /// The copy reserves the same capacity as the original
    fn clone(&self) -> Self {
        let mut bands = Vec::with_capacity(self.capacity);
        bands.extend(self.bands.iter().cloned());
        Self {
            bands,
            spec: self.spec,
            capacity: self.capacity,
        }
    }
}

impl Default for BandChain {
    fn default() -> Self {
        Self::new()
    }
}

impl BandChain {
    /// Create an empty chain with room for [`MAX_BANDS`] bands
    pub fn new() -> Self {
        Self::with_capacity(MAX_BANDS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bands: Vec::with_capacity(capacity),
            spec: ProcessSpec::default(),
            capacity,
        }
    }

    /// Rebuild a chain from persisted settings
    ///
    /// Settings beyond [`MAX_BANDS`] are ignored.
    pub fn from_settings(settings: &[BandSettings], spec: &ProcessSpec) -> Self {
        let mut chain = Self::new();
        chain.spec = *spec;
        for band_settings in settings.iter().take(chain.capacity) {
            let mut band = band_settings.to_band(spec.sample_rate);
            band.prepare(spec);
            chain.bands.push(band);
        }
        chain
    }

    /// Chain holding the three flat default bands
    pub fn with_default_bands(spec: &ProcessSpec) -> Self {
        Self::from_settings(&BandSettings::default_bands(), spec)
    }

    /// Adopt a new processing context and clear all filter memory
    pub fn prepare(&mut self, spec: &ProcessSpec) {
        self.spec = *spec;
        for band in &mut self.bands {
            band.prepare(spec);
        }
        debug!(
            bands = self.bands.len(),
            sample_rate = spec.sample_rate,
            channels = spec.num_channels,
            "Band chain prepared"
        );
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    /// Append a band
    ///
    /// A band already prepared for the chain's context is taken as is, so no
    /// allocation happens here.
    pub fn add_band(&mut self, mut band: EqBand) -> Result<BandId> {
        let id = band.id();
        if self.contains(id) {
            return Err(AudioError::DuplicateBand(id));
        }
        if self.bands.len() >= self.capacity {
            return Err(AudioError::ChainFull(self.capacity));
        }
        if !band.is_prepared_for(&self.spec) {
            band.prepare(&self.spec);
        }
        self.bands.push(band);
        Ok(id)
    }

    /// Remove a band, keeping the order of the others
    pub fn remove_band(&mut self, id: BandId) -> Option<EqBand> {
        let index = self.bands.iter().position(|band| band.id() == id)?;
        Some(self.bands.remove(index))
    }

    pub fn contains(&self, id: BandId) -> bool {
        self.bands.iter().any(|band| band.id() == id)
    }

    pub fn band(&self, id: BandId) -> Option<&EqBand> {
        self.bands.iter().find(|band| band.id() == id)
    }

    pub fn band_mut(&mut self, id: BandId) -> Option<&mut EqBand> {
        self.bands.iter_mut().find(|band| band.id() == id)
    }

    /// Bands in processing order
    pub fn bands(&self) -> &[EqBand] {
        &self.bands
    }

    pub fn ids(&self) -> impl Iterator<Item = BandId> + '_ {
        self.bands.iter().map(EqBand::id)
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remove every band
    pub fn clear(&mut self) {
        self.bands.clear();
    }

    /// Clear filter memory of every band
    pub fn reset(&mut self) {
        for band in &mut self.bands {
            band.reset();
        }
    }

    /// Run every band over the block in order
    ///
    /// An empty chain leaves the block untouched.
    pub fn process(&mut self, buffer: &mut AudioBuffer) {
        for band in &mut self.bands {
            band.process(buffer);
        }
    }

    /// Estimated total response in dB for display
    ///
    /// Sum of each band's closed-form estimate, clamped to the editor range.
    pub fn total_response_db(&self, frequency_hz: f32) -> f32 {
        let total: f32 = self
            .bands
            .iter()
            .map(|band| band.estimate_response_db(frequency_hz))
            .sum();
        total.clamp(params::MIN_GAIN_DB, params::MAX_GAIN_DB)
    }

    /// Exact magnitude of the realized cascade in dB, unclamped
    pub fn exact_response_db(&self, frequency_hz: f32) -> f64 {
        self.bands
            .iter()
            .map(|band| {
                band.coefficients()
                    .magnitude_db(f64::from(frequency_hz), band.sample_rate())
            })
            .sum()
    }

    /// Snapshot of every band for persistence
    pub fn settings(&self) -> Vec<BandSettings> {
        self.bands.iter().map(BandSettings::from_band).collect()
    }
}
