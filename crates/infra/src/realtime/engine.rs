//! Real-time EQ engine split into an editor side and an audio side
//!
//! [`create_engine`] builds both halves from a configuration. The
//! [`EqProcessor`] is moved to the audio thread; the [`EqController`] stays
//! with the editor and is polled through [`EqController::refresh`].

use crate::realtime::command::BandCommand;
use crate::realtime::spectrum_feed::{spectrum_channel, SpectrumPublisher, SpectrumReceiver};
use crate::realtime::{
    COMMAND_QUEUE_CAPACITY, FRAMES_PER_CHANNEL, MAX_COMMANDS_PER_BLOCK, MAX_REMOVALS_IN_FLIGHT,
    RETIRED_QUEUE_CAPACITY,
};
use crossbeam::atomic::AtomicCell;
use crossbeam::channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use minstrel_core::domain::audio::{AudioBuffer, AudioError, ProcessSpec, Result};
use minstrel_core::domain::config::EqConfig;
use minstrel_core::domain::{
    BandChain, BandId, BandPosition, BandSettings, EqBand, FilterSpec, FilterType, GraphMapping,
    MultiChannelAnalyzer, ResponseCurve, ResponseCurveSampler,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Q given to bands created by clicking on the graph
const CLICK_BAND_Q: f32 = 1.0;

/// Build a connected controller/processor pair
pub fn create_engine(config: &EqConfig) -> Result<(EqController, EqProcessor)> {
    create_engine_with_queue(config, COMMAND_QUEUE_CAPACITY)
}

/// Build a connected pair with a custom command queue depth
pub fn create_engine_with_queue(
    config: &EqConfig,
    queue_capacity: usize,
) -> Result<(EqController, EqProcessor)> {
    config
        .validate()
        .map_err(|e| AudioError::InvalidConfiguration(e.to_string()))?;

    let spec = config.engine.process_spec();
    let mirror = BandChain::from_settings(&config.bands, &spec);
    let chain = mirror.clone();

    let analyzer = MultiChannelAnalyzer::new(spec.num_channels, config.engine.fft_order, spec.sample_rate)?;
    let (publisher, receiver) =
        spectrum_channel(analyzer.num_bins(), FRAMES_PER_CHANNEL * spec.num_channels);

    let (command_tx, command_rx) = bounded(queue_capacity.max(1));
    let (retired_tx, retired_rx) = bounded(RETIRED_QUEUE_CAPACITY);
    let (feed_tx, feed_rx) = unbounded();
    let shared_spec = Arc::new(AtomicCell::new(spec));

    let sampler = ResponseCurveSampler::new(config.engine.curve_points);
    let curve = sampler.sample(&mirror);

    info!(
        bands = mirror.len(),
        sample_rate = spec.sample_rate,
        channels = spec.num_channels,
        fft_size = analyzer.fft_size(),
        "EQ engine created"
    );

    let controller = EqController {
        chain: mirror,
        commands: command_tx,
        backlog: VecDeque::new(),
        retired: retired_rx,
        removals_in_flight: 0,
        spectrum: receiver,
        feeds: feed_rx,
        dropped_before: 0,
        shared_spec: Arc::clone(&shared_spec),
        spec,
        sampler,
        curve,
        spectra: vec![vec![0.0; analyzer.num_bins()]; spec.num_channels],
        fresh: vec![false; spec.num_channels],
    };

    let processor = EqProcessor {
        chain,
        analyzer,
        fft_order: config.engine.fft_order,
        commands: command_rx,
        retired: retired_tx,
        spectrum: publisher,
        feeds: feed_tx,
        shared_spec,
        spec,
    };

    Ok((controller, processor))
}

/// Audio-thread half of the engine
pub struct EqProcessor {
    chain: BandChain,
    analyzer: MultiChannelAnalyzer,
    fft_order: u32,
    commands: Receiver<BandCommand>,
    retired: Sender<EqBand>,
    spectrum: SpectrumPublisher,
    feeds: Sender<SpectrumReceiver>,
    shared_spec: Arc<AtomicCell<ProcessSpec>>,
    spec: ProcessSpec,
}

impl EqProcessor {
    /// Adopt a new stream format
    ///
    /// Not real-time safe: state may be reallocated. The controller picks the
    /// new format up before its next band change or refresh.
    pub fn prepare(&mut self, spec: ProcessSpec) -> Result<()> {
        spec.validate()?;
        self.apply_pending_commands();
        self.chain.prepare(&spec);

        if spec.num_channels != self.analyzer.num_channels() {
            self.analyzer = MultiChannelAnalyzer::new(spec.num_channels, self.fft_order, spec.sample_rate)?;

            // The frame pool is sized per channel
            let (publisher, receiver) =
                spectrum_channel(self.analyzer.num_bins(), FRAMES_PER_CHANNEL * spec.num_channels);
            self.spectrum = publisher;
            let _ = self.feeds.send(receiver);
        } else {
            self.analyzer.set_sample_rate(spec.sample_rate);
            self.analyzer.reset();
        }

        self.spec = spec;
        self.shared_spec.store(spec);

        info!(
            sample_rate = spec.sample_rate,
            block_size = spec.max_block_size,
            channels = spec.num_channels,
            "EQ processor prepared"
        );
        Ok(())
    }

    /// Process one block in place
    ///
    /// Queued changes are applied first, then the chain runs and the output
    /// feeds the analyzer.
    pub fn process(&mut self, buffer: &mut AudioBuffer) {
        self.apply_pending_commands();
        self.chain.process(buffer);
        self.analyzer.process_buffer(buffer);
        self.publish_spectra();
    }

    /// Apply up to [`MAX_COMMANDS_PER_BLOCK`] queued commands
    ///
    /// Returns the number applied.
    pub fn apply_pending_commands(&mut self) -> usize {
        let mut applied = 0;
        while applied < MAX_COMMANDS_PER_BLOCK {
            match self.commands.try_recv() {
                Ok(command) => {
                    self.apply(command);
                    applied += 1;
                }
                Err(_) => break,
            }
        }
        applied
    }

    fn apply(&mut self, command: BandCommand) {
        match command {
            BandCommand::Add(mut band) => {
                // A band built before the last format change is brought up to
                // date within its reserved state
                let fits = band.is_prepared_for(&self.spec) || band.prepare_in_place(&self.spec);
                if !fits || self.chain.contains(band.id()) || self.chain.len() >= self.chain.capacity() {
                    self.retire(band);
                } else {
                    // Every failure case was ruled out above
                    let _ = self.chain.add_band(band);
                }
            }
            BandCommand::Remove(id) => {
                if let Some(band) = self.chain.remove_band(id) {
                    self.retire(band);
                }
            }
            BandCommand::Update { id, spec, coeffs } => {
                if let Some(band) = self.chain.band_mut(id) {
                    band.publish(spec, coeffs);
                }
            }
            BandCommand::Reset => {
                self.chain.reset();
                self.analyzer.reset();
            }
        }
    }

    fn retire(&self, band: EqBand) {
        // The controller keeps removals in flight below the queue capacity, so
        // this only fails once the controller is gone
        let _ = self.retired.try_send(band);
    }

    fn publish_spectra(&mut self) {
        for channel in 0..self.analyzer.num_channels() {
            if self.analyzer.is_new_data_available(channel) {
                self.spectrum
                    .publish(channel, self.analyzer.channel(channel).magnitudes());
                self.analyzer.reset_new_data_flag(channel);
            }
        }
    }

    /// The chain as the audio thread sees it
    pub fn chain(&self) -> &BandChain {
        &self.chain
    }

    pub fn analyzer(&self) -> &MultiChannelAnalyzer {
        &self.analyzer
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    /// Commands queued but not yet applied
    pub fn pending_commands(&self) -> usize {
        self.commands.len()
    }
}

/// What a [`EqController::refresh`] observed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Refresh {
    /// At least one channel received a new spectrum
    pub spectrum_updated: bool,
    /// Bands handed back by the processor and freed here
    pub retired_bands: usize,
    /// Commands not yet delivered to the processor
    pub pending_commands: usize,
    /// The processor was prepared with a new stream format
    pub format_changed: bool,
}

/// Editor-side half of the engine
pub struct EqController {
    chain: BandChain,
    commands: Sender<BandCommand>,
    backlog: VecDeque<BandCommand>,
    retired: Receiver<EqBand>,
    removals_in_flight: usize,
    spectrum: SpectrumReceiver,
    feeds: Receiver<SpectrumReceiver>,
    dropped_before: u64,
    shared_spec: Arc<AtomicCell<ProcessSpec>>,
    spec: ProcessSpec,
    sampler: ResponseCurveSampler,
    curve: ResponseCurve,
    spectra: Vec<Vec<f32>>,
    fresh: Vec<bool>,
}

impl EqController {
    /// Add a band with explicit parameters
    pub fn add_band(&mut self, kind: FilterType, frequency_hz: f32, gain_db: f32, q: f32) -> Result<BandId> {
        let band = EqBand::from_spec(FilterSpec::new(
            kind,
            frequency_hz,
            gain_db,
            q,
            self.spec.sample_rate,
        ));
        self.insert(band)
    }

    /// Add a peak band where the user clicked on the graph
    pub fn add_band_at(&mut self, x: f32, y: f32, mapping: &GraphMapping) -> Result<BandId> {
        let mut band = EqBand::from_spec(FilterSpec::new(
            FilterType::Peak,
            mapping.x_to_frequency(x),
            mapping.y_to_gain(y),
            CLICK_BAND_Q,
            self.spec.sample_rate,
        ));
        band.set_position(BandPosition::new(x, y));
        self.insert(band)
    }

    fn insert(&mut self, mut band: EqBand) -> Result<BandId> {
        self.follow_format();
        band.prepare(&self.spec);
        let id = self.chain.add_band(band.clone())?;
        self.send(BandCommand::Add(band))?;
        debug!(band = %id, total = self.chain.len(), "Band added");
        Ok(id)
    }

    pub fn remove_band(&mut self, id: BandId) -> Result<()> {
        self.chain
            .remove_band(id)
            .ok_or(AudioError::BandNotFound(id))?;
        self.send(BandCommand::Remove(id))?;
        debug!(band = %id, total = self.chain.len(), "Band removed");
        Ok(())
    }

    /// Drag a band marker: frequency follows x, gain follows y
    pub fn move_band(&mut self, id: BandId, x: f32, y: f32, mapping: &GraphMapping) -> Result<()> {
        let frequency_hz = mapping.x_to_frequency(x);
        let gain_db = mapping.y_to_gain(y);
        self.update(id, |band| {
            band.set_frequency(frequency_hz);
            band.set_gain(gain_db);
            band.set_position(BandPosition::new(x, y));
        })
    }

    pub fn set_frequency(&mut self, id: BandId, frequency_hz: f32) -> Result<()> {
        self.update(id, |band| band.set_frequency(frequency_hz))
    }

    pub fn set_gain(&mut self, id: BandId, gain_db: f32) -> Result<()> {
        self.update(id, |band| band.set_gain(gain_db))
    }

    pub fn set_q(&mut self, id: BandId, q: f32) -> Result<()> {
        self.update(id, |band| band.set_q(q))
    }

    pub fn set_type(&mut self, id: BandId, kind: FilterType) -> Result<()> {
        self.update(id, |band| band.set_type(kind))
    }

    /// Move a marker without touching the filter
    pub fn set_position(&mut self, id: BandId, position: BandPosition) -> Result<()> {
        self.chain
            .band_mut(id)
            .ok_or(AudioError::BandNotFound(id))?
            .set_position(position);
        Ok(())
    }

    fn update<F>(&mut self, id: BandId, change: F) -> Result<()>
    where
        F: FnOnce(&mut EqBand),
    {
        self.follow_format();
        let band = self.chain.band_mut(id).ok_or(AudioError::BandNotFound(id))?;
        change(band);
        let command = BandCommand::update_from(band);
        self.send(command)
    }

    /// Replace every band with the given list
    pub fn load_settings(&mut self, settings: &[BandSettings]) -> Result<()> {
        let ids: Vec<BandId> = self.chain.ids().collect();
        for id in ids {
            self.remove_band(id)?;
        }
        for band_settings in settings.iter().take(self.chain.capacity()) {
            self.insert(band_settings.to_band(self.spec.sample_rate))?;
        }
        info!(bands = self.chain.len(), "Band settings loaded");
        Ok(())
    }

    /// Clear filter memory and analyzer state on the audio side
    pub fn reset_audio_state(&mut self) -> Result<()> {
        self.send(BandCommand::Reset)
    }

    fn send(&mut self, command: BandCommand) -> Result<()> {
        self.flush_backlog();
        if !self.backlog.is_empty() {
            self.defer(command);
            return Ok(());
        }

        match self.deliver(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(command)) => {
                debug!("Command queue busy, deferring");
                self.defer(command);
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("EQ processor is gone, command dropped");
                Err(AudioError::StreamError("processor disconnected".to_string()))
            }
        }
    }

    /// Queue locally, merging with a trailing update of the same band
    fn defer(&mut self, command: BandCommand) {
        if let (
            BandCommand::Update { id, .. },
            Some(BandCommand::Update { id: last_id, .. }),
        ) = (&command, self.backlog.back())
        {
            if id == last_id {
                self.backlog.pop_back();
            }
        }
        self.backlog.push_back(command);
    }

    /// Hand one command to the processor
    ///
    /// A removal is held back as `Full` while the retired queue could not take
    /// the band it frees.
    fn deliver(&mut self, command: BandCommand) -> std::result::Result<(), TrySendError<BandCommand>> {
        let removal = matches!(command, BandCommand::Remove(_));
        if removal && self.removals_in_flight >= MAX_REMOVALS_IN_FLIGHT {
            return Err(TrySendError::Full(command));
        }
        self.commands.try_send(command)?;
        if removal {
            self.removals_in_flight += 1;
        }
        Ok(())
    }

    fn flush_backlog(&mut self) {
        while let Some(command) = self.backlog.pop_front() {
            match self.deliver(command) {
                Ok(()) => {}
                Err(TrySendError::Full(command)) => {
                    self.backlog.push_front(command);
                    break;
                }
                Err(TrySendError::Disconnected(_)) => {
                    self.backlog.clear();
                    break;
                }
            }
        }
    }

    /// Periodic editor poll
    ///
    /// Delivers deferred commands, frees retired bands, follows format
    /// changes, collects spectra and resamples the response curve.
    pub fn refresh(&mut self) -> Refresh {
        let retired_bands = self.retired.try_iter().count();
        self.removals_in_flight = self.removals_in_flight.saturating_sub(retired_bands);

        let format_changed = self.follow_format();
        self.flush_backlog();

        let spectra = &mut self.spectra;
        let fresh = &mut self.fresh;
        let frames = self.spectrum.drain(|frame| {
            if let Some(target) = spectra.get_mut(frame.channel) {
                target.clear();
                target.extend_from_slice(&frame.magnitudes);
                fresh[frame.channel] = true;
            }
        });

        self.sampler.sample_into(&self.chain, &mut self.curve);

        Refresh {
            spectrum_updated: frames > 0,
            retired_bands,
            pending_commands: self.pending_commands(),
            format_changed,
        }
    }

    /// Adopt the processor's stream format if it changed
    ///
    /// Bands are then built for the format the processor runs with.
    fn follow_format(&mut self) -> bool {
        if let Some(receiver) = self.feeds.try_iter().last() {
            self.dropped_before += self.spectrum.dropped_frames();
            self.spectrum = receiver;
        }

        let spec = self.shared_spec.load();
        if spec == self.spec {
            return false;
        }

        self.spec = spec;
        self.chain.prepare(&spec);
        let num_bins = self.spectra.first().map(Vec::len).unwrap_or(0);
        self.spectra.resize(spec.num_channels, vec![0.0; num_bins]);
        self.fresh.resize(spec.num_channels, false);
        info!(
            sample_rate = spec.sample_rate,
            channels = spec.num_channels,
            "Controller followed format change"
        );
        true
    }

    /// Bands in processing order
    pub fn bands(&self) -> &[EqBand] {
        self.chain.bands()
    }

    pub fn band(&self, id: BandId) -> Option<&EqBand> {
        self.chain.band(id)
    }

    pub fn chain(&self) -> &BandChain {
        &self.chain
    }

    /// Band whose marker lies within `radius` pixels of the pointer
    pub fn band_near(&self, x: f32, y: f32, radius: f32) -> Option<BandId> {
        self.chain
            .bands()
            .iter()
            .map(|band| {
                let p = band.position();
                (band.id(), (p.x - x).hypot(p.y - y))
            })
            .filter(|&(_, distance)| distance <= radius)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)
    }

    /// Response curve as of the last refresh
    pub fn curve(&self) -> &ResponseCurve {
        &self.curve
    }

    pub fn total_response_db(&self, frequency_hz: f32) -> f32 {
        self.chain.total_response_db(frequency_hz)
    }

    pub fn settings(&self) -> Vec<BandSettings> {
        self.chain.settings()
    }

    /// Stream format as of the last refresh
    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    pub fn num_channels(&self) -> usize {
        self.spectra.len()
    }

    /// Latest spectrum of one channel
    pub fn spectrum(&self, channel: usize) -> Option<&[f32]> {
        self.spectra.get(channel).map(Vec::as_slice)
    }

    /// # Panics
    /// On an invalid channel or bin.
    pub fn magnitude_for_bin(&self, channel: usize, bin: usize) -> f32 {
        assert!(
            channel < self.spectra.len(),
            "channel {} out of range ({} channels)",
            channel,
            self.spectra.len()
        );
        let spectrum = &self.spectra[channel];
        assert!(bin < spectrum.len(), "bin {} out of range (0..{})", bin, spectrum.len());
        spectrum[bin]
    }

    pub fn has_new_spectrum(&self, channel: usize) -> bool {
        self.fresh.get(channel).copied().unwrap_or(false)
    }

    pub fn reset_new_spectrum_flag(&mut self, channel: usize) {
        if let Some(flag) = self.fresh.get_mut(channel) {
            *flag = false;
        }
    }

    /// Spectra dropped because the editor fell behind
    pub fn dropped_spectrum_frames(&self) -> u64 {
        self.dropped_before + self.spectrum.dropped_frames()
    }

    /// Commands not yet delivered to or applied by the processor
    pub fn pending_commands(&self) -> usize {
        self.backlog.len() + self.commands.len()
    }
}
