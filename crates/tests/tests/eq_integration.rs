//! Integration tests for the EQ engine
//!
//! These tests drive the controller and processor together, including with the
//! processor running on its own thread.

use minstrel_core::domain::config::{EngineConfig, EqConfig};
use minstrel_core::domain::{
    AudioBuffer, BandSettings, EqBand, FilterType, GraphMapping, ProcessSpec, ResponseCurveSampler,
};
use minstrel_infra::realtime::{create_engine, EqController, EqProcessor};
use minstrel_tests::{gain_db, generate_sine_wave, impulse};
use proptest::prelude::*;
use tempfile::TempDir;

const SAMPLE_RATE: f64 = 48000.0;
const BLOCK: usize = 256;

fn engine_config(channels: usize, bands: Vec<BandSettings>) -> EqConfig {
    EqConfig {
        engine: EngineConfig {
            sample_rate: SAMPLE_RATE as u32,
            block_size: BLOCK,
            channels,
            fft_order: 11,
            ..EngineConfig::default()
        },
        bands,
    }
}

/// Run a mono signal through the processor block by block
fn process_signal(processor: &mut EqProcessor, signal: &[f32]) -> Vec<f32> {
    let mut output = Vec::with_capacity(signal.len());
    let mut buffer = AudioBuffer::new(1, BLOCK);
    for chunk in signal.chunks(BLOCK) {
        buffer.set_num_frames(chunk.len());
        buffer.channel_mut(0).copy_from_slice(chunk);
        processor.process(&mut buffer);
        output.extend_from_slice(buffer.channel(0));
    }
    output
}

fn drain_commands(controller: &mut EqController, processor: &mut EqProcessor) {
    for _ in 0..100 {
        controller.refresh();
        processor.apply_pending_commands();
        if controller.pending_commands() == 0 {
            break;
        }
    }
}

fn assert_in_sync(controller: &EqController, processor: &EqProcessor) {
    let ids: Vec<_> = controller.chain().ids().collect();
    let audio_ids: Vec<_> = processor.chain().ids().collect();
    assert_eq!(ids, audio_ids);
    for band in controller.bands() {
        let audio = processor.chain().band(band.id()).unwrap();
        assert_eq!(audio.coefficients(), band.coefficients());
    }
}

// ============================================================================
// FILTER BEHAVIOUR THROUGH THE ENGINE
// ============================================================================

#[test]
fn test_peak_boost_end_to_end() {
    let (mut controller, mut processor) = create_engine(&engine_config(1, Vec::new())).unwrap();
    controller.add_band(FilterType::Peak, 1000.0, 12.0, 4.0).unwrap();

    let input = generate_sine_wave(1000.0, 0.25, SAMPLE_RATE, SAMPLE_RATE as usize, 0);
    let output = process_signal(&mut processor, &input);

    let tail = input.len() - 4800;
    let measured = gain_db(&input[tail..], &output[tail..]);
    assert!((measured - 12.0).abs() < 0.1, "measured {measured} dB");
}

#[test]
fn test_notch_end_to_end() {
    let (mut controller, mut processor) = create_engine(&engine_config(1, Vec::new())).unwrap();
    controller.add_band(FilterType::Notch, 1000.0, 0.0, 2.0).unwrap();

    let input = generate_sine_wave(1000.0, 0.5, SAMPLE_RATE, SAMPLE_RATE as usize, 0);
    let output = process_signal(&mut processor, &input);

    let tail = input.len() - 4800;
    assert!(gain_db(&input[tail..], &output[tail..]) < -20.0);
}

#[test]
fn test_flat_default_bands_are_transparent() {
    let (_controller, mut processor) =
        create_engine(&engine_config(1, BandSettings::default_bands())).unwrap();

    let input = generate_sine_wave(440.0, 0.5, SAMPLE_RATE, 4096, 0);
    let output = process_signal(&mut processor, &input);

    for (x, y) in input.iter().zip(&output) {
        assert!((x - y).abs() < 1e-4);
    }
}

#[test]
fn test_parameter_change_applies_on_next_block() {
    let (mut controller, mut processor) = create_engine(&engine_config(1, Vec::new())).unwrap();
    let id = controller.add_band(FilterType::Peak, 1000.0, 0.0, 1.0).unwrap();

    let first = generate_sine_wave(1000.0, 0.25, SAMPLE_RATE, BLOCK, 0);
    let output = process_signal(&mut processor, &first);
    assert!(gain_db(&first, &output).abs() < 0.01);

    controller.set_gain(id, -12.0).unwrap();
    let input = generate_sine_wave(1000.0, 0.25, SAMPLE_RATE, 48000, BLOCK);
    let output = process_signal(&mut processor, &input);

    let tail = input.len() - 4800;
    assert!((gain_db(&input[tail..], &output[tail..]) + 12.0).abs() < 0.1);
}

// ============================================================================
// CROSS-THREAD OPERATION
// ============================================================================

#[test]
fn test_processor_on_audio_thread() {
    let (mut controller, processor) = create_engine(&engine_config(2, BandSettings::default_bands())).unwrap();
    let mapping = GraphMapping::new(800.0, 400.0);

    let audio = std::thread::spawn(move || {
        let mut processor = processor;
        let mut buffer = AudioBuffer::new(2, BLOCK);
        let mut all_finite = true;

        for block in 0..2000 {
            let signal = generate_sine_wave(700.0, 0.5, SAMPLE_RATE, BLOCK, block * BLOCK);
            buffer.channel_mut(0).copy_from_slice(&signal);
            buffer.channel_mut(1).copy_from_slice(&signal);
            processor.process(&mut buffer);
            all_finite &= buffer.is_finite();
        }

        (processor, all_finite)
    });

    let mut added = Vec::new();
    for step in 0..300 {
        let x = (step * 37 % 800) as f32;
        let y = (step * 53 % 400) as f32;
        match step % 5 {
            0 if added.len() < 8 => added.push(controller.add_band_at(x, y, &mapping).unwrap()),
            1 if !added.is_empty() => {
                let id = added.remove(0);
                controller.remove_band(id).unwrap();
            }
            2 => {
                let id = controller.bands()[step % controller.bands().len()].id();
                controller.move_band(id, x, y, &mapping).unwrap();
            }
            3 => {
                let id = controller.bands()[0].id();
                controller.set_q(id, 0.3 + (step % 10) as f32).unwrap();
            }
            _ => {
                controller.refresh();
            }
        }
    }

    let (mut processor, all_finite) = audio.join().unwrap();
    assert!(all_finite);

    drain_commands(&mut controller, &mut processor);
    assert_in_sync(&controller, &processor);

    let refresh = controller.refresh();
    assert_eq!(refresh.pending_commands, 0);
    assert!(controller.spectrum(0).unwrap().iter().all(|m| m.is_finite()));
}

#[test]
fn test_spectrum_follows_processed_audio() {
    let (mut controller, mut processor) = create_engine(&engine_config(1, Vec::new())).unwrap();
    controller.add_band(FilterType::LowPass, 500.0, 0.0, 0.707).unwrap();

    // 300 Hz passes, 8 kHz is filtered out before it reaches the analyzer
    let low = generate_sine_wave(300.0, 0.3, SAMPLE_RATE, 2048, 0);
    let high = generate_sine_wave(8000.0, 0.3, SAMPLE_RATE, 2048, 0);
    let mixed: Vec<f32> = low.iter().zip(&high).map(|(a, b)| a + b).collect();

    process_signal(&mut processor, &mixed);
    controller.refresh();

    let resolution = SAMPLE_RATE / 2048.0;
    let low_bin = (300.0 / resolution).round() as usize;
    let high_bin = (8000.0 / resolution).round() as usize;
    assert!(controller.has_new_spectrum(0));
    assert!(controller.magnitude_for_bin(0, low_bin) > 10.0 * controller.magnitude_for_bin(0, high_bin));
}

#[test]
fn test_reformat_keeps_engine_consistent() {
    let (mut controller, mut processor) =
        create_engine(&engine_config(2, BandSettings::default_bands())).unwrap();
    let id = controller.add_band(FilterType::LowPass, 20000.0, 0.0, 0.707).unwrap();

    processor.prepare(ProcessSpec::new(22050.0, 512, 2)).unwrap();
    controller.refresh();

    let band = controller.band(id).unwrap();
    assert!(band.frequency() < 11025.0);
    assert!(band.coefficients().is_stable());
    assert_in_sync(&controller, &processor);
}

// ============================================================================
// CONFIGURATION
// ============================================================================

#[tokio::test]
async fn test_config_file_drives_engine() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");

    let mut config = engine_config(2, BandSettings::default_bands());
    config.bands[0].gain_db = 5.0;
    config.bands.push(BandSettings::new(FilterType::Notch, 60.0, 0.0, 10.0));
    config.save_to_file(&path).await.unwrap();

    let loaded = EqConfig::load_from_file(&path).await.unwrap();
    let (controller, processor) = create_engine(&loaded).unwrap();

    assert_eq!(controller.bands().len(), 4);
    assert_in_sync(&controller, &processor);

    let expected = ResponseCurveSampler::new(loaded.engine.curve_points).sample(&loaded.to_chain());
    assert_eq!(controller.curve().points(), expected.points());

    let saved = EqConfig::from_chain(loaded.engine.clone(), controller.chain());
    assert_eq!(saved, loaded);
}

// ============================================================================
// PROPERTIES
// ============================================================================

fn filter_type() -> impl Strategy<Value = FilterType> {
    prop::sample::select(FilterType::ALL.to_vec())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_any_controller_input_keeps_output_finite(
        kind in filter_type(),
        frequency in prop::num::f32::ANY,
        gain in prop::num::f32::ANY,
        q in prop::num::f32::ANY,
    ) {
        let (mut controller, mut processor) = create_engine(&engine_config(1, Vec::new())).unwrap();
        let id = controller.add_band(kind, 1000.0, 0.0, 1.0).unwrap();
        controller.set_frequency(id, frequency).unwrap();
        controller.set_gain(id, gain).unwrap();
        controller.set_q(id, q).unwrap();

        let band: &EqBand = controller.band(id).unwrap();
        prop_assert!(band.coefficients().is_finite());

        let output = process_signal(&mut processor, &impulse(SAMPLE_RATE as usize));
        prop_assert!(output.iter().all(|s| s.is_finite()));
        prop_assert!(controller.total_response_db(1000.0).abs() <= 24.0);
    }
}
