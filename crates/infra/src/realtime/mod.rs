//! Lock-free controller/processor split
//!
//! - The processor runs on the audio thread. It never locks, never logs, and
//!   does not allocate once prepared.
//! - The controller runs on the editor thread. It keeps a mirror of the band
//!   chain for reads and the response curve, and ships fully designed
//!   coefficient sets to the processor.
//! - Removed bands travel back to the controller so they are freed off the
//!   audio thread.

pub mod command;
pub mod engine;
pub mod spectrum_feed;

pub use command::BandCommand;
pub use engine::{create_engine, create_engine_with_queue, EqController, EqProcessor, Refresh};
pub use spectrum_feed::{spectrum_channel, SpectrumFrame, SpectrumPublisher, SpectrumReceiver};

use minstrel_core::domain::chain::MAX_BANDS;

/// Default depth of the controller to processor command queue
pub const COMMAND_QUEUE_CAPACITY: usize = 256;

/// Commands applied by the processor before each block
pub const MAX_COMMANDS_PER_BLOCK: usize = 64;

/// Bands the processor can hand back before the controller reaps them
pub const RETIRED_QUEUE_CAPACITY: usize = MAX_BANDS * 2;

/// Removals the controller lets through before it reaps retired bands
///
/// The rest of the retired queue is left for rejected additions.
pub const MAX_REMOVALS_IN_FLIGHT: usize = MAX_BANDS;

/// Spectrum frames in flight per analyzer channel
pub const FRAMES_PER_CHANNEL: usize = 4;
