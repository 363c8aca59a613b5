//! Domain entities and signal-processing rules

pub mod analyzer;
pub mod audio;
pub mod band;
pub mod chain;
pub mod config;
pub mod filter;
pub mod response;

// Re-export specific items to avoid ambiguous glob imports
pub use analyzer::{MultiChannelAnalyzer, SpectrumAnalyzer};
pub use audio::{AudioBuffer, AudioError, ProcessSpec};
pub use band::{BandId, BandPosition, EqBand};
pub use chain::{BandChain, BandSettings};
pub use config::{ConfigError, ConfigManager, EngineConfig, EqConfig};
pub use filter::{BiquadCoeffs, BiquadState, FilterSpec, FilterType};
pub use response::{CurvePoint, GraphMapping, ResponseCurve, ResponseCurveSampler};
