//! Messages from the controller to the processor

use minstrel_core::domain::{BandId, BiquadCoeffs, EqBand, FilterSpec};

/// One change to the processing chain
///
/// Every variant is applied between two blocks, never inside one.
#[derive(Debug, Clone)]
pub enum BandCommand {
    /// Append a band, already prepared for the current context
    Add(EqBand),

    /// Remove a band; it is handed back on the retired queue
    Remove(BandId),

    /// Swap in a complete parameter set with matching coefficients
    Update {
        id: BandId,
        spec: FilterSpec,
        coeffs: BiquadCoeffs,
    },

    /// Clear filter memory and analyzer state
    Reset,
}

impl BandCommand {
    /// Band this command targets, if any
    pub fn band_id(&self) -> Option<BandId> {
        match self {
            BandCommand::Add(band) => Some(band.id()),
            BandCommand::Remove(id) | BandCommand::Update { id, .. } => Some(*id),
            BandCommand::Reset => None,
        }
    }

    /// Build an update carrying the band's current parameters
    pub fn update_from(band: &EqBand) -> Self {
        BandCommand::Update {
            id: band.id(),
            spec: *band.spec(),
            coeffs: *band.coefficients(),
        }
    }
}
