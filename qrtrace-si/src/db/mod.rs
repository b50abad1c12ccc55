//! Database access for qrtrace-si

pub mod fingerprints;
pub mod sightings;
pub mod stats;

pub use fingerprints::FingerprintStore;
pub use sightings::SightingLog;
