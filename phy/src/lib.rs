//! Downlink Resource Grid Mapping Library
//!
//! This crate implements the per-slot mapping of modulated and spatially
//! precoded data symbols onto the time-frequency resource grid that is
//! handed to the OFDM modulator, according to 3GPP TS 38.211.

pub mod precoder;
pub mod precoding;
pub mod re_buffer;
pub mod re_pattern;
pub mod resource_grid;

use thiserror::Error;

// Re-export commonly used types
pub use precoder::{make_channel_precoder, ChannelPrecoder, GenericChannelPrecoder};
pub use precoding::{PrecodingConfiguration, PrecodingWeightMatrix};
pub use re_buffer::{ReBuffer, ReBufferReader, ReBufferView};
pub use re_pattern::{RePattern, RePatternList};
pub use resource_grid::{ResourceGrid, ResourceGridReader, ResourceGridWriter, SymbolBuffer};

/// Common errors for the physical layer support components
#[derive(Error, Debug)]
pub enum PhyError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}
