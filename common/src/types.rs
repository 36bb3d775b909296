//! Common Types for the Physical Layer
//!
//! Defines the fundamental grid dimensions used throughout the downlink
//! signal processing chain, per 3GPP TS 38.211.

/// Number of subcarriers in one resource block.
pub const NRE: usize = 12;

/// Maximum number of resource blocks in one carrier.
pub const MAX_RB: usize = 275;

/// Maximum number of OFDM symbols in one slot (normal cyclic prefix).
pub const MAX_NSYMB_PER_SLOT: usize = 14;

/// Maximum number of subcarriers in one OFDM symbol.
pub const MAX_NOF_SUBC: usize = MAX_RB * NRE;
