//! Common Utilities and Types Library
//!
//! This crate provides shared low-level types and utilities used across the
//! downlink signal processing chain.

pub mod bitset;
pub mod types;
pub mod utils;

// Re-export commonly used items
pub use bitset::BoundedBitset;
pub use types::*;
pub use utils::*;
