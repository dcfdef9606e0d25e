//! Core types and constants for beacon-based indoor positioning

pub mod types;
pub mod constants;

pub use types::*;
pub use constants::*;
