//! Utility helpers shared across crates.

pub mod error;
pub mod hash;
