//! Core types shared by the feed services

pub mod instrument;
pub mod market;

// Re-export all types
pub use instrument::*;
pub use market::*;
