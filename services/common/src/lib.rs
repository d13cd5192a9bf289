//! Common types, errors and the tick bus shared by the feed services

pub mod config;
pub mod constants;
pub mod errors;
pub mod event_bus;
pub mod types;

pub use config::*;
pub use constants::*;
pub use errors::*;
pub use event_bus::*;
pub use types::*;
