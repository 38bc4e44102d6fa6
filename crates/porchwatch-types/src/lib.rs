//! Shared domain types for the Porchwatch appliance.

pub mod clip;
pub mod config;
pub mod events;
pub mod telemetry;
pub mod vision;

mod errors;

pub use errors::{PorchwatchError, Result};
