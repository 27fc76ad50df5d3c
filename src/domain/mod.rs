//! Domain layer - Resource model, path grammar and port definitions
//!
//! This module defines the core traits (ports) that adapters implement,
//! following hexagonal architecture principles.

pub mod path;
pub mod ports;
pub mod resources;

pub use path::*;
pub use ports::*;
pub use resources::*;
