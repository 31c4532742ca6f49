//! Domain layer - Typed payloads and port definitions
//!
//! This module defines the plain data exchanged with the reconciliation
//! adapter and the traits (ports) that backend and store adapters implement.

pub mod model;
pub mod ports;

pub use model::*;
pub use ports::*;
