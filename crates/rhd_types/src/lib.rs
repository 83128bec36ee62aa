//! Shared types for the RHD2000 acquisition stack
//!
//! This crate holds the pieces every other crate agrees on: identifiers for
//! ports, streams and auxiliary command slots, the channel table, the geometry of the Rhythm USB
//! frame, the error kinds, and the serde configuration types.

pub mod channels;
pub mod config;
pub mod error;
pub mod ids;
pub mod layout;

// Re-export commonly used types
pub use channels::*;
pub use config::*;
pub use error::*;
pub use ids::*;
