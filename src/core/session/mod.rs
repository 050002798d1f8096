//! # Session
//!
//! Long-running streaming session management on top of a single-connection
//! transcription client.
//!
//! This module provides [`SessionRotator`], which keeps one logical session
//! alive indefinitely even though upstream enforces a hard per-connection
//! duration ceiling. Shortly before the ceiling it opens a replacement
//! connection, dual-writes audio to old and new for a short overlap window,
//! then promotes the replacement and closes the outgoing connection. Result,
//! error, finished, and progress callbacks are filtered so consumers only
//! ever hear from the authoritative connection.

pub mod config;
pub mod errors;
mod rotator;

#[cfg(test)]
pub mod test_support;

#[cfg(test)]
mod tests;

// Re-export commonly used items
pub use config::RotationPolicy;
pub use errors::{SessionError, SessionResult};
pub use rotator::{ConnectionFactory, SessionRotator};
