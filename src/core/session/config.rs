//! Rotation scheduling parameters.

use std::time::Duration;

use super::errors::{SessionError, SessionResult};

/// Scheduling parameters for transparent connection rotation.
///
/// Upstream enforces a hard per-connection duration ceiling. To keep a
/// logical session running past it, the rotator opens a replacement
/// connection a safety margin before the ceiling, dual-writes audio to both
/// connections for a short overlap window, then promotes the replacement and
/// closes the outgoing connection. With the defaults the rotation fires 55
/// minutes into each connection's life.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Hard per-connection duration ceiling enforced by upstream.
    pub connection_lifetime: Duration,

    /// Safety margin subtracted from the ceiling; rotation fires at
    /// `connection_lifetime - rotation_margin`.
    pub rotation_margin: Duration,

    /// Duration of the dual-write window during which both the outgoing and
    /// the replacement connection receive every audio frame.
    pub overlap_window: Duration,

    /// Delay before retrying a failed handover. Retries repeat until one
    /// succeeds or the session is stopped; a session running past the hard
    /// ceiling without a handover would be cut off by upstream.
    pub handover_retry_delay: Duration,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            connection_lifetime: Duration::from_secs(60 * 60),
            rotation_margin: Duration::from_secs(5 * 60),
            overlap_window: Duration::from_secs(10),
            handover_retry_delay: Duration::from_secs(15),
        }
    }
}

impl RotationPolicy {
    /// Time between a connection becoming primary and its rotation firing.
    pub fn rotation_interval(&self) -> Duration {
        self.connection_lifetime
            .saturating_sub(self.rotation_margin)
    }

    /// Validate the policy.
    ///
    /// The margin must leave a positive rotation interval, and the overlap
    /// window plus retry delay must fit inside the margin so a first retry
    /// still has a chance to complete before the ceiling.
    pub fn validate(&self) -> SessionResult<()> {
        if self.rotation_margin >= self.connection_lifetime {
            return Err(SessionError::InitializationError(format!(
                "rotation_margin ({:?}) must be smaller than connection_lifetime ({:?})",
                self.rotation_margin, self.connection_lifetime
            )));
        }
        if self.overlap_window + self.handover_retry_delay > self.rotation_margin {
            return Err(SessionError::InitializationError(format!(
                "overlap_window ({:?}) plus handover_retry_delay ({:?}) must fit inside rotation_margin ({:?})",
                self.overlap_window, self.handover_retry_delay, self.rotation_margin
            )));
        }
        Ok(())
    }
}
