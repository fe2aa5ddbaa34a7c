//! Proposer configuration.

use std::time::Duration;

/// Timing knobs for a [`Proposer`](crate::proposer::Proposer).
#[derive(Debug, Clone)]
pub struct ProposerConfig {
    /// Deadline for each protocol phase (prepare wave, accept wave).
    pub phase_timeout: Duration,
}

impl Default for ProposerConfig {
    fn default() -> Self {
        Self {
            phase_timeout: Duration::from_secs(5),
        }
    }
}
