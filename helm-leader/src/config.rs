//! Election timing configuration.

use std::time::Duration;

use helm_paxos::network::DEFAULT_QUORUM_REQUEST_TIMEOUT;

/// Timing knobs for [`LeaderElectionService`](crate::service::LeaderElectionService).
#[derive(Debug, Clone)]
pub struct LeaderElectionConfig {
    /// How long to sleep after the suspected leader answers a ping
    /// positively, before re-checking leadership state.
    pub update_polling_rate: Duration,
    /// Upper bound of the uniform random wait before proposing leadership.
    /// The jitter keeps simultaneous candidates from duelling forever.
    pub random_wait_before_proposing: Duration,
    /// Deadline for a single leader ping, and for the UUID probe wave used
    /// to resolve a suspected leader.
    pub leader_ping_response_wait: Duration,
    /// Deadline for quorum read waves (round verification, catch-up).
    pub quorum_request_timeout: Duration,
}

impl Default for LeaderElectionConfig {
    fn default() -> Self {
        Self {
            update_polling_rate: Duration::from_secs(5),
            random_wait_before_proposing: Duration::from_secs(1),
            leader_ping_response_wait: Duration::from_secs(5),
            quorum_request_timeout: DEFAULT_QUORUM_REQUEST_TIMEOUT,
        }
    }
}
