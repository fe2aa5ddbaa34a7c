//! Service-level error contexts.
//!
//! These are the fatal, surfaced errors; recoverable failures (round
//! failures, missing quorums, ping problems) stay inside the election loop
//! and are visible only through the event recorder. Used as
//! `error_stack::Report` contexts with printable attachments for detail.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderElectionError {
    /// The cluster configuration is broken: two peers share an identity,
    /// or a remote peer claims this node's identity. The local service
    /// state stays valid, but the cluster cannot elect safely.
    Misconfiguration,
    /// A consensus invariant was violated, e.g. two different values
    /// learned for one round.
    InvariantViolation,
    /// Leadership could not be relinquished because no quorum was
    /// reachable.
    ServiceNotAvailable,
    /// The durable state log failed.
    Storage,
}

impl fmt::Display for LeaderElectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeaderElectionError::Misconfiguration => {
                f.write_str("leader election cluster is misconfigured")
            }
            LeaderElectionError::InvariantViolation => {
                f.write_str("consensus invariant violated")
            }
            LeaderElectionError::ServiceNotAvailable => {
                f.write_str("could not relinquish leadership")
            }
            LeaderElectionError::Storage => f.write_str("durable state log failed"),
        }
    }
}

impl std::error::Error for LeaderElectionError {}
