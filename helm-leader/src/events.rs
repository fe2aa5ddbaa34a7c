//! Observability hooks for the election state machine.

use helm_paxos::proposer::RoundFailure;
use helm_paxos::types::{PaxosValue, SeqId};
use tracing::{debug, warn};

/// Invoked at every branch of the election loop. Recorders observe only;
/// they have no effect on control flow and must not panic out to callers.
pub trait EventRecorder: Send + Sync + 'static {
    fn record_proposal_attempt(&self, _seq: SeqId) {}

    fn record_proposal_failure(&self, _failure: &RoundFailure) {}

    fn record_leader_ping_timeout(&self) {}

    fn record_leader_ping_returned_false(&self) {}

    fn record_leader_ping_failure(&self, _error: &(dyn std::error::Error + 'static)) {}

    fn record_no_quorum(&self, _value: &PaxosValue) {}

    fn record_not_leading(&self, _value: &PaxosValue) {}
}

/// Discards every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpEventRecorder;

impl EventRecorder for NoOpEventRecorder {}

/// Emits every event as a structured tracing event.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEventRecorder;

impl EventRecorder for TracingEventRecorder {
    fn record_proposal_attempt(&self, seq: SeqId) {
        debug!(round = ?seq, "proposing leadership");
    }

    fn record_proposal_failure(&self, failure: &RoundFailure) {
        debug!(%failure, "leadership proposal failed");
    }

    fn record_leader_ping_timeout(&self) {
        warn!("timed out pinging the suspected leader");
    }

    fn record_leader_ping_returned_false(&self) {
        debug!("suspected leader no longer believes it is leading");
    }

    fn record_leader_ping_failure(&self, error: &(dyn std::error::Error + 'static)) {
        warn!(%error, "failed to ping the suspected leader");
    }

    fn record_no_quorum(&self, value: &PaxosValue) {
        warn!(round = ?value.round, "no quorum while confirming leadership");
    }

    fn record_not_leading(&self, value: &PaxosValue) {
        debug!(round = ?value.round, "leadership token is no longer valid");
    }
}
