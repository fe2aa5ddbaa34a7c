//! Core Paxos value types.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier for one instance (round) of the consensus protocol.
///
/// Rounds are non-negative and strictly increasing. The reserved sentinel
/// [`SeqId::NO_LOG_ENTRY`] means "no round has occurred yet"; the first real
/// round after the sentinel is `0`.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SeqId(pub i64);

impl SeqId {
    /// Sentinel for "no round has occurred yet".
    pub const NO_LOG_ENTRY: SeqId = SeqId(-1);

    /// The round following this one. `NO_LOG_ENTRY.next()` is round `0`.
    #[must_use]
    pub fn next(self) -> SeqId {
        SeqId(self.0 + 1)
    }

    /// Whether this is a real round rather than the sentinel.
    #[must_use]
    pub fn is_entry(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for SeqId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Per-proposer monotonic component of a ballot.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct BallotNumber(pub u64);

impl fmt::Display for BallotNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifies one proposal attempt within a round.
///
/// Ordering is `(round, number, proposer)`; the proposer UUID breaks ties so
/// that two distinct proposers can never produce equal identifiers.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ProposalId {
    pub round: SeqId,
    pub number: BallotNumber,
    pub proposer: Uuid,
}

impl ProposalId {
    #[must_use]
    pub fn new(round: SeqId, number: BallotNumber, proposer: Uuid) -> Self {
        Self {
            round,
            number,
            proposer,
        }
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.round, self.number, self.proposer)
    }
}

/// The value agreed on for one round: which node leads, plus an opaque
/// payload. Immutable once constructed.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PaxosValue {
    pub round: SeqId,
    pub leader: Uuid,
    pub payload: Option<Vec<u8>>,
}

impl PaxosValue {
    #[must_use]
    pub fn new(round: SeqId, leader: Uuid, payload: Option<Vec<u8>>) -> Self {
        Self {
            round,
            leader,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_precedes_first_round() {
        assert_eq!(SeqId::NO_LOG_ENTRY.next(), SeqId(0));
        assert!(!SeqId::NO_LOG_ENTRY.is_entry());
        assert!(SeqId(0).is_entry());
        assert!(SeqId::NO_LOG_ENTRY < SeqId(0));
    }

    #[test]
    fn proposal_ordering_prefers_number_then_proposer() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let round = SeqId(3);

        let low = ProposalId::new(round, BallotNumber(1), b);
        let high = ProposalId::new(round, BallotNumber(2), a);
        assert!(high > low);

        let tie_a = ProposalId::new(round, BallotNumber(2), a);
        let tie_b = ProposalId::new(round, BallotNumber(2), b);
        assert!(tie_b > tie_a);
        assert_ne!(tie_a, tie_b);
    }
}
