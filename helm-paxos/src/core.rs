//! Pure acceptor state machine, free of I/O and synchronization.
//!
//! The async [`Acceptor`](crate::acceptor::Acceptor) wraps this core with a
//! durable log and a lock; the Stateright model checker drives the core
//! directly, so the exhaustively checked transitions are the ones that run
//! in production.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{PaxosValue, ProposalId, SeqId};

/// Reply to a phase-1 prepare request.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PrepareOutcome {
    /// Promised not to accept anything below this ballot. Carries the
    /// highest-ballot value this acceptor has already accepted for the
    /// round, if any.
    Promised {
        last_accepted: Option<(ProposalId, PaxosValue)>,
    },
    /// A higher ballot was already promised or accepted for the round.
    Rejected { promised: ProposalId },
}

/// Reply to a phase-2 accept request.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AcceptOutcome {
    Accepted,
    /// A higher ballot was already promised for the round.
    Rejected { promised: ProposalId },
}

/// Per-round acceptor state.
///
/// For each round the acceptor remembers the highest ballot it has promised
/// and the highest-ballot `(ballot, value)` pair it has accepted. Promised
/// ballots are non-decreasing; that monotonicity is what the promise means.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct AcceptorCore {
    promised: BTreeMap<SeqId, ProposalId>,
    accepted: BTreeMap<SeqId, (ProposalId, PaxosValue)>,
}

impl AcceptorCore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the core from persisted per-round records.
    pub fn restore<I>(records: I) -> Self
    where
        I: IntoIterator<Item = (SeqId, crate::acceptor::AcceptorRecord)>,
    {
        let mut core = Self::new();
        for (seq, record) in records {
            if let Some(promised) = record.promised {
                core.promised.insert(seq, promised);
            }
            if let Some(accepted) = record.accepted {
                core.accepted.insert(seq, accepted);
            }
        }
        core
    }

    /// Handle a prepare request.
    ///
    /// Promises iff the ballot is strictly greater than anything promised
    /// for the round so far; an equal ballot is rejected so a promise is
    /// handed out exactly once.
    pub fn prepare(&mut self, seq: SeqId, ballot: ProposalId) -> PrepareOutcome {
        if let Some(promised) = self.promised.get(&seq)
            && *promised >= ballot
        {
            return PrepareOutcome::Rejected {
                promised: *promised,
            };
        }

        self.promised.insert(seq, ballot);
        PrepareOutcome::Promised {
            last_accepted: self.accepted.get(&seq).cloned(),
        }
    }

    /// Handle an accept request.
    ///
    /// Accepts iff the ballot is at least the promised ballot for the round.
    /// Accepting also raises the promise, so a later prepare at the same
    /// ballot cannot slip in below the accepted value.
    pub fn accept(&mut self, seq: SeqId, ballot: ProposalId, value: PaxosValue) -> AcceptOutcome {
        if let Some(promised) = self.promised.get(&seq)
            && *promised > ballot
        {
            return AcceptOutcome::Rejected {
                promised: *promised,
            };
        }

        self.promised.insert(seq, ballot);
        self.accepted.insert(seq, (ballot, value));
        AcceptOutcome::Accepted
    }

    /// Greatest round this acceptor has promised or accepted anything for,
    /// or [`SeqId::NO_LOG_ENTRY`] if it has seen nothing.
    #[must_use]
    pub fn latest_sequence_prepared_or_accepted(&self) -> SeqId {
        let promised = self.promised.keys().next_back().copied();
        let accepted = self.accepted.keys().next_back().copied();
        promised.max(accepted).unwrap_or(SeqId::NO_LOG_ENTRY)
    }

    /// Snapshot of one round's state, in persistable form.
    #[must_use]
    pub fn record(&self, seq: SeqId) -> crate::acceptor::AcceptorRecord {
        crate::acceptor::AcceptorRecord {
            promised: self.promised.get(&seq).copied(),
            accepted: self.accepted.get(&seq).cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::types::BallotNumber;

    fn ballot(n: u64, proposer: u128) -> ProposalId {
        ProposalId::new(SeqId(0), BallotNumber(n), Uuid::from_u128(proposer))
    }

    fn value(leader: u128) -> PaxosValue {
        PaxosValue::new(SeqId(0), Uuid::from_u128(leader), None)
    }

    #[test]
    fn prepare_on_fresh_round_promises() {
        let mut core = AcceptorCore::new();
        let outcome = core.prepare(SeqId(0), ballot(1, 1));
        assert_eq!(
            outcome,
            PrepareOutcome::Promised {
                last_accepted: None
            }
        );
    }

    #[test]
    fn prepare_with_lower_or_equal_ballot_is_rejected() {
        let mut core = AcceptorCore::new();
        core.prepare(SeqId(0), ballot(5, 1));

        assert_eq!(
            core.prepare(SeqId(0), ballot(4, 1)),
            PrepareOutcome::Rejected {
                promised: ballot(5, 1)
            }
        );
        assert_eq!(
            core.prepare(SeqId(0), ballot(5, 1)),
            PrepareOutcome::Rejected {
                promised: ballot(5, 1)
            }
        );
    }

    #[test]
    fn prepare_returns_previously_accepted_value() {
        let mut core = AcceptorCore::new();
        core.prepare(SeqId(0), ballot(1, 1));
        core.accept(SeqId(0), ballot(1, 1), value(1));

        let outcome = core.prepare(SeqId(0), ballot(2, 2));
        assert_eq!(
            outcome,
            PrepareOutcome::Promised {
                last_accepted: Some((ballot(1, 1), value(1)))
            }
        );
    }

    #[test]
    fn accept_at_promised_ballot_succeeds() {
        let mut core = AcceptorCore::new();
        core.prepare(SeqId(0), ballot(3, 1));
        assert_eq!(
            core.accept(SeqId(0), ballot(3, 1), value(1)),
            AcceptOutcome::Accepted
        );
    }

    #[test]
    fn accept_below_promise_is_rejected() {
        let mut core = AcceptorCore::new();
        core.prepare(SeqId(0), ballot(3, 1));
        assert_eq!(
            core.accept(SeqId(0), ballot(2, 2), value(2)),
            AcceptOutcome::Rejected {
                promised: ballot(3, 1)
            }
        );
        // The earlier accept record must be untouched.
        assert_eq!(core.record(SeqId(0)).accepted, None);
    }

    #[test]
    fn rounds_are_independent() {
        let mut core = AcceptorCore::new();
        core.prepare(SeqId(0), ballot(9, 1));

        let outcome = core.prepare(SeqId(1), ProposalId::new(SeqId(1), BallotNumber(1), Uuid::from_u128(2)));
        assert!(matches!(outcome, PrepareOutcome::Promised { .. }));
    }

    #[test]
    fn latest_sequence_tracks_promises_and_accepts() {
        let mut core = AcceptorCore::new();
        assert_eq!(
            core.latest_sequence_prepared_or_accepted(),
            SeqId::NO_LOG_ENTRY
        );

        core.prepare(SeqId(0), ballot(1, 1));
        assert_eq!(core.latest_sequence_prepared_or_accepted(), SeqId(0));

        core.prepare(
            SeqId(4),
            ProposalId::new(SeqId(4), BallotNumber(1), Uuid::from_u128(1)),
        );
        assert_eq!(core.latest_sequence_prepared_or_accepted(), SeqId(4));
    }

    #[test]
    fn restore_round_trips_records() {
        let mut core = AcceptorCore::new();
        core.prepare(SeqId(0), ballot(1, 1));
        core.accept(SeqId(0), ballot(1, 1), value(1));
        core.prepare(
            SeqId(1),
            ProposalId::new(SeqId(1), BallotNumber(7), Uuid::from_u128(3)),
        );

        let records = [
            (SeqId(0), core.record(SeqId(0))),
            (SeqId(1), core.record(SeqId(1))),
        ];
        let restored = AcceptorCore::restore(records);
        assert_eq!(restored, core);
    }
}
