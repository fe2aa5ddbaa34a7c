//! Two-phase Paxos proposer.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace};
use uuid::Uuid;

use crate::config::ProposerConfig;
use crate::core::{AcceptOutcome, PrepareOutcome};
use crate::network::{AcceptorClient, LearnerClient, collect_until, quorum_size};
use crate::types::{BallotNumber, PaxosValue, ProposalId, SeqId};

/// Which phase of a proposal round failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProposalPhase {
    Prepare,
    Accept,
}

impl fmt::Display for ProposalPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProposalPhase::Prepare => f.write_str("prepare"),
            ProposalPhase::Accept => f.write_str("accept"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoundFailureCause {
    /// Too few acceptors answered positively within the phase deadline.
    NoQuorum,
    /// A competing proposer holds a higher ballot.
    Superseded { by: ProposalId },
}

/// A proposal round that did not reach quorum. Recoverable: the next
/// attempt uses a higher ballot, and the caller may instead observe a
/// newer learned value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundFailure {
    pub seq: SeqId,
    pub phase: ProposalPhase,
    pub cause: RoundFailureCause,
}

impl fmt::Display for RoundFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proposal for round {} failed in {} phase: ", self.seq, self.phase)?;
        match &self.cause {
            RoundFailureCause::NoQuorum => f.write_str("no quorum within deadline"),
            RoundFailureCause::Superseded { by } => write!(f, "superseded by ballot {by}"),
        }
    }
}

impl std::error::Error for RoundFailure {}

/// Drives Paxos rounds against the cluster's acceptors.
///
/// Ballot numbers strictly increase across calls from the same proposer;
/// the proposer UUID breaks ties across proposers, so no two proposers
/// ever share a ballot.
pub struct Proposer<C> {
    uuid: Uuid,
    counter: AtomicU64,
    acceptors: Vec<C>,
    learners: Vec<C>,
    quorum: usize,
    config: ProposerConfig,
}

impl<C> Proposer<C>
where
    C: AcceptorClient + LearnerClient,
{
    /// `acceptors` and `learners` must both include the local node.
    pub fn new(uuid: Uuid, acceptors: Vec<C>, learners: Vec<C>, config: ProposerConfig) -> Self {
        let quorum = quorum_size(acceptors.len());
        Self {
            uuid,
            counter: AtomicU64::new(0),
            acceptors,
            learners,
            quorum,
            config,
        }
    }

    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    #[must_use]
    pub fn quorum(&self) -> usize {
        self.quorum
    }

    /// Propose a value naming this node for `seq`.
    ///
    /// On quorum acceptance the chosen value is broadcast to all learners
    /// (best effort) and returned. The chosen value may name another node:
    /// if any acceptor already accepted a value for the round, the highest
    /// such value is adopted instead of ours.
    pub async fn propose(
        &self,
        seq: SeqId,
        payload: Option<Vec<u8>>,
    ) -> Result<PaxosValue, RoundFailure> {
        self.run_round(seq, self.uuid, payload).await
    }

    /// Propose a value whose leader UUID matches no real node.
    ///
    /// Used to relinquish leadership: once chosen, no node considers
    /// itself the leader for the round.
    pub async fn propose_anonymously(
        &self,
        seq: SeqId,
        payload: Option<Vec<u8>>,
    ) -> Result<PaxosValue, RoundFailure> {
        self.run_round(seq, Uuid::new_v4(), payload).await
    }

    async fn run_round(
        &self,
        seq: SeqId,
        leader: Uuid,
        payload: Option<Vec<u8>>,
    ) -> Result<PaxosValue, RoundFailure> {
        let ballot = self.next_ballot(seq);
        debug!(round = ?seq, %ballot, "starting proposal");

        let value = self.prepare_phase(seq, ballot, leader, payload).await?;
        self.accept_phase(seq, ballot, &value).await?;

        debug!(round = ?seq, leader = %value.leader, "round chosen, broadcasting to learners");
        for peer in &self.learners {
            let peer = peer.clone();
            let value = value.clone();
            tokio::spawn(async move {
                if let Err(error) = peer.learn(seq, value).await {
                    trace!(error = %error, "learn broadcast failed");
                }
            });
        }

        Ok(value)
    }

    /// Phase 1: gather promises. Returns the value to drive through phase 2,
    /// adopting the highest previously-accepted value if one exists.
    async fn prepare_phase(
        &self,
        seq: SeqId,
        ballot: ProposalId,
        leader: Uuid,
        payload: Option<Vec<u8>>,
    ) -> Result<PaxosValue, RoundFailure> {
        let quorum = self.quorum;
        let responses = collect_until(
            self.acceptors.clone(),
            |peer| async move { peer.prepare(seq, ballot).await },
            self.config.phase_timeout,
            |responses| count_promises(responses) >= quorum,
        )
        .await;

        let mut promises = 0;
        let mut adopted: Option<(ProposalId, PaxosValue)> = None;
        let mut highest_rejection: Option<ProposalId> = None;
        for (_, outcome) in &responses.successes {
            match outcome {
                PrepareOutcome::Promised { last_accepted } => {
                    promises += 1;
                    if let Some((id, value)) = last_accepted
                        && adopted.as_ref().is_none_or(|(max, _)| id > max)
                    {
                        adopted = Some((*id, value.clone()));
                    }
                }
                PrepareOutcome::Rejected { promised } => {
                    highest_rejection =
                        Some(highest_rejection.map_or(*promised, |h| h.max(*promised)));
                }
            }
        }

        if promises < self.quorum {
            return Err(self.fail(seq, ProposalPhase::Prepare, highest_rejection));
        }

        Ok(adopted.map_or_else(|| PaxosValue::new(seq, leader, payload), |(_, value)| value))
    }

    /// Phase 2: drive the chosen value to quorum acceptance.
    async fn accept_phase(
        &self,
        seq: SeqId,
        ballot: ProposalId,
        value: &PaxosValue,
    ) -> Result<(), RoundFailure> {
        let quorum = self.quorum;
        let request_value = value.clone();
        let responses = collect_until(
            self.acceptors.clone(),
            move |peer| {
                let value = request_value.clone();
                async move { peer.accept(seq, ballot, value).await }
            },
            self.config.phase_timeout,
            |responses| count_accepts(responses) >= quorum,
        )
        .await;

        let mut accepts = 0;
        let mut highest_rejection: Option<ProposalId> = None;
        for (_, outcome) in &responses.successes {
            match outcome {
                AcceptOutcome::Accepted => accepts += 1,
                AcceptOutcome::Rejected { promised } => {
                    highest_rejection =
                        Some(highest_rejection.map_or(*promised, |h| h.max(*promised)));
                }
            }
        }

        if accepts < self.quorum {
            return Err(self.fail(seq, ProposalPhase::Accept, highest_rejection));
        }
        Ok(())
    }

    fn fail(
        &self,
        seq: SeqId,
        phase: ProposalPhase,
        highest_rejection: Option<ProposalId>,
    ) -> RoundFailure {
        let cause = match highest_rejection {
            Some(by) => {
                // Pull the counter past the winning ballot so the next
                // attempt outbids it.
                self.counter.fetch_max(by.number.0, Ordering::SeqCst);
                RoundFailureCause::Superseded { by }
            }
            None => RoundFailureCause::NoQuorum,
        };
        debug!(round = ?seq, %phase, ?cause, "proposal failed");
        RoundFailure { seq, phase, cause }
    }

    fn next_ballot(&self, seq: SeqId) -> ProposalId {
        let number = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        ProposalId::new(seq, BallotNumber(number), self.uuid)
    }
}

fn count_promises<P, E>(responses: &crate::network::PaxosResponses<P, PrepareOutcome, E>) -> usize {
    responses
        .successes
        .iter()
        .filter(|(_, outcome)| matches!(outcome, PrepareOutcome::Promised { .. }))
        .count()
}

fn count_accepts<P, E>(responses: &crate::network::PaxosResponses<P, AcceptOutcome, E>) -> usize {
    responses
        .successes
        .iter()
        .filter(|(_, outcome)| matches!(outcome, AcceptOutcome::Accepted))
        .count()
}
