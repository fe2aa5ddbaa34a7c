//! The Paxos-backed leader election service.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use error_stack::Report;
use helm_paxos::learner::{LearnError, Learner};
use helm_paxos::network::{AcceptorClient, LearnerClient, PaxosResponses, collect_until};
use helm_paxos::proposer::Proposer;
use helm_paxos::types::{PaxosValue, SeqId};
use rand::Rng;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::LeaderElectionConfig;
use crate::error::LeaderElectionError;
use crate::events::{EventRecorder, TracingEventRecorder};
use crate::peers::PingableLeader;
use crate::verifier::{CoalescingLatestRoundVerifier, LatestRoundVerifier};

/// Answer to "is this token still good?".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StillLeading {
    Leading,
    NotLeading,
    /// Too few peers reachable to tell. Callers should treat this as
    /// "unknown" and retry, not as losing leadership.
    NoQuorum,
}

/// Proof of leadership as of one round.
///
/// A token stays valid only while its round remains the greatest learned
/// round; confirm it with
/// [`LeaderElectionService::is_still_leading`] before acting on it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeadershipToken {
    value: PaxosValue,
}

impl LeadershipToken {
    fn new(value: PaxosValue) -> Self {
        Self { value }
    }

    #[must_use]
    pub fn round(&self) -> SeqId {
        self.value.round
    }

    /// UUID of the node this token names as leader.
    #[must_use]
    pub fn leader(&self) -> Uuid {
        self.value.leader
    }

    pub(crate) fn value(&self) -> &PaxosValue {
        &self.value
    }
}

/// Snapshot of this node's view of leadership.
#[derive(Clone, Debug)]
struct LeadershipState {
    greatest_learned: Option<PaxosValue>,
    status: StillLeading,
}

impl LeadershipState {
    fn confirmed_token(&self) -> Option<LeadershipToken> {
        if self.status == StillLeading::Leading {
            let value = self
                .greatest_learned
                .clone()
                .expect("leading without a learned value");
            Some(LeadershipToken::new(value))
        } else {
            None
        }
    }
}

/// A Paxos member that can be the designated proposer (leader) and serves
/// as a learner of election rounds.
///
/// The peer lists include this node itself as a local-variant peer; only
/// `others` is probed over the network.
pub struct LeaderElectionService<P, E = TracingEventRecorder>
where
    P: AcceptorClient + LearnerClient + PingableLeader + PartialEq,
{
    uuid: Uuid,
    proposer: Proposer<P>,
    knowledge: Arc<Learner>,
    peers: Vec<P>,
    others: Vec<P>,
    verifier: CoalescingLatestRoundVerifier<P>,
    config: LeaderElectionConfig,
    /// Serializes the decision to propose between concurrent
    /// `block_on_becoming_leader` callers on this node.
    propose_lock: tokio::sync::Mutex<()>,
    /// Identity cache: UUID -> peer handle. Injective, and never contains
    /// this node's own UUID; violations are fatal misconfiguration.
    uuid_cache: RwLock<HashMap<Uuid, P>>,
    events: E,
}

impl<P, E> LeaderElectionService<P, E>
where
    P: AcceptorClient + LearnerClient + PingableLeader + PartialEq,
    E: EventRecorder,
{
    /// `peers` is every potential leader including this node; `others` is
    /// the remote subset of the same list.
    pub fn new(
        proposer: Proposer<P>,
        knowledge: Arc<Learner>,
        peers: Vec<P>,
        others: Vec<P>,
        config: LeaderElectionConfig,
        events: E,
    ) -> Self {
        let verifier = CoalescingLatestRoundVerifier::new(LatestRoundVerifier::new(
            peers.clone(),
            config.quorum_request_timeout,
        ));
        Self {
            uuid: proposer.uuid(),
            proposer,
            knowledge,
            peers,
            others,
            verifier,
            config,
            propose_lock: tokio::sync::Mutex::new(()),
            uuid_cache: RwLock::new(HashMap::new()),
            events,
        }
    }

    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Every potential leader, this node included.
    #[must_use]
    pub fn potential_leaders(&self) -> &[P] {
        &self.peers
    }

    /// Drive election rounds until this node holds a confirmed leadership
    /// token, then return it.
    ///
    /// Blocks (in the async sense) for as long as it takes; drop the future
    /// to abandon the attempt, which leaves no local side effects beyond
    /// ordinary acceptor bookkeeping.
    ///
    /// # Errors
    ///
    /// Fails only on fatal conditions: cluster misconfiguration, invariant
    /// violations, or durable log failure.
    pub async fn block_on_becoming_leader(
        &self,
    ) -> Result<LeadershipToken, Report<LeaderElectionError>> {
        loop {
            let state = self.determine_leadership_state().await;
            match state.status {
                StillLeading::Leading => {
                    info!(uuid = %self.uuid, "became the leader");
                    return Ok(state
                        .confirmed_token()
                        .expect("leading state must carry a token"));
                }
                // Without quorum the checks themselves tell us nothing;
                // retry them. The quorum wait already rate-limits us.
                StillLeading::NoQuorum => {}
                StillLeading::NotLeading => self.propose_leadership_or_wait(&state).await?,
            }
        }
    }

    /// Non-blocking snapshot: a confirmed token iff currently leading.
    pub async fn current_token_if_leading(&self) -> Option<LeadershipToken> {
        self.determine_leadership_state().await.confirmed_token()
    }

    /// Re-check a previously issued token.
    ///
    /// The answer reflects a consistent snapshot taken during the call; it
    /// may be stale by the time the caller acts on it.
    pub async fn is_still_leading(&self, token: &LeadershipToken) -> StillLeading {
        let status = self.determine_leadership_status(Some(token.value())).await;
        match status {
            StillLeading::NoQuorum => self.events.record_no_quorum(token.value()),
            StillLeading::NotLeading => self.events.record_not_leading(token.value()),
            StillLeading::Leading => {}
        }
        status
    }

    /// True iff this node is the leader named by its greatest learned
    /// value. This is the question remote peers ask over the wire.
    pub async fn ping(&self) -> bool {
        self.knowledge
            .greatest_learned_value()
            .await
            .is_some_and(|value| self.is_this_node_the_leader_for(&value))
    }

    /// Relinquish leadership by proposing a value that names no real node.
    ///
    /// Returns true if leadership was relinquished, false if this node was
    /// not leading in the first place.
    ///
    /// # Errors
    ///
    /// [`LeaderElectionError::ServiceNotAvailable`] when leading but unable
    /// to reach quorum for the anonymous round.
    pub async fn step_down(&self) -> Result<bool, Report<LeaderElectionError>> {
        let state = self.determine_leadership_state().await;
        if state.status != StillLeading::Leading {
            return Ok(false);
        }

        let seq = next_sequence_number(state.greatest_learned.as_ref());
        match self.proposer.propose_anonymously(seq, None).await {
            Ok(_) => Ok(true),
            Err(failure) => {
                info!(%failure, "could not relinquish leadership, quorum unavailable");
                Err(Report::new(failure).change_context(LeaderElectionError::ServiceNotAvailable))
            }
        }
    }

    /// Pull learned values this node is missing from its peers.
    ///
    /// Returns true if anything new was learned.
    ///
    /// # Errors
    ///
    /// Fatal only: a peer served a value conflicting with local knowledge,
    /// or persisting a learned value failed.
    pub async fn update_learned_state_from_peers(
        &self,
        greatest_learned: Option<&PaxosValue>,
    ) -> Result<bool, Report<LeaderElectionError>> {
        let next_to_learn = next_sequence_number(greatest_learned);
        let responses = collect_until(
            self.others.clone(),
            |peer| async move { peer.get_learned_values_since(next_to_learn).await },
            self.config.quorum_request_timeout,
            |_| false,
        )
        .await;

        let mut learned = false;
        for (_, values) in responses.successes {
            for value in values {
                if self.knowledge.get_learned_value(value.round).await.is_none() {
                    let round = value.round;
                    self.knowledge.learn(round, value).await.map_err(|e| {
                        let context = match &e {
                            LearnError::Conflict { .. } => LeaderElectionError::InvariantViolation,
                            LearnError::Storage(_) => LeaderElectionError::Storage,
                        };
                        Report::new(e).change_context(context)
                    })?;
                    learned = true;
                }
            }
        }
        Ok(learned)
    }

    async fn determine_leadership_state(&self) -> LeadershipState {
        let greatest_learned = self.knowledge.greatest_learned_value().await;
        let status = self
            .determine_leadership_status(greatest_learned.as_ref())
            .await;
        LeadershipState {
            greatest_learned,
            status,
        }
    }

    async fn determine_leadership_status(&self, value: Option<&PaxosValue>) -> StillLeading {
        let Some(value) = value else {
            return StillLeading::NotLeading;
        };
        if !self.is_this_node_the_leader_for(value) {
            return StillLeading::NotLeading;
        }
        // Cheap local check before paying for a quorum wave.
        if !self.is_latest_round_locally(Some(value)).await {
            return StillLeading::NotLeading;
        }
        self.verifier
            .is_latest_round(value.round)
            .await
            .to_still_leading()
    }

    fn is_this_node_the_leader_for(&self, value: &PaxosValue) -> bool {
        value.leader == self.uuid
    }

    async fn is_latest_round_locally(&self, value: Option<&PaxosValue>) -> bool {
        self.knowledge.greatest_learned_value().await.as_ref() == value
    }

    async fn propose_leadership_or_wait(
        &self,
        state: &LeadershipState,
    ) -> Result<(), Report<LeaderElectionError>> {
        if self.ping_leader(state.greatest_learned.as_ref()).await? {
            tokio::time::sleep(self.config.update_polling_rate).await;
            return Ok(());
        }

        if self
            .update_learned_state_from_peers(state.greatest_learned.as_ref())
            .await?
        {
            // New state learned; let the main loop re-evaluate before
            // considering a proposal.
            return Ok(());
        }

        let jitter = self.proposal_jitter();
        debug!(wait = ?jitter, "waiting before proposing leadership");
        tokio::time::sleep(jitter).await;

        self.propose_leadership_after(state.greatest_learned.as_ref())
            .await;
        Ok(())
    }

    async fn propose_leadership_after(&self, value: Option<&PaxosValue>) {
        let _guard = self.propose_lock.lock().await;
        debug!(after = ?value.map(|v| v.round), "considering leadership proposal");

        if !self.is_latest_round_locally(value).await {
            // Somebody learned a newer round while we slept; proposing on
            // top of stale state would just lose.
            return;
        }

        let seq = next_sequence_number(value);
        self.events.record_proposal_attempt(seq);
        if let Err(failure) = self.proposer.propose(seq, None).await {
            self.events.record_proposal_failure(&failure);
        }
    }

    /// Ping the single suspected leader. Any failure (unknown identity,
    /// timeout, transport error, or a negative answer) reads as "not
    /// healthy" and lets the caller escalate.
    async fn ping_leader(
        &self,
        greatest_learned: Option<&PaxosValue>,
    ) -> Result<bool, Report<LeaderElectionError>> {
        let Some(leader) = self.suspected_leader(greatest_learned).await? else {
            return Ok(false);
        };

        match tokio::time::timeout(self.config.leader_ping_response_wait, leader.ping()).await {
            Err(_) => {
                self.events.record_leader_ping_timeout();
                Ok(false)
            }
            Ok(Err(error)) => {
                self.events.record_leader_ping_failure(&error);
                Ok(false)
            }
            Ok(Ok(false)) => {
                self.events.record_leader_ping_returned_false();
                Ok(false)
            }
            Ok(Ok(true)) => Ok(true),
        }
    }

    async fn suspected_leader(
        &self,
        greatest_learned: Option<&PaxosValue>,
    ) -> Result<Option<P>, Report<LeaderElectionError>> {
        let Some(value) = greatest_learned else {
            return Ok(None);
        };

        if let Some(peer) = self.uuid_cache.read().unwrap().get(&value.leader) {
            return Ok(Some(peer.clone()));
        }
        self.suspected_leader_over_network(value.leader).await
    }

    /// Probe remote peers for their identities until one matches `target`
    /// or the probe wave is exhausted, caching everything learned.
    async fn suspected_leader_over_network(
        &self,
        target: Uuid,
    ) -> Result<Option<P>, Report<LeaderElectionError>> {
        let responses = collect_until(
            self.others.clone(),
            |peer| async move { peer.get_uuid().await },
            self.config.leader_ping_response_wait,
            |responses: &PaxosResponses<P, Uuid, <P as PingableLeader>::Error>| {
                responses.successes.iter().any(|(_, uuid)| *uuid == target)
            },
        )
        .await;

        let mut found = None;
        for (peer, peer_uuid) in responses.successes {
            self.cache_peer_identity(peer_uuid, peer.clone())?;
            if peer_uuid == target {
                found = Some(peer);
            }
        }
        Ok(found)
    }

    fn cache_peer_identity(&self, uuid: Uuid, peer: P) -> Result<(), Report<LeaderElectionError>> {
        if uuid == self.uuid {
            error!(%uuid, "a remote peer claims to be this node");
            return Err(Report::new(LeaderElectionError::Misconfiguration).attach_printable(
                "a remote peer claims this node's UUID; the peer list or local \
                 identity configuration is wrong",
            ));
        }

        match self.uuid_cache.write().unwrap().entry(uuid) {
            Entry::Occupied(existing) => {
                if *existing.get() != peer {
                    error!(%uuid, "two distinct peers claim the same identity");
                    return Err(Report::new(LeaderElectionError::Misconfiguration)
                        .attach_printable(
                            "two distinct peers claim the same UUID; check the cluster's \
                             peer lists for duplicate or copied identities",
                        ));
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(peer);
            }
        }
        Ok(())
    }

    fn proposal_jitter(&self) -> Duration {
        let upper = u64::try_from(
            self.config.random_wait_before_proposing.as_millis(),
        )
        .unwrap_or(u64::MAX);
        if upper == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..upper))
    }
}

fn next_sequence_number(value: Option<&PaxosValue>) -> SeqId {
    value.map_or(SeqId::NO_LOG_ENTRY, |v| v.round).next()
}
