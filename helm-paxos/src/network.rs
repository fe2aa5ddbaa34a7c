//! Peer client traits and quorum-collecting RPC fan-out.
//!
//! [`collect_until`] dispatches one request per peer, each on its own task
//! so a stuck peer cannot delay the others, and funnels results through a
//! channel until a caller-supplied predicate holds, every peer has answered
//! or failed, or the deadline elapses. Outstanding requests are aborted
//! best-effort and never awaited.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::core::{AcceptOutcome, PrepareOutcome};
use crate::types::{PaxosValue, ProposalId, SeqId};

/// Deadline applied to quorum reads (round verification, catch-up) when the
/// caller has no more specific budget.
pub const DEFAULT_QUORUM_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Quorum size for a cluster of `num_peers` nodes (counting self).
#[must_use]
pub fn quorum_size(num_peers: usize) -> usize {
    num_peers / 2 + 1
}

/// Client side of the acceptor RPC surface.
///
/// Implementations are handles: cheap to clone, and safe to use from
/// spawned tasks.
pub trait AcceptorClient: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn prepare(
        &self,
        seq: SeqId,
        ballot: ProposalId,
    ) -> impl Future<Output = Result<PrepareOutcome, Self::Error>> + Send;

    fn accept(
        &self,
        seq: SeqId,
        ballot: ProposalId,
        value: PaxosValue,
    ) -> impl Future<Output = Result<AcceptOutcome, Self::Error>> + Send;

    fn latest_sequence_prepared_or_accepted(
        &self,
    ) -> impl Future<Output = Result<SeqId, Self::Error>> + Send;
}

/// Client side of the learner RPC surface.
pub trait LearnerClient: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn learn(
        &self,
        seq: SeqId,
        value: PaxosValue,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    fn get_learned_values_since(
        &self,
        seq: SeqId,
    ) -> impl Future<Output = Result<Vec<PaxosValue>, Self::Error>> + Send;
}

/// Responses gathered by one fan-out wave.
#[derive(Debug)]
pub struct PaxosResponses<P, R, E> {
    pub successes: Vec<(P, R)>,
    pub failures: Vec<(P, E)>,
}

impl<P, R, E> Default for PaxosResponses<P, R, E> {
    fn default() -> Self {
        Self {
            successes: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<P, R, E> PaxosResponses<P, R, E> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    #[must_use]
    pub fn has_quorum(&self, quorum: usize) -> bool {
        self.successes.len() >= quorum
    }
}

/// Fan a request out to every peer and collect responses.
///
/// Returns at the earliest of: `predicate` holds over the collected
/// responses, all peers have responded or failed, or `deadline` elapses.
pub async fn collect_until<P, R, E, F, Fut>(
    peers: Vec<P>,
    request: F,
    deadline: Duration,
    mut predicate: impl FnMut(&PaxosResponses<P, R, E>) -> bool,
) -> PaxosResponses<P, R, E>
where
    P: Clone + Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
    F: Fn(P) -> Fut,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
{
    let total = peers.len();
    let (tx, mut rx) = mpsc::channel(total.max(1));

    let tasks: Vec<_> = peers
        .into_iter()
        .map(|peer| {
            let tx = tx.clone();
            let fut = request(peer.clone());
            tokio::spawn(async move {
                let result = fut.await;
                let _ = tx.send((peer, result)).await;
            })
        })
        .collect();
    drop(tx);

    let expires = Instant::now() + deadline;
    let mut responses = PaxosResponses::new();
    while responses.total() < total && !predicate(&responses) {
        match tokio::time::timeout_at(expires, rx.recv()).await {
            Ok(Some((peer, Ok(response)))) => responses.successes.push((peer, response)),
            Ok(Some((peer, Err(error)))) => responses.failures.push((peer, error)),
            // Channel drained or deadline hit; either way the wave is over.
            Ok(None) | Err(_) => break,
        }
    }

    for task in &tasks {
        task.abort();
    }
    responses
}

/// [`collect_until`] that stops as soon as a quorum of successes is in.
pub async fn collect_quorum<P, R, E, F, Fut>(
    peers: Vec<P>,
    request: F,
    deadline: Duration,
    quorum: usize,
) -> PaxosResponses<P, R, E>
where
    P: Clone + Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
    F: Fn(P) -> Fut,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
{
    collect_until(peers, request, deadline, |responses| {
        responses.has_quorum(quorum)
    })
    .await
}
