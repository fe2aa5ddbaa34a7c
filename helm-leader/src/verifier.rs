//! Quorum verification that a round is still the latest, with coalescing
//! of concurrent queries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use helm_paxos::network::{AcceptorClient, collect_quorum, quorum_size};
use helm_paxos::types::SeqId;
use tracing::trace;

use crate::service::StillLeading;

/// Outcome of one verification wave.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundStatus {
    Latest,
    NotLatest,
    NoQuorum,
}

impl RoundStatus {
    #[must_use]
    pub fn to_still_leading(self) -> StillLeading {
        match self {
            RoundStatus::Latest => StillLeading::Leading,
            RoundStatus::NotLatest => StillLeading::NotLeading,
            RoundStatus::NoQuorum => StillLeading::NoQuorum,
        }
    }
}

/// Asks a quorum of acceptors whether any round beyond `round` has been
/// prepared or accepted. Every call is one fresh RPC wave.
pub struct LatestRoundVerifier<P> {
    acceptors: Vec<P>,
    quorum: usize,
    wave_timeout: Duration,
}

impl<P> LatestRoundVerifier<P>
where
    P: AcceptorClient,
{
    /// `acceptors` must include the local node.
    pub fn new(acceptors: Vec<P>, wave_timeout: Duration) -> Self {
        let quorum = quorum_size(acceptors.len());
        Self {
            acceptors,
            quorum,
            wave_timeout,
        }
    }

    pub async fn is_latest_round(&self, round: SeqId) -> RoundStatus {
        let responses = collect_quorum(
            self.acceptors.clone(),
            |peer| async move { peer.latest_sequence_prepared_or_accepted().await },
            self.wave_timeout,
            self.quorum,
        )
        .await;

        if !responses.has_quorum(self.quorum) {
            return RoundStatus::NoQuorum;
        }
        if responses.successes.iter().any(|(_, latest)| *latest > round) {
            RoundStatus::NotLatest
        } else {
            RoundStatus::Latest
        }
    }
}

type WaveFuture = Shared<BoxFuture<'static, RoundStatus>>;

/// Coalesces concurrent "is round R still latest?" queries.
///
/// While a wave for a round is in flight, callers asking about the same
/// round join it and all receive that wave's result; queries for other
/// rounds start their own waves immediately. A finished wave removes
/// itself before resolving, so results are never served across waves.
pub struct CoalescingLatestRoundVerifier<P> {
    inner: Arc<LatestRoundVerifier<P>>,
    waves: Arc<Mutex<HashMap<SeqId, WaveFuture>>>,
}

impl<P> Clone for CoalescingLatestRoundVerifier<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            waves: Arc::clone(&self.waves),
        }
    }
}

impl<P> CoalescingLatestRoundVerifier<P>
where
    P: AcceptorClient,
{
    pub fn new(inner: LatestRoundVerifier<P>) -> Self {
        Self {
            inner: Arc::new(inner),
            waves: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn is_latest_round(&self, round: SeqId) -> RoundStatus {
        let wave = {
            let mut waves = self.waves.lock().unwrap();
            waves
                .entry(round)
                .or_insert_with(|| {
                    trace!(round = ?round, "starting verification wave");
                    let inner = Arc::clone(&self.inner);
                    let waves = Arc::clone(&self.waves);
                    async move {
                        let status = inner.is_latest_round(round).await;
                        waves.lock().unwrap().remove(&round);
                        status
                    }
                    .boxed()
                    .shared()
                })
                .clone()
        };
        wave.await
    }
}
