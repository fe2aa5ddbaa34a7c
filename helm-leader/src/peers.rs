//! Peer handles: the full per-peer RPC surface, with the local node as a
//! distinguished variant that short-circuits to in-process calls.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use helm_paxos::acceptor::Acceptor;
use helm_paxos::core::{AcceptOutcome, PrepareOutcome};
use helm_paxos::learner::{LearnError, Learner};
use helm_paxos::log::LogError;
use helm_paxos::network::{AcceptorClient, LearnerClient};
use helm_paxos::types::{PaxosValue, ProposalId, SeqId};
use uuid::Uuid;

/// Client side of the leadership RPC surface.
///
/// `ping` asks the peer whether it considers itself the leader for its own
/// greatest learned value; `get_uuid` returns its stable identity.
pub trait PingableLeader: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn ping(&self) -> impl Future<Output = Result<bool, Self::Error>> + Send;

    fn get_uuid(&self) -> impl Future<Output = Result<Uuid, Self::Error>> + Send;
}

/// Error raised by a [`LeaderPeer`] call.
#[derive(Debug)]
pub enum PeerError<E> {
    /// The remote call failed.
    Transport(E),
    /// A local durable-log operation failed.
    Log(LogError),
    /// A local learn failed.
    Learn(LearnError),
}

impl<E: fmt::Display> fmt::Display for PeerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerError::Transport(e) => write!(f, "peer call failed: {e}"),
            PeerError::Log(e) => write!(f, "local log operation failed: {e}"),
            PeerError::Learn(e) => write!(f, "local learn failed: {e}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for PeerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PeerError::Transport(e) => Some(e),
            PeerError::Log(e) => Some(e),
            PeerError::Learn(e) => Some(e),
        }
    }
}

/// The local node's share of the peer surface.
#[derive(Clone)]
pub struct LocalPeer {
    uuid: Uuid,
    acceptor: Arc<Acceptor>,
    knowledge: Arc<Learner>,
}

impl LocalPeer {
    #[must_use]
    pub fn new(uuid: Uuid, acceptor: Arc<Acceptor>, knowledge: Arc<Learner>) -> Self {
        Self {
            uuid,
            acceptor,
            knowledge,
        }
    }
}

/// A potential leader: either this node or a remote reached over `T`.
///
/// The local node appears in its own peer list; making it a distinct
/// variant keeps self-calls off the network and lets the service own the
/// whole list without referring back to itself.
#[derive(Clone)]
pub enum LeaderPeer<T> {
    Local(LocalPeer),
    Remote(T),
}

impl<T> LeaderPeer<T> {
    #[must_use]
    pub fn local(uuid: Uuid, acceptor: Arc<Acceptor>, knowledge: Arc<Learner>) -> Self {
        LeaderPeer::Local(LocalPeer::new(uuid, acceptor, knowledge))
    }

    #[must_use]
    pub fn remote(transport: T) -> Self {
        LeaderPeer::Remote(transport)
    }
}

impl<T: PartialEq> PartialEq for LeaderPeer<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Local(a), Self::Local(b)) => a.uuid == b.uuid,
            (Self::Remote(a), Self::Remote(b)) => a == b,
            _ => false,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for LeaderPeer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(local) => f.debug_tuple("Local").field(&local.uuid).finish(),
            Self::Remote(remote) => f.debug_tuple("Remote").field(remote).finish(),
        }
    }
}

impl<T> AcceptorClient for LeaderPeer<T>
where
    T: AcceptorClient,
{
    type Error = PeerError<T::Error>;

    async fn prepare(&self, seq: SeqId, ballot: ProposalId) -> Result<PrepareOutcome, Self::Error> {
        match self {
            LeaderPeer::Local(local) => local
                .acceptor
                .prepare(seq, ballot)
                .await
                .map_err(PeerError::Log),
            LeaderPeer::Remote(remote) => {
                remote.prepare(seq, ballot).await.map_err(PeerError::Transport)
            }
        }
    }

    async fn accept(
        &self,
        seq: SeqId,
        ballot: ProposalId,
        value: PaxosValue,
    ) -> Result<AcceptOutcome, Self::Error> {
        match self {
            LeaderPeer::Local(local) => local
                .acceptor
                .accept(seq, ballot, value)
                .await
                .map_err(PeerError::Log),
            LeaderPeer::Remote(remote) => remote
                .accept(seq, ballot, value)
                .await
                .map_err(PeerError::Transport),
        }
    }

    async fn latest_sequence_prepared_or_accepted(&self) -> Result<SeqId, Self::Error> {
        match self {
            LeaderPeer::Local(local) => {
                Ok(local.acceptor.latest_sequence_prepared_or_accepted().await)
            }
            LeaderPeer::Remote(remote) => remote
                .latest_sequence_prepared_or_accepted()
                .await
                .map_err(PeerError::Transport),
        }
    }
}

impl<T> LearnerClient for LeaderPeer<T>
where
    T: LearnerClient,
{
    type Error = PeerError<T::Error>;

    async fn learn(&self, seq: SeqId, value: PaxosValue) -> Result<(), Self::Error> {
        match self {
            LeaderPeer::Local(local) => local
                .knowledge
                .learn(seq, value)
                .await
                .map_err(PeerError::Learn),
            LeaderPeer::Remote(remote) => {
                remote.learn(seq, value).await.map_err(PeerError::Transport)
            }
        }
    }

    async fn get_learned_values_since(&self, seq: SeqId) -> Result<Vec<PaxosValue>, Self::Error> {
        match self {
            LeaderPeer::Local(local) => Ok(local.knowledge.get_learned_values_since(seq).await),
            LeaderPeer::Remote(remote) => remote
                .get_learned_values_since(seq)
                .await
                .map_err(PeerError::Transport),
        }
    }
}

impl<T> PingableLeader for LeaderPeer<T>
where
    T: PingableLeader,
{
    type Error = PeerError<T::Error>;

    async fn ping(&self) -> Result<bool, Self::Error> {
        match self {
            LeaderPeer::Local(local) => Ok(local
                .knowledge
                .greatest_learned_value()
                .await
                .is_some_and(|value| value.leader == local.uuid)),
            LeaderPeer::Remote(remote) => remote.ping().await.map_err(PeerError::Transport),
        }
    }

    async fn get_uuid(&self) -> Result<Uuid, Self::Error> {
        match self {
            LeaderPeer::Local(local) => Ok(local.uuid),
            LeaderPeer::Remote(remote) => remote.get_uuid().await.map_err(PeerError::Transport),
        }
    }
}
