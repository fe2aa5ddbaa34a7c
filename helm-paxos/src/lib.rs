//! Paxos consensus core.
//!
//! Building blocks for quorum-coordinated state, as used by the leader
//! election service in `helm-leader`:
//!
//! - [`core`]: the pure acceptor state machine, free of I/O, shared with
//!   the model-checking tests
//! - [`log`]: durable per-round state logs (fjall-backed or in-memory)
//! - [`acceptor`] / [`learner`]: the local protocol participants over a log
//! - [`network`]: client traits plus the quorum-collecting RPC fan-out
//! - [`proposer`]: the two-phase proposer driving rounds to a choice

#![warn(clippy::pedantic)]

pub mod acceptor;
pub mod config;
pub mod core;
pub mod learner;
pub mod log;
pub mod network;
pub mod proposer;
pub mod types;

pub use crate::acceptor::{Acceptor, AcceptorRecord};
pub use crate::config::ProposerConfig;
pub use crate::core::{AcceptOutcome, AcceptorCore, PrepareOutcome};
pub use crate::learner::{LearnError, Learner};
pub use crate::log::{FjallLog, LogError, MemoryLog, StateLog, open_database};
pub use crate::network::{
    AcceptorClient, DEFAULT_QUORUM_REQUEST_TIMEOUT, LearnerClient, PaxosResponses, collect_quorum,
    collect_until, quorum_size,
};
pub use crate::proposer::{ProposalPhase, Proposer, RoundFailure, RoundFailureCause};
pub use crate::types::{BallotNumber, PaxosValue, ProposalId, SeqId};
