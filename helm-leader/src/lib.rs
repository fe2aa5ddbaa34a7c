//! Paxos-backed leader election.
//!
//! Answers two questions for an embedding process: "am I (still) the
//! leader?" and "block until I become leader". Leadership for a round is
//! whatever the consensus core in `helm-paxos` chose for that round; a
//! [`LeadershipToken`] stays valid only while no newer round has been
//! learned.
//!
//! The service is library-embedded and transport-agnostic: peers are
//! handles implementing the client traits, with the local node as a
//! distinguished [`peers::LeaderPeer`] variant that never touches the
//! network.

#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod events;
pub mod peers;
pub mod service;
pub mod verifier;

pub use crate::config::LeaderElectionConfig;
pub use crate::error::LeaderElectionError;
pub use crate::events::{EventRecorder, NoOpEventRecorder, TracingEventRecorder};
pub use crate::peers::{LeaderPeer, LocalPeer, PeerError, PingableLeader};
pub use crate::service::{LeaderElectionService, LeadershipToken, StillLeading};
pub use crate::verifier::{CoalescingLatestRoundVerifier, LatestRoundVerifier, RoundStatus};
