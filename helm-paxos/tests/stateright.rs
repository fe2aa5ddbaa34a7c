//! Stateright model check for the consensus core.
//!
//! Acceptor actors run the production [`AcceptorCore`] transitions, so the
//! exhaustively explored state machine is the one that runs in production.
//! Proposer actors drive prepare/accept waves with retries on rejection.
//! The checked property is Agreement: for any round, at most one value is
//! ever chosen.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use helm_paxos::core::{AcceptOutcome, AcceptorCore, PrepareOutcome};
use helm_paxos::types::{BallotNumber, PaxosValue, ProposalId, SeqId};
use stateright::actor::{Actor, ActorModel, Id, Network, Out};
use stateright::{Checker, Model};
use uuid::Uuid;

const ROUND: SeqId = SeqId(0);

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
enum Msg {
    Prepare(ProposalId),
    Accept(ProposalId, PaxosValue),
    Promise(ProposalId, PrepareOutcome),
    Accepted(ProposalId, AcceptOutcome),
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
enum Phase {
    Preparing {
        ballot: ProposalId,
        promises: BTreeMap<Id, Option<(ProposalId, PaxosValue)>>,
    },
    Accepting {
        ballot: ProposalId,
        value: PaxosValue,
        accepts: BTreeSet<Id>,
    },
    Done {
        value: PaxosValue,
    },
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct ProposerState {
    phase: Phase,
    // Highest ballot number used so far; bounds the explored retries.
    number: u64,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
enum NodeState {
    Acceptor(AcceptorCore),
    Proposer(ProposerState),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Node {
    Acceptor,
    Proposer {
        uuid: Uuid,
        acceptor_ids: Vec<Id>,
    },
}

impl Node {
    fn quorum(num_acceptors: usize) -> usize {
        num_acceptors / 2 + 1
    }
}

impl Actor for Node {
    type Msg = Msg;
    type State = NodeState;
    type Timer = ();
    type Storage = ();
    type Random = ();

    fn on_start(&self, _id: Id, _storage: &Option<Self::Storage>, o: &mut Out<Self>) -> Self::State {
        match self {
            Node::Acceptor => NodeState::Acceptor(AcceptorCore::new()),
            Node::Proposer { uuid, acceptor_ids } => {
                let ballot = ProposalId::new(ROUND, BallotNumber(1), *uuid);
                for &acceptor in acceptor_ids {
                    o.send(acceptor, Msg::Prepare(ballot));
                }
                NodeState::Proposer(ProposerState {
                    phase: Phase::Preparing {
                        ballot,
                        promises: BTreeMap::new(),
                    },
                    number: 1,
                })
            }
        }
    }

    fn on_msg(
        &self,
        _id: Id,
        state: &mut Cow<Self::State>,
        src: Id,
        msg: Self::Msg,
        o: &mut Out<Self>,
    ) {
        match (self, state.as_ref().clone()) {
            (Node::Acceptor, NodeState::Acceptor(core)) => {
                handle_acceptor(core, state, src, msg, o);
            }
            (Node::Proposer { uuid, acceptor_ids }, NodeState::Proposer(proposer)) => {
                handle_proposer(*uuid, acceptor_ids, proposer, state, src, msg, o);
            }
            _ => {}
        }
    }
}

fn handle_acceptor(
    mut core: AcceptorCore,
    state: &mut Cow<NodeState>,
    src: Id,
    msg: Msg,
    o: &mut Out<Node>,
) {
    match msg {
        Msg::Prepare(ballot) => {
            let outcome = core.prepare(ROUND, ballot);
            if matches!(outcome, PrepareOutcome::Promised { .. }) {
                *state.to_mut() = NodeState::Acceptor(core);
            }
            o.send(src, Msg::Promise(ballot, outcome));
        }
        Msg::Accept(ballot, value) => {
            let outcome = core.accept(ROUND, ballot, value);
            if matches!(outcome, AcceptOutcome::Accepted) {
                *state.to_mut() = NodeState::Acceptor(core);
            }
            o.send(src, Msg::Accepted(ballot, outcome));
        }
        Msg::Promise(..) | Msg::Accepted(..) => {}
    }
}

fn handle_proposer(
    uuid: Uuid,
    acceptor_ids: &[Id],
    proposer: ProposerState,
    state: &mut Cow<NodeState>,
    src: Id,
    msg: Msg,
    o: &mut Out<Node>,
) {
    let quorum = Node::quorum(acceptor_ids.len());

    match (proposer.phase, msg) {
        (
            Phase::Preparing {
                ballot,
                mut promises,
            },
            Msg::Promise(for_ballot, outcome),
        ) if for_ballot == ballot => match outcome {
            PrepareOutcome::Promised { last_accepted } => {
                promises.insert(src, last_accepted);

                if promises.len() >= quorum {
                    // Adopt the highest already-accepted value, else propose
                    // ourselves as leader.
                    let value = promises
                        .values()
                        .filter_map(|accepted| accepted.as_ref())
                        .max_by_key(|(id, _)| *id)
                        .map_or_else(
                            || PaxosValue::new(ROUND, uuid, None),
                            |(_, value)| value.clone(),
                        );

                    for &acceptor in acceptor_ids {
                        o.send(acceptor, Msg::Accept(ballot, value.clone()));
                    }
                    *state.to_mut() = NodeState::Proposer(ProposerState {
                        phase: Phase::Accepting {
                            ballot,
                            value,
                            accepts: BTreeSet::new(),
                        },
                        number: proposer.number,
                    });
                } else {
                    *state.to_mut() = NodeState::Proposer(ProposerState {
                        phase: Phase::Preparing { ballot, promises },
                        number: proposer.number,
                    });
                }
            }
            PrepareOutcome::Rejected { promised } if promised > ballot => {
                // Outbid and retry from phase 1.
                let number = promised.number.0 + 1;
                let retry = ProposalId::new(ROUND, BallotNumber(number), uuid);
                for &acceptor in acceptor_ids {
                    o.send(acceptor, Msg::Prepare(retry));
                }
                *state.to_mut() = NodeState::Proposer(ProposerState {
                    phase: Phase::Preparing {
                        ballot: retry,
                        promises: BTreeMap::new(),
                    },
                    number,
                });
            }
            PrepareOutcome::Rejected { .. } => {}
        },
        (
            Phase::Accepting {
                ballot,
                value,
                mut accepts,
            },
            Msg::Accepted(for_ballot, outcome),
        ) if for_ballot == ballot => {
            if matches!(outcome, AcceptOutcome::Accepted) {
                accepts.insert(src);
                let phase = if accepts.len() >= quorum {
                    Phase::Done { value }
                } else {
                    Phase::Accepting {
                        ballot,
                        value,
                        accepts,
                    }
                };
                *state.to_mut() = NodeState::Proposer(ProposerState {
                    phase,
                    number: proposer.number,
                });
            }
            // Rejections during accept are not retried here; the competing
            // proposer's own retry path keeps the model live.
        }
        _ => {}
    }
}

#[derive(Clone)]
struct ModelCfg {
    max_number: u64,
}

fn paxos_model(num_proposers: usize, num_acceptors: usize) -> ActorModel<Node, ModelCfg, ()> {
    let acceptor_ids: Vec<Id> = (0..num_acceptors).map(Id::from).collect();

    let mut model = ActorModel::new(ModelCfg { max_number: 3 }, ())
        .init_network(Network::new_ordered([]))
        .within_boundary(|cfg, state| {
            state
                .actor_states
                .iter()
                .all(|s: &Arc<NodeState>| match s.as_ref() {
                    NodeState::Proposer(p) => p.number <= cfg.max_number,
                    NodeState::Acceptor(_) => true,
                })
        });

    for _ in 0..num_acceptors {
        model = model.actor(Node::Acceptor);
    }
    for i in 0..num_proposers {
        model = model.actor(Node::Proposer {
            uuid: Uuid::from_u128(i as u128 + 1),
            acceptor_ids: acceptor_ids.clone(),
        });
    }

    model.property(stateright::Expectation::Always, "Agreement", |_, state| {
        let chosen: Vec<&PaxosValue> = state
            .actor_states
            .iter()
            .filter_map(|s: &Arc<NodeState>| match s.as_ref() {
                NodeState::Proposer(ProposerState {
                    phase: Phase::Done { value },
                    ..
                }) => Some(value),
                _ => None,
            })
            .collect();

        chosen.windows(2).all(|pair| pair[0] == pair[1])
    })
}

#[test]
fn single_proposer_agreement() {
    let checker = paxos_model(1, 3)
        .checker()
        .threads(num_cpus::get())
        .spawn_bfs()
        .join();
    checker.assert_properties();
    println!(
        "single proposer: {} states explored",
        checker.unique_state_count()
    );
}

#[test]
fn competing_proposers_agreement() {
    let checker = paxos_model(2, 3)
        .checker()
        .threads(num_cpus::get())
        .spawn_bfs()
        .join();
    checker.assert_properties();
    println!(
        "two proposers: {} states explored",
        checker.unique_state_count()
    );
}
