//! The local acceptor: the pure core behind a durable log.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::trace;

use crate::core::{AcceptOutcome, AcceptorCore, PrepareOutcome};
use crate::log::{LogError, StateLog};
use crate::types::{PaxosValue, ProposalId, SeqId};

/// Persisted per-round acceptor state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptorRecord {
    pub promised: Option<ProposalId>,
    pub accepted: Option<(ProposalId, PaxosValue)>,
}

/// Paxos acceptor over a durable log.
///
/// Every state change is flushed before the reply is produced, so a reply
/// is a durable commitment. One lock serializes all transitions, which
/// also makes the log single-writer.
pub struct Acceptor {
    log: Arc<dyn StateLog<AcceptorRecord>>,
    core: Mutex<AcceptorCore>,
}

impl Acceptor {
    /// Open an acceptor, recovering its state from the log.
    pub async fn open(log: Arc<dyn StateLog<AcceptorRecord>>) -> Result<Self, LogError> {
        let records = {
            let log = log.clone();
            tokio::task::spawn_blocking(move || log.read_from(SeqId(0)))
                .await
                .expect("spawn_blocking panicked")?
        };

        Ok(Self {
            log,
            core: Mutex::new(AcceptorCore::restore(records)),
        })
    }

    /// Phase 1b: promise not to accept ballots below `ballot`, or report
    /// the higher ballot already promised.
    pub async fn prepare(
        &self,
        seq: SeqId,
        ballot: ProposalId,
    ) -> Result<PrepareOutcome, LogError> {
        let mut core = self.core.lock().await;
        let outcome = core.prepare(seq, ballot);
        if matches!(outcome, PrepareOutcome::Promised { .. }) {
            self.persist(seq, core.record(seq)).await?;
            trace!(round = ?seq, %ballot, "promised");
        }
        Ok(outcome)
    }

    /// Phase 2b: accept the value unless a higher ballot was promised.
    pub async fn accept(
        &self,
        seq: SeqId,
        ballot: ProposalId,
        value: PaxosValue,
    ) -> Result<AcceptOutcome, LogError> {
        let mut core = self.core.lock().await;
        let outcome = core.accept(seq, ballot, value);
        if matches!(outcome, AcceptOutcome::Accepted) {
            self.persist(seq, core.record(seq)).await?;
            trace!(round = ?seq, %ballot, "accepted");
        }
        Ok(outcome)
    }

    /// Greatest round this acceptor has touched, or
    /// [`SeqId::NO_LOG_ENTRY`].
    pub async fn latest_sequence_prepared_or_accepted(&self) -> SeqId {
        self.core.lock().await.latest_sequence_prepared_or_accepted()
    }

    async fn persist(&self, seq: SeqId, record: AcceptorRecord) -> Result<(), LogError> {
        let log = self.log.clone();
        tokio::task::spawn_blocking(move || log.write_round(seq, &record))
            .await
            .expect("spawn_blocking panicked")
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::log::MemoryLog;
    use crate::types::BallotNumber;

    fn ballot(n: u64) -> ProposalId {
        ProposalId::new(SeqId(0), BallotNumber(n), Uuid::from_u128(1))
    }

    #[tokio::test]
    async fn replies_are_durable_before_return() {
        let log: Arc<MemoryLog<AcceptorRecord>> = Arc::new(MemoryLog::new());
        let acceptor = Acceptor::open(log.clone()).await.unwrap();

        acceptor.prepare(SeqId(0), ballot(1)).await.unwrap();
        let record = log.read_round(SeqId(0)).unwrap().unwrap();
        assert_eq!(record.promised, Some(ballot(1)));
        assert_eq!(record.accepted, None);

        let value = PaxosValue::new(SeqId(0), Uuid::from_u128(1), None);
        acceptor
            .accept(SeqId(0), ballot(1), value.clone())
            .await
            .unwrap();
        let record = log.read_round(SeqId(0)).unwrap().unwrap();
        assert_eq!(record.accepted, Some((ballot(1), value)));
    }

    #[tokio::test]
    async fn rejections_leave_the_log_untouched() {
        let log: Arc<MemoryLog<AcceptorRecord>> = Arc::new(MemoryLog::new());
        let acceptor = Acceptor::open(log.clone()).await.unwrap();

        acceptor.prepare(SeqId(0), ballot(5)).await.unwrap();
        let before = log.read_round(SeqId(0)).unwrap();

        let outcome = acceptor.prepare(SeqId(0), ballot(3)).await.unwrap();
        assert!(matches!(outcome, PrepareOutcome::Rejected { .. }));
        assert_eq!(log.read_round(SeqId(0)).unwrap(), before);
    }

    #[tokio::test]
    async fn recovers_promises_across_reopen() {
        let log: Arc<MemoryLog<AcceptorRecord>> = Arc::new(MemoryLog::new());
        {
            let acceptor = Acceptor::open(log.clone()).await.unwrap();
            acceptor.prepare(SeqId(3), ProposalId::new(SeqId(3), BallotNumber(8), Uuid::from_u128(2)))
                .await
                .unwrap();
        }

        let reopened = Acceptor::open(log).await.unwrap();
        assert_eq!(
            reopened.latest_sequence_prepared_or_accepted().await,
            SeqId(3)
        );
        let outcome = reopened
            .prepare(SeqId(3), ProposalId::new(SeqId(3), BallotNumber(7), Uuid::from_u128(1)))
            .await
            .unwrap();
        assert!(matches!(outcome, PrepareOutcome::Rejected { .. }));
    }
}
