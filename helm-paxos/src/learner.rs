//! The local learner: durable record of chosen values.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::log::{LogError, StateLog};
use crate::types::{PaxosValue, SeqId};

#[derive(Debug)]
pub enum LearnError {
    /// A different value was already learned for the round. Two learners
    /// disagreeing on a chosen value means consensus was violated; this is
    /// never recoverable.
    Conflict { seq: SeqId },
    Storage(LogError),
}

impl fmt::Display for LearnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LearnError::Conflict { seq } => {
                write!(f, "conflicting value learned for round {seq}")
            }
            LearnError::Storage(e) => write!(f, "failed to persist learned value: {e}"),
        }
    }
}

impl std::error::Error for LearnError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LearnError::Conflict { .. } => None,
            LearnError::Storage(e) => Some(e),
        }
    }
}

impl From<LogError> for LearnError {
    fn from(e: LogError) -> Self {
        LearnError::Storage(e)
    }
}

/// Stores chosen values per round, durably, and serves them back.
///
/// Values are immutable once learned; `learn` is idempotent for the same
/// value and fatal for a different one.
pub struct Learner {
    log: Arc<dyn StateLog<PaxosValue>>,
    values: Mutex<BTreeMap<SeqId, PaxosValue>>,
}

impl Learner {
    /// Open a learner, recovering learned values from the log.
    pub async fn open(log: Arc<dyn StateLog<PaxosValue>>) -> Result<Self, LogError> {
        let records = {
            let log = log.clone();
            tokio::task::spawn_blocking(move || log.read_from(SeqId(0)))
                .await
                .expect("spawn_blocking panicked")?
        };

        Ok(Self {
            log,
            values: Mutex::new(records.into_iter().collect()),
        })
    }

    pub async fn learn(&self, seq: SeqId, value: PaxosValue) -> Result<(), LearnError> {
        let mut values = self.values.lock().await;
        if let Some(existing) = values.get(&seq) {
            if *existing == value {
                return Ok(());
            }
            return Err(LearnError::Conflict { seq });
        }

        let log = self.log.clone();
        let record = value.clone();
        tokio::task::spawn_blocking(move || log.write_round(seq, &record))
            .await
            .expect("spawn_blocking panicked")?;

        debug!(round = ?seq, leader = %value.leader, "learned value");
        values.insert(seq, value);
        Ok(())
    }

    pub async fn get_learned_value(&self, seq: SeqId) -> Option<PaxosValue> {
        self.values.lock().await.get(&seq).cloned()
    }

    pub async fn greatest_learned_value(&self) -> Option<PaxosValue> {
        self.values
            .lock()
            .await
            .values()
            .next_back()
            .cloned()
    }

    /// All learned values with round `>= seq`, in round order. Used by
    /// peers to catch up.
    pub async fn get_learned_values_since(&self, seq: SeqId) -> Vec<PaxosValue> {
        self.values
            .lock()
            .await
            .range(seq.max(SeqId(0))..)
            .map(|(_, v)| v.clone())
            .collect()
    }
}
