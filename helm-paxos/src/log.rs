//! Durable per-round state logs.
//!
//! Each log maps a round to one record and must make the record durable
//! before reporting success; the acceptor and learner rely on that ordering
//! for crash safety. Undecodable records are surfaced as
//! [`LogError::Corrupt`] and never skipped.

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Mutex;

use fjall::{Database, Keyspace, KeyspaceCreateOptions, PersistMode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::types::SeqId;

#[derive(Debug)]
pub enum LogError {
    Storage(fjall::Error),
    /// A persisted record failed to decode. Unrecoverable.
    Corrupt { seq: SeqId },
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogError::Storage(e) => write!(f, "state log storage error: {e}"),
            LogError::Corrupt { seq } => write!(f, "state log record for round {seq} is corrupt"),
        }
    }
}

impl std::error::Error for LogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LogError::Storage(e) => Some(e),
            LogError::Corrupt { .. } => None,
        }
    }
}

impl From<fjall::Error> for LogError {
    fn from(e: fjall::Error) -> Self {
        LogError::Storage(e)
    }
}

/// Append-style durable log of per-round records.
///
/// `write_round` returns only once the record is durable. `read_from` and
/// `greatest_entry` observe the last durable state; after a crash the log
/// recovers to exactly the last flushed record per round.
pub trait StateLog<R>: Send + Sync {
    fn write_round(&self, seq: SeqId, record: &R) -> Result<(), LogError>;

    fn read_round(&self, seq: SeqId) -> Result<Option<R>, LogError>;

    /// All records with `seq' >= seq`, in round order.
    fn read_from(&self, seq: SeqId) -> Result<Vec<(SeqId, R)>, LogError>;

    fn greatest_entry(&self) -> Result<Option<(SeqId, R)>, LogError>;
}

/// Open the backing database for one node's durable logs.
///
/// The acceptor and learner logs are separate keyspaces within it.
pub fn open_database(path: impl AsRef<Path>) -> Result<Database, LogError> {
    Ok(Database::builder(path.as_ref()).open()?)
}

/// Durable log on a fjall keyspace.
///
/// Keys are big-endian round numbers so range scans iterate in round order;
/// values are postcard-encoded records. Every write is flushed with
/// `PersistMode::SyncAll` before returning.
pub struct FjallLog<R> {
    db: Database,
    keyspace: Keyspace,
    _record: PhantomData<fn() -> R>,
}

impl<R> FjallLog<R>
where
    R: Serialize + DeserializeOwned,
{
    pub fn open(db: &Database, name: &str) -> Result<Self, LogError> {
        let keyspace = db.keyspace(name, KeyspaceCreateOptions::default)?;
        Ok(Self {
            db: db.clone(),
            keyspace,
            _record: PhantomData,
        })
    }

    fn key(seq: SeqId) -> [u8; 8] {
        debug_assert!(seq.is_entry(), "sentinel rounds are never persisted");
        seq.0.to_be_bytes()
    }

    fn parse_key(key: &[u8]) -> Option<SeqId> {
        let bytes: [u8; 8] = key.try_into().ok()?;
        Some(SeqId(i64::from_be_bytes(bytes)))
    }

    fn decode(seq: SeqId, bytes: &[u8]) -> Result<R, LogError> {
        postcard::from_bytes(bytes).map_err(|_| LogError::Corrupt { seq })
    }
}

impl<R> StateLog<R> for FjallLog<R>
where
    R: Serialize + DeserializeOwned + Send + Sync,
{
    fn write_round(&self, seq: SeqId, record: &R) -> Result<(), LogError> {
        let value = postcard::to_allocvec(record).expect("serialization should not fail");
        self.keyspace.insert(Self::key(seq), &value)?;
        self.db.persist(PersistMode::SyncAll)?;
        Ok(())
    }

    fn read_round(&self, seq: SeqId) -> Result<Option<R>, LogError> {
        match self.keyspace.get(Self::key(seq))? {
            Some(bytes) => Ok(Some(Self::decode(seq, &bytes)?)),
            None => Ok(None),
        }
    }

    fn read_from(&self, seq: SeqId) -> Result<Vec<(SeqId, R)>, LogError> {
        let start = Self::key(seq.max(SeqId(0)));
        let mut records = Vec::new();
        for guard in self.keyspace.range(start..) {
            let (key, value) = guard.into_inner()?;
            let Some(entry_seq) = Self::parse_key(&key) else {
                continue;
            };
            records.push((entry_seq, Self::decode(entry_seq, &value)?));
        }
        Ok(records)
    }

    fn greatest_entry(&self) -> Result<Option<(SeqId, R)>, LogError> {
        for guard in self.keyspace.iter().rev() {
            let (key, value) = guard.into_inner()?;
            let Some(seq) = Self::parse_key(&key) else {
                continue;
            };
            return Ok(Some((seq, Self::decode(seq, &value)?)));
        }
        Ok(None)
    }
}

/// In-memory log for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryLog<R> {
    records: Mutex<BTreeMap<SeqId, R>>,
}

impl<R> MemoryLog<R> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<R> StateLog<R> for MemoryLog<R>
where
    R: Clone + Send + Sync,
{
    fn write_round(&self, seq: SeqId, record: &R) -> Result<(), LogError> {
        self.records.lock().unwrap().insert(seq, record.clone());
        Ok(())
    }

    fn read_round(&self, seq: SeqId) -> Result<Option<R>, LogError> {
        Ok(self.records.lock().unwrap().get(&seq).cloned())
    }

    fn read_from(&self, seq: SeqId) -> Result<Vec<(SeqId, R)>, LogError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .range(seq..)
            .map(|(s, r)| (*s, r.clone()))
            .collect())
    }

    fn greatest_entry(&self) -> Result<Option<(SeqId, R)>, LogError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .next_back()
            .map(|(s, r)| (*s, r.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_log_round_trip() {
        let log = MemoryLog::new();
        log.write_round(SeqId(0), &"zero".to_string()).unwrap();
        log.write_round(SeqId(2), &"two".to_string()).unwrap();

        assert_eq!(log.read_round(SeqId(0)).unwrap().as_deref(), Some("zero"));
        assert_eq!(log.read_round(SeqId(1)).unwrap(), None);
        assert_eq!(
            log.greatest_entry().unwrap(),
            Some((SeqId(2), "two".to_string()))
        );
        assert_eq!(
            log.read_from(SeqId(1)).unwrap(),
            vec![(SeqId(2), "two".to_string())]
        );
    }

    #[test]
    fn memory_log_overwrites_in_place() {
        let log = MemoryLog::new();
        log.write_round(SeqId(0), &1u32).unwrap();
        log.write_round(SeqId(0), &2u32).unwrap();
        assert_eq!(log.read_round(SeqId(0)).unwrap(), Some(2));
    }
}
