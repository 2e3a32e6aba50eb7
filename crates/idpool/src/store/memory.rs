use crate::{
    Error, Pool, PoolListener, Result,
    listener::{ListenerSet, PoolChange},
    store::{PoolStore, PoolWrite, Versioned},
};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};

struct StoredRecord {
    version: u64,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct Records {
    by_name: HashMap<String, StoredRecord>,
    last_version: u64,
}

/// An in-process [`PoolStore`].
///
/// Records are kept JSON-encoded, exactly as they would be persisted, and
/// every committed write is published to the subscribed listeners once the
/// batch is applied.
#[derive(Default)]
pub struct MemoryPoolStore {
    records: Mutex<Records>,
    listeners: ListenerSet,
}

impl MemoryPoolStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn PoolListener>) {
        self.listeners.subscribe(listener);
    }

    pub fn len(&self) -> usize {
        self.records.lock().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn decode(bytes: &[u8]) -> Result<Pool> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn check(records: &Records, write: &PoolWrite) -> Result<()> {
        let current = records.by_name.get(write.record()).map(|r| r.version);
        let ok = match write {
            PoolWrite::Create(_) => current.is_none(),
            PoolWrite::Update {
                expected_version, ..
            }
            | PoolWrite::Delete {
                expected_version, ..
            } => current == Some(*expected_version),
        };
        if ok {
            Ok(())
        } else {
            Err(Error::StoreConflict {
                record: write.record().to_owned(),
            })
        }
    }

    fn commit(&self, writes: Vec<PoolWrite>) -> Result<Vec<PoolChange>> {
        let mut records = self.records.lock();

        // Validate, encode and decode everything before touching a record.
        let mut staged = Vec::with_capacity(writes.len());
        for write in writes {
            Self::check(&records, &write)?;
            let before = records
                .by_name
                .get(write.record())
                .map(|r| Self::decode(&r.bytes))
                .transpose()?;
            let after = match write {
                PoolWrite::Create(pool) | PoolWrite::Update { pool, .. } => {
                    let bytes = serde_json::to_vec(&pool)?;
                    Some((pool, bytes))
                }
                PoolWrite::Delete { .. } => None,
            };
            staged.push((before, after));
        }

        let mut changes = Vec::with_capacity(staged.len());
        for (before, after) in staged {
            match (before, after) {
                (before, Some((pool, bytes))) => {
                    records.last_version += 1;
                    let version = records.last_version;
                    records
                        .by_name
                        .insert(pool.name.clone(), StoredRecord { version, bytes });
                    changes.push(match before {
                        None => PoolChange::Created(pool),
                        Some(before) => PoolChange::Updated {
                            before,
                            after: pool,
                        },
                    });
                }
                (Some(before), None) => {
                    records.by_name.remove(&before.name);
                    changes.push(PoolChange::Deleted(before));
                }
                (None, None) => {}
            }
        }
        Ok(changes)
    }
}

impl PoolStore for MemoryPoolStore {
    async fn read_pool(&self, name: &str) -> Result<Option<Versioned<Pool>>> {
        let records = self.records.lock();
        records
            .by_name
            .get(name)
            .map(|r| {
                Ok(Versioned {
                    version: r.version,
                    value: Self::decode(&r.bytes)?,
                })
            })
            .transpose()
    }

    async fn list_pools(&self) -> Result<Vec<String>> {
        let mut names: Vec<_> = self.records.lock().by_name.keys().cloned().collect();
        names.sort_unstable();
        Ok(names)
    }

    async fn write_pools(&self, writes: Vec<PoolWrite>) -> Result<()> {
        let changes = self.commit(writes)?;
        for change in &changes {
            self.listeners.publish(change);
        }
        Ok(())
    }
}
