//! The Oplog Tailer: a specialized shard copier that follows the
//! replication log indefinitely via a tailable cursor.

use std::time::{Duration, Instant};

use bson::{doc, Document};
use futures::TryStreamExt;

use crate::client::Client;
use crate::copier::{insert_subset, ShardProgress, SizeLimits, Sync, SyncStats};
use crate::error::{Error, Result};
use crate::model::{PrimaryKey, ShardDescriptor};

/// How long to sleep when the tailable cursor has no new documents before
/// checking again.
const IDLE_SLEEP: Duration = Duration::from_secs(1);

/// Tails `local.oplog.rs` on the source, mirroring raw oplog documents
/// into the destination's own `local.oplog.rs`. Never terminates
/// voluntarily; the only way to stop it is external cancellation.
pub struct OplogTailer {
    descriptor: ShardDescriptor,
}

impl OplogTailer {
    /// Build a tailer for the oplog shard. Fails if `descriptor` carries
    /// any seed other than `(None, None)`; the oplog is always a single,
    /// unbounded shard.
    pub fn new(descriptor: ShardDescriptor) -> Result<OplogTailer> {
        if descriptor.seed_start != PrimaryKey::None || descriptor.seed_end != PrimaryKey::None {
            return Err(Error::InvalidOplogSeed);
        }
        Ok(OplogTailer { descriptor })
    }
}

#[async_trait::async_trait]
impl Sync for OplogTailer {
    fn continue_fetching(&self, _received_quantity: usize, _limit_read: usize) -> bool {
        // There is no end to the fetching phase of the oplog. The only way
        // to stop it is for the user to externally cancel the process.
        true
    }

    async fn sync_section(
        &mut self,
        source: &mut Client,
        destination: &mut Client,
        progress: &mut ShardProgress,
        _offset: u64,
        limits: SizeLimits,
    ) -> Result<SyncStats> {
        let started = Instant::now();
        let mut query = Document::new();
        if let Some(previous) = progress.previous_id {
            if let Some(ts) = previous_as_timestamp(previous) {
                query = doc! { "ts": { "$gt": ts } };
            }
        }

        let mut cursor = source.find_oplog(query, limits.limit_read as i64).await?;
        let read_time = started.elapsed().as_secs_f64();

        let write_started = Instant::now();
        let mut buffer: Vec<Document> = Vec::new();
        let mut total = 0usize;

        loop {
            let mut made_progress_this_pass = false;
            loop {
                match cursor.try_next().await? {
                    Some(entry) => {
                        made_progress_this_pass = true;
                        let ts = entry.get_timestamp("ts").ok();
                        buffer.push(entry);
                        total += 1;

                        if buffer.len() >= limits.limit_write {
                            insert_subset(destination, "local", "oplog.rs", std::mem::take(&mut buffer)).await?;
                            if let Some(ts) = ts {
                                progress.previous_id = Some(timestamp_as_primary_key(ts));
                            }
                            // Break the inner loop to let the outer loop
                            // re-check cursor liveness, mirroring the
                            // original's per-batch break.
                            break;
                        }
                    }
                    None => break,
                }
            }

            if total >= limits.limit_write {
                break;
            }

            if !made_progress_this_pass {
                if !buffer.is_empty() {
                    if let Some(last) = buffer.last().and_then(|d| d.get_timestamp("ts").ok()) {
                        insert_subset(destination, "local", "oplog.rs", std::mem::take(&mut buffer)).await?;
                        progress.previous_id = Some(timestamp_as_primary_key(last));
                    }
                }
                tokio::time::sleep(IDLE_SLEEP).await;
            }
        }

        if !buffer.is_empty() {
            insert_subset(destination, "local", "oplog.rs", buffer).await?;
        }
        let write_time = write_started.elapsed().as_secs_f64();

        Ok(SyncStats {
            quantity: total as u64,
            read_time,
            write_time,
        })
    }

    fn descriptor(&self) -> &ShardDescriptor {
        &self.descriptor
    }
}

/// Oplog `ts` timestamps are stored as a `PrimaryKey::ObjectId` whose
/// first four bytes hold the timestamp's seconds component, reusing the
/// same comparable representation as document `_id`s so `ShardProgress`
/// does not need a separate variant for "last replayed ts".
fn timestamp_as_primary_key(ts: bson::Timestamp) -> PrimaryKey {
    let mut bytes = [0u8; 12];
    bytes[0..4].copy_from_slice(&ts.time.to_be_bytes());
    bytes[4..8].copy_from_slice(&ts.increment.to_be_bytes());
    PrimaryKey::ObjectId(bson::oid::ObjectId::from_bytes(bytes))
}

fn previous_as_timestamp(previous: PrimaryKey) -> Option<bson::Timestamp> {
    let id = previous.object_id()?;
    let bytes = id.bytes();
    let time = u32::from_be_bytes(bytes[0..4].try_into().ok()?);
    let increment = u32::from_be_bytes(bytes[4..8].try_into().ok()?);
    Some(bson::Timestamp { time, increment })
}

impl std::fmt::Display for OplogTailer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "OplogTailer:{}", self.descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_non_none_seeds() {
        let descriptor = ShardDescriptor {
            database: "local".into(),
            collection: "oplog.rs".into(),
            seed_start: PrimaryKey::min_sentinel(),
            seed_end: PrimaryKey::None,
            total_seeds: 1,
        };
        assert!(OplogTailer::new(descriptor).is_err());
    }

    #[test]
    fn accepts_none_none_seeds() {
        let descriptor = ShardDescriptor {
            database: "local".into(),
            collection: "oplog.rs".into(),
            seed_start: PrimaryKey::None,
            seed_end: PrimaryKey::None,
            total_seeds: 1,
        };
        assert!(OplogTailer::new(descriptor).is_ok());
    }

    #[test]
    fn never_stops_fetching() {
        let descriptor = ShardDescriptor {
            database: "local".into(),
            collection: "oplog.rs".into(),
            seed_start: PrimaryKey::None,
            seed_end: PrimaryKey::None,
            total_seeds: 1,
        };
        let tailer = OplogTailer::new(descriptor).unwrap();
        assert!(tailer.continue_fetching(0, 1000));
    }

    #[test]
    fn timestamp_round_trips_through_primary_key() {
        let ts = bson::Timestamp {
            time: 1_479_561_394,
            increment: 7,
        };
        let key = timestamp_as_primary_key(ts);
        let back = previous_as_timestamp(key).unwrap();
        assert_eq!(back, ts);
    }
}
