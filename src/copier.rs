//! The Shard Copier: copies documents in one key range from source to
//! destination, chunked to respect size limits, resumable after reconnect.
//!
//! [`run_sync`] and the [`Sync`] trait hold the behavior shared by every
//! kind of shard; [`ShardCopier`] is the plain range-query implementation.
//! The oplog's specialization lives in [`crate::oplog_tail`].

use std::time::Instant;

use bson::{doc, Document};

use crate::client::{Client, SortOrder};
use crate::error::Result;
use crate::model::{CollectionStats, PrimaryKey, ShardDescriptor};

/// Aggregate stats returned by one `sync()` run.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SyncStats {
    /// Total documents copied.
    pub quantity: u64,
    /// Total time spent reading from the source, in seconds.
    pub read_time: f64,
    /// Total time spent writing to the destination, in seconds.
    pub write_time: f64,
}

/// Worker-local, never-persisted progress marker: the last successfully
/// inserted key (or oplog `ts`) in a shard.
#[derive(Clone, Copy, Debug, Default)]
pub struct ShardProgress {
    /// The last key copied so far in this shard's lifetime, used to
    /// resume after a transient disconnection.
    pub previous_id: Option<PrimaryKey>,
}

/// Sizing policy shared by the basic copier and the oplog tailer: how many
/// documents can be written or read per request while staying under the
/// driver's hard 16 MiB per-message ceiling.
#[derive(Clone, Copy, Debug)]
pub struct SizeLimits {
    /// Conservative write batch size, computed under a 12 MiB budget.
    pub limit_write: usize,
    /// Read batch size; ten times the write limit, bounding per-fetch
    /// memory use.
    pub limit_read: usize,
}

impl SizeLimits {
    /// Derive read/write batch sizes from a collection's average
    /// document size.
    pub fn from_avg_obj_size(avg_obj_size: f64) -> SizeLimits {
        let avg = avg_obj_size.max(1.0);
        let limit_write = ((12.0 * 1024.0 * 1024.0) / avg).floor().max(1.0) as usize;
        SizeLimits {
            limit_write,
            limit_read: limit_write * 10,
        }
    }
}

/// The two behaviors that distinguish the basic shard copier from the
/// oplog tailer.
#[async_trait::async_trait]
pub trait Sync {
    /// Whether the next iteration should keep pulling from the source.
    fn continue_fetching(&self, received_quantity: usize, limit_read: usize) -> bool;

    /// Copy up to one batch of documents, advancing `progress` and
    /// returning how many were copied and how long reading/writing took.
    /// `offset` is the cumulative document count copied by this shard so
    /// far, used as a `skip` for collections with no `_id` to range on.
    async fn sync_section(
        &mut self,
        source: &mut Client,
        destination: &mut Client,
        progress: &mut ShardProgress,
        offset: u64,
        limits: SizeLimits,
    ) -> Result<SyncStats>;

    /// The shard this copier is responsible for, used for progress
    /// logging identity.
    fn descriptor(&self) -> &ShardDescriptor;
}

/// Drive a [`Sync`] implementation to completion (or forever, for the
/// oplog), logging progress every 50 iterations exactly as
/// `CollectionPart.sync` does.
pub async fn run_sync<T: Sync>(
    copier: &mut T,
    source: &mut Client,
    destination: &mut Client,
    mut stats: CollectionStats,
) -> Result<SyncStats> {
    let total_seeds = copier.descriptor().total_seeds.max(1);
    let mut expected_documents = (stats.count / total_seeds as i64).max(0) as u64;
    let limits = SizeLimits::from_avg_obj_size(stats.avg_obj_size);
    let storage_size_part_gb =
        stats.storage_size as f64 / (1024f64.powi(3) * total_seeds as f64);

    tracing::info!(
        shard = %copier.descriptor(),
        expected_documents,
        storage_gb = storage_size_part_gb,
        "start-sync"
    );

    let mut progress = ShardProgress::default();
    let mut offset: u64 = 0;
    let mut read_time = 0.0f64;
    let mut write_time = 0.0f64;
    let started = Instant::now();
    let mut iteration: u64 = 0;

    loop {
        let section = copier
            .sync_section(source, destination, &mut progress, offset, limits)
            .await?;
        offset += section.quantity;
        read_time += section.read_time;
        write_time += section.write_time;

        let keep_going = copier.continue_fetching(section.quantity as usize, limits.limit_read);
        iteration += 1;

        if iteration % 50 == 0 {
            if offset >= expected_documents {
                stats = source
                    .collection_stats(&copier.descriptor().database, &copier.descriptor().collection)
                    .await?;
                expected_documents = (stats.count / total_seeds as i64).max(0) as u64;
            }

            let elapsed = started.elapsed().as_secs_f64();
            let ratio = if expected_documents > 0 {
                (1000.0 * offset as f64 / expected_documents as f64).floor() / 10.0
            } else {
                100.0
            };
            let average_speed = if elapsed > 0.0 { offset as f64 / elapsed } else { 0.0 };
            let remaining_minutes = if average_speed > 0.0 {
                ((expected_documents as f64 - offset as f64) / (average_speed * 60.0)) as i64
            } else {
                0
            };

            tracing::info!(
                shard = %copier.descriptor(),
                offset,
                expected_documents,
                ratio_percent = ratio,
                docs_per_s = average_speed as u64,
                remaining_minutes,
                read_time_percent = ((100.0 * read_time / elapsed.max(1e-9)) as i64),
                write_time_percent = ((100.0 * write_time / elapsed.max(1e-9)) as i64),
                "syncing"
            );
        }

        if !keep_going {
            break;
        }
    }

    let elapsed = started.elapsed().as_secs_f64();
    tracing::info!(
        shard = %copier.descriptor(),
        offset,
        storage_gb = storage_size_part_gb,
        elapsed_s = elapsed as u64,
        "end-sync"
    );

    Ok(SyncStats {
        quantity: offset,
        read_time,
        write_time,
    })
}

/// Advance `progress.previous_id` to the last document's `_id`, but only
/// when that document actually has one; a batch whose last document has
/// no `_id` leaves `previous_id` untouched so a whole-collection scan
/// keeps resuming through `skip` instead of spuriously switching to a
/// range query that can never match.
fn advance_previous_id(progress: &mut ShardProgress, last: Option<&Document>) {
    if let Some(id @ PrimaryKey::ObjectId(_)) = last.map(PrimaryKey::from_document) {
        progress.previous_id = Some(id);
    }
}

/// Insert `documents`, falling back to one-document-at-a-time insertion
/// if the batch insert fails (e.g. the server's per-message limit was
/// exceeded despite the size heuristic).
pub async fn insert_subset(
    destination: &mut Client,
    database: &str,
    collection: &str,
    documents: Vec<Document>,
) -> Result<()> {
    let count = documents.len();
    match destination.insert_many(database, collection, documents.clone()).await {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::warn!(
                error = %e,
                count,
                %database,
                %collection,
                "exception inserting batch, retrying one document at a time"
            );
            for doc in documents {
                destination.insert_many(database, collection, vec![doc]).await?;
            }
            Ok(())
        }
    }
}

/// The basic shard copier: copies one key range from source to
/// destination via plain finds, resumable through [`ShardProgress`].
pub struct ShardCopier {
    descriptor: ShardDescriptor,
}

impl ShardCopier {
    /// Build a copier for `descriptor`.
    pub fn new(descriptor: ShardDescriptor) -> ShardCopier {
        ShardCopier { descriptor }
    }

    fn range_query(&self, progress: &ShardProgress, offset: u64) -> (Document, u64) {
        let mut lower = self.descriptor.seed_start;
        if let Some(previous) = progress.previous_id {
            lower = previous;
        }

        let whole_collection =
            self.descriptor.seed_start == PrimaryKey::None || self.descriptor.seed_end == PrimaryKey::None;

        if whole_collection {
            if progress.previous_id.is_none() {
                // No `_id` at all (or first iteration): fall back to a
                // skip-based scan. Quadratic in the number of batches, but
                // there is no other stable way to page a collection with
                // no sortable key.
                return (Document::new(), offset);
            }
            let query = match lower.object_id() {
                Some(id) => doc! { "_id": { "$gte": id } },
                None => Document::new(),
            };
            return (query, 0);
        }

        let mut range = Document::new();
        if let Some(id) = lower.object_id() {
            range.insert("$gte", id);
        }
        if let Some(id) = self.descriptor.seed_end.object_id() {
            range.insert("$lte", id);
        }
        let mut query = Document::new();
        query.insert("_id", range);
        (query, 0)
    }
}

#[async_trait::async_trait]
impl Sync for ShardCopier {
    fn continue_fetching(&self, received_quantity: usize, expected_quantity: usize) -> bool {
        received_quantity >= expected_quantity
    }

    async fn sync_section(
        &mut self,
        source: &mut Client,
        destination: &mut Client,
        progress: &mut ShardProgress,
        offset: u64,
        limits: SizeLimits,
    ) -> Result<SyncStats> {
        let started = Instant::now();
        let (query, skip) = self.range_query(progress, offset);

        let objects = source
            .find(
                &self.descriptor.database,
                &self.descriptor.collection,
                query,
                skip,
                limits.limit_read as i64,
                "_id",
                SortOrder::Ascending,
            )
            .await?;
        let read_time = started.elapsed().as_secs_f64();

        let write_started = Instant::now();
        for chunk in objects.chunks(limits.limit_write) {
            insert_subset(
                destination,
                &self.descriptor.database,
                &self.descriptor.collection,
                chunk.to_vec(),
            )
            .await?;
        }
        let write_time = write_started.elapsed().as_secs_f64();

        advance_previous_id(progress, objects.last());

        Ok(SyncStats {
            quantity: objects.len() as u64,
            read_time,
            write_time,
        })
    }

    fn descriptor(&self) -> &ShardDescriptor {
        &self.descriptor
    }
}

impl std::fmt::Display for ShardCopier {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "ShardCopier:{}", self.descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_limits_respect_the_16mib_ceiling() {
        let limits = SizeLimits::from_avg_obj_size(1024.0 * 1024.0); // 1 MiB docs
        assert_eq!(limits.limit_write, 12);
        assert_eq!(limits.limit_read, 120);
        // Every insert_many batch must stay strictly below ceil(16MiB/avg).
        let ceiling = (16.0 * 1024.0 * 1024.0 / (1024.0 * 1024.0)).ceil() as usize;
        assert!(limits.limit_write < ceiling);
    }

    #[test]
    fn range_query_uses_sentinels_for_a_full_shard() {
        let descriptor = ShardDescriptor {
            database: "db1".into(),
            collection: "c1".into(),
            seed_start: PrimaryKey::min_sentinel(),
            seed_end: PrimaryKey::max_sentinel(),
            total_seeds: 1,
        };
        let copier = ShardCopier::new(descriptor);
        let (query, skip) = copier.range_query(&ShardProgress::default(), 0);
        assert_eq!(skip, 0);
        let range = query.get_document("_id").unwrap();
        assert!(range.contains_key("$gte"));
        assert!(range.contains_key("$lte"));
    }

    #[test]
    fn range_query_raises_lower_bound_from_previous_id() {
        let descriptor = ShardDescriptor {
            database: "db1".into(),
            collection: "c1".into(),
            seed_start: PrimaryKey::min_sentinel(),
            seed_end: PrimaryKey::max_sentinel(),
            total_seeds: 1,
        };
        let copier = ShardCopier::new(descriptor);
        let previous = PrimaryKey::ObjectId(crate::model::object_id_from_unix_secs(1_700_000_000));
        let progress = ShardProgress {
            previous_id: Some(previous),
        };
        let (query, _) = copier.range_query(&progress, 0);
        let range = query.get_document("_id").unwrap();
        assert_eq!(range.get_object_id("$gte").unwrap(), previous.object_id().unwrap());
    }

    #[test]
    fn whole_collection_without_previous_id_falls_back_to_skip() {
        let descriptor = ShardDescriptor {
            database: "db1".into(),
            collection: "c1".into(),
            seed_start: PrimaryKey::None,
            seed_end: PrimaryKey::None,
            total_seeds: 1,
        };
        let copier = ShardCopier::new(descriptor);
        let (query, _skip) = copier.range_query(&ShardProgress::default(), 0);
        assert!(query.is_empty());
    }

    #[test]
    fn basic_copier_terminates_on_short_batch() {
        let descriptor = ShardDescriptor {
            database: "db1".into(),
            collection: "c1".into(),
            seed_start: PrimaryKey::None,
            seed_end: PrimaryKey::None,
            total_seeds: 1,
        };
        let copier = ShardCopier::new(descriptor);
        assert!(copier.continue_fetching(10, 10));
        assert!(!copier.continue_fetching(9, 10));
    }

    #[test]
    fn advance_previous_id_sets_it_from_an_object_id() {
        let mut progress = ShardProgress::default();
        let last = doc! { "_id": PrimaryKey::min_sentinel().object_id().unwrap() };
        advance_previous_id(&mut progress, Some(&last));
        assert!(progress.previous_id.unwrap().is_some());
    }

    #[test]
    fn advance_previous_id_leaves_it_unset_without_an_object_id() {
        let mut progress = ShardProgress::default();
        let last = doc! { "value": 1 };
        advance_previous_id(&mut progress, Some(&last));
        assert!(progress.previous_id.is_none());
    }

    #[test]
    fn advance_previous_id_is_a_no_op_without_a_last_document() {
        let mut progress = ShardProgress::default();
        advance_previous_id(&mut progress, None);
        assert!(progress.previous_id.is_none());
    }
}
