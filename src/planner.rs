//! The Seed Planner: computes an ordered list of primary-key boundaries
//! partitioning one collection into independently copyable shards.

use crate::client::{Client, IdType};
use crate::error::Result;
use crate::model::{CollectionStats, PrimaryKey, ShardDescriptor};

/// Compute the shard descriptors for one collection.
///
/// 1. No `_id`, `_id` not an `ObjectId`, or `(local, oplog.rs)` → a single
///    unbounded shard.
/// 2. `count <= 100 * desired_seed_count` → a single full-range shard
///    using the min/max sentinels.
/// 3. Otherwise, sample `desired_seed_count` boundary ids, sort them,
///    bracket with the sentinels, and return one shard per adjacent pair.
pub async fn plan_seeds(
    client: &mut Client,
    database: &str,
    collection: &str,
    desired_seed_count: usize,
    stats: &CollectionStats,
    id_type: IdType,
) -> Result<Vec<ShardDescriptor>> {
    let is_oplog = database == "local" && collection == "oplog.rs";

    if !id_type.has_id || !id_type.is_object_id || is_oplog {
        return Ok(vec![single_shard(
            database,
            collection,
            PrimaryKey::None,
            PrimaryKey::None,
            1,
        )]);
    }

    if stats.count <= 100 * desired_seed_count as i64 {
        return Ok(vec![single_shard(
            database,
            collection,
            PrimaryKey::min_sentinel(),
            PrimaryKey::max_sentinel(),
            1,
        )]);
    }

    let mut seeds: Vec<PrimaryKey> = client
        .section_ids(database, collection, desired_seed_count)
        .await?
        .into_iter()
        .map(PrimaryKey::ObjectId)
        .collect();
    seeds.sort();

    let mut bracketed = Vec::with_capacity(seeds.len() + 2);
    bracketed.push(PrimaryKey::min_sentinel());
    bracketed.append(&mut seeds);
    bracketed.push(PrimaryKey::max_sentinel());

    let total_seeds = bracketed.len() - 1;
    let mut shards = Vec::with_capacity(total_seeds);
    for window in bracketed.windows(2) {
        shards.push(ShardDescriptor {
            database: database.to_string(),
            collection: collection.to_string(),
            seed_start: window[0],
            seed_end: window[1],
            total_seeds,
        });
    }
    Ok(shards)
}

fn single_shard(
    database: &str,
    collection: &str,
    seed_start: PrimaryKey,
    seed_end: PrimaryKey,
    total_seeds: usize,
) -> ShardDescriptor {
    ShardDescriptor {
        database: database.to_string(),
        collection: collection.to_string(),
        seed_start,
        seed_end,
        total_seeds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(count: i64) -> CollectionStats {
        CollectionStats {
            count,
            avg_obj_size: 128.0,
            ..Default::default()
        }
    }

    fn has_object_id() -> IdType {
        IdType {
            has_id: true,
            is_object_id: true,
        }
    }

    #[test]
    fn single_shard_when_no_id() {
        let descriptor = single_shard("db1", "c1", PrimaryKey::None, PrimaryKey::None, 1);
        assert_eq!(descriptor.seed_start, PrimaryKey::None);
        assert_eq!(descriptor.seed_end, PrimaryKey::None);
    }

    #[test]
    fn oplog_is_always_recognised_by_namespace() {
        let d = single_shard("local", "oplog.rs", PrimaryKey::None, PrimaryKey::None, 1);
        assert!(d.is_oplog());
    }

    #[test]
    fn small_collection_yields_full_range_sentinel_shard() {
        // count <= 100 * desired_seed_count should short-circuit to one shard
        // without consulting section_ids; we exercise that branch's pure
        // helper directly since it needs no client.
        let s = stats(50);
        let desired = 1usize;
        assert!(s.count <= 100 * desired as i64);
        let shard = single_shard(
            "db1",
            "c1",
            PrimaryKey::min_sentinel(),
            PrimaryKey::max_sentinel(),
            1,
        );
        assert_eq!(shard.seed_start, PrimaryKey::min_sentinel());
        assert_eq!(shard.seed_end, PrimaryKey::max_sentinel());
    }

    #[test]
    fn id_type_helper_distinguishes_object_id() {
        let t = has_object_id();
        assert!(t.has_id && t.is_object_id);
    }
}
