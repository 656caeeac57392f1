//! Core data types shared by the planner, copier and orchestrator: primary
//! keys, seeds, shard descriptors and collection statistics.

use std::cmp::Ordering;
use std::fmt;

use bson::oid::ObjectId;
use bson::Document;

/// An opaque, comparable document identifier.
///
/// Mirrors the two forms the clone engine recognises: a timestamp-derived
/// 12-byte `ObjectId` and the absence of any `_id` at all. `None` always
/// compares less than any `ObjectId` so that a collection with no `_id`
/// sorts into a single, unbounded range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimaryKey {
    /// A timestamp-derived identifier, the only form the planner can shard on.
    ObjectId(ObjectId),
    /// No `_id` field present on the document.
    None,
}

impl PrimaryKey {
    /// The all-zero sentinel used as the lower bound of the key space.
    pub fn min_sentinel() -> PrimaryKey {
        PrimaryKey::ObjectId(ObjectId::from_bytes([0u8; 12]))
    }

    /// The all-one sentinel used as the upper bound of the key space.
    pub fn max_sentinel() -> PrimaryKey {
        PrimaryKey::ObjectId(ObjectId::from_bytes([0xffu8; 12]))
    }

    /// True if this key carries an actual `ObjectId`.
    pub fn is_some(&self) -> bool {
        matches!(self, PrimaryKey::ObjectId(_))
    }

    /// The wrapped `ObjectId`, if any.
    pub fn object_id(&self) -> Option<ObjectId> {
        match self {
            PrimaryKey::ObjectId(id) => Some(*id),
            PrimaryKey::None => None,
        }
    }

    /// Read a document's `_id` field into a `PrimaryKey`.
    ///
    /// Documents whose `_id` is missing or not an `ObjectId` are treated as
    /// `None`, matching the "not all documents have an `_id`" caveat noted in
    /// the original collection part implementation.
    pub fn from_document(doc: &Document) -> PrimaryKey {
        match doc.get_object_id("_id") {
            Ok(id) => PrimaryKey::ObjectId(id),
            Err(_) => PrimaryKey::None,
        }
    }
}

impl PartialOrd for PrimaryKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PrimaryKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (PrimaryKey::None, PrimaryKey::None) => Ordering::Equal,
            (PrimaryKey::None, PrimaryKey::ObjectId(_)) => Ordering::Less,
            (PrimaryKey::ObjectId(_), PrimaryKey::None) => Ordering::Greater,
            (PrimaryKey::ObjectId(a), PrimaryKey::ObjectId(b)) => a.bytes().cmp(&b.bytes()),
        }
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PrimaryKey::ObjectId(id) => write!(f, "{}", id),
            PrimaryKey::None => write!(f, "None"),
        }
    }
}

/// A seed is just a `PrimaryKey`; a sorted, deduplicated sequence of seeds
/// partitions the identifier space into half-open-turned-right-closed
/// shards (see [`ShardDescriptor`]).
pub type Seed = PrimaryKey;

/// Builds an `ObjectId` whose timestamp component is `unix_secs` and whose
/// remaining eight bytes (machine, process, counter) are zero.
///
/// The driver does not expose a public constructor that only fills the
/// timestamp, so this reproduces `ObjectId`'s byte layout directly
/// (4-byte big-endian seconds followed by zeros).
pub fn object_id_from_unix_secs(unix_secs: u32) -> ObjectId {
    let mut bytes = [0u8; 12];
    bytes[0..4].copy_from_slice(&unix_secs.to_be_bytes());
    ObjectId::from_bytes(bytes)
}

/// A `(database, collection, seed_start, seed_end, total_seeds)` range
/// assigned to exactly one worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardDescriptor {
    /// Source/destination database name.
    pub database: String,
    /// Source/destination collection name.
    pub collection: String,
    /// Inclusive lower bound of this shard's key range.
    pub seed_start: PrimaryKey,
    /// Inclusive upper bound of this shard's key range.
    pub seed_end: PrimaryKey,
    /// Total number of shards this collection was split into; used only
    /// for progress-reporting estimates.
    pub total_seeds: usize,
}

impl ShardDescriptor {
    /// True if this descriptor names the replication log's single shard.
    pub fn is_oplog(&self) -> bool {
        self.database == "local" && self.collection == "oplog.rs"
    }
}

impl fmt::Display for ShardDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}.{}:[{};{}]",
            self.database, self.collection, self.seed_start, self.seed_end
        )
    }
}

/// Snapshot of a collection's `collStats` command reply, used for chunk
/// sizing and progress logging.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CollectionStats {
    /// Average document size in bytes.
    pub avg_obj_size: f64,
    /// Approximate document count.
    pub count: i64,
    /// Approximate on-disk storage size in bytes.
    pub storage_size: i64,
    /// Whether the collection is capped.
    pub capped: bool,
    /// Capped max document count, if capped.
    pub max: Option<i64>,
    /// Capped max byte size, if capped.
    pub max_size: Option<i64>,
    /// Fully qualified namespace (`db.collection`).
    pub ns: String,
}

impl CollectionStats {
    /// Parse stats out of a raw `collStats` reply. Returns the zeroed
    /// default when the document is empty (the client returns an empty
    /// document for a collection that does not exist).
    pub fn from_document(doc: &Document) -> CollectionStats {
        CollectionStats {
            avg_obj_size: doc.get_f64("avgObjSize").unwrap_or(0.0),
            count: doc
                .get_i64("count")
                .or_else(|_| doc.get_i32("count").map(i64::from))
                .unwrap_or(0),
            storage_size: doc
                .get_i64("storageSize")
                .or_else(|_| doc.get_i32("storageSize").map(i64::from))
                .unwrap_or(0),
            capped: doc.get_bool("capped").unwrap_or(false),
            max: doc
                .get_i64("max")
                .ok()
                .or_else(|| doc.get_i32("max").ok().map(i64::from)),
            max_size: doc
                .get_i64("maxSize")
                .ok()
                .or_else(|| doc.get_i32("maxSize").ok().map(i64::from)),
            ns: doc.get_str("ns").unwrap_or("").to_string(),
        }
    }

    /// Whether this snapshot represents a collection that does not exist.
    pub fn is_empty(&self) -> bool {
        self.ns.is_empty() && self.count == 0 && self.avg_obj_size == 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_sorts_before_object_id() {
        let a = PrimaryKey::None;
        let b = PrimaryKey::ObjectId(ObjectId::from_bytes([0u8; 12]));
        assert!(a < b);
    }

    #[test]
    fn sentinels_bracket_any_object_id() {
        let min = PrimaryKey::min_sentinel();
        let max = PrimaryKey::max_sentinel();
        let mid = PrimaryKey::ObjectId(object_id_from_unix_secs(1_700_000_000));
        assert!(min <= mid);
        assert!(mid <= max);
    }

    #[test]
    fn object_id_from_unix_secs_round_trips_timestamp() {
        let id = object_id_from_unix_secs(1_479_561_394);
        assert_eq!(id.timestamp().timestamp_millis() / 1000, 1_479_561_394);
    }

    #[test]
    fn collection_stats_from_empty_document_is_empty() {
        let stats = CollectionStats::from_document(&Document::new());
        assert!(stats.is_empty());
    }

    #[test]
    fn shard_descriptor_recognises_oplog() {
        let d = ShardDescriptor {
            database: "local".into(),
            collection: "oplog.rs".into(),
            seed_start: PrimaryKey::None,
            seed_end: PrimaryKey::None,
            total_seeds: 1,
        };
        assert!(d.is_oplog());
    }
}
