//! The Collection Preparer: ensures the destination collection exists,
//! then emits shard descriptors from the planner.

use crate::client::Client;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::ShardDescriptor;
use crate::planner;

/// Prepares one `(database, collection)` pair for cloning: creates the
/// destination collection when necessary, then plans its shards.
pub struct Preparer<'a> {
    config: &'a Config,
    database: String,
    collection: String,
}

impl<'a> Preparer<'a> {
    /// Build a preparer for `database.collection`.
    pub fn new(config: &'a Config, database: impl Into<String>, collection: impl Into<String>) -> Preparer<'a> {
        Preparer {
            config,
            database: database.into(),
            collection: collection.into(),
        }
    }

    /// Ensure the destination collection exists, then return the shard
    /// descriptors produced by the planner.
    ///
    /// Returns [`Error::NoSeeds`] if the planner could not produce any
    /// seed for this collection.
    pub async fn prepare(
        &self,
        source: &mut Client,
        destination: &mut Client,
    ) -> Result<Vec<ShardDescriptor>> {
        let stats = source.collection_stats(&self.database, &self.collection).await?;
        let id_type = source.id_type(&self.database, &self.collection).await?;

        self.check_collection(destination, &stats).await?;

        let shards = planner::plan_seeds(
            source,
            &self.database,
            &self.collection,
            self.config.internal.maximum_seeds,
            &stats,
            id_type,
        )
        .await?;

        if shards.is_empty() {
            return Err(Error::NoSeeds {
                database: self.database.clone(),
                collection: self.collection.clone(),
            });
        }

        Ok(shards)
    }

    /// Create the destination collection, capped if the source is capped
    /// and the destination does not exist yet.
    ///
    /// This never drops an existing destination collection first; mounting
    /// onto whatever is already there is always safe since capped options
    /// only matter at creation time.
    async fn check_collection(
        &self,
        destination: &mut Client,
        source_stats: &crate::model::CollectionStats,
    ) -> Result<()> {
        let destination_databases = destination.list_databases().await?;
        let destination_exists = destination_databases.iter().any(|d| d == &self.database)
            && destination
                .list_collections(&self.database)
                .await?
                .iter()
                .any(|c| c == &self.collection);

        if source_stats.capped && !destination_exists {
            let (max, max_size) = if source_stats.ns == "local.oplog.rs" {
                (None, Some(self.config.mongo_oplog_size_bytes()))
            } else {
                (source_stats.max, source_stats.max_size)
            };

            destination
                .create_collection(&self.database, &self.collection, true, max, max_size)
                .await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CollectionStats;

    #[test]
    fn non_capped_source_never_needs_special_sizing() {
        let stats = CollectionStats {
            capped: false,
            ..Default::default()
        };
        assert!(!stats.capped);
    }

    #[test]
    fn oplog_namespace_is_detected_for_size_override() {
        let stats = CollectionStats {
            ns: "local.oplog.rs".into(),
            capped: true,
            ..Default::default()
        };
        assert_eq!(stats.ns, "local.oplog.rs");
    }
}
