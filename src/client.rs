//! The DB Client: a thin adapter over the `mongodb` driver with a
//! retry/reconnect wrapper around every operation.
//!
//! [`with_retry`] is the one place that knows how to retry and reconnect;
//! every other method calls into it instead of duplicating the loop.

use std::future::Future;
use std::time::{Duration, Instant};

use bson::oid::ObjectId;
use bson::{doc, Document};
use futures::TryStreamExt;
use mongodb::options::{
    ClientOptions, CreateCollectionOptions, CursorType, FindOneOptions, FindOptions,
    InsertManyOptions, WriteConcern,
};
use mongodb::{Client as MongoClient, Cursor};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{CollectionStats, PrimaryKey};

/// Which node a [`Client`] talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// The in-sync, authoritative source node.
    Source,
    /// The out-of-sync destination node being brought up to date.
    Destination,
}

/// Ascending/descending sort order for [`Client::find`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending sort order.
    Ascending,
    /// Descending sort order.
    Descending,
}

impl SortOrder {
    fn as_i32(self) -> i32 {
        match self {
            SortOrder::Ascending => 1,
            SortOrder::Descending => -1,
        }
    }
}

/// Whether a document has an `_id` field and whether it is an `ObjectId`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdType {
    /// True if the sampled document had an `_id` field at all.
    pub has_id: bool,
    /// True if that `_id` was an `ObjectId`.
    pub is_object_id: bool,
}

/// A thin, retrying wrapper around one `mongodb::Client`.
///
/// Each worker constructs its own `Client` per role; connections are never
/// shared across workers.
pub struct Client {
    role: Role,
    host: String,
    write_concern: WriteConcern,
    retry_budget: Duration,
    inner: MongoClient,
}

impl Client {
    /// Connect to the node identified by `role` using `config`.
    pub async fn connect(config: &Config, role: Role) -> Result<Client> {
        let host = match role {
            Role::Source => config.mongo.host.in_sync.clone(),
            Role::Destination => config.mongo.host.out_of_sync.clone(),
        };
        let write_concern = WriteConcern::builder()
            .w(mongodb::options::Acknowledgment::from(
                config.mongo.write_acknowledgement,
            ))
            .journal(config.mongo.write_j)
            .build();
        let retry_budget = config.mongo_access_attempt();
        let inner = Self::open(&host, &write_concern).await?;

        Ok(Client {
            role,
            host,
            write_concern,
            retry_budget,
            inner,
        })
    }

    async fn open(host: &str, write_concern: &WriteConcern) -> Result<MongoClient> {
        let uri = format!("mongodb://{}", host);
        let mut opts = ClientOptions::parse(&uri).await?;
        opts.write_concern = Some(write_concern.clone());
        let client = MongoClient::with_options(opts)?;
        Ok(client)
    }

    /// Tear down and rebuild the underlying driver client, used by
    /// [`with_retry`] after a transport error.
    async fn reconnect(&mut self) -> Result<()> {
        self.inner = Self::open(&self.host, &self.write_concern).await?;
        Ok(())
    }

    /// Run `f` against a clone of the driver client, retrying on transport
    /// errors until [`Config::mongo_access_attempt`] elapses, at which
    /// point the process is killed via [`emergency_self_kill`].
    ///
    /// `mongodb::Client` is a thin handle around a connection pool shared
    /// through an internal `Arc`, so cloning it for each attempt is cheap
    /// and lets `f` take ownership without fighting the borrow checker
    /// across the `.await` inside a retry loop.
    pub async fn with_retry<T, F, Fut>(&mut self, mut f: F) -> Result<T>
    where
        F: FnMut(MongoClient) -> Fut,
        Fut: Future<Output = std::result::Result<T, mongodb::error::Error>>,
    {
        let started = Instant::now();
        let mut reconnected = false;
        loop {
            if reconnected {
                tokio::time::sleep(Duration::from_millis(500)).await;
                if let Err(e) = self.reconnect().await {
                    tracing::warn!(error = %e, "failed to reconnect, will retry");
                }
            }

            match f(self.inner.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let elapsed = started.elapsed();
                    if elapsed >= self.retry_budget {
                        tracing::error!(
                            error = %e,
                            elapsed_s = elapsed.as_secs(),
                            budget_s = self.retry_budget.as_secs(),
                            "max access attempt exceeded, stopping the mount"
                        );
                        emergency_self_kill();
                    } else {
                        tracing::warn!(
                            error = %e,
                            "problem executing the query, maybe disconnected; will reconnect and retry"
                        );
                        reconnected = true;
                    }
                }
            }
        }
    }

    /// List every database name on this node.
    pub async fn list_databases(&mut self) -> Result<Vec<String>> {
        self.with_retry(|c| async move { c.list_database_names(None, None).await })
            .await
            .map_err(Into::into)
    }

    /// List every collection name in `db`.
    pub async fn list_collections(&mut self, db: &str) -> Result<Vec<String>> {
        let db = db.to_string();
        self.with_retry(|c| {
            let db = db.clone();
            async move { c.database(&db).list_collection_names(None).await }
        })
        .await
        .map_err(Into::into)
    }

    /// Retrieve a single document matching `query`.
    pub async fn find_one(&mut self, db: &str, coll: &str, query: Document) -> Result<Option<Document>> {
        let (db, coll, query) = (db.to_string(), coll.to_string(), query);
        self.with_retry(|c| {
            let (db, coll, query) = (db.clone(), coll.clone(), query.clone());
            async move {
                c.database(&db)
                    .collection::<Document>(&coll)
                    .find_one(query, None)
                    .await
            }
        })
        .await
        .map_err(Into::into)
    }

    /// A generic find, skipped/limited/sorted exactly as the basic shard
    /// copier needs it.
    pub async fn find(
        &mut self,
        db: &str,
        coll: &str,
        query: Document,
        skip: u64,
        limit: i64,
        sort_field: &str,
        sort_order: SortOrder,
    ) -> Result<Vec<Document>> {
        let (db, coll, query, sort_field) =
            (db.to_string(), coll.to_string(), query, sort_field.to_string());
        self.with_retry(|c| {
            let (db, coll, query, sort_field) =
                (db.clone(), coll.clone(), query.clone(), sort_field.clone());
            async move {
                let opts = FindOptions::builder()
                    .no_cursor_timeout(true)
                    .skip(skip)
                    .limit(limit)
                    .sort(doc! { sort_field: sort_order.as_i32() })
                    .build();
                let cursor: Cursor<Document> =
                    c.database(&db).collection(&coll).find(query, opts).await?;
                cursor.try_collect().await
            }
        })
        .await
        .map_err(Into::into)
    }

    /// A specialized find against `local.oplog.rs` using a tailable-await
    /// cursor. An empty query anchors to `ts > earliest.ts`; if probing the
    /// earliest entry fails, it anchors at the end of the oplog instead.
    pub async fn find_oplog(&mut self, query: Document, limit: i64) -> Result<Cursor<Document>> {
        let mut query = query;
        if query.is_empty() {
            query = self.anchor_oplog_query().await;
        }

        self.with_retry(|c| {
            let query = query.clone();
            async move {
                let opts = FindOptions::builder()
                    .no_cursor_timeout(true)
                    .cursor_type(CursorType::TailableAwait)
                    .limit(limit)
                    .build();
                c.database("local")
                    .collection::<Document>("oplog.rs")
                    .find(query, opts)
                    .await
            }
        })
        .await
        .map_err(Into::into)
    }

    async fn anchor_oplog_query(&mut self) -> Document {
        let probe = self
            .with_retry(|c| async move {
                let opts = FindOneOptions::builder()
                    .sort(doc! { "$natural": 1 })
                    .build();
                c.database("local")
                    .collection::<Document>("oplog.rs")
                    .find_one(None, opts)
                    .await
            })
            .await;

        match probe {
            Ok(Some(first)) => match first.get_timestamp("ts") {
                Ok(ts) => doc! { "ts": { "$gt": ts } },
                Err(_) => Document::new(),
            },
            Ok(None) | Err(_) => {
                tracing::warn!("problem while fetching the first oplog entry, starting from the end instead");
                Document::new()
            }
        }
    }

    /// Insert `documents`, unordered, with validation bypassed. Duplicate
    /// key errors (code 11000) are suppressed individually; any other
    /// write error propagates.
    pub async fn insert_many(&mut self, db: &str, coll: &str, documents: Vec<Document>) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }
        let (db, coll) = (db.to_string(), coll.to_string());
        self.with_retry(|c| {
            let (db, coll, documents) = (db.clone(), coll.clone(), documents.clone());
            async move {
                let opts = InsertManyOptions::builder()
                    .ordered(false)
                    .bypass_document_validation(true)
                    .build();
                match c
                    .database(&db)
                    .collection::<Document>(&coll)
                    .insert_many(documents, opts)
                    .await
                {
                    Ok(_) => Ok(()),
                    Err(e) => {
                        if let mongodb::error::ErrorKind::BulkWrite(ref bwe) = *e.kind {
                            let only_duplicates = bwe
                                .write_errors
                                .as_ref()
                                .map(|errs| errs.iter().all(|err| err.code == 11000))
                                .unwrap_or(false);
                            if only_duplicates {
                                return Ok(());
                            }
                        }
                        Err(e)
                    }
                }
            }
        })
        .await
    }

    /// Create `coll` in `db`, optionally capped.
    pub async fn create_collection(
        &mut self,
        db: &str,
        coll: &str,
        capped: bool,
        max: Option<i64>,
        max_size: Option<i64>,
    ) -> Result<()> {
        let (db, coll) = (db.to_string(), coll.to_string());
        self.with_retry(|c| {
            let (db, coll) = (db.clone(), coll.clone());
            async move {
                let opts = CreateCollectionOptions::builder()
                    .capped(capped)
                    .max(max)
                    .size(max_size)
                    .build();
                c.database(&db).create_collection(&coll, opts).await
            }
        })
        .await
    }

    /// Create an index on `coll`, unused by the clone core (indexes are
    /// not replicated) but kept for adapter completeness.
    pub async fn create_index(&mut self, db: &str, coll: &str, keys: Document) -> Result<()> {
        let (db, coll) = (db.to_string(), coll.to_string());
        self.with_retry(|c| {
            let (db, coll, keys) = (db.clone(), coll.clone(), keys.clone());
            async move {
                let model = mongodb::IndexModel::builder().keys(keys).build();
                c.database(&db)
                    .collection::<Document>(&coll)
                    .create_index(model, None)
                    .await
                    .map(|_| ())
            }
        })
        .await
    }

    /// Drop `coll` in `db`. Used only by development tooling; the core
    /// preparer never drops an existing destination collection.
    pub async fn drop(&mut self, db: &str, coll: &str) -> Result<()> {
        let (db, coll) = (db.to_string(), coll.to_string());
        self.with_retry(|c| {
            let (db, coll) = (db.clone(), coll.clone());
            async move { c.database(&db).collection::<Document>(&coll).drop(None).await }
        })
        .await
    }

    /// Snapshot of a collection's stats, or the zeroed default if the
    /// collection does not exist.
    pub async fn collection_stats(&mut self, db: &str, coll: &str) -> Result<CollectionStats> {
        let (db, coll) = (db.to_string(), coll.to_string());
        let result = self
            .with_retry(|c| {
                let (db, coll) = (db.clone(), coll.clone());
                async move {
                    match c
                        .database(&db)
                        .run_command(doc! { "collstats": coll }, None)
                        .await
                    {
                        Ok(doc) => Ok(Some(doc)),
                        Err(e) => {
                            if matches!(*e.kind, mongodb::error::ErrorKind::Command(_)) {
                                Ok(None)
                            } else {
                                Err(e)
                            }
                        }
                    }
                }
            })
            .await?;

        Ok(match result {
            Some(doc) => CollectionStats::from_document(&doc),
            None => {
                tracing::warn!(%db, %coll, "problem getting stats, collection probably does not exist");
                CollectionStats::default()
            }
        })
    }

    /// Whether a collection's documents carry an `_id` and, if so, whether
    /// it is an `ObjectId`.
    pub async fn id_type(&mut self, db: &str, coll: &str) -> Result<IdType> {
        let first = self
            .find(db, coll, Document::new(), 0, 1, "_id", SortOrder::Ascending)
            .await?;
        match first.into_iter().next() {
            None => Ok(IdType {
                has_id: false,
                is_object_id: false,
            }),
            Some(doc) => {
                let has_id = doc.contains_key("_id");
                let is_object_id = matches!(PrimaryKey::from_document(&doc), PrimaryKey::ObjectId(_));
                Ok(IdType {
                    has_id,
                    is_object_id,
                })
            }
        }
    }

    /// Sample `quantity` boundary identifiers across the collection's key
    /// space by dividing the span between its minimum and maximum `_id`
    /// creation time into equal steps. Returns an empty vec if the
    /// collection is empty. Duplicates and unsorted output are permitted.
    pub async fn section_ids(&mut self, db: &str, coll: &str, quantity: usize) -> Result<Vec<ObjectId>> {
        let first = self
            .find(db, coll, Document::new(), 0, 1, "_id", SortOrder::Ascending)
            .await?;
        let first = match first.into_iter().next() {
            Some(d) => d,
            None => return Ok(Vec::new()),
        };
        let last = self
            .find(db, coll, Document::new(), 0, 1, "_id", SortOrder::Descending)
            .await?;
        let last = match last.into_iter().next() {
            Some(d) => d,
            None => return Ok(Vec::new()),
        };

        let first_id = match PrimaryKey::from_document(&first) {
            PrimaryKey::ObjectId(id) => id,
            PrimaryKey::None => return Ok(Vec::new()),
        };
        let last_id = match PrimaryKey::from_document(&last) {
            PrimaryKey::ObjectId(id) => id,
            PrimaryKey::None => return Ok(Vec::new()),
        };

        let first_secs = first_id.timestamp().timestamp_millis() / 1000;
        let last_secs = last_id.timestamp().timestamp_millis() / 1000;
        let step = 1.max((last_secs - first_secs) / quantity.max(1) as i64);

        let mut ids = Vec::new();
        let mut offset = first_secs;
        while offset < last_secs {
            ids.push(crate::model::object_id_from_unix_secs(offset as u32));
            offset += step;
        }
        Ok(ids)
    }

    /// Which role this client was opened for.
    pub fn role(&self) -> Role {
        self.role
    }
}

/// The terminal action taken when the retry budget is exhausted:
/// cooperative process-group termination followed by an unconditional
/// kill of the current process.
pub fn emergency_self_kill() -> ! {
    let argv0 = std::env::args().next().unwrap_or_else(|| "mongosync".into());
    tracing::error!(command = %argv0, "attempting to kill the current process and related threads");

    let _ = std::process::Command::new("pkill")
        .args(["-f", "-9", &argv0])
        .stdout(std::process::Stdio::null())
        .status();

    std::thread::sleep(Duration::from_secs(15));

    tracing::error!("pkill did not work, killing the process itself");
    let _ = nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(std::process::id() as i32),
        nix::sys::signal::Signal::SIGKILL,
    );
    std::process::exit(1);
}
