#![warn(missing_docs)]

//! A live clone-and-tail replication engine between two MongoDB nodes.
//!
//! The library exposes two layers:
//!
//! - [`Oplog`]/[`OplogBuilder`]: a `Stream` of typed [`Operation`]s read
//!   off a replica set's oplog, for callers who just want to observe
//!   changes. This is the original, narrower primitive this crate grew
//!   out of.
//! - [`orchestrator`], [`planner`], [`preparer`], [`copier`],
//!   [`oplog_tail`] and [`client`]: the full clone engine, which
//!   partitions every collection into shards, copies them, and then
//!   tails the oplog indefinitely to keep a destination node current
//!   with a source node.
//!
//! # Example
//!
//! At its most basic, an `Oplog` will yield _all_ operations in the oplog when iterated over:
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use mongodb::Client;
//! use mongosync::Oplog;
//!
//! # async fn run() -> Result<(), mongosync::Error> {
//! let client = Client::with_uri_str("mongodb://localhost").await?;
//!
//! let mut oplog = Oplog::new(&client).await?;
//!
//! while let Some(res) = oplog.next().await {
//!     let oper = res?;
//!     println!("{:?}", oper);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Alternatively, an `Oplog` can be built with a filter via `OplogBuilder` to restrict the
//! operations yielded:
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use mongodb::bson::doc;
//! use mongodb::Client;
//! use mongosync::Oplog;
//!
//! # async fn run() -> Result<(), mongosync::Error> {
//! let client = Client::with_uri_str("mongodb://localhost").await?;
//!
//! let mut oplog = Oplog::builder()
//!     .filter(doc! { "op": "i" })
//!     .build(&client)
//!     .await?;
//!
//! while let Some(res) = oplog.next().await {
//!     let oper = res?;
//!     println!("{:?}", oper);
//! }
//!
//! # Ok(())
//! # }
//! ```

use bson::Document;
use futures::ready;
use futures::Stream;
use mongodb::options::{CursorType, FindOptions};
use mongodb::Client as MongoClient;
use mongodb::Cursor;
use std::pin::Pin;
use std::task::{Context, Poll};

pub use oper::Operation;

pub use mongodb;
pub use mongodb::bson;

pub mod cli;
pub mod client;
pub mod config;
pub mod copier;
mod error;
pub mod model;
mod oper;
pub mod oplog_tail;
pub mod orchestrator;
pub mod planner;
pub mod preparer;

pub use error::{Error, Result};

/// Oplog represents a MongoDB replica set oplog.
///
/// It implements the `Stream` trait so it can be iterated over, yielding successive `Operation`s
/// as they are read from the server. This will effectively iterate forever as it will await new
/// operations.
///
/// Any errors raised while tailing the oplog (e.g. a connectivity issue) will cause the iteration
/// to end.
pub struct Oplog {
    /// The internal MongoDB cursor for the current position in the oplog.
    cursor: Cursor<bson::Document>,
}

impl Oplog {
    /// Creates an instance with default options.
    pub async fn new(client: &MongoClient) -> Result<Oplog> {
        OplogBuilder::new().build(client).await
    }

    /// Builder to configure the Oplog.
    pub fn builder() -> OplogBuilder {
        OplogBuilder::new()
    }
}

impl Stream for Oplog {
    type Item = Result<Operation>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(res) = ready!(Pin::new(&mut this.cursor).poll_next(cx)) {
            match res {
                Ok(v) => match Operation::new(&v) {
                    Ok(o) => Some(Ok(o)).into(),
                    Err(e) => Some(Err(e)).into(),
                },
                Err(e) => Some(Err(e.into())).into(),
            }
        } else {
            // Underlying cursor is over. This probably indicates that the oplog.rs collection
            // is empty. See https://jira.mongodb.org/browse/SERVER-13955
            None.into()
        }
    }
}

/// A builder for an `Oplog`.
///
/// This builder enables configuring a filter on the oplog so that only operations matching a given
/// criteria are returned (e.g. to set a start time or filter out unwanted operation types).
#[derive(Clone)]
pub struct OplogBuilder {
    filter: Option<Document>,
    batch_size: Option<u32>,
}

impl OplogBuilder {
    pub(crate) fn new() -> OplogBuilder {
        OplogBuilder {
            filter: None,
            batch_size: None,
        }
    }

    /// Provide an optional filter for the oplog.
    ///
    /// This is empty by default so all operations are returned.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use mongodb::Client;
    /// use mongosync::bson::doc;
    /// use mongosync::Oplog;
    ///
    /// # async fn run() -> Result<(), mongosync::Error> {
    /// let client = Client::with_uri_str("mongodb://localhost").await?;
    ///
    /// let mut oplog = Oplog::builder()
    ///     .filter(doc! { "op": "i" })
    ///     .build(&client)
    ///     .await?;
    ///
    /// # Ok(())
    /// # }
    /// ```
    pub fn filter(mut self, filter: Document) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Set `batch_size` option on the underlying mongodb cursor.
    ///
    /// Default this is not set and falls back on whatever the default is.
    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Executes the query and builds the `Oplog` over the client provided.
    pub async fn build(self, client: &MongoClient) -> Result<Oplog> {
        let coll = client.database("local").collection("oplog.rs");

        let opts = FindOptions::builder()
            .no_cursor_timeout(true)
            .cursor_type(CursorType::Tailable)
            .batch_size(self.batch_size)
            .build();

        let cursor = coll.find(self.filter, opts).await?;

        Ok(Oplog { cursor })
    }
}
