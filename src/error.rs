use mongodb::bson;
use std::fmt;

/// A type alias for convenience so we can fix the error to our own `Error` type.
pub type Result<T> = std::result::Result<T, Error>;

/// Error enumerates the list of possible error conditions across the clone
/// engine: tailing the oplog, planning shards, copying documents and
/// loading configuration.
#[derive(Debug)]
pub enum Error {
    /// A database connectivity error raised by the MongoDB driver.
    ///
    /// Transport-level instances of this are expected to be absorbed by
    /// [`crate::client::with_retry`]; an `Error::Database` escaping that
    /// wrapper means the retry budget was exhausted or the failure was not
    /// transient.
    Database(mongodb::error::Error),
    /// An error when converting a BSON document to an `Operation` and it has a missing field or
    /// unexpected type.
    MissingField(bson::document::ValueAccessError),
    /// An error when converting a BSON document to an `Operation` and it has an unsupported
    /// operation type.
    UnknownOperation(String),
    /// An error when converting an applyOps command with invalid documents.
    InvalidOperation,
    /// The configuration file could not be read from disk.
    Io(std::io::Error),
    /// The configuration file did not parse as the expected JSON shape.
    Json(serde_json::Error),
    /// The seed planner could not produce any seed for a collection.
    NoSeeds {
        /// The database the planner was working on.
        database: String,
        /// The collection the planner was working on.
        collection: String,
    },
    /// No `(local, oplog.rs)` shard was produced by any collection's
    /// preparer, so there is no reserved oplog worker to start.
    NoOplogDescriptor,
    /// An `OplogTailer` was constructed with a seed range other than
    /// `(None, None)`.
    InvalidOplogSeed,
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Database(e) => Some(e),
            Error::MissingField(e) => Some(e),
            Error::UnknownOperation(_) => None,
            Error::InvalidOperation => None,
            Error::Io(e) => Some(e),
            Error::Json(e) => Some(e),
            Error::NoSeeds { .. } => None,
            Error::NoOplogDescriptor => None,
            Error::InvalidOplogSeed => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Database(ref err) => err.fmt(f),
            Error::MissingField(ref err) => err.fmt(f),
            Error::UnknownOperation(ref op) => write!(f, "Unknown operation type found: {}", op),
            Error::InvalidOperation => write!(f, "Invalid operation"),
            Error::Io(ref err) => write!(f, "Failed to read configuration: {}", err),
            Error::Json(ref err) => write!(f, "Failed to parse configuration: {}", err),
            Error::NoSeeds {
                ref database,
                ref collection,
            } => write!(
                f,
                "Invalid seed number for {}.{}. Failure.",
                database, collection
            ),
            Error::NoOplogDescriptor => write!(f, "No oplog found..."),
            Error::InvalidOplogSeed => write!(f, "There should be only one OplogCollectionPart!"),
        }
    }
}

impl From<bson::document::ValueAccessError> for Error {
    fn from(original: bson::document::ValueAccessError) -> Error {
        Error::MissingField(original)
    }
}

impl From<mongodb::error::Error> for Error {
    fn from(original: mongodb::error::Error) -> Error {
        Error::Database(original)
    }
}

impl From<std::io::Error> for Error {
    fn from(original: std::io::Error) -> Error {
        Error::Io(original)
    }
}

impl From<serde_json::Error> for Error {
    fn from(original: serde_json::Error) -> Error {
        Error::Json(original)
    }
}
