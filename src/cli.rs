//! Command-line surface.
//!
//! Argument 1 selects an operation, argument 2 optionally overrides the
//! configuration file path. Only `start` is implemented; `test-write`
//! names a synthetic load-generation utility and is recognised but
//! reported as out of scope rather than silently ignored. Any other value
//! exits 1: "Usage: <operation> where operation belongs to 'start',
//! 'test-write'".

use clap::Parser;

use crate::config::DEFAULT_PATH;

/// Live clone and oplog tail replication between two MongoDB nodes.
#[derive(Parser, Debug)]
#[command(name = "mongosync")]
pub struct Cli {
    /// Operation to run: `start` or `test-write`.
    pub operation: String,
    /// Path to the JSON configuration file.
    #[arg(default_value = DEFAULT_PATH)]
    pub config_path: String,
}

impl Cli {
    /// Parse `operation` into a known [`Operation`], or `None` if it is
    /// not a recognised value.
    pub fn operation(&self) -> Option<Operation> {
        match self.operation.as_str() {
            "start" => Some(Operation::Start),
            "test-write" => Some(Operation::TestWrite),
            _ => None,
        }
    }
}

/// The operation selected on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Clone every database, then tail the oplog until stopped.
    Start,
    /// Synthetic load-generation utility; out of core scope for this build.
    TestWrite,
}
