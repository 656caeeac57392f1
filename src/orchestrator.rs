//! The Orchestrator: enumerates databases and collections, drives the
//! planner, fills a work queue, and runs a worker pool with one reserved
//! slot for the oplog.
//!
//! Each worker is its own OS thread with its own single-threaded Tokio
//! runtime and its own pair of [`Client`]s; no connection or configuration
//! object is shared across threads. Workers load their own `Config` from
//! the configuration file path so that a worker never outlives or shares
//! state with another.

use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::client::{Client, Role};
use crate::config::Config;
use crate::copier::{run_sync, ShardCopier};
use crate::error::{Error, Result};
use crate::model::ShardDescriptor;
use crate::oplog_tail::OplogTailer;
use crate::preparer::Preparer;

/// One unit of work handed to a worker thread, or the sentinel telling it
/// to stop.
enum WorkItem {
    /// Copy (or tail) this shard.
    Shard(ShardDescriptor),
    /// Stop popping work; enqueued once per worker.
    Done,
}

/// Drive the entire clone: plan every collection, then run the worker
/// pool until every non-oplog worker reports completion.
///
/// `config_path` is reloaded independently by every worker thread rather
/// than shared, so that no worker's state can be mutated or dropped by
/// another.
pub async fn run(config_path: String) -> Result<()> {
    let config = Config::load(&config_path)?;
    let descriptors = plan_all(&config).await?;

    let oplog_position = descriptors.iter().position(ShardDescriptor::is_oplog);
    let oplog_position = oplog_position.ok_or(Error::NoOplogDescriptor)?;
    let mut descriptors = descriptors;
    let oplog_descriptor = descriptors.remove(oplog_position);

    let (work_tx, work_rx) = crossbeam_channel::unbounded::<WorkItem>();
    let (result_tx, result_rx) = crossbeam_channel::unbounded::<()>();

    work_tx
        .send(WorkItem::Shard(oplog_descriptor))
        .expect("work queue receiver outlives every sender");
    for descriptor in descriptors {
        work_tx
            .send(WorkItem::Shard(descriptor))
            .expect("work queue receiver outlives every sender");
    }

    let worker_count = config.worker_count();
    let mut handles = Vec::with_capacity(worker_count);
    for worker_id in 0..worker_count {
        work_tx
            .send(WorkItem::Done)
            .expect("work queue receiver outlives every sender");

        let config_path = config_path.clone();
        let work_rx = work_rx.clone();
        let result_tx = result_tx.clone();
        handles.push(std::thread::spawn(move || {
            worker_loop(worker_id, config_path, work_rx, result_tx)
        }));
    }
    drop(work_tx);
    drop(result_tx);

    tracing::info!(worker_count, "spawned clone worker pool");

    let expected_completions = worker_count - 1; // one worker tails the oplog forever
    let mut completions = 0usize;
    while completions < expected_completions {
        match result_rx.recv_timeout(Duration::from_secs(3600 * 24)) {
            Ok(()) => {
                completions += 1;
                tracing::info!(
                    remaining = expected_completions - completions,
                    "remaining jobs"
                );
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }

    tracing::info!(
        "end synchronisation of every database, the oplog synchronisation will continue until you stop this process"
    );

    for handle in handles {
        let _ = handle.join();
    }

    Ok(())
}

/// Enumerate every database and collection on the source, preparing the
/// destination and planning shards for each.
async fn plan_all(config: &Config) -> Result<Vec<ShardDescriptor>> {
    let mut source = Client::connect(config, Role::Source).await?;
    let mut destination = Client::connect(config, Role::Destination).await?;

    let databases = source.list_databases().await?;
    tracing::info!(databases = %databases.join(", "), "prepare sync of the following databases");

    let mut descriptors = Vec::new();
    for database in &databases {
        let collections = source.list_collections(database).await?;
        for collection in &collections {
            let preparer = Preparer::new(config, database.clone(), collection.clone());
            let shards = preparer.prepare(&mut source, &mut destination).await?;
            descriptors.extend(shards);
        }
    }

    Ok(descriptors)
}

/// One worker: pop shards off the queue until the sentinel (or a 1s
/// dequeue timeout) signals there is nothing left, running each to
/// completion. The worker that pops the oplog descriptor runs forever and
/// never reports completion.
fn worker_loop(
    worker_id: usize,
    config_path: String,
    work_rx: Receiver<WorkItem>,
    result_tx: Sender<()>,
) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build a per-worker Tokio runtime");

    runtime.block_on(async {
        let config = match Config::load(&config_path) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(worker_id, error = %e, "worker failed to load its configuration");
                let _ = result_tx.send(());
                return;
            }
        };

        let mut source = match Client::connect(&config, Role::Source).await {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(worker_id, error = %e, "worker failed to connect to source");
                let _ = result_tx.send(());
                return;
            }
        };
        let mut destination = match Client::connect(&config, Role::Destination).await {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(worker_id, error = %e, "worker failed to connect to destination");
                let _ = result_tx.send(());
                return;
            }
        };

        loop {
            match work_rx.recv_timeout(Duration::from_secs(1)) {
                Ok(WorkItem::Done) => {
                    tracing::info!(worker_id, "job done, stop here this worker");
                    let _ = result_tx.send(());
                    return;
                }
                Ok(WorkItem::Shard(descriptor)) => {
                    if descriptor.is_oplog() {
                        tracing::info!(worker_id, "start long-running job to clone the oplog");
                    } else {
                        tracing::info!(worker_id, shard = %descriptor, "start shard clone");
                    }

                    if let Err(e) =
                        clone_one(&descriptor, &mut source, &mut destination).await
                    {
                        tracing::error!(worker_id, shard = %descriptor, error = %e, "worker fault while cloning shard");
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                    // Queue-dequeue timeout: treat as drained and exit.
                    let _ = result_tx.send(());
                    return;
                }
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    let _ = result_tx.send(());
                    return;
                }
            }
        }
    });
}

async fn clone_one(
    descriptor: &ShardDescriptor,
    source: &mut Client,
    destination: &mut Client,
) -> Result<()> {
    let stats = source
        .collection_stats(&descriptor.database, &descriptor.collection)
        .await?;

    if descriptor.is_oplog() {
        let mut tailer = OplogTailer::new(descriptor.clone())?;
        run_sync(&mut tailer, source, destination, stats).await?;
    } else {
        let mut copier = ShardCopier::new(descriptor.clone());
        run_sync(&mut copier, source, destination, stats).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PrimaryKey;

    #[test]
    fn work_item_distinguishes_oplog_shard() {
        let descriptor = ShardDescriptor {
            database: "local".into(),
            collection: "oplog.rs".into(),
            seed_start: PrimaryKey::None,
            seed_end: PrimaryKey::None,
            total_seeds: 1,
        };
        assert!(matches!(WorkItem::Shard(descriptor), WorkItem::Shard(d) if d.is_oplog()));
    }
}
