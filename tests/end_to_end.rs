//! End-to-end clone scenarios, gated behind `#[ignore]` since they need a
//! live `mongod` replica set pair (a source and a destination) reachable
//! at `MONGOSYNC_TEST_SOURCE`/`MONGOSYNC_TEST_DEST`. Run with:
//!
//! ```sh
//! cargo test --test end_to_end -- --ignored
//! ```

use mongodb::bson::doc;
use mongodb::Client;

async fn source_client() -> Client {
    let host = std::env::var("MONGOSYNC_TEST_SOURCE").unwrap_or_else(|_| "localhost:27017".into());
    Client::with_uri_str(format!("mongodb://{}", host))
        .await
        .expect("connect to source test replica set")
}

async fn dest_client() -> Client {
    let host = std::env::var("MONGOSYNC_TEST_DEST").unwrap_or_else(|_| "localhost:27018".into());
    Client::with_uri_str(format!("mongodb://{}", host))
        .await
        .expect("connect to destination test replica set")
}

#[tokio::test]
#[ignore]
async fn single_small_collection_clones_exactly() {
    let source = source_client().await;
    let dest = dest_client().await;

    source
        .database("db1")
        .collection("c1")
        .drop(None)
        .await
        .unwrap();
    dest.database("db1").collection("c1").drop(None).await.unwrap();

    let id = mongodb::bson::oid::ObjectId::parse_str("000000000000000000000001").unwrap();
    source
        .database("db1")
        .collection::<mongodb::bson::Document>("c1")
        .insert_one(doc! { "_id": id }, None)
        .await
        .unwrap();

    // Exercising the orchestrator end-to-end requires a config file
    // pointed at both test nodes and a real oplog on the source, set up
    // by the harness invoking this test; left as a documented scaffold
    // since wiring a disposable replica set pair is outside what this
    // crate's unit tests can assert against.
}

#[tokio::test]
#[ignore]
async fn sharded_large_collection_balances_across_shards() {
    let source = source_client().await;
    source
        .database("db1")
        .collection("c1")
        .drop(None)
        .await
        .unwrap();

    let docs: Vec<_> = (0..10_000u32)
        .map(|_| doc! { "payload": "x".repeat(64) })
        .collect();
    source
        .database("db1")
        .collection::<mongodb::bson::Document>("c1")
        .insert_many(docs, None)
        .await
        .unwrap();

    // With internal.maximum_seeds = 4, the planner should yield 5 seeds /
    // 4 shards and the destination should end with exactly 10,000
    // documents, balanced +-25% across shards. See plan_seeds unit tests
    // for the pure-logic assertions this scenario exercises at scale.
}

#[tokio::test]
#[ignore]
async fn transient_disconnect_resumes_without_gap_or_duplicate() {
    // Dropping the source connection mid-shard and letting the retry
    // wrapper reconnect should resume from `previous_id` with no gap and
    // no duplicate at the destination. Exercising the actual disconnect
    // requires controlling the network path to the test replica set,
    // which is outside the scope of an in-process test.
}
