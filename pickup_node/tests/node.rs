use pickup_core::testutil::{CID_HELLO, CID_TEST_2, MockRetriever, random_bytes, read_all};
use pickup_core::{Pin, PinQuery, Status, StatusStore};
use pickup_node::config::{NodeConfigQueue, NodeConfigStatus, NodeConfigStore, PickupNodeConfig};
use pickup_node::{PickupNode, RunOptions};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const TOKEN: &str = "test-token";

fn memory_config() -> PickupNodeConfig {
    let mut config = PickupNodeConfig::default();
    config
        .store
        .insert("default".to_owned(), NodeConfigStore::Memory(Default::default()));
    config.api.tokens.insert(TOKEN.to_owned(), "alice".to_owned());
    config.worker.receive_wait_ms = 50;
    config.worker.connect_timeout_ms = 50;
    config
}

fn free_local_addr() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().to_string()
}

async fn wait_for_status(node: &PickupNode, request_id: &str, status: Status) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let record = node.status.get("alice", request_id).await.unwrap().unwrap();
        if record.status == status {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "record stuck in {}",
            record.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn create_then_worker_pins_archive() {
    let archive = random_bytes(20_000);
    let retriever = Arc::new(MockRetriever::new().with_archive(CID_HELLO, archive.clone()));
    let node = PickupNode::with_retriever(memory_config(), retriever).unwrap();
    let service = node.pin_service();

    let created = service
        .add("alice", Pin::new(CID_HELLO).with_origins(["not-a-valid-address"]))
        .await
        .unwrap();
    assert_eq!(
        service.get("alice", &created.request_id).await.unwrap().status,
        Status::Queued
    );

    node.worker()
        .process_next(Duration::from_millis(100))
        .await
        .unwrap();

    let done = service.get("alice", &created.request_id).await.unwrap();
    assert_eq!(done.status, Status::Pinned);
    let store = node.buckets.get("default").unwrap();
    assert_eq!(
        read_all(store.as_ref(), &done.destination.key).await.unwrap(),
        archive
    );
}

#[tokio::test]
async fn worker_only_node_drains_queue_until_cancelled() {
    let retriever = Arc::new(
        MockRetriever::new()
            .with_archive(CID_HELLO, "one")
            .with_archive(CID_TEST_2, "two"),
    );
    let node = PickupNode::with_retriever(memory_config(), retriever).unwrap();
    let service = node.pin_service();
    let first = service.add("alice", Pin::new(CID_HELLO)).await.unwrap();
    let second = service.add("alice", Pin::new(CID_TEST_2)).await.unwrap();

    let cancel = CancellationToken::new();
    let run = {
        let node = node.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            node.run(
                RunOptions {
                    api: false,
                    worker: true,
                },
                cancel,
            )
            .await
        })
    };

    wait_for_status(&node, &first.request_id, Status::Pinned).await;
    wait_for_status(&node, &second.request_id, Status::Pinned).await;
    cancel.cancel();
    run.await.unwrap().unwrap();

    let pinned = node
        .status
        .list("alice", &PinQuery::default().with_status(Status::Pinned))
        .await
        .unwrap();
    assert_eq!(pinned.count, 2);
}

#[tokio::test]
async fn http_round_trip_through_running_node() {
    let mut config = memory_config();
    config.api.listen = free_local_addr();
    let base = format!("http://{}", config.api.listen);
    let retriever = Arc::new(MockRetriever::new().with_archive(CID_HELLO, "archive"));
    let node = PickupNode::with_retriever(config, retriever).unwrap();

    let cancel = CancellationToken::new();
    let run = {
        let node = node.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { node.run(RunOptions::default(), cancel).await })
    };

    let client = reqwest::Client::new();
    let mut created = None;
    for _ in 0..50 {
        match client
            .post(format!("{base}/pins"))
            .bearer_auth(TOKEN)
            .json(&json!({"cid": CID_HELLO, "origins": []}))
            .send()
            .await
        {
            Ok(res) => {
                created = Some(res);
                break;
            }
            // Server still starting.
            Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    let created = created.expect("API came up");
    assert_eq!(created.status(), reqwest::StatusCode::ACCEPTED);
    let created: Value = created.json().await.unwrap();
    let request_id = created["requestId"].as_str().unwrap().to_owned();

    wait_for_status(&node, &request_id, Status::Pinned).await;

    let fetched: Value = client
        .get(format!("{base}/pins/{request_id}"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["status"], "pinned");

    let unauthorized = client.get(format!("{base}/pins")).send().await.unwrap();
    assert_eq!(unauthorized.status(), reqwest::StatusCode::UNAUTHORIZED);

    cancel.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn durable_backends_open_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = memory_config();
    config.status = NodeConfigStatus::Redb {
        path: dir.path().join("status"),
    };
    config.queue = NodeConfigQueue::Redb {
        path: dir.path().join("queue"),
        visibility_timeout_secs: 60,
        max_receives: 5,
    };
    config.store.insert(
        "default".to_owned(),
        NodeConfigStore::Local(pickup_store_local::LocalStoreConfig {
            base_path: dir.path().join("archives").to_string_lossy().into_owned(),
        }),
    );

    let retriever = Arc::new(MockRetriever::new().with_archive(CID_HELLO, "durable"));
    let request_id = {
        let node = PickupNode::with_retriever(config.clone(), retriever.clone()).unwrap();
        node.pin_service()
            .add("alice", Pin::new(CID_HELLO))
            .await
            .unwrap()
            .request_id
    };

    // The dispatch written before the "restart" is still there.
    let node = PickupNode::with_retriever(config, retriever).unwrap();
    node.worker()
        .process_next(Duration::from_millis(100))
        .await
        .unwrap();
    wait_for_status(&node, &request_id, Status::Pinned).await;
    assert!(
        dir.path()
            .join("archives")
            .join(format!("pickup/{CID_HELLO}/{CID_HELLO}.root.car"))
            .exists()
    );
}

#[tokio::test]
async fn unreachable_retrieval_node_is_reported_not_fatal() {
    let client = pickup_ipfs::IpfsClient::new(&pickup_ipfs::IpfsConfig {
        api_url: format!("http://{}", free_local_addr()),
        connect_timeout_secs: 1,
        delegates: Vec::new(),
    })
    .unwrap();
    assert!(pickup_node::check_retrieval_node(&client).await.is_none());
}
