//! End-to-end admin scenarios over the in-memory coordination transport.

use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::TimeZone;
use serde_json::{json, Value};
use zkafka::client::Error;
use zkafka::types::{BrokerInfo, ConfigEntry, PartitionAssignment, PartitionInfo, TopicCreation};
use zkafka::zk::{CreateMode, Error as ZkError, MemoryTransport, Transport};
use zkafka::{AdminClient, ClientBuilder};

/// Create the given nodes, mirroring a cluster that already has state.
async fn seed(store: &MemoryTransport, nodes: &[(&str, Option<Value>)]) {
    for (path, value) in nodes {
        let data = value
            .as_ref()
            .map(|value| serde_json::to_vec(value).unwrap())
            .unwrap_or_default();
        store
            .create(path, &data, CreateMode::Persistent)
            .await
            .unwrap();
    }
}

async fn build_client(store: &MemoryTransport, prefix: &str, read_only: bool) -> AdminClient {
    ClientBuilder::new(Vec::new())
        .zk_prefix(prefix)
        .read_only(read_only)
        .zk_transport(Arc::new(store.handle()))
        .build()
        .await
        .unwrap()
}

async fn raw_json(store: &MemoryTransport, path: &str) -> Value {
    let (data, _) = store.get(path).await.unwrap();
    serde_json::from_slice(&data).unwrap()
}

#[tokio::test]
async fn cluster_id_pinning() {
    let store = MemoryTransport::new();
    seed(
        &store,
        &[
            ("/cluster-a", None),
            ("/cluster-a/cluster", None),
            (
                "/cluster-a/cluster/id",
                Some(json!({"version": "1", "id": "test-cluster-id"})),
            ),
        ],
    )
    .await;

    let client = ClientBuilder::new(Vec::new())
        .zk_prefix("cluster-a")
        .expected_cluster_id("test-cluster-id")
        .read_only(true)
        .zk_transport(Arc::new(store.handle()))
        .build()
        .await
        .unwrap();
    assert_eq!(client.get_cluster_id().await.unwrap(), "test-cluster-id");

    let err = ClientBuilder::new(Vec::new())
        .zk_prefix("cluster-a")
        .expected_cluster_id("bad-cluster-id")
        .read_only(true)
        .zk_transport(Arc::new(store.handle()))
        .build()
        .await
        .unwrap_err();
    assert_matches!(
        err,
        Error::ClusterIdMismatch { expected, actual }
            if expected == "bad-cluster-id" && actual == "test-cluster-id"
    );
}

#[tokio::test]
async fn get_brokers_merges_registration_and_config() {
    let store = MemoryTransport::new();
    seed(
        &store,
        &[
            ("/cluster-b", None),
            ("/cluster-b/brokers", None),
            ("/cluster-b/brokers/ids", None),
            (
                "/cluster-b/brokers/ids/1",
                Some(json!({
                    "host": "test1",
                    "port": 1234,
                    "rack": "rack1",
                    "timestamp": "1589603217000",
                })),
            ),
            (
                "/cluster-b/brokers/ids/2",
                Some(json!({
                    "host": "test2",
                    "port": 1234,
                    "rack": "rack2",
                    "timestamp": "1589603217000",
                })),
            ),
            ("/cluster-b/config", None),
            ("/cluster-b/config/brokers", None),
            (
                "/cluster-b/config/brokers/1",
                Some(json!({"version": 1, "config": {"key1": "value1"}})),
            ),
        ],
    )
    .await;

    let client = build_client(&store, "cluster-b", true).await;
    let brokers = client.get_brokers(None).await.unwrap();
    assert_eq!(brokers.len(), 2);
    assert_eq!(
        brokers[0],
        BrokerInfo {
            id: 1,
            host: "test1".to_string(),
            port: 1234,
            rack: Some("rack1".to_string()),
            timestamp: chrono::Utc.timestamp_opt(1589603217, 0).unwrap(),
            config: Some(
                [("key1".to_string(), "value1".to_string())]
                    .into_iter()
                    .collect()
            ),
        },
    );
    assert_eq!(
        brokers[1],
        BrokerInfo {
            id: 2,
            host: "test2".to_string(),
            port: 1234,
            rack: Some("rack2".to_string()),
            timestamp: chrono::Utc.timestamp_opt(1589603217, 0).unwrap(),
            config: None,
        },
    );

    assert_eq!(client.get_broker_ids().await.unwrap(), vec![1, 2]);
}

fn seed_topic1_nodes(prefix: &str) -> Vec<(String, Option<Value>)> {
    vec![
        (format!("/{prefix}"), None),
        (format!("/{prefix}/brokers"), None),
        (format!("/{prefix}/brokers/topics"), None),
        (
            format!("/{prefix}/brokers/topics/topic1"),
            Some(json!({"version": 1, "partitions": {"0": [1, 2], "1": [2, 3]}})),
        ),
        (format!("/{prefix}/brokers/topics/topic1/partitions"), None),
        (format!("/{prefix}/brokers/topics/topic1/partitions/0"), None),
        (
            format!("/{prefix}/brokers/topics/topic1/partitions/0/state"),
            Some(json!({
                "leader": 0,
                "version": 1,
                "isr": [1, 2],
                "controller_epoch": 3,
                "leader_epoch": 5,
            })),
        ),
        (format!("/{prefix}/brokers/topics/topic1/partitions/1"), None),
        (
            format!("/{prefix}/brokers/topics/topic1/partitions/1/state"),
            Some(json!({
                "leader": 0,
                "version": 1,
                "isr": [3, 2],
                "controller_epoch": 4,
                "leader_epoch": 6,
            })),
        ),
        (format!("/{prefix}/config"), None),
        (format!("/{prefix}/config/topics"), None),
        (
            format!("/{prefix}/config/topics/topic1"),
            Some(json!({"version": 0, "config": {"key1": "value1"}})),
        ),
    ]
}

#[tokio::test]
async fn get_topics_merges_assignment_config_and_state() {
    let store = MemoryTransport::new();
    let mut nodes = seed_topic1_nodes("cluster-c");
    nodes.extend([
        (
            "/cluster-c/brokers/topics/topic2".to_string(),
            Some(json!({"version": 1, "partitions": {"0": [2]}})),
        ),
        ("/cluster-c/brokers/topics/topic2/partitions".to_string(), None),
        (
            "/cluster-c/brokers/topics/topic2/partitions/0".to_string(),
            None,
        ),
        (
            "/cluster-c/brokers/topics/topic2/partitions/0/state".to_string(),
            Some(json!({
                "leader": 0,
                "version": 1,
                "isr": [2],
                "controller_epoch": 1,
                "leader_epoch": 2,
            })),
        ),
        (
            "/cluster-c/config/topics/topic2".to_string(),
            Some(json!({"version": 0, "config": {"key2": "value2"}})),
        ),
    ]);
    let borrowed: Vec<(&str, Option<Value>)> = nodes
        .iter()
        .map(|(path, value)| (path.as_str(), value.clone()))
        .collect();
    seed(&store, &borrowed).await;

    let client = build_client(&store, "cluster-c", true).await;
    let topics = client.get_topics(None, true).await.unwrap();
    assert_eq!(topics.len(), 2);

    let expected_topic1_partitions = vec![
        PartitionInfo {
            topic: "topic1".to_string(),
            id: 0,
            leader: 0,
            version: 1,
            replicas: vec![1, 2],
            isr: vec![1, 2],
            controller_epoch: 3,
            leader_epoch: 5,
        },
        PartitionInfo {
            topic: "topic1".to_string(),
            id: 1,
            leader: 0,
            version: 1,
            replicas: vec![2, 3],
            // The ISR order recorded by the controller survives as-is.
            isr: vec![3, 2],
            controller_epoch: 4,
            leader_epoch: 6,
        },
    ];

    assert_eq!(topics[0].name, "topic1");
    assert_eq!(
        topics[0].config.get("key1").map(String::as_str),
        Some("value1")
    );
    assert_eq!(topics[0].partitions, expected_topic1_partitions);
    assert_eq!(topics[0].version, 1);

    assert_eq!(topics[1].name, "topic2");
    assert_eq!(topics[1].partitions.len(), 1);
    assert_eq!(topics[1].partitions[0].replicas, vec![2]);

    let topic1 = client.get_topic("topic1", true).await.unwrap();
    assert_eq!(topic1.partitions, expected_topic1_partitions);

    // Partition IDs come back dense and ascending even without state.
    let bare = client.get_topic("topic1", false).await.unwrap();
    let ids: Vec<i32> = bare.partitions.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![0, 1]);
    assert!(bare.partitions.iter().all(|p| p.isr.is_empty()));

    let err = client.get_topic("non-existent-topic", true).await.unwrap_err();
    assert_matches!(err, Error::Coordination(ZkError::NotFound { .. }));
}

#[tokio::test]
async fn update_topic_config_overwrite_semantics() {
    let store = MemoryTransport::new();
    seed(
        &store,
        &[
            ("/cluster-d", None),
            ("/cluster-d/config", None),
            ("/cluster-d/config/changes", None),
            ("/cluster-d/config/topics", None),
            (
                "/cluster-d/config/topics/topic1",
                Some(json!({
                    "version": 1,
                    "config": {"key1": "value1", "key2": "value2", "key4": "value4"},
                })),
            ),
        ],
    )
    .await;

    let client = build_client(&store, "cluster-d", false).await;

    let changed = client
        .update_topic_config(
            "topic1",
            &[
                ConfigEntry::set("key2", "value2-updated"),
                ConfigEntry::set("key3", "value3"),
                ConfigEntry::delete("key4"),
            ],
            true,
        )
        .await
        .unwrap();
    assert_eq!(changed, vec!["key2", "key3", "key4"]);

    let changed = client
        .update_topic_config(
            "topic1",
            &[
                ConfigEntry::set("key2", "value2-updated2"),
                ConfigEntry::set("key3", "value3-updated"),
                ConfigEntry::set("key5", "new-value"),
            ],
            false,
        )
        .await
        .unwrap();
    assert_eq!(changed, vec!["key5"]);

    assert_eq!(
        raw_json(&store, "/cluster-d/config/topics/topic1").await,
        json!({
            "version": 1,
            "config": {
                "key1": "value1",
                "key2": "value2-updated",
                "key3": "value3",
                "key5": "new-value",
            },
        }),
    );

    // One sequential notice per effective update, in creation order.
    let changes = client.zk().children("/config/changes").await.unwrap();
    assert_eq!(
        changes,
        vec!["config_change_0000000000", "config_change_0000000001"],
    );
    assert_eq!(
        raw_json(
            &store,
            "/cluster-d/config/changes/config_change_0000000001"
        )
        .await,
        json!({"entity_path": "topics/topic1", "version": 2}),
    );

    // A no-op update publishes nothing.
    let changed = client
        .update_topic_config("topic1", &[ConfigEntry::set("key1", "value1")], true)
        .await
        .unwrap();
    assert!(changed.is_empty());
    assert_eq!(
        client.zk().children("/config/changes").await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn update_broker_config_creates_parent_lazily() {
    let store = MemoryTransport::new();
    seed(
        &store,
        &[
            ("/cluster-e", None),
            ("/cluster-e/config", None),
            ("/cluster-e/config/changes", None),
            // /config/brokers is created on first write.
        ],
    )
    .await;

    let client = build_client(&store, "cluster-e", false).await;

    let changed = client
        .update_broker_config(
            1,
            &[
                ConfigEntry::set("key2", "value2-updated"),
                ConfigEntry::set("key3", "value3"),
            ],
            true,
        )
        .await
        .unwrap();
    assert_eq!(changed, vec!["key2", "key3"]);

    let changed = client
        .update_broker_config(
            1,
            &[
                ConfigEntry::set("key2", "value2-updated2"),
                ConfigEntry::delete("key3"),
                ConfigEntry::set("key5", "new-value"),
            ],
            false,
        )
        .await
        .unwrap();
    assert_eq!(changed, vec!["key5"]);

    assert_eq!(
        raw_json(&store, "/cluster-e/config/brokers/1").await,
        json!({
            "version": 1,
            "config": {"key2": "value2-updated", "key3": "value3", "key5": "new-value"},
        }),
    );

    let changes = client.zk().children("/config/changes").await.unwrap();
    assert!(!changes.is_empty());
    let last = changes.last().unwrap();
    assert_eq!(
        raw_json(&store, &format!("/cluster-e/config/changes/{last}")).await,
        json!({"entity_path": "brokers/1", "version": 2}),
    );
}

#[tokio::test]
async fn assign_partitions_round_trip() {
    let store = MemoryTransport::new();
    seed(&store, &[("/cluster-f", None), ("/cluster-f/admin", None)]).await;

    let client = build_client(&store, "cluster-f", false).await;
    assert!(!client.assignment_in_progress().await.unwrap());

    client
        .assign_partitions(
            "test-topic",
            &[
                PartitionAssignment {
                    id: 1,
                    replicas: vec![1, 2, 3],
                },
                PartitionAssignment {
                    id: 2,
                    replicas: vec![3, 4, 5],
                },
            ],
        )
        .await
        .unwrap();

    assert_eq!(
        raw_json(&store, "/cluster-f/admin/reassign_partitions").await,
        json!({
            "version": 1,
            "partitions": [
                {"topic": "test-topic", "partition": 1, "replicas": [1, 2, 3]},
                {"topic": "test-topic", "partition": 2, "replicas": [3, 4, 5]},
            ],
        }),
    );
    assert!(client.assignment_in_progress().await.unwrap());

    // Only one reassignment can run cluster-wide.
    let err = client
        .assign_partitions(
            "other-topic",
            &[PartitionAssignment {
                id: 0,
                replicas: vec![1],
            }],
        )
        .await
        .unwrap_err();
    assert_matches!(err, Error::AlreadyRunning { .. });

    let err = client
        .assign_partitions("empty-replicas", &[PartitionAssignment { id: 0, replicas: vec![] }])
        .await
        .unwrap_err();
    assert_matches!(err, Error::InvalidArgument(_));
}

#[tokio::test]
async fn add_partitions_extends_dense_numbering() {
    let store = MemoryTransport::new();
    seed(
        &store,
        &[
            ("/cluster-g", None),
            ("/cluster-g/brokers", None),
            ("/cluster-g/brokers/topics", None),
            (
                "/cluster-g/brokers/topics/topic1",
                Some(json!({"version": 1, "partitions": {"0": [1, 2], "1": [2, 3]}})),
            ),
            ("/cluster-g/config", None),
            ("/cluster-g/config/topics", None),
            (
                "/cluster-g/config/topics/topic1",
                Some(json!({"version": 1})),
            ),
        ],
    )
    .await;

    let client = build_client(&store, "cluster-g", false).await;

    client
        .add_partitions(
            "topic1",
            &[
                PartitionAssignment {
                    id: 2,
                    replicas: vec![1, 2],
                },
                PartitionAssignment {
                    id: 3,
                    replicas: vec![3, 4],
                },
            ],
        )
        .await
        .unwrap();

    let topic = client.get_topic("topic1", false).await.unwrap();
    assert_eq!(
        topic.partitions,
        vec![
            PartitionInfo {
                topic: "topic1".to_string(),
                id: 0,
                replicas: vec![1, 2],
                ..Default::default()
            },
            PartitionInfo {
                topic: "topic1".to_string(),
                id: 1,
                replicas: vec![2, 3],
                ..Default::default()
            },
            PartitionInfo {
                topic: "topic1".to_string(),
                id: 2,
                replicas: vec![1, 2],
                ..Default::default()
            },
            PartitionInfo {
                topic: "topic1".to_string(),
                id: 3,
                replicas: vec![3, 4],
                ..Default::default()
            },
        ],
    );

    // Re-adding an existing partition fails.
    let err = client
        .add_partitions(
            "topic1",
            &[
                PartitionAssignment {
                    id: 3,
                    replicas: vec![1, 2],
                },
                PartitionAssignment {
                    id: 4,
                    replicas: vec![3, 4],
                },
            ],
        )
        .await
        .unwrap_err();
    assert_matches!(
        err,
        Error::PartitionExists {
            partition: 3,
            ..
        }
    );

    // New IDs must continue the numbering without gaps.
    let err = client
        .add_partitions(
            "topic1",
            &[PartitionAssignment {
                id: 6,
                replicas: vec![1, 2],
            }],
        )
        .await
        .unwrap_err();
    assert_matches!(err, Error::InvalidArgument(_));

    // Replica sets must match the topic's width.
    let err = client
        .add_partitions(
            "topic1",
            &[PartitionAssignment {
                id: 4,
                replicas: vec![1, 2, 3],
            }],
        )
        .await
        .unwrap_err();
    assert_matches!(
        err,
        Error::ReplicaWidthMismatch {
            expected: 2,
            actual: 3,
            ..
        }
    );
}

#[tokio::test]
async fn leader_election_round_trip() {
    let store = MemoryTransport::new();
    seed(&store, &[("/cluster-h", None), ("/cluster-h/admin", None)]).await;

    let client = build_client(&store, "cluster-h", false).await;
    assert!(!client.election_in_progress().await.unwrap());

    client
        .run_leader_election("test-topic", &[3, 5, 6])
        .await
        .unwrap();

    assert_eq!(
        raw_json(&store, "/cluster-h/admin/preferred_replica_election").await,
        json!({
            "version": 1,
            "partitions": [
                {"topic": "test-topic", "partition": 3},
                {"topic": "test-topic", "partition": 5},
                {"topic": "test-topic", "partition": 6},
            ],
        }),
    );
    assert!(client.election_in_progress().await.unwrap());

    let err = client
        .run_leader_election("test-topic", &[1])
        .await
        .unwrap_err();
    assert_matches!(err, Error::AlreadyRunning { .. });
}

#[tokio::test]
async fn read_only_client_rejects_all_mutations() {
    let store = MemoryTransport::new();
    seed(&store, &[("/cluster-i", None)]).await;

    let client = build_client(&store, "cluster-i", true).await;

    assert_matches!(
        client
            .update_topic_config("t", &[ConfigEntry::set("k", "v")], true)
            .await,
        Err(Error::ReadOnly)
    );
    assert_matches!(
        client
            .update_broker_config(1, &[ConfigEntry::set("k", "v")], true)
            .await,
        Err(Error::ReadOnly)
    );
    assert_matches!(
        client.create_topic(&TopicCreation::new("t", 1, 1)).await,
        Err(Error::ReadOnly)
    );
    assert_matches!(
        client
            .assign_partitions(
                "t",
                &[PartitionAssignment {
                    id: 0,
                    replicas: vec![1],
                }],
            )
            .await,
        Err(Error::ReadOnly)
    );
    assert_matches!(
        client
            .add_partitions(
                "t",
                &[PartitionAssignment {
                    id: 0,
                    replicas: vec![1],
                }],
            )
            .await,
        Err(Error::ReadOnly)
    );
    assert_matches!(
        client.run_leader_election("t", &[0]).await,
        Err(Error::ReadOnly)
    );

    // Reads are unaffected.
    assert!(!client.assignment_in_progress().await.unwrap());
}

#[tokio::test]
async fn locking_round_trip() {
    let store = MemoryTransport::new();
    let client = build_client(&store, "", false).await;

    let lock_path = "/locks/admin-test";
    assert!(!client.lock_held(lock_path).await.unwrap());

    let lock = client.acquire_lock(lock_path).await.unwrap();
    assert!(client.lock_held(lock_path).await.unwrap());

    lock.unlock().await.unwrap();
    assert!(!client.lock_held(lock_path).await.unwrap());
}
