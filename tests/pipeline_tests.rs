//! End-to-end tests of the write pipeline against the in-memory store
//!
//! Covers:
//! - First-sight schema creation and row binding
//! - Schema drift rejection
//! - Per-metric failure isolation
//! - Idempotent, serialized schema creation
//! - Shutdown drain and registry bootstrap through the `Writer`

use labelhouse::dispatcher::{Batch, CycleReport, Dispatcher, DispatcherConfig};
use labelhouse::sample::Sample;
use labelhouse::schema::{SchemaConfig, SchemaRegistry};
use labelhouse::store::{MemoryStore, Store, Value};
use labelhouse::writer::Writer;
use labelhouse::{Config, Error};

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn t1() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 15, 12, 30, 0).unwrap()
}

fn sample(metric: &str, labels: &[&str], value: f64) -> Sample {
    Sample::new(metric, labels.iter().copied(), value, t1())
}

fn dispatcher(store: &MemoryStore) -> Dispatcher {
    Dispatcher::new(
        DispatcherConfig::default(),
        &SchemaConfig::default(),
        Arc::new(store.clone()),
        Arc::new(SchemaRegistry::new()),
    )
}

#[tokio::test]
async fn test_first_sample_creates_schema_and_row() {
    let store = MemoryStore::new();
    let d = dispatcher(&store);
    assert!(!d.registry().exists("cpu_usage"));

    let report = d
        .flush(Batch::from_iter([sample(
            "cpu_usage",
            &["host=a", "region=us", "__name__=cpu_usage"],
            0.42,
        )]))
        .await;

    assert_eq!(report, CycleReport { groups: 1, accepted: 1, failed: 0 });
    assert!(d.registry().exists("cpu_usage"));
    assert!(store.has_table("metrics", "cpu_usage"));
    assert!(store.has_table("metrics", "cpu_usage_view"));

    let rows = store.rows("metrics", "cpu_usage_view");
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].columns,
        vec!["date", "col_host", "col_region", "val", "ts"]
    );
    assert_eq!(
        rows[0].values,
        vec![
            Value::Date(t1().date_naive()),
            Value::Text("a".to_string()),
            Value::Text("us".to_string()),
            Value::Float(0.42),
            Value::DateTime(t1()),
        ]
    );
    // Inserts go through the routing view only.
    assert!(store.rows("metrics", "cpu_usage").is_empty());

    let stats = d.stats().snapshot();
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.schemas_created, 1);
}

#[tokio::test]
async fn test_schema_drift_is_rejected() {
    let store = MemoryStore::new();
    let d = dispatcher(&store);

    d.flush(Batch::from_iter([sample("http_requests", &["code=200"], 1.0)]))
        .await;
    let report = d
        .flush(Batch::from_iter([
            sample("http_requests", &["code=500", "path=/"], 2.0),
            sample("http_requests", &["code=404"], 3.0),
        ]))
        .await;

    assert_eq!(report.accepted, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(
        d.registry().schema("http_requests").unwrap().label_keys(),
        vec!["code"]
    );

    let rows = store.rows("metrics", "http_requests_view");
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.get("col_path").is_none()));
}

#[tokio::test]
async fn test_commit_failure_is_isolated_to_its_group() {
    let store = MemoryStore::new();
    store.fail_commit_for("a_view");
    let d = dispatcher(&store);

    let report = d
        .flush(Batch::from_iter([
            sample("a", &["host=x"], 1.0),
            sample("b", &["host=x"], 2.0),
            sample("a", &["host=y"], 3.0),
        ]))
        .await;

    assert_eq!(report, CycleReport { groups: 2, accepted: 1, failed: 2 });
    assert!(store.rows("metrics", "a_view").is_empty());
    assert_eq!(store.rows("metrics", "b_view").len(), 1);

    let stats = d.stats().snapshot();
    assert_eq!(stats.groups_committed, 1);
    assert_eq!(stats.groups_failed, 1);
}

#[tokio::test]
async fn test_schema_creation_happens_once() {
    let store = MemoryStore::new();
    let d = dispatcher(&store);

    for i in 0..3 {
        d.flush(Batch::from_iter([sample("up", &["job=node"], i as f64)]))
            .await;
    }

    assert_eq!(store.ddl_commits("up"), 1);
    assert_eq!(store.ddl_commits("up_view"), 1);
    assert_eq!(store.rows("metrics", "up_view").len(), 3);
    assert_eq!(d.stats().snapshot().schemas_created, 1);
}

#[tokio::test]
async fn test_concurrent_dispatchers_share_one_creation() {
    let store = MemoryStore::new();
    let registry = Arc::new(SchemaRegistry::new());
    let dispatchers: Vec<Arc<Dispatcher>> = (0..4)
        .map(|_| {
            Arc::new(Dispatcher::new(
                DispatcherConfig::default(),
                &SchemaConfig::default(),
                Arc::new(store.clone()),
                registry.clone(),
            ))
        })
        .collect();

    let tasks: Vec<_> = dispatchers
        .into_iter()
        .enumerate()
        .map(|(i, d)| {
            tokio::spawn(async move {
                d.flush(Batch::from_iter([sample("load", &["cpu=0"], i as f64)]))
                    .await
            })
        })
        .collect();

    let mut accepted = 0;
    for task in tasks {
        accepted += task.await.unwrap().accepted;
    }

    assert_eq!(accepted, 4);
    assert_eq!(store.ddl_commits("load"), 1);
    assert_eq!(store.ddl_commits("load_view"), 1);
}

#[tokio::test]
async fn test_reserved_label_and_order_do_not_change_columns() {
    let store = MemoryStore::new();
    let d = dispatcher(&store);

    let report = d
        .flush(Batch::from_iter([
            sample("mem", &["zone=b", "__NAME__=mem", "app=x"], 1.0),
            sample("mem", &["app=y", "zone=c"], 2.0),
        ]))
        .await;

    assert_eq!(report.accepted, 2);
    assert_eq!(
        d.registry().schema("mem").unwrap().column_names(),
        vec!["col_app", "col_zone"]
    );
    let rows = store.rows("metrics", "mem_view");
    assert_eq!(rows[1].get("col_app"), Some(&Value::Text("y".to_string())));
    assert_eq!(rows[1].get("col_zone"), Some(&Value::Text("c".to_string())));
}

#[tokio::test]
async fn test_failed_schema_creation_is_retried_next_cycle() {
    let store = MemoryStore::new();
    store.fail_ddl_for("disk_view");
    let d = dispatcher(&store);

    let report = d
        .flush(Batch::from_iter([
            sample("disk", &["dev=sda"], 1.0),
            sample("disk", &["dev=sdb"], 2.0),
        ]))
        .await;
    assert_eq!(report.failed, 2);
    assert!(!d.registry().exists("disk"));
    // The table committed before the view failed.
    assert!(store.has_table("metrics", "disk"));

    store.clear_faults();
    let report = d
        .flush(Batch::from_iter([sample("disk", &["dev=sda"], 3.0)]))
        .await;
    assert_eq!(report.accepted, 1);
    assert!(d.registry().exists("disk"));
    assert_eq!(store.ddl_commits("disk_view"), 1);
    assert_eq!(store.rows("metrics", "disk_view").len(), 1);
}

#[tokio::test]
async fn test_writer_drains_queue_on_close() {
    let store = MemoryStore::new();
    let config = Config {
        dispatcher: DispatcherConfig {
            batch_size: 7,
            batch_timeout: Duration::from_millis(20),
            group_parallelism: 2,
        },
        ..Default::default()
    };
    let writer = Writer::connect(config, Arc::new(store.clone())).await.unwrap();

    let (tx, rx) = mpsc::channel(16);
    let handle = writer.start(rx);
    for i in 0..50 {
        let metric = if i % 2 == 0 { "even" } else { "odd" };
        tx.send(sample(metric, &["host=a"], i as f64)).await.unwrap();
    }
    drop(tx);

    let stats = handle.wait().await.unwrap();
    assert_eq!(stats.accepted, 50);
    assert_eq!(stats.failed, 0);
    assert!(stats.cycles >= 8);
    assert_eq!(store.rows("metrics", "even_view").len(), 25);
    assert_eq!(store.rows("metrics", "odd_view").len(), 25);
}

#[tokio::test]
async fn test_writer_bootstraps_existing_tables() {
    let columns = ["date", "col_host", "val", "ts", "updated"];
    let store = MemoryStore::new()
        .with_table("metrics", "cpu", &columns)
        .with_table("metrics", "cpu_view", &columns)
        .with_table("metrics", "orphan", &columns);

    let writer = Writer::connect(Config::default(), Arc::new(store.clone()))
        .await
        .unwrap();
    let registry = writer.registry().clone();
    assert!(registry.exists("cpu"));
    assert!(!registry.exists("orphan"));
    assert_eq!(registry.schema("cpu").unwrap().label_keys(), vec!["host"]);

    let (tx, rx) = mpsc::channel(4);
    let handle = writer.start(rx);
    tx.send(sample("cpu", &["host=a"], 1.0)).await.unwrap();
    tx.send(sample("cpu", &["host=a", "extra=1"], 2.0))
        .await
        .unwrap();
    drop(tx);

    let stats = handle.wait().await.unwrap();
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.schemas_created, 0);
    assert_eq!(store.ddl_commits("cpu"), 0);
}

#[tokio::test]
async fn test_connect_fails_when_store_unreachable() {
    let store = MemoryStore::new();
    store.set_unreachable(true);

    let result = Writer::connect(Config::default(), Arc::new(store)).await;
    assert!(matches!(result, Err(Error::Connection(_))));
}

#[tokio::test]
async fn test_unreachable_store_mid_run_fails_groups() {
    let store = MemoryStore::new();
    let d = dispatcher(&store);
    d.flush(Batch::from_iter([sample("net", &[], 1.0)])).await;

    store.set_unreachable(true);
    let report = d
        .flush(Batch::from_iter([sample("net", &[], 2.0), sample("net", &[], 3.0)]))
        .await;
    assert_eq!(report.failed, 2);

    store.set_unreachable(false);
    let report = d.flush(Batch::from_iter([sample("net", &[], 4.0)])).await;
    assert_eq!(report.accepted, 1);
    assert_eq!(store.rows("metrics", "net_view").len(), 2);
    assert!(store.list_tables("metrics").await.unwrap().contains(&"net".to_string()));
}

#[tokio::test]
async fn test_legacy_column_order_is_writable() {
    // Older tables sorted columns by `key=value`, so `a0` precedes `a`.
    let columns = ["date", "ch_a0", "ch_a", "val", "ts", "updated"];
    let store = MemoryStore::new()
        .with_table("metrics", "m", &columns)
        .with_table("metrics", "m_view", &columns);
    let mut config = Config::default();
    config.schema.column_prefix = "ch_".to_string();

    let writer = Writer::connect(config, Arc::new(store.clone())).await.unwrap();
    assert_eq!(
        writer.registry().schema("m").unwrap().column_names(),
        vec!["ch_a0", "ch_a"]
    );

    let (tx, rx) = mpsc::channel(4);
    let handle = writer.start(rx);
    tx.send(sample("m", &["a=1", "a0=2"], 1.0)).await.unwrap();
    drop(tx);

    let stats = handle.wait().await.unwrap();
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.failed, 0);

    let rows = store.rows("metrics", "m_view");
    assert_eq!(rows[0].get("ch_a"), Some(&Value::Text("1".to_string())));
    assert_eq!(rows[0].get("ch_a0"), Some(&Value::Text("2".to_string())));
}

#[tokio::test]
async fn test_retry_with_other_labels_follows_existing_table() {
    let store = MemoryStore::new();
    store.fail_ddl_for("m_view");
    let d = dispatcher(&store);

    let report = d
        .flush(Batch::from_iter([sample("m", &["host=a"], 1.0)]))
        .await;
    assert_eq!(report.failed, 1);

    store.clear_faults();
    let report = d
        .flush(Batch::from_iter([
            sample("m", &["zone=z"], 2.0),
            sample("m", &["host=b"], 3.0),
        ]))
        .await;

    // The table kept `host`; the `zone` sample is drift.
    assert_eq!(report, CycleReport { groups: 1, accepted: 1, failed: 1 });
    assert_eq!(
        store.describe_table("metrics", "m_view").await.unwrap(),
        store.describe_table("metrics", "m").await.unwrap()
    );
    let rows = store.rows("metrics", "m_view");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("col_host"), Some(&Value::Text("b".to_string())));
}
