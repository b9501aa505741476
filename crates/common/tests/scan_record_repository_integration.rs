#![cfg(feature = "integration-tests")]

use chrono::{TimeZone, Utc};
use common::domain::{ScanRecord, ScanRecordRepository, UpsertScanRecordsInput};
use common::postgres::{PostgresClient, PostgresConfig, PostgresScanRecordRepository};
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;

const SCHEMA: &str = include_str!(
    "../../../migrations/postgres/20240101000000_create_scan_results.sql"
);

async fn setup_test_db() -> (
    ContainerAsync<Postgres>,
    PostgresScanRecordRepository,
    PostgresClient,
) {
    let postgres = Postgres::default().start().await.unwrap();
    let host = postgres.get_host().await.unwrap();
    let port = postgres.get_host_port_ipv4(5432).await.unwrap();

    let client = PostgresClient::new(&PostgresConfig {
        host: host.to_string(),
        port,
        database: "postgres".to_string(),
        username: "postgres".to_string(),
        password: "postgres".to_string(),
        max_pool_size: 5,
    })
    .expect("Failed to create client");

    let conn = client.get_connection().await.unwrap();
    conn.batch_execute(SCHEMA).await.expect("Schema setup failed");

    let repo = PostgresScanRecordRepository::new(client.clone(), "scan_results");

    (postgres, repo, client)
}

fn record(ip: &str, port: u16, service: &str, secs: i64, response: &str) -> ScanRecord {
    ScanRecord {
        ip: ip.to_string(),
        port,
        service: service.to_string(),
        timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
        response: response.to_string(),
    }
}

async fn fetch_all(client: &PostgresClient) -> Vec<(String, i32, String, i64, String)> {
    let conn = client.get_connection().await.unwrap();
    conn.query(
        "SELECT ip, port, service, EXTRACT(EPOCH FROM timestamp)::BIGINT, response
         FROM scan_results
         ORDER BY ip, port, service",
        &[],
    )
    .await
    .unwrap()
    .iter()
    .map(|row| (row.get(0), row.get(1), row.get(2), row.get(3), row.get(4)))
    .collect()
}

#[tokio::test]
async fn test_upsert_inserts_all_rows_in_one_call() {
    let (_container, repo, client) = setup_test_db().await;

    let written = repo
        .upsert_batch(UpsertScanRecordsInput {
            records: vec![
                record("10.0.0.1", 80, "http", 1_700_000_000, "HTTP/1.1 200 OK"),
                record("10.0.0.1", 443, "https", 1_700_000_001, "tls"),
                record("10.0.0.2", 22, "ssh", 1_700_000_002, "SSH-2.0-OpenSSH"),
            ],
        })
        .await
        .unwrap();

    assert_eq!(written, 3);

    let rows = fetch_all(&client).await;
    assert_eq!(rows.len(), 3);
    assert_eq!(
        rows[0],
        (
            "10.0.0.1".to_string(),
            80,
            "http".to_string(),
            1_700_000_000,
            "HTTP/1.1 200 OK".to_string()
        )
    );
}

#[tokio::test]
async fn test_upsert_overwrites_timestamp_and_response_on_conflict() {
    let (_container, repo, client) = setup_test_db().await;

    repo.upsert_batch(UpsertScanRecordsInput {
        records: vec![record("10.0.0.1", 80, "http", 1_700_000_000, "old")],
    })
    .await
    .unwrap();

    repo.upsert_batch(UpsertScanRecordsInput {
        records: vec![record("10.0.0.1", 80, "http", 1_700_000_500, "new")],
    })
    .await
    .unwrap();

    let rows = fetch_all(&client).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].3, 1_700_000_500);
    assert_eq!(rows[0].4, "new");
}

#[tokio::test]
async fn test_upsert_is_idempotent() {
    let (_container, repo, client) = setup_test_db().await;

    let input = UpsertScanRecordsInput {
        records: vec![
            record("10.0.0.1", 80, "http", 1_700_000_000, "a"),
            record("10.0.0.2", 80, "http", 1_700_000_000, "b"),
        ],
    };

    repo.upsert_batch(input.clone()).await.unwrap();
    let once = fetch_all(&client).await;

    repo.upsert_batch(input).await.unwrap();
    let twice = fetch_all(&client).await;

    assert_eq!(once, twice);
}

#[tokio::test]
async fn test_duplicate_keys_in_one_batch_keep_newest() {
    let (_container, repo, client) = setup_test_db().await;

    let written = repo
        .upsert_batch(UpsertScanRecordsInput {
            records: vec![
                record("10.0.0.1", 80, "http", 1_700_000_200, "newest"),
                record("10.0.0.1", 80, "http", 1_700_000_100, "stale"),
            ],
        })
        .await
        .unwrap();

    assert_eq!(written, 1);

    let rows = fetch_all(&client).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].4, "newest");
}

#[tokio::test]
async fn test_empty_batch_is_noop() {
    let (_container, repo, client) = setup_test_db().await;

    let written = repo
        .upsert_batch(UpsertScanRecordsInput { records: vec![] })
        .await
        .unwrap();

    assert_eq!(written, 0);
    assert!(fetch_all(&client).await.is_empty());
}
