use crate::domain::{
    coalesce_by_key, DomainError, DomainResult, ScanRecord, ScanRecordRepository,
    UpsertScanRecordsInput,
};
use crate::postgres::PostgresClient;
use anyhow::Context;
use async_trait::async_trait;
use tokio_postgres::types::ToSql;
use tracing::{debug, error};

/// Bind parameters per row: ip, port, service, timestamp, response
const COLUMNS_PER_ROW: usize = 5;

/// Largest batch a single upsert statement can carry (PostgreSQL binds at most 65535 parameters)
pub const MAX_UPSERT_ROWS: usize = u16::MAX as usize / COLUMNS_PER_ROW;

/// Build the multi-row upsert statement for `row_count` rows
pub fn build_upsert_statement(table: &str, row_count: usize) -> String {
    let values = (0..row_count)
        .map(|row| {
            let base = row * COLUMNS_PER_ROW;
            format!(
                "(${}, ${}, ${}, ${}, ${})",
                base + 1,
                base + 2,
                base + 3,
                base + 4,
                base + 5
            )
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {table} (ip, port, service, timestamp, response)
         VALUES {values}
         ON CONFLICT (ip, port, service) DO UPDATE
         SET timestamp = excluded.timestamp,
             response = excluded.response"
    )
}

/// PostgreSQL implementation of ScanRecordRepository
#[derive(Clone)]
pub struct PostgresScanRecordRepository {
    client: PostgresClient,
    table: String,
}

impl PostgresScanRecordRepository {
    pub fn new(client: PostgresClient, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }
}

#[async_trait]
impl ScanRecordRepository for PostgresScanRecordRepository {
    async fn upsert_batch(&self, input: UpsertScanRecordsInput) -> DomainResult<u64> {
        if input.records.is_empty() {
            debug!("no scan records to upsert, skipping");
            return Ok(0);
        }

        if input.records.len() > MAX_UPSERT_ROWS {
            return Err(DomainError::BatchTooLarge(
                input.records.len(),
                MAX_UPSERT_ROWS,
            ));
        }

        // ON CONFLICT cannot touch the same row twice in one statement
        let rows: Vec<&ScanRecord> = coalesce_by_key(&input.records);
        let ports: Vec<i32> = rows.iter().map(|r| i32::from(r.port)).collect();

        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(rows.len() * COLUMNS_PER_ROW);
        for (record, port) in rows.iter().zip(&ports) {
            params.push(&record.ip);
            params.push(port);
            params.push(&record.service);
            params.push(&record.timestamp);
            params.push(&record.response);
        }

        debug!(
            record_count = input.records.len(),
            row_count = rows.len(),
            table = %self.table,
            "upserting scan record batch"
        );

        let statement = build_upsert_statement(&self.table, rows.len());

        let mut conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let transaction = conn
            .transaction()
            .await
            .context("failed to begin transaction")?;

        let prepared = transaction
            .prepare_cached(&statement)
            .await
            .context("failed to prepare upsert statement")?;

        let written = transaction.execute(&prepared, &params).await.map_err(|e| {
            error!(error = %e, table = %self.table, "failed to upsert scan record batch");
            DomainError::RepositoryError(e.into())
        })?;

        transaction
            .commit()
            .await
            .context("failed to commit upsert transaction")?;

        debug!(rows_written = written, "scan record batch committed");

        Ok(written)
    }
}
