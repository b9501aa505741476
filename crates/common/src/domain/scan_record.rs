use crate::domain::result::DomainResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Storage-bound scan result for one (ip, port, service) target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    pub ip: String,
    pub port: u16,
    pub service: String,
    pub timestamp: DateTime<Utc>,
    pub response: String,
}

impl ScanRecord {
    /// Identity key used for upserts
    pub fn key(&self) -> ScanRecordKey<'_> {
        ScanRecordKey {
            ip: &self.ip,
            port: self.port,
            service: &self.service,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScanRecordKey<'a> {
    pub ip: &'a str,
    pub port: u16,
    pub service: &'a str,
}

/// Input for upserting scan records (batch operation)
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertScanRecordsInput {
    /// Records in arrival order
    pub records: Vec<ScanRecord>,
}

/// Collapse records that share an identity key into a single record.
///
/// The record with the newest timestamp wins; on equal timestamps the later
/// arrival wins. Output keeps the position of each key's first arrival.
pub fn coalesce_by_key(records: &[ScanRecord]) -> Vec<&ScanRecord> {
    let mut positions: HashMap<ScanRecordKey<'_>, usize> = HashMap::with_capacity(records.len());
    let mut coalesced: Vec<&ScanRecord> = Vec::with_capacity(records.len());

    for record in records {
        match positions.get(&record.key()) {
            Some(&pos) => {
                if record.timestamp >= coalesced[pos].timestamp {
                    coalesced[pos] = record;
                }
            }
            None => {
                positions.insert(record.key(), coalesced.len());
                coalesced.push(record);
            }
        }
    }

    coalesced
}

/// Repository trait for scan record storage operations
/// Infrastructure layer (e.g., postgres) implements this trait
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ScanRecordRepository: Send + Sync {
    /// Upsert a batch of scan records with a single statement keyed by
    /// (ip, port, service), overwriting timestamp and response on conflict.
    /// Failure handling: entire batch fails atomically (all-or-nothing).
    /// Returns the number of rows written.
    async fn upsert_batch(&self, input: UpsertScanRecordsInput) -> DomainResult<u64>;
}
