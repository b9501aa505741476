use crate::batching::BatchHandler;
use crate::domain::decode_scan_event;
use async_trait::async_trait;
use common::domain::{ScanRecord, ScanRecordRepository, UpsertScanRecordsInput};
use common::nats::InboundMessage;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, error, info, warn, Span};

/// How the messages of one batch were resolved
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Written and acked
    pub acked: usize,
    /// Undecodable and nacked
    pub rejected: usize,
    /// Decoded but nacked because the write failed
    pub failed: usize,
}

/// Decodes a batch of scan messages and writes it in one atomic upsert
pub struct ScanBatchSink {
    repository: Arc<dyn ScanRecordRepository>,
    span: Span,
}

impl ScanBatchSink {
    pub fn new(repository: Arc<dyn ScanRecordRepository>, span: Span) -> Self {
        Self { repository, span }
    }

    /// Process one batch.
    ///
    /// Messages that fail to decode are nacked on the spot. The rest are acked
    /// only after the upsert commits, or all nacked when it fails.
    pub async fn process(&self, batch: Vec<InboundMessage>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let mut pending = Vec::with_capacity(batch.len());
        let mut records: Vec<ScanRecord> = Vec::with_capacity(batch.len());

        for message in batch {
            match decode_scan_event(message.payload()) {
                Ok(event) => {
                    records.push(ScanRecord::from(event));
                    pending.push(message);
                }
                Err(e) => {
                    warn!(
                        parent: &self.span,
                        delivery_id = %message.delivery_id(),
                        error = %e,
                        "rejecting undecodable scan message"
                    );
                    outcome.rejected += 1;
                    let delivery_id = message.delivery_id().to_string();
                    if let Err(e) = message.nak().await {
                        error!(parent: &self.span, delivery_id = %delivery_id, error = %e, "failed to nak message");
                    }
                }
            }
        }

        if records.is_empty() {
            debug!(parent: &self.span, rejected = outcome.rejected, "no decodable messages in batch");
            return outcome;
        }

        let input = UpsertScanRecordsInput { records };
        match self.repository.upsert_batch(input).await {
            Ok(rows) => {
                outcome.acked = pending.len();
                resolve_all(pending, true, &self.span).await;
                info!(
                    parent: &self.span,
                    acked = outcome.acked,
                    rejected = outcome.rejected,
                    rows,
                    "batch committed"
                );
            }
            Err(e) => {
                outcome.failed = pending.len();
                error!(
                    parent: &self.span,
                    failed = outcome.failed,
                    error = %e,
                    "batch write failed, nacking messages"
                );
                resolve_all(pending, false, &self.span).await;
            }
        }

        outcome
    }
}

async fn resolve_all(messages: Vec<InboundMessage>, ack: bool, span: &Span) {
    let results = join_all(messages.into_iter().map(|message| async move {
        let delivery_id = message.delivery_id().to_string();
        let result = if ack { message.ack().await } else { message.nak().await };
        (delivery_id, result)
    }))
    .await;

    for (delivery_id, result) in results {
        if let Err(e) = result {
            error!(parent: span, delivery_id = %delivery_id, ack, error = %e, "failed to resolve message");
        }
    }
}

#[async_trait]
impl BatchHandler<InboundMessage> for ScanBatchSink {
    async fn handle(&self, _batch_id: u64, batch: Vec<InboundMessage>) {
        self.process(batch).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Utc;
    use common::domain::{DomainError, MockScanRecordRepository};
    use common::nats::MockMessageAcker;

    fn scan_payload(ip: &str, port: u16, response: &str) -> Bytes {
        Bytes::from(format!(
            r#"{{"ip":"{ip}","port":{port},"service":"http","timestamp":1700000000,"data_version":2,"data":{{"response_str":"{response}"}}}}"#
        ))
    }

    fn expecting(id: &str, payload: Bytes, acks: usize, naks: usize) -> InboundMessage {
        let mut acker = MockMessageAcker::new();
        acker.expect_ack().times(acks).returning(|| Ok(()));
        acker.expect_nak().times(naks).returning(|| Ok(()));
        InboundMessage::new(id, Utc::now(), payload, Box::new(acker))
    }

    fn sink(repository: MockScanRecordRepository) -> ScanBatchSink {
        ScanBatchSink::new(Arc::new(repository), Span::none())
    }

    #[tokio::test]
    async fn test_valid_batch_is_written_once_and_acked() {
        let mut repository = MockScanRecordRepository::new();
        repository
            .expect_upsert_batch()
            .withf(|input| {
                input.records.len() == 3
                    && input.records[0].ip == "1.1.1.1"
                    && input.records[2].port == 443
            })
            .times(1)
            .returning(|_| Ok(3));

        let batch = vec![
            expecting("a", scan_payload("1.1.1.1", 80, "one"), 1, 0),
            expecting("b", scan_payload("2.2.2.2", 22, "two"), 1, 0),
            expecting("c", scan_payload("3.3.3.3", 443, "three"), 1, 0),
        ];

        let outcome = sink(repository).process(batch).await;

        assert_eq!(
            outcome,
            BatchOutcome {
                acked: 3,
                rejected: 0,
                failed: 0
            }
        );
    }

    #[tokio::test]
    async fn test_malformed_message_is_nacked_and_rest_committed() {
        let mut repository = MockScanRecordRepository::new();
        repository
            .expect_upsert_batch()
            .withf(|input| input.records.len() == 2)
            .times(1)
            .returning(|_| Ok(2));

        let batch = vec![
            expecting("a", scan_payload("1.1.1.1", 80, "one"), 1, 0),
            expecting("b", Bytes::from_static(b"not json"), 0, 1),
            expecting("c", scan_payload("3.3.3.3", 443, "three"), 1, 0),
        ];

        let outcome = sink(repository).process(batch).await;

        assert_eq!(outcome.acked, 2);
        assert_eq!(outcome.rejected, 1);
        assert_eq!(outcome.failed, 0);
    }

    #[tokio::test]
    async fn test_unstorable_message_is_nacked_and_rest_committed() {
        let mut repository = MockScanRecordRepository::new();
        repository
            .expect_upsert_batch()
            .withf(|input| {
                input.records.len() == 2
                    && input.records.iter().all(|r| !r.response.contains('\0'))
            })
            .times(1)
            .returning(|_| Ok(2));

        let ancient = Bytes::from_static(
            br#"{"ip":"4.4.4.4","port":80,"service":"http","timestamp":-875000000000,"data_version":2,"data":{"response_str":"x"}}"#,
        );
        let batch = vec![
            expecting("a", scan_payload("1.1.1.1", 80, "one"), 1, 0),
            expecting("b", scan_payload("2.2.2.2", 80, "nul\\u0000byte"), 0, 1),
            expecting("c", ancient, 0, 1),
            expecting("d", scan_payload("3.3.3.3", 443, "three"), 1, 0),
        ];

        let outcome = sink(repository).process(batch).await;

        assert_eq!(
            outcome,
            BatchOutcome {
                acked: 2,
                rejected: 2,
                failed: 0
            }
        );
    }

    #[tokio::test]
    async fn test_all_malformed_skips_write() {
        let mut repository = MockScanRecordRepository::new();
        repository.expect_upsert_batch().never();

        let batch = vec![
            expecting("a", Bytes::from_static(b"{}"), 0, 1),
            expecting("b", Bytes::from_static(b"\xff"), 0, 1),
        ];

        let outcome = sink(repository).process(batch).await;

        assert_eq!(outcome.rejected, 2);
        assert_eq!(outcome.acked, 0);
    }

    #[tokio::test]
    async fn test_write_failure_nacks_every_decoded_message() {
        let mut repository = MockScanRecordRepository::new();
        repository
            .expect_upsert_batch()
            .times(1)
            .returning(|_| Err(DomainError::RepositoryError(anyhow::anyhow!("connection reset"))));

        let batch = vec![
            expecting("a", scan_payload("1.1.1.1", 80, "one"), 0, 1),
            expecting("b", scan_payload("2.2.2.2", 22, "two"), 0, 1),
            expecting("c", Bytes::from_static(b"[]"), 0, 1),
        ];

        let outcome = sink(repository).process(batch).await;

        assert_eq!(
            outcome,
            BatchOutcome {
                acked: 0,
                rejected: 1,
                failed: 2
            }
        );
    }

    #[tokio::test]
    async fn test_ack_failure_does_not_change_outcome() {
        let mut repository = MockScanRecordRepository::new();
        repository.expect_upsert_batch().returning(|_| Ok(1));

        let mut acker = MockMessageAcker::new();
        acker
            .expect_ack()
            .times(1)
            .returning(|| Err(anyhow::anyhow!("ack timed out")));
        let message = InboundMessage::new(
            "a",
            Utc::now(),
            scan_payload("1.1.1.1", 80, "one"),
            Box::new(acker),
        );

        let outcome = sink(repository).process(vec![message]).await;

        assert_eq!(outcome.acked, 1);
    }
}
