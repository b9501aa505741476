use crate::domain::ScanEvent;
use common::domain::ScanRecord;

/// Convert a decoded scan event into its storage record
impl From<ScanEvent> for ScanRecord {
    fn from(event: ScanEvent) -> Self {
        ScanRecord {
            ip: event.ip,
            port: event.port,
            service: event.service,
            timestamp: event.observed_at,
            response: event.response,
        }
    }
}
