use thiserror::Error;

/// Reasons a message payload cannot become a scan event
#[derive(Debug, Error)]
pub enum ScanDecodeError {
    #[error("malformed envelope: {0}")]
    Envelope(#[from] serde_json::Error),

    #[error("invalid field: {0}")]
    InvalidField(String),

    #[error("timestamp out of range: {0}")]
    InvalidTimestamp(i64),

    #[error("{0} contains a NUL byte")]
    NulByte(&'static str),

    #[error("unknown data version: {0}")]
    UnknownDataVersion(i64),

    #[error("malformed data for version {version}: {source}")]
    Data {
        version: i64,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid base64 response: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("response is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

pub type Result<T> = std::result::Result<T, ScanDecodeError>;
