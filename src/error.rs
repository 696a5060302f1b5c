//! Error types shared by the transports, the codec and the network gate.

use thiserror::Error;

/// Result type used throughout the datasource.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Payload tagged as base64 did not decode.
    #[error("invalid base64 data for {key}: {source}")]
    Base64 {
        key: String,
        #[source]
        source: base64::DecodeError,
    },

    /// Payload tagged as gzip did not decompress.
    #[error("invalid gzip data for {key}: {source}")]
    Gzip {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// Decoded payload is not valid UTF-8 text.
    #[error("decoded data for {key} is not valid utf-8")]
    Utf8 { key: String },

    #[error("failed to parse yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to parse json: {0}")]
    Json(#[from] serde_json::Error),

    /// A subprocess exited unsuccessfully. Both streams are kept since the
    /// control tool reports some outcomes on stdout even when failing.
    #[error("{tool} exited with {code:?}: {stderr}")]
    Exec {
        tool: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A `list` encoded key refers back to one of its ancestors.
    #[error("guest property list for {0} refers to itself")]
    ListCycle(String),

    #[error("guest property list nesting exceeds {limit} at {key}")]
    ListTooDeep { key: String, limit: usize },

    #[error("guest property list {list} names {part}, which has no value")]
    MissingListPart { list: String, part: String },

    #[error("metadata must be a mapping, got {0}")]
    MetadataNotMapping(&'static str),

    #[error("network did not become ready within {0:?}")]
    NetworkWaitTimeout(std::time::Duration),

    #[error("failed to read host network information: {0}")]
    HostInfo(String),

    #[error("no data access method yielded any data")]
    NoTransport,
}
