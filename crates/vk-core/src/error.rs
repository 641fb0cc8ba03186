//! Error types for the ksqlDB datasource.
//!
//! Configuration and health-check errors are returned synchronously to the
//! caller. Everything that can go wrong while a push query is streaming ends
//! the subscription and is handed back from [`SubscriptionDriver::run`].
//!
//! [`SubscriptionDriver::run`]: crate::driver::SubscriptionDriver::run

use thiserror::Error;

/// Convenience type alias for `Result<T, DatasourceError>`.
pub type Result<T> = std::result::Result<T, DatasourceError>;

#[derive(Debug, Error)]
pub enum DatasourceError {
    /// The datasource JSON settings could not be decoded.
    #[error("could not unmarshal plugin settings json: {0}")]
    SettingsUnmarshal(#[source] serde_json::Error),

    /// The subscribe payload sent by the host could not be decoded.
    #[error("invalid subscribe request: {0}")]
    InvalidRequest(#[source] serde_json::Error),

    /// No ksqlDB server address was configured.
    #[error("ksqlDB server is a mandatory parameter")]
    MissingServerAddress,

    /// Subscribe-time validation: the bounded lifetime must be positive.
    #[error("invalid timeout {0}s: must be greater than zero")]
    InvalidTimeout(i64),

    /// The transport client could not be constructed or reached.
    #[error("can't connect to ksqlDB server: {0}")]
    TransportConnect(String),

    /// The engine reported a failure while the push query was running.
    #[error("push query failed: {0}")]
    Subscription(String),

    /// A record could not be handed to the downstream sender.
    #[error("failed to send frame: {0}")]
    SendFailure(String),

    /// A row value has no columnar mapping.
    #[error("unsupported value type '{kind}' in column '{column}'")]
    UnsupportedValueType { column: String, kind: String },

    /// The engine sent a second header on the same subscription.
    #[error("unexpected second header on subscription")]
    DuplicateHeader,

    /// The engine sent a row before announcing the column layout.
    #[error("row received before header")]
    RowBeforeHeader,

    /// A row did not line up with the header it belongs to.
    #[error("row has {row} values but header declares {header} columns")]
    ColumnCountMismatch { header: usize, row: usize },
}

impl DatasourceError {
    /// Short machine-readable kind, used in stream termination messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SettingsUnmarshal(_) => "settings_unmarshal",
            Self::InvalidRequest(_) => "invalid_request",
            Self::MissingServerAddress => "missing_server_address",
            Self::InvalidTimeout(_) => "invalid_timeout",
            Self::TransportConnect(_) => "transport_connect",
            Self::Subscription(_) => "subscription",
            Self::SendFailure(_) => "send_failure",
            Self::UnsupportedValueType { .. } => "unsupported_value_type",
            Self::DuplicateHeader => "duplicate_header",
            Self::RowBeforeHeader => "row_before_header",
            Self::ColumnCountMismatch { .. } => "column_count_mismatch",
        }
    }
}

impl From<reqwest::Error> for DatasourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_builder() {
            Self::TransportConnect(e.to_string())
        } else {
            Self::Subscription(e.to_string())
        }
    }
}
