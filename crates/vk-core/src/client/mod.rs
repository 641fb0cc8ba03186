//! # Transport Client
//!
//! The push-query engine is reached through a [`PushClient`]. A client turns
//! one push query into an ordered sequence of [`StreamEvent`]s; the
//! [`SubscriptionDriver`](crate::driver::SubscriptionDriver) owns it for the
//! lifetime of one subscription and releases it with [`PushClient::close`].
//!
//! Clients are built by a [`ClientFactory`] from [`ConnectionParams`], one per
//! subscription. There is no pooling.

pub mod ksql;

#[cfg(test)]
pub(crate) mod scripted;

use crate::assembler::{Header, Row};
use crate::error::{DatasourceError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Everything a push query can produce, in arrival order.
#[derive(Debug)]
pub enum StreamEvent {
    Header(Header),
    Row(Row),
    /// The engine closed the stream cleanly.
    Completed,
    Failed(DatasourceError),
}

/// A push query as submitted to the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PushQuery {
    pub sql: String,
    /// Streams properties, e.g. `ksql.streams.auto.offset.reset`.
    pub properties: HashMap<String, String>,
}

impl PushQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            properties: HashMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn is_empty(&self) -> bool {
        self.username.is_empty()
    }
}

/// Input of the [`ClientFactory`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionParams {
    pub url: String,
    /// Permit `http://` (h2c) connections.
    pub allow_plaintext: bool,
    pub credentials: Credentials,
}

/// Server metadata reported by the engine's `/info` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub version: String,
    #[serde(default)]
    pub kafka_cluster_id: String,
    #[serde(default)]
    pub ksql_service_id: String,
    #[serde(default)]
    pub server_status: Option<String>,
}

#[async_trait::async_trait]
pub trait PushClient: Send + Sync {
    /// Run `query`, sending headers and rows into `events` as they arrive.
    ///
    /// Returns `Ok(())` when the engine ends the stream, or when `events` has
    /// no receiver left.
    async fn push(&self, query: &PushQuery, events: mpsc::Sender<StreamEvent>) -> Result<()>;

    /// Release the connection. Safe to call more than once.
    async fn close(&self);

    async fn server_info(&self) -> Result<ServerInfo>;
}

pub trait ClientFactory: Send + Sync {
    fn connect(&self, params: &ConnectionParams) -> Result<Arc<dyn PushClient>>;
}
