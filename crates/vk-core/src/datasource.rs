//! # Datasource
//!
//! One configured ksqlDB datasource instance, exposing the operations the
//! dashboard host calls: health check, stream subscribe/publish negotiation
//! and running a push-query stream.

use crate::client::ClientFactory;
use crate::driver::{DriverOptions, FrameSender, SubscribeRequest, SubscriptionDriver, Termination};
use crate::error::{DatasourceError, Result};
use crate::settings::PluginSettings;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckHealthResult {
    pub status: HealthStatus,
    pub message: String,
}

impl CheckHealthResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Ok,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Error,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscribeStreamStatus {
    Ok,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStreamStatus {
    PermissionDenied,
}

#[derive(Debug, Clone, Default)]
pub struct DatasourceOptions {
    pub driver: DriverOptions,
    /// Also ask the server for its version during health checks.
    pub health_probe: bool,
}

pub struct Datasource {
    settings: PluginSettings,
    factory: Arc<dyn ClientFactory>,
    options: DatasourceOptions,
    shutdown: CancellationToken,
}

impl Datasource {
    pub fn new(
        settings: PluginSettings,
        factory: Arc<dyn ClientFactory>,
        options: DatasourceOptions,
    ) -> Self {
        Self {
            settings,
            factory,
            options,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn settings(&self) -> &PluginSettings {
        &self.settings
    }

    /// Token for one stream; cancelled by the caller or by [`dispose`](Self::dispose).
    pub fn stream_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    pub async fn check_health(&self) -> CheckHealthResult {
        if !self.settings.has_server() {
            return CheckHealthResult::error(DatasourceError::MissingServerAddress.to_string());
        }
        if !self.options.health_probe {
            return CheckHealthResult::ok("Data source is working");
        }

        let client = match self.factory.connect(&self.settings.connection_params()) {
            Ok(c) => c,
            Err(e) => return CheckHealthResult::error(e.to_string()),
        };
        let info = client.server_info().await;
        client.close().await;

        match info {
            Ok(info) => CheckHealthResult::ok(format!(
                "Data source is working (ksqlDB {})",
                info.version
            )),
            Err(e) => CheckHealthResult::error(e.to_string()),
        }
    }

    pub fn subscribe_stream(&self, path: &str) -> SubscribeStreamStatus {
        tracing::debug!("Subscribe to stream '{}'", path);
        SubscribeStreamStatus::Ok
    }

    /// Clients may not publish into a push query.
    pub fn publish_stream(&self, path: &str) -> PublishStreamStatus {
        tracing::debug!("Rejected publish to stream '{}'", path);
        PublishStreamStatus::PermissionDenied
    }

    /// Decode a [`SubscribeRequest`] from `data` and stream its rows into
    /// `sender` until the subscription terminates.
    pub async fn run_stream(
        &self,
        data: &[u8],
        sender: &dyn FrameSender,
        cancel: CancellationToken,
    ) -> Result<Termination> {
        let request: SubscribeRequest =
            serde_json::from_slice(data).map_err(DatasourceError::InvalidRequest)?;
        self.run_request(&request, sender, cancel).await
    }

    pub async fn run_request(
        &self,
        request: &SubscribeRequest,
        sender: &dyn FrameSender,
        cancel: CancellationToken,
    ) -> Result<Termination> {
        request.timeout()?;
        if !self.settings.has_server() {
            return Err(DatasourceError::MissingServerAddress);
        }

        let client = self.factory.connect(&self.settings.connection_params())?;
        let driver = SubscriptionDriver::new(self.options.driver.clone());
        tracing::debug!("Subscription {} using {}", driver.id(), self.settings.ksql_server);
        driver.run(client, request, sender, cancel).await
    }

    /// Cancel every stream started from this instance.
    pub fn dispose(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for Datasource {
    fn drop(&mut self) {
        self.dispose();
    }
}
