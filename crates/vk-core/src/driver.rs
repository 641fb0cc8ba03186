//! # Subscription Driver
//!
//! Runs exactly one push query from subscribe to teardown:
//!
//! ```text
//! Idle -> Subscribing -> Streaming -> Completed | TimedOut | Cancelled | Failed
//! ```
//!
//! A worker task drives [`PushClient::push`] and feeds a single ordered
//! channel of [`StreamEvent`]s. The driver multiplexes that channel with the
//! subscription deadline and a [`CancellationToken`], converts every row into
//! a [`Frame`] and hands it to the [`FrameSender`]. Whatever the outcome, the
//! worker is stopped and the client is closed exactly once.

use crate::assembler::{assemble, Header, TypePolicy};
use crate::client::{PushClient, PushQuery, StreamEvent};
use crate::error::{DatasourceError, Result};
use crate::frame::Frame;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_TIMEOUT_SECS: i64 = 60;

/// Longest lifetime a subscription is given; larger timeouts are clamped.
const MAX_LIFETIME: Duration = Duration::from_secs(86400 * 365 * 30);

/// Stream property controlling where a push query starts reading.
pub const OFFSET_RESET_PROPERTY: &str = "ksql.streams.auto.offset.reset";

/// The query model sent by the dashboard when it opens a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    #[serde(rename = "queryText")]
    pub query_text: String,
    /// Lifetime of the subscription, in seconds.
    #[serde(rename = "timeout", default = "default_timeout")]
    pub timeout_secs: i64,
}

fn default_timeout() -> i64 {
    DEFAULT_TIMEOUT_SECS
}

impl SubscribeRequest {
    pub fn new(query_text: impl Into<String>, timeout_secs: i64) -> Self {
        Self {
            query_text: query_text.into(),
            timeout_secs,
        }
    }

    /// The bounded lifetime, rejecting zero and negative values.
    pub fn timeout(&self) -> Result<Duration> {
        if self.timeout_secs <= 0 {
            return Err(DatasourceError::InvalidTimeout(self.timeout_secs));
        }
        Ok(Duration::from_secs(self.timeout_secs as u64))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Idle,
    Subscribing,
    Streaming,
    Completed,
    TimedOut,
    Cancelled,
    Failed,
}

/// How a subscription ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Termination {
    pub state: SubscriptionState,
    /// Records handed to the downstream sender.
    pub records: u64,
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct SendError(pub String);

/// Downstream side of a subscription: receives one frame per row.
#[async_trait::async_trait]
pub trait FrameSender: Send + Sync {
    async fn send_frame(&self, frame: Frame) -> std::result::Result<(), SendError>;
}

#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub type_policy: TypePolicy,
    /// Buffer between the transport worker and the driver.
    pub channel_capacity: usize,
    /// Value for [`OFFSET_RESET_PROPERTY`], if any.
    pub offset_reset: Option<String>,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            type_policy: TypePolicy::Strict,
            channel_capacity: 64,
            offset_reset: Some("latest".into()),
        }
    }
}

enum Wake {
    Cancelled,
    TimedOut,
    Event(Option<StreamEvent>),
}

pub struct SubscriptionDriver {
    id: String,
    options: DriverOptions,
    state: SubscriptionState,
    header: Option<Header>,
    records: u64,
}

impl SubscriptionDriver {
    pub fn new(options: DriverOptions) -> Self {
        Self {
            id: format!("sub-{}", uuid::Uuid::new_v4().as_simple()),
            options,
            state: SubscriptionState::Idle,
            header: None,
            records: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn transition(&mut self, next: SubscriptionState) {
        tracing::debug!("Subscription {}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }

    /// Run `request` on `client` until it completes, times out, is cancelled
    /// or fails. The client is closed before this returns.
    pub async fn run(
        mut self,
        client: Arc<dyn PushClient>,
        request: &SubscribeRequest,
        sender: &dyn FrameSender,
        cancel: CancellationToken,
    ) -> Result<Termination> {
        let timeout = match request.timeout() {
            Ok(t) => t,
            Err(e) => {
                client.close().await;
                return Err(e);
            }
        };

        self.transition(SubscriptionState::Subscribing);
        tracing::info!(
            "Subscription {} starting push query (timeout {}s): {}",
            self.id,
            timeout.as_secs(),
            request.query_text
        );

        let mut query = PushQuery::new(request.query_text.clone());
        if let Some(reset) = &self.options.offset_reset {
            query = query.with_property(OFFSET_RESET_PROPERTY, reset.clone());
        }

        let (tx, rx) = mpsc::channel(self.options.channel_capacity.max(1));
        let worker = {
            let client = client.clone();
            tokio::spawn(async move {
                let last = match client.push(&query, tx.clone()).await {
                    Ok(()) => StreamEvent::Completed,
                    Err(e) => StreamEvent::Failed(e),
                };
                let _ = tx.send(last).await;
            })
        };

        let deadline = Instant::now() + timeout.min(MAX_LIFETIME);
        let result = self.stream(rx, deadline, sender, &cancel).await;

        worker.abort();
        client.close().await;

        match &result {
            Ok(t) => {
                self.transition(t.state);
                tracing::info!(
                    "Subscription {} ended: {:?} after {} records",
                    self.id,
                    t.state,
                    t.records
                );
            }
            Err(e) => {
                self.transition(SubscriptionState::Failed);
                tracing::error!(
                    "Subscription {} failed after {} records: {}",
                    self.id,
                    self.records,
                    e
                );
            }
        }
        result
    }

    async fn stream(
        &mut self,
        mut rx: mpsc::Receiver<StreamEvent>,
        deadline: Instant,
        sender: &dyn FrameSender,
        cancel: &CancellationToken,
    ) -> Result<Termination> {
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        loop {
            let wake = tokio::select! {
                biased;
                _ = cancel.cancelled() => Wake::Cancelled,
                _ = &mut sleep => Wake::TimedOut,
                event = rx.recv() => Wake::Event(event),
            };

            let event = match wake {
                Wake::Cancelled => return Ok(self.terminated(SubscriptionState::Cancelled)),
                Wake::TimedOut => return Ok(self.terminated(SubscriptionState::TimedOut)),
                Wake::Event(None) => {
                    return Err(DatasourceError::Subscription(
                        "push worker stopped without a result".into(),
                    ))
                }
                Wake::Event(Some(event)) => event,
            };

            match event {
                StreamEvent::Header(header) => {
                    if self.header.is_some() {
                        return Err(DatasourceError::DuplicateHeader);
                    }
                    tracing::debug!(
                        "Subscription {} header: {:?}",
                        self.id,
                        header.columns.iter().map(|c| &c.name).collect::<Vec<_>>()
                    );
                    self.header = Some(header);
                    self.transition(SubscriptionState::Streaming);
                }
                StreamEvent::Row(row) => {
                    let header = self.header.as_ref().ok_or(DatasourceError::RowBeforeHeader)?;
                    let frame = assemble(header, &row, self.options.type_policy)?;

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return Ok(self.terminated(SubscriptionState::Cancelled))
                        }
                        _ = &mut sleep => {
                            return Ok(self.terminated(SubscriptionState::TimedOut))
                        }
                        sent = sender.send_frame(frame) => {
                            sent.map_err(|e| DatasourceError::SendFailure(e.0))?;
                        }
                    }
                    self.records += 1;
                    tracing::trace!("Subscription {} sent record {}", self.id, self.records);
                }
                StreamEvent::Completed => {
                    return Ok(self.terminated(SubscriptionState::Completed))
                }
                StreamEvent::Failed(e) => return Err(e),
            }
        }
    }

    fn terminated(&self, state: SubscriptionState) -> Termination {
        Termination {
            state,
            records: self.records,
        }
    }
}
