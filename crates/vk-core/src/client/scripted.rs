//! In-memory [`PushClient`] replaying a fixed script of events.

use super::{ClientFactory, ConnectionParams, PushClient, PushQuery, ServerInfo, StreamEvent};
use crate::error::{DatasourceError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub(crate) enum Step {
    Emit(StreamEvent),
    Sleep(Duration),
    /// Finish `push` with this error.
    Fail(DatasourceError),
    /// Never finish on its own.
    Hang,
}

#[derive(Default)]
pub(crate) struct ScriptedClient {
    script: Mutex<Vec<Step>>,
    pub pushes: AtomicUsize,
    pub closes: AtomicUsize,
    pub queries: Mutex<Vec<PushQuery>>,
}

impl ScriptedClient {
    pub fn new(script: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            ..Default::default()
        })
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn pushes(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PushClient for ScriptedClient {
    async fn push(&self, query: &PushQuery, events: mpsc::Sender<StreamEvent>) -> Result<()> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.clone());
        let steps: Vec<Step> = std::mem::take(&mut *self.script.lock().unwrap());
        for step in steps {
            match step {
                Step::Emit(event) => {
                    if events.send(event).await.is_err() {
                        return Ok(());
                    }
                }
                Step::Sleep(d) => tokio::time::sleep(d).await,
                Step::Fail(e) => return Err(e),
                Step::Hang => std::future::pending::<()>().await,
            }
        }
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    async fn server_info(&self) -> Result<ServerInfo> {
        Ok(ServerInfo {
            version: "0.29.0".into(),
            server_status: Some("RUNNING".into()),
            ..Default::default()
        })
    }
}

/// Hands out one pre-built client and records the parameters it was asked for.
pub(crate) struct ScriptedFactory {
    pub client: Arc<ScriptedClient>,
    pub connects: Mutex<Vec<ConnectionParams>>,
}

impl ScriptedFactory {
    pub fn new(client: Arc<ScriptedClient>) -> Self {
        Self {
            client,
            connects: Mutex::new(Vec::new()),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.lock().unwrap().len()
    }
}

impl ClientFactory for ScriptedFactory {
    fn connect(&self, params: &ConnectionParams) -> Result<Arc<dyn PushClient>> {
        self.connects.lock().unwrap().push(params.clone());
        Ok(self.client.clone())
    }
}
