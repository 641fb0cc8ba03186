//! # Live query stream over WebSocket
//!
//! The client opens `/ws/stream` and sends one text message holding the
//! subscribe request (`{"queryText": ..., "timeout": ...}`). Every record is
//! pushed back as `{"type": "frame", "data": <frame>}`; the stream ends with
//! a single `end` or `error` message. Closing the socket cancels the query.

use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use vk_core::driver::{FrameSender, SendError, SubscriptionState};
use vk_core::frame::Frame;

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamMessage<'a> {
    Frame {
        data: &'a Frame,
    },
    End {
        state: SubscriptionState,
        records: u64,
    },
    Error {
        kind: &'static str,
        message: String,
    },
}

impl StreamMessage<'_> {
    fn to_ws(&self) -> Result<Message, serde_json::Error> {
        serde_json::to_string(self).map(Message::Text)
    }
}

/// Forwards frames to the socket writer task.
struct WsFrameSender {
    tx: mpsc::Sender<Message>,
}

#[async_trait::async_trait]
impl FrameSender for WsFrameSender {
    async fn send_frame(&self, frame: Frame) -> Result<(), SendError> {
        let msg = StreamMessage::Frame { data: &frame }
            .to_ws()
            .map_err(|e| SendError(e.to_string()))?;
        self.tx
            .send(msg)
            .await
            .map_err(|_| SendError("websocket closed".into()))
    }
}

pub async fn stream_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_stream(socket, state))
}

async fn handle_stream(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut incoming) = socket.split();

    let request = loop {
        match incoming.next().await {
            Some(Ok(Message::Text(text))) => break text,
            Some(Ok(Message::Close(_))) | None => return,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::warn!("WebSocket error before subscribe: {}", e);
                return;
            }
        }
    };

    let (tx, mut rx) = mpsc::channel::<Message>(state.channel_capacity);
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let cancel = state.datasource.stream_token();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            while let Some(msg) = incoming.next().await {
                if matches!(msg, Ok(Message::Close(_)) | Err(_)) {
                    break;
                }
            }
            tracing::debug!("Stream client disconnected");
            cancel.cancel();
        })
    };

    let sender = WsFrameSender { tx: tx.clone() };
    let result = state
        .datasource
        .run_stream(request.as_bytes(), &sender, cancel)
        .await;

    let last = match &result {
        Ok(t) => StreamMessage::End {
            state: t.state,
            records: t.records,
        },
        Err(e) => StreamMessage::Error {
            kind: e.kind(),
            message: e.to_string(),
        },
    };
    // the writer may already be gone if the client disconnected
    if let Ok(msg) = last.to_ws() {
        let _ = tx.send(msg).await;
    }

    drop(sender);
    drop(tx);
    watcher.abort();
    let _ = writer.await;
}
