//! # ksqlDB HTTP client
//!
//! Speaks the `/query-stream` endpoint in its line-delimited form: the first
//! line is a JSON object describing the result columns, every following line
//! is a JSON array holding one row. Errors arrive as JSON objects carrying an
//! `error_code` and a `message`.
//!
//! Plaintext servers are reached over h2c, the same way the engine's own CLI
//! does it; TLS servers negotiate HTTP/2 through ALPN.

use super::{
    ClientFactory, ConnectionParams, Credentials, PushClient, PushQuery, ServerInfo, StreamEvent,
};
use crate::assembler::{Column, Header, Row};
use crate::error::{DatasourceError, Result};
use crate::value::Value;
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const DELIMITED_CONTENT_TYPE: &str = "application/vnd.ksqlapi.delimited.v1";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Longest line accepted from `/query-stream`.
const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

pub struct KsqlClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
    query_id: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl KsqlClient {
    pub fn new(params: &ConnectionParams) -> Result<Self> {
        let url = reqwest::Url::parse(&params.url)
            .map_err(|e| DatasourceError::TransportConnect(format!("{}: {}", params.url, e)))?;

        let mut builder = reqwest::Client::builder().connect_timeout(CONNECT_TIMEOUT);
        match url.scheme() {
            "https" => {}
            "http" if params.allow_plaintext => {
                builder = builder.http2_prior_knowledge();
            }
            "http" => {
                return Err(DatasourceError::TransportConnect(format!(
                    "{} uses plaintext http but plaintext transport is not allowed",
                    params.url
                )))
            }
            other => {
                return Err(DatasourceError::TransportConnect(format!(
                    "unsupported scheme '{}'",
                    other
                )))
            }
        }

        Ok(Self {
            http: builder.build()?,
            base_url: params.url.trim_end_matches('/').to_string(),
            credentials: params.credentials.clone(),
            query_id: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let req = self
            .http
            .request(method, format!("{}{}", self.base_url, path));
        if self.credentials.is_empty() {
            req
        } else {
            req.basic_auth(&self.credentials.username, Some(&self.credentials.password))
        }
    }

    fn remember_query_id(&self, id: Option<&String>) {
        if let (Some(id), Ok(mut slot)) = (id, self.query_id.lock()) {
            *slot = Some(id.clone());
        }
    }

    fn take_query_id(&self) -> Option<String> {
        self.query_id.lock().ok().and_then(|mut slot| slot.take())
    }
}

#[async_trait::async_trait]
impl PushClient for KsqlClient {
    async fn push(&self, query: &PushQuery, events: mpsc::Sender<StreamEvent>) -> Result<()> {
        let resp = self
            .request(reqwest::Method::POST, "/query-stream")
            .header(ACCEPT, DELIMITED_CONTENT_TYPE)
            .json(query)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DatasourceError::Subscription(format!(
                "{}: {}",
                status,
                error_message(&body).unwrap_or(body)
            )));
        }

        let mut decoder = LineDecoder::default();
        let mut body = resp.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for line in decoder.feed(&chunk)? {
                let Some(event) = decoder.decode(&line)? else {
                    continue;
                };
                if let StreamEvent::Header(h) = &event {
                    self.remember_query_id(h.query_id.as_ref());
                }
                if events.send(event).await.is_err() {
                    tracing::debug!("Push receiver dropped, stopping query stream");
                    return Ok(());
                }
            }
        }

        if let Some(line) = decoder.finish() {
            if let Some(event) = decoder.decode(&line)? {
                let _ = events.send(event).await;
            }
        }
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(query_id) = self.take_query_id() else {
            return;
        };

        let resp = self
            .request(reqwest::Method::POST, "/close-query")
            .json(&serde_json::json!({ "queryId": query_id }))
            .send()
            .await;
        match resp {
            Ok(r) if r.status().is_success() => {
                tracing::debug!("Closed push query {}", query_id)
            }
            Ok(r) => tracing::warn!("Closing push query {} returned {}", query_id, r.status()),
            Err(e) => tracing::warn!("Failed to close push query {}: {}", query_id, e),
        }
    }

    async fn server_info(&self) -> Result<ServerInfo> {
        #[derive(Deserialize)]
        struct InfoResponse {
            #[serde(rename = "KsqlServerInfo")]
            info: ServerInfo,
        }

        let resp = self
            .request(reqwest::Method::GET, "/info")
            .send()
            .await
            .map_err(|e| DatasourceError::TransportConnect(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(DatasourceError::TransportConnect(format!(
                "/info returned {}",
                resp.status()
            )));
        }
        let body: InfoResponse = resp
            .json()
            .await
            .map_err(|e| DatasourceError::TransportConnect(e.to_string()))?;
        Ok(body.info)
    }
}

/// Builds one [`KsqlClient`] per subscription.
#[derive(Debug, Clone, Copy, Default)]
pub struct KsqlClientFactory;

impl ClientFactory for KsqlClientFactory {
    fn connect(&self, params: &ConnectionParams) -> Result<Arc<dyn PushClient>> {
        if params.url.trim().is_empty() {
            return Err(DatasourceError::MissingServerAddress);
        }
        let client = KsqlClient::new(params)?;
        tracing::debug!("Created ksqlDB client for {}", params.url);
        Ok(Arc::new(client))
    }
}

// =============================================================================
// Wire decoding
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeaderLine {
    query_id: Option<String>,
    column_names: Vec<String>,
    #[serde(default)]
    column_types: Vec<String>,
}

/// Splits the response body into lines and decodes them into events.
struct LineDecoder {
    pending: Vec<u8>,
    /// Bytes of `pending` already known to hold no newline.
    scanned: usize,
    max_line: usize,
    column_types: Vec<String>,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl LineDecoder {
    fn with_max_line(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            scanned: 0,
            max_line,
            column_types: Vec::new(),
        }
    }

    /// Append a chunk and return every line it completed.
    fn feed(&mut self, chunk: &[u8]) -> Result<Vec<String>> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.pending[from..].iter().position(|b| *b == b'\n') {
            let end = from + offset;
            if end - start > self.max_line {
                return Err(self.oversized());
            }
            lines.push(String::from_utf8_lossy(&self.pending[start..end]).trim().to_string());
            start = end + 1;
            from = start;
        }
        self.pending.drain(..start);
        if self.pending.len() > self.max_line {
            return Err(self.oversized());
        }
        self.scanned = self.pending.len();
        Ok(lines)
    }

    fn oversized(&self) -> DatasourceError {
        DatasourceError::Subscription(format!(
            "line from server exceeds {} bytes",
            self.max_line
        ))
    }

    /// Whatever is left once the body has ended.
    fn finish(&mut self) -> Option<String> {
        let rest = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        self.scanned = 0;
        (!rest.is_empty()).then_some(rest)
    }

    fn decode(&mut self, line: &str) -> Result<Option<StreamEvent>> {
        let line = line.trim_end_matches(',');
        if line.is_empty() || line == "[" || line == "]" {
            return Ok(None);
        }

        let raw: serde_json::Value = serde_json::from_str(line).map_err(|e| {
            DatasourceError::Subscription(format!("malformed line from server: {}", e))
        })?;

        match raw {
            serde_json::Value::Array(cells) => {
                let values = cells
                    .iter()
                    .enumerate()
                    .map(|(i, cell)| {
                        Value::from_json(cell, self.column_types.get(i).map(String::as_str))
                    })
                    .collect();
                Ok(Some(StreamEvent::Row(Row(values))))
            }
            serde_json::Value::Object(obj) if obj.contains_key("columnNames") => {
                let header: HeaderLine = serde_json::from_value(serde_json::Value::Object(obj))
                    .map_err(|e| {
                        DatasourceError::Subscription(format!("malformed header: {}", e))
                    })?;
                self.column_types = header.column_types.clone();
                let columns = header
                    .column_names
                    .into_iter()
                    .enumerate()
                    .map(|(i, name)| match header.column_types.get(i) {
                        Some(t) => Column::typed(name, t.clone()),
                        None => Column::new(name),
                    })
                    .collect();
                Ok(Some(StreamEvent::Header(Header {
                    query_id: header.query_id,
                    columns,
                })))
            }
            other => Err(DatasourceError::Subscription(
                error_message(&other.to_string()).unwrap_or_else(|| other.to_string()),
            )),
        }
    }
}

/// Pull the `message` out of a ksqlDB error body.
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let message = value.get("message")?.as_str()?;
    match value.get("error_code") {
        Some(code) => Some(format!("{} (error_code {})", message, code)),
        None => Some(message.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::State,
        http::{header, HeaderMap, StatusCode},
        routing::{get, post},
        Json, Router,
    };
    use serde_json::json;

    #[test]
    fn test_decoder_splits_across_chunks() {
        let mut d = LineDecoder::default();
        assert!(d.feed(b"{\"queryId\":\"q1\",\"columnNa").unwrap().is_empty());
        let lines = d
            .feed(b"mes\":[\"A\"],\"columnTypes\":[\"INTEGER\"]}\n[1]\n[2")
            .unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "[1]");
        assert_eq!(d.feed(b"3]\n").unwrap(), vec!["[23]".to_string()]);
        assert_eq!(d.finish(), None);
    }

    #[test]
    fn test_decoder_rejects_oversized_line() {
        let mut d = LineDecoder::with_max_line(8);
        assert_eq!(d.feed(b"[1,2]\n[3").unwrap(), vec!["[1,2]".to_string()]);
        assert!(d.feed(b",4,5").unwrap().is_empty());
        let err = d.feed(b",6,7,8,9").unwrap_err();
        assert!(matches!(err, DatasourceError::Subscription(ref m) if m.contains("exceeds 8 bytes")));

        let mut d = LineDecoder::with_max_line(8);
        assert!(d.feed(b"[1,2,3,4,5,6]\n").is_err());
    }

    #[test]
    fn test_decode_header_then_typed_row() {
        let mut d = LineDecoder::default();
        let header = d
            .decode(r#"{"queryId":"q1","columnNames":["HOST","HITS","DATETIME"],"columnTypes":["STRING","INTEGER","STRING"]}"#)
            .unwrap();
        match header {
            Some(StreamEvent::Header(h)) => {
                assert_eq!(h.query_id.as_deref(), Some("q1"));
                assert_eq!(h.columns.len(), 3);
                assert_eq!(h.columns[1], Column::typed("HITS", "INTEGER"));
            }
            other => panic!("expected header, got {other:?}"),
        }

        match d.decode(r#"["web-1",12,"2024-01-01T00:00:00Z"]"#).unwrap() {
            Some(StreamEvent::Row(row)) => {
                assert_eq!(row.0[0], Value::Text("web-1".into()));
                assert_eq!(row.0[1], Value::Int32(12));
            }
            other => panic!("expected row, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_error_object() {
        let mut d = LineDecoder::default();
        let err = d
            .decode(r#"{"@type":"generic_error","error_code":40001,"message":"line 1:1: mismatched input"}"#)
            .unwrap_err();
        assert!(matches!(err, DatasourceError::Subscription(ref m) if m.contains("mismatched input")));
    }

    #[test]
    fn test_decode_skips_blank_and_brackets() {
        let mut d = LineDecoder::default();
        assert!(d.decode("").unwrap().is_none());
        assert!(d.decode("[").unwrap().is_none());
        assert!(d.decode("]").unwrap().is_none());
    }

    #[test]
    fn test_factory_rejects_plaintext_unless_allowed() {
        let mut params = ConnectionParams {
            url: "http://localhost:8088".into(),
            ..Default::default()
        };
        assert!(matches!(
            KsqlClientFactory.connect(&params),
            Err(DatasourceError::TransportConnect(_))
        ));

        params.allow_plaintext = true;
        assert!(KsqlClientFactory.connect(&params).is_ok());
    }

    #[test]
    fn test_factory_requires_address() {
        let params = ConnectionParams::default();
        assert!(matches!(
            KsqlClientFactory.connect(&params),
            Err(DatasourceError::MissingServerAddress)
        ));

        let params = ConnectionParams {
            url: "not a url".into(),
            ..Default::default()
        };
        assert!(matches!(
            KsqlClientFactory.connect(&params),
            Err(DatasourceError::TransportConnect(_))
        ));
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(r#"{"error_code":40101,"message":"Unauthorized"}"#).as_deref(),
            Some("Unauthorized (error_code 40101)")
        );
        assert_eq!(error_message("plain text"), None);
    }

    // -------------------------------------------------------------------------
    // Against a local ksqlDB stand-in
    // -------------------------------------------------------------------------

    const HITS_BODY: &str = concat!(
        "{\"queryId\":\"q-7\",\"columnNames\":[\"HOST\",\"HITS\"],\"columnTypes\":[\"STRING\",\"INTEGER\"]}\n",
        "[\"web-1\",1]\n",
        "[\"web-2\",2]\n",
    );

    #[derive(Default)]
    struct Seen {
        auth: Vec<Option<String>>,
        accept: Vec<Option<String>>,
        queries: Vec<serde_json::Value>,
        closes: Vec<serde_json::Value>,
    }

    type Shared = Arc<Mutex<Seen>>;

    fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    async fn query_stream(
        State(seen): State<Shared>,
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> (StatusCode, String) {
        let bad = body["sql"].as_str().is_some_and(|sql| sql.starts_with("BAD"));
        {
            let mut seen = seen.lock().unwrap();
            seen.auth.push(header_str(&headers, header::AUTHORIZATION));
            seen.accept.push(header_str(&headers, header::ACCEPT));
            seen.queries.push(body);
        }
        if bad {
            let err = json!({
                "@type": "statement_error",
                "error_code": 40001,
                "message": "line 1:1: mismatched input 'BAD'"
            });
            return (StatusCode::BAD_REQUEST, err.to_string());
        }
        (StatusCode::OK, HITS_BODY.to_string())
    }

    async fn close_query(
        State(seen): State<Shared>,
        Json(body): Json<serde_json::Value>,
    ) -> StatusCode {
        seen.lock().unwrap().closes.push(body);
        StatusCode::OK
    }

    async fn info(State(seen): State<Shared>, headers: HeaderMap) -> Json<serde_json::Value> {
        seen.lock()
            .unwrap()
            .auth
            .push(header_str(&headers, header::AUTHORIZATION));
        Json(json!({
            "KsqlServerInfo": {
                "version": "0.29.0",
                "kafkaClusterId": "j3tOi6E_RtO_TMH3gBmK7A",
                "ksqlServiceId": "default_",
                "serverStatus": "RUNNING"
            }
        }))
    }

    async fn serve() -> (String, Shared) {
        let seen = Shared::default();
        let app = Router::new()
            .route("/query-stream", post(query_stream))
            .route("/close-query", post(close_query))
            .route("/info", get(info))
            .with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), seen)
    }

    fn client(url: &str, username: &str) -> KsqlClient {
        KsqlClient::new(&ConnectionParams {
            url: url.to_string(),
            allow_plaintext: true,
            credentials: Credentials {
                username: username.into(),
                password: "s3cret".into(),
            },
        })
        .unwrap()
    }

    async fn drain(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_push_streams_header_and_rows() {
        let (url, seen) = serve().await;
        let client = client(&url, "grafana");
        let (tx, rx) = mpsc::channel(16);

        let query = PushQuery::new("SELECT * FROM HITS EMIT CHANGES;")
            .with_property("ksql.streams.auto.offset.reset", "latest");
        client.push(&query, tx).await.unwrap();
        let events = drain(rx).await;

        assert_eq!(events.len(), 3);
        match &events[0] {
            StreamEvent::Header(h) => {
                assert_eq!(h.query_id.as_deref(), Some("q-7"));
                assert_eq!(h.columns[1], Column::typed("HITS", "INTEGER"));
            }
            other => panic!("expected header, got {other:?}"),
        }
        match &events[2] {
            StreamEvent::Row(row) => {
                assert_eq!(row.0, vec![Value::Text("web-2".into()), Value::Int32(2)]);
            }
            other => panic!("expected row, got {other:?}"),
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.auth[0].as_deref(), Some("Basic Z3JhZmFuYTpzM2NyZXQ="));
        assert_eq!(seen.accept[0].as_deref(), Some(DELIMITED_CONTENT_TYPE));
        assert_eq!(seen.queries[0]["sql"], "SELECT * FROM HITS EMIT CHANGES;");
        assert_eq!(
            seen.queries[0]["properties"]["ksql.streams.auto.offset.reset"],
            "latest"
        );
    }

    #[tokio::test]
    async fn test_push_reports_error_body() {
        let (url, _seen) = serve().await;
        let client = client(&url, "grafana");
        let (tx, rx) = mpsc::channel(16);

        let err = client.push(&PushQuery::new("BAD QUERY"), tx).await.unwrap_err();

        match err {
            DatasourceError::Subscription(m) => {
                assert!(m.starts_with("400"), "{m}");
                assert!(m.contains("mismatched input 'BAD' (error_code 40001)"), "{m}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(drain(rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_close_posts_query_id_once() {
        let (url, seen) = serve().await;
        let client = client(&url, "grafana");
        let (tx, rx) = mpsc::channel(16);
        client
            .push(&PushQuery::new("SELECT * FROM HITS EMIT CHANGES;"), tx)
            .await
            .unwrap();
        drain(rx).await;

        client.close().await;
        client.close().await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.closes, vec![json!({ "queryId": "q-7" })]);
    }

    #[tokio::test]
    async fn test_close_without_query_is_silent() {
        let (url, seen) = serve().await;
        client(&url, "grafana").close().await;
        assert!(seen.lock().unwrap().closes.is_empty());
    }

    #[tokio::test]
    async fn test_server_info_unwraps_envelope() {
        let (url, seen) = serve().await;

        let info = client(&url, "").server_info().await.unwrap();

        assert_eq!(info.version, "0.29.0");
        assert_eq!(info.ksql_service_id, "default_");
        assert_eq!(info.server_status.as_deref(), Some("RUNNING"));
        assert_eq!(seen.lock().unwrap().auth, vec![None]);
    }
}
