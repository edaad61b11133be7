//! Shared harness for protocol integration tests.
//!
//! Runs a full `Server` over an in-memory duplex stream with scripted
//! collaborators. Requests are built as JSON values and shipped as
//! MessagePack frames, exactly as a real client would frame them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::json;
use tokio::io::{ReadHalf, WriteHalf};

use mosaicdb::catalog::CatalogReader;
use mosaicdb::error::{Result, ServerError};
use mosaicdb::processor::{
    AuthenticatedUser, Authenticator, ExecutionOutcome, QueryProcessor, ResultCursor,
    TransactionHandle,
};
use mosaicdb::transport::{read_frame, write_frame, MAX_FRAME_BYTES};
use mosaicdb::wire::{
    EntityMeta, ErrorDetails, Frame, FunctionMeta, NamespaceMeta, Signature, StatementOutcome,
    TypeMeta, Value,
};
use mosaicdb::{Server, ServerConfig};

pub const USERNAME: &str = "pat";
pub const PASSWORD: &str = "secret";

// ---------------------------------------------------------------------------
// Scripted collaborators
// ---------------------------------------------------------------------------

/// Behavior of the processor for one statement text.
#[derive(Clone)]
pub enum Script {
    Update(u64),
    /// Query over one `v` column with this many rows.
    Rows(usize),
    Fail { message: String, code: Option<String> },
}

/// Enter/exit instants of one `execute` call, for the overlap check.
#[derive(Clone)]
pub struct ExecutionSpan {
    pub text: String,
    pub enter: Instant,
    pub exit: Instant,
}

/// Transaction counters shared between the processor and its handles.
#[derive(Default)]
pub struct TxnLog {
    pub begun: std::sync::atomic::AtomicU64,
    pub committed: std::sync::atomic::AtomicU64,
    pub rolled_back: std::sync::atomic::AtomicU64,
}

#[derive(Default)]
pub struct TestProcessor {
    scripts: Mutex<HashMap<String, Script>>,
    delays: Mutex<HashMap<String, Duration>>,
    pub spans: Mutex<Vec<ExecutionSpan>>,
    pub param_count: Mutex<usize>,
    pub txn_log: Arc<TxnLog>,
}

impl TestProcessor {
    pub fn script(&self, text: &str, script: Script) {
        self.scripts.lock().unwrap().insert(text.to_string(), script);
    }

    pub fn delay(&self, text: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(text.to_string(), delay);
    }

    pub fn set_param_count(&self, count: usize) {
        *self.param_count.lock().unwrap() = count;
    }

    fn lookup(&self, text: &str) -> Script {
        self.scripts
            .lock()
            .unwrap()
            .get(text)
            .cloned()
            .unwrap_or(Script::Update(0))
    }
}

struct LoggedTxn {
    log: Arc<TxnLog>,
}

impl TransactionHandle for LoggedTxn {
    fn commit(&mut self) -> Result<()> {
        self.log.committed.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
    fn rollback(&mut self) -> Result<()> {
        self.log.rolled_back.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

struct CountingCursor {
    next: usize,
    total: usize,
}

impl ResultCursor for CountingCursor {
    fn next_frame(&mut self, fetch_size: u32) -> Result<Frame> {
        let take = (fetch_size as usize).min(self.total - self.next);
        let rows = (self.next..self.next + take)
            .map(|v| vec![Value::Int(v as i64)])
            .collect();
        self.next += take;
        Ok(Frame {
            columns: vec!["v".to_string()],
            rows,
            last: self.next == self.total,
        })
    }
}

impl QueryProcessor for TestProcessor {
    fn prepare(&self, text: &str, _language: &str) -> Result<Signature> {
        if let Script::Fail { message, code } = self.lookup(text) {
            return Err(ServerError::Execution { message, code, state: None });
        }
        Ok(Signature { param_count: *self.param_count.lock().unwrap(), param_names: vec![] })
    }

    fn begin(&self) -> Result<Box<dyn TransactionHandle>> {
        self.txn_log.begun.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(Box::new(LoggedTxn { log: Arc::clone(&self.txn_log) }))
    }

    fn execute(
        &self,
        _txn: &mut dyn TransactionHandle,
        text: &str,
        _language: &str,
        _params: &[Value],
        _fetch_size: u32,
    ) -> Result<ExecutionOutcome> {
        let enter = Instant::now();
        if let Some(delay) = self.delays.lock().unwrap().get(text).copied() {
            std::thread::sleep(delay);
        }
        let result = match self.lookup(text) {
            Script::Update(n) => Ok(ExecutionOutcome::UpdateCount(n)),
            Script::Rows(total) => {
                Ok(ExecutionOutcome::Cursor(Box::new(CountingCursor { next: 0, total })))
            }
            Script::Fail { message, code } => {
                Err(ServerError::Execution { message, code, state: None })
            }
        };
        self.spans.lock().unwrap().push(ExecutionSpan {
            text: text.to_string(),
            enter,
            exit: Instant::now(),
        });
        result
    }
}

pub struct TestAuth;

impl Authenticator for TestAuth {
    fn authenticate(&self, username: &str, password: &str) -> Result<AuthenticatedUser> {
        if username == USERNAME && password == PASSWORD {
            Ok(AuthenticatedUser { username: username.to_string() })
        } else {
            Err(ServerError::BadCredentials(username.to_string()))
        }
    }
}

pub struct TestCatalog;

impl CatalogReader for TestCatalog {
    fn namespaces(&self) -> Vec<NamespaceMeta> {
        vec![
            NamespaceMeta {
                name: "public".into(),
                data_model: "relational".into(),
                is_case_sensitive: false,
            },
            NamespaceMeta {
                name: "inventory".into(),
                data_model: "document".into(),
                is_case_sensitive: false,
            },
        ]
    }

    fn entities(&self, namespace: &str) -> Result<Vec<EntityMeta>> {
        if namespace != "public" && namespace != "inventory" {
            return Err(ServerError::UnknownNamespace(namespace.to_string()));
        }
        Ok(vec![EntityMeta {
            namespace: namespace.to_string(),
            name: "orders".into(),
            entity_type: "TABLE".into(),
            columns: vec![],
        }])
    }

    fn types(&self) -> Vec<TypeMeta> {
        vec![TypeMeta { name: "BIGINT".into(), precedence: 1 }]
    }

    fn table_types(&self) -> Vec<String> {
        vec!["TABLE".into()]
    }

    fn sql_keywords(&self) -> String {
        "NAMESPACE".into()
    }

    fn functions(&self) -> Vec<FunctionMeta> {
        vec![]
    }

    fn supported_languages(&self) -> Vec<String> {
        vec!["sql".into(), "mongo".into()]
    }

    fn server_version(&self) -> String {
        "mosaicdb-test".into()
    }
}

// ---------------------------------------------------------------------------
// Wire client
// ---------------------------------------------------------------------------

/// Server response decoded loosely: tag plus whichever fields the test
/// cares about. Unknown fields are ignored.
#[derive(Debug, Deserialize)]
pub struct Reply {
    pub id: u64,
    pub last: bool,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub details: Option<ErrorDetails>,
    #[serde(default, rename = "statementId")]
    pub statement_id: Option<u64>,
    #[serde(default, rename = "batchId")]
    pub batch_id: Option<u64>,
    #[serde(default)]
    pub outcome: Option<StatementOutcome>,
    #[serde(default)]
    pub frame: Option<Frame>,
    #[serde(default, rename = "updateCounts")]
    pub update_counts: Option<Vec<u64>>,
    #[serde(default, rename = "isCompatible")]
    pub is_compatible: Option<bool>,
    #[serde(default)]
    pub signature: Option<Signature>,
    #[serde(default)]
    pub properties: Option<HashMap<String, String>>,
    #[serde(default)]
    pub namespaces: Option<Vec<NamespaceMeta>>,
    #[serde(default)]
    pub namespace: Option<NamespaceMeta>,
    #[serde(default)]
    pub languages: Option<Vec<String>>,
    #[serde(default)]
    pub version: Option<String>,
}

impl Reply {
    pub fn expect_kind(&self, kind: &str) -> &Self {
        assert_eq!(self.kind, kind, "unexpected response: {:?}", self);
        self
    }

    pub fn error_code(&self) -> &str {
        self.details
            .as_ref()
            .and_then(|d| d.code.as_deref())
            .unwrap_or_default()
    }
}

pub struct TestClient {
    reader: ReadHalf<tokio::io::DuplexStream>,
    writer: WriteHalf<tokio::io::DuplexStream>,
}

impl TestClient {
    /// Send one request frame. `body` must already contain `id` and `type`.
    pub async fn send(&mut self, body: serde_json::Value) {
        let payload = rmp_serde::to_vec_named(&body).expect("encode request");
        write_frame(&mut self.writer, &payload).await.expect("write frame");
    }

    /// Send a frame whose payload is arbitrary bytes, bypassing encoding.
    pub async fn send_raw(&mut self, payload: &[u8]) {
        write_frame(&mut self.writer, payload).await.expect("write frame");
    }

    /// Receive one response frame; panics on EOF.
    pub async fn recv(&mut self) -> Reply {
        let frame = read_frame(&mut self.reader, MAX_FRAME_BYTES)
            .await
            .expect("read frame")
            .expect("connection closed");
        rmp_serde::from_slice(&frame).expect("decode response")
    }

    /// Receive a frame, or `None` when the server closed the connection.
    pub async fn recv_or_eof(&mut self) -> Option<Reply> {
        let frame = read_frame(&mut self.reader, MAX_FRAME_BYTES).await.expect("read frame")?;
        Some(rmp_serde::from_slice(&frame).expect("decode response"))
    }

    /// Handshake with the server's protocol version; asserts compatibility.
    pub async fn connect(&mut self, uuid: &str) {
        self.send(connect_request(1, 2, 0, uuid)).await;
        let reply = self.recv().await;
        reply.expect_kind("connected");
        assert_eq!(reply.is_compatible, Some(true));
    }
}

pub fn connect_request(id: u64, major: u32, minor: u32, uuid: &str) -> serde_json::Value {
    json!({
        "id": id,
        "type": "connect",
        "majorApiVersion": major,
        "minorApiVersion": minor,
        "clientUuid": uuid,
        "username": USERNAME,
        "password": PASSWORD,
    })
}

// ---------------------------------------------------------------------------
// Server setup
// ---------------------------------------------------------------------------

pub struct Fixture {
    pub server: Arc<Server>,
    pub processor: Arc<TestProcessor>,
}

impl Fixture {
    pub fn new() -> Self {
        // One subscriber per test binary; later calls are no-ops.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let processor = Arc::new(TestProcessor::default());
        let server = Arc::new(Server::new(
            ServerConfig::default(),
            Arc::clone(&processor) as Arc<dyn QueryProcessor>,
            Arc::new(TestAuth),
            Arc::new(TestCatalog),
        ));
        Fixture { server, processor }
    }

    /// Open a fresh in-memory connection served by this server.
    pub fn open(&self) -> TestClient {
        let (client_side, server_side) = tokio::io::duplex(1 << 16);
        let server = Arc::clone(&self.server);
        tokio::spawn(async move {
            server.serve_connection(server_side).await;
        });
        let (reader, writer) = tokio::io::split(client_side);
        TestClient { reader, writer }
    }
}
