//! Wire protocol types
//!
//! Every message on the wire is a 4-byte big-endian length prefix followed
//! by a MessagePack payload. Payloads are internally tagged: a single
//! `type` field selects exactly one request or response shape.
//!
//! Requests carry a caller-assigned numeric `id`; every response echoes the
//! `id` of the request it answers plus a `last` flag marking the final
//! response for that id. Long-running operations may emit an intermediate
//! response (`last = false`, e.g. "statement created") before the result.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Server protocol version. Compatibility is an exact match on the major
/// version; minor mismatches are tolerated.
pub const MAJOR_API_VERSION: u32 = 2;
pub const MINOR_API_VERSION: u32 = 0;

/// Rows fetched per frame when the caller does not ask for a size.
pub const DEFAULT_FETCH_SIZE: u32 = 100;

// ============================================================================
// Values, frames, signatures
// ============================================================================

/// A single self-describing parameter or result value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
}

/// A window of result rows. `last = true` marks the final window; the
/// cursor is closed once it has been handed out.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Frame {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub last: bool,
}

/// Compiled shape of a prepared statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    pub param_count: usize,
    /// Parameter names in first-occurrence order; empty for indexed
    /// statements.
    #[serde(default)]
    pub param_names: Vec<String>,
}

/// One statement of an unparameterized batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementText {
    pub text: String,
    pub language: String,
}

// ============================================================================
// Requests
// ============================================================================

/// Request envelope: caller-assigned id plus the tagged request payload.
#[derive(Debug, Deserialize)]
pub struct RequestEnvelope {
    pub id: u64,
    #[serde(flatten)]
    pub request: Request,
}

/// Request from client
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Request {
    /// Handshake. Must be the first request on every connection.
    Connect {
        #[serde(rename = "majorApiVersion")]
        major_api_version: u32,
        #[serde(rename = "minorApiVersion")]
        minor_api_version: u32,
        #[serde(rename = "clientUuid")]
        client_uuid: String,
        username: String,
        password: String,
        #[serde(default, rename = "autoCommit")]
        auto_commit: Option<bool>,
        #[serde(default)]
        namespace: Option<String>,
    },

    /// Orderly teardown; the pump exits after answering.
    Disconnect,

    /// Connection keepalive check.
    Ping,

    // ------------------------------------------------------------------
    // Connection and client-info properties
    // ------------------------------------------------------------------
    SetClientInfo {
        properties: HashMap<String, String>,
    },
    GetClientInfo,
    UpdateConnectionProperties {
        #[serde(default, rename = "autoCommit")]
        auto_commit: Option<bool>,
        #[serde(default)]
        namespace: Option<String>,
    },

    // ------------------------------------------------------------------
    // Statement execution
    // ------------------------------------------------------------------
    ExecuteUnparameterized {
        text: String,
        language: String,
        #[serde(default, rename = "fetchSize")]
        fetch_size: Option<u32>,
    },
    ExecuteUnparameterizedBatch {
        statements: Vec<StatementText>,
    },
    PrepareIndexed {
        text: String,
        language: String,
    },
    ExecuteIndexed {
        #[serde(rename = "statementId")]
        statement_id: u64,
        parameters: Vec<Value>,
        #[serde(default, rename = "fetchSize")]
        fetch_size: Option<u32>,
    },
    ExecuteIndexedBatch {
        #[serde(rename = "statementId")]
        statement_id: u64,
        parameters: Vec<Vec<Value>>,
    },
    PrepareNamed {
        text: String,
        language: String,
    },
    ExecuteNamed {
        #[serde(rename = "statementId")]
        statement_id: u64,
        parameters: HashMap<String, Value>,
        #[serde(default, rename = "fetchSize")]
        fetch_size: Option<u32>,
    },
    Fetch {
        #[serde(rename = "statementId")]
        statement_id: u64,
        #[serde(default, rename = "fetchSize")]
        fetch_size: Option<u32>,
    },
    CloseStatement {
        #[serde(rename = "statementId")]
        statement_id: u64,
    },
    CloseResult {
        #[serde(rename = "statementId")]
        statement_id: u64,
    },

    // ------------------------------------------------------------------
    // Transaction control
    // ------------------------------------------------------------------
    Commit,
    Rollback,

    // ------------------------------------------------------------------
    // Metadata searches (answered by the catalog façade)
    // ------------------------------------------------------------------
    GetNamespaces {
        #[serde(default)]
        pattern: Option<String>,
    },
    GetNamespace {
        namespace: String,
    },
    GetEntities {
        namespace: String,
        #[serde(default)]
        pattern: Option<String>,
    },
    GetTypes,
    GetTableTypes,
    GetSqlKeywords,
    GetFunctions {
        #[serde(default)]
        category: Option<String>,
    },
    GetSupportedLanguages,
    GetVersion,
}

impl Request {
    /// Name used in dispatch logging.
    pub fn operation_name(&self) -> &'static str {
        match self {
            Request::Connect { .. } => "Connect",
            Request::Disconnect => "Disconnect",
            Request::Ping => "Ping",
            Request::SetClientInfo { .. } => "SetClientInfo",
            Request::GetClientInfo => "GetClientInfo",
            Request::UpdateConnectionProperties { .. } => "UpdateConnectionProperties",
            Request::ExecuteUnparameterized { .. } => "ExecuteUnparameterized",
            Request::ExecuteUnparameterizedBatch { .. } => "ExecuteUnparameterizedBatch",
            Request::PrepareIndexed { .. } => "PrepareIndexed",
            Request::ExecuteIndexed { .. } => "ExecuteIndexed",
            Request::ExecuteIndexedBatch { .. } => "ExecuteIndexedBatch",
            Request::PrepareNamed { .. } => "PrepareNamed",
            Request::ExecuteNamed { .. } => "ExecuteNamed",
            Request::Fetch { .. } => "Fetch",
            Request::CloseStatement { .. } => "CloseStatement",
            Request::CloseResult { .. } => "CloseResult",
            Request::Commit => "Commit",
            Request::Rollback => "Rollback",
            Request::GetNamespaces { .. } => "GetNamespaces",
            Request::GetNamespace { .. } => "GetNamespace",
            Request::GetEntities { .. } => "GetEntities",
            Request::GetTypes => "GetTypes",
            Request::GetTableTypes => "GetTableTypes",
            Request::GetSqlKeywords => "GetSqlKeywords",
            Request::GetFunctions { .. } => "GetFunctions",
            Request::GetSupportedLanguages => "GetSupportedLanguages",
            Request::GetVersion => "GetVersion",
        }
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Response envelope: echoes the request id; `last = false` marks an
/// intermediate response with more to follow under the same id.
#[derive(Debug, Serialize)]
pub struct ResponseEnvelope {
    pub id: u64,
    pub last: bool,
    #[serde(flatten)]
    pub response: Response,
}

impl ResponseEnvelope {
    pub fn new(id: u64, last: bool, response: Response) -> Self {
        ResponseEnvelope { id, last, response }
    }
}

/// Wire error descriptor. `update_counts` preserves the per-member counts
/// collected before a batch member failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_counts: Option<Vec<u64>>,
}

/// Outcome of a single statement execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StatementOutcome {
    /// Row count of a data-manipulation statement.
    UpdateCount(u64),
    /// First window of a query result; further windows come via `fetch`.
    Frame(Frame),
}

/// Response to client
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    Connected {
        #[serde(rename = "majorApiVersion")]
        major_api_version: u32,
        #[serde(rename = "minorApiVersion")]
        minor_api_version: u32,
        #[serde(rename = "isCompatible")]
        is_compatible: bool,
    },
    Disconnected,
    Pong,

    ClientInfo {
        properties: HashMap<String, String>,
    },
    ClientInfoSet,
    ConnectionPropertiesUpdated,

    /// Intermediate response: a statement was registered and assigned an id.
    StatementCreated {
        #[serde(rename = "statementId")]
        statement_id: u64,
    },
    /// Intermediate response: a batch was registered and assigned an id.
    BatchCreated {
        #[serde(rename = "batchId")]
        batch_id: u64,
    },
    StatementResult {
        #[serde(rename = "statementId")]
        statement_id: u64,
        outcome: StatementOutcome,
    },
    BatchResult {
        #[serde(rename = "batchId")]
        batch_id: u64,
        #[serde(rename = "updateCounts")]
        update_counts: Vec<u64>,
    },
    PreparedStatementSignature {
        #[serde(rename = "statementId")]
        statement_id: u64,
        signature: Signature,
    },
    Frame {
        #[serde(rename = "statementId")]
        statement_id: u64,
        frame: Frame,
    },
    StatementClosed,
    ResultClosed,

    Committed,
    RolledBack,

    Namespaces {
        namespaces: Vec<NamespaceMeta>,
    },
    Namespace {
        namespace: NamespaceMeta,
    },
    Entities {
        entities: Vec<EntityMeta>,
    },
    Types {
        types: Vec<TypeMeta>,
    },
    TableTypes {
        #[serde(rename = "tableTypes")]
        table_types: Vec<String>,
    },
    SqlKeywords {
        keywords: String,
    },
    Functions {
        functions: Vec<FunctionMeta>,
    },
    SupportedLanguages {
        languages: Vec<String>,
    },
    Version {
        version: String,
    },

    Error {
        details: ErrorDetails,
    },
}

// ============================================================================
// Metadata shapes
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceMeta {
    pub name: String,
    /// Data model of the namespace: "relational", "document" or "graph".
    pub data_model: String,
    pub is_case_sensitive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMeta {
    pub namespace: String,
    pub name: String,
    pub entity_type: String,
    pub columns: Vec<ColumnMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMeta {
    pub name: String,
    pub type_name: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeMeta {
    pub name: String,
    pub precedence: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionMeta {
    pub name: String,
    pub category: String,
    pub syntax: String,
}
