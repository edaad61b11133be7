//! Per-connection message pump
//!
//! The pump enforces the protocol's two central invariants:
//!
//! 1. The first message on a connection must be a handshake; anything else
//!    gets one error response and the connection is torn down without a
//!    session.
//! 2. After the handshake, a spawned reader task keeps pulling frames into
//!    a bounded queue (read-ahead) while the pump dispatches exactly one
//!    request at a time, writing every response it produces before the
//!    next queued request starts. Responses therefore leave in request
//!    order and per-session state needs no further synchronization.
//!
//! Errors raised inside dispatch are converted to wire error responses
//! here; every request that enters dispatch yields exactly one terminal
//! response. Transport failure ends the loop and unregisters the session,
//! which releases its statements and rolls back any active transaction.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::ServerError;
use crate::server::Shared;
use crate::session::{Client, Registration};
use crate::transport::{decode_request, encode_response, read_frame, write_frame};
use crate::wire::{
    ErrorDetails, Request, RequestEnvelope, Response, ResponseEnvelope, MAJOR_API_VERSION,
    MINOR_API_VERSION,
};

/// What the dispatch of one request decided about the connection.
enum Flow {
    Continue,
    Disconnect,
}

/// Serializes and writes responses for one request id.
struct Responder<'a, W> {
    writer: &'a mut W,
    id: u64,
}

impl<'a, W: AsyncWrite + Unpin> Responder<'a, W> {
    async fn send(&mut self, last: bool, response: Response) -> std::io::Result<()> {
        let envelope = ResponseEnvelope::new(self.id, last, response);
        let payload = encode_response(&envelope)?;
        write_frame(self.writer, &payload).await
    }

    async fn send_error(&mut self, details: ErrorDetails) -> std::io::Result<()> {
        self.send(true, Response::Error { details }).await
    }
}

/// Drive one connection from handshake to teardown.
pub async fn run_connection<S>(shared: Arc<Shared>, stream: S)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);

    let session = match handshake(&shared, &mut reader, &mut writer).await {
        Ok(Some(session)) => session,
        Ok(None) => return,
        Err(e) => {
            debug!(error = %e, "handshake transport failure");
            return;
        }
    };
    let uuid = session_uuid(&session).await;
    info!(client = %uuid, "session established");

    // Read-ahead: the reader task keeps accepting frames while a dispatch
    // is still in progress. The bounded channel is the pending queue.
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(shared.config.read_ahead);
    let max_frame_bytes = shared.config.max_frame_bytes;
    let reader_task = tokio::spawn(async move {
        loop {
            match read_frame(&mut reader, max_frame_bytes).await {
                Ok(Some(frame)) => {
                    if tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "read loop ended");
                    break;
                }
            }
        }
    });

    // Serialized dispatch: one request in flight at a time, in arrival
    // order. Each iteration finishes writing its responses before the next
    // queued frame is popped.
    while let Some(frame) = rx.recv().await {
        let envelope = match decode_request(&frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                let mut responder = Responder { writer: &mut writer, id: 0 };
                let _ = responder.send_error(e.to_details()).await;
                if e.is_terminal() {
                    break;
                }
                continue;
            }
        };

        match dispatch(&shared, &session, envelope, &mut writer).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Disconnect) => break,
            Err(e) => {
                debug!(client = %uuid, error = %e, "write failure, closing connection");
                break;
            }
        }
    }

    reader_task.abort();
    shared.clients.unregister(&uuid).await;
    let _ = writer.shutdown().await;
    info!(client = %uuid, "session closed");
}

async fn session_uuid(session: &Arc<tokio::sync::Mutex<Client>>) -> String {
    session.lock().await.uuid.clone()
}

/// Gate the connection on a handshake request. Returns the registered
/// session, or `None` when the connection must close without one.
async fn handshake<R, W>(
    shared: &Arc<Shared>,
    reader: &mut R,
    writer: &mut W,
) -> std::io::Result<Option<Arc<tokio::sync::Mutex<Client>>>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let frame = match read_frame(reader, shared.config.max_frame_bytes).await? {
        Some(frame) => frame,
        None => return Ok(None),
    };

    let envelope = match decode_request(&frame) {
        Ok(envelope) => envelope,
        Err(e) => {
            let mut responder = Responder { writer, id: 0 };
            responder.send_error(e.to_details()).await?;
            return Ok(None);
        }
    };

    let mut responder = Responder { writer, id: envelope.id };
    let Request::Connect {
        major_api_version,
        minor_api_version,
        client_uuid,
        username,
        password,
        auto_commit,
        namespace,
    } = envelope.request
    else {
        warn!("first request was not a handshake");
        responder
            .send_error(ServerError::HandshakeRequired.to_details())
            .await?;
        return Ok(None);
    };

    // Exact match on the major version; minor mismatches are tolerated.
    if major_api_version != MAJOR_API_VERSION {
        debug!(
            client = %client_uuid,
            client_version = format!("{}.{}", major_api_version, minor_api_version),
            "incompatible protocol version"
        );
        responder
            .send(
                true,
                Response::Connected {
                    major_api_version: MAJOR_API_VERSION,
                    minor_api_version: MINOR_API_VERSION,
                    is_compatible: false,
                },
            )
            .await?;
        return Ok(None);
    }

    let registration = Registration {
        client_uuid: &client_uuid,
        username: &username,
        password: &password,
        auto_commit,
        namespace: namespace.as_deref(),
    };
    match shared.clients.register(shared.authenticator.as_ref(), registration) {
        Ok(session) => {
            responder
                .send(
                    true,
                    Response::Connected {
                        major_api_version: MAJOR_API_VERSION,
                        minor_api_version: MINOR_API_VERSION,
                        is_compatible: true,
                    },
                )
                .await?;
            Ok(Some(session))
        }
        Err(e) => {
            warn!(client = %client_uuid, error = %e, "registration rejected");
            responder.send_error(e.to_details()).await?;
            Ok(None)
        }
    }
}

/// Dispatch one request: lock the session, run the handler, map any
/// component failure to a wire error response. IO errors bubble out; they
/// mean the transport is gone.
async fn dispatch<W>(
    shared: &Arc<Shared>,
    session: &Arc<tokio::sync::Mutex<Client>>,
    envelope: RequestEnvelope,
    writer: &mut W,
) -> std::io::Result<Flow>
where
    W: AsyncWrite + Unpin,
{
    let RequestEnvelope { id, request } = envelope;
    let operation = request.operation_name();
    let mut responder = Responder { writer, id };
    let mut client = session.lock().await;
    debug!(client = %client.uuid, request = id, operation, "dispatch");

    match handle(shared, &mut client, request, &mut responder).await {
        Ok(flow) => Ok(flow),
        Err(ServerError::Io(e)) => Err(e),
        Err(e) => {
            debug!(client = %client.uuid, request = id, error = %e, "request failed");
            responder.send_error(e.to_details()).await?;
            Ok(if e.is_terminal() { Flow::Disconnect } else { Flow::Continue })
        }
    }
}

/// The per-request state machine. Component operations fail outward; the
/// caller owns error mapping.
async fn handle<W>(
    shared: &Arc<Shared>,
    client: &mut Client,
    request: Request,
    responder: &mut Responder<'_, W>,
) -> Result<Flow, ServerError>
where
    W: AsyncWrite + Unpin,
{
    let processor = shared.processor.as_ref();
    let default_fetch = shared.config.default_fetch_size;

    match request {
        Request::Connect { .. } => {
            // The session already exists; a second handshake on the same
            // connection is a duplicate registration.
            return Err(ServerError::AlreadyConnected(client.uuid.clone()));
        }

        Request::Disconnect => {
            responder.send(true, Response::Disconnected).await?;
            return Ok(Flow::Disconnect);
        }

        Request::Ping => {
            responder.send(true, Response::Pong).await?;
        }

        Request::SetClientInfo { properties } => {
            client.client_info.extend(properties);
            responder.send(true, Response::ClientInfoSet).await?;
        }

        Request::GetClientInfo => {
            let properties = client.client_info.clone();
            responder.send(true, Response::ClientInfo { properties }).await?;
        }

        Request::UpdateConnectionProperties { auto_commit, namespace } => {
            if let Some(auto_commit) = auto_commit {
                client.auto_commit = auto_commit;
            }
            if let Some(namespace) = namespace {
                if !shared.metadata.namespace_exists(&namespace) {
                    return Err(ServerError::UnknownNamespace(namespace));
                }
                client.namespace = namespace;
            }
            responder.send(true, Response::ConnectionPropertiesUpdated).await?;
        }

        Request::ExecuteUnparameterized { text, language, fetch_size } => {
            let statement_id = client.statements.create_unparameterized(text, language);
            // Two-phase: the id goes out immediately, the result follows
            // under the same request id.
            responder.send(false, Response::StatementCreated { statement_id }).await?;
            let outcome = client.statements.execute(
                processor,
                &mut client.transactions,
                client.auto_commit,
                statement_id,
                fetch_size.unwrap_or(default_fetch),
            )?;
            responder
                .send(true, Response::StatementResult { statement_id, outcome })
                .await?;
        }

        Request::ExecuteUnparameterizedBatch { statements } => {
            let batch_id = client.statements.create_batch(statements);
            responder.send(false, Response::BatchCreated { batch_id }).await?;
            let outcome = client.statements.execute_batch(
                processor,
                &mut client.transactions,
                client.auto_commit,
                batch_id,
            )?;
            send_batch_outcome(responder, batch_id, outcome).await?;
        }

        Request::PrepareIndexed { text, language } => {
            let (statement_id, signature) =
                client.statements.prepare_indexed(processor, text, language)?;
            responder
                .send(true, Response::PreparedStatementSignature { statement_id, signature })
                .await?;
        }

        Request::ExecuteIndexed { statement_id, parameters, fetch_size } => {
            let outcome = client.statements.execute_indexed(
                processor,
                &mut client.transactions,
                client.auto_commit,
                statement_id,
                parameters,
                fetch_size.unwrap_or(default_fetch),
            )?;
            responder
                .send(true, Response::StatementResult { statement_id, outcome })
                .await?;
        }

        Request::ExecuteIndexedBatch { statement_id, parameters } => {
            let outcome = client.statements.execute_indexed_batch(
                processor,
                &mut client.transactions,
                client.auto_commit,
                statement_id,
                parameters,
            )?;
            send_batch_outcome(responder, statement_id, outcome).await?;
        }

        Request::PrepareNamed { text, language } => {
            let (statement_id, signature) =
                client.statements.prepare_named(processor, text, language)?;
            responder
                .send(true, Response::PreparedStatementSignature { statement_id, signature })
                .await?;
        }

        Request::ExecuteNamed { statement_id, parameters, fetch_size } => {
            let outcome = client.statements.execute_named(
                processor,
                &mut client.transactions,
                client.auto_commit,
                statement_id,
                &parameters,
                fetch_size.unwrap_or(default_fetch),
            )?;
            responder
                .send(true, Response::StatementResult { statement_id, outcome })
                .await?;
        }

        Request::Fetch { statement_id, fetch_size } => {
            let frame = client
                .statements
                .fetch(statement_id, fetch_size.unwrap_or(default_fetch))?;
            responder.send(true, Response::Frame { statement_id, frame }).await?;
        }

        Request::CloseStatement { statement_id } => {
            client.statements.close(statement_id);
            responder.send(true, Response::StatementClosed).await?;
        }

        Request::CloseResult { statement_id } => {
            client.statements.close_result(statement_id);
            responder.send(true, Response::ResultClosed).await?;
        }

        Request::Commit => {
            client.transactions.commit()?;
            responder.send(true, Response::Committed).await?;
        }

        Request::Rollback => {
            client.transactions.rollback()?;
            responder.send(true, Response::RolledBack).await?;
        }

        Request::GetNamespaces { pattern } => {
            let namespaces = shared.metadata.search_namespaces(pattern.as_deref())?;
            responder.send(true, Response::Namespaces { namespaces }).await?;
        }

        Request::GetNamespace { namespace } => {
            let namespace = shared.metadata.get_namespace(&namespace)?;
            responder.send(true, Response::Namespace { namespace }).await?;
        }

        Request::GetEntities { namespace, pattern } => {
            let entities = shared.metadata.search_entities(&namespace, pattern.as_deref())?;
            responder.send(true, Response::Entities { entities }).await?;
        }

        Request::GetTypes => {
            let types = shared.metadata.types();
            responder.send(true, Response::Types { types }).await?;
        }

        Request::GetTableTypes => {
            let table_types = shared.metadata.table_types();
            responder.send(true, Response::TableTypes { table_types }).await?;
        }

        Request::GetSqlKeywords => {
            let keywords = shared.metadata.sql_keywords();
            responder.send(true, Response::SqlKeywords { keywords }).await?;
        }

        Request::GetFunctions { category } => {
            let functions = shared.metadata.functions(category.as_deref());
            responder.send(true, Response::Functions { functions }).await?;
        }

        Request::GetSupportedLanguages => {
            let languages = shared.metadata.supported_languages();
            responder.send(true, Response::SupportedLanguages { languages }).await?;
        }

        Request::GetVersion => {
            let version = shared.metadata.server_version();
            responder.send(true, Response::Version { version }).await?;
        }
    }

    Ok(Flow::Continue)
}

/// Final response of a batch run: counts on full success, otherwise an
/// error payload that still carries the counts collected before the
/// failing member.
async fn send_batch_outcome<W>(
    responder: &mut Responder<'_, W>,
    batch_id: u64,
    outcome: crate::statement::BatchOutcome,
) -> Result<(), ServerError>
where
    W: AsyncWrite + Unpin,
{
    match outcome.error {
        None => {
            responder
                .send(
                    true,
                    Response::BatchResult { batch_id, update_counts: outcome.update_counts },
                )
                .await?;
        }
        Some(error) => {
            let mut details = error.to_details();
            details.update_counts = Some(outcome.update_counts);
            responder.send_error(details).await?;
        }
    }
    Ok(())
}
