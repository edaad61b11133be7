//! Statement lifecycle management
//!
//! Owns every statement of one session: creation, preparation, execution,
//! result paging, close. Statement IDs come from a single process-wide
//! counter so keys never collide across sessions; lookup is always scoped
//! to the owning session's manager.
//!
//! A statement owns at most one open result cursor. Re-executing a
//! statement implicitly closes its previous cursor, and a cursor whose
//! final frame (`last = true`) has been handed out is dropped immediately,
//! so any later fetch fails with `NoOpenCursor`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

use crate::error::{Result, ServerError};
use crate::params;
use crate::processor::{ExecutionOutcome, QueryProcessor, ResultCursor};
use crate::transaction::TransactionCoordinator;
use crate::wire::{Frame, Signature, StatementOutcome, StatementText, Value};

// Process-wide so key derivation can never collide, even across sessions.
static NEXT_STATEMENT_ID: AtomicU64 = AtomicU64::new(1);

fn next_statement_id() -> u64 {
    NEXT_STATEMENT_ID.fetch_add(1, Ordering::SeqCst)
}

enum StatementKind {
    Unparameterized {
        text: String,
        language: String,
    },
    PreparedIndexed {
        text: String,
        language: String,
        signature: Signature,
    },
    PreparedNamed {
        /// Text already rewritten to positional markers.
        text: String,
        language: String,
        /// Placeholder names in occurrence order.
        names: Vec<String>,
    },
    Batch {
        statements: Vec<StatementText>,
    },
}

struct Statement {
    kind: StatementKind,
    cursor: Option<Box<dyn ResultCursor>>,
}

/// Update counts collected by a batch run plus the member failure that
/// aborted it, if any. Members after a failed one are never attempted.
pub struct BatchOutcome {
    pub update_counts: Vec<u64>,
    pub error: Option<ServerError>,
}

/// Per-session statement registry.
#[derive(Default)]
pub struct StatementManager {
    statements: HashMap<u64, Statement>,
}

impl StatementManager {
    pub fn new() -> Self {
        StatementManager { statements: HashMap::new() }
    }

    pub fn statement_count(&self) -> usize {
        self.statements.len()
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Register an unparameterized statement without executing it.
    pub fn create_unparameterized(&mut self, text: String, language: String) -> u64 {
        let id = next_statement_id();
        self.statements.insert(
            id,
            Statement { kind: StatementKind::Unparameterized { text, language }, cursor: None },
        );
        id
    }

    /// Register an unparameterized batch.
    pub fn create_batch(&mut self, statements: Vec<StatementText>) -> u64 {
        let id = next_statement_id();
        self.statements
            .insert(id, Statement { kind: StatementKind::Batch { statements }, cursor: None });
        id
    }

    /// Compile an indexed prepared statement and register it.
    pub fn prepare_indexed(
        &mut self,
        processor: &dyn QueryProcessor,
        text: String,
        language: String,
    ) -> Result<(u64, Signature)> {
        let signature = processor.prepare(&text, &language)?;
        let id = next_statement_id();
        self.statements.insert(
            id,
            Statement {
                kind: StatementKind::PreparedIndexed { text, language, signature: signature.clone() },
                cursor: None,
            },
        );
        Ok((id, signature))
    }

    /// Discover named placeholders, rewrite them to positional markers and
    /// register the prepared statement.
    pub fn prepare_named(
        &mut self,
        processor: &dyn QueryProcessor,
        text: String,
        language: String,
    ) -> Result<(u64, Signature)> {
        let scanned = params::scan(&text);
        let compiled = processor.prepare(&scanned.text, &language)?;
        let signature = Signature {
            param_count: scanned.names.len().max(compiled.param_count),
            param_names: scanned.names.clone(),
        };
        let id = next_statement_id();
        self.statements.insert(
            id,
            Statement {
                kind: StatementKind::PreparedNamed {
                    text: scanned.text,
                    language,
                    names: scanned.names,
                },
                cursor: None,
            },
        );
        Ok((id, signature))
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Execute an unparameterized statement.
    pub fn execute(
        &mut self,
        processor: &dyn QueryProcessor,
        txns: &mut TransactionCoordinator,
        auto_commit: bool,
        id: u64,
        fetch_size: u32,
    ) -> Result<StatementOutcome> {
        let stmt = self
            .statements
            .get_mut(&id)
            .ok_or(ServerError::StatementNotFound(id))?;
        let (text, language) = match &stmt.kind {
            StatementKind::Unparameterized { text, language } => (text.clone(), language.clone()),
            _ => return Err(ServerError::NotPrepared(id)),
        };
        run_one(processor, txns, auto_commit, &text, &language, &[], fetch_size, &mut stmt.cursor)
    }

    /// Execute an indexed prepared statement with positional values.
    pub fn execute_indexed(
        &mut self,
        processor: &dyn QueryProcessor,
        txns: &mut TransactionCoordinator,
        auto_commit: bool,
        id: u64,
        values: Vec<Value>,
        fetch_size: u32,
    ) -> Result<StatementOutcome> {
        let stmt = self
            .statements
            .get_mut(&id)
            .ok_or(ServerError::StatementNotFound(id))?;
        let (text, language, expected) = match &stmt.kind {
            StatementKind::PreparedIndexed { text, language, signature } => {
                (text.clone(), language.clone(), signature.param_count)
            }
            _ => return Err(ServerError::NotPrepared(id)),
        };
        if values.len() != expected {
            return Err(ServerError::ParameterCountMismatch {
                expected,
                actual: values.len(),
            });
        }
        run_one(
            processor,
            txns,
            auto_commit,
            &text,
            &language,
            &values,
            fetch_size,
            &mut stmt.cursor,
        )
    }

    /// Execute a named prepared statement with a name-to-value map.
    pub fn execute_named(
        &mut self,
        processor: &dyn QueryProcessor,
        txns: &mut TransactionCoordinator,
        auto_commit: bool,
        id: u64,
        values: &HashMap<String, Value>,
        fetch_size: u32,
    ) -> Result<StatementOutcome> {
        let stmt = self
            .statements
            .get_mut(&id)
            .ok_or(ServerError::StatementNotFound(id))?;
        let (text, language, names) = match &stmt.kind {
            StatementKind::PreparedNamed { text, language, names, .. } => {
                (text.clone(), language.clone(), names.clone())
            }
            _ => return Err(ServerError::NotPrepared(id)),
        };
        let ordered = params::bind(&names, values)?;
        run_one(
            processor,
            txns,
            auto_commit,
            &text,
            &language,
            &ordered,
            fetch_size,
            &mut stmt.cursor,
        )
    }

    /// Run an indexed prepared statement once per value list, aborting on
    /// the first failure.
    pub fn execute_indexed_batch(
        &mut self,
        processor: &dyn QueryProcessor,
        txns: &mut TransactionCoordinator,
        auto_commit: bool,
        id: u64,
        value_lists: Vec<Vec<Value>>,
    ) -> Result<BatchOutcome> {
        let stmt = self
            .statements
            .get(&id)
            .ok_or(ServerError::StatementNotFound(id))?;
        let (text, language, expected) = match &stmt.kind {
            StatementKind::PreparedIndexed { text, language, signature } => {
                (text.clone(), language.clone(), signature.param_count)
            }
            _ => return Err(ServerError::NotPrepared(id)),
        };

        let mut update_counts = Vec::with_capacity(value_lists.len());
        for values in value_lists {
            if values.len() != expected {
                return Ok(BatchOutcome {
                    update_counts,
                    error: Some(ServerError::ParameterCountMismatch {
                        expected,
                        actual: values.len(),
                    }),
                });
            }
            match run_update(processor, txns, auto_commit, &text, &language, &values) {
                Ok(count) => update_counts.push(count),
                Err(e) => return Ok(BatchOutcome { update_counts, error: Some(e) }),
            }
        }
        Ok(BatchOutcome { update_counts, error: None })
    }

    /// Run an unparameterized batch, one update count per member, aborting
    /// on the first failure. The batch machinery itself forces no rollback;
    /// that policy belongs to the transaction coordinator.
    pub fn execute_batch(
        &mut self,
        processor: &dyn QueryProcessor,
        txns: &mut TransactionCoordinator,
        auto_commit: bool,
        id: u64,
    ) -> Result<BatchOutcome> {
        let stmt = self
            .statements
            .get(&id)
            .ok_or(ServerError::StatementNotFound(id))?;
        let members = match &stmt.kind {
            StatementKind::Batch { statements } => statements.clone(),
            _ => return Err(ServerError::StatementNotFound(id)),
        };

        let mut update_counts = Vec::with_capacity(members.len());
        for member in &members {
            match run_update(processor, txns, auto_commit, &member.text, &member.language, &[]) {
                Ok(count) => update_counts.push(count),
                Err(e) => return Ok(BatchOutcome { update_counts, error: Some(e) }),
            }
        }
        Ok(BatchOutcome { update_counts, error: None })
    }

    // ------------------------------------------------------------------
    // Result paging and close
    // ------------------------------------------------------------------

    /// Page the next frame out of a statement's open cursor.
    pub fn fetch(&mut self, id: u64, fetch_size: u32) -> Result<Frame> {
        let stmt = self
            .statements
            .get_mut(&id)
            .ok_or(ServerError::StatementNotFound(id))?;
        let cursor = stmt.cursor.as_mut().ok_or(ServerError::NoOpenCursor(id))?;
        let frame = cursor.next_frame(fetch_size)?;
        if frame.last {
            stmt.cursor = None;
        }
        Ok(frame)
    }

    /// Drop a statement's cursor without touching the statement. Idempotent.
    pub fn close_result(&mut self, id: u64) {
        if let Some(stmt) = self.statements.get_mut(&id) {
            stmt.cursor = None;
        }
    }

    /// Release a statement or batch and any cursor it owns. Idempotent.
    pub fn close(&mut self, id: u64) {
        self.statements.remove(&id);
    }

    /// Release everything; called on session disposal.
    pub fn close_all(&mut self) {
        self.statements.clear();
    }
}

/// Execute one statement inside the session transaction, materializing the
/// first result frame for queries. The prior cursor, if any, is implicitly
/// closed before execution.
#[allow(clippy::too_many_arguments)]
fn run_one(
    processor: &dyn QueryProcessor,
    txns: &mut TransactionCoordinator,
    auto_commit: bool,
    text: &str,
    language: &str,
    values: &[Value],
    fetch_size: u32,
    cursor_slot: &mut Option<Box<dyn ResultCursor>>,
) -> Result<StatementOutcome> {
    *cursor_slot = None;

    let txn = txns.get_or_create(processor)?;
    let result = match processor.execute(txn, text, language, values, fetch_size) {
        Ok(ExecutionOutcome::UpdateCount(count)) => Ok(StatementOutcome::UpdateCount(count)),
        Ok(ExecutionOutcome::Cursor(mut cursor)) => match cursor.next_frame(fetch_size) {
            Ok(frame) => {
                if !frame.last {
                    *cursor_slot = Some(cursor);
                }
                Ok(StatementOutcome::Frame(frame))
            }
            Err(e) => Err(e),
        },
        Err(e) => Err(e),
    };

    match result {
        Ok(outcome) => {
            txns.commit_if_auto(auto_commit)?;
            Ok(outcome)
        }
        Err(e) => {
            abort_if_auto(txns, auto_commit);
            Err(e)
        }
    }
}

/// Batch-member execution path: only update counts are legal outcomes.
fn run_update(
    processor: &dyn QueryProcessor,
    txns: &mut TransactionCoordinator,
    auto_commit: bool,
    text: &str,
    language: &str,
    values: &[Value],
) -> Result<u64> {
    let txn = txns.get_or_create(processor)?;
    match processor.execute(txn, text, language, values, 0) {
        Ok(ExecutionOutcome::UpdateCount(count)) => {
            txns.commit_if_auto(auto_commit)?;
            Ok(count)
        }
        Ok(ExecutionOutcome::Cursor(_)) => {
            abort_if_auto(txns, auto_commit);
            Err(ServerError::Execution {
                message: format!("Batch member '{}' produced a result set", text),
                code: None,
                state: None,
            })
        }
        Err(e) => {
            abort_if_auto(txns, auto_commit);
            Err(e)
        }
    }
}

/// A failed auto-commit execution must not leave its transaction active;
/// the next request would silently commit the failed statement's work.
/// Under an explicit transaction the client decides, so the slot is kept.
fn abort_if_auto(txns: &mut TransactionCoordinator, auto_commit: bool) {
    if !auto_commit {
        return;
    }
    if let Err(e) = txns.rollback() {
        warn!(error = %e, "rollback after failed execution failed");
    }
}
