//! Query processor seam
//!
//! The protocol engine never parses, plans or executes statements itself.
//! Everything behind these traits — parsing, planning, row production,
//! transaction durability — belongs to the embedding server. The engine
//! only manages lifetimes: which statements exist, which cursor is open,
//! which transaction is active.

use crate::error::Result;
use crate::wire::{Frame, Signature, Value};

/// Outcome of executing one statement.
pub enum ExecutionOutcome {
    /// Row count of a data-manipulation statement.
    UpdateCount(u64),
    /// A query produced a result cursor; rows are paged out of it frame by
    /// frame and never buffered whole in this layer.
    Cursor(Box<dyn ResultCursor>),
}

/// A live result cursor owned by exactly one statement.
///
/// `next_frame` hands out successive row windows; the frame with
/// `last = true` is the final one and the statement drops the cursor after
/// returning it.
pub trait ResultCursor: Send + 'static {
    fn next_frame(&mut self, fetch_size: u32) -> Result<Frame>;
}

/// An active transaction created by the processor.
pub trait TransactionHandle: Send + 'static {
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;
}

/// The opaque statement-execution capability.
///
/// Implementations must be shareable across connections; per-session
/// serialization is guaranteed by the message pump, but two sessions may
/// call in concurrently.
pub trait QueryProcessor: Send + Sync + 'static {
    /// Compile a statement far enough to learn its parameter shape.
    fn prepare(&self, text: &str, language: &str) -> Result<Signature>;

    /// Open a new transaction.
    fn begin(&self) -> Result<Box<dyn TransactionHandle>>;

    /// Execute a statement within `txn`. `params` is empty for
    /// unparameterized statements; `fetch_size` bounds the first frame of
    /// a query result.
    fn execute(
        &self,
        txn: &mut dyn TransactionHandle,
        text: &str,
        language: &str,
        params: &[Value],
        fetch_size: u32,
    ) -> Result<ExecutionOutcome>;
}

/// Authentication provider consulted once per handshake.
pub trait Authenticator: Send + Sync + 'static {
    fn authenticate(&self, username: &str, password: &str) -> Result<AuthenticatedUser>;
}

/// User record returned by a successful authentication.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub username: String,
}
