//! Per-session transaction coordination
//!
//! Each session owns at most one active transaction. The slot goes
//! `NoTransaction -> Active -> NoTransaction`; a finished transaction is
//! never reused, a fresh one is opened on next need. Commit and rollback
//! against an empty slot are no-ops, not errors.

use crate::error::Result;
use crate::processor::{QueryProcessor, TransactionHandle};

#[derive(Default)]
pub struct TransactionCoordinator {
    current: Option<Box<dyn TransactionHandle>>,
}

impl TransactionCoordinator {
    pub fn new() -> Self {
        TransactionCoordinator { current: None }
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    /// Reuse the active transaction or open a new one via the processor.
    pub fn get_or_create(
        &mut self,
        processor: &dyn QueryProcessor,
    ) -> Result<&mut dyn TransactionHandle> {
        if self.current.is_none() {
            self.current = Some(processor.begin()?);
        }
        Ok(self.current.as_mut().unwrap().as_mut())
    }

    /// Commit the active transaction, if any. The handle is discarded even
    /// when the commit itself fails; the failure surfaces to the caller.
    pub fn commit(&mut self) -> Result<()> {
        match self.current.take() {
            Some(mut txn) => txn.commit(),
            None => Ok(()),
        }
    }

    /// Roll back the active transaction, if any.
    pub fn rollback(&mut self) -> Result<()> {
        match self.current.take() {
            Some(mut txn) => txn.rollback(),
            None => Ok(()),
        }
    }

    /// Auto-commit policy hook: behaves like `commit` when the session has
    /// auto-commit enabled, otherwise leaves the transaction active.
    pub fn commit_if_auto(&mut self, auto_commit: bool) -> Result<()> {
        if auto_commit {
            self.commit()
        } else {
            Ok(())
        }
    }
}
