//! Transactions: the only way to mutate a document.

use crate::document::Document;
use crate::error::{DbError, Result};
use crate::event::{compute_changes, Origin, TransactionEvent};
use crate::update::{encode_update, Update};
use skein_core::{ChangeLog, Lattice, Pending, StateVector, Store};
use std::sync::Arc;
use tracing::{debug, trace};

/// Read access shared by documents and open transactions.
pub trait ReadTxn {
    fn store(&self) -> &Store;

    fn state_vector(&self) -> StateVector {
        self.store().state_vector()
    }
}

impl ReadTxn for Document {
    fn store(&self) -> &Store {
        &self.store
    }
}

/// An open mutation scope over a document.
///
/// Committing (explicitly or by dropping) merges the transaction's deletions
/// into the document, computes change events, merges adjacent items and
/// notifies subscribers with the encoded update of this transaction alone.
///
/// A mutation that fails aborts the transaction: everything it did so far
/// is rolled back, later mutations are refused and nothing is emitted.
pub struct Transaction<'doc> {
    doc: &'doc mut Document,
    origin: Option<Origin>,
    before_state: StateVector,
    log: ChangeLog,
    roots: usize,
    pending: Option<Pending>,
    aborted: bool,
}

impl<'doc> Transaction<'doc> {
    pub(crate) fn new(doc: &'doc mut Document, origin: Option<Origin>) -> Self {
        let before_state = doc.store.state_vector();
        let roots = doc.store.branches.len();
        Self {
            doc,
            origin,
            before_state,
            log: ChangeLog::default(),
            roots,
            pending: None,
            aborted: false,
        }
    }

    pub fn origin(&self) -> Option<&Origin> {
        self.origin.as_ref()
    }

    /// State vector of the document when the transaction was opened.
    pub fn before_state(&self) -> &StateVector {
        &self.before_state
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Run one mutation against the store. An error aborts the transaction.
    pub(crate) fn mutate<T>(
        &mut self,
        op: impl FnOnce(&mut Store, &mut ChangeLog) -> Result<T>,
    ) -> Result<T> {
        if self.aborted {
            return Err(DbError::TransactionAborted);
        }
        let result = op(&mut self.doc.store, &mut self.log);
        if let Err(err) = &result {
            self.abort(err);
        }
        result
    }

    fn abort(&mut self, cause: &DbError) {
        let log = std::mem::take(&mut self.log);
        let store = &mut self.doc.store;
        store.rollback(&self.before_state, &log);
        store.branches.truncate(self.roots);
        if let Some(pending) = self.pending.take() {
            store.pending = pending;
        }
        self.aborted = true;
        debug!(
            error = %cause,
            undone = log.integrated.len(),
            "transaction aborted"
        );
    }

    /// Integrate a decoded update. Records whose dependencies are missing
    /// stay pending until a later update supplies them.
    pub fn apply_update(&mut self, update: Update) -> Result<()> {
        if self.aborted {
            return Err(DbError::TransactionAborted);
        }
        let Update {
            blocks,
            delete_set,
        } = update;
        let store = &mut self.doc.store;
        let log = &mut self.log;
        if self.pending.is_none() {
            self.pending = Some(store.pending.clone());
        }
        for record in blocks.into_values().flatten() {
            store.pending.push(record);
        }
        let integrated = store.integrate_pending(log);
        store.apply_pending_deletes(log);
        let unapplied = store.apply_delete_set(&delete_set, log);
        store.pending.push_deletes(&unapplied);
        trace!(integrated, "applied update");
        if !store.pending.is_empty() {
            debug!(
                records = store.pending.len(),
                missing = ?store.pending.missing(&store.state_vector()),
                "update left data pending"
            );
        }
        Ok(())
    }

    /// Commit now. Dropping the transaction has the same effect.
    pub fn commit(self) {}

    fn finish(&mut self) {
        if self.aborted || self.log.is_empty() {
            return;
        }
        let log = std::mem::take(&mut self.log);
        let store = &mut self.doc.store;
        store.delete_set.join_assign(&log.delete_set);

        let changes = compute_changes(store, &self.before_state, &log);
        let update = encode_update(store, &self.before_state, &log.delete_set);
        for ptr in log.integrated.iter().rev() {
            store.try_merge_with_left(*ptr);
        }

        let event = Arc::new(TransactionEvent {
            origin: self.origin.clone(),
            changes,
            update,
        });
        let before = self.doc.subscribers.len();
        self.doc
            .subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
        trace!(
            origin = ?self.origin,
            delivered = self.doc.subscribers.len(),
            dropped = before - self.doc.subscribers.len(),
            "transaction committed"
        );
    }
}

impl ReadTxn for Transaction<'_> {
    fn store(&self) -> &Store {
        &self.doc.store
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}
