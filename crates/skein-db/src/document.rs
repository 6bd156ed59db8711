//! Documents: one replica of a set of named root types.

use crate::array::ArrayRef;
use crate::error::{DbError, Result};
use crate::event::{Origin, Subscription, TransactionEvent};
use crate::map::MapRef;
use crate::text::TextRef;
use crate::transaction::Transaction;
use crate::update::{encode_update, Update};
use rand::Rng;
use skein_codec::Decoder;
use skein_core::{BranchId, ClientId, DeleteSet, StateVector, Store, TypeKind, MAX_CLIENT_ID};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

pub struct Document {
    pub(crate) store: Store,
    pub(crate) subscribers: Vec<mpsc::UnboundedSender<Arc<TransactionEvent>>>,
}

impl Document {
    /// Create a document with a random client id.
    pub fn new() -> Self {
        let client_id = rand::thread_rng().gen_range(0..=MAX_CLIENT_ID);
        Self::with_client_id(client_id)
    }

    pub fn with_client_id(client_id: ClientId) -> Self {
        Self {
            store: Store::new(client_id),
            subscribers: Vec::new(),
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.store.client_id
    }

    pub fn get_or_insert_text(&mut self, name: &str) -> Result<TextRef> {
        self.claim(name, TypeKind::Text).map(TextRef::new)
    }

    pub fn get_or_insert_array(&mut self, name: &str) -> Result<ArrayRef> {
        self.claim(name, TypeKind::Array).map(ArrayRef::new)
    }

    pub fn get_or_insert_map(&mut self, name: &str) -> Result<MapRef> {
        self.claim(name, TypeKind::Map).map(MapRef::new)
    }

    fn claim(&mut self, name: &str, kind: TypeKind) -> Result<BranchId> {
        let id = self.store.branches.get_or_insert(name);
        let branch = self.store.branches.branch_mut(id);
        match branch.kind {
            TypeKind::Undefined => {
                branch.kind = kind;
                Ok(id)
            }
            found if found == kind => Ok(id),
            found => Err(DbError::TypeMismatch {
                name: name.to_string(),
                expected: kind,
                found,
            }),
        }
    }

    pub fn transact(&mut self) -> Transaction<'_> {
        Transaction::new(self, None)
    }

    pub fn transact_with(&mut self, origin: impl Into<Origin>) -> Transaction<'_> {
        Transaction::new(self, Some(origin.into()))
    }

    pub fn state_vector(&self) -> StateVector {
        self.store.state_vector()
    }

    pub fn encode_state_vector(&self) -> Vec<u8> {
        self.state_vector().to_bytes()
    }

    /// Everything `remote` has not seen, plus the full delete set.
    /// Pending records are never included.
    pub fn encode_state_as_update(&self, remote: &StateVector) -> Vec<u8> {
        encode_update(&self.store, remote, &self.store.delete_set)
    }

    /// Like [`Document::encode_state_as_update`], taking an encoded state
    /// vector.
    pub fn encode_diff(&self, remote_state_vector: &[u8]) -> Result<Vec<u8>> {
        let remote = StateVector::decode(&mut Decoder::new(remote_state_vector))?;
        Ok(self.encode_state_as_update(&remote))
    }

    /// Decode `update` completely, then integrate it in one transaction.
    /// A payload that fails to decode leaves the document untouched.
    pub fn apply_update(&mut self, update: &[u8], origin: Option<Origin>) -> Result<()> {
        let update = Update::decode(update)?;
        debug!(
            client = self.client_id(),
            clients = update.blocks.len(),
            deleted = update.delete_set.deleted_len(),
            "applying update"
        );
        let mut txn = Transaction::new(self, origin);
        txn.apply_update(update)?;
        txn.commit();
        Ok(())
    }

    /// Receive a [`TransactionEvent`] for every commit from now on.
    pub fn subscribe(&mut self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        Subscription::new(rx)
    }

    pub fn has_pending(&self) -> bool {
        !self.store.pending.is_empty()
    }

    /// Per client, the clock pending data is waiting for.
    pub fn missing(&self) -> BTreeMap<ClientId, u64> {
        self.store.pending.missing(&self.state_vector())
    }

    pub fn delete_set(&self) -> &DeleteSet {
        &self.store.delete_set
    }

    /// Snapshot of every declared root type.
    pub fn to_json(&self) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        for (id, branch) in self.store.branches.iter() {
            let value = match branch.kind {
                TypeKind::Text => serde_json::Value::String(TextRef::new(id).get_string(self)),
                TypeKind::Array => ArrayRef::new(id).to_json(self),
                TypeKind::Map => MapRef::new(id).to_json(self),
                TypeKind::Undefined => continue,
            };
            out.insert(branch.name.to_string(), value);
        }
        serde_json::Value::Object(out)
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("client_id", &self.client_id())
            .field("state_vector", &self.state_vector())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

