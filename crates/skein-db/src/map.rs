//! Collaborative maps from string keys to primitive values.
//!
//! Every key owns a chain of entries; the rightmost entry is the current
//! value and earlier ones are tombstoned as they get shadowed.

use crate::error::Result;
use crate::transaction::{ReadTxn, Transaction};
use skein_core::{BranchId, Content, Item, Store, Value};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MapRef {
    branch: BranchId,
}

fn live_value(item: &Item) -> Option<Value> {
    if item.deleted {
        return None;
    }
    match &item.content {
        Content::Any(values) => values.last().cloned(),
        _ => None,
    }
}

impl MapRef {
    pub(crate) fn new(branch: BranchId) -> Self {
        Self { branch }
    }

    fn entries<'a>(&self, store: &'a Store) -> impl Iterator<Item = (&'a str, Value)> + 'a {
        store
            .branches
            .branch(self.branch)
            .map
            .iter()
            .filter_map(move |(key, ptr)| Some((key.as_ref(), live_value(store.blocks.get(*ptr))?)))
    }

    pub fn get<T: ReadTxn>(&self, txn: &T, key: &str) -> Option<Value> {
        let store = txn.store();
        let ptr = store.branches.branch(self.branch).map.get(key)?;
        live_value(store.blocks.get(*ptr))
    }

    pub fn contains_key<T: ReadTxn>(&self, txn: &T, key: &str) -> bool {
        self.get(txn, key).is_some()
    }

    /// Live keys in sorted order.
    pub fn keys<T: ReadTxn>(&self, txn: &T) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries(txn.store())
            .map(|(key, _)| key.to_string())
            .collect();
        keys.sort();
        keys
    }

    pub fn len<T: ReadTxn>(&self, txn: &T) -> usize {
        self.entries(txn.store()).count()
    }

    pub fn is_empty<T: ReadTxn>(&self, txn: &T) -> bool {
        self.len(txn) == 0
    }

    pub fn to_json<T: ReadTxn>(&self, txn: &T) -> serde_json::Value {
        let map = self
            .entries(txn.store())
            .map(|(key, value)| (key.to_string(), value.to_json()))
            .collect();
        serde_json::Value::Object(map)
    }

    /// Set `key`, shadowing any previous value. Fails only on an aborted
    /// transaction.
    pub fn insert(
        &self,
        txn: &mut Transaction<'_>,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        let value = value.into();
        txn.mutate(|store, log| {
            let left = store.branches.branch(self.branch).map.get(key).copied();
            let item = Item {
                id: store.next_id(),
                len: 1,
                left,
                right: None,
                origin: left.map(|ptr| store.blocks.get(ptr).last_id()),
                right_origin: None,
                parent: self.branch,
                parent_sub: Some(Arc::from(key)),
                content: Content::Any(vec![value]),
                deleted: false,
            };
            store.integrate(item, log);
            Ok(())
        })
    }

    /// Remove `key`, returning its previous value.
    pub fn remove(&self, txn: &mut Transaction<'_>, key: &str) -> Result<Option<Value>> {
        txn.mutate(|store, log| {
            let Some(&ptr) = store.branches.branch(self.branch).map.get(key) else {
                return Ok(None);
            };
            let Some(previous) = live_value(store.blocks.get(ptr)) else {
                return Ok(None);
            };
            store.delete_item(ptr, log);
            Ok(Some(previous))
        })
    }
}
