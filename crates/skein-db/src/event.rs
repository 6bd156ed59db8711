//! Change events delivered to subscribers after every commit.
//!
//! Sequence types describe their change as a delta over the previous
//! content: walk it left to right, keeping `Retain(n)` elements, adding
//! `Insert` chunks and dropping `Delete(n)` elements. Maps report one
//! [`EntryChange`] per touched key.

use skein_core::{Branch, ChangeLog, Content, Item, StateVector, Store, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Tag attached to a transaction so observers can tell where it came from.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Origin(Arc<str>);

impl Origin {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Origin {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Origin {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Chunk {
    Text(String),
    Values(Vec<Value>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Delta {
    Retain(u64),
    Insert(Chunk),
    Delete(u64),
}

#[derive(Clone, Debug, PartialEq)]
pub enum EntryChange {
    Inserted(Value),
    Updated(Value, Value),
    Removed(Value),
}

/// Changes to one root type.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeEvent {
    pub name: Arc<str>,
    pub delta: Vec<Delta>,
    pub keys: BTreeMap<String, EntryChange>,
}

/// Everything one committed transaction changed.
#[derive(Clone, Debug)]
pub struct TransactionEvent {
    pub origin: Option<Origin>,
    pub changes: Vec<TypeEvent>,
    /// Encoded update holding exactly this transaction's items and deletions.
    pub update: Vec<u8>,
}

impl TransactionEvent {
    pub fn change_for(&self, name: &str) -> Option<&TypeEvent> {
        self.changes.iter().find(|change| &*change.name == name)
    }

    pub fn has_origin(&self, origin: &Origin) -> bool {
        self.origin.as_ref() == Some(origin)
    }
}

/// Receiving end of a document subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<Arc<TransactionEvent>>,
}

impl Subscription {
    pub(crate) fn new(receiver: mpsc::UnboundedReceiver<Arc<TransactionEvent>>) -> Self {
        Self { receiver }
    }

    /// Wait for the next committed transaction.
    pub async fn recv(&mut self) -> Option<Arc<TransactionEvent>> {
        self.receiver.recv().await
    }

    /// Take the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<Arc<TransactionEvent>> {
        self.receiver.try_recv().ok()
    }

    pub fn into_inner(self) -> mpsc::UnboundedReceiver<Arc<TransactionEvent>> {
        self.receiver
    }
}

/// Apply a text delta to the content it was computed against.
pub fn apply_text_delta(previous: &str, delta: &[Delta]) -> String {
    let mut out = String::with_capacity(previous.len());
    let mut rest = previous.chars();
    for op in delta {
        match op {
            Delta::Retain(n) => out.extend(rest.by_ref().take(*n as usize)),
            Delta::Delete(n) => {
                rest.by_ref().take(*n as usize).for_each(drop);
            }
            Delta::Insert(Chunk::Text(text)) => out.push_str(text),
            Delta::Insert(Chunk::Values(_)) => {}
        }
    }
    out.extend(rest);
    out
}

struct EventBuilder<'a> {
    store: &'a Store,
    before: &'a StateVector,
    log: &'a ChangeLog,
}

impl EventBuilder<'_> {
    fn adds(&self, item: &Item) -> bool {
        item.id.clock >= self.before.get(item.id.client)
    }

    fn deletes(&self, item: &Item) -> bool {
        self.log.delete_set.contains(&item.id)
    }

    fn sequence_delta(&self, branch: &Branch) -> Vec<Delta> {
        let mut delta: Vec<Delta> = Vec::new();
        let mut cur = branch.start;
        while let Some(ptr) = cur {
            let item = self.store.blocks.get(ptr);
            cur = item.right;
            if !item.content.is_countable() {
                continue;
            }
            if item.deleted {
                if self.deletes(item) && !self.adds(item) {
                    push_delete(&mut delta, item.len);
                }
            } else if self.adds(item) {
                push_insert(&mut delta, &item.content);
            } else {
                push_retain(&mut delta, item.len);
            }
        }
        if let Some(Delta::Retain(_)) = delta.last() {
            delta.pop();
        }
        delta
    }

    fn key_change(&self, branch: &Branch, key: &str) -> Option<EntryChange> {
        let item = self.store.blocks.get(*branch.map.get(key)?);
        if self.adds(item) {
            let mut prev = item.left.map(|p| self.store.blocks.get(p));
            while let Some(p) = prev.filter(|p| self.adds(p)) {
                prev = p.left.map(|l| self.store.blocks.get(l));
            }
            let prev = prev.filter(|p| self.deletes(p));
            match (self.deletes(item), prev) {
                (true, Some(prev)) => Some(EntryChange::Removed(last_value(prev))),
                (true, None) => None,
                (false, Some(prev)) => {
                    Some(EntryChange::Updated(last_value(prev), last_value(item)))
                }
                (false, None) => Some(EntryChange::Inserted(last_value(item))),
            }
        } else if self.deletes(item) {
            Some(EntryChange::Removed(last_value(item)))
        } else {
            None
        }
    }
}

/// Build one event per touched root type.
pub(crate) fn compute_changes(
    store: &Store,
    before: &StateVector,
    log: &ChangeLog,
) -> Vec<TypeEvent> {
    let builder = EventBuilder { store, before, log };
    let mut changes = Vec::new();
    for (branch_id, subs) in &log.changed {
        let branch = store.branches.branch(*branch_id);
        let mut event = TypeEvent {
            name: branch.name.clone(),
            delta: Vec::new(),
            keys: BTreeMap::new(),
        };
        if subs.contains(&None) {
            event.delta = builder.sequence_delta(branch);
        }
        for key in subs.iter().flatten() {
            if let Some(change) = builder.key_change(branch, key) {
                event.keys.insert(key.to_string(), change);
            }
        }
        if !event.delta.is_empty() || !event.keys.is_empty() {
            changes.push(event);
        }
    }
    changes
}

fn last_value(item: &Item) -> Value {
    match &item.content {
        Content::Any(values) => values.last().cloned().unwrap_or(Value::Null),
        Content::String(s) => Value::String(s.clone()),
        Content::Deleted(_) => Value::Null,
    }
}

fn push_retain(delta: &mut Vec<Delta>, n: u64) {
    match delta.last_mut() {
        Some(Delta::Retain(m)) => *m += n,
        _ => delta.push(Delta::Retain(n)),
    }
}

fn push_delete(delta: &mut Vec<Delta>, n: u64) {
    match delta.last_mut() {
        Some(Delta::Delete(m)) => *m += n,
        _ => delta.push(Delta::Delete(n)),
    }
}

fn push_insert(delta: &mut Vec<Delta>, content: &Content) {
    if let Some(Delta::Insert(chunk)) = delta.last_mut() {
        match (chunk, content) {
            (Chunk::Text(text), Content::String(s)) => return text.push_str(s),
            (Chunk::Values(values), Content::Any(vs)) => return values.extend(vs.iter().cloned()),
            _ => {}
        }
    }
    match content {
        Content::String(s) => delta.push(Delta::Insert(Chunk::Text(s.clone()))),
        Content::Any(vs) => delta.push(Delta::Insert(Chunk::Values(vs.clone()))),
        Content::Deleted(_) => {}
    }
}
