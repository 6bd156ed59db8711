//! Struct store: every integrated item, addressable by id.
//!
//! Items live in an arena and are referenced by [`ItemPtr`]. Each client
//! additionally keeps a clock-ordered list of its items; the list is gap-free
//! from clock 0, so the end of its last item is the client's state.

use crate::branch::{BranchId, Branches};
use crate::content::Content;
use crate::delete_set::DeleteSet;
use crate::id::{ClientId, ID};
use crate::item::{Item, ItemPtr};
use crate::pending::Pending;
use crate::state_vector::StateVector;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct BlockStore {
    items: Vec<Item>,
    clients: HashMap<ClientId, Vec<ItemPtr>>,
}

impl BlockStore {
    pub fn get(&self, ptr: ItemPtr) -> &Item {
        &self.items[ptr.0]
    }

    pub fn get_mut(&mut self, ptr: ItemPtr) -> &mut Item {
        &mut self.items[ptr.0]
    }

    /// Next clock expected from `client`.
    pub fn state(&self, client: ClientId) -> u64 {
        self.clients
            .get(&client)
            .and_then(|ptrs| ptrs.last())
            .map_or(0, |ptr| self.get(*ptr).end())
    }

    pub fn state_vector(&self) -> StateVector {
        self.clients
            .keys()
            .map(|client| (*client, self.state(*client)))
            .collect()
    }

    pub fn clients(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.clients.keys().copied()
    }

    pub fn client_ptrs(&self, client: ClientId) -> &[ItemPtr] {
        self.clients.get(&client).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Items of one client in clock order.
    pub fn items(&self, client: ClientId) -> impl Iterator<Item = &Item> + '_ {
        self.client_ptrs(client).iter().map(|ptr| self.get(*ptr))
    }

    /// Position in the client list of the item containing `clock`.
    pub fn find_index(&self, client: ClientId, clock: u64) -> Option<usize> {
        let ptrs = self.clients.get(&client)?;
        let idx = ptrs.partition_point(|ptr| self.get(*ptr).end() <= clock);
        (idx < ptrs.len() && self.get(ptrs[idx]).id.clock <= clock).then_some(idx)
    }

    /// Item containing `id`; `None` means the id is not integrated yet.
    pub fn find(&self, id: &ID) -> Option<ItemPtr> {
        let idx = self.find_index(id.client, id.clock)?;
        Some(self.client_ptrs(id.client)[idx])
    }

    /// Append an item at the end of its client's log.
    pub fn push(&mut self, item: Item) -> ItemPtr {
        debug_assert_eq!(
            item.id.clock,
            self.state(item.id.client),
            "clock gap while pushing {}",
            item.id
        );
        let client = item.id.client;
        let ptr = ItemPtr(self.items.len());
        self.items.push(item);
        self.clients.entry(client).or_default().push(ptr);
        ptr
    }

    fn insert_at(&mut self, index: usize, item: Item) -> ItemPtr {
        let client = item.id.client;
        let ptr = ItemPtr(self.items.len());
        self.items.push(item);
        self.clients.entry(client).or_default().insert(index, ptr);
        ptr
    }

    fn remove_at(&mut self, client: ClientId, index: usize) {
        if let Some(ptrs) = self.clients.get_mut(&client) {
            ptrs.remove(index);
        }
    }

    /// Detach every item of `client` starting at or after `clock` from its
    /// log. Arena slots are not reclaimed.
    fn split_off(&mut self, client: ClientId, clock: u64) -> Vec<ItemPtr> {
        let items = &self.items;
        let Some(ptrs) = self.clients.get_mut(&client) else {
            return Vec::new();
        };
        let index = ptrs.partition_point(|ptr| items[ptr.0].id.clock < clock);
        let removed = ptrs.split_off(index);
        if ptrs.is_empty() {
            self.clients.remove(&client);
        }
        removed
    }
}

/// Everything one transaction did, in terms of the store.
#[derive(Debug, Default)]
pub struct ChangeLog {
    /// Elements deleted by this transaction.
    pub delete_set: DeleteSet,
    /// Touched types; `None` stands for the sequence part, `Some(key)` for a
    /// map key.
    pub changed: BTreeMap<BranchId, BTreeSet<Option<Arc<str>>>>,
    /// Items integrated by this transaction, in integration order.
    pub integrated: Vec<ItemPtr>,
}

impl ChangeLog {
    pub fn touch(&mut self, branch: BranchId, sub: Option<&Arc<str>>) {
        self.changed.entry(branch).or_default().insert(sub.cloned());
    }

    pub fn is_empty(&self) -> bool {
        self.integrated.is_empty() && self.delete_set.is_empty()
    }
}

/// A replica's complete local state.
#[derive(Debug)]
pub struct Store {
    pub client_id: ClientId,
    pub blocks: BlockStore,
    pub branches: Branches,
    /// Every deletion this replica knows about.
    pub delete_set: DeleteSet,
    pub pending: Pending,
}

impl Store {
    pub fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            blocks: BlockStore::default(),
            branches: Branches::default(),
            delete_set: DeleteSet::new(),
            pending: Pending::default(),
        }
    }

    pub fn state_vector(&self) -> StateVector {
        self.blocks.state_vector()
    }

    /// Id the next local item will get.
    pub fn next_id(&self) -> ID {
        ID::new(self.client_id, self.blocks.state(self.client_id))
    }

    /// Split the item at `ptr` so it keeps `diff` elements; returns the new
    /// right half.
    pub fn split(&mut self, ptr: ItemPtr, diff: u64) -> ItemPtr {
        let left = self.blocks.get_mut(ptr);
        let client = left.id.client;
        let clock = left.id.clock;
        let content = left.content.split_off(diff);
        let right = Item {
            id: ID::new(client, clock + diff),
            len: left.len - diff,
            left: Some(ptr),
            right: left.right,
            origin: Some(ID::new(client, clock + diff - 1)),
            right_origin: left.right_origin,
            parent: left.parent,
            parent_sub: left.parent_sub.clone(),
            content,
            deleted: left.deleted,
        };
        left.len = diff;
        let next = right.right;
        let parent = right.parent;
        let sub = right.parent_sub.clone();

        let index = self
            .blocks
            .find_index(client, clock)
            .map_or(self.blocks.client_ptrs(client).len(), |i| i + 1);
        let right_ptr = self.blocks.insert_at(index, right);
        self.blocks.get_mut(ptr).right = Some(right_ptr);
        match next {
            Some(next) => self.blocks.get_mut(next).left = Some(right_ptr),
            None => {
                if let Some(sub) = sub {
                    self.branches.branch_mut(parent).map.insert(sub, right_ptr);
                }
            }
        }
        right_ptr
    }

    /// Make sure an item starts exactly at `id`; returns that item.
    pub fn clean_start(&mut self, id: &ID) -> Option<ItemPtr> {
        let ptr = self.blocks.find(id)?;
        let start = self.blocks.get(ptr).id.clock;
        if start < id.clock {
            Some(self.split(ptr, id.clock - start))
        } else {
            Some(ptr)
        }
    }

    /// Make sure an item ends exactly at `id`; returns that item.
    pub fn clean_end(&mut self, id: &ID) -> Option<ItemPtr> {
        let ptr = self.blocks.find(id)?;
        let item = self.blocks.get(ptr);
        if item.last_id().clock != id.clock {
            let diff = id.clock - item.id.clock + 1;
            self.split(ptr, diff);
        }
        Some(ptr)
    }

    /// Tombstone an item. Returns false if it already was.
    pub fn delete_item(&mut self, ptr: ItemPtr, log: &mut ChangeLog) -> bool {
        let item = self.blocks.get_mut(ptr);
        if item.deleted {
            return false;
        }
        item.deleted = true;
        let id = item.id;
        let len = item.len;
        let parent = item.parent;
        let sub = item.parent_sub.clone();
        if sub.is_none() && item.content.is_countable() {
            let branch = self.branches.branch_mut(parent);
            branch.len -= len;
        }
        log.delete_set.insert(id, len);
        log.touch(parent, sub.as_ref());
        true
    }

    /// Fold the item at `ptr` into its left neighbour when both were created
    /// in one go by the same client. Returns true if the item was absorbed.
    pub fn try_merge_with_left(&mut self, ptr: ItemPtr) -> bool {
        let item = self.blocks.get(ptr);
        let Some(left_ptr) = item.left else {
            return false;
        };
        let left = self.blocks.get(left_ptr);
        let mergeable = left.id.client == item.id.client
            && left.end() == item.id.clock
            && left.right == Some(ptr)
            && item.origin == Some(left.last_id())
            && left.right_origin == item.right_origin
            && left.deleted == item.deleted
            && left.parent == item.parent
            && left.parent_sub.is_none()
            && item.parent_sub.is_none()
            && left.content.is_mergeable_with(&item.content);
        if !mergeable {
            return false;
        }
        let client = item.id.client;
        let clock = item.id.clock;

        let item = self.blocks.get_mut(ptr);
        let content = std::mem::replace(&mut item.content, Content::Deleted(0));
        let len = item.len;
        let right = item.right;
        if let Err(content) = self.blocks.get_mut(left_ptr).content.try_merge(content) {
            self.blocks.get_mut(ptr).content = content;
            return false;
        }
        let left = self.blocks.get_mut(left_ptr);
        left.len += len;
        left.right = right;
        if let Some(right) = right {
            self.blocks.get_mut(right).left = Some(left_ptr);
        }
        // the grown left item now covers `clock`, the absorbed one follows it
        if let Some(index) = self.blocks.find_index(client, clock) {
            if self.blocks.client_ptrs(client).get(index + 1) == Some(&ptr) {
                self.blocks.remove_at(client, index + 1);
            }
        }
        true
    }

    /// Undo an uncommitted transaction that started at `before`: clear the
    /// tombstones it set on older items and unlink every item it added.
    /// Splits it made stay in place; they change neither content nor order.
    pub fn rollback(&mut self, before: &StateVector, log: &ChangeLog) {
        for (client, ranges) in log.delete_set.iter() {
            let limit = before.get(client);
            for range in ranges {
                let end = range.end().min(limit);
                let Some(mut index) = self.blocks.find_index(client, range.clock) else {
                    continue;
                };
                while let Some(&ptr) = self.blocks.client_ptrs(client).get(index) {
                    let item = self.blocks.get_mut(ptr);
                    if item.id.clock >= end {
                        break;
                    }
                    item.deleted = false;
                    if item.parent_sub.is_none() && item.content.is_countable() {
                        let (parent, len) = (item.parent, item.len);
                        self.branches.branch_mut(parent).len += len;
                    }
                    index += 1;
                }
            }
        }

        let clients: Vec<ClientId> = self.blocks.clients().collect();
        for client in clients {
            for ptr in self.blocks.split_off(client, before.get(client)) {
                self.unlink(ptr);
            }
        }
    }

    fn unlink(&mut self, ptr: ItemPtr) {
        let item = self.blocks.get(ptr);
        let (left, right, parent) = (item.left, item.right, item.parent);
        let sub = item.parent_sub.clone();
        let counted = item.is_visible() && sub.is_none();
        let len = item.len;

        match left {
            Some(left) => self.blocks.get_mut(left).right = right,
            None if sub.is_none() => self.branches.branch_mut(parent).start = right,
            None => {}
        }
        match (right, sub) {
            (Some(right), _) => self.blocks.get_mut(right).left = left,
            (None, Some(sub)) => {
                let map = &mut self.branches.branch_mut(parent).map;
                match left {
                    Some(left) => {
                        map.insert(sub, left);
                    }
                    None => {
                        map.remove(&sub);
                    }
                }
            }
            (None, None) => {}
        }
        if counted {
            self.branches.branch_mut(parent).len -= len;
        }
    }

    /// Apply remote deletions. Ranges this replica has not integrated yet
    /// are returned so they can wait in the pending buffer.
    pub fn apply_delete_set(&mut self, ds: &DeleteSet, log: &mut ChangeLog) -> DeleteSet {
        let mut unapplied = DeleteSet::new();
        for (client, ranges) in ds.iter() {
            let state = self.blocks.state(client);
            for range in ranges {
                if range.clock >= state {
                    unapplied.insert(ID::new(client, range.clock), range.len);
                    continue;
                }
                if range.end() > state {
                    unapplied.insert(ID::new(client, state), range.end() - state);
                }
                let end = range.end().min(state);
                let Some(mut index) = self.blocks.find_index(client, range.clock) else {
                    continue;
                };
                let first = self.blocks.client_ptrs(client)[index];
                let item = self.blocks.get(first);
                if !item.deleted && item.id.clock < range.clock {
                    let diff = range.clock - item.id.clock;
                    self.split(first, diff);
                    index += 1;
                }
                while let Some(&ptr) = self.blocks.client_ptrs(client).get(index) {
                    let item = self.blocks.get(ptr);
                    if item.id.clock >= end {
                        break;
                    }
                    if !item.deleted {
                        if item.end() > end {
                            let diff = end - item.id.clock;
                            self.split(ptr, diff);
                        }
                        self.delete_item(ptr, log);
                    }
                    index += 1;
                }
            }
        }
        unapplied
    }
}
