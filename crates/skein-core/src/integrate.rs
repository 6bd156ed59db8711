//! YATA integration.
//!
//! A new item is placed between its left neighbour (the item holding its
//! origin) and its right neighbour (the item holding its right origin). When
//! other items already sit in that gap, they were inserted concurrently, and
//! the scan below decides a position every replica agrees on:
//!
//! - an item with the same origin goes first if its client id is lower;
//!   one with the same origin *and* right origin and a higher client id
//!   ends the scan;
//! - an item whose origin lies inside the span scanned so far goes first,
//!   unless its origin is one of the items still in conflict;
//! - anything else ends the scan.

use crate::id::ID;
use crate::item::{Item, ItemPtr, ItemRecord};
use crate::store::{ChangeLog, Store};
use std::collections::HashSet;
use tracing::trace;

impl Store {
    /// Integrate a new item whose `left` and `right` are already resolved
    /// from its origins.
    pub fn integrate(&mut self, mut item: Item, log: &mut ChangeLog) -> ItemPtr {
        if self.needs_conflict_scan(&item) {
            item.left = self.resolve_conflicts(&item);
        }
        let id = item.id;
        let len = item.len;
        let left = item.left;
        let parent = item.parent;
        let sub = item.parent_sub.clone();
        let ptr = self.blocks.push(item);

        let right = match (left, &sub) {
            (Some(left), _) => {
                let left = self.blocks.get_mut(left);
                let right = left.right;
                left.right = Some(ptr);
                right
            }
            (None, Some(sub)) => {
                let mut right = self.branches.branch(parent).map.get(sub).copied();
                while let Some(r) = right {
                    match self.blocks.get(r).left {
                        Some(l) => right = Some(l),
                        None => break,
                    }
                }
                right
            }
            (None, None) => {
                let branch = self.branches.branch_mut(parent);
                branch.start.replace(ptr)
            }
        };
        self.blocks.get_mut(ptr).right = right;

        match (right, &sub) {
            (Some(right), _) => self.blocks.get_mut(right).left = Some(ptr),
            (None, Some(sub)) => {
                self.branches.branch_mut(parent).map.insert(sub.clone(), ptr);
                if let Some(left) = left {
                    // the previous value of this key is shadowed
                    self.delete_item(left, log);
                }
            }
            (None, None) => {}
        }

        let item = self.blocks.get_mut(ptr);
        if !item.content.is_countable() {
            item.deleted = true;
            log.delete_set.insert(id, len);
        } else if sub.is_none() {
            self.branches.branch_mut(parent).len += len;
        }
        log.touch(parent, sub.as_ref());
        log.integrated.push(ptr);

        if sub.is_some() && right.is_some() {
            // a concurrent entry for the same key already won
            self.delete_item(ptr, log);
        }
        trace!(id = %id, len, "integrated item");
        ptr
    }

    fn needs_conflict_scan(&self, item: &Item) -> bool {
        match (item.left, item.right) {
            (None, None) => true,
            (None, Some(right)) => self.blocks.get(right).left.is_some(),
            (Some(left), right) => self.blocks.get(left).right != right,
        }
    }

    /// Run the YATA scan and return the final left neighbour.
    fn resolve_conflicts(&self, item: &Item) -> Option<ItemPtr> {
        let mut left = item.left;
        let mut o = match (item.left, &item.parent_sub) {
            (Some(l), _) => self.blocks.get(l).right,
            (None, Some(sub)) => {
                let mut o = self.branches.branch(item.parent).map.get(sub).copied();
                while let Some(p) = o {
                    match self.blocks.get(p).left {
                        Some(l) => o = Some(l),
                        None => break,
                    }
                }
                o
            }
            (None, None) => self.branches.branch(item.parent).start,
        };

        let mut conflicting: HashSet<ItemPtr> = HashSet::new();
        let mut before_origin: HashSet<ItemPtr> = HashSet::new();

        while let Some(optr) = o {
            if Some(optr) == item.right {
                break;
            }
            before_origin.insert(optr);
            conflicting.insert(optr);
            let other = self.blocks.get(optr);
            if other.origin == item.origin {
                if other.id.client < item.id.client {
                    left = Some(optr);
                    conflicting.clear();
                } else if other.right_origin == item.right_origin {
                    break;
                }
            } else if let Some(origin_ptr) = other.origin.and_then(|id| self.blocks.find(&id)) {
                if before_origin.contains(&origin_ptr) {
                    if !conflicting.contains(&origin_ptr) {
                        left = Some(optr);
                        conflicting.clear();
                    }
                } else {
                    break;
                }
            } else {
                break;
            }
            o = other.right;
        }
        left
    }

    /// Integrate a decoded record starting at `offset` elements into it.
    ///
    /// The caller checks that both neighbours are known. Returns `None` for
    /// a record that names no parent and has no neighbour to inherit one
    /// from.
    pub fn integrate_record(
        &mut self,
        record: ItemRecord,
        offset: u64,
        log: &mut ChangeLog,
    ) -> Option<ItemPtr> {
        let ItemRecord {
            id,
            len,
            mut origin,
            right_origin,
            parent,
            parent_sub,
            mut content,
        } = record;
        let (id, len) = if offset > 0 {
            content = content.split_off(offset);
            origin = Some(ID::new(id.client, id.clock + offset - 1));
            (ID::new(id.client, id.clock + offset), len - offset)
        } else {
            (id, len)
        };

        let left = match origin {
            Some(origin) => Some(self.clean_end(&origin)?),
            None => None,
        };
        let right = match right_origin {
            Some(right_origin) => Some(self.clean_start(&right_origin)?),
            None => None,
        };
        let (parent, parent_sub) = match parent {
            Some(name) => (self.branches.get_or_insert(&name), parent_sub),
            None => {
                let anchor = self.blocks.get(left.or(right)?);
                (anchor.parent, anchor.parent_sub.clone())
            }
        };

        let item = Item {
            id,
            len,
            left,
            right,
            origin,
            right_origin,
            parent,
            parent_sub,
            content,
            deleted: false,
        };
        Some(self.integrate(item, log))
    }
}
