//! Positional operations shared by text and arrays.

use crate::error::{DbError, Result};
use skein_core::{BranchId, ChangeLog, Content, Item, ItemPtr, Store};

/// Items of a sequence from left to right, tombstones included.
pub(crate) fn items(store: &Store, branch: BranchId) -> impl Iterator<Item = &Item> + '_ {
    std::iter::successors(store.branches.branch(branch).start, move |ptr| {
        store.blocks.get(*ptr).right
    })
    .map(move |ptr| store.blocks.get(ptr))
}

pub(crate) fn visible_items(store: &Store, branch: BranchId) -> impl Iterator<Item = &Item> + '_ {
    items(store, branch).filter(|item| item.is_visible())
}

pub(crate) fn len(store: &Store, branch: BranchId) -> usize {
    store.branches.branch(branch).len as usize
}

/// Neighbours of visible position `index`, splitting an item if the
/// position falls inside it.
fn find_position(
    store: &mut Store,
    branch: BranchId,
    index: u64,
) -> (Option<ItemPtr>, Option<ItemPtr>) {
    let mut left = None;
    let mut right = store.branches.branch(branch).start;
    let mut remaining = index;
    while remaining > 0 {
        let Some(ptr) = right else {
            break;
        };
        let item = store.blocks.get(ptr);
        let (visible, len, next) = (item.is_visible(), item.len, item.right);
        if visible {
            if remaining < len {
                let split = store.split(ptr, remaining);
                return (Some(ptr), Some(split));
            }
            remaining -= len;
        }
        left = Some(ptr);
        right = next;
    }
    (left, right)
}

pub(crate) fn insert(
    store: &mut Store,
    log: &mut ChangeLog,
    branch: BranchId,
    index: usize,
    content: Content,
) -> Result<()> {
    let length = len(store, branch);
    if index > length {
        return Err(DbError::IndexOutOfBounds { index, length });
    }
    let len = content.len();
    if len == 0 {
        return Ok(());
    }
    let (left, right) = find_position(store, branch, index as u64);
    let item = Item {
        id: store.next_id(),
        len,
        left,
        right,
        origin: left.map(|ptr| store.blocks.get(ptr).last_id()),
        right_origin: right.map(|ptr| store.blocks.get(ptr).id),
        parent: branch,
        parent_sub: None,
        content,
        deleted: false,
    };
    store.integrate(item, log);
    Ok(())
}

pub(crate) fn remove_range(
    store: &mut Store,
    log: &mut ChangeLog,
    branch: BranchId,
    index: usize,
    count: usize,
) -> Result<()> {
    let length = len(store, branch);
    if index.checked_add(count).map_or(true, |end| end > length) {
        return Err(DbError::IndexOutOfBounds {
            index: index.saturating_add(count),
            length,
        });
    }
    let (_, mut cur) = find_position(store, branch, index as u64);
    let mut remaining = count as u64;
    while remaining > 0 {
        let Some(ptr) = cur else {
            break;
        };
        let item = store.blocks.get(ptr);
        if item.is_visible() {
            if remaining < item.len {
                store.split(ptr, remaining);
            }
            let len = store.blocks.get(ptr).len;
            store.delete_item(ptr, log);
            remaining -= len;
        }
        cur = store.blocks.get(ptr).right;
    }
    Ok(())
}
