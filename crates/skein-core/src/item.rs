//! Operation records.

use crate::branch::BranchId;
use crate::content::Content;
use crate::id::ID;
use crate::state_vector::StateVector;
use std::sync::Arc;

/// Index of an item in the store's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemPtr(pub(crate) usize);

/// An integrated run of `len` elements created by one client at consecutive
/// clocks.
#[derive(Clone, Debug)]
pub struct Item {
    pub id: ID,
    pub len: u64,
    /// Current left neighbour in the parent's sequence (or key chain).
    pub left: Option<ItemPtr>,
    pub right: Option<ItemPtr>,
    /// Id of the element to the left at creation time.
    pub origin: Option<ID>,
    /// Id of the element to the right at creation time.
    pub right_origin: Option<ID>,
    pub parent: BranchId,
    /// Map key, for entries of a map.
    pub parent_sub: Option<Arc<str>>,
    pub content: Content,
    pub deleted: bool,
}

impl Item {
    /// Id of the last element in the run.
    pub fn last_id(&self) -> ID {
        ID::new(self.id.client, self.id.clock + self.len - 1)
    }

    /// Clock one past the last element.
    pub fn end(&self) -> u64 {
        self.id.clock + self.len
    }

    pub fn contains(&self, id: &ID) -> bool {
        id.client == self.id.client && id.clock >= self.id.clock && id.clock < self.end()
    }

    /// Visible elements count towards the parent's length.
    pub fn is_visible(&self) -> bool {
        !self.deleted && self.content.is_countable()
    }
}

/// A decoded item that has not been integrated yet.
///
/// `parent` and `parent_sub` are only present when the record carries no
/// origins; otherwise they are inherited from the resolved neighbour.
#[derive(Clone, Debug, PartialEq)]
pub struct ItemRecord {
    pub id: ID,
    pub len: u64,
    pub origin: Option<ID>,
    pub right_origin: Option<ID>,
    pub parent: Option<Arc<str>>,
    pub parent_sub: Option<Arc<str>>,
    pub content: Content,
}

impl ItemRecord {
    pub fn end(&self) -> u64 {
        self.id.clock + self.len
    }

    /// First neighbour id this record needs that `state` does not cover yet.
    ///
    /// When integrating from `offset > 0` the left neighbour is the record's
    /// own preceding element, which is known by construction.
    pub fn missing_dependency(&self, state: &StateVector, offset: u64) -> Option<ID> {
        let origin = if offset > 0 { None } else { self.origin };
        origin
            .into_iter()
            .chain(self.right_origin)
            .find(|dep| !state.contains(dep))
    }
}
