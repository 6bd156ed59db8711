//! Named root types and their item chains.

use crate::item::ItemPtr;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Index of a root type inside a document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BranchId(pub(crate) usize);

/// What a root type was declared as. Types first seen through a remote
/// update stay `Undefined` until a local handle claims them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeKind {
    Undefined,
    Text,
    Array,
    Map,
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeKind::Undefined => "undefined",
            TypeKind::Text => "text",
            TypeKind::Array => "array",
            TypeKind::Map => "map",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug)]
pub struct Branch {
    pub name: Arc<str>,
    pub kind: TypeKind,
    /// Leftmost item of the sequence part.
    pub start: Option<ItemPtr>,
    /// Rightmost (winning) item of each key chain.
    pub map: HashMap<Arc<str>, ItemPtr>,
    /// Number of visible sequence elements.
    pub len: u64,
}

impl Branch {
    fn new(name: Arc<str>) -> Self {
        Self {
            name,
            kind: TypeKind::Undefined,
            start: None,
            map: HashMap::new(),
            len: 0,
        }
    }
}

#[derive(Debug, Default)]
pub struct Branches {
    branches: Vec<Branch>,
    by_name: HashMap<Arc<str>, BranchId>,
}

impl Branches {
    pub fn get(&self, name: &str) -> Option<BranchId> {
        self.by_name.get(name).copied()
    }

    pub fn get_or_insert(&mut self, name: &str) -> BranchId {
        if let Some(id) = self.get(name) {
            return id;
        }
        let name: Arc<str> = Arc::from(name);
        let id = BranchId(self.branches.len());
        self.branches.push(Branch::new(name.clone()));
        self.by_name.insert(name, id);
        id
    }

    pub fn branch(&self, id: BranchId) -> &Branch {
        &self.branches[id.0]
    }

    pub fn branch_mut(&mut self, id: BranchId) -> &mut Branch {
        &mut self.branches[id.0]
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// Forget every root declared after the first `len`.
    pub fn truncate(&mut self, len: usize) {
        let len = len.min(self.branches.len());
        for branch in self.branches.drain(len..) {
            self.by_name.remove(&branch.name);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (BranchId, &Branch)> {
        self.branches
            .iter()
            .enumerate()
            .map(|(i, branch)| (BranchId(i), branch))
    }
}
