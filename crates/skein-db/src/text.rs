//! Collaborative text.

use crate::error::Result;
use crate::sequence;
use crate::transaction::{ReadTxn, Transaction};
use skein_core::{BranchId, Content};

/// Handle to a root text type. Lengths and indices count chars.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextRef {
    branch: BranchId,
}

impl TextRef {
    pub(crate) fn new(branch: BranchId) -> Self {
        Self { branch }
    }

    pub fn len<T: ReadTxn>(&self, txn: &T) -> usize {
        sequence::len(txn.store(), self.branch)
    }

    pub fn is_empty<T: ReadTxn>(&self, txn: &T) -> bool {
        self.len(txn) == 0
    }

    pub fn get_string<T: ReadTxn>(&self, txn: &T) -> String {
        let mut out = String::new();
        for item in sequence::visible_items(txn.store(), self.branch) {
            if let Content::String(s) = &item.content {
                out.push_str(s);
            }
        }
        out
    }

    /// Insert `text` before the char at `index`.
    pub fn insert(&self, txn: &mut Transaction<'_>, index: usize, text: &str) -> Result<()> {
        txn.mutate(|store, log| {
            sequence::insert(store, log, self.branch, index, Content::String(text.to_owned()))
        })
    }

    /// Append `text` at the end.
    pub fn push(&self, txn: &mut Transaction<'_>, text: &str) -> Result<()> {
        let index = self.len(txn);
        self.insert(txn, index, text)
    }

    /// Remove `len` chars starting at `index`.
    pub fn remove_range(&self, txn: &mut Transaction<'_>, index: usize, len: usize) -> Result<()> {
        txn.mutate(|store, log| sequence::remove_range(store, log, self.branch, index, len))
    }
}

#[cfg(test)]
mod tests {
    use crate::{DbError, Document, ReadTxn};

    #[test]
    fn test_insert_and_remove() {
        let mut doc = Document::with_client_id(1);
        let text = doc.get_or_insert_text("t").unwrap();
        {
            let mut txn = doc.transact();
            text.insert(&mut txn, 0, "hello").unwrap();
            text.insert(&mut txn, 5, " world").unwrap();
            text.remove_range(&mut txn, 0, 1).unwrap();
            text.insert(&mut txn, 0, "H").unwrap();
        }
        assert_eq!(text.get_string(&doc), "Hello world");
        assert_eq!(text.len(&doc), 11);
    }

    #[test]
    fn test_multibyte_chars_count_once() {
        let mut doc = Document::with_client_id(1);
        let text = doc.get_or_insert_text("t").unwrap();
        let mut txn = doc.transact();
        text.push(&mut txn, "añb").unwrap();
        text.insert(&mut txn, 2, "é").unwrap();
        assert_eq!(text.len(&txn), 4);
        assert_eq!(text.get_string(&txn), "añéb");
    }

    #[test]
    fn test_out_of_bounds_leaves_text_untouched() {
        let mut doc = Document::with_client_id(1);
        let text = doc.get_or_insert_text("t").unwrap();
        let mut txn = doc.transact();
        text.push(&mut txn, "abc").unwrap();
        assert_eq!(
            text.insert(&mut txn, 4, "x"),
            Err(DbError::IndexOutOfBounds { index: 4, length: 3 })
        );
        assert!(text.remove_range(&mut txn, 2, 2).is_err());
        assert_eq!(text.get_string(&txn), "abc");
    }

    #[test]
    fn test_typing_merges_items() {
        let mut doc = Document::with_client_id(1);
        let text = doc.get_or_insert_text("t").unwrap();
        for (i, ch) in ["a", "b", "c"].into_iter().enumerate() {
            let mut txn = doc.transact();
            text.insert(&mut txn, i, ch).unwrap();
        }
        assert_eq!(doc.store().blocks.client_ptrs(1).len(), 1);
        assert_eq!(text.get_string(&doc), "abc");
    }

    #[test]
    fn test_type_mismatch() {
        let mut doc = Document::with_client_id(1);
        doc.get_or_insert_text("t").unwrap();
        assert!(matches!(
            doc.get_or_insert_map("t"),
            Err(DbError::TypeMismatch { .. })
        ));
    }
}
