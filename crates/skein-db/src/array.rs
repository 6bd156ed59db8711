//! Collaborative arrays of primitive values.

use crate::error::Result;
use crate::sequence;
use crate::transaction::{ReadTxn, Transaction};
use skein_core::{BranchId, Content, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArrayRef {
    branch: BranchId,
}

impl ArrayRef {
    pub(crate) fn new(branch: BranchId) -> Self {
        Self { branch }
    }

    pub fn len<T: ReadTxn>(&self, txn: &T) -> usize {
        sequence::len(txn.store(), self.branch)
    }

    pub fn is_empty<T: ReadTxn>(&self, txn: &T) -> bool {
        self.len(txn) == 0
    }

    pub fn get<T: ReadTxn>(&self, txn: &T, index: usize) -> Option<Value> {
        let mut remaining = index;
        for item in sequence::visible_items(txn.store(), self.branch) {
            let Content::Any(values) = &item.content else {
                continue;
            };
            if remaining < values.len() {
                return Some(values[remaining].clone());
            }
            remaining -= values.len();
        }
        None
    }

    pub fn to_vec<T: ReadTxn>(&self, txn: &T) -> Vec<Value> {
        sequence::visible_items(txn.store(), self.branch)
            .filter_map(|item| match &item.content {
                Content::Any(values) => Some(values.iter().cloned()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn to_json<T: ReadTxn>(&self, txn: &T) -> serde_json::Value {
        serde_json::Value::Array(self.to_vec(txn).iter().map(Value::to_json).collect())
    }

    pub fn insert(
        &self,
        txn: &mut Transaction<'_>,
        index: usize,
        value: impl Into<Value>,
    ) -> Result<()> {
        self.insert_range(txn, index, [value.into()])
    }

    /// Insert several values as one item.
    pub fn insert_range(
        &self,
        txn: &mut Transaction<'_>,
        index: usize,
        values: impl IntoIterator<Item = Value>,
    ) -> Result<()> {
        let values: Vec<Value> = values.into_iter().collect();
        txn.mutate(|store, log| {
            sequence::insert(store, log, self.branch, index, Content::Any(values))
        })
    }

    pub fn push_back(&self, txn: &mut Transaction<'_>, value: impl Into<Value>) -> Result<()> {
        let index = self.len(txn);
        self.insert(txn, index, value)
    }

    pub fn remove_range(&self, txn: &mut Transaction<'_>, index: usize, len: usize) -> Result<()> {
        txn.mutate(|store, log| sequence::remove_range(store, log, self.branch, index, len))
    }
}

#[cfg(test)]
mod tests {
    use crate::Document;
    use skein_core::Value;

    #[test]
    fn test_insert_get_remove() {
        let mut doc = Document::with_client_id(1);
        let array = doc.get_or_insert_array("a").unwrap();
        {
            let mut txn = doc.transact();
            array
                .insert_range(&mut txn, 0, [Value::from(1), Value::from("two"), Value::Null])
                .unwrap();
            array.push_back(&mut txn, true).unwrap();
            array.remove_range(&mut txn, 1, 1).unwrap();
        }
        assert_eq!(array.len(&doc), 3);
        assert_eq!(array.get(&doc, 0), Some(Value::Int(1)));
        assert_eq!(array.get(&doc, 1), Some(Value::Null));
        assert_eq!(array.get(&doc, 3), None);
        assert_eq!(array.to_json(&doc), serde_json::json!([1, null, true]));
    }

    #[test]
    fn test_insert_in_the_middle_of_a_run() {
        let mut doc = Document::with_client_id(1);
        let array = doc.get_or_insert_array("a").unwrap();
        let mut txn = doc.transact();
        array
            .insert_range(&mut txn, 0, [Value::from(1), Value::from(3)])
            .unwrap();
        array.insert(&mut txn, 1, 2).unwrap();
        assert_eq!(
            array.to_vec(&txn),
            vec![Value::Int(1), Value::Int(2), Value::Int(3)]
        );
    }
}
