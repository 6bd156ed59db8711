//! Records and deletions that arrived before their dependencies.

use crate::delete_set::DeleteSet;
use crate::id::ClientId;
use crate::item::ItemRecord;
use crate::lattice::Lattice;
use crate::state_vector::StateVector;
use crate::store::{ChangeLog, Store};
use std::collections::BTreeMap;
use tracing::{debug, trace};

#[derive(Clone, Debug, Default)]
pub struct Pending {
    queues: BTreeMap<ClientId, BTreeMap<u64, ItemRecord>>,
    delete_set: DeleteSet,
}

impl Pending {
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty() && self.delete_set.is_empty()
    }

    /// Number of buffered item records.
    pub fn len(&self) -> usize {
        self.queues.values().map(BTreeMap::len).sum()
    }

    /// Buffer a record. Of two records starting at the same clock the
    /// longer one is kept.
    pub fn push(&mut self, record: ItemRecord) {
        let queue = self.queues.entry(record.id.client).or_default();
        match queue.get(&record.id.clock) {
            Some(existing) if existing.len >= record.len => {}
            _ => {
                queue.insert(record.id.clock, record);
            }
        }
    }

    pub fn push_deletes(&mut self, ds: &DeleteSet) {
        self.delete_set.join_assign(ds);
    }

    pub fn delete_set(&self) -> &DeleteSet {
        &self.delete_set
    }

    /// Per client with a clock gap, the clock this buffer is waiting for.
    pub fn missing(&self, state: &StateVector) -> BTreeMap<ClientId, u64> {
        self.queues
            .iter()
            .filter_map(|(client, queue)| {
                let (clock, _) = queue.first_key_value()?;
                let expected = state.get(*client);
                (*clock > expected).then_some((*client, expected))
            })
            .collect()
    }
}

enum Step {
    Drop,
    Stall,
    Integrate(u64),
}

impl Store {
    /// Integrate every buffered record whose dependencies are now known.
    ///
    /// Passes repeat until one makes no progress, since integrating one
    /// client's record can unblock another's. Returns the number of records
    /// integrated.
    pub fn integrate_pending(&mut self, log: &mut ChangeLog) -> usize {
        let mut queues = std::mem::take(&mut self.pending.queues);
        let mut integrated = 0;
        loop {
            let mut progressed = false;
            for (client, queue) in queues.iter_mut() {
                while let Some(entry) = queue.first_entry() {
                    let record = entry.get();
                    let state = self.blocks.state(*client);
                    let step = if record.end() <= state {
                        Step::Drop
                    } else if record.id.clock > state {
                        Step::Stall
                    } else {
                        let offset = state - record.id.clock;
                        let known = self.state_vector();
                        match record.missing_dependency(&known, offset) {
                            Some(dep) => {
                                trace!(
                                    id = %record.id,
                                    missing = %dep,
                                    "record waits for dependency"
                                );
                                Step::Stall
                            }
                            None => Step::Integrate(offset),
                        }
                    };
                    match step {
                        Step::Drop => {
                            entry.remove();
                            progressed = true;
                        }
                        Step::Stall => break,
                        Step::Integrate(offset) => {
                            let record = entry.remove();
                            let id = record.id;
                            if self.integrate_record(record, offset, log).is_some() {
                                integrated += 1;
                            } else {
                                debug!(id = %id, "dropping record without a parent");
                            }
                            progressed = true;
                        }
                    }
                }
            }
            queues.retain(|_, queue| !queue.is_empty());
            if !progressed {
                break;
            }
        }
        self.pending.queues = queues;
        integrated
    }

    /// Retry buffered deletions against the current store.
    pub fn apply_pending_deletes(&mut self, log: &mut ChangeLog) {
        if self.pending.delete_set.is_empty() {
            return;
        }
        let ds = std::mem::take(&mut self.pending.delete_set);
        self.pending.delete_set = self.apply_delete_set(&ds, log);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Content;
    use crate::id::ID;

    fn record(client: u64, clock: u64, origin: Option<ID>, text: &str) -> ItemRecord {
        ItemRecord {
            id: ID::new(client, clock),
            len: text.chars().count() as u64,
            origin,
            right_origin: None,
            parent: origin.is_none().then(|| "text".into()),
            parent_sub: None,
            content: Content::String(text.into()),
        }
    }

    #[test]
    fn test_gap_stalls_until_filled() {
        let mut store = Store::new(1);
        let mut log = ChangeLog::default();
        store.pending.push(record(4, 2, Some(ID::new(4, 1)), "c"));
        assert_eq!(store.integrate_pending(&mut log), 0);
        assert_eq!(store.pending.len(), 1);
        assert_eq!(
            store.pending.missing(&store.state_vector()),
            BTreeMap::from([(4, 0)])
        );

        store.pending.push(record(4, 0, None, "ab"));
        assert_eq!(store.integrate_pending(&mut log), 2);
        assert!(store.pending.is_empty());
        assert_eq!(store.blocks.state(4), 3);
    }

    #[test]
    fn test_cross_client_dependency() {
        let mut store = Store::new(1);
        let mut log = ChangeLog::default();
        // client 2 builds on client 3, whose record shows up later
        store.pending.push(record(2, 0, Some(ID::new(3, 0)), "y"));
        assert_eq!(store.integrate_pending(&mut log), 0);

        store.pending.push(record(3, 0, None, "x"));
        assert_eq!(store.integrate_pending(&mut log), 2);
        assert_eq!(store.blocks.state(2), 1);
    }

    #[test]
    fn test_known_records_are_dropped() {
        let mut store = Store::new(1);
        let mut log = ChangeLog::default();
        store.pending.push(record(4, 0, None, "ab"));
        store.integrate_pending(&mut log);
        store.pending.push(record(4, 0, None, "ab"));
        assert_eq!(store.integrate_pending(&mut log), 0);
        assert!(store.pending.is_empty());
    }

    #[test]
    fn test_deletes_wait_for_items() {
        let mut store = Store::new(1);
        let mut log = ChangeLog::default();
        let mut ds = DeleteSet::new();
        ds.insert(ID::new(4, 1), 1);
        store.pending.push_deletes(&ds);
        store.apply_pending_deletes(&mut log);
        assert!(!store.pending.delete_set().is_empty());

        store.pending.push(record(4, 0, None, "abc"));
        store.integrate_pending(&mut log);
        store.apply_pending_deletes(&mut log);
        assert!(store.pending.is_empty());
        assert!(log.delete_set.contains(&ID::new(4, 1)));
        let branch = store.branches.get("text").unwrap();
        assert_eq!(store.branches.branch(branch).len, 2);
    }
}
