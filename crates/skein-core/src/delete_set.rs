//! Delete set: which element ids have been tombstoned.
//!
//! Per client, a sorted list of non-overlapping, non-adjacent clock ranges.
//! Tombstones are never removed, so the set only ever grows and forms a
//! join-semilattice under range union.

use crate::id::{ClientId, ID};
use crate::lattice::Lattice;
use skein_codec::{CodecError, Decoder, Encoder};
use std::collections::BTreeMap;

/// Half-open clock range `[clock, clock + len)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdRange {
    pub clock: u64,
    pub len: u64,
}

impl IdRange {
    pub fn new(clock: u64, len: u64) -> Self {
        Self { clock, len }
    }

    pub fn end(&self) -> u64 {
        self.clock + self.len
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeleteSet {
    clients: BTreeMap<ClientId, Vec<IdRange>>,
}

impl DeleteSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `len` elements starting at `id`, merging with overlapping or
    /// adjacent ranges.
    pub fn insert(&mut self, id: ID, len: u64) {
        if len == 0 {
            return;
        }
        let ranges = self.clients.entry(id.client).or_default();
        let mut start = id.clock;
        let mut end = id.clock + len;
        let first = ranges.partition_point(|r| r.end() < start);
        let mut last = first;
        while last < ranges.len() && ranges[last].clock <= end {
            start = start.min(ranges[last].clock);
            end = end.max(ranges[last].end());
            last += 1;
        }
        ranges.splice(first..last, [IdRange::new(start, end - start)]);
    }

    pub fn contains(&self, id: &ID) -> bool {
        self.clients.get(&id.client).is_some_and(|ranges| {
            let idx = ranges.partition_point(|r| r.end() <= id.clock);
            idx < ranges.len() && ranges[idx].clock <= id.clock
        })
    }

    /// Sorted ranges of one client.
    pub fn ranges(&self, client: ClientId) -> &[IdRange] {
        self.clients.get(&client).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (ClientId, &[IdRange])> + '_ {
        self.clients
            .iter()
            .map(|(client, ranges)| (*client, ranges.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.clients.values().all(Vec::is_empty)
    }

    /// Total number of deleted elements, saturating.
    pub fn deleted_len(&self) -> u64 {
        self.clients
            .values()
            .flatten()
            .fold(0, |total: u64, range| total.saturating_add(range.len))
    }

    /// Write `clientCount`, then per client `client, rangeCount, (clock, len)*`.
    pub fn encode(&self, encoder: &mut Encoder) {
        let clients: Vec<_> = self.iter().filter(|(_, r)| !r.is_empty()).collect();
        encoder.write_var_uint(clients.len() as u64);
        for (client, ranges) in clients {
            encoder.write_var_uint(client);
            encoder.write_var_uint(ranges.len() as u64);
            for range in ranges {
                encoder.write_var_uint(range.clock);
                encoder.write_var_uint(range.len);
            }
        }
    }

    pub fn decode(decoder: &mut Decoder<'_>) -> skein_codec::Result<Self> {
        let mut ds = DeleteSet::new();
        let client_count = decoder.read_var_uint()?;
        for _ in 0..client_count {
            let client = decoder.read_var_uint()?;
            let range_count = decoder.read_var_uint()?;
            for _ in 0..range_count {
                let clock = decoder.read_var_uint()?;
                let len = decoder.read_var_uint()?;
                if clock.checked_add(len).is_none() {
                    return Err(CodecError::ClockOverflow);
                }
                ds.insert(ID::new(client, clock), len);
            }
        }
        Ok(ds)
    }
}

/// Range union.
impl Lattice for DeleteSet {
    fn bottom() -> Self {
        DeleteSet::new()
    }

    fn join_assign(&mut self, other: &Self) {
        for (client, ranges) in other.iter() {
            for range in ranges {
                self.insert(ID::new(client, range.clock), range.len);
            }
        }
    }
}
