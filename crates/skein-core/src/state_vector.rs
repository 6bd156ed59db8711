//! State vector for compact causal context representation.
//!
//! A state vector summarizes everything a replica has integrated by tracking
//! the next expected clock of each client. Because every client's log is
//! gap-free, this is enough to compute exactly what another replica lacks.

use crate::id::{ClientId, ID};
use crate::lattice::Lattice;
use skein_codec::{Decoder, Encoder};
use std::collections::BTreeMap;

/// Map from client to the next clock expected from that client.
///
/// Clients that have produced nothing are absent; `get` reports 0 for them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateVector {
    entries: BTreeMap<ClientId, u64>,
}

impl StateVector {
    /// Create an empty state vector.
    pub fn new() -> Self {
        StateVector {
            entries: BTreeMap::new(),
        }
    }

    /// Create a state vector from entries; zero clocks are skipped.
    pub fn from_entries(entries: impl IntoIterator<Item = (ClientId, u64)>) -> Self {
        let mut sv = StateVector::new();
        for (client, clock) in entries {
            sv.set(client, clock);
        }
        sv
    }

    /// Get the next expected clock for a client.
    pub fn get(&self, client: ClientId) -> u64 {
        self.entries.get(&client).copied().unwrap_or(0)
    }

    /// Set the next expected clock for a client.
    pub fn set(&mut self, client: ClientId, clock: u64) {
        if clock > 0 {
            self.entries.insert(client, clock);
        } else {
            self.entries.remove(&client);
        }
    }

    /// True when the element `id` is covered by this vector.
    pub fn contains(&self, id: &ID) -> bool {
        id.clock < self.get(id.client)
    }

    /// Iterate over all entries in client order.
    pub fn iter(&self) -> impl Iterator<Item = (ClientId, u64)> + '_ {
        self.entries.iter().map(|(client, clock)| (*client, *clock))
    }

    /// Get the number of clients tracked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the state vector is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write `count, (client, clock)*`.
    pub fn encode(&self, encoder: &mut Encoder) {
        encoder.write_var_uint(self.entries.len() as u64);
        for (client, clock) in &self.entries {
            encoder.write_var_uint(*client);
            encoder.write_var_uint(*clock);
        }
    }

    pub fn decode(decoder: &mut Decoder<'_>) -> skein_codec::Result<Self> {
        let count = decoder.read_var_uint()?;
        let mut sv = StateVector::new();
        for _ in 0..count {
            let client = decoder.read_var_uint()?;
            let clock = decoder.read_var_uint()?;
            sv.set(client, clock);
        }
        Ok(sv)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        self.encode(&mut encoder);
        encoder.to_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> skein_codec::Result<Self> {
        Self::decode(&mut Decoder::new(bytes))
    }
}

/// Pointwise max.
impl Lattice for StateVector {
    fn bottom() -> Self {
        StateVector::new()
    }

    fn join_assign(&mut self, other: &Self) {
        for (client, &clock) in &other.entries {
            let current = self.entries.entry(*client).or_insert(0);
            *current = (*current).max(clock);
        }
    }
}

impl FromIterator<(ClientId, u64)> for StateVector {
    fn from_iter<I: IntoIterator<Item = (ClientId, u64)>>(iter: I) -> Self {
        StateVector::from_entries(iter)
    }
}
