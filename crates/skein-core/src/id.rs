//! Operation identifiers.

use std::fmt;

/// Replica identifier. Kept within 53 bits so it survives a round trip
/// through peers that store integers as IEEE doubles.
pub type ClientId = u64;

/// Largest client id a replica may pick.
pub const MAX_CLIENT_ID: ClientId = (1 << 53) - 1;

/// Globally unique identifier of one element of an item.
///
/// Content order is decided by integration, never by comparing ids; the
/// derived `Ord` only exists so ids can key ordered maps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ID {
    pub client: ClientId,
    pub clock: u64,
}

impl ID {
    pub fn new(client: ClientId, clock: u64) -> Self {
        Self { client, clock }
    }
}

impl fmt::Display for ID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.client, self.clock)
    }
}
