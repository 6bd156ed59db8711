//! Merging replica summaries.
//!
//! State vectors and delete sets travel between replicas in no particular
//! order and may arrive more than once. Both merge as join-semilattices, so
//! the result only depends on which values were merged, never on how often
//! or in what sequence.

/// A join-semilattice with an in-place join.
pub trait Lattice: Clone {
    /// The value that leaves anything it is joined with unchanged.
    fn bottom() -> Self;

    /// `self = self ⊔ other`.
    fn join_assign(&mut self, other: &Self);

    fn join(&self, other: &Self) -> Self {
        let mut joined = self.clone();
        joined.join_assign(other);
        joined
    }

    /// Least upper bound of all `values`; [`Lattice::bottom`] when empty.
    fn join_all<'a>(values: impl IntoIterator<Item = &'a Self>) -> Self
    where
        Self: 'a,
    {
        values.into_iter().fold(Self::bottom(), |mut acc, value| {
            acc.join_assign(value);
            acc
        })
    }
}
