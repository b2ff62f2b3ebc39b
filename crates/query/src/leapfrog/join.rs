//! Multi-way leapfrog intersection
//!
//! The classic leapfrog loop over sorted iterators: keep the iterators
//! in a ring ordered by current value; while the minimum differs from
//! the maximum, seek the minimum up to the maximum. Every loop iteration
//! charges the query's iteration budget, so two sparse iterators that
//! never intersect fail with `max_iterations_exceeded` instead of
//! spinning.

use crate::leapfrog::trie::TrieIterator;
use crate::plan::QueryGuard;
use triad_core::Result;

/// A leapfrog intersection over iterators sharing one join variable.
pub struct LeapfrogJoin<'v> {
    iters: Vec<TrieIterator<'v>>,
    p: usize,
    current: Option<u64>,
    at_end: bool,
}

impl<'v> LeapfrogJoin<'v> {
    /// Initialise: sort by current value; any exhausted iterator makes
    /// the whole join exhausted. Call [`search`](Self::search) next.
    pub fn new(iters: Vec<TrieIterator<'v>>) -> LeapfrogJoin<'v> {
        let at_end = iters.is_empty() || iters.iter().any(|i| i.is_exhausted());
        let mut join = LeapfrogJoin {
            iters,
            p: 0,
            current: None,
            at_end,
        };
        if !join.at_end {
            join.iters
                .sort_by_key(|i| i.current().unwrap_or(u64::MAX));
        }
        join
    }

    /// The matched value, when positioned on one.
    pub fn current(&self) -> Option<u64> {
        self.current
    }

    /// Find the next value present in every iterator.
    pub fn search(&mut self, guard: &QueryGuard) -> Result<Option<u64>> {
        if self.at_end {
            return Ok(None);
        }
        let k = self.iters.len();
        loop {
            guard.tick()?;
            let max = match self.iters[(self.p + k - 1) % k].current() {
                Some(v) => v,
                None => return self.exhaust(),
            };
            let min = match self.iters[self.p].current() {
                Some(v) => v,
                None => return self.exhaust(),
            };
            if min == max {
                self.current = Some(min);
                return Ok(self.current);
            }
            self.iters[self.p].seek(max)?;
            if self.iters[self.p].is_exhausted() {
                return self.exhaust();
            }
            self.p = (self.p + 1) % k;
        }
    }

    /// Advance past the current match and search again.
    pub fn next(&mut self, guard: &QueryGuard) -> Result<Option<u64>> {
        if self.at_end {
            return Ok(None);
        }
        guard.tick()?;
        self.iters[self.p].next_value()?;
        if self.iters[self.p].is_exhausted() {
            return self.exhaust();
        }
        self.p = (self.p + 1) % self.iters.len();
        self.search(guard)
    }

    fn exhaust(&mut self) -> Result<Option<u64>> {
        self.at_end = true;
        self.current = None;
        Ok(None)
    }
}

impl std::fmt::Debug for LeapfrogJoin<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeapfrogJoin")
            .field("iterators", &self.iters.len())
            .field("current", &self.current)
            .field("at_end", &self.at_end)
            .finish()
    }
}
