//! Trie iterators over the triple indices
//!
//! A triple index is a trie of depth three with 8-byte components. A
//! trie iterator walks the values of one level under a fixed prefix:
//! `current()` is the u64 at `key[8·level .. 8·level+8]`, `seek(t)`
//! repositions to the smallest key whose level value is ≥ `t` (given the
//! invariant below), and `next()` is `seek(current + 1)` with an
//! overflow check that exhausts at `u64::MAX`.
//!
//! Invariant: `prefix.len() ≤ 8·level`, a multiple of 8. When the prefix
//! is shorter than the level (a deliberately suboptimal access path),
//! the skipped components are zero-padded in seek targets; values are
//! then not globally sorted and the surrounding leapfrog re-seeks until
//! convergence, bounded by the iteration budget.

use triad_core::{Error, Result};
use triad_storage::{IndexKind, PrefixIter, ReadView};

const COMPONENT: usize = 8;
const KEY_LEN: usize = 24;

/// An iterator over the values of one trie level.
pub struct TrieIterator<'v> {
    iter: PrefixIter<'v>,
    prefix: Vec<u8>,
    level: usize,
    exhausted: bool,
}

impl<'v> TrieIterator<'v> {
    /// Open a trie iterator positioned at the first value.
    pub fn new(
        view: ReadView<'v>,
        index: IndexKind,
        prefix: Vec<u8>,
        level: usize,
    ) -> Result<TrieIterator<'v>> {
        if level > 2 {
            return Err(Error::internal(format!("trie level {level} out of range")));
        }
        if prefix.len() % COMPONENT != 0 || prefix.len() > COMPONENT * level {
            return Err(Error::internal(format!(
                "trie prefix of {} bytes invalid for level {level}",
                prefix.len()
            )));
        }
        let iter = view.prefix_iter(index.cf(), &prefix)?;
        let mut out = TrieIterator {
            iter,
            prefix,
            level,
            exhausted: false,
        };
        out.exhausted = out.iter.key().is_none();
        Ok(out)
    }

    /// The value at this level, or `None` when exhausted.
    pub fn current(&self) -> Option<u64> {
        if self.exhausted {
            return None;
        }
        let key = self.iter.key()?;
        if key.len() != KEY_LEN {
            return None;
        }
        let start = self.level * COMPONENT;
        let mut buf = [0u8; COMPONENT];
        buf.copy_from_slice(&key[start..start + COMPONENT]);
        Some(u64::from_be_bytes(buf))
    }

    /// True once no further values exist under the prefix.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Reposition at the smallest key ≥ `prefix ∥ pad ∥ target ∥ 0…`.
    /// Leaving the prefix exhausts the iterator.
    pub fn seek(&mut self, target: u64) -> Result<()> {
        if self.exhausted {
            return Ok(());
        }
        let mut key = Vec::with_capacity(KEY_LEN);
        key.extend_from_slice(&self.prefix);
        // Zero-pad any skipped levels between the prefix and this level.
        key.resize(self.level * COMPONENT, 0);
        key.extend_from_slice(&target.to_be_bytes());
        key.resize(KEY_LEN, 0);
        self.iter.seek(&key)?;
        if self.iter.key().is_none() {
            self.exhausted = true;
        }
        Ok(())
    }

    /// Advance to the next distinct value at this level.
    pub fn next_value(&mut self) -> Result<()> {
        match self.current() {
            None => Ok(()),
            Some(u64::MAX) => {
                self.exhausted = true;
                Ok(())
            }
            Some(v) => self.seek(v + 1),
        }
    }
}

impl std::fmt::Debug for TrieIterator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrieIterator")
            .field("level", &self.level)
            .field("prefix_len", &self.prefix.len())
            .field("current", &self.current())
            .finish()
    }
}
