use std::marker::PhantomData;

use crate::buffer::{BasicPageGuard, BufferPoolManager};
use crate::common::{Result, INVALID_PAGE_ID};

use super::btree_page::LeafPageRef;
use super::codec::Storable;

/// Forward iterator over the leaf chain of a B+ tree.
///
/// Holds one pinned leaf at a time through a pin-only guard; the frame latch
/// is taken only for the duration of each accessor call, never between
/// calls. Advancing pins the next leaf before releasing the current one.
///
/// Iteration is meant for a quiescent tree; interleaving with concurrent
/// writers is not supported.
pub struct IndexIterator<'a, K, V> {
    bpm: &'a BufferPoolManager,
    leaf: Option<BasicPageGuard<'a>>,
    index: usize,
    _marker: PhantomData<(K, V)>,
}

impl<'a, K, V> IndexIterator<'a, K, V>
where
    K: Storable,
    V: Storable,
{
    /// The past-the-end iterator.
    pub(crate) fn end(bpm: &'a BufferPoolManager) -> Self {
        Self {
            bpm,
            leaf: None,
            index: 0,
            _marker: PhantomData,
        }
    }

    /// An iterator holding `leaf` with the cursor at `index`, normalized
    /// past any exhausted tail.
    pub(crate) fn positioned(
        bpm: &'a BufferPoolManager,
        leaf: BasicPageGuard<'a>,
        index: usize,
    ) -> Result<Self> {
        let mut iterator = Self {
            bpm,
            leaf: Some(leaf),
            index,
            _marker: PhantomData,
        };
        iterator.skip_exhausted()?;
        Ok(iterator)
    }

    /// Moves the cursor to the next leaf holding entries at or past the
    /// current position, releasing the end state if there is none.
    fn skip_exhausted(&mut self) -> Result<()> {
        loop {
            let Some(leaf_guard) = self.leaf.as_ref() else {
                return Ok(());
            };
            let (size, next) = {
                let data = leaf_guard.read_data();
                let leaf = LeafPageRef::<K, V>::new(&data[..]);
                (leaf.size(), leaf.next_page_id())
            };
            if self.index < size {
                return Ok(());
            }
            if next == INVALID_PAGE_ID {
                self.leaf = None;
                return Ok(());
            }
            // Pin the next leaf before letting go of the current one.
            let next_guard = self.bpm.fetch_page_basic(next)?;
            self.leaf = Some(next_guard);
            self.index = 0;
        }
    }

    pub fn is_end(&self) -> bool {
        self.leaf.is_none()
    }

    /// The entry under the cursor, or None at the end.
    pub fn current(&self) -> Option<(K, V)> {
        let leaf_guard = self.leaf.as_ref()?;
        let data = leaf_guard.read_data();
        let leaf = LeafPageRef::<K, V>::new(&data[..]);
        if self.index >= leaf.size() {
            return None;
        }
        Some(leaf.entry_at(self.index))
    }

    /// Steps the cursor forward one entry.
    pub fn advance(&mut self) -> Result<()> {
        if self.leaf.is_some() {
            self.index += 1;
            self.skip_exhausted()?;
        }
        Ok(())
    }
}

impl<K, V> Iterator for IndexIterator<'_, K, V>
where
    K: Storable,
    V: Storable,
{
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.current()?;
        match self.advance() {
            Ok(()) => Some(Ok(entry)),
            Err(e) => Some(Err(e)),
        }
    }
}
