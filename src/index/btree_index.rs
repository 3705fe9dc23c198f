use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;

use log::debug;

use crate::buffer::{BufferPoolManager, WritePageGuard};
use crate::common::{PageId, Result, INVALID_PAGE_ID};

use super::btree_iterator::IndexIterator;
use super::btree_page::{
    BTreeHeaderPage, BTreeHeaderPageRef, BTreePageRef, InternalPage, InternalPageRef, LeafPage,
    LeafPageRef,
};
use super::codec::Storable;
use super::key_comparator::KeyComparator;

/// A disk-backed B+ tree index over unique keys.
///
/// All page access goes through buffer pool guards. Readers descend with
/// hand-over-hand shared latches; writers descend with pessimistic exclusive
/// crabbing, releasing every ancestor latch as soon as a node is safe (can
/// absorb the pending insert without splitting, or the pending remove
/// without underflowing).
///
/// The tree is addressed through a fixed header page holding the current
/// root id; `INVALID_PAGE_ID` there means the tree is empty.
pub struct BPlusTree<K, V, C> {
    index_name: String,
    header_page_id: PageId,
    bpm: Arc<BufferPoolManager>,
    comparator: C,
    leaf_max_size: usize,
    internal_max_size: usize,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, C> BPlusTree<K, V, C>
where
    K: Storable,
    V: Storable,
    C: KeyComparator,
{
    /// Creates an index bound to `header_page_id`, resetting its root to the
    /// empty state. The header page id is permanent and externally supplied.
    pub fn new(
        index_name: impl Into<String>,
        header_page_id: PageId,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        let tree = Self::open(
            index_name,
            header_page_id,
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
        );
        {
            let mut header_guard = tree.bpm.fetch_page_write(header_page_id)?;
            BTreeHeaderPage::new(header_guard.data_mut()).set_root_page_id(INVALID_PAGE_ID);
        }
        Ok(tree)
    }

    /// Attaches to an existing index through its header page without
    /// touching the stored root id.
    pub fn open(
        index_name: impl Into<String>,
        header_page_id: PageId,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Self {
        assert!(leaf_max_size >= 2, "leaf max size must be at least 2");
        assert!(internal_max_size >= 3, "internal max size must be at least 3");
        Self {
            index_name: index_name.into(),
            header_page_id,
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
            _marker: PhantomData,
        }
    }

    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    /// Reads the current root page id from the header page.
    pub fn root_page_id(&self) -> Result<PageId> {
        let header_guard = self.bpm.fetch_page_read(self.header_page_id)?;
        Ok(BTreeHeaderPageRef::new(header_guard.data()).root_page_id())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.root_page_id()? == INVALID_PAGE_ID)
    }

    fn encode_key(key: &K) -> Vec<u8> {
        let mut buf = vec![0u8; K::LEN];
        key.write_to(&mut buf);
        buf
    }

    /// Point lookup. Descends with hand-over-hand shared latches: the child
    /// guard is acquired before the parent guard is released.
    pub fn get_value(&self, key: &K) -> Result<Option<V>> {
        let key_bytes = Self::encode_key(key);

        let header_guard = self.bpm.fetch_page_read(self.header_page_id)?;
        let root_id = BTreeHeaderPageRef::new(header_guard.data()).root_page_id();
        if root_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut guard = self.bpm.fetch_page_read(root_id)?;
        drop(header_guard);

        loop {
            let child = {
                let page = BTreePageRef::new(guard.data());
                if page.is_leaf() {
                    let leaf = LeafPageRef::<K, V>::new(guard.data());
                    return Ok(leaf.lookup(&key_bytes, &self.comparator));
                }
                InternalPageRef::<K>::new(guard.data())
                    .lookup(&key_bytes, &self.comparator)
                    .0
            };
            // Assignment acquires the child latch before dropping the parent.
            guard = self.bpm.fetch_page_read(child)?;
        }
    }

    /// Inserts a unique key. Returns false if the key is already present.
    pub fn insert(&self, key: &K, value: &V) -> Result<bool> {
        let key_bytes = Self::encode_key(key);

        let mut header_guard = Some(self.bpm.fetch_page_write(self.header_page_id)?);
        let root_id =
            BTreeHeaderPageRef::new(header_guard.as_ref().unwrap().data()).root_page_id();

        if root_id == INVALID_PAGE_ID {
            let (leaf_pid, basic) = self.bpm.new_page_guarded()?;
            let mut leaf_guard = basic.upgrade_write();
            let mut leaf = LeafPage::<K, V>::new(leaf_guard.data_mut());
            leaf.init(self.leaf_max_size);
            leaf.insert_at(0, &key_bytes, value);

            let mut hg = header_guard.take().unwrap();
            BTreeHeaderPage::new(hg.data_mut()).set_root_page_id(leaf_pid);
            debug!("{}: started new tree at leaf {leaf_pid}", self.index_name);
            return Ok(true);
        }

        // Crab down, keeping exclusive guards only while an ancestor might
        // still have to absorb a split.
        let mut guards: VecDeque<WritePageGuard<'_>> = VecDeque::new();
        let mut child_indexes: VecDeque<usize> = VecDeque::new();
        let mut pid = root_id;
        loop {
            let guard = self.bpm.fetch_page_write(pid)?;
            let (is_leaf, is_safe, child, child_index) = {
                let page = BTreePageRef::new(guard.data());
                let is_safe = page.size() < page.max_size();
                if page.is_leaf() {
                    (true, is_safe, INVALID_PAGE_ID, 0)
                } else {
                    let node = InternalPageRef::<K>::new(guard.data());
                    let (child, index) = node.lookup(&key_bytes, &self.comparator);
                    (false, is_safe, child, index)
                }
            };
            if is_safe {
                header_guard = None;
                guards.clear();
                child_indexes.clear();
            }
            guards.push_back(guard);
            if is_leaf {
                break;
            }
            child_indexes.push_back(child_index);
            pid = child;
        }

        let mut leaf_guard = guards.pop_back().expect("descent reached no leaf");
        let (pos, found) = LeafPageRef::<K, V>::new(leaf_guard.data())
            .index_of_first_ge(&key_bytes, &self.comparator);
        if found {
            return Ok(false);
        }

        let mut last_pid = leaf_guard.page_id();
        {
            let mut leaf = LeafPage::<K, V>::new(leaf_guard.data_mut());
            leaf.insert_at(pos, &key_bytes, value);
            if leaf.size() <= leaf.max_size() {
                return Ok(true);
            }
        }

        // The leaf overflowed its nominal capacity: split off a right
        // sibling and splice it into the leaf chain.
        let (new_pid, basic) = self.bpm.new_page_guarded()?;
        let mut new_guard = basic.upgrade_write();
        let mut up_key = {
            let mut leaf = LeafPage::<K, V>::new(leaf_guard.data_mut());
            let mut new_leaf = LeafPage::<K, V>::new(new_guard.data_mut());
            new_leaf.init(self.leaf_max_size);
            leaf.move_half_to(&mut new_leaf);
            new_leaf.set_next_page_id(leaf.next_page_id());
            leaf.set_next_page_id(new_pid);
            new_leaf.key_at(0).to_vec()
        };
        let mut up_pid = new_pid;
        debug!("{}: split leaf {last_pid} -> {new_pid}", self.index_name);
        drop(new_guard);
        drop(leaf_guard);

        // Propagate the split through the retained ancestors, bottom to top.
        while let Some(mut guard) = guards.pop_back() {
            let child_index = child_indexes
                .pop_back()
                .expect("retained ancestor without a recorded child index");
            last_pid = guard.page_id();

            {
                let mut node = InternalPage::<K>::new(guard.data_mut());
                if node.size() < node.max_size() {
                    node.insert_at(child_index + 1, &up_key, up_pid);
                    return Ok(true);
                }
            }

            let (new_pid, basic) = self.bpm.new_page_guarded()?;
            let mut new_guard = basic.upgrade_write();
            {
                let mut node = InternalPage::<K>::new(guard.data_mut());
                let mut new_node = InternalPage::<K>::new(new_guard.data_mut());
                new_node.init(self.internal_max_size);
                node.move_half_to(&mut new_node);
                if child_index < node.size() {
                    node.insert_at(child_index + 1, &up_key, up_pid);
                } else {
                    new_node.insert_at(child_index - node.size() + 1, &up_key, up_pid);
                }
                // Splitting before the insert can leave the new sibling one
                // entry short of min_size.
                if new_node.size() < new_node.min_size() {
                    node.move_back_to_front_of(&mut new_node);
                }
                up_key = new_node.key_at(0).to_vec();
            }
            up_pid = new_pid;
            debug!("{}: split internal {last_pid} -> {new_pid}", self.index_name);
        }

        // The split outgrew the root: the tree gains a level.
        let (root_pid, basic) = self.bpm.new_page_guarded()?;
        let mut root_guard = basic.upgrade_write();
        InternalPage::<K>::new(root_guard.data_mut()).init_as_root(
            self.internal_max_size,
            last_pid,
            &up_key,
            up_pid,
        );
        let mut hg = header_guard
            .take()
            .expect("root split without the header latch held");
        BTreeHeaderPage::new(hg.data_mut()).set_root_page_id(root_pid);
        debug!("{}: new root {root_pid}", self.index_name);
        Ok(true)
    }

    /// Removes a key if present. Underflow is resolved by borrowing from a
    /// sibling where possible, merging otherwise; merges may cascade up
    /// through the retained ancestors.
    pub fn remove(&self, key: &K) -> Result<()> {
        let key_bytes = Self::encode_key(key);

        let mut header_guard = Some(self.bpm.fetch_page_write(self.header_page_id)?);
        let root_id =
            BTreeHeaderPageRef::new(header_guard.as_ref().unwrap().data()).root_page_id();
        if root_id == INVALID_PAGE_ID {
            return Ok(());
        }

        let mut guards: VecDeque<WritePageGuard<'_>> = VecDeque::new();
        let mut child_indexes: VecDeque<usize> = VecDeque::new();
        let mut pid = root_id;
        loop {
            let guard = self.bpm.fetch_page_write(pid)?;
            let (is_leaf, is_safe, child, child_index) = {
                let page = BTreePageRef::new(guard.data());
                let is_safe = page.size() > page.min_size();
                if page.is_leaf() {
                    (true, is_safe, INVALID_PAGE_ID, 0)
                } else {
                    let node = InternalPageRef::<K>::new(guard.data());
                    let (child, index) = node.lookup(&key_bytes, &self.comparator);
                    (false, is_safe, child, index)
                }
            };
            if is_safe {
                header_guard = None;
                guards.clear();
                child_indexes.clear();
            }
            guards.push_back(guard);
            if is_leaf {
                break;
            }
            child_indexes.push_back(child_index);
            pid = child;
        }

        {
            let leaf_guard = guards.back_mut().expect("descent reached no leaf");
            let (pos, found) = LeafPageRef::<K, V>::new(leaf_guard.data())
                .index_of_first_ge(&key_bytes, &self.comparator);
            if !found {
                return Ok(());
            }
            let mut leaf = LeafPage::<K, V>::new(leaf_guard.data_mut());
            leaf.remove_at(pos);
            if leaf.size() >= leaf.min_size() {
                return Ok(());
            }
        }

        // Underflow: every retained ancestor was at min_size, so each merge
        // cascades exactly one level further up. A successful borrow stops
        // the cascade.
        let mut child_is_leaf = true;
        while guards.len() >= 2 {
            let mut child_guard = guards.pop_back().unwrap();
            let child_index = child_indexes
                .pop_back()
                .expect("retained ancestor without a recorded child index");
            let parent_guard = guards.back_mut().unwrap();

            if self.borrow_from_sibling(parent_guard, &mut child_guard, child_index, child_is_leaf)? {
                return Ok(());
            }
            self.merge_with_sibling(parent_guard, &mut child_guard, child_index, child_is_leaf)?;
            child_is_leaf = false;
        }

        // Only the topmost retained node is still latched.
        let root_guard = guards.back_mut().expect("underflow walk consumed all guards");
        let (is_leaf, size) = {
            let page = BTreePageRef::new(root_guard.data());
            (page.is_leaf(), page.size())
        };
        if is_leaf {
            if size == 0 {
                let mut hg = header_guard
                    .take()
                    .expect("header released before the root emptied");
                BTreeHeaderPage::new(hg.data_mut()).set_root_page_id(INVALID_PAGE_ID);
                debug!("{}: tree is empty again", self.index_name);
            }
            return Ok(());
        }
        if size == 1 {
            // An internal root of size 1 routes everything through one
            // child: the tree loses a level.
            let new_root = InternalPageRef::<K>::new(root_guard.data()).child_at(0);
            let mut hg = header_guard
                .take()
                .expect("header released before the root collapsed");
            BTreeHeaderPage::new(hg.data_mut()).set_root_page_id(new_root);
            debug!("{}: root collapsed into {new_root}", self.index_name);
        }
        Ok(())
    }

    /// Tries to lend the underflowing child one entry from the left sibling,
    /// then the right. A sibling can lend iff it sits above min_size. The
    /// parent separator at the borrow boundary is reset to the new first key
    /// of the right participant.
    fn borrow_from_sibling(
        &self,
        parent_guard: &mut WritePageGuard<'_>,
        child_guard: &mut WritePageGuard<'_>,
        child_index: usize,
        child_is_leaf: bool,
    ) -> Result<bool> {
        let parent_size = InternalPageRef::<K>::new(parent_guard.data()).size();

        let mut candidates = [None, None];
        if child_index > 0 {
            candidates[0] = Some(child_index - 1);
        }
        if child_index + 1 < parent_size {
            candidates[1] = Some(child_index + 1);
        }

        for sibling_index in candidates.into_iter().flatten() {
            let sibling_pid =
                InternalPageRef::<K>::new(parent_guard.data()).child_at(sibling_index);
            // Siblings are reachable only through the parent, which we hold
            // exclusively; a pin-only guard suffices.
            let mut sibling_guard = self.bpm.fetch_page_basic(sibling_pid)?;

            let can_lend = {
                let data = sibling_guard.read_data();
                let page = BTreePageRef::new(&data[..]);
                page.size() > page.min_size()
            };
            if !can_lend {
                continue;
            }

            let mut sibling_data = sibling_guard.write_data();
            let separator = if child_is_leaf {
                let mut child = LeafPage::<K, V>::new(child_guard.data_mut());
                let mut sibling = LeafPage::<K, V>::new(&mut sibling_data[..]);
                if sibling_index < child_index {
                    sibling.move_back_to_front_of(&mut child);
                    (child_index, child.key_at(0).to_vec())
                } else {
                    sibling.move_front_to_back_of(&mut child);
                    (child_index + 1, sibling.key_at(0).to_vec())
                }
            } else {
                let mut child = InternalPage::<K>::new(child_guard.data_mut());
                let mut sibling = InternalPage::<K>::new(&mut sibling_data[..]);
                if sibling_index < child_index {
                    sibling.move_back_to_front_of(&mut child);
                    (child_index, child.key_at(0).to_vec())
                } else {
                    sibling.move_front_to_back_of(&mut child);
                    (child_index + 1, sibling.key_at(0).to_vec())
                }
            };

            let mut parent = InternalPage::<K>::new(parent_guard.data_mut());
            parent.set_key_at(separator.0, &separator.1);
            return Ok(true);
        }

        Ok(false)
    }

    /// Merges the underflowing child with an adjacent sibling, preferring
    /// the left one, and removes the parent entry of the merged-away node.
    /// For internal nodes the parent separator is pulled down into the
    /// sentinel slot first; for leaves the chain pointer is spliced.
    fn merge_with_sibling(
        &self,
        parent_guard: &mut WritePageGuard<'_>,
        child_guard: &mut WritePageGuard<'_>,
        child_index: usize,
        child_is_leaf: bool,
    ) -> Result<()> {
        if child_index > 0 {
            // Fold the child into its left sibling.
            let (left_pid, separator) = {
                let parent = InternalPageRef::<K>::new(parent_guard.data());
                (
                    parent.child_at(child_index - 1),
                    parent.key_at(child_index).to_vec(),
                )
            };
            let mut left_guard = self.bpm.fetch_page_basic(left_pid)?;
            {
                let mut left_data = left_guard.write_data();
                if child_is_leaf {
                    let mut child = LeafPage::<K, V>::new(child_guard.data_mut());
                    let mut left = LeafPage::<K, V>::new(&mut left_data[..]);
                    left.set_next_page_id(child.next_page_id());
                    child.move_all_to(&mut left);
                } else {
                    let mut child = InternalPage::<K>::new(child_guard.data_mut());
                    let mut left = InternalPage::<K>::new(&mut left_data[..]);
                    child.set_key_at(0, &separator);
                    child.move_all_to(&mut left);
                }
            }
            debug!(
                "{}: merged child {} of {} into its left sibling",
                self.index_name,
                child_guard.page_id(),
                parent_guard.page_id()
            );
            let mut parent = InternalPage::<K>::new(parent_guard.data_mut());
            parent.remove_at(child_index);
        } else {
            // Leftmost child: pull the right sibling into it instead.
            let (right_pid, separator) = {
                let parent = InternalPageRef::<K>::new(parent_guard.data());
                (parent.child_at(1), parent.key_at(1).to_vec())
            };
            let mut right_guard = self.bpm.fetch_page_basic(right_pid)?;
            {
                let mut right_data = right_guard.write_data();
                if child_is_leaf {
                    let mut child = LeafPage::<K, V>::new(child_guard.data_mut());
                    let mut right = LeafPage::<K, V>::new(&mut right_data[..]);
                    child.set_next_page_id(right.next_page_id());
                    right.move_all_to(&mut child);
                } else {
                    let mut child = InternalPage::<K>::new(child_guard.data_mut());
                    let mut right = InternalPage::<K>::new(&mut right_data[..]);
                    right.set_key_at(0, &separator);
                    right.move_all_to(&mut child);
                }
            }
            debug!(
                "{}: merged right sibling {right_pid} into child {} of {}",
                self.index_name,
                child_guard.page_id(),
                parent_guard.page_id()
            );
            let mut parent = InternalPage::<K>::new(parent_guard.data_mut());
            parent.remove_at(1);
        }
        Ok(())
    }

    /// Iterator positioned at the first key of the leftmost leaf.
    pub fn begin(&self) -> Result<IndexIterator<'_, K, V>> {
        let header_guard = self.bpm.fetch_page_read(self.header_page_id)?;
        let root_id = BTreeHeaderPageRef::new(header_guard.data()).root_page_id();
        if root_id == INVALID_PAGE_ID {
            return Ok(IndexIterator::end(&self.bpm));
        }

        let mut guard = self.bpm.fetch_page_read(root_id)?;
        drop(header_guard);

        loop {
            let child = {
                let page = BTreePageRef::new(guard.data());
                if page.is_leaf() {
                    break;
                }
                InternalPageRef::<K>::new(guard.data()).child_at(0)
            };
            guard = self.bpm.fetch_page_read(child)?;
        }

        // Convert to a pin-only hold before releasing the leaf latch.
        let leaf = self.bpm.fetch_page_basic(guard.page_id())?;
        drop(guard);
        IndexIterator::positioned(&self.bpm, leaf, 0)
    }

    /// Iterator positioned at the first key >= the probe.
    pub fn begin_from(&self, key: &K) -> Result<IndexIterator<'_, K, V>> {
        let key_bytes = Self::encode_key(key);

        let header_guard = self.bpm.fetch_page_read(self.header_page_id)?;
        let root_id = BTreeHeaderPageRef::new(header_guard.data()).root_page_id();
        if root_id == INVALID_PAGE_ID {
            return Ok(IndexIterator::end(&self.bpm));
        }

        let mut guard = self.bpm.fetch_page_read(root_id)?;
        drop(header_guard);

        let index = loop {
            let child = {
                let page = BTreePageRef::new(guard.data());
                if page.is_leaf() {
                    let leaf = LeafPageRef::<K, V>::new(guard.data());
                    break leaf.index_of_first_ge(&key_bytes, &self.comparator).0;
                }
                InternalPageRef::<K>::new(guard.data())
                    .lookup(&key_bytes, &self.comparator)
                    .0
            };
            guard = self.bpm.fetch_page_read(child)?;
        };

        let leaf = self.bpm.fetch_page_basic(guard.page_id())?;
        drop(guard);
        IndexIterator::positioned(&self.bpm, leaf, index)
    }

    /// The past-the-end iterator.
    pub fn end(&self) -> IndexIterator<'_, K, V> {
        IndexIterator::end(&self.bpm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::AccessType;
    use crate::common::{RecordId, SlotId};
    use crate::index::key_comparator::U32Comparator;
    use crate::storage::disk::DiskManager;
    use tempfile::NamedTempFile;

    fn create_tree() -> (BPlusTree<u32, RecordId, U32Comparator>, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let disk_manager = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(16, 2, disk_manager));

        let header_page_id = bpm.new_page().unwrap();
        bpm.unpin_page(header_page_id, true, AccessType::Unknown);

        let tree =
            BPlusTree::new("unit_index", header_page_id, bpm, U32Comparator, 3, 3).unwrap();
        (tree, temp_file)
    }

    #[test]
    fn test_insert_search_remove_round_trip() {
        let (tree, _temp) = create_tree();

        for key in [5u32, 1, 4, 2, 3, 9, 7, 8, 6] {
            let value = RecordId::new(PageId::new(key), SlotId::new(0));
            assert!(tree.insert(&key, &value).unwrap());
        }

        for key in 1..=9u32 {
            let expected = RecordId::new(PageId::new(key), SlotId::new(0));
            assert_eq!(tree.get_value(&key).unwrap(), Some(expected));
        }
        assert_eq!(tree.get_value(&10).unwrap(), None);

        let scanned: Vec<u32> = tree.begin().unwrap().map(|e| e.unwrap().0).collect();
        assert_eq!(scanned, (1..=9).collect::<Vec<_>>());

        for key in 1..=9u32 {
            tree.remove(&key).unwrap();
        }
        assert!(tree.is_empty().unwrap());
    }
}
