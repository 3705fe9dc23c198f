use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::common::{FrameId, PageId, Result, VellumError, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::{AccessType, BasicPageGuard, Frame, LruKReplacer, ReadPageGuard, WritePageGuard};

/// Bookkeeping state, all behind one mutex. Disk I/O triggered by fetches
/// and evictions runs while this mutex is held.
struct PoolState {
    /// Page table: maps resident page IDs to frame IDs
    page_table: HashMap<PageId, FrameId>,
    /// Frames that hold no page
    free_list: VecDeque<FrameId>,
    /// Next page id to hand out; allocation is monotonic
    next_page_id: u32,
}

/// BufferPoolManager caches a bounded working set of disk pages in a fixed
/// number of frames. Any fetched page stays resident and pinned until it is
/// released; eviction is delegated to the LRU-K replacer and flushes dirty
/// victims on the way out.
pub struct BufferPoolManager {
    /// Number of frames in the buffer pool
    pool_size: usize,
    /// The buffer pool frames, indexed by frame id
    frames: Vec<Arc<Frame>>,
    /// LRU-K replacer for eviction decisions
    replacer: LruKReplacer,
    /// Bookkeeping state
    state: Mutex<PoolState>,
    /// Disk scheduler carrying all disk traffic
    disk_scheduler: DiskScheduler,
}

impl BufferPoolManager {
    /// Creates a new BufferPoolManager with the given pool size, K value for
    /// LRU-K, and disk manager.
    pub fn new(pool_size: usize, replacer_k: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(Frame::new(frame_id)));
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            frames,
            replacer: LruKReplacer::new(replacer_k, pool_size),
            state: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_list,
                next_page_id: 0,
            }),
            disk_scheduler: DiskScheduler::new(disk_manager),
        }
    }

    /// Allocates a fresh page id and binds it to a frame, pinned once.
    /// The caller releases it through `unpin_page` or by wrapping the pin in
    /// a guard via `new_page_guarded`.
    pub fn new_page(&self) -> Result<PageId> {
        let mut state = self.state.lock();

        let frame_id = self.acquire_frame(&mut state)?;
        let page_id = PageId::new(state.next_page_id);
        state.next_page_id += 1;

        let frame = &self.frames[frame_id.as_usize()];
        frame.set_page_id(page_id);
        frame.pin();

        state.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id, AccessType::Unknown);
        self.replacer.set_evictable(frame_id, false);

        Ok(page_id)
    }

    /// Fetches a page into the buffer pool, pinning it, and returns its
    /// frame. If the page is not resident it is read from disk, evicting a
    /// victim if no frame is free.
    pub fn fetch_page(&self, page_id: PageId, access_type: AccessType) -> Result<Arc<Frame>> {
        if page_id == INVALID_PAGE_ID {
            return Err(VellumError::InvalidPageId(page_id));
        }

        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &self.frames[frame_id.as_usize()];
            frame.pin();
            self.replacer.record_access(frame_id, access_type);
            self.replacer.set_evictable(frame_id, false);
            return Ok(Arc::clone(frame));
        }

        let frame_id = self.acquire_frame(&mut state)?;
        let frame = &self.frames[frame_id.as_usize()];

        let buf = self.disk_scheduler.schedule_read_sync(page_id)?;
        frame.copy_from(&buf[..]);
        frame.set_page_id(page_id);
        frame.set_dirty(false);
        frame.pin();

        state.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id, access_type);
        self.replacer.set_evictable(frame_id, false);

        Ok(Arc::clone(frame))
    }

    /// Drops one pin on a page. When the pin count reaches zero the frame
    /// becomes evictable. The dirty flag is sticky: once set it stays set
    /// until the page is flushed.
    ///
    /// Returns false if the page is not resident or its pin count is
    /// already zero.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool, _access_type: AccessType) -> bool {
        let state = self.state.lock();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.as_usize()];

        match frame.unpin() {
            None => false,
            Some(remaining) => {
                if is_dirty {
                    frame.set_dirty(true);
                }
                if remaining == 0 {
                    self.replacer.set_evictable(frame_id, true);
                }
                true
            }
        }
    }

    /// Writes a page to disk and clears its dirty flag. Pin count and
    /// eviction state are untouched. Returns false if the page is not
    /// resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID {
            return Err(VellumError::InvalidPageId(page_id));
        }

        let state = self.state.lock();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(false);
        };
        let frame = &self.frames[frame_id.as_usize()];

        let mut buf = Box::new([0u8; PAGE_SIZE]);
        frame.copy_to(&mut buf[..]);
        self.disk_scheduler.schedule_write_sync(page_id, buf)?;
        frame.set_dirty(false);

        Ok(true)
    }

    /// Flushes every dirty resident page to disk.
    pub fn flush_all_pages(&self) -> Result<()> {
        let state = self.state.lock();

        for (&page_id, &frame_id) in state.page_table.iter() {
            let frame = &self.frames[frame_id.as_usize()];
            if frame.is_dirty() {
                let mut buf = Box::new([0u8; PAGE_SIZE]);
                frame.copy_to(&mut buf[..]);
                self.disk_scheduler.schedule_write_sync(page_id, buf)?;
                frame.set_dirty(false);
            }
        }

        Ok(())
    }

    /// Removes a page from the buffer pool, returning its frame to the free
    /// list. The page id is not recycled. Returns Ok(false) if the page is
    /// not resident and an error if it is still pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut state = self.state.lock();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(false);
        };
        let frame = &self.frames[frame_id.as_usize()];

        if frame.pin_count() > 0 {
            return Err(VellumError::PageStillPinned(page_id));
        }

        state.page_table.remove(&page_id);
        self.replacer.remove(frame_id);
        frame.reset();
        state.free_list.push_back(frame_id);

        Ok(true)
    }

    /// Fetches a page wrapped in a pin-only guard.
    pub fn fetch_page_basic(&self, page_id: PageId) -> Result<BasicPageGuard<'_>> {
        let frame = self.fetch_page(page_id, AccessType::Unknown)?;
        Ok(BasicPageGuard::new(self, page_id, frame))
    }

    /// Fetches a page and holds its shared latch for the guard's lifetime.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<ReadPageGuard<'_>> {
        let frame = self.fetch_page(page_id, AccessType::Unknown)?;
        Ok(ReadPageGuard::latch(self, page_id, frame, false))
    }

    /// Fetches a page and holds its exclusive latch for the guard's lifetime.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<WritePageGuard<'_>> {
        let frame = self.fetch_page(page_id, AccessType::Unknown)?;
        Ok(WritePageGuard::latch(self, page_id, frame, false))
    }

    /// Allocates a fresh page and wraps its pin in a basic guard.
    pub fn new_page_guarded(&self) -> Result<(PageId, BasicPageGuard<'_>)> {
        let page_id = self.new_page()?;
        let frame = {
            let state = self.state.lock();
            let frame_id = state.page_table[&page_id];
            Arc::clone(&self.frames[frame_id.as_usize()])
        };
        // The guard takes over the pin acquired by new_page.
        Ok((page_id, BasicPageGuard::new(self, page_id, frame)))
    }

    /// Returns the pin count of a resident page.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock();
        state
            .page_table
            .get(&page_id)
            .map(|&frame_id| self.frames[frame_id.as_usize()].pin_count())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.state.lock().free_list.len()
    }

    /// Obtains a frame for a new resident page: the free list first, then an
    /// eviction victim. A dirty victim is flushed before its slot is reused.
    fn acquire_frame(&self, state: &mut PoolState) -> Result<FrameId> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = self.replacer.evict().ok_or(VellumError::BufferPoolFull)?;
        let frame = &self.frames[frame_id.as_usize()];
        let old_page_id = frame.page_id();
        assert_eq!(frame.pin_count(), 0, "evicted a pinned frame");

        if frame.is_dirty() {
            debug!("evicting dirty page {old_page_id} from {frame_id}");
            let mut buf = Box::new([0u8; PAGE_SIZE]);
            frame.copy_to(&mut buf[..]);
            self.disk_scheduler.schedule_write_sync(old_page_id, buf)?;
        }

        state.page_table.remove(&old_page_id);
        frame.reset();

        Ok(frame_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_bpm(pool_size: usize) -> (BufferPoolManager, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let bpm = BufferPoolManager::new(pool_size, 2, dm);
        (bpm, temp_file)
    }

    #[test]
    fn test_buffer_pool_manager_new() {
        let (bpm, _temp) = create_bpm(10);
        assert_eq!(bpm.pool_size(), 10);
        assert_eq!(bpm.free_frame_count(), 10);
    }

    #[test]
    fn test_buffer_pool_manager_new_page_is_pinned() {
        let (bpm, _temp) = create_bpm(10);

        let page_id = bpm.new_page().unwrap();
        assert_eq!(page_id, PageId::new(0));
        assert_eq!(bpm.get_pin_count(page_id), Some(1));
        assert_eq!(bpm.free_frame_count(), 9);

        assert!(bpm.unpin_page(page_id, false, AccessType::Unknown));
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
    }

    #[test]
    fn test_buffer_pool_manager_read_write() {
        let (bpm, _temp) = create_bpm(10);

        let page_id = bpm.new_page().unwrap();
        bpm.unpin_page(page_id, false, AccessType::Unknown);

        {
            let mut guard = bpm.fetch_page_write(page_id).unwrap();
            guard.data_mut()[0] = 42;
            guard.data_mut()[100] = 255;
        }

        // The guard released its pin on drop.
        assert_eq!(bpm.get_pin_count(page_id), Some(0));

        {
            let guard = bpm.fetch_page_read(page_id).unwrap();
            assert_eq!(guard.data()[0], 42);
            assert_eq!(guard.data()[100], 255);
        }
    }

    #[test]
    fn test_buffer_pool_manager_unpin_at_zero_fails() {
        let (bpm, _temp) = create_bpm(10);

        let page_id = bpm.new_page().unwrap();
        assert!(bpm.unpin_page(page_id, false, AccessType::Unknown));
        assert!(!bpm.unpin_page(page_id, false, AccessType::Unknown));
        assert!(!bpm.unpin_page(PageId::new(99), false, AccessType::Unknown));
    }

    #[test]
    fn test_buffer_pool_manager_flush() {
        let (bpm, temp) = create_bpm(10);

        let page_id = bpm.new_page().unwrap();
        bpm.unpin_page(page_id, false, AccessType::Unknown);

        {
            let mut guard = bpm.fetch_page_write(page_id).unwrap();
            guard.data_mut()[0] = 42;
        }

        bpm.flush_page(page_id).unwrap();
        drop(bpm);

        let dm = Arc::new(DiskManager::new(temp.path()).unwrap());
        let bpm2 = BufferPoolManager::new(10, 2, dm);

        let guard = bpm2.fetch_page_read(page_id).unwrap();
        assert_eq!(guard.data()[0], 42);
    }

    #[test]
    fn test_buffer_pool_manager_eviction_writes_dirty_page() {
        let (bpm, _temp) = create_bpm(3);

        let page_ids: Vec<_> = (0..3).map(|_| bpm.new_page().unwrap()).collect();
        for (i, &pid) in page_ids.iter().enumerate() {
            bpm.unpin_page(pid, false, AccessType::Unknown);
            let mut guard = bpm.fetch_page_write(pid).unwrap();
            guard.data_mut()[0] = i as u8;
        }

        assert_eq!(bpm.free_frame_count(), 0);

        // A fourth page forces an eviction; the victim's bytes must survive
        // the round trip through disk.
        let new_pid = bpm.new_page().unwrap();
        assert_eq!(new_pid, PageId::new(3));
        bpm.unpin_page(new_pid, false, AccessType::Unknown);

        for (i, &pid) in page_ids.iter().enumerate() {
            let guard = bpm.fetch_page_read(pid).unwrap();
            assert_eq!(guard.data()[0], i as u8);
        }
    }

    #[test]
    fn test_buffer_pool_manager_full() {
        let (bpm, _temp) = create_bpm(2);

        let _p0 = bpm.new_page().unwrap();
        let _p1 = bpm.new_page().unwrap();

        // Both pages still carry their allocation pin.
        assert!(matches!(bpm.new_page(), Err(VellumError::BufferPoolFull)));
    }

    #[test]
    fn test_buffer_pool_manager_delete_page() {
        let (bpm, _temp) = create_bpm(10);

        let page_id = bpm.new_page().unwrap();

        assert!(matches!(
            bpm.delete_page(page_id),
            Err(VellumError::PageStillPinned(_))
        ));

        bpm.unpin_page(page_id, false, AccessType::Unknown);
        assert!(bpm.delete_page(page_id).unwrap());
        assert_eq!(bpm.get_pin_count(page_id), None);
        assert_eq!(bpm.free_frame_count(), 10);

        assert!(!bpm.delete_page(page_id).unwrap());
    }

    #[test]
    fn test_buffer_pool_manager_basic_guard_upgrade() {
        let (bpm, _temp) = create_bpm(10);

        let (page_id, guard) = bpm.new_page_guarded().unwrap();
        assert_eq!(bpm.get_pin_count(page_id), Some(1));

        let mut write_guard = guard.upgrade_write();
        write_guard.data_mut()[7] = 7;
        assert_eq!(bpm.get_pin_count(page_id), Some(1));
        drop(write_guard);

        assert_eq!(bpm.get_pin_count(page_id), Some(0));

        let guard = bpm.fetch_page_basic(page_id).unwrap();
        let read_guard = guard.upgrade_read();
        assert_eq!(read_guard.data()[7], 7);
    }
}
