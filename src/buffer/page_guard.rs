use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{PageId, PAGE_SIZE};

use super::{AccessType, BufferPoolManager, Frame};

type PageData = Box<[u8; PAGE_SIZE]>;

/// Pin-only RAII guard over a page. Holds no latch between calls; the data
/// accessors take the frame latch for the duration of the returned borrow.
/// Unpins on drop, propagating the dirty bit if the holder wrote.
///
/// Guards are movable and non-copyable; early release is an explicit drop.
pub struct BasicPageGuard<'a> {
    bpm: &'a BufferPoolManager,
    page_id: PageId,
    frame: Option<Arc<Frame>>,
    is_dirty: bool,
}

impl<'a> BasicPageGuard<'a> {
    pub(crate) fn new(bpm: &'a BufferPoolManager, page_id: PageId, frame: Arc<Frame>) -> Self {
        Self {
            bpm,
            page_id,
            frame: Some(frame),
            is_dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    fn frame(&self) -> &Arc<Frame> {
        self.frame.as_ref().expect("guard already released")
    }

    /// Shared access to the page data; the frame latch is held only for the
    /// lifetime of the returned borrow.
    pub fn read_data(&self) -> RwLockReadGuard<'_, PageData> {
        self.frame().read_data()
    }

    /// Exclusive access to the page data; marks the page dirty.
    pub fn write_data(&mut self) -> RwLockWriteGuard<'_, PageData> {
        self.is_dirty = true;
        self.frame().write_data()
    }

    /// Converts this guard into one holding the shared latch, transferring
    /// the pin.
    pub fn upgrade_read(mut self) -> ReadPageGuard<'a> {
        let frame = self.frame.take().expect("guard already released");
        ReadPageGuard::latch(self.bpm, self.page_id, frame, self.is_dirty)
    }

    /// Converts this guard into one holding the exclusive latch, transferring
    /// the pin.
    pub fn upgrade_write(mut self) -> WritePageGuard<'a> {
        let frame = self.frame.take().expect("guard already released");
        WritePageGuard::latch(self.bpm, self.page_id, frame, self.is_dirty)
    }

    /// Releases the guard early.
    pub fn drop_guard(self) {
        drop(self);
    }
}

impl Drop for BasicPageGuard<'_> {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            drop(frame);
            self.bpm
                .unpin_page(self.page_id, self.is_dirty, AccessType::Unknown);
        }
    }
}

/// RAII guard holding a page pin and the frame's shared latch for its whole
/// lifetime. Unpins on drop, after the latch is released.
pub struct ReadPageGuard<'a> {
    bpm: &'a BufferPoolManager,
    page_id: PageId,
    /// Keeps the frame alive for the latch guard below
    frame: Option<Arc<Frame>>,
    /// Shared latch on the page data. The 'static lifetime is a fiction: the
    /// guard actually borrows the frame held in `frame` above and must be
    /// dropped before it.
    data: Option<RwLockReadGuard<'static, PageData>>,
    is_dirty: bool,
}

impl<'a> ReadPageGuard<'a> {
    pub(crate) fn latch(
        bpm: &'a BufferPoolManager,
        page_id: PageId,
        frame: Arc<Frame>,
        is_dirty: bool,
    ) -> Self {
        let data = frame.data.read();
        // Safety: the latch guard borrows the frame, which the Arc stored in
        // this struct keeps alive; Drop releases the latch before the Arc.
        let data: RwLockReadGuard<'static, PageData> = unsafe { std::mem::transmute(data) };

        Self {
            bpm,
            page_id,
            frame: Some(frame),
            data: Some(data),
            is_dirty,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data.as_ref().expect("guard already released")[..]
    }

    /// Releases the guard early: latch first, then the pin.
    pub fn drop_guard(self) {
        drop(self);
    }
}

impl Deref for ReadPageGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl Drop for ReadPageGuard<'_> {
    fn drop(&mut self) {
        // Release the latch before unpinning.
        self.data.take();
        if let Some(frame) = self.frame.take() {
            drop(frame);
            self.bpm
                .unpin_page(self.page_id, self.is_dirty, AccessType::Unknown);
        }
    }
}

/// RAII guard holding a page pin and the frame's exclusive latch for its
/// whole lifetime. Marks the page dirty on mutable access and unpins on
/// drop, after the latch is released.
pub struct WritePageGuard<'a> {
    bpm: &'a BufferPoolManager,
    page_id: PageId,
    /// Keeps the frame alive for the latch guard below
    frame: Option<Arc<Frame>>,
    /// Exclusive latch on the page data; same lifetime fiction as the read
    /// guard.
    data: Option<RwLockWriteGuard<'static, PageData>>,
    is_dirty: bool,
}

impl<'a> WritePageGuard<'a> {
    pub(crate) fn latch(
        bpm: &'a BufferPoolManager,
        page_id: PageId,
        frame: Arc<Frame>,
        is_dirty: bool,
    ) -> Self {
        let data = frame.data.write();
        // Safety: as for ReadPageGuard::latch.
        let data: RwLockWriteGuard<'static, PageData> = unsafe { std::mem::transmute(data) };

        Self {
            bpm,
            page_id,
            frame: Some(frame),
            data: Some(data),
            is_dirty,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data.as_ref().expect("guard already released")[..]
    }

    /// Mutable access to the page data; marks the page dirty.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.is_dirty = true;
        &mut self.data.as_mut().expect("guard already released")[..]
    }

    /// Releases the guard early: latch first, then the pin.
    pub fn drop_guard(self) {
        drop(self);
    }
}

impl Deref for WritePageGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for WritePageGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}

impl Drop for WritePageGuard<'_> {
    fn drop(&mut self) {
        // Release the latch before unpinning.
        self.data.take();
        if let Some(frame) = self.frame.take() {
            drop(frame);
            self.bpm
                .unpin_page(self.page_id, self.is_dirty, AccessType::Unknown);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk::DiskManager;
    use tempfile::NamedTempFile;

    fn create_bpm() -> (BufferPoolManager, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        (BufferPoolManager::new(8, 2, dm), temp_file)
    }

    #[test]
    fn test_read_guard_releases_pin() {
        let (bpm, _temp) = create_bpm();
        let page_id = bpm.new_page().unwrap();
        bpm.unpin_page(page_id, false, AccessType::Unknown);

        {
            let guard = bpm.fetch_page_read(page_id).unwrap();
            assert_eq!(guard.page_id(), page_id);
            assert_eq!(bpm.get_pin_count(page_id), Some(1));
        }
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
    }

    #[test]
    fn test_write_guard_marks_dirty() {
        let (bpm, _temp) = create_bpm();
        let page_id = bpm.new_page().unwrap();
        bpm.unpin_page(page_id, false, AccessType::Unknown);

        {
            let mut guard = bpm.fetch_page_write(page_id).unwrap();
            guard.data_mut()[0] = 0xAB;
        }

        let guard = bpm.fetch_page_read(page_id).unwrap();
        assert_eq!(guard.data()[0], 0xAB);
    }

    #[test]
    fn test_shared_read_guards_coexist() {
        let (bpm, _temp) = create_bpm();
        let page_id = bpm.new_page().unwrap();
        bpm.unpin_page(page_id, false, AccessType::Unknown);

        let g1 = bpm.fetch_page_read(page_id).unwrap();
        let g2 = bpm.fetch_page_read(page_id).unwrap();
        assert_eq!(bpm.get_pin_count(page_id), Some(2));
        drop(g1);
        assert_eq!(bpm.get_pin_count(page_id), Some(1));
        drop(g2);
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
    }

    #[test]
    fn test_basic_guard_write_propagates_dirty() {
        let (bpm, _temp) = create_bpm();
        let page_id = bpm.new_page().unwrap();
        bpm.unpin_page(page_id, false, AccessType::Unknown);

        {
            let mut guard = bpm.fetch_page_basic(page_id).unwrap();
            guard.write_data()[3] = 3;
        }

        let guard = bpm.fetch_page_basic(page_id).unwrap();
        assert_eq!(guard.read_data()[3], 3);
    }
}
