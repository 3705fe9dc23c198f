use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::common::{PageId, Result, VellumError, PAGE_SIZE};

use super::DiskManager;

/// A disk I/O request processed by the background worker.
/// Requests own their page buffers; completion is signalled back through a
/// per-request channel.
pub enum DiskRequest {
    Read {
        page_id: PageId,
        completion: mpsc::Sender<Result<Box<[u8; PAGE_SIZE]>>>,
    },
    Write {
        page_id: PageId,
        data: Box<[u8; PAGE_SIZE]>,
        completion: mpsc::Sender<Result<()>>,
    },
}

/// DiskScheduler manages a background worker thread that processes disk I/O
/// requests. All buffer pool disk traffic is funnelled through its queue.
pub struct DiskScheduler {
    /// The disk manager performing the actual I/O
    disk_manager: Arc<DiskManager>,
    /// Channel sender for queuing requests; dropped on shutdown
    request_sender: Option<Sender<DiskRequest>>,
    /// Handle to the background worker thread
    worker_handle: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Creates a new DiskScheduler and spawns its worker thread.
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (sender, receiver) = bounded::<DiskRequest>(128);

        let dm = Arc::clone(&disk_manager);
        let worker_handle = thread::spawn(move || {
            Self::run_worker(dm, receiver);
        });

        Self {
            disk_manager,
            request_sender: Some(sender),
            worker_handle: Some(worker_handle),
        }
    }

    /// Queues a disk request for the background worker.
    pub fn schedule(&self, request: DiskRequest) -> Result<()> {
        self.request_sender
            .as_ref()
            .expect("scheduler already shut down")
            .send(request)
            .map_err(|e| VellumError::DiskScheduler(format!("failed to schedule request: {e}")))
    }

    /// Schedules a read and blocks until the page buffer comes back.
    pub fn schedule_read_sync(&self, page_id: PageId) -> Result<Box<[u8; PAGE_SIZE]>> {
        let (tx, rx) = mpsc::channel();
        self.schedule(DiskRequest::Read {
            page_id,
            completion: tx,
        })?;
        rx.recv()
            .map_err(|e| VellumError::DiskScheduler(format!("failed to receive completion: {e}")))?
    }

    /// Schedules a write and blocks until it has been applied.
    pub fn schedule_write_sync(&self, page_id: PageId, data: Box<[u8; PAGE_SIZE]>) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        self.schedule(DiskRequest::Write {
            page_id,
            data,
            completion: tx,
        })?;
        rx.recv()
            .map_err(|e| VellumError::DiskScheduler(format!("failed to receive completion: {e}")))?
    }

    /// Worker loop: drains the queue until every sender is gone.
    fn run_worker(disk_manager: Arc<DiskManager>, receiver: Receiver<DiskRequest>) {
        while let Ok(request) = receiver.recv() {
            match request {
                DiskRequest::Read {
                    page_id,
                    completion,
                } => {
                    let mut buf = Box::new([0u8; PAGE_SIZE]);
                    let result = disk_manager.read_page(page_id, &mut buf[..]).map(|()| buf);
                    let _ = completion.send(result);
                }
                DiskRequest::Write {
                    page_id,
                    data,
                    completion,
                } => {
                    let result = disk_manager.write_page(page_id, &data[..]);
                    let _ = completion.send(result);
                }
            }
        }
    }

    /// Returns a reference to the underlying DiskManager.
    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit.
        self.request_sender.take();
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_disk_scheduler_read_write() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let scheduler = DiskScheduler::new(dm);

        let page_id = PageId::new(0);

        let mut write_data = Box::new([0u8; PAGE_SIZE]);
        write_data[0] = 42;
        write_data[100] = 255;
        scheduler.schedule_write_sync(page_id, write_data).unwrap();

        let read_data = scheduler.schedule_read_sync(page_id).unwrap();
        assert_eq!(read_data[0], 42);
        assert_eq!(read_data[100], 255);
    }

    #[test]
    fn test_disk_scheduler_multiple_requests() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let scheduler = DiskScheduler::new(dm);

        for i in 0..8u8 {
            let mut data = Box::new([0u8; PAGE_SIZE]);
            data[0] = i;
            scheduler
                .schedule_write_sync(PageId::new(i as u32), data)
                .unwrap();
        }

        for i in 0..8u8 {
            let data = scheduler.schedule_read_sync(PageId::new(i as u32)).unwrap();
            assert_eq!(data[0], i);
        }
    }
}
