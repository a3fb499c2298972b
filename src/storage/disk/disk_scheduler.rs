use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::{Bytes, BytesMut};
use crossbeam_channel::{bounded, Receiver, Sender};

use crate::common::{PageId, Result, StrataError, DISK_SCHEDULER_QUEUE_DEPTH, PAGE_SIZE};

use super::DiskManager;

/// Completion handle for a single request.
pub type Completion<T> = Sender<Result<T>>;

/// Represents a disk I/O request. Payloads are owned so a request can outlive
/// the frame it was copied from.
pub enum DiskRequest {
    Read {
        page_id: PageId,
        done: Completion<Bytes>,
    },
    Write {
        page_id: PageId,
        data: Bytes,
        done: Completion<()>,
    },
}

impl DiskRequest {
    pub fn page_id(&self) -> PageId {
        match self {
            DiskRequest::Read { page_id, .. } | DiskRequest::Write { page_id, .. } => *page_id,
        }
    }
}

/// DiskScheduler manages a background worker thread that processes disk I/O requests.
/// Requests are served in submission order. Dropping the scheduler closes the
/// queue; the worker finishes what is queued and exits.
pub struct DiskScheduler {
    /// The disk manager for actual I/O operations
    disk_manager: Arc<DiskManager>,
    /// Channel sender for queuing requests
    request_sender: Option<Sender<DiskRequest>>,
    /// Handle to the background worker thread
    worker_handle: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Creates a new DiskScheduler with the given DiskManager.
    /// Spawns a background worker thread to process requests.
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (sender, receiver) = bounded::<DiskRequest>(DISK_SCHEDULER_QUEUE_DEPTH);

        let dm_clone = Arc::clone(&disk_manager);
        let worker_handle = thread::Builder::new()
            .name("disk-scheduler".into())
            .spawn(move || Self::start_worker_thread(dm_clone, receiver))
            .ok();

        if worker_handle.is_none() {
            log::warn!("failed to spawn disk scheduler worker");
        }

        Self {
            disk_manager,
            request_sender: Some(sender),
            worker_handle,
        }
    }

    /// Queues a request for the background worker.
    pub fn schedule(&self, request: DiskRequest) -> Result<()> {
        let sender = self
            .request_sender
            .as_ref()
            .ok_or_else(|| StrataError::DiskScheduler("scheduler is shut down".into()))?;

        sender
            .send(request)
            .map_err(|e| StrataError::DiskScheduler(format!("failed to schedule {}: worker gone", e.0.page_id())))
    }

    /// Schedules a read request and waits for the page bytes.
    pub fn schedule_read_sync(&self, page_id: PageId) -> Result<Bytes> {
        let (done, completion) = bounded(1);
        self.schedule(DiskRequest::Read { page_id, done })?;
        Self::wait(completion, page_id)
    }

    /// Schedules a write request and waits for completion.
    pub fn schedule_write_sync(&self, page_id: PageId, data: Bytes) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let (done, completion) = bounded(1);
        self.schedule(DiskRequest::Write {
            page_id,
            data,
            done,
        })?;
        Self::wait(completion, page_id)
    }

    fn wait<T>(completion: Receiver<Result<T>>, page_id: PageId) -> Result<T> {
        completion.recv().map_err(|_| {
            StrataError::DiskScheduler(format!("request for {page_id} dropped without completion"))
        })?
    }

    /// The background worker thread function.
    /// Processes requests until every sender is gone.
    fn start_worker_thread(disk_manager: Arc<DiskManager>, receiver: Receiver<DiskRequest>) {
        while let Ok(request) = receiver.recv() {
            Self::process_request(&disk_manager, request);
        }
        log::trace!("disk scheduler worker exiting");
    }

    fn process_request(disk_manager: &DiskManager, request: DiskRequest) {
        match request {
            DiskRequest::Read { page_id, done } => {
                let mut buf = BytesMut::zeroed(PAGE_SIZE);
                let result = disk_manager
                    .read_page(page_id, &mut buf)
                    .map(|()| buf.freeze());
                // The requester may have given up; nothing to do then
                let _ = done.send(result);
            }
            DiskRequest::Write {
                page_id,
                data,
                done,
            } => {
                let _ = done.send(disk_manager.write_page(page_id, &data));
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
        // Closing the queue ends the worker loop once it drains
        self.request_sender.take();

        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}
