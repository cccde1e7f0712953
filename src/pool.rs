//! Memory-mapped buffers shared with the driver.

use std::ptr::NonNull;
use std::{fmt, slice, time::Duration};

use tracing::{debug, warn};

use crate::buffer::{BufferInfo, Dequeued};
use crate::driver::Handle;
use crate::error::{Error, Result};

/// Who may touch a buffer right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    /// Queued, the driver may write into it at any time
    Driver,
    /// Dequeued or never queued, readable by the session
    Session,
}

struct Descriptor {
    index: u32,
    addr: NonNull<u8>,
    length: usize,
    owner: Owner,
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("index", &self.index)
            .field("length", &self.length)
            .field("owner", &self.owner)
            .finish()
    }
}

/// Manage mapped buffers
///
/// The pool does not own the device handle, every operation borrows it. Buffers have to be
/// given back through [`DeviceBufferPool::release`] before the handle is closed.
#[derive(Debug, Default)]
pub struct DeviceBufferPool {
    buffers: Vec<Descriptor>,
}

// SAFETY: the mappings are plain process memory, only reachable through &self/&mut self.
unsafe impl Send for DeviceBufferPool {}

impl DeviceBufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mapped buffers
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Current owner of a buffer
    pub fn owner(&self, index: u32) -> Option<Owner> {
        self.find(index).map(|b| b.owner)
    }

    /// Number of buffers currently held by the driver
    pub fn queued(&self) -> usize {
        self.buffers
            .iter()
            .filter(|b| b.owner == Owner::Driver)
            .count()
    }

    fn find(&self, index: u32) -> Option<&Descriptor> {
        self.buffers.iter().find(|b| b.index == index)
    }

    fn find_mut(&mut self, index: u32) -> Option<&mut Descriptor> {
        self.buffers.iter_mut().find(|b| b.index == index)
    }

    /// Requests `count` buffers and maps every one the driver grants
    ///
    /// Either all granted buffers end up mapped and session-held, or nothing stays mapped and
    /// the driver allocation is freed again.
    pub fn allocate(&mut self, handle: &Handle, count: u32) -> Result<u32> {
        if !self.buffers.is_empty() {
            return Err(Error::BufferAllocation("buffers already allocated".into()));
        }

        let driver = handle.driver();
        let granted = driver
            .request_buffers(handle.fd(), count)
            .map_err(|e| Error::BufferAllocation(format!("requesting {} buffers: {}", count, e)))?;
        if granted == 0 {
            return Err(Error::BufferAllocation("driver granted no buffers".into()));
        }

        for index in 0..granted {
            let mapped = driver
                .query_buffer(handle.fd(), index)
                .and_then(|info| driver.map(handle.fd(), &info).map(|addr| (info, addr)));

            match mapped {
                Ok((BufferInfo { length, .. }, addr)) => self.buffers.push(Descriptor {
                    index,
                    addr,
                    length: length as usize,
                    owner: Owner::Session,
                }),
                Err(e) => {
                    warn!(device = %handle.path().display(), index, error = %e, "mapping buffer failed");
                    let _ = self.release(handle);
                    // buffers that were granted but never mapped still need freeing
                    let _ = driver.request_buffers(handle.fd(), 0);
                    return Err(Error::BufferAllocation(format!(
                        "mapping buffer {}: {}",
                        index, e
                    )));
                }
            }
        }

        debug!(device = %handle.path().display(), requested = count, granted, "buffers mapped");
        Ok(granted)
    }

    /// Hands every session-held buffer to the driver
    pub fn queue_all(&mut self, handle: &Handle) -> Result<()> {
        if self.buffers.is_empty() {
            return Err(Error::BufferAllocation("no buffers allocated".into()));
        }

        for buf in self.buffers.iter_mut().filter(|b| b.owner == Owner::Session) {
            handle.driver().queue(handle.fd(), buf.index)?;
            buf.owner = Owner::Driver;
        }

        Ok(())
    }

    /// Takes one filled buffer from the driver, waiting at most `timeout`
    ///
    /// `Ok(None)` means nothing was ready. A returned buffer is session-held until requeued.
    pub fn dequeue_one(&mut self, handle: &Handle, timeout: Duration) -> Result<Option<Dequeued>> {
        let dequeued = match handle.driver().dequeue(handle.fd(), timeout)? {
            Some(buf) => buf,
            None => return Ok(None),
        };

        match self.find_mut(dequeued.index) {
            Some(buf) if buf.owner == Owner::Driver => {
                buf.owner = Owner::Session;
                Ok(Some(dequeued))
            }
            Some(_) => Err(Error::FrameRead(format!(
                "buffer {} dequeued twice",
                dequeued.index
            ))),
            None => Err(Error::FrameRead(format!(
                "unknown buffer index {}",
                dequeued.index
            ))),
        }
    }

    /// Contents of a session-held buffer
    ///
    /// `bytes_used` is clamped to the buffer length. Returns `None` for buffers the driver owns.
    pub fn data(&self, index: u32, bytes_used: u32) -> Option<&[u8]> {
        let buf = self.find(index).filter(|b| b.owner == Owner::Session)?;
        let len = (bytes_used as usize).min(buf.length);
        // SAFETY: the mapping is live until release and the driver does not write into
        // buffers it does not own
        Some(unsafe { slice::from_raw_parts(buf.addr.as_ptr(), len) })
    }

    /// Gives a session-held buffer back to the driver
    pub fn requeue(&mut self, handle: &Handle, index: u32) -> Result<()> {
        let buf = self
            .find_mut(index)
            .ok_or_else(|| Error::FrameRead(format!("unknown buffer index {}", index)))?;
        if buf.owner == Owner::Driver {
            return Err(Error::FrameRead(format!("buffer {} is already queued", index)));
        }

        handle.driver().queue(handle.fd(), index)?;
        buf.owner = Owner::Driver;
        Ok(())
    }

    /// Unmaps every buffer and frees the driver allocation
    ///
    /// No-op on an empty pool. All buffers are unmapped even if some of them fail, the first
    /// error is returned.
    pub fn release(&mut self, handle: &Handle) -> Result<()> {
        if self.buffers.is_empty() {
            return Ok(());
        }

        let mut result = Ok(());
        for buf in self.buffers.drain(..) {
            // SAFETY: addr/length come from Driver::map and nothing borrows the memory anymore,
            // `data` slices cannot outlive the &self they were taken from
            if let Err(e) = unsafe { handle.driver().unmap(buf.addr, buf.length) } {
                warn!(device = %handle.path().display(), index = buf.index, error = %e, "unmapping buffer failed");
                if result.is_ok() {
                    result = Err(Error::Io(e));
                }
            }
        }

        // free all buffers by requesting 0
        if let Err(e) = handle.driver().request_buffers(handle.fd(), 0) {
            warn!(device = %handle.path().display(), error = %e, "freeing buffers failed");
            if result.is_ok() {
                result = Err(Error::Io(e));
            }
        }

        debug!(device = %handle.path().display(), "buffers released");
        result
    }
}

impl Drop for DeviceBufferPool {
    fn drop(&mut self) {
        if !self.buffers.is_empty() {
            warn!(count = self.buffers.len(), "buffer pool dropped without release, mappings leak");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use super::*;
    use crate::driver::fake::{FakeDevice, FakeDriver, FakeFrame};
    use crate::driver::Driver;
    use crate::fourcc::FourCC;

    fn open(device: FakeDevice) -> (Arc<FakeDriver>, Handle) {
        let driver = Arc::new(FakeDriver::new().with_device("/dev/video0", device));
        let handle = Handle::open(driver.clone(), Path::new("/dev/video0")).unwrap();
        (driver, handle)
    }

    fn camera() -> FakeDevice {
        FakeDevice::new().with_format(FourCC::YUYV, &[(4, 2)], &[30])
    }

    #[test]
    fn allocate_and_release() {
        let (driver, handle) = open(camera());
        let mut pool = DeviceBufferPool::new();

        assert_eq!(pool.allocate(&handle, 4).unwrap(), 4);
        assert_eq!(pool.len(), 4);
        assert_eq!(driver.mapped_buffers(), 4);
        assert_eq!(pool.owner(0), Some(Owner::Session));

        pool.release(&handle).unwrap();
        assert!(pool.is_empty());
        assert_eq!(driver.mapped_buffers(), 0);
        assert_eq!(driver.allocated_buffers(Path::new("/dev/video0")), 0);

        // second release is a no-op
        pool.release(&handle).unwrap();
        assert_eq!(driver.unmap_count(), 4);
    }

    #[test]
    fn map_failure_rolls_back() {
        let (driver, handle) = open(camera().failing_map_at(2));
        let mut pool = DeviceBufferPool::new();

        assert!(matches!(
            pool.allocate(&handle, 4),
            Err(Error::BufferAllocation(_))
        ));
        assert!(pool.is_empty());
        assert_eq!(driver.mapped_buffers(), 0);
        assert_eq!(driver.unmap_count(), 2);
        assert_eq!(driver.allocated_buffers(Path::new("/dev/video0")), 0);
    }

    #[test]
    fn zero_granted_is_an_error() {
        let (driver, handle) = open(camera().granting_buffers(0));
        let mut pool = DeviceBufferPool::new();

        assert!(matches!(
            pool.allocate(&handle, 4),
            Err(Error::BufferAllocation(_))
        ));
        assert_eq!(driver.mapped_buffers(), 0);
    }

    #[test]
    fn fewer_granted_than_requested() {
        let (_driver, handle) = open(camera().granting_buffers(2));
        let mut pool = DeviceBufferPool::new();

        assert_eq!(pool.allocate(&handle, 4).unwrap(), 2);
        assert_eq!(pool.len(), 2);
        pool.release(&handle).unwrap();
    }

    #[test]
    fn dequeue_process_requeue() {
        let (_driver, handle) = open(camera().with_frames([FakeFrame::yuyv(4, 2)]));
        let mut pool = DeviceBufferPool::new();
        pool.allocate(&handle, 2).unwrap();
        pool.queue_all(&handle).unwrap();
        assert_eq!(pool.queued(), 2);
        handle.driver().stream_on(handle.fd()).unwrap();

        let buf = pool
            .dequeue_one(&handle, Duration::from_millis(1))
            .unwrap()
            .unwrap();
        assert_eq!(pool.owner(buf.index), Some(Owner::Session));
        assert_eq!(pool.data(buf.index, buf.bytes_used).unwrap().len(), 16);

        // queued buffers are off limits
        let other = if buf.index == 0 { 1 } else { 0 };
        assert!(pool.data(other, 16).is_none());
        assert!(pool.requeue(&handle, other).is_err());

        pool.requeue(&handle, buf.index).unwrap();
        assert_eq!(pool.owner(buf.index), Some(Owner::Driver));
        assert!(pool.data(buf.index, 16).is_none());

        // script exhausted
        assert!(pool
            .dequeue_one(&handle, Duration::from_millis(1))
            .unwrap()
            .is_none());

        handle.driver().stream_off(handle.fd()).unwrap();
        pool.release(&handle).unwrap();
    }
}
