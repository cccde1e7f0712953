//! The OS-facing surface of a capture session.
//!
//! Every interaction with a video device goes through the [`Driver`] trait: node open/close,
//! format and frame interval enumeration, buffer negotiation, memory mapping and streaming.
//! [`v4l2::V4l2Driver`] talks to the kernel, [`fake::FakeDriver`] keeps everything in memory so
//! sessions can be exercised without hardware.

use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;
use std::{fmt, io, time::Duration};

use crate::buffer::{BufferInfo, Dequeued};
use crate::format::{Description, Format};
use crate::fourcc::FourCC;
use crate::fraction::Fraction;
use crate::frameinterval::FrameInterval;
use crate::framesize::FrameSize;

pub mod fake;

#[cfg(feature = "v4l2")]
pub mod v4l2;

/// Video capture device protocol
///
/// Methods mirror the video4linux2 ioctl verbs one to one and report errors the way the kernel
/// does, as [`io::Error`]s carrying an errno.
pub trait Driver: Send + Sync {
    /// Opens a device node, returning its file descriptor
    fn open(&self, path: &Path) -> io::Result<RawFd>;

    /// Closes a previously opened device
    fn close(&self, fd: RawFd) -> io::Result<()>;

    /// Returns all capture formats the device advertises, in driver order
    fn enum_formats(&self, fd: RawFd) -> io::Result<Vec<Description>>;

    /// Returns the frame sizes the device supports for a pixel format
    fn enum_framesizes(&self, fd: RawFd, fourcc: FourCC) -> io::Result<Vec<FrameSize>>;

    /// Returns the frame intervals the device supports for a pixel format and frame size
    fn enum_frameintervals(
        &self,
        fd: RawFd,
        fourcc: FourCC,
        width: u32,
        height: u32,
    ) -> io::Result<Vec<FrameInterval>>;

    /// Returns the format currently in use
    fn format(&self, fd: RawFd) -> io::Result<Format>;

    /// Modifies the capture format and returns the format the driver actually applied
    ///
    /// The driver tries to match the format parameters on a best effort basis.
    fn set_format(&self, fd: RawFd, fmt: &Format) -> io::Result<Format>;

    /// Modifies the frame interval and returns the interval the driver actually applied
    fn set_interval(&self, fd: RawFd, interval: Fraction) -> io::Result<Fraction>;

    /// Requests `count` memory-mapped buffers, returns how many the driver granted
    ///
    /// A count of zero frees all buffers.
    fn request_buffers(&self, fd: RawFd, count: u32) -> io::Result<u32>;

    /// Looks up the mapping parameters of a buffer
    fn query_buffer(&self, fd: RawFd, index: u32) -> io::Result<BufferInfo>;

    /// Maps a kernel buffer into process memory
    fn map(&self, fd: RawFd, info: &BufferInfo) -> io::Result<NonNull<u8>>;

    /// Unmaps a region returned by [`Driver::map`]
    ///
    /// # Safety
    ///
    /// `addr` and `length` must describe a live mapping, and nothing may read it afterwards.
    unsafe fn unmap(&self, addr: NonNull<u8>, length: usize) -> io::Result<()>;

    /// Hands a buffer to the driver for filling
    fn queue(&self, fd: RawFd, index: u32) -> io::Result<()>;

    /// Takes a filled buffer from the driver, waiting at most `timeout`
    ///
    /// `Ok(None)` means no buffer became ready in time.
    fn dequeue(&self, fd: RawFd, timeout: Duration) -> io::Result<Option<Dequeued>>;

    /// Starts streaming
    fn stream_on(&self, fd: RawFd) -> io::Result<()>;

    /// Stops streaming, the driver reclaims all queued buffers
    fn stream_off(&self, fd: RawFd) -> io::Result<()>;
}

/// An open device node
///
/// The node is closed exactly once, either explicitly through [`Handle::close`] or when the
/// handle is dropped.
pub struct Handle {
    fd: RawFd,
    path: PathBuf,
    driver: Arc<dyn Driver>,
    open: bool,
}

impl Handle {
    /// Opens the device node at `path`
    pub fn open(driver: Arc<dyn Driver>, path: &Path) -> io::Result<Self> {
        let fd = driver.open(path)?;
        Ok(Handle {
            fd,
            path: path.to_path_buf(),
            driver,
            open: true,
        })
    }

    /// Returns the raw fd of the device
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Returns the device node path
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    /// Closes the device node
    pub fn close(mut self) -> io::Result<()> {
        self.open = false;
        self.driver.close(self.fd)
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if self.open {
            // ignore errors, nothing sensible can be done about a failing close during unwind
            let _ = self.driver.close(self.fd);
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("fd", &self.fd)
            .field("path", &self.path)
            .finish()
    }
}
