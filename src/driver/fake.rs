//! In-memory video devices.
//!
//! [`FakeDriver`] behaves like a small UVC camera driver: it advertises a configurable set of
//! formats, sizes and rates, hands out real heap memory for mapped buffers and fills queued
//! buffers from a frame script. It also records how many nodes are open and how many buffers
//! are mapped, which is what leak tests look at.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use uvccam::driver::fake::{FakeDevice, FakeDriver, FakeFrame};
//! use uvccam::FourCC;
//!
//! let driver = FakeDriver::new().with_device(
//!     "/dev/video0",
//!     FakeDevice::new()
//!         .with_format(FourCC::YUYV, &[(640, 480)], &[30])
//!         .with_default_frame(FakeFrame::Ready(vec![0x80; 640 * 480 * 2])),
//! );
//! let driver = Arc::new(driver);
//! assert_eq!(driver.open_handles(), 0);
//! ```

use std::collections::{HashMap, VecDeque};
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::{io, thread, time::Duration};

use crate::buffer::{BufferInfo, Dequeued, Flags as BufferFlags};
use crate::driver::Driver;
use crate::format::{Description, Format};
use crate::fourcc::FourCC;
use crate::fraction::Fraction;
use crate::frameinterval::{FrameInterval, FrameIntervalEnum};
use crate::framesize::{Discrete, FrameSize, FrameSizeEnum};

/// What the next dequeue produces
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeFrame {
    /// A filled buffer carrying these bytes
    Ready(Vec<u8>),
    /// Nothing became ready within the wait
    NotReady,
    /// A buffer flagged with `ERROR` and no payload
    Corrupt,
}

impl FakeFrame {
    /// A minimal JPEG image: SOI, `payload` filler bytes, EOI
    pub fn jpeg(payload: usize) -> Self {
        let mut data = vec![0xFF, 0xD8];
        data.resize(2 + payload, 0x00);
        data.extend_from_slice(&[0xFF, 0xD9]);
        FakeFrame::Ready(data)
    }

    /// A packed 4:2:2 image of uniform mid grey
    pub fn yuyv(width: u32, height: u32) -> Self {
        FakeFrame::Ready(vec![0x80; width as usize * height as usize * 2])
    }
}

#[derive(Debug, Clone)]
struct AdvertisedFormat {
    fourcc: FourCC,
    sizes: Vec<FrameSizeEnum>,
    rates: Vec<u32>,
}

/// Capabilities and behavior of one fake device node
#[derive(Debug, Clone, Default)]
pub struct FakeDevice {
    formats: Vec<AdvertisedFormat>,
    current: Option<Format>,
    busy: bool,
    enumeration_fails: bool,
    reject_format: bool,
    reject_interval: bool,
    format_override: Option<Format>,
    rate_override: Option<u32>,
    grant_override: Option<u32>,
    fail_map_at: Option<u32>,
    fail_stream_on: bool,
    script: VecDeque<FakeFrame>,
    default_frame: Option<FakeFrame>,
    frame_delay: Option<Duration>,
    enumeration_delay: Option<Duration>,
    stream_off_delay: Option<Duration>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertises a pixel format with discrete sizes, each supporting every rate in `rates`
    pub fn with_format(mut self, fourcc: FourCC, sizes: &[(u32, u32)], rates: &[u32]) -> Self {
        self.formats.push(AdvertisedFormat {
            fourcc,
            sizes: sizes
                .iter()
                .map(|&(w, h)| FrameSizeEnum::Discrete(Discrete::new(w, h)))
                .collect(),
            rates: rates.to_vec(),
        });
        self
    }

    /// Advertises a pixel format with an arbitrary size description
    pub fn with_format_sizes(mut self, fourcc: FourCC, sizes: Vec<FrameSizeEnum>, rates: &[u32]) -> Self {
        self.formats.push(AdvertisedFormat {
            fourcc,
            sizes,
            rates: rates.to_vec(),
        });
        self
    }

    /// Format reported by G_FMT before anything was set
    pub fn with_current_format(mut self, format: Format) -> Self {
        self.current = Some(format);
        self
    }

    /// The node exists but refuses to open
    pub fn busy(mut self) -> Self {
        self.busy = true;
        self
    }

    /// ENUM_FMT reports nothing
    pub fn failing_enumeration(mut self) -> Self {
        self.enumeration_fails = true;
        self
    }

    /// S_FMT fails with EINVAL
    pub fn rejecting_format(mut self) -> Self {
        self.reject_format = true;
        self
    }

    /// S_PARM fails with EINVAL
    pub fn rejecting_interval(mut self) -> Self {
        self.reject_interval = true;
        self
    }

    /// S_FMT always settles on `format`, whatever was asked for
    pub fn adjusting_format_to(mut self, format: Format) -> Self {
        self.format_override = Some(format);
        self
    }

    /// S_PARM always settles on `fps`
    pub fn adjusting_rate_to(mut self, fps: u32) -> Self {
        self.rate_override = Some(fps);
        self
    }

    /// REQBUFS grants `count` buffers regardless of the request
    pub fn granting_buffers(mut self, count: u32) -> Self {
        self.grant_override = Some(count);
        self
    }

    /// Mapping buffer `index` fails with ENOMEM
    pub fn failing_map_at(mut self, index: u32) -> Self {
        self.fail_map_at = Some(index);
        self
    }

    /// STREAMON fails with EIO
    pub fn failing_stream_on(mut self) -> Self {
        self.fail_stream_on = true;
        self
    }

    /// Frames produced by the next dequeues, in order
    pub fn with_frames<I: IntoIterator<Item = FakeFrame>>(mut self, frames: I) -> Self {
        self.script.extend(frames);
        self
    }

    /// Frame produced once the script is exhausted, `NotReady` if unset
    pub fn with_default_frame(mut self, frame: FakeFrame) -> Self {
        self.default_frame = Some(frame);
        self
    }

    /// Pause before every dequeue returns, emulating the frame period
    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = Some(delay);
        self
    }

    /// Pause inside every format enumeration, emulating a slow device during negotiation
    pub fn with_enumeration_delay(mut self, delay: Duration) -> Self {
        self.enumeration_delay = Some(delay);
        self
    }

    /// Pause inside the first stream off, emulating a driver that is slow to let go
    pub fn with_stream_off_delay(mut self, delay: Duration) -> Self {
        self.stream_off_delay = Some(delay);
        self
    }

    fn advertised(&self, fourcc: FourCC) -> Option<&AdvertisedFormat> {
        self.formats.iter().find(|f| f.fourcc == fourcc)
    }

    fn initial_format(&self) -> Format {
        if let Some(current) = self.current {
            return with_geometry(current);
        }

        let format = self
            .formats
            .first()
            .map(|f| {
                let size = f
                    .sizes
                    .first()
                    .and_then(|s| s.to_discrete().first().copied())
                    .unwrap_or(Discrete::new(640, 480));
                Format::new(size.width, size.height, f.fourcc)
            })
            .unwrap_or(Format::new(640, 480, FourCC::YUYV));
        with_geometry(format)
    }
}

/// Fills in stride and image size the way drivers report them
fn with_geometry(mut format: Format) -> Format {
    let pixels = format.width * format.height;
    match format.fourcc {
        FourCC::YUYV | FourCC::UYVY => {
            format.stride = format.width * 2;
            format.size = pixels * 2;
        }
        FourCC::RGB3 | FourCC::BGR3 => {
            format.stride = format.width * 3;
            format.size = pixels * 3;
        }
        _ => {
            format.stride = 0;
            format.size = pixels * 2;
        }
    }
    format
}

#[derive(Debug)]
struct Node {
    device: FakeDevice,
    format: Format,
    interval: Fraction,
    buffer_count: u32,
    queued: VecDeque<u32>,
    streaming: bool,
    sequence: u32,
    open_count: usize,
    max_open_count: usize,
}

#[derive(Debug)]
struct Mapping {
    path: PathBuf,
    index: u32,
    len: usize,
}

#[derive(Debug, Default)]
struct Inner {
    nodes: HashMap<PathBuf, Node>,
    fds: HashMap<RawFd, PathBuf>,
    next_fd: RawFd,
    total_opens: usize,
    unmaps: usize,
    // keyed by address, the memory itself is leaked from a boxed slice
    mappings: HashMap<usize, Mapping>,
}

impl Inner {
    fn node(&mut self, fd: RawFd) -> io::Result<&mut Node> {
        let path = self.fds.get(&fd).ok_or_else(|| errno(libc::EBADF))?;
        self.nodes.get_mut(path).ok_or_else(|| errno(libc::ENODEV))
    }
}

fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

/// A scriptable in-memory [`Driver`]
#[derive(Debug)]
pub struct FakeDriver {
    inner: Mutex<Inner>,
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDriver {
    pub fn new() -> Self {
        FakeDriver {
            inner: Mutex::new(Inner {
                next_fd: 3,
                ..Inner::default()
            }),
        }
    }

    /// Adds a device node at `path`
    pub fn with_device<P: Into<PathBuf>>(self, path: P, device: FakeDevice) -> Self {
        self.add_device(path, device);
        self
    }

    /// Adds or replaces a device node at runtime
    pub fn add_device<P: Into<PathBuf>>(&self, path: P, device: FakeDevice) {
        let format = device.initial_format();
        let node = Node {
            device,
            format,
            interval: Fraction::from_fps(30),
            buffer_count: 0,
            queued: VecDeque::new(),
            streaming: false,
            sequence: 0,
            open_count: 0,
            max_open_count: 0,
        };
        self.lock().nodes.insert(path.into(), node);
    }

    /// Appends frames to the script of a device
    pub fn push_frames<I: IntoIterator<Item = FakeFrame>>(&self, path: &Path, frames: I) {
        if let Some(node) = self.lock().nodes.get_mut(path) {
            node.device.script.extend(frames);
        }
    }

    /// Number of device nodes currently open, over all paths
    pub fn open_handles(&self) -> usize {
        self.lock().fds.len()
    }

    /// Number of handles currently open on one path
    pub fn open_handles_for(&self, path: &Path) -> usize {
        self.lock().nodes.get(path).map_or(0, |n| n.open_count)
    }

    /// Highest number of handles that were ever open at the same time on one path
    pub fn max_concurrent_opens(&self, path: &Path) -> usize {
        self.lock().nodes.get(path).map_or(0, |n| n.max_open_count)
    }

    /// Number of successful opens since creation
    pub fn total_opens(&self) -> usize {
        self.lock().total_opens
    }

    /// Number of buffers currently mapped, over all paths
    pub fn mapped_buffers(&self) -> usize {
        self.lock().mappings.len()
    }

    /// Number of successful unmaps since creation
    pub fn unmap_count(&self) -> usize {
        self.lock().unmaps
    }

    /// Number of buffers the driver currently has allocated for a path
    pub fn allocated_buffers(&self, path: &Path) -> u32 {
        self.lock().nodes.get(path).map_or(0, |n| n.buffer_count)
    }

    /// Whether a path is streaming
    pub fn is_streaming(&self, path: &Path) -> bool {
        self.lock().nodes.get(path).is_some_and(|n| n.streaming)
    }

    /// The format last applied to a path
    pub fn current_format(&self, path: &Path) -> Option<Format> {
        self.lock().nodes.get(path).map(|n| n.format)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for FakeDriver {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (addr, mapping) in inner.mappings.drain() {
            let slice = std::ptr::slice_from_raw_parts_mut(addr as *mut u8, mapping.len);
            // SAFETY: every entry was produced by Box::into_raw on a slice of this length
            drop(unsafe { Box::from_raw(slice) });
        }
    }
}

impl Driver for FakeDriver {
    fn open(&self, path: &Path) -> io::Result<RawFd> {
        let mut inner = self.lock();
        let node = inner
            .nodes
            .get_mut(path)
            .ok_or_else(|| errno(libc::ENOENT))?;
        if node.device.busy {
            return Err(errno(libc::EBUSY));
        }

        node.open_count += 1;
        node.max_open_count = node.max_open_count.max(node.open_count);

        let fd = inner.next_fd;
        inner.next_fd += 1;
        inner.total_opens += 1;
        inner.fds.insert(fd, path.to_path_buf());
        Ok(fd)
    }

    fn close(&self, fd: RawFd) -> io::Result<()> {
        let mut inner = self.lock();
        let path = inner.fds.remove(&fd).ok_or_else(|| errno(libc::EBADF))?;
        if let Some(node) = inner.nodes.get_mut(&path) {
            node.open_count = node.open_count.saturating_sub(1);
            if node.open_count == 0 {
                // the kernel drops the streaming context with the last file handle
                node.streaming = false;
                node.queued.clear();
                node.buffer_count = 0;
            }
        }
        Ok(())
    }

    fn enum_formats(&self, fd: RawFd) -> io::Result<Vec<Description>> {
        let delay = self.lock().node(fd)?.device.enumeration_delay;
        if let Some(delay) = delay {
            thread::sleep(delay);
        }

        let mut inner = self.lock();
        let node = inner.node(fd)?;
        if node.device.enumeration_fails {
            return Ok(Vec::new());
        }

        Ok(node
            .device
            .formats
            .iter()
            .enumerate()
            .map(|(i, f)| Description::new(i as u32, f.fourcc))
            .collect())
    }

    fn enum_framesizes(&self, fd: RawFd, fourcc: FourCC) -> io::Result<Vec<FrameSize>> {
        let mut inner = self.lock();
        let node = inner.node(fd)?;
        let advertised = node
            .device
            .advertised(fourcc)
            .filter(|f| !f.sizes.is_empty())
            .ok_or_else(|| errno(libc::EINVAL))?;

        Ok(advertised
            .sizes
            .iter()
            .enumerate()
            .map(|(i, size)| FrameSize {
                index: i as u32,
                fourcc,
                size: size.clone(),
            })
            .collect())
    }

    fn enum_frameintervals(
        &self,
        fd: RawFd,
        fourcc: FourCC,
        width: u32,
        height: u32,
    ) -> io::Result<Vec<FrameInterval>> {
        let mut inner = self.lock();
        let node = inner.node(fd)?;
        let advertised = node
            .device
            .advertised(fourcc)
            .filter(|f| !f.rates.is_empty())
            .ok_or_else(|| errno(libc::EINVAL))?;

        Ok(advertised
            .rates
            .iter()
            .enumerate()
            .map(|(i, &fps)| FrameInterval {
                index: i as u32,
                fourcc,
                width,
                height,
                interval: FrameIntervalEnum::Discrete(Fraction::from_fps(fps)),
            })
            .collect())
    }

    fn format(&self, fd: RawFd) -> io::Result<Format> {
        let mut inner = self.lock();
        Ok(inner.node(fd)?.format)
    }

    fn set_format(&self, fd: RawFd, fmt: &Format) -> io::Result<Format> {
        let mut inner = self.lock();
        let node = inner.node(fd)?;
        if node.device.reject_format {
            return Err(errno(libc::EINVAL));
        }
        if node.streaming || node.buffer_count > 0 {
            return Err(errno(libc::EBUSY));
        }

        let applied = match node.device.format_override {
            Some(format) => format,
            None => {
                let advertised = node
                    .device
                    .advertised(fmt.fourcc)
                    .or_else(|| node.device.formats.first());
                match advertised {
                    Some(adv) => {
                        let sizes: Vec<Discrete> =
                            adv.sizes.iter().flat_map(|s| s.to_discrete()).collect();
                        let wanted = Discrete::new(fmt.width, fmt.height);
                        let size = if sizes.is_empty() || sizes.contains(&wanted) {
                            wanted
                        } else {
                            sizes[0]
                        };
                        Format::new(size.width, size.height, adv.fourcc)
                    }
                    None => *fmt,
                }
            }
        };

        node.format = with_geometry(applied);
        Ok(node.format)
    }

    fn set_interval(&self, fd: RawFd, interval: Fraction) -> io::Result<Fraction> {
        let mut inner = self.lock();
        let node = inner.node(fd)?;
        if node.device.reject_interval {
            return Err(errno(libc::EINVAL));
        }

        node.interval = match node.device.rate_override {
            Some(fps) => Fraction::from_fps(fps),
            None => interval,
        };
        Ok(node.interval)
    }

    fn request_buffers(&self, fd: RawFd, count: u32) -> io::Result<u32> {
        let mut inner = self.lock();
        let node = inner.node(fd)?;
        if node.streaming {
            return Err(errno(libc::EBUSY));
        }

        node.queued.clear();
        node.buffer_count = if count == 0 {
            0
        } else {
            node.device.grant_override.unwrap_or(count)
        };
        Ok(node.buffer_count)
    }

    fn query_buffer(&self, fd: RawFd, index: u32) -> io::Result<BufferInfo> {
        let mut inner = self.lock();
        let node = inner.node(fd)?;
        if index >= node.buffer_count {
            return Err(errno(libc::EINVAL));
        }

        let length = node.format.size.max(1);
        Ok(BufferInfo {
            index,
            offset: index * length,
            length,
        })
    }

    fn map(&self, fd: RawFd, info: &BufferInfo) -> io::Result<NonNull<u8>> {
        let mut inner = self.lock();
        let path = inner.fds.get(&fd).cloned().ok_or_else(|| errno(libc::EBADF))?;
        let node = inner.node(fd)?;
        if info.index >= node.buffer_count {
            return Err(errno(libc::EINVAL));
        }
        if node.device.fail_map_at == Some(info.index) {
            return Err(errno(libc::ENOMEM));
        }

        let len = info.length as usize;
        let memory = vec![0u8; len].into_boxed_slice();
        let addr = Box::into_raw(memory) as *mut u8;
        inner.mappings.insert(
            addr as usize,
            Mapping {
                path,
                index: info.index,
                len,
            },
        );

        NonNull::new(addr).ok_or_else(|| errno(libc::ENOMEM))
    }

    unsafe fn unmap(&self, addr: NonNull<u8>, length: usize) -> io::Result<()> {
        let mut inner = self.lock();
        let key = addr.as_ptr() as usize;
        match inner.mappings.get(&key) {
            Some(mapping) if mapping.len == length => {}
            _ => return Err(errno(libc::EINVAL)),
        }

        inner.mappings.remove(&key);
        inner.unmaps += 1;
        let slice = std::ptr::slice_from_raw_parts_mut(addr.as_ptr(), length);
        drop(Box::from_raw(slice));
        Ok(())
    }

    fn queue(&self, fd: RawFd, index: u32) -> io::Result<()> {
        let mut inner = self.lock();
        let node = inner.node(fd)?;
        if index >= node.buffer_count || node.queued.contains(&index) {
            return Err(errno(libc::EINVAL));
        }

        node.queued.push_back(index);
        Ok(())
    }

    fn dequeue(&self, fd: RawFd, timeout: Duration) -> io::Result<Option<Dequeued>> {
        let (result, delay) = {
            let mut inner = self.lock();
            let path = inner.fds.get(&fd).cloned().ok_or_else(|| errno(libc::EBADF))?;
            let node = inner.node(fd)?;
            if !node.streaming {
                return Err(errno(libc::EINVAL));
            }

            let delay = node.device.frame_delay;
            let frame = node
                .device
                .script
                .pop_front()
                .or_else(|| node.device.default_frame.clone())
                .unwrap_or(FakeFrame::NotReady);

            let index = match frame {
                FakeFrame::NotReady => None,
                _ => node.queued.pop_front(),
            };

            match (frame, index) {
                (FakeFrame::Ready(data), Some(index)) => {
                    let sequence = node.sequence;
                    node.sequence = node.sequence.wrapping_add(1);

                    let mut written = 0;
                    for (&addr, mapping) in inner.mappings.iter() {
                        if mapping.path == path && mapping.index == index {
                            written = data.len().min(mapping.len);
                            // SAFETY: the mapping is live and `written` stays within its length
                            unsafe {
                                std::ptr::copy_nonoverlapping(data.as_ptr(), addr as *mut u8, written);
                            }
                        }
                    }

                    let result = Dequeued {
                        index,
                        bytes_used: written as u32,
                        flags: BufferFlags::DONE | BufferFlags::MAPPED,
                        sequence,
                    };
                    (Some(result), delay.unwrap_or(Duration::from_millis(1)))
                }
                (FakeFrame::Corrupt, Some(index)) => {
                    let sequence = node.sequence;
                    node.sequence = node.sequence.wrapping_add(1);
                    let result = Dequeued {
                        index,
                        bytes_used: 0,
                        flags: BufferFlags::ERROR | BufferFlags::MAPPED,
                        sequence,
                    };
                    (Some(result), delay.unwrap_or(Duration::from_millis(1)))
                }
                _ => (None, delay.unwrap_or(timeout).min(Duration::from_millis(5))),
            }
        };

        // outside the lock, other handles keep working while this one waits
        thread::sleep(delay.min(timeout));

        Ok(result)
    }

    fn stream_on(&self, fd: RawFd) -> io::Result<()> {
        let mut inner = self.lock();
        let node = inner.node(fd)?;
        if node.device.fail_stream_on {
            return Err(errno(libc::EIO));
        }
        if node.buffer_count == 0 {
            return Err(errno(libc::EINVAL));
        }

        node.streaming = true;
        Ok(())
    }

    fn stream_off(&self, fd: RawFd) -> io::Result<()> {
        let delay = self.lock().node(fd)?.device.stream_off_delay.take();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }

        let mut inner = self.lock();
        let node = inner.node(fd)?;
        node.streaming = false;
        node.queued.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> FakeDriver {
        FakeDriver::new().with_device(
            "/dev/video0",
            FakeDevice::new()
                .with_format(FourCC::YUYV, &[(4, 2)], &[30, 15])
                .with_frames([FakeFrame::yuyv(4, 2), FakeFrame::Corrupt]),
        )
    }

    #[test]
    fn open_counts_handles() {
        let driver = camera();
        let path = Path::new("/dev/video0");

        let a = driver.open(path).unwrap();
        let b = driver.open(path).unwrap();
        assert_eq!(driver.open_handles(), 2);
        assert_eq!(driver.max_concurrent_opens(path), 2);

        driver.close(a).unwrap();
        driver.close(b).unwrap();
        assert_eq!(driver.open_handles(), 0);
        assert!(driver.close(a).is_err());
    }

    #[test]
    fn missing_and_busy_nodes() {
        let driver = camera().with_device("/dev/video1", FakeDevice::new().busy());

        let err = driver.open(Path::new("/dev/video9")).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
        let err = driver.open(Path::new("/dev/video1")).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBUSY));
        assert_eq!(driver.open_handles(), 0);
    }

    #[test]
    fn dequeue_fills_mapped_memory() {
        let driver = camera();
        let fd = driver.open(Path::new("/dev/video0")).unwrap();

        assert_eq!(driver.request_buffers(fd, 2).unwrap(), 2);
        let info = driver.query_buffer(fd, 0).unwrap();
        assert_eq!(info.length, 16);
        let addr = driver.map(fd, &info).unwrap();
        driver.queue(fd, 0).unwrap();
        driver.stream_on(fd).unwrap();

        let buf = driver.dequeue(fd, Duration::from_millis(1)).unwrap().unwrap();
        assert_eq!(buf.index, 0);
        assert_eq!(buf.bytes_used, 16);
        let data = unsafe { std::slice::from_raw_parts(addr.as_ptr(), 16) };
        assert!(data.iter().all(|&b| b == 0x80));

        // nothing queued, the corrupt frame has no buffer to land in
        assert_eq!(driver.dequeue(fd, Duration::from_millis(1)).unwrap(), None);

        driver.queue(fd, 0).unwrap();
        let buf = driver.dequeue(fd, Duration::from_millis(1)).unwrap().unwrap();
        assert!(buf.flags.contains(BufferFlags::ERROR));

        driver.stream_off(fd).unwrap();
        unsafe { driver.unmap(addr, 16).unwrap() };
        driver.request_buffers(fd, 0).unwrap();
        driver.close(fd).unwrap();
        assert_eq!(driver.mapped_buffers(), 0);
        assert_eq!(driver.unmap_count(), 1);
    }

    #[test]
    fn double_queue_is_rejected() {
        let driver = camera();
        let fd = driver.open(Path::new("/dev/video0")).unwrap();
        driver.request_buffers(fd, 1).unwrap();
        driver.queue(fd, 0).unwrap();
        assert!(driver.queue(fd, 0).is_err());
        assert!(driver.queue(fd, 1).is_err());
        driver.close(fd).unwrap();
    }

    #[test]
    fn set_format_snaps_to_advertised() {
        let driver = camera();
        let fd = driver.open(Path::new("/dev/video0")).unwrap();

        let applied = driver
            .set_format(fd, &Format::new(1920, 1080, FourCC::MJPG))
            .unwrap();
        assert_eq!(applied.fourcc, FourCC::YUYV);
        assert_eq!((applied.width, applied.height), (4, 2));
        assert_eq!(applied.size, 16);
        driver.close(fd).unwrap();
    }
}
