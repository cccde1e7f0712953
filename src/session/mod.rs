//! One open camera.
//!
//! A [`CaptureSession`] owns everything tied to a device node: the [`Handle`], the
//! [`DeviceBufferPool`] and the negotiated format. It moves through [`State`] strictly via
//! [`State::transition`], so resources are always acquired and released in the same order:
//!
//! 1. `open`: the node is opened
//! 2. `negotiate`: format, size and rate are chosen from the [`FormatCatalog`] and applied
//! 3. `start`: buffers are mapped and queued, streaming is switched on
//! 4. `tick`: one bounded wait for a frame, repeated by the caller
//! 5. `teardown`: stream off, buffers released, node closed
//!
//! Teardown is idempotent and also runs when the session is dropped.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::buffer::{Dequeued, Flags as BufferFlags};
use crate::catalog::FormatCatalog;
use crate::codec;
use crate::config::Config;
use crate::driver::{Driver, Handle};
use crate::error::{Error, Result};
use crate::format::{Description, Format};
use crate::fourcc::FourCC;
use crate::fraction::Fraction;
use crate::frame::Frame;
use crate::framesize::Discrete;
use crate::pool::DeviceBufferPool;
use crate::queue::FrameQueue;

mod state;
pub use state::State;

/// Format parameters asked for by the caller
///
/// These are hints, zero means no preference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Requested {
    pub width: u32,
    pub height: u32,
    pub rate: u32,
}

impl Requested {
    pub fn new(width: u32, height: u32, rate: u32) -> Self {
        Requested {
            width,
            height,
            rate,
        }
    }
}

/// Format parameters in effect, as read back from the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    pub fourcc: FourCC,
    pub width: u32,
    pub height: u32,
    pub rate: u32,
    /// Frames are passed through instead of decoded
    pub compressed: bool,
}

/// Snapshot of a session, readable from any thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub device_number: u32,
    pub state: State,
    pub negotiated: Option<Negotiated>,
    /// Good frames pushed into the queue
    pub frames_captured: u64,
    /// Frames discarded by the queue because nobody picked them up
    pub frames_dropped: u64,
    pub consecutive_bad_frames: u32,
    /// Last failure, kept after the session recovers from it
    pub last_error: Option<String>,
}

impl SessionStatus {
    fn new(device_number: u32) -> Self {
        SessionStatus {
            device_number,
            state: State::Closed,
            negotiated: None,
            frames_captured: 0,
            frames_dropped: 0,
            consecutive_bad_frames: 0,
            last_error: None,
        }
    }
}

/// Result of one capture tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// A frame was converted and queued
    Frame,
    /// No frame, either nothing was ready or the buffer was unusable
    Bad,
}

/// Picks the pixel format to capture
///
/// In order of preference: `preferred` if the device advertises it and the codec can handle it,
/// the first compressed format, the first raw format the codec decodes, the first format.
pub fn select_format(formats: &[Description], preferred: FourCC) -> Option<&Description> {
    formats
        .iter()
        .find(|f| f.fourcc == preferred && codec::handles(f.fourcc))
        .or_else(|| formats.iter().find(|f| f.is_compressed()))
        .or_else(|| formats.iter().find(|f| codec::can_decode(f.fourcc)))
        .or_else(|| formats.first())
}

/// Picks the frame size closest to `width` x `height`
///
/// An exact match wins, otherwise the size with the smallest pixel-count difference. Ties go to
/// the size listed first.
pub fn select_size(sizes: &[Discrete], width: u32, height: u32) -> Option<Discrete> {
    let wanted = Discrete::new(width, height);
    if sizes.contains(&wanted) {
        return Some(wanted);
    }

    let mut best: Option<(Discrete, u64)> = None;
    for &size in sizes {
        let distance = size.area().abs_diff(wanted.area());
        match best {
            Some((_, best_distance)) if best_distance <= distance => {}
            _ => best = Some((size, distance)),
        }
    }

    best.map(|(size, _)| size)
}

/// Picks the frame rate closest to `requested`, ties go to the higher rate
///
/// Returns `requested` if the device lists no rates.
pub fn select_rate(rates: &[u32], requested: u32) -> u32 {
    let mut best: Option<u32> = None;
    for &rate in rates {
        best = match best {
            None => Some(rate),
            Some(current) => {
                let (d_new, d_cur) = (rate.abs_diff(requested), current.abs_diff(requested));
                if d_new < d_cur || (d_new == d_cur && rate > current) {
                    Some(rate)
                } else {
                    Some(current)
                }
            }
        };
    }

    best.unwrap_or(requested)
}

/// Owns one open device and turns its buffers into frames
pub struct CaptureSession {
    device_number: u32,
    path: PathBuf,
    driver: Arc<dyn Driver>,
    config: Config,
    requested: Requested,

    state: State,
    handle: Option<Handle>,
    pool: DeviceBufferPool,
    streaming: bool,
    negotiated: Option<Negotiated>,
    tick_timeout: Duration,

    consecutive_bad_frames: u32,
    frames_captured: u64,
    queue: Arc<FrameQueue>,
    status: Arc<Mutex<SessionStatus>>,
}

impl CaptureSession {
    /// Creates a closed session for `/dev/video<device_number>` (prefix from `config`)
    pub fn new(
        device_number: u32,
        requested: Requested,
        driver: Arc<dyn Driver>,
        config: &Config,
    ) -> Self {
        CaptureSession {
            device_number,
            path: config.device_path(device_number),
            driver,
            config: config.clone(),
            requested,
            state: State::Closed,
            handle: None,
            pool: DeviceBufferPool::new(),
            streaming: false,
            negotiated: None,
            tick_timeout: config.tick_timeout(requested.rate),
            consecutive_bad_frames: 0,
            frames_captured: 0,
            queue: Arc::new(FrameQueue::new(config.queue_capacity)),
            status: Arc::new(Mutex::new(SessionStatus::new(device_number))),
        }
    }

    pub fn device_number(&self) -> u32 {
        self.device_number
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn requested(&self) -> Requested {
        self.requested
    }

    pub fn negotiated(&self) -> Option<Negotiated> {
        self.negotiated
    }

    pub fn consecutive_bad_frames(&self) -> u32 {
        self.consecutive_bad_frames
    }

    /// The queue frames are published to
    pub fn queue(&self) -> Arc<FrameQueue> {
        Arc::clone(&self.queue)
    }

    /// Shared status board, updated on every state change and tick
    pub fn status_board(&self) -> Arc<Mutex<SessionStatus>> {
        Arc::clone(&self.status)
    }

    pub fn status(&self) -> SessionStatus {
        self.lock_status().clone()
    }

    fn lock_status(&self) -> MutexGuard<'_, SessionStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, last_error: Option<&Error>) {
        let mut status = self.lock_status();
        status.state = self.state;
        status.negotiated = self.negotiated;
        status.frames_captured = self.frames_captured;
        status.frames_dropped = self.queue.dropped();
        status.consecutive_bad_frames = self.consecutive_bad_frames;
        if let Some(e) = last_error {
            status.last_error = Some(e.to_string());
        }
    }

    fn transition(&mut self, to: State) -> Result<()> {
        let from = self.state;
        self.state = from.transition(to)?;
        debug!(device = %self.path.display(), %from, %to, "session state");
        self.publish(None);
        Ok(())
    }

    /// Moves to `Error`, recording the cause
    fn fail(&mut self, cause: Error) -> Error {
        if let Err(e) = self.transition(State::Error) {
            warn!(device = %self.path.display(), error = %e, "cannot enter error state");
        }
        self.publish(Some(&cause));
        cause
    }

    fn handle(&self) -> Result<&Handle> {
        self.handle
            .as_ref()
            .ok_or_else(|| Error::Io(std::io::Error::from_raw_os_error(libc::EBADF)))
    }

    /// Opens the device node
    ///
    /// On failure the session is back in `Closed` holding nothing.
    pub fn open(&mut self) -> Result<()> {
        self.transition(State::Opening)?;

        match Handle::open(Arc::clone(&self.driver), &self.path) {
            Ok(handle) => {
                debug!(device = %self.path.display(), fd = handle.fd(), "device opened");
                self.handle = Some(handle);
                Ok(())
            }
            Err(source) => {
                let err = Error::DeviceOpen {
                    path: self.path.clone(),
                    source,
                };
                error!(device = %self.path.display(), error = %err, "cannot open device");
                self.transition(State::Closed)?;
                self.publish(Some(&err));
                Err(err)
            }
        }
    }

    /// Chooses and applies the capture format
    ///
    /// A device that cannot enumerate its capabilities gets the configured fallback format.
    /// Returns the format the driver settled on.
    pub fn negotiate(&mut self) -> Result<Negotiated> {
        self.transition(State::Negotiating)?;

        let target = match self.choose() {
            Ok(target) => target,
            Err(Error::Enumeration(reason)) => {
                let format = self.config.fallback_format;
                let rate = match self.requested.rate {
                    0 => self.config.fallback_rate,
                    rate => rate,
                };
                warn!(
                    device = %self.path.display(),
                    %reason,
                    fourcc = %format.fourcc,
                    width = format.width,
                    height = format.height,
                    rate,
                    "enumeration failed, using fallback format"
                );
                Target {
                    format,
                    rate,
                    compressed: format.fourcc.is_compressed(),
                }
            }
            Err(e) => return Err(self.fail(e)),
        };

        match self.apply(&target) {
            Ok(negotiated) => {
                info!(
                    device = %self.path.display(),
                    fourcc = %negotiated.fourcc,
                    width = negotiated.width,
                    height = negotiated.height,
                    rate = negotiated.rate,
                    compressed = negotiated.compressed,
                    "format negotiated"
                );
                self.negotiated = Some(negotiated);
                self.tick_timeout = self.config.tick_timeout(negotiated.rate);
                self.publish(None);
                Ok(negotiated)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn choose(&self) -> Result<Target> {
        let handle = self.handle()?;
        let mut catalog = FormatCatalog::new();

        let formats = catalog.formats(handle)?;
        let desc = select_format(formats, self.config.preferred_format)
            .cloned()
            .ok_or_else(|| Error::Enumeration("no formats".into()))?;
        debug!(device = %self.path.display(), fourcc = %desc.fourcc, "pixel format chosen");

        let Requested {
            width,
            height,
            rate,
        } = self.requested;
        let wants_size = width > 0 && height > 0;
        let sizes = catalog.sizes(handle, desc.fourcc);
        let size = match sizes {
            sizes if wants_size && !sizes.is_empty() => select_size(sizes, width, height),
            _ => None,
        };
        let size = match size {
            Some(size) => size,
            None => {
                let current = handle.driver().format(handle.fd()).map_err(|source| {
                    Error::Negotiation {
                        step: "reading the current format",
                        source,
                    }
                })?;
                Discrete::new(current.width, current.height)
            }
        };

        let rates = catalog.rates(handle, desc.fourcc, size);
        let rate = match (rate, rates.iter().max()) {
            (0, Some(&fastest)) => fastest,
            (0, None) => self.config.fallback_rate,
            (rate, _) => select_rate(rates, rate),
        };

        Ok(Target {
            format: Format::new(size.width, size.height, desc.fourcc),
            rate,
            compressed: desc.is_compressed(),
        })
    }

    fn apply(&self, target: &Target) -> Result<Negotiated> {
        let handle = self.handle()?;
        let driver = handle.driver();

        let applied = driver
            .set_format(handle.fd(), &target.format)
            .map_err(|source| Error::Negotiation {
                step: "setting the format",
                source,
            })?;
        let interval = driver
            .set_interval(handle.fd(), Fraction::from_fps(target.rate))
            .map_err(|source| Error::Negotiation {
                step: "setting the frame rate",
                source,
            })?;

        let compressed = if applied.fourcc == target.format.fourcc {
            target.compressed
        } else {
            applied.fourcc.is_compressed()
        };
        let rate = match interval.fps() {
            0 => target.rate,
            fps => fps,
        };

        Ok(Negotiated {
            fourcc: applied.fourcc,
            width: applied.width,
            height: applied.height,
            rate,
            compressed,
        })
    }

    /// Maps and queues buffers, then turns the stream on
    pub fn start(&mut self) -> Result<()> {
        if self.state != State::Negotiating || self.negotiated.is_none() {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: State::Streaming,
            });
        }

        if let Err(e) = self.start_stream() {
            return Err(self.fail(e));
        }

        self.transition(State::Streaming)?;
        info!(device = %self.path.display(), buffers = self.pool.len(), "stream started");
        Ok(())
    }

    fn start_stream(&mut self) -> Result<()> {
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| Error::Io(std::io::Error::from_raw_os_error(libc::EBADF)))?;

        self.pool.allocate(handle, self.config.buffer_count)?;
        self.pool.queue_all(handle)?;
        handle
            .driver()
            .stream_on(handle.fd())
            .map_err(|source| Error::Negotiation {
                step: "starting the stream",
                source,
            })?;
        self.streaming = true;
        Ok(())
    }

    /// Runs open, negotiate and start in sequence
    ///
    /// On failure the session is left in `Closed` or `Error`, the caller is expected to tear it
    /// down.
    pub fn open_and_start(&mut self) -> Result<Negotiated> {
        self.open()?;
        let negotiated = self.negotiate()?;
        self.start()?;
        Ok(negotiated)
    }

    /// Waits once for a filled buffer and publishes it
    ///
    /// Missing or malformed buffers count as bad frames, malformed buffers are requeued all the
    /// same. Once the configured number of consecutive bad frames is reached the session moves
    /// to `Error` and this returns [`Error::HealthDegraded`].
    pub fn tick(&mut self) -> Result<Tick> {
        if self.state != State::Streaming {
            return Err(Error::FrameRead(format!("session is {}", self.state)));
        }
        let negotiated = match self.negotiated {
            Some(negotiated) => negotiated,
            None => return Err(Error::FrameRead("no format negotiated".into())),
        };
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| Error::Io(std::io::Error::from_raw_os_error(libc::EBADF)))?;

        let buf = match self.pool.dequeue_one(handle, self.tick_timeout) {
            Ok(Some(buf)) => buf,
            Ok(None) => return self.bad_frame(None),
            Err(e) => return self.bad_frame(Some(e)),
        };

        let options = codec::Options {
            insert_huffman_table: self.config.insert_huffman_table,
        };
        let result = decode(&self.pool, &buf, &negotiated, &options);

        if let Err(e) = self.pool.requeue(handle, buf.index) {
            warn!(device = %self.path.display(), index = buf.index, error = %e, "requeue failed");
        }

        match result {
            Ok(frame) => {
                self.queue.push(frame);
                self.consecutive_bad_frames = 0;
                self.frames_captured += 1;
                self.publish(None);
                Ok(Tick::Frame)
            }
            Err(e) => self.bad_frame(Some(e)),
        }
    }

    fn bad_frame(&mut self, cause: Option<Error>) -> Result<Tick> {
        self.consecutive_bad_frames += 1;
        match &cause {
            Some(e) => warn!(
                device = %self.path.display(),
                count = self.consecutive_bad_frames,
                error = %e,
                "bad frame"
            ),
            None => debug!(
                device = %self.path.display(),
                count = self.consecutive_bad_frames,
                "no frame ready"
            ),
        }

        let threshold = self.config.bad_frame_threshold;
        if self.consecutive_bad_frames >= threshold {
            let err = Error::HealthDegraded(self.consecutive_bad_frames);
            error!(device = %self.path.display(), threshold, "stream unhealthy");
            return Err(self.fail(err));
        }

        self.publish(cause.as_ref());
        Ok(Tick::Bad)
    }

    /// Stops streaming and releases everything the session holds
    ///
    /// Steps that were never reached are skipped. Safe to call in any state and any number of
    /// times, the session always ends up `Closed`. Returns the first error encountered.
    pub fn teardown(&mut self) -> Result<()> {
        if self.state == State::Closed && self.handle.is_none() && self.pool.is_empty() {
            return Ok(());
        }

        if self.state != State::Closed {
            self.transition(State::Stopping)?;
        }

        let mut result = Ok(());
        let path = self.path.display().to_string();

        if let Some(handle) = self.handle.as_ref() {
            if self.streaming {
                if let Err(e) = handle.driver().stream_off(handle.fd()) {
                    warn!(device = %path, error = %e, "stream off failed");
                    result = Err(Error::Io(e));
                }
                self.streaming = false;
                info!(device = %path, "stream stopped");
            }

            if let Err(e) = self.pool.release(handle) {
                warn!(device = %path, error = %e, "releasing buffers failed");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.close() {
                warn!(device = %path, error = %e, "closing device failed");
                if result.is_ok() {
                    result = Err(Error::Io(e));
                }
            }
            debug!(device = %path, "device closed");
        }

        if self.state == State::Stopping {
            self.transition(State::Closed)?;
        }
        result
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!(device = %self.path.display(), error = %e, "teardown on drop failed");
        }
    }
}

struct Target {
    format: Format,
    rate: u32,
    compressed: bool,
}

fn decode(
    pool: &DeviceBufferPool,
    buf: &Dequeued,
    negotiated: &Negotiated,
    options: &codec::Options,
) -> Result<Frame> {
    if buf.flags.contains(BufferFlags::ERROR) {
        return Err(Error::FrameRead(format!("buffer {} flagged as corrupt", buf.index)));
    }
    if buf.bytes_used == 0 {
        return Err(Error::FrameRead(format!("buffer {} is empty", buf.index)));
    }

    let raw = pool
        .data(buf.index, buf.bytes_used)
        .ok_or_else(|| Error::FrameRead(format!("buffer {} is not readable", buf.index)))?;
    let encoded = codec::encode(raw, negotiated, options)?;

    Ok(Frame {
        data: encoded.data,
        fourcc: encoded.fourcc,
        compressed: encoded.compressed,
        width: negotiated.width,
        height: negotiated.height,
        rate: negotiated.rate,
        sequence: buf.sequence,
    })
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("device_number", &self.device_number)
            .field("path", &self.path)
            .field("state", &self.state)
            .field("negotiated", &self.negotiated)
            .field("buffers", &self.pool.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::{FakeDevice, FakeDriver, FakeFrame};
    use crate::format::Flags;

    fn desc(index: u32, fourcc: FourCC) -> Description {
        Description::new(index, fourcc)
    }

    fn session(driver: &Arc<FakeDriver>, requested: Requested) -> CaptureSession {
        let config = Config::default().with_dequeue_timeout(Duration::from_millis(1));
        CaptureSession::new(0, requested, driver.clone(), &config)
    }

    fn fake(device: FakeDevice) -> Arc<FakeDriver> {
        Arc::new(FakeDriver::new().with_device("/dev/video0", device))
    }

    #[test]
    fn format_preference_order() {
        let yuyv = desc(0, FourCC::YUYV);
        let mjpg = desc(1, FourCC::MJPG);
        let grey = desc(2, FourCC::new(b"GREY"));
        let rgb = desc(3, FourCC::RGB3);

        let formats = [yuyv.clone(), mjpg.clone()];
        assert_eq!(select_format(&formats, FourCC::YUYV), Some(&yuyv));
        assert_eq!(select_format(&formats, FourCC::MJPG), Some(&mjpg));
        assert_eq!(select_format(&formats, FourCC::UYVY), Some(&mjpg));

        let formats = [grey.clone(), rgb.clone()];
        assert_eq!(select_format(&formats, FourCC::YUYV), Some(&rgb));

        let formats = [grey.clone()];
        assert_eq!(select_format(&formats, FourCC::YUYV), Some(&grey));
        assert_eq!(select_format(&[], FourCC::YUYV), None);
    }

    #[test]
    fn compressed_flag_counts_as_compressed() {
        let mut h265 = desc(0, FourCC::new(b"HEVC"));
        h265.flags |= Flags::COMPRESSED;
        let formats = [desc(1, FourCC::new(b"GREY")), h265.clone()];
        assert_eq!(select_format(&formats, FourCC::YUYV), Some(&h265));
    }

    #[test]
    fn size_selection() {
        let sizes = [
            Discrete::new(1280, 720),
            Discrete::new(640, 480),
            Discrete::new(320, 240),
        ];
        assert_eq!(select_size(&sizes, 640, 480), Some(Discrete::new(640, 480)));
        assert_eq!(select_size(&sizes, 800, 600), Some(Discrete::new(640, 480)));
        assert_eq!(select_size(&sizes, 4000, 3000), Some(Discrete::new(1280, 720)));
        assert_eq!(select_size(&[], 640, 480), None);

        // 200x100 and 100x200 are equally far, the first listed wins
        let sizes = [Discrete::new(200, 100), Discrete::new(100, 200)];
        assert_eq!(select_size(&sizes, 150, 150), Some(Discrete::new(200, 100)));
    }

    #[test]
    fn rate_selection() {
        assert_eq!(select_rate(&[30, 15, 5], 30), 30);
        assert_eq!(select_rate(&[30, 15, 5], 25), 30);
        assert_eq!(select_rate(&[30, 15, 5], 9), 5);
        // 10 is as far from 5 as from 15
        assert_eq!(select_rate(&[5, 15], 10), 15);
        assert_eq!(select_rate(&[], 24), 24);
    }

    #[test]
    fn streaming_lifecycle() {
        let driver = fake(
            FakeDevice::new()
                .with_format(FourCC::YUYV, &[(4, 2)], &[30])
                .with_frames([FakeFrame::yuyv(4, 2)]),
        );
        let mut session = session(&driver, Requested::new(4, 2, 30));

        let negotiated = session.open_and_start().unwrap();
        assert_eq!(session.state(), State::Streaming);
        assert_eq!(negotiated.fourcc, FourCC::YUYV);
        assert!(!negotiated.compressed);
        assert_eq!(driver.mapped_buffers(), 4);

        assert_eq!(session.tick().unwrap(), Tick::Frame);
        let frame = session.queue().pop().unwrap();
        assert_eq!(frame.fourcc, FourCC::RGB3);
        assert_eq!(frame.data.len(), 4 * 2 * 3);
        assert_eq!((frame.width, frame.height, frame.rate), (4, 2, 30));

        session.teardown().unwrap();
        assert_eq!(session.state(), State::Closed);
        assert_eq!(driver.open_handles(), 0);
        assert_eq!(driver.mapped_buffers(), 0);

        // idempotent
        session.teardown().unwrap();
        assert_eq!(driver.unmap_count(), 4);
    }

    #[test]
    fn open_missing_device() {
        let driver = Arc::new(FakeDriver::new());
        let mut session = session(&driver, Requested::new(640, 480, 30));

        assert!(matches!(session.open(), Err(Error::DeviceOpen { .. })));
        assert_eq!(session.state(), State::Closed);
        assert!(session.status().last_error.is_some());
        session.teardown().unwrap();
        assert_eq!(driver.open_handles(), 0);
    }

    #[test]
    fn compressed_only_device() {
        let driver = fake(
            FakeDevice::new()
                .with_format(FourCC::MJPG, &[(1280, 720), (640, 480)], &[30, 15])
                .with_format(FourCC::H264, &[(1280, 720)], &[30])
                .with_frames([FakeFrame::jpeg(16)]),
        );
        let mut session = session(&driver, Requested::new(640, 480, 30));

        let negotiated = session.open_and_start().unwrap();
        assert_eq!(negotiated.fourcc, FourCC::MJPG);
        assert!(negotiated.compressed);
        assert_eq!((negotiated.width, negotiated.height), (640, 480));

        assert_eq!(session.tick().unwrap(), Tick::Frame);
        let frame = session.queue().pop().unwrap();
        assert!(frame.compressed);
        assert_eq!(&frame.data[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn read_back_values_win() {
        let driver = fake(
            FakeDevice::new()
                .with_format(FourCC::YUYV, &[(640, 480)], &[30])
                .adjusting_format_to(Format::new(320, 240, FourCC::YUYV))
                .adjusting_rate_to(15),
        );
        let mut session = session(&driver, Requested::new(640, 480, 30));

        let negotiated = session.open_and_start().unwrap();
        assert_eq!((negotiated.width, negotiated.height), (320, 240));
        assert_eq!(negotiated.rate, 15);
    }

    #[test]
    fn enumeration_failure_uses_fallback() {
        let driver = fake(FakeDevice::new().failing_enumeration());
        let mut session = session(&driver, Requested::new(1920, 1080, 60));

        let negotiated = session.open_and_start().unwrap();
        assert_eq!(negotiated.fourcc, FourCC::YUYV);
        assert_eq!((negotiated.width, negotiated.height), (640, 480));
        assert_eq!(negotiated.rate, 60);
    }

    #[test]
    fn driver_rejection_is_a_negotiation_error() {
        let driver = fake(
            FakeDevice::new()
                .with_format(FourCC::YUYV, &[(640, 480)], &[30])
                .rejecting_format(),
        );
        let mut session = session(&driver, Requested::new(640, 480, 30));

        session.open().unwrap();
        assert!(matches!(
            session.negotiate(),
            Err(Error::Negotiation { .. })
        ));
        assert_eq!(session.state(), State::Error);

        session.teardown().unwrap();
        assert_eq!(session.state(), State::Closed);
        assert_eq!(driver.open_handles(), 0);
    }

    #[test]
    fn stream_on_failure_releases_buffers() {
        let driver = fake(
            FakeDevice::new()
                .with_format(FourCC::YUYV, &[(640, 480)], &[30])
                .failing_stream_on(),
        );
        let mut session = session(&driver, Requested::new(640, 480, 30));

        assert!(session.open_and_start().is_err());
        assert_eq!(session.state(), State::Error);
        drop(session);
        assert_eq!(driver.mapped_buffers(), 0);
        assert_eq!(driver.open_handles(), 0);
    }

    #[test]
    fn health_threshold() {
        let threshold = 10;
        let driver = fake(
            FakeDevice::new()
                .with_format(FourCC::YUYV, &[(4, 2)], &[30])
                .with_frames(std::iter::repeat(FakeFrame::NotReady).take(threshold - 1))
                .with_frames([FakeFrame::yuyv(4, 2)])
                .with_frames(std::iter::repeat(FakeFrame::Corrupt).take(threshold)),
        );
        let mut session = session(&driver, Requested::new(4, 2, 30));
        session.open_and_start().unwrap();

        for _ in 0..threshold - 1 {
            assert_eq!(session.tick().unwrap(), Tick::Bad);
        }
        assert_eq!(session.consecutive_bad_frames(), threshold as u32 - 1);
        assert_eq!(session.tick().unwrap(), Tick::Frame);
        assert_eq!(session.consecutive_bad_frames(), 0);
        assert_eq!(session.state(), State::Streaming);

        for _ in 0..threshold - 1 {
            assert_eq!(session.tick().unwrap(), Tick::Bad);
        }
        assert!(matches!(session.tick(), Err(Error::HealthDegraded(10))));
        assert_eq!(session.state(), State::Error);
        assert!(session.tick().is_err());

        // corrupt buffers went back to the driver every time
        let handle_queued = session.pool.queued();
        assert_eq!(handle_queued, 4);
    }

    #[test]
    fn short_raw_frame_is_bad() {
        let driver = fake(
            FakeDevice::new()
                .with_format(FourCC::YUYV, &[(4, 2)], &[30])
                .with_frames([FakeFrame::Ready(vec![0x80; 10])]),
        );
        let mut session = session(&driver, Requested::new(4, 2, 30));
        session.open_and_start().unwrap();

        assert_eq!(session.tick().unwrap(), Tick::Bad);
        assert!(session.queue().is_empty());
        assert_eq!(session.status().consecutive_bad_frames, 1);
    }
}
