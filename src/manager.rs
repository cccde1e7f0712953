//! Sessions indexed by camera number.
//!
//! Every open camera runs on its own worker thread, which owns the [`CaptureSession`] and is
//! the only code touching its device. The manager keeps the frame queue and status board of
//! each worker in a registry so `get_frame` never waits on device I/O.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use std::{fmt, io};

use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::device;
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::queue::FrameQueue;
use crate::session::{CaptureSession, Negotiated, Requested, SessionStatus};

/// Interval at which an unhealthy worker checks whether it was told to stop
const PARK_INTERVAL: Duration = Duration::from_millis(100);

struct SessionHandle {
    queue: Arc<FrameQueue>,
    status: Arc<Mutex<SessionStatus>>,
    stop_flag: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    // disconnects once the worker has finished its teardown
    done_rx: Receiver<()>,
}

impl SessionHandle {
    fn signal(&self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(thread) = &self.thread {
            thread.thread().unpark();
        }
    }
}

/// Opens, polls and closes cameras by number
///
/// ## Example
///
/// ```no_run
/// use uvccam::{CaptureSessionManager, Config};
///
/// let manager = CaptureSessionManager::with_v4l2(Config::default());
/// if manager.open(0, 640, 480, 30) {
///     if let Some(frame) = manager.get_frame(0) {
///         println!("{}x{} {}", frame.width, frame.height, frame.fourcc);
///     }
///     manager.close(0);
/// }
/// ```
pub struct CaptureSessionManager {
    driver: Arc<dyn Driver>,
    config: Config,
    sessions: Mutex<HashMap<i32, SessionHandle>>,
    // one per camera number, held across the blocking part of open and close
    gates: Mutex<HashMap<i32, Arc<Mutex<Gate>>>>,
}

/// Per-camera serialization of open and close
#[derive(Default)]
struct Gate {
    // a worker that missed the stop timeout and may still hold the device
    draining: Option<SessionHandle>,
}

impl CaptureSessionManager {
    pub fn new(driver: Arc<dyn Driver>, config: Config) -> Self {
        CaptureSessionManager {
            driver,
            config,
            sessions: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// A manager talking to the kernel video4linux2 driver
    #[cfg(feature = "v4l2")]
    pub fn with_v4l2(config: Config) -> Self {
        Self::new(Arc::new(crate::driver::v4l2::V4l2Driver::new()), config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<i32, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn gate(&self, camera_index: i32) -> Arc<Mutex<Gate>> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(gates.entry(camera_index).or_default())
    }

    /// Opens camera `camera_index` and starts streaming
    ///
    /// Width, height and rate are hints, zero or negative values leave the choice to the
    /// device. A session already running on this index is closed first. Returns false if the
    /// index is negative or the camera cannot be started.
    pub fn open(&self, camera_index: i32, width: i32, height: i32, rate: i32) -> bool {
        match self.try_open(camera_index, width, height, rate) {
            Ok(_) => true,
            Err(e) => {
                error!(index = camera_index, error = %e, "open failed");
                false
            }
        }
    }

    /// Like [`CaptureSessionManager::open`], reporting what was negotiated or why it failed
    pub fn try_open(
        &self,
        camera_index: i32,
        width: i32,
        height: i32,
        rate: i32,
    ) -> Result<Negotiated> {
        let device_number =
            u32::try_from(camera_index).map_err(|_| Error::InvalidDevice(camera_index))?;
        let requested = Requested::new(hint(width), hint(height), hint(rate));

        let gate = self.gate(camera_index);
        let mut gate = gate.lock().unwrap_or_else(PoisonError::into_inner);

        let existing = self.registry().remove(&camera_index);
        if let Some(existing) = existing {
            info!(index = camera_index, "closing previous session");
            gate.draining = self.stop(camera_index, existing, self.config.stop_timeout);
        }
        if let Some(draining) = gate.draining.take() {
            // the previous worker must be gone before the device is opened again
            debug!(index = camera_index, "waiting for previous capture worker");
            if let Some(draining) = self.stop(camera_index, draining, self.config.open_timeout) {
                gate.draining = Some(draining);
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    "previous session on this camera is still shutting down",
                )));
            }
        }

        let session = CaptureSession::new(
            device_number,
            requested,
            Arc::clone(&self.driver),
            &self.config,
        );
        let queue = session.queue();
        let status = session.status_board();
        let stop_flag = Arc::new(AtomicBool::new(false));
        let (init_tx, init_rx) = mpsc::sync_channel(1);
        let (done_tx, done_rx) = mpsc::channel();

        let worker_flag = Arc::clone(&stop_flag);
        let thread = thread::Builder::new()
            .name(format!("uvccam-video{}", device_number))
            .spawn(move || run_worker(session, worker_flag, init_tx, done_tx))?;

        let handle = SessionHandle {
            queue,
            status,
            stop_flag,
            thread: Some(thread),
            done_rx,
        };

        match init_rx.recv_timeout(self.config.open_timeout) {
            Ok(Ok(negotiated)) => {
                self.registry().insert(camera_index, handle);
                info!(
                    index = camera_index,
                    fourcc = %negotiated.fourcc,
                    width = negotiated.width,
                    height = negotiated.height,
                    rate = negotiated.rate,
                    "camera open"
                );
                Ok(negotiated)
            }
            Ok(Err(e)) => {
                gate.draining = self.stop(camera_index, handle, self.config.stop_timeout);
                Err(e)
            }
            Err(RecvTimeoutError::Timeout) => {
                gate.draining = self.stop(camera_index, handle, self.config.stop_timeout);
                Err(Error::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "camera did not start in time",
                )))
            }
            Err(RecvTimeoutError::Disconnected) => {
                gate.draining = self.stop(camera_index, handle, self.config.stop_timeout);
                Err(Error::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "capture worker exited during start",
                )))
            }
        }
    }

    /// Closes camera `camera_index`, returns false if it was not open
    pub fn close(&self, camera_index: i32) -> bool {
        let gate = self.gate(camera_index);
        let mut gate = gate.lock().unwrap_or_else(PoisonError::into_inner);

        let handle = self.registry().remove(&camera_index);
        match handle {
            Some(handle) => {
                gate.draining = self.stop(camera_index, handle, self.config.stop_timeout);
                info!(index = camera_index, "camera closed");
                true
            }
            None => {
                debug!(index = camera_index, "close on a camera that is not open");
                false
            }
        }
    }

    /// Takes the oldest queued frame of a camera without waiting
    pub fn get_frame(&self, camera_index: i32) -> Option<Frame> {
        let queue = self
            .registry()
            .get(&camera_index)
            .map(|h| Arc::clone(&h.queue))?;
        queue.pop()
    }

    /// Current status of a camera, `None` if it is not open
    pub fn status(&self, camera_index: i32) -> Option<SessionStatus> {
        let status = self
            .registry()
            .get(&camera_index)
            .map(|h| Arc::clone(&h.status))?;
        let status = status.lock().unwrap_or_else(PoisonError::into_inner).clone();
        Some(status)
    }

    pub fn is_open(&self, camera_index: i32) -> bool {
        self.registry().contains_key(&camera_index)
    }

    /// Whether the device node of a camera index exists
    pub fn device_exists(&self, camera_index: i32) -> bool {
        match u32::try_from(camera_index) {
            Ok(index) => device::exists(&self.config, index),
            Err(_) => false,
        }
    }

    /// Indices of all open cameras, ascending
    pub fn open_devices(&self) -> Vec<i32> {
        let mut indices: Vec<i32> = self.registry().keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    /// Closes every camera
    pub fn shutdown(&self) {
        let indices: Vec<i32> = {
            let registry = self.registry();
            // signal everyone first so the workers wind down in parallel
            for handle in registry.values() {
                handle.signal();
            }
            registry.keys().copied().collect()
        };
        if indices.is_empty() {
            return;
        }

        for index in indices {
            self.close(index);
        }
        info!("all cameras closed");
    }

    /// Tells a worker to stop and waits up to `timeout` for its teardown
    ///
    /// Returns the handle back if the worker is still running when the wait runs out.
    fn stop(
        &self,
        camera_index: i32,
        mut handle: SessionHandle,
        timeout: Duration,
    ) -> Option<SessionHandle> {
        handle.signal();

        match handle.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(thread) = handle.thread.take() {
                    if thread.join().is_err() {
                        error!(index = camera_index, "capture worker panicked");
                    }
                }
                None
            }
            Err(RecvTimeoutError::Timeout) => {
                // the worker tears down on its own once its current call returns
                warn!(
                    index = camera_index,
                    timeout = ?timeout,
                    "capture worker did not stop in time"
                );
                Some(handle)
            }
        }
    }
}

impl Drop for CaptureSessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for CaptureSessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureSessionManager")
            .field("config", &self.config)
            .field("open", &self.open_devices())
            .finish()
    }
}

/// Negative hints mean no preference
fn hint(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn run_worker(
    mut session: CaptureSession,
    stop_flag: Arc<AtomicBool>,
    init_tx: SyncSender<Result<Negotiated>>,
    _done_tx: Sender<()>,
) {
    let device = session.path().display().to_string();

    match session.open_and_start() {
        Ok(negotiated) => {
            if init_tx.send(Ok(negotiated)).is_err() {
                // nobody waits for us anymore, open gave up
                stop_flag.store(true, Ordering::Release);
            }
            capture_loop(&mut session, &stop_flag);
        }
        Err(e) => {
            let _ = init_tx.send(Err(e));
        }
    }

    if let Err(e) = session.teardown() {
        warn!(device = %device, error = %e, "teardown failed");
    }
    debug!(device = %device, "capture worker exiting");
}

fn capture_loop(session: &mut CaptureSession, stop_flag: &AtomicBool) {
    while !stop_flag.load(Ordering::Acquire) {
        if let Err(e) = session.tick() {
            debug!(device = %session.path().display(), error = %e, "capture halted");
            break;
        }
    }

    // an unhealthy session stays in Error until it is closed
    while !stop_flag.load(Ordering::Acquire) {
        thread::park_timeout(PARK_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::{FakeDevice, FakeDriver, FakeFrame};
    use crate::fourcc::FourCC;

    fn manager(driver: &Arc<FakeDriver>) -> CaptureSessionManager {
        let config = Config::default().with_dequeue_timeout(Duration::from_millis(2));
        CaptureSessionManager::new(driver.clone(), config)
    }

    #[test]
    fn negative_index_is_rejected() {
        let driver = Arc::new(FakeDriver::new());
        let manager = manager(&driver);

        assert!(!manager.open(-1, 640, 480, 30));
        assert!(matches!(
            manager.try_open(-3, 640, 480, 30),
            Err(Error::InvalidDevice(-3))
        ));
        assert!(!manager.close(-1));
        assert!(manager.get_frame(-1).is_none());
        assert!(!manager.device_exists(-1));
        assert_eq!(driver.total_opens(), 0);
    }

    #[test]
    fn open_get_close() {
        let driver = Arc::new(FakeDriver::new().with_device(
            "/dev/video2",
            FakeDevice::new()
                .with_format(FourCC::YUYV, &[(4, 2)], &[30])
                .with_default_frame(FakeFrame::yuyv(4, 2)),
        ));
        let manager = manager(&driver);

        assert!(manager.open(2, 4, 2, 30));
        assert!(manager.is_open(2));
        assert_eq!(manager.open_devices(), vec![2]);

        let frame = (0..500)
            .find_map(|_| {
                thread::sleep(Duration::from_millis(2));
                manager.get_frame(2)
            })
            .expect("no frame arrived");
        assert_eq!((frame.width, frame.height, frame.rate), (4, 2, 30));

        let status = manager.status(2).unwrap();
        assert_eq!(status.device_number, 2);
        assert!(status.frames_captured > 0);

        assert!(manager.close(2));
        assert!(!manager.close(2));
        assert!(manager.status(2).is_none());
        assert_eq!(driver.open_handles(), 0);
        assert_eq!(driver.mapped_buffers(), 0);
    }

    #[test]
    fn failed_open_leaves_slot_empty() {
        let driver = Arc::new(FakeDriver::new());
        let manager = manager(&driver);

        assert!(!manager.open(0, 640, 480, 30));
        assert!(!manager.is_open(0));
        assert!(manager.open_devices().is_empty());
    }

    #[test]
    fn shutdown_with_nothing_open() {
        let driver = Arc::new(FakeDriver::new());
        let manager = manager(&driver);
        manager.shutdown();
        manager.shutdown();
    }

    #[test]
    fn hints() {
        assert_eq!(hint(-5), 0);
        assert_eq!(hint(0), 0);
        assert_eq!(hint(640), 640);
    }
}
