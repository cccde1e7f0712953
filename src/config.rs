//! Capture engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::format::Format;
use crate::fourcc::FourCC;

/// Tunables shared by every session a manager creates.
///
/// ## Example
///
/// ```
/// use std::time::Duration;
/// use uvccam::{Config, FourCC};
///
/// let config = Config::default()
///     .with_preferred_format(FourCC::MJPG)
///     .with_buffer_count(6)
///     .with_stop_timeout(Duration::from_millis(500));
/// assert_eq!(config.queue_capacity, 5);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Device node prefix, the camera index is appended (`/dev/video` + `0`).
    pub device_prefix: PathBuf,
    /// Number of kernel buffers requested per session.
    pub buffer_count: u32,
    /// Frames kept per session before the oldest is dropped.
    pub queue_capacity: usize,
    /// Consecutive bad ticks after which a session is declared unhealthy.
    pub bad_frame_threshold: u32,
    /// Pixel format tried first during negotiation.
    pub preferred_format: FourCC,
    /// Format and rate used when the device cannot enumerate its capabilities.
    pub fallback_format: Format,
    pub fallback_rate: u32,
    /// Bounded wait of a single capture tick. `None` derives one frame period from the rate.
    pub dequeue_timeout: Option<Duration>,
    /// How long `close` waits for a session worker before detaching it.
    pub stop_timeout: Duration,
    /// How long `open` waits for a session to report its negotiation result.
    pub open_timeout: Duration,
    /// Insert the standard Huffman tables into MJPEG frames that lack them.
    pub insert_huffman_table: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_prefix: PathBuf::from("/dev/video"),
            buffer_count: 4,
            queue_capacity: 5,
            bad_frame_threshold: 10,
            preferred_format: FourCC::YUYV,
            fallback_format: Format::new(640, 480, FourCC::YUYV),
            fallback_rate: 30,
            dequeue_timeout: None,
            stop_timeout: Duration::from_secs(2),
            open_timeout: Duration::from_secs(5),
            insert_huffman_table: false,
        }
    }
}

impl Config {
    pub fn with_device_prefix(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.device_prefix = prefix.into();
        self
    }

    pub fn with_buffer_count(mut self, count: u32) -> Self {
        self.buffer_count = count;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_bad_frame_threshold(mut self, threshold: u32) -> Self {
        self.bad_frame_threshold = threshold.max(1);
        self
    }

    pub fn with_preferred_format(mut self, fourcc: FourCC) -> Self {
        self.preferred_format = fourcc;
        self
    }

    pub fn with_fallback(mut self, format: Format, rate: u32) -> Self {
        self.fallback_format = format;
        self.fallback_rate = rate;
        self
    }

    pub fn with_dequeue_timeout(mut self, timeout: Duration) -> Self {
        self.dequeue_timeout = Some(timeout);
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    pub fn with_huffman_insertion(mut self, enabled: bool) -> Self {
        self.insert_huffman_table = enabled;
        self
    }

    /// Device node of a camera index
    pub fn device_path(&self, index: u32) -> PathBuf {
        let mut path = self.device_prefix.clone().into_os_string();
        path.push(index.to_string());
        PathBuf::from(path)
    }

    /// Bounded wait for one tick at the given frame rate
    pub fn tick_timeout(&self, rate: u32) -> Duration {
        if let Some(timeout) = self.dequeue_timeout {
            return timeout;
        }

        let period = Duration::from_secs(1) / rate.max(1);
        period.clamp(Duration::from_millis(5), Duration::from_secs(1))
    }
}
