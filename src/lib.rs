//! Video capture for UVC cameras on Linux.
//!
//! `uvccam` opens video4linux2 capture devices, negotiates a pixel format, frame size and
//! frame rate, streams through memory-mapped kernel buffers and hands out frames through a
//! small per-camera queue. Compressed frames (MJPEG) are passed through, packed YUV frames are
//! decoded to RGB24.
//!
//! The entry point is the [`CaptureSessionManager`]:
//!
//! ```no_run
//! use uvccam::{CaptureSessionManager, Config};
//!
//! let manager = CaptureSessionManager::with_v4l2(Config::default());
//! assert!(manager.open(0, 1280, 720, 30));
//! loop {
//!     if let Some(frame) = manager.get_frame(0) {
//!         println!("{} bytes of {}", frame.len(), frame.fourcc);
//!         break;
//!     }
//! }
//! manager.close(0);
//! ```
//!
//! All device access goes through the [`Driver`] trait. [`driver::fake::FakeDriver`] implements
//! it in memory, which is what the test suites run against.

#[cfg(feature = "v4l2")]
pub mod v4l2;

#[cfg(feature = "v4l2")]
mod poll;

pub mod buffer;

mod catalog;
pub use catalog::FormatCatalog;

pub mod codec;

mod config;
pub use config::Config;

pub mod device;

pub mod driver;
pub use driver::{Driver, Handle};

mod error;
pub use error::{Error, Result};

pub mod format;
pub use format::{Description as FormatDescription, Flags as FormatFlags, Format};

mod fourcc;
pub use fourcc::FourCC;

mod fraction;
pub use fraction::Fraction;

mod frame;
pub use frame::Frame;

pub mod frameinterval;
pub mod framesize;

mod manager;
pub use manager::CaptureSessionManager;

mod pool;
pub use pool::{DeviceBufferPool, Owner};

mod queue;
pub use queue::FrameQueue;

pub mod session;
pub use session::{CaptureSession, Negotiated, Requested, SessionStatus, State};
