//! Raw video4linux2 plumbing: syscall wrappers and ioctl request codes.
//!
//! Everything above this module talks to devices through [`crate::driver::Driver`].

mod api;
pub use api::*;

pub mod vidioc;
