use bitflags::bitflags;
use std::fmt;

bitflags! {
    #[allow(clippy::unreadable_literal)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Flags: u32 {
        /// Buffer is mapped
        const MAPPED                = 0x00000001;
        /// Buffer is queued for processing
        const QUEUED                = 0x00000002;
        /// Buffer is ready
        const DONE                  = 0x00000004;
        /// Image is a keyframe (I-frame)
        const KEYFRAME              = 0x00000008;
        /// Buffer is ready, but the data contained within is corrupted
        const ERROR                 = 0x00000040;
        /// Timecode field is valid
        const TIMECODE              = 0x00000100;
        /// Timestamp type
        const TIMESTAMP_MONOTONIC   = 0x00002000;
        const TIMESTAMP_COPY        = 0x00004000;
    }
}

impl From<u32> for Flags {
    fn from(flags: u32) -> Flags {
        Flags::from_bits_truncate(flags)
    }
}

impl From<Flags> for u32 {
    fn from(flags: Flags) -> Self {
        flags.bits()
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Location of one kernel buffer as reported by VIDIOC_QUERYBUF
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    /// Kernel buffer index
    pub index: u32,
    /// Offset to pass to mmap
    pub offset: u32,
    /// Length of the buffer in bytes
    pub length: u32,
}

/// A buffer handed back by the driver after VIDIOC_DQBUF
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dequeued {
    /// Kernel buffer index
    pub index: u32,
    /// Number of bytes the driver wrote
    pub bytes_used: u32,
    /// Buffer flags
    pub flags: Flags,
    /// Sequence number, counting the frames
    pub sequence: u32,
}
