use bitflags::bitflags;
use std::fmt;

use crate::fourcc::FourCC;

bitflags! {
    #[allow(clippy::unreadable_literal)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Flags : u32 {
        const COMPRESSED            = 0x0001;
        const EMULATED              = 0x0002;
        const CONTINUOUS_BITSTREAM  = 0x0004;
        const DYN_RESOLUTION        = 0x0008;
    }
}

impl From<u32> for Flags {
    fn from(flags: u32) -> Self {
        Self::from_bits_truncate(flags)
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

#[derive(Debug, Clone, PartialEq, Eq)]
/// Format description as returned by VIDIOC_ENUM_FMT
pub struct Description {
    pub index: u32,
    pub flags: Flags,
    pub description: String,
    pub fourcc: FourCC,
}

impl Description {
    /// Returns a description for a pixel format, flagging well known compressed codes
    ///
    /// # Example
    ///
    /// ```
    /// use uvccam::{FormatDescription, FourCC};
    /// let desc = FormatDescription::new(0, FourCC::MJPG);
    /// assert!(desc.is_compressed());
    /// ```
    pub fn new(index: u32, fourcc: FourCC) -> Self {
        let flags = if fourcc.is_compressed() {
            Flags::COMPRESSED
        } else {
            Flags::empty()
        };

        Description {
            index,
            flags,
            description: fourcc.to_string(),
            fourcc,
        }
    }

    /// Whether the driver delivers an encoded bitstream in this format
    pub fn is_compressed(&self) -> bool {
        self.flags.contains(Flags::COMPRESSED) || self.fourcc.is_compressed()
    }
}

impl fmt::Display for Description {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "index       : {}", self.index)?;
        writeln!(f, "flags:      : {}", self.flags)?;
        writeln!(f, "description : {}", self.description)?;
        writeln!(f, "fourcc      : {}", self.fourcc)?;
        Ok(())
    }
}

#[cfg(feature = "v4l2")]
impl From<v4l2_sys::v4l2_fmtdesc> for Description {
    fn from(desc: v4l2_sys::v4l2_fmtdesc) -> Self {
        let description = desc
            .description
            .iter()
            .take_while(|&&c| c != 0)
            .copied()
            .collect::<Vec<u8>>();

        Self {
            index: desc.index,
            flags: Flags::from(desc.flags),
            description: String::from_utf8_lossy(&description).into_owned(),
            fourcc: FourCC::from(desc.pixelformat),
        }
    }
}
