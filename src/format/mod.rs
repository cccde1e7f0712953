use std::fmt;

use crate::fourcc::FourCC;

pub mod description;
pub use description::{Description, Flags};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
/// Streaming format (single-planar)
pub struct Format {
    /// width in pixels
    pub width: u32,
    /// height in pixels
    pub height: u32,
    /// pixelformat code
    pub fourcc: FourCC,

    /// bytes per line
    pub stride: u32,
    /// maximum number of bytes required to store an image
    pub size: u32,
}

impl Format {
    /// Returns a capture format
    ///
    /// # Arguments
    ///
    /// * `width` - Width in pixels
    /// * `height` - Height in pixels
    /// * `fourcc` - Four character code (pixelformat)
    ///
    /// # Example
    ///
    /// ```
    /// use uvccam::{Format, FourCC};
    /// let fmt = Format::new(640, 480, FourCC::YUYV);
    /// ```
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        Format {
            width,
            height,
            fourcc,
            stride: 0,
            size: 0,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "width          : {}", self.width)?;
        writeln!(f, "height         : {}", self.height)?;
        writeln!(f, "fourcc         : {}", self.fourcc)?;
        writeln!(f, "stride         : {}", self.stride)?;
        writeln!(f, "size           : {}", self.size)?;
        Ok(())
    }
}

#[cfg(feature = "v4l2")]
impl From<v4l2_sys::v4l2_pix_format> for Format {
    fn from(fmt: v4l2_sys::v4l2_pix_format) -> Self {
        Self {
            width: fmt.width,
            height: fmt.height,
            fourcc: FourCC::from(fmt.pixelformat),
            stride: fmt.bytesperline,
            size: fmt.sizeimage,
        }
    }
}

#[cfg(feature = "v4l2")]
impl From<Format> for v4l2_sys::v4l2_pix_format {
    fn from(format: Format) -> Self {
        Self {
            width: format.width,
            height: format.height,
            pixelformat: format.fourcc.into(),
            field: v4l2_sys::v4l2_field_V4L2_FIELD_ANY,
            bytesperline: format.stride,
            sizeimage: format.size,
            ..unsafe { std::mem::zeroed() }
        }
    }
}
