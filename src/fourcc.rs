use std::{fmt, str};

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
/// Four character code representing a pixelformat
pub struct FourCC {
    pub repr: [u8; 4],
}

impl FourCC {
    /// Packed YUV 4:2:2, Y0 U Y1 V
    pub const YUYV: FourCC = FourCC::new(b"YUYV");
    /// Packed YUV 4:2:2, U Y0 V Y1
    pub const UYVY: FourCC = FourCC::new(b"UYVY");
    /// Interleaved 8-bit RGB
    pub const RGB3: FourCC = FourCC::new(b"RGB3");
    /// Interleaved 8-bit BGR
    pub const BGR3: FourCC = FourCC::new(b"BGR3");
    /// Motion JPEG, one JPEG image per frame
    pub const MJPG: FourCC = FourCC::new(b"MJPG");
    /// JFIF JPEG
    pub const JPEG: FourCC = FourCC::new(b"JPEG");
    /// H.264 elementary stream with start codes
    pub const H264: FourCC = FourCC::new(b"H264");

    #[allow(clippy::trivially_copy_pass_by_ref)]
    /// Returns a pixelformat as four character code
    ///
    /// # Arguments
    ///
    /// * `repr` - Four characters as raw bytes
    ///
    /// # Example
    ///
    /// ```
    /// use uvccam::FourCC;
    /// let fourcc = FourCC::new(b"YUYV");
    /// ```
    pub const fn new(repr: &[u8; 4]) -> FourCC {
        FourCC { repr: *repr }
    }

    /// Returns the string representation of a four character code
    ///
    /// # Example
    ///
    /// ```
    /// use uvccam::FourCC;
    /// let fourcc = FourCC::new(b"YUYV");
    /// assert_eq!(fourcc.str().unwrap(), "YUYV");
    /// ```
    pub fn str(&self) -> Result<&str, str::Utf8Error> {
        str::from_utf8(&self.repr)
    }

    /// Whether frames in this format are an encoded bitstream rather than raw pixels.
    ///
    /// Drivers also flag compressed formats during enumeration, see
    /// [`crate::format::Flags::COMPRESSED`]. This covers the codes UVC cameras commonly emit.
    pub fn is_compressed(&self) -> bool {
        matches!(*self, FourCC::MJPG | FourCC::JPEG | FourCC::H264)
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let string = str::from_utf8(&self.repr);
        if let Ok(string) = string {
            write!(f, "{}", string)?;
        }
        Ok(())
    }
}

impl From<u32> for FourCC {
    fn from(code: u32) -> Self {
        FourCC::new(&code.to_le_bytes())
    }
}

impl From<FourCC> for u32 {
    fn from(fourcc: FourCC) -> Self {
        Self::from_le_bytes(fourcc.repr)
    }
}
