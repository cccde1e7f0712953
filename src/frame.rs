use std::fmt;

use crate::fourcc::FourCC;

/// A captured image, ready for consumers
///
/// `data` is either a compressed bitstream (`compressed == true`, e.g. a JPEG image for `MJPG`)
/// or packed pixels described by `fourcc`, `RGB3` for everything decoded by the codec.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub fourcc: FourCC,
    pub compressed: bool,
    /// Negotiated width in pixels
    pub width: u32,
    /// Negotiated height in pixels
    pub height: u32,
    /// Negotiated frames per second
    pub rate: u32,
    /// Driver sequence number
    pub sequence: u32,
}

impl Frame {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("len", &self.data.len())
            .field("fourcc", &self.fourcc)
            .field("compressed", &self.compressed)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("rate", &self.rate)
            .field("sequence", &self.sequence)
            .finish()
    }
}
