//! Frame conversion.
//!
//! Compressed frames are passed through, packed 4:2:2 frames are decoded into interleaved
//! RGB24. Everything here is a pure function of its input.

use tracing::trace;

use crate::error::{Error, Result};
use crate::fourcc::FourCC;
use crate::session::Negotiated;

/// Per-session conversion switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Options {
    /// Add the standard Huffman tables to MJPEG frames that carry none
    pub insert_huffman_table: bool,
}

/// Output of [`encode`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub data: Vec<u8>,
    pub fourcc: FourCC,
    pub compressed: bool,
}

/// Whether frames of this format can be turned into packed pixels
pub fn can_decode(fourcc: FourCC) -> bool {
    matches!(
        fourcc,
        FourCC::YUYV | FourCC::UYVY | FourCC::RGB3 | FourCC::BGR3
    )
}

/// Whether the codec has a defined output for this format
pub fn handles(fourcc: FourCC) -> bool {
    fourcc.is_compressed() || can_decode(fourcc)
}

fn is_jpeg(fourcc: FourCC) -> bool {
    fourcc == FourCC::MJPG || fourcc == FourCC::JPEG
}

/// Bytes a complete raw frame occupies, `None` when the format has no fixed layout
pub fn raw_frame_size(fourcc: FourCC, width: u32, height: u32) -> Option<usize> {
    let pixels = width as usize * height as usize;
    match fourcc {
        FourCC::YUYV | FourCC::UYVY => Some(pixels * 2),
        FourCC::RGB3 | FourCC::BGR3 => Some(pixels * 3),
        _ => None,
    }
}

/// Rejects frames that cannot be a complete image of the negotiated format
pub fn validate(raw: &[u8], negotiated: &Negotiated) -> Result<()> {
    if raw.is_empty() {
        return Err(Error::FrameRead("empty buffer".into()));
    }

    if is_jpeg(negotiated.fourcc) {
        if !raw.starts_with(&[0xFF, 0xD8]) {
            return Err(Error::FrameRead("missing JPEG start of image".into()));
        }
        return Ok(());
    }

    if let Some(expected) = raw_frame_size(negotiated.fourcc, negotiated.width, negotiated.height)
    {
        if raw.len() < expected {
            return Err(Error::FrameRead(format!(
                "short frame: {} of {} bytes",
                raw.len(),
                expected
            )));
        }
    }

    Ok(())
}

/// Converts one captured buffer into the bytes handed to consumers
pub fn encode(raw: &[u8], negotiated: &Negotiated, options: &Options) -> Result<Encoded> {
    validate(raw, negotiated)?;

    let (width, height) = (negotiated.width, negotiated.height);
    let encoded = match negotiated.fourcc {
        FourCC::YUYV => Encoded {
            data: yuyv_to_rgb24(raw, width, height),
            fourcc: FourCC::RGB3,
            compressed: false,
        },
        FourCC::UYVY => Encoded {
            data: uyvy_to_rgb24(raw, width, height),
            fourcc: FourCC::RGB3,
            compressed: false,
        },
        fourcc if is_jpeg(fourcc) && options.insert_huffman_table => Encoded {
            data: insert_huffman_table(raw),
            fourcc,
            compressed: true,
        },
        fourcc => {
            let data = match raw_frame_size(fourcc, width, height) {
                Some(size) => raw[..size].to_vec(),
                None => raw.to_vec(),
            };
            Encoded {
                data,
                fourcc,
                compressed: negotiated.compressed,
            }
        }
    };

    trace!(fourcc = %encoded.fourcc, len = encoded.data.len(), "frame encoded");
    Ok(encoded)
}

#[inline]
fn clamp(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// BT.601 limited range to RGB, integer arithmetic
#[inline]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;

    [
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
    ]
}

fn packed_422_to_rgb24(src: &[u8], width: u32, height: u32, layout: [usize; 4]) -> Vec<u8> {
    let [y0, u, y1, v] = layout;
    let pixels = width as usize * height as usize;
    let mut rgb = Vec::with_capacity(pixels * 3);

    for chunk in src[..pixels * 2].chunks_exact(4) {
        rgb.extend_from_slice(&yuv_to_rgb(chunk[y0], chunk[u], chunk[v]));
        rgb.extend_from_slice(&yuv_to_rgb(chunk[y1], chunk[u], chunk[v]));
    }

    rgb.resize(pixels * 3, 0);
    rgb
}

/// Decodes YUYV (Y0 U Y1 V) into RGB24
///
/// `src` must hold at least `width * height * 2` bytes.
pub fn yuyv_to_rgb24(src: &[u8], width: u32, height: u32) -> Vec<u8> {
    packed_422_to_rgb24(src, width, height, [0, 1, 2, 3])
}

/// Decodes UYVY (U Y0 V Y1) into RGB24
///
/// `src` must hold at least `width * height * 2` bytes.
pub fn uyvy_to_rgb24(src: &[u8], width: u32, height: u32) -> Vec<u8> {
    packed_422_to_rgb24(src, width, height, [1, 0, 3, 2])
}

const DHT_MARKER: u8 = 0xC4;
const SOS_MARKER: u8 = 0xDA;

// JPEG Annex K.3 tables
const DC_LUMINANCE_BITS: [u8; 16] = [0, 1, 5, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0];
const DC_CHROMINANCE_BITS: [u8; 16] = [0, 3, 1, 1, 1, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0];
const DC_VALUES: [u8; 12] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];

const AC_LUMINANCE_BITS: [u8; 16] = [0, 2, 1, 3, 3, 2, 4, 3, 5, 5, 4, 4, 0, 0, 1, 0x7d];
#[rustfmt::skip]
const AC_LUMINANCE_VALUES: [u8; 162] = [
    0x01, 0x02, 0x03, 0x00, 0x04, 0x11, 0x05, 0x12,
    0x21, 0x31, 0x41, 0x06, 0x13, 0x51, 0x61, 0x07,
    0x22, 0x71, 0x14, 0x32, 0x81, 0x91, 0xa1, 0x08,
    0x23, 0x42, 0xb1, 0xc1, 0x15, 0x52, 0xd1, 0xf0,
    0x24, 0x33, 0x62, 0x72, 0x82, 0x09, 0x0a, 0x16,
    0x17, 0x18, 0x19, 0x1a, 0x25, 0x26, 0x27, 0x28,
    0x29, 0x2a, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39,
    0x3a, 0x43, 0x44, 0x45, 0x46, 0x47, 0x48, 0x49,
    0x4a, 0x53, 0x54, 0x55, 0x56, 0x57, 0x58, 0x59,
    0x5a, 0x63, 0x64, 0x65, 0x66, 0x67, 0x68, 0x69,
    0x6a, 0x73, 0x74, 0x75, 0x76, 0x77, 0x78, 0x79,
    0x7a, 0x83, 0x84, 0x85, 0x86, 0x87, 0x88, 0x89,
    0x8a, 0x92, 0x93, 0x94, 0x95, 0x96, 0x97, 0x98,
    0x99, 0x9a, 0xa2, 0xa3, 0xa4, 0xa5, 0xa6, 0xa7,
    0xa8, 0xa9, 0xaa, 0xb2, 0xb3, 0xb4, 0xb5, 0xb6,
    0xb7, 0xb8, 0xb9, 0xba, 0xc2, 0xc3, 0xc4, 0xc5,
    0xc6, 0xc7, 0xc8, 0xc9, 0xca, 0xd2, 0xd3, 0xd4,
    0xd5, 0xd6, 0xd7, 0xd8, 0xd9, 0xda, 0xe1, 0xe2,
    0xe3, 0xe4, 0xe5, 0xe6, 0xe7, 0xe8, 0xe9, 0xea,
    0xf1, 0xf2, 0xf3, 0xf4, 0xf5, 0xf6, 0xf7, 0xf8,
    0xf9, 0xfa,
];

const AC_CHROMINANCE_BITS: [u8; 16] = [0, 2, 1, 2, 4, 4, 3, 4, 7, 5, 4, 4, 0, 1, 2, 0x77];
#[rustfmt::skip]
const AC_CHROMINANCE_VALUES: [u8; 162] = [
    0x00, 0x01, 0x02, 0x03, 0x11, 0x04, 0x05, 0x21,
    0x31, 0x06, 0x12, 0x41, 0x51, 0x07, 0x61, 0x71,
    0x13, 0x22, 0x32, 0x81, 0x08, 0x14, 0x42, 0x91,
    0xa1, 0xb1, 0xc1, 0x09, 0x23, 0x33, 0x52, 0xf0,
    0x15, 0x62, 0x72, 0xd1, 0x0a, 0x16, 0x24, 0x34,
    0xe1, 0x25, 0xf1, 0x17, 0x18, 0x19, 0x1a, 0x26,
    0x27, 0x28, 0x29, 0x2a, 0x35, 0x36, 0x37, 0x38,
    0x39, 0x3a, 0x43, 0x44, 0x45, 0x46, 0x47, 0x48,
    0x49, 0x4a, 0x53, 0x54, 0x55, 0x56, 0x57, 0x58,
    0x59, 0x5a, 0x63, 0x64, 0x65, 0x66, 0x67, 0x68,
    0x69, 0x6a, 0x73, 0x74, 0x75, 0x76, 0x77, 0x78,
    0x79, 0x7a, 0x82, 0x83, 0x84, 0x85, 0x86, 0x87,
    0x88, 0x89, 0x8a, 0x92, 0x93, 0x94, 0x95, 0x96,
    0x97, 0x98, 0x99, 0x9a, 0xa2, 0xa3, 0xa4, 0xa5,
    0xa6, 0xa7, 0xa8, 0xa9, 0xaa, 0xb2, 0xb3, 0xb4,
    0xb5, 0xb6, 0xb7, 0xb8, 0xb9, 0xba, 0xc2, 0xc3,
    0xc4, 0xc5, 0xc6, 0xc7, 0xc8, 0xc9, 0xca, 0xd2,
    0xd3, 0xd4, 0xd5, 0xd6, 0xd7, 0xd8, 0xd9, 0xda,
    0xe2, 0xe3, 0xe4, 0xe5, 0xe6, 0xe7, 0xe8, 0xe9,
    0xea, 0xf2, 0xf3, 0xf4, 0xf5, 0xf6, 0xf7, 0xf8,
    0xf9, 0xfa,
];

/// Size of the complete DHT segment, marker included
pub const HUFFMAN_TABLE_SIZE: usize = 420;

/// The DHT segment carrying all four standard tables
pub fn huffman_segment() -> Vec<u8> {
    let tables: [(u8, &[u8; 16], &[u8]); 4] = [
        (0x00, &DC_LUMINANCE_BITS, &DC_VALUES),
        (0x01, &DC_CHROMINANCE_BITS, &DC_VALUES),
        (0x10, &AC_LUMINANCE_BITS, &AC_LUMINANCE_VALUES),
        (0x11, &AC_CHROMINANCE_BITS, &AC_CHROMINANCE_VALUES),
    ];

    let mut segment = Vec::with_capacity(HUFFMAN_TABLE_SIZE);
    segment.extend_from_slice(&[0xFF, DHT_MARKER]);
    // length covers itself but not the marker
    let length = (HUFFMAN_TABLE_SIZE - 2) as u16;
    segment.extend_from_slice(&length.to_be_bytes());
    for (class_id, bits, values) in tables {
        segment.push(class_id);
        segment.extend_from_slice(bits);
        segment.extend_from_slice(values);
    }

    segment
}

/// Offset of the first SOS marker, `None` when the image already defines Huffman tables or the
/// header cannot be walked
fn dht_insertion_point(jpeg: &[u8]) -> Option<usize> {
    let mut pos = 2;
    while pos + 4 <= jpeg.len() {
        if jpeg[pos] != 0xFF {
            return None;
        }

        match jpeg[pos + 1] {
            // fill byte
            0xFF => {
                pos += 1;
                continue;
            }
            DHT_MARKER => return None,
            SOS_MARKER => return Some(pos),
            _ => {}
        }

        let length = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
        pos += 2 + length;
    }

    None
}

/// Inserts the standard Huffman tables in front of the scan of a JPEG image without any
///
/// Images that already carry a DHT segment, or whose header cannot be parsed, are returned
/// unchanged.
pub fn insert_huffman_table(jpeg: &[u8]) -> Vec<u8> {
    match dht_insertion_point(jpeg) {
        Some(pos) => {
            let mut out = Vec::with_capacity(jpeg.len() + HUFFMAN_TABLE_SIZE);
            out.extend_from_slice(&jpeg[..pos]);
            out.extend_from_slice(&huffman_segment());
            out.extend_from_slice(&jpeg[pos..]);
            out
        }
        None => jpeg.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn negotiated(fourcc: FourCC, width: u32, height: u32) -> Negotiated {
        Negotiated {
            fourcc,
            width,
            height,
            rate: 30,
            compressed: fourcc.is_compressed(),
        }
    }

    #[test]
    fn yuv_reference_points() {
        // black, white and mid grey
        assert_eq!(yuv_to_rgb(16, 128, 128), [0, 0, 0]);
        assert_eq!(yuv_to_rgb(235, 128, 128), [255, 255, 255]);
        assert_eq!(yuv_to_rgb(128, 128, 128), [130, 130, 130]);
        // saturated red stays clamped
        assert_eq!(yuv_to_rgb(81, 90, 240), [255, 0, 0]);
    }

    #[test]
    fn yuyv_and_uyvy_agree() {
        let yuyv = [16, 128, 235, 128, 81, 90, 81, 240];
        let uyvy = [128, 16, 128, 235, 90, 81, 240, 81];

        let a = yuyv_to_rgb24(&yuyv, 2, 2);
        let b = uyvy_to_rgb24(&uyvy, 2, 2);
        assert_eq!(a.len(), 12);
        assert_eq!(a, b);
        assert_eq!(&a[..6], &[0, 0, 0, 255, 255, 255]);
    }

    #[test]
    fn encode_decodes_raw() {
        let raw = vec![0x80; 4 * 2 * 2];
        let out = encode(&raw, &negotiated(FourCC::YUYV, 4, 2), &Options::default()).unwrap();
        assert_eq!(out.fourcc, FourCC::RGB3);
        assert!(!out.compressed);
        assert_eq!(out.data.len(), 4 * 2 * 3);
    }

    #[test]
    fn encode_passes_compressed_through() {
        let jpeg = vec![0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9];
        let out = encode(&jpeg, &negotiated(FourCC::MJPG, 4, 2), &Options::default()).unwrap();
        assert_eq!(out.data, jpeg);
        assert_eq!(out.fourcc, FourCC::MJPG);
        assert!(out.compressed);
    }

    #[test]
    fn encode_rejects_malformed() {
        let opts = Options::default();
        assert!(matches!(
            encode(&[0u8; 15], &negotiated(FourCC::YUYV, 4, 2), &opts),
            Err(Error::FrameRead(_))
        ));
        assert!(matches!(
            encode(&[0x00, 0xD8, 0x00], &negotiated(FourCC::MJPG, 4, 2), &opts),
            Err(Error::FrameRead(_))
        ));
        assert!(encode(&[], &negotiated(FourCC::H264, 4, 2), &opts).is_err());
    }

    #[test]
    fn unknown_raw_passes_through() {
        let fourcc = FourCC::new(b"GREY");
        let raw = vec![7u8; 8];
        let out = encode(&raw, &negotiated(fourcc, 4, 2), &Options::default()).unwrap();
        assert_eq!(out.data, raw);
        assert_eq!(out.fourcc, fourcc);
    }

    #[test]
    fn huffman_segment_layout() {
        let segment = huffman_segment();
        assert_eq!(segment.len(), HUFFMAN_TABLE_SIZE);
        assert_eq!(&segment[..5], &[0xFF, 0xC4, 0x01, 0xA2, 0x00]);
        // DC chrominance table starts after the first 29 byte table
        assert_eq!(segment[4 + 29], 0x01);
        assert_eq!(segment[4 + 58], 0x10);
        assert_eq!(segment[4 + 58 + 179], 0x11);
    }

    #[test]
    fn huffman_inserted_before_scan() {
        // SOI, APP0 (length 4), SOS (length 2), data, EOI
        let jpeg = [
            0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x04, 0xAA, 0xBB, 0xFF, 0xDA, 0x00, 0x02, 0x11, 0xFF,
            0xD9,
        ];
        let out = insert_huffman_table(&jpeg);
        assert_eq!(out.len(), jpeg.len() + HUFFMAN_TABLE_SIZE);
        assert_eq!(&out[..8], &jpeg[..8]);
        assert_eq!(&out[8..10], &[0xFF, 0xC4]);
        assert_eq!(&out[8 + HUFFMAN_TABLE_SIZE..], &jpeg[8..]);

        let opts = Options {
            insert_huffman_table: true,
        };
        let out = encode(&jpeg, &negotiated(FourCC::MJPG, 4, 2), &opts).unwrap();
        assert_eq!(out.data.len(), jpeg.len() + HUFFMAN_TABLE_SIZE);
    }

    #[test]
    fn existing_huffman_kept() {
        let jpeg = [
            0xFF, 0xD8, 0xFF, 0xC4, 0x00, 0x03, 0x00, 0xFF, 0xDA, 0x00, 0x02, 0xFF, 0xD9,
        ];
        assert_eq!(insert_huffman_table(&jpeg), jpeg.to_vec());
    }
}
