//! Kernel video4linux2 backend.

use std::os::unix::io::RawFd;
use std::path::Path;
use std::ptr::NonNull;
use std::{io, mem, time::Duration};

use v4l2_sys::*;

use crate::buffer::{BufferInfo, Dequeued};
use crate::driver::Driver;
use crate::format::{Description, Format};
use crate::fourcc::FourCC;
use crate::fraction::Fraction;
use crate::frameinterval::FrameInterval;
use crate::framesize::FrameSize;
use crate::poll;
use crate::v4l2;

const BUF_TYPE: u32 = v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_CAPTURE;
const MEMORY: u32 = v4l2_memory_V4L2_MEMORY_MMAP;

/// Talks to real devices through ioctl(2) and mmap(2)
///
/// Nodes are opened non-blocking, dequeue waits are bounded with poll.
#[derive(Debug, Default, Clone, Copy)]
pub struct V4l2Driver;

impl V4l2Driver {
    pub fn new() -> Self {
        V4l2Driver
    }
}

fn check_capture_caps(fd: RawFd) -> io::Result<()> {
    let caps = unsafe {
        let mut v4l2_caps: v4l2_capability = mem::zeroed();
        v4l2::ioctl(
            fd,
            v4l2::vidioc::VIDIOC_QUERYCAP,
            &mut v4l2_caps as *mut _ as *mut std::os::raw::c_void,
        )?;
        v4l2_caps
    };

    // device_caps describes this node, capabilities the whole physical device
    let node_caps = if caps.capabilities & V4L2_CAP_DEVICE_CAPS != 0 {
        caps.device_caps
    } else {
        caps.capabilities
    };

    if node_caps & V4L2_CAP_VIDEO_CAPTURE == 0 || node_caps & V4L2_CAP_STREAMING == 0 {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "node does not support streaming video capture",
        ));
    }

    Ok(())
}

impl Driver for V4l2Driver {
    fn open(&self, path: &Path) -> io::Result<RawFd> {
        let fd = v4l2::open(path, libc::O_RDWR | libc::O_NONBLOCK)?;
        if let Err(e) = check_capture_caps(fd) {
            let _ = v4l2::close(fd);
            return Err(e);
        }

        Ok(fd)
    }

    fn close(&self, fd: RawFd) -> io::Result<()> {
        v4l2::close(fd)
    }

    fn enum_formats(&self, fd: RawFd) -> io::Result<Vec<Description>> {
        let mut formats = Vec::new();
        let mut v4l2_fmt = v4l2_fmtdesc {
            index: 0,
            type_: BUF_TYPE,
            ..unsafe { mem::zeroed() }
        };

        loop {
            let ret = unsafe {
                v4l2::ioctl(
                    fd,
                    v4l2::vidioc::VIDIOC_ENUM_FMT,
                    &mut v4l2_fmt as *mut _ as *mut std::os::raw::c_void,
                )
            };

            // EINVAL past the last index ends the enumeration, a failure at index 0 simply
            // means the device has no formats
            if ret.is_err() {
                return Ok(formats);
            }

            formats.push(Description::from(v4l2_fmt));
            v4l2_fmt.index += 1;
            v4l2_fmt.description = unsafe { mem::zeroed() };
        }
    }

    fn enum_framesizes(&self, fd: RawFd, fourcc: FourCC) -> io::Result<Vec<FrameSize>> {
        let mut framesizes = Vec::new();
        let mut v4l2_struct = v4l2_frmsizeenum {
            index: 0,
            pixel_format: fourcc.into(),
            ..unsafe { mem::zeroed() }
        };

        loop {
            let ret = unsafe {
                v4l2::ioctl(
                    fd,
                    v4l2::vidioc::VIDIOC_ENUM_FRAMESIZES,
                    &mut v4l2_struct as *mut _ as *mut std::os::raw::c_void,
                )
            };

            if let Err(e) = ret {
                if v4l2_struct.index == 0 {
                    return Err(e);
                } else {
                    return Ok(framesizes);
                }
            }

            if let Ok(frame_size) = FrameSize::try_from(v4l2_struct) {
                framesizes.push(frame_size);
            }

            v4l2_struct.index += 1;
        }
    }

    fn enum_frameintervals(
        &self,
        fd: RawFd,
        fourcc: FourCC,
        width: u32,
        height: u32,
    ) -> io::Result<Vec<FrameInterval>> {
        let mut frameintervals = Vec::new();
        let mut v4l2_struct = v4l2_frmivalenum {
            index: 0,
            pixel_format: fourcc.into(),
            width,
            height,
            ..unsafe { mem::zeroed() }
        };

        loop {
            let ret = unsafe {
                v4l2::ioctl(
                    fd,
                    v4l2::vidioc::VIDIOC_ENUM_FRAMEINTERVALS,
                    &mut v4l2_struct as *mut _ as *mut std::os::raw::c_void,
                )
            };

            if let Err(e) = ret {
                if v4l2_struct.index == 0 {
                    return Err(e);
                } else {
                    return Ok(frameintervals);
                }
            }

            if let Ok(frame_interval) = FrameInterval::try_from(v4l2_struct) {
                frameintervals.push(frame_interval);
            }

            v4l2_struct.index += 1;
        }
    }

    fn format(&self, fd: RawFd) -> io::Result<Format> {
        unsafe {
            let mut v4l2_fmt = v4l2_format {
                type_: BUF_TYPE,
                ..mem::zeroed()
            };
            v4l2::ioctl(
                fd,
                v4l2::vidioc::VIDIOC_G_FMT,
                &mut v4l2_fmt as *mut _ as *mut std::os::raw::c_void,
            )?;

            Ok(Format::from(v4l2_fmt.fmt.pix))
        }
    }

    fn set_format(&self, fd: RawFd, fmt: &Format) -> io::Result<Format> {
        unsafe {
            let mut v4l2_fmt = v4l2_format {
                type_: BUF_TYPE,
                fmt: v4l2_format__bindgen_ty_1 { pix: (*fmt).into() },
            };
            v4l2::ioctl(
                fd,
                v4l2::vidioc::VIDIOC_S_FMT,
                &mut v4l2_fmt as *mut _ as *mut std::os::raw::c_void,
            )?;
        }

        // read back what the driver settled on
        self.format(fd)
    }

    fn set_interval(&self, fd: RawFd, interval: Fraction) -> io::Result<Fraction> {
        unsafe {
            let mut v4l2_params = v4l2_streamparm {
                type_: BUF_TYPE,
                ..mem::zeroed()
            };
            v4l2_params.parm.capture.timeperframe = interval.into();
            v4l2::ioctl(
                fd,
                v4l2::vidioc::VIDIOC_S_PARM,
                &mut v4l2_params as *mut _ as *mut std::os::raw::c_void,
            )?;

            let mut v4l2_params = v4l2_streamparm {
                type_: BUF_TYPE,
                ..mem::zeroed()
            };
            v4l2::ioctl(
                fd,
                v4l2::vidioc::VIDIOC_G_PARM,
                &mut v4l2_params as *mut _ as *mut std::os::raw::c_void,
            )?;

            Ok(Fraction::from(v4l2_params.parm.capture.timeperframe))
        }
    }

    fn request_buffers(&self, fd: RawFd, count: u32) -> io::Result<u32> {
        let mut v4l2_reqbufs = v4l2_requestbuffers {
            count,
            type_: BUF_TYPE,
            memory: MEMORY,
            ..unsafe { mem::zeroed() }
        };
        unsafe {
            v4l2::ioctl(
                fd,
                v4l2::vidioc::VIDIOC_REQBUFS,
                &mut v4l2_reqbufs as *mut _ as *mut std::os::raw::c_void,
            )?;
        }

        Ok(v4l2_reqbufs.count)
    }

    fn query_buffer(&self, fd: RawFd, index: u32) -> io::Result<BufferInfo> {
        let mut v4l2_buf = v4l2_buffer {
            index,
            type_: BUF_TYPE,
            memory: MEMORY,
            ..unsafe { mem::zeroed() }
        };
        unsafe {
            v4l2::ioctl(
                fd,
                v4l2::vidioc::VIDIOC_QUERYBUF,
                &mut v4l2_buf as *mut _ as *mut std::os::raw::c_void,
            )?;

            Ok(BufferInfo {
                index,
                offset: v4l2_buf.m.offset,
                length: v4l2_buf.length,
            })
        }
    }

    fn map(&self, fd: RawFd, info: &BufferInfo) -> io::Result<NonNull<u8>> {
        let ptr = unsafe { v4l2::mmap(info.length as usize, fd, info.offset as libc::off_t)? };
        NonNull::new(ptr).ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))
    }

    unsafe fn unmap(&self, addr: NonNull<u8>, length: usize) -> io::Result<()> {
        v4l2::munmap(addr.as_ptr(), length)
    }

    fn queue(&self, fd: RawFd, index: u32) -> io::Result<()> {
        let mut v4l2_buf = v4l2_buffer {
            index,
            type_: BUF_TYPE,
            memory: MEMORY,
            ..unsafe { mem::zeroed() }
        };
        unsafe {
            v4l2::ioctl(
                fd,
                v4l2::vidioc::VIDIOC_QBUF,
                &mut v4l2_buf as *mut _ as *mut std::os::raw::c_void,
            )
        }
    }

    fn dequeue(&self, fd: RawFd, timeout: Duration) -> io::Result<Option<Dequeued>> {
        if !poll::wait_readable(fd, timeout)? {
            return Ok(None);
        }

        let mut v4l2_buf = v4l2_buffer {
            type_: BUF_TYPE,
            memory: MEMORY,
            ..unsafe { mem::zeroed() }
        };
        let ret = unsafe {
            v4l2::ioctl(
                fd,
                v4l2::vidioc::VIDIOC_DQBUF,
                &mut v4l2_buf as *mut _ as *mut std::os::raw::c_void,
            )
        };

        match ret {
            Ok(()) => Ok(Some(Dequeued {
                index: v4l2_buf.index,
                bytes_used: v4l2_buf.bytesused,
                flags: v4l2_buf.flags.into(),
                sequence: v4l2_buf.sequence,
            })),
            // readable but raced by another reader, or spurious wakeup
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn stream_on(&self, fd: RawFd) -> io::Result<()> {
        unsafe {
            let mut typ = BUF_TYPE;
            v4l2::ioctl(
                fd,
                v4l2::vidioc::VIDIOC_STREAMON,
                &mut typ as *mut _ as *mut std::os::raw::c_void,
            )
        }
    }

    fn stream_off(&self, fd: RawFd) -> io::Result<()> {
        unsafe {
            let mut typ = BUF_TYPE;
            v4l2::ioctl(
                fd,
                v4l2::vidioc::VIDIOC_STREAMOFF,
                &mut typ as *mut _ as *mut std::os::raw::c_void,
            )
        }
    }
}
