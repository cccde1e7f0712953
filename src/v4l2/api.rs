use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::{io, path::Path};

use crate::v4l2::vidioc;

/// A convenience wrapper around open(2).
///
/// Returns the file descriptor on success.
/// In case of errors, the last OS error will be reported, aka errno on Linux.
///
/// # Arguments
///
/// * `path` - Path to the device node
/// * `flags` - Open flags
///
/// # Example
///
/// ```
/// use uvccam::v4l2;
///
/// let fd = v4l2::open("/dev/video0", libc::O_RDWR | libc::O_NONBLOCK);
/// ```
pub fn open<P: AsRef<Path>>(path: P, flags: i32) -> io::Result<RawFd> {
    let c_path = CString::new(path.as_ref().as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let fd = unsafe { libc::open(c_path.as_ptr(), flags) };
    if fd == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(fd)
    }
}

/// A convenience wrapper around close(2).
///
/// # Arguments
///
/// * `fd` - File descriptor of a previously opened device
pub fn close(fd: RawFd) -> io::Result<()> {
    let ret = unsafe { libc::close(fd) };
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// A convenience wrapper around ioctl(2).
///
/// In case of errors, the last OS error will be reported, aka errno on Linux.
///
/// # Arguments
///
/// * `fd` - File descriptor
/// * `request` - IO control code (see [`vidioc`])
/// * `argp` - Pointer to memory region holding the argument type
///
/// # Safety
///
/// `argp` must point to a live value of the type the request code expects.
pub unsafe fn ioctl(
    fd: RawFd,
    request: vidioc::_IOC_TYPE,
    argp: *mut std::os::raw::c_void,
) -> io::Result<()> {
    loop {
        /*
         * The libc crate defines ioctl() with different, incompatible argument types on
         * different platforms. syscall() is a drop-in replacement that sidesteps this.
         * Details: https://github.com/rust-lang/libc/issues/1036
         */
        let ret = libc::syscall(libc::SYS_ioctl, fd, request, argp) as std::os::raw::c_int;
        if ret != -1 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        // a signal landed while the driver was busy, retry like every v4l2 capture loop does
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// A convenience wrapper around mmap(2) for kernel buffer segments.
///
/// # Arguments
///
/// * `length` - Length of the mapped region
/// * `fd` - File descriptor representing an opened device
/// * `offset` - Offset reported by VIDIOC_QUERYBUF
///
/// # Safety
///
/// The returned region aliases driver memory; it must be released with [`munmap`] exactly once.
pub unsafe fn mmap(length: usize, fd: RawFd, offset: libc::off_t) -> io::Result<*mut u8> {
    let ret = libc::mmap(
        std::ptr::null_mut(),
        length,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_SHARED,
        fd,
        offset,
    );
    if ret == libc::MAP_FAILED {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as *mut u8)
    }
}

/// A convenience wrapper around munmap(2).
///
/// # Safety
///
/// `start` and `length` must describe a region previously returned by [`mmap`].
pub unsafe fn munmap(start: *mut u8, length: usize) -> io::Result<()> {
    let ret = libc::munmap(start as *mut std::os::raw::c_void, length);
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
