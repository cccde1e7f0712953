use std::os::unix::io::RawFd;
use std::{io, time};

/// Blocks until `fd` becomes readable or `timeout` elapses.
///
/// Returns `Ok(false)` on timeout. A signal interrupting the wait is reported as a timeout too,
/// the caller simply polls again on its next tick.
pub fn wait_readable(fd: RawFd, timeout: time::Duration) -> io::Result<bool> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);

    let ret = unsafe { libc::poll(&mut pollfd, 1, timeout) };

    match ret {
        -1 => {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                Ok(false)
            } else {
                Err(err)
            }
        }
        0 => Ok(false),
        _ if pollfd.revents & (libc::POLLERR | libc::POLLNVAL) != 0 => {
            Err(io::Error::from_raw_os_error(libc::EIO))
        }
        _ => Ok(pollfd.revents & libc::POLLIN != 0),
    }
}
