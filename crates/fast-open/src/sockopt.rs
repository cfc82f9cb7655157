//! Raw `TCP_FASTOPEN` socket options.
//!
//! Only Linux exposes both the listener option (`TCP_FASTOPEN`) and the
//! client option (`TCP_FASTOPEN_CONNECT`). Other platforms report
//! [`io::ErrorKind::Unsupported`].

use std::io;

#[cfg(target_os = "linux")]
use std::os::fd::{AsRawFd, RawFd};

/// Enables fast-open on a listening socket with the given pending queue length.
#[cfg(target_os = "linux")]
pub(crate) fn set_listen_fast_open<S: AsRawFd>(socket: &S, queue_len: u32) -> io::Result<()> {
    let queue_len = libc::c_int::try_from(queue_len).unwrap_or(libc::c_int::MAX);
    setsockopt_int(
        socket.as_raw_fd(),
        libc::IPPROTO_TCP,
        libc::TCP_FASTOPEN,
        queue_len,
    )
}

/// Makes `connect()` defer the SYN until the first write so the request
/// rides on the handshake.
#[cfg(target_os = "linux")]
pub(crate) fn set_connect_fast_open<S: AsRawFd>(socket: &S) -> io::Result<()> {
    setsockopt_int(
        socket.as_raw_fd(),
        libc::IPPROTO_TCP,
        libc::TCP_FASTOPEN_CONNECT,
        1,
    )
}

#[cfg(target_os = "linux")]
fn setsockopt_int(fd: RawFd, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> io::Result<()> {
    // SAFETY: `fd` belongs to a socket borrowed for the duration of the call
    // and `value` lives on the stack until `setsockopt` returns.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn set_listen_fast_open<S>(_socket: &S, _queue_len: u32) -> io::Result<()> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn set_connect_fast_open<S>(_socket: &S) -> io::Result<()> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}

/// Returns `true` if `err` means the option is not available, as opposed to
/// a failure on a supported platform.
pub(crate) fn is_unsupported(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::Unsupported {
        return true;
    }

    #[cfg(target_os = "linux")]
    {
        matches!(
            err.raw_os_error(),
            Some(code) if code == libc::ENOPROTOOPT || code == libc::EOPNOTSUPP
        )
    }

    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}
