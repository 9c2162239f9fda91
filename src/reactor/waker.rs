use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};

use crate::reactor::{Interest, Registry, Token};

macro_rules! syscall {
    ($fn:ident ( $($arg:expr),* $(,)* ) ) => {{
        #[allow(unused_unsafe)]
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

/// `eventfd`-backed counter used to interrupt a blocked `epoll_wait` from
/// another thread.
#[derive(Debug)]
struct WakerInternal {
    fd: File,
}

impl WakerInternal {
    fn new() -> io::Result<WakerInternal> {
        let flags = libc::EFD_CLOEXEC | libc::EFD_NONBLOCK;
        let fd = syscall!(eventfd(0, flags))?;
        // SAFETY: `eventfd(2)` returns a valid owned fd on success.
        let file = unsafe { File::from_raw_fd(fd) };
        Ok(WakerInternal { fd: file })
    }

    #[allow(clippy::unused_io_amount)]
    fn wake(&self) -> io::Result<()> {
        let buf: [u8; 8] = 1u64.to_ne_bytes();
        match (&self.fd).write(&buf) {
            Ok(_) => Ok(()),
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                // The counter is about to overflow; drain it and retry.
                self.reset()?;
                self.wake()
            }
            Err(err) => Err(err),
        }
    }

    #[allow(clippy::unused_io_amount)]
    fn reset(&self) -> io::Result<()> {
        let mut buf: [u8; 8] = 0u64.to_ne_bytes();
        match (&self.fd).read(&mut buf) {
            Ok(_) => Ok(()),
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(err) => Err(err),
        }
    }
}

impl AsRawFd for WakerInternal {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Handle that lets any thread wake a [`Poll`](crate::reactor::Poll)
/// blocked in `epoll_wait`, by registering an `eventfd` with the same
/// selector under a dedicated [`Token`].
///
/// Used both by worker threads (to signal "a slot has a response ready,
/// re-arm it") and by the signal-handling thread (to signal "stop").
#[derive(Debug)]
pub struct Waker {
    inner: WakerInternal,
}

impl Waker {
    pub fn new(registry: &Registry, token: Token) -> io::Result<Waker> {
        let inner = WakerInternal::new()?;
        registry.register(inner.as_raw_fd(), token, Interest::READABLE)?;
        Ok(Waker { inner })
    }

    pub fn wake(&self) -> io::Result<()> {
        self.inner.wake()
    }

    /// Drain the eventfd counter after a wakeup has been observed.
    pub fn ack(&self) -> io::Result<()> {
        self.inner.reset()
    }
}
