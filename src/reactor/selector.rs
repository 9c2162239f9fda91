use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use libc::{EPOLLET, EPOLLIN, EPOLLOUT, EPOLLRDHUP};

use crate::reactor::{Interest, Token};

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

/// Thin wrapper around a Linux `epoll` instance.
///
/// One `Selector` backs exactly one `Poll`. Registration changes
/// (`register`/`deregister`) are only ever issued from the reactor
/// thread, never concurrently, so no internal locking is needed.
#[derive(Debug)]
pub struct Selector {
    ep: OwnedFd,
}

impl Selector {
    pub fn new() -> io::Result<Selector> {
        // SAFETY: `epoll_create1(2)` ensures the fd is valid.
        let ep = unsafe { OwnedFd::from_raw_fd(syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?) };
        Ok(Selector { ep })
    }

    pub fn select(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        let timeout = timeout
            .map(|to| {
                to.checked_add(Duration::from_nanos(999_999))
                    .unwrap_or(to)
                    .as_millis() as libc::c_int
            })
            .unwrap_or(-1);

        events.0.clear();
        let n_events = syscall!(epoll_wait(
            self.ep.as_raw_fd(),
            events.0.as_mut_ptr(),
            events.0.capacity() as i32,
            timeout,
        ))?;
        // SAFETY: `epoll_wait` guarantees `n_events` elements were written.
        unsafe { events.0.set_len(n_events as usize) };
        Ok(())
    }

    pub fn register(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interest_to_epoll(interest),
            u64: token.0 as u64,
        };
        syscall!(epoll_ctl(self.ep.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut event)).map(|_| ())
    }

    pub fn deregister(&self, fd: RawFd) -> io::Result<()> {
        syscall!(epoll_ctl(
            self.ep.as_raw_fd(),
            libc::EPOLL_CTL_DEL,
            fd,
            std::ptr::null_mut()
        ))
        .map(|_| ())
    }
}

impl AsRawFd for Selector {
    fn as_raw_fd(&self) -> RawFd {
        self.ep.as_raw_fd()
    }
}

fn interest_to_epoll(interest: Interest) -> u32 {
    let mut kind = EPOLLET;
    if interest.is_readable() {
        kind |= EPOLLIN | EPOLLRDHUP;
    }
    if interest.is_writable() {
        kind |= EPOLLOUT;
    }
    kind as u32
}

/// A single readiness event, one `epoll_event` record.
#[derive(Debug)]
pub struct Event(pub(crate) libc::epoll_event);

impl Event {
    pub fn token(&self) -> Token {
        Token(self.0.u64 as usize)
    }

    pub fn is_readable(&self) -> bool {
        (self.0.events as libc::c_int & libc::EPOLLIN) != 0
    }

    pub fn is_writable(&self) -> bool {
        (self.0.events as libc::c_int & libc::EPOLLOUT) != 0
    }

    pub fn is_read_closed(&self) -> bool {
        self.0.events as libc::c_int & libc::EPOLLHUP != 0
            || (self.0.events as libc::c_int & libc::EPOLLIN != 0
                && self.0.events as libc::c_int & libc::EPOLLRDHUP != 0)
    }

    pub fn is_error(&self) -> bool {
        (self.0.events as libc::c_int & libc::EPOLLERR) != 0
    }
}

/// Buffer of pending readiness events, filled by `Selector::select`.
#[derive(Debug)]
pub struct Events(Vec<libc::epoll_event>);

impl Events {
    pub fn with_capacity(capacity: usize) -> Events {
        Events(Vec::with_capacity(capacity))
    }

    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.0.iter().map(|ev| Event(*ev))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
