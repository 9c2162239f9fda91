//! A small, single-backend reactor: Linux `epoll` via raw `libc` calls.
//!
//! Mirrors the shape of a generic I/O reactor (`Poll`/`Registry`/`Token`/
//! `Interest`/`Events`/`Waker`) but drops the portability layer: this
//! crate targets Linux only, so there is exactly one selector
//! implementation instead of a `sys::{unix, windows, ...}` split.

mod selector;
mod waker;

use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

pub use selector::{Event, Events};
pub use waker::Waker;

use selector::Selector;

/// Identifies a registered source across events. The server engine uses
/// the slot's index for client connections and two reserved values for
/// the listener and the cross-thread waker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(pub usize);

/// A set of readiness conditions a source is registered for. The server
/// only ever registers a single condition at a time (a slot is either
/// awaiting readability or awaiting writability, never both at once),
/// so this carries no combinator for OR-ing interests together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest(u8);

impl Interest {
    pub const READABLE: Interest = Interest(0b01);
    pub const WRITABLE: Interest = Interest(0b10);

    pub fn is_readable(self) -> bool {
        self.0 & Interest::READABLE.0 != 0
    }

    pub fn is_writable(self) -> bool {
        self.0 & Interest::WRITABLE.0 != 0
    }
}

/// Cheap, cloneable handle used to register and deregister raw file
/// descriptors against the selector a [`Poll`] owns.
#[derive(Debug, Clone)]
pub struct Registry {
    selector: Arc<Selector>,
}

impl Registry {
    pub fn register(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        self.selector.register(fd, token, interest)
    }

    pub fn deregister(&self, fd: RawFd) -> io::Result<()> {
        self.selector.deregister(fd)
    }
}

/// Owns the `epoll` instance. Only ever driven from the reactor thread;
/// registration changes arriving from worker threads go through the
/// cloned [`Registry`] handle, which is safe to call from any thread
/// since each `epoll_ctl` call is independently atomic.
pub struct Poll {
    selector: Arc<Selector>,
}

impl Poll {
    pub fn new() -> io::Result<Poll> {
        Ok(Poll {
            selector: Arc::new(Selector::new()?),
        })
    }

    pub fn registry(&self) -> Registry {
        Registry {
            selector: Arc::clone(&self.selector),
        }
    }

    pub fn poll(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        self.selector.select(events, timeout)
    }
}
