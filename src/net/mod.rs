//! Non-blocking IPv4 TCP primitives built directly on raw `libc` calls,
//! the same way `crate::reactor::selector` talks to `epoll` directly.
//! IPv6 is out of scope.

mod tcp;

pub use tcp::{TcpListener, TcpStream};
