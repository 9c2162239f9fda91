use std::io::{self, Read, Write};
use std::mem;
use std::net::SocketAddrV4;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

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

fn to_sockaddr(addr: SocketAddrV4) -> (libc::sockaddr_in, libc::socklen_t) {
    let sin = libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: addr.port().to_be(),
        sin_addr: libc::in_addr {
            s_addr: u32::from_ne_bytes(addr.ip().octets()),
        },
        sin_zero: [0; 8],
    };
    (sin, mem::size_of::<libc::sockaddr_in>() as libc::socklen_t)
}

unsafe fn from_sockaddr(storage: &libc::sockaddr_in) -> SocketAddrV4 {
    let ip = std::net::Ipv4Addr::from(storage.sin_addr.s_addr.to_ne_bytes());
    let port = u16::from_be(storage.sin_port);
    SocketAddrV4::new(ip, port)
}

fn new_raw_socket() -> io::Result<RawFd> {
    syscall!(socket(
        libc::AF_INET,
        libc::SOCK_STREAM | libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
        0,
    ))
}

fn set_reuseaddr(fd: RawFd) -> io::Result<()> {
    let value: libc::c_int = 1;
    syscall!(setsockopt(
        fd,
        libc::SOL_SOCKET,
        libc::SO_REUSEADDR,
        &value as *const libc::c_int as *const libc::c_void,
        mem::size_of::<libc::c_int>() as libc::socklen_t,
    ))
    .map(|_| ())
}

/// A non-blocking IPv4 TCP listening socket.
#[derive(Debug)]
pub struct TcpListener {
    fd: OwnedFd,
}

impl TcpListener {
    pub fn bind(addr: SocketAddrV4) -> io::Result<TcpListener> {
        let fd = new_raw_socket()?;
        // SAFETY: `fd` was just returned by `socket(2)` and is owned here.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        set_reuseaddr(fd.as_raw_fd())?;
        let (sin, len) = to_sockaddr(addr);
        syscall!(bind(
            fd.as_raw_fd(),
            &sin as *const _ as *const libc::sockaddr,
            len,
        ))?;
        syscall!(listen(fd.as_raw_fd(), 1024))?;
        Ok(TcpListener { fd })
    }

    pub fn accept(&self) -> io::Result<(TcpStream, SocketAddrV4)> {
        let mut storage: libc::sockaddr_in = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        let raw_fd = syscall!(accept4(
            self.fd.as_raw_fd(),
            &mut storage as *mut _ as *mut libc::sockaddr,
            &mut len,
            libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
        ))?;
        // SAFETY: `accept4(2)` returns a valid owned fd on success.
        let fd = unsafe { OwnedFd::from_raw_fd(raw_fd) };
        let peer = unsafe { from_sockaddr(&storage) };
        Ok((TcpStream { fd }, peer))
    }
}

impl AsRawFd for TcpListener {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// A non-blocking IPv4 TCP stream, already connected (accepted).
#[derive(Debug)]
pub struct TcpStream {
    fd: OwnedFd,
}

impl TcpStream {
    pub fn shutdown(&self, how: std::net::Shutdown) -> io::Result<()> {
        let how = match how {
            std::net::Shutdown::Read => libc::SHUT_RD,
            std::net::Shutdown::Write => libc::SHUT_WR,
            std::net::Shutdown::Both => libc::SHUT_RDWR,
        };
        syscall!(shutdown(self.fd.as_raw_fd(), how)).map(|_| ())
    }

    pub fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        let value: libc::c_int = nodelay as libc::c_int;
        syscall!(setsockopt(
            self.fd.as_raw_fd(),
            libc::IPPROTO_TCP,
            libc::TCP_NODELAY,
            &value as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        ))
        .map(|_| ())
    }
}

impl Read for TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&*self).read(buf)
    }
}

impl Read for &TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = syscall!(read(
            self.fd.as_raw_fd(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
        ))?;
        Ok(n as usize)
    }
}

impl Write for TcpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&*self).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (&*self).flush()
    }
}

impl Write for &TcpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = syscall!(write(
            self.fd.as_raw_fd(),
            buf.as_ptr() as *const libc::c_void,
            buf.len(),
        ))?;
        Ok(n as usize)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AsRawFd for TcpStream {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
