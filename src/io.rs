//! The four async socket operations: `accept`, `connect`, `read`, `write`.
//!
//! Each is a hand-rolled `Future` grounded directly on
//! `naku::base::async_accept`/`async_connect`/`async_read`/`async_write`
//! (`naku/base/copool/netio_wrap.h`): attempt the non-blocking syscall under an `EINTR`-swallowing
//! retry loop; if it would block, record `(fd, events)` on the current task via
//! [`crate::task::record_io_interest`] and return `Poll::Pending`; on the next `poll` (driven by
//! the scheduler resuming the task after a readiness event), attempt once more, non-retrying on a
//! second would-block.
//!
//! All file descriptors passed in must already be non-blocking — this crate never sets
//! `O_NONBLOCK` itself.

use std::future::Future;
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::task::record_io_interest;

fn would_block(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EAGAIN) | Some(libc::EWOULDBLOCK)
    )
}

fn is_eintr(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EINTR)
}

fn sockaddr_from(addr: SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(v4) => {
            let sin = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: v4.port().to_be(),
                sin_addr: libc::in_addr {
                    s_addr: u32::from_ne_bytes(v4.ip().octets()),
                },
                sin_zero: [0; 8],
            };
            // SAFETY: `sockaddr_in` and `sockaddr_storage` are both POD and the storage buffer is
            // large enough (`sockaddr_storage` is sized to hold any socket address type).
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in, sin);
            }
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t
        }
        SocketAddr::V6(v6) => {
            let sin6 = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: v6.port().to_be(),
                sin6_flowinfo: v6.flowinfo(),
                sin6_addr: libc::in6_addr {
                    s6_addr: v6.ip().octets(),
                },
                sin6_scope_id: v6.scope_id(),
            };
            // SAFETY: see above.
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in6, sin6);
            }
            mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t
        }
    };
    (storage, len)
}

fn socket_addr_from(storage: &libc::sockaddr_storage) -> io::Result<SocketAddr> {
    match storage.ss_family as i32 {
        libc::AF_INET => {
            // SAFETY: `ss_family == AF_INET` guarantees the kernel wrote a `sockaddr_in` here.
            let sin = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            let ip = std::net::Ipv4Addr::from(u32::from_ne_bytes(sin.sin_addr.s_addr.to_ne_bytes()));
            Ok(SocketAddr::V4(std::net::SocketAddrV4::new(
                ip,
                u16::from_be(sin.sin_port),
            )))
        }
        libc::AF_INET6 => {
            // SAFETY: `ss_family == AF_INET6` guarantees the kernel wrote a `sockaddr_in6` here.
            let sin6 = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            let ip = std::net::Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            Ok(SocketAddr::V6(std::net::SocketAddrV6::new(
                ip,
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        family => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported address family {family}"),
        )),
    }
}

/// Accepts one connection on `fd`, a non-blocking listening socket.
pub async fn accept(fd: RawFd) -> io::Result<(RawFd, SocketAddr)> {
    AcceptFuture {
        fd,
        suspended: false,
    }
    .await
}

struct AcceptFuture {
    fd: RawFd,
    suspended: bool,
}

impl Future for AcceptFuture {
    type Output = io::Result<(RawFd, SocketAddr)>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        loop {
            // SAFETY: `storage`/`len` are valid, appropriately-sized out-parameters.
            let connfd = unsafe {
                libc::accept4(
                    this.fd,
                    &mut storage as *mut _ as *mut libc::sockaddr,
                    &mut len,
                    libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                )
            };
            if connfd >= 0 {
                return Poll::Ready(socket_addr_from(&storage).map(|addr| (connfd, addr)));
            }
            let err = io::Error::last_os_error();
            if is_eintr(&err) {
                continue;
            }
            if would_block(&err) {
                if this.suspended {
                    return Poll::Ready(Err(io::Error::from(io::ErrorKind::WouldBlock)));
                }
                this.suspended = true;
                record_io_interest(this.fd, libc::EPOLLIN as u32);
                return Poll::Pending;
            }
            return Poll::Ready(Err(err));
        }
    }
}

/// Initiates a non-blocking connection from `fd` to `addr`.
pub async fn connect(fd: RawFd, addr: SocketAddr) -> io::Result<()> {
    ConnectFuture {
        fd,
        addr,
        suspended: false,
    }
    .await
}

struct ConnectFuture {
    fd: RawFd,
    addr: SocketAddr,
    suspended: bool,
}

impl Future for ConnectFuture {
    type Output = io::Result<()>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        // Resumed after an EPOLLOUT readiness event: the kernel tracks at most one connection
        // attempt per socket, so a second connect(2) on this fd would observe EISCONN or EALREADY
        // rather than EINPROGRESS, not a meaningful answer about the attempt that just completed.
        // Report success-so-far here, the same way the wrapper this is modeled on does.
        if this.suspended {
            return Poll::Ready(Ok(()));
        }

        loop {
            let (storage, len) = sockaddr_from(this.addr);
            // SAFETY: `storage` is a valid `sockaddr_storage` with a correctly-sized address
            // written into its first `len` bytes by `sockaddr_from`.
            let ret = unsafe {
                libc::connect(this.fd, &storage as *const _ as *const libc::sockaddr, len)
            };
            if ret == 0 {
                return Poll::Ready(Ok(()));
            }
            let err = io::Error::last_os_error();
            if is_eintr(&err) {
                continue;
            }
            if err.raw_os_error() == Some(libc::EINPROGRESS) || would_block(&err) {
                this.suspended = true;
                record_io_interest(this.fd, libc::EPOLLOUT as u32);
                return Poll::Pending;
            }
            return Poll::Ready(Err(err));
        }
    }
}

/// Reads up to `buf.len()` bytes from `fd` into `buf`.
pub async fn read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    ReadFuture {
        fd,
        buf,
        suspended: false,
    }
    .await
}

struct ReadFuture<'a> {
    fd: RawFd,
    buf: &'a mut [u8],
    suspended: bool,
}

impl Future for ReadFuture<'_> {
    type Output = io::Result<usize>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            // SAFETY: `this.buf` is a valid, writable slice of at least `this.buf.len()` bytes.
            let ret = unsafe {
                libc::read(
                    this.fd,
                    this.buf.as_mut_ptr() as *mut libc::c_void,
                    this.buf.len(),
                )
            };
            if ret >= 0 {
                return Poll::Ready(Ok(ret as usize));
            }
            let err = io::Error::last_os_error();
            if is_eintr(&err) {
                continue;
            }
            if would_block(&err) {
                if this.suspended {
                    return Poll::Ready(Ok(0));
                }
                this.suspended = true;
                record_io_interest(this.fd, libc::EPOLLIN as u32);
                return Poll::Pending;
            }
            return Poll::Ready(Err(err));
        }
    }
}

/// Writes `buf` to `fd`, returning the number of bytes actually written.
pub async fn write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    WriteFuture {
        fd,
        buf,
        suspended: false,
    }
    .await
}

struct WriteFuture<'a> {
    fd: RawFd,
    buf: &'a [u8],
    suspended: bool,
}

impl Future for WriteFuture<'_> {
    type Output = io::Result<usize>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            // SAFETY: `this.buf` is a valid, readable slice of at least `this.buf.len()` bytes.
            let ret = unsafe {
                libc::write(
                    this.fd,
                    this.buf.as_ptr() as *const libc::c_void,
                    this.buf.len(),
                )
            };
            if ret >= 0 {
                return Poll::Ready(Ok(ret as usize));
            }
            let err = io::Error::last_os_error();
            if is_eintr(&err) {
                continue;
            }
            if would_block(&err) {
                if this.suspended {
                    return Poll::Ready(Ok(0));
                }
                this.suspended = true;
                record_io_interest(this.fd, libc::EPOLLOUT as u32);
                return Poll::Pending;
            }
            return Poll::Ready(Err(err));
        }
    }
}
