//! Shared helpers for the integration tests: a process-wide pool initialized exactly once per
//! test binary, and a couple of raw-socket constructors for the cases `std::net` doesn't expose
//! (a non-blocking listener fd, a non-blocking not-yet-connected socket fd).

use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Once;

static INIT: Once = Once::new();

/// Starts the pool once per test binary. Every `#[test]` in the same file (and thus the same
/// process) shares one pool; this mirrors how a real service calls `netco::init` exactly once at
/// process start rather than per request.
pub fn ensure_pool() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
        netco::init(netco::PoolConfig::new().with_workers(4)).expect("pool init");
    });
}

/// Binds a non-blocking loopback listener and returns it alongside its bound address. Kept alive
/// (not leaked) so the fd closes on drop once the test is done with it.
pub fn nonblocking_listener() -> (std::net::TcpListener, SocketAddr) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.set_nonblocking(true).expect("set_nonblocking");
    let addr = listener.local_addr().expect("local_addr");
    (listener, addr)
}

/// Creates a non-blocking, not-yet-connected IPv4 TCP socket, wrapped for safe cleanup.
pub fn nonblocking_unconnected_socket() -> std::net::TcpStream {
    // SAFETY: standard socket(2) argument combination; the fd is immediately handed to
    // `TcpStream::from_raw_fd`, which takes ownership and closes it on drop.
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
    assert!(fd >= 0, "socket() failed: {}", std::io::Error::last_os_error());
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    assert!(flags >= 0, "fcntl(F_GETFL) failed");
    let ret = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    assert!(ret >= 0, "fcntl(F_SETFL) failed");
    use std::os::unix::io::FromRawFd;
    unsafe { std::net::TcpStream::from_raw_fd(fd) }
}

pub fn raw_fd(s: &impl AsRawFd) -> RawFd {
    s.as_raw_fd()
}
