//! A thin, out-of-core `TcpListener`/`TcpStream` convenience wrapper over the four raw awaitables,
//! demonstrated as a loopback echo server. Mirrors the source's `naku_socket` helper: it is the
//! caller's job to create a non-blocking socket before handing its descriptor to the runtime, so
//! this wrapper does exactly that and nothing more.

use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};

struct NonBlockingListener {
    inner: std::net::TcpListener,
}

impl NonBlockingListener {
    fn bind(addr: SocketAddr, backlog: i32) -> std::io::Result<NonBlockingListener> {
        let _ = backlog; // `std::net::TcpListener::bind` doesn't expose a backlog knob; kept to
                          // document the `PoolConfig::listen_backlog` knob this wrapper would use
                          // if it dialed the raw `socket`/`bind`/`listen` syscalls directly.
        let inner = std::net::TcpListener::bind(addr)?;
        inner.set_nonblocking(true)?;
        Ok(NonBlockingListener { inner })
    }

    fn fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }

    fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

struct NonBlockingStream {
    fd: RawFd,
}

impl NonBlockingStream {
    unsafe fn from_raw_fd(fd: RawFd) -> NonBlockingStream {
        NonBlockingStream { fd }
    }

    fn fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for NonBlockingStream {
    fn drop(&mut self) {
        // SAFETY: `self.fd` is exclusively owned by this wrapper for its entire lifetime.
        unsafe {
            libc::close(self.fd);
        }
    }
}

async fn handle_connection(stream: NonBlockingStream) -> std::io::Result<i64> {
    let mut buf = [0u8; 1024];
    let n = netco::read(stream.fd(), &mut buf).await?;
    if n > 0 {
        netco::write(stream.fd(), &buf[..n]).await?;
    }
    Ok(n as i64)
}

async fn accept_loop(listener: NonBlockingListener) -> std::io::Result<i64> {
    let mut accepted = 0i64;
    loop {
        let (client_fd, _peer) = netco::accept(listener.fd()).await?;
        accepted += 1;
        // SAFETY: `accept4` (used by `netco::accept`) returns a freshly-created, exclusively-owned
        // descriptor; `NonBlockingStream` takes ownership and closes it on drop.
        let stream = unsafe { NonBlockingStream::from_raw_fd(client_fd) };
        netco::submit(move || handle_connection(stream));
    }
}

fn main() -> std::io::Result<()> {
    env_logger::init();
    let config = netco::PoolConfig::new();
    let backlog = config.listen_backlog();
    netco::init(config).expect("pool init");

    let listener = NonBlockingListener::bind("127.0.0.1:7878".parse().unwrap(), backlog)?;
    println!("echoing on {}", listener.local_addr()?);

    let accept_task = netco::submit(move || accept_loop(listener));
    let _ = netco::wait(accept_task);

    netco::shutdown();
    Ok(())
}
