//! End-to-end: a coroutine that dials out with `netco::connect` and exchanges data over the
//! resulting connection, proving the connection is genuinely usable once `connect` resolves.

mod common;

use std::io::{Read, Write};
use std::os::unix::io::IntoRawFd;
use std::time::Duration;

#[test]
fn connect_establishes_a_working_connection() {
    common::ensure_pool();
    let (listener, addr) = common::nonblocking_listener();

    let server_thread = std::thread::spawn(move || loop {
        match listener.accept() {
            Ok((mut stream, _)) => {
                let mut buf = [0u8; 16];
                let n = stream.read(&mut buf).expect("server read");
                stream.write_all(&buf[..n]).expect("server write");
                break;
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(e) => panic!("server accept failed: {e}"),
        }
    });

    let client_fd = common::nonblocking_unconnected_socket().into_raw_fd();

    let task = netco::submit(move || async move {
        netco::connect(client_fd, addr).await?;
        netco::write(client_fd, b"ping\n").await?;
        let mut buf = [0u8; 16];
        let n = netco::read(client_fd, &mut buf).await?;
        unsafe { libc::close(client_fd) };
        Ok(n as i64)
    });

    let n = netco::wait(task).expect("connect coroutine result");
    assert_eq!(n, 5);

    server_thread.join().expect("server thread");
}
