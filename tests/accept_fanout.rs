//! End-to-end: one accept-loop coroutine fanning out to per-connection echo coroutines.

mod common;

use std::io::{Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const CLIENTS: usize = 100;

#[test]
fn accept_loop_echoes_every_concurrent_client() {
    common::ensure_pool();
    let (listener, addr) = common::nonblocking_listener();
    let listener_fd = common::raw_fd(&listener);
    let served = Arc::new(AtomicUsize::new(0));
    let served_in_loop = served.clone();

    let accept_loop = netco::submit(move || async move {
        for _ in 0..CLIENTS {
            let (client_fd, _peer) = netco::accept(listener_fd).await?;
            served_in_loop.fetch_add(1, Ordering::SeqCst);
            netco::submit(move || async move {
                let mut buf = [0u8; 64];
                let n = netco::read(client_fd, &mut buf).await?;
                netco::write(client_fd, &buf[..n]).await?;
                unsafe { libc::close(client_fd) };
                Ok(n as i64)
            });
        }
        Ok(CLIENTS as i64)
    });

    let client_threads: Vec<_> = (0..CLIENTS)
        .map(|i| {
            std::thread::spawn(move || {
                let payload = format!("client-{i}\n");
                let mut client = std::net::TcpStream::connect(addr).expect("client connect");
                client.write_all(payload.as_bytes()).expect("client write");
                let mut resp = vec![0u8; payload.len()];
                client.read_exact(&mut resp).expect("client read");
                assert_eq!(resp, payload.as_bytes());
            })
        })
        .collect();

    for t in client_threads {
        t.join().expect("client thread panicked");
    }

    let accepted = netco::wait(accept_loop).expect("accept loop result");
    assert_eq!(accepted, CLIENTS as i64);
    assert_eq!(served.load(Ordering::SeqCst), CLIENTS);

    drop(listener);
}
