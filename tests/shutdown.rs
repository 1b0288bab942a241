//! End-to-end: shutdown must return promptly even with coroutines parked on reads that will never
//! complete. Deliberately does not use `tests/common` — this test calls `netco::shutdown()`, which
//! is process-global, so it must not share a binary with any other test that expects the pool to
//! stay up.

use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

const BLOCKED_COROUTINES: usize = 100;
const SHUTDOWN_BOUND: Duration = Duration::from_secs(5);

fn nonblocking_pipe() -> (RawFd, RawFd) {
    let mut fds = [0 as RawFd; 2];
    // SAFETY: `fds` is a valid 2-element out-array for pipe2(2).
    let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
    assert!(ret == 0, "pipe2 failed: {}", std::io::Error::last_os_error());
    (fds[0], fds[1])
}

#[test]
fn shutdown_returns_promptly_with_coroutines_parked_on_read() {
    netco::init(netco::PoolConfig::new().with_workers(4)).expect("pool init");

    let mut read_ends = Vec::with_capacity(BLOCKED_COROUTINES);
    let mut write_ends = Vec::with_capacity(BLOCKED_COROUTINES);
    let mut tasks = Vec::with_capacity(BLOCKED_COROUTINES);

    for _ in 0..BLOCKED_COROUTINES {
        let (read_fd, write_fd) = nonblocking_pipe();
        read_ends.push(read_fd);
        write_ends.push(write_fd);
        tasks.push(netco::submit(move || async move {
            let mut buf = [0u8; 8];
            // Nobody ever writes to `write_fd`, so this legitimately parks in IO_WAIT.
            netco::read(read_fd, &mut buf).await.map(|n| n as i64)
        }));
    }

    // Give the workers a moment to actually park every coroutine on the readiness facility
    // before pulling the rug out from under them.
    std::thread::sleep(Duration::from_millis(100));

    let start = Instant::now();
    netco::shutdown();
    let elapsed = start.elapsed();

    assert!(
        elapsed < SHUTDOWN_BOUND,
        "shutdown took {elapsed:?}, expected under {SHUTDOWN_BOUND:?}"
    );

    // Every abandoned coroutine's join must resolve instead of hanging forever.
    for task in tasks {
        let err = netco::wait(task).expect_err("abandoned coroutine should not succeed");
        assert_eq!(err.kind(), std::io::ErrorKind::Interrupted);
    }

    for fd in read_ends.into_iter().chain(write_ends) {
        unsafe { libc::close(fd) };
    }
}
