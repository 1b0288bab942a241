//! Regression: terminating while a task is still queued and has never been polled must still
//! resolve its join, not just tasks already parked in IO_WAIT. Its own test binary (not
//! `tests/common`) since it calls the process-global `netco::shutdown()`.

const TASKS: usize = 500;

#[test]
fn shutdown_mid_dispatch_resolves_every_join() {
    // A single worker maximizes the odds that some tasks are still sitting in its run-list or
    // intake queue, never yet polled, at the instant shutdown flips the termination flag.
    netco::init(netco::PoolConfig::new().with_workers(1)).expect("pool init");

    let tasks: Vec<_> = (0..TASKS)
        .map(|_| netco::submit(|| async { Ok::<i64, std::io::Error>(0) }))
        .collect();

    netco::shutdown();

    let mut completed = 0;
    let mut abandoned = 0;
    for task in tasks {
        match netco::wait(task) {
            Ok(n) => {
                assert_eq!(n, 0);
                completed += 1;
            }
            Err(err) => {
                assert_eq!(err.kind(), std::io::ErrorKind::Interrupted);
                abandoned += 1;
            }
        }
    }
    assert_eq!(completed + abandoned, TASKS);
}
