//! The single I/O readiness thread: blocks on `epoll_wait`, and for each ready event flips the
//! associated task back to runnable and hands it to its owning worker's intake queue. Grounded on
//! `naku::base::netco_pool::iomul_worker` (`naku/base/copool/copool.h` +
//! `naku/base/copool/copool.cpp`).

use crate::pool::Pool;
use crate::reactor::payload_of;
use crate::task::TaskState;

/// Timeout passed to `epoll_wait` on each iteration. Short enough that the termination flag is
/// re-checked promptly; this is not a polling interval — the thread still blocks in the kernel
/// for up to this long when there's nothing ready.
const DEFAULT_TIMEOUT_MS: i32 = 1;

pub(crate) fn readiness_loop(pool: &'static Pool) {
    log::debug!("readiness worker starting");
    let mut events = vec![
        libc::epoll_event { events: 0, u64: 0 };
        pool.config().epoll_batch()
    ];

    loop {
        if pool.is_terminated() {
            break;
        }

        let timeout_ms = pool.config().epoll_timeout_ms().unwrap_or(DEFAULT_TIMEOUT_MS);
        let n = match pool.readiness().dispatch_batch(&mut events, timeout_ms) {
            Ok(n) => n,
            Err(err) => {
                log::error!("readiness worker: epoll_wait failed fatally: {err}");
                std::process::abort();
            }
        };

        for ev in &events[..n] {
            let raw = payload_of(ev);
            if raw.is_null() {
                continue;
            }
            pool.untrack_parked(raw);
            // SAFETY: `raw` was produced by `Box::into_raw` in `worker::worker_loop` right before
            // registering this exact `epoll` interest, and `EPOLLONESHOT` guarantees the kernel
            // reports it at most once until re-armed — so this is the unique reclaim of this
            // allocation for this registration.
            let mut task = unsafe { Box::from_raw(raw) };
            task.set_state(TaskState::Runnable);
            let owner = task.owner;
            log::debug!("readiness worker: requeuing task on worker {owner}");
            pool.workers[owner].push_intake(task, false);
        }
    }

    log::debug!("readiness worker stopped");
}
