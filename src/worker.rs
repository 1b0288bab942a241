//! Scheduler workers: one OS thread per worker, each owning a private run-list plus an MPSC
//! intake queue. Grounded on `naku::base::netco_pool::sched_worker` and its `rr_sched`
//! (`naku/base/copool/copool.h` + `naku/base/copool/copool.cpp`).

use std::collections::VecDeque;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::task::Poll;
use std::time::Duration;

use crate::pool::Pool;
use crate::task::{TaskInner, TaskState};

/// How long a worker's idle wait blocks before re-checking the termination flag, in the absence
/// of a spurious or genuine wake. Purely a shutdown-latency bound, not a polling interval.
const IDLE_RECHECK: Duration = Duration::from_millis(50);

pub(crate) struct SchedulerWorker {
    pub(crate) index: usize,
    intake: Mutex<VecDeque<Box<TaskInner>>>,
    intake_cv: Condvar,
    task_count: AtomicUsize,
}

impl SchedulerWorker {
    pub(crate) fn new(index: usize) -> SchedulerWorker {
        SchedulerWorker {
            index,
            intake: Mutex::new(VecDeque::new()),
            intake_cv: Condvar::new(),
            task_count: AtomicUsize::new(0),
        }
    }

    pub(crate) fn task_count(&self) -> usize {
        self.task_count.load(Ordering::Relaxed)
    }

    pub(crate) fn dec_task_count(&self) {
        self.task_count.fetch_sub(1, Ordering::Relaxed);
    }

    /// Enqueues a task for (re-)dispatch and wakes the worker. Called by `submit` for brand-new
    /// tasks and by the readiness worker for tasks coming back from `IO_WAIT`.
    pub(crate) fn push_intake(&self, task: Box<TaskInner>, counts_as_new: bool) {
        if counts_as_new {
            self.task_count.fetch_add(1, Ordering::Relaxed);
        }
        let mut intake = self.intake.lock().unwrap();
        intake.push_back(task);
        self.intake_cv.notify_one();
    }

    /// Wakes the worker without enqueuing anything, so it re-checks the termination flag. Used by
    /// `pool::shutdown`.
    pub(crate) fn wake(&self) {
        let _guard = self.intake.lock().unwrap();
        self.intake_cv.notify_all();
    }
}

/// The round-robin scheduling loop run by each worker thread.
pub(crate) fn worker_loop(pool: &'static Pool, index: usize) {
    log::debug!("worker {index} starting");
    let worker = &pool.workers[index];
    let mut runlist: VecDeque<Box<TaskInner>> = VecDeque::new();

    'outer: loop {
        // 1. Intake drain: head-insertion so freshly (re-)queued tasks run before older ones in
        // this same pass.
        {
            let mut intake = worker.intake.lock().unwrap();
            while let Some(task) = intake.pop_front() {
                runlist.push_front(task);
            }

            // 2. Idle wait: nothing to schedule at all.
            if runlist.is_empty() && intake.is_empty() {
                if pool.is_terminated() {
                    break 'outer;
                }
                let (_guard, _timeout) = worker
                    .intake_cv
                    .wait_timeout(intake, IDLE_RECHECK)
                    .unwrap();
                continue 'outer;
            }
        }

        if pool.is_terminated() {
            break 'outer;
        }

        // 3. Round-robin pass: every task left in `runlist` here is RUNNABLE by construction
        // (IO_WAIT tasks are removed from the run-list the moment they're registered).
        let mut i = 0;
        while i < runlist.len() {
            if pool.is_terminated() {
                break 'outer;
            }

            let poll_result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                runlist[i].poll_once()
            }));

            let (outcome, interest) = match poll_result {
                Ok(v) => v,
                Err(payload) => {
                    log::error!(
                        "worker {index}: coroutine panicked: {}",
                        panic_message(&payload)
                    );
                    std::process::abort();
                }
            };

            match outcome {
                Poll::Pending => match interest {
                    Some(io_interest) => {
                        let mut task = runlist.remove(i).expect("index in bounds");
                        task.set_state(TaskState::IoWait);
                        let raw = Box::into_raw(task);
                        log::debug!(
                            "worker {index}: parking task on fd {} events {:#x}",
                            io_interest.fd,
                            io_interest.events
                        );
                        // Recorded before registration: `epoll_ctl` can report the event (and the
                        // readiness thread can reclaim `raw`) before this call returns, so `parked`
                        // must already know about `raw` by the time that can happen.
                        pool.track_parked(raw);
                        // SAFETY: `raw` is an exclusively-owned, heap-stable pointer; ownership is
                        // transferred to the readiness facility until the matching event fires
                        // and the readiness worker reclaims it with `Box::from_raw`.
                        let registered = unsafe {
                            pool.readiness()
                                .register_or_update(io_interest.fd, io_interest.events, raw)
                        };
                        if let Err(err) = registered {
                            log::error!("worker {index}: readiness registration failed: {err}");
                            std::process::abort();
                        }
                        // Don't advance `i`: the element at this index is now whatever used to
                        // follow the removed task.
                    }
                    None => {
                        log::error!(
                            "worker {index}: coroutine suspended without awaiting a socket op"
                        );
                        std::process::abort();
                    }
                },
                Poll::Ready(result) => {
                    let task = runlist.remove(i).expect("index in bounds");
                    task.join.complete(result);
                    worker.dec_task_count();
                    // `task` drops here, freeing the boxed future — the coroutine frame is
                    // reclaimed regardless of whether anyone ever calls `wait` on its `Task`.
                }
            }
        }
    }

    // Termination can land mid-pass, leaving runnable tasks that were never polled to
    // completion this round, plus anything still sitting in intake. Neither set made it into
    // `Pool::parked`, so `abandon_parked` won't see them — complete their joins here instead so a
    // caller blocked on `wait` wakes up rather than hanging forever.
    abandon_remaining(worker, &mut runlist);

    log::debug!("worker {index} stopped");
}

fn abandon_remaining(worker: &SchedulerWorker, runlist: &mut VecDeque<Box<TaskInner>>) {
    for task in runlist.drain(..) {
        task.join
            .complete(Err(io::Error::from(io::ErrorKind::Interrupted)));
        worker.dec_task_count();
    }
    let mut intake = worker.intake.lock().unwrap();
    for task in intake.drain(..) {
        task.join
            .complete(Err(io::Error::from(io::ErrorKind::Interrupted)));
        worker.dec_task_count();
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
