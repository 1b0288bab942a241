//! The process-wide pool facade: lifecycle, submission, and join. Grounded on
//! `naku::base::netco_pool` (`naku/base/copool/copool.h`), the C++ source's singleton coroutine
//! pool, with the documented-intent argmin dispatch policy in place of its shipped
//! "always worker 0" bug (see `DESIGN.md`).

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};
use std::thread::JoinHandle;

use crate::error::{Error, Result};
use crate::reactor::Readiness;
use crate::task::{BoxedFuture, Task, TaskInner};
use crate::worker::SchedulerWorker;
use crate::{readiness, worker};

/// Hard ceiling on worker count, matching the source's `utils::max_threads`.
const MAX_WORKERS: usize = 200;

/// Tunable knobs the source hard-coded. Only `workers` and the two `epoll_*` fields affect the
/// core scheduler; `listen_backlog` exists for the out-of-scope demo TCP wrapper to read.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    workers: Option<usize>,
    epoll_timeout_ms: Option<i32>,
    epoll_batch: usize,
    listen_backlog: i32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            workers: None,
            epoll_timeout_ms: None,
            epoll_batch: 4096,
            listen_backlog: 128,
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the worker count; the default is `clamp(2 * num_cpus, 1, 200)`.
    pub fn with_workers(mut self, n: usize) -> Self {
        self.workers = Some(n.max(1));
        self
    }

    /// Overrides the per-iteration `epoll_wait` timeout in milliseconds (default 1ms).
    pub fn with_epoll_timeout_ms(mut self, ms: i32) -> Self {
        self.epoll_timeout_ms = Some(ms);
        self
    }

    /// Overrides the `epoll_wait` batch size (default 4096, matching the source).
    pub fn with_epoll_batch(mut self, n: usize) -> Self {
        self.epoll_batch = n.max(1);
        self
    }

    /// Overrides the listen backlog a demo TCP wrapper would pass to `listen(2)`.
    pub fn with_listen_backlog(mut self, n: i32) -> Self {
        self.listen_backlog = n;
        self
    }

    pub fn listen_backlog(&self) -> i32 {
        self.listen_backlog
    }

    pub(crate) fn epoll_batch(&self) -> usize {
        self.epoll_batch
    }

    pub(crate) fn epoll_timeout_ms(&self) -> Option<i32> {
        self.epoll_timeout_ms
    }
}

struct Handles {
    io: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

pub(crate) struct Pool {
    pub(crate) workers: Vec<Box<SchedulerWorker>>,
    readiness: Readiness,
    terminated: AtomicBool,
    submission_lock: Mutex<()>,
    config: PoolConfig,
    handles: Mutex<Option<Handles>>,
    /// Every task currently registered with the readiness facility, keyed by its `Box::into_raw`
    /// pointer. A worker inserts on registration; the readiness worker removes on a genuine
    /// kernel event. Whatever is left once every worker and the readiness thread have stopped was
    /// abandoned mid-suspend by `shutdown` and is reclaimed by `abandon_parked`.
    parked: Mutex<std::collections::HashSet<usize>>,
}

impl Pool {
    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub(crate) fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    pub(crate) fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub(crate) fn track_parked(&self, ptr: *mut TaskInner) {
        self.parked.lock().unwrap().insert(ptr as usize);
    }

    pub(crate) fn untrack_parked(&self, ptr: *mut TaskInner) {
        self.parked.lock().unwrap().remove(&(ptr as usize));
    }

    fn join_all(&self) {
        let handles = self.handles.lock().unwrap().take();
        if let Some(h) = handles {
            for w in h.workers {
                let _ = w.join();
            }
            let _ = h.io.join();
        }
    }

    /// Completes the `JoinState` of every task still parked in IO_WAIT once every worker and the
    /// readiness thread have fully stopped, so a joiner blocked on one of them is freed instead of
    /// waiting forever. Only safe to call after `join_all`: with no threads left running, nothing
    /// else can be touching `parked` or the pointers it holds.
    fn abandon_parked(&self) {
        let leftover: Vec<usize> = self.parked.lock().unwrap().drain().collect();
        for raw in leftover {
            let ptr = raw as *mut TaskInner;
            // SAFETY: `ptr` was produced by `Box::into_raw` when the worker that owned this task
            // registered it, and is only ever reclaimed here or by the readiness worker (which has
            // already stopped by the time this runs) — never both.
            let task = unsafe { Box::from_raw(ptr) };
            task.join
                .complete(Err(io::Error::from(io::ErrorKind::Interrupted)));
            self.workers[task.owner].dec_task_count();
        }
    }
}

static POOL: OnceLock<Pool> = OnceLock::new();

fn default_worker_count() -> usize {
    (2 * num_cpus::get()).clamp(1, MAX_WORKERS)
}

/// Starts the pool: the readiness thread, then the scheduler worker threads. Must be called
/// exactly once before [`submit`]. Returns [`Error::AlreadyInitialized`] if called again.
pub fn init(config: PoolConfig) -> Result<()> {
    if POOL.get().is_some() {
        return Err(Error::AlreadyInitialized);
    }

    let n = config.workers.unwrap_or_else(default_worker_count);
    let readiness = Readiness::new().map_err(Error::ReadinessFacility)?;
    let workers = (0..n).map(|i| Box::new(SchedulerWorker::new(i))).collect();

    let pool = Pool {
        workers,
        readiness,
        terminated: AtomicBool::new(false),
        submission_lock: Mutex::new(()),
        config,
        handles: Mutex::new(None),
        parked: Mutex::new(std::collections::HashSet::new()),
    };

    if POOL.set(pool).is_err() {
        return Err(Error::AlreadyInitialized);
    }
    let pool: &'static Pool = POOL.get().expect("just set");

    log::debug!("pool init: starting readiness worker and {n} scheduler workers");

    let io = std::thread::Builder::new()
        .name("netco-io".to_string())
        .spawn(move || readiness::readiness_loop(pool))
        .expect("failed to spawn readiness thread");

    let worker_handles = (0..n)
        .map(|i| {
            std::thread::Builder::new()
                .name(format!("netco-worker-{i}"))
                .spawn(move || worker::worker_loop(pool, i))
                .expect("failed to spawn scheduler worker thread")
        })
        .collect();

    *pool.handles.lock().unwrap() = Some(Handles {
        io,
        workers: worker_handles,
    });

    Ok(())
}

/// Signals every thread to exit at its next boundary check and blocks until all of them have.
/// Idempotent: a second call (or a call before `init`) is a harmless no-op.
pub fn shutdown() {
    let pool = match POOL.get() {
        Some(p) => p,
        None => {
            log::debug!("shutdown: pool was never initialized");
            return;
        }
    };

    if pool.terminated.swap(true, Ordering::SeqCst) {
        log::debug!("shutdown: already terminated");
        pool.join_all();
        return;
    }

    log::debug!("shutdown: signaling workers");
    for w in &pool.workers {
        w.wake();
    }
    pool.join_all();

    // Every worker and the readiness thread have now stopped, so any task left in `parked` was
    // genuinely abandoned mid-suspend rather than raced with a real kernel event.
    pool.abandon_parked();
}

/// Blocks the calling thread until all scheduler workers and the readiness worker have exited.
/// Does not itself request termination — pair with a `shutdown()` call from elsewhere (or a
/// signal handler) to actually make the pool stop.
pub fn evloop() {
    if let Some(pool) = POOL.get() {
        pool.join_all();
    }
}

/// Schedules `f()`'s coroutine on the worker with the fewest currently-live tasks, ties broken by
/// lowest worker index. Never fails except by panicking if [`init`] hasn't been called, or by
/// process abort on allocation failure (Rust's default `GlobalAlloc` behavior, not a `Result`).
pub fn submit<F, Fut>(f: F) -> Task
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = io::Result<i64>> + Send + 'static,
{
    let pool = POOL.get().expect("netco::pool::init must be called before submit");

    let future: BoxedFuture = Box::pin(f());

    let guard = pool.submission_lock.lock().unwrap();
    let owner = pool
        .workers
        .iter()
        .enumerate()
        .min_by_key(|(_, w)| w.task_count())
        .map(|(i, _)| i)
        .expect("pool has at least one worker");

    let (inner, join) = TaskInner::new(future, owner);
    pool.workers[owner].push_intake(inner, true);
    drop(guard);

    Task::new(join)
}

/// Blocks until `task`'s coroutine completes and returns its result. Must be called at most once
/// per task.
pub fn wait(task: Task) -> io::Result<i64> {
    task.join()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static INIT: Once = Once::new();
    const WORKERS: usize = 4;

    fn ensure_pool() {
        INIT.call_once(|| {
            init(PoolConfig::new().with_workers(WORKERS)).expect("pool init");
        });
    }

    /// Load balancing: 1,000 immediately-returning coroutines must never pile more than
    /// `ceil(n / WORKERS)` onto any one worker at submission time.
    #[test]
    fn argmin_dispatch_bounds_per_worker_load() {
        ensure_pool();
        let pool = POOL.get().expect("pool initialized by ensure_pool");
        const N: usize = 1000;
        let bound = N.div_ceil(WORKERS);

        let mut tasks = Vec::with_capacity(N);
        for _ in 0..N {
            for w in &pool.workers {
                assert!(
                    w.task_count() <= bound,
                    "worker {} exceeded ceil({N}/{WORKERS}) = {bound} before submitting task {}",
                    w.index,
                    tasks.len()
                );
            }
            tasks.push(submit(|| async { Ok::<i64, io::Error>(0) }));
        }

        for task in tasks {
            wait(task).expect("immediately-returning coroutine");
        }

        // Every reaped task decrements its worker's count; all workers should drain to zero.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            let total: usize = pool.workers.iter().map(|w| w.task_count()).sum();
            if total == 0 {
                break;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "workers still report {total} live tasks after all coroutines were joined"
            );
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
    }
}
