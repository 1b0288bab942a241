//! The scheduled coroutine object and its suspension bookkeeping.
//!
//! A coroutine is represented by two heap allocations with different ownership regimes:
//!
//! - [`TaskInner`] is the scheduler-owned half: the boxed `Future`, its lifecycle `state`, and the
//!   `(fd, events)` pair it parks on while suspended. It moves between a worker's intake queue,
//!   that worker's run-list, and (while `IO_WAIT`) a raw pointer registered with the readiness
//!   facility. Exactly one of those three places holds it at any time.
//! - [`JoinState`] is the joiner-visible half: a one-shot completion signal plus the stored return
//!   value, shared via `Arc` between `TaskInner` and the public [`Task`] handle returned by
//!   `submit`. Splitting it out of `TaskInner` means the coroutine frame can be dropped by the
//!   scheduler the moment it completes, independent of whether anyone ever calls `wait` on it.

use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::io;
use std::os::unix::io::RawFd;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

/// The coroutine body: whatever a `submit`ted closure returns, boxed and pinned.
pub(crate) type BoxedFuture = Pin<Box<dyn Future<Output = io::Result<i64>> + Send>>;

/// Lifecycle state of a [`TaskInner`]. The only legal moves are `Runnable -> IoWait` (worker, on a
/// recorded suspend), `IoWait -> Runnable` (readiness thread, on an event), and `Runnable -> Done`
/// (future resolved).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskState {
    Runnable = 0,
    IoWait = 1,
    Done = 2,
}

impl TaskState {
    fn from_u8(v: u8) -> TaskState {
        match v {
            0 => TaskState::Runnable,
            1 => TaskState::IoWait,
            2 => TaskState::Done,
            other => unreachable!("invalid TaskState discriminant {other}"),
        }
    }
}

/// The descriptor/event-mask pair an awaitable records on `Poll::Pending`, recovered by the
/// worker immediately after the `poll` call that produced it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IoInterest {
    pub fd: RawFd,
    pub events: u32,
}

/// Joiner-visible half of a task: survives the coroutine frame so `wait` always has something to
/// read from, independent of how late the joiner shows up.
pub(crate) struct JoinState {
    return_value: Mutex<Option<io::Result<i64>>>,
    done: Mutex<bool>,
    done_cv: Condvar,
    joiner_present: AtomicBool,
}

impl JoinState {
    fn new() -> Arc<JoinState> {
        Arc::new(JoinState {
            return_value: Mutex::new(None),
            done: Mutex::new(false),
            done_cv: Condvar::new(),
            joiner_present: AtomicBool::new(false),
        })
    }

    /// Fired exactly once, at final-suspend, regardless of `joiner_present`.
    pub(crate) fn complete(&self, result: io::Result<i64>) {
        log::trace!(
            "task completed, joiner present: {}",
            self.joiner_present.load(Ordering::Relaxed)
        );
        *self.return_value.lock().unwrap() = Some(result);
        let mut done = self.done.lock().unwrap();
        *done = true;
        self.done_cv.notify_all();
    }

    fn mark_joiner_present(&self) {
        self.joiner_present.store(true, Ordering::Relaxed);
    }

    fn wait_for_completion(&self) -> io::Result<i64> {
        let guard = self.done.lock().unwrap();
        let _guard = self
            .done_cv
            .wait_while(guard, |done| !*done)
            .unwrap();
        self.return_value
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Err(io::Error::new(io::ErrorKind::Other, "task already joined")))
    }
}

/// The scheduler-owned coroutine object. Lives in a worker's intake queue, that worker's
/// run-list, or behind a raw pointer registered with the readiness facility — never in more than
/// one of those at a time.
pub(crate) struct TaskInner {
    future: BoxedFuture,
    state: AtomicU8,
    /// Cleared by the worker before every `poll`, written by an awaitable that returns
    /// `Poll::Pending`. Plain `Cell`s, not atomics: only ever touched synchronously on the
    /// worker thread that owns this task while it is runnable.
    interest: Cell<Option<IoInterest>>,
    /// The worker this task is pinned to for its entire lifetime, fixed at submission.
    pub(crate) owner: usize,
    pub(crate) join: Arc<JoinState>,
}

impl fmt::Debug for TaskInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskInner")
            .field("state", &self.state())
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

impl TaskInner {
    pub(crate) fn new(future: BoxedFuture, owner: usize) -> (Box<TaskInner>, Arc<JoinState>) {
        let join = JoinState::new();
        let inner = Box::new(TaskInner {
            future,
            state: AtomicU8::new(TaskState::Runnable as u8),
            interest: Cell::new(None),
            owner,
            join: join.clone(),
        });
        (inner, join)
    }

    pub(crate) fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Polls the coroutine once, with the current-task pointer set so any awaitable inside it can
    /// record suspend interest via [`record_io_interest`]. Returns the poll result and whatever
    /// interest (if any) was recorded during this call.
    pub(crate) fn poll_once(&mut self) -> (Poll<io::Result<i64>>, Option<IoInterest>) {
        self.interest.set(None);
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let ptr: *const TaskInner = self;
        let result = CURRENT_TASK.with(|cell| {
            let prev = cell.get();
            cell.set(ptr);
            let result = self.future.as_mut().poll(&mut cx);
            cell.set(prev);
            result
        });
        (result, self.interest.get())
    }
}

thread_local! {
    /// Set by [`TaskInner::poll_once`] around the `poll` call; read by the awaitables in
    /// `crate::io` to reach the task currently executing on this worker thread. This is the
    /// Rust analogue of the source's `coroutine_handle<promise_type>` parameter threaded through
    /// `await_suspend` — the pointer is valid for exactly the duration of the `poll` call.
    static CURRENT_TASK: Cell<*const TaskInner> = Cell::new(std::ptr::null());
}

/// Called by an awaitable's `poll` when it is about to return `Pending`, to record what it wants
/// the owning worker to register with the readiness facility.
///
/// # Safety-relevant invariant
/// Must only be called from inside a `poll` driven by [`TaskInner::poll_once`]; the thread-local
/// pointer is guaranteed non-null there and valid for the call's duration.
pub(crate) fn record_io_interest(fd: RawFd, events: u32) {
    CURRENT_TASK.with(|cell| {
        let ptr = cell.get();
        debug_assert!(!ptr.is_null(), "async socket op used outside the runtime");
        if ptr.is_null() {
            return;
        }
        // SAFETY: `ptr` was set by `poll_once` to `self` for the lifetime of this `poll` call and
        // is only ever read back on this same thread before `poll_once` returns.
        let task = unsafe { &*ptr };
        task.interest.set(Some(IoInterest { fd, events }));
    })
}

pub(crate) fn noop_waker() -> Waker {
    fn clone(_: *const ()) -> RawWaker {
        raw()
    }
    fn wake(_: *const ()) {}
    fn wake_by_ref(_: *const ()) {}
    fn drop(_: *const ()) {}
    fn raw() -> RawWaker {
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, wake, wake_by_ref, drop);
        RawWaker::new(std::ptr::null(), &VTABLE)
    }
    // SAFETY: the vtable's functions are all no-ops that never dereference the data pointer, so a
    // null data pointer is sound. This runtime doesn't rely on `Waker::wake` at all: resumption is
    // driven entirely by the scheduler's readiness-triggered requeue, not by the generic waker
    // protocol, so a waker that does nothing is the correct one to hand to `poll`.
    unsafe { Waker::from_raw(raw()) }
}

/// A handle to a submitted coroutine, returned by [`crate::submit`].
///
/// Dropping a `Task` without calling [`crate::wait`] on it is fine: the coroutine keeps running
/// to completion and the scheduler reclaims it on its own. Calling `wait` lets the caller read the
/// coroutine's return value.
pub struct Task {
    pub(crate) join: Arc<JoinState>,
}

impl Task {
    pub(crate) fn new(join: Arc<JoinState>) -> Task {
        Task { join }
    }

    /// Blocks the calling thread until the coroutine completes and returns its result.
    ///
    /// Must be called at most once. Calling it twice returns an `Other`-kind `io::Error` on the
    /// second call rather than blocking forever, since the result was already taken.
    pub(crate) fn join(self) -> io::Result<i64> {
        self.join.mark_joiner_present();
        self.join.wait_for_completion()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").finish_non_exhaustive()
    }
}
