//! Readiness facility adapter: a thin, direct wrapper over `epoll`.
//!
//! Mirrors `naku::base::epoller` (`naku/base/poller/epoller.{h,cpp}` in the original source):
//! register-or-update tries `EPOLL_CTL_MOD` first and falls back to `EPOLL_CTL_ADD` on `ENOENT`,
//! every registration carries `EPOLLONESHOT`, and `epoll_wait` retries transparently on `EINTR`.

use std::io;
use std::os::unix::io::RawFd;

use crate::task::TaskInner;

/// Edge-triggered, one-shot `epoll` wrapper. Registrations carry an opaque `*mut TaskInner`
/// payload in `epoll_event.data.ptr`, recovered by the readiness worker on dispatch.
pub(crate) struct Readiness {
    epoll_fd: RawFd,
}

// SAFETY: `epoll_ctl`/`epoll_wait` are safe to call concurrently from multiple threads on the same
// `epoll_fd`; the kernel serializes access to the interest list internally.
unsafe impl Send for Readiness {}
unsafe impl Sync for Readiness {}

impl Readiness {
    pub(crate) fn new() -> io::Result<Readiness> {
        // SAFETY: `epoll_create1` has no preconditions beyond the flags argument being valid;
        // `0` is always valid.
        let epoll_fd = unsafe { libc::epoll_create1(0) };
        if epoll_fd == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(Readiness { epoll_fd })
    }

    /// Registers `fd` for `events` (always OR'd with `EPOLLONESHOT`), identifying the waiter by
    /// `payload`. Tries to update an existing registration first; if there isn't one, adds it.
    ///
    /// # Safety
    /// `payload` must remain a valid, exclusively-owned pointer until the corresponding event is
    /// dispatched (or the registration is replaced/removed) — the caller transfers ownership of
    /// the pointee to the readiness facility for that duration.
    pub(crate) unsafe fn register_or_update(
        &self,
        fd: RawFd,
        events: u32,
        payload: *mut TaskInner,
    ) -> io::Result<()> {
        let mut ev = libc::epoll_event {
            events: events | libc::EPOLLONESHOT as u32,
            u64: 0,
        };
        ev.u64 = payload as u64;

        // SAFETY: `ev` is a valid, fully-initialized `epoll_event`; `self.epoll_fd` is open for
        // the lifetime of `self`.
        let modified = unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_MOD, fd, &mut ev) };
        if modified == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ENOENT) {
            return Err(err);
        }

        // SAFETY: see above.
        let added = unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_ADD, fd, &mut ev) };
        if added == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Blocks for up to `timeout_ms` waiting for events, writing recovered payload pointers into
    /// `out`. Returns the number of events written. Retries transparently on `EINTR`.
    pub(crate) fn dispatch_batch(
        &self,
        buf: &mut [libc::epoll_event],
        timeout_ms: i32,
    ) -> io::Result<usize> {
        loop {
            // SAFETY: `buf` is a valid, writable slice of `epoll_event` with `buf.len()` capacity.
            let n = unsafe {
                libc::epoll_wait(
                    self.epoll_fd,
                    buf.as_mut_ptr(),
                    buf.len() as i32,
                    timeout_ms,
                )
            };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(err);
        }
    }
}

impl Drop for Readiness {
    fn drop(&mut self) {
        // SAFETY: `self.epoll_fd` is open and owned exclusively by this `Readiness`.
        unsafe {
            libc::close(self.epoll_fd);
        }
    }
}

/// Recovers the `*mut TaskInner` payload stashed in an `epoll_event` at registration time.
pub(crate) fn payload_of(ev: &libc::epoll_event) -> *mut TaskInner {
    ev.u64 as *mut TaskInner
}
