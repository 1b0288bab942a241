// The MIT License (MIT)

// Copyright (c) 2015 Rustcc developers

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! A multi-threaded, `epoll`-driven coroutine runtime for non-blocking network I/O on Linux.
//!
//! The runtime owns a fixed pool of scheduler worker threads and a single I/O readiness thread.
//! A caller [`submit`]s an `async` closure; the runtime polls it to completion, suspending it at
//! [`accept`], [`connect`], [`read`], or [`write`] whenever the underlying syscall would block,
//! and resuming it once `epoll` reports the descriptor ready.
//!
//! ```no_run
//! netco::init(netco::PoolConfig::new()).expect("pool init");
//!
//! let task = netco::submit(|| async {
//!     let listener_fd = 0; // a real non-blocking listening socket fd in practice
//!     let (client_fd, _addr) = netco::accept(listener_fd).await?;
//!     let mut buf = [0u8; 16];
//!     let n = netco::read(client_fd, &mut buf).await?;
//!     netco::write(client_fd, &buf[..n]).await?;
//!     Ok(n as i64)
//! });
//!
//! let bytes_echoed = netco::wait(task).expect("task result");
//! println!("echoed {bytes_echoed} bytes");
//!
//! netco::shutdown();
//! ```
//!
//! Only the four async socket operations and the pool lifecycle are in scope here; a convenience
//! `TcpListener`/`TcpStream` wrapper built on top of them lives in `demos/` rather than in this
//! crate.

mod error;
mod io;
mod pool;
mod reactor;
mod readiness;
mod task;
mod worker;

pub use error::{Error, Result};
pub use io::{accept, connect, read, write};
pub use pool::{evloop, init, shutdown, submit, wait, PoolConfig};
pub use task::Task;
