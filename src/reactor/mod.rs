//! Reactor Layer: Shared Poll + Worker Pool
//!
//! Menggunakan mio untuk cross-platform non-blocking I/O (epoll/kqueue/IOCP).
//!
//! Fitur:
//! - Satu `mio::Poll` di-share oleh semua worker (leader/follower)
//! - Completion berjalan di worker mana saja, tanpa affinity
//! - Readiness wait per token, bisa di-cancel dari thread lain
//! - Keep-alive eksplisit: pool tetap hidup sampai `stop()`

mod handle;
mod pool;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use handle::{Handle, Readiness};
pub use pool::EventLoopPool;

/// Lock yang tetap bisa dipakai walau mutex poisoned
#[inline]
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
