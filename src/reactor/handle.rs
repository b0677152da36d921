//! Handle ke shared reactor
//!
//! Cloneable, dipegang oleh session, handler dan acceptor untuk:
//! - submit completion ke worker pool
//! - register source ke `Poll`
//! - park continuation sampai source ready
//! - cancel wait yang sedang armed

use std::io;
use std::sync::Arc;

use log::debug;
use mio::event::Source;
use mio::{Interest, Token};

use super::pool::Shared;
use crate::error::PoolStopped;

/// Hasil sebuah readiness wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Source mungkin ready; operasi non-blocking harus di-retry
    Ready,
    /// Wait di-resolve lebih awal oleh `Handle::cancel`
    Cancelled,
}

/// Cheap, cloneable handle to an [`EventLoopPool`](super::EventLoopPool).
#[derive(Clone)]
pub struct Handle {
    shared: Arc<Shared>,
}

impl Handle {
    pub(super) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Schedule `op` di worker mana saja.
    ///
    /// Ditolak setelah `stop()`; pakai ini untuk work yang datang dari luar pool.
    pub fn submit<F>(&self, op: F) -> Result<(), PoolStopped>
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.shared.is_running() {
            return Err(PoolStopped);
        }
        self.shared.schedule(Box::new(op));
        Ok(())
    }

    /// Schedule follow-up work from inside a running completion. Always
    /// accepted, so in-flight chains can finish while the pool drains.
    pub(crate) fn spawn<F>(&self, op: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.schedule(Box::new(op));
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Register source ke reactor. Registrasi edge-triggered dan bertahan
    /// sampai `release`.
    pub fn register<S>(&self, source: &mut S, interest: Interest) -> io::Result<Token>
    where
        S: Source + ?Sized,
    {
        let token = self.shared.allocate_token();
        if let Err(e) = self.shared.registry.register(source, token, interest) {
            self.shared.forget(token);
            return Err(e);
        }
        Ok(token)
    }

    /// Suspend `cont` sampai source untuk `token` ready, atau sampai wait
    /// di-cancel. Paling banyak satu wait per token.
    pub fn park<F>(&self, token: Token, cont: F)
    where
        F: FnOnce(Readiness) + Send + 'static,
    {
        self.shared.park(token, Box::new(cont));
    }

    /// Cancel wait yang sedang armed untuk `token`.
    ///
    /// Returns `false` jika tidak ada wait armed (belum di-park, sudah
    /// resolve, atau token sudah di-release).
    pub fn cancel(&self, token: Token) -> bool {
        self.shared.resolve(token, Readiness::Cancelled)
    }

    /// Deregister source dan buang wait state untuk `token`.
    pub fn release<S>(&self, source: &mut S, token: Token)
    where
        S: Source + ?Sized,
    {
        if let Err(e) = self.shared.registry.deregister(source) {
            debug!("Deregister {:?} failed: {}", token, e);
        }
        self.shared.forget(token);
    }
}
