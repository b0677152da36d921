//! Server Layer: Event-Driven Line Server
//!
//! Menggunakan shared `EventLoopPool` untuk non-blocking accept, read dan
//! write. Satu `Acceptor` pipelined, satu `ConnectionHandler` per koneksi.

mod acceptor;
mod handler;
mod processor;

use std::net::{Ipv4Addr, SocketAddr};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread;

use log::info;

use crate::error::ServerError;
use crate::reactor::EventLoopPool;

use acceptor::Acceptor;

pub use processor::{Greeter, RequestProcessor};

/// Worker count yang dipakai kalau request di luar range
pub const DEFAULT_WORKERS: usize = 2;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// 0 atau lebih dari 2x hardware concurrency di-clamp ke `DEFAULT_WORKERS`
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080)),
            workers: DEFAULT_WORKERS,
        }
    }
}

/// Clamp worker count: `0` atau `> 2 * parallelism` jadi `DEFAULT_WORKERS`.
pub fn clamp_workers(requested: usize, parallelism: usize) -> usize {
    if requested == 0 || requested > 2 * parallelism {
        DEFAULT_WORKERS
    } else {
        requested
    }
}

fn hardware_concurrency() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Multithreaded asynchronous server.
pub struct Server {
    pool: EventLoopPool,
    acceptor: Arc<Acceptor>,
    workers: usize,
}

impl Server {
    /// Bind `0.0.0.0:port` dan mulai melayani dengan processor default.
    pub fn start(port: u16, workers: usize) -> Result<Self, ServerError> {
        let config = ServerConfig {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            workers,
        };
        Self::start_with(config, Greeter)
    }

    pub fn start_with<P>(config: ServerConfig, processor: P) -> Result<Self, ServerError>
    where
        P: RequestProcessor,
    {
        let workers = clamp_workers(config.workers, hardware_concurrency());
        let pool = EventLoopPool::start(workers)?;
        let processor: Arc<dyn RequestProcessor> = Arc::new(processor);

        let acceptor = Acceptor::bind(pool.handle(), config.bind_addr, processor)?;
        acceptor.start();

        info!(
            "Server listening on {} with {} workers",
            acceptor.local_addr(),
            workers
        );

        Ok(Self {
            pool,
            acceptor,
            workers,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.acceptor.local_addr()
    }

    /// Worker count after clamping.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Stop accepting, lalu join worker setelah handler yang in flight selesai.
    pub fn stop(mut self) {
        self.acceptor.stop();
        self.pool.stop();
        self.pool.join();
        info!("Server on {} stopped", self.acceptor.local_addr());
    }
}
