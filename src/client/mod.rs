//! Client Layer: Concurrent, Cancellable Requests
//!
//! Setiap request adalah satu `RequestSession` yang berjalan di atas shared
//! `EventLoopPool`. Request di-identifikasi oleh id dari caller, di-track di
//! `SessionRegistry`, dan selesai dengan tepat satu callback.

pub mod registry;
pub mod session;

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info};

use crate::error::{RequestError, SubmitError};
use crate::protocol::{terminate, DEFAULT_REQUEST};
use crate::reactor::{EventLoopPool, Handle, Readiness};

pub use registry::{Cancellable, SessionRegistry};
pub use session::{RequestSession, Stage};

/// Caller-supplied request identifier, unique among in-flight requests.
pub type RequestId = u32;

/// Completion callback, dipanggil tepat sekali per request yang diterima.
///
/// `Ok(response)` berisi baris response tanpa delimiter. `Err(_)` berarti
/// response kosong.
pub type Callback = Box<dyn FnOnce(RequestId, Result<String, RequestError>) + Send + 'static>;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Jumlah worker thread (minimal 1)
    pub workers: usize,
    /// Payload yang dikirim oleh `Client::submit`
    pub request: Vec<u8>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            request: DEFAULT_REQUEST.to_vec(),
        }
    }
}

/// Multithreaded asynchronous client.
///
/// ```no_run
/// use courier::Client;
///
/// let client = Client::with_workers(2)?;
/// client
///     .submit("127.0.0.1", 8080, |id, result| println!("#{id}: {result:?}"), 1)
///     .unwrap();
/// client.shutdown();
/// # Ok::<(), std::io::Error>(())
/// ```
///
/// Dropping a client without `shutdown` halts the pool immediately; in-flight
/// requests are released without reporting.
pub struct Client {
    pool: EventLoopPool,
    handle: Handle,
    registry: Arc<SessionRegistry<RequestSession>>,
    request: Vec<u8>,
    accepting: AtomicBool,
}

impl Client {
    pub fn new(config: ClientConfig) -> io::Result<Self> {
        let pool = EventLoopPool::start(config.workers)?;
        let handle = pool.handle();

        Ok(Self {
            pool,
            handle,
            registry: Arc::new(SessionRegistry::new()),
            request: config.request,
            accepting: AtomicBool::new(true),
        })
    }

    pub fn with_workers(workers: usize) -> io::Result<Self> {
        Self::new(ClientConfig {
            workers,
            ..ClientConfig::default()
        })
    }

    /// Kirim request default ke `address:port`.
    ///
    /// Gagal secara synchronous hanya untuk id duplikat, address invalid,
    /// atau client yang sedang shutdown. Semua error lain lewat callback.
    pub fn submit<F>(
        &self,
        address: &str,
        port: u16,
        callback: F,
        request_id: RequestId,
    ) -> Result<(), SubmitError>
    where
        F: FnOnce(RequestId, Result<String, RequestError>) + Send + 'static,
    {
        self.submit_request(address, port, self.request.clone(), callback, request_id)
    }

    /// Same as [`submit`](Self::submit) with a caller-provided payload.
    /// Payload tanpa `\n` di akhir otomatis diberi delimiter.
    pub fn submit_request<F>(
        &self,
        address: &str,
        port: u16,
        payload: impl Into<Vec<u8>>,
        callback: F,
        request_id: RequestId,
    ) -> Result<(), SubmitError>
    where
        F: FnOnce(RequestId, Result<String, RequestError>) + Send + 'static,
    {
        let ip: IpAddr = address
            .parse()
            .map_err(|source| SubmitError::InvalidAddress {
                address: address.to_string(),
                source,
            })?;

        if !self.accepting.load(Ordering::SeqCst) {
            return Err(SubmitError::ShuttingDown);
        }

        let session = Arc::new(RequestSession::new(
            request_id,
            SocketAddr::new(ip, port),
            terminate(payload.into()),
            Box::new(callback),
            self.handle.clone(),
            Arc::clone(&self.registry),
        ));

        self.registry.register(request_id, Arc::clone(&session))?;

        if self
            .handle
            .submit(move || session.advance(Readiness::Ready))
            .is_err()
        {
            self.registry.remove(request_id);
            return Err(SubmitError::ShuttingDown);
        }

        debug!("Request #{} submitted to {}:{}", request_id, ip, port);
        Ok(())
    }

    /// Cancel request. Id yang tidak dikenal atau sudah selesai: no-op.
    pub fn cancel(&self, request_id: RequestId) {
        if self.registry.cancel(request_id) {
            debug!("Request #{} cancel requested", request_id);
        }
    }

    pub fn is_in_flight(&self, request_id: RequestId) -> bool {
        self.registry.contains(request_id)
    }

    /// Number of requests that have not reached a terminal state.
    pub fn in_flight(&self) -> usize {
        self.registry.len()
    }

    /// Tolak submission baru, lepas keep-alive, lalu join semua worker
    /// setelah request yang in flight selesai.
    pub fn shutdown(mut self) {
        self.accepting.store(false, Ordering::SeqCst);
        self.pool.stop();
        self.pool.join();
        info!("Client shut down");
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // Session memegang Arc ke registry; drain memutus cycle itu
        self.pool.stop_now();
        self.pool.join();
        let abandoned = self.registry.drain();
        if !abandoned.is_empty() {
            debug!("Client dropped with {} requests in flight", abandoned.len());
        }
    }
}
