//! Pipelined accept loop
//!
//! Setiap readiness event: accept semua koneksi yang pending, spawn satu
//! handler per koneksi, lalu langsung re-arm accept berikutnya tanpa
//! menunggu handler selesai.
//!
//! Listener terdaftar edge-triggered: re-arm lewat `park` hanya aman kalau
//! backlog sudah habis (`WouldBlock`). Setelah error lain, accept
//! dijadwalkan ulang langsung supaya koneksi yang masih antre tidak
//! tertahan.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, error, info, warn};
use mio::net::TcpListener;
use mio::{Interest, Token};

use super::handler::ConnectionHandler;
use super::RequestProcessor;
use crate::error::ServerError;
use crate::reactor::{lock, Handle, Readiness};

pub(crate) struct Acceptor {
    handle: Handle,
    // None setelah listener ditutup
    listener: Mutex<Option<TcpListener>>,
    token: Token,
    local_addr: SocketAddr,
    stopped: AtomicBool,
    processor: Arc<dyn RequestProcessor>,
}

impl Acceptor {
    pub(crate) fn bind(
        handle: Handle,
        addr: SocketAddr,
        processor: Arc<dyn RequestProcessor>,
    ) -> Result<Arc<Self>, ServerError> {
        let mut listener =
            TcpListener::bind(addr).map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        let token = handle.register(&mut listener, Interest::READABLE)?;

        Ok(Arc::new(Self {
            handle,
            listener: Mutex::new(Some(listener)),
            token,
            local_addr,
            stopped: AtomicBool::new(false),
            processor,
        }))
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub(crate) fn start(self: &Arc<Self>) {
        let acceptor = Arc::clone(self);
        self.handle
            .spawn(move || acceptor.on_ready(Readiness::Ready));
    }

    /// Stop accepting. Accept yang sudah ready tetap diselesaikan, tapi
    /// tidak di-re-arm, dan listener ditutup.
    pub(crate) fn stop(&self) {
        // Lock memastikan on_ready tidak berada di antara cek flag dan park
        let _listener = lock(&self.listener);
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.handle.cancel(self.token) {
            debug!("Pending accept on {} cancelled", self.local_addr);
        }
    }

    fn on_ready(self: Arc<Self>, readiness: Readiness) {
        let mut guard = lock(&self.listener);
        let Some(listener) = guard.as_mut() else {
            return;
        };

        let drained = match readiness {
            Readiness::Ready => self.accept_pending(listener),
            Readiness::Cancelled => true,
        };

        if self.stopped.load(Ordering::SeqCst) {
            if let Some(mut listener) = guard.take() {
                self.handle.release(&mut listener, self.token);
            }
            info!("Acceptor on {} closed", self.local_addr);
            return;
        }

        let acceptor = Arc::clone(&self);
        if drained {
            self.handle
                .park(self.token, move |readiness| acceptor.on_ready(readiness));
        } else {
            self.handle
                .spawn(move || acceptor.on_ready(Readiness::Ready));
        }
    }

    /// Accept semua koneksi yang pending. Returns `true` kalau backlog
    /// habis, `false` kalau berhenti karena error.
    fn accept_pending(&self, listener: &mut TcpListener) -> bool {
        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    debug!("New connection from {}", peer);
                    if let Err(e) = ConnectionHandler::spawn(
                        &self.handle,
                        stream,
                        peer,
                        Arc::clone(&self.processor),
                    ) {
                        error!("Failed to set up connection from {}: {}", peer, e);
                    }
                }
                Err(e) => match classify(&e) {
                    AcceptStep::Drained => return true,
                    AcceptStep::Retry => {
                        warn!("Accept on {} skipped: {}", self.local_addr, e);
                    }
                    AcceptStep::Reschedule => {
                        error!("Accept error on {}: {}", self.local_addr, e);
                        return false;
                    }
                },
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum AcceptStep {
    /// Backlog kosong, tunggu edge berikutnya
    Drained,
    /// Hanya koneksi ini yang gagal, lanjut accept
    Retry,
    /// Accept gagal, jadwalkan ulang tanpa menunggu readiness
    Reschedule,
}

fn classify(err: &io::Error) -> AcceptStep {
    match err.kind() {
        io::ErrorKind::WouldBlock => AcceptStep::Drained,
        io::ErrorKind::Interrupted
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset => AcceptStep::Retry,
        _ => AcceptStep::Reschedule,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::EventLoopPool;
    use crate::server::Greeter;

    #[test]
    fn test_classify_accept_errors() {
        let kind = |k| classify(&io::Error::from(k));
        assert_eq!(kind(io::ErrorKind::WouldBlock), AcceptStep::Drained);
        assert_eq!(kind(io::ErrorKind::ConnectionAborted), AcceptStep::Retry);
        assert_eq!(kind(io::ErrorKind::Interrupted), AcceptStep::Retry);
        // EMFILE dan sejenisnya
        assert_eq!(
            classify(&io::Error::new(io::ErrorKind::Other, "too many open files")),
            AcceptStep::Reschedule
        );
    }

    #[test]
    fn test_backlog_accepted_after_late_start() {
        let mut pool = EventLoopPool::start(2).unwrap();
        let acceptor = Acceptor::bind(
            pool.handle(),
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(Greeter),
        )
        .unwrap();

        // Koneksi masuk backlog sebelum accept pertama di-arm
        let peers: Vec<_> = (0..4)
            .map(|_| std::net::TcpStream::connect(acceptor.local_addr()).unwrap())
            .collect();
        acceptor.start();

        for peer in &peers {
            use std::io::{BufRead, BufReader, Write};
            let mut writer = peer.try_clone().unwrap();
            writer.write_all(b"Hello Server\n").unwrap();
            let mut line = String::new();
            BufReader::new(peer).read_line(&mut line).unwrap();
            assert_eq!(line, "Hello Client\n");
        }

        acceptor.stop();
        pool.stop();
        pool.join();
    }
}
