//! RequestSession - per-request state machine
//!
//! ```text
//! Created → Connecting → Writing → Reading → Completed
//!               │           │         │
//!               └───────────┴─────────┴──→ Failed | Cancelled
//! ```
//!
//! Setiap stage adalah operasi non-blocking. Kalau operasi `WouldBlock`,
//! session di-park di reactor dan continuation memegang satu `Arc`;
//! registry memegang `Arc` kedua supaya cancel tetap bisa sampai.

use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr};
use std::sync::{Arc, Mutex};

use log::{debug, trace};
use mio::net::TcpStream;
use mio::{Interest, Token};

use super::registry::{Cancellable, SessionRegistry};
use super::{Callback, RequestId};
use crate::error::RequestError;
use crate::protocol::LineBuffer;
use crate::reactor::{lock, Handle, Readiness};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Created,
    Connecting,
    Writing,
    Reading,
    Completed,
    Cancelled,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Cancelled | Stage::Failed)
    }

    /// Klasifikasi error transport sesuai stage tempat error terjadi
    fn failure(self, err: io::Error) -> RequestError {
        match self {
            Stage::Created | Stage::Connecting => RequestError::Connect(err),
            Stage::Writing => RequestError::Write(err),
            _ => RequestError::Read(err),
        }
    }
}

enum Progress {
    /// Stage selesai, lanjut ke stage berikutnya
    Advanced,
    /// Operasi akan block, tunggu readiness
    Pending,
    Response(Vec<u8>),
}

struct SessionState {
    stage: Stage,
    cancelled: bool,
    request: Vec<u8>,
    written: usize,
    response: LineBuffer,
    stream: Option<TcpStream>,
    token: Option<Token>,
    callback: Option<Callback>,
}

/// Resources handed to the terminal step after the session lock is released.
struct Terminal {
    outcome: Result<String, RequestError>,
    stream: Option<TcpStream>,
    token: Option<Token>,
    callback: Option<Callback>,
}

impl SessionState {
    fn new(request: Vec<u8>, callback: Callback) -> Self {
        Self {
            stage: Stage::Created,
            cancelled: false,
            request,
            written: 0,
            response: LineBuffer::new(),
            stream: None,
            token: None,
            callback: Some(callback),
        }
    }

    /// Cancellation checkpoint.
    ///
    /// Transition `expected → next` hanya jika stage masih `expected` dan
    /// cancel flag belum di-set. Flag yang sudah di-set membawa session
    /// langsung ke `Cancelled` tanpa meng-issue stage berikutnya.
    fn checkpoint(&mut self, expected: Stage, next: Stage) -> Stage {
        if self.stage == expected {
            self.stage = if self.cancelled { Stage::Cancelled } else { next };
        }
        self.stage
    }

    /// Satu-satunya terminal transition. Error apapun yang terjadi saat
    /// cancel flag di-set dilaporkan sebagai `Aborted`.
    fn terminate(&mut self, outcome: Result<String, RequestError>) -> Terminal {
        let outcome = match outcome {
            Ok(response) => {
                self.stage = Stage::Completed;
                Ok(response)
            }
            Err(err) => {
                if self.cancelled || err.is_aborted() {
                    self.stage = Stage::Cancelled;
                    Err(RequestError::Aborted)
                } else {
                    self.stage = Stage::Failed;
                    Err(err)
                }
            }
        };

        Terminal {
            outcome,
            stream: self.stream.take(),
            token: self.token.take(),
            callback: self.callback.take(),
        }
    }
}

pub struct RequestSession {
    id: RequestId,
    addr: SocketAddr,
    handle: Handle,
    registry: Arc<SessionRegistry<RequestSession>>,
    state: Mutex<SessionState>,
}

impl RequestSession {
    pub(crate) fn new(
        id: RequestId,
        addr: SocketAddr,
        request: Vec<u8>,
        callback: Callback,
        handle: Handle,
        registry: Arc<SessionRegistry<RequestSession>>,
    ) -> Self {
        Self {
            id,
            addr,
            handle,
            registry,
            state: Mutex::new(SessionState::new(request, callback)),
        }
    }

    /// Transition function: jalankan stage sampai block atau terminal.
    pub(crate) fn advance(self: Arc<Self>, readiness: Readiness) {
        let terminal = {
            let mut state = lock(&self.state);
            self.drive(&mut state, readiness)
        };

        if let Some(terminal) = terminal {
            self.finish(terminal);
        }
    }

    fn drive(self: &Arc<Self>, state: &mut SessionState, readiness: Readiness) -> Option<Terminal> {
        if state.stage.is_terminal() {
            return None;
        }
        if readiness == Readiness::Cancelled {
            // Native cancel dari reactor saat stage sedang in flight
            return Some(state.terminate(Err(RequestError::Aborted)));
        }

        loop {
            let stage = state.stage;
            let progress = match stage {
                Stage::Created => self.connect(state),
                Stage::Connecting => poll_connect(state),
                Stage::Writing => poll_write(state),
                Stage::Reading => poll_read(state),
                Stage::Completed | Stage::Cancelled | Stage::Failed => return None,
            };

            match progress {
                Ok(Progress::Advanced) => {
                    if state.stage == Stage::Cancelled {
                        return Some(state.terminate(Err(RequestError::Aborted)));
                    }
                }
                Ok(Progress::Pending) => {
                    if state.cancelled {
                        return Some(state.terminate(Err(RequestError::Aborted)));
                    }
                    let Some(token) = state.token else {
                        let err = io::Error::new(io::ErrorKind::NotConnected, "no transport");
                        return Some(state.terminate(Err(stage.failure(err))));
                    };
                    trace!("Request #{} waiting in {:?}", self.id, stage);
                    let session = Arc::clone(self);
                    self.handle
                        .park(token, move |readiness| session.advance(readiness));
                    return None;
                }
                Ok(Progress::Response(line)) => {
                    let response = String::from_utf8_lossy(&line).into_owned();
                    return Some(state.terminate(Ok(response)));
                }
                Err(err) => return Some(state.terminate(Err(stage.failure(err)))),
            }
        }
    }

    /// Created → Connecting: buka transport dan issue connect.
    fn connect(&self, state: &mut SessionState) -> io::Result<Progress> {
        let mut stream = TcpStream::connect(self.addr)?;
        let token = self
            .handle
            .register(&mut stream, Interest::READABLE | Interest::WRITABLE)?;

        state.stream = Some(stream);
        state.token = Some(token);
        state.stage = Stage::Connecting;
        trace!("Request #{} connecting to {}", self.id, self.addr);
        Ok(Progress::Pending)
    }

    /// Remove dari registry, shutdown transport, lalu callback tepat sekali.
    fn finish(&self, terminal: Terminal) {
        self.registry.remove(self.id);

        if let Some(mut stream) = terminal.stream {
            let _ = stream.shutdown(Shutdown::Both);
            if let Some(token) = terminal.token {
                self.handle.release(&mut stream, token);
            }
        }

        match &terminal.outcome {
            Ok(_) => debug!("Request #{} completed", self.id),
            Err(err) => debug!("Request #{} finished: {}", self.id, err),
        }

        if let Some(callback) = terminal.callback {
            callback(self.id, terminal.outcome);
        }
    }
}

impl Cancellable for RequestSession {
    fn request_cancel(&self) {
        let mut state = lock(&self.state);
        if state.stage.is_terminal() {
            return;
        }
        state.cancelled = true;

        if let Some(token) = state.token {
            if self.handle.cancel(token) {
                debug!("Request #{}: in-flight {:?} cancelled", self.id, state.stage);
            }
        }
    }
}

fn transport(stream: &mut Option<TcpStream>) -> io::Result<&mut TcpStream> {
    stream
        .as_mut()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no transport"))
}

fn connect_in_progress(err: &io::Error) -> bool {
    is_einprogress(err)
        || matches!(
            err.kind(),
            io::ErrorKind::NotConnected | io::ErrorKind::WouldBlock
        )
}

#[cfg(unix)]
fn is_einprogress(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EINPROGRESS)
}

#[cfg(not(unix))]
fn is_einprogress(_err: &io::Error) -> bool {
    false
}

/// Connecting → Writing, dengan checkpoint cancel.
fn poll_connect(state: &mut SessionState) -> io::Result<Progress> {
    {
        let stream = transport(&mut state.stream)?;
        if let Some(err) = stream.take_error()? {
            return Err(err);
        }
        match stream.peer_addr() {
            Ok(_) => {
                let _ = stream.set_nodelay(true);
            }
            Err(ref e) if connect_in_progress(e) => return Ok(Progress::Pending),
            Err(e) => return Err(e),
        }
    }

    state.checkpoint(Stage::Connecting, Stage::Writing);
    Ok(Progress::Advanced)
}

/// Writing → Reading setelah seluruh request terkirim, dengan checkpoint cancel.
fn poll_write(state: &mut SessionState) -> io::Result<Progress> {
    while state.written < state.request.len() {
        let stream = transport(&mut state.stream)?;
        match stream.write(&state.request[state.written..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write request",
                ));
            }
            Ok(n) => state.written += n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Progress::Pending),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }

    state.checkpoint(Stage::Writing, Stage::Reading);
    Ok(Progress::Advanced)
}

fn poll_read(state: &mut SessionState) -> io::Result<Progress> {
    let stream = transport(&mut state.stream)?;
    match state.response.read_line(stream)? {
        Some(line) => Ok(Progress::Response(line)),
        None => Ok(Progress::Pending),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn state() -> SessionState {
        SessionState::new(b"ping\n".to_vec(), Box::new(|_, _| {}))
    }

    #[test]
    fn test_checkpoint_advances_without_cancel() {
        let mut state = state();
        state.stage = Stage::Connecting;
        assert_eq!(
            state.checkpoint(Stage::Connecting, Stage::Writing),
            Stage::Writing
        );
        assert_eq!(
            state.checkpoint(Stage::Writing, Stage::Reading),
            Stage::Reading
        );
    }

    #[test]
    fn test_checkpoint_observes_cancel_flag() {
        let mut state = state();
        state.stage = Stage::Writing;
        state.cancelled = true;
        assert_eq!(
            state.checkpoint(Stage::Writing, Stage::Reading),
            Stage::Cancelled
        );
    }

    #[test]
    fn test_checkpoint_ignores_unexpected_stage() {
        let mut state = state();
        state.stage = Stage::Reading;
        state.cancelled = true;
        assert_eq!(
            state.checkpoint(Stage::Connecting, Stage::Writing),
            Stage::Reading
        );
    }

    #[test]
    fn test_failure_classified_by_stage() {
        let err = || io::Error::from(io::ErrorKind::ConnectionReset);
        assert!(matches!(Stage::Connecting.failure(err()), RequestError::Connect(_)));
        assert!(matches!(Stage::Writing.failure(err()), RequestError::Write(_)));
        assert!(matches!(Stage::Reading.failure(err()), RequestError::Read(_)));
    }

    #[test]
    fn test_error_while_cancelled_normalizes_to_aborted() {
        let mut state = state();
        state.stage = Stage::Reading;
        state.cancelled = true;

        let err = RequestError::Read(io::Error::from(io::ErrorKind::ConnectionReset));
        let terminal = state.terminate(Err(err));
        assert!(matches!(terminal.outcome, Err(RequestError::Aborted)));
        assert_eq!(state.stage, Stage::Cancelled);
    }

    #[test]
    fn test_error_without_cancel_keeps_cause() {
        let mut state = state();
        state.stage = Stage::Writing;

        let err = RequestError::Write(io::Error::from(io::ErrorKind::BrokenPipe));
        let terminal = state.terminate(Err(err));
        assert!(matches!(terminal.outcome, Err(RequestError::Write(_))));
        assert_eq!(state.stage, Stage::Failed);
    }

    fn parked_session(
        handle: Handle,
        registry: &Arc<SessionRegistry<RequestSession>>,
        tx: std::sync::mpsc::Sender<Result<String, RequestError>>,
    ) -> Arc<RequestSession> {
        let session = Arc::new(RequestSession::new(
            11,
            "127.0.0.1:9".parse().unwrap(),
            b"ping\n".to_vec(),
            Box::new(move |_, result| tx.send(result).unwrap()),
            handle,
            Arc::clone(registry),
        ));
        registry.register(11, Arc::clone(&session)).unwrap();
        session
    }

    #[test]
    fn test_cancel_observed_after_write_completes() {
        use crate::reactor::EventLoopPool;

        let mut pool = EventLoopPool::start(1).unwrap();
        let registry = Arc::new(SessionRegistry::new());
        let (tx, rx) = std::sync::mpsc::channel();
        let session = parked_session(pool.handle(), &registry, tx);

        {
            let mut state = lock(&session.state);
            state.stage = Stage::Writing;
            state.written = state.request.len();
        }
        registry.cancel(11);

        Arc::clone(&session).advance(Readiness::Ready);

        assert!(matches!(rx.try_recv(), Ok(Err(RequestError::Aborted))));
        assert_eq!(lock(&session.state).stage, Stage::Cancelled);
        assert!(!registry.contains(11));

        pool.stop();
        pool.join();
    }

    #[test]
    fn test_native_cancel_while_reading_is_aborted() {
        use crate::reactor::EventLoopPool;

        let mut pool = EventLoopPool::start(1).unwrap();
        let registry = Arc::new(SessionRegistry::new());
        let (tx, rx) = std::sync::mpsc::channel();
        let session = parked_session(pool.handle(), &registry, tx);
        lock(&session.state).stage = Stage::Reading;

        Arc::clone(&session).advance(Readiness::Cancelled);
        assert!(matches!(rx.try_recv(), Ok(Err(RequestError::Aborted))));

        // Terminal session mengabaikan wakeup berikutnya
        Arc::clone(&session).advance(Readiness::Ready);
        assert!(rx.try_recv().is_err());

        pool.stop();
        pool.join();
    }

    #[test]
    fn test_callback_handed_out_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut state = SessionState::new(
            Vec::new(),
            Box::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let first = state.terminate(Ok("done".to_string()));
        let second = state.terminate(Err(RequestError::Aborted));
        assert!(second.callback.is_none());

        (first.callback.unwrap())(1, first.outcome);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
