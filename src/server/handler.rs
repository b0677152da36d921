//! Connection handler dengan buffered I/O
//!
//! Satu handler per koneksi: Reading → Processing → Writing → Done.
//! Handler adalah `Box` yang dipindah ke continuation-nya sendiri; tidak ada
//! pihak lain yang memegang referensi. Di Done (atau saat error) box di-drop
//! tepat sekali dan semua resource ikut dilepas.

use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;

use log::{debug, warn};
use mio::net::TcpStream;
use mio::{Interest, Token};

use super::RequestProcessor;
use crate::protocol::{terminate, LineBuffer};
use crate::reactor::{Handle, Readiness};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandlerStage {
    Reading,
    Processing,
    Writing,
    Done,
}

enum Step {
    Suspend,
    Done,
}

pub(crate) struct ConnectionHandler {
    handle: Handle,
    stream: TcpStream,
    token: Token,
    peer: SocketAddr,
    stage: HandlerStage,
    reader: LineBuffer,
    request: Vec<u8>,
    response: Vec<u8>,
    written: usize,
    processor: Arc<dyn RequestProcessor>,
}

impl ConnectionHandler {
    /// Register koneksi baru ke reactor dan jadwalkan stage pertama.
    pub(crate) fn spawn(
        handle: &Handle,
        mut stream: TcpStream,
        peer: SocketAddr,
        processor: Arc<dyn RequestProcessor>,
    ) -> io::Result<()> {
        // Disable Nagle's algorithm untuk lower latency
        stream.set_nodelay(true)?;
        let token = handle.register(&mut stream, Interest::READABLE | Interest::WRITABLE)?;

        let handler = Box::new(Self {
            handle: handle.clone(),
            stream,
            token,
            peer,
            stage: HandlerStage::Reading,
            reader: LineBuffer::new(),
            request: Vec::new(),
            response: Vec::new(),
            written: 0,
            processor,
        });

        handle.spawn(move || handler.advance(Readiness::Ready));
        Ok(())
    }

    fn advance(mut self: Box<Self>, readiness: Readiness) {
        if readiness == Readiness::Cancelled {
            debug!("[{}] wait cancelled in {:?}", self.peer, self.stage);
            return self.close();
        }

        match self.run() {
            Ok(Step::Suspend) => {
                let handle = self.handle.clone();
                let token = self.token;
                handle.park(token, move |readiness| self.advance(readiness));
            }
            Ok(Step::Done) => self.close(),
            Err(e) => {
                warn!("[{}] {:?} error: {}", self.peer, self.stage, e);
                self.close();
            }
        }
    }

    /// Jalankan stage berurutan sampai block, selesai, atau error.
    fn run(&mut self) -> io::Result<Step> {
        loop {
            match self.stage {
                HandlerStage::Reading => match self.reader.read_line(&mut self.stream)? {
                    Some(line) => {
                        self.request = line;
                        self.stage = HandlerStage::Processing;
                    }
                    None => return Ok(Step::Suspend),
                },
                HandlerStage::Processing => {
                    self.response = terminate(self.processor.process(&self.request));
                    self.stage = HandlerStage::Writing;
                }
                HandlerStage::Writing => {
                    if self.written == self.response.len() {
                        self.stage = HandlerStage::Done;
                        continue;
                    }
                    match self.stream.write(&self.response[self.written..]) {
                        Ok(0) => {
                            return Err(io::Error::new(
                                io::ErrorKind::WriteZero,
                                "Failed to write to socket",
                            ));
                        }
                        Ok(n) => self.written += n,
                        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                            return Ok(Step::Suspend);
                        }
                        Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => return Err(e),
                    }
                }
                HandlerStage::Done => return Ok(Step::Done),
            }
        }
    }

    /// Terminal: shutdown transport, deregister, lalu drop handler.
    fn close(mut self: Box<Self>) {
        let _ = self.stream.shutdown(Shutdown::Both);
        let handle = self.handle.clone();
        handle.release(&mut self.stream, self.token);
        debug!("[{}] connection closed in {:?}", self.peer, self.stage);
    }
}
