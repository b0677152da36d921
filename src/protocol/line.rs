//! Buffered line reader untuk non-blocking socket
//!
//! Mengumpulkan bytes sampai delimiter ditemukan. Dipakai oleh stage
//! Reading di client session maupun di server handler.

use std::io::{self, Read};

use super::message::{find_delimiter, MAX_LINE_SIZE};

const READ_CHUNK_SIZE: usize = 4 * 1024;

/// Accumulates bytes until one complete line is available.
///
/// `WouldBlock` is reported as `Ok(None)`; EOF before the delimiter is an
/// `UnexpectedEof` error; a line longer than the limit is `InvalidData`.
pub struct LineBuffer {
    buffer: Vec<u8>,
    // Bytes sebelum offset ini sudah di-scan dan tidak mengandung delimiter
    scanned: usize,
    limit: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::with_limit(MAX_LINE_SIZE)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            limit,
        }
    }

    /// Read dari socket sampai satu baris lengkap tersedia.
    ///
    /// Returns baris tanpa delimiter. Sisa bytes setelah delimiter tetap
    /// di buffer.
    pub fn read_line<R: Read>(&mut self, reader: &mut R) -> io::Result<Option<Vec<u8>>> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }
            if self.buffer.len() > self.limit {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "line exceeds maximum size",
                ));
            }

            match reader.read(&mut chunk) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed before delimiter",
                    ));
                }
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Ambil baris lengkap pertama dari buffer, jika ada
    pub fn take_line(&mut self) -> Option<Vec<u8>> {
        match find_delimiter(&self.buffer[self.scanned..]) {
            Some(offset) => {
                let pos = self.scanned + offset;
                let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
                line.pop();
                self.scanned = 0;
                Some(line)
            }
            None => {
                self.scanned = self.buffer.len();
                None
            }
        }
    }

    /// Bytes buffered but not yet returned as a line.
    #[inline(always)]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
