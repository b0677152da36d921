//! Line Message Format
//!
//! Layout:
//! ┌─────────────────────────────────────────────────────┐
//! │ Payload (variable, tanpa byte `\n`)                 │
//! ├─────────────────────────────────────────────────────┤
//! │ Delimiter `\n` (1 byte)                             │
//! └─────────────────────────────────────────────────────┘
//!
//! Tidak ada length prefix, tidak ada schema: satu baris = satu pesan.

/// Message delimiter
pub const DELIMITER: u8 = b'\n';

/// Request yang dikirim client secara default
pub const DEFAULT_REQUEST: &[u8] = b"Hello Server\n";

/// Response default dari server
pub const DEFAULT_RESPONSE: &[u8] = b"Hello Client\n";

/// Upper bound for a single buffered line (64KB), delimiter excluded.
pub const MAX_LINE_SIZE: usize = 64 * 1024;

/// Posisi delimiter pertama dalam buffer, jika ada
#[inline(always)]
pub fn find_delimiter(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == DELIMITER)
}

/// Pastikan pesan diakhiri delimiter (append jika belum)
pub fn terminate(mut msg: Vec<u8>) -> Vec<u8> {
    if msg.last() != Some(&DELIMITER) {
        msg.push(DELIMITER);
    }
    msg
}
