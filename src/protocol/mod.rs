//! Protocol Layer: Newline-Delimited Messages
//!
//! Prinsip desain:
//! - Satu delimiter: `\n` menutup setiap pesan
//! - Tanpa length prefix dan tanpa schema
//! - Buffer per koneksi, di-drain per baris

mod line;
mod message;

pub use line::LineBuffer;
pub use message::{
    find_delimiter, terminate, DEFAULT_REQUEST, DEFAULT_RESPONSE, DELIMITER, MAX_LINE_SIZE,
};
