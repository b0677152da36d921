//! Courier - Asynchronous line-oriented TCP engine
//!
//! Arsitektur:
//! - Shared reactor: satu `mio::Poll` di-drive oleh semua worker thread
//! - Client: per-request state machine (connect → write → read) dengan
//!   registry untuk cancellation yang race-safe
//! - Server: pipelined accept loop, satu handler per koneksi
//! - Wire format: satu baris (`\n`) = satu pesan

pub mod client;
pub mod error;
pub mod protocol;
pub mod reactor;
pub mod server;

pub use client::{Client, ClientConfig, RequestId};
pub use error::{RegistryError, RequestError, ServerError, SubmitError};
pub use reactor::EventLoopPool;
pub use server::{Greeter, RequestProcessor, Server, ServerConfig};
