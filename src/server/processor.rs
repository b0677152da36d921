//! Request processing collaborator
//!
//! Dipanggil synchronous di stage Processing. Ini satu-satunya titik yang
//! boleh block worker thread.

use log::info;

use crate::protocol::DEFAULT_RESPONSE;

/// Derives one response from one request line.
///
/// `request` excludes the delimiter. A response without a trailing `\n`
/// gets one appended before it is written.
pub trait RequestProcessor: Send + Sync + 'static {
    fn process(&self, request: &[u8]) -> Vec<u8>;
}

impl<F> RequestProcessor for F
where
    F: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
{
    fn process(&self, request: &[u8]) -> Vec<u8> {
        self(request)
    }
}

/// Processor default: log request, balas "Hello Client"
#[derive(Debug, Default, Clone, Copy)]
pub struct Greeter;

impl RequestProcessor for Greeter {
    fn process(&self, request: &[u8]) -> Vec<u8> {
        info!("Request: {}", String::from_utf8_lossy(request));
        DEFAULT_RESPONSE.to_vec()
    }
}
