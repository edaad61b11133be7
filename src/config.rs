//! Server configuration
//!
//! Fixed-schema configuration with documented defaults. Open-ended client
//! metadata lives in the per-session client-info map instead; everything
//! the server itself recognizes is a typed field here.

use crate::transport::MAX_FRAME_BYTES;
use crate::wire::DEFAULT_FETCH_SIZE;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP listen address, e.g. "127.0.0.1:20590".
    pub bind_addr: String,
    /// Hard cap on a single frame in either direction.
    pub max_frame_bytes: usize,
    /// Rows per result frame when a request names no fetch size.
    pub default_fetch_size: u32,
    /// Requests buffered ahead of dispatch per connection.
    pub read_ahead: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: "127.0.0.1:20590".to_string(),
            max_frame_bytes: MAX_FRAME_BYTES,
            default_fetch_size: DEFAULT_FETCH_SIZE,
            read_ahead: 32,
        }
    }
}
