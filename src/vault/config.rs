// Runtime configuration consumed by the server core

use anyhow::{bail, Result};
use std::net::SocketAddr;

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 256;
pub const DEFAULT_DELIMITER: char = '~';
pub const DEFAULT_PREVIEW_LEN: usize = 20;

/// Upper bound accepted for `max_message_len`
pub const MAX_MESSAGE_LEN_LIMIT: usize = 64 * 1024;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the acceptor listens on
    pub listen_addr: SocketAddr,

    /// Number of workers, which is also the connection queue capacity
    pub workers: usize,

    /// Maximum plaintext length of a stored message, in bytes
    pub max_message_len: usize,

    /// Byte that ends a composed message
    pub delimiter: u8,

    /// Characters shown per message when listing
    pub preview_len: usize,
}

impl ServerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            workers: DEFAULT_WORKERS,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            delimiter: DEFAULT_DELIMITER as u8,
            preview_len: DEFAULT_PREVIEW_LEN,
        }
    }

    /// Check the configuration before serving
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("at least one worker is required");
        }
        if self.max_message_len == 0 {
            bail!("maximum message length must be at least 1 byte");
        }
        if self.max_message_len > MAX_MESSAGE_LEN_LIMIT {
            bail!(
                "maximum message length is {} bytes, got {}",
                MAX_MESSAGE_LEN_LIMIT,
                self.max_message_len
            );
        }
        if !self.delimiter.is_ascii_graphic() {
            bail!(
                "delimiter must be a printable ASCII character, got {:?}",
                self.delimiter as char
            );
        }
        if self.preview_len == 0 {
            bail!("preview length must be at least 1 character");
        }
        Ok(())
    }

    pub fn delimiter_char(&self) -> char {
        self.delimiter as char
    }
}
