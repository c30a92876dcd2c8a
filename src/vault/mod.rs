// Encrypted multi-client message vault
//
// A TCP acceptor hands connections to a fixed pool of workers through a
// bounded queue. Each worker runs a line-oriented menu session against a
// shared store that keeps every message encrypted with one server-wide key.

pub mod cipher;
pub mod store;
pub mod queue;
pub mod pool;
pub mod session;
pub mod config;
pub mod server;
pub mod cli;
pub mod commands;

pub use cipher::{CryptoError, MessageCipher};
pub use store::{MessageStore, MessageSummary, Record, StoreError, StoredMessage};
pub use queue::{ConnectionQueue, QueueEntry, QueueFull, Ticket};
pub use pool::WorkerPool;
pub use session::{Session, SessionError, SessionState};
pub use config::ServerConfig;
pub use server::MessageServer;
pub use cli::{MsgVaultCli, MsgVaultCommand};
pub use commands::execute_command;
