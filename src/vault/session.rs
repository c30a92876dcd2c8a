// Per-connection protocol state machine
//
// Menu -> {Compose, List, Read, Delete} -> Menu, ending on Exit. The menu
// re-prompts on malformed input with no retry bound, so an unresponsive
// client keeps its worker busy until it disconnects.

use crate::vault::config::ServerConfig;
use crate::vault::store::{MessageStore, StoreError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};

/// Longest menu selector or id line accepted, newline included
const MAX_LINE_LEN: usize = 64;

/// Surrounding whitespace tolerated on a message beyond its length limit
const MESSAGE_PADDING: usize = 64;

pub const MENU: &str = "\n=== msgvault ===\n\
1) Compose a message\n\
2) List messages\n\
3) Read a message\n\
4) Delete a message\n\
5) Exit\n";
pub const PROMPT: &str = "> ";
pub const ID_PROMPT: &str = "Message id: ";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("client disconnected")]
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Menu,
    Compose,
    List,
    Read,
    Delete,
    Exit,
}

impl SessionState {
    /// Map a menu selector to the state it leads to
    pub fn from_selector(selector: u64) -> Option<Self> {
        match selector {
            1 => Some(SessionState::Compose),
            2 => Some(SessionState::List),
            3 => Some(SessionState::Read),
            4 => Some(SessionState::Delete),
            5 => Some(SessionState::Exit),
            _ => None,
        }
    }
}

enum Line {
    Text(String),
    TooLong,
}

/// One client session
pub struct Session<S> {
    stream: BufStream<S>,
    store: Arc<MessageStore>,
    state: SessionState,
    delimiter: u8,
    max_message_len: usize,
    // The client may end a message with the delimiter and a newline. That
    // newline shows up as the next menu line and must not re-prompt.
    skip_line_end: bool,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, store: Arc<MessageStore>, config: &ServerConfig) -> Self {
        Self {
            stream: BufStream::new(stream),
            store,
            state: SessionState::Menu,
            delimiter: config.delimiter,
            max_message_len: config.max_message_len,
            skip_line_end: false,
        }
    }

    /// Give back the underlying connection so the caller can close it
    pub fn into_inner(self) -> S {
        self.stream.into_inner()
    }

    /// Serve the client until it exits or the transport fails
    pub async fn run(&mut self) -> Result<(), SessionError> {
        loop {
            self.state = match self.state {
                SessionState::Menu => self.menu().await?,
                SessionState::Compose => {
                    self.compose().await?;
                    SessionState::Menu
                }
                SessionState::List => {
                    self.list().await?;
                    SessionState::Menu
                }
                SessionState::Read => {
                    self.read().await?;
                    SessionState::Menu
                }
                SessionState::Delete => {
                    self.delete().await?;
                    SessionState::Menu
                }
                SessionState::Exit => {
                    self.write_str("Goodbye.\n").await?;
                    return Ok(());
                }
            };
        }
    }

    async fn menu(&mut self) -> Result<SessionState, SessionError> {
        self.write_str(MENU).await?;

        let mut prompt = true;
        loop {
            if prompt {
                self.write_str(PROMPT).await?;
            }
            prompt = true;

            let skip_line_end = std::mem::take(&mut self.skip_line_end);
            let text = match self.read_line().await? {
                Line::Text(text) => text,
                Line::TooLong => {
                    self.write_str(MENU).await?;
                    continue;
                }
            };
            if text.is_empty() {
                prompt = !skip_line_end;
                continue;
            }

            match parse_number(&text) {
                Some(selector) => match SessionState::from_selector(selector) {
                    Some(next) => return Ok(next),
                    None => {
                        self.write_str(&format!("ERROR: unknown option {}\n", selector)).await?;
                        self.write_str(MENU).await?;
                    }
                },
                None => {
                    tracing::debug!("Non-numeric menu input, re-sending menu");
                    self.write_str(MENU).await?;
                }
            }
        }
    }

    async fn compose(&mut self) -> Result<(), SessionError> {
        self.write_str(&format!(
            "Enter your message (max {} bytes), end it with '{}':\n",
            self.max_message_len, self.delimiter as char
        ))
        .await?;

        let mut raw = Vec::new();
        let limit = (self.max_message_len as u64)
            .saturating_add(MESSAGE_PADDING as u64)
            .saturating_add(1);
        (&mut self.stream)
            .take(limit)
            .read_until(self.delimiter, &mut raw)
            .await?;

        if raw.last() == Some(&self.delimiter) {
            raw.pop();
        } else if raw.len() as u64 >= limit {
            self.discard_through(self.delimiter).await?;
            self.skip_line_end = true;
            return self.reject_too_long().await;
        } else {
            return Err(SessionError::Disconnected);
        }
        self.skip_line_end = true;

        // Stored as sent, only the surrounding ASCII whitespace is dropped
        let content = raw.trim_ascii();
        if content.is_empty() {
            self.write_str("ERROR: empty message, not stored\n").await?;
            return Ok(());
        }
        if content.len() > self.max_message_len {
            return self.reject_too_long().await;
        }

        let reply = match self.store.add(content).await {
            Ok(id) => {
                tracing::info!("Stored message {} ({} bytes)", id, content.len());
                format!("Stored message {}\n", id)
            }
            Err(e) => {
                tracing::warn!("Failed to store message: {}", e);
                format!("ERROR: {}\n", e)
            }
        };
        self.write_str(&reply).await
    }

    async fn reject_too_long(&mut self) -> Result<(), SessionError> {
        self.write_str(&format!(
            "ERROR: message exceeds {} bytes, not stored\n",
            self.max_message_len
        ))
        .await
    }

    async fn list(&mut self) -> Result<(), SessionError> {
        let reply = match self.store.list().await {
            Ok(summaries) if summaries.is_empty() => "No messages stored.\n".to_string(),
            Ok(summaries) => {
                let mut out = String::new();
                for summary in summaries {
                    out.push_str(&format!(
                        "[{}] {} {}{}\n",
                        summary.id,
                        format_timestamp(&summary.created_at),
                        summary.preview,
                        if summary.truncated { "..." } else { "" }
                    ));
                }
                out
            }
            Err(e) => format!("ERROR: {}\n", e),
        };
        self.write_str(&reply).await
    }

    async fn read(&mut self) -> Result<(), SessionError> {
        let id = self.read_id().await?;

        let reply = match self.store.read(id).await {
            Ok(message) => format!(
                "Message {} ({}):\n{}\n",
                message.id,
                format_timestamp(&message.created_at),
                message.text()
            ),
            Err(e) => {
                if !matches!(e, StoreError::NotFound(_)) {
                    tracing::warn!("Failed to read message {}: {}", id, e);
                }
                format!("ERROR: {}\n", e)
            }
        };
        self.write_str(&reply).await
    }

    async fn delete(&mut self) -> Result<(), SessionError> {
        let id = self.read_id().await?;

        let reply = match self.store.delete(id).await {
            Ok(()) => {
                tracing::info!("Deleted message {}", id);
                format!("Deleted message {}\n", id)
            }
            Err(e) => format!("ERROR: {}\n", e),
        };
        self.write_str(&reply).await
    }

    /// Prompt until the client supplies a numeric id
    async fn read_id(&mut self) -> Result<u64, SessionError> {
        loop {
            self.write_str(ID_PROMPT).await?;

            match self.read_line().await? {
                Line::Text(text) if text.is_empty() => continue,
                Line::Text(text) => match parse_number(&text) {
                    Some(id) => return Ok(id),
                    None => {
                        self.write_str(&format!("ERROR: '{}' is not a valid message id\n", text))
                            .await?
                    }
                },
                Line::TooLong => self.write_str("ERROR: input line too long\n").await?,
            }
        }
    }

    async fn read_line(&mut self) -> Result<Line, SessionError> {
        let mut raw = Vec::new();
        let limit = MAX_LINE_LEN as u64;
        let n = (&mut self.stream)
            .take(limit)
            .read_until(b'\n', &mut raw)
            .await?;

        if n == 0 {
            return Err(SessionError::Disconnected);
        }
        if raw.last() != Some(&b'\n') && raw.len() as u64 >= limit {
            self.discard_through(b'\n').await?;
            return Ok(Line::TooLong);
        }

        Ok(Line::Text(String::from_utf8_lossy(&raw).trim().to_string()))
    }

    /// Skip input up to and including `byte`
    async fn discard_through(&mut self, byte: u8) -> Result<(), SessionError> {
        loop {
            let buf = self.stream.fill_buf().await?;
            if buf.is_empty() {
                return Err(SessionError::Disconnected);
            }
            match buf.iter().position(|b| *b == byte) {
                Some(pos) => {
                    self.stream.consume(pos + 1);
                    return Ok(());
                }
                None => {
                    let len = buf.len();
                    self.stream.consume(len);
                }
            }
        }
    }

    async fn write_str(&mut self, text: &str) -> Result<(), SessionError> {
        self.stream.write_all(text.as_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

/// Parse a line made only of ASCII digits
fn parse_number(text: &str) -> Option<u64> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
