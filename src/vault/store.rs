// Shared in-memory message store
//
// Records live in an ordered map keyed by id behind the structural lock.
// Each record carries its own content lock. Lock order: the structural lock
// may be held while a content lock is taken (list), but a content lock is
// never held while the structural lock is requested.

use crate::vault::cipher::{CryptoError, MessageCipher};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("message {0} not found")]
    NotFound(u64),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// One stored message. The ciphertext is `None` once a delete has released it.
#[derive(Debug)]
pub struct Record {
    id: u64,
    created_at: DateTime<Utc>,
    content: RwLock<Option<Vec<u8>>>,
}

impl Record {
    fn new(id: u64, ciphertext: Vec<u8>) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            content: RwLock::new(Some(ciphertext)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Length of the stored ciphertext, `None` if the record was deleted.
    pub async fn ciphertext_len(&self) -> Option<usize> {
        self.content.read().await.as_ref().map(Vec::len)
    }
}

/// Entry returned by [`MessageStore::list`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSummary {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub preview: String,
    pub truncated: bool,
}

/// A decrypted message returned by [`MessageStore::read`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub plaintext: Vec<u8>,
}

impl StoredMessage {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.plaintext).into_owned()
    }
}

struct Chain {
    records: BTreeMap<u64, Arc<Record>>,
    next_id: u64,
}

/// Message store shared by every session
pub struct MessageStore {
    chain: Mutex<Chain>,
    cipher: Arc<MessageCipher>,
    preview_len: usize,
}

impl MessageStore {
    pub fn new(cipher: Arc<MessageCipher>, preview_len: usize) -> Self {
        Self {
            chain: Mutex::new(Chain {
                records: BTreeMap::new(),
                next_id: 1,
            }),
            cipher,
            preview_len,
        }
    }

    /// Encrypt and append a message, returning its id
    pub async fn add(&self, plaintext: &[u8]) -> Result<u64, StoreError> {
        let ciphertext = self.cipher.encrypt(plaintext)?;

        let mut chain = self.chain.lock().await;
        let id = chain.next_id;
        chain.next_id += 1;
        chain.records.insert(id, Arc::new(Record::new(id, ciphertext)));
        drop(chain);

        tracing::debug!("Stored message {}", id);
        Ok(id)
    }

    /// List all messages in insertion order.
    ///
    /// The structural lock is held for the whole traversal, so adds and
    /// deletes wait until the listing is complete.
    pub async fn list(&self) -> Result<Vec<MessageSummary>, StoreError> {
        let chain = self.chain.lock().await;
        let mut summaries = Vec::with_capacity(chain.records.len());

        for record in chain.records.values() {
            let content = record.content.read().await;
            let Some(ciphertext) = content.as_ref() else {
                // Released by a delete that has not unlinked it yet
                continue;
            };
            let plaintext = self.cipher.decrypt(ciphertext)?;
            drop(content);

            let (preview, truncated) = make_preview(&plaintext, self.preview_len);
            summaries.push(MessageSummary {
                id: record.id,
                created_at: record.created_at,
                preview,
                truncated,
            });
        }

        Ok(summaries)
    }

    /// Look up a record. The structural lock is released before returning.
    pub async fn find(&self, id: u64) -> Result<Arc<Record>, StoreError> {
        let chain = self.chain.lock().await;
        chain
            .records
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    /// Decrypt a message under its shared content lock
    pub async fn read(&self, id: u64) -> Result<StoredMessage, StoreError> {
        let record = self.find(id).await?;

        let content = record.content.read().await;
        let ciphertext = content.as_ref().ok_or(StoreError::NotFound(id))?;
        let plaintext = self.cipher.decrypt(ciphertext)?;
        drop(content);

        Ok(StoredMessage {
            id: record.id,
            created_at: record.created_at,
            plaintext: plaintext.to_vec(),
        })
    }

    /// Delete a message.
    ///
    /// The content is released only while the record's content lock is held
    /// exclusively, so in-flight readers finish first and later readers see
    /// `NotFound`. The record is unlinked afterwards, with the content lock
    /// already dropped.
    pub async fn delete(&self, id: u64) -> Result<(), StoreError> {
        let record = self.find(id).await?;

        {
            let mut content = record.content.write().await;
            if content.take().is_none() {
                // Lost the race against another delete of the same id
                return Err(StoreError::NotFound(id));
            }
        }

        let mut chain = self.chain.lock().await;
        if let Some(linked) = chain.records.get(&id) {
            if Arc::ptr_eq(linked, &record) {
                chain.records.remove(&id);
            }
        }
        drop(chain);

        tracing::debug!("Deleted message {}", id);
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.chain.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Truncate plaintext to `max_chars` characters for listing
fn make_preview(plaintext: &[u8], max_chars: usize) -> (String, bool) {
    let text = String::from_utf8_lossy(plaintext);
    let first_line = text.lines().next().unwrap_or("");
    let truncated = first_line.chars().count() > max_chars || first_line.len() < text.len();
    let preview: String = first_line.chars().take(max_chars).collect();
    (preview, truncated)
}
