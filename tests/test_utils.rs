//! Test utilities for msgvault
//!
//! Helpers for starting a server on an ephemeral port and talking to it
//! the way a line-oriented client would.

#![allow(dead_code)]

use msgvault::vault::{MessageCipher, MessageServer, MessageStore, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const TEST_KEY: &str = "603deb1015ca71be2b73aef0857d77811f352c073b6108d72d9810a30914dff4";
pub const TEST_IV: &str = "000102030405060708090a0b0c0d0e0f";
pub const PROMPT: &str = "> ";
pub const ID_PROMPT: &str = "Message id: ";
pub const COMPOSE_PROMPT: &str = ":\n";
pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// A server running in the background
pub struct TestServer {
    pub addr: SocketAddr,
    pub store: Arc<MessageStore>,
    pub shutdown: CancellationToken,
    pub handle: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    pub async fn stop(self) {
        self.shutdown.cancel();
        tokio::time::timeout(IO_TIMEOUT, self.handle)
            .await
            .expect("server did not stop in time")
            .expect("server task panicked")
            .expect("server returned an error");
    }
}

/// Start a server with `workers` workers on 127.0.0.1 and an ephemeral port
pub async fn start_server(workers: usize) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut config = ServerConfig::new(addr);
    config.workers = workers;
    let cipher = MessageCipher::from_hex(TEST_KEY, TEST_IV, config.max_message_len).unwrap();

    let server = MessageServer::from_listener(config, cipher, listener);
    let store = server.store();
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(server.run(shutdown.clone()));

    TestServer {
        addr,
        store,
        shutdown,
        handle,
    }
}

/// A connected protocol client
pub struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    /// Connect and wait for the first menu prompt
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut client = Self { stream };
        client.expect(PROMPT).await;
        client
    }

    pub async fn raw(addr: SocketAddr) -> TcpStream {
        TcpStream::connect(addr).await.unwrap()
    }

    pub async fn send(&mut self, data: &str) {
        self.stream.write_all(data.as_bytes()).await.unwrap();
    }

    /// Read until the server output ends with `marker`
    pub async fn expect(&mut self, marker: &str) -> String {
        read_until(&mut self.stream, marker).await
    }

    pub async fn compose(&mut self, text: &str) -> String {
        self.send("1\n").await;
        self.expect(COMPOSE_PROMPT).await;
        self.send(&format!("{}~", text)).await;
        self.expect(PROMPT).await
    }

    pub async fn list(&mut self) -> String {
        self.send("2\n").await;
        self.expect(PROMPT).await
    }

    pub async fn read(&mut self, id: u64) -> String {
        self.send("3\n").await;
        self.expect(ID_PROMPT).await;
        self.send(&format!("{}\n", id)).await;
        self.expect(PROMPT).await
    }

    pub async fn delete(&mut self, id: u64) -> String {
        self.send("4\n").await;
        self.expect(ID_PROMPT).await;
        self.send(&format!("{}\n", id)).await;
        self.expect(PROMPT).await
    }

    pub async fn exit(mut self) {
        self.send("5\n").await;
        self.expect("Goodbye.\n").await;
        assert_closed(&mut self.stream).await;
    }
}

pub async fn read_until(stream: &mut TcpStream, marker: &str) -> String {
    let mut out = Vec::new();
    let mut buf = [0u8; 1024];

    let finished = tokio::time::timeout(IO_TIMEOUT, async {
        while !out.ends_with(marker.as_bytes()) {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(
                n > 0,
                "connection closed while waiting for {:?}, got: {}",
                marker,
                String::from_utf8_lossy(&out)
            );
            out.extend_from_slice(&buf[..n]);
        }
    })
    .await;

    if finished.is_err() {
        panic!(
            "timed out waiting for {:?}, got: {}",
            marker,
            String::from_utf8_lossy(&out)
        );
    }

    String::from_utf8(out).unwrap()
}

/// Assert the server closed the connection (EOF, possibly after some output)
pub async fn assert_closed(stream: &mut TcpStream) -> String {
    let mut rest = Vec::new();
    tokio::time::timeout(IO_TIMEOUT, stream.read_to_end(&mut rest))
        .await
        .expect("connection was left open")
        .unwrap();
    String::from_utf8_lossy(&rest).into_owned()
}
