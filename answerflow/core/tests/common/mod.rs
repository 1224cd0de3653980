//! Shared fixtures for integration tests
//!
//! A one-route HTTP server on loopback that answers every request with a
//! canned response and records the request bodies it received.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use answerflow_core::{
    create_fallback_resolver, FallbackSnapshotOptions, RequestHooks, SessionConfig, StaticKernel,
    StreamError, StreamRequest,
};

/// Canned HTTP response
#[derive(Clone, Debug)]
pub struct Canned {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl Canned {
    pub fn sse(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            content_type: "text/event-stream",
            body: body.into(),
        }
    }

    pub fn json(body: serde_json::Value) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            body: body.to_string(),
        }
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: body.to_string(),
        }
    }
}

/// Loopback server answering every request with the same response
pub struct TestServer {
    pub addr: SocketAddr,
    pub bodies: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(response: Canned) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&bodies);

        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let response = response.clone();
                let recorded = Arc::clone(&recorded);
                tokio::spawn(async move {
                    if let Some(body) = handle_connection(stream, &response).await {
                        recorded.lock().push(body);
                    }
                });
            }
        });

        Self {
            addr,
            bodies,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn request_json(&self, index: usize) -> serde_json::Value {
        let body = self.bodies.lock()[index].clone();
        serde_json::from_str(&body).unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(mut stream: TcpStream, response: &Canned) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[header_end..]).to_string();

    let reply = format!(
        "HTTP/1.1 {} Canned\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        response.status,
        response.content_type,
        response.body.len(),
        response.body
    );
    stream.write_all(reply.as_bytes()).await.ok()?;
    stream.shutdown().await.ok()?;
    Some(body)
}

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Short pacing so real-clock tests finish quickly
pub fn quick_session() -> SessionConfig {
    SessionConfig {
        adaptive_window: Duration::from_millis(5),
    }
}

pub fn request() -> StreamRequest {
    StreamRequest::new("How do lifetimes work?", "conv-it", "msg-it")
}

/// Hooks whose fallback answers `answer`, recording every reported error
pub fn hooks(answer: &str) -> (RequestHooks, Arc<Mutex<Vec<StreamError>>>) {
    let resolver = create_fallback_resolver(
        Arc::new(StaticKernel::new(answer)),
        &request(),
        FallbackSnapshotOptions::default(),
    );
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    let hooks = RequestHooks::new(resolver).on_error(move |e| sink.lock().push(e.clone()));
    (hooks, errors)
}
