//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use http_lifecycle::backend::scripted::{Script, ScriptedBackendFactory};
use http_lifecycle::{FailureReason, HttpConfig, HttpManager, HttpRequest, RequestStatus};

/// Config with fast ticks and no default timeouts.
pub fn test_config() -> HttpConfig {
    let mut config = HttpConfig::default();
    config.worker_threads = 2;
    config.tick_interval_ms = 5;
    config.timeouts.total_secs = 0.0;
    config.timeouts.activity_secs = 0.0;
    config
}

/// Manager backed by a scripted transport.
pub fn scripted_manager(script: Script) -> (HttpManager, Arc<ScriptedBackendFactory>) {
    scripted_manager_with(test_config(), script)
}

pub fn scripted_manager_with(
    config: HttpConfig,
    script: Script,
) -> (HttpManager, Arc<ScriptedBackendFactory>) {
    let factory = Arc::new(ScriptedBackendFactory::new(script));
    let manager = HttpManager::new(config, factory.clone()).unwrap();
    (manager, factory)
}

/// One completion delegate invocation.
#[derive(Debug, Clone)]
pub struct Completion {
    pub succeeded: bool,
    pub status: RequestStatus,
    pub reason: FailureReason,
    pub response_code: Option<u16>,
    pub body: Option<String>,
    pub thread: Option<String>,
    pub at: Instant,
}

/// Record every completion delegate invocation of `request`.
pub fn record_completions(request: &HttpRequest) -> Arc<Mutex<Vec<Completion>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    request.on_process_request_complete(move |request, response, succeeded| {
        sink.lock().unwrap().push(Completion {
            succeeded,
            status: request.status(),
            reason: request.failure_reason(),
            response_code: response.as_ref().map(|r| r.status()),
            body: response.as_ref().map(|r| r.content_as_string()),
            thread: std::thread::current().name().map(str::to_string),
            at: Instant::now(),
        });
    });
    log
}

/// Tick `manager` until `log` holds `count` completions.
pub fn wait_for_completions(
    manager: &HttpManager,
    log: &Arc<Mutex<Vec<Completion>>>,
    count: usize,
    timeout: Duration,
) -> bool {
    wait_until(timeout, || {
        manager.tick();
        log.lock().unwrap().len() >= count
    })
}

/// Poll `condition` until it holds or `timeout` elapsed.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

pub fn completions(log: &Arc<Mutex<Vec<Completion>>>) -> Vec<Completion> {
    log.lock().unwrap().clone()
}

/// In-memory response sink that stays readable after the request drops it.
#[derive(Clone, Default)]
pub struct SharedBuffer(pub Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Sink whose writes always fail.
pub struct BrokenSink;

impl Write for BrokenSink {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Request received by a mock backend.
#[derive(Debug, Clone, Default)]
pub struct MockRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl MockRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Reply written by a mock backend.
#[derive(Debug, Clone)]
pub struct MockReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub chunks: Vec<Vec<u8>>,
    /// Pause before each chunk.
    pub chunk_delay: Duration,
    /// Keep the connection open after the last chunk without finishing.
    pub stall: bool,
}

impl MockReply {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            chunks: vec![body.into()],
            chunk_delay: Duration::ZERO,
            stall: false,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn chunked(mut self, chunks: Vec<Vec<u8>>, delay: Duration) -> Self {
        self.chunks = chunks;
        self.chunk_delay = delay;
        self
    }

    pub fn stall(mut self) -> Self {
        self.stall = true;
        self
    }
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        302 => "Found",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Start a programmable mock backend on an ephemeral port.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(MockRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MockReply> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let _ = serve(socket, f).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Start a mock backend that always returns the same status and body.
pub async fn start_mock_backend(status: u16, body: &'static str) -> SocketAddr {
    start_programmable_backend(move |_| async move { MockReply::new(status, body) }).await
}

async fn serve<F, Fut>(mut socket: TcpStream, f: Arc<F>) -> io::Result<()>
where
    F: Fn(MockRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MockReply> + Send + 'static,
{
    let request = read_request(&mut socket).await?;
    let reply = f(request).await;

    let mut head = format!("HTTP/1.1 {} {}\r\n", reply.status, status_text(reply.status));
    for (name, value) in &reply.headers {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    let length: usize = reply.chunks.iter().map(Vec::len).sum();
    let declared = if reply.stall { length + 1 } else { length };
    head.push_str(&format!("Content-Length: {}\r\nConnection: close\r\n\r\n", declared));
    socket.write_all(head.as_bytes()).await?;
    socket.flush().await?;

    for chunk in &reply.chunks {
        if !reply.chunk_delay.is_zero() {
            tokio::time::sleep(reply.chunk_delay).await;
        }
        socket.write_all(chunk).await?;
        socket.flush().await?;
    }

    if reply.stall {
        tokio::time::sleep(Duration::from_secs(60)).await;
    }
    socket.shutdown().await
}

async fn read_request(socket: &mut TcpStream) -> io::Result<MockRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut start = lines.next().unwrap_or_default().split_whitespace();
    let method = start.next().unwrap_or_default().to_string();
    let path = start.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
        .collect();

    let length = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = buf[head_end..].to_vec();
    while body.len() < length {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    Ok(MockRequest {
        method,
        path,
        headers,
        body,
    })
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
