//! reqwest transport.
//!
//! # Responsibilities
//! - Send the request snapshot through a shared `reqwest::Client`
//! - Stream the response into the core chunk by chunk
//! - Map transport errors onto failure reasons
//!
//! # Design Decisions
//! - The I/O future runs on the manager's runtime; abort drops it
//! - Redirects are followed by the client (up to 10); the final URL is
//!   reported as the effective URL
//! - Connect and timeout errors are connection errors, everything else is
//!   `Other`
//! - No native activity timeout, so the core's Activity timer stays on
//! - Request bodies are streamed from a blocking reader task; bytes sent are
//!   reported per chunk as the connection takes them

use std::io::{self, Read};
use std::sync::{Mutex, PoisonError};

use ::reqwest::header::CONTENT_LENGTH;
use ::reqwest::{redirect, Body, Client, ClientBuilder, Method};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use super::{Backend, BackendContext, BackendFactory};
use crate::config::HttpConfig;
use crate::http::content::ContentReader;
use crate::http::types::FailureReason;

const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Factory sharing one connection pool across attempts.
#[derive(Debug, Clone)]
pub struct ReqwestBackendFactory {
    client: Client,
}

impl ReqwestBackendFactory {
    pub fn new() -> Result<Self, ::reqwest::Error> {
        Self::from_config(&HttpConfig::default())
    }

    /// Factory whose client applies the configured connection timeout.
    pub fn from_config(config: &HttpConfig) -> Result<Self, ::reqwest::Error> {
        Ok(Self::with_client(Self::client_builder(config).build()?))
    }

    /// Client settings derived from `config`, for callers that customize
    /// the client further.
    pub fn client_builder(config: &HttpConfig) -> ClientBuilder {
        let mut builder = Client::builder().redirect(redirect::Policy::limited(10));
        if let Some(timeout) = config.timeouts.connection() {
            builder = builder.connect_timeout(timeout);
        }
        builder
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl BackendFactory for ReqwestBackendFactory {
    fn create_backend(&self) -> Box<dyn Backend> {
        Box::new(ReqwestBackend {
            client: self.client.clone(),
            task: Mutex::new(None),
        })
    }

    fn name(&self) -> &'static str {
        "reqwest"
    }
}

/// Backend for one attempt.
pub struct ReqwestBackend {
    client: Client,
    task: Mutex<Option<AbortHandle>>,
}

impl ReqwestBackend {
    fn stop(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl Backend for ReqwestBackend {
    fn setup_request(&self, ctx: BackendContext) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return false;
        };
        let snapshot = ctx.request();

        let method = match Method::from_bytes(snapshot.verb.as_bytes()) {
            Ok(method) => method,
            Err(e) => {
                tracing::warn!(request_id = %snapshot.id, verb = %snapshot.verb, error = %e, "Invalid verb");
                return false;
            }
        };

        let mut builder = self.client.request(method, snapshot.url.clone());
        for (name, value) in snapshot.headers.iter() {
            builder = builder.header(name, value);
        }

        if !snapshot.content.is_none() {
            let reader = match ctx.open_content() {
                Ok(reader) => reader,
                Err(e) => {
                    tracing::warn!(request_id = %snapshot.id, error = %e, "Request content unreadable");
                    ctx.fail(FailureReason::Other);
                    return true;
                }
            };
            if !snapshot.headers.contains("Content-Length") {
                if let Some(len) = snapshot.content.len_hint() {
                    builder = builder.header(CONTENT_LENGTH, len);
                }
            }
            builder = builder.body(upload_body(&runtime, &ctx, reader));
        }

        let task = runtime.spawn(async move {
            let mut response = match builder.send().await {
                Ok(response) => response,
                Err(e) => {
                    tracing::debug!(error = %e, "Request send failed");
                    ctx.fail(classify(&e));
                    return;
                }
            };

            if response.url() != &ctx.request().url {
                ctx.on_effective_url(response.url().as_str());
            }
            ctx.on_status(response.status().as_u16());
            for (name, value) in response.headers() {
                ctx.on_header(name.as_str(), &String::from_utf8_lossy(value.as_bytes()));
            }

            loop {
                match response.chunk().await {
                    Ok(Some(chunk)) => {
                        if !ctx.on_data(&chunk) {
                            return;
                        }
                    }
                    Ok(None) => {
                        ctx.complete();
                        return;
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "Response body read failed");
                        ctx.fail(classify(&e));
                        return;
                    }
                }
            }
        });

        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task.abort_handle());
        true
    }

    fn abort_request(&self) {
        self.stop();
    }

    fn cleanup_request(&self) {
        self.stop();
    }
}

/// Stream `reader` as the request body, reporting the running total of bytes
/// handed to the connection.
fn upload_body(runtime: &tokio::runtime::Handle, ctx: &BackendContext, reader: ContentReader) -> Body {
    let (tx, rx) = mpsc::channel::<io::Result<Vec<u8>>>(4);
    runtime.spawn_blocking(move || pump(reader, tx));

    let chunks = futures_util::stream::unfold((rx, ctx.clone(), 0u64), |(mut rx, ctx, sent)| async move {
        let chunk = rx.recv().await?;
        let sent = match &chunk {
            Ok(data) => {
                let sent = sent + data.len() as u64;
                ctx.on_bytes_sent(sent);
                sent
            }
            Err(_) => sent,
        };
        Some((chunk, (rx, ctx, sent)))
    });
    Body::wrap_stream(chunks)
}

/// Read `reader` in chunks until it is exhausted or the body is dropped.
fn pump(mut reader: ContentReader, tx: mpsc::Sender<io::Result<Vec<u8>>>) {
    let mut buf = vec![0u8; UPLOAD_CHUNK_SIZE];
    loop {
        let chunk = match reader.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => Err(e),
        };
        let failed = chunk.is_err();
        if tx.blocking_send(chunk).is_err() || failed {
            return;
        }
    }
}

fn classify(error: &::reqwest::Error) -> FailureReason {
    if error.is_connect() || error.is_timeout() {
        FailureReason::ConnectionError
    } else {
        FailureReason::Other
    }
}
