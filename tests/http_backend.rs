//! reqwest transport tests against a local mock backend.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use http_lifecycle::backend::reqwest::ReqwestBackendFactory;
use http_lifecycle::{
    DelegateThreadPolicy, FailureReason, HttpConfig, HttpManager, HttpRequest, HttpResponse,
    RequestStatus,
};

mod common;

use common::{MockReply, MockRequest};

const WAIT: Duration = Duration::from_secs(10);

fn manager_with(config: HttpConfig) -> HttpManager {
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    HttpManager::new(config, Arc::new(ReqwestBackendFactory::with_client(client))).unwrap()
}

fn manager() -> HttpManager {
    manager_with(common::test_config())
}

/// Dispatch and wait for the completion delegate, delivered on the worker.
async fn run(request: &HttpRequest) -> (Option<Arc<HttpResponse>>, bool) {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    request.set_delegate_thread_policy(DelegateThreadPolicy::CompleteOnIoThread);
    request.on_process_request_complete(move |_, response, succeeded| {
        let _ = tx.send((response, succeeded));
    });
    assert!(request.process_request());
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("request did not finish")
        .expect("delegate dropped")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_get_with_default_headers() {
    let seen = Arc::new(Mutex::new(None::<MockRequest>));
    let record = seen.clone();
    let addr = common::start_programmable_backend(move |req| {
        let record = record.clone();
        async move {
            *record.lock().unwrap() = Some(req);
            MockReply::new(200, "hello").header("Content-Type", "text/plain")
        }
    })
    .await;

    let mut config = common::test_config();
    config
        .default_headers
        .insert("X-Client".to_string(), "tests".to_string());
    let manager = manager_with(config);
    let request = manager.create_request();
    request.set_url(format!("http://{}/hello", addr));
    request.set_header("X-Request", "one");

    let (response, succeeded) = run(&request).await;
    assert!(succeeded);
    let response = response.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.content_as_string(), "hello");
    assert_eq!(response.content_type(), Some("text/plain"));
    assert_eq!(request.status(), RequestStatus::Succeeded);

    let seen = seen.lock().unwrap().clone().unwrap();
    assert_eq!(seen.method, "GET");
    assert_eq!(seen.path, "/hello");
    assert_eq!(seen.header("X-Request"), Some("one"));
    assert_eq!(seen.header("X-Client"), Some("tests"));
    assert!(seen
        .header("User-Agent")
        .unwrap()
        .starts_with("http-lifecycle/"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_post_uploads_body() {
    let addr = common::start_programmable_backend(|req| async move {
        MockReply::new(201, req.body)
    })
    .await;

    let manager = manager();
    let request = manager.create_request();
    request.set_url(format!("http://{}/items", addr));
    request.set_verb("POST");
    request.set_content_as_string("payload");

    let (response, succeeded) = run(&request).await;
    assert!(succeeded);
    let response = response.unwrap();
    assert_eq!(response.status(), 201);
    assert_eq!(response.content_as_string(), "payload");
    assert_eq!(request.bytes_sent(), 7);
    assert_eq!(request.bytes_received(), 7);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_status_delegate_and_error_status() {
    let addr = common::start_mock_backend(404, "nope").await;

    let manager = manager();
    let request = manager.create_request();
    request.set_url(format!("http://{}/missing", addr));
    let codes = Arc::new(Mutex::new(Vec::new()));
    let seen = codes.clone();
    request.on_status_code_received(move |_, code| seen.lock().unwrap().push(code));

    let (response, succeeded) = run(&request).await;
    assert!(succeeded);
    assert_eq!(response.unwrap().status(), 404);
    assert_eq!(*codes.lock().unwrap(), vec![404]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connection_refused() {
    let addr = common::closed_port().await;

    let manager = manager();
    let request = manager.create_request();
    request.set_url(format!("http://{}/", addr));

    let (response, succeeded) = run(&request).await;
    assert!(!succeeded);
    assert!(response.is_none());
    assert_eq!(request.failure_reason(), FailureReason::ConnectionError);
    assert_eq!(manager.stats().failed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_redirect_reports_effective_url() {
    let addr = common::start_programmable_backend(|req| async move {
        if req.path == "/start" {
            MockReply::new(302, "").header("Location", "/final")
        } else {
            MockReply::new(200, "landed")
        }
    })
    .await;

    let manager = manager();
    let request = manager.create_request();
    let start = format!("http://{}/start", addr);
    request.set_url(start.as_str());

    let (response, succeeded) = run(&request).await;
    assert!(succeeded);
    let response = response.unwrap();
    assert_eq!(response.content_as_string(), "landed");
    assert_eq!(response.url(), start);
    assert_eq!(response.effective_url(), format!("http://{}/final", addr));
    assert_eq!(request.effective_url(), format!("http://{}/final", addr));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_streams_into_sink() {
    let addr = common::start_programmable_backend(|_| async move {
        MockReply::new(200, "").chunked(
            vec![b"aa".to_vec(), b"bb".to_vec(), b"cc".to_vec()],
            Duration::from_millis(20),
        )
    })
    .await;

    let manager = manager();
    let request = manager.create_request();
    request.set_url(format!("http://{}/download", addr));
    let sink = common::SharedBuffer::default();
    request.set_response_sink(sink.clone());

    let (response, succeeded) = run(&request).await;
    assert!(succeeded);
    let response = response.unwrap();
    assert!(response.content().is_empty());
    assert_eq!(response.content_length(), 6);
    assert_eq!(sink.contents(), b"aabbcc");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failing_sink_fails_request() {
    let addr = common::start_mock_backend(200, "data").await;

    let manager = manager();
    let request = manager.create_request();
    request.set_url(format!("http://{}/", addr));
    request.set_response_sink(common::BrokenSink);

    let (_, succeeded) = run(&request).await;
    assert!(!succeeded);
    assert_eq!(request.failure_reason(), FailureReason::Other);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_activity_timeout_on_stalled_body() {
    let addr = common::start_programmable_backend(|_| async move {
        MockReply::new(200, "partial").stall()
    })
    .await;

    let manager = manager();
    let request = manager.create_request();
    request.set_url(format!("http://{}/", addr));
    request.set_activity_timeout(Duration::from_millis(200));

    let (response, succeeded) = run(&request).await;
    assert!(!succeeded);
    assert!(response.is_none());
    assert_eq!(request.failure_reason(), FailureReason::ConnectionError);
    assert!(request.elapsed() >= Duration::from_millis(200));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_stalled_body() {
    let addr = common::start_programmable_backend(|_| async move {
        MockReply::new(200, "partial").stall()
    })
    .await;

    let manager = manager();
    let request = manager.create_request();
    request.set_url(format!("http://{}/", addr));

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    request.set_delegate_thread_policy(DelegateThreadPolicy::CompleteOnIoThread);
    request.on_process_request_complete(move |_, response, succeeded| {
        let _ = tx.send((response, succeeded));
    });
    assert!(request.process_request());

    let deadline = tokio::time::Instant::now() + WAIT;
    while request.bytes_received() < 7 {
        assert!(tokio::time::Instant::now() < deadline, "no data received");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    request.cancel_request();

    let (response, succeeded) = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert!(!succeeded);
    assert_eq!(request.failure_reason(), FailureReason::Cancelled);
    let response = response.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.content_as_string(), "partial");
}

#[test]
fn test_blocking_dispatch() {
    let server = tokio::runtime::Runtime::new().unwrap();
    let addr = server.block_on(common::start_mock_backend(200, "sync"));

    let manager = manager();
    let request = manager.create_request();
    request.set_url(format!("http://{}/", addr));

    assert!(request.process_request_until_complete());
    assert_eq!(request.status(), RequestStatus::Succeeded);
    assert_eq!(request.response().unwrap().content_as_string(), "sync");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connection_timeout_from_config() {
    let mut config = common::test_config();
    config.timeouts.connection_secs = 0.2;
    let client = ReqwestBackendFactory::client_builder(&config)
        .no_proxy()
        .build()
        .unwrap();
    let manager =
        HttpManager::new(config, Arc::new(ReqwestBackendFactory::with_client(client))).unwrap();

    // Non-routable: the connect either hangs until the timeout or is refused.
    let request = manager.create_request();
    request.set_url("http://10.255.255.1:81/");

    let (response, succeeded) = run(&request).await;
    assert!(!succeeded);
    assert!(response.is_none());
    assert_eq!(request.failure_reason(), FailureReason::ConnectionError);
    assert!(request.elapsed() < Duration::from_secs(5));
}

/// Reader handing out one chunk per read, with a pause before each.
struct SlowReader {
    chunks: Vec<Vec<u8>>,
    delay: Duration,
}

impl std::io::Read for SlowReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.chunks.is_empty() {
            return Ok(0);
        }
        std::thread::sleep(self.delay);
        let chunk = self.chunks.remove(0);
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_streamed_upload_reports_progress_per_chunk() {
    let addr = common::start_programmable_backend(|req| async move {
        MockReply::new(200, req.body.len().to_string())
    })
    .await;

    let manager = manager();
    let request = manager.create_request();
    request.set_url(format!("http://{}/upload", addr));
    request.set_verb("PUT");
    request.set_header("Content-Length", "12");
    request.set_content_from_reader(SlowReader {
        chunks: vec![b"aaaa".to_vec(), b"bbbb".to_vec(), b"cccc".to_vec()],
        delay: Duration::from_millis(150),
    });
    // Longer than a single chunk's pause, shorter than the whole upload.
    request.set_activity_timeout(Duration::from_millis(400));

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    request.set_delegate_thread_policy(DelegateThreadPolicy::CompleteOnIoThread);
    request.on_process_request_complete(move |_, response, succeeded| {
        let _ = tx.send((response, succeeded));
    });
    assert!(request.process_request());

    let mut partial = false;
    let done = loop {
        let sent = request.bytes_sent();
        partial |= sent > 0 && sent < 12;
        tokio::select! {
            done = rx.recv() => break done.expect("delegate dropped"),
            _ = tokio::time::sleep(Duration::from_millis(10)) => {}
        }
    };

    let (response, succeeded) = done;
    assert!(succeeded);
    assert_eq!(response.unwrap().content_as_string(), "12");
    assert!(partial, "bytes sent only reported at the end");
    assert_eq!(request.bytes_sent(), 12);
}
