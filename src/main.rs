//! Command-line client.
//!
//! Sends one request through the lifecycle controller (reqwest transport)
//! and prints a JSON summary of the final attempt.
//!
//! ```text
//! http-lifecycle https://example.com/ -X POST -H "Content-Type: text/plain" -d hello \
//!     --timeout 10 --activity-timeout 2 --retries 3
//! ```

use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{mpsc, Arc};

use clap::Parser;
use serde::Serialize;

use http_lifecycle::backend::reqwest::ReqwestBackendFactory;
use http_lifecycle::config::{load_config, HttpConfig};
use http_lifecycle::observability::logging::init_logging;
use http_lifecycle::{
    DelegateThreadPolicy, FailureReason, HttpManager, RequestStatus, RetryPolicy, RetryingRequest,
};

#[derive(Parser)]
#[command(name = "http-lifecycle")]
#[command(about = "Send an HTTP request through the lifecycle controller", long_about = None)]
struct Cli {
    /// Target URL
    url: String,

    /// Request verb
    #[arg(short = 'X', long, default_value = "GET")]
    verb: String,

    /// Request header, "Name: value" (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Request body
    #[arg(short, long, conflicts_with = "data_file")]
    data: Option<String>,

    /// Upload the body from a file
    #[arg(long)]
    data_file: Option<PathBuf>,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Total timeout in seconds (0 disables)
    #[arg(long)]
    timeout: Option<f64>,

    /// Activity timeout in seconds (0 disables)
    #[arg(long)]
    activity_timeout: Option<f64>,

    /// Retries on connection errors and retryable status codes
    #[arg(long)]
    retries: Option<u32>,

    /// Stream the response body into a file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Include the response body in the summary
    #[arg(long)]
    include_body: bool,
}

#[derive(Debug, Serialize)]
struct Summary {
    request_id: String,
    url: String,
    effective_url: String,
    verb: String,
    status: RequestStatus,
    succeeded: bool,
    failure_reason: FailureReason,
    response_code: Option<u16>,
    content_type: Option<String>,
    content_length: u64,
    elapsed_ms: u64,
    retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<String>,
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => HttpConfig::default(),
    };
    if let Some(retries) = cli.retries {
        config.retries.max_retries = retries;
    }
    init_logging(&config.observability);

    let policy = RetryPolicy::from(&config.retries);
    let factory = ReqwestBackendFactory::from_config(&config)?;
    let manager = HttpManager::new(config, Arc::new(factory))?;

    let request = manager.create_request();
    request.set_url(cli.url.as_str());
    request.set_verb(cli.verb.as_str());
    request.set_delegate_thread_policy(DelegateThreadPolicy::CompleteOnIoThread);
    for header in &cli.headers {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| format!("invalid header '{}', expected 'Name: value'", header))?;
        request.set_header(name.trim(), value.trim());
    }
    if let Some(data) = cli.data {
        request.set_content_as_string(data);
    }
    if let Some(path) = cli.data_file {
        request.set_content_from_file(path);
    }
    if let Some(secs) = cli.timeout {
        request.set_timeout(std::time::Duration::from_secs_f64(secs.max(0.0)));
    }
    if let Some(secs) = cli.activity_timeout {
        request.set_activity_timeout(std::time::Duration::from_secs_f64(secs.max(0.0)));
    }
    if let Some(path) = &cli.output {
        request.set_response_sink(File::create(path)?);
    }

    let include_body = cli.include_body;
    let retrying = RetryingRequest::new(request, policy);
    let (tx, rx) = mpsc::channel();
    retrying.on_process_request_complete(move |request, response, succeeded| {
        let summary = Summary {
            request_id: request.id().to_string(),
            url: request.url(),
            effective_url: request.effective_url(),
            verb: request.verb(),
            status: request.status(),
            succeeded,
            failure_reason: request.failure_reason(),
            response_code: response.as_ref().map(|r| r.status()),
            content_type: response
                .as_ref()
                .and_then(|r| r.content_type().map(str::to_string)),
            content_length: response.as_ref().map(|r| r.content_length()).unwrap_or(0),
            elapsed_ms: request.elapsed().as_millis() as u64,
            retries: request.attempt().saturating_sub(1) as u32,
            body: response
                .as_ref()
                .filter(|_| include_body)
                .map(|r| r.content_as_string()),
        };
        let _ = tx.send(summary);
    });

    retrying.try_process_request()?;
    let summary = rx.recv()?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    manager.shutdown();
    Ok(if summary.succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
