#![allow(dead_code)]

use dataprov::{ProvisionConfig, RetryPolicy};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// How the stub answers a path.
pub enum Route {
    Body(Vec<u8>),
    BodyWithEtag(Vec<u8>, String),
    Status(u16),
    /// Announces `declared` bytes, sends `body`, then hangs up.
    Truncated { declared: usize, body: Vec<u8> },
    /// Answers 503 `failures` times, then serves `body`.
    FailTimes { failures: AtomicUsize, body: Vec<u8> },
}

impl Route {
    pub fn fail_times(failures: usize, body: &[u8]) -> Self {
        Route::FailTimes {
            failures: AtomicUsize::new(failures),
            body: body.to_vec(),
        }
    }
}

/// Minimal HTTP/1.1 server answering one request per connection.
pub struct StubServer {
    pub base_url: String,
    hits: Arc<Mutex<HashMap<String, usize>>>,
    handle: JoinHandle<()>,
}

impl StubServer {
    pub async fn start(routes: Vec<(&str, Route)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes: Arc<HashMap<String, Route>> = Arc::new(
            routes
                .into_iter()
                .map(|(path, route)| (format!("/{}", path.trim_start_matches('/')), route))
                .collect(),
        );
        let hits = Arc::new(Mutex::new(HashMap::new()));

        let task_hits = Arc::clone(&hits);
        let handle = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let routes = Arc::clone(&routes);
                let hits = Arc::clone(&task_hits);
                tokio::spawn(async move {
                    serve(socket, &routes, &hits).await;
                });
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            hits,
            handle,
        }
    }

    /// Requests received in total.
    pub fn hits(&self) -> usize {
        self.hits.lock().unwrap().values().sum()
    }

    /// Requests received for one path.
    pub fn hits_for(&self, path: &str) -> usize {
        let key = format!("/{}", path.trim_start_matches('/'));
        self.hits.lock().unwrap().get(&key).copied().unwrap_or(0)
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(
    mut socket: TcpStream,
    routes: &HashMap<String, Route>,
    hits: &Mutex<HashMap<String, usize>>,
) {
    let mut buf = Vec::with_capacity(4096);
    loop {
        let mut tmp = [0_u8; 1024];
        let n = match socket.read(&mut tmp).await {
            Ok(n) => n,
            Err(_) => return,
        };
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&tmp[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }

    let request = String::from_utf8_lossy(&buf);
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();
    *hits.lock().unwrap().entry(path.clone()).or_insert(0) += 1;

    let (head, body): (String, Vec<u8>) = match routes.get(&path) {
        None => (status_head(404, 0), Vec::new()),
        Some(Route::Status(code)) => (status_head(*code, 0), Vec::new()),
        Some(Route::Body(body)) => (status_head(200, body.len()), body.clone()),
        Some(Route::BodyWithEtag(body, etag)) => (
            format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nETag: \"{}\"\r\nConnection: close\r\n\r\n",
                body.len(),
                etag
            ),
            body.clone(),
        ),
        Some(Route::Truncated { declared, body }) => (status_head(200, *declared), body.clone()),
        Some(Route::FailTimes { failures, body }) => {
            let remaining = failures.load(Ordering::SeqCst);
            if remaining > 0 {
                failures.store(remaining - 1, Ordering::SeqCst);
                (status_head(503, 0), Vec::new())
            } else {
                (status_head(200, body.len()), body.clone())
            }
        }
    };

    let _ = socket.write_all(head.as_bytes()).await;
    let _ = socket.write_all(&body).await;
    let _ = socket.flush().await;
    let _ = socket.shutdown().await;
}

fn status_head(code: u16, content_length: usize) -> String {
    let reason = match code {
        200 => "OK",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        503 => "Service Unavailable",
        _ => "Status",
    };
    format!("HTTP/1.1 {code} {reason}\r\nContent-Length: {content_length}\r\nConnection: close\r\n\r\n")
}

/// A config pointed at `data_dir` with fast retries and no progress bar.
pub fn test_config(data_dir: &Path) -> ProvisionConfig {
    ProvisionConfig {
        data_dir: data_dir.to_path_buf(),
        max_concurrent_downloads: 4,
        retry: RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
        request_timeout: Duration::from_secs(10),
        offline: false,
        show_progress: false,
        ..ProvisionConfig::default()
    }
}

/// Writes the result of a DuckDB `query` to a parquet file.
pub fn write_parquet(query: &str, target: &Path) {
    let conn = duckdb::Connection::open_in_memory().unwrap();
    let target = target.to_string_lossy().replace('\'', "''");
    conn.execute_batch(&format!("COPY ({query}) TO '{target}' (FORMAT PARQUET)"))
        .unwrap();
}

/// A port on localhost with nothing listening.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}
