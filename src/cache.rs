//! Idempotent artifact fetching with bounded concurrency and retries.

use crate::download::download_artifact;
use crate::error::{FetchError, ProvisionError};
use crate::types::{
    ArtifactSpec, FetchResult, FetchStatus, FetchSummary, Manifest, ProvisionConfig, RetryPolicy,
};
use crate::verify::cached_size;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_retry2::strategy::{jitter, ExponentialBackoff};
use tokio_retry2::{Retry, RetryError};
use tracing::{info, warn};

/// Shared state handed to every fetch task.
struct FetchContext {
    client: reqwest::Client,
    base_url: String,
    data_dir: PathBuf,
    retry: RetryPolicy,
    offline: bool,
}

/// Retrieves manifest artifacts into the local cache.
///
/// Artifacts that already exist with a non-zero size are reported as
/// [`FetchStatus::Cached`] without any network request. A failed artifact
/// never aborts the others.
pub struct FetchCache {
    ctx: Arc<FetchContext>,
    semaphore: Arc<Semaphore>,
    show_progress: bool,
}

impl FetchCache {
    pub fn new(config: &ProvisionConfig, base_url: &str) -> Result<Self, ProvisionError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProvisionError::Connection(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            ctx: Arc::new(FetchContext {
                client,
                base_url: base_url.to_string(),
                data_dir: config.data_dir.clone(),
                retry: config.retry,
                offline: config.offline,
            }),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_downloads.max(1))),
            show_progress: config.show_progress,
        })
    }

    /// Fetches every artifact of the manifest and reports the outcome.
    ///
    /// Results come back in manifest order regardless of completion order, so
    /// the per-artifact log lines are deterministic.
    pub async fn fetch_all(&self, manifest: &Manifest) -> FetchSummary {
        let pb = self.progress_bar(manifest.artifacts.len());

        let mut tasks = Vec::with_capacity(manifest.artifacts.len());
        for spec in &manifest.artifacts {
            let ctx = Arc::clone(&self.ctx);
            let semaphore = Arc::clone(&self.semaphore);
            let pb = pb.clone();
            let task_spec = spec.clone();

            let task = tokio::spawn(async move {
                // The semaphore is never closed
                let _permit = semaphore.acquire_owned().await.ok();
                pb.set_message(task_spec.logical_name.clone());
                let result = fetch_artifact(&ctx, task_spec).await;
                pb.inc(1);
                result
            });
            tasks.push((spec.clone(), task));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for (spec, task) in tasks {
            let result = match task.await {
                Ok(result) => result,
                Err(e) => FetchResult {
                    error: Some(FetchError::Storage {
                        path: spec.local_path(&self.ctx.data_dir),
                        message: format!("fetch task failed: {e}"),
                    }),
                    spec,
                    status: FetchStatus::Failed,
                    byte_count: 0,
                },
            };
            log_result(&result);
            results.push(result);
        }

        let summary = FetchSummary { results };
        pb.finish_and_clear();
        report(&summary);
        summary
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg} | {elapsed_precise} elapsed")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░ ");
        pb.set_style(style);
        pb
    }
}

async fn fetch_artifact(ctx: &FetchContext, spec: ArtifactSpec) -> FetchResult {
    let target = spec.local_path(&ctx.data_dir);

    if let Some(size) = cached_size(&target).await {
        return FetchResult {
            spec,
            status: FetchStatus::Cached,
            byte_count: size,
            error: None,
        };
    }

    let url = spec.url(&ctx.base_url);
    if ctx.offline {
        return FetchResult {
            spec,
            status: FetchStatus::Failed,
            byte_count: 0,
            error: Some(FetchError::Permanent {
                url,
                message: "not cached and offline mode is enabled".to_string(),
            }),
        };
    }

    match download_with_retry(ctx, &url, &target).await {
        Ok(bytes) => FetchResult {
            spec,
            status: FetchStatus::Downloaded,
            byte_count: bytes,
            error: None,
        },
        Err(e) => FetchResult {
            spec,
            status: FetchStatus::Failed,
            byte_count: 0,
            error: Some(e),
        },
    }
}

async fn download_with_retry(
    ctx: &FetchContext,
    url: &str,
    target: &std::path::Path,
) -> Result<u64, FetchError> {
    let base_ms = u64::try_from(ctx.retry.base_delay.as_millis()).unwrap_or(u64::MAX);
    let retry_strategy = ExponentialBackoff::from_millis(2)
        .factor((base_ms / 2).max(1))
        .max_delay(ctx.retry.max_delay)
        .map(jitter)
        .take(ctx.retry.max_retries);

    Retry::spawn(retry_strategy, move || async move {
        match download_artifact(&ctx.client, url, target).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.is_transient() => {
                warn!("Attempt to fetch {} failed, will retry: {}", url, e);
                RetryError::to_transient(e)
            }
            Err(e) => RetryError::to_permanent(e),
        }
    })
    .await
}

fn log_result(result: &FetchResult) {
    let path = result.spec.local_relative_path.display();
    match (&result.status, &result.error) {
        (FetchStatus::Failed, Some(e)) => {
            warn!("❌ {} failed: {}", path, e)
        }
        (status, _) => info!("{} {} ({} bytes)", path, status, result.byte_count),
    }
}

fn report(summary: &FetchSummary) {
    let failed = summary.count(FetchStatus::Failed);
    info!(
        "Fetch phase complete: {} downloaded, {} cached, {} failed",
        summary.count(FetchStatus::Downloaded),
        summary.count(FetchStatus::Cached),
        failed
    );
    if failed > 0 {
        let names: Vec<&str> = summary
            .failures()
            .map(|r| r.spec.logical_name.as_str())
            .collect();
        warn!("⚠️  Unavailable artifacts: {}", names.join(", "));
    }
}
