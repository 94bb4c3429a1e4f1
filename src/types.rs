//! Data structures shared by the provisioning phases.

use crate::error::FetchError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A remote artifact resolved to a concrete remote and local location.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSpec {
    /// Name used by table definitions to refer to this artifact.
    pub logical_name: String,
    /// Remote path before placeholder substitution.
    pub remote_path_template: String,
    /// Remote path relative to the manifest base URL.
    pub remote_path: String,
    /// Local path relative to the data directory.
    pub local_relative_path: PathBuf,
    /// Category folder under the data directory.
    pub category: String,
}

impl ArtifactSpec {
    pub fn url(&self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self.remote_path)
    }

    pub fn local_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.local_relative_path)
    }
}

/// Column type of a destination table.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Integer,
    Bigint,
    Double,
    Boolean,
}

impl ColumnType {
    /// Type name used in row-store DDL.
    pub fn pg_type(self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Bigint => "BIGINT",
            ColumnType::Double => "DOUBLE PRECISION",
            ColumnType::Boolean => "BOOLEAN",
        }
    }

    /// Cast target used by the bridge engine.
    pub fn duckdb_type(self) -> &'static str {
        match self {
            ColumnType::Text => "VARCHAR",
            ColumnType::Integer => "INTEGER",
            ColumnType::Bigint => "BIGINT",
            ColumnType::Double => "DOUBLE",
            ColumnType::Boolean => "BOOLEAN",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Bigint => "bigint",
            ColumnType::Double => "double",
            ColumnType::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// One column of a destination table.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

impl ColumnDef {
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            column_type,
        }
    }
}

/// How one artifact becomes one row-store table.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TableLoadSpec {
    /// Logical name of the artifact feeding this table.
    pub source_artifact: String,
    pub target_table_name: String,
    /// Ordered column schema of the destination table.
    pub column_schema: Vec<ColumnDef>,
}

/// The resolved, ordered list of artifacts and tables for a run.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub base_url: String,
    pub artifacts: Vec<ArtifactSpec>,
    pub tables: Vec<TableLoadSpec>,
}

impl Manifest {
    pub fn artifact(&self, logical_name: &str) -> Option<&ArtifactSpec> {
        self.artifacts
            .iter()
            .find(|a| a.logical_name == logical_name)
    }
}

/// Outcome of fetching a single artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Cached,
    Downloaded,
    Failed,
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FetchStatus::Cached => "cached",
            FetchStatus::Downloaded => "downloaded",
            FetchStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub spec: ArtifactSpec,
    pub status: FetchStatus,
    pub byte_count: u64,
    pub error: Option<FetchError>,
}

impl FetchResult {
    pub fn is_available(&self) -> bool {
        self.status != FetchStatus::Failed
    }
}

/// All fetch outcomes of a run, in manifest order.
#[derive(Debug, Clone, Default)]
pub struct FetchSummary {
    pub results: Vec<FetchResult>,
}

impl FetchSummary {
    pub fn count(&self, status: FetchStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &FetchResult> {
        self.results
            .iter()
            .filter(|r| r.status == FetchStatus::Failed)
    }

    pub fn is_available(&self, logical_name: &str) -> bool {
        self.results
            .iter()
            .any(|r| r.spec.logical_name == logical_name && r.is_available())
    }
}

/// Row count of a loaded table.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ValidationRecord {
    pub table_name: String,
    pub row_count: i64,
}

/// What a finished run produced.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub fetch: FetchSummary,
    pub loaded_tables: Vec<String>,
    pub validation: Vec<ValidationRecord>,
}

/// Retry settings for transient network failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: usize,
    /// Delay before the first retry; doubles on each following retry.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Connection parameters for the destination PostgreSQL database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowStoreConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub dbname: String,
}

impl RowStoreConfig {
    /// libpq-style connection string, understood by both tokio-postgres and
    /// DuckDB's postgres extension.
    pub fn conninfo(&self) -> String {
        let mut parts = vec![
            format!("host={}", quote_conninfo(&self.host)),
            format!("port={}", self.port),
            format!("user={}", quote_conninfo(&self.user)),
            format!("dbname={}", quote_conninfo(&self.dbname)),
        ];
        if let Some(password) = &self.password {
            parts.push(format!("password={}", quote_conninfo(password)));
        }
        parts.join(" ")
    }
}

impl Default for RowStoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: None,
            dbname: "postgres".to_string(),
        }
    }
}

fn quote_conninfo(value: &str) -> String {
    if !value.is_empty() && !value.contains(|c: char| c.is_whitespace() || c == '\'' || c == '\\')
    {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}'", escaped)
}

/// Stage control for a provisioning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStage {
    /// Fetch, load and validate
    All,
    /// Only resolve, provision directories and fetch
    FetchOnly,
    /// Load and validate from cached artifacts without downloading anything
    LoadOnly,
}

/// Configuration for a provisioning run, built once at process entry.
///
/// # Example
///
/// ```
/// use dataprov::ProvisionConfig;
///
/// let config = ProvisionConfig {
///     data_dir: "data".into(),
///     max_concurrent_downloads: 8,
///     ..ProvisionConfig::default()
/// };
/// assert_eq!(config.row_store.port, 5432);
/// ```
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    /// Root directory for cached artifacts.
    pub data_dir: PathBuf,
    /// Maximum number of concurrent downloads (default: 4).
    pub max_concurrent_downloads: usize,
    pub retry: RetryPolicy,
    /// Per-request timeout for artifact downloads.
    pub request_timeout: Duration,
    /// Never touch the network; uncached artifacts fail.
    pub offline: bool,
    pub show_progress: bool,
    pub row_store: RowStoreConfig,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            max_concurrent_downloads: 4,
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(30 * 60),
            offline: false,
            show_progress: true,
            row_store: RowStoreConfig::default(),
        }
    }
}
