//! dataprov - reproducible local data environments for query tutorials
//!
//! This library downloads versioned tutorial datasets into a local cache and
//! loads them into PostgreSQL, using an in-memory DuckDB engine as the bridge
//! between parquet files and the database.
//!
//! # Features
//!
//! - **Idempotent Cache**: Artifacts already on disk are never fetched again
//! - **Atomic Downloads**: Files appear at their final path only when complete
//! - **Partial-Failure Tolerance**: A failed artifact does not stop the others
//! - **Automatic Retry**: Exponential backoff for transient network failures
//! - **Fail-Fast Loading**: Tables are dropped, recreated and loaded one at a time
//! - **Validation**: Empty or missing tables fail the run
//!
//! # Example
//!
//! ```no_run
//! use dataprov::{provision, DuckdbVersion, ExecutionStage, ManifestTemplate, ProvisionConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ProvisionConfig::default();
//! provision(&config, &ManifestTemplate::builtin(), DuckdbVersion, ExecutionStage::All).await?;
//! # Ok(())
//! # }
//! ```

mod bridge;
mod cache;
mod download;
mod engine;
mod error;
mod layout;
mod manifest;
mod orchestrator;
mod rowstore;
mod schema;
mod types;
mod validate;
mod verify;

pub use bridge::{DatabaseBridge, LoadJob};
pub use cache::FetchCache;
pub use engine::AnalyticEngine;
pub use error::{FetchError, ManifestError, ProvisionError, ValidationFailure, ValidationFailureKind};
pub use layout::provision_directories;
pub use manifest::{
    parse_engine_version, ArtifactTemplate, DuckdbVersion, FixedVersion, ManifestResolver,
    ManifestTemplate, TableTemplate, VersionProvider, DEFAULT_BASE_URL, ENGINE_TAG,
};
pub use orchestrator::{plan, provision};
pub use rowstore::RowStore;
pub use schema::{check_destination, check_schema, types_compatible, SourceColumn};
pub use types::{
    ArtifactSpec, ColumnDef, ColumnType, ExecutionStage, FetchResult, FetchStatus, FetchSummary,
    Manifest, ProvisionConfig, RetryPolicy, RowStoreConfig, RunReport, TableLoadSpec,
    ValidationRecord,
};
pub use validate::{reconcile, validate_tables, ValidationReport};
