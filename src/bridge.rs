//! Loads fetched artifacts into the row store through the analytic engine.

use crate::engine::AnalyticEngine;
use crate::error::ProvisionError;
use crate::rowstore::RowStore;
use crate::schema::{check_destination, check_schema, implicated_column};
use crate::types::{RowStoreConfig, TableLoadSpec};
use std::path::{Path, PathBuf};
use tracing::info;

/// A table whose source artifact is available, ready to be loaded.
#[derive(Debug, Clone)]
pub struct LoadJob {
    pub spec: TableLoadSpec,
    pub artifact: PathBuf,
}

/// Connections held for the duration of the load phase.
///
/// Both are released when the bridge is dropped, on success and on failure.
pub struct DatabaseBridge {
    row_store: RowStore,
    engine: AnalyticEngine,
}

impl DatabaseBridge {
    /// Opens the row store first, so an unreachable database fails the run
    /// before any DDL is issued, then the bridge engine attached to it.
    pub async fn open(config: &RowStoreConfig) -> Result<Self, ProvisionError> {
        let row_store = RowStore::connect(config).await?;
        let engine = AnalyticEngine::open_in_memory()?;
        engine.attach_row_store(config).await?;
        Ok(Self { row_store, engine })
    }

    /// Loads every job in order and returns the loaded table names.
    ///
    /// Fail-fast: the first error stops the phase; tables after it are not
    /// touched.
    pub async fn load_all(mut self, jobs: &[LoadJob]) -> Result<Vec<String>, ProvisionError> {
        let mut loaded = Vec::with_capacity(jobs.len());
        let mut outcome = Ok(());
        for job in jobs {
            if let Err(e) = self.load_table(&job.spec, &job.artifact).await {
                outcome = Err(e);
                break;
            }
            loaded.push(job.spec.target_table_name.clone());
        }
        self.engine.detach_row_store().await;
        outcome.map(|_| loaded)
    }

    /// Drop, recreate and bridge-load a single table.
    pub async fn load_table(
        &mut self,
        spec: &TableLoadSpec,
        artifact: &Path,
    ) -> Result<usize, ProvisionError> {
        let table = &spec.target_table_name;

        let source = self
            .engine
            .describe_artifact(artifact)
            .await
            .map_err(|e| ProvisionError::Load {
                table: table.clone(),
                message: format!("cannot read artifact {}: {}", artifact.display(), e),
            })?;
        check_schema(spec, &source)?;

        self.row_store.recreate_table(spec).await?;
        self.verify_destination(spec).await?;

        let rows = self
            .engine
            .bridge_load(spec, artifact)
            .await
            .map_err(|message| load_error(spec, message))?;

        info!("Loaded {} rows into {}", rows, table);
        Ok(rows)
    }

    /// Confirms the created table has exactly the declared columns, in
    /// order and with the declared types.
    async fn verify_destination(&self, spec: &TableLoadSpec) -> Result<(), ProvisionError> {
        let actual = self.row_store.table_columns(&spec.target_table_name).await?;
        check_destination(spec, &actual)
    }
}

/// Maps a bridge engine failure to a schema error when the message points at
/// a declared column, and to a load error otherwise.
fn load_error(spec: &TableLoadSpec, message: String) -> ProvisionError {
    match implicated_column(spec, &message) {
        Some(column) => ProvisionError::Schema {
            table: spec.target_table_name.clone(),
            column: column.to_string(),
            detail: message,
        },
        None => ProvisionError::Load {
            table: spec.target_table_name.clone(),
            message,
        },
    }
}
