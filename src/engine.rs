//! In-memory DuckDB engine used as a conduit between artifact files and the
//! row store. Nothing is ever persisted in it.

use crate::error::ProvisionError;
use crate::schema::{bridge_insert_sql, describe_sql, quote_literal, SourceColumn, ROW_STORE_ALIAS};
use crate::types::{RowStoreConfig, TableLoadSpec};
use duckdb::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Handle to a transient DuckDB connection.
///
/// DuckDB calls block, so every operation runs on the blocking pool. The
/// connection is closed when the last handle is dropped.
#[derive(Clone)]
pub struct AnalyticEngine {
    conn: Arc<Mutex<Connection>>,
}

impl AnalyticEngine {
    pub fn open_in_memory() -> Result<Self, ProvisionError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ProvisionError::Connection(format!("failed to open DuckDB: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, String>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> duckdb::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| "DuckDB connection lock poisoned".to_string())?;
            f(&guard).map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| format!("DuckDB task failed: {e}"))?
    }

    /// Lists the columns of a parquet artifact in file order.
    pub async fn describe_artifact(&self, artifact: &Path) -> Result<Vec<SourceColumn>, String> {
        let sql = describe_sql(artifact);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], |row| {
                Ok(SourceColumn {
                    name: row.get(0)?,
                    data_type: row.get(1)?,
                })
            })?;
            let columns = rows.collect::<duckdb::Result<Vec<_>>>()?;
            Ok(columns)
        })
        .await
    }

    /// Loads the postgres extension and attaches the row store under
    /// [`ROW_STORE_ALIAS`].
    pub async fn attach_row_store(&self, row_store: &RowStoreConfig) -> Result<(), ProvisionError> {
        let attach = format!(
            "ATTACH {} AS {} (TYPE POSTGRES)",
            quote_literal(&row_store.conninfo()),
            ROW_STORE_ALIAS
        );
        self.with_conn(move |conn| {
            load_extension(conn, "postgres")?;
            conn.execute_batch(&attach)
        })
        .await
        .map_err(|e| ProvisionError::Connection(format!("bridge engine could not attach row store: {e}")))?;
        debug!("Row store attached to bridge engine as '{}'", ROW_STORE_ALIAS);
        Ok(())
    }

    /// Streams the artifact into the attached row-store table and returns the
    /// number of rows inserted.
    ///
    /// The attached catalog is refreshed first so a table created over the
    /// row store's own connection is visible.
    pub async fn bridge_load(&self, spec: &TableLoadSpec, artifact: &Path) -> Result<usize, String> {
        let sql = bridge_insert_sql(spec, artifact);
        debug!("Bridge load: {}", sql);
        self.with_conn(move |conn| {
            conn.execute_batch("CALL pg_clear_cache();")?;
            conn.execute(&sql, [])
        })
        .await
    }

    /// Detaches the row store. Errors are ignored; the connection is going
    /// away anyway.
    pub async fn detach_row_store(&self) {
        let _ = self
            .with_conn(|conn| conn.execute_batch(&format!("DETACH {}", ROW_STORE_ALIAS)))
            .await;
    }
}

/// Loads an extension, installing it first only when it is not available
/// locally. Installing needs network access; loading does not.
fn load_extension(conn: &Connection, name: &str) -> duckdb::Result<()> {
    if conn.execute_batch(&format!("LOAD {name};")).is_ok() {
        return Ok(());
    }
    debug!("Extension '{}' not installed, installing", name);
    conn.execute_batch(&format!("INSTALL {name}; LOAD {name};"))
}
