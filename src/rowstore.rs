//! Destination PostgreSQL row store.

use crate::error::ProvisionError;
use crate::schema::{qualified_table, quote_literal, recreate_table_sql, ROW_STORE_SCHEMA};
use crate::types::{RowStoreConfig, TableLoadSpec};
use std::collections::HashMap;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, warn};

/// A connection to the row store, scoped to one pipeline phase.
///
/// Dropping it closes the connection.
pub struct RowStore {
    client: Client,
    connection: JoinHandle<()>,
}

impl RowStore {
    /// Connects to the row store.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Connection`] when the server is unreachable
    /// or refuses the credentials.
    pub async fn connect(config: &RowStoreConfig) -> Result<Self, ProvisionError> {
        let (client, connection) = tokio_postgres::connect(&config.conninfo(), NoTls)
            .await
            .map_err(|e| {
                ProvisionError::Connection(format!(
                    "failed to connect to postgres at {}:{} (db {}): {}",
                    config.host, config.port, config.dbname, e
                ))
            })?;

        let connection = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!("Row store connection closed with error: {}", e);
            }
        });
        debug!("Connected to row store {}:{}", config.host, config.port);

        Ok(Self { client, connection })
    }

    /// Drops and recreates the destination table inside one transaction.
    pub async fn recreate_table(&mut self, spec: &TableLoadSpec) -> Result<(), ProvisionError> {
        let ddl = recreate_table_sql(spec);
        debug!("DDL for {}: {}", spec.target_table_name, ddl);

        let ddl_error = |e: tokio_postgres::Error| {
            let column = e
                .as_db_error()
                .and_then(|db| db.column())
                .map(str::to_string);
            match column {
                Some(column) => ProvisionError::Schema {
                    table: spec.target_table_name.clone(),
                    column,
                    detail: e.to_string(),
                },
                None => ProvisionError::Load {
                    table: spec.target_table_name.clone(),
                    message: format!("DDL failed: {e}"),
                },
            }
        };

        let tx = self.client.transaction().await.map_err(ddl_error)?;
        tx.batch_execute(&ddl).await.map_err(ddl_error)?;
        tx.commit().await.map_err(ddl_error)?;
        Ok(())
    }

    /// Column names and `information_schema` data types of a table, in
    /// ordinal order.
    pub async fn table_columns(&self, table: &str) -> Result<Vec<(String, String)>, ProvisionError> {
        let rows = self
            .client
            .query(
                "SELECT column_name::text, data_type::text
                 FROM information_schema.columns
                 WHERE table_schema::text = $1 AND table_name::text = $2
                 ORDER BY ordinal_position",
                &[&ROW_STORE_SCHEMA, &table],
            )
            .await
            .map_err(|e| ProvisionError::Load {
                table: table.to_string(),
                message: format!("failed to read column metadata: {e}"),
            })?;
        Ok(rows.iter().map(|r| (r.get(0), r.get(1))).collect())
    }

    /// Counts rows of every named table that exists, with a single
    /// reconciliation query. Tables that do not exist are absent from the map.
    pub async fn count_rows(&self, tables: &[String]) -> Result<HashMap<String, i64>, ProvisionError> {
        let validation_error = |e: tokio_postgres::Error| ProvisionError::Load {
            table: tables.join(", "),
            message: format!("reconciliation query failed: {e}"),
        };

        let present: Vec<String> = self
            .client
            .query(
                "SELECT table_name::text FROM information_schema.tables
                 WHERE table_schema::text = $1 AND table_name::text = ANY($2::text[])",
                &[&ROW_STORE_SCHEMA, &tables],
            )
            .await
            .map_err(validation_error)?
            .iter()
            .map(|r| r.get(0))
            .collect();

        if present.is_empty() {
            return Ok(HashMap::new());
        }

        let query = reconciliation_sql(&present);
        let rows = self.client.query(&query, &[]).await.map_err(validation_error)?;
        Ok(rows.iter().map(|r| (r.get(0), r.get(1))).collect())
    }
}

impl Drop for RowStore {
    fn drop(&mut self) {
        // The client is dropped right after this; stop the driver task too.
        self.connection.abort();
    }
}

/// One `UNION ALL` query returning `(table, count)` for each table.
pub(crate) fn reconciliation_sql(tables: &[String]) -> String {
    tables
        .iter()
        .map(|t| {
            format!(
                "SELECT {}::text AS table_name, COUNT(*)::bigint AS n FROM {}",
                quote_literal(t),
                qualified_table(t)
            )
        })
        .collect::<Vec<_>>()
        .join(" UNION ALL ")
        + " ORDER BY table_name"
}
