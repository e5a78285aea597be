//! PostgreSQL-wire warehouse target operations.

pub mod tls;

pub use tls::SslMode;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use futures::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio_postgres::types::Type;
use tokio_postgres::{Config as PgConfig, NoTls, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::TargetConfig;
use crate::core::identifier::fold_name;
use crate::core::{
    ExecutionResult, QualifiedName, RowBatch, RowStream, SqlValue, TargetWriter, WriteMethod,
};
use crate::error::{MigrateError, Result};
use crate::transfer::encode::{build_insert, copy_statement, encode_csv};

/// Rows buffered between the cursor task and the consumer.
const ROW_BUFFER: usize = 1024;

const LOOKUP_TABLE_SQL: &str = "SELECT table_schema::text, table_name::text \
     FROM information_schema.tables \
     WHERE upper(table_schema::text) = upper($1::text) \
       AND upper(table_name::text) = upper($2::text) \
     ORDER BY (table_schema::text = $1::text AND table_name::text = $2::text) DESC \
     LIMIT 1";

const TABLE_COLUMNS_SQL: &str = "SELECT column_name::text \
     FROM information_schema.columns \
     WHERE table_schema = $1 AND table_name = $2 \
     ORDER BY ordinal_position";

/// Catalog spelling of a table and its columns.
#[derive(Debug)]
struct CatalogTable {
    name: QualifiedName,
    columns: Vec<String>,
}

/// Target spelling of each of `wanted`, matched against `catalog` ignoring case.
///
/// An exact spelling wins over a case-folded one. A name with no match, or
/// with several case-folded matches, is an error.
pub(crate) fn resolve_columns(
    table: &QualifiedName,
    wanted: &[String],
    catalog: &[String],
) -> Result<Vec<String>> {
    wanted
        .iter()
        .map(|name| {
            if catalog.contains(name) {
                return Ok(name.clone());
            }
            let key = fold_name(name);
            let mut folded = catalog.iter().filter(|c| fold_name(c) == key);
            match (folded.next(), folded.next()) {
                (Some(found), None) => Ok(found.clone()),
                (None, _) => Err(MigrateError::pool(
                    format!("column {:?} of relation {} does not exist", name, table),
                    "resolving target columns",
                )),
                (Some(_), Some(_)) => Err(MigrateError::pool(
                    format!("column {:?} of relation {} is ambiguous ignoring case", name, table),
                    "resolving target columns",
                )),
            }
        })
        .collect()
}

/// Warehouse target backed by a deadpool-postgres pool.
pub struct PgTarget {
    pool: Pool,
    /// Catalog spellings looked up by the write path, keyed by requested name.
    catalog: Mutex<HashMap<QualifiedName, Arc<CatalogTable>>>,
}

impl PgTarget {
    /// Connect with at most `max_conns` pooled connections.
    pub async fn connect(config: &TargetConfig, max_conns: usize) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.application_name("mssql-warehouse-migrate");

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let ssl_mode: SslMode = config.ssl_mode.parse()?;
        let mgr = match tls::connector(ssl_mode)? {
            Some(tls) => Manager::from_config(pg_config, tls, mgr_config),
            None => Manager::from_config(pg_config, NoTls, mgr_config),
        };
        let pool = Pool::builder(mgr)
            .max_size(max_conns)
            .build()
            .map_err(|e| MigrateError::pool(e.to_string(), "creating target pool"))?;

        info!(
            "Target pool ready: {}:{}/{} (ssl_mode={:?}, pool_size={})",
            config.host, config.port, config.database, ssl_mode, max_conns
        );

        Ok(Self {
            pool,
            catalog: Mutex::new(HashMap::new()),
        })
    }

    async fn get_client(&self) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e.to_string(), "getting target connection"))
    }

    /// Catalog spelling of `table`, matched case-insensitively.
    ///
    /// An exact match wins over a case-folded one.
    async fn lookup(&self, client: &Object, table: &QualifiedName) -> Result<Option<QualifiedName>> {
        let row = client
            .query_opt(LOOKUP_TABLE_SQL, &[&table.schema, &table.name])
            .await?;
        Ok(row.map(|r| QualifiedName::new(r.get::<_, String>(0), r.get::<_, String>(1))))
    }

    /// Catalog spelling of `table`; falls back to the name as given.
    async fn resolve(&self, client: &Object, table: &QualifiedName) -> Result<QualifiedName> {
        Ok(self
            .lookup(client, table)
            .await?
            .unwrap_or_else(|| table.clone()))
    }

    /// Catalog spelling of `table` and its columns, cached after the first lookup.
    async fn catalog_table(
        &self,
        client: &Object,
        table: &QualifiedName,
    ) -> Result<Arc<CatalogTable>> {
        if let Some(found) = self.cached(table) {
            return Ok(found);
        }

        let name = self.lookup(client, table).await?.ok_or_else(|| {
            MigrateError::pool(
                format!("relation {} does not exist", table),
                "resolving target table",
            )
        })?;
        let columns = client
            .query(TABLE_COLUMNS_SQL, &[&name.schema, &name.name])
            .await?
            .iter()
            .map(|row| row.get::<_, String>(0))
            .collect();
        let found = Arc::new(CatalogTable { name, columns });
        debug!("{}: target columns {:?}", found.name, found.columns);

        if let Ok(mut cache) = self.catalog.lock() {
            cache.insert(table.clone(), found.clone());
        }
        Ok(found)
    }

    fn cached(&self, table: &QualifiedName) -> Option<Arc<CatalogTable>> {
        self.catalog.lock().ok()?.get(table).cloned()
    }
}

#[async_trait]
impl TargetWriter for PgTarget {
    async fn table_exists(&self, table: &QualifiedName) -> Result<bool> {
        let client = self.get_client().await?;
        Ok(self.lookup(&client, table).await?.is_some())
    }

    async fn execute_ddl(&self, ddl: &str) -> Result<ExecutionResult> {
        let client = self.get_client().await?;
        match client.batch_execute(ddl).await {
            Ok(()) => {
                if let Ok(mut cache) = self.catalog.lock() {
                    cache.clear();
                }
                Ok(ExecutionResult::Success)
            }
            Err(e) => match e.as_db_error() {
                Some(db) => Ok(ExecutionResult::failure(db.to_string())),
                None if e.is_closed() => Err(MigrateError::Target(e)),
                None => Ok(ExecutionResult::failure(e.to_string())),
            },
        }
    }

    async fn truncate_table(&self, table: &QualifiedName) -> Result<()> {
        let client = self.get_client().await?;
        let name = self.resolve(&client, table).await?;
        client
            .batch_execute(&format!("TRUNCATE TABLE {}", name.quote_pg()?))
            .await?;
        debug!("Truncated table {}", name);
        Ok(())
    }

    async fn write_batch(
        &self,
        table: &QualifiedName,
        batch: &RowBatch,
        method: WriteMethod,
    ) -> Result<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let client = self.get_client().await?;
        let catalog = self.catalog_table(&client, table).await?;
        let name = &catalog.name;
        let columns = resolve_columns(name, &batch.columns, &catalog.columns)?;

        match method {
            WriteMethod::Copy => {
                let stmt = copy_statement(name, &columns)?;
                let sink = client.copy_in::<_, Bytes>(stmt.as_str()).await?;
                futures::pin_mut!(sink);
                sink.send(Bytes::from(encode_csv(batch))).await?;
                let copied = sink.finish().await?;
                debug!("{}: COPY batch {} ({} rows)", name, batch.seq, copied);
                Ok(copied)
            }
            WriteMethod::Insert => {
                let sql = build_insert(name, &columns, batch)?;
                let inserted = client.execute(sql.as_str(), &[]).await?;
                debug!("{}: INSERT batch {} ({} rows)", name, batch.seq, inserted);
                Ok(inserted)
            }
        }
    }

    async fn query_rows(&self, table: &QualifiedName) -> Result<RowStream> {
        let client = self.get_client().await?;
        let name = match self.lookup(&client, table).await? {
            Some(name) => name,
            None => {
                return Err(MigrateError::pool(
                    format!("relation {} does not exist", table),
                    "reading target rows",
                ))
            }
        };

        let stmt = client
            .prepare(&format!("SELECT * FROM {}", name.quote_pg()?))
            .await?;
        let columns: Vec<String> = stmt.columns().iter().map(|c| c.name().to_string()).collect();

        let (tx, rx) = mpsc::channel::<Result<Vec<SqlValue>>>(ROW_BUFFER);
        tokio::spawn(async move {
            let result: Result<()> = async {
                let rows = client.query_raw(&stmt, std::iter::empty::<String>()).await?;
                futures::pin_mut!(rows);
                while let Some(row) = rows.next().await {
                    let values = convert_row(&row?)?;
                    if tx.send(Ok(values)).await.is_err() {
                        return Ok(());
                    }
                }
                Ok(())
            }
            .await;

            if let Err(e) = result {
                debug!("{}: target cursor failed: {}", name, e);
                let _ = tx.send(Err(e)).await;
            }
        });

        let rows = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();

        Ok(RowStream { columns, rows })
    }

    async fn ping(&self) -> Result<()> {
        let client = self.get_client().await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }
}

fn convert_row(row: &Row) -> Result<Vec<SqlValue>> {
    (0..row.len()).map(|idx| convert_value(row, idx)).collect()
}

/// Convert one column of a result row based on its wire type.
fn convert_value(row: &Row, idx: usize) -> Result<SqlValue> {
    let ty = row.columns()[idx].type_().clone();
    let value = match ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(SqlValue::Bool),
        Type::INT2 => row.try_get::<_, Option<i16>>(idx)?.map(SqlValue::I16),
        Type::INT4 => row.try_get::<_, Option<i32>>(idx)?.map(SqlValue::I32),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(SqlValue::I64),
        Type::FLOAT4 => row.try_get::<_, Option<f32>>(idx)?.map(SqlValue::F32),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(SqlValue::F64),
        Type::NUMERIC => row.try_get::<_, Option<Decimal>>(idx)?.map(SqlValue::Decimal),
        Type::BYTEA => row.try_get::<_, Option<Vec<u8>>>(idx)?.map(SqlValue::Bytes),
        Type::UUID => row.try_get::<_, Option<Uuid>>(idx)?.map(SqlValue::Uuid),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(SqlValue::DateTime),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(|dt| SqlValue::DateTimeOffset(dt.fixed_offset())),
        Type::DATE => row.try_get::<_, Option<NaiveDate>>(idx)?.map(SqlValue::Date),
        Type::TIME => row.try_get::<_, Option<NaiveTime>>(idx)?.map(SqlValue::Time),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)?
            .map(|v| SqlValue::Text(v.to_string())),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => row
            .try_get::<_, Option<String>>(idx)?
            .map(SqlValue::Text),
        other => {
            return Err(MigrateError::pool(
                format!(
                    "unsupported type {} for column {}",
                    other,
                    row.columns()[idx].name()
                ),
                "reading target rows",
            ))
        }
    };
    Ok(value.unwrap_or(SqlValue::Null))
}
