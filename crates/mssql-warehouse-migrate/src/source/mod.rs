//! MSSQL source database operations.

use std::sync::Arc;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use futures::StreamExt;
use rust_decimal::Decimal;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, Query, Row};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::SourceConfig;
use crate::core::identifier::quote_mssql;
use crate::core::{Column, QualifiedName, RowStream, SchemaDefinition, SourceReader, SqlValue};
use crate::error::{MigrateError, Result};

/// Rows buffered between the cursor task and the consumer.
const ROW_BUFFER: usize = 1024;

/// Connection manager for bb8 pool with tiberius.
#[derive(Clone)]
struct TiberiusConnectionManager {
    config: SourceConfig,
}

impl TiberiusConnectionManager {
    fn new(config: SourceConfig) -> Self {
        Self { config }
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(&self.config.user, &self.config.password));

        match self.config.encrypt.to_lowercase().as_str() {
            "false" | "no" | "0" | "disable" => {
                config.encryption(EncryptionLevel::NotSupported);
            }
            _ => {
                if self.config.trust_server_cert {
                    config.trust_cert();
                }
                config.encryption(EncryptionLevel::Required);
            }
        }

        config
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = Client<Compat<TcpStream>>;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            })?;

        tcp.set_nodelay(true).ok();

        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// MSSQL source backed by a bb8 connection pool.
pub struct MssqlSource {
    pool: Pool<TiberiusConnectionManager>,
}

impl MssqlSource {
    /// Connect with at most `max_size` pooled connections.
    pub async fn connect(config: &SourceConfig, max_size: u32) -> Result<Self> {
        let manager = TiberiusConnectionManager::new(config.clone());
        let pool = Pool::builder()
            .max_size(max_size)
            .build(manager)
            .await
            .map_err(|e| MigrateError::pool(e.to_string(), "creating MSSQL source pool"))?;

        info!(
            "MSSQL source pool ready: {}:{}/{} (pool_size={})",
            config.host, config.port, config.database, max_size
        );

        Ok(Self { pool })
    }

    async fn get_client(&self) -> Result<PooledConnection<'_, TiberiusConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e.to_string(), "getting MSSQL source connection"))
    }

    /// Load column metadata in ordinal order. Empty when the table is unknown.
    async fn load_columns(&self, table: &QualifiedName) -> Result<Vec<Column>> {
        let mut conn = self.get_client().await?;
        let client = &mut *conn;

        let sql = r#"
            SELECT
                COLUMN_NAME,
                DATA_TYPE,
                CAST(ISNULL(CHARACTER_MAXIMUM_LENGTH, 0) AS INT),
                CAST(ISNULL(NUMERIC_PRECISION, ISNULL(DATETIME_PRECISION, 0)) AS INT),
                CAST(ISNULL(NUMERIC_SCALE, ISNULL(DATETIME_PRECISION, 0)) AS INT),
                CASE WHEN IS_NULLABLE = 'YES' THEN 1 ELSE 0 END,
                COLUMN_DEFAULT,
                ORDINAL_POSITION
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2
            ORDER BY ORDINAL_POSITION
        "#;

        let mut query = Query::new(sql);
        query.bind(table.schema.as_str());
        query.bind(table.name.as_str());

        let rows = query.query(client).await?.into_first_result().await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            columns.push(Column {
                name: row.try_get::<&str, _>(0)?.unwrap_or_default().to_string(),
                source_type: row.try_get::<&str, _>(1)?.unwrap_or_default().to_string(),
                max_length: row.try_get::<i32, _>(2)?.unwrap_or(0),
                precision: row.try_get::<i32, _>(3)?.unwrap_or(0),
                scale: row.try_get::<i32, _>(4)?.unwrap_or(0),
                nullable: row.try_get::<i32, _>(5)?.unwrap_or(0) == 1,
                default_expr: row.try_get::<&str, _>(6)?.map(str::to_string),
                ordinal_pos: row.try_get::<i32, _>(7)?.unwrap_or(0),
            });
        }

        debug!("Loaded {} columns for {}", columns.len(), table);
        Ok(columns)
    }
}

#[async_trait]
impl SourceReader for MssqlSource {
    async fn fetch_schema(&self, table: &QualifiedName) -> Result<SchemaDefinition> {
        let columns = self.load_columns(table).await.map_err(|e| match e {
            MigrateError::Source(e) => MigrateError::schema(table.to_string(), e.to_string()),
            other => other,
        })?;
        if columns.is_empty() {
            return Err(MigrateError::schema(
                table.to_string(),
                "table not found or has no visible columns",
            ));
        }
        SchemaDefinition::from_columns(table, columns)
    }

    async fn read_rows(&self, table: &QualifiedName) -> Result<RowStream> {
        let columns = self.load_columns(table).await?;
        if columns.is_empty() {
            return Err(MigrateError::schema(table.to_string(), "table not found"));
        }
        let sql = select_sql(table, &columns)?;
        let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        let types: Arc<[String]> = columns
            .iter()
            .map(|c| c.source_type.to_lowercase())
            .collect();

        let mut conn = self
            .pool
            .get_owned()
            .await
            .map_err(|e| MigrateError::pool(e.to_string(), "getting MSSQL read connection"))?;

        let (tx, rx) = mpsc::channel::<Result<Vec<SqlValue>>>(ROW_BUFFER);
        let table_name = table.to_string();
        tokio::spawn(async move {
            let result: Result<()> = async {
                let mut rows = conn.simple_query(sql).await?.into_row_stream();
                while let Some(row) = rows.next().await {
                    let values = convert_row(&row?, &types)?;
                    if tx.send(Ok(values)).await.is_err() {
                        // Consumer dropped the stream.
                        return Ok(());
                    }
                }
                Ok(())
            }
            .await;

            if let Err(e) = result {
                debug!("{}: source cursor failed: {}", table_name, e);
                let _ = tx.send(Err(e)).await;
            }
        });

        let rows = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();

        Ok(RowStream {
            columns: names,
            rows,
        })
    }

    async fn ping(&self) -> Result<()> {
        let mut client = self.get_client().await?;
        client.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }
}

/// Full-table SELECT with an explicit column list. No ordering.
fn select_sql(table: &QualifiedName, columns: &[Column]) -> Result<String> {
    let list = columns
        .iter()
        .map(|c| quote_mssql(&c.name))
        .collect::<Result<Vec<_>>>()?
        .join(", ");
    Ok(format!(
        "SELECT {} FROM {}",
        list,
        table.quote_mssql()?
    ))
}

fn convert_row(row: &Row, types: &[String]) -> Result<Vec<SqlValue>> {
    types
        .iter()
        .enumerate()
        .map(|(idx, ty)| convert_row_value(row, idx, ty))
        .collect()
}

/// Convert a row value to SqlValue based on the column type.
fn convert_row_value(row: &Row, idx: usize, data_type: &str) -> Result<SqlValue> {
    let value = match data_type {
        "bit" => row.try_get::<bool, _>(idx)?.map(SqlValue::Bool),
        "tinyint" => row
            .try_get::<u8, _>(idx)?
            .map(|v| SqlValue::I16(i16::from(v))),
        "smallint" => row.try_get::<i16, _>(idx)?.map(SqlValue::I16),
        "int" => row.try_get::<i32, _>(idx)?.map(SqlValue::I32),
        "bigint" => row.try_get::<i64, _>(idx)?.map(SqlValue::I64),
        "real" => row.try_get::<f32, _>(idx)?.map(SqlValue::F32),
        "float" => row.try_get::<f64, _>(idx)?.map(SqlValue::F64),
        "decimal" | "numeric" => row.try_get::<Decimal, _>(idx)?.map(SqlValue::Decimal),
        "money" | "smallmoney" => row
            .try_get::<f64, _>(idx)?
            .map(|f| Decimal::try_from(f).map(SqlValue::Decimal).unwrap_or(SqlValue::F64(f))),
        "uniqueidentifier" => row.try_get::<Uuid, _>(idx)?.map(SqlValue::Uuid),
        "datetime" | "datetime2" | "smalldatetime" => row
            .try_get::<NaiveDateTime, _>(idx)?
            .map(SqlValue::DateTime),
        "datetimeoffset" => row
            .try_get::<DateTime<FixedOffset>, _>(idx)?
            .map(SqlValue::DateTimeOffset),
        "date" => row.try_get::<NaiveDate, _>(idx)?.map(SqlValue::Date),
        "time" => row.try_get::<NaiveTime, _>(idx)?.map(SqlValue::Time),
        "binary" | "varbinary" | "image" | "timestamp" | "rowversion" => row
            .try_get::<&[u8], _>(idx)?
            .map(|v| SqlValue::Bytes(v.to_vec())),
        // varchar, nvarchar, char, nchar, text, ntext, xml, sql_variant (as text)
        _ => row
            .try_get::<&str, _>(idx)?
            .map(|s| SqlValue::Text(s.to_string())),
    };
    Ok(value.unwrap_or(SqlValue::Null))
}
