use std::collections::BTreeMap;
use std::fs;
use std::future::Future;
use std::path::PathBuf;
use std::str::FromStr;

use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, Sqlite, SqlitePool, TypeInfo, ValueRef, migrate::Migrator};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::debug;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const SQLITE_CONSTRAINT: i64 = 19;
const SQLITE_READONLY: i64 = 8;

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("failed to open database {location}: {source}")]
    Open {
        location: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("statement failed: {0}")]
    Statement(String),
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("write attempted through read-only access: {0}")]
    ReadOnly(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("column {column}: {reason}")]
    Decode { column: String, reason: String },
    #[error("database driver error: {0}")]
    Driver(String),
}

impl From<sqlx::Error> for SqlError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) => {
                let message = db.message().to_string();
                let primary_code = db
                    .code()
                    .and_then(|code| code.parse::<i64>().ok())
                    .map(|code| code & 0xff);
                let constraint = matches!(
                    db.kind(),
                    sqlx::error::ErrorKind::UniqueViolation
                        | sqlx::error::ErrorKind::ForeignKeyViolation
                        | sqlx::error::ErrorKind::NotNullViolation
                        | sqlx::error::ErrorKind::CheckViolation
                ) || primary_code == Some(SQLITE_CONSTRAINT);
                if constraint {
                    SqlError::Constraint(message)
                } else if primary_code == Some(SQLITE_READONLY) {
                    SqlError::ReadOnly(message)
                } else {
                    SqlError::Statement(message)
                }
            }
            sqlx::Error::Io(err) => SqlError::Io(err),
            sqlx::Error::ColumnDecode { index, source } => SqlError::Decode {
                column: index,
                reason: source.to_string(),
            },
            other => SqlError::Driver(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    File(PathBuf),
    Memory,
}

impl DatabaseLocation {
    pub fn describe(&self) -> String {
        match self {
            DatabaseLocation::File(path) => path.display().to_string(),
            DatabaseLocation::Memory => ":memory:".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Integer(if value { 1 } else { 0 })
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Real(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<&String> for SqlValue {
    fn from(value: &String) -> Self {
        SqlValue::Text(value.clone())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// A statement with its positional (`?1`, `?2`, ...) arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<SqlValue>) -> Self {
        self.args.push(value.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlRow {
    values: BTreeMap<String, SqlValue>,
}

impl SqlRow {
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.values.get(column)
    }

    fn value(&self, column: &str) -> Result<&SqlValue, SqlError> {
        self.values.get(column).ok_or_else(|| SqlError::Decode {
            column: column.to_string(),
            reason: "missing column".to_string(),
        })
    }

    pub fn text(&self, column: &str) -> Result<String, SqlError> {
        self.opt_text(column)?.ok_or_else(|| mismatch(column, "text"))
    }

    pub fn opt_text(&self, column: &str) -> Result<Option<String>, SqlError> {
        match self.value(column)? {
            SqlValue::Null => Ok(None),
            SqlValue::Text(value) => Ok(Some(value.clone())),
            _ => Err(mismatch(column, "text")),
        }
    }

    pub fn integer(&self, column: &str) -> Result<i64, SqlError> {
        self.opt_integer(column)?
            .ok_or_else(|| mismatch(column, "integer"))
    }

    pub fn opt_integer(&self, column: &str) -> Result<Option<i64>, SqlError> {
        match self.value(column)? {
            SqlValue::Null => Ok(None),
            SqlValue::Integer(value) => Ok(Some(*value)),
            _ => Err(mismatch(column, "integer")),
        }
    }

    pub fn flag(&self, column: &str) -> Result<bool, SqlError> {
        Ok(self.integer(column)? != 0)
    }
}

fn mismatch(column: &str, expected: &str) -> SqlError {
    SqlError::Decode {
        column: column.to_string(),
        reason: format!("expected {expected}"),
    }
}

/// Single-connection SQLite executor.
///
/// The database is opened on first use and the one pooled connection is
/// never recycled, so an in-memory database lives as long as the executor.
pub struct SqlExecutor {
    location: DatabaseLocation,
    pool: OnceCell<SqlitePool>,
}

impl SqlExecutor {
    pub fn new(location: DatabaseLocation) -> Self {
        Self {
            location,
            pool: OnceCell::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(DatabaseLocation::Memory)
    }

    pub fn location(&self) -> &DatabaseLocation {
        &self.location
    }

    pub async fn open(&self) -> Result<String, SqlError> {
        self.pool().await?;
        Ok(self.location.describe())
    }

    pub async fn migrate(&self) -> Result<(), SqlError> {
        let pool = self.pool().await?.clone();
        detached(async move {
            MIGRATOR.run(&pool).await?;
            Ok(())
        })
        .await
    }

    async fn pool(&self) -> Result<&SqlitePool, SqlError> {
        self.pool
            .get_or_try_init(|| connect(&self.location))
            .await
    }

    pub async fn execute(
        &self,
        statement: &str,
        args: &[SqlValue],
        read_only: bool,
    ) -> Result<Vec<SqlRow>, SqlError> {
        if read_only {
            self.execute_read_only(statement, args).await
        } else {
            self.execute_write(statement, args).await
        }
    }

    pub async fn read(&self, statement: &Statement) -> Result<Vec<SqlRow>, SqlError> {
        self.execute(&statement.sql, &statement.args, true).await
    }

    pub async fn read_one(&self, statement: &Statement) -> Result<Option<SqlRow>, SqlError> {
        Ok(self.read(statement).await?.into_iter().next())
    }

    pub async fn write(&self, statement: &Statement) -> Result<Vec<SqlRow>, SqlError> {
        self.execute(&statement.sql, &statement.args, false).await
    }

    /// Runs every statement in one transaction; nothing is applied if any fails.
    pub async fn transaction(
        &self,
        statements: &[Statement],
    ) -> Result<Vec<Vec<SqlRow>>, SqlError> {
        let pool = self.pool().await?.clone();
        let statements = statements.to_vec();
        detached(async move {
            let mut tx = pool.begin().await?;
            let mut results = Vec::with_capacity(statements.len());
            for statement in &statements {
                let rows = bind_args(sqlx::query(&statement.sql), &statement.args)
                    .fetch_all(&mut *tx)
                    .await?;
                results.push(decode_rows(&rows)?);
            }
            tx.commit().await?;
            Ok(results)
        })
        .await
    }

    async fn execute_read_only(
        &self,
        statement: &str,
        args: &[SqlValue],
    ) -> Result<Vec<SqlRow>, SqlError> {
        let pool = self.pool().await?.clone();
        let (statement, args) = (statement.to_string(), args.to_vec());
        detached(async move {
            let mut conn = pool.acquire().await?;
            sqlx::query("PRAGMA query_only = ON")
                .execute(&mut *conn)
                .await?;
            let result = bind_args(sqlx::query(&statement), &args)
                .fetch_all(&mut *conn)
                .await;
            sqlx::query("PRAGMA query_only = OFF")
                .execute(&mut *conn)
                .await?;
            decode_rows(&result?)
        })
        .await
    }

    async fn execute_write(
        &self,
        statement: &str,
        args: &[SqlValue],
    ) -> Result<Vec<SqlRow>, SqlError> {
        let pool = self.pool().await?.clone();
        let (statement, args) = (statement.to_string(), args.to_vec());
        detached(async move {
            let mut tx = pool.begin().await?;
            let rows = bind_args(sqlx::query(&statement), &args)
                .fetch_all(&mut *tx)
                .await?;
            tx.commit().await?;
            decode_rows(&rows)
        })
        .await
    }
}

/// Runs storage work on its own task. A caller dropping its future must not
/// interrupt a statement: the pool would discard its only connection, and with
/// it an in-memory database.
async fn detached<T, Fut>(work: Fut) -> Result<T, SqlError>
where
    Fut: Future<Output = Result<T, SqlError>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(work)
        .await
        .map_err(|err| SqlError::Driver(format!("storage task failed: {err}")))?
}

async fn connect(location: &DatabaseLocation) -> Result<SqlitePool, SqlError> {
    let options = match location {
        DatabaseLocation::File(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        }
        DatabaseLocation::Memory => {
            SqliteConnectOptions::from_str("sqlite::memory:").map_err(|source| SqlError::Open {
                location: location.describe(),
                source,
            })?
        }
    }
    .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .map_err(|source| SqlError::Open {
            location: location.describe(),
            source,
        })?;
    debug!(database = %location.describe(), "database opened");
    Ok(pool)
}

fn bind_args<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    args: &'q [SqlValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for arg in args {
        query = match arg {
            SqlValue::Null => query.bind(None::<i64>),
            SqlValue::Integer(value) => query.bind(*value),
            SqlValue::Real(value) => query.bind(*value),
            SqlValue::Text(value) => query.bind(value.as_str()),
            SqlValue::Blob(value) => query.bind(value.as_slice()),
        };
    }
    query
}

fn decode_rows(rows: &[SqliteRow]) -> Result<Vec<SqlRow>, SqlError> {
    rows.iter().map(decode_row).collect()
}

fn decode_row(row: &SqliteRow) -> Result<SqlRow, SqlError> {
    let mut values = BTreeMap::new();
    for column in row.columns() {
        let index = column.ordinal();
        let raw = row.try_get_raw(index)?;
        let value = if raw.is_null() {
            SqlValue::Null
        } else {
            let type_name = raw.type_info().name().to_string();
            match type_name.as_str() {
                "INTEGER" | "BOOLEAN" | "DATE" | "TIME" | "DATETIME" => {
                    SqlValue::Integer(row.try_get_unchecked::<i64, _>(index)?)
                }
                "REAL" => SqlValue::Real(row.try_get_unchecked::<f64, _>(index)?),
                "BLOB" => SqlValue::Blob(row.try_get_unchecked::<Vec<u8>, _>(index)?),
                _ => SqlValue::Text(row.try_get_unchecked::<String, _>(index)?),
            }
        };
        values.insert(column.name().to_string(), value);
    }
    Ok(SqlRow { values })
}
