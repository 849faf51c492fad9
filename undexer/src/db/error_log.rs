use std::future::Future;

use serde::Serialize;
use serde_json::Value;
use sqlx::{Executor, FromRow, Sqlite, SqlitePool};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// What a failed unit of work was doing, stored alongside the error.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ErrorContext {
    pub update: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl ErrorContext {
    pub fn new(update: &'static str) -> ErrorContext {
        ErrorContext {
            update,
            ..Default::default()
        }
    }

    pub fn height(mut self, height: impl Into<Option<u64>>) -> ErrorContext {
        self.height = height.into();
        self
    }

    pub fn id(mut self, id: impl Into<Value>) -> ErrorContext {
        self.id = Some(id.into());
        self
    }
}

#[derive(FromRow, Debug)]
pub struct ErrorLogRow {
    pub id: i64,
    pub timestamp: String,
    pub message: String,
    pub stack: String,
    pub info: Option<String>,
}

/// Await `fut`; if it fails, record the error with its context in `error_log` and return it.
/// Any transaction opened inside `fut` has been dropped, and so rolled back, by then.
pub async fn with_error_log<T, F>(
    conn: &SqlitePool,
    context: ErrorContext,
    fut: F,
) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match fut.await {
        Ok(value) => Ok(value),
        Err(err) => {
            tracing::error!("Logging error to database ({}): {err:#}", context.update);
            if let Err(log_err) = insert(conn, &err, &context).await {
                tracing::error!("Failed to write error log: {log_err}");
            }
            Err(err)
        }
    }
}

pub async fn insert(
    conn: impl Executor<'_, Database = Sqlite>,
    err: &anyhow::Error,
    context: &ErrorContext,
) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO error_log (timestamp, message, stack, info) VALUES (?, ?, ?, ?);")
        .bind(OffsetDateTime::now_utc().format(&Rfc3339)?)
        .bind(err.to_string())
        .bind(format!("{err:?}"))
        .bind(serde_json::to_string(context)?)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn latest(
    conn: impl Executor<'_, Database = Sqlite>,
    limit: u32,
) -> anyhow::Result<Vec<ErrorLogRow>> {
    Ok(
        sqlx::query_as::<_, ErrorLogRow>("SELECT * FROM error_log ORDER BY id DESC LIMIT ?;")
            .bind(limit)
            .fetch_all(conn)
            .await?,
    )
}
