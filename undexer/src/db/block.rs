use serde::Serialize;
use serde_json::Value;
use sqlx::{Executor, FromRow, Sqlite, SqliteConnection};
use undexer_core::{BlockHeader, RawResponses};

/// Where a page of a height-ordered listing starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cursor {
    Latest,
    /// At or below this value, newest first.
    Before(u64),
    /// At or above this value, oldest first.
    After(u64),
}

pub struct NewBlock<'a> {
    pub chain_id: &'a str,
    pub block_hash: &'a str,
    pub block_height: u64,
    pub block_time: Option<&'a str>,
    pub epoch: Option<u64>,
    pub header: &'a BlockHeader,
    pub rpc_responses: Option<&'a RawResponses>,
    pub block_data: Option<&'a Value>,
    pub block_results: Option<&'a Value>,
}

pub async fn insert(
    conn: impl Executor<'_, Database = Sqlite>,
    block: &NewBlock<'_>,
) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO blocks (block_hash, chain_id, block_height, block_time, epoch, block_header, rpc_responses, block_data, block_results)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?);",
    )
    .bind(block.block_hash)
    .bind(block.chain_id)
    .bind(block.block_height as i64)
    .bind(block.block_time)
    .bind(block.epoch.map(|e| e as i64))
    .bind(serde_json::to_string(block.header)?)
    .bind(serde_json::to_string(&block.rpc_responses)?)
    .bind(block.block_data.map(Value::to_string))
    .bind(block.block_results.map(Value::to_string))
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn latest_height(conn: impl Executor<'_, Database = Sqlite>) -> anyhow::Result<Option<u64>> {
    let (height,) = sqlx::query_as::<_, (Option<i64>,)>("SELECT max(block_height) FROM blocks;")
        .fetch_one(conn)
        .await?;
    Ok(height.map(|h| h as u64))
}

#[cfg(test)]
pub async fn oldest_height(conn: impl Executor<'_, Database = Sqlite>) -> anyhow::Result<Option<u64>> {
    let (height,) = sqlx::query_as::<_, (Option<i64>,)>("SELECT min(block_height) FROM blocks;")
        .fetch_one(conn)
        .await?;
    Ok(height.map(|h| h as u64))
}

/// The newest block still waiting for its epoch.
pub async fn next_without_epoch(
    conn: impl Executor<'_, Database = Sqlite>,
) -> anyhow::Result<Option<u64>> {
    let height = sqlx::query_as::<_, (i64,)>(
        "SELECT block_height FROM blocks WHERE epoch IS NULL ORDER BY block_height DESC LIMIT 1;",
    )
    .fetch_optional(conn)
    .await?;
    Ok(height.map(|(h,)| h as u64))
}

pub async fn set_epoch(
    conn: impl Executor<'_, Database = Sqlite>,
    height: u64,
    epoch: u64,
) -> anyhow::Result<()> {
    sqlx::query("UPDATE blocks SET epoch = ? WHERE block_height = ?;")
        .bind(epoch as i64)
        .bind(height as i64)
        .execute(conn)
        .await?;
    Ok(())
}

/// Remove every block, and its transactions, at or above `height`.
pub async fn delete_from(conn: &mut SqliteConnection, height: u64) -> anyhow::Result<u64> {
    sqlx::query("DELETE FROM transactions WHERE block_height >= ?;")
        .bind(height as i64)
        .execute(&mut *conn)
        .await?;
    let deleted = sqlx::query("DELETE FROM blocks WHERE block_height >= ?;")
        .bind(height as i64)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    Ok(deleted)
}

pub async fn delete_at(conn: &mut SqliteConnection, height: u64) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM transactions WHERE block_height = ?;")
        .bind(height as i64)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM blocks WHERE block_height = ?;")
        .bind(height as i64)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[derive(FromRow, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BlockSummary {
    pub block_height: i64,
    pub block_hash: String,
    pub block_time: Option<String>,
    pub epoch: Option<i64>,
    pub transaction_count: i64,
}

/// A page of blocks, optionally only those proposed by `proposer` (a consensus address).
pub async fn list(
    conn: impl Executor<'_, Database = Sqlite>,
    cursor: Cursor,
    limit: u32,
    proposer: Option<&str>,
) -> anyhow::Result<Vec<BlockSummary>> {
    let (filter, order, bound) = match cursor {
        Cursor::Latest => ("1", "DESC", 0),
        Cursor::Before(h) => ("b.block_height <= ?", "DESC", h),
        Cursor::After(h) => ("b.block_height >= ?", "ASC", h),
    };
    let sql = format!(
        "SELECT b.block_height, b.block_hash, b.block_time, b.epoch,
            (SELECT count(*) FROM transactions t WHERE t.block_height = b.block_height) AS transaction_count
        FROM blocks b
        WHERE {filter}
            AND (? IS NULL OR json_extract(b.block_header, '$.proposerAddress') = ?)
        ORDER BY b.block_height {order}
        LIMIT ?;"
    );
    let mut query = sqlx::query_as::<_, BlockSummary>(&sql);
    if cursor != Cursor::Latest {
        query = query.bind(bound as i64);
    }
    Ok(query
        .bind(proposer)
        .bind(proposer)
        .bind(limit)
        .fetch_all(conn)
        .await?)
}

pub async fn count(
    conn: impl Executor<'_, Database = Sqlite>,
    proposer: Option<&str>,
) -> anyhow::Result<i64> {
    let (count,) = sqlx::query_as::<_, (i64,)>(
        "SELECT count(*) FROM blocks
        WHERE ? IS NULL OR json_extract(block_header, '$.proposerAddress') = ?;",
    )
    .bind(proposer)
    .bind(proposer)
    .fetch_one(conn)
    .await?;
    Ok(count)
}

#[derive(FromRow, Debug)]
pub struct BlockRow {
    pub block_hash: String,
    pub chain_id: String,
    pub block_height: i64,
    pub block_time: Option<String>,
    pub epoch: Option<i64>,
    pub block_header: String,
    pub block_data: Option<String>,
}

impl BlockRow {
    pub fn header(&self) -> anyhow::Result<BlockHeader> {
        Ok(serde_json::from_str(&self.block_header)?)
    }

    pub fn block_data(&self) -> anyhow::Result<Option<Value>> {
        Ok(self
            .block_data
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?)
    }
}

const BLOCK_ROW: &str =
    "SELECT block_hash, chain_id, block_height, block_time, epoch, block_header, block_data FROM blocks";

/// Find a block by height and/or hash; with neither, the latest block.
pub async fn find(
    conn: impl Executor<'_, Database = Sqlite>,
    height: Option<u64>,
    hash: Option<&str>,
) -> anyhow::Result<Option<BlockRow>> {
    let sql = format!(
        "{BLOCK_ROW}
        WHERE (? IS NULL OR block_height = ?) AND (? IS NULL OR block_hash = ?)
        ORDER BY block_height DESC LIMIT 1;"
    );
    let height = height.map(|h| h as i64);
    Ok(sqlx::query_as::<_, BlockRow>(&sql)
        .bind(height)
        .bind(height)
        .bind(hash)
        .bind(hash)
        .fetch_optional(conn)
        .await?)
}

/// Height and decoded `/block` response of the latest `limit` blocks, newest first.
pub async fn latest_block_data(
    conn: impl Executor<'_, Database = Sqlite>,
    limit: u32,
) -> anyhow::Result<Vec<(u64, Option<Value>)>> {
    let rows = sqlx::query_as::<_, (i64, Option<String>)>(
        "SELECT block_height, block_data FROM blocks ORDER BY block_height DESC LIMIT ?;",
    )
    .bind(limit)
    .fetch_all(conn)
    .await?;
    rows.into_iter()
        .map(|(height, data)| -> anyhow::Result<_> {
            let data: Option<Value> = data.as_deref().map(serde_json::from_str).transpose()?;
            Ok((height as u64, data))
        })
        .collect()
}

#[derive(FromRow, Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EpochSummary {
    pub epoch: i64,
    pub min_block_height: i64,
    pub max_block_height: i64,
}

pub async fn epochs(
    conn: impl Executor<'_, Database = Sqlite>,
    cursor: Cursor,
    limit: u32,
) -> anyhow::Result<Vec<EpochSummary>> {
    let (filter, order, bound) = match cursor {
        Cursor::Latest => ("1", "DESC", 0),
        Cursor::Before(e) => ("epoch <= ?", "DESC", e),
        Cursor::After(e) => ("epoch >= ?", "ASC", e),
    };
    let sql = format!(
        "SELECT epoch, min(block_height) AS min_block_height, max(block_height) AS max_block_height
        FROM blocks
        WHERE epoch IS NOT NULL AND {filter}
        GROUP BY epoch
        ORDER BY epoch {order}
        LIMIT ?;"
    );
    let mut query = sqlx::query_as::<_, EpochSummary>(&sql);
    if cursor != Cursor::Latest {
        query = query.bind(bound as i64);
    }
    Ok(query.bind(limit).fetch_all(conn).await?)
}
