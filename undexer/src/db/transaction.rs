use serde::Serialize;
use serde_json::Value;
use sqlx::{Executor, FromRow, Sqlite};
use undexer_core::ChainTransaction;

pub struct NewTransaction<'a> {
    pub chain_id: Option<&'a str>,
    pub block_hash: &'a str,
    pub block_height: u64,
    pub block_time: Option<&'a str>,
    pub transaction: &'a ChainTransaction,
}

pub async fn insert(
    conn: impl Executor<'_, Database = Sqlite>,
    tx: &NewTransaction<'_>,
) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO transactions (tx_hash, chain_id, block_hash, block_height, block_time, tx_time, tx_data)
        VALUES (?, ?, ?, ?, ?, ?, ?);",
    )
    .bind(&tx.transaction.id)
    .bind(tx.chain_id)
    .bind(tx.block_hash)
    .bind(tx.block_height as i64)
    .bind(tx.block_time)
    .bind(tx.transaction.data.timestamp.as_deref())
    .bind(serde_json::to_string(tx.transaction)?)
    .execute(conn)
    .await?;
    Ok(())
}

#[derive(FromRow, Debug)]
pub struct TransactionRow {
    pub tx_hash: String,
    pub chain_id: Option<String>,
    pub block_hash: String,
    pub block_height: i64,
    pub block_time: Option<String>,
    pub tx_time: Option<String>,
    pub tx_data: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TransactionView {
    pub tx_hash: String,
    pub chain_id: Option<String>,
    pub block_hash: String,
    pub block_height: i64,
    pub block_time: Option<String>,
    pub tx_time: Option<String>,
    pub tx_data: Value,
}

impl TryFrom<TransactionRow> for TransactionView {
    type Error = anyhow::Error;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(TransactionView {
            tx_data: serde_json::from_str(&row.tx_data)?,
            tx_hash: row.tx_hash,
            chain_id: row.chain_id,
            block_hash: row.block_hash,
            block_height: row.block_height,
            block_time: row.block_time,
            tx_time: row.tx_time,
        })
    }
}

fn into_views(rows: Vec<TransactionRow>) -> anyhow::Result<Vec<TransactionView>> {
    rows.into_iter().map(TransactionView::try_from).collect()
}

pub async fn find(
    conn: impl Executor<'_, Database = Sqlite>,
    hash: &str,
) -> anyhow::Result<Option<TransactionView>> {
    sqlx::query_as::<_, TransactionRow>("SELECT * FROM transactions WHERE tx_hash = ?;")
        .bind(hash)
        .fetch_optional(conn)
        .await?
        .map(TransactionView::try_from)
        .transpose()
}

pub async fn at_height(
    conn: impl Executor<'_, Database = Sqlite>,
    height: u64,
) -> anyhow::Result<Vec<TransactionView>> {
    let rows = sqlx::query_as::<_, TransactionRow>(
        "SELECT * FROM transactions WHERE block_height = ? ORDER BY rowid;",
    )
    .bind(height as i64)
    .fetch_all(conn)
    .await?;
    into_views(rows)
}

pub async fn list(
    conn: impl Executor<'_, Database = Sqlite>,
    offset: u32,
    limit: u32,
) -> anyhow::Result<Vec<TransactionView>> {
    let rows = sqlx::query_as::<_, TransactionRow>(
        "SELECT * FROM transactions ORDER BY block_height DESC, tx_time DESC LIMIT ? OFFSET ?;",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(conn)
    .await?;
    into_views(rows)
}

pub async fn count(conn: impl Executor<'_, Database = Sqlite>) -> anyhow::Result<i64> {
    let (count,) = sqlx::query_as::<_, (i64,)>("SELECT count(*) FROM transactions;")
        .fetch_one(conn)
        .await?;
    Ok(count)
}

#[derive(FromRow, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSummary {
    pub block_height: i64,
    pub block_hash: String,
    pub block_time: Option<String>,
    pub tx_hash: String,
    pub tx_time: Option<String>,
    pub tx_content_type: Option<String>,
}

pub async fn latest(
    conn: impl Executor<'_, Database = Sqlite>,
    limit: u32,
) -> anyhow::Result<Vec<TransactionSummary>> {
    Ok(sqlx::query_as::<_, TransactionSummary>(
        "SELECT block_height, block_hash, block_time, tx_hash, tx_time,
            json_extract(tx_data, '$.data.content.type') AS tx_content_type
        FROM transactions ORDER BY block_height DESC LIMIT ?;",
    )
    .bind(limit)
    .fetch_all(conn)
    .await?)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::{memory_pool, transaction};

    #[tokio::test]
    async fn test_insert_and_find() {
        let pool = memory_pool().await;
        let bond = transaction("tx1", json!({ "type": "tx_bond.wasm", "data": { "amount": "5" } }));
        let bare: ChainTransaction = serde_json::from_value(json!({
            "id": "tx2",
            "data": { "sections": [{ "type": "Mystery" }] }
        }))
        .unwrap();
        for (height, tx) in [(7, &bond), (8, &bare)] {
            insert(
                &pool,
                &NewTransaction {
                    chain_id: Some("test-chain"),
                    block_hash: "HASH",
                    block_height: height,
                    block_time: None,
                    transaction: tx,
                },
            )
            .await
            .unwrap();
        }

        let found = find(&pool, "tx1").await.unwrap().unwrap();
        assert_eq!(found.block_height, 7);
        assert_eq!(found.tx_data["data"]["content"]["type"], json!("tx_bond.wasm"));
        assert_eq!(found.tx_data["data"]["content"]["data"]["amount"], json!("5"));
        assert!(find(&pool, "tx3").await.unwrap().is_none());

        let unknown = find(&pool, "tx2").await.unwrap().unwrap();
        assert_eq!(unknown.tx_data["data"]["sections"][0]["type"], json!("Mystery"));

        assert_eq!(at_height(&pool, 7).await.unwrap().len(), 1);
        let page = list(&pool, 0, 10).await.unwrap();
        assert_eq!(page[0].tx_hash, "tx2");
        assert_eq!(count(&pool).await.unwrap(), 2);

        let summary = latest(&pool, 10).await.unwrap();
        assert_eq!(summary[1].tx_content_type.as_deref(), Some("tx_bond.wasm"));
        assert_eq!(summary[0].tx_content_type, None);
    }
}
