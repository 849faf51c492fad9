use serde::Serialize;
use sqlx::{FromRow, SqlitePool};

#[derive(FromRow, Serialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub total_blocks: i64,
    pub oldest_block: Option<i64>,
    pub latest_block: Option<i64>,
    pub blocks_without_epoch: i64,
    pub total_transactions: i64,
    pub total_validators: i64,
    pub total_proposals: i64,
    pub total_votes: i64,
    pub total_errors: i64,
}

pub async fn status(conn: &SqlitePool) -> anyhow::Result<Status> {
    Ok(sqlx::query_as::<_, Status>(
        "SELECT
            (SELECT count(*) FROM blocks) AS total_blocks,
            (SELECT min(block_height) FROM blocks) AS oldest_block,
            (SELECT max(block_height) FROM blocks) AS latest_block,
            (SELECT count(*) FROM blocks WHERE epoch IS NULL) AS blocks_without_epoch,
            (SELECT count(*) FROM transactions) AS total_transactions,
            (SELECT count(*) FROM validators) AS total_validators,
            (SELECT count(*) FROM proposals) AS total_proposals,
            (SELECT count(*) FROM votes) AS total_votes,
            (SELECT count(*) FROM error_log) AS total_errors;",
    )
    .fetch_one(conn)
    .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::memory_pool;

    #[tokio::test]
    async fn test_empty_status() {
        let pool = memory_pool().await;
        assert_eq!(status(&pool).await.unwrap(), Status::default());
    }
}
