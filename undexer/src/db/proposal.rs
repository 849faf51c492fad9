use serde::Serialize;
use serde_json::Value;
use sqlx::{Executor, FromRow, Sqlite, SqliteConnection};
use undexer_core::{ProposalMetadata, ProposalWasm};

/// Replace the stored proposal `id` and all of its votes.
pub async fn replace(
    conn: &mut SqliteConnection,
    id: u64,
    content: &Value,
    metadata: &ProposalMetadata,
    result: Option<&Value>,
    votes: &[Value],
) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM proposals WHERE id = ?;")
        .bind(id as i64)
        .execute(&mut *conn)
        .await?;
    sqlx::query("INSERT INTO proposals (id, content, metadata, result) VALUES (?, ?, ?, ?);")
        .bind(id as i64)
        .bind(content.to_string())
        .bind(serde_json::to_string(metadata)?)
        .bind(result.map(Value::to_string))
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM votes WHERE proposal_id = ?;")
        .bind(id as i64)
        .execute(&mut *conn)
        .await?;
    for vote in votes {
        sqlx::query("INSERT INTO votes (proposal_id, data) VALUES (?, ?);")
            .bind(id as i64)
            .bind(vote.to_string())
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

pub async fn replace_wasm(conn: &mut SqliteConnection, wasm: &ProposalWasm) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM proposal_wasm WHERE id = ?;")
        .bind(wasm.id as i64)
        .execute(&mut *conn)
        .await?;
    sqlx::query("INSERT INTO proposal_wasm (id, code_key, wasm) VALUES (?, ?, ?);")
        .bind(wasm.id as i64)
        .bind(&wasm.code_key)
        .bind(&wasm.wasm)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn find_wasm(
    conn: impl Executor<'_, Database = Sqlite>,
    id: u64,
) -> anyhow::Result<Option<ProposalWasm>> {
    let row = sqlx::query_as::<_, (String, Vec<u8>)>(
        "SELECT code_key, wasm FROM proposal_wasm WHERE id = ?;",
    )
    .bind(id as i64)
    .fetch_optional(conn)
    .await?;
    Ok(row.map(|(code_key, wasm)| ProposalWasm { id, code_key, wasm }))
}

#[derive(FromRow, Debug)]
struct ProposalRow {
    id: i64,
    content: String,
    metadata: String,
    result: Option<String>,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct ProposalView {
    pub id: i64,
    pub content: Value,
    pub metadata: Value,
    pub result: Option<Value>,
}

impl TryFrom<ProposalRow> for ProposalView {
    type Error = anyhow::Error;

    fn try_from(row: ProposalRow) -> Result<Self, Self::Error> {
        Ok(ProposalView {
            id: row.id,
            content: serde_json::from_str(&row.content)?,
            metadata: serde_json::from_str(&row.metadata)?,
            result: row.result.as_deref().map(serde_json::from_str).transpose()?,
        })
    }
}

pub async fn find(
    conn: impl Executor<'_, Database = Sqlite>,
    id: u64,
) -> anyhow::Result<Option<ProposalView>> {
    sqlx::query_as::<_, ProposalRow>("SELECT * FROM proposals WHERE id = ?;")
        .bind(id as i64)
        .fetch_optional(conn)
        .await?
        .map(ProposalView::try_from)
        .transpose()
}

#[derive(Clone, Debug, Default)]
pub struct ProposalFilter {
    pub proposal_type: Option<String>,
    pub status: Option<String>,
    pub result: Option<String>,
}

const FILTER: &str = "(? IS NULL OR json_extract(metadata, '$.type.type') = ?)
    AND (? IS NULL OR json_extract(metadata, '$.status') = ?)
    AND (? IS NULL OR json_extract(result, '$.result') = ?)";

pub async fn list(
    conn: impl Executor<'_, Database = Sqlite>,
    filter: &ProposalFilter,
    ascending: bool,
    offset: u32,
    limit: u32,
) -> anyhow::Result<Vec<ProposalView>> {
    let order = if ascending { "ASC" } else { "DESC" };
    let sql = format!("SELECT * FROM proposals WHERE {FILTER} ORDER BY id {order} LIMIT ? OFFSET ?;");
    let rows = sqlx::query_as::<_, ProposalRow>(&sql)
        .bind(&filter.proposal_type)
        .bind(&filter.proposal_type)
        .bind(&filter.status)
        .bind(&filter.status)
        .bind(&filter.result)
        .bind(&filter.result)
        .bind(limit)
        .bind(offset)
        .fetch_all(conn)
        .await?;
    rows.into_iter().map(ProposalView::try_from).collect()
}

pub async fn count(
    conn: impl Executor<'_, Database = Sqlite>,
    filter: &ProposalFilter,
) -> anyhow::Result<i64> {
    let sql = format!("SELECT count(*) FROM proposals WHERE {FILTER};");
    let (count,) = sqlx::query_as::<_, (i64,)>(&sql)
        .bind(&filter.proposal_type)
        .bind(&filter.proposal_type)
        .bind(&filter.status)
        .bind(&filter.status)
        .bind(&filter.result)
        .bind(&filter.result)
        .fetch_one(conn)
        .await?;
    Ok(count)
}

#[derive(FromRow, Serialize, Debug, Default, PartialEq, Eq)]
pub struct ProposalStats {
    pub all: i64,
    pub ongoing: i64,
    pub upcoming: i64,
    pub finished: i64,
    pub passed: i64,
    pub rejected: i64,
}

pub async fn stats(conn: impl Executor<'_, Database = Sqlite>) -> anyhow::Result<ProposalStats> {
    Ok(sqlx::query_as::<_, ProposalStats>(
        "SELECT
            count(*) AS \"all\",
            count(*) FILTER (WHERE json_extract(metadata, '$.status') = 'ongoing') AS ongoing,
            count(*) FILTER (WHERE json_extract(metadata, '$.status') = 'upcoming') AS upcoming,
            count(*) FILTER (WHERE json_extract(metadata, '$.status') = 'finished') AS finished,
            count(*) FILTER (WHERE json_extract(result, '$.result') = 'Passed') AS passed,
            count(*) FILTER (WHERE json_extract(result, '$.result') = 'Rejected') AS rejected
        FROM proposals;",
    )
    .fetch_one(conn)
    .await?)
}

pub async fn votes(
    conn: impl Executor<'_, Database = Sqlite>,
    id: u64,
    offset: u32,
    limit: u32,
) -> anyhow::Result<Vec<Value>> {
    let rows = sqlx::query_as::<_, (String,)>(
        "SELECT data FROM votes WHERE proposal_id = ? ORDER BY id LIMIT ? OFFSET ?;",
    )
    .bind(id as i64)
    .bind(limit)
    .bind(offset)
    .fetch_all(conn)
    .await?;
    rows.into_iter()
        .map(|(data,)| -> anyhow::Result<Value> { Ok(serde_json::from_str(&data)?) })
        .collect()
}

pub async fn vote_count(conn: impl Executor<'_, Database = Sqlite>, id: u64) -> anyhow::Result<i64> {
    let (count,) = sqlx::query_as::<_, (i64,)>("SELECT count(*) FROM votes WHERE proposal_id = ?;")
        .bind(id as i64)
        .fetch_one(conn)
        .await?;
    Ok(count)
}
