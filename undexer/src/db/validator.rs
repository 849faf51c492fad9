use serde_json::Value;
use sqlx::{Executor, FromRow, Sqlite, SqliteConnection};
use undexer_core::{ValidatorRecord, ValidatorState};

#[derive(FromRow, Debug)]
struct ValidatorRow {
    namada_address: String,
    public_key: Option<String>,
    past_public_keys: String,
    consensus_address: Option<String>,
    past_consensus_addresses: String,
    voting_power: Option<String>,
    proposer_priority: Option<String>,
    metadata: Option<String>,
    commission: Option<String>,
    stake: Option<String>,
    state: Option<String>,
}

impl TryFrom<ValidatorRow> for ValidatorRecord {
    type Error = anyhow::Error;

    fn try_from(row: ValidatorRow) -> Result<Self, Self::Error> {
        let json = |s: Option<String>| -> anyhow::Result<Option<Value>> {
            Ok(s.as_deref().map(serde_json::from_str).transpose()?)
        };
        Ok(ValidatorRecord {
            namada_address: row.namada_address,
            public_key: row.public_key,
            past_public_keys: serde_json::from_str(&row.past_public_keys)?,
            consensus_address: row.consensus_address,
            past_consensus_addresses: serde_json::from_str(&row.past_consensus_addresses)?,
            voting_power: row.voting_power,
            proposer_priority: row.proposer_priority,
            metadata: json(row.metadata)?,
            commission: json(row.commission)?,
            stake: row.stake,
            state: row.state.as_deref().map(str::parse).transpose()?,
        })
    }
}

fn into_records(rows: Vec<ValidatorRow>) -> anyhow::Result<Vec<ValidatorRecord>> {
    rows.into_iter().map(ValidatorRecord::try_from).collect()
}

/// Stake is a decimal string of arbitrary size; compare by length first.
const BY_STAKE: &str = "ORDER BY length(stake) DESC, stake DESC, namada_address";

pub async fn find(
    conn: impl Executor<'_, Database = Sqlite>,
    address: &str,
) -> anyhow::Result<Option<ValidatorRecord>> {
    sqlx::query_as::<_, ValidatorRow>("SELECT * FROM validators WHERE namada_address = ?;")
        .bind(address)
        .fetch_optional(conn)
        .await?
        .map(ValidatorRecord::try_from)
        .transpose()
}

pub async fn insert(
    conn: impl Executor<'_, Database = Sqlite>,
    record: &ValidatorRecord,
) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO validators (public_key, past_public_keys, consensus_address, past_consensus_addresses,
            voting_power, proposer_priority, metadata, commission, stake, state, namada_address)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);",
    )
    .bind(&record.public_key)
    .bind(serde_json::to_string(&record.past_public_keys)?)
    .bind(&record.consensus_address)
    .bind(serde_json::to_string(&record.past_consensus_addresses)?)
    .bind(&record.voting_power)
    .bind(&record.proposer_priority)
    .bind(record.metadata.as_ref().map(Value::to_string))
    .bind(record.commission.as_ref().map(Value::to_string))
    .bind(&record.stake)
    .bind(record.state.map(|s| s.to_string()))
    .bind(&record.namada_address)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn update(
    conn: impl Executor<'_, Database = Sqlite>,
    record: &ValidatorRecord,
) -> anyhow::Result<()> {
    sqlx::query(
        "UPDATE validators SET public_key = ?, past_public_keys = ?, consensus_address = ?, past_consensus_addresses = ?,
            voting_power = ?, proposer_priority = ?, metadata = ?, commission = ?, stake = ?, state = ?
        WHERE namada_address = ?;",
    )
    .bind(&record.public_key)
    .bind(serde_json::to_string(&record.past_public_keys)?)
    .bind(&record.consensus_address)
    .bind(serde_json::to_string(&record.past_consensus_addresses)?)
    .bind(&record.voting_power)
    .bind(&record.proposer_priority)
    .bind(record.metadata.as_ref().map(Value::to_string))
    .bind(record.commission.as_ref().map(Value::to_string))
    .bind(&record.stake)
    .bind(record.state.map(|s| s.to_string()))
    .bind(&record.namada_address)
    .execute(conn)
    .await?;
    Ok(())
}

/// Drop every stored validator and store `records` instead. History is not carried over.
pub async fn replace_all(
    conn: &mut SqliteConnection,
    records: &[ValidatorRecord],
) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM validators;")
        .execute(&mut *conn)
        .await?;
    for record in records {
        insert(&mut *conn, record).await?;
    }
    Ok(())
}

pub async fn addresses_in_state(
    conn: impl Executor<'_, Database = Sqlite>,
    state: ValidatorState,
) -> anyhow::Result<Vec<String>> {
    let rows = sqlx::query_as::<_, (String,)>(
        "SELECT namada_address FROM validators WHERE state = ? ORDER BY namada_address;",
    )
    .bind(state.to_string())
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(|(a,)| a).collect())
}

pub async fn count(
    conn: impl Executor<'_, Database = Sqlite>,
    state: Option<ValidatorState>,
) -> anyhow::Result<i64> {
    let (count,) =
        sqlx::query_as::<_, (i64,)>("SELECT count(*) FROM validators WHERE ? IS NULL OR state = ?;")
            .bind(state.map(|s| s.to_string()))
            .bind(state.map(|s| s.to_string()))
            .fetch_one(conn)
            .await?;
    Ok(count)
}

/// Validators by descending stake.
pub async fn list(
    conn: impl Executor<'_, Database = Sqlite>,
    state: Option<ValidatorState>,
    offset: u32,
    limit: u32,
) -> anyhow::Result<Vec<ValidatorRecord>> {
    let sql = format!("SELECT * FROM validators WHERE ? IS NULL OR state = ? {BY_STAKE} LIMIT ? OFFSET ?;");
    let rows = sqlx::query_as::<_, ValidatorRow>(&sql)
        .bind(state.map(|s| s.to_string()))
        .bind(state.map(|s| s.to_string()))
        .bind(limit)
        .bind(offset)
        .fetch_all(conn)
        .await?;
    into_records(rows)
}

/// Number of validators per state. Validators without a known state are counted under `None`.
pub async fn states(
    conn: impl Executor<'_, Database = Sqlite>,
) -> anyhow::Result<Vec<(Option<String>, i64)>> {
    Ok(sqlx::query_as::<_, (Option<String>, i64)>(
        "SELECT state, count(*) FROM validators GROUP BY state ORDER BY state;",
    )
    .fetch_all(conn)
    .await?)
}

pub async fn by_public_key(
    conn: impl Executor<'_, Database = Sqlite>,
    public_key: &str,
) -> anyhow::Result<Option<ValidatorRecord>> {
    sqlx::query_as::<_, ValidatorRow>(
        "SELECT * FROM validators
        WHERE public_key = ?
            OR EXISTS (SELECT 1 FROM json_each(validators.past_public_keys) WHERE value = ?)
        ORDER BY public_key = ? DESC LIMIT 1;",
    )
    .bind(public_key)
    .bind(public_key)
    .bind(public_key)
    .fetch_optional(conn)
    .await?
    .map(ValidatorRecord::try_from)
    .transpose()
}

/// The validator signing with `address` now, or failing that, one that used it before.
pub async fn by_consensus_address(
    conn: impl Executor<'_, Database = Sqlite>,
    address: &str,
) -> anyhow::Result<Option<ValidatorRecord>> {
    sqlx::query_as::<_, ValidatorRow>(
        "SELECT * FROM validators
        WHERE consensus_address = ?
            OR EXISTS (SELECT 1 FROM json_each(validators.past_consensus_addresses) WHERE value = ?)
        ORDER BY consensus_address = ? DESC LIMIT 1;",
    )
    .bind(address)
    .bind(address)
    .bind(address)
    .fetch_optional(conn)
    .await?
    .map(ValidatorRecord::try_from)
    .transpose()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::{memory_pool, validator_info};

    #[tokio::test]
    async fn test_insert_find_update() {
        let pool = memory_pool().await;
        let mut record = ValidatorRecord::from(validator_info("tnam1a", "pkA", "CA", "100"));
        record.metadata = Some(json!({ "name": "Alpha" }));
        insert(&pool, &record).await.unwrap();
        assert_eq!(find(&pool, "tnam1a").await.unwrap(), Some(record.clone()));
        assert!(find(&pool, "tnam1b").await.unwrap().is_none());

        record.merge(validator_info("tnam1a", "pkB", "CB", "200"));
        update(&pool, &record).await.unwrap();
        let stored = find(&pool, "tnam1a").await.unwrap().unwrap();
        assert_eq!(stored.public_key.as_deref(), Some("pkB"));
        assert_eq!(stored.past_public_keys, vec!["pkA"]);
        assert_eq!(stored.past_consensus_addresses, vec!["CA"]);
        assert_eq!(stored.metadata, None);
        assert_eq!(stored.state, Some(ValidatorState::Consensus));

        assert_eq!(by_public_key(&pool, "pkB").await.unwrap().unwrap().namada_address, "tnam1a");
        assert_eq!(by_public_key(&pool, "pkA").await.unwrap().unwrap().namada_address, "tnam1a");
        assert_eq!(
            by_consensus_address(&pool, "CA").await.unwrap().unwrap().namada_address,
            "tnam1a"
        );
        assert!(by_consensus_address(&pool, "CZ").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_by_stake_and_state() {
        let pool = memory_pool().await;
        for (address, stake) in [("tnam1a", "900"), ("tnam1b", "10000"), ("tnam1c", "50")] {
            insert(&pool, &validator_info(address, address, address, stake).into())
                .await
                .unwrap();
        }
        let mut jailed: ValidatorRecord = validator_info("tnam1d", "pkD", "CD", "1").into();
        jailed.state = Some(ValidatorState::Jailed);
        insert(&pool, &jailed).await.unwrap();

        let all = list(&pool, None, 0, 10).await.unwrap();
        let order: Vec<&str> = all.iter().map(|v| v.namada_address.as_str()).collect();
        assert_eq!(order, vec!["tnam1b", "tnam1a", "tnam1c", "tnam1d"]);

        let consensus = list(&pool, Some(ValidatorState::Consensus), 1, 10).await.unwrap();
        assert_eq!(consensus.len(), 2);
        assert_eq!(count(&pool, None).await.unwrap(), 4);
        assert_eq!(count(&pool, Some(ValidatorState::Jailed)).await.unwrap(), 1);
        assert_eq!(
            addresses_in_state(&pool, ValidatorState::Consensus).await.unwrap(),
            vec!["tnam1a", "tnam1b", "tnam1c"]
        );
        assert_eq!(
            states(&pool).await.unwrap(),
            vec![(Some("Consensus".to_string()), 3), (Some("Jailed".to_string()), 1)]
        );
    }

    #[tokio::test]
    async fn test_replace_all() {
        let pool = memory_pool().await;
        let mut record = ValidatorRecord::from(validator_info("tnam1a", "pkA", "CA", "1"));
        record.merge(validator_info("tnam1a", "pkB", "CA", "1"));
        insert(&pool, &record).await.unwrap();

        let mut tx = pool.begin().await.unwrap();
        replace_all(&mut tx, &[validator_info("tnam1a", "pkC", "CA", "1").into()])
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let stored = find(&pool, "tnam1a").await.unwrap().unwrap();
        assert_eq!(stored.public_key.as_deref(), Some("pkC"));
        assert!(stored.past_public_keys.is_empty());
    }
}
