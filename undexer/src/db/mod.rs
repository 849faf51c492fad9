use std::path::Path;

use crate::config::Config;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode},
    SqlitePool,
};

pub mod block;
pub mod error_log;
pub mod proposal;
pub mod stats;
pub mod transaction;
pub mod validator;

pub use error_log::{with_error_log, ErrorContext};

static MIGRATIONS: [&str; 13] = [
    "CREATE TABLE error_log (id INTEGER PRIMARY KEY, timestamp TEXT NOT NULL, message TEXT NOT NULL, stack TEXT NOT NULL, info TEXT);",
    "CREATE TABLE blocks (
        block_hash TEXT PRIMARY KEY,
        chain_id TEXT NOT NULL,
        block_height INTEGER NOT NULL UNIQUE,
        block_time TEXT,
        epoch INTEGER,
        block_header TEXT NOT NULL,
        rpc_responses TEXT NOT NULL,
        block_data TEXT,
        block_results TEXT
    );",
    // Newest unset epoch first.
    "CREATE INDEX blocks_epoch_idx ON blocks (epoch, block_height);",
    "CREATE TABLE transactions (
        tx_hash TEXT PRIMARY KEY,
        chain_id TEXT,
        block_hash TEXT NOT NULL,
        block_height INTEGER NOT NULL,
        block_time TEXT,
        tx_time TEXT,
        tx_data TEXT NOT NULL
    );",
    "CREATE INDEX transactions_block_height_idx ON transactions (block_height);",
    "CREATE TABLE validators (
        namada_address TEXT PRIMARY KEY,
        public_key TEXT,
        past_public_keys TEXT NOT NULL DEFAULT '[]',
        consensus_address TEXT,
        past_consensus_addresses TEXT NOT NULL DEFAULT '[]',
        voting_power TEXT,
        proposer_priority TEXT,
        metadata TEXT,
        commission TEXT,
        stake TEXT,
        state TEXT
    );",
    "CREATE INDEX validators_state_idx ON validators (state);",
    "CREATE INDEX validators_public_key_idx ON validators (public_key);",
    "CREATE INDEX validators_consensus_address_idx ON validators (consensus_address);",
    "CREATE TABLE proposals (id INTEGER PRIMARY KEY, content TEXT NOT NULL, metadata TEXT NOT NULL, result TEXT);",
    "CREATE TABLE votes (id INTEGER PRIMARY KEY, proposal_id INTEGER NOT NULL, data TEXT NOT NULL);",
    "CREATE INDEX votes_proposal_id_idx ON votes (proposal_id);",
    "CREATE TABLE proposal_wasm (id INTEGER PRIMARY KEY, code_key TEXT NOT NULL, wasm BLOB NOT NULL);",
];

pub async fn initialize(config: &Config) -> anyhow::Result<SqlitePool> {
    let conn = connect(&config.data()).await?;
    migrate(&conn).await?;
    Ok(conn)
}

/// Open (creating if needed) the database file in WAL mode.
pub async fn connect(path: &Path) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);
    Ok(SqlitePool::connect_with(options).await?)
}

pub async fn migrate(conn: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query("CREATE TABLE IF NOT EXISTS schema (version);")
        .execute(conn)
        .await?;

    let (version,) =
        sqlx::query_as::<_, (i64,)>("SELECT COALESCE(MAX(version) + 1, 0) FROM schema;")
            .fetch_one(conn)
            .await?;

    for (idx, migration) in MIGRATIONS[version as usize..].iter().enumerate() {
        let version = idx as i64 + version;
        let mut tx = conn.begin().await?;
        tracing::debug!("Migrations schema version {version}");
        sqlx::query(migration).execute(&mut tx).await?;
        sqlx::query("INSERT INTO schema (version) VALUES (?);")
            .bind(version)
            .execute(&mut tx)
            .await?;
        tx.commit().await?;
    }

    Ok(())
}
