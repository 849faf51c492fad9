use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use axum_extra::extract::WithRejection;
use serde_json::{json, Map, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use undexer_core::{commit_signers, Uptime, ValidatorState};

use crate::{
    chain::{Chain, Connect, ParameterKind},
    db::{self, block::Cursor, proposal::ProposalFilter},
};

use self::models::{
    BlockDetail, BlockQuery, BlockView, BlocksQuery, BlocksResponse, EpochResponse, EpochsQuery,
    EpochsResponse, JsonError, Overview, PageQuery, ProposalsQuery, ProposalsResponse,
    SearchQuery, SearchResults, Stamped, TotalStaked, TransactionsResponse, ValidatorDetail,
    ValidatorLookup, ValidatorsQuery, ValidatorsResponse, VotesResponse,
};

use super::AppState;

const DEFAULT_LIMIT: i64 = 25;
const MAX_LIMIT: i64 = 100;
const OVERVIEW_LIMIT: u32 = 10;
const DEFAULT_UPTIME_BLOCKS: u32 = 100;
const MAX_UPTIME_BLOCKS: u32 = 1000;

pub(super) mod models {
    use axum::{
        extract::rejection::{PathRejection, QueryRejection},
        http::StatusCode,
        response::{IntoResponse, Response},
        Json,
    };
    use serde::{Deserialize, Serialize};
    use serde_json::{Map, Value};
    use undexer_core::ValidatorRecord;

    use crate::db::{
        block::{BlockRow, BlockSummary, EpochSummary},
        proposal::ProposalView,
        stats::Status,
        transaction::{TransactionSummary, TransactionView},
    };

    #[derive(Serialize, Debug)]
    pub struct JsonError {
        pub error: String,
        #[serde(skip)]
        pub status: StatusCode,
    }

    impl JsonError {
        pub fn message(err: &str) -> JsonError {
            JsonError {
                error: err.into(),
                status: StatusCode::BAD_REQUEST,
            }
        }

        pub fn not_found(what: &str) -> JsonError {
            JsonError {
                error: format!("{what} not found"),
                status: StatusCode::NOT_FOUND,
            }
        }
    }

    impl IntoResponse for JsonError {
        fn into_response(self) -> Response {
            (self.status, Json(self)).into_response()
        }
    }

    impl<E> From<E> for JsonError
    where
        E: Into<anyhow::Error>,
    {
        /// Rejected requests are told why. Anything else is logged and answered generically.
        fn from(err: E) -> Self {
            let err = err.into();
            if err.is::<QueryRejection>() || err.is::<PathRejection>() {
                return JsonError {
                    error: err.to_string(),
                    status: StatusCode::BAD_REQUEST,
                };
            }
            tracing::error!("Request failed: {err:#}");
            JsonError {
                error: "Internal server error".into(),
                status: StatusCode::INTERNAL_SERVER_ERROR,
            }
        }
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub struct Stamped<T> {
        pub timestamp: String,
        pub chain_id: String,
        #[serde(flatten)]
        pub body: T,
    }

    #[derive(Deserialize, Debug, Default)]
    pub struct PageQuery {
        pub limit: Option<i64>,
        pub offset: Option<i64>,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub struct Overview {
        #[serde(flatten)]
        pub status: Status,
        pub latest_blocks: Vec<BlockSummary>,
        pub latest_transactions: Vec<TransactionSummary>,
        pub top_validators: Vec<ValidatorRecord>,
    }

    #[derive(Deserialize, Debug, Default)]
    pub struct SearchQuery {
        pub q: Option<String>,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub struct BlockView {
        pub block_height: i64,
        pub block_hash: String,
        pub block_time: Option<String>,
        pub epoch: Option<i64>,
    }

    impl From<BlockRow> for BlockView {
        fn from(row: BlockRow) -> Self {
            BlockView {
                block_height: row.block_height,
                block_hash: row.block_hash,
                block_time: row.block_time,
                epoch: row.epoch,
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct SearchResults {
        pub blocks: Vec<BlockView>,
        pub transactions: Vec<TransactionView>,
        pub proposals: Vec<ProposalView>,
    }

    #[derive(Deserialize, Debug, Default)]
    #[serde(rename_all = "camelCase")]
    pub struct BlocksQuery {
        pub limit: Option<i64>,
        pub before: Option<u64>,
        pub after: Option<u64>,
        pub public_key: Option<String>,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub struct BlocksResponse {
        pub address: Option<String>,
        pub public_key: Option<String>,
        pub total_blocks: i64,
        pub latest_block: Option<i64>,
        pub oldest_block: Option<i64>,
        pub count: i64,
        pub blocks: Vec<BlockSummary>,
    }

    #[derive(Deserialize, Debug, Default)]
    pub struct BlockQuery {
        pub height: Option<u64>,
        pub hash: Option<String>,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub struct BlockDetail {
        pub block_height: i64,
        pub block_hash: String,
        pub block_time: Option<String>,
        pub epoch: Option<i64>,
        pub transaction_count: usize,
        pub transactions: Vec<TransactionView>,
        pub proposer: Option<ValidatorRecord>,
        pub signers: Vec<Option<ValidatorRecord>>,
    }

    #[derive(Serialize, Debug)]
    pub struct TransactionsResponse {
        pub count: i64,
        pub txs: Vec<TransactionView>,
    }

    #[derive(Deserialize, Debug, Default)]
    pub struct ValidatorsQuery {
        pub state: Option<String>,
        pub limit: Option<i64>,
        pub offset: Option<i64>,
    }

    #[derive(Serialize, Debug)]
    pub struct ValidatorsResponse {
        pub count: i64,
        pub validators: Vec<ValidatorRecord>,
    }

    #[derive(Deserialize, Debug, Default)]
    #[serde(rename_all = "camelCase")]
    pub struct ValidatorLookup {
        pub public_key: String,
        /// Present (even empty) to request an uptime count over this many blocks.
        pub uptime: Option<String>,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub struct ValidatorDetail {
        #[serde(flatten)]
        pub validator: ValidatorRecord,
        pub current_height: Option<u64>,
        pub uptime: Option<usize>,
        pub last_signed_blocks: Vec<u64>,
        pub counted_blocks: Option<usize>,
    }

    #[derive(Deserialize, Debug, Default)]
    #[serde(rename_all = "camelCase")]
    pub struct ProposalsQuery {
        pub limit: Option<i64>,
        pub offset: Option<i64>,
        pub proposal_type: Option<String>,
        pub status: Option<String>,
        pub result: Option<String>,
        pub order_direction: Option<String>,
    }

    #[derive(Serialize, Debug)]
    pub struct ProposalsResponse {
        pub count: i64,
        pub proposals: Vec<ProposalView>,
    }

    #[derive(Serialize, Debug)]
    pub struct VotesResponse {
        pub count: i64,
        pub votes: Vec<Value>,
    }

    #[derive(Deserialize, Debug, Default)]
    pub struct EpochsQuery {
        pub limit: Option<i64>,
        pub before: Option<u64>,
        pub after: Option<u64>,
    }

    #[derive(Serialize, Debug)]
    pub struct EpochsResponse {
        pub epochs: Vec<EpochSummary>,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub struct EpochResponse {
        pub epoch: String,
        pub first_block: String,
        #[serde(flatten)]
        pub duration: Map<String, Value>,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub struct TotalStaked {
        pub total_staked: String,
    }
}

/// Clamp `limit` to `0..=100` (default 25) and `offset` to non-negative.
fn page(limit: Option<i64>, offset: Option<i64>) -> (u32, u32) {
    let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(0, MAX_LIMIT);
    let offset = offset.unwrap_or(0).clamp(0, i64::from(u32::MAX));
    (limit as u32, offset as u32)
}

/// A zero bound counts as absent.
fn cursor(before: Option<u64>, after: Option<u64>) -> Result<Cursor, JsonError> {
    match (before.filter(|b| *b > 0), after.filter(|a| *a > 0)) {
        (Some(_), Some(_)) => Err(JsonError::message("Don't use before and after together")),
        (Some(before), None) => Ok(Cursor::Before(before)),
        (None, Some(after)) => Ok(Cursor::After(after)),
        (None, None) => Ok(Cursor::Latest),
    }
}

impl<K: Connect> AppState<K> {
    fn stamp<T>(&self, body: T) -> Result<Stamped<T>, JsonError> {
        Ok(Stamped {
            timestamp: OffsetDateTime::now_utc().format(&Rfc3339)?,
            chain_id: self.chain_id.clone(),
            body,
        })
    }
}

pub async fn overview<K: Connect>(
    State(state): State<AppState<K>>,
) -> Result<Json<Stamped<Overview>>, JsonError> {
    let pool = &state.pool;
    let overview = Overview {
        status: db::stats::status(pool).await?,
        latest_blocks: db::block::list(pool, Cursor::Latest, OVERVIEW_LIMIT, None).await?,
        latest_transactions: db::transaction::latest(pool, OVERVIEW_LIMIT).await?,
        top_validators: db::validator::list(pool, None, 0, OVERVIEW_LIMIT).await?,
    };
    Ok(Json(state.stamp(overview)?))
}

pub async fn status<K: Connect>(
    State(state): State<AppState<K>>,
) -> Result<Json<Stamped<db::stats::Status>>, JsonError> {
    let status = db::stats::status(&state.pool).await?;
    Ok(Json(state.stamp(status)?))
}

/// Look `q` up as a block height, a transaction hash and a proposal id at once.
pub async fn search<K: Connect>(
    State(state): State<AppState<K>>,
    WithRejection(Query(query), _): WithRejection<Query<SearchQuery>, JsonError>,
) -> Result<Json<Stamped<SearchResults>>, JsonError> {
    let q = query.q.unwrap_or_default();
    let q = q.trim();
    let number = q.parse::<u64>().ok();

    let mut results = SearchResults {
        blocks: Vec::new(),
        transactions: Vec::new(),
        proposals: Vec::new(),
    };
    if let Some(height) = number {
        if let Some(block) = db::block::find(&state.pool, Some(height), None).await? {
            results.blocks.push(block.into());
        }
        if let Some(proposal) = db::proposal::find(&state.pool, height).await? {
            results.proposals.push(proposal);
        }
    }
    if !q.is_empty() {
        if let Some(tx) = db::transaction::find(&state.pool, q).await? {
            results.transactions.push(tx);
        }
    }
    Ok(Json(state.stamp(results)?))
}

pub async fn blocks<K: Connect>(
    State(state): State<AppState<K>>,
    WithRejection(Query(query), _): WithRejection<Query<BlocksQuery>, JsonError>,
) -> Result<Json<Stamped<BlocksResponse>>, JsonError> {
    let cursor = cursor(query.before, query.after)?;
    let (limit, _) = page(query.limit, None);
    let status = db::stats::status(&state.pool).await?;

    let address = match &query.public_key {
        Some(public_key) => db::validator::by_public_key(&state.pool, public_key)
            .await?
            .and_then(|v| v.consensus_address),
        None => None,
    };
    let (count, blocks) = if query.public_key.is_some() && address.is_none() {
        (0, Vec::new())
    } else {
        (
            db::block::count(&state.pool, address.as_deref()).await?,
            db::block::list(&state.pool, cursor, limit, address.as_deref()).await?,
        )
    };

    Ok(Json(state.stamp(BlocksResponse {
        address,
        public_key: query.public_key,
        total_blocks: status.total_blocks,
        latest_block: status.latest_block,
        oldest_block: status.oldest_block,
        count,
        blocks,
    })?))
}

/// A block by height and/or hash (the latest without either), with its transactions and
/// the validators that proposed and signed it.
pub async fn block<K: Connect>(
    State(state): State<AppState<K>>,
    WithRejection(Query(query), _): WithRejection<Query<BlockQuery>, JsonError>,
) -> Result<Json<Stamped<BlockDetail>>, JsonError> {
    let pool = &state.pool;
    let block = db::block::find(pool, query.height, query.hash.as_deref())
        .await?
        .ok_or_else(|| JsonError::not_found("Block"))?;
    let transactions = db::transaction::at_height(pool, block.block_height as u64).await?;

    let proposer = match block.header()?.proposer_address {
        Some(address) => db::validator::by_consensus_address(pool, &address).await?,
        None => None,
    };
    let mut signers = Vec::new();
    if let Some(data) = block.block_data()? {
        for address in commit_signers(&data) {
            signers.push(db::validator::by_consensus_address(pool, address).await?);
        }
    }

    Ok(Json(state.stamp(BlockDetail {
        block_height: block.block_height,
        block_hash: block.block_hash,
        block_time: block.block_time,
        epoch: block.epoch,
        transaction_count: transactions.len(),
        transactions,
        proposer,
        signers,
    })?))
}

pub async fn transactions<K: Connect>(
    State(state): State<AppState<K>>,
    WithRejection(Query(query), _): WithRejection<Query<PageQuery>, JsonError>,
) -> Result<Json<Stamped<TransactionsResponse>>, JsonError> {
    let (limit, offset) = page(query.limit, query.offset);
    let response = TransactionsResponse {
        count: db::transaction::count(&state.pool).await?,
        txs: db::transaction::list(&state.pool, offset, limit).await?,
    };
    Ok(Json(state.stamp(response)?))
}

pub async fn transaction<K: Connect>(
    State(state): State<AppState<K>>,
    WithRejection(Path(hash), _): WithRejection<Path<String>, JsonError>,
) -> Result<Json<db::transaction::TransactionView>, JsonError> {
    let tx = db::transaction::find(&state.pool, &hash)
        .await?
        .ok_or_else(|| JsonError::not_found("Transaction"))?;
    Ok(Json(tx))
}

pub async fn validators<K: Connect>(
    State(state): State<AppState<K>>,
    WithRejection(Query(query), _): WithRejection<Query<ValidatorsQuery>, JsonError>,
) -> Result<Json<ValidatorsResponse>, JsonError> {
    let state_filter = query
        .state
        .as_deref()
        .map(str::parse::<ValidatorState>)
        .transpose()
        .map_err(|err| JsonError::message(&err.to_string()))?;
    let (limit, offset) = page(query.limit, query.offset);
    Ok(Json(ValidatorsResponse {
        count: db::validator::count(&state.pool, state_filter).await?,
        validators: db::validator::list(&state.pool, state_filter, offset, limit).await?,
    }))
}

/// Number of stored validators per state. Validators without a known state count as `unknown`.
pub async fn validator_states<K: Connect>(
    State(state): State<AppState<K>>,
) -> Result<Json<BTreeMap<String, i64>>, JsonError> {
    let states = db::validator::states(&state.pool)
        .await?
        .into_iter()
        .map(|(state, count)| (state.unwrap_or_else(|| "unknown".into()), count))
        .collect();
    Ok(Json(states))
}

pub async fn validator<K: Connect>(
    State(state): State<AppState<K>>,
    WithRejection(Query(query), _): WithRejection<Query<ValidatorLookup>, JsonError>,
) -> Result<Json<ValidatorDetail>, JsonError> {
    let mut validator = db::validator::by_public_key(&state.pool, &query.public_key)
        .await?
        .ok_or_else(|| JsonError::not_found("Validator"))?;
    validator.metadata.get_or_insert_with(|| json!({}));

    let mut detail = ValidatorDetail {
        current_height: None,
        uptime: None,
        last_signed_blocks: Vec::new(),
        counted_blocks: None,
        validator,
    };
    if let (Some(address), Some(blocks)) = (&detail.validator.consensus_address, &query.uptime) {
        let blocks = blocks
            .parse::<u32>()
            .ok()
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_UPTIME_BLOCKS)
            .min(MAX_UPTIME_BLOCKS);
        let latest = db::block::latest_block_data(&state.pool, blocks).await?;
        let uptime = Uptime::count(address, latest.iter().map(|(h, data)| (*h, data.as_ref())));
        detail.current_height = uptime.current_height;
        detail.uptime = Some(uptime.uptime());
        detail.counted_blocks = Some(uptime.counted_blocks);
        detail.last_signed_blocks = uptime.last_signed_blocks;
    }
    Ok(Json(detail))
}

pub async fn proposals<K: Connect>(
    State(state): State<AppState<K>>,
    WithRejection(Query(query), _): WithRejection<Query<ProposalsQuery>, JsonError>,
) -> Result<Json<ProposalsResponse>, JsonError> {
    let ascending = match query.order_direction.as_deref() {
        None => false,
        Some(dir) if dir.eq_ignore_ascii_case("desc") => false,
        Some(dir) if dir.eq_ignore_ascii_case("asc") => true,
        Some(dir) => return Err(JsonError::message(&format!("Unknown order direction {dir}"))),
    };
    let (limit, offset) = page(query.limit, query.offset);
    let filter = ProposalFilter {
        proposal_type: query.proposal_type,
        status: query.status,
        result: query.result,
    };
    Ok(Json(ProposalsResponse {
        count: db::proposal::count(&state.pool, &filter).await?,
        proposals: db::proposal::list(&state.pool, &filter, ascending, offset, limit).await?,
    }))
}

pub async fn proposal_stats<K: Connect>(
    State(state): State<AppState<K>>,
) -> Result<Json<db::proposal::ProposalStats>, JsonError> {
    Ok(Json(db::proposal::stats(&state.pool).await?))
}

pub async fn proposal<K: Connect>(
    State(state): State<AppState<K>>,
    WithRejection(Path(id), _): WithRejection<Path<u64>, JsonError>,
) -> Result<Json<db::proposal::ProposalView>, JsonError> {
    let proposal = db::proposal::find(&state.pool, id)
        .await?
        .ok_or_else(|| JsonError::not_found("Proposal"))?;
    Ok(Json(proposal))
}

pub async fn proposal_votes<K: Connect>(
    State(state): State<AppState<K>>,
    WithRejection(Path(id), _): WithRejection<Path<u64>, JsonError>,
    WithRejection(Query(query), _): WithRejection<Query<PageQuery>, JsonError>,
) -> Result<Json<VotesResponse>, JsonError> {
    let (limit, offset) = page(query.limit, query.offset);
    Ok(Json(VotesResponse {
        count: db::proposal::vote_count(&state.pool, id).await?,
        votes: db::proposal::votes(&state.pool, id, offset, limit).await?,
    }))
}

pub async fn epochs<K: Connect>(
    State(state): State<AppState<K>>,
    WithRejection(Query(query), _): WithRejection<Query<EpochsQuery>, JsonError>,
) -> Result<Json<Stamped<EpochsResponse>>, JsonError> {
    let cursor = cursor(query.before, query.after)?;
    let (limit, _) = page(query.limit, None);
    let epochs = db::block::epochs(&state.pool, cursor, limit).await?;
    Ok(Json(state.stamp(EpochsResponse { epochs })?))
}

pub async fn epoch<K: Connect>(
    State(state): State<AppState<K>>,
) -> Result<Json<Stamped<EpochResponse>>, JsonError> {
    let chain = state.router.head().await?;
    let epoch = chain.fetch_epoch(None).await?;
    let first_block = chain.fetch_epoch_first_block().await?;
    let duration = match chain.fetch_epoch_duration().await? {
        Value::Object(map) => map,
        other => Map::from_iter([("duration".to_string(), other)]),
    };
    Ok(Json(state.stamp(EpochResponse {
        epoch: epoch.to_string(),
        first_block: first_block.to_string(),
        duration,
    })?))
}

pub async fn total_staked<K: Connect>(
    State(state): State<AppState<K>>,
) -> Result<Json<Stamped<TotalStaked>>, JsonError> {
    let total_staked = state.router.head().await?.fetch_total_staked(None).await?;
    Ok(Json(state.stamp(TotalStaked { total_staked })?))
}

async fn parameters<K: Connect>(state: &AppState<K>, kind: ParameterKind) -> Result<Json<Value>, JsonError> {
    Ok(Json(state.router.head().await?.fetch_parameters(kind).await?))
}

pub async fn protocol_parameters<K: Connect>(
    State(state): State<AppState<K>>,
) -> Result<Json<Value>, JsonError> {
    parameters(&state, ParameterKind::Protocol).await
}

pub async fn staking_parameters<K: Connect>(
    State(state): State<AppState<K>>,
) -> Result<Json<Value>, JsonError> {
    parameters(&state, ParameterKind::Staking).await
}

pub async fn governance_parameters<K: Connect>(
    State(state): State<AppState<K>>,
) -> Result<Json<Value>, JsonError> {
    parameters(&state, ParameterKind::Governance).await
}

pub async fn pgf_parameters<K: Connect>(
    State(state): State<AppState<K>>,
) -> Result<Json<Value>, JsonError> {
    parameters(&state, ParameterKind::Pgf).await
}
