use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use futures::{
    stream::{self, BoxStream},
    StreamExt, TryStreamExt,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use undexer_core::{ChainBlock, ProposalInfo, ProposalWasm, ValidatorInfo};

use super::{Chain, ChainError, Connect, ParameterKind, ValidatorQuery};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const PARALLEL_VALIDATOR_FETCHES: usize = 16;

/// JSON-RPC 2.0 client for a decoding RPC gateway, one method per chain query.
pub struct HttpChain {
    url: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

#[derive(Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Big integers arrive either as JSON numbers or as decimal strings.
#[serde_as]
#[derive(Deserialize)]
struct Num(#[serde_as(as = "PickFirst<(_, DisplayFromStr)>")] u64);

impl HttpChain {
    pub fn new(url: &str, client: reqwest::Client) -> HttpChain {
        HttpChain {
            url: url.to_string(),
            client,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ChainError> {
        let request = Request {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        tracing::debug!("RPC {method} {}", request.params);
        let body = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        let response: Response = serde_json::from_slice(&body)?;
        if let Some(RpcError { code, message }) = response.error {
            return Err(ChainError::Rpc { code, message });
        }
        Ok(serde_json::from_value(response.result)?)
    }

    async fn call_num(&self, method: &str, params: Value) -> Result<u64, ChainError> {
        let Num(n) = self.call(method, params).await?;
        Ok(n)
    }

    async fn fetch_validator(&self, address: String) -> Result<ValidatorInfo, ChainError> {
        self.call("validator", json!({ "address": address })).await
    }

    async fn fetch_validator_addresses(&self) -> Result<Vec<String>, ChainError> {
        self.call("validator_addresses", json!({})).await
    }
}

#[async_trait]
impl Chain for HttpChain {
    async fn fetch_height(&self) -> Result<u64, ChainError> {
        self.call_num("height", json!({})).await
    }

    async fn fetch_block(&self, height: u64) -> Result<ChainBlock, ChainError> {
        self.call("block", json!({ "height": height, "raw": true }))
            .await
    }

    async fn fetch_epoch(&self, height: Option<u64>) -> Result<u64, ChainError> {
        self.call_num("epoch", json!({ "height": height })).await
    }

    async fn fetch_epoch_first_block(&self) -> Result<u64, ChainError> {
        self.call_num("epoch_first_block", json!({})).await
    }

    async fn fetch_epoch_duration(&self) -> Result<Value, ChainError> {
        self.call("epoch_duration", json!({})).await
    }

    fn fetch_validators(
        &self,
        query: ValidatorQuery,
    ) -> BoxStream<'_, Result<ValidatorInfo, ChainError>> {
        let concurrency = if query.parallel {
            PARALLEL_VALIDATOR_FETCHES
        } else {
            1
        };
        stream::once(async move {
            match query.addresses {
                Some(addresses) => Ok(addresses),
                None => self.fetch_validator_addresses().await,
            }
        })
        .map_ok(move |addresses| {
            stream::iter(addresses)
                .map(move |address| self.fetch_validator(address))
                .buffer_unordered(concurrency)
        })
        .try_flatten()
        .boxed()
    }

    async fn fetch_proposal_count(&self) -> Result<u64, ChainError> {
        self.call_num("proposal_count", json!({})).await
    }

    async fn fetch_proposal_info(&self, id: u64) -> Result<ProposalInfo, ChainError> {
        self.call("proposal", json!({ "id": id })).await
    }

    async fn fetch_proposal_wasm(&self, id: u64) -> Result<Option<ProposalWasm>, ChainError> {
        self.call("proposal_wasm", json!({ "id": id })).await
    }

    async fn fetch_total_staked(&self, epoch: Option<u64>) -> Result<String, ChainError> {
        let staked: Value = self.call("total_staked", json!({ "epoch": epoch })).await?;
        Ok(match staked {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }

    async fn fetch_parameters(&self, kind: ParameterKind) -> Result<Value, ChainError> {
        self.call("parameters", json!({ "kind": kind.as_str() }))
            .await
    }
}

/// Connects [`HttpChain`]s, probing the endpoint so an unreachable gateway fails the connection.
#[derive(Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
}

impl HttpConnector {
    pub fn new() -> Result<HttpConnector, ChainError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(HttpConnector { client })
    }
}

#[async_trait]
impl Connect for HttpConnector {
    type Chain = HttpChain;

    async fn connect(&self, url: &str) -> Result<HttpChain, ChainError> {
        let chain = HttpChain::new(url, self.client.clone());
        let height = chain.fetch_height().await?;
        tracing::info!("Connected to RPC {url} at height {height}");
        Ok(chain)
    }
}
