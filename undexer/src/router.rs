use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::{
    chain::{ChainError, Connect},
    retry::RetryPolicy,
};

#[derive(thiserror::Error, Debug)]
pub enum RouterError {
    #[error("no RPC routes configured")]
    Empty,
    #[error("non-number block height {0:?} in RPC routes")]
    NonNumeric(String),
    #[error("duplicate block height {0} in RPC routes")]
    Duplicate(u64),
    #[error("no RPC route serves block height {0}")]
    NoRoute(u64),
    #[error("failed to connect to RPC {url}")]
    Connect {
        url: String,
        #[source]
        source: ChainError,
    },
}

/// Validate a table of (first block height, URL) and order it latest first.
pub fn parse_routes<'a>(
    routes: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<Vec<(u64, String)>, RouterError> {
    let mut parsed = routes
        .into_iter()
        .map(|(start, url)| {
            start
                .trim()
                .parse::<u64>()
                .map(|start| (start, url.to_string()))
                .map_err(|_| RouterError::NonNumeric(start.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if parsed.is_empty() {
        return Err(RouterError::Empty);
    }
    parsed.sort_by(|a, b| b.0.cmp(&a.0));
    if let Some(w) = parsed.windows(2).find(|w| w[0].0 == w[1].0) {
        return Err(RouterError::Duplicate(w[0].0));
    }
    Ok(parsed)
}

struct Route<C> {
    start: u64,
    url: String,
    chain: OnceCell<Arc<C>>,
}

/// Picks the RPC endpoint responsible for a block height. Connections are opened on first
/// use and kept for the lifetime of the router.
pub struct RpcRouter<K: Connect> {
    connector: K,
    retry: RetryPolicy,
    routes: Vec<Route<K::Chain>>,
}

impl<K: Connect> RpcRouter<K> {
    pub fn new<'a>(
        connector: K,
        retry: RetryPolicy,
        routes: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, RouterError> {
        let routes = parse_routes(routes)?
            .into_iter()
            .map(|(start, url)| Route {
                start,
                url,
                chain: OnceCell::new(),
            })
            .collect();
        Ok(RpcRouter {
            connector,
            retry,
            routes,
        })
    }

    /// The connection whose start height is the greatest one not above `height`.
    /// `None` stands for the chain head, served by the latest route.
    pub async fn resolve(&self, height: Option<u64>) -> Result<Arc<K::Chain>, RouterError> {
        let route = match height {
            None => self.routes.first(),
            Some(height) => self.routes.iter().find(|r| r.start <= height),
        }
        .ok_or_else(|| RouterError::NoRoute(height.unwrap_or_default()))?;

        route
            .chain
            .get_or_try_init(|| async {
                let what = format!("Connecting to RPC {}", route.url);
                self.retry
                    .run(&what, || self.connector.connect(&route.url))
                    .await
                    .map(Arc::new)
                    .map_err(|source| RouterError::Connect {
                        url: route.url.clone(),
                        source,
                    })
            })
            .await
            .map(Arc::clone)
    }

    pub async fn head(&self) -> Result<Arc<K::Chain>, RouterError> {
        self.resolve(None).await
    }

    pub async fn at(&self, height: u64) -> Result<Arc<K::Chain>, RouterError> {
        self.resolve(Some(height)).await
    }
}
