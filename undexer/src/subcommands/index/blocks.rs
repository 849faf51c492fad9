use std::time::{Duration, Instant};

use anyhow::Context;
use undexer_core::{ChainBlock, ChainEvent};

use super::{transactions, Indexer};
use crate::{
    chain::{Chain, Connect},
    db::{self, block::NewBlock, transaction::NewTransaction, with_error_log, ErrorContext},
    retry::RetryPolicy,
};

impl<K: Connect> Indexer<K> {
    /// Highest indexed height, or the configured floor for an empty store.
    pub async fn watermark(&self) -> anyhow::Result<u64> {
        Ok(db::block::latest_height(&self.pool)
            .await?
            .unwrap_or(self.options.floor_height))
    }

    pub async fn try_update_blocks(&self) {
        if let Err(err) = self.update_new_blocks().await {
            tracing::error!("Block sync stopped: {err:#}");
        }
    }

    /// Index every block between the watermark and the chain head.
    pub async fn update_new_blocks(&self) -> anyhow::Result<()> {
        let watermark = self.watermark().await?;
        let head = self.router.head().await?.fetch_height().await?;
        if head <= watermark {
            tracing::info!("No new blocks (indexed up to {watermark}, chain at {head})");
            return Ok(());
        }
        self.update_blocks(watermark + 1, head).await
    }

    /// Index `from..=to` in ascending order, stopping at the first failure.
    pub async fn update_blocks(&self, from: u64, to: u64) -> anyhow::Result<()> {
        tracing::info!("Processing blocks {from} to {to}");
        for height in from..=to {
            self.update_block(height)
                .await
                .with_context(|| format!("indexing block {height}"))?;
        }
        Ok(())
    }

    /// Fetch one block and store it with its transactions, replacing whatever was stored at
    /// that height. Events are published only once the block is committed.
    pub async fn update_block(&self, height: u64) -> anyhow::Result<()> {
        let started = Instant::now();
        let chain = self.router.at(height).await?;
        let mut block = chain.fetch_block(height).await?;
        anyhow::ensure!(
            block.height == height,
            "RPC returned block {} for height {height}",
            block.height
        );
        let epoch = match chain.fetch_epoch(Some(height)).await {
            Ok(epoch) => Some(epoch),
            Err(err) => {
                tracing::warn!("Epoch of block {height} unavailable, leaving it for backfill: {err}");
                None
            }
        };

        let events: Vec<ChainEvent> = block
            .transactions
            .iter_mut()
            .filter_map(|tx| transactions::decode(height, tx))
            .collect();

        with_error_log(
            &self.pool,
            ErrorContext::new("block").height(height),
            self.store_block(&block, epoch),
        )
        .await?;

        tracing::info!(
            "Added block {height} ({} transactions) in {:?}",
            block.transactions.len(),
            started.elapsed()
        );
        for event in events {
            self.events.publish(event);
        }
        Ok(())
    }

    async fn store_block(&self, block: &ChainBlock, epoch: Option<u64>) -> anyhow::Result<()> {
        let block_data = block.block_data().unwrap_or_else(|err| {
            tracing::warn!("Block {}: undecodable /block response: {err}", block.height);
            None
        });
        let block_results = block.block_results().unwrap_or_else(|err| {
            tracing::warn!("Block {}: undecodable /block_results response: {err}", block.height);
            None
        });

        let mut tx = self.pool.begin().await?;
        db::block::delete_at(&mut tx, block.height).await?;
        db::block::insert(
            &mut tx,
            &NewBlock {
                chain_id: &block.header.chain_id,
                block_hash: &block.hash,
                block_height: block.height,
                block_time: block.time.as_deref(),
                epoch,
                header: &block.header,
                rpc_responses: block.responses.as_ref(),
                block_data: block_data.as_ref(),
                block_results: block_results.as_ref(),
            },
        )
        .await?;
        for transaction in &block.transactions {
            db::transaction::insert(
                &mut tx,
                &NewTransaction {
                    chain_id: Some(&block.header.chain_id),
                    block_hash: &block.hash,
                    block_height: block.height,
                    block_time: block.time.as_deref(),
                    transaction,
                },
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Re-fetch and replace `from..=to`, retrying each block until it succeeds.
    pub async fn reindex(&self, from: u64, to: u64, backoff: Duration) -> anyhow::Result<()> {
        let retry = RetryPolicy::forever(backoff);
        for height in from..=to {
            retry
                .run(&format!("Reindexing block {height}"), || self.update_block(height))
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use undexer_core::ChainEvent;

    use super::super::{test_support::harness, SyncOptions};
    use crate::{
        db,
        testing::{chain_block, transaction},
    };

    #[tokio::test]
    async fn test_scenario_from_floor() {
        let mut h = harness(SyncOptions {
            floor_height: 100,
            ..Default::default()
        })
        .await;
        h.chain.grow_to(103);
        h.indexer.update_new_blocks().await.unwrap();

        let calls = h.chain.calls();
        let blocks: Vec<&str> = calls
            .iter()
            .filter(|c| c.starts_with("block"))
            .map(String::as_str)
            .collect();
        assert_eq!(blocks, vec!["block 101", "block 102", "block 103"]);
        assert_eq!(db::block::latest_height(&h.pool).await.unwrap(), Some(103));
        assert_eq!(db::block::oldest_height(&h.pool).await.unwrap(), Some(101));
        assert!(h.drain_events().is_empty());
    }

    #[tokio::test]
    async fn test_idempotent_at_head() {
        let h = harness(SyncOptions::default()).await;
        h.chain.grow_to(3);
        h.indexer.update_new_blocks().await.unwrap();
        let before = h.chain.calls().len();
        h.indexer.update_new_blocks().await.unwrap();
        assert_eq!(h.chain.calls().len(), before);
        assert_eq!(db::stats::status(&h.pool).await.unwrap().total_blocks, 3);
    }

    #[tokio::test]
    async fn test_ascending_and_resumable() {
        let h = harness(SyncOptions::default()).await;
        h.chain.grow_to(6);
        h.chain.with(|s| {
            s.blocks.remove(&4);
            s.observer = Some(h.pool.clone());
        });

        assert!(h.indexer.update_new_blocks().await.is_err());
        assert_eq!(db::block::latest_height(&h.pool).await.unwrap(), Some(3));
        // Each block is fetched only after its predecessor was committed.
        let observed = h.chain.with(|s| s.committed_at_fetch.clone());
        assert_eq!(observed, vec![(1, None), (2, Some(1)), (3, Some(2)), (4, Some(3))]);

        h.chain.with(|s| s.blocks.insert(4, chain_block(4, vec![])));
        h.indexer.update_new_blocks().await.unwrap();
        assert_eq!(db::block::latest_height(&h.pool).await.unwrap(), Some(6));
        let fetched_again = h.chain.with(|s| s.committed_at_fetch[4..].to_vec());
        assert_eq!(fetched_again, vec![(4, Some(3)), (5, Some(4)), (6, Some(5))]);
    }

    #[tokio::test]
    async fn test_transactions_and_events() {
        let mut h = harness(SyncOptions::default()).await;
        let block = chain_block(
            1,
            vec![
                transaction("TXBOND", json!({ "type": "tx_bond.wasm", "data": {} })),
                transaction(
                    "TXVOTE",
                    json!({ "type": "tx_vote_proposal.wasm", "data": { "id": 3, "vote": "nay" } }),
                ),
                transaction("TXSEND", json!({ "type": "tx_transfer.wasm", "data": {} })),
            ],
        );
        h.chain.with(|s| {
            s.blocks.insert(1, block);
            s.epochs.insert(1, 0);
            s.height = 1;
        });
        h.indexer.update_new_blocks().await.unwrap();

        assert_eq!(db::transaction::at_height(&h.pool, 1).await.unwrap().len(), 3);
        let vote = db::transaction::find(&h.pool, "TXVOTE").await.unwrap().unwrap();
        assert_eq!(vote.tx_data["data"]["content"]["data"]["proposalId"], json!(3));
        assert_eq!(vote.chain_id.as_deref(), Some("test-chain"));
        assert_eq!(vote.tx_time.as_deref(), Some("2024-05-01T00:00:00Z"));
        assert_eq!(
            h.drain_events(),
            vec![
                ChainEvent::ValidatorsChanged { height: 1 },
                ChainEvent::ProposalVoted {
                    proposal_id: 3,
                    height: 1
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_epoch_is_left_for_backfill() {
        let h = harness(SyncOptions::default()).await;
        h.chain.grow_to(2);
        h.chain.with(|s| s.epochs.remove(&2));
        h.indexer.update_new_blocks().await.unwrap();
        assert_eq!(db::block::next_without_epoch(&h.pool).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_failed_store_is_rolled_back_and_logged() {
        let h = harness(SyncOptions::default()).await;
        let tx = transaction("DUP", json!({ "type": "tx_transfer.wasm", "data": {} }));
        h.chain.with(|s| {
            s.blocks.insert(1, chain_block(1, vec![tx.clone(), tx]));
            s.epochs.insert(1, 0);
            s.height = 1;
        });
        assert!(h.indexer.update_new_blocks().await.is_err());
        assert_eq!(db::block::latest_height(&h.pool).await.unwrap(), None);
        assert!(db::transaction::find(&h.pool, "DUP").await.unwrap().is_none());
        let errors = db::error_log::latest(&h.pool, 10).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].info.as_deref().unwrap().contains("\"height\":1"));
    }

    #[tokio::test]
    async fn test_reindex_replaces_blocks() {
        let h = harness(SyncOptions::default()).await;
        h.chain.grow_to(3);
        h.indexer.update_new_blocks().await.unwrap();

        let mut changed = chain_block(2, vec![transaction("NEW", json!({ "type": "tx_transfer.wasm" }))]);
        changed.hash = "REPLACED".into();
        h.chain.with(|s| s.blocks.insert(2, changed));
        h.indexer
            .reindex(2, 2, std::time::Duration::ZERO)
            .await
            .unwrap();

        let block = db::block::find(&h.pool, Some(2), None).await.unwrap().unwrap();
        assert_eq!(block.block_hash, "REPLACED");
        assert!(db::transaction::find(&h.pool, "NEW").await.unwrap().is_some());
        assert_eq!(db::stats::status(&h.pool).await.unwrap().total_blocks, 3);
    }
}
