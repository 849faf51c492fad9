use undexer_core::ProposalInfo;

use super::Indexer;
use crate::{
    chain::{Chain, Connect},
    db::{self, with_error_log, ErrorContext},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProposalCounts {
    pub synced: u64,
    pub failed: u64,
}

impl<K: Connect> Indexer<K> {
    pub async fn try_update_proposals(&self, height: Option<u64>) {
        if let Err(err) = self.update_proposals(height).await {
            tracing::error!("Proposal sync failed: {err:#}");
        }
    }

    pub async fn try_update_proposal(&self, id: u64, height: Option<u64>) {
        if let Err(err) = self.update_proposal(id, height).await {
            tracing::error!("Failed to update proposal {id}: {err:#}");
        }
    }

    /// Refresh every proposal, newest first. A failing proposal is skipped.
    pub async fn update_proposals(&self, height: Option<u64>) -> anyhow::Result<ProposalCounts> {
        let _running = self.proposal_sync.lock().await;
        let count = self.router.head().await?.fetch_proposal_count().await?;
        tracing::info!("Updating {count} proposals");
        let mut counts = ProposalCounts::default();
        for id in (0..count).rev() {
            match self.sync_proposal(id, height).await {
                Ok(()) => counts.synced += 1,
                Err(err) => {
                    tracing::error!("Failed to update proposal {id}: {err:#}");
                    counts.failed += 1;
                }
            }
        }
        Ok(counts)
    }

    /// Replace proposal `id` and its votes with the chain's current view. Attached WASM is
    /// fetched once the proposal itself is committed.
    pub async fn update_proposal(&self, id: u64, height: Option<u64>) -> anyhow::Result<()> {
        let _running = self.proposal_sync.lock().await;
        self.sync_proposal(id, height).await
    }

    async fn sync_proposal(&self, id: u64, height: Option<u64>) -> anyhow::Result<()> {
        let chain = self.router.head().await?;
        let ProposalInfo {
            proposal,
            votes,
            result,
        } = chain.fetch_proposal_info(id).await?;
        let mut metadata = proposal.metadata;
        metadata.normalize();

        let context = ErrorContext::new("proposal").height(height).id(id);
        with_error_log(&self.pool, context, async {
            let mut tx = self.pool.begin().await?;
            db::proposal::replace(&mut tx, id, &proposal.content, &metadata, result.as_ref(), &votes)
                .await?;
            tx.commit().await?;
            Ok(())
        })
        .await?;
        tracing::info!("Stored proposal {id} with {} votes", votes.len());

        if metadata.carries_wasm() {
            self.update_proposal_wasm(id, height).await?;
        }
        Ok(())
    }

    async fn update_proposal_wasm(&self, id: u64, height: Option<u64>) -> anyhow::Result<()> {
        let Some(wasm) = self.router.head().await?.fetch_proposal_wasm(id).await? else {
            tracing::warn!("Proposal {id} has no WASM attached");
            return Ok(());
        };
        let context = ErrorContext::new("proposal_wasm").height(height).id(id);
        with_error_log(&self.pool, context, async {
            let mut conn = self.pool.acquire().await?;
            db::proposal::replace_wasm(&mut conn, &wasm).await
        })
        .await?;
        tracing::info!("Stored WASM of proposal {id} ({} bytes)", wasm.wasm.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use undexer_core::ProposalWasm;

    use super::super::{test_support::harness, SyncOptions};
    use super::*;
    use crate::testing::proposal_info;

    #[tokio::test]
    async fn test_sweep_newest_first_and_skips_failures() {
        let h = harness(SyncOptions::default()).await;
        h.chain.with(|s| {
            for id in 0..3 {
                s.proposals.insert(id, proposal_info(id, "Default", "ongoing", None, 1));
            }
        });
        // Advertised count is 3, but proposal 2 cannot be fetched.
        h.chain.with(|s| {
            let two = s.proposals.remove(&2).unwrap();
            s.proposals.insert(7, two);
        });
        let counts = h.indexer.update_proposals(None).await.unwrap();
        assert_eq!(counts, ProposalCounts { synced: 2, failed: 1 });
        assert_eq!(h.chain.calls(), vec!["proposal 2", "proposal 1", "proposal 0"]);
        assert!(db::proposal::find(&h.pool, 0).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_votes_are_replaced_not_merged() {
        let h = harness(SyncOptions::default()).await;
        h.chain.with(|s| s.proposals.insert(0, proposal_info(0, "Default", "ongoing", None, 4)));
        h.indexer.update_proposal(0, None).await.unwrap();
        assert_eq!(db::proposal::vote_count(&h.pool, 0).await.unwrap(), 4);

        h.chain.with(|s| {
            s.proposals
                .insert(0, proposal_info(0, "Default", "finished", Some("Rejected"), 1))
        });
        h.indexer.update_proposal(0, Some(50)).await.unwrap();
        assert_eq!(db::proposal::vote_count(&h.pool, 0).await.unwrap(), 1);
        let stored = db::proposal::find(&h.pool, 0).await.unwrap().unwrap();
        assert_eq!(stored.result, Some(json!({ "result": "Rejected" })));
        assert_eq!(stored.metadata["status"], json!("finished"));
    }

    #[tokio::test]
    async fn test_wasm_fetched_for_wasm_proposals_only() {
        let h = harness(SyncOptions::default()).await;
        let wasm = ProposalWasm {
            id: 1,
            code_key: "#tnam/proposal/1/code".into(),
            wasm: vec![0, 97, 115, 109],
        };
        h.chain.with(|s| {
            s.proposals.insert(0, proposal_info(0, "Default", "ongoing", None, 0));
            s.proposals
                .insert(1, proposal_info(1, "DefaultWithWasm", "ongoing", None, 0));
            s.wasm.insert(1, wasm.clone());
        });
        h.indexer.update_proposals(None).await.unwrap();
        assert_eq!(h.chain.calls(), vec!["proposal 1", "wasm 1", "proposal 0"]);
        assert_eq!(db::proposal::find_wasm(&h.pool, 1).await.unwrap(), Some(wasm));
        assert_eq!(db::proposal::find_wasm(&h.pool, 0).await.unwrap(), None);
    }
}
