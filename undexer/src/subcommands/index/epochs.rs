use super::Indexer;
use crate::{
    chain::{Chain, Connect},
    db::{self, with_error_log, ErrorContext},
};

impl<K: Connect> Indexer<K> {
    pub async fn try_update_epoch(&self) {
        if let Err(err) = self.update_epoch().await {
            tracing::error!("Epoch backfill failed: {err:#}");
        }
    }

    /// Fill in the epoch of the newest block stored without one. One block per run.
    /// Returns the (height, epoch) pair written, if any.
    pub async fn update_epoch(&self) -> anyhow::Result<Option<(u64, u64)>> {
        let Some(height) = db::block::next_without_epoch(&self.pool).await? else {
            return Ok(None);
        };
        let epoch = self.router.at(height).await?.fetch_epoch(Some(height)).await?;
        with_error_log(
            &self.pool,
            ErrorContext::new("epoch").height(height),
            db::block::set_epoch(&self.pool, height, epoch),
        )
        .await?;
        tracing::info!("Block {height} is in epoch {epoch}");
        Ok(Some((height, epoch)))
    }
}
