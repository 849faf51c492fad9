use std::sync::atomic::Ordering;

use futures::{StreamExt, TryStreamExt};
use undexer_core::{ValidatorInfo, ValidatorRecord, ValidatorState};

use super::Indexer;
use crate::{
    chain::{Chain, Connect, ValidatorQuery},
    db::{self, with_error_log, ErrorContext},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ValidatorCounts {
    pub added: usize,
    pub updated: usize,
    pub failed: usize,
}

impl ValidatorCounts {
    pub fn total(&self) -> usize {
        self.added + self.updated
    }
}

enum Merged {
    Added,
    Updated,
}

impl<K: Connect> Indexer<K> {
    pub async fn try_update_validators(&self, height: Option<u64>) {
        if let Err(err) = self.update_validators(height).await {
            tracing::error!("Validator sync failed: {err:#}");
        }
    }

    pub async fn try_update_consensus_validators(&self) {
        if let Err(err) = self.update_consensus_validators().await {
            tracing::error!("Consensus validator sync failed: {err:#}");
        }
    }

    /// Run a full validator sync for a validators-changed event at `height`. Events that
    /// arrive while a sync is running share the single sync that runs after it.
    pub async fn validators_changed(&self, height: u64) {
        self.validators_stale.store(true, Ordering::SeqCst);
        let _running = self.validator_sync.lock().await;
        if !self.validators_stale.swap(false, Ordering::SeqCst) {
            tracing::debug!("Validators already synced after height {height}");
            return;
        }
        if let Err(err) = self.sync_validators(Some(height)).await {
            tracing::error!("Validator sync failed: {err:#}");
        }
    }

    /// Merge every validator the chain knows into the store.
    pub async fn update_validators(&self, height: Option<u64>) -> anyhow::Result<ValidatorCounts> {
        let _running = self.validator_sync.lock().await;
        self.validators_stale.store(false, Ordering::SeqCst);
        self.sync_validators(height).await
    }

    async fn sync_validators(&self, height: Option<u64>) -> anyhow::Result<ValidatorCounts> {
        tracing::info!("Updating validators");
        let query = ValidatorQuery {
            parallel: self.options.validator_fetch_parallel,
            addresses: None,
        };
        let counts = self.merge_validators(query, height).await?;
        tracing::info!(
            "Updated {} validators ({} added, {} updated, {} failed)",
            counts.total(),
            counts.added,
            counts.updated,
            counts.failed
        );
        Ok(counts)
    }

    /// Refresh only the validators stored as being in the consensus set.
    pub async fn update_consensus_validators(&self) -> anyhow::Result<ValidatorCounts> {
        let _running = self.validator_sync.lock().await;
        let addresses = db::validator::addresses_in_state(&self.pool, ValidatorState::Consensus).await?;
        if addresses.is_empty() {
            tracing::debug!("No consensus validators stored yet");
            return Ok(ValidatorCounts::default());
        }
        tracing::info!("Updating {} consensus validators", addresses.len());
        let query = ValidatorQuery {
            parallel: true,
            addresses: Some(addresses),
        };
        self.merge_validators(query, None).await
    }

    async fn merge_validators(
        &self,
        query: ValidatorQuery,
        height: Option<u64>,
    ) -> anyhow::Result<ValidatorCounts> {
        let chain = self.router.head().await?;
        let mut validators = chain.fetch_validators(query);
        let mut counts = ValidatorCounts::default();
        while let Some(validator) = validators.next().await {
            let merged = match validator {
                Ok(info) => self.merge_validator(info, height).await,
                Err(err) => Err(err.into()),
            };
            match merged {
                Ok(Merged::Added) => counts.added += 1,
                Ok(Merged::Updated) => counts.updated += 1,
                Err(err) => {
                    tracing::warn!("Skipping validator: {err:#}");
                    counts.failed += 1;
                }
            }
        }
        Ok(counts)
    }

    /// Callers hold `validator_sync`, so nothing else writes validators between the read and
    /// the single-statement write.
    async fn merge_validator(&self, info: ValidatorInfo, height: Option<u64>) -> anyhow::Result<Merged> {
        let context = ErrorContext::new("validator")
            .height(height)
            .id(info.namada_address.clone());
        with_error_log(&self.pool, context, async {
            match db::validator::find(&self.pool, &info.namada_address).await? {
                Some(mut record) => {
                    record.merge(info);
                    db::validator::update(&self.pool, &record).await?;
                    Ok(Merged::Updated)
                }
                None => {
                    tracing::info!("New validator {}", info.namada_address);
                    db::validator::insert(&self.pool, &ValidatorRecord::from(info)).await?;
                    Ok(Merged::Added)
                }
            }
        })
        .await
    }

    /// Replace the whole stored set with what the chain reports now. Key and address history is
    /// discarded. Fails without touching the store if any validator cannot be fetched.
    pub async fn reset_validators(&self) -> anyhow::Result<usize> {
        let _running = self.validator_sync.lock().await;
        let chain = self.router.head().await?;
        let query = ValidatorQuery {
            parallel: self.options.validator_fetch_parallel,
            addresses: None,
        };
        let records: Vec<ValidatorRecord> = chain
            .fetch_validators(query)
            .map_ok(ValidatorRecord::from)
            .try_collect()
            .await?;
        with_error_log(&self.pool, ErrorContext::new("validators"), async {
            let mut tx = self.pool.begin().await?;
            db::validator::replace_all(&mut tx, &records).await?;
            tx.commit().await?;
            Ok(())
        })
        .await?;
        tracing::info!("Replaced stored validators with {}", records.len());
        Ok(records.len())
    }
}
