use std::sync::Arc;

use tokio::sync::mpsc;
use undexer_core::ChainEvent;

use super::Indexer;
use crate::chain::Connect;

pub type EventReceiver = mpsc::UnboundedReceiver<ChainEvent>;

/// In-process channel from Block Sync to the event handlers.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: mpsc::UnboundedSender<ChainEvent>,
}

impl EventBus {
    pub fn channel() -> (EventBus, EventReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (EventBus { sender }, receiver)
    }

    /// Never blocks. Events published while nobody listens are dropped.
    pub fn publish(&self, event: ChainEvent) {
        if let Err(err) = self.sender.send(event) {
            tracing::debug!("No event handlers, dropping {:?}", err.0);
        }
    }
}

/// Hand every received event to its handler without waiting for it. A handler queues behind
/// any validator or proposal sync already running, periodic or not.
pub(super) async fn dispatch<K: Connect>(indexer: Arc<Indexer<K>>, mut receiver: EventReceiver) {
    let guard = elegant_departure::get_shutdown_guard();
    loop {
        tokio::select! {
            event = receiver.recv() => match event {
                Some(event) => {
                    let indexer = Arc::clone(&indexer);
                    tokio::spawn(async move { indexer.handle(event).await });
                }
                None => break,
            },
            _ = guard.wait() => {
                receiver.close();
                break;
            }
        }
    }
}

impl<K: Connect> Indexer<K> {
    pub async fn handle(&self, event: ChainEvent) {
        tracing::debug!("Handling {event:?}");
        match event {
            ChainEvent::ValidatorsChanged { height } => {
                self.validators_changed(height).await;
            }
            ChainEvent::ProposalCreated { content, height } => {
                match content.get("proposalId").and_then(serde_json::Value::as_u64) {
                    Some(id) => self.try_update_proposal(id, Some(height)).await,
                    None => self.try_update_proposals(Some(height)).await,
                }
            }
            ChainEvent::ProposalVoted { proposal_id, height } => {
                self.try_update_proposal(proposal_id, Some(height)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use undexer_core::ValidatorState;

    use super::super::{test_support::harness, SyncOptions};
    use super::*;
    use crate::{
        db,
        testing::{proposal_info, validator_info},
    };

    #[test]
    fn test_publish_without_receiver() {
        let (bus, receiver) = EventBus::channel();
        drop(receiver);
        bus.publish(ChainEvent::ValidatorsChanged { height: 1 });
    }

    #[tokio::test]
    async fn test_validators_changed_runs_full_sync() {
        let h = harness(SyncOptions::default()).await;
        h.chain.with(|s| s.validators.push(validator_info("tnam1a", "pkA", "CA", "10")));
        h.indexer.handle(ChainEvent::ValidatorsChanged { height: 4 }).await;
        let stored = db::validator::find(&h.pool, "tnam1a").await.unwrap().unwrap();
        assert_eq!(stored.state, Some(ValidatorState::Consensus));
    }

    #[tokio::test]
    async fn test_validator_events_share_one_sync() {
        let h = harness(SyncOptions::default()).await;
        h.chain.with(|s| s.validators.push(validator_info("tnam1a", "pkA", "CA", "10")));
        let events = (1..=5).map(|height| h.indexer.handle(ChainEvent::ValidatorsChanged { height }));
        futures::future::join_all(events).await;
        // The first event syncs at once. The other four arrived during that sync and share one.
        let syncs = h.chain.calls().iter().filter(|c| *c == "validators").count();
        assert_eq!(syncs, 2);

        h.indexer.update_validators(None).await.unwrap();
        h.indexer.validators_changed(6).await;
        assert_eq!(h.chain.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_vote_syncs_single_proposal() {
        let h = harness(SyncOptions::default()).await;
        h.chain.with(|s| {
            s.proposals.insert(0, proposal_info(0, "Default", "ongoing", None, 1));
            s.proposals.insert(1, proposal_info(1, "Default", "ongoing", None, 2));
        });
        h.indexer
            .handle(ChainEvent::ProposalVoted {
                proposal_id: 1,
                height: 9,
            })
            .await;
        assert_eq!(h.chain.calls(), vec!["proposal 1"]);
        assert_eq!(db::proposal::vote_count(&h.pool, 1).await.unwrap(), 2);
        assert!(db::proposal::find(&h.pool, 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_created_without_id_sweeps() {
        let h = harness(SyncOptions::default()).await;
        h.chain.with(|s| {
            s.proposals.insert(0, proposal_info(0, "Default", "ongoing", None, 0));
            s.proposals.insert(1, proposal_info(1, "Default", "ongoing", None, 0));
        });
        h.indexer
            .handle(ChainEvent::ProposalCreated {
                content: json!({ "content": "abc" }),
                height: 3,
            })
            .await;
        assert_eq!(h.chain.calls(), vec!["proposal 1", "proposal 0"]);
    }
}
