use serde_json::Value;

use crate::{Content, ContentKind, CoreError};

/// Semantic side effects of an indexed transaction.
#[derive(Clone, Debug, PartialEq)]
pub enum ChainEvent {
    ValidatorsChanged { height: u64 },
    ProposalCreated { content: Value, height: u64 },
    ProposalVoted { proposal_id: u64, height: u64 },
}

impl ChainEvent {
    pub fn height(&self) -> u64 {
        match self {
            ChainEvent::ValidatorsChanged { height }
            | ChainEvent::ProposalCreated { height, .. }
            | ChainEvent::ProposalVoted { height, .. } => *height,
        }
    }

    /// The event raised by a (normalized) transaction content, if any.
    pub fn from_content(content: &Content, height: u64) -> Result<Option<ChainEvent>, CoreError> {
        let event = match &content.kind {
            kind if kind.affects_validators() => Some(ChainEvent::ValidatorsChanged { height }),
            ContentKind::VoteProposal => Some(ChainEvent::ProposalVoted {
                proposal_id: content.proposal_id()?,
                height,
            }),
            ContentKind::InitProposal => Some(ChainEvent::ProposalCreated {
                content: content.data.clone(),
                height,
            }),
            _ => None,
        };
        Ok(event)
    }
}
