use std::{convert::Infallible, fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::CoreError;

macro_rules! wasm_kinds {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $wasm:literal,)* }) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, serde_with::DeserializeFromStr, serde_with::SerializeDisplay)]
        pub enum $name {
            $($variant,)*
            Unknown(String),
        }

        impl $name {
            pub fn as_str(&self) -> &str {
                match self {
                    $($name::$variant => $wasm,)*
                    $name::Unknown(s) => s.as_str(),
                }
            }

            /// The record carried no `type` at all.
            pub fn is_missing(&self) -> bool {
                matches!(self, $name::Unknown(s) if s.is_empty())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::Unknown(String::new())
            }
        }

        impl FromStr for $name {
            type Err = Infallible;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(match s {
                    $($wasm => $name::$variant,)*
                    other => $name::Unknown(other.to_string()),
                })
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wasm_kinds! {
    /// The wasm code a transaction's content was built from.
    ContentKind {
        BecomeValidator => "tx_become_validator.wasm",
        ActivateValidator => "tx_activate_validator.wasm",
        DeactivateValidator => "tx_deactivate_validator.wasm",
        ReactivateValidator => "tx_reactivate_validator.wasm",
        RemoveValidator => "tx_remove_validator.wasm",
        AddValidator => "tx_add_validator.wasm",
        ChangeValidatorCommission => "tx_change_validator_commission.wasm",
        ChangeValidatorPower => "tx_change_validator_power.wasm",
        ChangeValidatorMetadata => "tx_change_validator_metadata.wasm",
        UnjailValidator => "tx_unjail_validator.wasm",
        Bond => "tx_bond.wasm",
        Unbond => "tx_unbond.wasm",
        Withdraw => "tx_withdraw.wasm",
        Redelegate => "tx_redelegate.wasm",
        ClaimRewards => "tx_claim_rewards.wasm",
        ChangeConsensusKey => "tx_change_consensus_key.wasm",
        VoteProposal => "tx_vote_proposal.wasm",
        InitProposal => "tx_init_proposal.wasm",
        Transfer => "tx_transfer.wasm",
        Ibc => "tx_ibc.wasm",
        RevealPk => "tx_reveal_pk.wasm",
        InitAccount => "tx_init_account.wasm",
        UpdateAccount => "tx_update_account.wasm",
        ResignSteward => "tx_resign_steward.wasm",
        UpdateStewardCommission => "tx_update_steward_commission.wasm",
        BridgePool => "tx_bridge_pool.wasm",
    }
}

impl ContentKind {
    /// Transactions after which the stored validator set has to be refreshed.
    pub fn affects_validators(&self) -> bool {
        matches!(
            self,
            ContentKind::BecomeValidator
                | ContentKind::ActivateValidator
                | ContentKind::DeactivateValidator
                | ContentKind::ReactivateValidator
                | ContentKind::RemoveValidator
                | ContentKind::AddValidator
                | ContentKind::ChangeValidatorCommission
                | ContentKind::ChangeValidatorPower
                | ContentKind::ChangeValidatorMetadata
                | ContentKind::UnjailValidator
                | ContentKind::Bond
        )
    }

    pub fn is_governance(&self) -> bool {
        matches!(self, ContentKind::VoteProposal | ContentKind::InitProposal)
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, ContentKind::Unknown(_))
    }
}

wasm_kinds! {
    SectionKind {
        Header => "Header",
        Data => "Data",
        ExtraData => "ExtraData",
        Code => "Code",
        Signature => "Signature",
        Authorization => "Authorization",
        Cipher => "Cipher",
        MaspTx => "MaspTx",
        MaspBuilder => "MaspBuilder",
    }
}

/// The typed instruction carried by a transaction. Fields other than `type` and `data` are
/// kept as received.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(rename = "type", default, skip_serializing_if = "ContentKind::is_missing")]
    pub kind: ContentKind,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Content {
    /// Governance payloads carry the proposal as `id`; it is stored as a numeric `proposalId`.
    pub fn normalize(&mut self) -> Result<(), CoreError> {
        if !self.kind.is_governance() {
            return Ok(());
        }
        let Some(data) = self.data.as_object_mut() else {
            return Ok(());
        };
        if let Some(id) = data.get("id") {
            let proposal_id = parse_id(id)?;
            data.remove("id");
            data.insert("proposalId".into(), Value::from(proposal_id));
        }
        Ok(())
    }

    pub fn proposal_id(&self) -> Result<u64, CoreError> {
        self.data
            .get("proposalId")
            .ok_or(CoreError::MissingProposalId)
            .and_then(parse_id)
    }
}

fn parse_id(value: &Value) -> Result<u64, CoreError> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| CoreError::ProposalId(value.to_string()))
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Section {
    #[serde(rename = "type", default, skip_serializing_if = "SectionKind::is_missing")]
    pub kind: SectionKind,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}
