#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("invalid proposal id: {0}")]
    ProposalId(String),
    #[error("vote is missing a proposal id")]
    MissingProposalId,
    #[error("malformed raw response")]
    RawResponse(#[from] serde_json::Error),
    #[error("unknown validator state: {0}")]
    ValidatorState(String),
}
