use undexer_core::{ChainEvent, ChainTransaction, SectionKind};

/// Normalize a transaction's content in place and classify it. Decoding problems are logged
/// and never fail the block: the transaction is still stored as received.
pub(super) fn decode(height: u64, transaction: &mut ChainTransaction) -> Option<ChainEvent> {
    let short = transaction.id.get(..8).unwrap_or(&transaction.id).to_string();

    for section in &transaction.data.sections {
        match &section.kind {
            kind if kind.is_missing() => {
                tracing::warn!("Block {height}, TX {short}: section without type");
            }
            SectionKind::Unknown(kind) => {
                tracing::warn!("Block {height}, TX {short}: unknown section {kind}");
            }
            kind => tracing::debug!("Block {height}, TX {short}: section {kind}"),
        }
    }

    let Some(content) = transaction.data.content.as_mut() else {
        tracing::warn!("Block {height}, TX {short}: no content");
        return None;
    };
    if content.kind.is_known() {
        tracing::info!("Block {height}, TX {short}: {}", content.kind);
    } else if content.kind.is_missing() {
        tracing::warn!("Block {height}, TX {short}: content without type");
    } else {
        tracing::warn!("Block {height}, TX {short}: unsupported content {}", content.kind);
    }

    let event = content
        .normalize()
        .and_then(|()| ChainEvent::from_content(content, height));
    match event {
        Ok(event) => event,
        Err(err) => {
            tracing::warn!("Block {height}, TX {short}: {err}");
            None
        }
    }
}
