use common::block;
use undexer_core::{commit_signers, ChainEvent, ContentKind, SectionKind, Uptime};

mod common;

#[test]
fn test_block_fixture() {
    let block = block();
    assert_eq!(block.height, 104);
    assert_eq!(block.header.chain_id, "housefire-envelope.b8f955720ab");
    assert_eq!(block.transactions.len(), 5);
    assert!(block.block_results().unwrap().is_some());
}

#[test]
fn test_events() {
    let block = block();
    let events: Vec<_> = block
        .transactions
        .into_iter()
        .filter_map(|tx| tx.data.content)
        .filter_map(|mut content| {
            content.normalize().unwrap();
            ChainEvent::from_content(&content, block.height).unwrap()
        })
        .collect();

    assert_eq!(events.len(), 3);
    assert_eq!(events[0], ChainEvent::ValidatorsChanged { height: 104 });
    assert_eq!(
        events[1],
        ChainEvent::ProposalVoted {
            proposal_id: 12,
            height: 104
        }
    );
    assert!(matches!(events[2], ChainEvent::ProposalCreated { height: 104, .. }));
}

#[test]
fn test_unknown_kinds_survive_roundtrip() {
    let block = block();
    let tx = &block.transactions[3];
    let content = tx.data.content.as_ref().unwrap();
    assert_eq!(
        content.kind,
        ContentKind::Unknown("tx_launch_rocket.wasm".into())
    );
    assert_eq!(
        tx.data.sections[0].kind,
        SectionKind::Unknown("Hologram".into())
    );

    let json = serde_json::to_value(tx).unwrap();
    assert_eq!(json["data"]["content"]["type"], "tx_launch_rocket.wasm");
    assert_eq!(json["data"]["sections"][0]["type"], "Hologram");
}

#[test]
fn test_extra_fields_survive_roundtrip() {
    let block = block();
    let json = serde_json::to_value(&block.transactions[0]).unwrap();
    assert_eq!(
        json["data"]["feeToken"],
        "tnam1qxgfw7myv4dh0qna4hq0xdg6lx77fzl7dcem8h7e"
    );
    assert_eq!(json["data"]["sections"][2]["pubKeys"][0], "tpknam1abc");
}

#[test]
fn test_uptime_from_fixture() {
    let block = block();
    let data = block.block_data().unwrap().unwrap();
    assert_eq!(commit_signers(&data).len(), 2);

    let uptime = Uptime::count(
        "0B1D3F4A6B8C9D0E1F2A3B4C5D6E7F80915A2C7E",
        [(block.height, Some(&data))],
    );
    assert_eq!(uptime.last_signed_blocks, vec![104]);
}
