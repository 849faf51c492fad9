#![allow(unused)]

use undexer_core::ChainBlock;

static BLOCK: &str = include_str!("./fixtures/block.json");

pub fn block() -> ChainBlock {
    serde_json::from_str(BLOCK).unwrap()
}
