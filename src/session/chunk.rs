//! Pre-encoded empty chunk columns, sent around the player during a
//! transfer so the client has ground to stand on until the new server's
//! chunks arrive.

use crate::protocol::game;

/// Number of 16-block sub-chunk sections in each dimension's build height.
fn section_count(dimension: i32) -> usize {
    match dimension {
        game::DIMENSION_NETHER => 8,
        game::DIMENSION_END => 16,
        _ => 24,
    }
}

/// Builds the network payload of a chunk column with a single empty
/// sub-chunk: sub-chunk version 8 with zero storage layers, one
/// single-value biome palette per section, and no border blocks.
pub(crate) fn empty_chunk(dimension: i32) -> Vec<u8> {
    let sections = section_count(dimension);
    let mut payload = Vec::with_capacity(2 + sections * 2 + 1);
    payload.extend([8, 0]);
    for _ in 0..sections {
        payload.extend([1, 0]);
    }
    payload.push(0);
    payload
}
