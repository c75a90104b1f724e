//! Wire topic scheme.
//!
//! Chunk topics are `esp32-cam/jpeg/{frame_id}/{chunk_index}/{total_chunks}` with all
//! three fields in unsigned decimal. Configuration arrives on `esp32-cam/config`.

use anyhow::{anyhow, Context, Result};

pub const CHUNK_TOPIC_PREFIX: &str = "esp32-cam/jpeg";
pub const CONFIG_TOPIC: &str = "esp32-cam/config";
/// Subscription filter matching every chunk topic.
pub const CHUNK_TOPIC_FILTER: &str = "esp32-cam/jpeg/#";

/// Fields encoded in a chunk topic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkTopic {
    pub frame_id: u32,
    pub chunk_index: u32,
    pub total_chunks: u32,
}

pub fn chunk_topic(frame_id: u32, chunk_index: u32, total_chunks: u32) -> String {
    format!(
        "{}/{}/{}/{}",
        CHUNK_TOPIC_PREFIX, frame_id, chunk_index, total_chunks
    )
}

pub fn parse_chunk_topic(topic: &str) -> Result<ChunkTopic> {
    let rest = topic
        .strip_prefix(CHUNK_TOPIC_PREFIX)
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or_else(|| anyhow!("not a chunk topic: {}", topic))?;
    let mut parts = rest.split('/');
    let mut field = |name: &str| -> Result<u32> {
        let raw = parts
            .next()
            .ok_or_else(|| anyhow!("chunk topic {} missing {}", topic, name))?;
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(anyhow!("chunk topic {} has non-decimal {}", topic, name));
        }
        raw.parse()
            .with_context(|| format!("chunk topic {} has out-of-range {}", topic, name))
    };
    let frame_id = field("frame_id")?;
    let chunk_index = field("chunk_index")?;
    let total_chunks = field("total_chunks")?;
    if parts.next().is_some() {
        return Err(anyhow!("chunk topic {} has trailing levels", topic));
    }
    if chunk_index >= total_chunks {
        return Err(anyhow!(
            "chunk topic {} has index {} outside {} chunks",
            topic,
            chunk_index,
            total_chunks
        ));
    }
    Ok(ChunkTopic {
        frame_id,
        chunk_index,
        total_chunks,
    })
}
