//! Helpers for constructing and decoding index payloads.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use super::types::{IndexError, PointInsert, ScoredChunk, StoredChunk};

/// Build the payload object stored alongside each indexed chunk vector.
pub(crate) fn build_payload(document_id: &str, point: &PointInsert, timestamp: &str) -> Value {
    let mut payload = Map::new();
    payload.insert("document_id".into(), Value::String(document_id.to_string()));
    payload.insert("chunk_index".into(), Value::from(point.chunk_index as u64));
    payload.insert("start_offset".into(), Value::from(point.start_offset as u64));
    payload.insert("end_offset".into(), Value::from(point.end_offset as u64));
    payload.insert("text".into(), Value::String(point.text.clone()));
    payload.insert("chunk_hash".into(), Value::String(point.chunk_hash.clone()));
    payload.insert("timestamp".into(), Value::String(timestamp.to_string()));
    Value::Object(payload)
}

/// Decode a stored payload back into a chunk.
pub(crate) fn parse_stored_chunk(payload: &Map<String, Value>) -> Result<StoredChunk, IndexError> {
    Ok(StoredChunk {
        chunk_index: required_usize(payload, "chunk_index")?,
        text: required_str(payload, "text")?.to_string(),
        start_offset: required_usize(payload, "start_offset")?,
        end_offset: required_usize(payload, "end_offset")?,
    })
}

/// Decode a scored search payload into a chunk hit.
pub(crate) fn parse_scored_chunk(
    payload: &Map<String, Value>,
    score: f32,
) -> Result<ScoredChunk, IndexError> {
    let stored = parse_stored_chunk(payload)?;
    Ok(ScoredChunk {
        chunk_index: stored.chunk_index,
        text: stored.text,
        score,
        start_offset: stored.start_offset,
        end_offset: stored.end_offset,
    })
}

fn required_usize(payload: &Map<String, Value>, key: &str) -> Result<usize, IndexError> {
    payload
        .get(key)
        .and_then(Value::as_u64)
        .map(|value| value as usize)
        .ok_or_else(|| IndexError::MalformedPayload(format!("missing numeric field '{key}'")))
}

fn required_str<'a>(payload: &'a Map<String, Value>, key: &str) -> Result<&'a str, IndexError> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| IndexError::MalformedPayload(format!("missing string field '{key}'")))
}

/// Compute a deterministic SHA-256 hash for the chunk text.
pub fn compute_chunk_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)
}

/// Current timestamp formatted for payload storage.
pub(crate) fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
