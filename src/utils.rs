//! Streaming utilities for NDJSON parsing and atomic persistence writes.
//!
//! The Ollama runtime streams generation as newline-delimited JSON
//! (`application/x-ndjson`): one complete JSON record per line, terminated by
//! a record whose `done` field is `true`:
//!
//! ```text
//! {"response":"Hel","done":false}
//! {"response":"lo","done":false}
//! {"response":"","done":true,"total_duration":123456}
//! ```
//!
//! HTTP streaming can split the body at arbitrary byte positions, so a chunk
//! may end mid-record (even mid-UTF-8-sequence). [`parse_ndjson_stream`]
//! therefore accumulates raw bytes and only decodes and deserializes once a
//! full line is available. Without that buffering, consumers would see
//! truncated JSON and the stream would be unusable.
//!
//! The module also holds [`write_atomic`], the write-then-rename helper the
//! manual index uses so that a crash mid-write never leaves a half-written
//! persistence file behind.

use crate::{Error, Result};
use futures::stream::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::pin::Pin;

/// A pinned, boxed stream of parsed records.
pub type RecordStream<T> = Pin<Box<dyn Stream<Item = Result<T>> + Send>>;

/// Parse an NDJSON HTTP response body into a stream of `T` records.
///
/// Each yielded item is one complete line deserialized as `T`. Transport
/// errors surface as [`Error::Http`] / [`Error::Timeout`]; a line that is
/// not valid JSON for `T` surfaces as [`Error::Protocol`]. Errors are
/// per-item; the consumer decides whether to stop.
///
/// The stream is lazy, finite, and non-restartable. Dropping it drops the
/// underlying HTTP response, which closes the connection and lets the
/// runtime cancel the in-flight generation.
pub fn parse_ndjson_stream<T>(response: reqwest::Response) -> RecordStream<T>
where
    T: DeserializeOwned + Send + 'static,
{
    let bytes = response
        .bytes_stream()
        .map(|result| result.map_err(crate::error::from_reqwest));
    parse_ndjson_lines(bytes)
}

/// Line-buffering core of [`parse_ndjson_stream`], generic over the byte
/// source so tests can drive it with hand-built chunk sequences.
pub(crate) fn parse_ndjson_lines<S, B, T>(stream: S) -> RecordStream<T>
where
    S: Stream<Item = Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    T: DeserializeOwned + Send + 'static,
{
    let parsed = stream
        .scan(Vec::<u8>::new(), |buf, item| {
            let out: Vec<Result<T>> = match item {
                Ok(bytes) => {
                    buf.extend_from_slice(bytes.as_ref());
                    drain_complete_lines(buf)
                }
                Err(e) => vec![Err(e)],
            };
            futures::future::ready(Some(out))
        })
        .flat_map(futures::stream::iter);

    Box::pin(parsed)
}

/// Split every complete (newline-terminated) line out of `buf` and parse it.
/// Bytes after the last newline stay in the buffer for the next chunk.
fn drain_complete_lines<T: DeserializeOwned>(buf: &mut Vec<u8>) -> Vec<Result<T>> {
    let mut out = Vec::new();
    while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = buf.drain(..=pos).collect();
        let text = String::from_utf8_lossy(&line);
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        out.push(
            serde_json::from_str::<T>(text)
                .map_err(|e| Error::protocol(format!("malformed stream record: {e}"))),
        );
    }
    out
}

/// Write `bytes` to `path` atomically: write to a sibling temp file, then
/// rename over the target. Readers observe either the old file or the new
/// one, never a partial write.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let tmp = parent.join(format!(
        ".{}.tmp-{}",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "index".to_string()),
        std::process::id()
    ));
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
