//! Server-sent events decoding for the realtime database stream.
//!
//! The hosted store streams changes below a subscribed location as:
//!
//! ```text
//! event: put
//! data: {"path": "/-Nabc", "data": {"quantity": 2}}
//!
//! event: keep-alive
//! data: null
//! ```
//!
//! `put` replaces the value at `path`, `patch` merges the children of `data`
//! into `path`. [`SnapshotFolder`] applies these to a local copy of the
//! subtree so that every change can be handed on as a full snapshot.

use serde::Deserialize;
use serde_json::Value;

use super::{StoreError, tree};

/// A raw event as framed on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental SSE framer. Bytes may arrive split anywhere, including inside
/// a multi-byte character.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend(chunk.iter().filter(|&&b| b != b'\r'));

        let mut events = Vec::new();
        while let Some(end) = find_blank_line(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block)) {
                events.push(event);
            }
        }
        events
    }
}

fn find_blank_line(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = String::from("message");
    let mut data: Vec<&str> = Vec::new();

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event = value.to_string(),
            "data" => data.push(value),
            _ => {}
        }
    }

    if data.is_empty() && event == "message" {
        return None;
    }
    Some(SseEvent {
        event,
        data: data.join("\n"),
    })
}

#[derive(Debug, Deserialize)]
struct ChangePayload {
    path: String,
    data: Value,
}

/// What a stream event means for the subscriber.
#[derive(Debug, PartialEq)]
pub enum FoldOutcome {
    /// The subtree changed; here is the full new value.
    Snapshot(Option<Value>),
    /// Nothing to deliver (keep-alive, unknown event).
    Ignored,
}

/// Local copy of the subscribed subtree.
#[derive(Debug, Default)]
pub struct SnapshotFolder {
    root: Value,
}

impl SnapshotFolder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Cancelled` for `cancel` and `auth_revoked`, and
    /// `StoreError::Parse` for malformed `put`/`patch` payloads.
    pub fn apply(&mut self, event: &SseEvent) -> Result<FoldOutcome, StoreError> {
        match event.event.as_str() {
            "put" => {
                let change: ChangePayload = serde_json::from_str(&event.data)?;
                tree::set(&mut self.root, &split_path(&change.path), change.data);
                Ok(self.snapshot())
            }
            "patch" => {
                let change: ChangePayload = serde_json::from_str(&event.data)?;
                match change.data {
                    Value::Object(fields) => {
                        tree::merge(&mut self.root, &split_path(&change.path), fields);
                    }
                    other => tree::set(&mut self.root, &split_path(&change.path), other),
                }
                Ok(self.snapshot())
            }
            "cancel" => Err(StoreError::Cancelled(cancel_reason(&event.data, "cancelled"))),
            "auth_revoked" => Err(StoreError::Cancelled(cancel_reason(
                &event.data,
                "credential revoked",
            ))),
            _ => Ok(FoldOutcome::Ignored),
        }
    }

    fn snapshot(&self) -> FoldOutcome {
        FoldOutcome::Snapshot(tree::get(&self.root, &[]).cloned())
    }
}

fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn cancel_reason(data: &str, fallback: &str) -> String {
    match serde_json::from_str::<Value>(data) {
        Ok(Value::String(reason)) => reason,
        _ if data.trim().is_empty() || data.trim() == "null" => fallback.to_string(),
        _ => data.trim().to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn event(name: &str, data: &str) -> SseEvent {
        SseEvent {
            event: name.to_string(),
            data: data.to_string(),
        }
    }

    #[test]
    fn test_decoder_handles_split_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: put\r\nda").is_empty());
        let events = decoder.feed(b"ta: {\"path\":\"/\",\"data\":null}\r\n\r\nevent: keep-alive\n");
        assert_eq!(
            events,
            vec![event("put", "{\"path\":\"/\",\"data\":null}")]
        );

        let events = decoder.feed(b"data: null\n\n");
        assert_eq!(events, vec![event("keep-alive", "null")]);
    }

    #[test]
    fn test_decoder_skips_comments() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b": ping\n\n").is_empty());
    }

    #[test]
    fn test_put_at_root_replaces_everything() {
        let mut folder = SnapshotFolder::new();
        let outcome = folder
            .apply(&event("put", r#"{"path":"/","data":{"a":{"quantity":2}}}"#))
            .unwrap();
        assert_eq!(
            outcome,
            FoldOutcome::Snapshot(Some(json!({"a": {"quantity": 2}})))
        );

        let outcome = folder
            .apply(&event("put", r#"{"path":"/","data":null}"#))
            .unwrap();
        assert_eq!(outcome, FoldOutcome::Snapshot(None));
    }

    #[test]
    fn test_child_put_and_patch_produce_full_snapshots() {
        let mut folder = SnapshotFolder::new();
        folder
            .apply(&event(
                "put",
                r#"{"path":"/","data":{"a":{"quantity":2,"title":"Shirt"}}}"#,
            ))
            .unwrap();

        let outcome = folder
            .apply(&event("patch", r#"{"path":"/a","data":{"quantity":5}}"#))
            .unwrap();
        assert_eq!(
            outcome,
            FoldOutcome::Snapshot(Some(json!({"a": {"quantity": 5, "title": "Shirt"}})))
        );

        let outcome = folder
            .apply(&event("put", r#"{"path":"/b","data":{"quantity":1}}"#))
            .unwrap();
        assert_eq!(
            outcome,
            FoldOutcome::Snapshot(Some(json!({
                "a": {"quantity": 5, "title": "Shirt"},
                "b": {"quantity": 1}
            })))
        );

        let outcome = folder
            .apply(&event("put", r#"{"path":"/a","data":null}"#))
            .unwrap();
        assert_eq!(
            outcome,
            FoldOutcome::Snapshot(Some(json!({"b": {"quantity": 1}})))
        );
    }

    #[test]
    fn test_keep_alive_is_ignored() {
        let mut folder = SnapshotFolder::new();
        assert_eq!(
            folder.apply(&event("keep-alive", "null")).unwrap(),
            FoldOutcome::Ignored
        );
    }

    #[test]
    fn test_cancel_and_revocation_are_errors() {
        let mut folder = SnapshotFolder::new();
        assert!(matches!(
            folder.apply(&event("cancel", "\"Permission denied\"")),
            Err(StoreError::Cancelled(reason)) if reason == "Permission denied"
        ));
        assert!(matches!(
            folder.apply(&event("auth_revoked", "null")),
            Err(StoreError::Cancelled(reason)) if reason == "credential revoked"
        ));
    }

    #[test]
    fn test_malformed_payload_is_parse_error() {
        let mut folder = SnapshotFolder::new();
        assert!(matches!(
            folder.apply(&event("put", "not json")),
            Err(StoreError::Parse(_))
        ));
    }
}
