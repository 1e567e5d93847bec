use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;

/// The capability the core exposes progress on. The WebSocket transport
/// that fans this out to clients is out of core scope; this trait is the
/// seam.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn broadcast(&self, message: Message);
}

/// Wire-stable envelope. `event_type` and the payload keys inside `payload`
/// are part of the public event taxonomy and must not be renamed.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventType {
    #[serde(rename = "file.detected")]
    FileDetected,
    #[serde(rename = "scan.completed")]
    ScanCompleted,
    #[serde(rename = "enrichment.started")]
    EnrichmentStarted,
    #[serde(rename = "enrichment.progress")]
    EnrichmentProgress,
    #[serde(rename = "enrichment.completed")]
    EnrichmentCompleted,
    #[serde(rename = "enrichment.failed")]
    EnrichmentFailed,
    #[serde(rename = "book.updated")]
    BookUpdated,
}

impl Message {
    pub fn new(event_type: EventType, payload: Value) -> Self {
        Self {
            event_type,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn file_detected(filename: &str, content_type: &str, book_id: i64) -> Self {
        Self::new(
            EventType::FileDetected,
            serde_json::json!({
                "filename": filename,
                "contentType": content_type,
                "bookId": book_id,
            }),
        )
    }

    pub fn scan_completed(
        files_found: usize,
        files_processed: usize,
        files_skipped: usize,
        errors: usize,
        duration_ms: u128,
    ) -> Self {
        Self::new(
            EventType::ScanCompleted,
            serde_json::json!({
                "filesFound": files_found,
                "filesProcessed": files_processed,
                "filesSkipped": files_skipped,
                "errors": errors,
                "duration": duration_ms,
            }),
        )
    }

    pub fn enrichment_progress(book_id: i64, step: &str, data: Value) -> Self {
        Self::new(
            EventType::EnrichmentProgress,
            serde_json::json!({
                "bookId": book_id,
                "step": step,
                "data": data,
            }),
        )
    }

    pub fn enrichment_completed(book_id: i64, meta: Value) -> Self {
        let mut payload = serde_json::json!({ "bookId": book_id });
        merge_meta(&mut payload, meta);
        Self::new(EventType::EnrichmentCompleted, payload)
    }

    pub fn enrichment_failed(
        book_id: i64,
        failure_reason: &str,
        content_type: &str,
        sources_attempted: &[&str],
    ) -> Self {
        Self::new(
            EventType::EnrichmentFailed,
            serde_json::json!({
                "bookId": book_id,
                "failureReason": failure_reason,
                "contentType": content_type,
                "sourcesAttempted": sources_attempted,
            }),
        )
    }

    pub fn book_updated(book_id: i64, source: &str, external_id: &str, fields_updated: &[&str]) -> Self {
        Self::new(
            EventType::BookUpdated,
            serde_json::json!({
                "bookId": book_id,
                "source": source,
                "externalId": external_id,
                "fieldsUpdated": fields_updated,
            }),
        )
    }
}

fn merge_meta(base: &mut Value, meta: Value) {
    if let (Value::Object(base_map), Value::Object(meta_map)) = (base, meta) {
        base_map.extend(meta_map);
    }
}

/// `tokio::broadcast`-backed bus. Emission is best-effort: a lagging or
/// absent receiver never slows the emitter down.
pub struct BroadcastEventBus {
    sender: broadcast::Sender<Message>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventBus for BroadcastEventBus {
    async fn broadcast(&self, message: Message) {
        // No active subscribers is not an error; log anything else.
        if let Err(err) = self.sender.send(message) {
            warn!(?err, "event broadcast had no subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_delivers_to_subscriber() {
        let bus = BroadcastEventBus::new(16);
        let mut rx = bus.subscribe();
        bus.broadcast(Message::file_detected("clean-code.epub", "book", 1))
            .await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type, EventType::FileDetected);
        assert_eq!(received.payload["bookId"], 1);
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_does_not_block() {
        let bus = BroadcastEventBus::new(4);
        bus.broadcast(Message::scan_completed(3, 2, 1, 0, 42)).await;
    }

    #[test]
    fn test_event_type_wire_names() {
        let v = serde_json::to_value(EventType::EnrichmentFailed).unwrap();
        assert_eq!(v, "enrichment.failed");
    }

    #[test]
    fn test_enrichment_completed_merges_meta() {
        let msg = Message::enrichment_completed(
            7,
            serde_json::json!({ "title": "Clean Code", "author": "Robert C. Martin" }),
        );
        assert_eq!(msg.payload["bookId"], 7);
        assert_eq!(msg.payload["title"], "Clean Code");
    }
}
