//! Dead-letter queue writer: one per service process, serving all error
//! paths.
//!
//! Grounded on `pipeline.rs`'s event-emission shape and `sentinel/error.rs`'s
//! layered error style; publishes through the same `trades_log::Producer`
//! contract used for `trades.raw`, onto the `trades.dlq` topic.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::DlqError;
use crate::metrics;
use crate::model::{DlqEnvelope, DlqReason};
use crate::trades_log::Producer;

pub struct DlqWriter {
    producer: Arc<dyn Producer>,
    service: String,
}

/// Bundles a DLQ write's parameters; `DlqWriter::send` takes this instead of
/// its fields individually.
pub struct DlqSend {
    pub original_topic: &'static str,
    pub partition: u32,
    pub offset: u64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub reason: DlqReason,
    pub error_message: String,
    pub retry_count: u32,
    pub metadata: std::collections::HashMap<String, String>,
}

impl DlqWriter {
    pub fn new(producer: Arc<dyn Producer>, service: impl Into<String>) -> Self {
        Self {
            producer,
            service: service.into(),
        }
    }

    /// Emit a DLQ envelope. Never blocks the caller's ingest loop on
    /// failure: the publish error is logged and counted, and the message
    /// is dropped.
    pub async fn send(&self, req: DlqSend) {
        let DlqSend {
            original_topic,
            partition,
            offset,
            key,
            payload,
            reason,
            error_message,
            retry_count,
            metadata,
        } = req;
        let now = Utc::now();
        let envelope = DlqEnvelope {
            id: Uuid::new_v4(),
            original_topic: original_topic.to_string(),
            partition,
            offset,
            key: key.clone(),
            payload,
            service: self.service.clone(),
            reason,
            error_message,
            stack: None,
            retry_count,
            original_ts: now,
            dlq_ts: now,
            metadata,
        };

        let reason_label = reason_label(reason);
        let encoded = match bincode::serialize(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode dlq envelope, dropping");
                metrics::incr_enqueue_failed();
                return;
            }
        };

        match self
            .producer
            .publish(&key.unwrap_or_else(|| envelope.id.to_string()), encoded)
            .await
        {
            Ok(_) => {
                metrics::incr_dlq_written(self.service.clone(), reason_label);
            }
            Err(e) => {
                let err = DlqError::EnqueueFailed(e);
                tracing::error!(error = %err, kind = ?err.kind(), service = %self.service, "dlq publish failed, dropping message");
                metrics::incr_enqueue_failed();
            }
        }
    }
}

fn reason_label(reason: DlqReason) -> &'static str {
    match reason {
        DlqReason::Deserialization => "DESERIALIZATION",
        DlqReason::Validation => "VALIDATION",
        DlqReason::Processing => "PROCESSING",
        DlqReason::Downstream => "DOWNSTREAM",
        DlqReason::Timeout => "TIMEOUT",
        DlqReason::Unknown => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trades_log::{Consumer, InMemoryLog};
    use std::collections::HashMap;

    #[tokio::test]
    async fn qa_send_preserves_payload_losslessly() {
        let log = Arc::new(InMemoryLog::new(1, 16));
        let writer = DlqWriter::new(log.clone(), "ingestion");

        let original = b"raw-exec-bytes".to_vec();
        writer
            .send(DlqSend {
                original_topic: "trades.raw",
                partition: 0,
                offset: 0,
                key: Some("T001".into()),
                payload: original.clone(),
                reason: DlqReason::Validation,
                error_message: "missing exec_id".into(),
                retry_count: 0,
                metadata: HashMap::new(),
            })
            .await;

        let consumer = crate::trades_log::InMemoryConsumer::new(log, vec![0]);
        let record = consumer.poll().await.expect("dlq record present");
        let envelope: DlqEnvelope = bincode::deserialize(&record.value).unwrap();
        assert_eq!(envelope.payload, original);
        assert_eq!(envelope.reason, DlqReason::Validation);
    }
}
