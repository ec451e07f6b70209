//! Stream bus client: Redis Streams consumer-group reads, acks, and
//! dead-letter publication (§4.7, §6).

use std::collections::HashMap;

use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamBusError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// One message pulled from the ingestion stream: its entry id (needed to
/// ack) and the raw field map the Wire-Message Codec decodes.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub entry_id: String,
    pub fields: HashMap<String, String>,
}

pub struct StreamBusClient {
    conn: redis::aio::MultiplexedConnection,
}

impl StreamBusClient {
    pub async fn connect(url: &str) -> Result<Self, StreamBusError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }

    /// Idempotently create the consumer group on `stream`: if the stream
    /// doesn't exist, create it (`MKSTREAM`); if the group already exists,
    /// continue (§4.7 "Consumer group protocol").
    pub async fn ensure_consumer_group(
        &mut self,
        stream: &str,
        group: &str,
    ) -> Result<(), StreamBusError> {
        let result: redis::RedisResult<()> = self
            .conn
            .xgroup_create_mkstream(stream, group, "$")
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Read a batch from `stream` using the group's pending-entries cursor
    /// (`>` = only new entries), blocking up to `block` for at least one.
    pub async fn read_batch(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        batch_size: u32,
        block: std::time::Duration,
    ) -> Result<Vec<StreamMessage>, StreamBusError> {
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(batch_size as usize)
            .block(block.as_millis() as usize);

        let reply: StreamReadReply = self.conn.xread_options(&[stream], &[">"], &opts).await?;

        let mut messages = Vec::new();
        for stream_key in reply.keys {
            for entry in stream_key.ids {
                let mut fields = HashMap::new();
                for (field, value) in entry.map {
                    if let redis::Value::BulkString(bytes) = value {
                        fields.insert(field, String::from_utf8_lossy(&bytes).into_owned());
                    }
                }
                messages.push(StreamMessage {
                    entry_id: entry.id,
                    fields,
                });
            }
        }
        Ok(messages)
    }

    pub async fn ack(&mut self, stream: &str, group: &str, entry_id: &str) -> Result<(), StreamBusError> {
        let _: i64 = self.conn.xack(stream, group, &[entry_id]).await?;
        Ok(())
    }

    /// Publish a dead-letter entry, tagging it with indexable labels for
    /// cheap filtering by stream consumers (§6).
    pub async fn publish_dlq(
        &mut self,
        stream: &str,
        error_code: &str,
        stable_event_id: Option<&str>,
        trace_id: Option<&str>,
        payload_json: &str,
    ) -> Result<String, StreamBusError> {
        let mut items: Vec<(&str, &str)> = vec![
            ("error_code", error_code),
            ("payload", payload_json),
        ];
        if let Some(id) = stable_event_id {
            items.push(("stable_event_id", id));
        }
        if let Some(id) = trace_id {
            items.push(("trace_id", id));
        }
        let entry_id: String = self.conn.xadd(stream, "*", &items).await?;
        Ok(entry_id)
    }
}
