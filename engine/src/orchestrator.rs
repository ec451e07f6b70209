//! Ingestion Orchestrator (C7): the consumer-group read loop and the
//! eleven-step per-message pipeline (§4.7).
//!
//! One [`Orchestrator`] owns the stream bus connection, the object store
//! client, the job store, and the optional local NLP collaborator. `run`
//! drives the read loop until told to shut down; `process_message` drives
//! one message through decode, job bookkeeping, download, verification,
//! validation, persistence, enrichment, and completion.

use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use ingest_archive::{ArchiveKind, ScratchDir};
use ingest_config::WorkerConfig;
use ingest_core::{route_failure, FailureContext};
use ingest_providers::{NlpClient, ObjectStoreClient, StreamBusClient, StreamMessage};
use ingest_store::JobStore;
use ingest_types::{
    mean_confidence, Checksum, Conversation, ConversationPayload, ConversationTurn,
    ConversationType, DlqContext, DlqEntry, DropNotification, IngestionStatus, StableEventId,
};

use crate::{enrichment, metrics};

pub struct Orchestrator {
    config: WorkerConfig,
    object_store: ObjectStoreClient,
    stream_bus: StreamBusClient,
    job_store: JobStore,
    nlp_client: Option<NlpClient>,
    scratch_root: PathBuf,
}

impl Orchestrator {
    pub async fn new(config: WorkerConfig) -> anyhow::Result<Self> {
        let object_store =
            ObjectStoreClient::new(&config.object_store.endpoint, config.object_store.use_tls);
        let stream_bus = StreamBusClient::connect(&config.stream_bus.url).await?;
        let job_store = JobStore::open(&config.store.db_path)?;
        let nlp_client = config.nlp.base_url.as_deref().map(NlpClient::new);
        let scratch_root = config.scratch_root.clone();

        Ok(Self {
            config,
            object_store,
            stream_bus,
            job_store,
            nlp_client,
            scratch_root,
        })
    }

    /// Run the consumer-group read loop until `shutdown` reports true. The
    /// loop only checks for shutdown at a batch boundary: an in-flight
    /// batch always finishes before this returns.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.scratch_root)?;
        match ingest_archive::sweep_stale_scratch(
            &self.scratch_root,
            ingest_archive::DEFAULT_SCRATCH_MAX_AGE,
            SystemTime::now(),
        ) {
            Ok(removed) if !removed.is_empty() => {
                tracing::info!(count = removed.len(), "swept stale scratch directories");
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, "failed to sweep stale scratch directories"),
        }

        self.stream_bus
            .ensure_consumer_group(
                &self.config.stream_bus.ingestion_stream,
                &self.config.stream_bus.consumer_group,
            )
            .await?;

        tracing::info!(config = %self.config.redacted_summary(), "ingestion worker starting");

        loop {
            if *shutdown.borrow() {
                tracing::info!("shutdown requested, stopping read loop");
                return Ok(());
            }

            let batch = self
                .stream_bus
                .read_batch(
                    &self.config.stream_bus.ingestion_stream,
                    &self.config.stream_bus.consumer_group,
                    &self.config.stream_bus.consumer_name,
                    self.config.stream_bus.batch_size,
                    self.config.stream_bus.block,
                )
                .await;

            let batch = match batch {
                Ok(messages) => messages,
                Err(err) => {
                    tracing::error!(error = %err, "failed to read from stream bus, backing off");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            for message in batch {
                metrics::increment_in_flight();
                self.process_message(message).await;
                metrics::decrement_in_flight();
            }
        }
    }

    async fn process_message(&mut self, message: StreamMessage) {
        let started = Instant::now();
        let trace_id_present = ingest_types::peek_trace_id(&message.fields).is_some();
        metrics::record_trace_id_presence(trace_id_present);

        let freshness = chrono::Duration::from_std(self.config.freshness_threshold)
            .unwrap_or(ingest_types::DEFAULT_FRESHNESS_THRESHOLD);

        let notification = match ingest_types::decode(&message.fields, Utc::now(), freshness) {
            Ok(n) => n,
            Err(err) => {
                tracing::warn!(error = %err, "wire decode failed");
                self.handle_pre_job_failure(&message, err.to_string()).await;
                return;
            }
        };

        tracing::info!(
            stable_event_id = %notification.stable_event_id,
            trace_id = ?notification.trace_id,
            priority = ?notification.priority,
            "decoded ingestion notification"
        );

        let existing = match self
            .job_store
            .find_by_stable_event_id(&notification.stable_event_id)
        {
            Ok(existing) => existing,
            Err(err) => {
                self.handle_pre_job_failure(&message, err.to_string()).await;
                return;
            }
        };

        if let Some(job) = &existing
            && job.is_redelivery_noop()
        {
            tracing::info!(
                stable_event_id = %notification.stable_event_id,
                status = job.status.as_str(),
                "redelivery is a no-op, acking without reprocessing"
            );
            self.ack(&message).await;
            return;
        }

        let job = match &existing {
            Some(job) => self.job_store.mark_retry(job.id, Utc::now()),
            None => self.job_store.create(
                &notification.stable_event_id,
                &notification.package_uri.bucket,
                &notification.package_uri.key,
                IngestionStatus::Downloading,
                notification.trace_id.map(|t| t.to_string()).as_deref(),
                Some(&notification.checksum),
                Some(&notification.schema_version.to_string()),
                self.config.max_retries,
                Utc::now(),
            ),
        };

        let job = match job {
            Ok(job) => job,
            Err(err) => {
                self.handle_pre_job_failure(&message, err.to_string()).await;
                return;
            }
        };

        let job_id = job.id;
        let job_started_at = job.started_at.unwrap_or_else(Utc::now);
        // Captured from the job row *after* mark_retry/create so a failure on
        // this delivery routes against the post-increment retry_count, not
        // the value the job had before this attempt began.
        let retry_count = job.retry_count;
        let max_retries = job.max_retries;

        let pipeline = tokio::time::timeout(
            self.config.job_timeout,
            self.run_pipeline(&notification, job_id, job_started_at),
        )
        .await;

        let outcome = match pipeline {
            Ok(result) => result,
            Err(_elapsed) => Err("ingestion timeout: per-job deadline exceeded".to_string()),
        };

        match outcome {
            Ok(()) => {
                metrics::record_success();
                metrics::record_ack_latency(started.elapsed());
                if notification.is_high_priority() && started.elapsed() > Duration::from_secs(3) {
                    tracing::warn!(
                        stable_event_id = %notification.stable_event_id,
                        elapsed_ms = started.elapsed().as_millis(),
                        "high priority message took longer than the ack latency warning threshold"
                    );
                }
                self.ack(&message).await;
            }
            Err(error_message) => {
                let failure_ctx = FailureContext {
                    stable_event_id: Some(notification.stable_event_id.to_string()),
                    trace_id: notification.trace_id.map(|t| t.to_string()),
                    job_id: Some(job_id),
                    package_uri: Some(notification.package_uri.to_string()),
                    retry_count,
                    max_retries,
                };
                self.route_and_publish(&message, &failure_ctx, &error_message, Some(job_id))
                    .await;
            }
        }
    }

    /// Steps 4 through 10 of the pipeline: download, verify, validate,
    /// persist, enrich, and complete. Wrapped by the per-job timeout in
    /// [`Self::process_message`], not individually.
    async fn run_pipeline(
        &mut self,
        notification: &DropNotification,
        job_id: i64,
        job_started_at: DateTime<Utc>,
    ) -> Result<(), String> {
        let fetched = self
            .object_store
            .get_object(&notification.package_uri.bucket, &notification.package_uri.key)
            .await
            .map_err(|e| e.to_string())?;
        metrics::record_download_bytes(fetched.size_bytes);

        let archive_kind = ingest_archive::classify_object_key(&notification.package_uri.key)
            .ok_or_else(|| {
                format!(
                    "unrecognised object key extension: {}",
                    notification.package_uri.key
                )
            })?;

        let payload = self
            .fetch_payload(&notification.stable_event_id, archive_kind, &fetched.bytes, &notification.checksum)
            .await?;

        self.job_store
            .advance(job_id, IngestionStatus::Validating, None)
            .map_err(|e| e.to_string())?;

        let validation_start = Instant::now();
        let (summary, warnings) =
            ingest_core::validate_and_extract(&payload, &notification.stable_event_id)
                .map_err(|e| e.to_string())?;
        metrics::record_validation_duration(validation_start.elapsed());
        for warning in &warnings {
            tracing::warn!(
                stable_event_id = %notification.stable_event_id,
                warning = %warning,
                "payload validation warning"
            );
        }
        metrics::record_segments_per_conversation(summary.segment_count);
        metrics::record_participants_per_conversation(summary.participant_count);

        self.job_store
            .advance(job_id, IngestionStatus::Embedding, None)
            .map_err(|e| e.to_string())?;

        let conversation = build_conversation(&payload, &summary)?;
        let turns = build_turns(&payload);
        let conversation_id = self
            .job_store
            .persist_conversation(job_id, &conversation, &turns)
            .map_err(|e| e.to_string())?;

        let enrichment_outcome =
            enrichment::dispatch(&payload, conversation_id, self.nlp_client.as_ref()).await;
        if !enrichment_outcome.main_topics.is_empty() {
            self.job_store
                .set_topics(conversation_id, &enrichment_outcome.main_topics)
                .map_err(|e| e.to_string())?;
        }

        let completed = self
            .job_store
            .advance(
                job_id,
                IngestionStatus::Completed,
                Some(&enrichment_outcome.processing_metadata),
            )
            .map_err(|e| e.to_string())?;

        let processing_duration_ms = completed
            .completed_at
            .map_or(0, |c| (c - job_started_at).num_milliseconds().max(0));
        metrics::record_processing_duration(Duration::from_millis(processing_duration_ms as u64));
        tracing::info!(
            stable_event_id = %notification.stable_event_id,
            conversation_id,
            processing_duration_ms,
            "ingestion completed"
        );

        Ok(())
    }

    /// Steps 4 through 6 for one archive kind: unpack/decompress, verify,
    /// and parse into a [`ConversationPayload`]. The `tar.gz` path runs the
    /// full tarball-and-manifest checksum verification; the legacy JSON
    /// paths verify the raw downloaded bytes against the declared checksum
    /// and skip the manifest step entirely, since there is no manifest.
    async fn fetch_payload(
        &self,
        stable_event_id: &StableEventId,
        archive_kind: ArchiveKind,
        bytes: &[u8],
        expected_checksum: &Checksum,
    ) -> Result<ConversationPayload, String> {
        let scratch =
            ScratchDir::create(&self.scratch_root, stable_event_id.as_str()).map_err(|e| e.to_string())?;

        let result = match archive_kind {
            ArchiveKind::TarGz => parse_tar_gz(&scratch, bytes, expected_checksum),
            ArchiveKind::LegacyJson | ArchiveKind::LegacyJsonGz => {
                parse_legacy(&scratch, archive_kind, bytes, expected_checksum)
            }
        };

        if let Err(err) = scratch.release() {
            tracing::warn!(error = %err, "failed to release scratch directory");
        }

        result
    }

    /// Route a failure that occurred before (or instead of) creating a job
    /// row: decode failures, and job-store errors on lookup/upsert.
    async fn handle_pre_job_failure(&mut self, message: &StreamMessage, error_message: String) {
        let ctx = FailureContext {
            stable_event_id: message.fields.get("stable_event_id").cloned(),
            trace_id: ingest_types::peek_trace_id(&message.fields).map(|t| t.to_string()),
            job_id: None,
            package_uri: message.fields.get("package_uri").cloned(),
            retry_count: 0,
            max_retries: 0,
        };
        self.route_and_publish(message, &ctx, &error_message, None).await;
    }

    async fn route_and_publish(
        &mut self,
        message: &StreamMessage,
        ctx: &FailureContext,
        error_message: &str,
        job_id: Option<i64>,
    ) {
        let routed = route_failure(error_message, ctx);
        tracing::error!(
            error_code = routed.code.as_str(),
            should_ack = routed.should_ack,
            error = error_message,
            "routing ingestion failure"
        );
        metrics::record_failure(routed.code.as_str());

        if let Some(job_id) = job_id
            && let Err(err) = self
                .job_store
                .mark_failed(job_id, routed.code, error_message, None, Utc::now())
        {
            tracing::error!(error = %err, job_id, "failed to record job failure");
        }

        let original_message = serde_json::to_value(&message.fields).unwrap_or(serde_json::Value::Null);
        let entry = DlqEntry::new(
            original_message,
            routed.code,
            error_message.to_string(),
            None,
            Utc::now(),
            DlqContext {
                stable_event_id: ctx.stable_event_id.clone(),
                trace_id: ctx.trace_id.clone(),
                job_id,
                package_uri: ctx.package_uri.clone(),
                retry_count: ctx.retry_count,
            },
            self.config.stream_bus.dlq_stream.clone(),
        );

        match serde_json::to_string(&entry) {
            Ok(payload_json) => {
                match self
                    .stream_bus
                    .publish_dlq(
                        &self.config.stream_bus.dlq_stream,
                        routed.code.as_str(),
                        ctx.stable_event_id.as_deref(),
                        ctx.trace_id.as_deref(),
                        &payload_json,
                    )
                    .await
                {
                    Ok(_) => metrics::record_dlq_publish(routed.code.as_str()),
                    Err(err) => tracing::error!(error = %err, "failed to publish dlq entry"),
                }
            }
            Err(err) => tracing::error!(error = %err, "failed to serialise dlq entry"),
        }

        if routed.should_ack {
            self.ack(message).await;
        } else {
            metrics::record_retry(ctx.retry_count);
            tracing::warn!(
                stable_event_id = ?ctx.stable_event_id,
                retry_count = ctx.retry_count,
                "leaving message unacked for redelivery"
            );
        }
    }

    async fn ack(&mut self, message: &StreamMessage) {
        if let Err(err) = self
            .stream_bus
            .ack(
                &self.config.stream_bus.ingestion_stream,
                &self.config.stream_bus.consumer_group,
                &message.entry_id,
            )
            .await
        {
            tracing::error!(error = %err, entry_id = %message.entry_id, "failed to ack message");
        }
    }
}

fn parse_tar_gz(
    scratch: &ScratchDir,
    tarball_bytes: &[u8],
    expected_checksum: &Checksum,
) -> Result<ConversationPayload, String> {
    ingest_archive::unpack_tar_gz(scratch, tarball_bytes).map_err(|e| e.to_string())?;

    let checksum_start = Instant::now();
    ingest_checksum::verify_tarball(&scratch.tarball_path(), expected_checksum)
        .map_err(|e| e.to_string())?;
    let manifest_warnings =
        ingest_checksum::verify_manifest(&scratch.extracted_root()).map_err(|e| e.to_string())?;
    metrics::record_checksum_duration(checksum_start.elapsed());
    for warning in &manifest_warnings {
        tracing::warn!(warning = %warning, "manifest parse warning");
    }

    let conversation_path =
        ingest_archive::find_conversation_json(&scratch.extracted_root()).map_err(|e| e.to_string())?;
    let bytes = std::fs::read(&conversation_path).map_err(|e| e.to_string())?;
    serde_json::from_slice(&bytes).map_err(|e| format!("malformed conversation.json: {e}"))
}

fn parse_legacy(
    scratch: &ScratchDir,
    archive_kind: ArchiveKind,
    raw_bytes: &[u8],
    expected_checksum: &Checksum,
) -> Result<ConversationPayload, String> {
    let raw_path = scratch.root().join("payload");
    std::fs::write(&raw_path, raw_bytes).map_err(|e| e.to_string())?;

    let checksum_start = Instant::now();
    ingest_checksum::verify_file(&raw_path, expected_checksum, "legacy archive payload")
        .map_err(|e| e.to_string())?;
    metrics::record_checksum_duration(checksum_start.elapsed());

    let decoded =
        ingest_archive::read_legacy_payload(archive_kind, raw_bytes).map_err(|e| e.to_string())?;
    serde_json::from_slice(&decoded).map_err(|e| format!("malformed conversation.json: {e}"))
}

fn build_conversation(
    payload: &ConversationPayload,
    summary: &ingest_core::PayloadSummary,
) -> Result<Conversation, String> {
    let confidences: Vec<f64> = payload.segments.iter().map(|s| s.confidence).collect();
    let participants =
        serde_json::to_value(&payload.participants).map_err(|e| e.to_string())?;

    Ok(Conversation {
        id: 0,
        title: payload.meeting_metadata.title.clone(),
        date: payload.meeting_metadata.scheduled_start,
        duration_minutes: summary.duration_minutes,
        language: payload.primary_language.clone(),
        conversation_type: ConversationType::from_participant_count(summary.participant_count),
        transcript: render_transcript(payload),
        participants,
        location_name: payload
            .meeting_metadata
            .location
            .as_ref()
            .and_then(|l| l.display_name.clone()),
        location_gps: payload
            .meeting_metadata
            .location
            .as_ref()
            .map(|l| (l.lat, l.lon)),
        confidence_score: mean_confidence(&confidences),
        main_topics: Vec::new(),
        tags: payload.tags.clone().unwrap_or_default(),
        created_at: Utc::now(),
    })
}

fn build_turns(payload: &ConversationPayload) -> Vec<ConversationTurn> {
    payload
        .segments
        .iter()
        .enumerate()
        .map(|(index, segment)| ConversationTurn {
            conversation_id: 0,
            turn_index: index as u32,
            speaker: segment.speaker_id.clone(),
            text: segment.text.clone(),
            timestamp_ms: segment.start_ms,
        })
        .collect()
}

fn render_transcript(payload: &ConversationPayload) -> String {
    payload
        .segments
        .iter()
        .map(|segment| {
            let speaker = payload
                .participants
                .iter()
                .find(|p| p.speaker_id == segment.speaker_id)
                .map_or(segment.speaker_id.as_str(), |p| p.display_name.as_str());
            format!("{speaker}: {}", segment.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest_types::{MeetingMetadata, Participant, Segment};

    fn base_payload() -> ConversationPayload {
        ConversationPayload {
            schema_version: "1.1".parse().unwrap(),
            stable_event_id: StableEventId::new("rec-20251003T091500Z-3f9c4241").unwrap(),
            source_system: "recorder".to_string(),
            created_at: Utc::now(),
            meeting_metadata: MeetingMetadata {
                scheduled_start: Utc::now(),
                title: None,
                duration_sec: Some(600),
                end_at: None,
                location: None,
                timezone: None,
                organizer: None,
                agenda: None,
            },
            participants: vec![
                Participant {
                    speaker_id: "spkA".to_string(),
                    display_name: "Alice".to_string(),
                    email: None,
                    role: None,
                    company: None,
                    phone: None,
                    metadata: None,
                },
                Participant {
                    speaker_id: "spkB".to_string(),
                    display_name: "Bob".to_string(),
                    email: None,
                    role: None,
                    company: None,
                    phone: None,
                    metadata: None,
                },
            ],
            segments: vec![
                Segment {
                    segment_id: "s1".to_string(),
                    speaker_id: "spkA".to_string(),
                    start_ms: 0,
                    end_ms: 1000,
                    text: "hi".to_string(),
                    language: "en".to_string(),
                    confidence: 0.9,
                    channel: None,
                    duration_ms: None,
                    offset_ms: None,
                    speaker_label: None,
                    annotations: None,
                    metadata: None,
                },
                Segment {
                    segment_id: "s2".to_string(),
                    speaker_id: "spkB".to_string(),
                    start_ms: 1000,
                    end_ms: 2000,
                    text: "hey".to_string(),
                    language: "en".to_string(),
                    confidence: 0.8,
                    channel: None,
                    duration_ms: None,
                    offset_ms: None,
                    speaker_label: None,
                    annotations: None,
                    metadata: None,
                },
            ],
            quality_flags: None,
            analytics: None,
            tags: None,
            primary_language: None,
            attachments: None,
        }
    }

    #[test]
    fn render_transcript_uses_display_names() {
        let payload = base_payload();
        assert_eq!(render_transcript(&payload), "Alice: hi\nBob: hey");
    }

    #[test]
    fn render_transcript_falls_back_to_speaker_id_for_unknown_speaker() {
        let mut payload = base_payload();
        payload.segments[0].speaker_id = "spkC".to_string();
        assert_eq!(render_transcript(&payload), "spkC: hi\nBob: hey");
    }

    #[test]
    fn build_turns_preserves_order_and_offsets() {
        let payload = base_payload();
        let turns = build_turns(&payload);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].turn_index, 0);
        assert_eq!(turns[1].turn_index, 1);
        assert_eq!(turns[1].timestamp_ms, 1000);
    }
}
