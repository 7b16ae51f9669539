//! Reply Detector - marks enrollments whose thread has grown past what we sent

use super::processor::EngineError;
use crate::metrics::EngineMetrics;
use crate::transport::MailTransport;
use cadence_storage::models::{CampaignEnrollment, EventType};
use cadence_storage::SequenceStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Counts from one reply check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplySummary {
    pub replies_found: u32,
}

pub struct ReplyDetector {
    store: Arc<dyn SequenceStore>,
    transport: Arc<dyn MailTransport>,
    metrics: Arc<EngineMetrics>,
}

impl ReplyDetector {
    pub fn new(
        store: Arc<dyn SequenceStore>,
        transport: Arc<dyn MailTransport>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            store,
            transport,
            metrics,
        }
    }

    pub async fn check_for_replies(&self) -> cadence_common::Result<ReplySummary> {
        self.check_for_replies_at(Utc::now()).await
    }

    /// Poll every active, threaded enrollment once
    pub async fn check_for_replies_at(
        &self,
        now: DateTime<Utc>,
    ) -> cadence_common::Result<ReplySummary> {
        let enrollments = self.store.list_active_threaded_enrollments().await?;
        let mut summary = ReplySummary::default();

        for enrollment in enrollments {
            match self.check_one(&enrollment, now).await {
                Ok(true) => {
                    summary.replies_found += 1;
                    self.metrics.replies_detected.inc();
                }
                Ok(false) => {}
                Err(e) => {
                    error!(enrollment_id = %enrollment.id, error = %e, "Reply check failed");
                }
            }
        }

        if summary.replies_found > 0 {
            info!(replies = summary.replies_found, "Replies detected");
        }
        Ok(summary)
    }

    async fn check_one(
        &self,
        enrollment: &CampaignEnrollment,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let Some(thread_id) = enrollment.thread_id.as_deref() else {
            return Ok(false);
        };

        let thread = self.transport.get_thread(thread_id).await?;
        let sent = self
            .store
            .count_events(enrollment.id, EventType::Sent)
            .await?;

        if thread.message_count() as i64 <= sent {
            return Ok(false);
        }

        if self
            .store
            .count_events(enrollment.id, EventType::Replied)
            .await?
            > 0
        {
            debug!(enrollment_id = %enrollment.id, "Reply already recorded");
            return Ok(false);
        }

        let step_id = self
            .store
            .latest_event(enrollment.id, EventType::Sent)
            .await?
            .and_then(|event| event.step_id);

        self.store
            .record_reply(
                enrollment.id,
                step_id,
                serde_json::json!({
                    "threadId": thread_id,
                    "messageCount": thread.message_count(),
                    "sentCount": sent,
                }),
                now,
            )
            .await?;

        info!(enrollment_id = %enrollment.id, %thread_id, "Reply detected");
        Ok(true)
    }
}
