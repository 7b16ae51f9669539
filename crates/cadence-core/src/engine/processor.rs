//! Enrollment Processor - sends due steps and advances enrollments

use super::advancer::StepAdvancer;
use super::template::{build_variables, TemplateRenderer};
use super::tracking::TrackingInjector;
use crate::metrics::EngineMetrics;
use crate::transport::{MailTransport, OutboundMessage, TransportError};
use cadence_common::types::{ContactId, EnrollmentId};
use cadence_storage::models::{
    CampaignEnrollment, CampaignStep, RecordSend, StepType,
};
use cadence_storage::SequenceStore;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Per-enrollment processing errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Contact {0} not found")]
    ContactNotFound(ContactId),

    #[error("Contact {0} has no email address")]
    MissingEmail(ContactId),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Store error: {0}")]
    Store(#[from] cadence_common::Error),
}

/// Counts from one processing run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSummary {
    pub processed: u32,
    pub errors: u32,
}

/// What happened to one claimed enrollment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// Step executed (or already executed) and enrollment advanced
    Processed,
    /// Nothing left to do; enrollment closed out
    Closed,
    /// Left due for a later run
    Skipped(&'static str),
}

/// Batch limits for a run
#[derive(Debug, Clone, Copy)]
pub struct ProcessorOptions {
    pub batch_size: i64,
    pub lease: Duration,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            batch_size: 50,
            lease: Duration::seconds(300),
        }
    }
}

/// Selects due enrollments and executes their current step
pub struct EnrollmentProcessor {
    store: Arc<dyn SequenceStore>,
    transport: Arc<dyn MailTransport>,
    renderer: TemplateRenderer,
    injector: TrackingInjector,
    advancer: StepAdvancer,
    metrics: Arc<EngineMetrics>,
    options: ProcessorOptions,
}

impl EnrollmentProcessor {
    pub fn new(
        store: Arc<dyn SequenceStore>,
        transport: Arc<dyn MailTransport>,
        injector: TrackingInjector,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            advancer: StepAdvancer::new(store.clone()),
            store,
            transport,
            renderer: TemplateRenderer::new(),
            injector,
            metrics,
            options: ProcessorOptions::default(),
        }
    }

    /// Set batch size and lease length
    pub fn with_options(mut self, options: ProcessorOptions) -> Self {
        self.options = options;
        self
    }

    /// Process every due enrollment once
    pub async fn process_due_enrollments(&self) -> cadence_common::Result<ProcessSummary> {
        self.process_due_enrollments_at(Utc::now()).await
    }

    /// Process enrollments due at `now`.
    ///
    /// Failing to claim the batch is an error for the whole run; failures on a
    /// single enrollment are counted and the run continues.
    pub async fn process_due_enrollments_at(
        &self,
        now: DateTime<Utc>,
    ) -> cadence_common::Result<ProcessSummary> {
        let lease_until = now + self.options.lease;
        let enrollments = self
            .store
            .claim_due_enrollments(now, self.options.batch_size, lease_until)
            .await?;

        let mut summary = ProcessSummary::default();
        if enrollments.is_empty() {
            return Ok(summary);
        }

        info!(count = enrollments.len(), "Processing due enrollments");

        for enrollment in enrollments {
            match self.process_one(&enrollment, now).await {
                Ok(Outcome::Processed) => summary.processed += 1,
                Ok(Outcome::Closed) => {}
                Ok(Outcome::Skipped(reason)) => {
                    debug!(enrollment_id = %enrollment.id, reason, "Enrollment skipped");
                    self.release(enrollment.id).await;
                }
                Err(e) => {
                    summary.errors += 1;
                    self.metrics.processing_errors.inc();
                    error!(enrollment_id = %enrollment.id, error = %e, "Failed to process enrollment");
                    self.release(enrollment.id).await;
                }
            }
        }

        info!(
            processed = summary.processed,
            errors = summary.errors,
            "Enrollment run finished"
        );
        Ok(summary)
    }

    async fn process_one(
        &self,
        enrollment: &CampaignEnrollment,
        now: DateTime<Utc>,
    ) -> Result<Outcome, EngineError> {
        let Some(step_id) = enrollment.current_step_id else {
            self.store
                .complete_enrollment(enrollment.id, now)
                .await?;
            return Ok(Outcome::Closed);
        };

        let campaign = match self.store.get_campaign(enrollment.campaign_id).await? {
            Some(campaign) if campaign.is_active() => campaign,
            _ => return Ok(Outcome::Skipped("campaign not active")),
        };

        let Some(step) = self.store.get_step(step_id).await? else {
            return Ok(Outcome::Skipped("current step missing"));
        };

        if self
            .store
            .find_sent_event(enrollment.id, step.id)
            .await?
            .is_some()
        {
            debug!(
                enrollment_id = %enrollment.id,
                step_number = step.step_number,
                "Step already sent; advancing without resend"
            );
        } else {
            match step.step_type_enum() {
                Some(StepType::Email) => self.send_step(enrollment, &step, now).await?,
                Some(StepType::Wait) => {}
                Some(StepType::Condition) => warn!(
                    step_id = %step.id,
                    "Condition steps are not evaluated; advancing"
                ),
                None => warn!(
                    step_id = %step.id,
                    step_type = %step.step_type,
                    "Unknown step type; advancing"
                ),
            }
        }

        self.advancer
            .advance_to_next_step(enrollment.id, campaign.id, step.step_number, now)
            .await?;

        Ok(Outcome::Processed)
    }

    async fn send_step(
        &self,
        enrollment: &CampaignEnrollment,
        step: &CampaignStep,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let recipient = self
            .store
            .get_contact(enrollment.contact_id)
            .await?
            .ok_or(EngineError::ContactNotFound(enrollment.contact_id))?;

        let to = recipient
            .contact
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or(EngineError::MissingEmail(enrollment.contact_id))?
            .to_string();

        let variables = build_variables(&recipient);
        let subject = self
            .renderer
            .render(step.subject.as_deref().unwrap_or_default(), &variables);
        let body = self
            .renderer
            .render(step.body.as_deref().unwrap_or_default(), &variables);
        let html_body = self.injector.inject(&body, enrollment.id, step.id);

        let to_name = variables.get("fullName").cloned();
        let sent = self
            .transport
            .send(OutboundMessage {
                to,
                to_name,
                subject: subject.clone(),
                html_body,
                thread_id: enrollment.thread_id.clone(),
                reply_to_message_id: enrollment.provider_message_id.clone(),
                unsubscribe_url: Some(self.injector.unsubscribe_url(enrollment.id)),
            })
            .await?;

        self.metrics.sends.inc();

        let recorded = self
            .store
            .record_send(
                RecordSend {
                    enrollment_id: enrollment.id,
                    step_id: step.id,
                    provider_message_id: sent.message_id.clone(),
                    thread_id: sent.thread_id.clone(),
                    metadata: serde_json::json!({
                        "messageId": sent.message_id,
                        "threadId": sent.thread_id,
                        "providerId": sent.provider_id,
                        "subject": subject,
                    }),
                },
                now,
            )
            .await?;

        if recorded {
            info!(
                enrollment_id = %enrollment.id,
                step_number = step.step_number,
                thread_id = %sent.thread_id,
                "Campaign email sent"
            );
        } else {
            warn!(
                enrollment_id = %enrollment.id,
                step_id = %step.id,
                "Sent event already recorded by another run"
            );
        }

        Ok(())
    }

    async fn release(&self, enrollment_id: EnrollmentId) {
        if let Err(e) = self.store.release_claim(enrollment_id).await {
            warn!(%enrollment_id, error = %e, "Failed to release enrollment claim");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::DryRunTransport;
    use cadence_storage::models::{
        CampaignStatus, Contact, CreateCampaign, CreateEnrollment, CreateStep, EventType,
    };
    use cadence_storage::MemorySequenceStore;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    struct Harness {
        store: Arc<MemorySequenceStore>,
        transport: Arc<DryRunTransport>,
        processor: EnrollmentProcessor,
        campaign_id: Uuid,
        steps: Vec<Uuid>,
    }

    async fn harness(steps: &[(StepType, Option<i32>)]) -> Harness {
        let store = Arc::new(MemorySequenceStore::new());
        let transport = Arc::new(DryRunTransport::new());

        let campaign = store
            .create_campaign(CreateCampaign {
                name: "Q3 outbound".to_string(),
                description: None,
            })
            .await
            .unwrap();
        store
            .update_campaign_status(campaign.id, CampaignStatus::Active)
            .await
            .unwrap();

        let mut ids = Vec::new();
        for (i, (step_type, wait_days)) in steps.iter().enumerate() {
            let step = store
                .create_step(CreateStep {
                    campaign_id: campaign.id,
                    step_number: i as i32 + 1,
                    step_type: *step_type,
                    subject: Some(format!("Step {} for {{{{firstName}}}}", i + 1)),
                    body: Some(
                        r#"<html><body><p>Hi {{firstName}}</p><a href="https://acme.io/demo">Demo</a></body></html>"#
                            .to_string(),
                    ),
                    wait_days: *wait_days,
                })
                .await
                .unwrap();
            ids.push(step.id);
        }

        let processor = EnrollmentProcessor::new(
            store.clone(),
            transport.clone(),
            TrackingInjector::new("https://crm.acme.io").unwrap(),
            Arc::new(EngineMetrics::new().unwrap()),
        );

        Harness {
            store,
            transport,
            processor,
            campaign_id: campaign.id,
            steps: ids,
        }
    }

    async fn enroll(h: &Harness, email: Option<&str>, at: DateTime<Utc>) -> Uuid {
        let contact_id = Uuid::new_v4();
        h.store
            .insert_contact(Contact {
                id: contact_id,
                account_id: None,
                first_name: Some("Dana".to_string()),
                last_name: Some("Reyes".to_string()),
                email: email.map(String::from),
                title: None,
                phone: None,
            })
            .await;
        h.store
            .create_enrollment(CreateEnrollment {
                campaign_id: h.campaign_id,
                contact_id,
                first_step_id: h.steps[0],
                next_send_at: at,
            })
            .await
            .unwrap()
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_full_sequence_email_wait_email() {
        let h = harness(&[
            (StepType::Email, None),
            (StepType::Wait, Some(2)),
            (StepType::Email, None),
        ])
        .await;
        let t0 = Utc::now();
        let eid = enroll(&h, Some("dana@example.com"), t0).await;

        // run 1: send S1, advance to the wait step
        let summary = h.processor.process_due_enrollments_at(t0).await.unwrap();
        assert_eq!(summary, ProcessSummary { processed: 1, errors: 0 });
        let e = h.store.get_enrollment(eid).await.unwrap().unwrap();
        assert_eq!(e.current_step_id, Some(h.steps[1]));
        assert_eq!(e.next_send_at, Some(t0 + Duration::days(2)));
        assert!(e.thread_id.is_some());

        // run 2: not yet due
        let t1 = t0 + Duration::minutes(5);
        let summary = h.processor.process_due_enrollments_at(t1).await.unwrap();
        assert_eq!(summary, ProcessSummary::default());

        // run 3: wait elapsed, advance to S3 due immediately
        let t2 = t0 + Duration::days(2) + Duration::minutes(1);
        let summary = h.processor.process_due_enrollments_at(t2).await.unwrap();
        assert_eq!(summary.processed, 1);
        let e = h.store.get_enrollment(eid).await.unwrap().unwrap();
        assert_eq!(e.current_step_id, Some(h.steps[2]));
        assert_eq!(e.next_send_at, Some(t2));
        assert_eq!(h.transport.sent().await.len(), 1);

        // run 4: send S3 in the same thread, then complete
        let summary = h.processor.process_due_enrollments_at(t2).await.unwrap();
        assert_eq!(summary.processed, 1);
        let e = h.store.get_enrollment(eid).await.unwrap().unwrap();
        assert_eq!(e.status, "completed");
        assert_eq!(e.current_step_id, None);
        assert_eq!(e.next_send_at, None);

        let sent = h.transport.sent().await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].subject, "Step 1 for Dana");
        assert!(sent[0].thread_id.is_none());
        assert_eq!(sent[1].thread_id, e.thread_id);
        assert!(sent[1].reply_to_message_id.is_some());

        // completed enrollments are never touched again
        let later = t2 + Duration::days(30);
        let summary = h.processor.process_due_enrollments_at(later).await.unwrap();
        assert_eq!(summary, ProcessSummary::default());
        assert_eq!(h.transport.sent().await.len(), 2);
    }

    #[tokio::test]
    async fn test_rendered_body_is_tracked() {
        let h = harness(&[(StepType::Email, None)]).await;
        let now = Utc::now();
        let eid = enroll(&h, Some("dana@example.com"), now).await;

        h.processor.process_due_enrollments_at(now).await.unwrap();

        let sent = h.transport.sent().await;
        let message = &sent[0];
        assert_eq!(message.to, "dana@example.com");
        assert_eq!(message.to_name.as_deref(), Some("Dana Reyes"));
        assert!(message.html_body.contains("<p>Hi Dana</p>"));
        assert!(message.html_body.contains("/api/track/click?"));
        assert!(message.html_body.contains("/api/track/open?"));
        assert_eq!(
            message.unsubscribe_url.as_deref(),
            Some(format!("https://crm.acme.io/api/unsubscribe?eid={}", eid).as_str())
        );
    }

    #[tokio::test]
    async fn test_sent_step_is_not_resent_after_crash() {
        let h = harness(&[(StepType::Email, None), (StepType::Email, None)]).await;
        let now = Utc::now();
        let eid = enroll(&h, Some("dana@example.com"), now).await;

        // a previous run delivered S1 and died before advancing
        h.store
            .record_send(
                RecordSend {
                    enrollment_id: eid,
                    step_id: h.steps[0],
                    provider_message_id: "<earlier@acme.io>".to_string(),
                    thread_id: "thread-earlier".to_string(),
                    metadata: serde_json::json!({}),
                },
                now,
            )
            .await
            .unwrap();

        let summary = h.processor.process_due_enrollments_at(now).await.unwrap();
        assert_eq!(summary.processed, 1);
        assert!(h.transport.sent().await.is_empty());

        let e = h.store.get_enrollment(eid).await.unwrap().unwrap();
        assert_eq!(e.current_step_id, Some(h.steps[1]));
        assert_eq!(h.store.count_events(eid, EventType::Sent).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_repeated_runs_send_once_per_step() {
        let h = harness(&[(StepType::Email, None), (StepType::Wait, Some(1))]).await;
        let now = Utc::now();
        let eid = enroll(&h, Some("dana@example.com"), now).await;

        for _ in 0..3 {
            h.processor.process_due_enrollments_at(now).await.unwrap();
        }

        let sent_for_s1 = h
            .store
            .events_for(eid)
            .await
            .into_iter()
            .filter(|e| e.event_type == "sent" && e.step_id == Some(h.steps[0]))
            .count();
        assert_eq!(sent_for_s1, 1);
        assert_eq!(h.transport.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_email_counts_error_and_stays_due() {
        let h = harness(&[(StepType::Email, None)]).await;
        let now = Utc::now();
        let eid = enroll(&h, None, now).await;

        let summary = h.processor.process_due_enrollments_at(now).await.unwrap();
        assert_eq!(summary, ProcessSummary { processed: 0, errors: 1 });

        let e = h.store.get_enrollment(eid).await.unwrap().unwrap();
        assert!(e.is_active());
        assert_eq!(e.current_step_id, Some(h.steps[0]));
        assert_eq!(e.next_send_at, Some(now));
        assert!(e.claimed_until.is_none());
    }

    #[tokio::test]
    async fn test_failed_send_leaves_enrollment_due() {
        let h = harness(&[(StepType::Email, None)]).await;
        let now = Utc::now();
        let eid = enroll(&h, Some("dana@example.com"), now).await;
        let other = enroll(&h, Some("sam@example.com"), now).await;

        h.transport.set_failing(true);
        let summary = h.processor.process_due_enrollments_at(now).await.unwrap();
        assert_eq!(summary, ProcessSummary { processed: 0, errors: 2 });

        for id in [eid, other] {
            let e = h.store.get_enrollment(id).await.unwrap().unwrap();
            assert_eq!(e.next_send_at, Some(now));
            assert_eq!(h.store.count_events(id, EventType::Sent).await.unwrap(), 0);
        }

        // retried on the next run
        h.transport.set_failing(false);
        let summary = h.processor.process_due_enrollments_at(now).await.unwrap();
        assert_eq!(summary.processed, 2);
    }

    #[tokio::test]
    async fn test_paused_campaign_is_skipped() {
        let h = harness(&[(StepType::Email, None)]).await;
        let now = Utc::now();
        let eid = enroll(&h, Some("dana@example.com"), now).await;
        h.store
            .update_campaign_status(h.campaign_id, CampaignStatus::Paused)
            .await
            .unwrap();

        let summary = h.processor.process_due_enrollments_at(now).await.unwrap();
        assert_eq!(summary, ProcessSummary::default());

        let e = h.store.get_enrollment(eid).await.unwrap().unwrap();
        assert_eq!(e.next_send_at, Some(now));
        assert!(e.claimed_until.is_none());
        assert!(h.transport.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_claimed_enrollment_not_selected_by_overlapping_run() {
        let h = harness(&[(StepType::Email, None)]).await;
        let now = Utc::now();
        enroll(&h, Some("dana@example.com"), now).await;

        // another run holds the lease
        let held = h
            .store
            .claim_due_enrollments(now, 50, now + Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(held.len(), 1);

        let summary = h.processor.process_due_enrollments_at(now).await.unwrap();
        assert_eq!(summary, ProcessSummary::default());
        assert!(h.transport.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_batch_size_caps_run() {
        let h = harness(&[(StepType::Email, None)]).await;
        let now = Utc::now();
        for i in 0..3 {
            enroll(&h, Some(&format!("c{}@example.com", i)), now).await;
        }

        let processor = EnrollmentProcessor::new(
            h.store.clone(),
            h.transport.clone(),
            TrackingInjector::new("https://crm.acme.io").unwrap(),
            Arc::new(EngineMetrics::new().unwrap()),
        )
        .with_options(ProcessorOptions {
            batch_size: 2,
            lease: Duration::seconds(60),
        });

        let summary = processor.process_due_enrollments_at(now).await.unwrap();
        assert_eq!(summary.processed, 2);
        let summary = processor.process_due_enrollments_at(now).await.unwrap();
        assert_eq!(summary.processed, 1);
    }

    #[tokio::test]
    async fn test_condition_step_advances_without_send() {
        let h = harness(&[(StepType::Condition, None), (StepType::Email, None)]).await;
        let now = Utc::now();
        let eid = enroll(&h, Some("dana@example.com"), now).await;

        h.processor.process_due_enrollments_at(now).await.unwrap();

        let e = h.store.get_enrollment(eid).await.unwrap().unwrap();
        assert_eq!(e.current_step_id, Some(h.steps[1]));
        assert_eq!(e.next_send_at, Some(now));
        assert!(h.transport.sent().await.is_empty());
    }

    async fn seed_enrollment(h: &Harness, step_id: Option<Uuid>, at: DateTime<Utc>) -> Uuid {
        let id = Uuid::new_v4();
        h.store
            .insert_enrollment(CampaignEnrollment {
                id,
                campaign_id: h.campaign_id,
                contact_id: Uuid::new_v4(),
                current_step_id: step_id,
                status: "active".to_string(),
                next_send_at: Some(at),
                thread_id: None,
                provider_message_id: None,
                claimed_until: None,
                enrolled_at: at,
                updated_at: at,
            })
            .await;
        id
    }

    #[tokio::test]
    async fn test_enrollment_without_step_is_completed_uncounted() {
        let h = harness(&[(StepType::Email, None)]).await;
        let now = Utc::now();
        let eid = seed_enrollment(&h, None, now).await;

        let summary = h.processor.process_due_enrollments_at(now).await.unwrap();
        assert_eq!(summary, ProcessSummary::default());

        let e = h.store.get_enrollment(eid).await.unwrap().unwrap();
        assert_eq!(e.status, "completed");
        assert_eq!(e.next_send_at, None);
        assert_eq!(e.claimed_until, None);
        assert!(h.transport.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_step_is_skipped_and_released() {
        let h = harness(&[(StepType::Email, None)]).await;
        let now = Utc::now();
        let gone = Uuid::new_v4();
        let eid = seed_enrollment(&h, Some(gone), now).await;

        let summary = h.processor.process_due_enrollments_at(now).await.unwrap();
        assert_eq!(summary, ProcessSummary::default());

        let e = h.store.get_enrollment(eid).await.unwrap().unwrap();
        assert_eq!(e.status, "active");
        assert_eq!(e.current_step_id, Some(gone));
        assert_eq!(e.next_send_at, Some(now));
        assert_eq!(e.claimed_until, None);
        assert!(h.transport.sent().await.is_empty());
        assert!(h.store.events_for(eid).await.is_empty());
    }
}
