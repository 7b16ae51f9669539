//! Step Advancer - moves an enrollment past a finished step

use cadence_common::types::{CampaignId, EnrollmentId};
use cadence_common::{Error, Result};
use cadence_storage::SequenceStore;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::debug;

/// Computes the next step and its due time, or completes the enrollment
#[derive(Clone)]
pub struct StepAdvancer {
    store: Arc<dyn SequenceStore>,
}

impl StepAdvancer {
    pub fn new(store: Arc<dyn SequenceStore>) -> Self {
        Self { store }
    }

    /// Advance past `current_step_number`.
    ///
    /// A following wait step with positive days is due that many calendar days
    /// from `now`; any other following step is due immediately. With no
    /// following step the enrollment completes. Safe to call again: both
    /// writes only touch an active enrollment.
    pub async fn advance_to_next_step(
        &self,
        enrollment_id: EnrollmentId,
        campaign_id: CampaignId,
        current_step_number: i32,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match self
            .store
            .next_step_after(campaign_id, current_step_number)
            .await?
        {
            Some(next) => {
                let next_send_at = match next.positive_wait_days() {
                    Some(days) => now.checked_add_signed(Duration::days(days)).ok_or_else(|| {
                        Error::Validation(format!(
                            "wait of {days} days on step {} is out of range",
                            next.id
                        ))
                    })?,
                    None => now,
                };
                self.store
                    .advance_enrollment(enrollment_id, next.id, next_send_at, now)
                    .await?;
                debug!(
                    %enrollment_id,
                    step_number = next.step_number,
                    %next_send_at,
                    "Enrollment advanced"
                );
            }
            None => {
                self.store
                    .complete_enrollment(enrollment_id, now)
                    .await?;
                debug!(%enrollment_id, "Enrollment completed final step");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_storage::models::{CreateCampaign, CreateEnrollment, CreateStep, StepType};
    use cadence_storage::MemorySequenceStore;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    async fn setup(steps: &[(StepType, Option<i32>)]) -> (Arc<MemorySequenceStore>, Uuid, Vec<Uuid>) {
        let store = Arc::new(MemorySequenceStore::new());
        let campaign = store
            .create_campaign(CreateCampaign {
                name: "Renewals".to_string(),
                description: None,
            })
            .await
            .unwrap();

        let mut ids = Vec::new();
        for (i, (step_type, wait_days)) in steps.iter().enumerate() {
            let step = store
                .create_step(CreateStep {
                    campaign_id: campaign.id,
                    step_number: i as i32 + 1,
                    step_type: *step_type,
                    subject: Some("Hello".to_string()),
                    body: Some("Body".to_string()),
                    wait_days: *wait_days,
                })
                .await
                .unwrap();
            ids.push(step.id);
        }
        (store, campaign.id, ids)
    }

    #[tokio::test]
    async fn test_wait_step_sets_exact_due_time() {
        let (store, campaign_id, steps) =
            setup(&[(StepType::Email, None), (StepType::Wait, Some(3))]).await;
        let now = Utc::now();
        let enrollment = store
            .create_enrollment(CreateEnrollment {
                campaign_id,
                contact_id: Uuid::new_v4(),
                first_step_id: steps[0],
                next_send_at: now,
            })
            .await
            .unwrap()
            .unwrap();

        StepAdvancer::new(store.clone())
            .advance_to_next_step(enrollment.id, campaign_id, 1, now)
            .await
            .unwrap();

        let stored = store.get_enrollment(enrollment.id).await.unwrap().unwrap();
        assert_eq!(stored.current_step_id, Some(steps[1]));
        assert_eq!(stored.next_send_at, Some(now + Duration::days(3)));
    }

    #[tokio::test]
    async fn test_out_of_range_wait_leaves_enrollment_untouched() {
        let (store, campaign_id, steps) =
            setup(&[(StepType::Email, None), (StepType::Wait, Some(1_000_000_000))]).await;
        let now = Utc::now();
        let enrollment = store
            .create_enrollment(CreateEnrollment {
                campaign_id,
                contact_id: Uuid::new_v4(),
                first_step_id: steps[0],
                next_send_at: now,
            })
            .await
            .unwrap()
            .unwrap();

        let err = StepAdvancer::new(store.clone())
            .advance_to_next_step(enrollment.id, campaign_id, 1, now)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let stored = store.get_enrollment(enrollment.id).await.unwrap().unwrap();
        assert_eq!(stored.current_step_id, Some(steps[0]));
        assert_eq!(stored.next_send_at, Some(now));
    }

    #[tokio::test]
    async fn test_zero_day_wait_is_due_now() {
        let (store, campaign_id, steps) =
            setup(&[(StepType::Email, None), (StepType::Wait, Some(0))]).await;
        let now = Utc::now();
        let enrollment = store
            .create_enrollment(CreateEnrollment {
                campaign_id,
                contact_id: Uuid::new_v4(),
                first_step_id: steps[0],
                next_send_at: now,
            })
            .await
            .unwrap()
            .unwrap();

        StepAdvancer::new(store.clone())
            .advance_to_next_step(enrollment.id, campaign_id, 1, now)
            .await
            .unwrap();

        let stored = store.get_enrollment(enrollment.id).await.unwrap().unwrap();
        assert_eq!(stored.next_send_at, Some(now));
    }

    #[tokio::test]
    async fn test_last_step_completes_and_repeat_is_noop() {
        let (store, campaign_id, steps) = setup(&[(StepType::Email, None)]).await;
        let now = Utc::now();
        let enrollment = store
            .create_enrollment(CreateEnrollment {
                campaign_id,
                contact_id: Uuid::new_v4(),
                first_step_id: steps[0],
                next_send_at: now,
            })
            .await
            .unwrap()
            .unwrap();

        let advancer = StepAdvancer::new(store.clone());
        advancer
            .advance_to_next_step(enrollment.id, campaign_id, 1, now)
            .await
            .unwrap();
        advancer
            .advance_to_next_step(enrollment.id, campaign_id, 1, now)
            .await
            .unwrap();

        let stored = store.get_enrollment(enrollment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, "completed");
        assert_eq!(stored.current_step_id, None);
        assert_eq!(stored.next_send_at, None);
    }
}
