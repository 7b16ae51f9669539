//! Campaign Manager - campaign lifecycle, sequence editing and enrollment

use cadence_common::types::{CampaignId, ContactId, EnrollmentId, StepId};
use cadence_storage::models::{
    Campaign, CampaignEnrollment, CampaignStats, CampaignStatus, CampaignStep, CreateCampaign,
    CreateEnrollment, CreateStep, EnrollmentStatus, StepType,
};
use cadence_storage::SequenceStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Campaign manager errors
#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Campaign not found")]
    NotFound,

    #[error("Step not found")]
    StepNotFound,

    #[error("Enrollment not found")]
    EnrollmentNotFound,

    #[error("Cannot move campaign from {from} to {to}")]
    InvalidTransition {
        from: CampaignStatus,
        to: CampaignStatus,
    },

    #[error("Campaign has no steps")]
    NoSteps,

    #[error("Invalid step: {0}")]
    InvalidStep(String),

    #[error("Invalid step order: {0}")]
    InvalidOrder(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Store error: {0}")]
    Store(#[from] cadence_common::Error),
}

/// Longest wait a step may hold, about ten years
const MAX_WAIT_DAYS: i32 = 3650;

/// Step definition supplied by the user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStep {
    pub step_type: StepType,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub wait_days: Option<i32>,
}

impl NewStep {
    fn validate(&self) -> Result<(), CampaignError> {
        let blank = |v: &Option<String>| v.as_deref().map(str::trim).unwrap_or("").is_empty();
        match self.step_type {
            StepType::Email if blank(&self.subject) => {
                Err(CampaignError::InvalidStep("email step needs a subject".to_string()))
            }
            StepType::Email if blank(&self.body) => {
                Err(CampaignError::InvalidStep("email step needs a body".to_string()))
            }
            StepType::Wait if self.wait_days.map(|d| d < 0).unwrap_or(false) => Err(
                CampaignError::InvalidStep("wait days cannot be negative".to_string()),
            ),
            StepType::Wait if self.wait_days.map(|d| d > MAX_WAIT_DAYS).unwrap_or(false) => {
                Err(CampaignError::InvalidStep(format!(
                    "wait days cannot exceed {MAX_WAIT_DAYS}"
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Result of an enrollment request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollOutcome {
    pub enrolled: u32,
    pub skipped: u32,
}

/// Campaign Manager - Manages campaign lifecycle
#[derive(Clone)]
pub struct CampaignManager {
    store: Arc<dyn SequenceStore>,
}

impl CampaignManager {
    pub fn new(store: Arc<dyn SequenceStore>) -> Self {
        Self { store }
    }

    /// Create a campaign in draft status
    pub async fn create_campaign(
        &self,
        name: &str,
        description: Option<String>,
    ) -> Result<Campaign, CampaignError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CampaignError::InvalidInput("name is required".to_string()));
        }

        let campaign = self
            .store
            .create_campaign(CreateCampaign {
                name: name.to_string(),
                description,
            })
            .await?;

        info!(campaign_id = %campaign.id, "Campaign created");
        Ok(campaign)
    }

    pub async fn get_campaign(&self, campaign_id: CampaignId) -> Result<Campaign, CampaignError> {
        self.store
            .get_campaign(campaign_id)
            .await?
            .ok_or(CampaignError::NotFound)
    }

    pub async fn list_campaigns(
        &self,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>, CampaignError> {
        Ok(self.store.list_campaigns(status, limit, offset).await?)
    }

    /// Apply a user status change.
    ///
    /// Activating requires at least one step. Setting the current status again
    /// is a no-op.
    pub async fn set_status(
        &self,
        campaign_id: CampaignId,
        status: CampaignStatus,
    ) -> Result<Campaign, CampaignError> {
        let campaign = self.get_campaign(campaign_id).await?;
        let current = campaign
            .status_enum()
            .ok_or_else(|| CampaignError::InvalidInput(format!("unknown status {}", campaign.status)))?;

        if current == status {
            return Ok(campaign);
        }
        if !current.can_transition_to(status) {
            return Err(CampaignError::InvalidTransition {
                from: current,
                to: status,
            });
        }
        if status == CampaignStatus::Active && self.store.max_step_number(campaign_id).await? == 0 {
            return Err(CampaignError::NoSteps);
        }

        let updated = self
            .store
            .update_campaign_status(campaign_id, status)
            .await?
            .ok_or(CampaignError::NotFound)?;

        info!(%campaign_id, from = %current, to = %status, "Campaign status changed");
        Ok(updated)
    }

    /// Delete a campaign with its steps, enrollments and events
    pub async fn delete_campaign(&self, campaign_id: CampaignId) -> Result<(), CampaignError> {
        if !self.store.delete_campaign(campaign_id).await? {
            return Err(CampaignError::NotFound);
        }
        info!(%campaign_id, "Campaign deleted");
        Ok(())
    }

    pub async fn list_steps(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Vec<CampaignStep>, CampaignError> {
        self.get_campaign(campaign_id).await?;
        Ok(self.store.list_steps(campaign_id).await?)
    }

    /// Append a step after the current last one
    pub async fn add_step(
        &self,
        campaign_id: CampaignId,
        step: NewStep,
    ) -> Result<CampaignStep, CampaignError> {
        step.validate()?;
        self.get_campaign(campaign_id).await?;

        let step_number = self.store.max_step_number(campaign_id).await? + 1;
        let created = self
            .store
            .create_step(CreateStep {
                campaign_id,
                step_number,
                step_type: step.step_type,
                subject: step.subject,
                body: step.body,
                wait_days: step.wait_days,
            })
            .await?;

        debug!(%campaign_id, step_number, step_type = %created.step_type, "Step added");
        Ok(created)
    }

    /// Remove a step and close the numbering gap
    pub async fn delete_step(
        &self,
        campaign_id: CampaignId,
        step_id: StepId,
    ) -> Result<(), CampaignError> {
        self.get_campaign(campaign_id).await?;
        if !self.store.delete_step(campaign_id, step_id).await? {
            return Err(CampaignError::StepNotFound);
        }
        debug!(%campaign_id, %step_id, "Step deleted");
        Ok(())
    }

    /// Renumber steps 1..n in the given order, which must list every step once
    pub async fn reorder_steps(
        &self,
        campaign_id: CampaignId,
        ordered_ids: &[StepId],
    ) -> Result<Vec<CampaignStep>, CampaignError> {
        let existing = self.list_steps(campaign_id).await?;

        let unique: HashSet<StepId> = ordered_ids.iter().copied().collect();
        if unique.len() != ordered_ids.len() {
            return Err(CampaignError::InvalidOrder("duplicate step id".to_string()));
        }
        let current: HashSet<StepId> = existing.iter().map(|s| s.id).collect();
        if unique != current {
            return Err(CampaignError::InvalidOrder(format!(
                "expected all {} steps of the campaign",
                current.len()
            )));
        }

        self.store.reorder_steps(campaign_id, ordered_ids).await?;
        Ok(self.store.list_steps(campaign_id).await?)
    }

    /// Enroll contacts at the first step, due immediately.
    ///
    /// Contacts that are unknown or already actively enrolled are skipped.
    pub async fn enroll_contacts(
        &self,
        campaign_id: CampaignId,
        contact_ids: &[ContactId],
    ) -> Result<EnrollOutcome, CampaignError> {
        let campaign = self.get_campaign(campaign_id).await?;
        if campaign.status_enum() == Some(CampaignStatus::Completed) {
            return Err(CampaignError::InvalidInput(
                "cannot enroll into a completed campaign".to_string(),
            ));
        }

        let first_step = self
            .store
            .list_steps(campaign_id)
            .await?
            .into_iter()
            .next()
            .ok_or(CampaignError::NoSteps)?;

        let mut outcome = EnrollOutcome::default();
        let mut seen = HashSet::new();
        let now = Utc::now();

        for contact_id in contact_ids {
            if !seen.insert(*contact_id) || self.store.get_contact(*contact_id).await?.is_none() {
                outcome.skipped += 1;
                continue;
            }

            let created = self
                .store
                .create_enrollment(CreateEnrollment {
                    campaign_id,
                    contact_id: *contact_id,
                    first_step_id: first_step.id,
                    next_send_at: now,
                })
                .await?;

            match created {
                Some(_) => outcome.enrolled += 1,
                None => outcome.skipped += 1,
            }
        }

        info!(
            %campaign_id,
            enrolled = outcome.enrolled,
            skipped = outcome.skipped,
            "Contacts enrolled"
        );
        Ok(outcome)
    }

    pub async fn list_enrollments(
        &self,
        campaign_id: CampaignId,
        status: Option<EnrollmentStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CampaignEnrollment>, CampaignError> {
        self.get_campaign(campaign_id).await?;
        Ok(self
            .store
            .list_enrollments(campaign_id, status, limit, offset)
            .await?)
    }

    /// Stop an enrollment; terminal enrollments are returned unchanged
    pub async fn unenroll(
        &self,
        enrollment_id: EnrollmentId,
    ) -> Result<CampaignEnrollment, CampaignError> {
        self.store
            .set_enrollment_status(enrollment_id, EnrollmentStatus::Unsubscribed, Utc::now())
            .await?;
        self.store
            .get_enrollment(enrollment_id)
            .await?
            .ok_or(CampaignError::EnrollmentNotFound)
    }

    /// Enrollment counts per status and event counts per type
    pub async fn campaign_stats(
        &self,
        campaign_id: CampaignId,
    ) -> Result<CampaignStats, CampaignError> {
        self.get_campaign(campaign_id).await?;

        let mut stats = CampaignStats {
            campaign_id,
            ..Default::default()
        };
        stats.apply_enrollment_counts(&self.store.enrollment_status_counts(campaign_id).await?);
        stats.apply_event_counts(&self.store.event_type_counts(campaign_id).await?);
        Ok(stats)
    }
}
