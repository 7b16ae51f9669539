//! Storage seam used by the campaign engine.
//!
//! Each state change the engine makes is a dedicated operation here; there is
//! no generic field update. [`PgSequenceStore`] delegates to the concrete
//! repositories, [`crate::memory::MemorySequenceStore`] keeps everything in
//! memory.

use async_trait::async_trait;
use cadence_common::types::{CampaignId, ContactId, EnrollmentId, StepId};
use cadence_common::{Error, Result};
use chrono::{DateTime, Utc};

use crate::db::DatabasePool;
use crate::models::{
    Campaign, CampaignEnrollment, CampaignEvent, CampaignStatus, CampaignStep, ContactWithAccount,
    CreateCampaign, CreateEnrollment, CreateEvent, CreateStep, EnrollmentStatus, EventType,
    RecordSend,
};
use crate::repository::{
    CampaignRepository, ContactRepository, EnrollmentRepository, EventRepository, StepRepository,
};

/// Persistence operations for campaigns, steps, enrollments and events
#[async_trait]
pub trait SequenceStore: Send + Sync {
    // Campaigns
    async fn create_campaign(&self, input: CreateCampaign) -> Result<Campaign>;
    async fn get_campaign(&self, id: CampaignId) -> Result<Option<Campaign>>;
    async fn list_campaigns(
        &self,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>>;
    async fn update_campaign_status(
        &self,
        id: CampaignId,
        status: CampaignStatus,
    ) -> Result<Option<Campaign>>;
    /// Remove events, enrollments, steps and the campaign in one unit
    async fn delete_campaign(&self, id: CampaignId) -> Result<bool>;

    // Steps
    async fn create_step(&self, input: CreateStep) -> Result<CampaignStep>;
    async fn get_step(&self, id: StepId) -> Result<Option<CampaignStep>>;
    async fn list_steps(&self, campaign_id: CampaignId) -> Result<Vec<CampaignStep>>;
    async fn next_step_after(
        &self,
        campaign_id: CampaignId,
        step_number: i32,
    ) -> Result<Option<CampaignStep>>;
    async fn max_step_number(&self, campaign_id: CampaignId) -> Result<i32>;
    /// Delete a step, repoint active enrollments and renumber the rest
    async fn delete_step(&self, campaign_id: CampaignId, step_id: StepId) -> Result<bool>;
    async fn reorder_steps(&self, campaign_id: CampaignId, ordered_ids: &[StepId]) -> Result<()>;

    // Enrollments
    /// Returns `None` if the contact is already actively enrolled
    async fn create_enrollment(
        &self,
        input: CreateEnrollment,
    ) -> Result<Option<CampaignEnrollment>>;
    async fn get_enrollment(&self, id: EnrollmentId) -> Result<Option<CampaignEnrollment>>;
    async fn find_active_enrollment(
        &self,
        campaign_id: CampaignId,
        contact_id: ContactId,
    ) -> Result<Option<CampaignEnrollment>>;
    async fn list_enrollments(
        &self,
        campaign_id: CampaignId,
        status: Option<EnrollmentStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CampaignEnrollment>>;
    /// Atomically lease up to `limit` due enrollments until `lease_until`
    async fn claim_due_enrollments(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        lease_until: DateTime<Utc>,
    ) -> Result<Vec<CampaignEnrollment>>;
    async fn release_claim(&self, id: EnrollmentId) -> Result<()>;
    /// Point an active enrollment at `step_id`; also clears the lease
    async fn advance_enrollment(
        &self,
        id: EnrollmentId,
        step_id: StepId,
        next_send_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool>;
    /// Move an active enrollment to `status`; no-op if already terminal
    async fn set_enrollment_status(
        &self,
        id: EnrollmentId,
        status: EnrollmentStatus,
        now: DateTime<Utc>,
    ) -> Result<bool>;
    /// Close out an active enrollment with no step left to run
    async fn complete_enrollment(&self, id: EnrollmentId, now: DateTime<Utc>) -> Result<bool> {
        self.set_enrollment_status(id, EnrollmentStatus::Completed, now)
            .await
    }
    async fn list_active_threaded_enrollments(&self) -> Result<Vec<CampaignEnrollment>>;

    // Contacts
    async fn get_contact(&self, id: ContactId) -> Result<Option<ContactWithAccount>>;

    // Events
    async fn append_event(&self, input: CreateEvent) -> Result<CampaignEvent>;
    async fn find_sent_event(
        &self,
        enrollment_id: EnrollmentId,
        step_id: StepId,
    ) -> Result<Option<CampaignEvent>>;
    /// Insert the `sent` event and provider ids; `false` if already recorded
    async fn record_send(&self, input: RecordSend, now: DateTime<Utc>) -> Result<bool>;
    async fn record_reply(
        &self,
        enrollment_id: EnrollmentId,
        step_id: Option<StepId>,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<()>;
    async fn count_events(&self, enrollment_id: EnrollmentId, event_type: EventType)
        -> Result<i64>;
    async fn latest_event(
        &self,
        enrollment_id: EnrollmentId,
        event_type: EventType,
    ) -> Result<Option<CampaignEvent>>;

    // Statistics
    async fn enrollment_status_counts(&self, campaign_id: CampaignId)
        -> Result<Vec<(String, i64)>>;
    async fn event_type_counts(&self, campaign_id: CampaignId) -> Result<Vec<(String, i64)>>;

    /// Whether the backing store is reachable
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

fn db_err(e: sqlx::Error) -> Error {
    Error::Database(e.to_string())
}

/// PostgreSQL-backed store
#[derive(Clone)]
pub struct PgSequenceStore {
    db: DatabasePool,
    campaigns: CampaignRepository,
    steps: StepRepository,
    enrollments: EnrollmentRepository,
    events: EventRepository,
    contacts: ContactRepository,
}

impl PgSequenceStore {
    pub fn new(db: DatabasePool) -> Self {
        let pool = db.pool().clone();
        Self {
            campaigns: CampaignRepository::new(pool.clone()),
            steps: StepRepository::new(pool.clone()),
            enrollments: EnrollmentRepository::new(pool.clone()),
            events: EventRepository::new(pool.clone()),
            contacts: ContactRepository::new(pool),
            db,
        }
    }
}

#[async_trait]
impl SequenceStore for PgSequenceStore {
    async fn create_campaign(&self, input: CreateCampaign) -> Result<Campaign> {
        self.campaigns.create(input).await.map_err(db_err)
    }

    async fn get_campaign(&self, id: CampaignId) -> Result<Option<Campaign>> {
        self.campaigns.get(id).await.map_err(db_err)
    }

    async fn list_campaigns(
        &self,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>> {
        self.campaigns.list(status, limit, offset).await.map_err(db_err)
    }

    async fn update_campaign_status(
        &self,
        id: CampaignId,
        status: CampaignStatus,
    ) -> Result<Option<Campaign>> {
        self.campaigns.update_status(id, status).await.map_err(db_err)
    }

    async fn delete_campaign(&self, id: CampaignId) -> Result<bool> {
        self.campaigns.delete_cascade(id).await.map_err(db_err)
    }

    async fn create_step(&self, input: CreateStep) -> Result<CampaignStep> {
        self.steps.create(input).await.map_err(db_err)
    }

    async fn get_step(&self, id: StepId) -> Result<Option<CampaignStep>> {
        self.steps.get(id).await.map_err(db_err)
    }

    async fn list_steps(&self, campaign_id: CampaignId) -> Result<Vec<CampaignStep>> {
        self.steps.list_by_campaign(campaign_id).await.map_err(db_err)
    }

    async fn next_step_after(
        &self,
        campaign_id: CampaignId,
        step_number: i32,
    ) -> Result<Option<CampaignStep>> {
        self.steps.next_after(campaign_id, step_number).await.map_err(db_err)
    }

    async fn max_step_number(&self, campaign_id: CampaignId) -> Result<i32> {
        self.steps.max_step_number(campaign_id).await.map_err(db_err)
    }

    async fn delete_step(&self, campaign_id: CampaignId, step_id: StepId) -> Result<bool> {
        self.steps
            .delete_and_renumber(campaign_id, step_id)
            .await
            .map_err(db_err)
    }

    async fn reorder_steps(&self, campaign_id: CampaignId, ordered_ids: &[StepId]) -> Result<()> {
        self.steps.reorder(campaign_id, ordered_ids).await.map_err(db_err)
    }

    async fn create_enrollment(
        &self,
        input: CreateEnrollment,
    ) -> Result<Option<CampaignEnrollment>> {
        self.enrollments.create(input).await.map_err(db_err)
    }

    async fn get_enrollment(&self, id: EnrollmentId) -> Result<Option<CampaignEnrollment>> {
        self.enrollments.get(id).await.map_err(db_err)
    }

    async fn find_active_enrollment(
        &self,
        campaign_id: CampaignId,
        contact_id: ContactId,
    ) -> Result<Option<CampaignEnrollment>> {
        self.enrollments
            .find_active(campaign_id, contact_id)
            .await
            .map_err(db_err)
    }

    async fn list_enrollments(
        &self,
        campaign_id: CampaignId,
        status: Option<EnrollmentStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CampaignEnrollment>> {
        self.enrollments
            .list_by_campaign(campaign_id, status, limit, offset)
            .await
            .map_err(db_err)
    }

    async fn claim_due_enrollments(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        lease_until: DateTime<Utc>,
    ) -> Result<Vec<CampaignEnrollment>> {
        self.enrollments
            .claim_due(now, limit, lease_until)
            .await
            .map_err(db_err)
    }

    async fn release_claim(&self, id: EnrollmentId) -> Result<()> {
        self.enrollments.release_claim(id).await.map_err(db_err)
    }

    async fn advance_enrollment(
        &self,
        id: EnrollmentId,
        step_id: StepId,
        next_send_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.enrollments
            .advance(id, step_id, next_send_at, now)
            .await
            .map_err(db_err)
    }

    async fn set_enrollment_status(
        &self,
        id: EnrollmentId,
        status: EnrollmentStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.enrollments
            .set_status_if_active(id, status, now)
            .await
            .map_err(db_err)
    }

    async fn list_active_threaded_enrollments(&self) -> Result<Vec<CampaignEnrollment>> {
        self.enrollments.list_active_threaded().await.map_err(db_err)
    }

    async fn get_contact(&self, id: ContactId) -> Result<Option<ContactWithAccount>> {
        self.contacts.get_with_account(id).await.map_err(db_err)
    }

    async fn append_event(&self, input: CreateEvent) -> Result<CampaignEvent> {
        self.events.append(input).await.map_err(db_err)
    }

    async fn find_sent_event(
        &self,
        enrollment_id: EnrollmentId,
        step_id: StepId,
    ) -> Result<Option<CampaignEvent>> {
        self.events.find_sent(enrollment_id, step_id).await.map_err(db_err)
    }

    async fn record_send(&self, input: RecordSend, now: DateTime<Utc>) -> Result<bool> {
        self.events.record_send(input, now).await.map_err(db_err)
    }

    async fn record_reply(
        &self,
        enrollment_id: EnrollmentId,
        step_id: Option<StepId>,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.events
            .record_reply(enrollment_id, step_id, metadata, now)
            .await
            .map_err(db_err)
    }

    async fn count_events(
        &self,
        enrollment_id: EnrollmentId,
        event_type: EventType,
    ) -> Result<i64> {
        self.events.count(enrollment_id, event_type).await.map_err(db_err)
    }

    async fn latest_event(
        &self,
        enrollment_id: EnrollmentId,
        event_type: EventType,
    ) -> Result<Option<CampaignEvent>> {
        self.events.latest(enrollment_id, event_type).await.map_err(db_err)
    }

    async fn enrollment_status_counts(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Vec<(String, i64)>> {
        self.enrollments.status_counts(campaign_id).await.map_err(db_err)
    }

    async fn event_type_counts(&self, campaign_id: CampaignId) -> Result<Vec<(String, i64)>> {
        self.events.type_counts(campaign_id).await.map_err(db_err)
    }

    async fn health_check(&self) -> Result<()> {
        self.db.health_check().await
    }
}
