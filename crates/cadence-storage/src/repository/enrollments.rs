//! Campaign enrollment repository

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{CampaignEnrollment, CreateEnrollment, EnrollmentStatus};

/// Campaign enrollment repository
#[derive(Clone)]
pub struct EnrollmentRepository {
    pool: PgPool,
}

impl EnrollmentRepository {
    /// Create a new enrollment repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enroll a contact at the first step.
    ///
    /// Returns `None` when the contact already holds an active enrollment in
    /// the campaign.
    pub async fn create(
        &self,
        input: CreateEnrollment,
    ) -> Result<Option<CampaignEnrollment>, sqlx::Error> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query_as::<_, CampaignEnrollment>(
            r#"
            INSERT INTO campaign_enrollments (
                id, campaign_id, contact_id, current_step_id, status, next_send_at,
                enrolled_at, updated_at
            )
            VALUES ($1, $2, $3, $4, 'active', $5, $6, $6)
            ON CONFLICT (campaign_id, contact_id) WHERE status = 'active' DO NOTHING
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.campaign_id)
        .bind(input.contact_id)
        .bind(input.first_step_id)
        .bind(input.next_send_at)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
    }

    /// Get an enrollment by ID
    pub async fn get(&self, id: Uuid) -> Result<Option<CampaignEnrollment>, sqlx::Error> {
        sqlx::query_as::<_, CampaignEnrollment>(
            "SELECT * FROM campaign_enrollments WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Find the active enrollment of a contact in a campaign
    pub async fn find_active(
        &self,
        campaign_id: Uuid,
        contact_id: Uuid,
    ) -> Result<Option<CampaignEnrollment>, sqlx::Error> {
        sqlx::query_as::<_, CampaignEnrollment>(
            r#"
            SELECT * FROM campaign_enrollments
            WHERE campaign_id = $1 AND contact_id = $2 AND status = 'active'
            "#,
        )
        .bind(campaign_id)
        .bind(contact_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// List enrollments of a campaign
    pub async fn list_by_campaign(
        &self,
        campaign_id: Uuid,
        status: Option<EnrollmentStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CampaignEnrollment>, sqlx::Error> {
        if let Some(status) = status {
            sqlx::query_as::<_, CampaignEnrollment>(
                r#"
                SELECT * FROM campaign_enrollments
                WHERE campaign_id = $1 AND status = $2
                ORDER BY enrolled_at DESC
                LIMIT $3 OFFSET $4
                "#,
            )
            .bind(campaign_id)
            .bind(status.to_string())
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, CampaignEnrollment>(
                r#"
                SELECT * FROM campaign_enrollments
                WHERE campaign_id = $1
                ORDER BY enrolled_at DESC
                LIMIT $2 OFFSET $3
                "#,
            )
            .bind(campaign_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
        }
    }

    /// Claim due enrollments for one processing run.
    ///
    /// Rows already leased by another run are skipped; the claim lasts until
    /// `lease_until`.
    pub async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        lease_until: DateTime<Utc>,
    ) -> Result<Vec<CampaignEnrollment>, sqlx::Error> {
        sqlx::query_as::<_, CampaignEnrollment>(
            r#"
            UPDATE campaign_enrollments SET
                claimed_until = $3,
                updated_at = $1
            WHERE id IN (
                SELECT id FROM campaign_enrollments
                WHERE status = 'active'
                  AND next_send_at IS NOT NULL
                  AND next_send_at <= $1
                  AND (claimed_until IS NULL OR claimed_until <= $1)
                ORDER BY next_send_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(limit)
        .bind(lease_until)
        .fetch_all(&self.pool)
        .await
    }

    /// Drop the lease without touching anything else
    pub async fn release_claim(&self, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE campaign_enrollments SET claimed_until = NULL WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Move an active enrollment to `step_id`, due at `next_send_at`
    pub async fn advance(
        &self,
        id: Uuid,
        step_id: Uuid,
        next_send_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_enrollments SET
                current_step_id = $2,
                next_send_at = $3,
                claimed_until = NULL,
                updated_at = $4
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(id)
        .bind(step_id)
        .bind(next_send_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Move an active enrollment into a terminal status
    pub async fn set_status_if_active(
        &self,
        id: Uuid,
        status: EnrollmentStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let clear_step = status == EnrollmentStatus::Completed;
        let result = sqlx::query(
            r#"
            UPDATE campaign_enrollments SET
                status = $2,
                current_step_id = CASE WHEN $3 THEN NULL ELSE current_step_id END,
                next_send_at = NULL,
                claimed_until = NULL,
                updated_at = $4
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .bind(clear_step)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Active enrollments that have a provider thread to poll
    pub async fn list_active_threaded(&self) -> Result<Vec<CampaignEnrollment>, sqlx::Error> {
        sqlx::query_as::<_, CampaignEnrollment>(
            r#"
            SELECT * FROM campaign_enrollments
            WHERE status = 'active' AND thread_id IS NOT NULL
            ORDER BY enrolled_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
    }

    /// Enrollment counts grouped by status
    pub async fn status_counts(&self, campaign_id: Uuid) -> Result<Vec<(String, i64)>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT status, COUNT(*) FROM campaign_enrollments
            WHERE campaign_id = $1
            GROUP BY status
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await
    }
}
