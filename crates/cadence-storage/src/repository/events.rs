//! Campaign event repository (append-only)

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{CampaignEvent, CreateEvent, EventType, RecordSend};

/// Campaign event repository
#[derive(Clone)]
pub struct EventRepository {
    pool: PgPool,
}

impl EventRepository {
    /// Create a new event repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append an event
    pub async fn append(&self, input: CreateEvent) -> Result<CampaignEvent, sqlx::Error> {
        sqlx::query_as::<_, CampaignEvent>(
            r#"
            INSERT INTO campaign_events (id, enrollment_id, step_id, event_type, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.enrollment_id)
        .bind(input.step_id)
        .bind(input.event_type.to_string())
        .bind(input.metadata.unwrap_or_else(|| serde_json::json!({})))
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
    }

    /// The `sent` event for an (enrollment, step) pair, if any
    pub async fn find_sent(
        &self,
        enrollment_id: Uuid,
        step_id: Uuid,
    ) -> Result<Option<CampaignEvent>, sqlx::Error> {
        sqlx::query_as::<_, CampaignEvent>(
            r#"
            SELECT * FROM campaign_events
            WHERE enrollment_id = $1 AND step_id = $2 AND event_type = 'sent'
            "#,
        )
        .bind(enrollment_id)
        .bind(step_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Persist a delivered message: the `sent` event and the provider ids.
    ///
    /// Returns `false` when a `sent` event for the pair already existed, in
    /// which case nothing is written.
    pub async fn record_send(
        &self,
        input: RecordSend,
        now: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO campaign_events (id, enrollment_id, step_id, event_type, metadata, created_at)
            VALUES ($1, $2, $3, 'sent', $4, $5)
            ON CONFLICT (enrollment_id, step_id) WHERE event_type = 'sent' DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.enrollment_id)
        .bind(input.step_id)
        .bind(&input.metadata)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE campaign_enrollments SET
                provider_message_id = $2,
                thread_id = $3,
                updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(input.enrollment_id)
        .bind(&input.provider_message_id)
        .bind(&input.thread_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Record a reply and move the enrollment to `replied` together
    pub async fn record_reply(
        &self,
        enrollment_id: Uuid,
        step_id: Option<Uuid>,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO campaign_events (id, enrollment_id, step_id, event_type, metadata, created_at)
            VALUES ($1, $2, $3, 'replied', $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(enrollment_id)
        .bind(step_id)
        .bind(&metadata)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE campaign_enrollments SET
                status = 'replied',
                next_send_at = NULL,
                claimed_until = NULL,
                updated_at = $2
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(enrollment_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Count events of one type for an enrollment
    pub async fn count(
        &self,
        enrollment_id: Uuid,
        event_type: EventType,
    ) -> Result<i64, sqlx::Error> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM campaign_events WHERE enrollment_id = $1 AND event_type = $2",
        )
        .bind(enrollment_id)
        .bind(event_type.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0)
    }

    /// Most recent event of one type for an enrollment
    pub async fn latest(
        &self,
        enrollment_id: Uuid,
        event_type: EventType,
    ) -> Result<Option<CampaignEvent>, sqlx::Error> {
        sqlx::query_as::<_, CampaignEvent>(
            r#"
            SELECT * FROM campaign_events
            WHERE enrollment_id = $1 AND event_type = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(enrollment_id)
        .bind(event_type.to_string())
        .fetch_optional(&self.pool)
        .await
    }

    /// Event counts for a campaign grouped by type
    pub async fn type_counts(&self, campaign_id: Uuid) -> Result<Vec<(String, i64)>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT e.event_type, COUNT(*) FROM campaign_events e
            JOIN campaign_enrollments en ON en.id = e.enrollment_id
            WHERE en.campaign_id = $1
            GROUP BY e.event_type
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await
    }
}
