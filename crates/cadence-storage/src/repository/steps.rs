//! Campaign step repository

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{CampaignStep, CreateStep};

/// Campaign step repository
#[derive(Clone)]
pub struct StepRepository {
    pool: PgPool,
}

impl StepRepository {
    /// Create a new step repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a step at the given position
    pub async fn create(&self, input: CreateStep) -> Result<CampaignStep, sqlx::Error> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query_as::<_, CampaignStep>(
            r#"
            INSERT INTO campaign_steps (
                id, campaign_id, step_number, step_type, subject, body, wait_days,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.campaign_id)
        .bind(input.step_number)
        .bind(input.step_type.to_string())
        .bind(&input.subject)
        .bind(&input.body)
        .bind(input.wait_days)
        .bind(now)
        .fetch_one(&self.pool)
        .await
    }

    /// Get a step by ID
    pub async fn get(&self, id: Uuid) -> Result<Option<CampaignStep>, sqlx::Error> {
        sqlx::query_as::<_, CampaignStep>("SELECT * FROM campaign_steps WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// List a campaign's steps in order
    pub async fn list_by_campaign(
        &self,
        campaign_id: Uuid,
    ) -> Result<Vec<CampaignStep>, sqlx::Error> {
        sqlx::query_as::<_, CampaignStep>(
            "SELECT * FROM campaign_steps WHERE campaign_id = $1 ORDER BY step_number ASC",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Smallest-numbered step strictly after `step_number`
    pub async fn next_after(
        &self,
        campaign_id: Uuid,
        step_number: i32,
    ) -> Result<Option<CampaignStep>, sqlx::Error> {
        sqlx::query_as::<_, CampaignStep>(
            r#"
            SELECT * FROM campaign_steps
            WHERE campaign_id = $1 AND step_number > $2
            ORDER BY step_number ASC
            LIMIT 1
            "#,
        )
        .bind(campaign_id)
        .bind(step_number)
        .fetch_optional(&self.pool)
        .await
    }

    /// Highest step number in the campaign (0 when empty)
    pub async fn max_step_number(&self, campaign_id: Uuid) -> Result<i32, sqlx::Error> {
        let max: (Option<i32>,) =
            sqlx::query_as("SELECT MAX(step_number) FROM campaign_steps WHERE campaign_id = $1")
                .bind(campaign_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(max.0.unwrap_or(0))
    }

    /// Delete a step and close the gap it leaves.
    ///
    /// Active enrollments sitting on the deleted step move to the step that
    /// takes over its position, or complete when it was the last one.
    pub async fn delete_and_renumber(
        &self,
        campaign_id: Uuid,
        step_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let deleted: Option<(i32,)> = sqlx::query_as(
            r#"
            SELECT step_number FROM campaign_steps
            WHERE id = $1 AND campaign_id = $2
            FOR UPDATE
            "#,
        )
        .bind(step_id)
        .bind(campaign_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((step_number,)) = deleted else {
            return Ok(false);
        };

        let successor: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM campaign_steps
            WHERE campaign_id = $1 AND step_number > $2
            ORDER BY step_number ASC
            LIMIT 1
            "#,
        )
        .bind(campaign_id)
        .bind(step_number)
        .fetch_optional(&mut *tx)
        .await?;

        let now = Utc::now();
        match successor {
            Some((next_id,)) => {
                sqlx::query(
                    r#"
                    UPDATE campaign_enrollments SET
                        current_step_id = $2,
                        updated_at = $3
                    WHERE current_step_id = $1 AND status = 'active'
                    "#,
                )
                .bind(step_id)
                .bind(next_id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE campaign_enrollments SET
                        status = 'completed',
                        current_step_id = NULL,
                        next_send_at = NULL,
                        claimed_until = NULL,
                        updated_at = $2
                    WHERE current_step_id = $1 AND status = 'active'
                    "#,
                )
                .bind(step_id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
        }

        sqlx::query("DELETE FROM campaign_steps WHERE id = $1")
            .bind(step_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            UPDATE campaign_steps SET
                step_number = step_number - 1,
                updated_at = $3
            WHERE campaign_id = $1 AND step_number > $2
            "#,
        )
        .bind(campaign_id)
        .bind(step_number)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Assign step numbers 1..n following `ordered_ids`
    pub async fn reorder(
        &self,
        campaign_id: Uuid,
        ordered_ids: &[Uuid],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        for (index, step_id) in ordered_ids.iter().enumerate() {
            sqlx::query(
                r#"
                UPDATE campaign_steps SET
                    step_number = $3,
                    updated_at = $4
                WHERE id = $1 AND campaign_id = $2
                "#,
            )
            .bind(step_id)
            .bind(campaign_id)
            .bind(index as i32 + 1)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
