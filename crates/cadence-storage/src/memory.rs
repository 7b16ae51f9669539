//! In-memory [`SequenceStore`], used by tests and local runs without Postgres.
//!
//! It mirrors the Postgres semantics: the one-active-enrollment rule, the
//! single `sent` event per step, leases, and dense step renumbering.

use std::collections::HashMap;

use async_trait::async_trait;
use cadence_common::types::{AccountId, CampaignId, ContactId, EnrollmentId, StepId};
use cadence_common::Result;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{
    Account, Campaign, CampaignEnrollment, CampaignEvent, CampaignStatus, CampaignStep, Contact,
    ContactWithAccount, CreateCampaign, CreateEnrollment, CreateEvent, CreateStep,
    EnrollmentStatus, EventType, RecordSend,
};
use crate::store::SequenceStore;

#[derive(Default)]
struct State {
    campaigns: HashMap<CampaignId, Campaign>,
    steps: HashMap<StepId, CampaignStep>,
    enrollments: HashMap<EnrollmentId, CampaignEnrollment>,
    // insertion order doubles as creation order
    events: Vec<CampaignEvent>,
    contacts: HashMap<ContactId, Contact>,
    accounts: HashMap<AccountId, Account>,
}

impl State {
    fn steps_of(&self, campaign_id: CampaignId) -> Vec<CampaignStep> {
        let mut steps: Vec<CampaignStep> = self
            .steps
            .values()
            .filter(|s| s.campaign_id == campaign_id)
            .cloned()
            .collect();
        steps.sort_by_key(|s| s.step_number);
        steps
    }

    fn campaign_of_enrollment(&self, enrollment_id: EnrollmentId) -> Option<CampaignId> {
        self.enrollments.get(&enrollment_id).map(|e| e.campaign_id)
    }
}

/// In-memory store
#[derive(Default)]
pub struct MemorySequenceStore {
    state: RwLock<State>,
}

impl MemorySequenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a CRM account
    pub async fn insert_account(&self, account: Account) {
        self.state.write().await.accounts.insert(account.id, account);
    }

    /// Add a CRM contact
    pub async fn insert_contact(&self, contact: Contact) {
        self.state.write().await.contacts.insert(contact.id, contact);
    }

    /// Store an enrollment row as given, bypassing enrollment checks
    pub async fn insert_enrollment(&self, enrollment: CampaignEnrollment) {
        self.state
            .write()
            .await
            .enrollments
            .insert(enrollment.id, enrollment);
    }

    /// All events recorded for an enrollment, oldest first
    pub async fn events_for(&self, enrollment_id: EnrollmentId) -> Vec<CampaignEvent> {
        self.state
            .read()
            .await
            .events
            .iter()
            .filter(|e| e.enrollment_id == enrollment_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SequenceStore for MemorySequenceStore {
    async fn create_campaign(&self, input: CreateCampaign) -> Result<Campaign> {
        let now = Utc::now();
        let campaign = Campaign {
            id: Uuid::new_v4(),
            name: input.name,
            description: input.description,
            status: CampaignStatus::Draft.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.state
            .write()
            .await
            .campaigns
            .insert(campaign.id, campaign.clone());
        Ok(campaign)
    }

    async fn get_campaign(&self, id: CampaignId) -> Result<Option<Campaign>> {
        Ok(self.state.read().await.campaigns.get(&id).cloned())
    }

    async fn list_campaigns(
        &self,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>> {
        let state = self.state.read().await;
        let mut campaigns: Vec<Campaign> = state
            .campaigns
            .values()
            .filter(|c| status.map(|s| c.status == s.to_string()).unwrap_or(true))
            .cloned()
            .collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(campaigns
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn update_campaign_status(
        &self,
        id: CampaignId,
        status: CampaignStatus,
    ) -> Result<Option<Campaign>> {
        let mut state = self.state.write().await;
        Ok(state.campaigns.get_mut(&id).map(|campaign| {
            campaign.status = status.to_string();
            campaign.updated_at = Utc::now();
            campaign.clone()
        }))
    }

    async fn delete_campaign(&self, id: CampaignId) -> Result<bool> {
        let mut state = self.state.write().await;
        let enrollment_ids: Vec<EnrollmentId> = state
            .enrollments
            .values()
            .filter(|e| e.campaign_id == id)
            .map(|e| e.id)
            .collect();

        state
            .events
            .retain(|e| !enrollment_ids.contains(&e.enrollment_id));
        state.enrollments.retain(|_, e| e.campaign_id != id);
        state.steps.retain(|_, s| s.campaign_id != id);
        Ok(state.campaigns.remove(&id).is_some())
    }

    async fn create_step(&self, input: CreateStep) -> Result<CampaignStep> {
        let now = Utc::now();
        let step = CampaignStep {
            id: Uuid::new_v4(),
            campaign_id: input.campaign_id,
            step_number: input.step_number,
            step_type: input.step_type.to_string(),
            subject: input.subject,
            body: input.body,
            wait_days: input.wait_days,
            created_at: now,
            updated_at: now,
        };
        self.state.write().await.steps.insert(step.id, step.clone());
        Ok(step)
    }

    async fn get_step(&self, id: StepId) -> Result<Option<CampaignStep>> {
        Ok(self.state.read().await.steps.get(&id).cloned())
    }

    async fn list_steps(&self, campaign_id: CampaignId) -> Result<Vec<CampaignStep>> {
        Ok(self.state.read().await.steps_of(campaign_id))
    }

    async fn next_step_after(
        &self,
        campaign_id: CampaignId,
        step_number: i32,
    ) -> Result<Option<CampaignStep>> {
        Ok(self
            .state
            .read()
            .await
            .steps_of(campaign_id)
            .into_iter()
            .find(|s| s.step_number > step_number))
    }

    async fn max_step_number(&self, campaign_id: CampaignId) -> Result<i32> {
        Ok(self
            .state
            .read()
            .await
            .steps_of(campaign_id)
            .last()
            .map(|s| s.step_number)
            .unwrap_or(0))
    }

    async fn delete_step(&self, campaign_id: CampaignId, step_id: StepId) -> Result<bool> {
        let mut state = self.state.write().await;
        let step_number = match state.steps.get(&step_id) {
            Some(step) if step.campaign_id == campaign_id => step.step_number,
            _ => return Ok(false),
        };

        let successor = state
            .steps_of(campaign_id)
            .into_iter()
            .find(|s| s.step_number > step_number)
            .map(|s| s.id);

        let now = Utc::now();
        for enrollment in state.enrollments.values_mut() {
            if enrollment.current_step_id != Some(step_id) {
                continue;
            }
            if enrollment.is_active() {
                match successor {
                    Some(next_id) => enrollment.current_step_id = Some(next_id),
                    None => {
                        enrollment.status = EnrollmentStatus::Completed.to_string();
                        enrollment.current_step_id = None;
                        enrollment.next_send_at = None;
                        enrollment.claimed_until = None;
                    }
                }
            } else {
                enrollment.current_step_id = None;
            }
            enrollment.updated_at = now;
        }

        state.steps.remove(&step_id);
        for step in state.steps.values_mut() {
            if step.campaign_id == campaign_id && step.step_number > step_number {
                step.step_number -= 1;
                step.updated_at = now;
            }
        }

        Ok(true)
    }

    async fn reorder_steps(&self, campaign_id: CampaignId, ordered_ids: &[StepId]) -> Result<()> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        for (index, step_id) in ordered_ids.iter().enumerate() {
            if let Some(step) = state.steps.get_mut(step_id) {
                if step.campaign_id == campaign_id {
                    step.step_number = index as i32 + 1;
                    step.updated_at = now;
                }
            }
        }
        Ok(())
    }

    async fn create_enrollment(
        &self,
        input: CreateEnrollment,
    ) -> Result<Option<CampaignEnrollment>> {
        let mut state = self.state.write().await;
        let exists = state.enrollments.values().any(|e| {
            e.campaign_id == input.campaign_id && e.contact_id == input.contact_id && e.is_active()
        });
        if exists {
            return Ok(None);
        }

        let now = Utc::now();
        let enrollment = CampaignEnrollment {
            id: Uuid::new_v4(),
            campaign_id: input.campaign_id,
            contact_id: input.contact_id,
            current_step_id: Some(input.first_step_id),
            status: EnrollmentStatus::Active.to_string(),
            next_send_at: Some(input.next_send_at),
            thread_id: None,
            provider_message_id: None,
            claimed_until: None,
            enrolled_at: now,
            updated_at: now,
        };
        state.enrollments.insert(enrollment.id, enrollment.clone());
        Ok(Some(enrollment))
    }

    async fn get_enrollment(&self, id: EnrollmentId) -> Result<Option<CampaignEnrollment>> {
        Ok(self.state.read().await.enrollments.get(&id).cloned())
    }

    async fn find_active_enrollment(
        &self,
        campaign_id: CampaignId,
        contact_id: ContactId,
    ) -> Result<Option<CampaignEnrollment>> {
        Ok(self
            .state
            .read()
            .await
            .enrollments
            .values()
            .find(|e| e.campaign_id == campaign_id && e.contact_id == contact_id && e.is_active())
            .cloned())
    }

    async fn list_enrollments(
        &self,
        campaign_id: CampaignId,
        status: Option<EnrollmentStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CampaignEnrollment>> {
        let state = self.state.read().await;
        let mut enrollments: Vec<CampaignEnrollment> = state
            .enrollments
            .values()
            .filter(|e| e.campaign_id == campaign_id)
            .filter(|e| status.map(|s| e.status == s.to_string()).unwrap_or(true))
            .cloned()
            .collect();
        enrollments.sort_by(|a, b| b.enrolled_at.cmp(&a.enrolled_at));
        Ok(enrollments
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn claim_due_enrollments(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        lease_until: DateTime<Utc>,
    ) -> Result<Vec<CampaignEnrollment>> {
        let mut state = self.state.write().await;
        let mut due: Vec<(DateTime<Utc>, EnrollmentId)> = state
            .enrollments
            .values()
            .filter(|e| e.is_due(now) && !e.is_claimed(now))
            .filter_map(|e| e.next_send_at.map(|at| (at, e.id)))
            .collect();
        due.sort();
        due.truncate(limit.max(0) as usize);

        let mut claimed = Vec::with_capacity(due.len());
        for (_, id) in due {
            if let Some(enrollment) = state.enrollments.get_mut(&id) {
                enrollment.claimed_until = Some(lease_until);
                enrollment.updated_at = now;
                claimed.push(enrollment.clone());
            }
        }
        Ok(claimed)
    }

    async fn release_claim(&self, id: EnrollmentId) -> Result<()> {
        if let Some(enrollment) = self.state.write().await.enrollments.get_mut(&id) {
            enrollment.claimed_until = None;
        }
        Ok(())
    }

    async fn advance_enrollment(
        &self,
        id: EnrollmentId,
        step_id: StepId,
        next_send_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.enrollments.get_mut(&id) {
            Some(enrollment) if enrollment.is_active() => {
                enrollment.current_step_id = Some(step_id);
                enrollment.next_send_at = Some(next_send_at);
                enrollment.claimed_until = None;
                enrollment.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_enrollment_status(
        &self,
        id: EnrollmentId,
        status: EnrollmentStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.enrollments.get_mut(&id) {
            Some(enrollment) if enrollment.is_active() => {
                enrollment.status = status.to_string();
                if status == EnrollmentStatus::Completed {
                    enrollment.current_step_id = None;
                }
                enrollment.next_send_at = None;
                enrollment.claimed_until = None;
                enrollment.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_active_threaded_enrollments(&self) -> Result<Vec<CampaignEnrollment>> {
        let state = self.state.read().await;
        let mut enrollments: Vec<CampaignEnrollment> = state
            .enrollments
            .values()
            .filter(|e| e.is_active() && e.thread_id.is_some())
            .cloned()
            .collect();
        enrollments.sort_by_key(|e| e.enrolled_at);
        Ok(enrollments)
    }

    async fn get_contact(&self, id: ContactId) -> Result<Option<ContactWithAccount>> {
        let state = self.state.read().await;
        Ok(state.contacts.get(&id).map(|contact| ContactWithAccount {
            account: contact
                .account_id
                .and_then(|account_id| state.accounts.get(&account_id).cloned()),
            contact: contact.clone(),
        }))
    }

    async fn append_event(&self, input: CreateEvent) -> Result<CampaignEvent> {
        let event = CampaignEvent {
            id: Uuid::new_v4(),
            enrollment_id: input.enrollment_id,
            step_id: input.step_id,
            event_type: input.event_type.to_string(),
            metadata: input.metadata.unwrap_or_else(|| serde_json::json!({})),
            created_at: Utc::now(),
        };
        self.state.write().await.events.push(event.clone());
        Ok(event)
    }

    async fn find_sent_event(
        &self,
        enrollment_id: EnrollmentId,
        step_id: StepId,
    ) -> Result<Option<CampaignEvent>> {
        Ok(self
            .state
            .read()
            .await
            .events
            .iter()
            .find(|e| {
                e.enrollment_id == enrollment_id
                    && e.step_id == Some(step_id)
                    && e.event_type_enum() == Some(EventType::Sent)
            })
            .cloned())
    }

    async fn record_send(&self, input: RecordSend, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.write().await;
        let already_sent = state.events.iter().any(|e| {
            e.enrollment_id == input.enrollment_id
                && e.step_id == Some(input.step_id)
                && e.event_type_enum() == Some(EventType::Sent)
        });
        if already_sent {
            return Ok(false);
        }

        state.events.push(CampaignEvent {
            id: Uuid::new_v4(),
            enrollment_id: input.enrollment_id,
            step_id: Some(input.step_id),
            event_type: EventType::Sent.to_string(),
            metadata: input.metadata,
            created_at: now,
        });
        if let Some(enrollment) = state.enrollments.get_mut(&input.enrollment_id) {
            enrollment.provider_message_id = Some(input.provider_message_id);
            enrollment.thread_id = Some(input.thread_id);
            enrollment.updated_at = now;
        }
        Ok(true)
    }

    async fn record_reply(
        &self,
        enrollment_id: EnrollmentId,
        step_id: Option<StepId>,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.events.push(CampaignEvent {
            id: Uuid::new_v4(),
            enrollment_id,
            step_id,
            event_type: EventType::Replied.to_string(),
            metadata,
            created_at: now,
        });
        if let Some(enrollment) = state.enrollments.get_mut(&enrollment_id) {
            if enrollment.is_active() {
                enrollment.status = EnrollmentStatus::Replied.to_string();
                enrollment.next_send_at = None;
                enrollment.claimed_until = None;
                enrollment.updated_at = now;
            }
        }
        Ok(())
    }

    async fn count_events(
        &self,
        enrollment_id: EnrollmentId,
        event_type: EventType,
    ) -> Result<i64> {
        Ok(self
            .state
            .read()
            .await
            .events
            .iter()
            .filter(|e| e.enrollment_id == enrollment_id && e.event_type_enum() == Some(event_type))
            .count() as i64)
    }

    async fn latest_event(
        &self,
        enrollment_id: EnrollmentId,
        event_type: EventType,
    ) -> Result<Option<CampaignEvent>> {
        Ok(self
            .state
            .read()
            .await
            .events
            .iter()
            .rev()
            .find(|e| e.enrollment_id == enrollment_id && e.event_type_enum() == Some(event_type))
            .cloned())
    }

    async fn enrollment_status_counts(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Vec<(String, i64)>> {
        let state = self.state.read().await;
        let mut counts: HashMap<String, i64> = HashMap::new();
        for enrollment in state.enrollments.values().filter(|e| e.campaign_id == campaign_id) {
            *counts.entry(enrollment.status.clone()).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }

    async fn event_type_counts(&self, campaign_id: CampaignId) -> Result<Vec<(String, i64)>> {
        let state = self.state.read().await;
        let mut counts: HashMap<String, i64> = HashMap::new();
        for event in &state.events {
            if state.campaign_of_enrollment(event.enrollment_id) == Some(campaign_id) {
                *counts.entry(event.event_type.clone()).or_default() += 1;
            }
        }
        Ok(counts.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StepType;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    async fn campaign_with_steps(store: &MemorySequenceStore, n: i32) -> (Campaign, Vec<StepId>) {
        let campaign = store
            .create_campaign(CreateCampaign {
                name: "Outbound Q3".to_string(),
                description: None,
            })
            .await
            .unwrap();
        let mut ids = Vec::new();
        for number in 1..=n {
            let step = store
                .create_step(CreateStep {
                    campaign_id: campaign.id,
                    step_number: number,
                    step_type: StepType::Email,
                    subject: Some(format!("Touch {}", number)),
                    body: Some("<p>Hi</p>".to_string()),
                    wait_days: None,
                })
                .await
                .unwrap();
            ids.push(step.id);
        }
        (campaign, ids)
    }

    #[tokio::test]
    async fn test_one_active_enrollment_per_contact() {
        let store = MemorySequenceStore::new();
        let (campaign, steps) = campaign_with_steps(&store, 1).await;
        let contact_id = Uuid::new_v4();
        let input = CreateEnrollment {
            campaign_id: campaign.id,
            contact_id,
            first_step_id: steps[0],
            next_send_at: Utc::now(),
        };

        let first = store.create_enrollment(input.clone()).await.unwrap();
        assert!(first.is_some());
        assert!(store.create_enrollment(input.clone()).await.unwrap().is_none());

        let first = first.unwrap();
        store
            .set_enrollment_status(first.id, EnrollmentStatus::Unsubscribed, Utc::now())
            .await
            .unwrap();
        assert!(store.create_enrollment(input).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_claim_skips_live_lease() {
        let store = MemorySequenceStore::new();
        let (campaign, steps) = campaign_with_steps(&store, 1).await;
        let now = Utc::now();
        store
            .create_enrollment(CreateEnrollment {
                campaign_id: campaign.id,
                contact_id: Uuid::new_v4(),
                first_step_id: steps[0],
                next_send_at: now - Duration::minutes(1),
            })
            .await
            .unwrap();

        let lease = now + Duration::minutes(5);
        assert_eq!(store.claim_due_enrollments(now, 50, lease).await.unwrap().len(), 1);
        assert_eq!(store.claim_due_enrollments(now, 50, lease).await.unwrap().len(), 0);

        // an expired lease is claimable again
        let later = now + Duration::minutes(6);
        let reclaimed = store
            .claim_due_enrollments(later, 50, later + Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(reclaimed.len(), 1);
    }

    #[tokio::test]
    async fn test_record_send_once() {
        let store = MemorySequenceStore::new();
        let (campaign, steps) = campaign_with_steps(&store, 1).await;
        let enrollment = store
            .create_enrollment(CreateEnrollment {
                campaign_id: campaign.id,
                contact_id: Uuid::new_v4(),
                first_step_id: steps[0],
                next_send_at: Utc::now(),
            })
            .await
            .unwrap()
            .unwrap();

        let send = RecordSend {
            enrollment_id: enrollment.id,
            step_id: steps[0],
            provider_message_id: "<m1@example.com>".to_string(),
            thread_id: "t1".to_string(),
            metadata: serde_json::json!({}),
        };
        assert!(store.record_send(send.clone(), Utc::now()).await.unwrap());
        assert!(!store.record_send(send, Utc::now()).await.unwrap());
        assert_eq!(
            store.count_events(enrollment.id, EventType::Sent).await.unwrap(),
            1
        );

        let stored = store.get_enrollment(enrollment.id).await.unwrap().unwrap();
        assert_eq!(stored.thread_id.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn test_delete_step_renumbers_and_repoints() {
        let store = MemorySequenceStore::new();
        let (campaign, steps) = campaign_with_steps(&store, 3).await;
        let enrollment = store
            .create_enrollment(CreateEnrollment {
                campaign_id: campaign.id,
                contact_id: Uuid::new_v4(),
                first_step_id: steps[1],
                next_send_at: Utc::now(),
            })
            .await
            .unwrap()
            .unwrap();

        assert!(store.delete_step(campaign.id, steps[1]).await.unwrap());

        let remaining = store.list_steps(campaign.id).await.unwrap();
        let numbers: Vec<i32> = remaining.iter().map(|s| s.step_number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(remaining[1].id, steps[2]);

        let moved = store.get_enrollment(enrollment.id).await.unwrap().unwrap();
        assert_eq!(moved.current_step_id, Some(steps[2]));
    }

    #[tokio::test]
    async fn test_delete_step_leaves_events_untouched() {
        let store = MemorySequenceStore::new();
        let (campaign, steps) = campaign_with_steps(&store, 2).await;
        let enrollment = store
            .create_enrollment(CreateEnrollment {
                campaign_id: campaign.id,
                contact_id: Uuid::new_v4(),
                first_step_id: steps[0],
                next_send_at: Utc::now(),
            })
            .await
            .unwrap()
            .unwrap();
        store
            .record_send(
                RecordSend {
                    enrollment_id: enrollment.id,
                    step_id: steps[0],
                    provider_message_id: "<m1@example.com>".to_string(),
                    thread_id: "t1".to_string(),
                    metadata: serde_json::json!({}),
                },
                Utc::now(),
            )
            .await
            .unwrap();

        assert!(store.delete_step(campaign.id, steps[0]).await.unwrap());

        let events = store.events_for(enrollment.id).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].step_id, Some(steps[0]));
        assert!(store
            .find_sent_event(enrollment.id, steps[0])
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_delete_campaign_cascades() {
        let store = MemorySequenceStore::new();
        let (campaign, steps) = campaign_with_steps(&store, 1).await;
        let enrollment = store
            .create_enrollment(CreateEnrollment {
                campaign_id: campaign.id,
                contact_id: Uuid::new_v4(),
                first_step_id: steps[0],
                next_send_at: Utc::now(),
            })
            .await
            .unwrap()
            .unwrap();
        store
            .append_event(CreateEvent {
                enrollment_id: enrollment.id,
                step_id: Some(steps[0]),
                event_type: EventType::Opened,
                metadata: None,
            })
            .await
            .unwrap();

        assert!(store.delete_campaign(campaign.id).await.unwrap());
        assert!(store.get_enrollment(enrollment.id).await.unwrap().is_none());
        assert!(store.list_steps(campaign.id).await.unwrap().is_empty());
        assert!(store.events_for(enrollment.id).await.is_empty());
    }
}
