//! Database models

use cadence_common::types::{
    AccountId, CampaignId, ContactId, EnrollmentId, EventId, StepId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ============================================================================
// Campaigns
// ============================================================================

/// Campaign status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
    Completed,
}

impl CampaignStatus {
    /// Whether a user may move a campaign from `self` to `next`
    pub fn can_transition_to(self, next: CampaignStatus) -> bool {
        use CampaignStatus::*;
        matches!(
            (self, next),
            (Draft, Active)
                | (Active, Paused)
                | (Paused, Active)
                | (Draft, Completed)
                | (Active, Completed)
                | (Paused, Completed)
        )
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CampaignStatus::Draft => write!(f, "draft"),
            CampaignStatus::Active => write!(f, "active"),
            CampaignStatus::Paused => write!(f, "paused"),
            CampaignStatus::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "active" => Ok(CampaignStatus::Active),
            "paused" => Ok(CampaignStatus::Paused),
            "completed" => Ok(CampaignStatus::Completed),
            _ => Err(format!("Invalid campaign status: {}", s)),
        }
    }
}

/// Campaign model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    pub description: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Get status enum
    pub fn status_enum(&self) -> Option<CampaignStatus> {
        self.status.parse().ok()
    }

    /// Steps only execute while the campaign is active
    pub fn is_active(&self) -> bool {
        self.status_enum() == Some(CampaignStatus::Active)
    }
}

/// Create campaign input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCampaign {
    pub name: String,
    pub description: Option<String>,
}

// ============================================================================
// Steps
// ============================================================================

/// Step type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Email,
    Wait,
    Condition,
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepType::Email => write!(f, "email"),
            StepType::Wait => write!(f, "wait"),
            StepType::Condition => write!(f, "condition"),
        }
    }
}

impl std::str::FromStr for StepType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(StepType::Email),
            "wait" => Ok(StepType::Wait),
            "condition" => Ok(StepType::Condition),
            _ => Err(format!("Invalid step type: {}", s)),
        }
    }
}

/// Campaign step model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CampaignStep {
    pub id: StepId,
    pub campaign_id: CampaignId,
    pub step_number: i32,
    pub step_type: String,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub wait_days: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CampaignStep {
    /// Get step type enum
    pub fn step_type_enum(&self) -> Option<StepType> {
        self.step_type.parse().ok()
    }

    /// Positive wait in calendar days, if this is a wait step
    pub fn positive_wait_days(&self) -> Option<i64> {
        match (self.step_type_enum(), self.wait_days) {
            (Some(StepType::Wait), Some(days)) if days > 0 => Some(days as i64),
            _ => None,
        }
    }
}

/// Create step input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStep {
    pub campaign_id: CampaignId,
    pub step_number: i32,
    pub step_type: StepType,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub wait_days: Option<i32>,
}

// ============================================================================
// Enrollments
// ============================================================================

/// Enrollment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Completed,
    Replied,
    Bounced,
    Unsubscribed,
}

impl EnrollmentStatus {
    /// Every state other than active is terminal
    pub fn is_terminal(self) -> bool {
        self != EnrollmentStatus::Active
    }
}

impl std::fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnrollmentStatus::Active => write!(f, "active"),
            EnrollmentStatus::Completed => write!(f, "completed"),
            EnrollmentStatus::Replied => write!(f, "replied"),
            EnrollmentStatus::Bounced => write!(f, "bounced"),
            EnrollmentStatus::Unsubscribed => write!(f, "unsubscribed"),
        }
    }
}

impl std::str::FromStr for EnrollmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(EnrollmentStatus::Active),
            "completed" => Ok(EnrollmentStatus::Completed),
            "replied" => Ok(EnrollmentStatus::Replied),
            "bounced" => Ok(EnrollmentStatus::Bounced),
            "unsubscribed" => Ok(EnrollmentStatus::Unsubscribed),
            _ => Err(format!("Invalid enrollment status: {}", s)),
        }
    }
}

/// Campaign enrollment model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CampaignEnrollment {
    pub id: EnrollmentId,
    pub campaign_id: CampaignId,
    pub contact_id: ContactId,
    pub current_step_id: Option<StepId>,
    pub status: String,
    pub next_send_at: Option<DateTime<Utc>>,
    pub thread_id: Option<String>,
    pub provider_message_id: Option<String>,
    pub claimed_until: Option<DateTime<Utc>>,
    pub enrolled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CampaignEnrollment {
    /// Get status enum
    pub fn status_enum(&self) -> Option<EnrollmentStatus> {
        self.status.parse().ok()
    }

    /// Whether the enrollment is active
    pub fn is_active(&self) -> bool {
        self.status_enum() == Some(EnrollmentStatus::Active)
    }

    /// Whether the enrollment is due at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.next_send_at.map(|at| at <= now).unwrap_or(false)
    }

    /// Whether another run holds a live lease on this enrollment
    pub fn is_claimed(&self, now: DateTime<Utc>) -> bool {
        self.claimed_until.map(|until| until > now).unwrap_or(false)
    }
}

/// Create enrollment input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEnrollment {
    pub campaign_id: CampaignId,
    pub contact_id: ContactId,
    pub first_step_id: StepId,
    pub next_send_at: DateTime<Utc>,
}

// ============================================================================
// Events
// ============================================================================

/// Campaign event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Sent,
    Delivered,
    Opened,
    Clicked,
    Replied,
    Bounced,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Sent => write!(f, "sent"),
            EventType::Delivered => write!(f, "delivered"),
            EventType::Opened => write!(f, "opened"),
            EventType::Clicked => write!(f, "clicked"),
            EventType::Replied => write!(f, "replied"),
            EventType::Bounced => write!(f, "bounced"),
        }
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(EventType::Sent),
            "delivered" => Ok(EventType::Delivered),
            "opened" => Ok(EventType::Opened),
            "clicked" => Ok(EventType::Clicked),
            "replied" => Ok(EventType::Replied),
            "bounced" => Ok(EventType::Bounced),
            _ => Err(format!("Invalid event type: {}", s)),
        }
    }
}

/// Campaign event model (append-only)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CampaignEvent {
    pub id: EventId,
    pub enrollment_id: EnrollmentId,
    pub step_id: Option<StepId>,
    pub event_type: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl CampaignEvent {
    /// Get event type enum
    pub fn event_type_enum(&self) -> Option<EventType> {
        self.event_type.parse().ok()
    }
}

/// Create event input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEvent {
    pub enrollment_id: EnrollmentId,
    pub step_id: Option<StepId>,
    pub event_type: EventType,
    pub metadata: Option<serde_json::Value>,
}

/// Provider identifiers returned by the transport for a send
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSend {
    pub enrollment_id: EnrollmentId,
    pub step_id: StepId,
    pub provider_message_id: String,
    pub thread_id: String,
    pub metadata: serde_json::Value,
}

// ============================================================================
// Contacts (owned by the CRM, read-only here)
// ============================================================================

/// Account model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub industry: Option<String>,
    pub website: Option<String>,
}

/// Contact model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub account_id: Option<AccountId>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub title: Option<String>,
    pub phone: Option<String>,
}

/// Contact together with its account, if any
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactWithAccount {
    pub contact: Contact,
    pub account: Option<Account>,
}

// ============================================================================
// Statistics
// ============================================================================

/// Campaign statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignStats {
    pub campaign_id: CampaignId,
    pub enrollments_active: i64,
    pub enrollments_completed: i64,
    pub enrollments_replied: i64,
    pub enrollments_bounced: i64,
    pub enrollments_unsubscribed: i64,
    pub sent: i64,
    pub delivered: i64,
    pub opened: i64,
    pub clicked: i64,
    pub replied: i64,
    pub bounced: i64,
}

impl CampaignStats {
    /// Fold `(status, count)` rows into the enrollment counters
    pub fn apply_enrollment_counts(&mut self, rows: &[(String, i64)]) {
        for (status, count) in rows {
            match status.parse::<EnrollmentStatus>() {
                Ok(EnrollmentStatus::Active) => self.enrollments_active = *count,
                Ok(EnrollmentStatus::Completed) => self.enrollments_completed = *count,
                Ok(EnrollmentStatus::Replied) => self.enrollments_replied = *count,
                Ok(EnrollmentStatus::Bounced) => self.enrollments_bounced = *count,
                Ok(EnrollmentStatus::Unsubscribed) => self.enrollments_unsubscribed = *count,
                Err(_) => {}
            }
        }
    }

    /// Fold `(event_type, count)` rows into the event counters
    pub fn apply_event_counts(&mut self, rows: &[(String, i64)]) {
        for (event_type, count) in rows {
            match event_type.parse::<EventType>() {
                Ok(EventType::Sent) => self.sent = *count,
                Ok(EventType::Delivered) => self.delivered = *count,
                Ok(EventType::Opened) => self.opened = *count,
                Ok(EventType::Clicked) => self.clicked = *count,
                Ok(EventType::Replied) => self.replied = *count,
                Ok(EventType::Bounced) => self.bounced = *count,
                Err(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_campaign_transitions() {
        assert!(CampaignStatus::Draft.can_transition_to(CampaignStatus::Active));
        assert!(CampaignStatus::Active.can_transition_to(CampaignStatus::Paused));
        assert!(CampaignStatus::Paused.can_transition_to(CampaignStatus::Active));
        assert!(!CampaignStatus::Completed.can_transition_to(CampaignStatus::Active));
        assert!(!CampaignStatus::Paused.can_transition_to(CampaignStatus::Draft));
    }

    #[test]
    fn test_status_roundtrip_strings() {
        assert_eq!("replied".parse::<EnrollmentStatus>(), Ok(EnrollmentStatus::Replied));
        assert_eq!(EventType::Clicked.to_string(), "clicked");
        assert!("archived".parse::<CampaignStatus>().is_err());
    }

    #[test]
    fn test_positive_wait_days() {
        let now = Utc::now();
        let mut step = CampaignStep {
            id: uuid::Uuid::new_v4(),
            campaign_id: uuid::Uuid::new_v4(),
            step_number: 2,
            step_type: "wait".to_string(),
            subject: None,
            body: None,
            wait_days: Some(3),
            created_at: now,
            updated_at: now,
        };
        assert_eq!(step.positive_wait_days(), Some(3));

        step.wait_days = Some(0);
        assert_eq!(step.positive_wait_days(), None);

        step.step_type = "email".to_string();
        step.wait_days = Some(5);
        assert_eq!(step.positive_wait_days(), None);
    }

    #[test]
    fn test_stats_folding() {
        let mut stats = CampaignStats::default();
        stats.apply_enrollment_counts(&[("active".into(), 4), ("replied".into(), 1)]);
        stats.apply_event_counts(&[("sent".into(), 7), ("opened".into(), 3), ("bogus".into(), 9)]);
        assert_eq!(stats.enrollments_active, 4);
        assert_eq!(stats.enrollments_replied, 1);
        assert_eq!(stats.sent, 7);
        assert_eq!(stats.opened, 3);
    }
}
