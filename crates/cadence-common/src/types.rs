//! Common types for Cadence

use uuid::Uuid;

/// Unique identifier for campaigns
pub type CampaignId = Uuid;

/// Unique identifier for campaign steps
pub type StepId = Uuid;

/// Unique identifier for enrollments
pub type EnrollmentId = Uuid;

/// Unique identifier for campaign events
pub type EventId = Uuid;

/// Unique identifier for contacts
pub type ContactId = Uuid;

/// Unique identifier for accounts
pub type AccountId = Uuid;
