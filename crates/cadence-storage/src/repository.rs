//! Repository layer for data access

pub mod campaigns;
pub mod contacts;
pub mod enrollments;
pub mod events;
pub mod steps;

pub use campaigns::CampaignRepository;
pub use contacts::ContactRepository;
pub use enrollments::EnrollmentRepository;
pub use events::EventRepository;
pub use steps::StepRepository;
