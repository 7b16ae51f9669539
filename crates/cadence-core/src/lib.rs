//! Cadence Core - campaign sequence engine
//!
//! Template rendering, tracking injection, the mail transport seam, and the
//! processor / reply detector / manager that drive campaign enrollments.

pub mod engine;
pub mod metrics;
pub mod transport;

pub use engine::{
    CampaignEngine, CampaignError, CampaignManager, EngineError, EnrollOutcome,
    EnrollmentProcessor, NewStep, ProcessSummary, ProcessorOptions, ReplyDetector, ReplySummary,
    RunSummary, StepAdvancer, TemplateRenderer, TrackingInjector, CLICK_PATH, OPEN_PATH,
    UNSUBSCRIBE_PATH,
};
pub use metrics::EngineMetrics;
pub use transport::{
    DryRunTransport, GmailTransport, MailThread, MailTransport, OutboundMessage, SentMessage,
    TransportError,
};
