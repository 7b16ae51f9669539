//! Campaign engine - sequence execution, reply detection and campaign management

mod advancer;
mod manager;
mod processor;
mod replies;
mod scheduler;
mod template;
mod tracking;

pub use advancer::StepAdvancer;
pub use manager::{CampaignError, CampaignManager, EnrollOutcome, NewStep};
pub use processor::{EngineError, EnrollmentProcessor, ProcessSummary, ProcessorOptions};
pub use replies::{ReplyDetector, ReplySummary};
pub use scheduler::{CampaignEngine, RunSummary};
pub use template::{build_variables, TemplateRenderer, TemplateVariables};
pub use tracking::{TrackingInjector, CLICK_PATH, OPEN_PATH, UNSUBSCRIBE_PATH};
