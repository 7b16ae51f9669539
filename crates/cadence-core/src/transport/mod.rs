//! Outbound mail transport

pub mod dry_run;
pub mod gmail;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use dry_run::DryRunTransport;
pub use gmail::{AccessTokenCache, GmailTransport};

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Provider returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Failed to build message: {0}")]
    Build(String),
}

impl From<TransportError> for cadence_common::Error {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Auth(msg) => cadence_common::Error::Auth(msg),
            other => cadence_common::Error::Transport(other.to_string()),
        }
    }
}

/// A message ready to hand to the provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub to: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub html_body: String,
    /// Provider thread to continue
    pub thread_id: Option<String>,
    /// RFC Message-ID of the message being followed up
    pub reply_to_message_id: Option<String>,
    /// One-click unsubscribe target for the List-Unsubscribe headers
    pub unsubscribe_url: Option<String>,
}

/// Identifiers returned for a delivered message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    /// RFC Message-ID, used for In-Reply-To on the next step
    pub message_id: String,
    pub thread_id: String,
    /// Provider-internal message id
    pub provider_id: String,
}

/// A provider thread
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MailThread {
    pub id: String,
    #[serde(default)]
    pub messages: Vec<ThreadMessage>,
}

impl MailThread {
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub id: String,
}

/// Sends mail and reads threads back
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<SentMessage, TransportError>;

    async fn get_thread(&self, thread_id: &str) -> Result<MailThread, TransportError>;
}
