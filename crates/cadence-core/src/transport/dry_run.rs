//! Transport that records messages instead of delivering them.
//!
//! Used when no provider is configured, and as the transport in tests.

use super::{MailThread, MailTransport, OutboundMessage, SentMessage, ThreadMessage, TransportError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

#[derive(Default)]
pub struct DryRunTransport {
    sent: RwLock<Vec<OutboundMessage>>,
    threads: RwLock<HashMap<String, Vec<ThreadMessage>>>,
    fail_sends: AtomicBool,
}

impl DryRunTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages handed to `send`, oldest first
    pub async fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.read().await.clone()
    }

    /// Pretend the recipient answered in `thread_id`
    pub async fn add_inbound(&self, thread_id: &str) {
        self.threads
            .write()
            .await
            .entry(thread_id.to_string())
            .or_default()
            .push(ThreadMessage {
                id: Uuid::new_v4().to_string(),
            });
    }

    /// Make every following `send` fail
    pub fn set_failing(&self, failing: bool) {
        self.fail_sends.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl MailTransport for DryRunTransport {
    async fn send(&self, message: OutboundMessage) -> Result<SentMessage, TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Api {
                status: 503,
                body: "dry-run transport set to fail".to_string(),
            });
        }

        let thread_id = message
            .thread_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let provider_id = Uuid::new_v4().simple().to_string();

        info!(to = %message.to, subject = %message.subject, thread_id = %thread_id, "Dry-run send");

        self.threads
            .write()
            .await
            .entry(thread_id.clone())
            .or_default()
            .push(ThreadMessage {
                id: provider_id.clone(),
            });
        self.sent.write().await.push(message);

        Ok(SentMessage {
            message_id: format!("<{}@dry-run.local>", provider_id),
            thread_id,
            provider_id,
        })
    }

    async fn get_thread(&self, thread_id: &str) -> Result<MailThread, TransportError> {
        match self.threads.read().await.get(thread_id) {
            Some(messages) => Ok(MailThread {
                id: thread_id.to_string(),
                messages: messages.clone(),
            }),
            None => Err(TransportError::Api {
                status: 404,
                body: format!("thread {} not found", thread_id),
            }),
        }
    }
}
