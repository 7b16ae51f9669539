//! Gmail REST API transport

use super::{MailThread, MailTransport, OutboundMessage, SentMessage, TransportError};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE, Engine};
use cadence_common::config::GmailConfig;
use cadence_common::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use lettre::message::header::{ContentType, Header, HeaderName, HeaderValue};
use lettre::message::Mailbox;
use lettre::{Address, Message};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration as StdDuration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Tokens are refreshed this long before they expire
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

/// OAuth access token cache for one mailbox.
///
/// Exchanges the refresh token for an access token and reuses it until shortly
/// before expiry. Refreshes are serialized behind the write lock.
pub struct AccessTokenCache {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    cached: RwLock<Option<CachedToken>>,
}

impl AccessTokenCache {
    pub fn new(
        client: Client,
        token_url: String,
        client_id: String,
        client_secret: String,
        refresh_token: String,
    ) -> Self {
        Self {
            client,
            token_url,
            client_id,
            client_secret,
            refresh_token,
            cached: RwLock::new(None),
        }
    }

    /// Current access token, refreshing it if needed
    pub async fn access_token(&self) -> std::result::Result<String, TransportError> {
        if let Some(token) = self.cached.read().await.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.access_token.clone());
            }
        }

        let mut guard = self.cached.write().await;
        // another task may have refreshed while we waited
        if let Some(token) = guard.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.access_token.clone());
            }
        }

        let token = self.refresh().await?;
        let access_token = token.access_token.clone();
        *guard = Some(token);
        Ok(access_token)
    }

    /// Drop the cached token so the next call refreshes
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }

    async fn refresh(&self) -> std::result::Result<CachedToken, TransportError> {
        debug!("Refreshing Gmail access token");

        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", self.refresh_token.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Auth(format!(
                "token refresh returned {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = response.json().await?;
        info!(expires_in = token.expires_in, "Gmail access token refreshed");

        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: Utc::now() + Duration::seconds(token.expires_in),
        })
    }
}

/// `List-Unsubscribe` header
#[derive(Debug, Clone)]
struct ListUnsubscribe(String);

impl Header for ListUnsubscribe {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("List-Unsubscribe")
    }

    fn parse(s: &str) -> std::result::Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

/// `List-Unsubscribe-Post` header for one-click clients
#[derive(Debug, Clone)]
struct ListUnsubscribePost;

impl Header for ListUnsubscribePost {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("List-Unsubscribe-Post")
    }

    fn parse(_s: &str) -> std::result::Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self)
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), "List-Unsubscribe=One-Click".to_string())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendResponse {
    id: String,
    thread_id: String,
}

/// Sends through the Gmail API as the configured mailbox
pub struct GmailTransport {
    client: Client,
    api_base_url: String,
    sender: Mailbox,
    tokens: AccessTokenCache,
}

impl GmailTransport {
    /// Build the transport from configuration.
    ///
    /// Fails when credentials or the sender address are missing.
    pub fn from_config(config: &GmailConfig) -> Result<Self> {
        let required = |value: &Option<String>, name: &str| {
            value
                .clone()
                .ok_or_else(|| Error::Config(format!("gmail.{} is required", name)))
        };

        let client_id = required(&config.client_id, "client_id")?;
        let client_secret = required(&config.client_secret, "client_secret")?;
        let refresh_token = required(&config.refresh_token, "refresh_token")?;
        let sender = required(&config.sender, "sender")?;

        let address: Address = sender
            .parse()
            .map_err(|e| Error::Config(format!("Invalid gmail.sender {}: {}", sender, e)))?;

        let client = Client::builder()
            .timeout(StdDuration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Transport(format!("Failed to create HTTP client: {}", e)))?;

        let tokens = AccessTokenCache::new(
            client.clone(),
            config.token_url.clone(),
            client_id,
            client_secret,
            refresh_token,
        );

        Ok(Self {
            client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            sender: Mailbox::new(config.sender_name.clone(), address),
            tokens,
        })
    }

    /// Token cache owned by this transport
    pub fn tokens(&self) -> &AccessTokenCache {
        &self.tokens
    }

    /// RFC 5322 message with a fresh Message-ID
    fn build_message(
        &self,
        message: &OutboundMessage,
    ) -> std::result::Result<(Message, String), TransportError> {
        let to_address: Address = message
            .to
            .parse()
            .map_err(|e| TransportError::Build(format!("invalid recipient {}: {}", message.to, e)))?;

        let message_id = format!("<{}@{}>", Uuid::new_v4(), self.sender.email.domain());

        let mut builder = Message::builder()
            .from(self.sender.clone())
            .to(Mailbox::new(message.to_name.clone(), to_address))
            .subject(message.subject.clone())
            .message_id(Some(message_id.clone()));

        if let Some(parent) = &message.reply_to_message_id {
            builder = builder
                .in_reply_to(parent.clone())
                .references(parent.clone());
        }

        if let Some(url) = &message.unsubscribe_url {
            builder = builder
                .header(ListUnsubscribe(format!("<{}>", url)))
                .header(ListUnsubscribePost);
        }

        let email = builder
            .header(ContentType::TEXT_HTML)
            .body(message.html_body.clone())
            .map_err(|e| TransportError::Build(e.to_string()))?;

        Ok((email, message_id))
    }

    async fn check_response(
        &self,
        response: reqwest::Response,
    ) -> std::result::Result<reqwest::Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::UNAUTHORIZED {
            warn!("Gmail rejected the access token; dropping cached token");
            self.tokens.invalidate().await;
            return Err(TransportError::Auth(body));
        }

        Err(TransportError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl MailTransport for GmailTransport {
    async fn send(&self, message: OutboundMessage) -> std::result::Result<SentMessage, TransportError> {
        let (email, message_id) = self.build_message(&message)?;
        let raw = URL_SAFE.encode(email.formatted());

        let mut payload = serde_json::json!({ "raw": raw });
        if let Some(thread_id) = &message.thread_id {
            payload["threadId"] = serde_json::Value::String(thread_id.clone());
        }

        let token = self.tokens.access_token().await?;
        let response = self
            .client
            .post(format!("{}/gmail/v1/users/me/messages/send", self.api_base_url))
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await?;

        let sent: SendResponse = self.check_response(response).await?.json().await?;
        debug!(gmail_id = %sent.id, thread_id = %sent.thread_id, "Gmail accepted message");

        Ok(SentMessage {
            message_id,
            thread_id: sent.thread_id,
            provider_id: sent.id,
        })
    }

    async fn get_thread(&self, thread_id: &str) -> std::result::Result<MailThread, TransportError> {
        let token = self.tokens.access_token().await?;
        let response = self
            .client
            .get(format!(
                "{}/gmail/v1/users/me/threads/{}",
                self.api_base_url, thread_id
            ))
            .query(&[("format", "minimal")])
            .bearer_auth(token)
            .send()
            .await?;

        Ok(self.check_response(response).await?.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> GmailConfig {
        GmailConfig {
            client_id: Some("client".to_string()),
            client_secret: Some("secret".to_string()),
            refresh_token: Some("refresh".to_string()),
            sender: Some("sales@acme.io".to_string()),
            sender_name: Some("Acme Sales".to_string()),
            api_base_url: server.uri(),
            token_url: format!("{}/token", server.uri()),
            timeout_secs: 5,
        }
    }

    async fn mount_token(server: &MockServer, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.token",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    fn outbound() -> OutboundMessage {
        OutboundMessage {
            to: "dana@example.com".to_string(),
            to_name: Some("Dana Reyes".to_string()),
            subject: "Quick question".to_string(),
            html_body: "<p>Hi Dana</p>".to_string(),
            thread_id: Some("thread-1".to_string()),
            reply_to_message_id: Some("<prev@acme.io>".to_string()),
            unsubscribe_url: Some("https://crm.acme.io/api/unsubscribe?eid=1".to_string()),
        }
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let config = GmailConfig::default();
        assert!(GmailTransport::from_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_send_posts_raw_message_in_thread() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("POST"))
            .and(path("/gmail/v1/users/me/messages/send"))
            .and(header("authorization", "Bearer ya29.token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "18c0ffee",
                "threadId": "thread-1",
                "labelIds": ["SENT"]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let transport = GmailTransport::from_config(&config(&server)).unwrap();
        let sent = transport.send(outbound()).await.unwrap();

        assert_eq!(sent.thread_id, "thread-1");
        assert_eq!(sent.provider_id, "18c0ffee");
        assert!(sent.message_id.ends_with("@acme.io>"));

        let requests = server.received_requests().await.unwrap();
        let send_request = requests
            .iter()
            .find(|r| r.url.path() == "/gmail/v1/users/me/messages/send")
            .unwrap();
        let payload: serde_json::Value = serde_json::from_slice(&send_request.body).unwrap();
        assert_eq!(payload["threadId"], "thread-1");

        let raw = URL_SAFE.decode(payload["raw"].as_str().unwrap()).unwrap();
        let raw = String::from_utf8(raw).unwrap();
        assert!(raw.contains("Subject: Quick question"));
        assert!(raw.contains("In-Reply-To: <prev@acme.io>"));
        assert!(raw.contains("List-Unsubscribe: <https://crm.acme.io/api/unsubscribe?eid=1>"));
        assert!(raw.contains("List-Unsubscribe-Post: List-Unsubscribe=One-Click"));
        assert!(raw.contains(&format!("Message-ID: {}", sent.message_id)));
    }

    #[tokio::test]
    async fn test_token_is_cached_across_calls() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/threads/thread-1"))
            .and(query_param("format", "minimal"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "thread-1",
                "messages": [{"id": "a"}, {"id": "b"}]
            })))
            .expect(2)
            .mount(&server)
            .await;

        let transport = GmailTransport::from_config(&config(&server)).unwrap();
        let first = transport.get_thread("thread-1").await.unwrap();
        let second = transport.get_thread("thread-1").await.unwrap();

        assert_eq!(first.message_count(), 2);
        assert_eq!(second.message_count(), 2);
    }

    #[tokio::test]
    async fn test_api_error_surfaces_status() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/threads/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Requested entity was not found."))
            .mount(&server)
            .await;

        let transport = GmailTransport::from_config(&config(&server)).unwrap();
        match transport.get_thread("missing").await {
            Err(TransportError::Api { status, .. }) => assert_eq!(status, 404),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_refresh_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let transport = GmailTransport::from_config(&config(&server)).unwrap();
        let err = transport.tokens().access_token().await.unwrap_err();
        assert!(matches!(err, TransportError::Auth(_)));
    }
}
