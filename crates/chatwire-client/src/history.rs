//! History loader: one-shot fetch of a conversation's message backlog.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error};
use url::Url;

use chatwire_core::config::ServerConfig;
use chatwire_core::{ChatError, ChatMessage, Result};

/// Header carrying the customer's access token.
pub const TOKEN_HEADER: &str = "x-customer-token";

/// Fetches the ordered (oldest first) backlog of a conversation.
#[async_trait]
pub trait HistoryLoader: Send + Sync {
    async fn fetch_history(
        &self,
        conversation_id: &str,
        access_token: &str,
    ) -> Result<Vec<ChatMessage>>;
}

#[derive(Debug, Deserialize)]
struct HistoryPage {
    #[serde(default)]
    items: Vec<ChatMessage>,
}

// ─────────────────────────────────────────────
// HttpHistoryLoader
// ─────────────────────────────────────────────

/// [`HistoryLoader`] backed by the REST endpoint
/// `GET {api_base}/cms/chat/client/conversations/{id}/messages`.
pub struct HttpHistoryLoader {
    client: reqwest::Client,
    api_base: String,
}

impl std::fmt::Debug for HttpHistoryLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpHistoryLoader")
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl HttpHistoryLoader {
    pub fn new(server: &ServerConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChatError::HistoryFetch(format!("failed to build HTTP client: {e}")))?;

        Ok(HttpHistoryLoader {
            client,
            api_base: server.api_base(),
        })
    }

    /// Endpoint for `conversation_id`, with the id escaped as one path segment.
    fn messages_url(&self, conversation_id: &str) -> Result<Url> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| ChatError::HistoryFetch(format!("invalid api base '{}': {e}", self.api_base)))?;

        url.path_segments_mut()
            .map_err(|_| ChatError::HistoryFetch(format!("api base '{}' cannot hold a path", self.api_base)))?
            .pop_if_empty()
            .extend(["cms", "chat", "client", "conversations", conversation_id, "messages"]);

        Ok(url)
    }
}

#[async_trait]
impl HistoryLoader for HttpHistoryLoader {
    async fn fetch_history(
        &self,
        conversation_id: &str,
        access_token: &str,
    ) -> Result<Vec<ChatMessage>> {
        let url = self.messages_url(conversation_id)?;
        debug!(conversation = %conversation_id, "fetching history");

        let response = self
            .client
            .get(url)
            .header(TOKEN_HEADER, access_token)
            .send()
            .await
            .map_err(|e| {
                error!(conversation = %conversation_id, error = %e, "history request failed");
                ChatError::HistoryFetch(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(
                conversation = %conversation_id,
                status = %status,
                body = %body,
                "history API error"
            );
            return Err(ChatError::HistoryFetch(format!("HTTP {status}")));
        }

        let page: HistoryPage = response.json().await.map_err(|e| {
            error!(conversation = %conversation_id, error = %e, "failed to parse history");
            ChatError::HistoryFetch(format!("invalid history body: {e}"))
        })?;

        debug!(
            conversation = %conversation_id,
            messages = page.items.len(),
            "history received"
        );
        Ok(page.items)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chatwire_core::{MessageId, SenderType};
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn loader_for(server: &MockServer) -> HttpHistoryLoader {
        let config = ServerConfig {
            url: server.uri(),
            api_prefix: "api/be".to_string(),
        };
        HttpHistoryLoader::new(&config, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_history_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/be/cms/chat/client/conversations/conv-1/messages"))
            .and(header("x-customer-token", "tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    {"id": 1, "text": "hi", "senderType": "CUSTOMER", "createdAt": "2024-05-01T10:00:00Z"},
                    {"id": "a-2", "text": "Chào chị", "senderType": "AGENT", "senderName": "Minh",
                     "createdAt": "2024-05-01T10:00:05Z"}
                ]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let items = loader_for(&mock_server)
            .fetch_history("conv-1", "tok-1")
            .await
            .unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, Some(MessageId::Number(1)));
        assert_eq!(items[0].sender_type, SenderType::Customer);
        assert_eq!(items[1].id, Some(MessageId::Text("a-2".into())));
        assert_eq!(items[1].sender_name.as_deref(), Some("Minh"));
    }

    #[tokio::test]
    async fn test_missing_items_is_empty() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"total": 0})))
            .mount(&mock_server)
            .await;

        let items = loader_for(&mock_server)
            .fetch_history("conv-1", "tok-1")
            .await
            .unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_error_status_is_history_fetch_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
            .mount(&mock_server)
            .await;

        let err = loader_for(&mock_server)
            .fetch_history("conv-1", "bad")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::HistoryFetch(ref m) if m.contains("401")));
    }

    #[tokio::test]
    async fn test_undecodable_body_is_history_fetch_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&mock_server)
            .await;

        let err = loader_for(&mock_server)
            .fetch_history("conv-1", "tok-1")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::HistoryFetch(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_history_fetch_error() {
        let config = ServerConfig {
            url: "http://127.0.0.1:9".to_string(),
            api_prefix: "api/be".to_string(),
        };
        let loader = HttpHistoryLoader::new(&config, Duration::from_secs(2)).unwrap();
        let err = loader.fetch_history("conv-1", "tok-1").await.unwrap_err();
        assert!(matches!(err, ChatError::HistoryFetch(_)));
    }

    #[test]
    fn test_conversation_id_is_escaped() {
        let config = ServerConfig {
            url: "http://localhost:3001/".to_string(),
            api_prefix: "/api/be/".to_string(),
        };
        let loader = HttpHistoryLoader::new(&config, Duration::from_secs(1)).unwrap();
        let url = loader.messages_url("a/b c").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:3001/api/be/cms/chat/client/conversations/a%2Fb%20c/messages"
        );
    }

    #[test]
    fn test_token_not_in_url() {
        let config = ServerConfig::default();
        let loader = HttpHistoryLoader::new(&config, Duration::from_secs(1)).unwrap();
        let url = loader.messages_url("conv-1").unwrap();
        assert!(url.query().is_none());
    }
}
