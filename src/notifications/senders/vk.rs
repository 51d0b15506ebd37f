use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{BotSender, SenderError};
use crate::version::user_agent;

pub const DEFAULT_API_BASE: &str = "https://api.vk.com";
pub const DEFAULT_API_VERSION: &str = "5.131";

/// A sender for community messages via the VK API (`messages.send`).
pub struct VkBotSender {
    client: Client,
    api_base: String,
    api_version: String,
    access_token: String,
}

impl VkBotSender {
    pub fn new(access_token: String, api_base: String, api_version: String) -> Result<Self, SenderError> {
        if access_token.trim().is_empty() {
            return Err(SenderError::InvalidConfiguration(
                "VK bot access token is empty".to_string(),
            ));
        }
        let client = Client::builder().user_agent(user_agent()).build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_version,
            access_token,
        })
    }
}

#[derive(Serialize)]
struct SendMessageForm<'a> {
    user_id: &'a str,
    message: &'a str,
    random_id: i32,
    access_token: &'a str,
    v: &'a str,
}

#[derive(Deserialize)]
struct VkApiResponse {
    error: Option<VkApiError>,
}

#[derive(Deserialize)]
struct VkApiError {
    error_code: i64,
    error_msg: String,
}

#[async_trait]
impl BotSender for VkBotSender {
    async fn send(&self, user_id: &str, text: &str) -> Result<(), SenderError> {
        let api_url = format!("{}/method/messages.send", self.api_base);
        let form = SendMessageForm {
            user_id,
            message: text,
            random_id: rand::random::<i32>(),
            access_token: &self.access_token,
            v: &self.api_version,
        };

        let response = self.client.post(&api_url).form(&form).send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(SenderError::SendFailed(format!(
                "VK API returned non-success status: {status}. Body: {error_body}"
            )));
        }

        // VK reports method errors with a 200 status and an `error` object.
        let body: VkApiResponse = response.json().await?;
        if let Some(error) = body.error {
            return Err(SenderError::SendFailed(format!(
                "VK API error {}: {}",
                error.error_code, error.error_msg
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sender_for(server: &MockServer) -> VkBotSender {
        VkBotSender::new(
            "token-123".to_string(),
            server.uri(),
            DEFAULT_API_VERSION.to_string(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_send_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/method/messages.send"))
            .and(body_string_contains("user_id=42"))
            .and(body_string_contains("access_token=token-123"))
            .and(body_string_contains("v=5.131"))
            .and(header("user-agent", user_agent().as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "response": 17 })))
            .expect(1)
            .mount(&server)
            .await;

        sender_for(&server).send("42", "Site is up").await.unwrap();
    }

    #[tokio::test]
    async fn test_api_error_is_send_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": { "error_code": 901, "error_msg": "Can't send messages for users without permission" }
            })))
            .mount(&server)
            .await;

        let result = sender_for(&server).send("42", "Site is up").await;
        match result {
            Err(SenderError::SendFailed(msg)) => assert!(msg.contains("901")),
            other => panic!("expected SendFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_http_error_is_send_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let result = sender_for(&server).send("42", "Site is up").await;
        assert!(matches!(result, Err(SenderError::SendFailed(_))));
    }

    #[test]
    fn test_empty_token_is_rejected() {
        let result = VkBotSender::new(
            " ".to_string(),
            DEFAULT_API_BASE.to_string(),
            DEFAULT_API_VERSION.to_string(),
        );
        assert!(matches!(result, Err(SenderError::InvalidConfiguration(_))));
    }
}
