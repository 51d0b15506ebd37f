use async_trait::async_trait;
use thiserror::Error;

pub mod vk;

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("Failed to send notification: {0}")]
    SendFailed(String),
    #[error("Invalid configuration for sender: {0}")]
    InvalidConfiguration(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

/// Delivers a text message to a user through a messaging bot.
#[async_trait]
pub trait BotSender: Send + Sync {
    async fn send(&self, user_id: &str, text: &str) -> Result<(), SenderError>;
}
