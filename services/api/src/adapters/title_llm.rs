//! services/api/src/adapters/title_llm.rs
//!
//! The Link Title Service: asks a chat model for a short display title for a
//! resource link.

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use lesson_hub_core::ports::{LinkTitleService, PortError, PortResult};

pub struct OpenAiTitleAdapter {
    client: Option<Client<OpenAIConfig>>,
    model: String,
}

impl OpenAiTitleAdapter {
    pub fn new(client: Option<Client<OpenAIConfig>>, model: String) -> Self {
        Self { client, model }
    }
}

#[async_trait]
impl LinkTitleService for OpenAiTitleAdapter {
    async fn suggest_title(&self, url: &str) -> PortResult<String> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| PortError::Unexpected("No AI API key configured".to_string()))?;

        let messages = vec![
            ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content("You name links for a teacher's lesson planner. Generate a short, concise, and user-friendly title for the given link. If it's a Google Doc/Slide/Sheet, identify it (e.g. \"Google Slides\"). If it's a YouTube video, label it \"YouTube Video\". Respond with ONLY the title, no quotes, no explanation.")
                    .build()
                    .map_err(|e| PortError::Unexpected(e.to_string()))?
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(format!("Analyze this URL: \"{}\"", url))
                    .build()
                    .map_err(|e| PortError::Unexpected(e.to_string()))?
            ),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .max_tokens(20u32)
            .temperature(0.7)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = client
            .chat()
            .create(request)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        title_from_reply(
            response
                .choices
                .first()
                .and_then(|choice| choice.message.content.as_deref()),
        )
    }
}

/// Strips whitespace and wrapping quotes; a blank reply is an error.
fn title_from_reply(reply: Option<&str>) -> PortResult<String> {
    reply
        .map(|t| t.trim().trim_matches('"').trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or_else(|| PortError::Unexpected("No title generated".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_is_unquoted() {
        assert_eq!(title_from_reply(Some(" \"Google Slides\"\n")), Ok("Google Slides".to_string()));
    }

    #[test]
    fn test_empty_reply_is_an_error() {
        for reply in [None, Some(""), Some("  \"\"  ")] {
            assert_eq!(
                title_from_reply(reply),
                Err(PortError::Unexpected("No title generated".to_string()))
            );
        }
    }

    #[tokio::test]
    async fn test_missing_key_is_an_error() {
        let adapter = OpenAiTitleAdapter::new(None, "gemini-1.5-flash".to_string());
        let err = adapter.suggest_title("https://www.youtube.com/watch?v=1").await.unwrap_err();
        assert!(matches!(err, PortError::Unexpected(message) if message.contains("API key")));
    }
}
