//! services/api/src/adapters/import_llm.rs
//!
//! The Import Adapter: sends an uploaded timetable image to a vision-capable
//! chat model and parses its JSON answer into a `Schedule`.

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
        ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs, ImageUrl,
    },
    Client,
};
use async_trait::async_trait;
use base64::Engine;
use lesson_hub_core::domain::Schedule;
use lesson_hub_core::ports::{PortError, PortResult, ScheduleImportService};
use regex::Regex;
use std::sync::OnceLock;
use tracing::{error, info};

pub const PARSE_FAILURE_MESSAGE: &str = "Failed to parse schedule. Please try again.";

const IMPORT_PROMPT: &str = r#"You are a schedule parser. Analyze the attached image of a class schedule.
Extract the weekly schedule and format it into a JSON object where keys are numbers 1-5 (Monday-Friday).

The output must be strictly this JSON structure:
{
  "1": [ { "id": "unique_string", "time": "HH:MM-HH:MM", "subject": "Subject Name", "room": "Room Name", "color": "bg-blue-600" } ],
  "2": [ ... ]
}

Rules:
1. Use 24-hour format for time (e.g., 08:00-09:00).
2. Assign a Tailwind CSS color class (e.g., bg-blue-600, bg-green-600, bg-purple-600, bg-orange-600, bg-red-600, bg-teal-600) to each subject. Keep the same color for the same subject across different days.
3. Generate a unique 'id' for each slot (e.g., 'mon_1', 'tue_2').
4. Ignore breaks, lunch times, or empty slots.
5. Return ONLY the JSON string, no markdown formatting."#;

/// Removes markdown code fences the model sometimes wraps around JSON.
pub fn strip_code_fences(text: &str) -> String {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| Regex::new(r"```(?:json)?").expect("valid fence pattern"));
    fence.replace_all(text, "").trim().to_string()
}

/// Parses a model answer into a schedule.
pub fn parse_schedule_reply(reply: &str) -> PortResult<Schedule> {
    serde_json::from_str::<Schedule>(&strip_code_fences(reply)).map_err(|e| {
        error!("AI parsing error: {}", e);
        PortError::Rejected(PARSE_FAILURE_MESSAGE.to_string())
    })
}

pub struct OpenAiImportAdapter {
    client: Option<Client<OpenAIConfig>>,
    model: String,
}

impl OpenAiImportAdapter {
    /// `client` is `None` when no API key is configured.
    pub fn new(client: Option<Client<OpenAIConfig>>, model: String) -> Self {
        Self { client, model }
    }
}

#[async_trait]
impl ScheduleImportService for OpenAiImportAdapter {
    async fn parse_schedule(&self, document: &[u8], media_type: &str) -> PortResult<Schedule> {
        let client = self.client.as_ref().ok_or_else(|| {
            PortError::Rejected("AI_API_KEY (or GEMINI_API_KEY) is not set.".to_string())
        })?;
        if document.is_empty() {
            return Err(PortError::Rejected("No file uploaded.".to_string()));
        }

        let data_url = format!(
            "data:{};base64,{}",
            media_type,
            base64::engine::general_purpose::STANDARD.encode(document)
        );
        let parts = vec![
            ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartText {
                    text: "Here is the schedule.".to_string(),
                },
            ),
            ChatCompletionRequestUserMessageContentPart::ImageUrl(
                ChatCompletionRequestMessageContentPartImage {
                    image_url: ImageUrl {
                        url: data_url,
                        detail: None,
                    },
                },
            ),
        ];

        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(IMPORT_PROMPT)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(ChatCompletionRequestUserMessageContent::Array(parts))
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(0.0)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = client.chat().create(request).await.map_err(|e| {
            error!("Import model call failed: {}", e);
            PortError::Rejected(PARSE_FAILURE_MESSAGE.to_string())
        })?;

        let reply = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| PortError::Rejected(PARSE_FAILURE_MESSAGE.to_string()))?;

        let schedule = parse_schedule_reply(&reply)?;
        info!("Imported schedule with {} days", schedule.0.len());
        Ok(schedule)
    }
}
