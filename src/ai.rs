use std::time::Duration;

use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
    ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs, ImageUrlArgs, ResponseFormat, ResponseFormatJsonSchema,
};
use async_openai::Client;
use async_trait::async_trait;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::AnnotateError;

const SYSTEM_PROMPT: &str = "You are a vision agent that generates a descriptive title and \
unique, relevant keywords for stock images, following Adobe Stock standards. \
Output should be a JSON object with 'name' and 'keywords' fields.";

/// Title and keywords produced for one still image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Description {
    pub(crate) name: String,
    pub(crate) keywords: Vec<String>,
}

/// A parsed description along with the text the model actually returned.
#[derive(Debug, Clone)]
pub(crate) struct Described {
    pub(crate) description: Description,
    pub(crate) raw: String,
}

/// What the vision model is shown for one media item.
pub(crate) struct StillRequest<'a> {
    pub(crate) image: &'a [u8],
    pub(crate) mime_type: &'a str,
    pub(crate) file_name: &'a str,
    pub(crate) location: Option<&'a str>,
}

#[async_trait]
pub(crate) trait Describe {
    async fn describe(&self, request: StillRequest<'_>) -> Result<Described, AnnotateError>;
}

pub(crate) struct OpenAiDescriber {
    client: Client<async_openai::config::OpenAIConfig>,
    model: String,
    keyword_count: u32,
    timeout: Duration,
}

impl OpenAiDescriber {
    pub(crate) fn new(model: impl Into<String>, keyword_count: u32, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            model: model.into(),
            keyword_count,
            timeout,
        }
    }

    fn build_request(
        &self,
        request: &StillRequest<'_>,
    ) -> Result<CreateChatCompletionRequest, OpenAIError> {
        let data_url = format!(
            "data:{};base64,{}",
            request.mime_type,
            BASE64_STANDARD.encode(request.image)
        );

        CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .max_tokens(1024_u32)
            .response_format(description_format())
            .messages([
                ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(SYSTEM_PROMPT)
                        .build()?,
                ),
                ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(ChatCompletionRequestUserMessageContent::Array(vec![
                            ChatCompletionRequestUserMessageContentPart::Text(
                                ChatCompletionRequestMessageContentPartTextArgs::default()
                                    .text(instruction(
                                        request.file_name,
                                        self.keyword_count,
                                        request.location,
                                    ))
                                    .build()?,
                            ),
                            ChatCompletionRequestUserMessageContentPart::ImageUrl(
                                ChatCompletionRequestMessageContentPartImageArgs::default()
                                    .image_url(ImageUrlArgs::default().url(data_url).build()?)
                                    .build()?,
                            ),
                        ]))
                        .build()?,
                ),
            ])
            .build()
    }
}

#[async_trait]
impl Describe for OpenAiDescriber {
    async fn describe(&self, request: StillRequest<'_>) -> Result<Described, AnnotateError> {
        let chat_request = self.build_request(&request)?;
        tracing::debug!(
            model = %self.model,
            file = request.file_name,
            bytes = request.image.len(),
            "requesting description"
        );

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(chat_request))
            .await
            .map_err(|_| AnnotateError::Timeout(self.timeout))??;
        let raw = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(AnnotateError::EmptyResponse)?;
        let description = parse_description(&raw)?;
        Ok(Described { description, raw })
    }
}

/// The user-facing instruction text, with the optional location clause.
fn instruction(file_name: &str, keyword_count: u32, location: Option<&str>) -> String {
    let mut text = format!(
        "Please analyze the following image (image name: '{file_name}'). Generate:\n\
         - A short, descriptive English title for Adobe Stock.\n\
         - {keyword_count} unique, relevant English keywords as a list of strings, covering \
         subject, concept, location, and mood. Avoid duplicates, generic terms, and brand names.\n\
         Return the result as a JSON object: {{\"name\": ..., \"keywords\": [...]}}."
    );
    if let Some(location) = location.map(str::trim).filter(|l| !l.is_empty()) {
        text.push_str(&format!(
            "\nThe image was captured at: {location}. Use this location in the title and \
             include it among the keywords where relevant."
        ));
    }
    text
}

fn description_format() -> ResponseFormat {
    ResponseFormat::JsonSchema {
        json_schema: ResponseFormatJsonSchema {
            description: Some("Stock media title and keywords".to_owned()),
            name: "image_description".to_owned(),
            schema: Some(serde_json::json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "keywords": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["name", "keywords"],
                "additionalProperties": false
            })),
            strict: Some(true),
        },
    }
}

pub(crate) fn parse_description(raw: &str) -> Result<Description, AnnotateError> {
    Ok(serde_json::from_str(raw.trim())?)
}
