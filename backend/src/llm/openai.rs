use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{CompletionError, CompletionRequest, CompletionService, ContentPart};
use crate::config::{ConfigError, OpenAiConfig};

#[derive(Debug, thiserror::Error)]
pub enum ClientBuildError {
    #[error("OpenAI API key not configured")]
    MissingApiKey,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Chat Completions client for OpenAI-compatible endpoints.
pub struct OpenAiClient {
    http_client: HttpClient,
    api_key: String,
    model: String,
    endpoint: Url,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<WirePart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorMessage,
}

#[derive(Debug, Deserialize)]
struct ApiErrorMessage {
    message: String,
}

impl OpenAiClient {
    pub fn from_config(config: &OpenAiConfig) -> Result<Self, ClientBuildError> {
        let api_key = config.api_key().ok_or(ClientBuildError::MissingApiKey)?;
        let http_client = HttpClient::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            http_client,
            api_key: api_key.to_string(),
            model: config.model.clone(),
            endpoint: config.completions_url()?,
        })
    }

    fn to_message_content(parts: Vec<ContentPart>) -> MessageContent {
        // A lone text part goes out as a plain string.
        match <[ContentPart; 1]>::try_from(parts) {
            Ok([ContentPart::Text(text)]) => MessageContent::Text(text),
            Ok(single) => MessageContent::Parts(single.into_iter().map(to_wire_part).collect()),
            Err(parts) => MessageContent::Parts(parts.into_iter().map(to_wire_part).collect()),
        }
    }
}

fn to_wire_part(part: ContentPart) -> WirePart {
    match part {
        ContentPart::Text(text) => WirePart::Text { text },
        ContentPart::Image(image) => WirePart::ImageUrl {
            image_url: ImageUrl {
                url: image.data_url(),
            },
        },
    }
}

#[async_trait]
impl CompletionService for OpenAiClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: Self::to_message_content(request.parts),
            }],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let response = self
            .http_client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            let message = serde_json::from_str::<ApiErrorBody>(&error_text)
                .map(|body| body.error.message)
                .unwrap_or(error_text);
            log::error!("OpenAI API error: {} - {}", status, message);
            return Err(CompletionError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let completion: ChatCompletionResponse = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(CompletionError::EmptyResponse)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::EncodedImage;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client_for(server: &MockServer) -> OpenAiClient {
        let config = OpenAiConfig {
            api_key: Some("sk-test".to_string()),
            base_url: server.url("/v1"),
            ..OpenAiConfig::default()
        };
        OpenAiClient::from_config(&config).unwrap()
    }

    fn reply(content: &str) -> serde_json::Value {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }]
        })
    }

    #[test]
    fn refuses_to_build_without_key() {
        let result = OpenAiClient::from_config(&OpenAiConfig::default());
        assert!(matches!(result, Err(ClientBuildError::MissingApiKey)));
    }

    #[tokio::test]
    async fn sends_images_as_data_url_parts() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .header("authorization", "Bearer sk-test")
                    .json_body_partial(
                        json!({
                            "model": "gpt-4o-mini",
                            "max_tokens": 1000,
                            "temperature": 0.1,
                            "messages": [{
                                "role": "user",
                                "content": [
                                    { "type": "text", "text": "What is this?" },
                                    {
                                        "type": "image_url",
                                        "image_url": { "url": "data:image/png;base64,AAAA" }
                                    }
                                ]
                            }]
                        })
                        .to_string(),
                    );
                then.status(200).json_body(reply("[]"));
            })
            .await;

        let request = CompletionRequest {
            parts: vec![
                ContentPart::Text("What is this?".to_string()),
                ContentPart::Image(EncodedImage {
                    content_type: "image/png".to_string(),
                    data: "AAAA".to_string(),
                }),
            ],
            temperature: 0.1,
            max_tokens: 1000,
        };

        let text = client_for(&server).complete(request).await.unwrap();
        assert_eq!(text, "[]");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn sends_text_only_prompt_as_plain_string() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions").json_body_partial(
                    json!({
                        "messages": [{ "role": "user", "content": "Give me recipes" }],
                        "temperature": 0.7
                    })
                    .to_string(),
                );
                then.status(200).json_body(reply("Here you go"));
            })
            .await;

        let text = client_for(&server)
            .complete(CompletionRequest::text("Give me recipes", 0.7, 2000))
            .await
            .unwrap();
        assert_eq!(text, "Here you go");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn surfaces_api_error_message() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(401).json_body(json!({
                    "error": { "message": "Incorrect API key provided", "type": "invalid_request_error" }
                }));
            })
            .await;

        let err = client_for(&server)
            .complete(CompletionRequest::text("hi", 0.1, 10))
            .await
            .unwrap_err();
        match err {
            CompletionError::Api { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Incorrect API key provided");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn null_content_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200).json_body(json!({
                    "choices": [{ "message": { "role": "assistant", "content": null } }]
                }));
            })
            .await;

        let err = client_for(&server)
            .complete(CompletionRequest::text("hi", 0.1, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, CompletionError::EmptyResponse));
    }
}
