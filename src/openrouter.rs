use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{BotError, Result};
use crate::types::MessageRole;

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

// Telegram allows 4096 characters per message and long replies are split,
// so this only needs to keep search listings from being cut short.
const MAX_TOKENS: u32 = 2048;

#[derive(Debug, Serialize)]
struct OpenRouterRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
}

// Tool calling structures
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

impl Tool {
    pub fn function(name: String, description: String, parameters: serde_json::Value) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name,
                description,
                parameters,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// Result of a chat completion
#[derive(Debug)]
pub enum ChatResult {
    /// Model produced a text response
    TextResponse(String),
    /// Model wants to call tools
    ToolCalls {
        tool_calls: Vec<ToolCall>,
        assistant_message: Message,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn text(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenRouterResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

/// A language model that can answer a conversation, optionally asking for tool calls.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat_with_history(
        &self,
        messages: Vec<Message>,
        dynamic_context: Option<String>,
        tools: Option<Vec<Tool>>,
    ) -> Result<ChatResult>;
}

pub struct OpenRouterClient {
    api_key: String,
    client: reqwest::Client,
    model: String,
    system_prompt: String,
}

impl OpenRouterClient {
    pub fn new(api_key: String, model: String, system_prompt: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            model,
            system_prompt,
        }
    }
}

#[async_trait]
impl ChatModel for OpenRouterClient {
    async fn chat_with_history(
        &self,
        mut messages: Vec<Message>,
        dynamic_context: Option<String>,
        tools: Option<Vec<Tool>>,
    ) -> Result<ChatResult> {
        debug!(
            "Sending request to OpenRouter API with {} messages",
            messages.len()
        );

        let full_system_prompt = if let Some(context) = dynamic_context {
            format!("{}\n\n{}", context, self.system_prompt)
        } else {
            self.system_prompt.clone()
        };

        // Ensure system prompt is at the beginning
        if messages.is_empty() || messages[0].role != MessageRole::System {
            messages.insert(0, Message::text(MessageRole::System, full_system_prompt));
        }

        let request = OpenRouterRequest {
            model: self.model.clone(),
            messages,
            max_tokens: MAX_TOKENS,
            tools: tools.filter(|t| !t.is_empty()),
        };

        let response = self
            .client
            .post(OPENROUTER_API_URL)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response
                .text()
                .await
                .unwrap_or_else(|e| format!("Failed to read error response: {e}"));
            return Err(BotError::OpenRouterApi { status, message });
        }

        let api_response: OpenRouterResponse = response.json().await?;
        parse_choice(api_response)
    }
}

fn parse_choice(api_response: OpenRouterResponse) -> Result<ChatResult> {
    let message = api_response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| BotError::OpenRouterResponse("No choices in response".to_string()))?
        .message;

    if let Some(ref tool_calls) = message.tool_calls
        && !tool_calls.is_empty()
    {
        debug!(
            "Received {} tool calls from OpenRouter API",
            tool_calls.len()
        );
        return Ok(ChatResult::ToolCalls {
            tool_calls: tool_calls.clone(),
            assistant_message: message,
        });
    }

    debug!("Received response from OpenRouter API");
    Ok(ChatResult::TextResponse(message.content.unwrap_or_default()))
}
