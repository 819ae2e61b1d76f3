//! Tool execution loop for AI-powered conversations.

use log::{debug, warn};

use crate::error::{BotError, Result};
use crate::openrouter::{ChatModel, ChatResult, Message, ToolCall};
use crate::tools::ToolConnectionManager;

pub const MAX_TOOL_ITERATIONS: usize = 5;

/// Run the tool execution loop, handling multiple rounds of tool calls.
///
/// Tool failures are handed back to the model as `Error: ...` results so it
/// can apologise or offer an alternative; only model failures end the loop early.
pub async fn run_tool_loop(
    model: &dyn ChatModel,
    tools: &ToolConnectionManager,
    conversation_history: &mut Vec<Message>,
    dynamic_context: &str,
) -> Result<String> {
    let definitions = tools.definitions();

    for _ in 0..MAX_TOOL_ITERATIONS {
        match model
            .chat_with_history(
                conversation_history.clone(),
                Some(dynamic_context.to_string()),
                Some(definitions.clone()),
            )
            .await?
        {
            ChatResult::TextResponse(text) if text.trim().is_empty() => {
                return Err(BotError::OpenRouterResponse(
                    "Model returned an empty reply".to_string(),
                ));
            }
            ChatResult::TextResponse(text) => return Ok(text),
            ChatResult::ToolCalls {
                tool_calls,
                assistant_message,
            } => {
                debug!("Processing {} tool calls", tool_calls.len());
                conversation_history.push(assistant_message);

                for tool_call in tool_calls {
                    let result_text = match execute(tools, &tool_call).await {
                        Ok(output) => output,
                        Err(e) => {
                            warn!("Tool execution failed: {e}");
                            format!("Error: {e}")
                        }
                    };
                    conversation_history.push(Message::tool_result(tool_call.id, result_text));
                }
            }
        }
    }

    Err(BotError::ToolLoopLimit)
}

async fn execute(tools: &ToolConnectionManager, tool_call: &ToolCall) -> Result<String> {
    let raw = tool_call.function.arguments.trim();
    let arguments = if raw.is_empty() {
        serde_json::json!({})
    } else {
        serde_json::from_str(raw)?
    };
    tools.invoke(&tool_call.function.name, arguments).await
}
