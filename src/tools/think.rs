//! Scratchpad tool: lets the model plan a multi-tool answer without side effects

use super::{Tool, ToolContext, ToolOutput};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

pub struct ThinkTool;

#[derive(Debug, Deserialize)]
struct ThinkInput {
    thoughts: String,
}

#[async_trait]
impl Tool for ThinkTool {
    fn name(&self) -> &'static str {
        "think"
    }

    fn description(&self) -> String {
        "Write down a plan before answering: which tools to call, in what order, and what to tell the user. Nothing is shown to the user and nothing external happens.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["thoughts"],
            "properties": {
                "thoughts": {
                    "type": "string",
                    "description": "The plan or notes to record"
                }
            }
        })
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput {
        match serde_json::from_value::<ThinkInput>(input) {
            Ok(input) => {
                tracing::debug!(
                    thread_id = %ctx.thread_id,
                    len = input.thoughts.len(),
                    "Model recorded a plan"
                );
                ToolOutput::success("noted")
            }
            Err(e) => ToolOutput::error(format!("Invalid input: {e}")),
        }
    }
}
