//! The `display_cta` tool.
//!
//! The tool is stateless: a call only applies to the response turn it was made in. Nothing is
//! inferred from earlier turns, so every turn starts with a fresh [`TurnCapabilities`].

use serde::Serialize;
use serde_json::{ json, Value };
use thiserror::Error;

use crate::models::chat::{ CtaOutput, DISPLAY_CTA_TOOL };

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: Value,
}

#[derive(Debug, Error, PartialEq)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments {
        tool: String,
        reason: String,
    },
}

pub fn display_cta_tool() -> ToolDefinition {
    ToolDefinition {
        name: DISPLAY_CTA_TOOL.to_string(),
        description: "Show a booking button below this message. This tool is STATELESS - you must call it in EVERY response where you want the button to appear. Previous calls do not persist.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "shouldShow": {
                    "type": "boolean",
                    "description": "Set to true to show a booking button below this message. Call this in every response where booking is relevant."
                }
            },
            "required": ["shouldShow"]
        }),
    }
}

/// Every tool offered to the model on each turn.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![display_cta_tool()]
}

/// Runs a tool call host-side. `display_cta` echoes its input.
pub fn execute(name: &str, args: &Value) -> Result<CtaOutput, ToolError> {
    if name != DISPLAY_CTA_TOOL {
        return Err(ToolError::UnknownTool(name.to_string()));
    }
    let should_show = args
        .get("shouldShow")
        .and_then(Value::as_bool)
        .ok_or_else(|| ToolError::InvalidArguments {
            tool: name.to_string(),
            reason: "`shouldShow` must be a boolean".to_string(),
        })?;
    Ok(CtaOutput { should_show })
}

/// Capabilities asserted by the model during one response turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnCapabilities {
    pub show_cta: bool,
}

impl TurnCapabilities {
    pub fn record(&mut self, output: CtaOutput) {
        self.show_cta |= output.should_show;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_cta_echoes_should_show() {
        assert_eq!(
            execute("display_cta", &json!({ "shouldShow": true })),
            Ok(CtaOutput { should_show: true })
        );
        assert_eq!(
            execute("display_cta", &json!({ "shouldShow": false })),
            Ok(CtaOutput { should_show: false })
        );
    }

    #[test]
    fn rejects_unknown_tools_and_bad_arguments() {
        assert_eq!(
            execute("delete_everything", &json!({})),
            Err(ToolError::UnknownTool("delete_everything".into()))
        );
        assert!(matches!(
            execute("display_cta", &json!({ "shouldShow": "yes" })),
            Err(ToolError::InvalidArguments { .. })
        ));
    }

    #[test]
    fn exactly_one_stateless_tool_is_declared() {
        let tools = tool_definitions();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "display_cta");
        assert!(tools[0].description.contains("STATELESS"));
        assert_eq!(tools[0].parameters["required"][0], "shouldShow");
    }

    #[test]
    fn capabilities_start_empty_each_turn() {
        let mut turn = TurnCapabilities::default();
        assert!(!turn.show_cta);
        turn.record(CtaOutput { should_show: false });
        assert!(!turn.show_cta);
        turn.record(CtaOutput { should_show: true });
        assert!(turn.show_cta);
        assert_eq!(TurnCapabilities::default(), TurnCapabilities { show_cta: false });
    }
}
