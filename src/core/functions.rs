//! In-band tool dispatch for model-initiated function calls.
//!
//! The model signals a completed tool call mid-stream; the dispatcher parses
//! its arguments, executes the named capability and produces a correlated
//! reply for the model leg. Capabilities form a closed set registered at
//! startup; an unknown name is an explicit error result the model can
//! verbally recover from, never a transport failure.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{info, warn};

use super::model::messages::{ClientEvent, ConversationItem, ToolDef};

/// Outcome of a capability invocation, serialized back to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionResult {
    /// Whether the capability succeeded
    pub success: bool,
    /// Human-readable outcome the model is expected to speak
    pub message: String,
    /// Structured payload, when the capability produces one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl FunctionResult {
    fn ok(message: String, data: Value) -> Self {
        FunctionResult {
            success: true,
            message,
            data: Some(data),
        }
    }

    fn err(message: String) -> Self {
        FunctionResult {
            success: false,
            message,
            data: None,
        }
    }
}

/// A callable capability exposed to the model.
///
/// Invocation is async so a slow capability yields on the model-leg task
/// instead of stalling the runtime; the built-ins are pure bookkeeping and
/// return immediately.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Wire name the model invokes this capability by.
    fn name(&self) -> &'static str;

    /// Tool manifest entry declared in the session configuration.
    fn definition(&self) -> ToolDef;

    /// Execute with already-parsed JSON arguments.
    async fn invoke(&self, args: Value) -> FunctionResult;
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

// =============================================================================
// Built-in capabilities
// =============================================================================

/// Schedule a reminder for a later date.
struct RemindMeLater;

#[derive(Deserialize)]
struct RemindArgs {
    date: String,
    message: String,
}

#[async_trait]
impl Capability for RemindMeLater {
    fn name(&self) -> &'static str {
        "remindMeLater"
    }

    fn definition(&self) -> ToolDef {
        ToolDef {
            tool_type: "function".to_string(),
            name: self.name().to_string(),
            description: "Set a reminder for a specific date and time. Use this when the user \
                          wants to be reminded about something later."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "date": {
                        "type": "string",
                        "description": "The date and time for the reminder in ISO format or natural language (e.g., '2024-01-15 10:00 AM', 'tomorrow at 3pm', 'next Monday')"
                    },
                    "message": {
                        "type": "string",
                        "description": "The reminder message content"
                    }
                },
                "required": ["date", "message"]
            }),
        }
    }

    async fn invoke(&self, args: Value) -> FunctionResult {
        let args: RemindArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return FunctionResult::err(format!("Invalid reminder arguments: {e}")),
        };
        info!(date = %args.date, "Reminder scheduled");
        FunctionResult::ok(
            format!("Reminder set for {}: {}", args.date, args.message),
            json!({
                "reminderDate": args.date,
                "reminderMessage": args.message,
                "timestamp": now_rfc3339(),
            }),
        )
    }
}

/// Send a text message.
struct SendSms;

#[derive(Deserialize)]
struct SmsArgs {
    message: String,
    #[serde(rename = "phoneNumber")]
    phone_number: Option<String>,
}

#[async_trait]
impl Capability for SendSms {
    fn name(&self) -> &'static str {
        "sendSms"
    }

    fn definition(&self) -> ToolDef {
        ToolDef {
            tool_type: "function".to_string(),
            name: self.name().to_string(),
            description: "Send an SMS message. Use this when the user wants to send a text \
                          message."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "message": {
                        "type": "string",
                        "description": "The SMS message content to send"
                    },
                    "phoneNumber": {
                        "type": "string",
                        "description": "Optional phone number to send to. If not provided, will use caller's number or ask user."
                    }
                },
                "required": ["message"]
            }),
        }
    }

    async fn invoke(&self, args: Value) -> FunctionResult {
        let args: SmsArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return FunctionResult::err(format!("Invalid SMS arguments: {e}")),
        };
        info!(to = ?args.phone_number, "SMS queued");
        FunctionResult::ok(
            format!("SMS sent: {}", args.message),
            json!({
                "smsMessage": args.message,
                "phoneNumber": args.phone_number,
                "timestamp": now_rfc3339(),
            }),
        )
    }
}

/// Escalate an issue to another department.
struct EscalateItHigher;

#[derive(Deserialize)]
struct EscalateArgs {
    message: String,
    severity: String,
    department: Option<String>,
}

#[async_trait]
impl Capability for EscalateItHigher {
    fn name(&self) -> &'static str {
        "escalateItHigher"
    }

    fn definition(&self) -> ToolDef {
        ToolDef {
            tool_type: "function".to_string(),
            name: self.name().to_string(),
            description: "Escalate an issue to higher management or another department. Use this \
                          when the user requests escalation or when an issue requires \
                          higher-level attention."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "message": {
                        "type": "string",
                        "description": "Description of the issue or concern that needs escalation"
                    },
                    "severity": {
                        "type": "string",
                        "enum": ["low", "medium", "high", "critical"],
                        "description": "The severity level of the issue"
                    },
                    "department": {
                        "type": "string",
                        "description": "Optional target department for escalation (e.g., 'management', 'technical', 'billing')"
                    }
                },
                "required": ["message", "severity"]
            }),
        }
    }

    async fn invoke(&self, args: Value) -> FunctionResult {
        let args: EscalateArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return FunctionResult::err(format!("Invalid escalation arguments: {e}")),
        };
        let escalation_id = format!("ESC-{}", uuid::Uuid::new_v4().simple());
        info!(severity = %args.severity, escalation_id = %escalation_id, "Issue escalated");
        FunctionResult::ok(
            format!(
                "Issue escalated with {} severity: {}",
                args.severity, args.message
            ),
            json!({
                "escalationMessage": args.message,
                "severity": args.severity,
                "department": args.department,
                "escalationId": escalation_id,
                "timestamp": now_rfc3339(),
            }),
        )
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Static lookup table of capabilities, built once at startup.
pub struct FunctionRegistry {
    capabilities: HashMap<&'static str, Arc<dyn Capability>>,
}

impl FunctionRegistry {
    /// Registry with the built-in capability set.
    pub fn with_builtins() -> Self {
        let mut registry = FunctionRegistry {
            capabilities: HashMap::new(),
        };
        registry.register(Arc::new(RemindMeLater));
        registry.register(Arc::new(SendSms));
        registry.register(Arc::new(EscalateItHigher));
        registry
    }

    fn register(&mut self, capability: Arc<dyn Capability>) {
        self.capabilities.insert(capability.name(), capability);
    }

    /// Tool manifest for the session configuration.
    pub fn manifest(&self) -> Vec<ToolDef> {
        let mut defs: Vec<ToolDef> = self
            .capabilities
            .values()
            .map(|c| c.definition())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Registered capability names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.capabilities.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Execute a model-initiated function call.
    ///
    /// Argument parse failures and unknown names become `success:false`
    /// results; nothing here can fail the call.
    pub async fn execute(&self, name: &str, raw_arguments: &str) -> FunctionResult {
        let args: Value = match serde_json::from_str(if raw_arguments.is_empty() {
            "{}"
        } else {
            raw_arguments
        }) {
            Ok(v) => v,
            Err(e) => {
                warn!(function = name, "Malformed function arguments: {e}");
                return FunctionResult::err(format!("Error executing function: {e}"));
            }
        };

        match self.capabilities.get(name) {
            Some(capability) => capability.invoke(args).await,
            None => {
                warn!(function = name, "Unknown function requested by model");
                FunctionResult::err(format!("Unknown function: {name}"))
            }
        }
    }

    /// Full dispatch round-trip: execute the call and build the correlated
    /// reply plus the follow-up generation request for the model leg.
    pub async fn dispatch(
        &self,
        name: &str,
        raw_arguments: &str,
        model_call_id: &str,
    ) -> (FunctionResult, Vec<ClientEvent>) {
        let result = self.execute(name, raw_arguments).await;
        let output = serde_json::to_string(&result).unwrap_or_else(|_| {
            // FunctionResult serialization cannot fail for these shapes,
            // but the model still needs a syntactically valid reply.
            "{\"success\":false,\"message\":\"internal serialization failure\"}".to_string()
        });

        let events = vec![
            ClientEvent::ConversationItemCreate {
                item: ConversationItem::function_call_output(model_call_id, output),
            },
            ClientEvent::ResponseCreate,
        ];
        (result, events)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_known_function_succeeds() {
        let registry = FunctionRegistry::with_builtins();
        let result = registry
            .execute(
                "remindMeLater",
                r#"{"date": "tomorrow at 3pm", "message": "call back"}"#,
            )
            .await;

        assert!(result.success);
        assert!(result.message.contains("tomorrow at 3pm"));
        let data = result.data.unwrap();
        assert_eq!(data["reminderMessage"], "call back");
    }

    #[tokio::test]
    async fn test_unknown_function_names_the_function() {
        let registry = FunctionRegistry::with_builtins();
        let result = registry.execute("orderPizza", "{}").await;

        assert!(!result.success);
        assert!(result.message.contains("orderPizza"));
    }

    #[tokio::test]
    async fn test_malformed_arguments_do_not_crash() {
        let registry = FunctionRegistry::with_builtins();
        let result = registry.execute("sendSms", "{not json").await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_missing_required_argument_is_error_result() {
        let registry = FunctionRegistry::with_builtins();
        // severity is required
        let result = registry
            .execute("escalateItHigher", r#"{"message": "no severity"}"#)
            .await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_empty_arguments_treated_as_empty_object() {
        let registry = FunctionRegistry::with_builtins();
        let result = registry.execute("sendSms", "").await;
        // message is required, so this fails, but through argument
        // validation rather than a JSON parse crash
        assert!(!result.success);
        assert!(result.message.contains("Invalid SMS arguments"));
    }

    #[tokio::test]
    async fn test_dispatch_produces_reply_then_generate() {
        let registry = FunctionRegistry::with_builtins();
        let (result, events) = registry
            .dispatch("sendSms", r#"{"message": "on my way"}"#, "fc_42")
            .await;

        assert!(result.success);
        assert_eq!(events.len(), 2);
        match &events[0] {
            ClientEvent::ConversationItemCreate { item } => {
                assert_eq!(item.call_id.as_deref(), Some("fc_42"));
                let output: FunctionResult =
                    serde_json::from_str(item.output.as_ref().unwrap()).unwrap();
                assert!(output.success);
            }
            other => panic!("Expected item create, got {other:?}"),
        }
        assert!(matches!(events[1], ClientEvent::ResponseCreate));
    }

    #[tokio::test]
    async fn test_dispatch_unknown_function_same_message_pattern() {
        let registry = FunctionRegistry::with_builtins();
        let (result, events) = registry.dispatch("nope", "{}", "fc_7").await;

        assert!(!result.success);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], ClientEvent::ResponseCreate));
    }

    #[test]
    fn test_manifest_lists_all_builtins() {
        let registry = FunctionRegistry::with_builtins();
        let manifest = registry.manifest();
        let names: Vec<_> = manifest.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["escalateItHigher", "remindMeLater", "sendSms"]);
        assert!(manifest.iter().all(|t| t.tool_type == "function"));
    }
}
