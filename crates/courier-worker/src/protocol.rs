//! Wire protocol types for the worker's NDJSON stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound request envelope, one per user turn.
///
/// Serialized shape:
/// `{"type":"user","message":{"role":"user","content":<text>},"parent_tool_use_id":null,"session_id":""}`
#[derive(Debug, Clone, Serialize)]
pub struct UserEnvelope {
    #[serde(rename = "type")]
    kind: &'static str,
    message: UserPayload,
    parent_tool_use_id: Option<String>,
    session_id: String,
}

#[derive(Debug, Clone, Serialize)]
struct UserPayload {
    role: &'static str,
    content: String,
}

impl UserEnvelope {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            kind: "user",
            message: UserPayload {
                role: "user",
                content: text.into(),
            },
            parent_tool_use_id: None,
            session_id: String::new(),
        }
    }

    /// Renders the envelope as a single unterminated frame.
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// One inbound worker record, keyed by its `type` field.
///
/// The bridge reacts to three types; everything else lands in `Other`
/// and is logged for diagnostics only.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerEvent {
    System {
        #[serde(default)]
        subtype: Option<String>,
    },
    Assistant {
        #[serde(default)]
        message: AssistantMessage,
    },
    Result {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

impl WorkerEvent {
    pub fn parse(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }

    /// True for `system` records carrying the worker's bootstrap signal.
    pub fn is_init_signal(&self) -> bool {
        matches!(self, Self::System { subtype: Some(sub) } if sub == "init")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

/// One entry of an assistant message's content sequence.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

impl AssistantMessage {
    /// Tool names in content order, unnamed entries reported as "unknown".
    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(|block| match block {
            ContentBlock::ToolUse { name, .. } => Some(name.as_deref().unwrap_or("unknown")),
            _ => None,
        })
    }

    /// All text entries joined with newlines; `None` when there are none.
    pub fn joined_text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } if !text.is_empty() => Some(text.as_str()),
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_envelope_serializes_exact_shape() {
        let line = UserEnvelope::new("hello worker").to_line().unwrap();
        assert_eq!(
            line,
            r#"{"type":"user","message":{"role":"user","content":"hello worker"},"parent_tool_use_id":null,"session_id":""}"#
        );
    }

    #[test]
    fn parses_system_init() {
        let event = WorkerEvent::parse(r#"{"type":"system","subtype":"init","session_id":"abc"}"#)
            .unwrap();
        assert!(event.is_init_signal());
    }

    #[test]
    fn system_without_init_subtype_is_not_a_signal() {
        let event = WorkerEvent::parse(r#"{"type":"system","subtype":"compact"}"#).unwrap();
        assert!(!event.is_init_signal());
        let event = WorkerEvent::parse(r#"{"type":"system"}"#).unwrap();
        assert!(!event.is_init_signal());
    }

    #[test]
    fn parses_assistant_content_blocks() {
        let event = WorkerEvent::parse(
            r#"{"type":"assistant","message":{"content":[
                {"type":"tool_use","name":"Read","input":{"path":"x"}},
                {"type":"text","text":"done"},
                {"type":"thinking","thinking":"..."}
            ]}}"#,
        )
        .unwrap();
        let WorkerEvent::Assistant { message } = event else {
            panic!("expected assistant event");
        };
        assert_eq!(message.tool_names().collect::<Vec<_>>(), vec!["Read"]);
        assert_eq!(message.joined_text().as_deref(), Some("done"));
    }

    #[test]
    fn joined_text_concatenates_multiple_parts() {
        let event = WorkerEvent::parse(
            r#"{"type":"assistant","message":{"content":[
                {"type":"text","text":"one"},
                {"type":"text","text":"two"}
            ]}}"#,
        )
        .unwrap();
        let WorkerEvent::Assistant { message } = event else {
            panic!("expected assistant event");
        };
        assert_eq!(message.joined_text().as_deref(), Some("one\ntwo"));
    }

    #[test]
    fn tool_use_without_name_reports_unknown() {
        let event = WorkerEvent::parse(
            r#"{"type":"assistant","message":{"content":[{"type":"tool_use"}]}}"#,
        )
        .unwrap();
        let WorkerEvent::Assistant { message } = event else {
            panic!("expected assistant event");
        };
        assert_eq!(message.tool_names().collect::<Vec<_>>(), vec!["unknown"]);
    }

    #[test]
    fn parses_result_record() {
        let event =
            WorkerEvent::parse(r#"{"type":"result","subtype":"success","is_error":false}"#)
                .unwrap();
        assert!(matches!(
            event,
            WorkerEvent::Result {
                is_error: false,
                ..
            }
        ));
    }

    #[test]
    fn unknown_type_falls_through_to_other() {
        let event = WorkerEvent::parse(r#"{"type":"control_request","request_id":"r1"}"#).unwrap();
        assert!(matches!(event, WorkerEvent::Other));
    }

    #[test]
    fn assistant_without_message_yields_empty_content() {
        let event = WorkerEvent::parse(r#"{"type":"assistant"}"#).unwrap();
        let WorkerEvent::Assistant { message } = event else {
            panic!("expected assistant event");
        };
        assert!(message.content.is_empty());
    }

    #[test]
    fn unknown_content_block_kind_is_tolerated() {
        let event = WorkerEvent::parse(
            r#"{"type":"assistant","message":{"content":[{"type":"server_tool_use","id":"x"}]}}"#,
        )
        .unwrap();
        let WorkerEvent::Assistant { message } = event else {
            panic!("expected assistant event");
        };
        assert_eq!(message.tool_names().count(), 0);
        assert!(message.joined_text().is_none());
    }
}
