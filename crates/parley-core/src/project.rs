//! Tool-call projection
//!
//! A pure derivation from the message log (plus the current streaming
//! tool frame, if any) to an ordered sequence of tool-call snapshots.
//! Snapshot order is first-observation order and indexes are stable
//! across re-projection.

use parley_api::{Message, MessageKind, ToolFrame};
use serde::{Deserialize, Serialize};

/// Sentinel result content marking a snapshot as still streaming
pub const STREAMING_SENTINEL: &str = "STREAMING";

/// The assistant side of a tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantCall {
    pub name: String,
    pub content: String,
    pub ts: i64,
}

/// The result side of a tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub content: String,
    pub is_success: bool,
    pub ts: i64,
}

/// Lifecycle state of a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotState {
    Pending,
    Streaming,
    Completed,
}

/// One tool invocation and (possibly) its result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallSnapshot {
    pub id: String,
    pub index: usize,
    pub call: AssistantCall,
    pub result: Option<ToolOutcome>,
    pub timestamp: i64,
}

impl ToolCallSnapshot {
    pub fn state(&self) -> SnapshotState {
        match &self.result {
            None => SnapshotState::Pending,
            Some(r) if r.content == STREAMING_SENTINEL => SnapshotState::Streaming,
            Some(_) => SnapshotState::Completed,
        }
    }
}

/// Derive the ordered tool-call sequence.
///
/// Each assistant message carrying an invocation contributes one
/// pending snapshot; its tool result (matched by invocation id, or
/// positionally) completes it. A streaming frame with no assistant
/// message yet appends a streaming snapshot at the tail.
pub fn project_tool_calls(
    messages: &[Message],
    streaming_frame: Option<&ToolFrame>,
) -> Vec<ToolCallSnapshot> {
    let mut snapshots: Vec<ToolCallSnapshot> = Vec::new();

    for message in messages {
        match message.kind {
            MessageKind::Assistant => {
                if let Some(invocation) = message.tool_invocation() {
                    let id = invocation
                        .call_id
                        .unwrap_or_else(|| message.id.to_string());
                    snapshots.push(ToolCallSnapshot {
                        id,
                        index: snapshots.len(),
                        call: AssistantCall {
                            name: invocation.name,
                            content: invocation.arguments.to_string(),
                            ts: message.created_at,
                        },
                        result: None,
                        timestamp: message.created_at,
                    });
                }
            }
            MessageKind::Tool => {
                let target = match message.tool_call_id() {
                    Some(call_id) => snapshots.iter_mut().find(|s| s.id == call_id),
                    None => snapshots
                        .iter_mut()
                        .find(|s| s.result.is_none()),
                };
                if let Some(snapshot) = target {
                    snapshot.result = Some(ToolOutcome {
                        content: message.content.clone(),
                        is_success: resolve_success(message),
                        ts: message.created_at,
                    });
                }
            }
            MessageKind::User | MessageKind::Status => {}
        }
    }

    if let Some(frame) = streaming_frame {
        let corresponds = snapshots.iter().any(|s| {
            frame
                .call_id
                .as_ref()
                .is_some_and(|id| &s.id == id)
                || (frame.call_id.is_none()
                    && s.result.is_none()
                    && s.call.name == frame.name)
        });
        if !corresponds {
            let ts = messages.last().map(|m| m.created_at).unwrap_or(0);
            snapshots.push(ToolCallSnapshot {
                id: frame
                    .call_id
                    .clone()
                    .unwrap_or_else(|| format!("streaming-{}", frame.name)),
                index: snapshots.len(),
                call: AssistantCall {
                    name: frame.name.clone(),
                    content: frame.arguments.to_string(),
                    ts,
                },
                result: Some(ToolOutcome {
                    content: STREAMING_SENTINEL.to_string(),
                    is_success: true,
                    ts,
                }),
                timestamp: ts,
            });
        }
    }

    snapshots
}

/// Resolve the success flag of a tool result message.
///
/// Descends the parsed payload preferring the deepest structured
/// forms first, then the carrier's declared flag. A completed result
/// with no flag anywhere counts as failed; only the streaming
/// sentinel defaults to success.
fn resolve_success(message: &Message) -> bool {
    if let Some(value) = message.content_json() {
        const PATHS: [&[&str]; 4] = [
            &["content", "tool_execution", "result", "success"],
            &["tool_execution", "result", "success"],
            &["result", "success"],
            &["success"],
        ];
        for path in PATHS {
            let mut cursor = Some(&value);
            for key in path {
                cursor = cursor.and_then(|v| v.get(key));
            }
            if let Some(flag) = cursor.and_then(|v| v.as_bool()) {
                return flag;
            }
        }
    }
    message.meta.is_success.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_api::types::Message;

    fn assistant_call(id: &str, call_id: &str, name: &str) -> Message {
        let mut msg = Message::assistant(id, "t1", "");
        msg.content = format!(
            r#"{{"tool_call": {{"call_id": "{}", "name": "{}", "arguments": {{"path": "f"}}}}}}"#,
            call_id, name
        );
        msg
    }

    fn tool_result(id: &str, call_id: &str, body: &str) -> Message {
        let mut msg = Message::assistant(id, "t1", "");
        msg.kind = MessageKind::Tool;
        msg.content = format!(r#"{{"tool_call_id": "{}", {}}}"#, call_id, body);
        msg
    }

    #[test]
    fn test_assistant_invocation_is_pending() {
        let messages = vec![assistant_call("a1", "c1", "read_file")];
        let snaps = project_tool_calls(&messages, None);
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].state(), SnapshotState::Pending);
        assert_eq!(snaps[0].call.name, "read_file");
        assert_eq!(snaps[0].index, 0);
    }

    #[test]
    fn test_result_completes_by_call_id() {
        let messages = vec![
            assistant_call("a1", "c1", "read_file"),
            assistant_call("a2", "c2", "bash"),
            tool_result("r1", "c2", r#""success": true"#),
        ];
        let snaps = project_tool_calls(&messages, None);
        assert_eq!(snaps[0].state(), SnapshotState::Pending);
        assert_eq!(snaps[1].state(), SnapshotState::Completed);
        assert!(snaps[1].result.as_ref().unwrap().is_success);
    }

    #[test]
    fn test_result_completes_positionally() {
        let mut result = Message::assistant("r1", "t1", "");
        result.kind = MessageKind::Tool;
        result.content = r#"{"success": true}"#.to_string();

        let messages = vec![assistant_call("a1", "c1", "bash"), result];
        let snaps = project_tool_calls(&messages, None);
        assert_eq!(snaps[0].state(), SnapshotState::Completed);
    }

    #[test]
    fn test_exactly_one_transition_per_result() {
        // A second result for the same call id leaves the first
        // completed snapshot as the target; no new snapshot appears
        let messages = vec![
            assistant_call("a1", "c1", "bash"),
            tool_result("r1", "c1", r#""success": true"#),
            tool_result("r2", "c1", r#""success": false"#),
        ];
        let snaps = project_tool_calls(&messages, None);
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].state(), SnapshotState::Completed);
    }

    #[test]
    fn test_streaming_frame_appends_at_tail() {
        let messages = vec![
            assistant_call("a1", "c1", "bash"),
            tool_result("r1", "c1", r#""success": true"#),
        ];
        let frame = ToolFrame {
            call_id: Some("c2".into()),
            name: "write_file".into(),
            arguments: serde_json::json!({"path": "out"}),
        };
        let snaps = project_tool_calls(&messages, Some(&frame));
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[1].state(), SnapshotState::Streaming);
        assert_eq!(snaps[1].index, 1);
        assert!(snaps[1].result.as_ref().unwrap().is_success);
    }

    #[test]
    fn test_streaming_frame_replaced_by_assistant_message() {
        // Once the assistant message for the same invocation arrives,
        // the frame no longer adds a snapshot; the index is reused
        let frame = ToolFrame {
            call_id: Some("c1".into()),
            name: "bash".into(),
            arguments: serde_json::Value::Null,
        };
        let messages = vec![assistant_call("a1", "c1", "bash")];
        let snaps = project_tool_calls(&messages, Some(&frame));
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].state(), SnapshotState::Pending);

        // And again when the result lands
        let messages = vec![
            assistant_call("a1", "c1", "bash"),
            tool_result("r1", "c1", r#""success": true"#),
        ];
        let snaps = project_tool_calls(&messages, Some(&frame));
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].state(), SnapshotState::Completed);
    }

    #[test]
    fn test_streaming_frame_without_call_id_matches_pending_by_name() {
        let frame = ToolFrame {
            call_id: None,
            name: "bash".into(),
            arguments: serde_json::Value::Null,
        };
        let messages = vec![assistant_call("a1", "c1", "bash")];
        let snaps = project_tool_calls(&messages, Some(&frame));
        assert_eq!(snaps.len(), 1);
    }

    #[test]
    fn test_success_descent_order() {
        // Deepest path wins over shallower conflicting flags
        let messages = vec![
            assistant_call("a1", "c1", "bash"),
            tool_result(
                "r1",
                "c1",
                r#""content": {"tool_execution": {"result": {"success": false}}}, "success": true"#,
            ),
        ];
        let snaps = project_tool_calls(&messages, None);
        assert!(!snaps[0].result.as_ref().unwrap().is_success);

        let messages = vec![
            assistant_call("a1", "c1", "bash"),
            tool_result(
                "r1",
                "c1",
                r#""tool_execution": {"result": {"success": true}}, "success": false"#,
            ),
        ];
        let snaps = project_tool_calls(&messages, None);
        assert!(snaps[0].result.as_ref().unwrap().is_success);

        let messages = vec![
            assistant_call("a1", "c1", "bash"),
            tool_result("r1", "c1", r#""result": {"success": true}"#),
        ];
        let snaps = project_tool_calls(&messages, None);
        assert!(snaps[0].result.as_ref().unwrap().is_success);
    }

    #[test]
    fn test_success_falls_back_to_carrier_flag() {
        let mut result = tool_result("r1", "c1", r#""output": "done""#);
        result.meta.is_success = Some(true);
        let messages = vec![assistant_call("a1", "c1", "bash"), result];
        let snaps = project_tool_calls(&messages, None);
        assert!(snaps[0].result.as_ref().unwrap().is_success);
    }

    #[test]
    fn test_success_defaults_to_failed_when_undeclared() {
        let messages = vec![
            assistant_call("a1", "c1", "bash"),
            tool_result("r1", "c1", r#""output": "done""#),
        ];
        let snaps = project_tool_calls(&messages, None);
        assert_eq!(snaps[0].state(), SnapshotState::Completed);
        assert!(!snaps[0].result.as_ref().unwrap().is_success);
    }

    #[test]
    fn test_plain_assistant_text_contributes_nothing() {
        let messages = vec![Message::assistant("a1", "t1", "just words")];
        assert!(project_tool_calls(&messages, None).is_empty());
    }
}
