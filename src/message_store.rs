/// The in-session conversation store.
///
/// Holds every message exchanged with the model this run, in arrival order,
/// and enforces the pairing between an assistant's tool calls and the tool
/// results that satisfy them. This is the thing the compression engine
/// rewrites in place and the thing the hot-context injector reads recent
/// entries from — every other core component talks to the conversation
/// through here, never through a bare `Vec`.
use crate::client;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
    /// UI-only — never sent to the model, dropped by `iterate_for_model`.
    DisplayOnly,
}

impl Role {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
            Role::DisplayOnly => "display_only",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolCallRef {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Populated on assistant messages that requested tool calls.
    pub tool_calls: Vec<ToolCallRef>,
    /// Populated on `Role::Tool` messages — the call this result answers.
    pub tool_call_id: Option<String>,
    /// Reasoning/thinking text surfaced by some model servers, rendered
    /// separately by the UI and never sent back to the model.
    pub thinking_content: Option<String>,
    /// Unix seconds, for display and for telemetry — not used for ordering.
    pub timestamp: i64,
}

impl Message {
    pub fn user(content: impl Into<String>, timestamp: i64) -> Self {
        Self { role: Role::User, content: content.into(), tool_calls: Vec::new(), tool_call_id: None, thinking_content: None, timestamp }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCallRef>, timestamp: i64) -> Self {
        Self { role: Role::Assistant, content: content.into(), tool_calls, tool_call_id: None, thinking_content: None, timestamp }
    }

    pub fn system(content: impl Into<String>, timestamp: i64) -> Self {
        Self { role: Role::System, content: content.into(), tool_calls: Vec::new(), tool_call_id: None, thinking_content: None, timestamp }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
            thinking_content: None,
            timestamp,
        }
    }

    pub fn display_only(content: impl Into<String>, timestamp: i64) -> Self {
        Self { role: Role::DisplayOnly, content: content.into(), tool_calls: Vec::new(), tool_call_id: None, thinking_content: None, timestamp }
    }

    /// Convert to the wire shape the model-server client sends over the network.
    fn to_wire(&self) -> client::Message {
        let mut m = client::Message {
            role: self.role.as_wire_str().to_string(),
            content: client::MessageContent::Text(self.content.clone()),
            tool_calls: self
                .tool_calls
                .iter()
                .map(|t| client::ToolCall { id: t.id.clone(), name: t.name.clone(), arguments: t.arguments.clone() })
                .collect(),
        };
        if self.role == Role::Tool {
            if let Some(id) = &self.tool_call_id {
                m.content = client::MessageContent::Parts(vec![client::ContentPart::ToolResult {
                    tool_use_id: id.clone(),
                    content: self.content.clone(),
                }]);
            }
        }
        m
    }
}

#[derive(Debug, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Message> {
        self.messages.iter_mut()
    }

    /// Messages as they should be sent to the model: `display_only` dropped,
    /// order preserved, converted to the wire shape.
    pub fn iterate_for_model(&self) -> Vec<client::Message> {
        self.messages
            .iter()
            .filter(|m| m.role != Role::DisplayOnly)
            .map(Message::to_wire)
            .collect()
    }

    /// Replace a single message's content and, optionally, its role — used by
    /// the compression engine's per-message metadata rewrites. Clears
    /// `tool_calls` when the role changes away from `Assistant`, since any
    /// tool results for those calls must be compressed/removed separately.
    pub fn replace_content_at(&mut self, index: usize, new_content: String, new_role: Option<Role>) {
        let Some(m) = self.messages.get_mut(index) else { return };
        m.content = new_content;
        if let Some(role) = new_role {
            if role != Role::Assistant {
                m.tool_calls.clear();
            }
            m.role = role;
        }
    }

    /// Remove messages in `[start, end]` (inclusive), then repair pairing:
    /// any surviving `tool` message whose `tool_call_id` no longer resolves
    /// to a preceding assistant's `tool_calls` is demoted to `system` (its
    /// content is kept — it's still useful prose — but it's no longer a
    /// dangling tool result).
    pub fn remove_range(&mut self, start: usize, end_inclusive: usize) {
        if start > end_inclusive || end_inclusive >= self.messages.len() {
            return;
        }
        self.messages.drain(start..=end_inclusive);
        self.repair_tool_pairing();
    }

    fn repair_tool_pairing(&mut self) {
        let mut known_call_ids: std::collections::HashSet<String> = std::collections::HashSet::new();
        for m in self.messages.iter_mut() {
            match m.role {
                Role::Assistant => {
                    for tc in &m.tool_calls {
                        known_call_ids.insert(tc.id.clone());
                    }
                }
                Role::Tool => {
                    let resolves = m
                        .tool_call_id
                        .as_ref()
                        .map(|id| known_call_ids.contains(id))
                        .unwrap_or(false);
                    if !resolves {
                        m.role = Role::System;
                    }
                }
                _ => {}
            }
        }
    }

    /// True iff every `tool` message's `tool_call_id` resolves to an earlier
    /// assistant message's `tool_calls`. Exposed for tests and for the
    /// internal-invariant check the coordinator runs after a compression pass.
    pub fn pairing_is_valid(&self) -> bool {
        let mut known: std::collections::HashSet<&str> = std::collections::HashSet::new();
        for m in &self.messages {
            match m.role {
                Role::Assistant => {
                    for tc in &m.tool_calls {
                        known.insert(tc.id.as_str());
                    }
                }
                Role::Tool => {
                    let Some(id) = m.tool_call_id.as_deref() else { return false };
                    if !known.contains(id) {
                        return false;
                    }
                }
                _ => {}
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_only_dropped_from_model_view() {
        let mut store = MessageStore::new();
        store.append(Message::user("hi", 0));
        store.append(Message::display_only("[UI note]", 0));
        let wire = store.iterate_for_model();
        assert_eq!(wire.len(), 1);
    }

    #[test]
    fn test_remove_range_demotes_orphaned_tool_message() {
        let mut store = MessageStore::new();
        store.append(Message::user("do thing", 0));
        store.append(Message::assistant(
            "",
            vec![ToolCallRef { id: "call_1".into(), name: "bash".into(), arguments: "{}".into() }],
            0,
        ));
        store.append(Message::tool_result("call_1", "output", 0));
        assert!(store.pairing_is_valid());

        // Remove the assistant message that owns call_1.
        store.remove_range(1, 1);
        assert!(store.pairing_is_valid());
        assert_eq!(store.get(1).unwrap().role, Role::System);
    }

    #[test]
    fn test_replace_content_preserves_role_by_default() {
        let mut store = MessageStore::new();
        store.append(Message::user("original", 0));
        store.replace_content_at(0, "compressed".into(), None);
        assert_eq!(store.get(0).unwrap().content, "compressed");
        assert_eq!(store.get(0).unwrap().role, Role::User);
    }
}
