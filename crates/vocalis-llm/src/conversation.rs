use crate::source::ChatMessage;
use std::collections::VecDeque;
use vocalis_types::{ConversationTurn, Role, ToolInvocation};

/// Per-session conversation history.
///
/// Turns of the in-flight completion are held as *pending* until the turn
/// commits. A rollback drops them, so a failed or cancelled turn never
/// leaves half an exchange in the committed history.
#[derive(Debug, Clone)]
pub struct Conversation {
    system_prompt: String,
    turns: VecDeque<ConversationTurn>,
    pending: Vec<ConversationTurn>,
    next_ordinal: u64,
    max_history: usize,
}

impl Conversation {
    /// `max_history` bounds the committed turns, excluding the system prompt.
    pub fn new(system_prompt: impl Into<String>, max_history: usize) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            turns: VecDeque::new(),
            pending: Vec::new(),
            next_ordinal: 0,
            max_history: max_history.max(1),
        }
    }

    fn turn(
        &mut self,
        role: Role,
        content: String,
        tool_name: Option<String>,
        tool_calls: Vec<ToolInvocation>,
    ) -> ConversationTurn {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        ConversationTurn {
            ordinal,
            role,
            content,
            tool_name,
            tool_calls,
        }
    }

    /// Appends the user's input to the committed history.
    pub fn push_user(&mut self, content: impl Into<String>) {
        let turn = self.turn(Role::User, content.into(), None, Vec::new());
        self.turns.push_back(turn);
        self.trim();
    }

    /// Records an assistant message that requested tools.
    pub fn push_tool_request(&mut self, content: impl Into<String>, calls: Vec<ToolInvocation>) {
        let turn = self.turn(Role::Assistant, content.into(), None, calls);
        self.pending.push(turn);
    }

    /// Records the rendered result of one tool call.
    pub fn push_tool_result(&mut self, tool_name: impl Into<String>, content: impl Into<String>) {
        let turn = self.turn(Role::Tool, content.into(), Some(tool_name.into()), Vec::new());
        self.pending.push(turn);
    }

    /// Commits pending tool exchanges and the final assistant text.
    pub fn commit(&mut self, text: impl Into<String>) {
        let text = text.into();
        self.turns.extend(self.pending.drain(..));
        if !text.trim().is_empty() {
            let turn = self.turn(Role::Assistant, text, None, Vec::new());
            self.turns.push_back(turn);
        }
        self.trim();
    }

    /// Discards everything recorded since the user's input.
    pub fn rollback(&mut self) {
        self.pending.clear();
    }

    /// Forgets the whole history. The system prompt stays.
    pub fn clear(&mut self) {
        self.turns.clear();
        self.pending.clear();
    }

    /// Number of committed turns.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// The message list sent to the model: system prompt, committed turns,
    /// then pending turns.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut out = Vec::with_capacity(self.turns.len() + self.pending.len() + 1);
        if !self.system_prompt.is_empty() {
            out.push(ChatMessage::new(Role::System, self.system_prompt.clone()));
        }
        out.extend(self.turns.iter().map(ChatMessage::from));
        out.extend(self.pending.iter().map(ChatMessage::from));
        out
    }

    /// Evicts the oldest turns past the bound. History never starts with a
    /// tool exchange whose user turn was evicted.
    fn trim(&mut self) {
        while self.turns.len() > self.max_history {
            self.turns.pop_front();
        }
        while self
            .turns
            .front()
            .is_some_and(|t| t.role != Role::User && self.turns.len() > 1)
        {
            self.turns.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn commit_moves_pending_turns_in_order() {
        let mut c = Conversation::new("sys", 50);
        c.push_user("¿Cuántos usuarios hay?");
        c.push_tool_request(
            "",
            vec![ToolInvocation::new(
                "get_table_count",
                json!({"table_name": "usuarios"}),
            )],
        );
        c.push_tool_result("get_table_count", "Table 'usuarios' has 10 records.");
        assert_eq!(c.len(), 1);
        assert!(c.has_pending());
        assert_eq!(c.messages().len(), 4);

        c.commit("Hay 10 usuarios.");
        let roles: Vec<Role> = c.turns().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        let ordinals: Vec<u64> = c.turns().map(|t| t.ordinal).collect();
        assert!(ordinals.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn rollback_keeps_user_turn() {
        let mut c = Conversation::new("sys", 50);
        c.push_user("hola");
        c.push_tool_request("", vec![ToolInvocation::new("x", json!({}))]);
        c.rollback();
        assert_eq!(c.len(), 1);
        assert!(!c.has_pending());
        assert_eq!(c.turns().next().unwrap().role, Role::User);
    }

    #[test]
    fn eviction_never_leaves_a_leading_tool_turn() {
        let mut c = Conversation::new("sys", 4);
        c.push_user("uno");
        c.push_tool_request("", vec![ToolInvocation::new("x", json!({}))]);
        c.push_tool_result("x", "r");
        c.commit("respuesta uno");
        c.push_user("dos");
        assert!(c.len() <= 4);
        assert_eq!(c.turns().next().unwrap().role, Role::User);
        assert_eq!(c.turns().next().unwrap().content, "dos");
    }

    #[test]
    fn clear_keeps_system_prompt() {
        let mut c = Conversation::new("sys", 10);
        c.push_user("hola");
        c.commit("buenas");
        c.clear();
        assert!(c.is_empty());
        let messages = c.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::System);
    }
}
