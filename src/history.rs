//! Conversation history
//!
//! A history is an ordered list of turns. A turn starts with one or more user
//! messages and collects the assistant and tool messages produced in reply.
//! Only the last turn is ever mutated, and a turn never stays empty.

mod content;
mod media;
mod message;

pub use content::{joined_text, tool_calls, ContentItem, ToolCall};
pub use media::{HttpMediaLoader, Media, MediaError, MediaLoader};
pub use message::{ExternalId, Message, MessageId, Role};

use thiserror::Error;

/// Errors from history mutation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("history has no turn to append to")]
    NoTurn,
}

/// One user-initiated exchange
#[derive(Debug, Clone)]
pub struct Turn {
    messages: Vec<Message>,
}

impl Turn {
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Re-sort by front-end send order when every message has one, else by
    /// creation time. Both sorts are stable.
    fn sort(&mut self) {
        if self.messages.iter().all(|m| m.external_id.is_some()) {
            self.messages.sort_by_key(|m| m.external_id);
        } else {
            self.messages.sort_by_key(|m| m.created_at);
        }
    }
}

/// Ordered turns of one chat
#[derive(Debug, Clone, Default)]
pub struct ChatHistory {
    turns: Vec<Turn>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// All messages, oldest first
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.turns.iter().flat_map(|t| t.messages.iter())
    }

    pub fn message_count(&self) -> usize {
        self.turns.iter().map(Turn::len).sum()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Add user messages. They join the last turn when that turn still ends
    /// with a user message (or `force_merge` is set); otherwise they open a
    /// new turn. Empty input changes nothing.
    pub fn add_user_messages(&mut self, messages: Vec<Message>, force_merge: bool) {
        if messages.is_empty() {
            return;
        }

        let merge = self
            .turns
            .last()
            .and_then(Turn::last)
            .is_some_and(|last| force_merge || last.is_user());

        match self.turns.last_mut() {
            Some(turn) if merge => {
                turn.messages.extend(messages);
                turn.sort();
            }
            _ => self.turns.push(Turn { messages }),
        }
    }

    /// Append an assistant, tool or instruction message to the last turn
    pub fn append_response(&mut self, message: Message) -> Result<(), HistoryError> {
        let turn = self.turns.last_mut().ok_or(HistoryError::NoTurn)?;
        turn.messages.push(message);
        Ok(())
    }

    /// Remove every non-user message from the last turn, returning how many
    /// were removed
    pub fn remove_responses(&mut self) -> usize {
        let Some(turn) = self.turns.last_mut() else {
            return 0;
        };
        let before = turn.messages.len();
        turn.messages.retain(Message::is_user);
        let removed = before - turn.messages.len();
        self.drop_empty_last_turn();
        removed
    }

    /// Remove one message from the last turn
    pub fn remove_message(&mut self, id: MessageId) -> Option<Message> {
        let turn = self.turns.last_mut()?;
        let index = turn.messages.iter().position(|m| m.id == id)?;
        let removed = turn.messages.remove(index);
        self.drop_empty_last_turn();
        Some(removed)
    }

    fn drop_empty_last_turn(&mut self) {
        if self.turns.last().is_some_and(Turn::is_empty) {
            self.turns.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn texts(history: &ChatHistory) -> Vec<Vec<String>> {
        history
            .turns()
            .iter()
            .map(|t| t.messages().iter().map(Message::text).collect())
            .collect()
    }

    fn assistant(text: &str) -> Message {
        Message::assistant("bot", vec![ContentItem::text(text)])
    }

    #[test]
    fn test_user_after_assistant_starts_new_turn() {
        let mut history = ChatHistory::new();
        history.add_user_messages(vec![Message::user("ann", "hi")], false);
        history.append_response(assistant("hello")).unwrap();
        history.add_user_messages(vec![Message::user("ann", "how are you")], false);

        assert_eq!(
            texts(&history),
            vec![vec!["hi", "hello"], vec!["how are you"]]
        );
    }

    #[test]
    fn test_user_after_user_merges() {
        let mut history = ChatHistory::new();
        history.add_user_messages(vec![Message::user("ann", "one")], false);
        history.add_user_messages(vec![Message::user("ann", "two")], false);

        assert_eq!(history.turns().len(), 1);
        assert_eq!(texts(&history), vec![vec!["one", "two"]]);
    }

    #[test]
    fn test_force_merge_joins_answered_turn() {
        let mut history = ChatHistory::new();
        history.add_user_messages(vec![Message::user("ann", "hi")], false);
        history.append_response(assistant("hello")).unwrap();
        history.add_user_messages(vec![Message::user("ann", "late")], true);

        assert_eq!(history.turns().len(), 1);
        assert_eq!(history.message_count(), 3);
    }

    #[test]
    fn test_merge_sorts_by_external_id_when_all_have_one() {
        let mut history = ChatHistory::new();
        history.add_user_messages(
            vec![Message::user("ann", "second").with_external_id(ExternalId(20))],
            false,
        );
        history.add_user_messages(
            vec![Message::user("ann", "first").with_external_id(ExternalId(10))],
            false,
        );
        assert_eq!(texts(&history), vec![vec!["first", "second"]]);
    }

    #[test]
    fn test_merge_sorts_by_timestamp_otherwise() {
        let now = Utc::now();
        let mut history = ChatHistory::new();
        history.add_user_messages(
            vec![Message::user("ann", "later")
                .with_created_at(now)
                .with_external_id(ExternalId(1))],
            false,
        );
        history.add_user_messages(
            vec![Message::user("ann", "earlier").with_created_at(now - Duration::seconds(5))],
            false,
        );
        assert_eq!(texts(&history), vec![vec!["earlier", "later"]]);
    }

    #[test]
    fn test_empty_add_is_noop() {
        let mut history = ChatHistory::new();
        history.add_user_messages(vec![], false);
        assert!(history.is_empty());
    }

    #[test]
    fn test_append_to_empty_history_fails() {
        let mut history = ChatHistory::new();
        assert_eq!(history.append_response(assistant("x")), Err(HistoryError::NoTurn));
    }

    #[test]
    fn test_remove_responses_keeps_user_messages() {
        let mut history = ChatHistory::new();
        history.add_user_messages(vec![Message::user("ann", "hi")], false);
        history.append_response(Message::system("continue")).unwrap();
        history.append_response(assistant("a")).unwrap();

        assert_eq!(history.remove_responses(), 2);
        assert_eq!(texts(&history), vec![vec!["hi"]]);
        assert_eq!(history.remove_responses(), 0);
        assert_eq!(history.message_count(), 1);
    }

    #[test]
    fn test_removing_last_message_deletes_turn() {
        let mut history = ChatHistory::new();
        history.add_user_messages(vec![Message::user("ann", "a")], false);
        history.append_response(assistant("b")).unwrap();
        let question = Message::user("ann", "c");
        let id = question.id;
        history.add_user_messages(vec![question], false);

        let removed = history.remove_message(id).unwrap();
        assert_eq!(removed.text(), "c");
        assert_eq!(history.turns().len(), 1);
    }

    #[test]
    fn test_only_last_turn_is_searched_for_removal() {
        let mut history = ChatHistory::new();
        let first = Message::user("ann", "a");
        let id = first.id;
        history.add_user_messages(vec![first], false);
        history.append_response(assistant("b")).unwrap();
        history.add_user_messages(vec![Message::user("ann", "c")], false);

        assert!(history.remove_message(id).is_none());
        assert_eq!(history.message_count(), 3);
    }

    #[test]
    fn test_clone_is_independent() {
        let mut history = ChatHistory::new();
        history.add_user_messages(vec![Message::user("ann", "hi")], false);
        history.append_response(assistant("hello")).unwrap();

        let mut copy = history.clone();
        copy.append_response(assistant("extra")).unwrap();
        copy.remove_responses();
        drop(history.clone());

        assert_eq!(history.message_count(), 2);
        assert_eq!(copy.message_count(), 1);
        assert!(history
            .messages()
            .zip(history.clone().messages())
            .all(|(a, b)| a.same_content(b) && a.id == b.id));
    }
}
