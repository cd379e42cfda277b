//! Conversation log per language
//!
//! A log is an immutable snapshot. Every change builds a new snapshot and
//! swaps it in, so a caller holding an older `ConversationLog` never sees it
//! move underneath them.

use crate::languages::LanguageId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Ai,
    System,
    Error,
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "You",
            Role::Ai => "AI",
            Role::System => "System",
            Role::Error => "Error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: Role,
    /// Markdown body
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::new(Role::Ai, content)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(Role::Error, content)
    }
}

/// Immutable, cheaply clonable sequence of messages in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationLog(Arc<Vec<ChatMessage>>);

impl ConversationLog {
    pub fn messages(&self) -> &[ChatMessage] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.0.last()
    }

    pub fn find(&self, id: MessageId) -> Option<&ChatMessage> {
        self.0.iter().find(|m| m.id == id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChatMessage> {
        self.0.iter()
    }

    fn with_appended(&self, message: ChatMessage) -> Self {
        let mut next = Vec::with_capacity(self.0.len() + 1);
        next.extend(self.0.iter().cloned());
        next.push(message);
        Self(Arc::new(next))
    }

    fn with_updated<F>(&self, id: MessageId, mutator: F) -> Option<Self>
    where
        F: FnOnce(ChatMessage) -> ChatMessage,
    {
        let index = self.0.iter().position(|m| m.id == id)?;
        let mut next: Vec<ChatMessage> = self.0.as_ref().clone();
        let updated = mutator(next[index].clone());
        // The mutator may rewrite content, never identity
        next[index] = ChatMessage { id, ..updated };
        Some(Self(Arc::new(next)))
    }
}

impl<'a> IntoIterator for &'a ConversationLog {
    type Item = &'a ChatMessage;
    type IntoIter = std::slice::Iter<'a, ChatMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationStore {
    logs: BTreeMap<LanguageId, ConversationLog>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot for `lang` (empty if nothing was written yet).
    pub fn snapshot(&self, lang: &LanguageId) -> ConversationLog {
        self.logs.get(lang).cloned().unwrap_or_default()
    }

    pub fn append(&mut self, lang: &LanguageId, message: ChatMessage) -> MessageId {
        let id = message.id;
        let next = self.snapshot(lang).with_appended(message);
        self.logs.insert(lang.clone(), next);
        id
    }

    /// Replace the message with `id` by `mutator(message)`.
    ///
    /// Returns `false` and leaves the log untouched when no such message exists.
    pub fn update_by_id<F>(&mut self, lang: &LanguageId, id: MessageId, mutator: F) -> bool
    where
        F: FnOnce(ChatMessage) -> ChatMessage,
    {
        let Some(current) = self.logs.get(lang) else {
            return false;
        };
        match current.with_updated(id, mutator) {
            Some(next) => {
                self.logs.insert(lang.clone(), next);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self, lang: &LanguageId) {
        self.logs.insert(lang.clone(), ConversationLog::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn python() -> LanguageId {
        LanguageId::from("python")
    }

    #[test]
    fn append_preserves_insertion_order() {
        let mut store = ConversationStore::new();
        store.append(&python(), ChatMessage::user("one"));
        store.append(&python(), ChatMessage::ai("two"));
        store.append(&python(), ChatMessage::error("three"));

        let log = store.snapshot(&python());
        let contents: Vec<&str> = log.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
    }

    #[test]
    fn old_snapshots_are_unaffected() {
        let mut store = ConversationStore::new();
        let id = store.append(&python(), ChatMessage::ai("He"));
        let before = store.snapshot(&python());

        store.update_by_id(&python(), id, |mut m| {
            m.content.push_str("llo");
            m
        });
        store.append(&python(), ChatMessage::error("later"));

        assert_eq!(before.len(), 1);
        assert_eq!(before.messages()[0].content, "He");
        assert_eq!(store.snapshot(&python()).messages()[0].content, "Hello");
    }

    #[test]
    fn update_keeps_position_and_identity() {
        let mut store = ConversationStore::new();
        store.append(&python(), ChatMessage::user("q"));
        let id = store.append(&python(), ChatMessage::ai(""));
        store.append(&python(), ChatMessage::error("e"));

        let updated = store.update_by_id(&python(), id, |m| ChatMessage {
            id: MessageId::new(),
            content: "answer".to_string(),
            ..m
        });
        assert!(updated);

        let log = store.snapshot(&python());
        assert_eq!(log.len(), 3);
        assert_eq!(log.messages()[1].id, id);
        assert_eq!(log.messages()[1].content, "answer");
        assert_eq!(log.messages()[1].role, Role::Ai);
    }

    #[test]
    fn update_of_unknown_id_is_a_no_op() {
        let mut store = ConversationStore::new();
        store.append(&python(), ChatMessage::user("q"));
        let before = store.snapshot(&python());

        assert!(!store.update_by_id(&python(), MessageId::new(), |m| m));
        assert!(!store.update_by_id(&LanguageId::from("css"), MessageId::new(), |m| m));
        assert_eq!(store.snapshot(&python()), before);
    }

    #[test]
    fn clear_empties_only_that_language() {
        let mut store = ConversationStore::new();
        store.append(&python(), ChatMessage::user("q"));
        store.append(&LanguageId::from("java"), ChatMessage::user("j"));

        store.clear(&python());
        assert!(store.snapshot(&python()).is_empty());
        assert_eq!(store.snapshot(&LanguageId::from("java")).len(), 1);
    }

    #[test]
    fn role_serializes_lowercase() {
        let msg = ChatMessage::ai("x");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "ai");

        let back: ChatMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn store_serializes_as_map_of_arrays() {
        let mut store = ConversationStore::new();
        store.append(&python(), ChatMessage::user("q"));
        let json = serde_json::to_value(&store).unwrap();
        assert!(json["python"].is_array());
        assert_eq!(json["python"][0]["content"], "q");
    }
}
