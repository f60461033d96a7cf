//! Ordered, de-duplicated message log
//!
//! The store fuses optimistic local entries, stream frames, and paged
//! persisted history. Positions are fixed once appended; the only
//! in-place substitutions are id-match replacement and
//! optimistic-to-confirmed promotion.

use crate::error::{Error, Result};
use parley_api::{Message, MessageId, MessageKind, OptimisticTag};

/// The message log for a single thread
#[derive(Default)]
pub struct MessageStore {
    messages: Vec<Message>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge an incoming message into the log, applying the
    /// reconciliation rules:
    ///
    /// - same id already present: replace in place (error on a
    ///   contradictory kind or thread)
    /// - confirmed user message matching an optimistic user entry's
    ///   content: promote the optimistic entry in place
    /// - first assistant message of a turn: drop thinking placeholders
    /// - otherwise append at the tail
    pub fn append(&mut self, incoming: Message) -> Result<()> {
        if let Some(pos) = self.position_of(&incoming.id) {
            let existing = &self.messages[pos];
            if existing.kind != incoming.kind || existing.thread_id != incoming.thread_id {
                return Err(Error::DuplicateIdMismatch {
                    id: incoming.id.to_string(),
                });
            }
            self.messages[pos] = incoming;
            return Ok(());
        }

        if incoming.kind == MessageKind::User && !incoming.id.is_optimistic() {
            let optimistic = self.messages.iter().position(|m| {
                m.id.tag() == Some(OptimisticTag::User)
                    && m.kind == MessageKind::User
                    && m.content == incoming.content
            });
            if let Some(pos) = optimistic {
                self.messages[pos] = incoming;
                return Ok(());
            }
        }

        if incoming.kind == MessageKind::Assistant && !incoming.is_thinking_placeholder() {
            self.remove_thinking_placeholders();
        }

        self.messages.push(incoming);
        Ok(())
    }

    /// Replace by id, or append at the tail if the id is new
    pub fn upsert_by_id(&mut self, incoming: Message) -> Result<()> {
        match self.position_of(&incoming.id) {
            Some(pos) => {
                let existing = &self.messages[pos];
                if existing.kind != incoming.kind || existing.thread_id != incoming.thread_id {
                    return Err(Error::DuplicateIdMismatch {
                        id: incoming.id.to_string(),
                    });
                }
                self.messages[pos] = incoming;
                Ok(())
            }
            None => {
                self.messages.push(incoming);
                Ok(())
            }
        }
    }

    /// Replace the first message matching the predicate, preserving
    /// its position. Returns false if nothing matched.
    pub fn replace_optimistic(
        &mut self,
        predicate: impl Fn(&Message) -> bool,
        replacement: Message,
    ) -> bool {
        match self.messages.iter().position(|m| predicate(m)) {
            Some(pos) => {
                self.messages[pos] = replacement;
                true
            }
            None => false,
        }
    }

    /// Replace the message with the given id in place
    pub fn replace_by_id(&mut self, id: &MessageId, replacement: Message) -> bool {
        self.replace_optimistic(|m| &m.id == id, replacement)
    }

    /// Remove all messages matching the predicate, returning how many
    pub fn remove_where(&mut self, predicate: impl Fn(&Message) -> bool) -> usize {
        let before = self.messages.len();
        self.messages.retain(|m| !predicate(m));
        before - self.messages.len()
    }

    /// Remove a single message by id
    pub fn remove_by_id(&mut self, id: &MessageId) -> bool {
        self.remove_where(|m| &m.id == id) > 0
    }

    /// Drop any thinking placeholders
    pub fn remove_thinking_placeholders(&mut self) -> usize {
        self.remove_where(|m| m.is_thinking_placeholder())
    }

    /// Merge a page of persisted history through the same rules
    pub fn hydrate(&mut self, messages: Vec<Message>) -> Result<()> {
        for message in messages {
            self.append(message)?;
        }
        Ok(())
    }

    /// The ordered log
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// An owned copy of the ordered log
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn position_of(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_api::types::Message;

    #[test]
    fn test_append_then_dedup_in_place() {
        let mut store = MessageStore::new();
        store.append(Message::user("u1", "t1", "hello")).unwrap();
        store.append(Message::assistant("a1", "t1", "hi")).unwrap();

        // Same id again: replaced in place, position preserved
        store
            .append(Message::user("u1", "t1", "hello edited"))
            .unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.messages()[0].content, "hello edited");
    }

    #[test]
    fn test_duplicate_id_mismatch() {
        let mut store = MessageStore::new();
        store.append(Message::user("m1", "t1", "x")).unwrap();

        let err = store.append(Message::assistant("m1", "t1", "x")).unwrap_err();
        assert!(matches!(err, Error::DuplicateIdMismatch { .. }));

        let err = store.append(Message::user("m1", "t2", "x")).unwrap_err();
        assert!(matches!(err, Error::DuplicateIdMismatch { .. }));
    }

    #[test]
    fn test_optimistic_user_promoted_in_place() {
        let mut store = MessageStore::new();
        let optimistic = Message::optimistic_user("t1", "run the tests");
        store.append(optimistic.clone()).unwrap();
        store.append(Message::assistant("a0", "t1", "ok")).unwrap();

        store
            .append(Message::user("u1", "t1", "run the tests"))
            .unwrap();

        // Replaced in place: still first, now confirmed, no duplicate
        assert_eq!(store.len(), 2);
        assert_eq!(store.messages()[0].id.to_string(), "u1");
        assert!(!store.messages()[0].id.is_optimistic());
    }

    #[test]
    fn test_optimistic_user_with_different_content_not_promoted() {
        let mut store = MessageStore::new();
        store
            .append(Message::optimistic_user("t1", "first"))
            .unwrap();
        store.append(Message::user("u1", "t1", "second")).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.messages()[0].id.is_optimistic());
    }

    #[test]
    fn test_assistant_arrival_drops_thinking_placeholder() {
        let mut store = MessageStore::new();
        store
            .append(Message::optimistic_user("t1", "hello"))
            .unwrap();
        store
            .append(Message::thinking_placeholder("t1"))
            .unwrap();
        assert_eq!(store.len(), 2);

        store.append(Message::assistant("a1", "t1", "hey")).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.messages().iter().all(|m| !m.is_thinking_placeholder()));
    }

    #[test]
    fn test_hidden_messages_are_kept() {
        let mut store = MessageStore::new();
        let mut hidden = Message::user("u1", "t1", "secret");
        hidden.meta.hidden = true;
        store.append(hidden).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.messages()[0].meta.hidden);
    }

    #[test]
    fn test_insertion_order_is_monotonic() {
        let mut store = MessageStore::new();
        for i in 0..5 {
            store
                .append(Message::user(format!("u{}", i), "t1", format!("m{}", i)))
                .unwrap();
        }
        // Re-delivering an early message must not move it
        store.append(Message::user("u1", "t1", "m1 again")).unwrap();
        let ids: Vec<String> = store.messages().iter().map(|m| m.id.to_string()).collect();
        assert_eq!(ids, vec!["u0", "u1", "u2", "u3", "u4"]);
    }

    #[test]
    fn test_no_two_messages_share_an_id() {
        // Invariant: for all operation sequences, ids stay unique
        let mut store = MessageStore::new();
        store.append(Message::user("u1", "t1", "a")).unwrap();
        store.append(Message::user("u1", "t1", "b")).unwrap();
        store.upsert_by_id(Message::user("u1", "t1", "c")).unwrap();
        store
            .hydrate(vec![Message::user("u1", "t1", "d")])
            .unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_hydrate_merges_around_optimistic_entries() {
        let mut store = MessageStore::new();
        store
            .append(Message::optimistic_user("t1", "latest question"))
            .unwrap();

        store
            .hydrate(vec![
                Message::user("u1", "t1", "older question"),
                Message::user("u2", "t1", "latest question"),
            ])
            .unwrap();

        // The optimistic entry kept its position and was promoted by
        // content; the older history entry appended after it
        assert_eq!(store.len(), 2);
        assert_eq!(store.messages()[0].id.to_string(), "u2");
        assert!(!store.messages()[0].id.is_optimistic());
        assert_eq!(store.messages()[1].id.to_string(), "u1");
    }

    #[test]
    fn test_remove_where() {
        let mut store = MessageStore::new();
        store.append(Message::user("u1", "t1", "a")).unwrap();
        store.append(Message::assistant("a1", "t1", "b")).unwrap();
        assert_eq!(store.remove_where(|m| m.kind == MessageKind::Assistant), 1);
        assert_eq!(store.len(), 1);
    }
}
