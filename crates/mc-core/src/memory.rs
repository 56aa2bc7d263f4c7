//! Per-thread conversation memory for agents.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use crate::message::Message;

/// Opaque token scoping conversation memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadId(String);

impl ThreadId {
    /// Generate a fresh random thread id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ThreadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Agent-side transcripts (including tool calls and results) keyed by thread.
#[derive(Debug, Default)]
pub struct ThreadMemory {
    threads: Mutex<HashMap<ThreadId, Vec<Message>>>,
}

impl ThreadMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, thread: &ThreadId) -> Option<Vec<Message>> {
        self.threads
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(thread)
            .cloned()
    }

    pub fn save(&self, thread: &ThreadId, transcript: Vec<Message>) {
        self.threads
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(thread.clone(), transcript);
    }

    pub fn forget(&self, thread: &ThreadId) {
        self.threads
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(thread);
    }

    pub fn thread_count(&self) -> usize {
        self.threads
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_thread_ids_differ() {
        let a = ThreadId::generate();
        let b = ThreadId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_memory_is_scoped_by_thread() {
        let memory = ThreadMemory::new();
        let first = ThreadId::from("first");
        let second = ThreadId::from("second");

        memory.save(&first, vec![Message::user("hi"), Message::assistant("hello")]);

        assert_eq!(memory.load(&first).map(|t| t.len()), Some(2));
        assert!(memory.load(&second).is_none());

        memory.forget(&first);
        assert_eq!(memory.thread_count(), 0);
    }
}
