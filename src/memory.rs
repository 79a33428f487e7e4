//! Conversation memory
//!
//! Holds an ordered, bounded message history per context id. A context is
//! created on first append and only ever sees its own messages. When a
//! persistence path is configured the whole store is mirrored to a JSON file
//! after every mutation.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::MemoryConfig;

/// Context used when the caller does not name one
pub const DEFAULT_CONTEXT: &str = "general";

/// Resolve an optional context id to the one actually used
#[must_use]
pub fn resolve_context(context_id: Option<&str>) -> &str {
    context_id.unwrap_or(DEFAULT_CONTEXT)
}

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Role name as the chat API expects it
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a message stamped with the current time
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

type Contexts = HashMap<String, VecDeque<Message>>;

/// Per-context conversation history
#[derive(Debug)]
pub struct MemoryStore {
    contexts: Mutex<Contexts>,
    max_messages: usize,
    path: Option<PathBuf>,
}

impl MemoryStore {
    /// Create an in-memory store keeping at most `max_messages` per context
    #[must_use]
    pub fn new(max_messages: usize) -> Self {
        Self {
            contexts: Mutex::new(HashMap::new()),
            max_messages: max_messages.max(1),
            path: None,
        }
    }

    /// Create a store mirrored to a JSON file, loading what is already there
    ///
    /// A missing file starts empty. An unreadable or malformed file is
    /// logged and also starts empty; it is overwritten on the next mutation.
    #[must_use]
    pub fn with_persistence(max_messages: usize, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let max_messages = max_messages.max(1);
        let contexts = load_snapshot(&path, max_messages);

        Self {
            contexts: Mutex::new(contexts),
            max_messages,
            path: Some(path),
        }
    }

    /// Build a store from configuration
    #[must_use]
    pub fn from_config(config: &MemoryConfig) -> Self {
        match &config.path {
            Some(path) => Self::with_persistence(config.max_messages, path),
            None => Self::new(config.max_messages),
        }
    }

    /// Append a message to a context, creating it if needed
    ///
    /// Oldest messages of that context are evicted past the size bound.
    pub fn append(&self, context_id: &str, message: Message) {
        let mut contexts = self.lock();
        let history = contexts.entry(context_id.to_string()).or_default();
        history.push_back(message);

        while history.len() > self.max_messages {
            history.pop_front();
        }

        tracing::trace!(context_id, len = history.len(), "message appended");
        self.persist(&contexts);
    }

    /// Messages of a context in insertion order; empty for unknown ids
    #[must_use]
    pub fn history(&self, context_id: &str) -> Vec<Message> {
        self.lock()
            .get(context_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of messages held for a context
    #[must_use]
    pub fn len(&self, context_id: &str) -> usize {
        self.lock().get(context_id).map_or(0, VecDeque::len)
    }

    /// Whether the store holds no messages at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().values().all(VecDeque::is_empty)
    }

    /// Known context ids, sorted
    #[must_use]
    pub fn contexts(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Remove all messages of one context; unknown ids are a no-op
    pub fn clear(&self, context_id: &str) {
        let mut contexts = self.lock();
        if contexts.remove(context_id).is_some() {
            tracing::info!(context_id, "memory cleared");
            self.persist(&contexts);
        }
    }

    /// Remove every context
    pub fn clear_all(&self) {
        let mut contexts = self.lock();
        contexts.clear();
        tracing::info!("all memory cleared");
        self.persist(&contexts);
    }

    /// Configured per-context bound
    #[must_use]
    pub const fn max_messages(&self) -> usize {
        self.max_messages
    }

    fn lock(&self) -> MutexGuard<'_, Contexts> {
        self.contexts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write the snapshot; failures are logged, never returned
    fn persist(&self, contexts: &Contexts) {
        let Some(path) = &self.path else {
            return;
        };

        let snapshot: BTreeMap<&str, Vec<&Message>> = contexts
            .iter()
            .map(|(id, history)| (id.as_str(), history.iter().collect()))
            .collect();

        let json = match serde_json::to_string_pretty(&snapshot) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize memory");
                return;
            }
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!(
                    path = %parent.display(),
                    error = %e,
                    "failed to create memory directory"
                );
                return;
            }
        }

        if let Err(e) = std::fs::write(path, json) {
            tracing::warn!(path = %path.display(), error = %e, "failed to save memory");
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_MESSAGES)
    }
}

fn load_snapshot(path: &Path, max_messages: usize) -> Contexts {
    if !path.exists() {
        return HashMap::new();
    }

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read memory file");
            return HashMap::new();
        }
    };

    let snapshot: HashMap<String, Vec<Message>> = match serde_json::from_str(&content) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to parse memory file");
            return HashMap::new();
        }
    };

    let contexts: Contexts = snapshot
        .into_iter()
        .map(|(id, messages)| {
            let skip = messages.len().saturating_sub(max_messages);
            (id, messages.into_iter().skip(skip).collect())
        })
        .collect();

    tracing::info!(
        path = %path.display(),
        contexts = contexts.len(),
        "loaded memory"
    );
    contexts
}
