use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{GatewayError, GatewayResult};

/// Character budget a persisted history may occupy before old turns are evicted.
pub const DEFAULT_TRIM_BUDGET: usize = 12_000;

/// How many trailing messages are reloaded into a new request.
pub const DEFAULT_RECALL_WINDOW: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of a conversation, oldest-first inside a history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system<S: Into<String>>(content: S) -> Self {
        Message {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user<S: Into<String>>(content: S) -> Self {
        Message {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Message {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

fn total_chars(history: &[Message]) -> usize {
    history.iter().map(|m| m.content.chars().count()).sum()
}

/// Evict oldest non-system turns until the history fits the budget.
///
/// Removes index 1 repeatedly, never index 0, and never shrinks the history
/// below two messages. A leading system message therefore always survives.
pub fn trim_history(history: &mut Vec<Message>, budget: usize) {
    while history.len() > 2 && total_chars(history) > budget {
        history.remove(1);
    }
}

/// Keyed persistence of ordered message lists. Plain overwrite-on-save,
/// not a log; the key is the logical agent name.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Load the history for `key`. An unknown key yields an empty history.
    async fn load(&self, key: &str) -> GatewayResult<Vec<Message>>;

    /// Replace the history for `key`.
    async fn save(&self, key: &str, history: &[Message]) -> GatewayResult<()>;
}

/// One JSON file per agent key under a memory directory.
pub struct FileHistoryStore {
    dir: PathBuf,
}

impl FileHistoryStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, key: &str) -> GatewayResult<PathBuf> {
        // Keys become file names; reject anything that could escape the dir.
        if key.is_empty()
            || key
                .chars()
                .any(|c| matches!(c, '/' | '\\' | '\0') )
            || key == ".."
        {
            return Err(GatewayError::Storage(format!("invalid history key: {key:?}")));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

#[async_trait]
impl HistoryStore for FileHistoryStore {
    async fn load(&self, key: &str) -> GatewayResult<Vec<Message>> {
        let path = self.record_path(key)?;
        if !Path::new(&path).exists() {
            return Ok(Vec::new());
        }
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| GatewayError::Storage(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| GatewayError::Storage(format!("parse {}: {e}", path.display())))
    }

    async fn save(&self, key: &str, history: &[Message]) -> GatewayResult<()> {
        let path = self.record_path(key)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| GatewayError::Storage(format!("create {}: {e}", self.dir.display())))?;
        let raw = serde_json::to_string(history)
            .map_err(|e| GatewayError::Storage(format!("encode history: {e}")))?;
        tokio::fs::write(&path, raw)
            .await
            .map_err(|e| GatewayError::Storage(format!("write {}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn msg(role: Role, len: usize) -> Message {
        Message {
            role,
            content: "x".repeat(len),
        }
    }

    #[test]
    fn test_trim_noop_under_budget() {
        let mut history = vec![msg(Role::System, 10), msg(Role::User, 10)];
        trim_history(&mut history, 100);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_trim_evicts_oldest_non_system_first() {
        // One over budget: exactly the message at index 1 goes.
        let mut history = vec![
            Message::system("persona"),
            Message::user("oldest question"),
            Message::assistant("oldest answer"),
            Message::user("newest question"),
        ];
        let budget = total_chars(&history) - 1;
        trim_history(&mut history, budget);
        assert_eq!(history[0].content, "persona");
        assert_eq!(history[1].content, "oldest answer");
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_trim_repeats_until_under_budget() {
        let mut history = vec![msg(Role::System, 5)];
        for _ in 0..10 {
            history.push(msg(Role::User, 50));
            history.push(msg(Role::Assistant, 50));
        }
        trim_history(&mut history, 200);
        assert!(total_chars(&history) <= 200);
        assert_eq!(history[0].role, Role::System);
    }

    #[test]
    fn test_trim_never_below_two_messages() {
        let mut history = vec![msg(Role::System, 500), msg(Role::User, 500)];
        trim_history(&mut history, 10);
        // Over budget but untouchable: len is already 2.
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::System);
    }

    #[test]
    fn test_trim_without_system_message() {
        let mut history = vec![msg(Role::User, 100), msg(Role::Assistant, 100), msg(Role::User, 100)];
        trim_history(&mut history, 250);
        assert_eq!(history.len(), 2);
        // Index 0 survives even when it is not a system message.
        assert_eq!(history[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempdir().unwrap();
        let store = FileHistoryStore::new(dir.path());

        let history = vec![Message::user("hello"), Message::assistant("hi there")];
        store.save("AgentX", &history).await.unwrap();

        let loaded = store.load("AgentX").await.unwrap();
        assert_eq!(loaded, history);
    }

    #[tokio::test]
    async fn test_file_store_missing_key_is_empty() {
        let dir = tempdir().unwrap();
        let store = FileHistoryStore::new(dir.path());
        assert!(store.load("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_rejects_traversal_keys() {
        let dir = tempdir().unwrap();
        let store = FileHistoryStore::new(dir.path());
        assert!(store.load("../escape").await.is_err());
        assert!(store.save("a/b", &[]).await.is_err());
    }

    #[test]
    fn test_message_serde_shape() {
        let raw = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(raw, serde_json::json!({"role": "user", "content": "hi"}));
    }
}
