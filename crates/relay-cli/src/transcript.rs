//! Transcript persistence
//!
//! One JSON file per query, rewritten after every append so the file on disk
//! always holds a consistent prefix of the conversation.

use std::path::{Path, PathBuf};

use chrono::Local;
use relay_core::{Message, PersistenceError};
use serde::Serialize;
use tracing::debug;

/// Creates one transcript file per query under a directory
#[derive(Debug, Clone)]
pub struct TranscriptLogger {
    dir: PathBuf,
}

impl TranscriptLogger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Pick the file for a new query. Nothing is written until the first `record`.
    pub fn start_query(&self) -> TranscriptFile {
        let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let name = format!("conversation_{}_{}.json", stamp, &suffix[..8]);
        TranscriptFile {
            path: self.dir.join(name),
        }
    }
}

/// The transcript artifact for one query
#[derive(Debug, Clone)]
pub struct TranscriptFile {
    path: PathBuf,
}

impl TranscriptFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the file contents with `messages`
    pub async fn record(&self, messages: &[Message]) -> Result<(), PersistenceError> {
        let json = to_pretty_json(messages)?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| self.io_error(parent, source))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|source| self.io_error(&tmp, source))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| self.io_error(&self.path, source))?;

        debug!(path = %self.path.display(), messages = messages.len(), "Transcript saved");
        Ok(())
    }

    fn io_error(&self, path: &Path, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Read a transcript back from disk
pub async fn load(path: &Path) -> Result<Vec<Message>, PersistenceError> {
    let content = tokio::fs::read(path)
        .await
        .map_err(|source| PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(serde_json::from_slice(&content)?)
}

/// Four-space indented JSON
fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut serializer)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::ContentBlock;
    use serde_json::json;
    use tempfile::TempDir;

    fn sample() -> Vec<Message> {
        vec![
            Message::user("What is 2+2?"),
            Message::assistant_blocks(vec![
                ContentBlock::text("Adding."),
                ContentBlock::tool_call(
                    "t1",
                    "add",
                    json!({"a": 2, "b": 2}).as_object().cloned().unwrap(),
                ),
            ]),
            Message::user_blocks(vec![ContentBlock::tool_result("t1", "4")]),
            Message::assistant("4"),
        ]
    }

    #[test]
    fn test_file_name_format() {
        let logger = TranscriptLogger::new("/tmp/conversations");
        let file = logger.start_query();
        let name = file.path().file_name().unwrap().to_str().unwrap();

        assert!(name.starts_with("conversation_"));
        assert!(name.ends_with(".json"));
        // conversation_YYYY-MM-DD_HH-MM-SS_xxxxxxxx.json
        assert_eq!(name.len(), "conversation_".len() + 19 + 1 + 8 + ".json".len());
        assert_ne!(logger.start_query().path(), file.path());
    }

    #[tokio::test]
    async fn test_record_and_load() {
        let dir = TempDir::new().unwrap();
        let logger = TranscriptLogger::new(dir.path().join("nested"));
        let file = logger.start_query();
        let messages = sample();

        file.record(&messages[..2]).await.unwrap();
        file.record(&messages).await.unwrap();

        let loaded = load(file.path()).await.unwrap();
        assert_eq!(loaded, messages);

        let raw = std::fs::read_to_string(file.path()).unwrap();
        assert!(raw.contains("\n    {"));
        assert!(!file.path().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_unwritable_directory_is_a_persistence_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();

        let file = TranscriptLogger::new(&blocker).start_query();
        let err = file.record(&sample()).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Io { .. }));
    }

    #[tokio::test]
    async fn test_load_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            load(&path).await,
            Err(PersistenceError::Serialize(_))
        ));
    }
}
