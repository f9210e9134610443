//! JSON-file history store.
//!
//! One file per `(agent_name, session_key)` under the base directory,
//! named `<agent>__<key>.json` with both parts sanitized. Writes go
//! through a temp file + rename so a crash never leaves a torn history.

use std::path::PathBuf;

use async_trait::async_trait;

use maestro_domain::error::{Error, Result};
use maestro_domain::tool::Message;

use crate::provider::StorageProvider;

/// Filesystem-backed [`StorageProvider`].
pub struct FileHistoryStore {
    base_dir: PathBuf,
}

impl FileHistoryStore {
    /// Create the store, making the base directory if needed.
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir).map_err(Error::Io)?;
        tracing::info!(path = %base_dir.display(), "history store ready");
        Ok(Self { base_dir })
    }

    fn path_for(&self, agent_name: &str, session_key: &str) -> PathBuf {
        self.base_dir.join(format!(
            "{}__{}.json",
            sanitize(agent_name),
            sanitize(session_key)
        ))
    }
}

/// Replace path-hostile characters so keys cannot escape the base dir.
fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}

#[async_trait]
impl StorageProvider for FileHistoryStore {
    async fn load_history(
        &self,
        agent_name: &str,
        session_key: &str,
    ) -> Result<Option<Vec<Message>>> {
        let path = self.path_for(agent_name, session_key);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };
        let messages = serde_json::from_str(&raw)
            .map_err(|e| Error::Storage(format!("corrupt history at {}: {e}", path.display())))?;
        Ok(Some(messages))
    }

    async fn save_history(
        &self,
        agent_name: &str,
        session_key: &str,
        messages: &[Message],
    ) -> Result<()> {
        let path = self.path_for(agent_name, session_key);
        let json = serde_json::to_string_pretty(messages)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json.as_bytes())
            .await
            .map_err(Error::Io)?;
        tokio::fs::rename(&tmp, &path).await.map_err(Error::Io)?;
        tracing::debug!(
            agent_name,
            session_key,
            messages = messages.len(),
            "history saved"
        );
        Ok(())
    }

    async fn exists_session(&self, session_key: &str) -> Result<bool> {
        let suffix = format!("__{}.json", sanitize(session_key));
        let mut entries = tokio::fs::read_dir(&self.base_dir)
            .await
            .map_err(Error::Io)?;
        while let Some(entry) = entries.next_entry().await.map_err(Error::Io)? {
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(&suffix) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}
