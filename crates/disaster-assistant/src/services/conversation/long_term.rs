use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use crate::utils::error::MemoryStoreError;

#[derive(Debug, Default, Serialize, Deserialize)]
struct MemoryFile {
    #[serde(default)]
    memories: Vec<String>,
}

/// Append-only memory persisted as `{"memories": [...]}` in a JSON file.
pub struct LongTermMemory {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl LongTermMemory {
    /// Use `path`, creating an empty memory file if none exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, MemoryStoreError> {
        let path = path.as_ref().to_path_buf();
        if tokio::fs::metadata(&path).await.is_err() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            write_file(&path, &MemoryFile::default()).await?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub async fn append(&self, text: impl Into<String>) -> Result<(), MemoryStoreError> {
        let _guard = self.write_lock.lock().await;
        let mut file = read_file(&self.path).await?;
        file.memories.push(text.into());
        write_file(&self.path, &file).await?;
        debug!("Long-term memory now holds {} entries", file.memories.len());
        Ok(())
    }

    pub async fn get_all(&self) -> Result<Vec<String>, MemoryStoreError> {
        let _guard = self.write_lock.lock().await;
        Ok(read_file(&self.path).await?.memories)
    }
}

async fn read_file(path: &Path) -> Result<MemoryFile, MemoryStoreError> {
    let raw = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&raw)?)
}

/// Sibling file the next contents are staged in before replacing `path`.
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Writes the whole file to a staging copy, then renames it over `path`
/// so readers see either the old or the new contents.
async fn write_file(path: &Path, file: &MemoryFile) -> Result<(), MemoryStoreError> {
    let raw = serde_json::to_vec_pretty(file)?;
    let staging = staging_path(path);
    tokio::fs::write(&staging, raw).await?;
    if let Err(e) = tokio::fs::rename(&staging, path).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{}-{}.json", name, uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_append_then_get_all_in_order() {
        let path = temp_path("ltm");
        let memory = LongTermMemory::open(&path).await.unwrap();

        memory.append("User: hi\nAssistant: hello").await.unwrap();
        memory.append("second").await.unwrap();

        let all = memory.get_all().await.unwrap();
        assert_eq!(all, vec!["User: hi\nAssistant: hello".to_string(), "second".to_string()]);

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_reopen_keeps_existing_entries() {
        let path = temp_path("ltm-reopen");
        LongTermMemory::open(&path).await.unwrap().append("kept").await.unwrap();

        let reopened = LongTermMemory::open(&path).await.unwrap();
        assert_eq!(reopened.get_all().await.unwrap(), vec!["kept".to_string()]);

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_append_replaces_file_without_leaving_staging_copy() {
        let path = temp_path("ltm-staged");
        let memory = LongTermMemory::open(&path).await.unwrap();
        memory.append("first").await.unwrap();

        // Leftover from an interrupted write must not affect stored entries.
        tokio::fs::write(staging_path(&path), b"{\"memories\": [\"trunc").await.unwrap();
        memory.append("second").await.unwrap();

        assert!(tokio::fs::metadata(staging_path(&path)).await.is_err());
        let raw = tokio::fs::read(&path).await.unwrap();
        let on_disk: MemoryFile = serde_json::from_slice(&raw).unwrap();
        assert_eq!(on_disk.memories, vec!["first".to_string(), "second".to_string()]);

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let path = temp_path("ltm-corrupt");
        tokio::fs::write(&path, b"not json").await.unwrap();
        let memory = LongTermMemory::open(&path).await.unwrap();

        assert!(matches!(memory.get_all().await, Err(MemoryStoreError::Json(_))));

        let _ = tokio::fs::remove_file(&path).await;
    }
}
