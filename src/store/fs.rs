//! Directory-backed coordination store.
//!
//! A configuration path such as `/datasource` maps to `<root>/datasource`.
//! Every regular, non-hidden file in that directory is one key; the file name
//! is the key and its contents (without the trailing newline) are the value.
//! Watches are served by `notify` on the directory.

use crate::error::{DataSourceError, DataSourceResult};
use crate::models::{ChangeEvent, ChangeKind, ConfigSnapshot};
use crate::store::{ConfigStore, WatchStream};
use async_trait::async_trait;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct DirectoryConfigStore {
    root: PathBuf,
}

impl DirectoryConfigStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory backing a configuration path.
    pub fn dir_for(&self, path: &str) -> PathBuf {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.root.clone(), |dir, segment| dir.join(segment))
    }

    fn io_error(path: &str, err: std::io::Error) -> DataSourceError {
        match err.kind() {
            ErrorKind::NotFound => DataSourceError::path_not_found(path),
            _ => DataSourceError::store_unavailable(format!("{}: {}", path, err)),
        }
    }
}

/// Key for a directory entry, or `None` for entries that are not configuration keys.
fn key_for(entry: &Path) -> Option<String> {
    let name = entry.file_name()?.to_str()?;
    if name.starts_with('.') || name.ends_with('~') {
        return None;
    }
    Some(name.to_string())
}

fn decode_value(raw: Vec<u8>) -> String {
    let value = String::from_utf8_lossy(&raw);
    value.trim_end_matches(['\n', '\r']).to_string()
}

/// Read a key file. `None` if it was removed after the directory was listed.
async fn read_value(file: &Path) -> std::io::Result<Option<String>> {
    match tokio::fs::read(file).await {
        Ok(raw) => Ok(Some(decode_value(raw))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Map a filesystem event to change kinds for configuration keys.
fn classify(kind: &EventKind, path: &Path) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::ChildAdded),
        EventKind::Remove(_) => Some(ChangeKind::ChildRemoved),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        // Editors and atomic writers replace files by renaming over them.
        EventKind::Modify(ModifyKind::Name(_)) => {
            if path.is_file() {
                Some(ChangeKind::ChildUpdated)
            } else {
                Some(ChangeKind::ChildRemoved)
            }
        }
        EventKind::Modify(_) => Some(ChangeKind::ChildUpdated),
        _ => None,
    }
}

#[async_trait]
impl ConfigStore for DirectoryConfigStore {
    async fn load_snapshot(&self, path: &str) -> DataSourceResult<ConfigSnapshot> {
        let dir = self.dir_for(path);
        let mut entries = BTreeMap::new();

        let mut read_dir = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| Self::io_error(path, e))?;
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| Self::io_error(path, e))?
        {
            let file_type = entry.file_type().await.map_err(|e| Self::io_error(path, e))?;
            if !file_type.is_file() {
                continue;
            }
            let Some(key) = key_for(&entry.path()) else {
                continue;
            };
            let value = read_value(&entry.path())
                .await
                .map_err(|e| DataSourceError::store_unavailable(format!("{}/{}: {}", path, key, e)))?;
            match value {
                Some(value) => {
                    entries.insert(key, value);
                }
                None => debug!(path = %path, key = %key, "Key removed while reading, skipping"),
            }
        }

        debug!(path = %path, keys = entries.len(), "Loaded configuration from directory");
        Ok(ConfigSnapshot::new(path, entries))
    }

    async fn watch(&self, path: &str) -> DataSourceResult<WatchStream> {
        let dir = self.dir_for(path);
        let metadata = tokio::fs::metadata(&dir)
            .await
            .map_err(|e| Self::io_error(path, e))?;
        if !metadata.is_dir() {
            return Err(DataSourceError::path_not_found(path));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let watched_dir = dir.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for changed in &event.paths {
                        if changed == &watched_dir {
                            continue;
                        }
                        let (Some(kind), Some(key)) =
                            (classify(&event.kind, changed), key_for(changed))
                        else {
                            continue;
                        };
                        let payload = match kind {
                            ChangeKind::ChildRemoved => Vec::new(),
                            _ => std::fs::read(changed).unwrap_or_default(),
                        };
                        let _ = tx.send(ChangeEvent::new(kind, key, payload));
                    }
                }
                Err(e) => error!(error = %e, "Configuration watch error"),
            },
            notify::Config::default(),
        )
        .map_err(|e| DataSourceError::store_unavailable(format!("watch {}: {}", path, e)))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| DataSourceError::store_unavailable(format!("watch {}: {}", path, e)))?;

        info!(path = %path, dir = ?dir, "Directory watch started");
        Ok(WatchStream::new(rx).with_registration(watcher))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_for_maps_path_segments() {
        let store = DirectoryConfigStore::new("/etc/zkds");
        assert_eq!(store.dir_for("/datasource"), PathBuf::from("/etc/zkds/datasource"));
        assert_eq!(
            store.dir_for("/apps/orders/datasource/"),
            PathBuf::from("/etc/zkds/apps/orders/datasource")
        );
    }

    #[test]
    fn test_key_for_skips_hidden_and_backup_files() {
        assert_eq!(key_for(Path::new("/d/username")), Some("username".to_string()));
        assert_eq!(key_for(Path::new("/d/.username.swp")), None);
        assert_eq!(key_for(Path::new("/d/username~")), None);
    }

    #[test]
    fn test_decode_value_strips_trailing_newline() {
        assert_eq!(decode_value(b"u2\n".to_vec()), "u2");
        assert_eq!(decode_value(b"u2\r\n".to_vec()), "u2");
        assert_eq!(decode_value(b" spaced ".to_vec()), " spaced ");
    }

    #[tokio::test]
    async fn test_read_value_treats_vanished_file_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("password");
        std::fs::write(&file, "p\n").unwrap();
        assert_eq!(read_value(&file).await.unwrap(), Some("p".to_string()));

        std::fs::remove_file(&file).unwrap();
        assert_eq!(read_value(&file).await.unwrap(), None);

        // Anything other than a missing file is still an error.
        assert!(read_value(dir.path()).await.is_err());
    }

    #[test]
    fn test_classify_event_kinds() {
        use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};
        let p = Path::new("/nonexistent/username");
        assert_eq!(
            classify(&EventKind::Create(CreateKind::File), p),
            Some(ChangeKind::ChildAdded)
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Data(DataChange::Content)), p),
            Some(ChangeKind::ChildUpdated)
        );
        assert_eq!(
            classify(&EventKind::Remove(RemoveKind::File), p),
            Some(ChangeKind::ChildRemoved)
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any)), p),
            None
        );
    }
}
