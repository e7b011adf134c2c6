//! Per-client metadata: last sync timestamp and storage directory
//!
//! Every client owns `root/<clientId>/` and a `.properties` record inside it.
//! Records are loaded lazily on first reference and cached for the life of
//! the process; a later access never re-reads the file.
//!
//! Locking is per client. The outer map lock is only held long enough to
//! find or insert the client's slot; all filesystem work happens under the
//! slot's async mutex, so first-time creation runs exactly once and two
//! sessions for the same client never interleave a read-modify-write.

use crate::error::{MetadataError, MetadataResult};
use crate::properties::Properties;
use crate::protocol::metadata::{
    last_sync_key, DEFAULT_LAST_SYNC, FILE_NAME, TEMP_FILE_NAME, TIMESTAMP_FORMAT,
};
use chrono::Local;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Snapshot of one client's record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMetadata {
    pub client_id: String,
    pub last_sync: String,
    pub directory: PathBuf,
}

struct ClientRecord {
    dir: PathBuf,
    props: Properties,
}

impl ClientRecord {
    fn last_sync(&self, client_id: &str) -> String {
        self.props
            .get(&last_sync_key(client_id))
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(DEFAULT_LAST_SYNC)
            .to_string()
    }

    async fn load_or_create(root: &Path, client_id: &str) -> MetadataResult<Self> {
        let dir = root.join(client_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| MetadataError::CreateDir {
                path: dir.clone(),
                source,
            })?;

        let file = dir.join(FILE_NAME);
        match tokio::fs::read(&file).await {
            Ok(bytes) => {
                // Java writes ISO-8859-1; anything that is not UTF-8 is read as Latin-1
                let text = String::from_utf8(bytes)
                    .unwrap_or_else(|e| e.into_bytes().into_iter().map(char::from).collect());
                let props = Properties::parse(&text);
                Ok(Self { dir, props })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut props = Properties::new();
                props.set(last_sync_key(client_id), DEFAULT_LAST_SYNC);
                persist(&dir, &props).await?;
                Ok(Self { dir, props })
            }
            Err(source) => Err(MetadataError::Read { path: file, source }),
        }
    }
}

/// Write the record next to its final name, fsync, then rename over it.
/// Readers see either the old or the new file, never a partial one.
async fn persist(dir: &Path, props: &Properties) -> MetadataResult<()> {
    let tmp = dir.join(TEMP_FILE_NAME);
    let file = dir.join(FILE_NAME);
    let wrap = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| MetadataError::Persist { path, source }
    };

    let mut f = tokio::fs::File::create(&tmp).await.map_err(wrap(&tmp))?;
    f.write_all(props.to_text().as_bytes())
        .await
        .map_err(wrap(&tmp))?;
    f.sync_all().await.map_err(wrap(&tmp))?;
    drop(f);
    tokio::fs::rename(&tmp, &file).await.map_err(wrap(&file))?;
    Ok(())
}

type Slot = Arc<tokio::sync::Mutex<Option<ClientRecord>>>;

/// Shared store of client records rooted at the storage directory.
///
/// Client ids must already be validated as plain directory names.
pub struct MetadataStore {
    root: PathBuf,
    clients: Mutex<HashMap<String, Slot>>,
}

impl MetadataStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of clients referenced since startup
    pub fn cached_clients(&self) -> usize {
        self.clients.lock().len()
    }

    fn slot(&self, client_id: &str) -> Slot {
        let mut clients = self.clients.lock();
        clients
            .entry(client_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(None)))
            .clone()
    }

    async fn loaded<'a>(
        &self,
        guard: &'a mut Option<ClientRecord>,
        client_id: &str,
    ) -> MetadataResult<&'a mut ClientRecord> {
        let record = match guard.take() {
            Some(r) => r,
            None => ClientRecord::load_or_create(&self.root, client_id).await?,
        };
        Ok(guard.insert(record))
    }

    /// Stored timestamp, or the epoch default for a client never seen
    /// before. Creates the client's directory and record on first use.
    pub async fn last_sync(&self, client_id: &str) -> MetadataResult<String> {
        let slot = self.slot(client_id);
        let mut guard = slot.lock().await;
        let record = self.loaded(&mut guard, client_id).await?;
        Ok(record.last_sync(client_id))
    }

    /// Set the timestamp to the current local time and persist it before
    /// returning. The cached value only changes if the write succeeded.
    pub async fn set_last_sync(&self, client_id: &str) -> MetadataResult<String> {
        let slot = self.slot(client_id);
        let mut guard = slot.lock().await;
        let record = self.loaded(&mut guard, client_id).await?;

        let now = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let mut props = record.props.clone();
        props.set(last_sync_key(client_id), now.clone());
        persist(&record.dir, &props).await?;
        record.props = props;
        Ok(now)
    }

    /// The client's storage directory (created on first use).
    pub async fn directory(&self, client_id: &str) -> MetadataResult<PathBuf> {
        let slot = self.slot(client_id);
        let mut guard = slot.lock().await;
        let record = self.loaded(&mut guard, client_id).await?;
        Ok(record.dir.clone())
    }

    pub async fn get(&self, client_id: &str) -> MetadataResult<ClientMetadata> {
        let slot = self.slot(client_id);
        let mut guard = slot.lock().await;
        let record = self.loaded(&mut guard, client_id).await?;
        Ok(ClientMetadata {
            client_id: client_id.to_string(),
            last_sync: record.last_sync(client_id),
            directory: record.dir.clone(),
        })
    }

    /// Path of the record file for a client
    pub fn record_path(&self, client_id: &str) -> PathBuf {
        self.root.join(client_id).join(FILE_NAME)
    }
}
