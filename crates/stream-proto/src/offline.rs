//! Offline catalog: programs saved locally, persisted as one JSON document
//! (`offline.json`) per storage directory.
//!
//! Every mutation is load → mutate → rewrite-whole-file under the store's
//! mutex. The rewrite goes to a sibling temp file which is fsynced and then
//! renamed over the document, so a failed write leaves the previous document
//! in place.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{CatalogError, Result};
use crate::program::{OfflineEntry, Program};

pub const OFFLINE_DOCUMENT_NAME: &str = "offline.json";

/// On-disk record. Kept separate from `OfflineEntry` so the document schema
/// can stay stable while the wire types evolve.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OfflineRecord {
    title: String,
    shorttitle: String,
    id: i64,
    time: String,
    url: String,
    info: String,
    filename: String,
    daylabel: String,
}

impl From<&OfflineEntry> for OfflineRecord {
    fn from(entry: &OfflineEntry) -> Self {
        let p = &entry.program;
        Self {
            title: p.title.clone(),
            shorttitle: p.short_title.clone(),
            id: p.id,
            time: p.time.clone(),
            url: p.url.clone(),
            info: p.info.clone(),
            filename: entry.filename.clone(),
            daylabel: p.day_label.clone(),
        }
    }
}

impl From<OfflineRecord> for OfflineEntry {
    fn from(r: OfflineRecord) -> Self {
        Self {
            program: Program {
                id: r.id,
                time: r.time,
                title: r.title,
                short_title: r.shorttitle,
                info: r.info,
                url: r.url,
                day_label: r.daylabel,
            },
            filename: r.filename,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OfflineDocument {
    programs: Vec<OfflineRecord>,
}

pub struct OfflineStore {
    dir: PathBuf,
    /// Single-writer token around every read-modify-write cycle.
    lock: Mutex<()>,
}

impl OfflineStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(OFFLINE_DOCUMENT_NAME)
    }

    /// Saved entries whose recording still exists, in document order.
    ///
    /// Entries with a missing file are skipped but stay in the document.
    pub async fn list(&self) -> Result<Vec<OfflineEntry>> {
        let _guard = self.lock.lock().await;
        let Some(doc) = self.load().await? else {
            return Ok(Vec::new());
        };

        let mut entries = Vec::with_capacity(doc.programs.len());
        for record in doc.programs {
            if tokio::fs::try_exists(&record.filename).await.unwrap_or(false) {
                entries.push(OfflineEntry::from(record));
            } else {
                debug!("offline: skipping {} (file missing)", record.filename);
            }
        }
        Ok(entries)
    }

    /// Whether a record with this key exists, regardless of its file.
    pub async fn contains(&self, id: i64, day_label: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        Ok(self
            .load()
            .await?
            .map(|doc| doc.programs.iter().any(|r| r.id == id && r.daylabel == day_label))
            .unwrap_or(false))
    }

    /// Append `program` to the document, creating it if absent.
    pub async fn add(&self, program: &Program) -> Result<OfflineEntry> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load().await?.unwrap_or_default();

        let entry = OfflineEntry::from_program(program);
        doc.programs.push(OfflineRecord::from(&entry));
        self.persist(&doc).await?;

        info!(
            "offline: added {} ({}, {}) -> {}",
            program.title, program.id, program.day_label, entry.filename
        );
        Ok(entry)
    }

    /// Remove the first record matching `(id, day_label)` and delete its
    /// recording. Returns the removed entry, `None` when nothing matched or
    /// the document does not exist.
    pub async fn remove(&self, id: i64, day_label: &str) -> Result<Option<OfflineEntry>> {
        let _guard = self.lock.lock().await;
        let Some(mut doc) = self.load().await? else {
            debug!("offline: remove ({}, {}) on absent document", id, day_label);
            return Ok(None);
        };

        let Some(idx) = doc
            .programs
            .iter()
            .position(|r| r.id == id && r.daylabel == day_label)
        else {
            debug!("offline: no record for ({}, {})", id, day_label);
            return Ok(None);
        };

        // The recording only goes once the document no longer references it.
        let record = doc.programs.remove(idx);
        self.persist(&doc).await?;

        if !record.filename.is_empty() {
            match tokio::fs::remove_file(&record.filename).await {
                Ok(()) => info!("offline: removed file {}", record.filename),
                Err(e) => warn!("offline: could not delete {}: {}", record.filename, e),
            }
        }
        Ok(Some(OfflineEntry::from(record)))
    }

    /// `None` when the document does not exist yet.
    async fn load(&self) -> Result<Option<OfflineDocument>> {
        let path = self.path();
        let content = match tokio::fs::read(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        // Decoding bytes keeps invalid UTF-8 a parse failure, not an I/O one.
        let doc = serde_json::from_slice::<OfflineDocument>(&content).map_err(|e| {
            CatalogError::Parse(format!("{}: {}", path.display(), e))
        })?;
        Ok(Some(doc))
    }

    async fn persist(&self, doc: &OfflineDocument) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path();
        let tmp = tmp_path(&path);
        let json = serde_json::to_vec_pretty(doc)?;

        if let Err(e) = write_synced(&tmp, &json).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!("offline: wrote {} records to {}", doc.programs.len(), path.display());
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_field_names() {
        let entry = OfflineEntry::from_program(&Program {
            id: 3,
            short_title: "S".into(),
            url: "/a.mp3".into(),
            day_label: "Mon".into(),
            ..Program::default()
        });
        let json = serde_json::to_value(OfflineRecord::from(&entry)).unwrap();
        for key in ["title", "shorttitle", "id", "time", "url", "info", "filename", "daylabel"] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(json["filename"], "/a.mp3");
        assert_eq!(json["shorttitle"], "S");
    }

    #[test]
    fn test_tmp_path_is_sibling() {
        let p = PathBuf::from("/x/y/offline.json");
        assert_eq!(tmp_path(&p), PathBuf::from("/x/y/offline.json.tmp"));
    }
}
