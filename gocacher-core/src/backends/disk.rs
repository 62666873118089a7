//! Disk-backed local cache.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::{LocalCache, OutputEntry};

const INDEX_VERSION: u32 = 1;
const MIN_ID_LEN: usize = 4;

/// Index record stored for each action.
#[derive(Debug, Serialize, Deserialize)]
struct IndexEntry {
    #[serde(rename = "v")]
    version: u32,
    #[serde(rename = "o")]
    output_id: String,
    #[serde(rename = "n")]
    size: u64,
    #[serde(rename = "t")]
    time_nanos: u64,
}

/// Local cache storing action indexes and output bodies under one directory.
///
/// Files are sharded by the first two characters of their id:
/// `{dir}/ab/a-abcd...` for actions and `{dir}/ef/o-ef01...` for outputs.
#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
    verbose: bool,
}

impl DiskCache {
    /// Creates a disk cache rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(dir: impl AsRef<Path>, verbose: bool) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;
        Ok(Self { dir, verbose })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn action_path(&self, action_id: &str) -> PathBuf {
        self.dir
            .join(&action_id[..2])
            .join(format!("a-{}", action_id))
    }

    fn output_path(&self, output_id: &str) -> PathBuf {
        self.dir
            .join(&output_id[..2])
            .join(format!("o-{}", output_id))
    }

    /// Writes `data` to `path` through a uniquely named temp file and rename.
    async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(Error::Io)?;
        }

        let temp_path = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        fs::write(&temp_path, data).await.map_err(Error::Io)?;

        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(Error::Io(e));
        }
        Ok(())
    }
}

/// Ids are hex-encoded hashes: at least [`MIN_ID_LEN`] digits, whole bytes.
pub(super) fn validate_id(kind: &'static str, id: &str) -> Result<()> {
    if id.len() < MIN_ID_LEN {
        return Err(Error::InvalidId {
            kind,
            id: id.to_string(),
            message: format!("must be at least {} characters", MIN_ID_LEN),
        });
    }
    if !id.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::InvalidId {
            kind,
            id: id.to_string(),
            message: "must be hex".to_string(),
        });
    }
    if id.len() % 2 != 0 {
        return Err(Error::InvalidId {
            kind,
            id: id.to_string(),
            message: "must have an even number of hex digits".to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl LocalCache for DiskCache {
    async fn get(&self, action_id: &str) -> Result<Option<OutputEntry>> {
        validate_id("action id", action_id)?;

        let index = match fs::read(self.action_path(action_id)).await {
            Ok(index) => index,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if self.verbose {
                    debug!(action_id, "disk miss");
                }
                return Ok(None);
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let entry: IndexEntry = match serde_json::from_slice(&index) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(action_id, error = %e, "ignoring corrupt index entry");
                return Ok(None);
            }
        };
        if validate_id("output id", &entry.output_id).is_err() {
            warn!(action_id, output_id = %entry.output_id, "ignoring index entry with bad output id");
            return Ok(None);
        }

        let disk_path = self.output_path(&entry.output_id);
        if fs::metadata(&disk_path).await.is_err() {
            debug!(action_id, path = %disk_path.display(), "index points at missing output");
            return Ok(None);
        }

        Ok(Some(OutputEntry {
            output_id: entry.output_id,
            disk_path,
        }))
    }

    async fn put(&self, action_id: &str, output_id: &str, body: Bytes) -> Result<PathBuf> {
        validate_id("action id", action_id)?;
        validate_id("output id", output_id)?;

        let disk_path = self.output_path(output_id);
        if body.is_empty() {
            if let Some(parent) = disk_path.parent() {
                fs::create_dir_all(parent).await.map_err(Error::Io)?;
            }
            fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&disk_path)
                .await
                .map_err(Error::Io)?;
        } else {
            Self::write_atomic(&disk_path, &body).await?;
        }

        let time_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        let index = serde_json::to_vec(&IndexEntry {
            version: INDEX_VERSION,
            output_id: output_id.to_string(),
            size: body.len() as u64,
            time_nanos,
        })?;
        Self::write_atomic(&self.action_path(action_id), &index).await?;

        if self.verbose {
            debug!(action_id, output_id, size = body.len(), "disk put");
        }
        Ok(disk_path)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
