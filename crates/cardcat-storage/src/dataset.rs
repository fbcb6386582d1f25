use std::path::{Path, PathBuf};

use anyhow::Context;
use cardcat_core::CanonicalCard;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const BACKUP_FILE_PREFIX: &str = "cards_backup_";

#[derive(Debug, Clone, Serialize)]
pub struct PersistOutcome {
    pub dataset_path: PathBuf,
    pub backup_path: Option<PathBuf>,
    pub card_count: usize,
    pub byte_size: usize,
    pub sha256: String,
}

/// Canonical dataset location plus the directory prior versions are archived to.
#[derive(Debug, Clone)]
pub struct DatasetStore {
    dataset_path: PathBuf,
    backup_dir: PathBuf,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

impl DatasetStore {
    pub fn new(dataset_path: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            dataset_path: dataset_path.into(),
            backup_dir: backup_dir.into(),
        }
    }

    pub fn dataset_path(&self) -> &Path {
        &self.dataset_path
    }

    /// `cards_backup_2026-10-19T08-30-00-123Z.json`; sorts lexicographically by time.
    pub fn backup_file_name(at: DateTime<Utc>) -> String {
        Self::backup_file_name_with_suffix(at, 0)
    }

    /// Later backups within the same millisecond get `_1`, `_2`, ... which
    /// still sort after the unsuffixed name.
    fn backup_file_name_with_suffix(at: DateTime<Utc>, suffix: u32) -> String {
        let stamp = at.format("%Y-%m-%dT%H-%M-%S-%3fZ");
        match suffix {
            0 => format!("{BACKUP_FILE_PREFIX}{stamp}.json"),
            n => format!("{BACKUP_FILE_PREFIX}{stamp}_{n}.json"),
        }
    }

    pub async fn load(&self) -> anyhow::Result<Vec<CanonicalCard>> {
        let bytes = fs::read(&self.dataset_path)
            .await
            .with_context(|| format!("reading dataset {}", self.dataset_path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing dataset {}", self.dataset_path.display()))
    }

    /// Existing backups, oldest first.
    pub async fn list_backups(&self) -> anyhow::Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        let mut entries = match fs::read_dir(&self.backup_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("listing backups in {}", self.backup_dir.display()))
            }
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("listing backups in {}", self.backup_dir.display()))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(BACKUP_FILE_PREFIX) && name.ends_with(".json") {
                out.push(entry.path());
            }
        }
        out.sort();
        Ok(out)
    }

    pub async fn persist(&self, cards: &[CanonicalCard]) -> anyhow::Result<PersistOutcome> {
        self.persist_at(cards, Utc::now()).await
    }

    /// Archive the current dataset (if any) and replace it with `cards`.
    ///
    /// An unreadable or corrupt prior dataset is skipped with a warning. Any
    /// failure writing the backup or the new dataset is returned, and the
    /// prior dataset is left in place.
    pub async fn persist_at(
        &self,
        cards: &[CanonicalCard],
        now: DateTime<Utc>,
    ) -> anyhow::Result<PersistOutcome> {
        let mut bytes = serde_json::to_vec_pretty(cards).context("serializing card dataset")?;
        bytes.push(b'\n');

        let backup_path = match self.read_prior_dataset().await {
            Some(prior) => {
                let path = self.archive(&prior, now).await.context("writing dataset backup")?;
                info!(backup = %path.display(), "archived prior dataset");
                Some(path)
            }
            None => None,
        };

        write_atomic(&self.dataset_path, &bytes)
            .await
            .context("writing card dataset")?;
        info!(
            dataset = %self.dataset_path.display(),
            cards = cards.len(),
            "wrote card dataset"
        );

        Ok(PersistOutcome {
            dataset_path: self.dataset_path.clone(),
            backup_path,
            card_count: cards.len(),
            byte_size: bytes.len(),
            sha256: sha256_hex(&bytes),
        })
    }

    /// Write `prior` under the first backup name not already taken.
    async fn archive(&self, prior: &[u8], now: DateTime<Utc>) -> anyhow::Result<PathBuf> {
        let mut suffix = 0;
        loop {
            let path = self
                .backup_dir
                .join(Self::backup_file_name_with_suffix(now, suffix));
            if write_new(&path, prior).await? {
                return Ok(path);
            }
            debug!(backup = %path.display(), "backup name taken; trying next suffix");
            suffix += 1;
        }
    }

    async fn read_prior_dataset(&self) -> Option<Vec<u8>> {
        let bytes = match fs::read(&self.dataset_path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(
                    dataset = %self.dataset_path.display(),
                    error = %err,
                    "could not read existing dataset; skipping backup"
                );
                return None;
            }
        };
        match serde_json::from_slice::<Vec<JsonValue>>(&bytes) {
            Ok(entries) if entries.is_empty() => {
                debug!(dataset = %self.dataset_path.display(), "existing dataset is empty; skipping backup");
                None
            }
            Ok(_) => Some(bytes),
            Err(err) => {
                warn!(
                    dataset = %self.dataset_path.display(),
                    error = %err,
                    "existing dataset is not a JSON array; skipping backup"
                );
                None
            }
        }
    }
}

/// Write `bytes` to a uniquely named sibling temp file of `path`.
async fn write_temp(path: &Path, bytes: &[u8]) -> anyhow::Result<PathBuf> {
    let parent = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&parent)
        .await
        .with_context(|| format!("creating directory {}", parent.display()))?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp file {}", temp_path.display()))?;
    let written = async {
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await
    }
    .await;
    drop(file);
    if let Err(err) = written {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| format!("writing temp file {}", temp_path.display()));
    }
    Ok(temp_path)
}

/// Write through a temp file, then rename over `path`.
async fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let temp_path = write_temp(path, bytes).await?;
    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| {
            format!("renaming {} -> {}", temp_path.display(), path.display())
        });
    }
    Ok(())
}

/// Write through a temp file, then link it in at `path` only if nothing is
/// there yet. `Ok(false)` when `path` already exists; it is left untouched.
async fn write_new(path: &Path, bytes: &[u8]) -> anyhow::Result<bool> {
    let temp_path = write_temp(path, bytes).await?;
    let linked = fs::hard_link(&temp_path, path).await;
    let _ = fs::remove_file(&temp_path).await;
    match linked {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(err).with_context(|| {
            format!("linking {} -> {}", temp_path.display(), path.display())
        }),
    }
}
