use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

const MAX_NAME_LEN: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("Upload exceeds the {limit} byte limit")]
    TooLarge { limit: usize },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An upload persisted under the staging directory. The file is deleted
/// exactly once: by `remove`, or on drop if `remove` was never reached.
#[derive(Debug)]
pub struct StagedFile {
    path: Option<PathBuf>,
    len: usize,
}

/// Streams an upload into a fresh staged file while enforcing a size limit.
/// Dropping the writer before `finish` deletes the partial file.
pub struct StagingWriter {
    file: File,
    staged: StagedFile,
    limit: usize,
}

impl StagedFile {
    pub async fn create(
        dir: &Path,
        original_name: &str,
        limit: usize,
    ) -> Result<StagingWriter, StagingError> {
        let path = dir.join(staged_name(original_name));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        log::debug!("Staging upload at {}", path.display());

        Ok(StagingWriter {
            file,
            staged: StagedFile {
                path: Some(path),
                len: 0,
            },
            limit,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        match &self.path {
            Some(path) => fs::read(path).await,
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "staged file already removed",
            )),
        }
    }

    pub async fn remove(mut self) -> std::io::Result<()> {
        match self.path.take() {
            Some(path) => {
                log::debug!("Removing staged upload {}", path.display());
                fs::remove_file(&path).await
            }
            None => Ok(()),
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            match std::fs::remove_file(&path) {
                Ok(()) => log::debug!("Removed staged upload {} on drop", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::error!("Failed to remove staged upload {}: {}", path.display(), e),
            }
        }
    }
}

impl StagingWriter {
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), StagingError> {
        if self.staged.len + chunk.len() > self.limit {
            return Err(StagingError::TooLarge { limit: self.limit });
        }
        self.file.write_all(chunk).await?;
        self.staged.len += chunk.len();
        Ok(())
    }

    pub async fn finish(mut self) -> Result<StagedFile, StagingError> {
        self.file.flush().await?;
        let StagingWriter { file, staged, .. } = self;
        drop(file);
        Ok(staged)
    }
}

/// Collision-free staged file name: a process-wide sequence number and a
/// random UUID, followed by a sanitized form of the client's file name.
pub fn staged_name(original_name: &str) -> String {
    let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!(
        "{:06}-{}-{}",
        sequence,
        Uuid::new_v4().simple(),
        sanitize_file_name(original_name)
    )
}

fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_NAME_LEN)
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}
