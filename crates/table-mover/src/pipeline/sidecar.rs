//! Sidecar storage for LOB values next to a CSV file.
//!
//! For `out/T1.csv` the payloads live in `out/T1/<uuid>.bin` and the CSV
//! field carries the UUID.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::error::{MoverError, Result};

#[derive(Debug)]
pub struct Sidecar {
    dir: PathBuf,
    created: OnceCell<()>,
}

impl Sidecar {
    /// Sidecar store for `csv_path`: the CSV's parent joined with its stem.
    pub fn for_csv(csv_path: &Path) -> Self {
        let parent = csv_path.parent().unwrap_or_else(|| Path::new(""));
        let stem = csv_path.file_stem().unwrap_or_default();
        Self {
            dir: parent.join(stem),
            created: OnceCell::new(),
        }
    }

    /// Store one payload under a fresh UUID.
    ///
    /// The directory is created on the first write and shared by every page
    /// of the table after that.
    pub async fn write(&self, payload: &[u8]) -> Result<Uuid> {
        self.created
            .get_or_try_init(|| async {
                tokio::fs::create_dir_all(&self.dir).await?;
                Ok::<_, MoverError>(())
            })
            .await?;

        let id = Uuid::new_v4();
        tokio::fs::write(self.path_for(&id), payload).await?;
        Ok(id)
    }

    /// Load the payload a CSV token refers to.
    ///
    /// Tokens must be UUIDs, so a CSV field can never point outside the
    /// sidecar directory.
    pub async fn read(&self, token: &str) -> Result<Bytes> {
        let id = Uuid::parse_str(token.trim()).map_err(|e| {
            MoverError::codec(
                self.dir.display().to_string(),
                token,
                format!("invalid sidecar reference: {}", e),
            )
        })?;
        let payload = tokio::fs::read(self.path_for(&id)).await?;
        Ok(Bytes::from(payload))
    }

    fn path_for(&self, id: &Uuid) -> PathBuf {
        self.dir.join(format!("{}.bin", id))
    }
}
