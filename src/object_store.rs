//! Almacén de objetos para los bytes de los PDFs subidos.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mime_guess::MimeGuess;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

/// Resultado de subir un objeto.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredObject {
    pub id: String,
    pub url: String,
    pub content_length: u64,
    pub format: String,
    pub mime_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, filename: &str, bytes: Vec<u8>) -> Result<StoredObject>;

    /// `None` si el objeto no existe.
    async fn fetch(&self, id: &str) -> Result<Option<Vec<u8>>>;

    async fn delete(&self, id: &str) -> Result<DeleteOutcome>;
}

/// Guarda cada objeto como un fichero bajo `root`, con nombre `<uuid>.<extensión>`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    base_url: String,
}

impl LocalObjectStore {
    /// `base_url` es la URL pública del servidor; los objetos se sirven en `<base_url>/files/<id>`.
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        let valid = !id.is_empty()
            && !id.starts_with('.')
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
        if !valid {
            return Err(anyhow!("Identificador de objeto inválido: {id}"));
        }
        Ok(self.root.join(id))
    }
}

fn format_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(std::ffi::OsStr::to_str)
        .map(|ext| ext.to_lowercase())
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "bin".to_string())
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn upload(&self, filename: &str, bytes: Vec<u8>) -> Result<StoredObject> {
        tokio::fs::create_dir_all(&self.root).await?;

        let format = format_of(filename);
        let id = format!("{}.{format}", Uuid::new_v4());
        let path = self.path_for(&id)?;
        let content_length = bytes.len() as u64;
        tokio::fs::write(&path, bytes).await?;

        let mime: MimeGuess = MimeGuess::from_path(filename);
        let stored = StoredObject {
            url: format!("{}/files/{id}", self.base_url),
            id,
            content_length,
            format,
            mime_type: mime.first().map(|m| m.to_string()),
            created_at: Utc::now(),
        };
        info!("Objeto guardado: {} ({} bytes)", path.display(), content_length);
        Ok(stored)
    }

    async fn fetch(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, id: &str) -> Result<DeleteOutcome> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(DeleteOutcome::Deleted),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Objeto {id} ya no existía");
                Ok(DeleteOutcome::NotFound)
            }
            Err(e) => Err(e.into()),
        }
    }
}
