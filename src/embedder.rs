//! Abstracción sobre el backend de embeddings y caché por documento.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::OnceCell;

use crate::error::Result;
use crate::models::EmbeddingVector;

/// Genera embeddings a partir de texto.
///
/// Las implementaciones no deben mutar estado compartido entre llamadas: la
/// misma instancia se reutiliza para todas las consultas. Un fallo del backend
/// se propaga siempre como error, nunca como un vector a ceros.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Nombre del proveedor, para trazas y mensajes de error.
    fn provider(&self) -> &str;

    /// Dimensión de los vectores que produce el modelo configurado.
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<EmbeddingVector>;

    /// Por defecto llama a [`embed`](Embedder::embed) en secuencia.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<EmbeddingVector>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Huella del texto para detectar que un documento o chunk ha cambiado.
pub fn text_fingerprint(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

type CacheKey = (String, usize, u64);

/// Caché de embeddings de chunks, indexada por `(document_id, chunk_index)` y
/// la huella del texto del chunk: un chunk reescrito nunca reutiliza el
/// embedding de su versión anterior.
///
/// Cada clave tiene su propia celda `OnceCell`, así que consultas concurrentes
/// sobre el mismo chunk esperan al mismo cálculo en vez de repetirlo. El
/// `Mutex` sólo protege el mapa de celdas y nunca se mantiene durante un `await`.
#[derive(Debug, Default)]
pub struct EmbeddingCache {
    cells: Mutex<HashMap<CacheKey, Arc<OnceCell<EmbeddingVector>>>>,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(
        &self,
        document_id: &str,
        chunk_index: usize,
        text: &str,
    ) -> Arc<OnceCell<EmbeddingVector>> {
        let key = (document_id.to_string(), chunk_index, text_fingerprint(text));
        let mut cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        cells
            .entry(key)
            .or_default()
            .clone()
    }

    /// Devuelve el embedding cacheado o lo calcula con `embedder` una sola vez.
    ///
    /// Si el cálculo falla (o se cancela) la celda queda vacía y el siguiente
    /// intento vuelve a calcularlo.
    pub async fn get_or_embed(
        &self,
        embedder: &dyn Embedder,
        document_id: &str,
        chunk_index: usize,
        text: &str,
    ) -> Result<EmbeddingVector> {
        let cell = self.cell(document_id, chunk_index, text);
        let vector = cell.get_or_try_init(|| embedder.embed(text)).await?;
        Ok(vector.clone())
    }

    /// Olvida todos los embeddings de un documento.
    pub fn forget_document(&self, document_id: &str) {
        let mut cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        cells.retain(|(doc, _, _), _| doc != document_id);
    }

    pub fn len(&self) -> usize {
        let cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        cells.values().filter(|cell| cell.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
