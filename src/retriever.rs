//! Recuperación de los chunks más relevantes por similitud coseno.

use std::cmp::Ordering;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::debug;

use crate::embedder::{Embedder, EmbeddingCache};
use crate::error::{RagError, Result};
use crate::models::{Chunk, EmbeddingVector, RetrievalResult};

pub const DEFAULT_TOP_K: usize = 3;
pub const DEFAULT_EMBED_CONCURRENCY: usize = 8;

/// Similitud coseno entre dos vectores, en `[-1, 1]`.
///
/// Devuelve 0.0 si algún vector tiene norma cero o si las dimensiones no
/// coinciden; nunca NaN.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let score = dot / (norm_a * norm_b);
    if score.is_nan() {
        0.0
    } else {
        score.clamp(-1.0, 1.0)
    }
}

/// Ordena por puntuación descendente; en empate gana el chunk de menor índice.
pub fn rank(mut results: Vec<RetrievalResult>, top_k: usize) -> Vec<RetrievalResult> {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.chunk.index.cmp(&b.chunk.index))
    });
    results.truncate(top_k);
    results
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    cache: Option<Arc<EmbeddingCache>>,
    concurrency: usize,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            cache: None,
            concurrency: DEFAULT_EMBED_CONCURRENCY,
        }
    }

    pub fn with_cache(mut self, cache: Arc<EmbeddingCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Número máximo de embeddings de chunks en vuelo a la vez.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Devuelve los `top_k` chunks más parecidos a la consulta, de mayor a menor
    /// similitud. Si hay menos chunks que `top_k`, los devuelve todos.
    pub async fn find_relevant_chunks(
        &self,
        query: &str,
        chunks: &[Chunk],
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>> {
        if top_k == 0 {
            return Err(RagError::Retrieval("top_k debe ser al menos 1".to_string()));
        }
        if chunks.is_empty() {
            return Err(RagError::Retrieval(
                "no hay chunks sobre los que buscar".to_string(),
            ));
        }

        let query_vector = self.embedder.embed(query).await?;
        if query_vector.is_empty() {
            return Err(RagError::embedding(
                self.embedder.provider(),
                "la consulta produjo un embedding vacío",
            ));
        }
        let chunk_vectors = self.embed_chunks(chunks).await?;

        // Con dimensiones distintas la similitud no significa nada: se falla.
        for (chunk, vector) in chunks.iter().zip(&chunk_vectors) {
            if vector.len() != query_vector.len() {
                return Err(RagError::embedding(
                    self.embedder.provider(),
                    format!(
                        "el chunk {} tiene {} dimensiones y la consulta {}",
                        chunk.index,
                        vector.len(),
                        query_vector.len()
                    ),
                ));
            }
        }

        let scored = chunks
            .iter()
            .zip(&chunk_vectors)
            .map(|(chunk, vector)| RetrievalResult {
                chunk: chunk.clone(),
                score: cosine_similarity(query_vector.as_slice(), vector.as_slice()),
            })
            .collect();

        let ranked = rank(scored, top_k);
        debug!(
            candidates = chunks.len(),
            returned = ranked.len(),
            best = ranked.first().map(|r| r.score),
            "Chunks relevantes seleccionados"
        );
        Ok(ranked)
    }

    /// Calcula los embeddings de los chunks en paralelo (acotado) y los devuelve
    /// en el mismo orden que `chunks`, sea cual sea el orden de finalización.
    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<EmbeddingVector>> {
        // Cada future es dueño de sus datos para poder ejecutarse en un handler o en `tokio::spawn`.
        let jobs: Vec<BoxFuture<'static, Result<(usize, EmbeddingVector)>>> = chunks
            .iter()
            .enumerate()
            .map(|(position, chunk)| {
                let embedder = self.embedder.clone();
                let cache = self.cache.clone();
                let document_id = chunk.document_id.clone();
                let index = chunk.index;
                let text = chunk.text.clone();
                async move {
                    let vector = match cache {
                        Some(cache) => {
                            cache
                                .get_or_embed(embedder.as_ref(), &document_id, index, &text)
                                .await?
                        }
                        None => embedder.embed(&text).await?,
                    };
                    Ok((position, vector))
                }
                .boxed()
            })
            .collect();

        let mut indexed: Vec<(usize, EmbeddingVector)> = stream::iter(jobs)
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;

        indexed.sort_by_key(|(position, _)| *position);
        Ok(indexed.into_iter().map(|(_, vector)| vector).collect())
    }
}
