//! Orquestador del pipeline documento → respuesta.
//!
//! Flujo por consulta:
//!   1. Extracción del texto del PDF (si se parte de bytes).
//!   2. Troceado en ventanas de palabras (cacheado por documento).
//!   3. Recuperación de los `top_k` chunks más parecidos a la pregunta.
//!   4. Generación con el LLM a partir de esos chunks.
//!   5. Formateo de la respuesta y sus visualizaciones.
//!
//! Todo o nada: ante cualquier fallo se devuelve un [`RagError`] que indica la
//! etapa, nunca una respuesta a medias.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use tracing::{debug, info, warn};

use crate::chunker::WordChunker;
use crate::embedder::{text_fingerprint, Embedder, EmbeddingCache};
use crate::error::{RagError, Result, Stage};
use crate::extract;
use crate::formatter::ResponseFormatter;
use crate::generator::{AnswerGenerator, LanguageModel};
use crate::models::{AnswerPayload, Chunk, Document};
use crate::retriever::{Retriever, DEFAULT_EMBED_CONCURRENCY, DEFAULT_TOP_K};

/// Documentos que se mantienen en caché por defecto.
pub const DEFAULT_DOCUMENT_CACHE_CAPACITY: usize = 32;

struct CachedChunks {
    fingerprint: u64,
    chunks: Arc<[Chunk]>,
}

/// Texto extraído y chunks de un documento. Se expulsan juntos, y con ellos
/// sus embeddings cacheados.
#[derive(Default)]
struct CachedDocument {
    document: Option<Arc<Document>>,
    chunks: Option<CachedChunks>,
}

pub struct RagPipeline {
    chunker: WordChunker,
    retriever: Retriever,
    generator: AnswerGenerator,
    formatter: ResponseFormatter,
    default_top_k: usize,
    documents: Mutex<LruCache<String, CachedDocument>>,
    embedding_cache: Option<Arc<EmbeddingCache>>,
}

impl RagPipeline {
    pub fn builder() -> RagPipelineBuilder {
        RagPipelineBuilder::default()
    }

    pub fn default_top_k(&self) -> usize {
        self.default_top_k
    }

    pub fn chunker(&self) -> &WordChunker {
        &self.chunker
    }

    /// Extrae el texto de un PDF en el pool de hilos bloqueantes.
    pub async fn load_document(&self, document_id: &str, pdf_bytes: Vec<u8>) -> Result<Document> {
        let id = document_id.to_string();
        tokio::task::spawn_blocking(move || extract::extract_document(&id, &pdf_bytes))
            .await
            .map_err(|e| RagError::Extraction(format!("la tarea de extracción terminó mal: {e}")))?
    }

    /// Extrae y trocea un PDF con los parámetros indicados.
    pub async fn extract_and_chunk(
        &self,
        document_id: &str,
        pdf_bytes: Vec<u8>,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Result<Vec<Chunk>> {
        let chunker = WordChunker::new(chunk_size, chunk_overlap)?;
        let document = self.load_document(document_id, pdf_bytes).await?;
        let chunks = chunker.chunk(&document);
        info!(
            document.id = document_id,
            pages = document.pages.len(),
            chunks = chunks.len(),
            "PDF extraído y troceado"
        );
        Ok(chunks)
    }

    /// Responde a una pregunta sobre un documento ya extraído.
    pub async fn process_query(
        &self,
        document: &Document,
        query: &str,
        top_k: usize,
    ) -> Result<AnswerPayload> {
        debug!(document.id = %document.id, stage = %Stage::Received, "Consulta recibida");
        debug!(document.id = %document.id, stage = %Stage::Extracted, chars = document.text.len());

        self.run(document, query, top_k).await.inspect_err(|err| {
            warn!(
                document.id = %document.id,
                stage = %err.stage(),
                error = %err,
                "La consulta falló"
            );
        })
    }

    /// Pipeline completo desde los bytes del PDF.
    pub async fn process_pdf_query(
        &self,
        document_id: &str,
        pdf_bytes: Vec<u8>,
        query: &str,
        top_k: usize,
    ) -> Result<AnswerPayload> {
        let document = self.load_document(document_id, pdf_bytes).await.inspect_err(|err| {
            warn!(document.id = document_id, stage = %err.stage(), error = %err, "La consulta falló");
        })?;
        self.process_query(&document, query, top_k).await
    }

    async fn run(&self, document: &Document, query: &str, top_k: usize) -> Result<AnswerPayload> {
        let chunks = self.chunks_for(document);
        debug!(document.id = %document.id, stage = %Stage::Chunked, chunks = chunks.len());

        let relevant = self
            .retriever
            .find_relevant_chunks(query, &chunks, top_k)
            .await?;
        debug!(document.id = %document.id, stage = %Stage::Retrieved, results = relevant.len());

        let context: Vec<&str> = relevant.iter().map(|r| r.chunk.text.as_str()).collect();
        let raw = self.generator.generate(query, &context).await?;
        debug!(document.id = %document.id, stage = %Stage::Generated, chars = raw.len());

        let payload = self.formatter.format(&raw, &relevant);
        debug!(
            document.id = %document.id,
            stage = %Stage::Formatted,
            visualizations = payload.visualizations.len()
        );

        info!(
            document.id = %document.id,
            stage = %Stage::Done,
            sources = payload.sources.len(),
            "Consulta respondida"
        );
        Ok(payload)
    }

    /// Chunks del documento, reutilizando los de una consulta anterior si el
    /// texto no ha cambiado.
    fn chunks_for(&self, document: &Document) -> Arc<[Chunk]> {
        let print = text_fingerprint(&document.text);
        let mut cache = self.documents.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(entry) = cache.get_mut(&document.id) {
            match &entry.chunks {
                Some(cached) if cached.fingerprint == print => return cached.chunks.clone(),
                Some(_) => {
                    // Mismo id con otro texto: los embeddings anteriores ya no sirven.
                    if let Some(embeddings) = &self.embedding_cache {
                        embeddings.forget_document(&document.id);
                    }
                }
                None => {}
            }
            let chunks: Arc<[Chunk]> = self.chunker.chunk(document).into();
            entry.chunks = Some(CachedChunks {
                fingerprint: print,
                chunks: chunks.clone(),
            });
            return chunks;
        }

        let chunks: Arc<[Chunk]> = self.chunker.chunk(document).into();
        let entry = CachedDocument {
            document: None,
            chunks: Some(CachedChunks {
                fingerprint: print,
                chunks: chunks.clone(),
            }),
        };
        self.insert_entry(&mut cache, document.id.clone(), entry);
        chunks
    }

    /// Inserta una entrada nueva; si se supera la capacidad se expulsa el
    /// documento menos usado junto con sus embeddings.
    fn insert_entry(
        &self,
        cache: &mut LruCache<String, CachedDocument>,
        document_id: String,
        entry: CachedDocument,
    ) {
        if let Some((evicted, _)) = cache.push(document_id.clone(), entry) {
            if evicted != document_id {
                if let Some(embeddings) = &self.embedding_cache {
                    embeddings.forget_document(&evicted);
                }
                debug!(document.id = %evicted, "Documento expulsado de la caché");
            }
        }
    }

    /// Documento extraído en una consulta anterior, si sigue en caché.
    pub fn cached_document(&self, document_id: &str) -> Option<Arc<Document>> {
        self.documents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(document_id)
            .and_then(|entry| entry.document.clone())
    }

    pub fn remember_document(&self, document: Arc<Document>) {
        let mut cache = self.documents.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = cache.get_mut(&document.id) {
            entry.document = Some(document);
            return;
        }
        let id = document.id.clone();
        let entry = CachedDocument {
            document: Some(document),
            chunks: None,
        };
        self.insert_entry(&mut cache, id, entry);
    }

    /// Olvida el texto, los chunks y los embeddings cacheados de un documento.
    pub fn forget(&self, document_id: &str) {
        self.documents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop(document_id);
        if let Some(embeddings) = &self.embedding_cache {
            embeddings.forget_document(document_id);
        }
        debug!(document.id = document_id, "Cachés del documento eliminadas");
    }

    /// Documentos con texto o chunks en caché.
    pub fn cached_documents(&self) -> usize {
        self.documents.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn cached_embeddings(&self) -> usize {
        self.embedding_cache.as_ref().map_or(0, |c| c.len())
    }
}

/// Constructor de [`RagPipeline`]. El embedder y el modelo de lenguaje son obligatorios.
pub struct RagPipelineBuilder {
    embedder: Option<Arc<dyn Embedder>>,
    language_model: Option<Arc<dyn LanguageModel>>,
    chunk_size: usize,
    chunk_overlap: usize,
    top_k: usize,
    concurrency: usize,
    embedding_cache: bool,
    document_cache_capacity: usize,
    formatter: ResponseFormatter,
}

impl Default for RagPipelineBuilder {
    fn default() -> Self {
        Self {
            embedder: None,
            language_model: None,
            chunk_size: 1000,
            chunk_overlap: 200,
            top_k: DEFAULT_TOP_K,
            concurrency: DEFAULT_EMBED_CONCURRENCY,
            embedding_cache: false,
            document_cache_capacity: DEFAULT_DOCUMENT_CACHE_CAPACITY,
            formatter: ResponseFormatter::default(),
        }
    }
}

impl RagPipelineBuilder {
    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn language_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.language_model = Some(model);
        self
    }

    pub fn chunking(mut self, chunk_size: usize, chunk_overlap: usize) -> Self {
        self.chunk_size = chunk_size;
        self.chunk_overlap = chunk_overlap;
        self
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn embed_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn embedding_cache(mut self, enabled: bool) -> Self {
        self.embedding_cache = enabled;
        self
    }

    /// Número máximo de documentos cuyo texto, chunks y embeddings se conservan.
    pub fn document_cache_capacity(mut self, capacity: usize) -> Self {
        self.document_cache_capacity = capacity;
        self
    }

    pub fn formatter(mut self, formatter: ResponseFormatter) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn build(self) -> Result<RagPipeline> {
        let embedder = self
            .embedder
            .ok_or_else(|| RagError::Config("falta el embedder".to_string()))?;
        let language_model = self
            .language_model
            .ok_or_else(|| RagError::Config("falta el modelo de lenguaje".to_string()))?;
        if self.top_k == 0 {
            return Err(RagError::Config("top_k debe ser al menos 1".to_string()));
        }
        let chunker = WordChunker::new(self.chunk_size, self.chunk_overlap)?;
        let capacity = NonZeroUsize::new(self.document_cache_capacity).ok_or_else(|| {
            RagError::Config("la caché de documentos necesita capacidad 1 o más".to_string())
        })?;

        let embedding_cache = self.embedding_cache.then(|| Arc::new(EmbeddingCache::new()));
        let mut retriever = Retriever::new(embedder).with_concurrency(self.concurrency);
        if let Some(cache) = &embedding_cache {
            retriever = retriever.with_cache(cache.clone());
        }

        Ok(RagPipeline {
            chunker,
            retriever,
            generator: AnswerGenerator::new(language_model),
            formatter: self.formatter,
            default_top_k: self.top_k,
            documents: Mutex::new(LruCache::new(capacity)),
            embedding_cache,
        })
    }
}
