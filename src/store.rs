//! Persistencia de metadatos de PDFs y del historial de consultas.
//!
//! El pipeline no depende de este módulo: lo usa la capa HTTP. Hay dos
//! implementaciones, en memoria (por defecto) y Neo4j
//! ([`crate::neo4j_client::Neo4jMetadataStore`]).

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{DocumentMetadata, QueryRecord};

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Guarda los metadatos y devuelve el id del documento (se genera si viene vacío).
    async fn save(&self, metadata: DocumentMetadata) -> Result<String>;

    async fn find(&self, id: &str) -> Result<Option<DocumentMetadata>>;

    /// Documentos ordenados del más reciente al más antiguo.
    async fn list(&self, skip: usize, limit: usize) -> Result<Vec<DocumentMetadata>>;

    /// `true` si existía.
    async fn delete_by_id(&self, id: &str) -> Result<bool>;

    async fn save_query(&self, record: QueryRecord) -> Result<String>;

    /// Historial de un documento, del más reciente al más antiguo.
    async fn list_queries(&self, pdf_id: &str, skip: usize, limit: usize)
        -> Result<Vec<QueryRecord>>;

    /// Número de consultas borradas.
    async fn delete_queries(&self, pdf_id: &str) -> Result<usize>;
}

fn ensure_id(id: &mut String) {
    if id.is_empty() {
        *id = Uuid::new_v4().to_string();
    }
}

/// Almacén en memoria; no sobrevive a un reinicio.
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    documents: RwLock<HashMap<String, DocumentMetadata>>,
    queries: RwLock<Vec<QueryRecord>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn save(&self, mut metadata: DocumentMetadata) -> Result<String> {
        ensure_id(&mut metadata.id);
        let id = metadata.id.clone();
        self.documents.write().await.insert(id.clone(), metadata);
        Ok(id)
    }

    async fn find(&self, id: &str) -> Result<Option<DocumentMetadata>> {
        Ok(self.documents.read().await.get(id).cloned())
    }

    async fn list(&self, skip: usize, limit: usize) -> Result<Vec<DocumentMetadata>> {
        let mut all: Vec<DocumentMetadata> =
            self.documents.read().await.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all.into_iter().skip(skip).take(limit).collect())
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool> {
        Ok(self.documents.write().await.remove(id).is_some())
    }

    async fn save_query(&self, mut record: QueryRecord) -> Result<String> {
        ensure_id(&mut record.id);
        let id = record.id.clone();
        self.queries.write().await.push(record);
        Ok(id)
    }

    async fn list_queries(
        &self,
        pdf_id: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<QueryRecord>> {
        let mut matching: Vec<QueryRecord> = self
            .queries
            .read()
            .await
            .iter()
            .filter(|q| q.pdf_id == pdf_id)
            .cloned()
            .collect();
        // Orden estable: a igual fecha, la última insertada primero.
        matching.reverse();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching.into_iter().skip(skip).take(limit).collect())
    }

    async fn delete_queries(&self, pdf_id: &str) -> Result<usize> {
        let mut queries = self.queries.write().await;
        let before = queries.len();
        queries.retain(|q| q.pdf_id != pdf_id);
        Ok(before - queries.len())
    }
}
