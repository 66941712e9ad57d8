//! Backends falsos para los tests de integración.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pdf_query_rag::embedder::Embedder;
use pdf_query_rag::generator::LanguageModel;
use pdf_query_rag::models::EmbeddingVector;
use pdf_query_rag::{RagError, RagPipeline, Result};

pub const FOX: &str = "The quick brown fox jumps over the lazy dog";

const ACTION: &[&str] = &["do", "does", "jumps", "over"];
const ANIMAL: &[&str] = &["fox", "dog"];
const DESCRIPTION: &[&str] = &["quick", "brown", "lazy"];

/// Embedder determinista de tres dimensiones: acción, animal y descripción.
/// Cada palabra suma 1 a la dimensión de su concepto.
#[derive(Default)]
pub struct ConceptEmbedder {
    calls: AtomicUsize,
    fail: bool,
}

impl ConceptEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for ConceptEmbedder {
    fn provider(&self) -> &str {
        "concept"
    }

    fn dimensions(&self) -> usize {
        3
    }

    async fn embed(&self, text: &str) -> Result<EmbeddingVector> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(RagError::embedding("concept", "servicio caído"));
        }
        let mut vector = vec![0.0; 3];
        for word in text.split_whitespace() {
            let word = word
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if ACTION.contains(&word.as_str()) {
                vector[0] += 1.0;
            } else if ANIMAL.contains(&word.as_str()) {
                vector[1] += 1.0;
            } else if DESCRIPTION.contains(&word.as_str()) {
                vector[2] += 1.0;
            }
        }
        Ok(EmbeddingVector::new(vector))
    }
}

/// Modelo que siempre devuelve la misma respuesta y guarda los prompts recibidos.
pub struct ScriptedModel {
    reply: std::result::Result<String, String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Ok(reply.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn provider(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply
            .clone()
            .map_err(|message| RagError::generation("scripted", message))
    }
}

/// Pipeline de chunks de 5 palabras con solape 2, `top_k` 1 y caché de embeddings.
pub fn fox_pipeline(embedder: Arc<ConceptEmbedder>, model: Arc<ScriptedModel>) -> RagPipeline {
    fox_pipeline_with_capacity(embedder, model, 32)
}

pub fn fox_pipeline_with_capacity(
    embedder: Arc<ConceptEmbedder>,
    model: Arc<ScriptedModel>,
    documents: usize,
) -> RagPipeline {
    RagPipeline::builder()
        .embedder(embedder)
        .language_model(model)
        .chunking(5, 2)
        .top_k(1)
        .embedding_cache(true)
        .document_cache_capacity(documents)
        .build()
        .unwrap()
}
