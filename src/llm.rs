//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//! Implementados OpenAI y Gemini; Ollama queda preparado para el futuro.
//!
//! Los clientes y modelos se construyen una sola vez al arrancar y se inyectan
//! en el pipeline como [`Embedder`] y [`LanguageModel`].

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rig::agent::Agent;
use rig::completion::{CompletionModel, Prompt};
use rig::embeddings::EmbeddingModel;
use tracing::info;

use crate::config::{AppConfig, LlmProvider};
use crate::embedder::Embedder;
use crate::error::RagError;
use crate::generator::LanguageModel;
use crate::models::EmbeddingVector;

const DEFAULT_OPENAI_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_OPENAI_CHAT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_GEMINI_EMBEDDING_MODEL: &str = "text-embedding-004";
const DEFAULT_GEMINI_CHAT_MODEL: &str = "gemini-1.5-flash";

const SYSTEM_PROMPT: &str = "You answer questions strictly from the PDF excerpts included in the user's message and always follow the requested output format.";

/// Embeddings vía un `EmbeddingModel` de Rig.
pub struct RigEmbedder<M> {
    provider: String,
    model: M,
}

impl<M: EmbeddingModel> RigEmbedder<M> {
    pub fn new(provider: impl Into<String>, model: M) -> Self {
        Self {
            provider: provider.into(),
            model,
        }
    }
}

#[async_trait]
impl<M> Embedder for RigEmbedder<M>
where
    M: EmbeddingModel + 'static,
{
    fn provider(&self) -> &str {
        &self.provider
    }

    fn dimensions(&self) -> usize {
        self.model.ndims()
    }

    async fn embed(&self, text: &str) -> crate::error::Result<EmbeddingVector> {
        let mut vectors = self.embed_batch(&[text]).await?;
        vectors.pop().ok_or_else(|| {
            RagError::embedding(&self.provider, "el backend no devolvió ningún embedding")
        })
    }

    async fn embed_batch(&self, texts: &[&str]) -> crate::error::Result<Vec<EmbeddingVector>> {
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(RagError::embedding(
                &self.provider,
                "no se puede embeber texto vacío",
            ));
        }

        let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        let embeddings = self
            .model
            .embed_texts(owned)
            .await
            .map_err(|e| RagError::embedding(&self.provider, e))?;

        if embeddings.len() != texts.len() {
            return Err(RagError::embedding(
                &self.provider,
                format!(
                    "Número de embeddings ({}) distinto al número de textos ({})",
                    embeddings.len(),
                    texts.len()
                ),
            ));
        }

        Ok(embeddings
            .into_iter()
            .map(|emb| EmbeddingVector::new(emb.vec))
            .collect())
    }
}

/// Generación de texto con un agente de Rig (temperatura fijada al construirlo).
pub struct RigLanguageModel<M: CompletionModel> {
    provider: String,
    agent: Agent<M>,
}

impl<M: CompletionModel> RigLanguageModel<M> {
    pub fn new(provider: impl Into<String>, agent: Agent<M>) -> Self {
        Self {
            provider: provider.into(),
            agent,
        }
    }
}

#[async_trait]
impl<M> LanguageModel for RigLanguageModel<M>
where
    M: CompletionModel + 'static,
{
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn generate(&self, prompt: &str) -> crate::error::Result<String> {
        self.agent
            .prompt(prompt)
            .await
            .map_err(|e| RagError::generation(&self.provider, e))
    }
}

/// Backends de modelo listos para inyectar en el pipeline.
#[derive(Clone)]
pub struct ModelBackends {
    pub embedder: Arc<dyn Embedder>,
    pub language_model: Arc<dyn LanguageModel>,
}

fn pick<'a>(configured: &'a str, default: &'a str) -> &'a str {
    if configured.is_empty() {
        default
    } else {
        configured
    }
}

/// Construye los backends a partir de la configuración.
pub fn backends_from_config(cfg: &AppConfig) -> Result<ModelBackends> {
    match cfg.llm_provider {
        LlmProvider::OpenAI => openai_backends(cfg),
        LlmProvider::Gemini => gemini_backends(cfg),
        ref other => Err(anyhow!("Proveedor LLM {:?} aún no implementado", other)),
    }
}

fn openai_backends(cfg: &AppConfig) -> Result<ModelBackends> {
    use rig::client::{CompletionClient as _, EmbeddingsClient as _};
    use rig::providers::openai;

    let client = openai::Client::from_env();
    let embedding_model = pick(&cfg.llm_embedding_model, DEFAULT_OPENAI_EMBEDDING_MODEL);
    let chat_model = pick(&cfg.llm_chat_model, DEFAULT_OPENAI_CHAT_MODEL);

    let agent = client
        .agent(chat_model)
        .preamble(SYSTEM_PROMPT)
        .temperature(cfg.llm_temperature)
        .build();

    info!("Backends OpenAI listos (embeddings: {embedding_model}, chat: {chat_model})");
    Ok(ModelBackends {
        embedder: Arc::new(RigEmbedder::new("openai", client.embedding_model(embedding_model))),
        language_model: Arc::new(RigLanguageModel::new("openai", agent)),
    })
}

fn gemini_backends(cfg: &AppConfig) -> Result<ModelBackends> {
    use rig::client::{CompletionClient as _, EmbeddingsClient as _};
    use rig::providers::gemini;

    let client = gemini::Client::from_env();
    let embedding_model = pick(&cfg.llm_embedding_model, DEFAULT_GEMINI_EMBEDDING_MODEL);
    let chat_model = pick(&cfg.llm_chat_model, DEFAULT_GEMINI_CHAT_MODEL);

    let agent = client
        .agent(chat_model)
        .preamble(SYSTEM_PROMPT)
        .temperature(cfg.llm_temperature)
        .build();

    info!("Backends Gemini listos (embeddings: {embedding_model}, chat: {chat_model})");
    Ok(ModelBackends {
        embedder: Arc::new(RigEmbedder::new("gemini", client.embedding_model(embedding_model))),
        language_model: Arc::new(RigLanguageModel::new("gemini", agent)),
    })
}
