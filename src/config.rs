//! Carga y gestión de configuración de la aplicación (LLM, pipeline RAG y almacenes).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Result};

#[derive(Clone, Debug)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Credenciales de Neo4j para el almacén de metadatos (opcional).
#[derive(Clone, Debug)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub public_base_url: String,

    pub llm_provider: LlmProvider,
    pub llm_embedding_model: String,
    pub llm_chat_model: String,
    pub llm_temperature: f64,

    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub embed_concurrency: usize,
    pub embedding_cache: bool,
    pub document_cache_capacity: usize,

    pub upload_dir: PathBuf,
    pub neo4j: Option<Neo4jConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let server_addr = "127.0.0.1:3322".to_string();
        Self {
            public_base_url: format!("http://{server_addr}"),
            server_addr,
            llm_provider: LlmProvider::OpenAI,
            llm_embedding_model: String::new(),
            llm_chat_model: String::new(),
            llm_temperature: 0.0,
            chunk_size: 1000,
            chunk_overlap: 200,
            top_k: 3,
            embed_concurrency: 8,
            embedding_cache: true,
            document_cache_capacity: 32,
            upload_dir: PathBuf::from("uploads"),
            neo4j: None,
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("Valor inválido para {name} ('{raw}'): {e}")),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let server_addr = env::var("SERVER_ADDR").unwrap_or(defaults.server_addr);
        let public_base_url = env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| format!("http://{server_addr}"));

        let llm_provider_str =
            env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;

        let llm_embedding_model = env::var("LLM_EMBEDDING_MODEL").unwrap_or_default();
        let llm_chat_model = env::var("LLM_CHAT_MODEL").unwrap_or_default();

        let neo4j = match env::var("NEO4J_URI") {
            Ok(uri) => Some(Neo4jConfig {
                uri,
                user: env::var("NEO4J_USER")
                    .map_err(|_| anyhow!("Falta NEO4J_USER en el entorno"))?,
                password: env::var("NEO4J_PASSWORD")
                    .map_err(|_| anyhow!("Falta NEO4J_PASSWORD en el entorno"))?,
            }),
            Err(_) => None,
        };

        let cfg = Self {
            server_addr,
            public_base_url,
            llm_provider,
            llm_embedding_model,
            llm_chat_model,
            llm_temperature: parse_var("LLM_TEMPERATURE", defaults.llm_temperature)?,
            chunk_size: parse_var("CHUNK_SIZE", defaults.chunk_size)?,
            chunk_overlap: parse_var("CHUNK_OVERLAP", defaults.chunk_overlap)?,
            top_k: parse_var("TOP_K", defaults.top_k)?,
            embed_concurrency: parse_var("EMBED_CONCURRENCY", defaults.embed_concurrency)?,
            embedding_cache: parse_var("EMBEDDING_CACHE", defaults.embedding_cache)?,
            document_cache_capacity: parse_var(
                "DOCUMENT_CACHE_CAPACITY",
                defaults.document_cache_capacity,
            )?,
            upload_dir: env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            neo4j,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size <= self.chunk_overlap {
            return Err(anyhow!(
                "CHUNK_SIZE ({}) debe ser mayor que CHUNK_OVERLAP ({})",
                self.chunk_size,
                self.chunk_overlap
            ));
        }
        if self.top_k == 0 {
            return Err(anyhow!("TOP_K debe ser al menos 1"));
        }
        if self.document_cache_capacity == 0 {
            return Err(anyhow!("DOCUMENT_CACHE_CAPACITY debe ser al menos 1"));
        }
        if self.embed_concurrency == 0 {
            return Err(anyhow!("EMBED_CONCURRENCY debe ser al menos 1"));
        }
        Ok(())
    }
}
