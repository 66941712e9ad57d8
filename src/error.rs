//! Errores tipados del pipeline documento → respuesta.
//!
//! Cada variante corresponde a la etapa del pipeline en la que se produce,
//! de modo que la capa HTTP puede informar de qué paso ha fallado.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Etapas por las que pasa una consulta.
///
/// `Received → Extracted → Chunked → Retrieved → Generated → Formatted → Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Extracted,
    Chunked,
    Retrieved,
    Generated,
    Formatted,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Extracted => "extracted",
            Stage::Chunked => "chunked",
            Stage::Retrieved => "retrieved",
            Stage::Generated => "generated",
            Stage::Formatted => "formatted",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum RagError {
    /// Bytes que no son un PDF legible o página sin texto decodificable.
    #[error("Error de extracción de texto: {0}")]
    Extraction(String),

    /// Fallo del backend de embeddings.
    #[error("Error de embedding ({provider}): {message}")]
    Embedding { provider: String, message: String },

    /// Uso indebido del recuperador (conjunto de chunks vacío, `top_k` nulo).
    #[error("Error de recuperación: {0}")]
    Retrieval(String),

    /// Fallo del modelo de lenguaje.
    #[error("Error de generación ({provider}): {message}")]
    Generation { provider: String, message: String },

    /// Parámetros inválidos (p. ej. `chunk_size <= chunk_overlap`).
    #[error("Error de configuración: {0}")]
    Config(String),
}

impl RagError {
    pub fn embedding(provider: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Embedding {
            provider: provider.into(),
            message: message.to_string(),
        }
    }

    pub fn generation(provider: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Generation {
            provider: provider.into(),
            message: message.to_string(),
        }
    }

    /// Etapa en la que falla la consulta: `Failed(stage, cause)`.
    ///
    /// Es la etapa que estaba en curso, no la última completada.
    pub fn stage(&self) -> Stage {
        match self {
            RagError::Extraction(_) => Stage::Extracted,
            RagError::Config(_) => Stage::Chunked,
            RagError::Embedding { .. } | RagError::Retrieval(_) => Stage::Retrieved,
            RagError::Generation { .. } => Stage::Generated,
        }
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
