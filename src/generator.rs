//! Construcción del prompt de grounding e invocación del modelo de lenguaje.
//!
//! La respuesta del modelo sigue un contrato de dos secciones (`ANSWER:` y
//! `VISUALIZATION:`) que interpreta [`crate::formatter`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;

/// Frase que el modelo debe devolver cuando el contexto no contiene la respuesta.
pub const NO_ANSWER_SENTINEL: &str = "I cannot answer this based on the provided content";

pub const ANSWER_MARKER: &str = "ANSWER:";
pub const VISUALIZATION_MARKER: &str = "VISUALIZATION:";

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Backend de generación de texto.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn provider(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Prompt determinista: mismas entradas, mismo texto.
pub fn build_prompt(query: &str, context_chunks: &[&str]) -> String {
    let context = context_chunks.join(CONTEXT_SEPARATOR);
    format!(
        r#"You are a helpful assistant that answers questions based on provided PDF content.

Context from PDF:
{context}

Question: {query}

Instructions:
1. Answer based ONLY on the provided context.
2. If the answer isn't in the context, reply exactly: "{NO_ANSWER_SENTINEL}".
3. Be concise but thorough, and cite specific parts of the context when relevant.
4. If the answer contains data that can be charted or tabulated, describe it in the VISUALIZATION section.

Respond using exactly this format:
{ANSWER_MARKER}
<your answer>

{VISUALIZATION_MARKER}
<either the word None, or a single JSON object like
{{"type": "line" | "bar" | "pie" | "table", "title": "...", "description": "...", "data": [{{"label": "...", "value": 0}}]}}>
"#
    )
}

pub struct AnswerGenerator {
    model: Arc<dyn LanguageModel>,
}

impl AnswerGenerator {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Devuelve la salida cruda del modelo, sin modificar. No reintenta.
    pub async fn generate(&self, query: &str, context_chunks: &[&str]) -> Result<String> {
        let prompt = build_prompt(query, context_chunks);
        debug!(
            provider = self.model.provider(),
            prompt_chars = prompt.len(),
            "Invocando modelo de lenguaje"
        );
        self.model.generate(&prompt).await
    }
}
