//! Modelos de dominio: documentos, chunks, resultados de recuperación,
//! respuestas con visualizaciones y los metadatos que persisten los almacenes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Documento con su texto plano derivado.
///
/// Si procede de un PDF, `pages` conserva el texto de cada página en orden y
/// `text` es su concatenación (cada página seguida de un salto de línea).
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub pages: Vec<String>,
}

impl Document {
    pub fn from_text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            pages: Vec::new(),
        }
    }

    pub fn from_pages(id: impl Into<String>, pages: Vec<String>) -> Self {
        let mut text = String::new();
        for page in &pages {
            text.push_str(page);
            text.push('\n');
        }
        Self {
            id: id.into(),
            text,
            pages,
        }
    }

    /// Índice de palabra en el que empieza cada página.
    /// Vacío si el documento no tiene información de páginas.
    pub fn page_word_offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.pages.len());
        let mut total = 0;
        for page in &self.pages {
            offsets.push(total);
            total += page.split_whitespace().count();
        }
        offsets
    }
}

/// Trozo de texto de un documento, con sus límites en palabras `[start_word, end_word)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub document_id: String,
    pub index: usize,
    pub text: String,
    pub start_word: usize,
    pub end_word: usize,
    /// Página (base 1) de la primera palabra del chunk, si se conoce.
    pub page: Option<usize>,
}

impl Chunk {
    pub fn word_count(&self) -> usize {
        self.end_word - self.start_word
    }
}

/// Vector de embedding de dimensión fija.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector(Vec<f64>);

impl EmbeddingVector {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<f64>> for EmbeddingVector {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

/// Chunk acompañado de su similitud coseno con la consulta.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    pub chunk: Chunk,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualizationKind {
    Line,
    Bar,
    Pie,
    Table,
}

/// Descripción estructurada de un gráfico o tabla extraída de la respuesta del LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizationDescriptor {
    #[serde(rename = "type")]
    pub kind: VisualizationKind,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub data: Vec<Map<String, Value>>,
}

/// Cita de la fuente que alimentó el prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceCitation {
    pub document_id: String,
    pub chunk_index: usize,
    pub page: Option<usize>,
    pub score: f64,
    pub excerpt: String,
}

/// Resultado completo de una consulta.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerPayload {
    pub answer: String,
    pub sources: Vec<SourceCitation>,
    pub visualizations: Vec<VisualizationDescriptor>,
}

/// Metadatos de un PDF subido, tal y como los guarda el almacén de metadatos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub id: String,
    pub filename: String,
    pub object_id: String,
    pub url: String,
    pub file_size: u64,
    pub format: String,
    pub created_at: DateTime<Utc>,
}

/// Consulta registrada junto a la respuesta que obtuvo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub id: String,
    pub pdf_id: String,
    pub query: String,
    pub response: String,
    pub created_at: DateTime<Utc>,
}
