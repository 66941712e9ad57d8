//! Servicio RAG para hacer preguntas sobre documentos PDF.
//!
//! El núcleo es [`pipeline::RagPipeline`]: extracción → troceado → recuperación
//! → generación → formateo. Alrededor hay una API HTTP/WebSocket ([`api`]) y
//! almacenes para los PDFs subidos y su historial de consultas.

pub mod api;
pub mod app_state;
pub mod chunker;
pub mod config;
pub mod embedder;
pub mod error;
pub mod extract;
pub mod formatter;
pub mod generator;
pub mod llm;
pub mod models;
pub mod neo4j_client;
pub mod object_store;
pub mod pipeline;
pub mod retriever;
pub mod store;

pub use error::{RagError, Result, Stage};
pub use pipeline::{RagPipeline, RagPipelineBuilder};
