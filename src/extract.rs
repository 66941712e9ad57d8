//! Extracción de texto plano a partir de los bytes de un PDF.

use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, warn};

use crate::error::{RagError, Result};
use crate::models::Document;

/// Extrae el texto de cada página, en orden.
///
/// Falla con [`RagError::Extraction`] si los bytes no son un PDF legible. No se
/// devuelve nunca texto parcial.
pub fn extract_pages(pdf_bytes: &[u8]) -> Result<Vec<String>> {
    if pdf_bytes.is_empty() {
        return Err(RagError::Extraction("el contenido está vacío".to_string()));
    }

    // pdf-extract puede entrar en pánico con PDFs corruptos.
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(pdf_bytes)
    }));

    match outcome {
        Ok(Ok(pages)) => {
            debug!(pages = pages.len(), "Texto extraído del PDF");
            Ok(pages)
        }
        Ok(Err(e)) => {
            warn!("No se pudo extraer texto del PDF: {e}");
            Err(RagError::Extraction(e.to_string()))
        }
        Err(payload) => {
            let cause = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "pánico desconocido".to_string());
            warn!("pdf-extract entró en pánico: {cause}");
            Err(RagError::Extraction(format!("PDF ilegible: {cause}")))
        }
    }
}

/// Construye un [`Document`] a partir de los bytes de un PDF.
pub fn extract_document(document_id: &str, pdf_bytes: &[u8]) -> Result<Document> {
    let pages = extract_pages(pdf_bytes)?;
    Ok(Document::from_pages(document_id, pages))
}
