//! Troceado de texto en ventanas de palabras solapadas.
//!
//! El troceado es por palabras y puede partir frases; a cambio es simple y
//! rápido.

use crate::error::{RagError, Result};
use crate::models::{Chunk, Document};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl WordChunker {
    /// Exige `chunk_size > chunk_overlap`; si no, el troceado no avanzaría.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size <= chunk_overlap {
            return Err(RagError::Config(format!(
                "chunk_size ({chunk_size}) debe ser mayor que chunk_overlap ({chunk_overlap})"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    fn step(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }

    /// Trocea el texto del documento.
    ///
    /// Los chunks empiezan en las palabras `0, S-O, 2(S-O), ...` y se deja de
    /// trocear en cuanto un chunk alcanza la última palabra.
    pub fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let words: Vec<&str> = document.text.split_whitespace().collect();
        let page_offsets = document.page_word_offsets();

        let mut chunks = Vec::new();
        let mut start = 0;

        while start < words.len() {
            let end = (start + self.chunk_size).min(words.len());
            chunks.push(Chunk {
                document_id: document.id.clone(),
                index: chunks.len(),
                text: words[start..end].join(" "),
                start_word: start,
                end_word: end,
                page: page_of_word(&page_offsets, start),
            });
            if end == words.len() {
                break;
            }
            start += self.step();
        }

        chunks
    }
}

/// Página (base 1) que contiene la palabra `word`.
fn page_of_word(page_offsets: &[usize], word: usize) -> Option<usize> {
    if page_offsets.is_empty() {
        return None;
    }
    // Una página vacía comparte offset con la siguiente: nos quedamos con la última.
    let idx = page_offsets.partition_point(|&offset| offset <= word);
    Some(idx.max(1))
}

/// Número de chunks que produce [`WordChunker::chunk`] para `words` palabras.
pub fn expected_chunk_count(words: usize, chunk_size: usize, chunk_overlap: usize) -> usize {
    if words == 0 {
        return 0;
    }
    if words <= chunk_overlap {
        return 1;
    }
    (words - chunk_overlap).div_ceil(chunk_size - chunk_overlap)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOX: &str = "The quick brown fox jumps over the lazy dog";

    fn texts(chunks: &[Chunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.text.as_str()).collect()
    }

    #[test]
    fn fox_sentence_splits_at_offsets_0_3_6() {
        let chunker = WordChunker::new(5, 2).unwrap();
        let chunks = chunker.chunk(&Document::from_text("fox", FOX));

        assert_eq!(
            texts(&chunks),
            vec!["The quick brown fox jumps", "fox jumps over the lazy", "the lazy dog"]
        );
        let starts: Vec<usize> = chunks.iter().map(|c| c.start_word).collect();
        assert_eq!(starts, vec![0, 3, 6]);
        assert!(chunks.iter().enumerate().all(|(i, c)| c.index == i));
    }

    #[test]
    fn empty_text_has_no_chunks() {
        let chunker = WordChunker::new(5, 2).unwrap();
        assert!(chunker.chunk(&Document::from_text("d", "   \n\t ")).is_empty());
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunker = WordChunker::new(1000, 200).unwrap();
        let chunks = chunker.chunk(&Document::from_text("d", "solo  tres\npalabras"));
        assert_eq!(texts(&chunks), vec!["solo tres palabras"]);
        assert_eq!((chunks[0].start_word, chunks[0].end_word), (0, 3));
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        assert!(matches!(WordChunker::new(5, 5), Err(RagError::Config(_))));
        assert!(matches!(WordChunker::new(2, 7), Err(RagError::Config(_))));
        assert!(WordChunker::new(1, 0).is_ok());
    }

    #[test]
    fn chunks_know_their_page() {
        let doc = Document::from_pages(
            "pdf",
            vec!["a b c".into(), String::new(), "d e f g".into()],
        );
        let chunker = WordChunker::new(3, 1).unwrap();
        let chunks = chunker.chunk(&doc);

        // Palabras: a b c | d e f g → chunks en 0, 2, 4
        let pages: Vec<Option<usize>> = chunks.iter().map(|c| c.page).collect();
        assert_eq!(pages, vec![Some(1), Some(1), Some(3)]);
    }

    #[test]
    fn count_formula_matches_fox_example() {
        assert_eq!(expected_chunk_count(9, 5, 2), 3);
        assert_eq!(expected_chunk_count(10, 5, 2), 3);
        assert_eq!(expected_chunk_count(1, 5, 2), 1);
        assert_eq!(expected_chunk_count(0, 5, 2), 0);
    }
}
