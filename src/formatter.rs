//! Interpretación de la salida del modelo: respuesta limpia + visualizaciones.
//!
//! Las visualizaciones son un extra. Cualquier sorpresa de formato (sección
//! ausente, JSON inválido, tabla mal formada) se degrada a "sin visualización"
//! y nunca hace fallar una respuesta.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Number, Value};
use tracing::debug;

use crate::generator::{ANSWER_MARKER, VISUALIZATION_MARKER};
use crate::models::{
    AnswerPayload, RetrievalResult, SourceCitation, VisualizationDescriptor, VisualizationKind,
};

pub const DEFAULT_EXCERPT_CHARS: usize = 200;

fn code_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)^```[A-Za-z]*\s*(.*?)\s*```$").expect("regex de bloque de código válida")
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(VisualizationDescriptor),
    Many(Vec<VisualizationDescriptor>),
}

#[derive(Debug, Clone)]
pub struct ResponseFormatter {
    excerpt_chars: usize,
}

impl Default for ResponseFormatter {
    fn default() -> Self {
        Self {
            excerpt_chars: DEFAULT_EXCERPT_CHARS,
        }
    }
}

impl ResponseFormatter {
    pub fn new(excerpt_chars: usize) -> Self {
        Self { excerpt_chars }
    }

    /// Convierte la salida cruda del modelo en un [`AnswerPayload`]. No falla nunca.
    pub fn format(&self, raw: &str, sources: &[RetrievalResult]) -> AnswerPayload {
        let (answer_part, section) = split_visualization_section(raw);

        let mut visualizations = section.map(parse_visualization_json).unwrap_or_default();
        visualizations.extend(extract_markdown_tables(raw));

        AnswerPayload {
            answer: clean_answer(answer_part),
            sources: sources.iter().map(|r| self.cite(r)).collect(),
            visualizations,
        }
    }

    fn cite(&self, result: &RetrievalResult) -> SourceCitation {
        SourceCitation {
            document_id: result.chunk.document_id.clone(),
            chunk_index: result.chunk.index,
            page: result.chunk.page,
            score: result.score,
            excerpt: excerpt(&result.chunk.text, self.excerpt_chars),
        }
    }
}

/// Separa el texto previo a `VISUALIZATION:` de la sección que le sigue.
pub fn split_visualization_section(raw: &str) -> (&str, Option<&str>) {
    match raw.find(VISUALIZATION_MARKER) {
        Some(at) => (&raw[..at], Some(&raw[at + VISUALIZATION_MARKER.len()..])),
        None => (raw, None),
    }
}

/// Interpreta la sección de visualización como un descriptor o una lista de ellos.
pub fn parse_visualization_json(section: &str) -> Vec<VisualizationDescriptor> {
    let mut body = section.trim();
    if body.is_empty() || body.eq_ignore_ascii_case("none") {
        return Vec::new();
    }
    if let Some(caps) = code_fence().captures(body) {
        body = caps.get(1).map_or("", |m| m.as_str());
    }

    // Toleramos texto alrededor del JSON.
    let start = body.find(['{', '[']);
    let end = body.rfind(['}', ']']);
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &body[start..=end],
        _ => {
            debug!("Sección de visualización sin JSON; se ignora");
            return Vec::new();
        }
    };

    match serde_json::from_str::<OneOrMany>(json) {
        Ok(OneOrMany::One(viz)) => vec![viz],
        Ok(OneOrMany::Many(list)) => list,
        Err(e) => {
            debug!("JSON de visualización inválido ({e}); se ignora");
            Vec::new()
        }
    }
}

/// Quita la etiqueta `ANSWER:` y los espacios de los extremos.
pub fn clean_answer(answer_part: &str) -> String {
    answer_part.replace(ANSWER_MARKER, "").trim().to_string()
}

/// Busca tablas markdown (cabecera, separador y al menos una fila) en el texto.
pub fn extract_markdown_tables(text: &str) -> Vec<VisualizationDescriptor> {
    let lines: Vec<&str> = text.lines().collect();
    let mut tables = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        if !lines[i].contains('|') {
            i += 1;
            continue;
        }
        let start = i;
        while i < lines.len() && lines[i].contains('|') {
            i += 1;
        }
        match parse_table_block(&lines[start..i], tables.len() + 1) {
            Some(table) => tables.push(table),
            None => debug!(lines = i - start, "Bloque de tabla mal formado; se omite"),
        }
    }

    tables
}

fn split_row(line: &str) -> Vec<String> {
    let trimmed = line.trim();
    let trimmed = trimmed.strip_prefix('|').unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix('|').unwrap_or(trimmed);
    trimmed.split('|').map(|cell| cell.trim().to_string()).collect()
}

fn is_separator_row(cells: &[String]) -> bool {
    cells
        .iter()
        .all(|c| c.contains('-') && c.chars().all(|ch| ch == '-' || ch == ':'))
}

fn parse_table_block(block: &[&str], number: usize) -> Option<VisualizationDescriptor> {
    if block.len() < 3 {
        return None;
    }
    let header = split_row(block[0]);
    if header.iter().all(|h| h.is_empty()) {
        return None;
    }
    let separator = split_row(block[1]);
    if separator.len() != header.len() || !is_separator_row(&separator) {
        return None;
    }

    let mut data = Vec::with_capacity(block.len() - 2);
    for line in &block[2..] {
        let cells = split_row(line);
        if cells.len() != header.len() {
            return None;
        }
        let record: Map<String, Value> = header
            .iter()
            .cloned()
            .zip(cells.iter().map(|c| cell_value(c)))
            .collect();
        data.push(record);
    }

    Some(VisualizationDescriptor {
        kind: VisualizationKind::Table,
        title: format!("Table {number}"),
        description: format!("Columns: {}", header.join(", ")),
        data,
    })
}

fn cell_value(cell: &str) -> Value {
    if let Ok(int) = cell.parse::<i64>() {
        return Value::Number(int.into());
    }
    if let Some(number) = cell.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(number);
    }
    Value::String(cell.to_string())
}

fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn format(raw: &str) -> AnswerPayload {
        ResponseFormatter::default().format(raw, &[])
    }

    #[test]
    fn missing_section_gives_clean_answer_and_no_visualizations() {
        let payload = format("ANSWER: The fox jumps over the dog.");
        assert_eq!(payload.answer, "The fox jumps over the dog.");
        assert!(payload.visualizations.is_empty());
        assert!(!payload.answer.contains("ANSWER:"));
    }

    #[test]
    fn none_section_is_stripped() {
        let payload = format("ANSWER:\nForty-two.\n\nVISUALIZATION:\nNone\n");
        assert_eq!(payload.answer, "Forty-two.");
        assert!(payload.visualizations.is_empty());
    }

    #[test]
    fn invalid_json_degrades_to_nothing() {
        let payload = format("ANSWER: ok\nVISUALIZATION: {\"type\": \"bar\", \"data\": [1, 2,");
        assert_eq!(payload.answer, "ok");
        assert!(payload.visualizations.is_empty());

        let unknown = format("ANSWER: ok\nVISUALIZATION: {\"type\": \"scatter\"}");
        assert!(unknown.visualizations.is_empty());
    }

    #[test]
    fn fenced_json_object_is_parsed() {
        let raw = "ANSWER: Sales grew.\n\nVISUALIZATION:\n```json\n{\"type\": \"line\", \"title\": \"Sales\", \"description\": \"By year\", \"data\": [{\"year\": 2022, \"sales\": 10}, {\"year\": 2023, \"sales\": 14}]}\n```";
        let payload = format(raw);

        assert_eq!(payload.answer, "Sales grew.");
        assert_eq!(payload.visualizations.len(), 1);
        let viz = &payload.visualizations[0];
        assert_eq!(viz.kind, VisualizationKind::Line);
        assert_eq!(viz.title, "Sales");
        assert_eq!(viz.data[1]["sales"], 14);
    }

    #[test]
    fn json_array_yields_several_descriptors() {
        let raw = r#"ANSWER: x
VISUALIZATION: [{"type":"pie","title":"A","data":[]},{"type":"bar","title":"B","data":[]}]"#;
        let kinds: Vec<VisualizationKind> =
            format(raw).visualizations.iter().map(|v| v.kind).collect();
        assert_eq!(kinds, vec![VisualizationKind::Pie, VisualizationKind::Bar]);
    }

    #[test]
    fn markdown_tables_follow_json_visualization() {
        let raw = "ANSWER: Here is the data:\n\n| Region | Units |\n|:------|----:|\n| North | 12 |\n| South | 7.5 |\n\nVISUALIZATION: {\"type\":\"bar\",\"title\":\"Units\",\"data\":[]}";
        let payload = format(raw);

        assert_eq!(payload.visualizations.len(), 2);
        assert_eq!(payload.visualizations[0].kind, VisualizationKind::Bar);

        let table = &payload.visualizations[1];
        assert_eq!(table.kind, VisualizationKind::Table);
        assert_eq!(table.title, "Table 1");
        assert_eq!(table.data.len(), 2);
        assert_eq!(table.data[0]["Region"], "North");
        assert_eq!(table.data[0]["Units"], 12);
        assert_eq!(table.data[1]["Units"], 7.5);
        assert!(payload.answer.starts_with("Here is the data:"));
    }

    #[test]
    fn malformed_tables_are_skipped() {
        let no_separator = "| a | b |\n| 1 | 2 |\n| 3 | 4 |";
        assert!(extract_markdown_tables(no_separator).is_empty());

        let no_rows = "| a | b |\n|---|---|";
        assert!(extract_markdown_tables(no_rows).is_empty());

        let ragged = "| a | b |\n|---|---|\n| 1 | 2 | 3 |";
        assert!(extract_markdown_tables(ragged).is_empty());

        let mixed = format!("{ragged}\n\ntext\n\n| x |\n|---|\n| y |");
        let tables = extract_markdown_tables(&mixed);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].title, "Table 1");
    }

    #[test]
    fn sources_cite_chunks_with_excerpts() {
        let long_text = "palabra ".repeat(60);
        let result = RetrievalResult {
            chunk: Chunk {
                document_id: "pdf-1".into(),
                index: 4,
                text: long_text,
                start_word: 40,
                end_word: 100,
                page: Some(2),
            },
            score: 0.8,
        };

        let payload = ResponseFormatter::new(20).format("ANSWER: y", &[result]);
        let source = &payload.sources[0];
        assert_eq!(source.document_id, "pdf-1");
        assert_eq!(source.chunk_index, 4);
        assert_eq!(source.page, Some(2));
        assert_eq!(source.excerpt.chars().count(), 23);
        assert!(source.excerpt.ends_with("..."));
    }
}
