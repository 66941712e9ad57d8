//! Almacén de metadatos sobre Neo4j: nodos (:Pdf) y (:Query) unidos por
//! (:Pdf)-[:HAS_QUERY]->(:Query).

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use neo4rs::{query, Graph, Row};
use tracing::info;
use url::Url;
use uuid::Uuid;

use crate::config::Neo4jConfig;
use crate::models::{DocumentMetadata, QueryRecord};
use crate::store::MetadataStore;

pub async fn connect_from_config(cfg: &Neo4jConfig) -> Result<Graph> {
    let url = Url::parse(&cfg.uri)?;
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port().unwrap_or(7687);
    let addr = format!("{host}:{port}");

    info!("Conectando a Neo4j en {addr}...");
    let graph = Graph::new(&addr, &cfg.user, &cfg.password).await?;
    info!("Conexión a Neo4j OK");
    Ok(graph)
}

/// Crea constraints e índices para las etiquetas usadas: :Pdf y :Query.
pub async fn ensure_schema(graph: &Graph) -> Result<()> {
    let statements = [
        "CREATE CONSTRAINT pdf_id IF NOT EXISTS
         FOR (p:Pdf)
         REQUIRE p.id IS UNIQUE",
        "CREATE CONSTRAINT query_id IF NOT EXISTS
         FOR (q:Query)
         REQUIRE q.id IS UNIQUE",
        "CREATE INDEX query_pdf_id IF NOT EXISTS
         FOR (q:Query)
         ON (q.pdf_id)",
        "CREATE INDEX pdf_created_at IF NOT EXISTS
         FOR (p:Pdf)
         ON (p.created_at)",
    ];

    for stmt in statements {
        graph.run(query(stmt)).await?;
    }

    info!("Esquema de Neo4j asegurado (constraints e índices creados).");
    Ok(())
}

/// Las fechas se guardan como RFC 3339 en UTC con ancho fijo, de modo que el
/// orden lexicográfico coincide con el cronológico.
fn to_stored(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn from_stored(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

fn text(row: &Row, name: &str) -> Result<String> {
    row.get::<String>(name)
        .ok_or_else(|| anyhow!("Falta campo '{name}' en resultado de Neo4j"))
}

fn int(row: &Row, name: &str) -> Result<i64> {
    row.get::<i64>(name)
        .ok_or_else(|| anyhow!("Falta campo '{name}' en resultado de Neo4j"))
}

fn row_to_metadata(row: &Row) -> Result<DocumentMetadata> {
    Ok(DocumentMetadata {
        id: text(row, "id")?,
        filename: text(row, "filename")?,
        object_id: text(row, "object_id")?,
        url: text(row, "url")?,
        file_size: int(row, "file_size")?.max(0) as u64,
        format: text(row, "format")?,
        created_at: from_stored(&text(row, "created_at")?)?,
    })
}

fn row_to_query(row: &Row) -> Result<QueryRecord> {
    Ok(QueryRecord {
        id: text(row, "id")?,
        pdf_id: text(row, "pdf_id")?,
        query: text(row, "query")?,
        response: text(row, "response")?,
        created_at: from_stored(&text(row, "created_at")?)?,
    })
}

const PDF_FIELDS: &str = "p.id AS id, p.filename AS filename, p.object_id AS object_id,
     p.url AS url, p.file_size AS file_size, p.format AS format, p.created_at AS created_at";

const QUERY_FIELDS: &str = "q.id AS id, q.pdf_id AS pdf_id, q.query AS query,
     q.response AS response, q.created_at AS created_at";

pub struct Neo4jMetadataStore {
    graph: Graph,
}

impl Neo4jMetadataStore {
    /// Conecta y asegura el esquema.
    pub async fn connect(cfg: &Neo4jConfig) -> Result<Self> {
        let graph = connect_from_config(cfg).await?;
        ensure_schema(&graph).await?;
        Ok(Self { graph })
    }

    async fn collect<T>(
        &self,
        q: neo4rs::Query,
        convert: fn(&Row) -> Result<T>,
    ) -> Result<Vec<T>> {
        let mut cursor = self.graph.execute(q).await?;
        let mut output = Vec::new();
        while let Some(row) = cursor.next().await? {
            output.push(convert(&row)?);
        }
        Ok(output)
    }

    async fn count(&self, q: neo4rs::Query) -> Result<usize> {
        let mut cursor = self.graph.execute(q).await?;
        match cursor.next().await? {
            Some(row) => Ok(int(&row, "deleted")?.max(0) as usize),
            None => Ok(0),
        }
    }
}

#[async_trait]
impl MetadataStore for Neo4jMetadataStore {
    async fn save(&self, metadata: DocumentMetadata) -> Result<String> {
        let id = if metadata.id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            metadata.id.clone()
        };
        self.graph
            .run(
                query(
                    "MERGE (p:Pdf {id: $id})
                     SET p.filename = $filename, p.object_id = $object_id, p.url = $url,
                         p.file_size = $file_size, p.format = $format, p.created_at = $created_at",
                )
                .param("id", id.clone())
                .param("filename", metadata.filename)
                .param("object_id", metadata.object_id)
                .param("url", metadata.url)
                .param("file_size", metadata.file_size as i64)
                .param("format", metadata.format)
                .param("created_at", to_stored(&metadata.created_at)),
            )
            .await?;
        Ok(id)
    }

    async fn find(&self, id: &str) -> Result<Option<DocumentMetadata>> {
        let cypher = format!("MATCH (p:Pdf {{id: $id}}) RETURN {PDF_FIELDS}");
        let mut found = self
            .collect(query(&cypher).param("id", id.to_string()), row_to_metadata)
            .await?;
        Ok(found.pop())
    }

    async fn list(&self, skip: usize, limit: usize) -> Result<Vec<DocumentMetadata>> {
        let cypher = format!(
            "MATCH (p:Pdf) RETURN {PDF_FIELDS}
             ORDER BY p.created_at DESC SKIP $skip LIMIT $limit"
        );
        self.collect(
            query(&cypher)
                .param("skip", skip.min(i64::MAX as usize) as i64)
                .param("limit", limit.min(i64::MAX as usize) as i64),
            row_to_metadata,
        )
        .await
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool> {
        let deleted = self
            .count(
                query(
                    "MATCH (p:Pdf {id: $id})
                     WITH p, p.id AS pid
                     DETACH DELETE p
                     RETURN count(pid) AS deleted",
                )
                .param("id", id.to_string()),
            )
            .await?;
        Ok(deleted > 0)
    }

    async fn save_query(&self, record: QueryRecord) -> Result<String> {
        let id = if record.id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            record.id.clone()
        };
        self.graph
            .run(
                query(
                    "CREATE (q:Query {id: $id, pdf_id: $pdf_id, query: $query,
                                      response: $response, created_at: $created_at})
                     WITH q
                     MATCH (p:Pdf {id: $pdf_id})
                     MERGE (p)-[:HAS_QUERY]->(q)",
                )
                .param("id", id.clone())
                .param("pdf_id", record.pdf_id)
                .param("query", record.query)
                .param("response", record.response)
                .param("created_at", to_stored(&record.created_at)),
            )
            .await?;
        Ok(id)
    }

    async fn list_queries(
        &self,
        pdf_id: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<QueryRecord>> {
        let cypher = format!(
            "MATCH (q:Query {{pdf_id: $pdf_id}}) RETURN {QUERY_FIELDS}
             ORDER BY q.created_at DESC SKIP $skip LIMIT $limit"
        );
        self.collect(
            query(&cypher)
                .param("pdf_id", pdf_id.to_string())
                .param("skip", skip.min(i64::MAX as usize) as i64)
                .param("limit", limit.min(i64::MAX as usize) as i64),
            row_to_query,
        )
        .await
    }

    async fn delete_queries(&self, pdf_id: &str) -> Result<usize> {
        self.count(
            query(
                "MATCH (q:Query {pdf_id: $pdf_id})
                 WITH q, q.id AS qid
                 DETACH DELETE q
                 RETURN count(qid) AS deleted",
            )
            .param("pdf_id", pdf_id.to_string()),
        )
        .await
    }
}
