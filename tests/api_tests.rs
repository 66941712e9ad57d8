mod common;

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use common::{fox_pipeline, ConceptEmbedder, ScriptedModel, FOX};
use pdf_query_rag::api;
use pdf_query_rag::app_state::AppState;
use pdf_query_rag::config::AppConfig;
use pdf_query_rag::models::{Document, DocumentMetadata, QueryRecord};
use pdf_query_rag::object_store::LocalObjectStore;
use pdf_query_rag::store::{InMemoryMetadataStore, MetadataStore};

const BOUNDARY: &str = "frontera-de-prueba";

struct TestApp {
    router: Router,
    state: AppState,
    _dir: TempDir,
}

fn test_app() -> TestApp {
    test_app_with(Arc::new(InMemoryMetadataStore::new()))
}

fn test_app_with(metadata: Arc<dyn MetadataStore>) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = fox_pipeline(
        Arc::new(ConceptEmbedder::new()),
        Arc::new(ScriptedModel::replying(
            "ANSWER: The fox jumps over the lazy dog.\nVISUALIZATION: None",
        )),
    );
    let state = AppState::new(
        AppConfig::default(),
        Arc::new(pipeline),
        metadata,
        Arc::new(LocalObjectStore::new(dir.path(), "http://test")),
        None,
    );
    TestApp {
        router: api::create_router(state.clone()),
        state,
        _dir: dir,
    }
}

/// Almacén cuya base de datos no responde.
struct UnavailableMetadataStore;

#[async_trait]
impl MetadataStore for UnavailableMetadataStore {
    async fn save(&self, _metadata: DocumentMetadata) -> anyhow::Result<String> {
        Err(anyhow!("base de datos caída"))
    }

    async fn find(&self, _id: &str) -> anyhow::Result<Option<DocumentMetadata>> {
        Ok(None)
    }

    async fn list(&self, _skip: usize, _limit: usize) -> anyhow::Result<Vec<DocumentMetadata>> {
        Ok(Vec::new())
    }

    async fn delete_by_id(&self, _id: &str) -> anyhow::Result<bool> {
        Ok(false)
    }

    async fn save_query(&self, _record: QueryRecord) -> anyhow::Result<String> {
        Err(anyhow!("base de datos caída"))
    }

    async fn list_queries(
        &self,
        _pdf_id: &str,
        _skip: usize,
        _limit: usize,
    ) -> anyhow::Result<Vec<QueryRecord>> {
        Ok(Vec::new())
    }

    async fn delete_queries(&self, _pdf_id: &str) -> anyhow::Result<usize> {
        Ok(0)
    }
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn upload(filename: &str, bytes: &[u8]) -> Request<Body> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/pdf\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/v1/upload_pdf")
        .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))
        .unwrap()
}

async fn upload_pdf(app: &TestApp) -> String {
    let (status, body) = send(app, upload("informe.pdf", b"%PDF-1.4 de mentira")).await;
    assert_eq!(status, StatusCode::OK);
    body["data"]["pdf_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn rejects_non_pdf_uploads() {
    let app = test_app();
    let (status, body) = send(&app, upload("notas.txt", b"hola")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn uploaded_pdf_is_listed_and_served() {
    let app = test_app();
    let pdf_id = upload_pdf(&app).await;

    let (status, body) = send(&app, get("/api/v1/pdfs")).await;
    assert_eq!(status, StatusCode::OK);
    let listed = body.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["id"], pdf_id);
    assert_eq!(listed[0]["filename"], "informe.pdf");
    assert_eq!(listed[0]["format"], "pdf");

    let object_id = listed[0]["object_id"].as_str().unwrap();
    let response = app
        .router
        .clone()
        .oneshot(get(&format!("/files/{object_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/pdf");
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"%PDF-1.4 de mentira");
}

#[tokio::test]
async fn unreadable_pdf_reports_extraction_stage() {
    let app = test_app();
    let pdf_id = upload_pdf(&app).await;

    let (status, body) = send(
        &app,
        post_json("/api/v1/query", json!({ "pdf_id": pdf_id, "query": "What does the fox do?" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["stage"], "extracted");

    let (_, history) = send(&app, get(&format!("/api/v1/history/{pdf_id}"))).await;
    assert_eq!(history, json!([]));
}

#[tokio::test]
async fn query_is_answered_recorded_and_deleted_with_its_pdf() {
    let app = test_app();
    let pdf_id = upload_pdf(&app).await;
    app.state
        .pipeline
        .remember_document(Arc::new(Document::from_text(pdf_id.clone(), FOX)));

    let (status, body) = send(
        &app,
        post_json(
            "/api/v1/query",
            json!({ "pdf_id": pdf_id, "query": "What does the fox do?", "top_k": 1 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "The fox jumps over the lazy dog.");
    assert_eq!(body["sources"][0]["chunk_index"], 1);
    assert_eq!(body["visualizations"], json!([]));
    assert!(body["id"].as_str().is_some_and(|id| !id.is_empty()));

    let (_, history) = send(&app, get(&format!("/api/v1/history/{pdf_id}"))).await;
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["query"], "What does the fox do?");

    let (_, with_queries) = send(&app, get("/api/v1/pdfs_with_queries")).await;
    assert_eq!(with_queries[0]["id"], pdf_id);
    assert_eq!(with_queries[0]["queries"].as_array().unwrap().len(), 1);

    let (_, status_body) = send(&app, get("/api/status")).await;
    assert_eq!(status_body["active_queries"], 0);

    let delete = Request::builder()
        .method("DELETE")
        .uri(format!("/api/v1/pdfs/{pdf_id}"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, delete).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted_queries_count"], 1);
    assert!(app.state.pipeline.cached_document(&pdf_id).is_none());

    let (status, _) = send(&app, get(&format!("/api/v1/history/{pdf_id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_pdf_is_not_found() {
    let app = test_app();
    let (status, _) = send(
        &app,
        post_json("/api/v1/query", json!({ "pdf_id": "nada", "query": "¿hola?" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let delete = Request::builder()
        .method("DELETE")
        .uri("/api/v1/pdfs/nada")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, delete).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn empty_query_is_rejected() {
    let app = test_app();
    let pdf_id = upload_pdf(&app).await;
    let (status, _) = send(
        &app,
        post_json("/api/v1/query", json!({ "pdf_id": pdf_id, "query": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn failed_metadata_save_removes_the_stored_file() {
    let app = test_app_with(Arc::new(UnavailableMetadataStore));
    let (status, body) = send(&app, upload("informe.pdf", b"%PDF-1.4 de mentira")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].is_string());

    let left: Vec<_> = std::fs::read_dir(app._dir.path()).unwrap().collect();
    assert!(left.is_empty(), "quedaron ficheros: {left:?}");
}
